pub mod bounds;
pub mod compare;

/// Smallest power of two `>= n`; zero rounds up to one.
pub fn ceil_pow2(n: usize) -> usize {
    n.next_power_of_two()
}

pub fn is_pow2(n: usize) -> bool {
    n.is_power_of_two()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ceil_pow2_rounds_up() {
        assert_eq!(ceil_pow2(0), 1);
        assert_eq!(ceil_pow2(1), 1);
        assert_eq!(ceil_pow2(3), 4);
        assert_eq!(ceil_pow2(4), 4);
        assert_eq!(ceil_pow2(1025), 2048);
        assert!(is_pow2(32768));
        assert!(!is_pow2(0));
        assert!(!is_pow2(12));
    }
}
