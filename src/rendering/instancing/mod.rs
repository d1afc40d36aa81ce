mod dispatcher;
mod error;
mod jobs;
pub mod layouts;
mod registry;
mod render_system;
mod system_with_tokens;
mod token;

pub use dispatcher::{Dispatcher, DispatcherId};
pub use error::InstancingError;
pub use registry::{InstancingWorld, TokenAssignment};
pub use render_system::InstancedRenderSystem;
pub use system_with_tokens::{SystemWithTokens, AUTO_TRIM_IDLE};
pub use token::{InstanceToken, TokenId, DEFAULT_BUFFER_SIZE};

use crate::math::is_pow2;

/// Batch sizes served by a dispatcher, indexed by level.
pub const BATCH_SIZE_LEVELS: [usize; 16] = [
    1, 2, 4, 8, 16, 32, 64, 128, 256, 512, 1024, 2048, 4096, 8192, 16384, 32768,
];
pub const LEVEL_COUNT: usize = BATCH_SIZE_LEVELS.len();
pub const MAX_BATCH_SIZE: usize = BATCH_SIZE_LEVELS[LEVEL_COUNT - 1];
/// Used for batch sizes outside the table (1024).
pub const FALLBACK_LEVEL: usize = 10;

pub fn level_for_batch_size(batch_size: usize, dispatcher_name: &str) -> usize {
    if is_pow2(batch_size) && batch_size <= MAX_BATCH_SIZE {
        batch_size.trailing_zeros() as usize
    } else {
        if cfg!(debug_assertions) {
            log::warn!(
                "[{}] size = {} not power of 2 or out of range",
                dispatcher_name,
                batch_size
            );
        }
        FALLBACK_LEVEL
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn levels_match_table() {
        for (level, &batch_size) in BATCH_SIZE_LEVELS.iter().enumerate() {
            assert_eq!(level_for_batch_size(batch_size, "D"), level);
        }
        assert_eq!(level_for_batch_size(3, "D"), FALLBACK_LEVEL);
        assert_eq!(level_for_batch_size(65536, "D"), FALLBACK_LEVEL);
        assert_eq!(level_for_batch_size(0, "D"), FALLBACK_LEVEL);
    }
}
