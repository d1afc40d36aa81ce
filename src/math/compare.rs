use glam::{Mat4, Vec3, Vec4};

/// Squared distance under which two values count as unchanged. Keeps float
/// jitter from the host transform hierarchy from triggering uploads.
pub const EQUALITY_EPSILON_SQ: f32 = 1e-10;

pub fn vec3_approx_eq(a: Vec3, b: Vec3) -> bool {
    (a - b).length_squared() < EQUALITY_EPSILON_SQ
}

pub fn color_approx_eq(a: Vec4, b: Vec4) -> bool {
    (a - b).length_squared() < EQUALITY_EPSILON_SQ
}

pub fn matrix_approx_eq(a: &Mat4, b: &Mat4) -> bool {
    let diff = *a - *b;
    let distance_sq = diff.x_axis.length_squared()
        + diff.y_axis.length_squared()
        + diff.z_axis.length_squared()
        + diff.w_axis.length_squared();
    distance_sq < EQUALITY_EPSILON_SQ
}
