//! Shadow Utilities
//!
//! Pure math for cascaded shadow maps, kept out of the pass so it can be
//! tested without a device.
//!
//! # Provided Functions
//!
//! - Cascade split computation (Practical Split Scheme)
//! - Frustum corner extraction in world space
//! - Stable (radius-quantized, texel-snapped) cascade matrices

use glam::{Mat4, Vec3, Vec4};

/// Number of shadow cascades.
pub const CASCADE_COUNT: usize = 4;

/// Cascade radii are rounded up to multiples of `1 / RADIUS_QUANTUM`.
pub const RADIUS_QUANTUM: f32 = 16.0;

/// Light-space transform of one cascade.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Cascade {
    /// Far end of the cascade as a view-space z (negative, camera looks down -Z).
    pub split_depth: f32,
    /// World-space radius of the bounding sphere, quantized.
    pub radius: f32,
    pub view_proj: Mat4,
}

impl Default for Cascade {
    fn default() -> Self {
        Self {
            split_depth: 0.0,
            radius: 0.0,
            view_proj: Mat4::IDENTITY,
        }
    }
}

// ============================================================================
// Cascade Split Computation
// ============================================================================

/// Computes cascade far distances using the Practical Split Scheme.
///
/// `lambda` blends between uniform (`0.0`) and logarithmic (`1.0`)
/// distribution. The last split always lands on `far`.
#[must_use]
pub fn compute_cascade_splits(near: f32, far: f32, lambda: f32) -> [f32; CASCADE_COUNT] {
    let mut splits = [0.0f32; CASCADE_COUNT];
    for (i, split) in splits.iter_mut().enumerate() {
        let p = (i + 1) as f32 / CASCADE_COUNT as f32;
        let log_split = near * (far / near).powf(p);
        let uni_split = near + (far - near) * p;
        *split = lambda * log_split + (1.0 - lambda) * uni_split;
    }
    splits[CASCADE_COUNT - 1] = far;
    splits
}

// ============================================================================
// Frustum Corners in World Space
// ============================================================================

/// Unprojects the 8 NDC corners (`z = 0` near, `z = 1` far) with the inverse
/// of `view_proj`. The first four are the near plane, the last four the far
/// plane, in matching order.
#[must_use]
pub fn frustum_corners_world(view_proj: Mat4) -> [Vec3; 8] {
    let inv = view_proj.inverse();
    let ndc = [
        Vec3::new(-1.0, 1.0, 0.0),
        Vec3::new(1.0, 1.0, 0.0),
        Vec3::new(1.0, -1.0, 0.0),
        Vec3::new(-1.0, -1.0, 0.0),
        Vec3::new(-1.0, 1.0, 1.0),
        Vec3::new(1.0, 1.0, 1.0),
        Vec3::new(1.0, -1.0, 1.0),
        Vec3::new(-1.0, -1.0, 1.0),
    ];
    ndc.map(|c| inv.project_point3(c))
}

/// Up vector for the light view; `+X` when the light is (anti)parallel to `+Y`.
#[must_use]
pub fn light_up_vector(light_dir: Vec3) -> Vec3 {
    if light_dir.normalize_or_zero().dot(Vec3::Y).abs() > 0.99 {
        Vec3::X
    } else {
        Vec3::Y
    }
}

// ============================================================================
// Cascade Matrices
// ============================================================================

/// Inputs that fully determine the cascade set.
#[derive(Debug, Clone, Copy)]
pub struct CascadeInput {
    /// Unjittered camera view-projection.
    pub camera_view_proj: Mat4,
    pub near: f32,
    pub far: f32,
    /// Normalized direction the light travels.
    pub light_dir: Vec3,
    pub lambda: f32,
    /// Shadow map edge length in texels.
    pub resolution: u32,
}

/// Builds all cascades, near to far. Identical inputs give bit-identical
/// output.
#[must_use]
pub fn compute_cascades(input: &CascadeInput) -> [Cascade; CASCADE_COUNT] {
    let CascadeInput {
        camera_view_proj,
        near,
        far,
        light_dir,
        lambda,
        resolution,
    } = *input;

    let range = far - near;
    let splits = compute_cascade_splits(near, far, lambda);
    let corners = frustum_corners_world(camera_view_proj);
    let up = light_up_vector(light_dir);
    let half_res = resolution.max(1) as f32 / 2.0;

    let mut cascades = [Cascade::default(); CASCADE_COUNT];
    let mut last_split = 0.0;

    for (cascade, &split) in cascades.iter_mut().zip(&splits) {
        let split_dist = (split - near) / range;

        let mut slice = [Vec3::ZERO; 8];
        for j in 0..4 {
            let ray = corners[j + 4] - corners[j];
            slice[j] = corners[j] + ray * last_split;
            slice[j + 4] = corners[j] + ray * split_dist;
        }

        let center = slice.iter().copied().sum::<Vec3>() / 8.0;
        let radius = slice
            .iter()
            .map(|c| c.distance(center))
            .fold(0.0f32, f32::max);
        let radius = (radius * RADIUS_QUANTUM).ceil() / RADIUS_QUANTUM;

        let view = Mat4::look_at_rh(center - light_dir * radius, center, up);
        let mut proj = Mat4::orthographic_rh(-radius, radius, -radius, radius, 0.0, 2.0 * radius);

        // Snap the light-space origin to whole texels.
        let origin = (proj * view) * Vec4::W * half_res;
        let offset = (origin.round() - origin) / half_res;
        proj.w_axis.x += offset.x;
        proj.w_axis.y += offset.y;

        *cascade = Cascade {
            split_depth: -(near + split_dist * range),
            radius,
            view_proj: proj * view,
        };
        last_split = split_dist;
    }

    cascades
}

/// Index of the first cascade whose split lies beyond `view_z` (view-space z,
/// negative in front of the camera). Falls back to the last cascade.
#[must_use]
pub fn select_cascade(cascades: &[Cascade; CASCADE_COUNT], view_z: f32) -> usize {
    cascades
        .iter()
        .position(|c| view_z > c.split_depth)
        .unwrap_or(CASCADE_COUNT - 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vertical_light_switches_up_vector() {
        assert_eq!(light_up_vector(Vec3::NEG_Y), Vec3::X);
        assert_eq!(light_up_vector(Vec3::new(0.3, -0.9, 0.1)), Vec3::Y);
    }

    #[test]
    fn last_split_is_far_plane() {
        let splits = compute_cascade_splits(0.1, 500.0, 0.89);
        assert_eq!(splits[CASCADE_COUNT - 1], 500.0);
    }
}
