use glam::{Mat4, Vec3, Vec4};

use super::mesh::Aabb;

/// Perspective camera supplied by the host.
///
/// Right-handed, looking down `-Z` in view space, with the `[0, 1]` clip
/// depth range wgpu expects (`near → 0`, `far → 1`).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Camera {
    /// Vertical field of view in radians.
    pub fov_y: f32,
    pub aspect: f32,
    pub near: f32,
    pub far: f32,

    position: Vec3,
    view: Mat4,
    projection: Mat4,
}

impl Default for Camera {
    fn default() -> Self {
        Self::perspective(60.0, 16.0 / 9.0, 0.1, 1000.0)
    }
}

impl Camera {
    /// `fov_y_degrees` is converted to radians internally.
    #[must_use]
    pub fn perspective(fov_y_degrees: f32, aspect: f32, near: f32, far: f32) -> Self {
        let mut cam = Self {
            fov_y: fov_y_degrees.to_radians(),
            aspect,
            near,
            far,
            position: Vec3::ZERO,
            view: Mat4::IDENTITY,
            projection: Mat4::IDENTITY,
        };
        cam.update_projection_matrix();
        cam
    }

    pub fn update_projection_matrix(&mut self) {
        self.projection = Mat4::perspective_rh(self.fov_y, self.aspect, self.near, self.far);
    }

    pub fn set_aspect(&mut self, aspect: f32) {
        if aspect.is_finite() && aspect > 0.0 {
            self.aspect = aspect;
            self.update_projection_matrix();
        }
    }

    /// Places the camera at `eye` looking at `target`.
    pub fn look_at(&mut self, eye: Vec3, target: Vec3, up: Vec3) {
        self.position = eye;
        self.view = Mat4::look_at_rh(eye, target, up);
    }

    /// Builder-style [`look_at`](Self::look_at).
    #[must_use]
    pub fn looking_at(mut self, eye: Vec3, target: Vec3, up: Vec3) -> Self {
        self.look_at(eye, target, up);
        self
    }

    /// Sets the view from an arbitrary world transform of the camera.
    pub fn set_world_transform(&mut self, world: Mat4) {
        self.position = world.w_axis.truncate();
        self.view = world.inverse();
    }

    #[inline]
    #[must_use]
    pub fn position(&self) -> Vec3 {
        self.position
    }

    #[inline]
    #[must_use]
    pub fn view(&self) -> Mat4 {
        self.view
    }

    #[inline]
    #[must_use]
    pub fn projection(&self) -> Mat4 {
        self.projection
    }

    #[inline]
    #[must_use]
    pub fn view_projection(&self) -> Mat4 {
        self.projection * self.view
    }

    #[must_use]
    pub fn frustum(&self) -> Frustum {
        Frustum::from_matrix(self.view_projection())
    }
}

/// Six clip planes in world space, normals pointing inward.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Frustum {
    planes: [Vec4; 6], // Left, Right, Bottom, Top, Near, Far
}

impl Frustum {
    /// Gribb-Hartmann plane extraction for a `[0, 1]` depth-range matrix.
    #[must_use]
    pub fn from_matrix(m: Mat4) -> Self {
        let rows = [m.row(0), m.row(1), m.row(2), m.row(3)];

        let mut planes = [
            rows[3] + rows[0],
            rows[3] - rows[0],
            rows[3] + rows[1],
            rows[3] - rows[1],
            rows[2],
            rows[3] - rows[2],
        ];

        for plane in &mut planes {
            let length = plane.truncate().length();
            if length > f32::EPSILON {
                *plane /= length;
            }
        }

        Self { planes }
    }

    #[inline]
    #[must_use]
    pub fn planes(&self) -> &[Vec4; 6] {
        &self.planes
    }

    /// Signed distance of `point` to plane `index` (positive is inside).
    #[inline]
    #[must_use]
    pub fn distance(&self, index: usize, point: Vec3) -> f32 {
        self.planes[index].truncate().dot(point) + self.planes[index].w
    }

    #[must_use]
    pub fn intersects_sphere(&self, center: Vec3, radius: f32) -> bool {
        (0..6).all(|i| self.distance(i, center) >= -radius)
    }

    /// Returns `false` only when all 8 corners of `aabb` lie outside a
    /// single plane. Boxes straddling a corner of the frustum may pass.
    #[must_use]
    pub fn contains_aabb(&self, aabb: &Aabb) -> bool {
        let corners = aabb.corners();
        for i in 0..6 {
            if corners.iter().all(|&c| self.distance(i, c) < 0.0) {
                return false;
            }
        }
        true
    }
}
