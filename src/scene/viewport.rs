use glam::{Mat4, UVec2, Vec2};

use super::camera::Camera;

/// Number of sub-pixel jitter phases before the sequence repeats.
pub const JITTER_PHASES: u32 = 16;

/// Render/display resolution plus the camera, supplied by the host.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Viewport {
    /// Resolution of every viewport-sized render target.
    pub size: UVec2,
    /// Resolution of the window region the final image is shown in.
    pub display_size: UVec2,
    pub camera: Camera,
}

impl Viewport {
    /// Zero dimensions are clamped to 1.
    #[must_use]
    pub fn new(width: u32, height: u32, camera: Camera) -> Self {
        let size = UVec2::new(width, height).max(UVec2::ONE);
        let mut viewport = Self {
            size,
            display_size: size,
            camera,
        };
        viewport.camera.set_aspect(viewport.aspect());
        viewport
    }

    pub fn resize(&mut self, width: u32, height: u32) {
        self.size = UVec2::new(width, height).max(UVec2::ONE);
        self.display_size = self.size;
        let aspect = self.aspect();
        self.camera.set_aspect(aspect);
    }

    #[inline]
    #[must_use]
    pub fn aspect(&self) -> f32 {
        self.size.x as f32 / self.size.y as f32
    }

    #[inline]
    #[must_use]
    pub fn contains(&self, x: u32, y: u32) -> bool {
        x < self.size.x && y < self.size.y
    }

    /// Clip-space jitter offset for `frame`, in `[-1/size, 1/size]`.
    #[must_use]
    pub fn jitter(&self, frame: u64) -> Vec2 {
        let index = (frame % u64::from(JITTER_PHASES)) as u32 + 1;
        let halton = Vec2::new(halton(index, 2), halton(index, 3));
        (halton * 2.0 - 1.0) / self.size.as_vec2()
    }

    /// Camera projection with `jitter` added to the x/y terms of column 2.
    #[must_use]
    pub fn jittered_projection(&self, jitter: Vec2) -> Mat4 {
        let mut projection = self.camera.projection();
        projection.z_axis.x += jitter.x;
        projection.z_axis.y += jitter.y;
        projection
    }
}

impl Default for Viewport {
    fn default() -> Self {
        Self::new(1280, 720, Camera::default())
    }
}

/// Radical inverse of `index` in `base`.
#[must_use]
pub fn halton(mut index: u32, base: u32) -> f32 {
    let mut f = 1.0f32;
    let mut r = 0.0f32;
    while index > 0 {
        f /= base as f32;
        r += f * (index % base) as f32;
        index /= base;
    }
    r
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn halton_base_2_prefix() {
        let expected = [0.5, 0.25, 0.75, 0.125];
        for (i, e) in expected.iter().enumerate() {
            assert!((halton(i as u32 + 1, 2) - e).abs() < 1e-6);
        }
    }

    #[test]
    fn jitter_stays_within_one_pixel() {
        let vp = Viewport::new(200, 100, Camera::default());
        for frame in 0..64 {
            let j = vp.jitter(frame);
            assert!(j.x.abs() <= 1.0 / 200.0 && j.y.abs() <= 1.0 / 100.0, "frame {frame}: {j}");
        }
    }

    #[test]
    fn jitter_repeats_after_all_phases() {
        let vp = Viewport::default();
        assert_eq!(vp.jitter(3), vp.jitter(3 + u64::from(JITTER_PHASES)));
    }

    #[test]
    fn zero_size_is_clamped() {
        let vp = Viewport::new(0, 0, Camera::default());
        assert_eq!(vp.size, UVec2::ONE);
    }
}
