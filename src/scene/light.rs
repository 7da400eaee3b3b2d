use glam::{Mat3, Vec3};

/// Sun-like light. Only the first one found in a scene is shaded.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DirectionalLight {
    /// Direction the light travels (from the light toward the scene).
    pub direction: Vec3,
    pub color: Vec3,
    pub intensity: f32,
}

impl DirectionalLight {
    #[must_use]
    pub fn new(direction: Vec3, color: Vec3, intensity: f32) -> Self {
        Self {
            direction,
            color,
            intensity,
        }
    }

    /// Stand-in used when the scene has no directional light: a slightly
    /// tilted, mostly downward direction so the cascade view never
    /// degenerates.
    #[must_use]
    pub fn synthetic() -> Self {
        Self {
            direction: default_light_direction(),
            color: Vec3::ONE,
            intensity: 1.0,
        }
    }

    /// Normalized direction, falling back to the synthetic one when the
    /// stored vector is zero or non-finite.
    #[must_use]
    pub fn safe_direction(&self) -> Vec3 {
        self.direction
            .try_normalize()
            .unwrap_or_else(default_light_direction)
    }
}

impl Default for DirectionalLight {
    fn default() -> Self {
        Self::synthetic()
    }
}

/// `(0.25, -0.9, 0)` rotated 15° about X, clamped to `[-1, 1]` per axis.
#[must_use]
pub fn default_light_direction() -> Vec3 {
    let rotated = Mat3::from_rotation_x(15f32.to_radians()) * Vec3::new(0.25, -0.9, 0.0);
    rotated
        .clamp(Vec3::splat(-1.0), Vec3::splat(1.0))
        .normalize()
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PointLight {
    pub color: Vec3,
    pub intensity: f32,
    /// Distance at which the contribution reaches zero.
    pub radius: f32,
}

impl PointLight {
    #[must_use]
    pub fn new(color: Vec3, intensity: f32, radius: f32) -> Self {
        Self {
            color,
            intensity,
            radius,
        }
    }
}

impl Default for PointLight {
    fn default() -> Self {
        Self::new(Vec3::ONE, 1.0, 10.0)
    }
}
