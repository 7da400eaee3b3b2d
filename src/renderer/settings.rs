//! Renderer Settings
//!
//! Every tunable of the pipeline lives in [`RenderSettings`]. The struct is
//! plain data: the renderer reads the on/off switches once at the top of each
//! frame (see [`FramePolicy`](crate::renderer::FramePolicy)), so flipping a
//! switch mid-frame can never leave two passes disagreeing.
//!
//! Settings round-trip through JSON so an editor can persist them next to
//! its project files:
//!
//! ```rust,ignore
//! use strata::renderer::RenderSettings;
//!
//! let mut settings = RenderSettings::default();
//! settings.voxels.enabled = false;
//! settings.bloom.enabled = false;
//!
//! let json = settings.to_json()?;
//! let restored = RenderSettings::from_json(&json)?;
//! assert_eq!(settings, restored);
//! ```
//!
//! # Defaults
//!
//! | Group      | Field                  | Default                     |
//! |------------|------------------------|-----------------------------|
//! | shadows    | `resolution`           | 4096                        |
//! | shadows    | `split_lambda`         | 0.89                        |
//! | shadows    | `depth_bias_constant`  | 1.25                        |
//! | shadows    | `depth_bias_slope`     | 3.0                         |
//! | voxels     | `size` / `world_size`  | 256 / 80.0                  |
//! | deferred   | `bloom_threshold`      | (0.2126, 0.7152, 0.0722)    |
//! | tonemap    | `exposure` / `gamma`   | 1.0 / 2.2                   |

use glam::{Vec3, Vec4};
use serde::{Deserialize, Serialize};

use crate::errors::{Result, StrataError};

/// Color format of the final, display-ready image.
pub const OUTPUT_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8Unorm;

/// Format of every HDR intermediate (shading, TAA, bloom).
pub const HDR_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba16Float;

/// Upper bound on the voxel volume edge length.
pub const MAX_VOXEL_SIZE: u32 = 512;

// ---------------------------------------------------------------------------
// Per-pass groups
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShadowSettings {
    /// Edge length of every cascade layer in texels.
    pub resolution: u32,
    /// Blend between uniform (`0.0`) and logarithmic (`1.0`) splits.
    pub split_lambda: f32,
    /// Constant depth bias, in depth-buffer units (rounded up on the GPU).
    pub depth_bias_constant: f32,
    pub depth_bias_slope: f32,
}

impl Default for ShadowSettings {
    fn default() -> Self {
        Self {
            resolution: 4096,
            split_lambda: 0.89,
            depth_bias_constant: 1.25,
            depth_bias_slope: 3.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VoxelSettings {
    pub enabled: bool,
    /// Voxels per side; a power of two.
    pub size: u32,
    /// World-space edge length of the voxelized cube (centered at origin).
    pub world_size: f32,
    /// Run the alpha renormalization pass before mip generation.
    pub opacity_correction: bool,
    /// Multiplier on the cone-traced indirect diffuse term.
    pub gi_strength: f32,
}

impl Default for VoxelSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            size: 256,
            world_size: 80.0,
            opacity_correction: false,
            gi_strength: 1.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AtmosphereSettings {
    /// Edge length of each environment cube face.
    pub environment_size: u32,
    /// Edge length of each irradiance cube face.
    pub irradiance_size: u32,
    pub sun_intensity: f32,
}

impl Default for AtmosphereSettings {
    fn default() -> Self {
        Self {
            environment_size: 512,
            irradiance_size: 32,
            sun_intensity: 20.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeferredSettings {
    /// Luminance weights; a pixel feeds bloom when `dot(color, w) > 1`.
    pub bloom_threshold: Vec3,
    /// Scale on image-based ambient light.
    pub ambient_strength: f32,
}

impl Default for DeferredSettings {
    fn default() -> Self {
        Self {
            bloom_threshold: Vec3::new(0.2126, 0.7152, 0.0722),
            ambient_strength: 1.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TaaSettings {
    pub enabled: bool,
    /// Weight of the current frame in the history blend.
    pub blend: f32,
}

impl Default for TaaSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            blend: 0.1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BloomSettings {
    pub enabled: bool,
}

impl Default for BloomSettings {
    fn default() -> Self {
        Self { enabled: true }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TonemapSettings {
    pub exposure: f32,
    pub gamma: f32,
}

impl Default for TonemapSettings {
    fn default() -> Self {
        Self {
            exposure: 1.0,
            gamma: 2.2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DebugSettings {
    pub lines: bool,
    pub icons: bool,
    pub voxel_visualization: bool,
    /// Mip level shown by the voxel visualization.
    pub voxel_mip: u32,
}

impl Default for DebugSettings {
    fn default() -> Self {
        Self {
            lines: true,
            icons: true,
            voxel_visualization: false,
            voxel_mip: 0,
        }
    }
}

// ---------------------------------------------------------------------------
// RenderSettings
// ---------------------------------------------------------------------------

/// Complete pipeline configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderSettings {
    /// Linear HDR color written behind all geometry.
    pub clear_color: Vec4,

    /// GPU adapter selection preference. Not persisted.
    #[serde(skip)]
    pub power_preference: wgpu::PowerPreference,

    pub shadows: ShadowSettings,
    pub voxels: VoxelSettings,
    pub atmosphere: AtmosphereSettings,
    pub deferred: DeferredSettings,
    pub taa: TaaSettings,
    pub bloom: BloomSettings,
    pub tonemap: TonemapSettings,
    pub debug: DebugSettings,
}

impl Default for RenderSettings {
    fn default() -> Self {
        Self {
            clear_color: Vec4::new(0.0, 0.0, 0.0, 1.0),
            power_preference: wgpu::PowerPreference::HighPerformance,
            shadows: ShadowSettings::default(),
            voxels: VoxelSettings::default(),
            atmosphere: AtmosphereSettings::default(),
            deferred: DeferredSettings::default(),
            taa: TaaSettings::default(),
            bloom: BloomSettings::default(),
            tonemap: TonemapSettings::default(),
            debug: DebugSettings::default(),
        }
    }
}

impl RenderSettings {
    pub fn from_json(json: &str) -> Result<Self> {
        let settings: Self = serde_json::from_str(json)?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Rejects values the GPU resources cannot be built with.
    pub fn validate(&self) -> Result<()> {
        let size = self.voxels.size;
        if !size.is_power_of_two() || !(2..=MAX_VOXEL_SIZE).contains(&size) {
            return Err(StrataError::InvalidSetting {
                name: "voxels.size",
                reason: format!("{size} is not a power of two in 2..={MAX_VOXEL_SIZE}"),
            });
        }
        if self.voxels.world_size <= 0.0 {
            return Err(StrataError::InvalidSetting {
                name: "voxels.world_size",
                reason: "must be positive".to_string(),
            });
        }
        for (name, value) in [
            ("shadows.resolution", self.shadows.resolution),
            ("atmosphere.environment_size", self.atmosphere.environment_size),
            ("atmosphere.irradiance_size", self.atmosphere.irradiance_size),
        ] {
            if value == 0 {
                return Err(StrataError::InvalidSetting {
                    name,
                    reason: "must be non-zero".to_string(),
                });
            }
        }
        Ok(())
    }

    /// Number of voxel mip levels, `log2(size)`.
    #[inline]
    #[must_use]
    pub fn voxel_mip_count(&self) -> u32 {
        self.voxels.size.max(2).ilog2()
    }
}
