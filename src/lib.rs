#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::too_many_arguments)]

//! Strata: a multi-pass deferred renderer on wgpu.
//!
//! A [`Renderer`] turns a [`Scene`] and a [`Viewport`] into a display-ready
//! image through skinning, a G-buffer, cascaded shadows, a voxel GI volume,
//! a procedural sky, deferred shading, TAA, bloom and tonemapping, with line,
//! voxel and light-icon overlays on top.

pub mod errors;
pub mod renderer;
pub mod scene;

pub use errors::{Result, ShaderError, StrataError};
pub use renderer::{
    FramePolicy, GpuStats, PassStatus, RenderSettings, Renderer, RendererContext, SettingsUi,
    TextureHandle,
};
pub use scene::{
    Camera, DirectionalLight, Entity, Material, MeshData, PointLight, Scene, Skeleton, Viewport,
};
