//! Shared helpers for the GPU integration tests.
//!
//! Every GPU test goes through [`headless`]; on machines without an adapter
//! it returns `None` and the test returns early.

#![allow(dead_code)]

use std::sync::Arc;

use glam::{Mat4, Vec3, Vec4};

use strata::renderer::readback;
use strata::scene::primitives::create_box;
use strata::scene::{GpuMesh, Material};
use strata::{Camera, RenderSettings, Renderer, RendererContext, Scene, TextureHandle, Viewport};

pub const WIDTH: u32 = 96;
pub const HEIGHT: u32 = 64;

pub fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Small settings that keep GPU tests fast.
pub fn test_settings() -> RenderSettings {
    let mut settings = RenderSettings::default();
    settings.voxels.size = 16;
    settings.shadows.resolution = 256;
    settings.atmosphere.environment_size = 16;
    settings.atmosphere.irradiance_size = 8;
    settings
}

pub fn camera() -> Camera {
    Camera::perspective(60.0, WIDTH as f32 / HEIGHT as f32, 0.1, 100.0).looking_at(
        Vec3::new(0.0, 1.5, 4.0),
        Vec3::ZERO,
        Vec3::Y,
    )
}

pub fn viewport() -> Viewport {
    Viewport::new(WIDTH, HEIGHT, camera())
}

/// A renderer on the default adapter, or `None` when there is none.
pub fn headless(settings: RenderSettings) -> Option<(Renderer, Viewport)> {
    init_logger();
    let viewport = viewport();
    match Renderer::new_headless(settings, &viewport) {
        Ok(renderer) => Some((renderer, viewport)),
        Err(err) => {
            eprintln!("skipping GPU test: {err}");
            None
        }
    }
}

/// Like [`headless`], with program templates replaced before the first
/// compile.
pub fn headless_with_sources(
    settings: RenderSettings,
    sources: &[(&str, &str)],
) -> Option<(Renderer, Viewport)> {
    init_logger();
    let viewport = viewport();
    let ctx = match RendererContext::new_headless(&settings) {
        Ok(ctx) => ctx,
        Err(err) => {
            eprintln!("skipping GPU test: {err}");
            return None;
        }
    };
    let renderer = Renderer::with_shader_sources(ctx, settings, &viewport, sources)
        .expect("renderer construction failed");
    Some((renderer, viewport))
}

/// Entity ids of a whole `R32Uint` target.
pub fn read_u32(renderer: &Renderer, handle: TextureHandle) -> Vec<u32> {
    let ctx = renderer.context();
    let bytes = readback::read_texture(&ctx.device, &ctx.queue, &ctx.targets[handle].texture)
        .expect("readback failed");
    bytes
        .chunks_exact(4)
        .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect()
}

/// One unit cube at the origin with a plain material.
pub fn spawn_cube(renderer: &Renderer, scene: &mut Scene, transform: Mat4) -> strata::Entity {
    let mesh = GpuMesh::upload(renderer.context(), &create_box(1.0, 1.0, 1.0), "Test Cube");
    let material = Arc::new(Material {
        albedo: Vec4::new(0.8, 0.2, 0.2, 1.0),
        ..Material::default()
    });
    scene.spawn_mesh(mesh, Some(material), transform)
}

/// RGBA floats of a whole `Rgba8Unorm` or `Rgba16Float` target.
pub fn read_rgba(renderer: &Renderer, handle: TextureHandle) -> Vec<[f32; 4]> {
    let ctx = renderer.context();
    let target = &ctx.targets[handle];
    let bytes = readback::read_texture(&ctx.device, &ctx.queue, &target.texture)
        .expect("readback failed");
    match target.format() {
        wgpu::TextureFormat::Rgba16Float => readback::decode_rgba16f(&bytes),
        _ => readback::decode_rgba8(&bytes),
    }
}

pub fn final_image(renderer: &Renderer) -> Vec<[f32; 4]> {
    let handle = renderer.final_texture().expect("no final image");
    read_rgba(renderer, handle)
}
