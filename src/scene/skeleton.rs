use std::sync::Arc;

use glam::Mat4;
use wgpu::util::DeviceExt;

use crate::renderer::context::{RendererContext, TrackedBuffer};

/// Up to four joint influences for one vertex.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct SkinVertex {
    pub joints: [u32; 4],
    pub weights: [f32; 4],
}

/// Per-vertex joint indices and weights, uploaded once per skinned mesh.
#[derive(Debug)]
pub struct GpuSkin {
    pub buffer: TrackedBuffer,
    pub vertex_count: u32,
}

impl GpuSkin {
    #[must_use]
    pub fn upload(ctx: &RendererContext, influences: &[SkinVertex], label: &str) -> Arc<Self> {
        let buffer = ctx.track_buffer(ctx.device.create_buffer_init(
            &wgpu::util::BufferInitDescriptor {
                label: Some(&format!("{label} Skin")),
                contents: bytemuck::cast_slice(influences),
                usage: wgpu::BufferUsages::STORAGE,
            },
        ));
        Arc::new(Self {
            buffer,
            vertex_count: influences.len() as u32,
        })
    }
}

/// Animated pose of a skinned mesh.
///
/// `bone_transforms` is written by the animation system every frame; the
/// skinning pass uploads it and produces the deformed vertex buffer.
#[derive(Debug, Clone)]
pub struct Skeleton {
    pub skin: Arc<GpuSkin>,
    pub bone_transforms: Vec<Mat4>,
}

impl Skeleton {
    #[must_use]
    pub fn new(skin: Arc<GpuSkin>, bone_count: usize) -> Self {
        Self {
            skin,
            bone_transforms: vec![Mat4::IDENTITY; bone_count.max(1)],
        }
    }
}
