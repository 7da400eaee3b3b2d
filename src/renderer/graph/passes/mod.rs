//! Render passes, in frame order.
//!
//! Each pass owns its pipelines and targets, declares its resources through
//! [`RenderPass`](super::RenderPass) and records work through an inherent
//! `execute`. Inputs produced by other passes arrive as [`TextureHandle`]s.
//!
//! [`TextureHandle`]: crate::renderer::targets::TextureHandle

pub mod atmosphere;
pub mod bloom;
pub mod brdf_lut;
pub mod debug_lines;
pub mod deferred;
pub mod gbuffer;
pub mod icons;
pub mod shadow;
pub mod skinning;
pub mod taa;
pub mod tonemap;
pub mod voxel_debug;
pub mod voxelize;

pub use atmosphere::AtmospherePass;
pub use bloom::BloomPass;
pub use brdf_lut::BrdfLutPass;
pub use debug_lines::{DebugLines, DebugLinesPass, LineVertex};
pub use deferred::{DeferredInputs, DeferredShadingPass, MAX_POINT_LIGHTS, select_point_lights};
pub use gbuffer::{GBufferPass, GBufferTargets};
pub use icons::IconPass;
pub use shadow::{ShadowCascadePass, ShadowUniforms};
pub use skinning::SkinningPass;
pub use taa::{TaaInputs, TaaResolvePass};
pub use tonemap::{TonemapMode, TonemapPass, tonemap_reference};
pub use voxel_debug::VoxelDebugPass;
pub use voxelize::{VoxelizationPass, axis_view_projections, reduce_voxel_octant};

use crate::renderer::frame::ObjectBuffer;
use crate::scene::MeshInstance;

/// Workgroup count covering `extent` items.
#[inline]
pub(crate) fn groups(extent: u32, workgroup: u32) -> u32 {
    extent.div_ceil(workgroup).max(1)
}

pub(crate) fn color_attachment(
    view: &wgpu::TextureView,
    clear: Option<wgpu::Color>,
) -> Option<wgpu::RenderPassColorAttachment<'_>> {
    Some(wgpu::RenderPassColorAttachment {
        view,
        depth_slice: None,
        resolve_target: None,
        ops: wgpu::Operations {
            load: clear.map_or(wgpu::LoadOp::Load, wgpu::LoadOp::Clear),
            store: wgpu::StoreOp::Store,
        },
    })
}

/// Issues one indexed draw of `instance`, with object record `index` bound
/// at `object_group`.
pub(crate) fn draw_mesh(
    pass: &mut wgpu::RenderPass<'_>,
    objects: &ObjectBuffer,
    object_group: u32,
    index: usize,
    instance: &MeshInstance,
    vertices: &wgpu::Buffer,
) {
    if instance.mesh.index_count == 0 {
        return;
    }
    pass.set_bind_group(object_group, objects.bind_group(), &[objects.offset(index)]);
    pass.set_vertex_buffer(0, vertices.slice(..));
    pass.set_index_buffer(
        instance.mesh.index_buffer.slice(..),
        wgpu::IndexFormat::Uint32,
    );
    pass.draw_indexed(0..instance.mesh.index_count, 0, 0..1);
}
