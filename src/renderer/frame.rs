//! Per-Frame Shared Uniforms
//!
//! Two buffers are shared by every pass that touches scene geometry:
//!
//! - [`FrameUniforms`]: camera matrices (current and previous), jitter and
//!   viewport size, one copy per frame.
//! - [`ObjectBuffer`]: one 256-byte [`ObjectUniforms`] record per mesh,
//!   addressed with a dynamic offset. The shadow, G-buffer and voxelization
//!   passes all draw from the same records, so a mesh's transform and
//!   material are uploaded once per frame.

use glam::{Mat3, Mat4, UVec4, Vec3, Vec4};

use crate::renderer::context::{RendererContext, TrackedBuffer};
use crate::renderer::pipeline::entries;
use crate::scene::{Entity, Material, MeshInstance};

/// Rounds `value` up to a multiple of `alignment`.
#[inline]
#[must_use]
pub fn align_to(value: u32, alignment: u32) -> u32 {
    value.div_ceil(alignment.max(1)) * alignment.max(1)
}

// ============================================================================
// Frame uniforms
// ============================================================================

/// Matches `FrameUniforms` in `chunks/frame.wgsl`.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct FrameUniforms {
    pub view: Mat4,
    /// Jittered when TAA is active.
    pub proj: Mat4,
    pub view_proj: Mat4,
    pub inv_view_proj: Mat4,
    pub prev_view_proj: Mat4,
    pub camera_position: Vec4,
    /// xy: current NDC jitter, zw: previous.
    pub jitter: Vec4,
    /// width, height, 1 / width, 1 / height
    pub viewport: Vec4,
    /// near, far, frame index, unused
    pub params: Vec4,
}

impl Default for FrameUniforms {
    fn default() -> Self {
        Self {
            view: Mat4::IDENTITY,
            proj: Mat4::IDENTITY,
            view_proj: Mat4::IDENTITY,
            inv_view_proj: Mat4::IDENTITY,
            prev_view_proj: Mat4::IDENTITY,
            camera_position: Vec4::W,
            jitter: Vec4::ZERO,
            viewport: Vec4::ONE,
            params: Vec4::ZERO,
        }
    }
}

// ============================================================================
// Object uniforms
// ============================================================================

/// Matches `ObjectUniforms` in `chunks/object.wgsl`. Exactly 256 bytes, the
/// largest `min_uniform_buffer_offset_alignment` wgpu allows.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct ObjectUniforms {
    pub model: Mat4,
    pub prev_model: Mat4,
    pub normal_matrix: Mat4,
    pub albedo: Vec4,
    pub emissive: Vec4,
    /// x: metallic, y: roughness
    pub material: Vec4,
    /// x: entity id
    pub entity: UVec4,
}

const _: () = assert!(std::mem::size_of::<ObjectUniforms>() == 256);

impl ObjectUniforms {
    #[must_use]
    pub fn new(instance: &MeshInstance, prev_model: Mat4) -> Self {
        let default_material = Material::default();
        let material = instance.material.as_deref().unwrap_or(&default_material);
        let normal_matrix = Mat3::from_mat4(instance.transform).inverse().transpose();
        Self {
            model: instance.transform,
            prev_model,
            normal_matrix: Mat4::from_mat3(normal_matrix),
            albedo: material.albedo,
            emissive: material.emissive.extend(0.0),
            material: Vec4::new(material.metallic, material.roughness, 0.0, 0.0),
            entity: UVec4::new(instance.entity.to_bits(), 0, 0, 0),
        }
    }

    #[inline]
    #[must_use]
    pub fn entity(&self) -> Entity {
        Entity(self.entity.x)
    }

    #[inline]
    #[must_use]
    pub fn emissive(&self) -> Vec3 {
        self.emissive.truncate()
    }
}

/// Grow-only dynamic uniform buffer of [`ObjectUniforms`].
pub struct ObjectBuffer {
    layout: wgpu::BindGroupLayout,
    buffer: TrackedBuffer,
    bind_group: wgpu::BindGroup,
    capacity: u32,
    stride: u32,
    len: u32,
}

impl ObjectBuffer {
    const INITIAL_CAPACITY: u32 = 64;

    #[must_use]
    pub fn new(ctx: &RendererContext) -> Self {
        let layout = ctx
            .device
            .create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some("Object Layout"),
                entries: &[entries::dynamic_uniform(
                    0,
                    wgpu::ShaderStages::VERTEX | wgpu::ShaderStages::FRAGMENT,
                )],
            });
        let min_alignment = ctx.device.limits().min_uniform_buffer_offset_alignment;
        let stride = align_to(std::mem::size_of::<ObjectUniforms>() as u32, min_alignment);
        let (buffer, bind_group) = Self::allocate(ctx, &layout, stride, Self::INITIAL_CAPACITY);
        Self {
            layout,
            buffer,
            bind_group,
            capacity: Self::INITIAL_CAPACITY,
            stride,
            len: 0,
        }
    }

    fn allocate(
        ctx: &RendererContext,
        layout: &wgpu::BindGroupLayout,
        stride: u32,
        capacity: u32,
    ) -> (TrackedBuffer, wgpu::BindGroup) {
        let buffer = ctx.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Object Uniforms"),
            size: u64::from(stride) * u64::from(capacity),
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let bind_group = ctx.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Object BindGroup"),
            layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: wgpu::BindingResource::Buffer(wgpu::BufferBinding {
                    buffer: &buffer,
                    offset: 0,
                    size: wgpu::BufferSize::new(std::mem::size_of::<ObjectUniforms>() as u64),
                }),
            }],
        });
        (buffer, bind_group)
    }

    /// Uploads `objects`, growing the buffer (doubling) when needed.
    pub fn write(&mut self, ctx: &RendererContext, objects: &[ObjectUniforms]) {
        let required = objects.len() as u32;
        if required > self.capacity {
            let mut capacity = self.capacity.max(1);
            while capacity < required {
                capacity = capacity.saturating_mul(2);
            }
            log::debug!("object buffer grows {} -> {capacity}", self.capacity);
            let (buffer, bind_group) = Self::allocate(ctx, &self.layout, self.stride, capacity);
            self.buffer = buffer;
            self.bind_group = bind_group;
            self.capacity = capacity;
        }

        self.len = required;
        if objects.is_empty() {
            return;
        }
        let stride = self.stride as usize;
        let mut bytes = vec![0u8; stride * objects.len()];
        for (chunk, object) in bytes.chunks_exact_mut(stride).zip(objects) {
            let record = bytemuck::bytes_of(object);
            chunk[..record.len()].copy_from_slice(record);
        }
        ctx.queue.write_buffer(&self.buffer, 0, &bytes);
    }

    /// Dynamic offset of record `index`.
    #[inline]
    #[must_use]
    pub fn offset(&self, index: usize) -> u32 {
        index as u32 * self.stride
    }

    #[must_use]
    pub fn layout(&self) -> &wgpu::BindGroupLayout {
        &self.layout
    }

    #[must_use]
    pub fn bind_group(&self) -> &wgpu::BindGroup {
        &self.bind_group
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.len as usize
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

// ============================================================================
// FrameResources
// ============================================================================

/// The frame uniform buffer plus the object records of the current frame.
pub struct FrameResources {
    pub uniforms: FrameUniforms,
    pub buffer: TrackedBuffer,
    pub objects: ObjectBuffer,
}

impl FrameResources {
    #[must_use]
    pub fn new(ctx: &RendererContext) -> Self {
        let uniforms = FrameUniforms::default();
        Self {
            buffer: ctx.create_uniform("Frame Uniforms", &uniforms),
            uniforms,
            objects: ObjectBuffer::new(ctx),
        }
    }

    pub fn upload(&mut self, ctx: &RendererContext, uniforms: FrameUniforms) {
        self.uniforms = uniforms;
        ctx.queue
            .write_buffer(&self.buffer, 0, bytemuck::bytes_of(&self.uniforms));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn align_rounds_up_to_multiple() {
        assert_eq!(align_to(256, 256), 256);
        assert_eq!(align_to(257, 256), 512);
        assert_eq!(align_to(1, 64), 64);
    }

    #[test]
    fn frame_uniforms_match_wgsl_size() {
        // 5 matrices + 4 vectors
        assert_eq!(std::mem::size_of::<FrameUniforms>(), 5 * 64 + 4 * 16);
    }
}
