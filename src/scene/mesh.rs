//! Mesh & Material Interface
//!
//! CPU-side vertex data ([`MeshData`]) is uploaded once by the importer into a
//! [`GpuMesh`]; the renderer only ever consumes the uploaded buffers by handle.
//!
//! # Vertex Layout
//!
//! A single interleaved stream, 48 bytes per vertex:
//!
//! | Offset | Attribute | Format      |
//! |--------|-----------|-------------|
//! | 0      | position  | `Float32x3` |
//! | 12     | normal    | `Float32x3` |
//! | 24     | uv        | `Float32x2` |
//! | 32     | tangent   | `Float32x4` |
//!
//! The skinning compute shader reads and writes the same layout as a flat
//! `array<f32>` with a stride of 12 floats.

use std::sync::Arc;

use glam::{Mat4, Vec3, Vec4};
use wgpu::util::DeviceExt;

use crate::renderer::context::{RendererContext, TrackedBuffer};

/// Interleaved vertex as stored in GPU vertex buffers.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct Vertex {
    pub position: [f32; 3],
    pub normal: [f32; 3],
    pub uv: [f32; 2],
    pub tangent: [f32; 4],
}

impl Vertex {
    /// Floats per vertex, shared with the skinning shader.
    pub const FLOATS: usize = 12;

    pub const ATTRIBUTES: [wgpu::VertexAttribute; 4] = wgpu::vertex_attr_array![
        0 => Float32x3,
        1 => Float32x3,
        2 => Float32x2,
        3 => Float32x4,
    ];

    #[must_use]
    pub fn layout() -> wgpu::VertexBufferLayout<'static> {
        wgpu::VertexBufferLayout {
            array_stride: std::mem::size_of::<Vertex>() as wgpu::BufferAddress,
            step_mode: wgpu::VertexStepMode::Vertex,
            attributes: &Self::ATTRIBUTES,
        }
    }
}

// ============================================================================
// Axis-Aligned Bounding Box
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Aabb {
    pub min: Vec3,
    pub max: Vec3,
}

impl Aabb {
    #[must_use]
    pub fn new(min: Vec3, max: Vec3) -> Self {
        Self { min, max }
    }

    /// Smallest box containing all `points`, `None` for an empty slice.
    #[must_use]
    pub fn from_points(points: impl IntoIterator<Item = Vec3>) -> Option<Self> {
        let mut iter = points.into_iter();
        let first = iter.next()?;
        let (min, max) = iter.fold((first, first), |(lo, hi), p| (lo.min(p), hi.max(p)));
        Some(Self { min, max })
    }

    #[inline]
    #[must_use]
    pub fn center(&self) -> Vec3 {
        (self.min + self.max) * 0.5
    }

    #[inline]
    #[must_use]
    pub fn extents(&self) -> Vec3 {
        self.max - self.min
    }

    #[must_use]
    pub fn corners(&self) -> [Vec3; 8] {
        let (lo, hi) = (self.min, self.max);
        [
            Vec3::new(lo.x, lo.y, lo.z),
            Vec3::new(lo.x, lo.y, hi.z),
            Vec3::new(lo.x, hi.y, lo.z),
            Vec3::new(lo.x, hi.y, hi.z),
            Vec3::new(hi.x, lo.y, lo.z),
            Vec3::new(hi.x, lo.y, hi.z),
            Vec3::new(hi.x, hi.y, lo.z),
            Vec3::new(hi.x, hi.y, hi.z),
        ]
    }

    /// World-space box enclosing this box after `matrix`.
    #[must_use]
    pub fn transform(&self, matrix: &Mat4) -> Self {
        let corners = self.corners().map(|c| matrix.transform_point3(c));
        let mut min = Vec3::splat(f32::INFINITY);
        let mut max = Vec3::splat(f32::NEG_INFINITY);
        for c in corners {
            min = min.min(c);
            max = max.max(c);
        }
        Self { min, max }
    }
}

// ============================================================================
// CPU Mesh Data
// ============================================================================

#[derive(Debug, Clone, Default)]
pub struct MeshData {
    pub vertices: Vec<Vertex>,
    pub indices: Vec<u32>,
}

impl MeshData {
    #[must_use]
    pub fn new(vertices: Vec<Vertex>, indices: Vec<u32>) -> Self {
        Self { vertices, indices }
    }

    #[must_use]
    pub fn bounds(&self) -> Option<Aabb> {
        Aabb::from_points(self.vertices.iter().map(|v| Vec3::from_array(v.position)))
    }
}

// ============================================================================
// Uploaded Mesh
// ============================================================================

/// Vertex and index buffers uploaded by the asset importer.
///
/// The vertex buffer carries `STORAGE` usage so the skinning pass can read it
/// as a flat float array.
#[derive(Debug)]
pub struct GpuMesh {
    pub vertex_buffer: TrackedBuffer,
    pub index_buffer: TrackedBuffer,
    pub vertex_count: u32,
    pub index_count: u32,
    /// Local-space bounds; meshes without bounds are never culled.
    pub bounds: Option<Aabb>,
}

impl GpuMesh {
    #[must_use]
    pub fn upload(ctx: &RendererContext, data: &MeshData, label: &str) -> Arc<Self> {
        let vertex_buffer = ctx.track_buffer(ctx.device.create_buffer_init(
            &wgpu::util::BufferInitDescriptor {
                label: Some(&format!("{label} Vertices")),
                contents: bytemuck::cast_slice(&data.vertices),
                usage: wgpu::BufferUsages::VERTEX | wgpu::BufferUsages::STORAGE,
            },
        ));
        let index_buffer = ctx.track_buffer(ctx.device.create_buffer_init(
            &wgpu::util::BufferInitDescriptor {
                label: Some(&format!("{label} Indices")),
                contents: bytemuck::cast_slice(&data.indices),
                usage: wgpu::BufferUsages::INDEX,
            },
        ));

        Arc::new(Self {
            vertex_buffer,
            index_buffer,
            vertex_count: data.vertices.len() as u32,
            index_count: data.indices.len() as u32,
            bounds: data.bounds(),
        })
    }
}

// ============================================================================
// Material
// ============================================================================

/// Sampled texture uploaded by the importer.
#[derive(Debug)]
pub struct GpuTexture {
    pub texture: wgpu::Texture,
    pub view: wgpu::TextureView,
}

impl GpuTexture {
    /// Uploads tightly packed RGBA8 pixels (`width * height * 4` bytes).
    #[must_use]
    pub fn from_rgba8(
        ctx: &RendererContext,
        width: u32,
        height: u32,
        pixels: &[u8],
        srgb: bool,
        label: &str,
    ) -> Arc<Self> {
        let format = if srgb {
            wgpu::TextureFormat::Rgba8UnormSrgb
        } else {
            wgpu::TextureFormat::Rgba8Unorm
        };
        let texture = ctx.device.create_texture_with_data(
            &ctx.queue,
            &wgpu::TextureDescriptor {
                label: Some(label),
                size: wgpu::Extent3d {
                    width,
                    height,
                    depth_or_array_layers: 1,
                },
                mip_level_count: 1,
                sample_count: 1,
                dimension: wgpu::TextureDimension::D2,
                format,
                usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
                view_formats: &[],
            },
            wgpu::util::TextureDataOrder::LayerMajor,
            pixels,
        );
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        Arc::new(Self { texture, view })
    }
}

/// Metallic-roughness material. Missing textures resolve to the
/// [`RendererContext`] defaults at draw time.
#[derive(Debug, Clone)]
pub struct Material {
    pub albedo: Vec4,
    pub metallic: f32,
    pub roughness: f32,
    pub emissive: Vec3,
    pub albedo_map: Option<Arc<GpuTexture>>,
    pub normal_map: Option<Arc<GpuTexture>>,
    pub metallic_roughness_map: Option<Arc<GpuTexture>>,
}

impl Default for Material {
    fn default() -> Self {
        Self {
            albedo: Vec4::ONE,
            metallic: 0.0,
            roughness: 1.0,
            emissive: Vec3::ZERO,
            albedo_map: None,
            normal_map: None,
            metallic_roughness_map: None,
        }
    }
}
