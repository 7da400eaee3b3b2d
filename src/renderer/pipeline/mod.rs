//! Pipeline Construction
//!
//! - [`shader_manager`]: template expansion, validation and module cache
//! - helpers below: the three pipeline shapes every pass is built from
//!   (fullscreen triangle, mesh raster, compute)
//! - [`checked`]: error-scoped creation, so a pipeline the device rejects
//!   disables its pass instead of aborting

pub mod shader_manager;

pub use shader_manager::{
    CompiledProgram, PreparedShader, ProgramSet, ShaderDefines, ShaderLibrary,
};

use crate::errors::ShaderError;
use crate::scene::Vertex;

/// Depth format shared by the G-buffer and the shadow cascades.
pub const DEPTH_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Depth32Float;

/// Runs `create` inside validation and internal error scopes.
///
/// Source that passed naga can still be rejected by the device: backend
/// translation fails, or a binding disagrees with the pipeline layout. Such
/// errors come back as [`ShaderError::Device`] for `program` and the created
/// object is discarded; without a scope they would reach the uncaptured error
/// handler, which panics.
pub fn checked<T>(
    device: &wgpu::Device,
    program: &str,
    create: impl FnOnce() -> Result<T, ShaderError>,
) -> Result<T, ShaderError> {
    let validation = device.push_error_scope(wgpu::ErrorFilter::Validation);
    let internal = device.push_error_scope(wgpu::ErrorFilter::Internal);
    let created = create();
    // Scopes pop in reverse push order.
    let internal = pollster::block_on(internal.pop());
    let validation = pollster::block_on(validation.pop());

    let value = created?;
    match internal.or(validation) {
        None => Ok(value),
        Some(err) => Err(ShaderError::Device {
            name: program.to_string(),
            message: err.to_string(),
        }),
    }
}

#[must_use]
pub fn layout(
    device: &wgpu::Device,
    label: &str,
    groups: &[&wgpu::BindGroupLayout],
) -> wgpu::PipelineLayout {
    let groups: Vec<Option<&wgpu::BindGroupLayout>> = groups.iter().copied().map(Some).collect();
    device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
        label: Some(label),
        bind_group_layouts: &groups,
        immediate_size: 0,
    })
}

/// Fullscreen triangle drawn with `draw(0..3, 0..1)`; the vertex stage is
/// `vs_fullscreen` from the `fullscreen` chunk.
#[must_use]
pub fn fullscreen(
    device: &wgpu::Device,
    label: &str,
    layout: &wgpu::PipelineLayout,
    program: &CompiledProgram,
    fragment_entry: &str,
    targets: &[Option<wgpu::ColorTargetState>],
) -> wgpu::RenderPipeline {
    device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
        label: Some(label),
        layout: Some(layout),
        vertex: wgpu::VertexState {
            module: &program.module,
            entry_point: Some("vs_fullscreen"),
            buffers: &[],
            compilation_options: wgpu::PipelineCompilationOptions::default(),
        },
        fragment: Some(wgpu::FragmentState {
            module: &program.module,
            entry_point: Some(fragment_entry),
            targets,
            compilation_options: wgpu::PipelineCompilationOptions::default(),
        }),
        primitive: wgpu::PrimitiveState::default(),
        depth_stencil: None,
        multisample: wgpu::MultisampleState::default(),
        multiview_mask: None,
        cache: None,
    })
}

/// Options for pipelines that rasterize scene meshes.
pub struct MeshPipelineDesc<'a> {
    pub label: &'a str,
    pub layout: &'a wgpu::PipelineLayout,
    pub program: &'a CompiledProgram,
    /// `None` for depth-only pipelines.
    pub fragment_entry: Option<&'a str>,
    pub targets: &'a [Option<wgpu::ColorTargetState>],
    pub depth: Option<wgpu::DepthStencilState>,
    pub cull_mode: Option<wgpu::Face>,
    pub conservative: bool,
}

#[must_use]
pub fn mesh(device: &wgpu::Device, desc: &MeshPipelineDesc) -> wgpu::RenderPipeline {
    device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
        label: Some(desc.label),
        layout: Some(desc.layout),
        vertex: wgpu::VertexState {
            module: &desc.program.module,
            entry_point: Some("vs_main"),
            buffers: &[Vertex::layout()],
            compilation_options: wgpu::PipelineCompilationOptions::default(),
        },
        fragment: desc.fragment_entry.map(|entry| wgpu::FragmentState {
            module: &desc.program.module,
            entry_point: Some(entry),
            targets: desc.targets,
            compilation_options: wgpu::PipelineCompilationOptions::default(),
        }),
        primitive: wgpu::PrimitiveState {
            topology: wgpu::PrimitiveTopology::TriangleList,
            front_face: wgpu::FrontFace::Ccw,
            cull_mode: desc.cull_mode,
            conservative: desc.conservative,
            ..Default::default()
        },
        depth_stencil: desc.depth.clone(),
        multisample: wgpu::MultisampleState::default(),
        multiview_mask: None,
        cache: None,
    })
}

#[must_use]
pub fn compute(
    device: &wgpu::Device,
    label: &str,
    layout: &wgpu::PipelineLayout,
    program: &CompiledProgram,
    entry: &str,
) -> wgpu::ComputePipeline {
    device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
        label: Some(label),
        layout: Some(layout),
        module: &program.module,
        entry_point: Some(entry),
        compilation_options: wgpu::PipelineCompilationOptions::default(),
        cache: None,
    })
}

/// Standard depth state: write enabled, `Less`.
#[must_use]
pub fn depth_write() -> wgpu::DepthStencilState {
    wgpu::DepthStencilState {
        format: DEPTH_FORMAT,
        depth_write_enabled: Some(true),
        depth_compare: Some(wgpu::CompareFunction::Less),
        stencil: wgpu::StencilState::default(),
        bias: wgpu::DepthBiasState::default(),
    }
}

/// Depth test against an existing buffer without writing it.
#[must_use]
pub fn depth_test_only() -> wgpu::DepthStencilState {
    wgpu::DepthStencilState {
        depth_write_enabled: Some(false),
        depth_compare: Some(wgpu::CompareFunction::LessEqual),
        ..depth_write()
    }
}

// ============================================================================
// Bind group layout entries
// ============================================================================

pub mod entries {
    //! Terse constructors for `BindGroupLayoutEntry`.

    use wgpu::{BindGroupLayoutEntry, BindingType, ShaderStages};

    #[must_use]
    pub fn uniform(binding: u32, visibility: ShaderStages) -> BindGroupLayoutEntry {
        BindGroupLayoutEntry {
            binding,
            visibility,
            ty: BindingType::Buffer {
                ty: wgpu::BufferBindingType::Uniform,
                has_dynamic_offset: false,
                min_binding_size: None,
            },
            count: None,
        }
    }

    #[must_use]
    pub fn dynamic_uniform(binding: u32, visibility: ShaderStages) -> BindGroupLayoutEntry {
        BindGroupLayoutEntry {
            binding,
            visibility,
            ty: BindingType::Buffer {
                ty: wgpu::BufferBindingType::Uniform,
                has_dynamic_offset: true,
                min_binding_size: None,
            },
            count: None,
        }
    }

    #[must_use]
    pub fn storage(binding: u32, visibility: ShaderStages, read_only: bool) -> BindGroupLayoutEntry {
        BindGroupLayoutEntry {
            binding,
            visibility,
            ty: BindingType::Buffer {
                ty: wgpu::BufferBindingType::Storage { read_only },
                has_dynamic_offset: false,
                min_binding_size: None,
            },
            count: None,
        }
    }

    #[must_use]
    pub fn texture(
        binding: u32,
        visibility: ShaderStages,
        view_dimension: wgpu::TextureViewDimension,
        sample_type: wgpu::TextureSampleType,
    ) -> BindGroupLayoutEntry {
        BindGroupLayoutEntry {
            binding,
            visibility,
            ty: BindingType::Texture {
                sample_type,
                view_dimension,
                multisampled: false,
            },
            count: None,
        }
    }

    /// Filterable float 2D texture.
    #[must_use]
    pub fn texture_2d(binding: u32, visibility: ShaderStages) -> BindGroupLayoutEntry {
        texture(
            binding,
            visibility,
            wgpu::TextureViewDimension::D2,
            wgpu::TextureSampleType::Float { filterable: true },
        )
    }

    #[must_use]
    pub fn storage_texture(
        binding: u32,
        visibility: ShaderStages,
        format: wgpu::TextureFormat,
        view_dimension: wgpu::TextureViewDimension,
    ) -> BindGroupLayoutEntry {
        BindGroupLayoutEntry {
            binding,
            visibility,
            ty: BindingType::StorageTexture {
                access: wgpu::StorageTextureAccess::WriteOnly,
                format,
                view_dimension,
            },
            count: None,
        }
    }

    #[must_use]
    pub fn sampler(
        binding: u32,
        visibility: ShaderStages,
        ty: wgpu::SamplerBindingType,
    ) -> BindGroupLayoutEntry {
        BindGroupLayoutEntry {
            binding,
            visibility,
            ty: BindingType::Sampler(ty),
            count: None,
        }
    }
}
