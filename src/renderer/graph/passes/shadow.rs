//! Cascaded Shadow Maps
//!
//! Renders scene depth from the sun into one layer per cascade of a
//! `Depth32Float` 2D array. Cascade matrices come from
//! [`compute_cascades`](crate::renderer::graph::shadow_utils::compute_cascades);
//! the same matrices, split depths and light color are published through
//! [`ShadowUniforms`] for the deferred and voxelization passes.
//!
//! A scene without a directional light renders with the synthetic light from
//! [`DirectionalLight::synthetic`].

use glam::{Mat4, Vec4};

use crate::errors::ShaderError;
use crate::renderer::FramePolicy;
use crate::renderer::context::{RendererContext, TrackedBuffer};
use crate::renderer::debug_ui::SettingsUi;
use crate::renderer::frame::{FrameResources, align_to};
use crate::renderer::graph::shadow_utils::{
    CASCADE_COUNT, Cascade, CascadeInput, compute_cascades,
};
use crate::renderer::graph::{
    PassResources, PassStatus, RenderPass, ResourceId, install_pipelines,
};
use crate::renderer::pipeline::{
    self, CompiledProgram, DEPTH_FORMAT, MeshPipelineDesc, ProgramSet, entries,
};
use crate::renderer::settings::{RenderSettings, ShadowSettings};
use crate::renderer::targets::TextureHandle;
use crate::scene::{DirectionalLight, Scene, Viewport};

use super::SkinningPass;

pub const PROGRAMS: &[&str] = &["shadow_depth"];

/// Matches `ShadowUniforms` in `chunks/shadow.wgsl`.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct ShadowUniforms {
    pub cascades: [Mat4; CASCADE_COUNT],
    /// View-space z of each cascade's far end.
    pub splits: Vec4,
    /// xyz: light travel direction, w: one texel in shadow UV units.
    pub light_direction: Vec4,
    /// rgb: color * intensity.
    pub light_color: Vec4,
}

impl Default for ShadowUniforms {
    fn default() -> Self {
        Self {
            cascades: [Mat4::IDENTITY; CASCADE_COUNT],
            splits: Vec4::ZERO,
            light_direction: Vec4::NEG_Y,
            light_color: Vec4::ZERO,
        }
    }
}

/// Depth bias as configured, rounded the way the pipeline consumes it.
#[derive(Debug, Clone, Copy, PartialEq)]
struct BiasKey {
    constant: i32,
    slope: f32,
}

impl BiasKey {
    fn from_settings(settings: &ShadowSettings) -> Self {
        Self {
            constant: settings.depth_bias_constant.ceil() as i32,
            slope: settings.depth_bias_slope,
        }
    }
}

struct ShadowPipeline {
    program: CompiledProgram,
    pipeline: wgpu::RenderPipeline,
    bias: BiasKey,
}

struct CascadeMap {
    handle: TextureHandle,
    resolution: u32,
    layers: Vec<wgpu::TextureView>,
}

pub struct ShadowCascadePass {
    cascade_layout: wgpu::BindGroupLayout,
    object_layout: wgpu::BindGroupLayout,
    cascade_buffer: TrackedBuffer,
    cascade_stride: u32,
    cascade_bind_group: wgpu::BindGroup,
    uniform_buffer: TrackedBuffer,
    uniforms: ShadowUniforms,
    cascades: [Cascade; CASCADE_COUNT],
    map: Option<CascadeMap>,
    bias: BiasKey,
    pipeline: Option<ShadowPipeline>,
    status: PassStatus,
}

impl ShadowCascadePass {
    #[must_use]
    pub fn new(ctx: &mut RendererContext, frame: &FrameResources, settings: &ShadowSettings) -> Self {
        let device = &ctx.device;
        let matrix_size = std::mem::size_of::<Mat4>() as u64;
        let cascade_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Shadow Cascade Layout"),
            entries: &[entries::dynamic_uniform(0, wgpu::ShaderStages::VERTEX)],
        });

        let min_alignment = device.limits().min_uniform_buffer_offset_alignment;
        let cascade_stride = align_to(matrix_size as u32, min_alignment);
        let cascade_buffer = ctx.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Shadow Cascade Matrices"),
            size: u64::from(cascade_stride) * CASCADE_COUNT as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let cascade_bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Shadow Cascade BindGroup"),
            layout: &cascade_layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: wgpu::BindingResource::Buffer(wgpu::BufferBinding {
                    buffer: &cascade_buffer,
                    offset: 0,
                    size: wgpu::BufferSize::new(matrix_size),
                }),
            }],
        });

        let uniforms = ShadowUniforms::default();
        let uniform_buffer = ctx.create_uniform("Shadow Uniforms", &uniforms);

        let mut pass = Self {
            cascade_layout,
            object_layout: frame.objects.layout().clone(),
            cascade_buffer,
            cascade_stride,
            cascade_bind_group,
            uniform_buffer,
            uniforms,
            cascades: [Cascade::default(); CASCADE_COUNT],
            map: None,
            bias: BiasKey::from_settings(settings),
            pipeline: None,
            status: PassStatus::Ready,
        };
        pass.ensure_map(ctx, settings.resolution);
        pass
    }

    /// (Re)creates the cascade array when the configured resolution changes.
    fn ensure_map(&mut self, ctx: &mut RendererContext, resolution: u32) {
        if self.map.as_ref().is_some_and(|m| m.resolution == resolution) {
            return;
        }
        if let Some(old) = self.map.take() {
            ctx.targets.destroy(old.handle);
        }

        let handle = ctx.targets.create(
            &ctx.device,
            &wgpu::TextureDescriptor {
                label: Some("Shadow Cascades"),
                size: wgpu::Extent3d {
                    width: resolution,
                    height: resolution,
                    depth_or_array_layers: CASCADE_COUNT as u32,
                },
                mip_level_count: 1,
                sample_count: 1,
                dimension: wgpu::TextureDimension::D2,
                format: DEPTH_FORMAT,
                usage: wgpu::TextureUsages::RENDER_ATTACHMENT
                    | wgpu::TextureUsages::TEXTURE_BINDING
                    | wgpu::TextureUsages::COPY_SRC,
                view_formats: &[],
            },
            Some(wgpu::TextureViewDescriptor {
                label: Some("Shadow Cascades Array"),
                dimension: Some(wgpu::TextureViewDimension::D2Array),
                ..Default::default()
            }),
        );
        let target = &ctx.targets[handle];
        let layers = (0..CASCADE_COUNT as u32)
            .map(|layer| target.layer_view(layer))
            .collect();
        self.map = Some(CascadeMap {
            handle,
            resolution,
            layers,
        });
    }

    fn build_pipeline(
        &self,
        device: &wgpu::Device,
        program: &CompiledProgram,
        bias: BiasKey,
    ) -> Result<wgpu::RenderPipeline, ShaderError> {
        pipeline::checked(device, "shadow_depth", || {
            let layout = pipeline::layout(
                device,
                "Shadow Pipeline Layout",
                &[&self.cascade_layout, &self.object_layout],
            );
            Ok(pipeline::mesh(
                device,
                &MeshPipelineDesc {
                    label: "Shadow Pipeline",
                    layout: &layout,
                    program,
                    fragment_entry: None,
                    targets: &[],
                    depth: Some(wgpu::DepthStencilState {
                        bias: wgpu::DepthBiasState {
                            constant: bias.constant,
                            slope_scale: bias.slope,
                            clamp: 0.0,
                        },
                        ..pipeline::depth_write()
                    }),
                    cull_mode: None,
                    conservative: false,
                },
            ))
        })
    }

    /// Computes the cascades for this frame and uploads them.
    pub fn prepare(
        &mut self,
        ctx: &mut RendererContext,
        scene: &Scene,
        viewport: &Viewport,
        settings: &ShadowSettings,
    ) {
        self.ensure_map(ctx, settings.resolution);

        let bias = BiasKey::from_settings(settings);
        if bias != self.bias {
            self.bias = bias;
            if let Some(current) = &self.pipeline {
                log::debug!("shadow depth bias changed, rebuilding pipeline");
                match self.build_pipeline(&ctx.device, &current.program, bias) {
                    Ok(pipeline) => {
                        let program = current.program.clone();
                        self.pipeline = Some(ShadowPipeline {
                            program,
                            pipeline,
                            bias,
                        });
                    }
                    // Keep drawing with the previous bias.
                    Err(err) => log::error!("shadow: {err}"),
                }
            }
        }

        let light = scene
            .sun()
            .map_or_else(DirectionalLight::synthetic, |sun| sun.light);
        let light_dir = light.safe_direction();
        let camera = &viewport.camera;

        self.cascades = compute_cascades(&CascadeInput {
            camera_view_proj: camera.view_projection(),
            near: camera.near,
            far: camera.far,
            light_dir,
            lambda: settings.split_lambda,
            resolution: settings.resolution,
        });

        let stride = self.cascade_stride as usize;
        let mut bytes = vec![0u8; stride * CASCADE_COUNT];
        for (chunk, cascade) in bytes.chunks_exact_mut(stride).zip(&self.cascades) {
            chunk[..64].copy_from_slice(bytemuck::bytes_of(&cascade.view_proj));
        }
        ctx.queue.write_buffer(&self.cascade_buffer, 0, &bytes);

        self.uniforms = ShadowUniforms {
            cascades: self.cascades.map(|c| c.view_proj),
            splits: Vec4::from_array(self.cascades.map(|c| c.split_depth)),
            light_direction: light_dir.extend(1.0 / settings.resolution.max(1) as f32),
            light_color: (light.color * light.intensity).extend(1.0),
        };
        ctx.queue
            .write_buffer(&self.uniform_buffer, 0, bytemuck::bytes_of(&self.uniforms));
    }

    /// Clears and renders every cascade layer.
    pub fn execute(
        &self,
        encoder: &mut wgpu::CommandEncoder,
        scene: &Scene,
        frame: &FrameResources,
        skinning: &SkinningPass,
    ) {
        let Some(map) = &self.map else {
            return;
        };

        for (layer, view) in map.layers.iter().enumerate() {
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("Shadow Cascade Pass"),
                color_attachments: &[],
                depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                    view,
                    depth_ops: Some(wgpu::Operations {
                        load: wgpu::LoadOp::Clear(1.0),
                        store: wgpu::StoreOp::Store,
                    }),
                    stencil_ops: None,
                }),
                timestamp_writes: None,
                occlusion_query_set: None,
                multiview_mask: None,
            });

            let Some(shadow) = &self.pipeline else {
                continue;
            };
            pass.set_pipeline(&shadow.pipeline);
            pass.set_bind_group(
                0,
                &self.cascade_bind_group,
                &[layer as u32 * self.cascade_stride],
            );
            for (i, instance) in scene.meshes().iter().enumerate() {
                super::draw_mesh(
                    &mut pass,
                    &frame.objects,
                    1,
                    i,
                    instance,
                    skinning.vertex_buffer(instance),
                );
            }
        }
    }

    /// The cascade array, viewed as `D2Array`.
    #[must_use]
    pub fn map(&self) -> Option<TextureHandle> {
        self.map.as_ref().map(|m| m.handle)
    }

    #[must_use]
    pub fn uniform_buffer(&self) -> &wgpu::Buffer {
        &self.uniform_buffer
    }

    #[must_use]
    pub fn uniforms(&self) -> &ShadowUniforms {
        &self.uniforms
    }

    #[must_use]
    pub fn cascades(&self) -> &[Cascade; CASCADE_COUNT] {
        &self.cascades
    }
}

impl RenderPass for ShadowCascadePass {
    fn name(&self) -> &'static str {
        "shadows"
    }

    fn resources(&self, _policy: &FramePolicy) -> PassResources {
        PassResources::new()
            .reads(&[ResourceId::SkinnedVertices])
            .writes(&[ResourceId::ShadowCascades])
    }

    fn rebuild_pipelines(
        &mut self,
        ctx: &RendererContext,
        programs: &ProgramSet,
    ) -> Result<(), ShaderError> {
        let bias = self.bias;
        let built = programs.get("shadow_depth").and_then(|program| {
            Ok(ShadowPipeline {
                program: program.clone(),
                pipeline: self.build_pipeline(&ctx.device, program, bias)?,
                bias,
            })
        });
        install_pipelines(self.name(), &mut self.pipeline, &mut self.status, built)
    }

    fn status(&self) -> &PassStatus {
        &self.status
    }

    fn draw_debug_settings(&self, settings: &mut RenderSettings, ui: &mut dyn SettingsUi) {
        if !ui.section("Shadows") {
            return;
        }
        let shadows = &mut settings.shadows;
        ui.slider_f32("Split lambda", &mut shadows.split_lambda, 0.0, 1.0);
        ui.slider_f32("Constant bias", &mut shadows.depth_bias_constant, 0.0, 8.0);
        ui.slider_f32("Slope bias", &mut shadows.depth_bias_slope, 0.0, 8.0);
        let splits: Vec<String> = self
            .cascades
            .iter()
            .map(|c| format!("{:.1}", -c.split_depth))
            .collect();
        ui.label(&format!("Splits: {}", splits.join(" / ")));
        if let Some(pipeline) = &self.pipeline {
            ui.label(&format!(
                "Pipeline bias: {} + {:.2} slope",
                pipeline.bias.constant, pipeline.bias.slope
            ));
        }
    }
}
