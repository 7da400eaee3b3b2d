//! Temporal Anti-Aliasing
//!
//! Compute resolve into one of two ping-pong targets. History is reprojected
//! along the velocity of the closest-depth neighbor and clamped to the 3x3
//! neighborhood of the current pixel before blending. On the first frame
//! after a resize the current shading result stands in for the history.

use glam::Vec4;

use crate::errors::ShaderError;
use crate::renderer::FramePolicy;
use crate::renderer::context::{RendererContext, TrackedBuffer};
use crate::renderer::debug_ui::SettingsUi;
use crate::renderer::graph::{
    PassFlags, PassResources, PassStatus, RenderPass, ResizeToken, ResourceId, install_pipelines,
};
use crate::renderer::pipeline::{self, ProgramSet, entries};
use crate::renderer::settings::{HDR_FORMAT, RenderSettings};
use crate::renderer::targets::{PingPong, TextureHandle};
use crate::scene::Viewport;

pub const PROGRAMS: &[&str] = &["taa"];

#[repr(C)]
#[derive(Debug, Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
struct TaaUniforms {
    params: Vec4,
}

#[derive(Debug, Clone, Copy)]
pub struct TaaInputs {
    pub current: TextureHandle,
    pub velocity: TextureHandle,
    pub depth: TextureHandle,
}

pub struct TaaResolvePass {
    layout: wgpu::BindGroupLayout,
    uniform_buffer: TrackedBuffer,
    targets: Option<PingPong>,
    latest: Option<TextureHandle>,
    pipeline: Option<wgpu::ComputePipeline>,
    status: PassStatus,
}

impl TaaResolvePass {
    #[must_use]
    pub fn new(ctx: &RendererContext) -> Self {
        let compute = wgpu::ShaderStages::COMPUTE;
        let layout = ctx
            .device
            .create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some("TAA Layout"),
                entries: &[
                    entries::uniform(0, compute),
                    entries::texture_2d(1, compute),
                    entries::texture_2d(2, compute),
                    entries::texture_2d(3, compute),
                    entries::texture(
                        4,
                        compute,
                        wgpu::TextureViewDimension::D2,
                        wgpu::TextureSampleType::Float { filterable: false },
                    ),
                    entries::sampler(5, compute, wgpu::SamplerBindingType::Filtering),
                    entries::storage_texture(6, compute, HDR_FORMAT, wgpu::TextureViewDimension::D2),
                ],
            });
        Self {
            layout,
            uniform_buffer: ctx.create_uniform(
                "TAA Uniforms",
                &TaaUniforms {
                    params: Vec4::ZERO,
                },
            ),
            targets: None,
            latest: None,
            pipeline: None,
            status: PassStatus::Ready,
        }
    }

    /// Resolves into the current ping-pong target and swaps. Returns the
    /// handle holding this frame's result, or `None` when nothing ran.
    pub fn execute(
        &mut self,
        ctx: &RendererContext,
        encoder: &mut wgpu::CommandEncoder,
        inputs: TaaInputs,
        frame_index: u64,
        blend: f32,
    ) -> Option<TextureHandle> {
        let pipeline = self.pipeline.as_ref()?;
        let pair = self.targets.as_mut()?;

        let history = if frame_index == 0 {
            inputs.current
        } else {
            pair.history()
        };
        ctx.queue.write_buffer(
            &self.uniform_buffer,
            0,
            bytemuck::bytes_of(&TaaUniforms {
                params: Vec4::new(blend.clamp(0.0, 1.0), 0.0, 0.0, 0.0),
            }),
        );

        let view = |handle: TextureHandle| &ctx.targets[handle].view;
        let target = &ctx.targets[pair.target()];
        let bind_group = ctx.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("TAA BindGroup"),
            layout: &self.layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: self.uniform_buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::TextureView(view(inputs.current)),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: wgpu::BindingResource::TextureView(view(history)),
                },
                wgpu::BindGroupEntry {
                    binding: 3,
                    resource: wgpu::BindingResource::TextureView(view(inputs.velocity)),
                },
                wgpu::BindGroupEntry {
                    binding: 4,
                    resource: wgpu::BindingResource::TextureView(view(inputs.depth)),
                },
                wgpu::BindGroupEntry {
                    binding: 5,
                    resource: wgpu::BindingResource::Sampler(&ctx.samplers.linear_clamp),
                },
                wgpu::BindGroupEntry {
                    binding: 6,
                    resource: wgpu::BindingResource::TextureView(&target.view),
                },
            ],
        });

        {
            let mut cpass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("TAA Resolve"),
                timestamp_writes: None,
            });
            cpass.set_pipeline(pipeline);
            cpass.set_bind_group(0, &bind_group, &[]);
            let size = target.size();
            cpass.dispatch_workgroups(
                super::groups(size.width, 8),
                super::groups(size.height, 8),
                1,
            );
        }

        let newest = pair.swap();
        self.latest = Some(newest);
        Some(newest)
    }

    /// Result of the last resolve.
    #[must_use]
    pub fn latest(&self) -> Option<TextureHandle> {
        self.latest
    }
}

impl RenderPass for TaaResolvePass {
    fn name(&self) -> &'static str {
        "taa"
    }

    fn resources(&self, _policy: &FramePolicy) -> PassResources {
        PassResources::new()
            .reads(&[
                ResourceId::ShadingResult,
                ResourceId::Velocity,
                ResourceId::Depth,
                ResourceId::TaaHistory,
            ])
            .writes(&[ResourceId::TaaResult])
            .with_flags(PassFlags::COMPUTE)
    }

    fn create_render_targets(
        &mut self,
        ctx: &mut RendererContext,
        viewport: &Viewport,
        _token: &ResizeToken,
    ) {
        let (w, h) = (viewport.size.x, viewport.size.y);
        let usage = wgpu::TextureUsages::STORAGE_BINDING
            | wgpu::TextureUsages::TEXTURE_BINDING
            | wgpu::TextureUsages::COPY_SRC;
        let a = ctx
            .targets
            .create_2d(&ctx.device, "TAA Ping", w, h, HDR_FORMAT, usage);
        let b = ctx
            .targets
            .create_2d(&ctx.device, "TAA Pong", w, h, HDR_FORMAT, usage);
        self.targets = Some(PingPong::new(a, b));
        self.latest = None;
    }

    fn destroy_render_targets(&mut self, ctx: &mut RendererContext, _token: &ResizeToken) {
        if let Some(pair) = self.targets.take() {
            for handle in pair.handles() {
                ctx.targets.destroy(handle);
            }
        }
        self.latest = None;
    }

    fn rebuild_pipelines(
        &mut self,
        ctx: &RendererContext,
        programs: &ProgramSet,
    ) -> Result<(), ShaderError> {
        let built = programs.get("taa").and_then(|program| {
            pipeline::checked(&ctx.device, "taa", || {
                let layout = pipeline::layout(&ctx.device, "TAA Pipeline Layout", &[&self.layout]);
                Ok(pipeline::compute(&ctx.device, "TAA Pipeline", &layout, program, "cs_main"))
            })
        });
        install_pipelines(self.name(), &mut self.pipeline, &mut self.status, built)
    }

    fn status(&self) -> &PassStatus {
        &self.status
    }

    fn draw_debug_settings(&self, settings: &mut RenderSettings, ui: &mut dyn SettingsUi) {
        if ui.section("TAA") {
            ui.checkbox("Enabled", &mut settings.taa.enabled);
            ui.slider_f32("Current frame weight", &mut settings.taa.blend, 0.01, 1.0);
        }
    }
}
