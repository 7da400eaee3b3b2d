//! Voxel visualization overlay: raymarches one mip of the voxel volume and
//! composites it over the final image.

use glam::Vec4;

use crate::errors::ShaderError;
use crate::renderer::FramePolicy;
use crate::renderer::context::{RendererContext, TrackedBuffer};
use crate::renderer::debug_ui::SettingsUi;
use crate::renderer::frame::FrameResources;
use crate::renderer::graph::{PassResources, PassStatus, RenderPass, ResourceId, install_pipelines};
use crate::renderer::pipeline::{self, ProgramSet, entries};
use crate::renderer::settings::{OUTPUT_FORMAT, RenderSettings};
use crate::renderer::targets::TextureHandle;

use super::VoxelizationPass;

pub const PROGRAMS: &[&str] = &["voxel_debug"];

#[repr(C)]
#[derive(Debug, Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
struct VoxelDebugUniforms {
    params: Vec4,
}

pub struct VoxelDebugPass {
    layout: wgpu::BindGroupLayout,
    uniform_buffer: TrackedBuffer,
    pipeline: Option<wgpu::RenderPipeline>,
    status: PassStatus,
}

impl VoxelDebugPass {
    #[must_use]
    pub fn new(ctx: &RendererContext) -> Self {
        let fragment = wgpu::ShaderStages::FRAGMENT;
        let layout = ctx
            .device
            .create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some("Voxel Debug Layout"),
                entries: &[
                    entries::uniform(0, fragment),
                    entries::uniform(1, fragment),
                    entries::texture(
                        2,
                        fragment,
                        wgpu::TextureViewDimension::D3,
                        wgpu::TextureSampleType::Float { filterable: true },
                    ),
                    entries::sampler(3, fragment, wgpu::SamplerBindingType::Filtering),
                ],
            });
        Self {
            layout,
            uniform_buffer: ctx.create_uniform(
                "Voxel Debug Uniforms",
                &VoxelDebugUniforms {
                    params: Vec4::ZERO,
                },
            ),
            pipeline: None,
            status: PassStatus::Ready,
        }
    }

    /// Draws mip `mip` (clamped to the volume's chain) over `target`.
    pub fn execute(
        &self,
        ctx: &RendererContext,
        encoder: &mut wgpu::CommandEncoder,
        frame: &FrameResources,
        voxels: &VoxelizationPass,
        target: TextureHandle,
        world_size: f32,
        mip: u32,
    ) {
        let (Some(pipeline), Some(volume)) = (&self.pipeline, voxels.volume()) else {
            return;
        };
        let mip = mip.min(voxels.mip_count().saturating_sub(1));
        let resolution = (voxels.size() >> mip).max(1);
        ctx.queue.write_buffer(
            &self.uniform_buffer,
            0,
            bytemuck::bytes_of(&VoxelDebugUniforms {
                params: Vec4::new(world_size, resolution as f32, mip as f32, 0.0),
            }),
        );

        let bind_group = ctx.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Voxel Debug BindGroup"),
            layout: &self.layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: frame.buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: self.uniform_buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: wgpu::BindingResource::TextureView(&ctx.targets[volume].view),
                },
                wgpu::BindGroupEntry {
                    binding: 3,
                    resource: wgpu::BindingResource::Sampler(&ctx.samplers.trilinear_clamp),
                },
            ],
        });

        let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("Voxel Debug"),
            color_attachments: &[super::color_attachment(&ctx.targets[target].view, None)],
            depth_stencil_attachment: None,
            timestamp_writes: None,
            occlusion_query_set: None,
            multiview_mask: None,
        });
        pass.set_pipeline(pipeline);
        pass.set_bind_group(0, &bind_group, &[]);
        pass.draw(0..3, 0..1);
    }
}

impl RenderPass for VoxelDebugPass {
    fn name(&self) -> &'static str {
        "voxel_debug"
    }

    fn resources(&self, _policy: &FramePolicy) -> PassResources {
        PassResources::new()
            .reads(&[ResourceId::VoxelVolume])
            .modifies(&[ResourceId::FinalImage])
    }

    fn rebuild_pipelines(
        &mut self,
        ctx: &RendererContext,
        programs: &ProgramSet,
    ) -> Result<(), ShaderError> {
        let built = programs.get("voxel_debug").and_then(|program| {
            pipeline::checked(&ctx.device, "voxel_debug", || {
                let layout = pipeline::layout(&ctx.device, "Voxel Debug Pipeline Layout", &[&self.layout]);
                // The raymarch returns premultiplied color.
                let blend = wgpu::BlendState::PREMULTIPLIED_ALPHA_BLENDING;
                Ok(pipeline::fullscreen(
                    &ctx.device,
                    "Voxel Debug Pipeline",
                    &layout,
                    program,
                    "fs_main",
                    &[Some(wgpu::ColorTargetState {
                        format: OUTPUT_FORMAT,
                        blend: Some(blend),
                        write_mask: wgpu::ColorWrites::ALL,
                    })],
                ))
            })
        });
        install_pipelines(self.name(), &mut self.pipeline, &mut self.status, built)
    }

    fn status(&self) -> &PassStatus {
        &self.status
    }

    fn draw_debug_settings(&self, settings: &mut RenderSettings, ui: &mut dyn SettingsUi) {
        if !ui.section("Voxel Visualization") {
            return;
        }
        ui.checkbox("Enabled", &mut settings.debug.voxel_visualization);
        let max_mip = settings.voxel_mip_count().saturating_sub(1);
        ui.slider_u32("Mip", &mut settings.debug.voxel_mip, 0, max_mip);
    }
}
