//! Bloom
//!
//! Downsamples the deferred bloom-threshold target to quarter resolution and
//! blurs it with a separable 9-tap Gaussian (horizontal, then vertical).
//!
//! ```text
//! threshold ──blit──▶ bloom ──blur H──▶ scratch ──blur V──▶ bloom
//! ```
//!
//! Viewports smaller than [`MIN_BLOOM_SIZE`] on either axis skip bloom; the
//! tonemapper then binds the default black texture.

use glam::{UVec2, Vec4};

use crate::errors::ShaderError;
use crate::renderer::FramePolicy;
use crate::renderer::context::{RendererContext, TrackedBuffer};
use crate::renderer::debug_ui::SettingsUi;
use crate::renderer::graph::{
    PassResources, PassStatus, RenderPass, ResizeToken, ResourceId, install_pipelines,
};
use crate::renderer::pipeline::{self, ProgramSet, entries};
use crate::renderer::settings::{HDR_FORMAT, RenderSettings};
use crate::renderer::targets::TextureHandle;
use crate::scene::Viewport;

pub const PROGRAMS: &[&str] = &["bloom"];

/// Smallest viewport edge, in pixels, bloom runs at.
pub const MIN_BLOOM_SIZE: u32 = 16;

/// Bloom runs at `1 / BLOOM_DOWNSAMPLE` of the viewport on each axis.
pub const BLOOM_DOWNSAMPLE: u32 = 4;

#[must_use]
pub fn bloom_supported(viewport_size: UVec2) -> bool {
    viewport_size.min_element() >= MIN_BLOOM_SIZE
}

#[must_use]
pub fn bloom_size(viewport_size: UVec2) -> UVec2 {
    (viewport_size / BLOOM_DOWNSAMPLE).max(UVec2::ONE)
}

#[repr(C)]
#[derive(Debug, Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
struct BlurUniforms {
    direction: Vec4,
}

#[derive(Debug, Clone, Copy)]
struct BloomTargets {
    bloom: TextureHandle,
    scratch: TextureHandle,
}

struct BloomPipelines {
    blit: wgpu::RenderPipeline,
    blur: wgpu::RenderPipeline,
}

pub struct BloomPass {
    source_layout: wgpu::BindGroupLayout,
    blur_layout: wgpu::BindGroupLayout,
    horizontal: TrackedBuffer,
    vertical: TrackedBuffer,
    horizontal_group: wgpu::BindGroup,
    vertical_group: wgpu::BindGroup,
    targets: Option<BloomTargets>,
    pipelines: Option<BloomPipelines>,
    status: PassStatus,
}

impl BloomPass {
    #[must_use]
    pub fn new(ctx: &RendererContext) -> Self {
        let fragment = wgpu::ShaderStages::FRAGMENT;
        let device = &ctx.device;
        let source_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Bloom Source Layout"),
            entries: &[
                entries::texture_2d(0, fragment),
                entries::sampler(1, fragment, wgpu::SamplerBindingType::Filtering),
            ],
        });
        let blur_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Bloom Blur Layout"),
            entries: &[entries::uniform(0, fragment)],
        });

        let zero = BlurUniforms {
            direction: Vec4::ZERO,
        };
        let horizontal = ctx.create_uniform("Bloom Blur Horizontal", &zero);
        let vertical = ctx.create_uniform("Bloom Blur Vertical", &zero);
        let blur_group = |label, buffer: &wgpu::Buffer| {
            device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some(label),
                layout: &blur_layout,
                entries: &[wgpu::BindGroupEntry {
                    binding: 0,
                    resource: buffer.as_entire_binding(),
                }],
            })
        };
        let horizontal_group = blur_group("Bloom Blur Horizontal", &horizontal);
        let vertical_group = blur_group("Bloom Blur Vertical", &vertical);

        Self {
            source_layout,
            blur_layout,
            horizontal,
            vertical,
            horizontal_group,
            vertical_group,
            targets: None,
            pipelines: None,
            status: PassStatus::Ready,
        }
    }

    fn source_group(&self, ctx: &RendererContext, source: TextureHandle) -> wgpu::BindGroup {
        ctx.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Bloom Source BindGroup"),
            layout: &self.source_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::TextureView(&ctx.targets[source].view),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::Sampler(&ctx.samplers.linear_clamp),
                },
            ],
        })
    }

    /// Returns the blurred result, or `None` when bloom did not run.
    pub fn execute(
        &self,
        ctx: &RendererContext,
        encoder: &mut wgpu::CommandEncoder,
        threshold: TextureHandle,
        viewport_size: UVec2,
    ) -> Option<TextureHandle> {
        if !bloom_supported(viewport_size) {
            return None;
        }
        let pipelines = self.pipelines.as_ref()?;
        let targets = self.targets?;

        let steps = [
            ("Bloom Downsample", threshold, targets.bloom, None),
            (
                "Bloom Blur H",
                targets.bloom,
                targets.scratch,
                Some(&self.horizontal_group),
            ),
            (
                "Bloom Blur V",
                targets.scratch,
                targets.bloom,
                Some(&self.vertical_group),
            ),
        ];
        for (label, source, destination, blur) in steps {
            let source_group = self.source_group(ctx, source);
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some(label),
                color_attachments: &[super::color_attachment(
                    &ctx.targets[destination].view,
                    Some(wgpu::Color::BLACK),
                )],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
                multiview_mask: None,
            });
            match blur {
                Some(direction) => {
                    pass.set_pipeline(&pipelines.blur);
                    pass.set_bind_group(1, direction, &[]);
                }
                None => pass.set_pipeline(&pipelines.blit),
            }
            pass.set_bind_group(0, &source_group, &[]);
            pass.draw(0..3, 0..1);
        }

        Some(targets.bloom)
    }

    #[must_use]
    pub fn result(&self) -> Option<TextureHandle> {
        self.targets.map(|t| t.bloom)
    }
}

impl RenderPass for BloomPass {
    fn name(&self) -> &'static str {
        "bloom"
    }

    fn resources(&self, _policy: &FramePolicy) -> PassResources {
        PassResources::new()
            .reads(&[ResourceId::BloomThreshold])
            .writes(&[ResourceId::BloomResult])
    }

    fn create_render_targets(
        &mut self,
        ctx: &mut RendererContext,
        viewport: &Viewport,
        _token: &ResizeToken,
    ) {
        let size = bloom_size(viewport.size);
        let usage = wgpu::TextureUsages::RENDER_ATTACHMENT
            | wgpu::TextureUsages::TEXTURE_BINDING
            | wgpu::TextureUsages::COPY_SRC;
        self.targets = Some(BloomTargets {
            bloom: ctx
                .targets
                .create_2d(&ctx.device, "Bloom", size.x, size.y, HDR_FORMAT, usage),
            scratch: ctx
                .targets
                .create_2d(&ctx.device, "Bloom Scratch", size.x, size.y, HDR_FORMAT, usage),
        });

        let texel = size.as_vec2().recip();
        ctx.queue.write_buffer(
            &self.horizontal,
            0,
            bytemuck::bytes_of(&BlurUniforms {
                direction: Vec4::new(texel.x, 0.0, 0.0, 0.0),
            }),
        );
        ctx.queue.write_buffer(
            &self.vertical,
            0,
            bytemuck::bytes_of(&BlurUniforms {
                direction: Vec4::new(0.0, texel.y, 0.0, 0.0),
            }),
        );
    }

    fn destroy_render_targets(&mut self, ctx: &mut RendererContext, _token: &ResizeToken) {
        if let Some(targets) = self.targets.take() {
            ctx.targets.destroy(targets.bloom);
            ctx.targets.destroy(targets.scratch);
        }
    }

    fn rebuild_pipelines(
        &mut self,
        ctx: &RendererContext,
        programs: &ProgramSet,
    ) -> Result<(), ShaderError> {
        let device = &ctx.device;
        let built = programs.get("bloom").and_then(|program| {
            pipeline::checked(device, "bloom", || {
                let hdr = [Some(wgpu::ColorTargetState {
                    format: HDR_FORMAT,
                    blend: None,
                    write_mask: wgpu::ColorWrites::ALL,
                })];
                // The blit binds only the source group.
                let blit_layout = pipeline::layout(device, "Bloom Blit Layout", &[&self.source_layout]);
                let blur_layout = pipeline::layout(
                    device,
                    "Bloom Blur Layout",
                    &[&self.source_layout, &self.blur_layout],
                );
                Ok(BloomPipelines {
                    blit: pipeline::fullscreen(device, "Bloom Blit", &blit_layout, program, "fs_blit", &hdr),
                    blur: pipeline::fullscreen(device, "Bloom Blur", &blur_layout, program, "fs_blur", &hdr),
                })
            })
        });
        install_pipelines(self.name(), &mut self.pipelines, &mut self.status, built)
    }

    fn status(&self) -> &PassStatus {
        &self.status
    }

    fn draw_debug_settings(&self, settings: &mut RenderSettings, ui: &mut dyn SettingsUi) {
        if ui.section("Bloom") {
            ui.checkbox("Enabled", &mut settings.bloom.enabled);
        }
    }
}
