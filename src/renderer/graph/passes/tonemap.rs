//! Tonemapping
//!
//! Maps the HDR color (TAA result, or the raw shading result when TAA is
//! off) plus bloom to the display-referred final image:
//!
//! ```text
//! final = pow(aces(max(color + bloom, 0) * exposure), 1 / gamma)
//! ```
//!
//! When the tonemap program cannot be built but the blit program can, the
//! pass falls back to a clamped identity copy so the host still gets an
//! image.

use glam::{Vec3, Vec4};

use crate::errors::ShaderError;
use crate::renderer::FramePolicy;
use crate::renderer::context::{RendererContext, TrackedBuffer};
use crate::renderer::debug_ui::SettingsUi;
use crate::renderer::graph::{
    PassResources, PassStatus, RenderPass, ResizeToken, ResourceId, install_pipelines,
};
use crate::renderer::pipeline::{self, ProgramSet, entries};
use crate::renderer::settings::{OUTPUT_FORMAT, RenderSettings, TonemapSettings};
use crate::renderer::targets::TextureHandle;
use crate::scene::Viewport;

pub const PROGRAMS: &[&str] = &["tonemap", "blit"];

/// Narkowicz's fit of the ACES filmic curve, clamped to `[0, 1]`.
#[must_use]
pub fn aces_fitted(x: Vec3) -> Vec3 {
    let (a, b, c, d, e) = (2.51, 0.03, 2.43, 0.59, 0.14);
    ((x * (a * x + b)) / (x * (c * x + d) + e)).clamp(Vec3::ZERO, Vec3::ONE)
}

/// CPU evaluation of the tonemap shader for one HDR color.
#[must_use]
pub fn tonemap_reference(hdr: Vec3, exposure: f32, gamma: f32) -> Vec3 {
    let mapped = aces_fitted(hdr.max(Vec3::ZERO) * exposure);
    mapped.powf(1.0 / gamma)
}

#[repr(C)]
#[derive(Debug, Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
struct TonemapUniforms {
    params: Vec4,
}

/// How the final image was produced this frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TonemapMode {
    Tonemapped,
    /// Identity blit, the tonemap program is unavailable.
    Fallback,
    Skipped,
}

pub struct TonemapPass {
    tonemap_layout: wgpu::BindGroupLayout,
    blit_layout: wgpu::BindGroupLayout,
    uniform_buffer: TrackedBuffer,
    output: Option<TextureHandle>,
    pipeline: Option<wgpu::RenderPipeline>,
    status: PassStatus,
    fallback: Option<wgpu::RenderPipeline>,
    fallback_status: PassStatus,
}

impl TonemapPass {
    #[must_use]
    pub fn new(ctx: &RendererContext) -> Self {
        let fragment = wgpu::ShaderStages::FRAGMENT;
        let filtering = wgpu::SamplerBindingType::Filtering;
        let tonemap_layout = ctx
            .device
            .create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some("Tonemap Layout"),
                entries: &[
                    entries::uniform(0, fragment),
                    entries::texture_2d(1, fragment),
                    entries::texture_2d(2, fragment),
                    entries::sampler(3, fragment, filtering),
                ],
            });
        let blit_layout = ctx
            .device
            .create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some("Blit Layout"),
                entries: &[
                    entries::texture_2d(0, fragment),
                    entries::sampler(1, fragment, filtering),
                ],
            });
        Self {
            tonemap_layout,
            blit_layout,
            uniform_buffer: ctx.create_uniform(
                "Tonemap Uniforms",
                &TonemapUniforms {
                    params: Vec4::new(1.0, 2.2, 0.0, 0.0),
                },
            ),
            output: None,
            pipeline: None,
            status: PassStatus::Ready,
            fallback: None,
            fallback_status: PassStatus::Ready,
        }
    }

    /// Writes the final image from `color` and, when bloom ran, `bloom`.
    pub fn execute(
        &self,
        ctx: &RendererContext,
        encoder: &mut wgpu::CommandEncoder,
        color: TextureHandle,
        bloom: Option<TextureHandle>,
        settings: &TonemapSettings,
    ) -> TonemapMode {
        let Some(output) = self.output else {
            return TonemapMode::Skipped;
        };
        let color_view = &ctx.targets[color].view;
        let sampler = &ctx.samplers.linear_clamp;

        let (mode, pipeline, bind_group) = if let Some(pipeline) = &self.pipeline {
            ctx.queue.write_buffer(
                &self.uniform_buffer,
                0,
                bytemuck::bytes_of(&TonemapUniforms {
                    params: Vec4::new(settings.exposure, settings.gamma.max(1e-3), 0.0, 0.0),
                }),
            );
            let bloom_view = bloom.map_or(&ctx.defaults.black, |h| &ctx.targets[h].view);
            let bind_group = ctx.device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("Tonemap BindGroup"),
                layout: &self.tonemap_layout,
                entries: &[
                    wgpu::BindGroupEntry {
                        binding: 0,
                        resource: self.uniform_buffer.as_entire_binding(),
                    },
                    wgpu::BindGroupEntry {
                        binding: 1,
                        resource: wgpu::BindingResource::TextureView(color_view),
                    },
                    wgpu::BindGroupEntry {
                        binding: 2,
                        resource: wgpu::BindingResource::TextureView(bloom_view),
                    },
                    wgpu::BindGroupEntry {
                        binding: 3,
                        resource: wgpu::BindingResource::Sampler(sampler),
                    },
                ],
            });
            (TonemapMode::Tonemapped, pipeline, bind_group)
        } else if let Some(pipeline) = &self.fallback {
            let bind_group = ctx.device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("Blit BindGroup"),
                layout: &self.blit_layout,
                entries: &[
                    wgpu::BindGroupEntry {
                        binding: 0,
                        resource: wgpu::BindingResource::TextureView(color_view),
                    },
                    wgpu::BindGroupEntry {
                        binding: 1,
                        resource: wgpu::BindingResource::Sampler(sampler),
                    },
                ],
            });
            (TonemapMode::Fallback, pipeline, bind_group)
        } else {
            return TonemapMode::Skipped;
        };

        let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("Tonemap Pass"),
            color_attachments: &[super::color_attachment(
                &ctx.targets[output].view,
                Some(wgpu::Color::BLACK),
            )],
            depth_stencil_attachment: None,
            timestamp_writes: None,
            occlusion_query_set: None,
            multiview_mask: None,
        });
        pass.set_pipeline(pipeline);
        pass.set_bind_group(0, &bind_group, &[]);
        pass.draw(0..3, 0..1);
        mode
    }

    #[must_use]
    pub fn output(&self) -> Option<TextureHandle> {
        self.output
    }

    /// Whether the identity fallback is standing in for the tonemapper.
    #[must_use]
    pub fn is_fallback(&self) -> bool {
        self.pipeline.is_none() && self.fallback.is_some()
    }
}

impl RenderPass for TonemapPass {
    fn name(&self) -> &'static str {
        "tonemap"
    }

    fn resources(&self, policy: &FramePolicy) -> PassResources {
        let color = if policy.taa {
            ResourceId::TaaResult
        } else {
            ResourceId::ShadingResult
        };
        let resources = PassResources::new()
            .reads(&[color])
            .writes(&[ResourceId::FinalImage]);
        if policy.bloom {
            resources.reads(&[ResourceId::BloomResult])
        } else {
            resources
        }
    }

    fn create_render_targets(
        &mut self,
        ctx: &mut RendererContext,
        viewport: &Viewport,
        _token: &ResizeToken,
    ) {
        self.output = Some(ctx.targets.create_2d(
            &ctx.device,
            "Final Image",
            viewport.size.x,
            viewport.size.y,
            OUTPUT_FORMAT,
            wgpu::TextureUsages::RENDER_ATTACHMENT
                | wgpu::TextureUsages::TEXTURE_BINDING
                | wgpu::TextureUsages::COPY_SRC,
        ));
    }

    fn destroy_render_targets(&mut self, ctx: &mut RendererContext, _token: &ResizeToken) {
        if let Some(output) = self.output.take() {
            ctx.targets.destroy(output);
        }
    }

    fn rebuild_pipelines(
        &mut self,
        ctx: &RendererContext,
        programs: &ProgramSet,
    ) -> Result<(), ShaderError> {
        let device = &ctx.device;
        let target = [Some(wgpu::ColorTargetState {
            format: OUTPUT_FORMAT,
            blend: None,
            write_mask: wgpu::ColorWrites::ALL,
        })];

        let fallback = programs.get("blit").and_then(|program| {
            pipeline::checked(device, "blit", || {
                let layout = pipeline::layout(device, "Blit Pipeline Layout", &[&self.blit_layout]);
                Ok(pipeline::fullscreen(device, "Blit Pipeline", &layout, program, "fs_main", &target))
            })
        });
        let fallback = install_pipelines("blit", &mut self.fallback, &mut self.fallback_status, fallback);

        let tonemap = programs.get("tonemap").and_then(|program| {
            pipeline::checked(device, "tonemap", || {
                let layout =
                    pipeline::layout(device, "Tonemap Pipeline Layout", &[&self.tonemap_layout]);
                Ok(pipeline::fullscreen(device, "Tonemap Pipeline", &layout, program, "fs_main", &target))
            })
        });
        let tonemap = install_pipelines(self.name(), &mut self.pipeline, &mut self.status, tonemap);

        if tonemap.is_err() && self.pipeline.is_none() && self.fallback.is_some() {
            log::warn!("tonemap unavailable, final image is an identity blit");
        }
        tonemap.and(fallback)
    }

    fn status(&self) -> &PassStatus {
        if self.pipeline.is_none() && self.fallback.is_some() {
            &self.fallback_status
        } else {
            &self.status
        }
    }

    fn is_ready(&self) -> bool {
        self.pipeline.is_some() || self.fallback.is_some()
    }

    fn draw_debug_settings(&self, settings: &mut RenderSettings, ui: &mut dyn SettingsUi) {
        if !ui.section("Tonemap") {
            return;
        }
        ui.slider_f32("Exposure", &mut settings.tonemap.exposure, 0.0, 8.0);
        ui.slider_f32("Gamma", &mut settings.tonemap.gamma, 1.0, 3.0);
        if self.is_fallback() {
            ui.label("Tonemap program failed, showing identity blit");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPSILON: f32 = 1e-4;

    #[test]
    fn black_stays_black() {
        assert!(tonemap_reference(Vec3::ZERO, 1.0, 2.2).abs_diff_eq(Vec3::ZERO, EPSILON));
    }

    #[test]
    fn negative_input_is_clamped() {
        let out = tonemap_reference(Vec3::splat(-3.0), 1.0, 2.2);
        assert!(out.abs_diff_eq(Vec3::ZERO, EPSILON));
    }

    #[test]
    fn bright_input_saturates() {
        let out = tonemap_reference(Vec3::splat(1000.0), 1.0, 2.2);
        assert!(out.abs_diff_eq(Vec3::ONE, EPSILON));
    }

    #[test]
    fn curve_is_monotonic() {
        let mut last = 0.0;
        for i in 1..64 {
            let v = tonemap_reference(Vec3::splat(i as f32 * 0.1), 1.0, 2.2).x;
            assert!(v >= last);
            last = v;
        }
    }
}
