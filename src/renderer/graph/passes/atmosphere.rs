//! Atmosphere
//!
//! Renders an analytic sky for the current sun into an `Rgba16Float`
//! environment cube, then convolves it into a small irradiance cube for
//! diffuse ambient light. Both cubes persist across frames and are only
//! regenerated when the sun, its intensity or the cube sizes change.

use glam::{Vec3, Vec4};

use crate::errors::ShaderError;
use crate::renderer::FramePolicy;
use crate::renderer::context::{RendererContext, TrackedBuffer};
use crate::renderer::debug_ui::SettingsUi;
use crate::renderer::graph::{
    PassFlags, PassResources, PassStatus, RenderPass, ResourceId, install_pipelines,
};
use crate::renderer::pipeline::{self, ProgramSet, entries};
use crate::renderer::settings::{AtmosphereSettings, HDR_FORMAT, RenderSettings};
use crate::renderer::targets::TextureHandle;
use crate::scene::DirectionalLight;

pub const PROGRAMS: &[&str] = &["atmosphere", "irradiance"];

const WORKGROUP_SIZE: u32 = 8;

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
struct AtmosphereUniforms {
    sun_direction: Vec4,
    params: Vec4,
}

/// Inputs the cubes were last generated from.
#[derive(Debug, Clone, Copy, PartialEq)]
struct SkyKey {
    sun_direction: Vec3,
    intensity: f32,
    environment_size: u32,
    irradiance_size: u32,
}

/// A cube texture plus the 2D-array view compute shaders write through.
struct Cube {
    handle: TextureHandle,
    storage: wgpu::TextureView,
    size: u32,
}

impl Cube {
    fn create(ctx: &mut RendererContext, label: &str, size: u32) -> Self {
        let handle = ctx.targets.create(
            &ctx.device,
            &wgpu::TextureDescriptor {
                label: Some(label),
                size: wgpu::Extent3d {
                    width: size,
                    height: size,
                    depth_or_array_layers: 6,
                },
                mip_level_count: 1,
                sample_count: 1,
                dimension: wgpu::TextureDimension::D2,
                format: HDR_FORMAT,
                usage: wgpu::TextureUsages::STORAGE_BINDING
                    | wgpu::TextureUsages::TEXTURE_BINDING
                    | wgpu::TextureUsages::COPY_SRC,
                view_formats: &[],
            },
            Some(wgpu::TextureViewDescriptor {
                label: Some(label),
                dimension: Some(wgpu::TextureViewDimension::Cube),
                ..Default::default()
            }),
        );
        let storage = ctx.targets[handle]
            .texture
            .create_view(&wgpu::TextureViewDescriptor {
                label: Some(label),
                dimension: Some(wgpu::TextureViewDimension::D2Array),
                ..Default::default()
            });
        Self {
            handle,
            storage,
            size,
        }
    }
}

struct AtmospherePipelines {
    sky: wgpu::ComputePipeline,
    irradiance: wgpu::ComputePipeline,
}

pub struct AtmospherePass {
    sky_layout: wgpu::BindGroupLayout,
    irradiance_layout: wgpu::BindGroupLayout,
    uniform_buffer: TrackedBuffer,
    environment: Cube,
    irradiance: Cube,
    key: Option<SkyKey>,
    pipelines: Option<AtmospherePipelines>,
    status: PassStatus,
}

impl AtmospherePass {
    #[must_use]
    pub fn new(ctx: &mut RendererContext, settings: &AtmosphereSettings) -> Self {
        let compute = wgpu::ShaderStages::COMPUTE;
        let array = wgpu::TextureViewDimension::D2Array;
        let sky_layout = ctx
            .device
            .create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some("Atmosphere Layout"),
                entries: &[
                    entries::uniform(0, compute),
                    entries::storage_texture(1, compute, HDR_FORMAT, array),
                ],
            });
        let irradiance_layout =
            ctx.device
                .create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                    label: Some("Irradiance Layout"),
                    entries: &[
                        entries::texture(
                            0,
                            compute,
                            wgpu::TextureViewDimension::Cube,
                            wgpu::TextureSampleType::Float { filterable: true },
                        ),
                        entries::sampler(1, compute, wgpu::SamplerBindingType::Filtering),
                        entries::storage_texture(2, compute, HDR_FORMAT, array),
                    ],
                });
        let uniform_buffer = ctx.create_uniform(
            "Atmosphere Uniforms",
            &AtmosphereUniforms {
                sun_direction: Vec4::NEG_Y,
                params: Vec4::ZERO,
            },
        );
        let environment = Cube::create(ctx, "Environment Cube", settings.environment_size);
        let irradiance = Cube::create(ctx, "Irradiance Cube", settings.irradiance_size);

        Self {
            sky_layout,
            irradiance_layout,
            uniform_buffer,
            environment,
            irradiance,
            key: None,
            pipelines: None,
            status: PassStatus::Ready,
        }
    }

    fn resize_cubes(&mut self, ctx: &mut RendererContext, settings: &AtmosphereSettings) {
        if self.environment.size != settings.environment_size {
            ctx.targets.destroy(self.environment.handle);
            self.environment = Cube::create(ctx, "Environment Cube", settings.environment_size);
            self.key = None;
        }
        if self.irradiance.size != settings.irradiance_size {
            ctx.targets.destroy(self.irradiance.handle);
            self.irradiance = Cube::create(ctx, "Irradiance Cube", settings.irradiance_size);
            self.key = None;
        }
    }

    /// Regenerates both cubes if any input changed since the last run.
    pub fn prepare(
        &mut self,
        ctx: &mut RendererContext,
        sun: &DirectionalLight,
        settings: &AtmosphereSettings,
    ) -> bool {
        self.resize_cubes(ctx, settings);

        let key = SkyKey {
            sun_direction: sun.safe_direction(),
            intensity: settings.sun_intensity,
            environment_size: settings.environment_size,
            irradiance_size: settings.irradiance_size,
        };
        if self.key == Some(key) {
            return false;
        }
        ctx.queue.write_buffer(
            &self.uniform_buffer,
            0,
            bytemuck::bytes_of(&AtmosphereUniforms {
                sun_direction: key.sun_direction.extend(0.0),
                params: Vec4::new(key.intensity, 0.0, 0.0, 0.0),
            }),
        );
        true
    }

    /// Dispatches the sky and the irradiance convolution. Call after a
    /// [`prepare`](Self::prepare) that returned `true`.
    pub fn execute(
        &mut self,
        ctx: &RendererContext,
        encoder: &mut wgpu::CommandEncoder,
        sun: &DirectionalLight,
        settings: &AtmosphereSettings,
    ) {
        let Some(pipelines) = &self.pipelines else {
            return;
        };

        let sky_bind_group = ctx.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Atmosphere BindGroup"),
            layout: &self.sky_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: self.uniform_buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::TextureView(&self.environment.storage),
                },
            ],
        });
        {
            let mut cpass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("Atmosphere Sky"),
                timestamp_writes: None,
            });
            cpass.set_pipeline(&pipelines.sky);
            cpass.set_bind_group(0, &sky_bind_group, &[]);
            let g = super::groups(self.environment.size, WORKGROUP_SIZE);
            cpass.dispatch_workgroups(g, g, 6);
        }

        let irradiance_bind_group = ctx.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Irradiance BindGroup"),
            layout: &self.irradiance_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::TextureView(
                        &ctx.targets[self.environment.handle].view,
                    ),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::Sampler(&ctx.samplers.linear_clamp),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: wgpu::BindingResource::TextureView(&self.irradiance.storage),
                },
            ],
        });
        {
            let mut cpass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("Atmosphere Irradiance"),
                timestamp_writes: None,
            });
            cpass.set_pipeline(&pipelines.irradiance);
            cpass.set_bind_group(0, &irradiance_bind_group, &[]);
            let g = super::groups(self.irradiance.size, WORKGROUP_SIZE);
            cpass.dispatch_workgroups(g, g, 6);
        }

        self.key = Some(SkyKey {
            sun_direction: sun.safe_direction(),
            intensity: settings.sun_intensity,
            environment_size: settings.environment_size,
            irradiance_size: settings.irradiance_size,
        });
        log::debug!("atmosphere regenerated for sun {}", sun.safe_direction());
    }

    #[must_use]
    pub fn environment(&self) -> TextureHandle {
        self.environment.handle
    }

    #[must_use]
    pub fn irradiance(&self) -> TextureHandle {
        self.irradiance.handle
    }
}

impl RenderPass for AtmospherePass {
    fn name(&self) -> &'static str {
        "atmosphere"
    }

    fn resources(&self, _policy: &FramePolicy) -> PassResources {
        PassResources::new()
            .writes(&[ResourceId::EnvironmentMap, ResourceId::IrradianceMap])
            .with_flags(PassFlags::COMPUTE)
    }

    fn rebuild_pipelines(
        &mut self,
        ctx: &RendererContext,
        programs: &ProgramSet,
    ) -> Result<(), ShaderError> {
        let device = &ctx.device;
        let built = programs.get("atmosphere").and_then(|sky| {
            let irradiance = programs.get("irradiance")?;
            pipeline::checked(device, "atmosphere", || {
                let sky_layout =
                    pipeline::layout(device, "Atmosphere Pipeline Layout", &[&self.sky_layout]);
                let irradiance_layout = pipeline::layout(
                    device,
                    "Irradiance Pipeline Layout",
                    &[&self.irradiance_layout],
                );
                Ok(AtmospherePipelines {
                    sky: pipeline::compute(device, "Atmosphere Pipeline", &sky_layout, sky, "cs_main"),
                    irradiance: pipeline::compute(
                        device,
                        "Irradiance Pipeline",
                        &irradiance_layout,
                        irradiance,
                        "cs_main",
                    ),
                })
            })
        });
        let rebuilt = built.is_ok();
        let result = install_pipelines(self.name(), &mut self.pipelines, &mut self.status, built);
        if rebuilt {
            self.key = None;
        }
        result
    }

    fn status(&self) -> &PassStatus {
        &self.status
    }

    fn draw_debug_settings(&self, settings: &mut RenderSettings, ui: &mut dyn SettingsUi) {
        if ui.section("Atmosphere") {
            ui.slider_f32("Sun intensity", &mut settings.atmosphere.sun_intensity, 0.0, 100.0);
        }
    }
}
