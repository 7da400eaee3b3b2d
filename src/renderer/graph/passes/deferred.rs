//! Deferred Shading
//!
//! Full-screen resolve of the G-buffer into an HDR shading result. Lighting
//! per pixel:
//!
//! - the sun, with 3x3 PCF over the cascade array
//! - up to [`MAX_POINT_LIGHTS`] point lights
//! - image-based ambient from the atmosphere cubes and the BRDF LUT
//! - voxel cone-traced indirect diffuse, when voxel GI is enabled
//! - emissive
//!
//! A second target receives the pixels whose luminance (weighted by the
//! configured threshold vector) exceeds one, for bloom. Pixels without
//! geometry get the clear color.

use glam::Vec4;
use smallvec::SmallVec;

use crate::errors::ShaderError;
use crate::renderer::FramePolicy;
use crate::renderer::context::{RendererContext, TrackedBuffer};
use crate::renderer::debug_ui::SettingsUi;
use crate::renderer::frame::FrameResources;
use crate::renderer::graph::{
    PassResources, PassStatus, RenderPass, ResizeToken, ResourceId, install_pipelines,
};
use crate::renderer::pipeline::{self, ProgramSet, entries};
use crate::renderer::settings::{HDR_FORMAT, RenderSettings};
use crate::renderer::targets::TextureHandle;
use crate::scene::{PointLightInstance, Scene, Viewport};

use super::GBufferTargets;

pub const PROGRAMS: &[&str] = &["deferred"];

/// Point lights beyond this count are dropped, highest entity ids first.
pub const MAX_POINT_LIGHTS: usize = 10;

#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
struct GpuPointLight {
    /// xyz: world position, w: radius
    position: Vec4,
    /// rgb: color * intensity
    color: Vec4,
}

/// Matches `LightingUniforms` in `deferred.wgsl`.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
struct LightingUniforms {
    clear_color: Vec4,
    bloom_threshold: Vec4,
    /// x: point light count, y: ambient strength, z: GI strength, w: GI enabled
    params: Vec4,
    /// x: world size, y: voxels per side, z: mip count
    voxel: Vec4,
    points: [GpuPointLight; MAX_POINT_LIGHTS],
}

/// Deterministic subset of `lights` the shader evaluates: sorted by entity
/// id, truncated to [`MAX_POINT_LIGHTS`]. The second value is the number of
/// lights dropped.
#[must_use]
pub fn select_point_lights(
    lights: &[PointLightInstance],
) -> (SmallVec<[PointLightInstance; MAX_POINT_LIGHTS]>, usize) {
    let mut sorted: Vec<&PointLightInstance> = lights.iter().collect();
    sorted.sort_by_key(|l| l.entity);
    let dropped = sorted.len().saturating_sub(MAX_POINT_LIGHTS);
    let kept = sorted.into_iter().take(MAX_POINT_LIGHTS).copied().collect();
    (kept, dropped)
}

/// Textures the resolve samples, all produced earlier in the frame or
/// persistent.
#[derive(Debug, Clone, Copy)]
pub struct DeferredInputs<'a> {
    pub gbuffer: &'a GBufferTargets,
    pub shadow_map: TextureHandle,
    /// `None` binds the default black volume.
    pub voxels: Option<TextureHandle>,
    pub environment: TextureHandle,
    pub irradiance: TextureHandle,
    pub brdf_lut: TextureHandle,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeferredTargets {
    pub shading: TextureHandle,
    pub bloom_threshold: TextureHandle,
}

pub struct DeferredShadingPass {
    uniform_layout: wgpu::BindGroupLayout,
    texture_layout: wgpu::BindGroupLayout,
    lighting_buffer: TrackedBuffer,
    targets: Option<DeferredTargets>,
    dropped_lights: usize,
    pipeline: Option<wgpu::RenderPipeline>,
    status: PassStatus,
}

impl DeferredShadingPass {
    #[must_use]
    pub fn new(ctx: &RendererContext) -> Self {
        let fragment = wgpu::ShaderStages::FRAGMENT;
        let uniform_layout = ctx
            .device
            .create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some("Deferred Uniform Layout"),
                entries: &[
                    entries::uniform(0, fragment),
                    entries::uniform(1, fragment),
                    entries::uniform(2, fragment),
                ],
            });

        let filterable = wgpu::TextureSampleType::Float { filterable: true };
        let texture_layout = ctx
            .device
            .create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some("Deferred Texture Layout"),
                entries: &[
                    entries::texture_2d(0, fragment),
                    entries::texture_2d(1, fragment),
                    entries::texture_2d(2, fragment),
                    entries::texture(
                        3,
                        fragment,
                        wgpu::TextureViewDimension::D2,
                        wgpu::TextureSampleType::Float { filterable: false },
                    ),
                    entries::texture(
                        4,
                        fragment,
                        wgpu::TextureViewDimension::D2Array,
                        wgpu::TextureSampleType::Depth,
                    ),
                    entries::sampler(5, fragment, wgpu::SamplerBindingType::Comparison),
                    entries::texture(6, fragment, wgpu::TextureViewDimension::D3, filterable),
                    entries::texture(7, fragment, wgpu::TextureViewDimension::Cube, filterable),
                    entries::texture(8, fragment, wgpu::TextureViewDimension::Cube, filterable),
                    entries::texture_2d(9, fragment),
                    entries::sampler(10, fragment, wgpu::SamplerBindingType::Filtering),
                ],
            });

        let lighting = LightingUniforms {
            clear_color: Vec4::ZERO,
            bloom_threshold: Vec4::ZERO,
            params: Vec4::ZERO,
            voxel: Vec4::ONE,
            points: [GpuPointLight::default(); MAX_POINT_LIGHTS],
        };
        Self {
            uniform_layout,
            texture_layout,
            lighting_buffer: ctx.create_uniform("Lighting Uniforms", &lighting),
            targets: None,
            dropped_lights: 0,
            pipeline: None,
            status: PassStatus::Ready,
        }
    }

    /// Uploads lights and shading parameters for this frame.
    pub fn prepare(
        &mut self,
        ctx: &RendererContext,
        scene: &Scene,
        settings: &RenderSettings,
        policy: &FramePolicy,
        voxel_mip_count: u32,
    ) {
        let (selected, dropped) = select_point_lights(scene.point_lights());
        if dropped != self.dropped_lights {
            if dropped > 0 {
                log::warn!(
                    "{} point lights in scene, only the first {MAX_POINT_LIGHTS} by entity id are shaded",
                    scene.point_lights().len()
                );
            }
            self.dropped_lights = dropped;
        }

        let mut points = [GpuPointLight::default(); MAX_POINT_LIGHTS];
        for (slot, light) in points.iter_mut().zip(&selected) {
            *slot = GpuPointLight {
                position: light.position().extend(light.light.radius),
                color: (light.light.color * light.light.intensity).extend(1.0),
            };
        }

        let voxels = &settings.voxels;
        let lighting = LightingUniforms {
            clear_color: settings.clear_color,
            bloom_threshold: settings.deferred.bloom_threshold.extend(0.0),
            params: Vec4::new(
                selected.len() as f32,
                settings.deferred.ambient_strength,
                voxels.gi_strength,
                if policy.voxels { 1.0 } else { 0.0 },
            ),
            voxel: Vec4::new(
                voxels.world_size,
                voxels.size as f32,
                voxel_mip_count.max(1) as f32,
                0.0,
            ),
            points,
        };
        ctx.queue
            .write_buffer(&self.lighting_buffer, 0, bytemuck::bytes_of(&lighting));
    }

    pub fn execute(
        &self,
        ctx: &RendererContext,
        encoder: &mut wgpu::CommandEncoder,
        frame: &FrameResources,
        shadow_uniforms: &wgpu::Buffer,
        inputs: DeferredInputs<'_>,
    ) {
        let Some(targets) = &self.targets else {
            return;
        };
        let view = |handle: TextureHandle| &ctx.targets[handle].view;

        let black = Some(wgpu::Color::BLACK);
        let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("Deferred Shading Pass"),
            color_attachments: &[
                super::color_attachment(view(targets.shading), black),
                super::color_attachment(view(targets.bloom_threshold), black),
            ],
            depth_stencil_attachment: None,
            timestamp_writes: None,
            occlusion_query_set: None,
            multiview_mask: None,
        });
        let Some(pipeline) = &self.pipeline else {
            return;
        };

        let uniforms = ctx.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Deferred Uniform BindGroup"),
            layout: &self.uniform_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: frame.buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: self.lighting_buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: shadow_uniforms.as_entire_binding(),
                },
            ],
        });

        let gbuffer = inputs.gbuffer;
        let voxels = inputs.voxels.map_or(&ctx.defaults.black_3d, view);
        let texture = |binding, view| wgpu::BindGroupEntry {
            binding,
            resource: wgpu::BindingResource::TextureView(view),
        };
        let texture_group = ctx.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Deferred Texture BindGroup"),
            layout: &self.texture_layout,
            entries: &[
                texture(0, view(gbuffer.albedo)),
                texture(1, view(gbuffer.normal)),
                texture(2, view(gbuffer.material)),
                texture(3, view(gbuffer.depth)),
                texture(4, view(inputs.shadow_map)),
                wgpu::BindGroupEntry {
                    binding: 5,
                    resource: wgpu::BindingResource::Sampler(&ctx.samplers.shadow),
                },
                texture(6, voxels),
                texture(7, view(inputs.environment)),
                texture(8, view(inputs.irradiance)),
                texture(9, view(inputs.brdf_lut)),
                wgpu::BindGroupEntry {
                    binding: 10,
                    resource: wgpu::BindingResource::Sampler(&ctx.samplers.trilinear_clamp),
                },
            ],
        });

        pass.set_pipeline(pipeline);
        pass.set_bind_group(0, &uniforms, &[]);
        pass.set_bind_group(1, &texture_group, &[]);
        pass.draw(0..3, 0..1);
    }

    #[must_use]
    pub fn targets(&self) -> Option<&DeferredTargets> {
        self.targets.as_ref()
    }

    /// Point lights left out of the last frame.
    #[must_use]
    pub fn dropped_lights(&self) -> usize {
        self.dropped_lights
    }
}

impl RenderPass for DeferredShadingPass {
    fn name(&self) -> &'static str {
        "deferred"
    }

    fn resources(&self, policy: &FramePolicy) -> PassResources {
        let mut reads: SmallVec<[ResourceId; 8]> = SmallVec::from_slice(&[
            ResourceId::GBuffer,
            ResourceId::Depth,
            ResourceId::ShadowCascades,
            ResourceId::EnvironmentMap,
            ResourceId::IrradianceMap,
            ResourceId::BrdfLut,
        ]);
        if policy.voxels {
            reads.push(ResourceId::VoxelVolume);
        }
        PassResources::new()
            .reads(&reads)
            .writes(&[ResourceId::ShadingResult, ResourceId::BloomThreshold])
    }

    fn create_render_targets(
        &mut self,
        ctx: &mut RendererContext,
        viewport: &Viewport,
        _token: &ResizeToken,
    ) {
        let (w, h) = (viewport.size.x, viewport.size.y);
        let usage = wgpu::TextureUsages::RENDER_ATTACHMENT
            | wgpu::TextureUsages::TEXTURE_BINDING
            | wgpu::TextureUsages::COPY_SRC;
        self.targets = Some(DeferredTargets {
            shading: ctx
                .targets
                .create_2d(&ctx.device, "Shading Result", w, h, HDR_FORMAT, usage),
            bloom_threshold: ctx
                .targets
                .create_2d(&ctx.device, "Bloom Threshold", w, h, HDR_FORMAT, usage),
        });
    }

    fn destroy_render_targets(&mut self, ctx: &mut RendererContext, _token: &ResizeToken) {
        if let Some(targets) = self.targets.take() {
            ctx.targets.destroy(targets.shading);
            ctx.targets.destroy(targets.bloom_threshold);
        }
    }

    fn rebuild_pipelines(
        &mut self,
        ctx: &RendererContext,
        programs: &ProgramSet,
    ) -> Result<(), ShaderError> {
        let built = programs.get("deferred").and_then(|program| {
            pipeline::checked(&ctx.device, "deferred", || {
                let layout = pipeline::layout(
                    &ctx.device,
                    "Deferred Pipeline Layout",
                    &[&self.uniform_layout, &self.texture_layout],
                );
                let hdr = Some(wgpu::ColorTargetState {
                    format: HDR_FORMAT,
                    blend: None,
                    write_mask: wgpu::ColorWrites::ALL,
                });
                Ok(pipeline::fullscreen(
                    &ctx.device,
                    "Deferred Pipeline",
                    &layout,
                    program,
                    "fs_main",
                    &[hdr.clone(), hdr],
                ))
            })
        });
        install_pipelines(self.name(), &mut self.pipeline, &mut self.status, built)
    }

    fn status(&self) -> &PassStatus {
        &self.status
    }

    fn draw_debug_settings(&self, settings: &mut RenderSettings, ui: &mut dyn SettingsUi) {
        if !ui.section("Lighting") {
            return;
        }
        let deferred = &mut settings.deferred;
        ui.slider_f32("Ambient strength", &mut deferred.ambient_strength, 0.0, 4.0);
        ui.color("Bloom threshold", &mut deferred.bloom_threshold);
        let mut clear = settings.clear_color.truncate();
        if ui.color("Clear color", &mut clear) {
            settings.clear_color = clear.extend(settings.clear_color.w);
        }
        if self.dropped_lights > 0 {
            ui.label(&format!("{} point lights dropped", self.dropped_lights));
        }
    }
}

#[cfg(test)]
mod tests {
    use glam::{Mat4, Vec3};

    use super::*;
    use crate::scene::{Entity, PointLight};

    fn light(id: u32) -> PointLightInstance {
        PointLightInstance {
            entity: Entity(id),
            light: PointLight::new(Vec3::ONE, 1.0, 5.0),
            transform: Mat4::from_translation(Vec3::new(id as f32, 0.0, 0.0)),
        }
    }

    #[test]
    fn selection_keeps_lowest_entity_ids() {
        let lights: Vec<_> = (0..14).rev().map(light).collect();
        let (kept, dropped) = select_point_lights(&lights);
        assert_eq!(dropped, 4);
        assert_eq!(kept.len(), MAX_POINT_LIGHTS);
        let ids: Vec<u32> = kept.iter().map(|l| l.entity.0).collect();
        assert_eq!(ids, (0..10).collect::<Vec<_>>());
    }

    #[test]
    fn selection_is_independent_of_scene_order() {
        let forward: Vec<_> = (0..12).map(light).collect();
        let mut shuffled = forward.clone();
        shuffled.swap(0, 11);
        shuffled.swap(3, 7);
        let a: Vec<_> = select_point_lights(&forward).0.iter().map(|l| l.entity).collect();
        let b: Vec<_> = select_point_lights(&shuffled).0.iter().map(|l| l.entity).collect();
        assert_eq!(a, b);
    }

    #[test]
    fn lighting_uniforms_match_wgsl_size() {
        assert_eq!(
            std::mem::size_of::<LightingUniforms>(),
            4 * 16 + MAX_POINT_LIGHTS * 32
        );
    }
}
