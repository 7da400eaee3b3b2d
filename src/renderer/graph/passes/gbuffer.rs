//! G-Buffer Pass
//!
//! Rasterizes visible meshes into five color targets plus depth:
//!
//! | Target   | Format         | Content                                   |
//! |----------|----------------|-------------------------------------------|
//! | albedo   | `Rgba16Float`  | base color, alpha                         |
//! | normal   | `Rgba16Float`  | world normal (xyz)                        |
//! | material | `Rgba16Float`  | metallic, roughness, emissive strength    |
//! | velocity | `Rg16Float`    | screen motion in UV units                 |
//! | entity   | `R32Uint`      | entity id, `u32::MAX` where nothing drew  |
//!
//! The pass also prepares the frame: it uploads [`FrameUniforms`], writes one
//! [`ObjectUniforms`] record per scene mesh (used by every geometry pass) and
//! frustum-culls the meshes it draws itself.

use glam::{Mat4, Vec2, Vec4};
use rustc_hash::FxHashMap;

use crate::errors::ShaderError;
use crate::renderer::FramePolicy;
use crate::renderer::context::RendererContext;
use crate::renderer::debug_ui::SettingsUi;
use crate::renderer::frame::{FrameResources, FrameUniforms, ObjectUniforms};
use crate::renderer::graph::{
    PassResources, PassStatus, RenderPass, ResizeToken, ResourceId, install_pipelines,
};
use crate::renderer::pipeline::{self, DEPTH_FORMAT, MeshPipelineDesc, ProgramSet, entries};
use crate::renderer::settings::{HDR_FORMAT, RenderSettings};
use crate::renderer::targets::TextureHandle;
use crate::scene::{Entity, Material, Scene, Viewport};

use super::SkinningPass;

pub const PROGRAMS: &[&str] = &["gbuffer"];

pub const VELOCITY_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rg16Float;
pub const ENTITY_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::R32Uint;

/// Handles of the G-buffer targets, valid until the next resize.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GBufferTargets {
    pub albedo: TextureHandle,
    pub normal: TextureHandle,
    pub material: TextureHandle,
    pub velocity: TextureHandle,
    pub entity: TextureHandle,
    pub depth: TextureHandle,
}

impl GBufferTargets {
    #[must_use]
    pub fn handles(&self) -> [TextureHandle; 6] {
        [
            self.albedo,
            self.normal,
            self.material,
            self.velocity,
            self.entity,
            self.depth,
        ]
    }
}

/// Camera and transforms of the previous frame, for velocity.
#[derive(Debug, Default)]
struct MotionHistory {
    view_proj: Option<Mat4>,
    jitter: Vec2,
    transforms: FxHashMap<Entity, Mat4>,
}

pub struct GBufferPass {
    frame_layout: wgpu::BindGroupLayout,
    object_layout: wgpu::BindGroupLayout,
    material_layout: wgpu::BindGroupLayout,
    frame_bind_group: wgpu::BindGroup,
    pipeline: Option<wgpu::RenderPipeline>,
    status: PassStatus,
    targets: Option<GBufferTargets>,
    history: MotionHistory,
    visible: Vec<usize>,
    culled_count: usize,
}

impl GBufferPass {
    #[must_use]
    pub fn new(ctx: &RendererContext, frame: &FrameResources) -> Self {
        let device = &ctx.device;
        let frame_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("GBuffer Frame Layout"),
            entries: &[entries::uniform(
                0,
                wgpu::ShaderStages::VERTEX | wgpu::ShaderStages::FRAGMENT,
            )],
        });
        let fragment = wgpu::ShaderStages::FRAGMENT;
        let material_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("GBuffer Material Layout"),
            entries: &[
                entries::texture_2d(0, fragment),
                entries::texture_2d(1, fragment),
                entries::texture_2d(2, fragment),
                entries::sampler(3, fragment, wgpu::SamplerBindingType::Filtering),
            ],
        });
        let frame_bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("GBuffer Frame BindGroup"),
            layout: &frame_layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: frame.buffer.as_entire_binding(),
            }],
        });

        Self {
            frame_layout,
            object_layout: frame.objects.layout().clone(),
            material_layout,
            frame_bind_group,
            pipeline: None,
            status: PassStatus::Ready,
            targets: None,
            history: MotionHistory::default(),
            visible: Vec::new(),
            culled_count: 0,
        }
    }

    /// Uploads frame and object uniforms and culls the scene.
    ///
    /// On frame 0 the previous camera and transforms equal the current ones,
    /// so velocity starts out zero.
    pub fn prepare(
        &mut self,
        ctx: &RendererContext,
        frame: &mut FrameResources,
        scene: &Scene,
        viewport: &Viewport,
        frame_index: u64,
        jitter: Vec2,
    ) {
        let camera = &viewport.camera;
        let view = camera.view();
        let proj = viewport.jittered_projection(jitter);
        let view_proj = proj * view;

        let first = frame_index == 0;
        let prev_view_proj = match self.history.view_proj {
            Some(prev) if !first => prev,
            _ => view_proj,
        };
        let prev_jitter = if first { jitter } else { self.history.jitter };

        let size = viewport.size.as_vec2();
        frame.upload(
            ctx,
            FrameUniforms {
                view,
                proj,
                view_proj,
                inv_view_proj: view_proj.inverse(),
                prev_view_proj,
                camera_position: camera.position().extend(1.0),
                jitter: Vec4::new(jitter.x, jitter.y, prev_jitter.x, prev_jitter.y),
                viewport: Vec4::new(size.x, size.y, 1.0 / size.x, 1.0 / size.y),
                params: Vec4::new(camera.near, camera.far, frame_index as f32, 0.0),
            },
        );

        let meshes = scene.meshes();
        let records: Vec<ObjectUniforms> = meshes
            .iter()
            .map(|instance| {
                let prev_model = if first {
                    instance.transform
                } else {
                    self.history
                        .transforms
                        .get(&instance.entity)
                        .copied()
                        .unwrap_or(instance.transform)
                };
                ObjectUniforms::new(instance, prev_model)
            })
            .collect();
        frame.objects.write(ctx, &records);

        let frustum = camera.frustum();
        self.visible.clear();
        self.visible.extend(
            meshes
                .iter()
                .enumerate()
                .filter(|(_, m)| m.world_bounds().is_none_or(|b| frustum.contains_aabb(&b)))
                .map(|(i, _)| i),
        );
        self.culled_count = meshes.len() - self.visible.len();

        self.history.view_proj = Some(view_proj);
        self.history.jitter = jitter;
        self.history.transforms.clear();
        self.history
            .transforms
            .extend(meshes.iter().map(|m| (m.entity, m.transform)));
    }

    fn material_bind_group(
        &self,
        ctx: &RendererContext,
        material: Option<&Material>,
    ) -> wgpu::BindGroup {
        let defaults = &ctx.defaults;
        let albedo = material
            .and_then(|m| m.albedo_map.as_ref())
            .map_or(&defaults.white, |t| &t.view);
        let normal = material
            .and_then(|m| m.normal_map.as_ref())
            .map_or(&defaults.normal, |t| &t.view);
        let metallic_roughness = material
            .and_then(|m| m.metallic_roughness_map.as_ref())
            .map_or(&defaults.metallic_roughness, |t| &t.view);

        ctx.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("GBuffer Material BindGroup"),
            layout: &self.material_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::TextureView(albedo),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::TextureView(normal),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: wgpu::BindingResource::TextureView(metallic_roughness),
                },
                wgpu::BindGroupEntry {
                    binding: 3,
                    resource: wgpu::BindingResource::Sampler(&ctx.samplers.linear_repeat),
                },
            ],
        })
    }

    /// Clears every target, then draws the visible meshes when the pipeline
    /// is available.
    pub fn execute(
        &self,
        ctx: &RendererContext,
        encoder: &mut wgpu::CommandEncoder,
        scene: &Scene,
        frame: &FrameResources,
        skinning: &SkinningPass,
    ) {
        let Some(targets) = &self.targets else {
            return;
        };

        // One bind group per distinct material, rebuilt each frame.
        let meshes = scene.meshes();
        let mut materials: FxHashMap<usize, wgpu::BindGroup> = FxHashMap::default();
        let default_material = self.material_bind_group(ctx, None);
        if self.pipeline.is_some() {
            for &i in &self.visible {
                if let Some(material) = &meshes[i].material {
                    let key = std::sync::Arc::as_ptr(material) as usize;
                    materials
                        .entry(key)
                        .or_insert_with(|| self.material_bind_group(ctx, Some(material)));
                }
            }
        }

        let view = |handle: TextureHandle| &ctx.targets[handle].view;
        let black = Some(wgpu::Color::TRANSPARENT);
        let null_entity = Some(wgpu::Color {
            r: f64::from(Entity::NULL.to_bits()),
            g: 0.0,
            b: 0.0,
            a: 0.0,
        });

        let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("GBuffer Pass"),
            color_attachments: &[
                super::color_attachment(view(targets.albedo), black),
                super::color_attachment(view(targets.normal), black),
                super::color_attachment(view(targets.material), black),
                super::color_attachment(view(targets.velocity), black),
                super::color_attachment(view(targets.entity), null_entity),
            ],
            depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                view: view(targets.depth),
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

        let Some(pipeline) = &self.pipeline else {
            return;
        };
        pass.set_pipeline(pipeline);
        pass.set_bind_group(0, &self.frame_bind_group, &[]);

        for &i in &self.visible {
            let instance = &meshes[i];
            let material = instance
                .material
                .as_ref()
                .and_then(|m| materials.get(&(std::sync::Arc::as_ptr(m) as usize)))
                .unwrap_or(&default_material);
            pass.set_bind_group(2, material, &[]);
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

    #[must_use]
    pub fn targets(&self) -> Option<&GBufferTargets> {
        self.targets.as_ref()
    }

    /// Scene indices drawn this frame.
    #[must_use]
    pub fn visible(&self) -> &[usize] {
        &self.visible
    }

    #[must_use]
    pub fn culled_count(&self) -> usize {
        self.culled_count
    }
}

impl RenderPass for GBufferPass {
    fn name(&self) -> &'static str {
        "gbuffer"
    }

    fn resources(&self, _policy: &FramePolicy) -> PassResources {
        PassResources::new()
            .reads(&[ResourceId::SkinnedVertices])
            .writes(&[
                ResourceId::GBuffer,
                ResourceId::Velocity,
                ResourceId::EntityIds,
                ResourceId::Depth,
            ])
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
        let device = &ctx.device;
        let targets = &mut ctx.targets;
        self.targets = Some(GBufferTargets {
            albedo: targets.create_2d(device, "GBuffer Albedo", w, h, HDR_FORMAT, usage),
            normal: targets.create_2d(device, "GBuffer Normal", w, h, HDR_FORMAT, usage),
            material: targets.create_2d(device, "GBuffer Material", w, h, HDR_FORMAT, usage),
            velocity: targets.create_2d(device, "GBuffer Velocity", w, h, VELOCITY_FORMAT, usage),
            entity: targets.create_2d(device, "GBuffer Entity", w, h, ENTITY_FORMAT, usage),
            depth: targets.create_2d(device, "GBuffer Depth", w, h, DEPTH_FORMAT, usage),
        });
    }

    fn destroy_render_targets(&mut self, ctx: &mut RendererContext, _token: &ResizeToken) {
        if let Some(targets) = self.targets.take() {
            for handle in targets.handles() {
                ctx.targets.destroy(handle);
            }
        }
    }

    fn rebuild_pipelines(
        &mut self,
        ctx: &RendererContext,
        programs: &ProgramSet,
    ) -> Result<(), ShaderError> {
        let built = programs.get("gbuffer").and_then(|program| {
            pipeline::checked(&ctx.device, "gbuffer", || {
                let layout = pipeline::layout(
                    &ctx.device,
                    "GBuffer Pipeline Layout",
                    &[&self.frame_layout, &self.object_layout, &self.material_layout],
                );
                let color = |format| {
                    Some(wgpu::ColorTargetState {
                        format,
                        blend: None,
                        write_mask: wgpu::ColorWrites::ALL,
                    })
                };
                Ok(pipeline::mesh(
                    &ctx.device,
                    &MeshPipelineDesc {
                        label: "GBuffer Pipeline",
                        layout: &layout,
                        program,
                        fragment_entry: Some("fs_main"),
                        targets: &[
                            color(HDR_FORMAT),
                            color(HDR_FORMAT),
                            color(HDR_FORMAT),
                            color(VELOCITY_FORMAT),
                            color(ENTITY_FORMAT),
                        ],
                        depth: Some(pipeline::depth_write()),
                        cull_mode: Some(wgpu::Face::Back),
                        conservative: false,
                    },
                ))
            })
        });
        install_pipelines(self.name(), &mut self.pipeline, &mut self.status, built)
    }

    fn status(&self) -> &PassStatus {
        &self.status
    }

    fn draw_debug_settings(&self, _settings: &mut RenderSettings, ui: &mut dyn SettingsUi) {
        if ui.section("G-Buffer") {
            ui.label(&format!(
                "{} drawn, {} culled",
                self.visible.len(),
                self.culled_count
            ));
        }
    }
}
