//! GPU Skinning
//!
//! One compute dispatch per skinned mesh deforms the static vertex buffer by
//! the skeleton's bone matrices into a per-entity output buffer of the same
//! layout. Geometry passes bind that output instead of the static buffer
//! through [`SkinningPass::vertex_buffer`].

use std::sync::Arc;

use rustc_hash::{FxHashMap, FxHashSet};

use crate::errors::ShaderError;
use crate::renderer::FramePolicy;
use crate::renderer::context::{RendererContext, TrackedBuffer};
use crate::renderer::debug_ui::SettingsUi;
use crate::renderer::graph::{
    PassFlags, PassResources, PassStatus, RenderPass, ResourceId, install_pipelines,
};
use crate::renderer::pipeline::{self, ProgramSet, entries};
use crate::renderer::settings::RenderSettings;
use crate::scene::{Entity, GpuMesh, GpuSkin, MeshInstance, Scene, Vertex};

pub const PROGRAMS: &[&str] = &["skinning"];

const WORKGROUP_SIZE: u32 = 64;

#[repr(C)]
#[derive(Debug, Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
struct SkinParams {
    vertex_count: u32,
    bone_count: u32,
    _pad: [u32; 2],
}

/// Deformed vertices of one entity plus the buffers feeding its dispatch.
struct SkinnedOutput {
    mesh: Arc<GpuMesh>,
    skin: Arc<GpuSkin>,
    output: TrackedBuffer,
    bones: TrackedBuffer,
    bone_capacity: usize,
    params: TrackedBuffer,
    bind_group: wgpu::BindGroup,
}

pub struct SkinningPass {
    layout: wgpu::BindGroupLayout,
    pipeline: Option<wgpu::ComputePipeline>,
    status: PassStatus,
    outputs: FxHashMap<Entity, SkinnedOutput>,
}

impl SkinningPass {
    #[must_use]
    pub fn new(ctx: &RendererContext) -> Self {
        let compute = wgpu::ShaderStages::COMPUTE;
        let layout = ctx
            .device
            .create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some("Skinning Layout"),
                entries: &[
                    entries::uniform(0, compute),
                    entries::storage(1, compute, true),
                    entries::storage(2, compute, true),
                    entries::storage(3, compute, true),
                    entries::storage(4, compute, false),
                ],
            });
        Self {
            layout,
            pipeline: None,
            status: PassStatus::Ready,
            outputs: FxHashMap::default(),
        }
    }

    fn create_output(
        &self,
        ctx: &RendererContext,
        instance: &MeshInstance,
        skin: &Arc<GpuSkin>,
        bone_count: usize,
    ) -> SkinnedOutput {
        let label = format!("Skinned {:?}", instance.entity);
        let output = ctx.create_buffer(&wgpu::BufferDescriptor {
            label: Some(&label),
            size: instance.mesh.vertex_buffer.size(),
            usage: wgpu::BufferUsages::VERTEX
                | wgpu::BufferUsages::STORAGE
                | wgpu::BufferUsages::COPY_SRC,
            mapped_at_creation: false,
        });
        let bone_capacity = bone_count.max(1).next_power_of_two();
        let bones = ctx.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Bone Matrices"),
            size: (bone_capacity * std::mem::size_of::<glam::Mat4>()) as u64,
            usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let params = ctx.create_uniform(
            "Skin Params",
            &SkinParams {
                vertex_count: 0,
                bone_count: 0,
                _pad: [0; 2],
            },
        );
        let bind_group = ctx.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Skinning BindGroup"),
            layout: &self.layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: params.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: bones.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: skin.buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 3,
                    resource: instance.mesh.vertex_buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 4,
                    resource: output.as_entire_binding(),
                },
            ],
        });
        SkinnedOutput {
            mesh: Arc::clone(&instance.mesh),
            skin: Arc::clone(skin),
            output,
            bones,
            bone_capacity,
            params,
            bind_group,
        }
    }

    /// Uploads bone palettes and deforms every skinned mesh of `scene`.
    pub fn execute(
        &mut self,
        ctx: &RendererContext,
        encoder: &mut wgpu::CommandEncoder,
        scene: &Scene,
    ) {
        let mut live = FxHashSet::default();
        let mut dispatches = Vec::new();

        for (instance, skeleton) in scene.skinned_meshes() {
            let vertex_count = instance.mesh.vertex_count;
            if skeleton.skin.vertex_count != vertex_count {
                log::warn!(
                    "{:?}: skin has {} influences for {vertex_count} vertices, drawn unskinned",
                    instance.entity,
                    skeleton.skin.vertex_count
                );
                continue;
            }
            live.insert(instance.entity);

            let bone_count = skeleton.bone_transforms.len().max(1);
            let stale = self.outputs.get(&instance.entity).is_none_or(|out| {
                !Arc::ptr_eq(&out.mesh, &instance.mesh)
                    || !Arc::ptr_eq(&out.skin, &skeleton.skin)
                    || out.bone_capacity < bone_count
            });
            if stale {
                let output = self.create_output(ctx, instance, &skeleton.skin, bone_count);
                self.outputs.insert(instance.entity, output);
            }
            let Some(out) = self.outputs.get(&instance.entity) else {
                continue;
            };

            if skeleton.bone_transforms.is_empty() {
                ctx.queue.write_buffer(
                    &out.bones,
                    0,
                    bytemuck::bytes_of(&glam::Mat4::IDENTITY),
                );
            } else {
                ctx.queue
                    .write_buffer(&out.bones, 0, bytemuck::cast_slice(&skeleton.bone_transforms));
            }
            ctx.queue.write_buffer(
                &out.params,
                0,
                bytemuck::bytes_of(&SkinParams {
                    vertex_count,
                    bone_count: bone_count as u32,
                    _pad: [0; 2],
                }),
            );
            dispatches.push((instance.entity, vertex_count));
        }

        self.outputs.retain(|entity, _| live.contains(entity));

        let Some(pipeline) = &self.pipeline else {
            return;
        };
        if dispatches.is_empty() {
            return;
        }

        let mut cpass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
            label: Some("Skinning Pass"),
            timestamp_writes: None,
        });
        cpass.set_pipeline(pipeline);
        for (entity, vertex_count) in dispatches {
            if let Some(out) = self.outputs.get(&entity) {
                cpass.set_bind_group(0, &out.bind_group, &[]);
                cpass.dispatch_workgroups(super::groups(vertex_count, WORKGROUP_SIZE), 1, 1);
            }
        }
    }

    /// Deformed vertices when `instance` is skinned and the pass is
    /// running, the static buffer otherwise.
    #[must_use]
    pub fn vertex_buffer<'a>(&'a self, instance: &'a MeshInstance) -> &'a wgpu::Buffer {
        if self.is_ready()
            && instance.skeleton.is_some()
            && let Some(out) = self.outputs.get(&instance.entity)
        {
            return &out.output;
        }
        &instance.mesh.vertex_buffer
    }

    /// Deformed vertex buffer of `entity`, if it was skinned this frame.
    #[must_use]
    pub fn output(&self, entity: Entity) -> Option<&wgpu::Buffer> {
        self.outputs.get(&entity).map(|out| &*out.output)
    }

    #[must_use]
    pub fn skinned_count(&self) -> usize {
        self.outputs.len()
    }
}

impl RenderPass for SkinningPass {
    fn name(&self) -> &'static str {
        "skinning"
    }

    fn resources(&self, _policy: &FramePolicy) -> PassResources {
        PassResources::new()
            .writes(&[ResourceId::SkinnedVertices])
            .with_flags(PassFlags::COMPUTE)
    }

    fn rebuild_pipelines(
        &mut self,
        ctx: &RendererContext,
        programs: &ProgramSet,
    ) -> Result<(), ShaderError> {
        let built = programs.get("skinning").and_then(|program| {
            pipeline::checked(&ctx.device, "skinning", || {
                let layout = pipeline::layout(&ctx.device, "Skinning Pipeline Layout", &[&self.layout]);
                Ok(pipeline::compute(&ctx.device, "Skinning Pipeline", &layout, program, "cs_main"))
            })
        });
        install_pipelines(self.name(), &mut self.pipeline, &mut self.status, built)
    }

    fn status(&self) -> &PassStatus {
        &self.status
    }

    fn draw_debug_settings(&self, _settings: &mut RenderSettings, ui: &mut dyn SettingsUi) {
        if ui.section("Skinning") {
            ui.label(&format!(
                "{} skinned meshes, {} floats per vertex",
                self.outputs.len(),
                Vertex::FLOATS
            ));
        }
    }
}
