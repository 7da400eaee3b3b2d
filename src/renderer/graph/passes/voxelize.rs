//! Scene Voxelization
//!
//! Builds a lit, mip-mapped `Rgba8Unorm` volume centred on the world origin
//! for voxel cone-traced GI. Each frame:
//!
//! 1. every mip level is cleared to transparent black
//! 2. the scene is rasterized once per major axis with an orthographic
//!    camera; fragments keep only the axis their triangle faces most and are
//!    written straight into level 0 through a storage view, lit by the sun
//!    with cascade shadows
//! 3. optionally, level 0 is opacity-corrected from a scratch copy
//! 4. each further level averages the 2x2x2 octant of the one below
//!
//! The raster pass needs a color attachment to define its viewport; it
//! draws into a write-masked `R8Unorm` dummy of `size x size`.

use glam::{Mat4, UVec4, Vec3, Vec4};

use crate::errors::ShaderError;
use crate::renderer::FramePolicy;
use crate::renderer::context::{RendererContext, TrackedBuffer};
use crate::renderer::debug_ui::SettingsUi;
use crate::renderer::frame::{FrameResources, align_to};
use crate::renderer::graph::{
    PassFlags, PassResources, PassStatus, RenderPass, ResourceId, install_pipelines,
};
use crate::renderer::pipeline::{self, MeshPipelineDesc, ProgramSet, entries};
use crate::renderer::settings::{RenderSettings, VoxelSettings};
use crate::renderer::targets::TextureHandle;
use crate::scene::Scene;

use super::{ShadowCascadePass, SkinningPass};

pub const PROGRAMS: &[&str] = &["voxelize", "voxel_clear", "voxel_opacity", "voxel_mip"];

pub const VOLUME_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8Unorm;

const WORKGROUP_SIZE: u32 = 4;

/// Ambient term added to direct light during voxelization.
const VOXEL_AMBIENT: f32 = 0.05;

#[repr(C)]
#[derive(Debug, Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
struct AxisUniforms {
    view_proj: Mat4,
    axis: UVec4,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
struct VoxelUniforms {
    params: Vec4,
}

/// Orthographic view-projections looking down +X, +Y and +Z at a cube of
/// edge `world_size` centred on the origin.
#[must_use]
pub fn axis_view_projections(world_size: f32) -> [Mat4; 3] {
    let half = world_size * 0.5;
    let proj = Mat4::orthographic_rh(-half, half, -half, half, half, 3.0 * half);
    let eyes = [
        (Vec3::X * world_size, Vec3::Y),
        (Vec3::Y * world_size, Vec3::NEG_Z),
        (Vec3::Z * world_size, Vec3::Y),
    ];
    eyes.map(|(eye, up)| proj * Mat4::look_at_rh(eye, Vec3::ZERO, up))
}

/// Downsampled value of a 2x2x2 octant: the unweighted mean of all eight
/// children, alpha included, so coverage falls off with empty children.
#[must_use]
pub fn reduce_voxel_octant(children: &[Vec4; 8]) -> Vec4 {
    children.iter().copied().sum::<Vec4>() / 8.0
}

struct VoxelPipelines {
    raster: wgpu::RenderPipeline,
    clear: wgpu::ComputePipeline,
    opacity: wgpu::ComputePipeline,
    mip: wgpu::ComputePipeline,
}

/// Volume plus the per-level views and helper targets sized from it.
struct VoxelVolume {
    handle: TextureHandle,
    size: u32,
    levels: Vec<wgpu::TextureView>,
    dummy: TextureHandle,
    scratch: Option<TextureHandle>,
}

pub struct VoxelizationPass {
    raster_layout: wgpu::BindGroupLayout,
    object_layout: wgpu::BindGroupLayout,
    volume_layout: wgpu::BindGroupLayout,
    clear_layout: wgpu::BindGroupLayout,
    reduce_layout: wgpu::BindGroupLayout,
    axis_buffer: TrackedBuffer,
    axis_stride: u32,
    voxel_buffer: TrackedBuffer,
    raster_bind_group: wgpu::BindGroup,
    volume: Option<VoxelVolume>,
    conservative: bool,
    pipelines: Option<VoxelPipelines>,
    status: PassStatus,
}

impl VoxelizationPass {
    #[must_use]
    pub fn new(ctx: &mut RendererContext, frame: &FrameResources, settings: &VoxelSettings) -> Self {
        let device = &ctx.device;
        let vertex_fragment = wgpu::ShaderStages::VERTEX | wgpu::ShaderStages::FRAGMENT;
        let fragment = wgpu::ShaderStages::FRAGMENT;
        let compute = wgpu::ShaderStages::COMPUTE;
        let d3 = wgpu::TextureViewDimension::D3;

        let raster_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Voxelize Axis Layout"),
            entries: &[
                entries::dynamic_uniform(0, vertex_fragment),
                entries::uniform(1, fragment),
            ],
        });
        let volume_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Voxelize Volume Layout"),
            entries: &[
                entries::storage_texture(0, fragment, VOLUME_FORMAT, d3),
                entries::uniform(1, fragment),
                entries::texture(
                    2,
                    fragment,
                    wgpu::TextureViewDimension::D2Array,
                    wgpu::TextureSampleType::Depth,
                ),
                entries::sampler(3, fragment, wgpu::SamplerBindingType::Comparison),
            ],
        });
        let clear_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Voxel Clear Layout"),
            entries: &[entries::storage_texture(0, compute, VOLUME_FORMAT, d3)],
        });
        let reduce_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Voxel Reduce Layout"),
            entries: &[
                entries::texture(
                    0,
                    compute,
                    d3,
                    wgpu::TextureSampleType::Float { filterable: true },
                ),
                entries::storage_texture(1, compute, VOLUME_FORMAT, d3),
            ],
        });

        let axis_size = std::mem::size_of::<AxisUniforms>() as u64;
        let min_alignment = device.limits().min_uniform_buffer_offset_alignment;
        let axis_stride = align_to(axis_size as u32, min_alignment);
        let axis_buffer = ctx.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Voxelize Axis Uniforms"),
            size: u64::from(axis_stride) * 3,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let voxel_buffer = ctx.create_uniform(
            "Voxelize Uniforms",
            &VoxelUniforms {
                params: Vec4::ZERO,
            },
        );
        let raster_bind_group = ctx.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Voxelize Axis BindGroup"),
            layout: &raster_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::Buffer(wgpu::BufferBinding {
                        buffer: &axis_buffer,
                        offset: 0,
                        size: wgpu::BufferSize::new(axis_size),
                    }),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: voxel_buffer.as_entire_binding(),
                },
            ],
        });

        let conservative = ctx.supports(wgpu::Features::CONSERVATIVE_RASTERIZATION);
        if !conservative {
            log::info!("conservative rasterization unavailable, thin geometry may leave holes");
        }

        let mut pass = Self {
            raster_layout,
            object_layout: frame.objects.layout().clone(),
            volume_layout,
            clear_layout,
            reduce_layout,
            axis_buffer,
            axis_stride,
            voxel_buffer,
            raster_bind_group,
            volume: None,
            conservative,
            pipelines: None,
            status: PassStatus::Ready,
        };
        pass.ensure_volume(ctx, settings);
        pass
    }

    fn ensure_volume(&mut self, ctx: &mut RendererContext, settings: &VoxelSettings) {
        let size = settings.size;
        if self.volume.as_ref().is_none_or(|v| v.size != size) {
            if let Some(old) = self.volume.take() {
                for handle in [Some(old.handle), Some(old.dummy), old.scratch]
                    .into_iter()
                    .flatten()
                {
                    ctx.targets.destroy(handle);
                }
            }

            let mip_count = size.max(2).ilog2();
            let handle = ctx.targets.create(
                &ctx.device,
                &wgpu::TextureDescriptor {
                    label: Some("Voxel Volume"),
                    size: wgpu::Extent3d {
                        width: size,
                        height: size,
                        depth_or_array_layers: size,
                    },
                    mip_level_count: mip_count,
                    sample_count: 1,
                    dimension: wgpu::TextureDimension::D3,
                    format: VOLUME_FORMAT,
                    usage: wgpu::TextureUsages::STORAGE_BINDING
                        | wgpu::TextureUsages::TEXTURE_BINDING
                        | wgpu::TextureUsages::COPY_SRC,
                    view_formats: &[],
                },
                None,
            );
            let target = &ctx.targets[handle];
            let levels = (0..mip_count).map(|level| target.mip_view(level)).collect();
            let dummy = ctx.targets.create_2d(
                &ctx.device,
                "Voxelize Dummy Target",
                size,
                size,
                wgpu::TextureFormat::R8Unorm,
                wgpu::TextureUsages::RENDER_ATTACHMENT,
            );
            log::debug!("voxel volume {size}^3 with {mip_count} mips");
            self.volume = Some(VoxelVolume {
                handle,
                size,
                levels,
                dummy,
                scratch: None,
            });
        }

        let Some(volume) = self.volume.as_mut() else {
            return;
        };
        match (settings.opacity_correction, volume.scratch) {
            (true, None) => {
                volume.scratch = Some(ctx.targets.create(
                    &ctx.device,
                    &wgpu::TextureDescriptor {
                        label: Some("Voxel Opacity Scratch"),
                        size: wgpu::Extent3d {
                            width: size,
                            height: size,
                            depth_or_array_layers: size,
                        },
                        mip_level_count: 1,
                        sample_count: 1,
                        dimension: wgpu::TextureDimension::D3,
                        format: VOLUME_FORMAT,
                        usage: wgpu::TextureUsages::TEXTURE_BINDING
                            | wgpu::TextureUsages::COPY_DST,
                        view_formats: &[],
                    },
                    None,
                ));
            }
            (false, Some(scratch)) => {
                ctx.targets.destroy(scratch);
                volume.scratch = None;
            }
            _ => {}
        }
    }

    /// Applies volume size changes and uploads the axis cameras.
    pub fn prepare(&mut self, ctx: &mut RendererContext, settings: &VoxelSettings) {
        self.ensure_volume(ctx, settings);

        let stride = self.axis_stride as usize;
        let mut bytes = vec![0u8; stride * 3];
        for (axis, (chunk, view_proj)) in bytes
            .chunks_exact_mut(stride)
            .zip(axis_view_projections(settings.world_size))
            .enumerate()
        {
            let record = AxisUniforms {
                view_proj,
                axis: UVec4::new(axis as u32, 0, 0, 0),
            };
            let record = bytemuck::bytes_of(&record);
            chunk[..record.len()].copy_from_slice(record);
        }
        ctx.queue.write_buffer(&self.axis_buffer, 0, &bytes);
        ctx.queue.write_buffer(
            &self.voxel_buffer,
            0,
            bytemuck::bytes_of(&VoxelUniforms {
                params: Vec4::new(settings.world_size, settings.size as f32, VOXEL_AMBIENT, 0.0),
            }),
        );
    }

    fn reduce_bind_group(
        &self,
        ctx: &RendererContext,
        source: &wgpu::TextureView,
        destination: &wgpu::TextureView,
    ) -> wgpu::BindGroup {
        ctx.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Voxel Reduce BindGroup"),
            layout: &self.reduce_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::TextureView(source),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::TextureView(destination),
                },
            ],
        })
    }

    pub fn execute(
        &self,
        ctx: &RendererContext,
        encoder: &mut wgpu::CommandEncoder,
        scene: &Scene,
        frame: &FrameResources,
        skinning: &SkinningPass,
        shadow: &ShadowCascadePass,
    ) {
        let (Some(volume), Some(pipelines)) = (&self.volume, &self.pipelines) else {
            return;
        };

        // 1. Clear every level.
        for (level, view) in volume.levels.iter().enumerate() {
            let extent = (volume.size >> level).max(1);
            let bind_group = ctx.device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("Voxel Clear BindGroup"),
                layout: &self.clear_layout,
                entries: &[wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::TextureView(view),
                }],
            });
            let mut cpass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("Voxel Clear"),
                timestamp_writes: None,
            });
            cpass.set_pipeline(&pipelines.clear);
            cpass.set_bind_group(0, &bind_group, &[]);
            let groups = super::groups(extent, WORKGROUP_SIZE);
            cpass.dispatch_workgroups(groups, groups, groups);
        }

        // 2. Rasterize along each axis into level 0.
        if let Some(shadow_map) = shadow.map() {
            let volume_bind_group = ctx.device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("Voxelize Volume BindGroup"),
                layout: &self.volume_layout,
                entries: &[
                    wgpu::BindGroupEntry {
                        binding: 0,
                        resource: wgpu::BindingResource::TextureView(&volume.levels[0]),
                    },
                    wgpu::BindGroupEntry {
                        binding: 1,
                        resource: shadow.uniform_buffer().as_entire_binding(),
                    },
                    wgpu::BindGroupEntry {
                        binding: 2,
                        resource: wgpu::BindingResource::TextureView(
                            &ctx.targets[shadow_map].view,
                        ),
                    },
                    wgpu::BindGroupEntry {
                        binding: 3,
                        resource: wgpu::BindingResource::Sampler(&ctx.samplers.shadow),
                    },
                ],
            });
            let dummy = &ctx.targets[volume.dummy].view;

            for axis in 0..3u32 {
                let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                    label: Some("Voxelize Axis"),
                    color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                        view: dummy,
                        depth_slice: None,
                        resolve_target: None,
                        ops: wgpu::Operations {
                            load: wgpu::LoadOp::Clear(wgpu::Color::TRANSPARENT),
                            store: wgpu::StoreOp::Discard,
                        },
                    })],
                    depth_stencil_attachment: None,
                    timestamp_writes: None,
                    occlusion_query_set: None,
                    multiview_mask: None,
                });
                pass.set_pipeline(&pipelines.raster);
                pass.set_bind_group(0, &self.raster_bind_group, &[axis * self.axis_stride]);
                pass.set_bind_group(2, &volume_bind_group, &[]);
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

        let groups = |extent: u32| super::groups(extent.max(1), WORKGROUP_SIZE);

        // 3. Opacity correction of level 0 from a copy of itself.
        if let Some(scratch) = volume.scratch {
            let scratch = &ctx.targets[scratch];
            encoder.copy_texture_to_texture(
                wgpu::TexelCopyTextureInfo {
                    texture: &ctx.targets[volume.handle].texture,
                    mip_level: 0,
                    origin: wgpu::Origin3d::ZERO,
                    aspect: wgpu::TextureAspect::All,
                },
                wgpu::TexelCopyTextureInfo {
                    texture: &scratch.texture,
                    mip_level: 0,
                    origin: wgpu::Origin3d::ZERO,
                    aspect: wgpu::TextureAspect::All,
                },
                scratch.size(),
            );
            let bind_group = self.reduce_bind_group(ctx, &scratch.view, &volume.levels[0]);
            let mut cpass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("Voxel Opacity Correction"),
                timestamp_writes: None,
            });
            cpass.set_pipeline(&pipelines.opacity);
            cpass.set_bind_group(0, &bind_group, &[]);
            let g = groups(volume.size);
            cpass.dispatch_workgroups(g, g, g);
        }

        // 4. Mip chain.
        for (level, pair) in volume.levels.windows(2).enumerate() {
            let extent = volume.size >> (level + 1);
            let bind_group = self.reduce_bind_group(ctx, &pair[0], &pair[1]);
            let mut cpass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("Voxel Mip"),
                timestamp_writes: None,
            });
            cpass.set_pipeline(&pipelines.mip);
            cpass.set_bind_group(0, &bind_group, &[]);
            let g = groups(extent);
            cpass.dispatch_workgroups(g, g, g);
        }
    }

    #[must_use]
    pub fn volume(&self) -> Option<TextureHandle> {
        self.volume.as_ref().map(|v| v.handle)
    }

    #[must_use]
    pub fn mip_count(&self) -> u32 {
        self.volume.as_ref().map_or(0, |v| v.levels.len() as u32)
    }

    #[must_use]
    pub fn size(&self) -> u32 {
        self.volume.as_ref().map_or(0, |v| v.size)
    }
}

impl RenderPass for VoxelizationPass {
    fn name(&self) -> &'static str {
        "voxelize"
    }

    fn resources(&self, _policy: &FramePolicy) -> PassResources {
        PassResources::new()
            .reads(&[ResourceId::SkinnedVertices, ResourceId::ShadowCascades])
            .writes(&[ResourceId::VoxelVolume])
            .with_flags(PassFlags::COMPUTE)
    }

    fn rebuild_pipelines(
        &mut self,
        ctx: &RendererContext,
        programs: &ProgramSet,
    ) -> Result<(), ShaderError> {
        let device = &ctx.device;
        let build = || -> Result<VoxelPipelines, ShaderError> {
            let raster_program = programs.get("voxelize")?;
            let clear_program = programs.get("voxel_clear")?;
            let opacity_program = programs.get("voxel_opacity")?;
            let mip_program = programs.get("voxel_mip")?;

            let raster_layout = pipeline::layout(
                device,
                "Voxelize Pipeline Layout",
                &[&self.raster_layout, &self.object_layout, &self.volume_layout],
            );
            let raster = pipeline::mesh(
                device,
                &MeshPipelineDesc {
                    label: "Voxelize Pipeline",
                    layout: &raster_layout,
                    program: raster_program,
                    fragment_entry: Some("fs_main"),
                    targets: &[Some(wgpu::ColorTargetState {
                        format: wgpu::TextureFormat::R8Unorm,
                        blend: None,
                        write_mask: wgpu::ColorWrites::empty(),
                    })],
                    depth: None,
                    cull_mode: None,
                    conservative: self.conservative,
                },
            );

            let clear_layout = pipeline::layout(device, "Voxel Clear Layout", &[&self.clear_layout]);
            let reduce_layout =
                pipeline::layout(device, "Voxel Reduce Layout", &[&self.reduce_layout]);
            Ok(VoxelPipelines {
                raster,
                clear: pipeline::compute(
                    device,
                    "Voxel Clear Pipeline",
                    &clear_layout,
                    clear_program,
                    "cs_main",
                ),
                opacity: pipeline::compute(
                    device,
                    "Voxel Opacity Pipeline",
                    &reduce_layout,
                    opacity_program,
                    "cs_main",
                ),
                mip: pipeline::compute(
                    device,
                    "Voxel Mip Pipeline",
                    &reduce_layout,
                    mip_program,
                    "cs_main",
                ),
            })
        };
        let built = pipeline::checked(device, "voxelize", build);
        install_pipelines(self.name(), &mut self.pipelines, &mut self.status, built)
    }

    fn status(&self) -> &PassStatus {
        &self.status
    }

    fn draw_debug_settings(&self, settings: &mut RenderSettings, ui: &mut dyn SettingsUi) {
        if !ui.section("Voxel GI") {
            return;
        }
        let voxels = &mut settings.voxels;
        ui.checkbox("Enabled", &mut voxels.enabled);
        ui.slider_f32("World size", &mut voxels.world_size, 8.0, 256.0);
        ui.slider_f32("GI strength", &mut voxels.gi_strength, 0.0, 4.0);
        ui.checkbox("Opacity correction", &mut voxels.opacity_correction);
        ui.label(&format!(
            "{0}^3 voxels, {1} mips",
            self.size(),
            self.mip_count()
        ));
    }
}
