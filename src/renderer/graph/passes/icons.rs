//! Light icons: one camera-facing disc per light, drawn into the final image
//! and the entity-ID buffer so lights can be picked.

use glam::Vec3;

use crate::errors::ShaderError;
use crate::renderer::FramePolicy;
use crate::renderer::context::{RendererContext, TrackedBuffer};
use crate::renderer::debug_ui::SettingsUi;
use crate::renderer::frame::FrameResources;
use crate::renderer::graph::{PassResources, PassStatus, RenderPass, ResourceId, install_pipelines};
use crate::renderer::pipeline::{self, ProgramSet, entries};
use crate::renderer::settings::{OUTPUT_FORMAT, RenderSettings};
use crate::renderer::targets::TextureHandle;
use crate::scene::Scene;

use super::gbuffer::{ENTITY_FORMAT, GBufferTargets};

pub const PROGRAMS: &[&str] = &["icons"];

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct IconInstance {
    pub position: [f32; 3],
    pub entity: u32,
    pub color: [f32; 4],
}

impl IconInstance {
    const ATTRIBUTES: [wgpu::VertexAttribute; 3] =
        wgpu::vertex_attr_array![0 => Float32x3, 1 => Uint32, 2 => Float32x4];

    fn layout() -> wgpu::VertexBufferLayout<'static> {
        wgpu::VertexBufferLayout {
            array_stride: std::mem::size_of::<Self>() as wgpu::BufferAddress,
            step_mode: wgpu::VertexStepMode::Instance,
            attributes: &Self::ATTRIBUTES,
        }
    }
}

/// Icon color for a light: hue of `color`, brightest channel at 1.
fn icon_color(color: Vec3) -> [f32; 4] {
    let peak = color.max_element();
    let rgb = if peak > 0.0 { color / peak } else { Vec3::ONE };
    rgb.extend(1.0).to_array()
}

/// Icons for every directional and point light in `scene`.
#[must_use]
pub fn collect_icons(scene: &Scene) -> Vec<IconInstance> {
    let directional = scene.directional_lights().iter().map(|l| IconInstance {
        position: l.transform.w_axis.truncate().to_array(),
        entity: l.entity.to_bits(),
        color: icon_color(l.light.color),
    });
    let point = scene.point_lights().iter().map(|l| IconInstance {
        position: l.position().to_array(),
        entity: l.entity.to_bits(),
        color: icon_color(l.light.color),
    });
    directional.chain(point).collect()
}

pub struct IconPass {
    frame_layout: wgpu::BindGroupLayout,
    frame_bind_group: wgpu::BindGroup,
    instances: Option<TrackedBuffer>,
    capacity: usize,
    pipeline: Option<wgpu::RenderPipeline>,
    status: PassStatus,
}

impl IconPass {
    #[must_use]
    pub fn new(ctx: &RendererContext, frame: &FrameResources) -> Self {
        let frame_layout = ctx
            .device
            .create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some("Icon Frame Layout"),
                entries: &[entries::uniform(0, wgpu::ShaderStages::VERTEX)],
            });
        let frame_bind_group = ctx.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Icon Frame BindGroup"),
            layout: &frame_layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: frame.buffer.as_entire_binding(),
            }],
        });
        Self {
            frame_layout,
            frame_bind_group,
            instances: None,
            capacity: 0,
            pipeline: None,
            status: PassStatus::Ready,
        }
    }

    /// Draws one icon per light. Returns the number of icons drawn.
    pub fn execute(
        &mut self,
        ctx: &RendererContext,
        encoder: &mut wgpu::CommandEncoder,
        scene: &Scene,
        target: TextureHandle,
        gbuffer: &GBufferTargets,
    ) -> usize {
        let icons = collect_icons(scene);
        if icons.is_empty() || self.pipeline.is_none() {
            return 0;
        }
        if icons.len() > self.capacity {
            let capacity = icons.len().next_power_of_two().max(16);
            self.instances = Some(ctx.create_buffer(&wgpu::BufferDescriptor {
                label: Some("Icon Instances"),
                size: (capacity * std::mem::size_of::<IconInstance>()) as u64,
                usage: wgpu::BufferUsages::VERTEX | wgpu::BufferUsages::COPY_DST,
                mapped_at_creation: false,
            }));
            self.capacity = capacity;
        }
        let (Some(pipeline), Some(buffer)) = (&self.pipeline, &self.instances) else {
            return 0;
        };
        ctx.queue.write_buffer(buffer, 0, bytemuck::cast_slice(&icons));

        let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("Light Icons"),
            color_attachments: &[
                super::color_attachment(&ctx.targets[target].view, None),
                super::color_attachment(&ctx.targets[gbuffer.entity].view, None),
            ],
            depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                view: &ctx.targets[gbuffer.depth].view,
                depth_ops: Some(wgpu::Operations {
                    load: wgpu::LoadOp::Load,
                    store: wgpu::StoreOp::Store,
                }),
                stencil_ops: None,
            }),
            timestamp_writes: None,
            occlusion_query_set: None,
            multiview_mask: None,
        });
        pass.set_pipeline(pipeline);
        pass.set_bind_group(0, &self.frame_bind_group, &[]);
        pass.set_vertex_buffer(0, buffer.slice(..));
        pass.draw(0..6, 0..icons.len() as u32);
        icons.len()
    }
}

impl RenderPass for IconPass {
    fn name(&self) -> &'static str {
        "icons"
    }

    fn resources(&self, _policy: &FramePolicy) -> PassResources {
        PassResources::new()
            .reads(&[ResourceId::Depth])
            .modifies(&[ResourceId::FinalImage, ResourceId::EntityIds])
    }

    fn rebuild_pipelines(
        &mut self,
        ctx: &RendererContext,
        programs: &ProgramSet,
    ) -> Result<(), ShaderError> {
        let device = &ctx.device;
        let built = programs.get("icons").and_then(|program| {
            pipeline::checked(device, "icons", || {
                let layout = pipeline::layout(device, "Icon Pipeline Layout", &[&self.frame_layout]);
                Ok(device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                    label: Some("Icon Pipeline"),
                    layout: Some(&layout),
                    vertex: wgpu::VertexState {
                        module: &program.module,
                        entry_point: Some("vs_main"),
                        buffers: &[IconInstance::layout()],
                        compilation_options: wgpu::PipelineCompilationOptions::default(),
                    },
                    fragment: Some(wgpu::FragmentState {
                        module: &program.module,
                        entry_point: Some("fs_main"),
                        targets: &[
                            Some(wgpu::ColorTargetState {
                                format: OUTPUT_FORMAT,
                                blend: None,
                                write_mask: wgpu::ColorWrites::ALL,
                            }),
                            Some(wgpu::ColorTargetState {
                                format: ENTITY_FORMAT,
                                blend: None,
                                write_mask: wgpu::ColorWrites::ALL,
                            }),
                        ],
                        compilation_options: wgpu::PipelineCompilationOptions::default(),
                    }),
                    primitive: wgpu::PrimitiveState::default(),
                    depth_stencil: Some(pipeline::depth_test_only()),
                    multisample: wgpu::MultisampleState::default(),
                    multiview_mask: None,
                    cache: None,
                }))
            })
        });
        install_pipelines(self.name(), &mut self.pipeline, &mut self.status, built)
    }

    fn status(&self) -> &PassStatus {
        &self.status
    }

    fn draw_debug_settings(&self, settings: &mut RenderSettings, ui: &mut dyn SettingsUi) {
        if ui.section("Light Icons") {
            ui.checkbox("Enabled", &mut settings.debug.icons);
        }
    }
}

#[cfg(test)]
mod tests {
    use glam::Mat4;

    use super::*;
    use crate::scene::{DirectionalLight, PointLight};

    #[test]
    fn every_light_gets_an_icon() {
        let mut scene = Scene::new();
        let sun = scene.spawn_directional_light(DirectionalLight::synthetic(), Mat4::IDENTITY);
        let lamp = scene.spawn_point_light(
            PointLight::new(Vec3::new(4.0, 2.0, 0.0), 3.0, 5.0),
            Mat4::from_translation(Vec3::new(1.0, 2.0, 3.0)),
        );

        let icons = collect_icons(&scene);
        assert_eq!(icons.len(), 2);
        assert_eq!(icons[0].entity, sun.to_bits());
        assert_eq!(icons[1].entity, lamp.to_bits());
        assert_eq!(icons[1].position, [1.0, 2.0, 3.0]);
        assert_eq!(icons[1].color, [1.0, 0.5, 0.0, 1.0]);
    }

    #[test]
    fn black_light_icon_is_white() {
        assert_eq!(icon_color(Vec3::ZERO), [1.0, 1.0, 1.0, 1.0]);
    }

    #[test]
    fn instance_layout_is_tightly_packed() {
        assert_eq!(std::mem::size_of::<IconInstance>(), 32);
    }
}
