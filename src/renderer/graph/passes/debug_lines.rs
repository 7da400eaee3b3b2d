//! Debug Lines
//!
//! World-space line segments queued by the host during a frame and drawn
//! over the final image, depth-tested against the G-buffer depth. The queue
//! is drained every frame whether or not the overlay is enabled.

use std::sync::Arc;

use glam::{Mat4, Vec3, Vec4};
use parking_lot::Mutex;

use crate::errors::ShaderError;
use crate::renderer::FramePolicy;
use crate::renderer::context::{RendererContext, TrackedBuffer};
use crate::renderer::debug_ui::SettingsUi;
use crate::renderer::frame::FrameResources;
use crate::renderer::graph::{PassResources, PassStatus, RenderPass, ResourceId, install_pipelines};
use crate::renderer::pipeline::{self, ProgramSet, entries};
use crate::renderer::settings::{OUTPUT_FORMAT, RenderSettings};
use crate::renderer::targets::TextureHandle;

pub const PROGRAMS: &[&str] = &["debug_lines"];

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct LineVertex {
    pub position: [f32; 3],
    pub color: [f32; 4],
}

impl LineVertex {
    const ATTRIBUTES: [wgpu::VertexAttribute; 2] =
        wgpu::vertex_attr_array![0 => Float32x3, 1 => Float32x4];

    #[must_use]
    pub fn new(position: Vec3, color: Vec4) -> Self {
        Self {
            position: position.to_array(),
            color: color.to_array(),
        }
    }

    fn layout() -> wgpu::VertexBufferLayout<'static> {
        wgpu::VertexBufferLayout {
            array_stride: std::mem::size_of::<Self>() as wgpu::BufferAddress,
            step_mode: wgpu::VertexStepMode::Vertex,
            attributes: &Self::ATTRIBUTES,
        }
    }
}

/// Shared queue of line vertices, two per segment.
///
/// Cloning is cheap; all clones feed the same queue, so systems outside the
/// renderer can hold one and add lines from any thread.
#[derive(Debug, Clone, Default)]
pub struct DebugLines(Arc<Mutex<Vec<LineVertex>>>);

impl DebugLines {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_line(&self, from: Vec3, to: Vec3, color: Vec4) {
        let mut lines = self.0.lock();
        lines.push(LineVertex::new(from, color));
        lines.push(LineVertex::new(to, color));
    }

    /// Queues the 12 edges of the box `[min, max]` after `transform`.
    pub fn add_box(&self, min: Vec3, max: Vec3, transform: Mat4, color: Vec4) {
        let corner = |i: usize| {
            let local = Vec3::new(
                if i & 1 == 0 { min.x } else { max.x },
                if i & 2 == 0 { min.y } else { max.y },
                if i & 4 == 0 { min.z } else { max.z },
            );
            transform.transform_point3(local)
        };
        let corners: [Vec3; 8] = std::array::from_fn(corner);

        let mut lines = self.0.lock();
        lines.reserve(24);
        for (a, b) in BOX_EDGES {
            lines.push(LineVertex::new(corners[a], color));
            lines.push(LineVertex::new(corners[b], color));
        }
    }

    /// Number of queued vertices.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.lock().is_empty()
    }

    /// Drains the queue.
    #[must_use]
    pub fn take(&self) -> Vec<LineVertex> {
        std::mem::take(&mut *self.0.lock())
    }

    pub fn clear(&self) {
        self.0.lock().clear();
    }
}

// Corner indices use bit 0 for x, bit 1 for y, bit 2 for z.
const BOX_EDGES: [(usize, usize); 12] = [
    (0, 1),
    (2, 3),
    (4, 5),
    (6, 7),
    (0, 2),
    (1, 3),
    (4, 6),
    (5, 7),
    (0, 4),
    (1, 5),
    (2, 6),
    (3, 7),
];

pub struct DebugLinesPass {
    lines: DebugLines,
    frame_layout: wgpu::BindGroupLayout,
    frame_bind_group: wgpu::BindGroup,
    vertex_buffer: Option<TrackedBuffer>,
    capacity: usize,
    pipeline: Option<wgpu::RenderPipeline>,
    status: PassStatus,
}

impl DebugLinesPass {
    const INITIAL_CAPACITY: usize = 1024;

    #[must_use]
    pub fn new(ctx: &RendererContext, frame: &FrameResources, lines: DebugLines) -> Self {
        let frame_layout = ctx
            .device
            .create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some("Debug Lines Frame Layout"),
                entries: &[entries::uniform(0, wgpu::ShaderStages::VERTEX)],
            });
        let frame_bind_group = ctx.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Debug Lines Frame BindGroup"),
            layout: &frame_layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: frame.buffer.as_entire_binding(),
            }],
        });
        Self {
            lines,
            frame_layout,
            frame_bind_group,
            vertex_buffer: None,
            capacity: 0,
            pipeline: None,
            status: PassStatus::Ready,
        }
    }

    /// A handle onto the queue this pass drains.
    #[must_use]
    pub fn lines(&self) -> &DebugLines {
        &self.lines
    }

    /// Drops queued lines without drawing them.
    pub fn discard(&self) {
        self.lines.clear();
    }

    fn upload(&mut self, ctx: &RendererContext, vertices: &[LineVertex]) {
        if vertices.len() > self.capacity || self.vertex_buffer.is_none() {
            let capacity = vertices
                .len()
                .max(Self::INITIAL_CAPACITY)
                .next_power_of_two();
            self.vertex_buffer = Some(ctx.create_buffer(&wgpu::BufferDescriptor {
                label: Some("Debug Line Vertices"),
                size: (capacity * std::mem::size_of::<LineVertex>()) as u64,
                usage: wgpu::BufferUsages::VERTEX | wgpu::BufferUsages::COPY_DST,
                mapped_at_creation: false,
            }));
            self.capacity = capacity;
        }
        if let Some(buffer) = &self.vertex_buffer {
            ctx.queue
                .write_buffer(buffer, 0, bytemuck::cast_slice(vertices));
        }
    }

    /// Draws and drains the queued lines. Returns the number of segments.
    pub fn execute(
        &mut self,
        ctx: &RendererContext,
        encoder: &mut wgpu::CommandEncoder,
        target: TextureHandle,
        depth: TextureHandle,
    ) -> usize {
        let vertices = self.lines.take();
        // A trailing unpaired vertex is dropped.
        let count = vertices.len() & !1;
        if count == 0 || self.pipeline.is_none() {
            return 0;
        }
        self.upload(ctx, &vertices[..count]);
        let (Some(pipeline), Some(buffer)) = (&self.pipeline, &self.vertex_buffer) else {
            return 0;
        };

        let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("Debug Lines"),
            color_attachments: &[super::color_attachment(&ctx.targets[target].view, None)],
            depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                view: &ctx.targets[depth].view,
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
        pass.set_vertex_buffer(0, buffer.slice(..(count * std::mem::size_of::<LineVertex>()) as u64));
        pass.draw(0..count as u32, 0..1);
        count / 2
    }
}

impl RenderPass for DebugLinesPass {
    fn name(&self) -> &'static str {
        "debug_lines"
    }

    fn resources(&self, _policy: &FramePolicy) -> PassResources {
        PassResources::new()
            .reads(&[ResourceId::Depth])
            .modifies(&[ResourceId::FinalImage])
    }

    fn rebuild_pipelines(
        &mut self,
        ctx: &RendererContext,
        programs: &ProgramSet,
    ) -> Result<(), ShaderError> {
        let device = &ctx.device;
        let built = programs.get("debug_lines").and_then(|program| {
            pipeline::checked(device, "debug_lines", || {
                let layout = pipeline::layout(device, "Debug Lines Pipeline Layout", &[&self.frame_layout]);
                Ok(device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                    label: Some("Debug Lines Pipeline"),
                    layout: Some(&layout),
                    vertex: wgpu::VertexState {
                        module: &program.module,
                        entry_point: Some("vs_main"),
                        buffers: &[LineVertex::layout()],
                        compilation_options: wgpu::PipelineCompilationOptions::default(),
                    },
                    fragment: Some(wgpu::FragmentState {
                        module: &program.module,
                        entry_point: Some("fs_main"),
                        targets: &[Some(wgpu::ColorTargetState {
                            format: OUTPUT_FORMAT,
                            blend: Some(wgpu::BlendState::ALPHA_BLENDING),
                            write_mask: wgpu::ColorWrites::ALL,
                        })],
                        compilation_options: wgpu::PipelineCompilationOptions::default(),
                    }),
                    primitive: wgpu::PrimitiveState {
                        topology: wgpu::PrimitiveTopology::LineList,
                        ..Default::default()
                    },
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
        if ui.section("Debug Lines") {
            ui.checkbox("Enabled", &mut settings.debug.lines);
            ui.label(&format!("Queued segments: {}", self.lines.len() / 2));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPSILON: f32 = 1e-5;

    #[test]
    fn lines_queue_two_vertices_each() {
        let lines = DebugLines::new();
        lines.add_line(Vec3::ZERO, Vec3::X, Vec4::ONE);
        lines.add_line(Vec3::Y, Vec3::Z, Vec4::ONE);
        assert_eq!(lines.len(), 4);
        assert_eq!(lines.take().len(), 4);
        assert!(lines.is_empty());
    }

    #[test]
    fn clones_share_the_queue() {
        let lines = DebugLines::new();
        let other = lines.clone();
        other.add_line(Vec3::ZERO, Vec3::ONE, Vec4::ONE);
        assert_eq!(lines.len(), 2);
    }

    #[test]
    fn box_has_twelve_unit_edges() {
        let lines = DebugLines::new();
        lines.add_box(Vec3::ZERO, Vec3::ONE, Mat4::IDENTITY, Vec4::ONE);
        let vertices = lines.take();
        assert_eq!(vertices.len(), 24);
        for pair in vertices.chunks_exact(2) {
            let a = Vec3::from_array(pair[0].position);
            let b = Vec3::from_array(pair[1].position);
            assert!((a.distance(b) - 1.0).abs() < EPSILON);
        }
    }

    #[test]
    fn box_follows_transform() {
        let lines = DebugLines::new();
        let offset = Vec3::new(10.0, 0.0, -4.0);
        lines.add_box(
            Vec3::splat(-1.0),
            Vec3::ONE,
            Mat4::from_translation(offset),
            Vec4::ONE,
        );
        let center = lines
            .take()
            .iter()
            .map(|v| Vec3::from_array(v.position))
            .sum::<Vec3>()
            / 24.0;
        assert!(center.abs_diff_eq(offset, EPSILON));
    }
}
