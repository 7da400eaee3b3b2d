//! BRDF LUT
//!
//! Integrates the split-sum specular BRDF once into a 256x256 `Rgba16Float`
//! table indexed by (N·V, roughness). The table persists for the life of the
//! renderer and is regenerated only when its program is reloaded.

use crate::errors::ShaderError;
use crate::renderer::FramePolicy;
use crate::renderer::context::RendererContext;
use crate::renderer::graph::{
    PassFlags, PassResources, PassStatus, RenderPass, ResourceId, install_pipelines,
};
use crate::renderer::pipeline::{self, ProgramSet, entries};
use crate::renderer::settings::HDR_FORMAT;
use crate::renderer::targets::TextureHandle;

pub const PROGRAMS: &[&str] = &["brdf_lut"];

pub const BRDF_LUT_SIZE: u32 = 256;

pub struct BrdfLutPass {
    layout: wgpu::BindGroupLayout,
    lut: TextureHandle,
    pipeline: Option<wgpu::ComputePipeline>,
    status: PassStatus,
    generated: bool,
}

impl BrdfLutPass {
    #[must_use]
    pub fn new(ctx: &mut RendererContext) -> Self {
        let layout = ctx
            .device
            .create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some("BRDF LUT Layout"),
                entries: &[entries::storage_texture(
                    0,
                    wgpu::ShaderStages::COMPUTE,
                    HDR_FORMAT,
                    wgpu::TextureViewDimension::D2,
                )],
            });
        let lut = ctx.targets.create_2d(
            &ctx.device,
            "BRDF LUT",
            BRDF_LUT_SIZE,
            BRDF_LUT_SIZE,
            HDR_FORMAT,
            wgpu::TextureUsages::STORAGE_BINDING
                | wgpu::TextureUsages::TEXTURE_BINDING
                | wgpu::TextureUsages::COPY_SRC,
        );
        Self {
            layout,
            lut,
            pipeline: None,
            status: PassStatus::Ready,
            generated: false,
        }
    }

    pub fn execute(&mut self, ctx: &RendererContext, encoder: &mut wgpu::CommandEncoder) {
        if self.generated {
            return;
        }
        let Some(pipeline) = &self.pipeline else {
            return;
        };

        let bind_group = ctx.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("BRDF LUT BindGroup"),
            layout: &self.layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: wgpu::BindingResource::TextureView(&ctx.targets[self.lut].view),
            }],
        });
        let mut cpass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
            label: Some("BRDF LUT"),
            timestamp_writes: None,
        });
        cpass.set_pipeline(pipeline);
        cpass.set_bind_group(0, &bind_group, &[]);
        let g = super::groups(BRDF_LUT_SIZE, 8);
        cpass.dispatch_workgroups(g, g, 1);

        self.generated = true;
        log::debug!("BRDF LUT generated");
    }

    #[must_use]
    pub fn lut(&self) -> TextureHandle {
        self.lut
    }
}

impl RenderPass for BrdfLutPass {
    fn name(&self) -> &'static str {
        "brdf_lut"
    }

    fn resources(&self, _policy: &FramePolicy) -> PassResources {
        PassResources::new()
            .writes(&[ResourceId::BrdfLut])
            .with_flags(PassFlags::COMPUTE | PassFlags::ONE_SHOT)
    }

    fn rebuild_pipelines(
        &mut self,
        ctx: &RendererContext,
        programs: &ProgramSet,
    ) -> Result<(), ShaderError> {
        let built = programs.get("brdf_lut").and_then(|program| {
            pipeline::checked(&ctx.device, "brdf_lut", || {
                let layout =
                    pipeline::layout(&ctx.device, "BRDF LUT Pipeline Layout", &[&self.layout]);
                Ok(pipeline::compute(&ctx.device, "BRDF LUT Pipeline", &layout, program, "cs_main"))
            })
        });
        let rebuilt = built.is_ok();
        let result = install_pipelines(self.name(), &mut self.pipeline, &mut self.status, built);
        if rebuilt {
            self.generated = false;
        }
        result
    }

    /// `true` until the table has been written once.
    fn is_pending(&self) -> bool {
        !self.generated
    }

    fn status(&self) -> &PassStatus {
        &self.status
    }
}
