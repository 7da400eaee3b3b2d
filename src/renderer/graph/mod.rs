//! Pass Graph
//!
//! Every stage of the frame implements [`RenderPass`] and declares which
//! frame resources it reads and writes ([`PassResources`]). The orchestrator
//! hands the declarations of the active passes to
//! [`PassGraph::build`](dependency::PassGraph::build), which rejects orderings
//! that would read a resource before it exists and emits the barrier plan the
//! orchestrator records between passes.

pub mod dependency;
pub mod passes;
pub mod shadow_utils;

use bitflags::bitflags;
use smallvec::SmallVec;

use crate::errors::ShaderError;
use crate::renderer::FramePolicy;
use crate::renderer::context::RendererContext;
use crate::renderer::debug_ui::SettingsUi;
use crate::renderer::pipeline::ProgramSet;
use crate::renderer::settings::RenderSettings;
use crate::scene::Viewport;

pub use dependency::{Barrier, PassGraph, PassNode};

/// A frame resource that passes exchange through the orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ResourceId {
    SkinnedVertices,
    /// Albedo, normal and material targets.
    GBuffer,
    Velocity,
    EntityIds,
    Depth,
    ShadowCascades,
    VoxelVolume,
    EnvironmentMap,
    IrradianceMap,
    BrdfLut,
    ShadingResult,
    BloomThreshold,
    TaaHistory,
    TaaResult,
    BloomResult,
    FinalImage,
}

impl ResourceId {
    /// Resources whose content outlives the frame (generated once, or
    /// carried over from the previous frame). Reading them needs no writer
    /// in the current frame.
    #[must_use]
    pub fn is_persistent(self) -> bool {
        matches!(
            self,
            Self::BrdfLut | Self::TaaHistory | Self::EnvironmentMap | Self::IrradianceMap
        )
    }

    /// Resources a [`RendererContext`] default stands in for when their
    /// producer is switched off.
    #[must_use]
    pub fn has_default(self) -> bool {
        matches!(
            self,
            Self::SkinnedVertices | Self::VoxelVolume | Self::BloomResult
        )
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct PassFlags: u8 {
        /// Work is recorded in compute passes.
        const COMPUTE = 1 << 0;
        /// Dropped from the graph once the pass reports it is no longer
        /// pending; runs again after a successful pipeline rebuild.
        const ONE_SHOT = 1 << 1;
    }
}

/// Resource declarations of one pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PassResources {
    pub reads: SmallVec<[ResourceId; 8]>,
    /// Resources this pass produces. Each resource has exactly one producer.
    pub writes: SmallVec<[ResourceId; 4]>,
    /// Read-modify-write of a resource an earlier pass produced.
    pub modifies: SmallVec<[ResourceId; 2]>,
    pub flags: PassFlags,
}

impl PassResources {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn reads(mut self, resources: &[ResourceId]) -> Self {
        self.reads.extend_from_slice(resources);
        self
    }

    #[must_use]
    pub fn writes(mut self, resources: &[ResourceId]) -> Self {
        self.writes.extend_from_slice(resources);
        self
    }

    #[must_use]
    pub fn modifies(mut self, resources: &[ResourceId]) -> Self {
        self.modifies.extend_from_slice(resources);
        self
    }

    #[must_use]
    pub fn with_flags(mut self, flags: PassFlags) -> Self {
        self.flags |= flags;
        self
    }
}

/// Whether a pass can record work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PassStatus {
    Ready,
    /// A program failed to compile and no earlier pipeline exists.
    Disabled(ShaderError),
}

mod resize {
    /// Permission to (re)create pass render targets.
    ///
    /// Only the orchestrator issues tokens, always for a matched
    /// destroy/create pair, and never while a frame is being recorded.
    #[derive(Debug)]
    pub struct ResizeToken(());

    impl ResizeToken {
        pub(in crate::renderer) fn issue() -> Self {
            Self(())
        }
    }
}

pub use resize::ResizeToken;

/// Lifecycle seam shared by every pass.
///
/// Recording is an inherent `execute` method on each pass since every stage
/// consumes different inputs; the trait covers what the orchestrator does
/// uniformly.
pub trait RenderPass {
    fn name(&self) -> &'static str;

    /// Reads and writes under the given frame policy.
    fn resources(&self, policy: &FramePolicy) -> PassResources;

    /// Allocates viewport-sized targets. Paired with
    /// [`destroy_render_targets`](Self::destroy_render_targets).
    fn create_render_targets(
        &mut self,
        _ctx: &mut RendererContext,
        _viewport: &Viewport,
        _token: &ResizeToken,
    ) {
    }

    fn destroy_render_targets(&mut self, _ctx: &mut RendererContext, _token: &ResizeToken) {}

    /// Recreates pipelines from freshly compiled programs. On error the pass
    /// keeps any pipelines it already had.
    fn rebuild_pipelines(
        &mut self,
        ctx: &RendererContext,
        programs: &ProgramSet,
    ) -> Result<(), ShaderError>;

    fn status(&self) -> &PassStatus;

    fn is_ready(&self) -> bool {
        matches!(self.status(), PassStatus::Ready)
    }

    /// For [`PassFlags::ONE_SHOT`] passes: the output has not been produced
    /// yet. Other passes ignore it.
    fn is_pending(&self) -> bool {
        true
    }

    fn draw_debug_settings(&self, _settings: &mut RenderSettings, _ui: &mut dyn SettingsUi) {}
}

/// Shared bookkeeping for [`RenderPass::rebuild_pipelines`]: installs new
/// pipelines on success, otherwise keeps the old ones or disables the pass.
pub(crate) fn install_pipelines<T>(
    pass: &'static str,
    slot: &mut Option<T>,
    status: &mut PassStatus,
    built: Result<T, ShaderError>,
) -> Result<(), ShaderError> {
    match built {
        Ok(pipelines) => {
            if matches!(status, PassStatus::Disabled(_)) {
                log::info!("pass '{pass}' re-enabled");
            }
            *slot = Some(pipelines);
            *status = PassStatus::Ready;
            Ok(())
        }
        Err(err) => {
            if slot.is_some() {
                log::error!("pass '{pass}' keeps its previous pipelines: {err}");
            } else {
                log::error!("pass '{pass}' disabled: {err}");
                *status = PassStatus::Disabled(err.clone());
            }
            Err(err)
        }
    }
}
