//! Renderer
//!
//! [`Renderer`] owns every pass and records them in a fixed order into one
//! command encoder per frame:
//!
//! ```text
//! brdf_lut (once) → skinning → gbuffer → shadows → voxelize → atmosphere
//!   → deferred → taa → bloom → tonemap → debug_lines → voxel_debug → icons
//! ```
//!
//! Optional passes are switched by a [`FramePolicy`] read from the settings
//! once at the top of the frame. Each distinct policy gets a validated
//! [`PassGraph`], built on first use and cached; its barrier plan is recorded
//! as debug markers ahead of each consumer.
//!
//! Render targets are owned by the passes and reallocated only through
//! [`Renderer::on_resize`].

pub mod context;
pub mod debug_ui;
pub mod frame;
pub mod gpu_timer;
pub mod graph;
pub mod pipeline;
pub mod readback;
pub mod settings;
pub mod targets;

use glam::{Mat4, UVec2, Vec2, Vec3, Vec4};
use rustc_hash::FxHashMap;

use crate::errors::{Result, ShaderError};
use crate::scene::{DirectionalLight, Entity, Scene, Vertex, Viewport};

pub use context::RendererContext;
pub use debug_ui::SettingsUi;
pub use gpu_timer::GpuTimer;
pub use graph::{
    PassFlags, PassGraph, PassNode, PassResources, PassStatus, RenderPass, ResizeToken, ResourceId,
};
pub use settings::{OUTPUT_FORMAT, RenderSettings};
pub use targets::TextureHandle;

use frame::FrameResources;
use graph::passes::{
    self, AtmospherePass, BloomPass, BrdfLutPass, DebugLines, DebugLinesPass, DeferredInputs,
    DeferredShadingPass, GBufferPass, IconPass, ShadowCascadePass, SkinningPass, TaaInputs,
    TaaResolvePass, TonemapPass, VoxelDebugPass, VoxelizationPass,
    bloom::bloom_supported,
};
use graph::shadow_utils::CASCADE_COUNT;
use pipeline::{ShaderDefines, ShaderLibrary};

// ============================================================================
// Frame Policy
// ============================================================================

/// On/off state of every optional pass, fixed for the duration of a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct FramePolicy {
    pub voxels: bool,
    pub taa: bool,
    pub bloom: bool,
    pub debug_lines: bool,
    pub voxel_debug: bool,
    pub icons: bool,
    /// Some [`PassFlags::ONE_SHOT`] pass has not produced its output yet.
    /// When `false`, one-shot passes drop out of the graph.
    pub one_shot_pending: bool,
}

impl FramePolicy {
    #[must_use]
    pub fn from_settings(
        settings: &RenderSettings,
        viewport_size: UVec2,
        one_shot_pending: bool,
    ) -> Self {
        let voxels = settings.voxels.enabled;
        Self {
            voxels,
            taa: settings.taa.enabled,
            bloom: settings.bloom.enabled && bloom_supported(viewport_size),
            debug_lines: settings.debug.lines,
            voxel_debug: voxels && settings.debug.voxel_visualization,
            icons: settings.debug.icons,
            one_shot_pending,
        }
    }

    /// Whether the pass called `name` runs under this policy.
    #[must_use]
    pub fn includes(&self, name: &str) -> bool {
        match name {
            "voxelize" => self.voxels,
            "taa" => self.taa,
            "bloom" => self.bloom,
            "debug_lines" => self.debug_lines,
            "voxel_debug" => self.voxel_debug,
            "icons" => self.icons,
            _ => true,
        }
    }

    /// Whether a pass with these declarations gets a graph node: it must be
    /// switched on, and a one-shot pass only while its output is pending.
    #[must_use]
    pub fn admits(&self, name: &str, resources: &PassResources) -> bool {
        self.includes(name)
            && (self.one_shot_pending || !resources.flags.contains(PassFlags::ONE_SHOT))
    }
}

// ============================================================================
// Stats
// ============================================================================

/// Snapshot returned by [`Renderer::gpu_stats`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GpuStats {
    pub live_textures: usize,
    pub live_buffers: usize,
    pub culled_meshes: usize,
    pub skinned_meshes: usize,
    pub dropped_point_lights: usize,
    pub frame_counter: u64,
    /// Last measured GPU time per pass, in frame order.
    pub pass_timings_ms: Vec<(&'static str, f32)>,
    pub disabled_passes: Vec<&'static str>,
    pub tonemap_fallback: bool,
    /// Passes recorded into the last frame, in order.
    pub recorded_passes: Vec<&'static str>,
}

// ============================================================================
// Passes
// ============================================================================

struct Passes {
    brdf_lut: BrdfLutPass,
    skinning: SkinningPass,
    gbuffer: GBufferPass,
    shadows: ShadowCascadePass,
    voxelize: VoxelizationPass,
    atmosphere: AtmospherePass,
    deferred: DeferredShadingPass,
    taa: TaaResolvePass,
    bloom: BloomPass,
    tonemap: TonemapPass,
    debug_lines: DebugLinesPass,
    voxel_debug: VoxelDebugPass,
    icons: IconPass,
}

impl Passes {
    const COUNT: usize = 13;

    fn new(
        ctx: &mut RendererContext,
        frame: &FrameResources,
        settings: &RenderSettings,
        lines: DebugLines,
    ) -> Self {
        Self {
            brdf_lut: BrdfLutPass::new(ctx),
            skinning: SkinningPass::new(ctx),
            gbuffer: GBufferPass::new(ctx, frame),
            shadows: ShadowCascadePass::new(ctx, frame, &settings.shadows),
            voxelize: VoxelizationPass::new(ctx, frame, &settings.voxels),
            atmosphere: AtmospherePass::new(ctx, &settings.atmosphere),
            deferred: DeferredShadingPass::new(ctx),
            taa: TaaResolvePass::new(ctx),
            bloom: BloomPass::new(ctx),
            tonemap: TonemapPass::new(ctx),
            debug_lines: DebugLinesPass::new(ctx, frame, lines),
            voxel_debug: VoxelDebugPass::new(ctx),
            icons: IconPass::new(ctx, frame),
        }
    }

    /// Every program any pass builds a pipeline from.
    fn programs() -> Vec<&'static str> {
        [
            passes::brdf_lut::PROGRAMS,
            passes::skinning::PROGRAMS,
            passes::gbuffer::PROGRAMS,
            passes::shadow::PROGRAMS,
            passes::voxelize::PROGRAMS,
            passes::atmosphere::PROGRAMS,
            passes::deferred::PROGRAMS,
            passes::taa::PROGRAMS,
            passes::bloom::PROGRAMS,
            passes::tonemap::PROGRAMS,
            passes::debug_lines::PROGRAMS,
            passes::voxel_debug::PROGRAMS,
            passes::icons::PROGRAMS,
        ]
        .concat()
    }

    /// All passes in frame order.
    fn all(&self) -> [&dyn RenderPass; Self::COUNT] {
        [
            &self.brdf_lut,
            &self.skinning,
            &self.gbuffer,
            &self.shadows,
            &self.voxelize,
            &self.atmosphere,
            &self.deferred,
            &self.taa,
            &self.bloom,
            &self.tonemap,
            &self.debug_lines,
            &self.voxel_debug,
            &self.icons,
        ]
    }

    fn all_mut(&mut self) -> [&mut dyn RenderPass; Self::COUNT] {
        [
            &mut self.brdf_lut,
            &mut self.skinning,
            &mut self.gbuffer,
            &mut self.shadows,
            &mut self.voxelize,
            &mut self.atmosphere,
            &mut self.deferred,
            &mut self.taa,
            &mut self.bloom,
            &mut self.tonemap,
            &mut self.debug_lines,
            &mut self.voxel_debug,
            &mut self.icons,
        ]
    }

    /// Graph nodes of the passes `policy` switches on.
    fn nodes(&self, policy: &FramePolicy) -> Vec<PassNode> {
        self.all()
            .into_iter()
            .filter_map(|pass| {
                let resources = pass.resources(policy);
                policy
                    .admits(pass.name(), &resources)
                    .then(|| PassNode::new(pass.name(), resources))
            })
            .collect()
    }

    /// A one-shot pass still has to run.
    fn one_shot_pending(&self) -> bool {
        let policy = FramePolicy::default();
        self.all().into_iter().any(|pass| {
            pass.resources(&policy).flags.contains(PassFlags::ONE_SHOT) && pass.is_pending()
        })
    }
}

// ============================================================================
// Frame Recording
// ============================================================================

/// Wraps each pass with its barrier markers, debug group and GPU timer.
struct FrameRecorder<'a> {
    encoder: wgpu::CommandEncoder,
    graph: &'a PassGraph,
    timers: &'a mut FxHashMap<&'static str, GpuTimer>,
    recorded: Vec<&'static str>,
}

impl FrameRecorder<'_> {
    /// Records `pass` unless the graph excludes it or its pipelines are
    /// unavailable; returns `None` when skipped.
    fn run<R>(
        &mut self,
        name: &'static str,
        ready: bool,
        pass: impl FnOnce(&mut wgpu::CommandEncoder) -> R,
    ) -> Option<R> {
        if !ready || !self.graph.contains(name) {
            return None;
        }
        for barrier in self.graph.barriers_before(name) {
            self.encoder.insert_debug_marker(&barrier.marker(name));
        }
        self.encoder.push_debug_group(name);
        let timer = self.timers.get_mut(name);
        let (timer, scope) = match timer {
            Some(timer) => {
                let scope = timer.begin(&mut self.encoder);
                (Some(timer), scope)
            }
            None => (None, None),
        };
        let out = pass(&mut self.encoder);
        if let Some(timer) = timer {
            timer.end(&mut self.encoder, scope);
        }
        self.encoder.pop_debug_group();
        self.recorded.push(name);
        Some(out)
    }
}

// ============================================================================
// Debug textures
// ============================================================================

const DEBUG_TEXTURES: [&str; 12] = [
    "Albedo",
    "Normal",
    "Material",
    "Velocity",
    "Entity IDs",
    "Depth",
    "Shadow Cascades",
    "Shading",
    "Bloom Threshold",
    "Bloom",
    "TAA Result",
    "Final",
];

// ============================================================================
// Renderer
// ============================================================================

pub struct Renderer {
    ctx: RendererContext,
    library: ShaderLibrary,
    frame: FrameResources,
    passes: Passes,
    lines: DebugLines,
    timers: FxHashMap<&'static str, GpuTimer>,
    graphs: FxHashMap<FramePolicy, PassGraph>,
    settings: RenderSettings,
    viewport_size: UVec2,
    frame_counter: u64,
    current_color: Option<TextureHandle>,
    shader_errors: Vec<ShaderError>,
    recorded_passes: Vec<&'static str>,
}

impl Renderer {
    /// Builds every pass, compiles all programs and allocates the render
    /// targets for `viewport`.
    ///
    /// Programs that fail to compile disable their pass (logged), they do not
    /// fail construction; [`Renderer::shader_errors`] lists them.
    pub fn new(
        ctx: RendererContext,
        settings: RenderSettings,
        viewport: &Viewport,
    ) -> Result<Self> {
        Self::with_shader_sources(ctx, settings, viewport, &[])
    }

    /// Like [`Renderer::new`], with `sources` replacing the named program
    /// templates before the first compile.
    pub fn with_shader_sources(
        mut ctx: RendererContext,
        settings: RenderSettings,
        viewport: &Viewport,
        sources: &[(&str, &str)],
    ) -> Result<Self> {
        settings.validate()?;

        let mut defines = ShaderDefines::new();
        defines.insert("NULL_ENTITY", Entity::NULL.to_bits().into());
        defines.insert("MAX_POINT_LIGHTS", (passes::MAX_POINT_LIGHTS as u32).into());
        defines.insert("CASCADE_COUNT", (CASCADE_COUNT as u32).into());
        let mut library = ShaderLibrary::new(defines);
        for (name, source) in sources {
            library.set_source(name, Some((*source).to_string()));
        }

        let frame = FrameResources::new(&ctx);
        let lines = DebugLines::new();
        let mut passes = Passes::new(&mut ctx, &frame, &settings, lines.clone());

        let timers = passes
            .all()
            .iter()
            .map(|pass| (pass.name(), GpuTimer::new(&ctx.device, &ctx.queue, pass.name())))
            .collect();

        let shader_errors = rebuild_passes(&ctx, &mut library, &mut passes);
        if !shader_errors.is_empty() {
            log::warn!("{} shader failures at startup", shader_errors.len());
        }

        let mut renderer = Self {
            ctx,
            library,
            frame,
            passes,
            lines,
            timers,
            graphs: FxHashMap::default(),
            settings,
            viewport_size: viewport.size,
            frame_counter: 0,
            current_color: None,
            shader_errors,
            recorded_passes: Vec::new(),
        };
        renderer.allocate_targets(viewport);
        log::info!(
            "renderer ready: {}x{}, {} programs",
            viewport.size.x,
            viewport.size.y,
            renderer.library.cached_module_count()
        );
        Ok(renderer)
    }

    /// Headless renderer on the default adapter.
    pub fn new_headless(settings: RenderSettings, viewport: &Viewport) -> Result<Self> {
        let ctx = RendererContext::new_headless(&settings)?;
        Self::new(ctx, settings, viewport)
    }

    fn allocate_targets(&mut self, viewport: &Viewport) {
        let token = ResizeToken::issue();
        for pass in self.passes.all_mut() {
            pass.create_render_targets(&mut self.ctx, viewport, &token);
        }
    }

    /// Destroys and recreates every pass's render targets for `viewport` and
    /// restarts the frame counter (and with it the TAA history and jitter
    /// sequence).
    pub fn on_resize(&mut self, viewport: &Viewport) {
        let size = viewport.size.max(UVec2::ONE);
        log::debug!("resize to {}x{}", size.x, size.y);
        let mut viewport = *viewport;
        viewport.size = size;

        let token = ResizeToken::issue();
        for pass in self.passes.all_mut() {
            pass.destroy_render_targets(&mut self.ctx, &token);
        }
        for pass in self.passes.all_mut() {
            pass.create_render_targets(&mut self.ctx, &viewport, &token);
        }
        self.viewport_size = size;
        self.frame_counter = 0;
        self.current_color = None;
    }

    /// Records and submits one frame.
    ///
    /// A viewport whose size differs from the last resize triggers
    /// [`on_resize`](Self::on_resize) first.
    pub fn render(&mut self, scene: &Scene, viewport: &Viewport) -> Result<()> {
        self.settings.validate()?;
        let mut clamped = *viewport;
        clamped.size = viewport.size.max(UVec2::ONE);
        let viewport = &clamped;
        if viewport.size != self.viewport_size {
            self.on_resize(viewport);
        }
        for timer in self.timers.values_mut() {
            timer.poll();
        }

        let policy = FramePolicy::from_settings(
            &self.settings,
            self.viewport_size,
            self.passes.one_shot_pending(),
        );
        if !self.graphs.contains_key(&policy) {
            let graph = PassGraph::build(&self.passes.nodes(&policy))?;
            self.graphs.insert(policy, graph);
        }

        let frame_index = self.frame_counter;
        let jitter = if policy.taa {
            viewport.jitter(frame_index)
        } else {
            Vec2::ZERO
        };

        let Self {
            ctx,
            frame,
            passes,
            timers,
            graphs,
            settings,
            ..
        } = self;

        // CPU-side preparation: uniforms, culling, lazily sized resources.
        passes
            .gbuffer
            .prepare(ctx, frame, scene, viewport, frame_index, jitter);
        passes
            .shadows
            .prepare(ctx, scene, viewport, &settings.shadows);
        if policy.voxels {
            passes.voxelize.prepare(ctx, &settings.voxels);
        }
        let sun = scene
            .sun()
            .map_or_else(DirectionalLight::synthetic, |sun| sun.light);
        let sky_dirty = passes
            .atmosphere
            .prepare(ctx, &sun, &settings.atmosphere);
        passes.deferred.prepare(
            ctx,
            scene,
            settings,
            &policy,
            passes.voxelize.mip_count(),
        );
        if !policy.debug_lines {
            passes.debug_lines.discard();
        }

        let ctx: &RendererContext = ctx;
        let (Some(gbuffer), Some(shading), Some(shadow_map)) = (
            passes.gbuffer.targets().copied(),
            passes.deferred.targets().copied(),
            passes.shadows.map(),
        ) else {
            log::warn!("render targets missing, frame skipped");
            self.lines.clear();
            self.recorded_passes.clear();
            return Ok(());
        };

        let mut rec = FrameRecorder {
            encoder: ctx
                .device
                .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                    label: Some("Strata Frame"),
                }),
            graph: &graphs[&policy],
            timers,
            recorded: Vec::with_capacity(Passes::COUNT),
        };

        rec.run("brdf_lut", passes.brdf_lut.is_ready(), |encoder| {
            passes.brdf_lut.execute(ctx, encoder);
        });
        rec.run("skinning", passes.skinning.is_ready(), |encoder| {
            passes.skinning.execute(ctx, encoder, scene);
        });
        rec.run("gbuffer", passes.gbuffer.is_ready(), |encoder| {
            passes
                .gbuffer
                .execute(ctx, encoder, scene, frame, &passes.skinning);
        });
        rec.run("shadows", passes.shadows.is_ready(), |encoder| {
            passes
                .shadows
                .execute(encoder, scene, frame, &passes.skinning);
        });
        rec.run("voxelize", passes.voxelize.is_ready(), |encoder| {
            passes.voxelize.execute(
                ctx,
                encoder,
                scene,
                frame,
                &passes.skinning,
                &passes.shadows,
            );
        });
        if sky_dirty {
            rec.run("atmosphere", passes.atmosphere.is_ready(), |encoder| {
                passes
                    .atmosphere
                    .execute(ctx, encoder, &sun, &settings.atmosphere);
            });
        }

        let voxels = if policy.voxels {
            passes.voxelize.volume()
        } else {
            None
        };
        let inputs = DeferredInputs {
            gbuffer: &gbuffer,
            shadow_map,
            voxels,
            environment: passes.atmosphere.environment(),
            irradiance: passes.atmosphere.irradiance(),
            brdf_lut: passes.brdf_lut.lut(),
        };
        rec.run("deferred", passes.deferred.is_ready(), |encoder| {
            passes.deferred.execute(
                ctx,
                encoder,
                frame,
                passes.shadows.uniform_buffer(),
                inputs,
            );
        });

        let resolved = rec
            .run("taa", passes.taa.is_ready(), |encoder| {
                passes.taa.execute(
                    ctx,
                    encoder,
                    TaaInputs {
                        current: shading.shading,
                        velocity: gbuffer.velocity,
                        depth: gbuffer.depth,
                    },
                    frame_index,
                    settings.taa.blend,
                )
            })
            .flatten();
        let color = resolved.unwrap_or(shading.shading);

        let bloom = rec
            .run("bloom", passes.bloom.is_ready(), |encoder| {
                passes
                    .bloom
                    .execute(ctx, encoder, shading.bloom_threshold, viewport.size)
            })
            .flatten();

        rec.run("tonemap", passes.tonemap.is_ready(), |encoder| {
            passes
                .tonemap
                .execute(ctx, encoder, color, bloom, &settings.tonemap)
        });

        if let Some(output) = passes.tonemap.output() {
            rec.run("debug_lines", passes.debug_lines.is_ready(), |encoder| {
                passes
                    .debug_lines
                    .execute(ctx, encoder, output, gbuffer.depth)
            });
            rec.run("voxel_debug", passes.voxel_debug.is_ready(), |encoder| {
                passes.voxel_debug.execute(
                    ctx,
                    encoder,
                    frame,
                    &passes.voxelize,
                    output,
                    settings.voxels.world_size,
                    settings.debug.voxel_mip,
                );
            });
            rec.run("icons", passes.icons.is_ready(), |encoder| {
                passes.icons.execute(ctx, encoder, scene, output, &gbuffer)
            });
        }

        let FrameRecorder {
            encoder, recorded, ..
        } = rec;
        ctx.queue.submit(std::iter::once(encoder.finish()));
        self.recorded_passes = recorded;
        for timer in self.timers.values_mut() {
            timer.after_submit();
        }
        // Lines queued while the frame was disabled for them are dropped too.
        self.lines.clear();
        self.current_color = Some(color);
        self.frame_counter += 1;
        Ok(())
    }

    /// Entity under pixel `(x, y)` of the last frame. Blocks on a one-texel
    /// readback; coordinates outside the viewport give [`Entity::NULL`].
    pub fn get_selected_entity(&self, x: u32, y: u32) -> Result<Entity> {
        if x >= self.viewport_size.x || y >= self.viewport_size.y {
            return Ok(Entity::NULL);
        }
        let Some(gbuffer) = self.passes.gbuffer.targets() else {
            return Ok(Entity::NULL);
        };
        let texture = &self.ctx.targets[gbuffer.entity].texture;
        let bits = readback::read_texel_u32(&self.ctx.device, &self.ctx.queue, texture, x, y)?;
        Ok(Entity(bits))
    }

    /// Deformed vertices of `entity` from the last frame; `None` unless the
    /// skinning pass produced them. Blocks on a full buffer download.
    pub fn skinned_vertices(&self, entity: Entity) -> Result<Option<Vec<Vertex>>> {
        let Some(buffer) = self.passes.skinning.output(entity) else {
            return Ok(None);
        };
        let bytes = readback::read_buffer(&self.ctx.device, &self.ctx.queue, buffer)?;
        Ok(Some(bytemuck::pod_collect_to_vec(&bytes)))
    }

    /// Recompiles every program from the current template sources. Passes
    /// keep their previous pipelines for programs that now fail.
    pub fn reload_shaders(&mut self) -> Vec<ShaderError> {
        self.library.reload();
        let errors = rebuild_passes(&self.ctx, &mut self.library, &mut self.passes);
        log::info!("shaders reloaded, {} failures", errors.len());
        self.shader_errors.clone_from(&errors);
        errors
    }

    /// Failures from the last compile (construction or
    /// [`Renderer::reload_shaders`]).
    #[must_use]
    pub fn shader_errors(&self) -> &[ShaderError] {
        &self.shader_errors
    }

    /// Replaces (`Some`) or restores (`None`) the template of `program`.
    /// Takes effect on the next [`Renderer::reload_shaders`].
    pub fn set_shader_source(&mut self, program: &str, source: Option<String>) {
        self.library.set_source(program, source);
    }

    // ------------------------------------------------------------------------
    // Debug surface
    // ------------------------------------------------------------------------

    pub fn add_debug_line(&self, from: Vec3, to: Vec3, color: Vec4) {
        self.lines.add_line(from, to, color);
    }

    pub fn add_debug_box(&self, min: Vec3, max: Vec3, transform: Mat4, color: Vec4) {
        self.lines.add_box(min, max, transform, color);
    }

    /// Shared handle onto the debug line queue.
    #[must_use]
    pub fn debug_lines(&self) -> DebugLines {
        self.lines.clone()
    }

    #[must_use]
    pub fn debug_texture_count(&self) -> usize {
        DEBUG_TEXTURES.len()
    }

    #[must_use]
    pub fn debug_texture_name(&self, index: usize) -> Option<&'static str> {
        DEBUG_TEXTURES.get(index).copied()
    }

    /// Target behind debug texture `index`, `None` if it is out of range or
    /// the producing pass holds no target right now.
    #[must_use]
    pub fn debug_texture(&self, index: usize) -> Option<TextureHandle> {
        let passes = &self.passes;
        let gbuffer = passes.gbuffer.targets();
        let deferred = passes.deferred.targets();
        match index {
            0 => gbuffer.map(|g| g.albedo),
            1 => gbuffer.map(|g| g.normal),
            2 => gbuffer.map(|g| g.material),
            3 => gbuffer.map(|g| g.velocity),
            4 => gbuffer.map(|g| g.entity),
            5 => gbuffer.map(|g| g.depth),
            6 => passes.shadows.map(),
            7 => deferred.map(|d| d.shading),
            8 => deferred.map(|d| d.bloom_threshold),
            9 => passes.bloom.result(),
            10 => passes.taa.latest(),
            11 => passes.tonemap.output(),
            _ => None,
        }
    }

    /// Lets every pass draw its tunables, then the frame stats.
    pub fn draw_debug_settings(&mut self, ui: &mut dyn SettingsUi) {
        for pass in self.passes.all() {
            pass.draw_debug_settings(&mut self.settings, ui);
        }
        if ui.section("GPU Timings") {
            for pass in self.passes.all() {
                let ms = self.timers.get(pass.name()).map_or(0.0, GpuTimer::elapsed_ms);
                ui.label(&format!("{}: {ms:.3} ms", pass.name()));
            }
        }
    }

    #[must_use]
    pub fn gpu_stats(&self) -> GpuStats {
        let passes = self.passes.all();
        GpuStats {
            live_textures: self.ctx.live_texture_count(),
            live_buffers: self.ctx.live_buffer_count(),
            culled_meshes: self.passes.gbuffer.culled_count(),
            skinned_meshes: self.passes.skinning.skinned_count(),
            dropped_point_lights: self.passes.deferred.dropped_lights(),
            frame_counter: self.frame_counter,
            pass_timings_ms: passes
                .iter()
                .filter_map(|pass| {
                    self.timers
                        .get(pass.name())
                        .map(|timer| (pass.name(), timer.elapsed_ms()))
                })
                .collect(),
            disabled_passes: passes
                .iter()
                .filter(|pass| !pass.is_ready())
                .map(|pass| pass.name())
                .collect(),
            tonemap_fallback: self.passes.tonemap.is_fallback(),
            recorded_passes: self.recorded_passes.clone(),
        }
    }

    // ------------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------------

    /// The display-ready `Rgba8Unorm` image of the last frame.
    #[must_use]
    pub fn final_texture(&self) -> Option<TextureHandle> {
        self.passes.tonemap.output()
    }

    /// HDR color the tonemapper consumed last frame (TAA result, or the
    /// shading result when TAA is off).
    #[must_use]
    pub fn current_color(&self) -> Option<TextureHandle> {
        self.current_color
    }

    #[must_use]
    pub fn frame_counter(&self) -> u64 {
        self.frame_counter
    }

    #[must_use]
    pub fn viewport_size(&self) -> UVec2 {
        self.viewport_size
    }

    #[must_use]
    pub fn settings(&self) -> &RenderSettings {
        &self.settings
    }

    pub fn settings_mut(&mut self) -> &mut RenderSettings {
        &mut self.settings
    }

    #[must_use]
    pub fn context(&self) -> &RendererContext {
        &self.ctx
    }

    /// Status of the pass called `name`.
    #[must_use]
    pub fn pass_status(&self, name: &str) -> Option<&PassStatus> {
        self.passes
            .all()
            .into_iter()
            .find(|pass| pass.name() == name)
            .map(|pass| pass.status())
    }

    /// Cascade matrices and splits uploaded for the last frame.
    #[must_use]
    pub fn shadow_uniforms(&self) -> &passes::ShadowUniforms {
        self.passes.shadows.uniforms()
    }

    /// Voxel volume of the last frame, when voxelization is enabled.
    #[must_use]
    pub fn voxel_volume(&self) -> Option<TextureHandle> {
        self.passes.voxelize.volume()
    }
}

/// Compiles every program and hands the set to each pass. Returns program
/// failures plus pass-level ones, without duplicates.
fn rebuild_passes(
    ctx: &RendererContext,
    library: &mut ShaderLibrary,
    passes: &mut Passes,
) -> Vec<ShaderError> {
    let programs = library.compile_all(&ctx.device, &Passes::programs());
    let mut errors: Vec<ShaderError> = programs.failures().cloned().collect();
    for pass in passes.all_mut() {
        if let Err(err) = pass.rebuild_pipelines(ctx, &programs)
            && !errors.contains(&err)
        {
            errors.push(err);
        }
    }
    errors
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(settings: &RenderSettings) -> FramePolicy {
        FramePolicy::from_settings(settings, UVec2::new(640, 360), false)
    }

    #[test]
    fn default_policy_enables_the_full_pipeline() {
        let p = policy(&RenderSettings::default());
        assert!(p.voxels && p.taa && p.bloom && p.debug_lines && p.icons);
        assert!(!p.voxel_debug);
        assert!(!p.one_shot_pending);
    }

    #[test]
    fn voxel_debug_needs_voxels() {
        let mut settings = RenderSettings::default();
        settings.debug.voxel_visualization = true;
        settings.voxels.enabled = false;
        assert!(!policy(&settings).voxel_debug);
        settings.voxels.enabled = true;
        assert!(policy(&settings).voxel_debug);
    }

    #[test]
    fn tiny_viewport_disables_bloom() {
        let p = FramePolicy::from_settings(&RenderSettings::default(), UVec2::new(8, 600), false);
        assert!(!p.bloom);
    }

    #[test]
    fn policy_filters_optional_passes_only() {
        let p = FramePolicy::default();
        for name in ["brdf_lut", "skinning", "gbuffer", "shadows", "atmosphere", "deferred", "tonemap"] {
            assert!(p.includes(name), "{name}");
        }
        for name in ["voxelize", "taa", "bloom", "debug_lines", "voxel_debug", "icons"] {
            assert!(!p.includes(name), "{name}");
        }
    }

    #[test]
    fn one_shot_passes_leave_once_done() {
        let settings = RenderSettings::default();
        let one_shot = PassResources::new().with_flags(PassFlags::COMPUTE | PassFlags::ONE_SHOT);
        let compute = PassResources::new().with_flags(PassFlags::COMPUTE);

        let pending = FramePolicy::from_settings(&settings, UVec2::new(640, 360), true);
        assert!(pending.admits("brdf_lut", &one_shot));

        let done = policy(&settings);
        assert!(!done.admits("brdf_lut", &one_shot));
        assert!(done.admits("skinning", &compute));
        assert_ne!(pending, done);
    }

    #[test]
    fn debug_texture_names_are_unique() {
        let mut names = DEBUG_TEXTURES.to_vec();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), DEBUG_TEXTURES.len());
    }
}
