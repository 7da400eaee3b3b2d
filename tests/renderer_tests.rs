//! Renderer Integration Tests
//!
//! Headless end-to-end frames on the default adapter. Each test returns early
//! when no adapter is available.
//!
//! Tests for:
//! - Pipeline construction and shader reload
//! - Broken programs: disabled passes, tonemap fallback, recovery on reload
//! - Final image of an empty scene and of a lit cube
//! - Entity picking and the entity buffer of scenes with nothing visible
//! - Resize (target leaks, frame counter reset, zero-size clamp)
//! - TAA ping-pong and first-frame output, GPU skinning
//! - Point-light limit, one-shot BRDF table, debug lines and the debug surface

mod common;

use std::sync::Arc;

use glam::{Mat4, UVec2, Vec3, Vec4};

use strata::renderer::debug_ui::WidgetLog;
use strata::renderer::graph::passes::{MAX_POINT_LIGHTS, tonemap_reference};
use strata::scene::primitives::create_box;
use strata::scene::{GpuMesh, GpuSkin, SkinVertex};
use strata::{DirectionalLight, Entity, PassStatus, PointLight, Scene, Skeleton, Viewport};

const EPSILON: f32 = 3.0 / 255.0;

fn approx_rgb(a: [f32; 4], b: Vec3) -> bool {
    (a[0] - b.x).abs() < EPSILON && (a[1] - b.y).abs() < EPSILON && (a[2] - b.z).abs() < EPSILON
}

// ============================================================================
// Construction
// ============================================================================

#[test]
fn every_pass_builds() {
    let Some((renderer, _)) = common::headless(common::test_settings()) else {
        return;
    };
    let stats = renderer.gpu_stats();
    assert!(stats.disabled_passes.is_empty(), "disabled: {:?}", stats.disabled_passes);
    assert!(!stats.tonemap_fallback);
    assert_eq!(renderer.pass_status("deferred"), Some(&PassStatus::Ready));
    assert_eq!(renderer.pass_status("no_such_pass"), None);
    assert_eq!(renderer.frame_counter(), 0);
}

#[test]
fn reload_keeps_every_pass_ready() {
    let Some((mut renderer, viewport)) = common::headless(common::test_settings()) else {
        return;
    };
    let errors = renderer.reload_shaders();
    assert!(errors.is_empty(), "{errors:?}");
    renderer.render(&Scene::new(), &viewport).unwrap();
    assert!(renderer.gpu_stats().disabled_passes.is_empty());
}

// ============================================================================
// Shader Failures
// ============================================================================

/// Fails naga parsing.
const UNPARSABLE: &str = "@fragment fn fs_main( -> {";

/// Valid WGSL whose binding 0 is a texture where the tonemap layout has a
/// uniform buffer; only pipeline creation on the device rejects it.
const LAYOUT_MISMATCH: &str = r#"{$ include "fullscreen" $}

@group(0) @binding(0) var color_input: texture_2d<f32>;
@group(0) @binding(3) var input_sampler: sampler;

@fragment
fn fs_main(in: FullscreenOutput) -> @location(0) vec4<f32> {
    return textureSample(color_input, input_sampler, in.uv);
}
"#;

fn clear_color_settings() -> strata::RenderSettings {
    let mut settings = common::test_settings();
    settings.clear_color = Vec4::new(0.2, 0.3, 0.4, 1.0);
    settings
}

#[test]
fn broken_program_disables_its_pass_until_reload() {
    let sources = [("deferred", UNPARSABLE)];
    let Some((mut renderer, viewport)) =
        common::headless_with_sources(clear_color_settings(), &sources)
    else {
        return;
    };
    assert!(matches!(renderer.pass_status("deferred"), Some(PassStatus::Disabled(_))));
    assert!(renderer.gpu_stats().disabled_passes.contains(&"deferred"));
    assert!(renderer.shader_errors().iter().any(|e| e.program() == "deferred"));

    let scene = Scene::new();
    renderer.render(&scene, &viewport).unwrap();
    assert_eq!(renderer.frame_counter(), 1);
    assert!(renderer.final_texture().is_some());
    let stats = renderer.gpu_stats();
    assert!(!stats.recorded_passes.contains(&"deferred"));
    assert!(stats.recorded_passes.contains(&"tonemap"));

    renderer.set_shader_source("deferred", None);
    let errors = renderer.reload_shaders();
    assert!(errors.is_empty(), "{errors:?}");
    assert!(renderer.shader_errors().is_empty());
    assert_eq!(renderer.pass_status("deferred"), Some(&PassStatus::Ready));

    for _ in 0..3 {
        renderer.render(&scene, &viewport).unwrap();
    }
    let tonemap = renderer.settings().tonemap;
    let expected = tonemap_reference(Vec3::new(0.2, 0.3, 0.4), tonemap.exposure, tonemap.gamma);
    let pixels = common::final_image(&renderer);
    for (i, pixel) in pixels.iter().enumerate().step_by(97) {
        assert!(approx_rgb(*pixel, expected), "pixel {i}: {pixel:?} != {expected:?}");
    }
}

#[test]
fn device_rejected_tonemap_falls_back_to_blit() {
    let sources = [("tonemap", LAYOUT_MISMATCH)];
    let Some((mut renderer, viewport)) =
        common::headless_with_sources(clear_color_settings(), &sources)
    else {
        return;
    };
    let stats = renderer.gpu_stats();
    assert!(stats.tonemap_fallback);
    assert!(
        renderer
            .shader_errors()
            .iter()
            .any(|e| matches!(e, strata::ShaderError::Device { name, .. } if name == "tonemap")),
        "{:?}",
        renderer.shader_errors()
    );

    let scene = Scene::new();
    for _ in 0..3 {
        renderer.render(&scene, &viewport).unwrap();
    }
    let pixels = common::final_image(&renderer);
    let expected = Vec3::new(0.2, 0.3, 0.4);
    for (i, pixel) in pixels.iter().enumerate().step_by(97) {
        assert!(approx_rgb(*pixel, expected), "pixel {i}: {pixel:?} != {expected:?}");
    }

    renderer.set_shader_source("tonemap", None);
    assert!(renderer.reload_shaders().is_empty());
    assert!(!renderer.gpu_stats().tonemap_fallback);
    assert_eq!(renderer.pass_status("tonemap"), Some(&PassStatus::Ready));
}

#[test]
fn invalid_settings_fail_the_frame() {
    let Some((mut renderer, viewport)) = common::headless(common::test_settings()) else {
        return;
    };
    renderer.settings_mut().voxels.size = 24;
    assert!(renderer.render(&Scene::new(), &viewport).is_err());
    assert_eq!(renderer.frame_counter(), 0);
}

// ============================================================================
// Final Image
// ============================================================================

#[test]
fn empty_scene_shows_tonemapped_clear_color() {
    let mut settings = common::test_settings();
    settings.clear_color = Vec4::new(0.2, 0.3, 0.4, 1.0);
    let Some((mut renderer, viewport)) = common::headless(settings) else {
        return;
    };

    let scene = Scene::new();
    for _ in 0..3 {
        renderer.render(&scene, &viewport).unwrap();
    }

    let tonemap = renderer.settings().tonemap;
    let expected = tonemap_reference(Vec3::new(0.2, 0.3, 0.4), tonemap.exposure, tonemap.gamma);
    let pixels = common::final_image(&renderer);
    assert_eq!(pixels.len(), (common::WIDTH * common::HEIGHT) as usize);
    for (i, pixel) in pixels.iter().enumerate().step_by(97) {
        assert!(approx_rgb(*pixel, expected), "pixel {i}: {pixel:?} != {expected:?}");
    }
}

#[test]
fn lit_cube_differs_from_background() {
    let Some((mut renderer, viewport)) = common::headless(common::test_settings()) else {
        return;
    };
    let mut scene = Scene::new();
    common::spawn_cube(&renderer, &mut scene, Mat4::IDENTITY);
    scene.spawn_directional_light(
        DirectionalLight::new(Vec3::new(-0.3, -1.0, -0.5), Vec3::ONE, 3.0),
        Mat4::IDENTITY,
    );
    renderer.render(&scene, &viewport).unwrap();

    let pixels = common::final_image(&renderer);
    let center = pixels[((common::HEIGHT / 2) * common::WIDTH + common::WIDTH / 2) as usize];
    let corner = pixels[0];
    let diff: f32 = (0..3).map(|c| (center[c] - corner[c]).abs()).sum();
    assert!(diff > 0.05, "cube not visible: center {center:?}, corner {corner:?}");
    assert!(center.iter().all(|c| c.is_finite()));
}

// ============================================================================
// Picking
// ============================================================================

#[test]
fn picking_returns_cube_and_null() -> anyhow::Result<()> {
    let Some((mut renderer, viewport)) = common::headless(common::test_settings()) else {
        return Ok(());
    };
    let mut scene = Scene::new();
    let cube = common::spawn_cube(&renderer, &mut scene, Mat4::IDENTITY);
    renderer.render(&scene, &viewport)?;

    let picked = renderer.get_selected_entity(common::WIDTH / 2, common::HEIGHT / 2)?;
    assert_eq!(picked, cube);
    assert!(renderer.get_selected_entity(0, 0)?.is_null());
    Ok(())
}

#[test]
fn nothing_visible_leaves_entity_buffer_null() -> anyhow::Result<()> {
    let Some((mut renderer, viewport)) = common::headless(common::test_settings()) else {
        return Ok(());
    };
    let mut behind = Scene::new();
    common::spawn_cube(&renderer, &mut behind, Mat4::from_translation(Vec3::new(0.0, 0.0, 50.0)));

    for scene in [Scene::new(), behind] {
        renderer.render(&scene, &viewport)?;
        let entities = renderer.debug_texture(4).expect("no entity target");
        let ids = common::read_u32(&renderer, entities);
        assert_eq!(ids.len(), (common::WIDTH * common::HEIGHT) as usize);
        assert!(ids.iter().all(|&id| id == Entity::NULL.to_bits()), "non-null entity id");
    }
    Ok(())
}

#[test]
fn out_of_bounds_pick_is_null() -> anyhow::Result<()> {
    let Some((mut renderer, viewport)) = common::headless(common::test_settings()) else {
        return Ok(());
    };
    renderer.render(&Scene::new(), &viewport)?;
    assert_eq!(renderer.get_selected_entity(common::WIDTH, 0)?, Entity::NULL);
    assert_eq!(renderer.get_selected_entity(0, u32::MAX)?, Entity::NULL);
    Ok(())
}

// ============================================================================
// Resize
// ============================================================================

#[test]
fn resize_does_not_leak_targets() -> anyhow::Result<()> {
    let Some((mut renderer, viewport)) = common::headless(common::test_settings()) else {
        return Ok(());
    };
    let scene = Scene::new();
    renderer.render(&scene, &viewport)?;
    let stats = renderer.gpu_stats();

    for (w, h) in [(128, 72), (33, 17), (common::WIDTH, common::HEIGHT)] {
        let resized = Viewport::new(w, h, common::camera());
        renderer.on_resize(&resized);
        renderer.render(&scene, &resized)?;
    }
    let after = renderer.gpu_stats();
    assert_eq!(after.live_textures, stats.live_textures);
    assert_eq!(after.live_buffers, stats.live_buffers);
    Ok(())
}

#[test]
fn resize_resets_frame_counter() {
    let Some((mut renderer, viewport)) = common::headless(common::test_settings()) else {
        return;
    };
    let scene = Scene::new();
    renderer.render(&scene, &viewport).unwrap();
    renderer.render(&scene, &viewport).unwrap();
    assert_eq!(renderer.frame_counter(), 2);

    renderer.on_resize(&Viewport::new(64, 64, common::camera()));
    assert_eq!(renderer.frame_counter(), 0);
    assert_eq!(renderer.viewport_size(), UVec2::new(64, 64));
}

#[test]
fn render_at_new_size_resizes_implicitly() {
    let Some((mut renderer, _)) = common::headless(common::test_settings()) else {
        return;
    };
    let larger = Viewport::new(120, 80, common::camera());
    renderer.render(&Scene::new(), &larger).unwrap();
    assert_eq!(renderer.viewport_size(), UVec2::new(120, 80));
    assert_eq!(renderer.frame_counter(), 1);

    let size = renderer.context().targets[renderer.final_texture().unwrap()].size();
    assert_eq!((size.width, size.height), (120, 80));
}

#[test]
fn zero_size_resize_clamps_to_one() {
    let Some((mut renderer, _)) = common::headless(common::test_settings()) else {
        return;
    };
    let mut zero = common::viewport();
    zero.size = UVec2::ZERO;
    renderer.on_resize(&zero);
    assert_eq!(renderer.viewport_size(), UVec2::ONE);
    renderer.render(&Scene::new(), &Viewport::new(1, 1, common::camera())).unwrap();
}

// ============================================================================
// Temporal
// ============================================================================

#[test]
fn taa_alternates_targets() {
    let Some((mut renderer, viewport)) = common::headless(common::test_settings()) else {
        return;
    };
    let scene = Scene::new();
    let mut seen = Vec::new();
    for _ in 0..4 {
        renderer.render(&scene, &viewport).unwrap();
        seen.push(renderer.current_color().unwrap());
    }
    assert_ne!(seen[0], seen[1]);
    assert_eq!(seen[0], seen[2]);
    assert_eq!(seen[1], seen[3]);
}

#[test]
fn first_taa_frame_is_finite() {
    let Some((mut renderer, viewport)) = common::headless(common::test_settings()) else {
        return;
    };
    let mut scene = Scene::new();
    common::spawn_cube(&renderer, &mut scene, Mat4::IDENTITY);
    scene.spawn_directional_light(
        DirectionalLight::new(Vec3::new(-0.3, -1.0, -0.5), Vec3::ONE, 3.0),
        Mat4::IDENTITY,
    );
    renderer.render(&scene, &viewport).unwrap();

    let resolved = renderer.current_color().unwrap();
    assert_eq!(Some(resolved), renderer.debug_texture(10));
    let pixels = common::read_rgba(&renderer, resolved);
    assert!(
        pixels.iter().flatten().all(|c| c.is_finite()),
        "TAA history produced non-finite values on frame 0"
    );
}

#[test]
fn without_taa_tonemap_reads_shading() {
    let mut settings = common::test_settings();
    settings.taa.enabled = false;
    let Some((mut renderer, viewport)) = common::headless(settings) else {
        return;
    };
    renderer.render(&Scene::new(), &viewport).unwrap();
    let shading = renderer.debug_texture(7);
    assert!(shading.is_some());
    assert_eq!(renderer.current_color(), shading);
}

// ============================================================================
// Skinning
// ============================================================================

#[test]
fn skinning_follows_bone_transforms() -> anyhow::Result<()> {
    let Some((mut renderer, viewport)) = common::headless(common::test_settings()) else {
        return Ok(());
    };
    let data = create_box(1.0, 1.0, 1.0);
    let mesh = GpuMesh::upload(renderer.context(), &data, "Skinned Cube");
    let influences = vec![
        SkinVertex {
            joints: [0, 1, 0, 0],
            weights: [1.0, 0.0, 0.0, 0.0],
        };
        data.vertices.len()
    ];
    let skin = GpuSkin::upload(renderer.context(), &influences, "Skinned Cube");
    let mut scene = Scene::new();
    let entity = scene.spawn_mesh(mesh, None, Mat4::IDENTITY);
    assert!(scene.attach_skeleton(entity, Skeleton::new(Arc::clone(&skin), 2)));

    renderer.render(&scene, &viewport)?;
    assert_eq!(renderer.gpu_stats().skinned_meshes, 1);
    let bind_pose = renderer.skinned_vertices(entity)?.expect("no skinned output");
    assert_eq!(bind_pose.len(), data.vertices.len());
    for (skinned, source) in bind_pose.iter().zip(&data.vertices) {
        let (a, b) = (Vec3::from(skinned.position), Vec3::from(source.position));
        assert!(a.abs_diff_eq(b, 1e-5), "{a} != {b}");
    }

    let offset = Vec3::new(0.0, 2.0, 0.0);
    if let Some(skeleton) = scene.mesh_mut(entity).and_then(|m| m.skeleton.as_mut()) {
        skeleton.bone_transforms[0] = Mat4::from_translation(offset);
    }
    renderer.render(&scene, &viewport)?;
    let moved = renderer.skinned_vertices(entity)?.expect("no skinned output");
    for (skinned, source) in moved.iter().zip(&data.vertices) {
        let (a, b) = (Vec3::from(skinned.position), Vec3::from(source.position) + offset);
        assert!(a.abs_diff_eq(b, 1e-5), "{a} != {b}");
    }
    Ok(())
}

// ============================================================================
// Lights
// ============================================================================

#[test]
fn excess_point_lights_are_dropped() {
    let Some((mut renderer, viewport)) = common::headless(common::test_settings()) else {
        return;
    };
    let mut scene = Scene::new();
    for i in 0..MAX_POINT_LIGHTS + 3 {
        scene.spawn_point_light(
            PointLight::new(Vec3::ONE, 2.0, 4.0),
            Mat4::from_translation(Vec3::new(i as f32 - 6.0, 1.0, 0.0)),
        );
    }
    renderer.render(&scene, &viewport).unwrap();
    assert_eq!(renderer.gpu_stats().dropped_point_lights, 3);
}

#[test]
fn same_scene_renders_identically() {
    let mut settings = common::test_settings();
    settings.taa.enabled = false;
    let Some((mut renderer, viewport)) = common::headless(settings) else {
        return;
    };
    let mut scene = Scene::new();
    common::spawn_cube(&renderer, &mut scene, Mat4::IDENTITY);
    for i in 0..4 {
        scene.spawn_point_light(
            PointLight::new(Vec3::new(1.0, 0.5, 0.2), 4.0, 6.0),
            Mat4::from_translation(Vec3::new(i as f32, 1.5, 1.0)),
        );
    }

    renderer.render(&scene, &viewport).unwrap();
    let first = common::final_image(&renderer);
    renderer.render(&scene, &viewport).unwrap();
    let second = common::final_image(&renderer);
    assert_eq!(first, second);
}

// ============================================================================
// Debug Surface
// ============================================================================

#[test]
fn brdf_table_is_recorded_once_per_rebuild() {
    let Some((mut renderer, viewport)) = common::headless(common::test_settings()) else {
        return;
    };
    let scene = Scene::new();
    renderer.render(&scene, &viewport).unwrap();
    assert!(renderer.gpu_stats().recorded_passes.contains(&"brdf_lut"));
    renderer.render(&scene, &viewport).unwrap();
    let recorded = renderer.gpu_stats().recorded_passes;
    assert!(!recorded.contains(&"brdf_lut"), "{recorded:?}");
    assert!(recorded.contains(&"deferred"));

    assert!(renderer.reload_shaders().is_empty());
    renderer.render(&scene, &viewport).unwrap();
    assert!(renderer.gpu_stats().recorded_passes.contains(&"brdf_lut"));
}

#[test]
fn debug_lines_are_drained_every_frame() {
    for enabled in [true, false] {
        let mut settings = common::test_settings();
        settings.debug.lines = enabled;
        let Some((mut renderer, viewport)) = common::headless(settings) else {
            return;
        };
        renderer.add_debug_line(Vec3::ZERO, Vec3::Y, Vec4::ONE);
        renderer.add_debug_box(Vec3::splat(-1.0), Vec3::ONE, Mat4::IDENTITY, Vec4::ONE);
        assert_eq!(renderer.debug_lines().len(), 26);

        renderer.render(&Scene::new(), &viewport).unwrap();
        assert!(renderer.debug_lines().is_empty(), "enabled = {enabled}");
    }
}

#[test]
fn debug_textures_are_listed() {
    let Some((mut renderer, viewport)) = common::headless(common::test_settings()) else {
        return;
    };
    renderer.render(&Scene::new(), &viewport).unwrap();

    assert_eq!(renderer.debug_texture_count(), 12);
    assert_eq!(renderer.debug_texture_name(0), Some("Albedo"));
    assert_eq!(renderer.debug_texture_name(12), None);
    assert_eq!(renderer.debug_texture(12), None);
    assert_eq!(renderer.debug_texture(11), renderer.final_texture());
    for i in 0..renderer.debug_texture_count() {
        assert!(renderer.debug_texture(i).is_some(), "{:?}", renderer.debug_texture_name(i));
    }
}

#[test]
fn debug_settings_cover_every_pass() {
    let Some((mut renderer, _)) = common::headless(common::test_settings()) else {
        return;
    };
    let mut ui = WidgetLog::default();
    renderer.draw_debug_settings(&mut ui);
    for section in ["[Tonemap]", "[Debug Lines]", "[Light Icons]", "[GPU Timings]"] {
        assert!(ui.widgets.iter().any(|w| w == section), "missing {section}");
    }
}

#[test]
fn stats_track_frames_and_resources() {
    let Some((mut renderer, viewport)) = common::headless(common::test_settings()) else {
        return;
    };
    let mut scene = Scene::new();
    common::spawn_cube(&renderer, &mut scene, Mat4::from_translation(Vec3::new(0.0, 0.0, 50.0)));
    renderer.render(&scene, &viewport).unwrap();

    let stats = renderer.gpu_stats();
    assert_eq!(stats.frame_counter, 1);
    assert_eq!(stats.culled_meshes, 1);
    assert!(stats.live_textures > 0);
    assert!(stats.live_buffers > 0);
    assert!(stats.pass_timings_ms.iter().all(|(_, ms)| *ms >= 0.0));
    assert!(stats.pass_timings_ms.iter().any(|(name, _)| *name == "tonemap"));
}
