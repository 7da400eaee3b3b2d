//! Shadow Algorithm Tests
//!
//! Tests for:
//! - CSM cascade split computation (Practical Split Scheme)
//! - Frustum corners extraction in world space
//! - Cascade matrix stability (radius quantization, texel snapping)
//! - Cascade selection by view depth
//! - Rendered cascade contents (GPU)

mod common;

use glam::{Mat4, Vec3, Vec4};

use strata::renderer::graph::shadow_utils::*;
use strata::renderer::readback;
use strata::scene::Camera;
use strata::{DirectionalLight, Renderer, Scene, Viewport};

const EPSILON: f32 = 1e-4;

fn approx(a: f32, b: f32) -> bool {
    (a - b).abs() < EPSILON
}

fn camera_at(eye: Vec3, target: Vec3) -> Camera {
    Camera::perspective(60.0, 16.0 / 9.0, 0.1, 200.0).looking_at(eye, target, Vec3::Y)
}

fn input_for(camera: &Camera, light_dir: Vec3) -> CascadeInput {
    CascadeInput {
        camera_view_proj: camera.view_projection(),
        near: camera.near,
        far: camera.far,
        light_dir: light_dir.normalize(),
        lambda: 0.89,
        resolution: 2048,
    }
}

// ============================================================================
// compute_cascade_splits Tests
// ============================================================================

#[test]
fn cascade_splits_last_equals_far() {
    let splits = compute_cascade_splits(0.1, 100.0, 0.5);
    assert!(
        approx(splits[CASCADE_COUNT - 1], 100.0),
        "Last split should equal far plane, got {}",
        splits[CASCADE_COUNT - 1]
    );
}

#[test]
fn cascade_splits_monotonically_increasing() {
    let splits = compute_cascade_splits(0.1, 100.0, 0.5);
    for i in 1..CASCADE_COUNT {
        assert!(
            splits[i] > splits[i - 1],
            "Splits should be monotonically increasing: splits[{}]={} <= splits[{}]={}",
            i,
            splits[i],
            i - 1,
            splits[i - 1]
        );
    }
}

#[test]
fn cascade_splits_lambda_0_uniform() {
    let splits = compute_cascade_splits(1.0, 100.0, 0.0);
    // lambda=0 → pure uniform distribution: 1 + (100-1) * (i/4)
    let expected = [25.75, 50.5, 75.25, 100.0];
    for i in 0..CASCADE_COUNT {
        assert!(
            approx(splits[i], expected[i]),
            "splits[{i}]: expected {}, got {}",
            expected[i],
            splits[i]
        );
    }
}

#[test]
fn cascade_splits_lambda_1_logarithmic() {
    let splits = compute_cascade_splits(1.0, 100.0, 1.0);
    // near * (far/near)^(i/n): ≈3.162, 10, ≈31.62, 100
    assert!((splits[0] - 3.162).abs() < 0.01, "got {}", splits[0]);
    assert!((splits[1] - 10.0).abs() < 1e-3, "got {}", splits[1]);
    assert!((splits[2] - 31.62).abs() < 0.1, "got {}", splits[2]);
    assert!(approx(splits[3], 100.0), "got {}", splits[3]);
}

// ============================================================================
// frustum_corners_world Tests
// ============================================================================

#[test]
fn frustum_corners_near_far_distances() {
    let camera = Camera::perspective(60.0, 1.0, 1.0, 10.0)
        .looking_at(Vec3::ZERO, Vec3::NEG_Z, Vec3::Y);
    let corners = frustum_corners_world(camera.view_projection());

    for (i, corner) in corners.iter().enumerate().take(4) {
        assert!(
            (corner.z + 1.0).abs() < 1e-3,
            "Near corner {i} z: expected -1, got {}",
            corner.z
        );
    }
    for (i, corner) in corners.iter().enumerate().skip(4) {
        assert!(
            (corner.z + 10.0).abs() < 1e-2,
            "Far corner {i} z: expected -10, got {}",
            corner.z
        );
    }
}

#[test]
fn frustum_corners_symmetry() {
    let camera = Camera::perspective(60.0, 1.0, 1.0, 10.0)
        .looking_at(Vec3::ZERO, Vec3::NEG_Z, Vec3::Y);
    let corners = frustum_corners_world(camera.view_projection());

    assert!((corners[0].x + corners[1].x).abs() < 1e-3, "Near face should be X-symmetric");
    assert!((corners[1].y + corners[2].y).abs() < 1e-3, "Near face should be Y-symmetric");
    assert!((corners[4].x + corners[5].x).abs() < 1e-2, "Far face should be X-symmetric");
}

// ============================================================================
// compute_cascades Tests
// ============================================================================

#[test]
fn cascades_are_invertible_and_finite() {
    let camera = camera_at(Vec3::new(0.0, 2.0, 10.0), Vec3::ZERO);
    let cascades = compute_cascades(&input_for(&camera, Vec3::new(0.3, -1.0, 0.2)));

    for (i, cascade) in cascades.iter().enumerate() {
        let vp = cascade.view_proj;
        assert!(vp.is_finite(), "Cascade {i} contains NaN/Inf");
        assert!(vp.determinant().abs() > 1e-10, "Cascade {i} should be invertible");
    }
}

#[test]
fn cascades_are_deterministic() {
    let camera = camera_at(Vec3::new(4.0, 3.0, 8.0), Vec3::new(0.0, 1.0, 0.0));
    let input = input_for(&camera, Vec3::new(-0.2, -0.9, 0.4));
    let a = compute_cascades(&input);
    let b = compute_cascades(&input);
    for (x, y) in a.iter().zip(&b) {
        assert_eq!(x.view_proj.to_cols_array(), y.view_proj.to_cols_array());
        assert_eq!(x.radius.to_bits(), y.radius.to_bits());
    }
}

#[test]
fn cascade_split_depths_are_negative_and_ordered() {
    let camera = camera_at(Vec3::new(0.0, 2.0, 10.0), Vec3::ZERO);
    let cascades = compute_cascades(&input_for(&camera, Vec3::NEG_Y));

    assert!(cascades[0].split_depth < 0.0);
    for i in 1..CASCADE_COUNT {
        assert!(cascades[i].split_depth < cascades[i - 1].split_depth);
    }
    assert!((cascades[CASCADE_COUNT - 1].split_depth + camera.far).abs() < 1e-2);
}

#[test]
fn cascade_radius_is_quantized() {
    let camera = camera_at(Vec3::new(1.3, 2.7, 9.1), Vec3::ZERO);
    let cascades = compute_cascades(&input_for(&camera, Vec3::new(0.5, -1.0, 0.0)));
    for cascade in &cascades {
        let steps = cascade.radius * RADIUS_QUANTUM;
        assert!(
            (steps - steps.round()).abs() < 1e-3,
            "Radius {} is not a multiple of 1/{RADIUS_QUANTUM}",
            cascade.radius
        );
    }
}

#[test]
fn cascade_origin_snaps_to_texels() {
    let input = input_for(
        &camera_at(Vec3::new(0.37, 2.0, 10.11), Vec3::ZERO),
        Vec3::new(0.3, -1.0, 0.2),
    );
    let half_res = input.resolution as f32 / 2.0;
    for (i, cascade) in compute_cascades(&input).iter().enumerate() {
        let origin = cascade.view_proj * Vec4::W * half_res;
        assert!(
            (origin.x - origin.x.round()).abs() < 1e-2 && (origin.y - origin.y.round()).abs() < 1e-2,
            "Cascade {i} origin not on a texel: {origin:?}"
        );
    }
}

#[test]
fn camera_center_lies_inside_first_cascade() {
    let camera = camera_at(Vec3::new(0.0, 2.0, 10.0), Vec3::ZERO);
    let cascades = compute_cascades(&input_for(&camera, Vec3::new(0.1, -1.0, 0.1)));

    let point = camera.position() + (Vec3::ZERO - camera.position()).normalize() * 1.0;
    let clip = cascades[0].view_proj * point.extend(1.0);
    assert!(clip.x.abs() <= 1.0 && clip.y.abs() <= 1.0, "got {clip:?}");
    assert!((0.0..=1.0).contains(&clip.z), "depth {}", clip.z);
}

#[test]
fn vertical_light_still_builds_cascades() {
    let camera = camera_at(Vec3::new(0.0, 5.0, 5.0), Vec3::ZERO);
    let cascades = compute_cascades(&input_for(&camera, Vec3::NEG_Y));
    assert!(cascades.iter().all(|c| c.view_proj.is_finite()));
    assert_eq!(light_up_vector(Vec3::NEG_Y), Vec3::X);
}

// ============================================================================
// select_cascade Tests
// ============================================================================

#[test]
fn select_cascade_by_depth() {
    let camera = camera_at(Vec3::ZERO, Vec3::NEG_Z);
    let cascades = compute_cascades(&input_for(&camera, Vec3::NEG_Y));

    assert_eq!(select_cascade(&cascades, -0.5), 0);
    let mid = (cascades[1].split_depth + cascades[2].split_depth) / 2.0;
    assert_eq!(select_cascade(&cascades, mid), 2);
    assert_eq!(select_cascade(&cascades, -1.0e6), CASCADE_COUNT - 1);
}

#[test]
fn identity_cascade_default() {
    let cascade = Cascade::default();
    assert_eq!(cascade.view_proj, Mat4::IDENTITY);
    assert!(approx(cascade.radius, 0.0));
}

// ============================================================================
// Rendered Cascades
// ============================================================================

/// Depth texels of cascade `layer`, row-major.
fn cascade_depths(renderer: &Renderer, layer: u32) -> (u32, Vec<f32>) {
    let ctx = renderer.context();
    let map = &ctx.targets[renderer.debug_texture(6).expect("no shadow map")].texture;
    let size = map.size();
    let bytes = readback::download(
        &ctx.device,
        &ctx.queue,
        map,
        0,
        wgpu::Origin3d { x: 0, y: 0, z: layer },
        wgpu::Extent3d {
            width: size.width,
            height: size.height,
            depth_or_array_layers: 1,
        },
    )
    .expect("shadow readback failed");
    let depths = bytes
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect();
    (size.width, depths)
}

#[test]
fn first_cascade_holds_cube_depth() {
    let Some((mut renderer, _)) = common::headless(common::test_settings()) else {
        return;
    };
    let camera = Camera::perspective(
        60.0,
        common::WIDTH as f32 / common::HEIGHT as f32,
        0.1,
        100.0,
    )
    .looking_at(Vec3::new(0.0, 0.0, 5.0), Vec3::ZERO, Vec3::Y);
    let viewport = Viewport::new(common::WIDTH, common::HEIGHT, camera);

    let mut scene = Scene::new();
    common::spawn_cube(&renderer, &mut scene, Mat4::IDENTITY);
    scene.spawn_directional_light(DirectionalLight::new(Vec3::NEG_Y, Vec3::ONE, 3.0), Mat4::IDENTITY);
    renderer.render(&scene, &viewport).unwrap();

    let (size, depths) = cascade_depths(&renderer, 0);
    assert_eq!(depths.len(), (size * size) as usize);
    assert!(depths.iter().all(|d| (0.0..=1.0).contains(d)));
    // Corners see no caster.
    assert_eq!(depths[0], 1.0);

    // A point on the top face, projected into cascade 0.
    let view_proj = renderer.shadow_uniforms().cascades[0];
    let clip = view_proj * Vec4::new(0.0, 0.5, 0.2, 1.0);
    assert!(clip.x.abs() < 1.0 && clip.y.abs() < 1.0, "outside cascade 0: {clip:?}");
    let texel = |ndc: f32| (((ndc * 0.5 + 0.5) * size as f32) as u32).min(size - 1);
    let (x, y) = (texel(clip.x), texel(-clip.y));
    let depth = depths[(y * size + x) as usize];
    assert!(depth < 1.0, "no caster at texel ({x}, {y})");
    assert!((depth - clip.z).abs() < 0.02, "depth {depth}, expected {}", clip.z);
}

#[test]
fn empty_scene_clears_every_cascade() {
    let Some((mut renderer, viewport)) = common::headless(common::test_settings()) else {
        return;
    };
    renderer.render(&Scene::new(), &viewport).unwrap();
    for layer in 0..CASCADE_COUNT as u32 {
        let (_, depths) = cascade_depths(&renderer, layer);
        assert!(depths.iter().all(|&d| d == 1.0), "layer {layer}");
    }
}
