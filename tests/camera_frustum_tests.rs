//! Camera, Frustum and Viewport Tests
//!
//! Tests for:
//! - Perspective projection with a [0, 1] depth range
//! - View transform placement
//! - Frustum plane extraction (Gribb-Hartmann)
//! - Frustum-sphere and frustum-AABB intersection
//! - Viewport clamping and sub-pixel jitter

use glam::{Mat4, UVec2, Vec3, Vec4};

use strata::scene::viewport::{JITTER_PHASES, halton};
use strata::scene::{Aabb, Camera, Frustum, Viewport};

const EPSILON: f32 = 1e-4;

fn approx(a: f32, b: f32) -> bool {
    (a - b).abs() < EPSILON
}

fn ndc_z(projection: Mat4, view_z: f32) -> f32 {
    let clip = projection * Vec4::new(0.0, 0.0, view_z, 1.0);
    clip.z / clip.w
}

// ============================================================================
// Projection Matrix Tests
// ============================================================================

#[test]
fn perspective_near_maps_to_0() {
    let cam = Camera::perspective(60.0, 1.0, 0.1, 100.0);
    let z = ndc_z(cam.projection(), -0.1);
    assert!(approx(z, 0.0), "Near plane should map to NDC z=0, got {z}");
}

#[test]
fn perspective_far_maps_to_1() {
    let cam = Camera::perspective(60.0, 1.0, 0.1, 100.0);
    let z = ndc_z(cam.projection(), -100.0);
    assert!(approx(z, 1.0), "Far plane should map to NDC z=1, got {z}");
}

#[test]
fn perspective_aspect_ratio_affects_fov() {
    let wide = Camera::perspective(60.0, 2.0, 0.1, 100.0);
    let square = Camera::perspective(60.0, 1.0, 0.1, 100.0);
    assert_ne!(
        wide.projection().x_axis.x,
        square.projection().x_axis.x,
        "Different aspect ratios should produce different X scaling"
    );
}

#[test]
fn set_aspect_ignores_degenerate_values() {
    let mut cam = Camera::perspective(60.0, 1.5, 0.1, 100.0);
    cam.set_aspect(0.0);
    cam.set_aspect(f32::NAN);
    assert!(approx(cam.aspect, 1.5));
}

// ============================================================================
// View Tests
// ============================================================================

#[test]
fn look_at_places_target_in_front() {
    let cam = Camera::default().looking_at(Vec3::new(0.0, 5.0, 10.0), Vec3::ZERO, Vec3::Y);
    let target_view = cam.view().transform_point3(Vec3::ZERO);
    assert!(target_view.z < 0.0, "Target should be in front (-Z), got {target_view:?}");
    assert!(cam.position().abs_diff_eq(Vec3::new(0.0, 5.0, 10.0), EPSILON));
}

#[test]
fn world_transform_inverts_to_view() {
    let mut cam = Camera::default();
    let world = Mat4::from_translation(Vec3::new(1.0, 2.0, 3.0));
    cam.set_world_transform(world);
    assert!((cam.view() * world).abs_diff_eq(Mat4::IDENTITY, EPSILON));
    assert!(cam.position().abs_diff_eq(Vec3::new(1.0, 2.0, 3.0), EPSILON));
}

// ============================================================================
// Frustum Tests
// ============================================================================

fn test_frustum() -> Frustum {
    Camera::perspective(90.0, 1.0, 0.1, 100.0)
        .looking_at(Vec3::ZERO, Vec3::NEG_Z, Vec3::Y)
        .frustum()
}

#[test]
fn frustum_planes_are_normalized() {
    for plane in test_frustum().planes() {
        assert!(approx(plane.truncate().length(), 1.0), "plane {plane:?}");
    }
}

#[test]
fn frustum_sphere_inside() {
    assert!(test_frustum().intersects_sphere(Vec3::new(0.0, 0.0, -10.0), 1.0));
}

#[test]
fn frustum_sphere_behind_camera() {
    assert!(!test_frustum().intersects_sphere(Vec3::new(0.0, 0.0, 10.0), 1.0));
}

#[test]
fn frustum_sphere_beyond_far() {
    assert!(!test_frustum().intersects_sphere(Vec3::new(0.0, 0.0, -200.0), 1.0));
}

#[test]
fn frustum_sphere_straddling_side_plane() {
    // 90° fov: the left plane passes through (-10, 0, -10).
    assert!(test_frustum().intersects_sphere(Vec3::new(-10.5, 0.0, -10.0), 1.0));
}

#[test]
fn frustum_aabb_inside() {
    let aabb = Aabb::new(Vec3::new(-1.0, -1.0, -6.0), Vec3::new(1.0, 1.0, -4.0));
    assert!(test_frustum().contains_aabb(&aabb));
}

#[test]
fn frustum_aabb_outside() {
    let aabb = Aabb::new(Vec3::new(50.0, -1.0, -6.0), Vec3::new(52.0, 1.0, -4.0));
    assert!(!test_frustum().contains_aabb(&aabb));
}

#[test]
fn frustum_aabb_enclosing_camera() {
    let aabb = Aabb::new(Vec3::splat(-500.0), Vec3::splat(500.0));
    assert!(test_frustum().contains_aabb(&aabb));
}

// ============================================================================
// Viewport Tests
// ============================================================================

#[test]
fn viewport_clamps_zero_size() {
    let viewport = Viewport::new(0, 0, Camera::default());
    assert_eq!(viewport.size, UVec2::ONE);

    let mut viewport = Viewport::default();
    viewport.resize(0, 480);
    assert_eq!(viewport.size, UVec2::new(1, 480));
}

#[test]
fn viewport_updates_camera_aspect() {
    let viewport = Viewport::new(800, 400, Camera::default());
    assert!(approx(viewport.camera.aspect, 2.0));
}

#[test]
fn viewport_contains_is_exclusive() {
    let viewport = Viewport::new(64, 32, Camera::default());
    assert!(viewport.contains(0, 0));
    assert!(viewport.contains(63, 31));
    assert!(!viewport.contains(64, 0));
    assert!(!viewport.contains(0, 32));
}

#[test]
fn halton_base_2_sequence() {
    let expected = [0.5, 0.25, 0.75, 0.125];
    for (i, value) in expected.iter().enumerate() {
        assert!(approx(halton(i as u32 + 1, 2), *value));
    }
}

#[test]
fn jitter_is_subpixel_and_periodic() {
    let viewport = Viewport::new(200, 100, Camera::default());
    for frame in 0..u64::from(JITTER_PHASES) {
        let j = viewport.jitter(frame);
        assert!(j.x.abs() <= 1.0 / 200.0 + EPSILON && j.y.abs() <= 1.0 / 100.0 + EPSILON);
        assert_eq!(j, viewport.jitter(frame + u64::from(JITTER_PHASES)));
    }
    assert_ne!(viewport.jitter(0), viewport.jitter(1));
}

#[test]
fn zero_jitter_keeps_projection() {
    let viewport = Viewport::default();
    assert_eq!(
        viewport.jittered_projection(glam::Vec2::ZERO),
        viewport.camera.projection()
    );
}
