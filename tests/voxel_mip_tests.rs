//! Voxel Volume Tests
//!
//! Tests for:
//! - Octant reduction on the CPU
//! - Mip chain consistency of the GPU volume against that reduction
//! - Voxelization filling the volume around geometry

mod common;

use glam::{Mat4, Vec4};

use strata::Scene;
use strata::renderer::graph::passes::reduce_voxel_octant;
use strata::renderer::readback;

/// One Rgba8Unorm step, plus rounding slack.
const UNORM_EPSILON: f32 = 2.0 / 255.0;

// ============================================================================
// CPU Reduction Tests
// ============================================================================

#[test]
fn empty_octant_stays_empty() {
    assert_eq!(reduce_voxel_octant(&[Vec4::ZERO; 8]), Vec4::ZERO);
}

#[test]
fn half_filled_octant_halves_coverage() {
    let mut children = [Vec4::ZERO; 8];
    for child in children.iter_mut().take(4) {
        *child = Vec4::new(1.0, 0.5, 0.0, 1.0);
    }
    let reduced = reduce_voxel_octant(&children);
    assert!(reduced.abs_diff_eq(Vec4::new(0.5, 0.25, 0.0, 0.5), 1e-6));
}

#[test]
fn reduction_is_order_independent() {
    let children: [Vec4; 8] =
        std::array::from_fn(|i| Vec4::new(i as f32 / 8.0, 0.1, 1.0 - i as f32 / 8.0, 1.0));
    let mut reversed = children;
    reversed.reverse();
    assert!(reduce_voxel_octant(&children).abs_diff_eq(reduce_voxel_octant(&reversed), 1e-6));
}

// ============================================================================
// GPU Volume Tests
// ============================================================================

fn volume_levels(size: u32) -> Option<(u32, Vec<[f32; 4]>, Vec<[f32; 4]>)> {
    let mut settings = common::test_settings();
    settings.voxels.size = size;
    settings.voxels.world_size = 4.0;
    let (mut renderer, viewport) = common::headless(settings)?;

    let mut scene = Scene::new();
    common::spawn_cube(&renderer, &mut scene, Mat4::IDENTITY);
    renderer.render(&scene, &viewport).unwrap();

    let ctx = renderer.context();
    let handle = renderer.voxel_volume().expect("voxels enabled");
    let texture = &ctx.targets[handle].texture;
    let level0 = readback::read_volume_level(&ctx.device, &ctx.queue, texture, 0).unwrap();
    let level1 = readback::read_volume_level(&ctx.device, &ctx.queue, texture, 1).unwrap();
    Some((
        size,
        readback::decode_rgba8(&level0),
        readback::decode_rgba8(&level1),
    ))
}

#[test]
fn mip_one_is_the_octant_mean_of_mip_zero() {
    let Some((size, level0, level1)) = volume_levels(16) else {
        return;
    };
    let half = size / 2;
    let at = |level: &[[f32; 4]], n: u32, x: u32, y: u32, z: u32| {
        Vec4::from_array(level[(x + y * n + z * n * n) as usize])
    };

    for z in 0..half {
        for y in 0..half {
            for x in 0..half {
                let children: [Vec4; 8] = std::array::from_fn(|i| {
                    let i = i as u32;
                    at(
                        &level0,
                        size,
                        2 * x + (i & 1),
                        2 * y + ((i >> 1) & 1),
                        2 * z + ((i >> 2) & 1),
                    )
                });
                let expected = reduce_voxel_octant(&children);
                let actual = at(&level1, half, x, y, z);
                assert!(
                    actual.abs_diff_eq(expected, UNORM_EPSILON),
                    "voxel ({x}, {y}, {z}): expected {expected:?}, got {actual:?}"
                );
            }
        }
    }
}

#[test]
fn cube_fills_center_and_leaves_corners_empty() {
    let Some((size, level0, _)) = volume_levels(16) else {
        return;
    };
    let index = |x: u32, y: u32, z: u32| (x + y * size + z * size * size) as usize;

    // A unit cube in a 4m volume spans the middle quarter on each axis.
    let occupied = level0
        .iter()
        .filter(|texel| texel[3] > 0.0)
        .count();
    assert!(occupied > 0, "no voxel written");
    assert_eq!(level0[index(0, 0, 0)][3], 0.0);
    assert_eq!(level0[index(size - 1, size - 1, size - 1)][3], 0.0);
}
