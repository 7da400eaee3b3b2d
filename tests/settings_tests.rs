//! Settings Tests
//!
//! Tests for:
//! - JSON round trip and partial documents
//! - Validation of GPU-facing values
//! - Frame policy derived from settings

use glam::UVec2;

use strata::renderer::settings::MAX_VOXEL_SIZE;
use strata::{FramePolicy, RenderSettings, StrataError};

// ============================================================================
// Serialization Tests
// ============================================================================

#[test]
fn json_round_trip_preserves_values() {
    let mut settings = RenderSettings::default();
    settings.voxels.size = 64;
    settings.taa.blend = 0.25;
    settings.tonemap.exposure = 1.5;
    settings.debug.voxel_visualization = true;

    let json = settings.to_json().unwrap();
    let back = RenderSettings::from_json(&json).unwrap();
    assert_eq!(back.voxels, settings.voxels);
    assert_eq!(back.taa, settings.taa);
    assert_eq!(back.tonemap, settings.tonemap);
    assert_eq!(back.debug, settings.debug);
}

#[test]
fn partial_json_uses_defaults() {
    let settings = RenderSettings::from_json(r#"{ "bloom": { "enabled": false } }"#).unwrap();
    assert!(!settings.bloom.enabled);
    assert_eq!(settings.taa, RenderSettings::default().taa);
    assert_eq!(settings.shadows, RenderSettings::default().shadows);
}

#[test]
fn malformed_json_is_a_settings_error() {
    assert!(matches!(
        RenderSettings::from_json("{ not json"),
        Err(StrataError::Settings(_))
    ));
}

#[test]
fn invalid_json_values_are_rejected_on_load() {
    let err = RenderSettings::from_json(r#"{ "voxels": { "size": 100 } }"#).unwrap_err();
    assert!(matches!(err, StrataError::InvalidSetting { name: "voxels.size", .. }));
}

// ============================================================================
// Validation Tests
// ============================================================================

#[test]
fn default_settings_are_valid() {
    RenderSettings::default().validate().unwrap();
}

#[test]
fn voxel_size_must_be_power_of_two_in_range() {
    let mut settings = RenderSettings::default();
    for size in [0, 1, 3, 48, MAX_VOXEL_SIZE * 2] {
        settings.voxels.size = size;
        assert!(settings.validate().is_err(), "size {size} accepted");
    }
    for size in [2, 16, 128, MAX_VOXEL_SIZE] {
        settings.voxels.size = size;
        assert!(settings.validate().is_ok(), "size {size} rejected");
    }
}

#[test]
fn zero_sized_resources_are_rejected() {
    let mut settings = RenderSettings::default();
    settings.shadows.resolution = 0;
    assert!(matches!(
        settings.validate(),
        Err(StrataError::InvalidSetting { name: "shadows.resolution", .. })
    ));

    let mut settings = RenderSettings::default();
    settings.voxels.world_size = 0.0;
    assert!(settings.validate().is_err());
}

#[test]
fn voxel_mip_count_is_log2_of_size() {
    let mut settings = RenderSettings::default();
    for (size, mips) in [(2, 1), (16, 4), (128, 7), (512, 9)] {
        settings.voxels.size = size;
        assert_eq!(settings.voxel_mip_count(), mips, "size {size}");
    }
}

// ============================================================================
// Frame Policy Tests
// ============================================================================

#[test]
fn policy_tracks_toggles() {
    let mut settings = RenderSettings::default();
    settings.taa.enabled = false;
    settings.debug.lines = false;
    let policy = FramePolicy::from_settings(&settings, UVec2::new(320, 240), true);
    assert!(!policy.taa);
    assert!(!policy.debug_lines);
    assert!(policy.one_shot_pending);
    assert!(policy.includes("brdf_lut"));
    assert!(!policy.includes("taa"));
}

#[test]
fn policies_hash_by_value() {
    use std::collections::HashSet;

    let settings = RenderSettings::default();
    let size = UVec2::new(320, 240);
    let mut seen = HashSet::new();
    seen.insert(FramePolicy::from_settings(&settings, size, false));
    seen.insert(FramePolicy::from_settings(&settings, size, false));
    seen.insert(FramePolicy::from_settings(&settings, size, true));
    assert_eq!(seen.len(), 2);
}
