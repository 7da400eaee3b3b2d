//! Pass Graph Tests
//!
//! Tests for:
//! - Validation of the full frame ordering
//! - Read-before-write and multiple-writer rejection
//! - Persistent and defaulted resources
//! - Barrier plans and their debug markers

use strata::StrataError;
use strata::renderer::graph::{PassFlags, PassGraph, PassNode, PassResources, ResourceId};

use ResourceId::*;

fn node(name: &'static str, resources: PassResources) -> PassNode {
    PassNode::new(name, resources)
}

/// The frame in execution order with every optional pass switched on.
fn full_frame() -> Vec<PassNode> {
    vec![
        node(
            "brdf_lut",
            PassResources::new()
                .writes(&[BrdfLut])
                .with_flags(PassFlags::COMPUTE | PassFlags::ONE_SHOT),
        ),
        node(
            "skinning",
            PassResources::new()
                .writes(&[SkinnedVertices])
                .with_flags(PassFlags::COMPUTE),
        ),
        node(
            "gbuffer",
            PassResources::new()
                .reads(&[SkinnedVertices])
                .writes(&[GBuffer, Velocity, EntityIds, Depth]),
        ),
        node(
            "shadows",
            PassResources::new()
                .reads(&[SkinnedVertices])
                .writes(&[ShadowCascades]),
        ),
        node(
            "voxelize",
            PassResources::new()
                .reads(&[SkinnedVertices, ShadowCascades])
                .writes(&[VoxelVolume]),
        ),
        node(
            "atmosphere",
            PassResources::new()
                .writes(&[EnvironmentMap, IrradianceMap])
                .with_flags(PassFlags::COMPUTE),
        ),
        node(
            "deferred",
            PassResources::new()
                .reads(&[
                    GBuffer,
                    Depth,
                    ShadowCascades,
                    VoxelVolume,
                    EnvironmentMap,
                    IrradianceMap,
                    BrdfLut,
                ])
                .writes(&[ShadingResult, BloomThreshold]),
        ),
        node(
            "taa",
            PassResources::new()
                .reads(&[ShadingResult, Velocity, Depth, TaaHistory])
                .writes(&[TaaResult]),
        ),
        node(
            "bloom",
            PassResources::new()
                .reads(&[BloomThreshold])
                .writes(&[BloomResult])
                .with_flags(PassFlags::COMPUTE),
        ),
        node(
            "tonemap",
            PassResources::new()
                .reads(&[TaaResult, BloomResult])
                .writes(&[FinalImage]),
        ),
        node(
            "debug_lines",
            PassResources::new().reads(&[Depth]).modifies(&[FinalImage]),
        ),
        node(
            "icons",
            PassResources::new()
                .reads(&[Depth])
                .modifies(&[FinalImage, EntityIds]),
        ),
    ]
}

fn without(nodes: Vec<PassNode>, names: &[&str]) -> Vec<PassNode> {
    nodes
        .into_iter()
        .filter(|n| !names.contains(&n.name))
        .collect()
}

// ============================================================================
// Validation Tests
// ============================================================================

#[test]
fn full_frame_is_valid() {
    let graph = PassGraph::build(&full_frame()).expect("full frame should validate");
    assert_eq!(graph.passes().len(), 12);
    assert!(graph.contains("tonemap"));
}

#[test]
fn optional_producers_fall_back_to_defaults() {
    // Skinning, voxels and bloom have defaults; BRDF LUT and the sky persist.
    let nodes = without(
        full_frame(),
        &["brdf_lut", "skinning", "voxelize", "atmosphere", "bloom"],
    );
    let graph = PassGraph::build(&nodes).expect("defaults should satisfy the reads");
    assert!(!graph.contains("voxelize"));
    assert!(graph.barriers_before("deferred").iter().all(|b| b.resource != VoxelVolume));
}

#[test]
fn missing_producer_is_read_before_write() {
    let nodes = without(full_frame(), &["gbuffer"]);
    match PassGraph::build(&nodes) {
        Err(StrataError::ReadBeforeWrite { pass, resource }) => {
            assert_eq!(pass, "deferred");
            assert_eq!(resource, GBuffer);
        }
        other => panic!("expected ReadBeforeWrite, got {other:?}"),
    }
}

#[test]
fn consumer_before_producer_is_rejected() {
    let mut nodes = full_frame();
    let tonemap = nodes.iter().position(|n| n.name == "tonemap").unwrap();
    let taa = nodes.iter().position(|n| n.name == "taa").unwrap();
    nodes.swap(tonemap, taa);
    assert!(matches!(
        PassGraph::build(&nodes),
        Err(StrataError::ReadBeforeWrite { pass: "tonemap", resource: TaaResult })
    ));
}

#[test]
fn second_writer_is_rejected() {
    let mut nodes = full_frame();
    nodes.push(node("rogue", PassResources::new().writes(&[Depth])));
    match PassGraph::build(&nodes) {
        Err(StrataError::MultipleWriters { resource, first, second }) => {
            assert_eq!(resource, Depth);
            assert_eq!(first, "gbuffer");
            assert_eq!(second, "rogue");
        }
        other => panic!("expected MultipleWriters, got {other:?}"),
    }
}

#[test]
fn modify_needs_a_producer_even_with_default() {
    let nodes = [node("overlay", PassResources::new().modifies(&[BloomResult]))];
    assert!(PassGraph::build(&nodes).is_err());
}

#[test]
fn empty_graph_is_valid() {
    let graph = PassGraph::build(&[]).unwrap();
    assert!(graph.passes().is_empty());
    assert!(graph.barriers_before("anything").is_empty());
}

// ============================================================================
// Barrier Plan Tests
// ============================================================================

#[test]
fn barriers_name_the_latest_toucher() {
    let graph = PassGraph::build(&full_frame()).unwrap();

    let icons = graph.barriers_before("icons");
    let final_image = icons.iter().find(|b| b.resource == FinalImage).unwrap();
    assert_eq!(final_image.producer, "debug_lines");
    let ids = icons.iter().find(|b| b.resource == EntityIds).unwrap();
    assert_eq!(ids.producer, "gbuffer");
}

#[test]
fn compute_producers_are_flagged() {
    let graph = PassGraph::build(&full_frame()).unwrap();
    let tonemap = graph.barriers_before("tonemap");
    let bloom = tonemap.iter().find(|b| b.resource == BloomResult).unwrap();
    assert!(bloom.from_compute);
    let taa = tonemap.iter().find(|b| b.resource == TaaResult).unwrap();
    assert!(!taa.from_compute);
}

#[test]
fn persistent_reads_need_no_barrier() {
    let nodes = without(full_frame(), &["brdf_lut"]);
    let graph = PassGraph::build(&nodes).unwrap();
    assert!(graph.barriers_before("deferred").iter().all(|b| b.resource != BrdfLut));
    assert!(graph.barriers_before("taa").iter().all(|b| b.resource != TaaHistory));
}

#[test]
fn barriers_are_not_duplicated() {
    let graph = PassGraph::build(&full_frame()).unwrap();
    let deferred = graph.barriers_before("deferred");
    let mut resources: Vec<_> = deferred.iter().map(|b| b.resource).collect();
    resources.sort();
    resources.dedup();
    assert_eq!(resources.len(), deferred.len());
}

#[test]
fn marker_mentions_both_passes() {
    let graph = PassGraph::build(&full_frame()).unwrap();
    let barrier = graph
        .barriers_before("bloom")
        .iter()
        .find(|b| b.resource == BloomThreshold)
        .unwrap();
    let marker = barrier.marker("bloom");
    assert!(marker.contains("deferred"), "{marker}");
    assert!(marker.contains("bloom"), "{marker}");
    assert!(marker.contains("BloomThreshold"), "{marker}");
}
