//! Resource dependency validation and barrier planning.
//!
//! The pass list is already in execution order; building the graph only
//! checks that order against the declarations:
//!
//! - every read has an earlier producer, a persistent value, or a default
//! - every resource has at most one producer
//! - every modify follows the producer
//!
//! The resulting plan lists, per pass, the resources whose producer is an
//! earlier pass. The orchestrator names each of these transitions with a
//! debug marker before recording the consumer.

use rustc_hash::FxHashMap;
use smallvec::SmallVec;

use super::{PassFlags, PassResources, ResourceId};
use crate::errors::{Result, StrataError};

/// One pass as seen by the graph.
#[derive(Debug, Clone)]
pub struct PassNode {
    pub name: &'static str,
    pub resources: PassResources,
}

impl PassNode {
    #[must_use]
    pub fn new(name: &'static str, resources: PassResources) -> Self {
        Self { name, resources }
    }
}

/// A producer → consumer transition of one resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Barrier {
    pub resource: ResourceId,
    /// Last pass that wrote or modified the resource.
    pub producer: &'static str,
    pub from_compute: bool,
}

impl Barrier {
    #[must_use]
    pub fn marker(&self, consumer: &str) -> String {
        let stage = if self.from_compute { "compute" } else { "raster" };
        format!(
            "barrier {:?}: {} ({stage}) -> {consumer}",
            self.resource, self.producer
        )
    }
}

#[derive(Debug, Clone, Default)]
pub struct PassGraph {
    passes: Vec<&'static str>,
    barriers: Vec<SmallVec<[Barrier; 4]>>,
}

impl PassGraph {
    /// Validates `nodes` in the given order and derives the barrier plan.
    pub fn build(nodes: &[PassNode]) -> Result<Self> {
        // resource → (producing pass, last toucher)
        let mut producers: FxHashMap<ResourceId, &'static str> = FxHashMap::default();
        let mut last_touch: FxHashMap<ResourceId, (&'static str, bool)> = FxHashMap::default();
        let mut barriers = Vec::with_capacity(nodes.len());

        for node in nodes {
            let res = &node.resources;
            let compute = res.flags.contains(PassFlags::COMPUTE);
            let mut plan: SmallVec<[Barrier; 4]> = SmallVec::new();

            for &resource in res.reads.iter().chain(res.modifies.iter()) {
                match last_touch.get(&resource) {
                    Some(&(producer, from_compute)) => {
                        if !plan.iter().any(|b| b.resource == resource) {
                            plan.push(Barrier {
                                resource,
                                producer,
                                from_compute,
                            });
                        }
                    }
                    None => {
                        let modify = res.modifies.contains(&resource);
                        let satisfied =
                            !modify && (resource.is_persistent() || resource.has_default());
                        if !satisfied {
                            return Err(StrataError::ReadBeforeWrite {
                                pass: node.name,
                                resource,
                            });
                        }
                    }
                }
            }

            for &resource in &res.writes {
                if let Some(&first) = producers.get(&resource) {
                    return Err(StrataError::MultipleWriters {
                        resource,
                        first,
                        second: node.name,
                    });
                }
                producers.insert(resource, node.name);
            }

            for &resource in res.writes.iter().chain(res.modifies.iter()) {
                last_touch.insert(resource, (node.name, compute));
            }

            barriers.push(plan);
        }

        log::debug!(
            "pass graph: {} passes, {} barriers",
            nodes.len(),
            barriers.iter().map(SmallVec::len).sum::<usize>()
        );

        Ok(Self {
            passes: nodes.iter().map(|n| n.name).collect(),
            barriers,
        })
    }

    /// Barriers to apply before the pass called `name`.
    #[must_use]
    pub fn barriers_before(&self, name: &str) -> &[Barrier] {
        self.passes
            .iter()
            .position(|&p| p == name)
            .map_or(&[][..], |i| self.barriers[i].as_slice())
    }

    #[must_use]
    pub fn passes(&self) -> &[&'static str] {
        &self.passes
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.passes.contains(&name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ResourceId::*;

    fn node(name: &'static str, reads: &[ResourceId], writes: &[ResourceId]) -> PassNode {
        PassNode::new(name, PassResources::new().reads(reads).writes(writes))
    }

    #[test]
    fn barrier_names_last_producer() {
        let graph = PassGraph::build(&[
            node("gbuffer", &[], &[GBuffer, Depth]),
            PassNode::new(
                "deferred",
                PassResources::new()
                    .reads(&[GBuffer, Depth])
                    .writes(&[ShadingResult])
                    .with_flags(PassFlags::COMPUTE),
            ),
            node("tonemap", &[ShadingResult], &[FinalImage]),
        ])
        .unwrap();

        let before = graph.barriers_before("tonemap");
        assert_eq!(before.len(), 1);
        assert_eq!(before[0].producer, "deferred");
        assert!(before[0].from_compute);
        assert!(graph.barriers_before("gbuffer").is_empty());
    }

    #[test]
    fn modify_without_producer_is_rejected() {
        let err = PassGraph::build(&[PassNode::new(
            "lines",
            PassResources::new().modifies(&[FinalImage]),
        )])
        .unwrap_err();
        assert!(matches!(err, StrataError::ReadBeforeWrite { .. }));
    }
}
