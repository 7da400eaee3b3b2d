//! Scene Interface
//!
//! The renderer consumes the scene store through read-only views of
//! entities with (mesh, transform), (mesh, transform, skeleton),
//! (directional light, transform) and (point light, transform).
//!
//! [`Scene`] is a minimal flat store that provides exactly these views; hosts
//! with their own entity storage fill one per frame or keep it in sync.

pub mod camera;
pub mod light;
pub mod mesh;
pub mod primitives;
pub mod skeleton;
pub mod viewport;

use std::sync::Arc;

use glam::Mat4;

pub use camera::{Camera, Frustum};
pub use light::{DirectionalLight, PointLight};
pub use mesh::{Aabb, GpuMesh, GpuTexture, Material, MeshData, Vertex};
pub use skeleton::{GpuSkin, Skeleton, SkinVertex};
pub use viewport::Viewport;

/// Opaque entity identity as written into the entity-ID buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Entity(pub u32);

impl Entity {
    /// Sentinel read back from pixels no entity covers.
    pub const NULL: Entity = Entity(u32::MAX);

    #[inline]
    #[must_use]
    pub fn is_null(self) -> bool {
        self == Self::NULL
    }

    #[inline]
    #[must_use]
    pub fn to_bits(self) -> u32 {
        self.0
    }
}

#[derive(Debug, Clone)]
pub struct MeshInstance {
    pub entity: Entity,
    pub mesh: Arc<GpuMesh>,
    pub material: Option<Arc<Material>>,
    pub transform: Mat4,
    pub skeleton: Option<Skeleton>,
}

impl MeshInstance {
    /// World-space bounds, `None` when the mesh has no local bounds.
    #[must_use]
    pub fn world_bounds(&self) -> Option<Aabb> {
        self.mesh.bounds.map(|b| b.transform(&self.transform))
    }
}

#[derive(Debug, Clone, Copy)]
pub struct DirectionalLightInstance {
    pub entity: Entity,
    pub light: DirectionalLight,
    pub transform: Mat4,
}

#[derive(Debug, Clone, Copy)]
pub struct PointLightInstance {
    pub entity: Entity,
    pub light: PointLight,
    pub transform: Mat4,
}

impl PointLightInstance {
    #[inline]
    #[must_use]
    pub fn position(&self) -> glam::Vec3 {
        self.transform.w_axis.truncate()
    }
}

#[derive(Debug, Default, Clone)]
pub struct Scene {
    next_entity: u32,
    meshes: Vec<MeshInstance>,
    directional_lights: Vec<DirectionalLightInstance>,
    point_lights: Vec<PointLightInstance>,
}

impl Scene {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn allocate(&mut self) -> Entity {
        let entity = Entity(self.next_entity);
        self.next_entity += 1;
        entity
    }

    pub fn spawn_mesh(
        &mut self,
        mesh: Arc<GpuMesh>,
        material: Option<Arc<Material>>,
        transform: Mat4,
    ) -> Entity {
        let entity = self.allocate();
        self.meshes.push(MeshInstance {
            entity,
            mesh,
            material,
            transform,
            skeleton: None,
        });
        entity
    }

    pub fn spawn_directional_light(&mut self, light: DirectionalLight, transform: Mat4) -> Entity {
        let entity = self.allocate();
        self.directional_lights.push(DirectionalLightInstance {
            entity,
            light,
            transform,
        });
        entity
    }

    pub fn spawn_point_light(&mut self, light: PointLight, transform: Mat4) -> Entity {
        let entity = self.allocate();
        self.point_lights.push(PointLightInstance {
            entity,
            light,
            transform,
        });
        entity
    }

    /// Attaches a skeleton; returns `false` if `entity` has no mesh.
    pub fn attach_skeleton(&mut self, entity: Entity, skeleton: Skeleton) -> bool {
        match self.mesh_mut(entity) {
            Some(instance) => {
                instance.skeleton = Some(skeleton);
                true
            }
            None => false,
        }
    }

    pub fn mesh_mut(&mut self, entity: Entity) -> Option<&mut MeshInstance> {
        self.meshes.iter_mut().find(|m| m.entity == entity)
    }

    /// Removes every component of `entity`.
    pub fn despawn(&mut self, entity: Entity) {
        self.meshes.retain(|m| m.entity != entity);
        self.directional_lights.retain(|l| l.entity != entity);
        self.point_lights.retain(|l| l.entity != entity);
    }

    #[must_use]
    pub fn meshes(&self) -> &[MeshInstance] {
        &self.meshes
    }

    pub fn skinned_meshes(&self) -> impl Iterator<Item = (&MeshInstance, &Skeleton)> {
        self.meshes
            .iter()
            .filter_map(|m| m.skeleton.as_ref().map(|s| (m, s)))
    }

    #[must_use]
    pub fn directional_lights(&self) -> &[DirectionalLightInstance] {
        &self.directional_lights
    }

    #[must_use]
    pub fn point_lights(&self) -> &[PointLightInstance] {
        &self.point_lights
    }

    /// The one directional light the pipeline shades with.
    #[must_use]
    pub fn sun(&self) -> Option<&DirectionalLightInstance> {
        self.directional_lights.first()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.meshes.is_empty() && self.directional_lights.is_empty() && self.point_lights.is_empty()
    }
}
