//! Procedural meshes used by tests, debug views and simple scenes.

use super::mesh::{MeshData, Vertex};

/// Axis-aligned box centered at the origin, 24 vertices (4 per face), CCW.
#[must_use]
pub fn create_box(width: f32, height: f32, depth: f32) -> MeshData {
    let w = width / 2.0;
    let h = height / 2.0;
    let d = depth / 2.0;

    // (normal, tangent, four corners in CCW order seen from outside)
    let faces: [([f32; 3], [f32; 4], [[f32; 3]; 4]); 6] = [
        // Front (+Z)
        (
            [0.0, 0.0, 1.0],
            [1.0, 0.0, 0.0, 1.0],
            [[-w, -h, d], [w, -h, d], [w, h, d], [-w, h, d]],
        ),
        // Back (-Z)
        (
            [0.0, 0.0, -1.0],
            [-1.0, 0.0, 0.0, 1.0],
            [[w, -h, -d], [-w, -h, -d], [-w, h, -d], [w, h, -d]],
        ),
        // Top (+Y)
        (
            [0.0, 1.0, 0.0],
            [1.0, 0.0, 0.0, 1.0],
            [[-w, h, d], [w, h, d], [w, h, -d], [-w, h, -d]],
        ),
        // Bottom (-Y)
        (
            [0.0, -1.0, 0.0],
            [1.0, 0.0, 0.0, 1.0],
            [[-w, -h, -d], [w, -h, -d], [w, -h, d], [-w, -h, d]],
        ),
        // Right (+X)
        (
            [1.0, 0.0, 0.0],
            [0.0, 0.0, -1.0, 1.0],
            [[w, -h, d], [w, -h, -d], [w, h, -d], [w, h, d]],
        ),
        // Left (-X)
        (
            [-1.0, 0.0, 0.0],
            [0.0, 0.0, 1.0, 1.0],
            [[-w, -h, -d], [-w, -h, d], [-w, h, d], [-w, h, -d]],
        ),
    ];

    let uvs = [[0.0, 1.0], [1.0, 1.0], [1.0, 0.0], [0.0, 0.0]];

    let mut vertices = Vec::with_capacity(24);
    let mut indices = Vec::with_capacity(36);
    for (face, (normal, tangent, corners)) in faces.iter().enumerate() {
        let base = (face * 4) as u32;
        for (corner, uv) in corners.iter().zip(uvs) {
            vertices.push(Vertex {
                position: *corner,
                normal: *normal,
                uv,
                tangent: *tangent,
            });
        }
        indices.extend_from_slice(&[base, base + 1, base + 2, base, base + 2, base + 3]);
    }

    MeshData::new(vertices, indices)
}

/// Unit-normal `+Y` ground plane centered at the origin.
#[must_use]
pub fn create_plane(width: f32, depth: f32) -> MeshData {
    let w = width / 2.0;
    let d = depth / 2.0;
    let corners = [[-w, 0.0, d], [w, 0.0, d], [w, 0.0, -d], [-w, 0.0, -d]];
    let uvs = [[0.0, 1.0], [1.0, 1.0], [1.0, 0.0], [0.0, 0.0]];

    let vertices = corners
        .iter()
        .zip(uvs)
        .map(|(position, uv)| Vertex {
            position: *position,
            normal: [0.0, 1.0, 0.0],
            uv,
            tangent: [1.0, 0.0, 0.0, 1.0],
        })
        .collect();

    MeshData::new(vertices, vec![0, 1, 2, 0, 2, 3])
}
