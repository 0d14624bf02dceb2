//! Triangle mesh loading for rtquery.
//!
//! A [`Scene`] is a single triangle mesh held as flat arrays: three `f32`
//! per vertex position and three `u32` per triangle. The arrays are uploaded
//! verbatim into GPU buffers and read by the acceleration structure build
//! and the compute shader.

pub mod error;
pub mod obj;

pub use error::{Result, SceneError};
pub use obj::{load_obj, load_obj_reader};

use glam::Vec3;

/// Float components per vertex position.
pub const VERTEX_COMPONENTS: usize = 3;
/// Indices per triangle.
pub const INDICES_PER_TRIANGLE: usize = 3;

/// Immutable triangle mesh.
#[derive(Debug, Clone, PartialEq)]
pub struct Scene {
    name: String,
    vertices: Vec<f32>,
    indices: Vec<u32>,
}

impl Scene {
    /// Build a scene from flat arrays, validating the layout.
    pub fn from_parts(
        name: impl Into<String>,
        vertices: Vec<f32>,
        indices: Vec<u32>,
    ) -> Result<Self> {
        let scene = Self {
            name: name.into(),
            vertices,
            indices,
        };
        scene.validate()?;
        Ok(scene)
    }

    fn validate(&self) -> Result<()> {
        if self.vertices.len() % VERTEX_COMPONENTS != 0 {
            return Err(SceneError::VertexComponents(self.vertices.len()));
        }
        if self.indices.len() % INDICES_PER_TRIANGLE != 0 {
            return Err(SceneError::IndexCount(self.indices.len()));
        }
        if self.vertices.is_empty() || self.indices.is_empty() {
            return Err(SceneError::Empty);
        }
        if let Some(pos) = self.vertices.iter().position(|v| !v.is_finite()) {
            return Err(SceneError::NonFinite(pos / VERTEX_COMPONENTS));
        }
        let vertex_count = self.vertex_count();
        if let Some(&index) = self.indices.iter().find(|&&i| i as usize >= vertex_count) {
            return Err(SceneError::IndexOutOfRange {
                index,
                vertex_count,
            });
        }
        Ok(())
    }

    /// Mesh name (from the OBJ object/group, or the file stem).
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Flat vertex positions, `x y z` per vertex.
    pub fn vertices(&self) -> &[f32] {
        &self.vertices
    }

    /// Flat triangle indices, three per triangle.
    pub fn indices(&self) -> &[u32] {
        &self.indices
    }

    /// Number of vertices.
    pub fn vertex_count(&self) -> usize {
        self.vertices.len() / VERTEX_COMPONENTS
    }

    /// Number of triangles.
    pub fn triangle_count(&self) -> usize {
        self.indices.len() / INDICES_PER_TRIANGLE
    }

    /// Highest valid vertex index, as the acceleration structure build expects.
    pub fn max_vertex(&self) -> u32 {
        u32::try_from(self.vertex_count().saturating_sub(1)).unwrap_or(u32::MAX)
    }

    /// Vertex `i` as a vector.
    pub fn vertex(&self, i: usize) -> Option<Vec3> {
        let start = i.checked_mul(VERTEX_COMPONENTS)?;
        self.vertices
            .get(start..start + VERTEX_COMPONENTS)
            .map(Vec3::from_slice)
    }

    /// Axis-aligned bounds of all vertices.
    pub fn bounds(&self) -> (Vec3, Vec3) {
        bytemuck::cast_slice::<f32, [f32; 3]>(&self.vertices)
            .iter()
            .map(|&p| Vec3::from_array(p))
            .fold(
                (Vec3::splat(f32::INFINITY), Vec3::splat(f32::NEG_INFINITY)),
                |(min, max), p| (min.min(p), max.max(p)),
            )
    }

    /// Size of the vertex array in bytes.
    pub fn vertex_bytes(&self) -> u64 {
        std::mem::size_of_val(self.vertices.as_slice()) as u64
    }

    /// Size of the index array in bytes.
    pub fn index_bytes(&self) -> u64 {
        std::mem::size_of_val(self.indices.as_slice()) as u64
    }
}
