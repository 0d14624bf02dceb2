//! Scene loading errors.

use thiserror::Error;

/// Errors raised while loading or validating a mesh.
#[derive(Error, Debug)]
pub enum SceneError {
    /// Asset lookup or I/O failed.
    #[error(transparent)]
    Core(#[from] rtquery_core::Error),

    /// The OBJ parser rejected the file.
    #[error("OBJ parse error: {0}")]
    Obj(#[from] tobj::LoadError),

    /// The file must contain exactly one shape.
    #[error("Expected exactly one shape, found {0}")]
    ShapeCount(usize),

    /// No vertices or no triangles.
    #[error("Mesh has no triangles")]
    Empty,

    /// Vertex array length is not a multiple of three.
    #[error("Vertex array length {0} is not a multiple of 3")]
    VertexComponents(usize),

    /// Index array length is not a multiple of three.
    #[error("Index count {0} is not a multiple of 3")]
    IndexCount(usize),

    /// An index refers past the end of the vertex array.
    #[error("Index {index} out of range for {vertex_count} vertices")]
    IndexOutOfRange { index: u32, vertex_count: usize },

    /// A vertex position is NaN or infinite.
    #[error("Vertex {0} has a non-finite coordinate")]
    NonFinite(usize),
}

/// Result type alias.
pub type Result<T> = std::result::Result<T, SceneError>;
