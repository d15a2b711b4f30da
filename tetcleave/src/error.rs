//! Module containing the universal error type for this crate
use thiserror::Error;

/// Universal error type for mesh construction and cleaving
///
/// Only structural and input failures are surfaced here; element-local
/// trouble (ambiguous alpha solves, warp fallbacks) is handled in place and
/// reported through statistics instead.
#[derive(Error, Debug)]
pub enum Error {
    /// A volume needs at least one material field
    #[error("a volume needs at least one material field")]
    NoMaterials,

    /// Material fields must share identical bounds
    #[error("material field {0} has bounds inconsistent with field 0")]
    MismatchedBounds(usize),

    /// Requested material index is out of range
    #[error("material index {0} is out of range ({1} materials)")]
    BadMaterial(usize, usize),

    /// Grid field data length does not match its dimensions
    #[error("grid data length ({0}) does not match dimensions ({1}x{2}x{3})")]
    BadGridSize(usize, usize, usize, usize),

    /// The background lattice has no tetrahedra
    #[error("background lattice is empty")]
    EmptyBackgroundMesh,

    /// A pipeline stage was invoked before its prerequisite stage
    #[error("stage `{0}` requires `{1}` to have run first")]
    StageOrder(&'static str, &'static str),

    /// Malformed node file
    #[error("malformed node file: {0}")]
    BadNodeFile(String),

    /// Malformed element file
    #[error("malformed ele file: {0}")]
    BadEleFile(String),

    /// A file referenced a vertex index outside the node list
    #[error("element references vertex {0}, but only {1} nodes are defined")]
    BadVertexIndex(usize, usize),

    /// IO error; see inner code for details
    #[error("io error: {0}")]
    IoError(#[from] std::io::Error),
}
