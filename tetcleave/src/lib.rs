//! Tetcleave is a library for multi-material conforming tetrahedral
//! meshing of volumetric scalar fields.
//!
//! A **material** is a scalar field `f(x, y, z)` over a shared bounding
//! box; at every point, the material with the highest value is the one
//! present there.  Given a set of materials, the library produces a
//! tetrahedral mesh whose element faces conform to the boundaries where
//! the dominant material changes, with bounded dihedral angles and no
//! hanging nodes.
//!
//! The algorithm is a *cleaving* pipeline: it builds a body-centered
//! cubic background lattice ([`lattice`]), samples the materials at its
//! vertices, computes where the interfaces cross its edges, faces and
//! cells ([`cleave`]), then deforms the lattice toward those crossings
//! and re-triangulates every crossed tetrahedron with a static stencil.
//! Deformations are bounded by per-edge safety parameters (*alphas*) so
//! that element quality cannot collapse.
//!
//! # Building a volume
//! Materials implement the [`field::ScalarField`] trait; a few analytic
//! fields and a trilinear sampled grid are included.  A [`volume::Volume`]
//! bundles them:
//!
//! ```
//! use std::sync::Arc;
//! use nalgebra::Vector3;
//! use tetcleave::field::{BoundingBox, ScalarField, SphereField};
//! use tetcleave::volume::Volume;
//!
//! let bounds = BoundingBox::at_origin(Vector3::new(16.0, 16.0, 16.0));
//! let ball: Arc<dyn ScalarField> = Arc::new(SphereField::new(
//!     Vector3::new(8.0, 8.0, 8.0),
//!     4.0,
//!     bounds,
//! ));
//! let volume = Volume::new(vec![ball])?;
//! # Ok::<(), tetcleave::Error>(())
//! ```
//!
//! # Meshing
//! [`cleave::CleaverMesher`] drives the pipeline; stages can also be run
//! one at a time for inspection.
//!
//! ```no_run
//! # use std::sync::Arc;
//! # use nalgebra::Vector3;
//! # use tetcleave::field::{BoundingBox, ScalarField, SphereField};
//! # use tetcleave::volume::Volume;
//! use tetcleave::cleave::{CleaverConfig, CleaverMesher};
//!
//! # let bounds = BoundingBox::at_origin(Vector3::new(16.0, 16.0, 16.0));
//! # let ball: Arc<dyn ScalarField> = Arc::new(SphereField::new(
//! #     Vector3::new(8.0, 8.0, 8.0),
//! #     4.0,
//! #     bounds,
//! # ));
//! # let volume = Volume::new(vec![ball])?;
//! let mesh = CleaverMesher::new(&volume, CleaverConfig::default())
//!     .cleave()?;
//! tetcleave::io::write_node_ele(&mesh, "ball")?;
//! # Ok::<(), tetcleave::Error>(())
//! ```
//!
//! The result is a [`mesh::TetMesh`]: flat vertex and tet arenas with a
//! material label per tet, which [`io`] can exchange in the TetGen
//! `.node` / `.ele` format.
#![warn(missing_docs)]

pub mod cleave;
mod error;
pub mod field;
pub mod io;
pub mod lattice;
pub mod mesh;
pub mod volume;

pub use error::Error;
