//! Scalar field abstraction
//!
//! A material is described by an indicator function: a scalar field whose
//! value at a point grows the more strongly the point belongs to the
//! material.  The cleaving pipeline only ever asks two questions of a field,
//! captured by the [`ScalarField`] trait: its value at a point and the box
//! it is defined over.
//!
//! Concrete fields form a closed set: discretized voxel grids
//! ([`GridField`]), analytic test shapes ([`SphereField`], [`PlaneField`],
//! [`TorusField`], [`BlobbyField`]), the [`ConstantField`], and the
//! [`InverseField`] adapter which negates another field.
use std::sync::Arc;

use nalgebra::Vector3;

mod analytic;
mod grid;

pub use analytic::{BlobbyField, PlaneField, SphereField, TorusField};
pub use grid::GridField;

/// An axis-aligned box, stored as origin and size
#[derive(Copy, Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct BoundingBox {
    /// Minimum corner of the box
    pub origin: Vector3<f64>,
    /// Extent of the box along each axis (non-negative)
    pub size: Vector3<f64>,
}

impl BoundingBox {
    /// Builds a box from its minimum corner and size
    pub fn new(origin: Vector3<f64>, size: Vector3<f64>) -> Self {
        Self { origin, size }
    }

    /// Builds a box at the coordinate origin with the given size
    pub fn at_origin(size: Vector3<f64>) -> Self {
        Self {
            origin: Vector3::zeros(),
            size,
        }
    }

    /// Minimum corner
    pub fn min_corner(&self) -> Vector3<f64> {
        self.origin
    }

    /// Maximum corner
    pub fn max_corner(&self) -> Vector3<f64> {
        self.origin + self.size
    }

    /// Center point of the box
    pub fn center(&self) -> Vector3<f64> {
        self.origin + self.size / 2.0
    }

    /// Checks whether `p` lies inside the box (inclusive on all faces)
    pub fn contains(&self, p: Vector3<f64>) -> bool {
        let lo = self.min_corner();
        let hi = self.max_corner();
        (0..3).all(|i| p[i] >= lo[i] && p[i] <= hi[i])
    }
}

/// A scalar indicator function over 3D space
///
/// Implementations must be pure: `value_at` has no side effects and may be
/// called concurrently from many threads.  Out-of-bounds queries return a
/// defined extrapolation rather than erroring; the policy is documented on
/// each implementation.
pub trait ScalarField: Send + Sync {
    /// Samples the field at a point
    fn value_at(&self, p: Vector3<f64>) -> f64;

    /// Returns the box over which this field is defined
    fn bounds(&self) -> BoundingBox;
}

/// A field with the same value everywhere
pub struct ConstantField {
    value: f64,
    bounds: BoundingBox,
}

impl ConstantField {
    /// Builds a constant field over the given bounds
    pub fn new(value: f64, bounds: BoundingBox) -> Self {
        Self { value, bounds }
    }
}

impl ScalarField for ConstantField {
    fn value_at(&self, _p: Vector3<f64>) -> f64 {
        self.value
    }
    fn bounds(&self) -> BoundingBox {
        self.bounds
    }
}

/// Negation of another field
///
/// Wraps a shared field and returns `-f(p)`, turning an indicator for one
/// material into an indicator for its complement.  Bounds and out-of-bounds
/// policy are inherited from the wrapped field.
pub struct InverseField {
    field: Arc<dyn ScalarField>,
}

impl InverseField {
    /// Wraps `field`, negating its values
    pub fn new(field: Arc<dyn ScalarField>) -> Self {
        Self { field }
    }
}

impl ScalarField for InverseField {
    fn value_at(&self, p: Vector3<f64>) -> f64 {
        -self.field.value_at(p)
    }
    fn bounds(&self) -> BoundingBox {
        self.field.bounds()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn bounding_box_corners() {
        let b = BoundingBox::new(
            Vector3::new(1.0, 2.0, 3.0),
            Vector3::new(4.0, 5.0, 6.0),
        );
        assert_eq!(b.max_corner(), Vector3::new(5.0, 7.0, 9.0));
        assert_eq!(b.center(), Vector3::new(3.0, 4.5, 6.0));
        assert!(b.contains(Vector3::new(1.0, 2.0, 3.0)));
        assert!(b.contains(Vector3::new(5.0, 7.0, 9.0)));
        assert!(!b.contains(Vector3::new(0.9, 2.0, 3.0)));
    }

    #[test]
    fn inverse_negates() {
        let b = BoundingBox::at_origin(Vector3::new(1.0, 1.0, 1.0));
        let f = Arc::new(ConstantField::new(2.5, b));
        let inv = InverseField::new(f.clone());
        let p = Vector3::new(0.5, 0.5, 0.5);
        assert_eq!(inv.value_at(p), -f.value_at(p));
        assert_eq!(inv.bounds(), f.bounds());
    }
}
