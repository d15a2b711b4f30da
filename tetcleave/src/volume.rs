//! Aggregation of material fields over a shared domain
//!
//! A [`Volume`] owns an ordered list of material indicator fields and maps
//! its own coordinate space (by default the size of the first field's
//! bounds) onto each field's bounds.  It answers the single question every
//! downstream stage keeps asking: which material dominates at a point.
use std::sync::Arc;

use nalgebra::Vector3;

use crate::field::{BoundingBox, ScalarField};
use crate::Error;

/// An ordered set of material fields over a shared bounding box
///
/// Materials are mutually exclusive and collectively exhaustive at every
/// sample point: exactly one field attains the maximum (ties broken by the
/// lowest material index).  A `Volume` is immutable during cleaving; the
/// size and sizing field are set once during setup.
pub struct Volume {
    fields: Vec<Arc<dyn ScalarField>>,
    bounds: BoundingBox,
    sizing: Option<Arc<dyn ScalarField>>,
}

impl Volume {
    /// Builds a volume from material fields
    ///
    /// All fields must share the bounds of the first; the volume adopts
    /// that size, placed at the origin.
    pub fn new(fields: Vec<Arc<dyn ScalarField>>) -> Result<Self, Error> {
        if fields.is_empty() {
            return Err(Error::NoMaterials);
        }
        let b0 = fields[0].bounds();
        for (i, f) in fields.iter().enumerate().skip(1) {
            let b = f.bounds();
            if (b.size - b0.size).norm() > 1e-9 {
                return Err(Error::MismatchedBounds(i));
            }
        }
        Ok(Self {
            bounds: BoundingBox::at_origin(b0.size),
            fields,
            sizing: None,
        })
    }

    /// Sets the volume's size, rescaling the domain the fields are
    /// stretched over.  Setup-time only.
    pub fn set_size(&mut self, width: usize, height: usize, depth: usize) {
        self.bounds.size =
            Vector3::new(width as f64, height as f64, depth as f64);
    }

    /// Attaches a sizing field for the background mesh builder
    pub fn set_sizing_field(&mut self, field: Arc<dyn ScalarField>) {
        self.sizing = Some(field);
    }

    /// Returns the sizing field, if one was attached
    pub fn sizing_field(&self) -> Option<&Arc<dyn ScalarField>> {
        self.sizing.as_ref()
    }

    /// Number of materials in the volume
    pub fn number_of_materials(&self) -> usize {
        self.fields.len()
    }

    /// Bounding box of the volume's own coordinate space
    pub fn bounds(&self) -> &BoundingBox {
        &self.bounds
    }

    /// Samples material `material` at `p` (volume coordinates)
    pub fn value_at(&self, p: Vector3<f64>, material: usize) -> f64 {
        let fb = self.fields[material].bounds();
        let tx = Vector3::new(
            p.x / self.bounds.size.x * fb.size.x,
            p.y / self.bounds.size.y * fb.size.y,
            p.z / self.bounds.size.z * fb.size.z,
        );
        self.fields[material].value_at(tx)
    }

    /// Samples the sizing field at `p` (volume coordinates)
    ///
    /// Falls back to 1.0 (refine fully) when no sizing field is attached.
    pub fn sizing_at(&self, p: Vector3<f64>) -> f64 {
        match &self.sizing {
            Some(f) => {
                let fb = f.bounds();
                let tx = Vector3::new(
                    p.x / self.bounds.size.x * fb.size.x,
                    p.y / self.bounds.size.y * fb.size.y,
                    p.z / self.bounds.size.z * fb.size.z,
                );
                f.value_at(tx)
            }
            None => 1.0,
        }
    }

    /// Index of the dominant material at `p`
    ///
    /// Argmax over all material fields; ties go to the lowest index.
    pub fn dominant_material(&self, p: Vector3<f64>) -> usize {
        let mut max_value = self.value_at(p, 0);
        let mut max_label = 0;
        for i in 1..self.fields.len() {
            let value = self.value_at(p, i);
            if value > max_value {
                max_value = value;
                max_label = i;
            }
        }
        max_label
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::field::ConstantField;

    fn unit_box() -> BoundingBox {
        BoundingBox::at_origin(Vector3::new(1.0, 1.0, 1.0))
    }

    #[test]
    fn rejects_empty_and_mismatched() {
        assert!(matches!(Volume::new(vec![]), Err(Error::NoMaterials)));

        let a = Arc::new(ConstantField::new(0.0, unit_box()));
        let b = Arc::new(ConstantField::new(
            0.0,
            BoundingBox::at_origin(Vector3::new(2.0, 1.0, 1.0)),
        ));
        assert!(matches!(
            Volume::new(vec![a, b]),
            Err(Error::MismatchedBounds(1))
        ));
    }

    #[test]
    fn ties_break_to_lowest_index() {
        let a = Arc::new(ConstantField::new(1.0, unit_box()));
        let b = Arc::new(ConstantField::new(1.0, unit_box()));
        let c = Arc::new(ConstantField::new(0.5, unit_box()));
        let v = Volume::new(vec![a, b, c]).unwrap();
        assert_eq!(v.dominant_material(Vector3::new(0.5, 0.5, 0.5)), 0);
    }

    #[test]
    fn set_size_rescales_sampling() {
        let s = Arc::new(crate::field::SphereField::new(
            Vector3::new(0.5, 0.5, 0.5),
            0.2,
            unit_box(),
        ));
        let mut v = Volume::new(vec![s]).unwrap();
        v.set_size(10, 10, 10);
        // the sphere center now sits at (5,5,5) in volume coordinates
        assert!(v.value_at(Vector3::new(5.0, 5.0, 5.0), 0) > 0.0);
        assert!(v.value_at(Vector3::new(9.0, 5.0, 5.0), 0) < 0.0);
    }
}
