//! Discretized voxel-grid field with trilinear interpolation
use nalgebra::Vector3;

use super::{BoundingBox, ScalarField};
use crate::Error;

/// A node-centered voxel grid sampled with trilinear interpolation
///
/// Data is stored x-fastest (`data[i + j*w + k*w*h]`), with sample `(i,j,k)`
/// located at position `(i,j,k)` in field space; the bounds therefore span
/// `(w-1, h-1, d-1)`.  Out-of-bounds queries clamp to the boundary sample.
pub struct GridField {
    data: Vec<f32>,
    w: usize,
    h: usize,
    d: usize,
    bounds: BoundingBox,
}

impl GridField {
    /// Builds a grid field, checking that the data length matches `w*h*d`
    pub fn new(data: Vec<f32>, w: usize, h: usize, d: usize) -> Result<Self, Error> {
        if data.len() != w * h * d || w < 2 || h < 2 || d < 2 {
            return Err(Error::BadGridSize(data.len(), w, h, d));
        }
        let bounds = BoundingBox::at_origin(Vector3::new(
            (w - 1) as f64,
            (h - 1) as f64,
            (d - 1) as f64,
        ));
        Ok(Self { data, w, h, d, bounds })
    }

    /// Builds a grid field by sampling `f` at every node
    pub fn from_fn<F: Fn(usize, usize, usize) -> f32>(
        w: usize,
        h: usize,
        d: usize,
        f: F,
    ) -> Result<Self, Error> {
        let mut data = Vec::with_capacity(w * h * d);
        for k in 0..d {
            for j in 0..h {
                for i in 0..w {
                    data.push(f(i, j, k));
                }
            }
        }
        Self::new(data, w, h, d)
    }

    fn at(&self, i: usize, j: usize, k: usize) -> f64 {
        self.data[i + j * self.w + k * self.w * self.h] as f64
    }
}

impl ScalarField for GridField {
    fn value_at(&self, p: Vector3<f64>) -> f64 {
        let cx = p.x.clamp(0.0, (self.w - 1) as f64);
        let cy = p.y.clamp(0.0, (self.h - 1) as f64);
        let cz = p.z.clamp(0.0, (self.d - 1) as f64);

        let i = (cx.floor() as usize).min(self.w - 2);
        let j = (cy.floor() as usize).min(self.h - 2);
        let k = (cz.floor() as usize).min(self.d - 2);

        let t = cx - i as f64;
        let u = cy - j as f64;
        let v = cz - k as f64;

        let c00 = self.at(i, j, k) * (1.0 - t) + self.at(i + 1, j, k) * t;
        let c10 = self.at(i, j + 1, k) * (1.0 - t) + self.at(i + 1, j + 1, k) * t;
        let c01 = self.at(i, j, k + 1) * (1.0 - t) + self.at(i + 1, j, k + 1) * t;
        let c11 =
            self.at(i, j + 1, k + 1) * (1.0 - t) + self.at(i + 1, j + 1, k + 1) * t;

        let c0 = c00 * (1.0 - u) + c10 * u;
        let c1 = c01 * (1.0 - u) + c11 * u;
        c0 * (1.0 - v) + c1 * v
    }

    fn bounds(&self) -> BoundingBox {
        self.bounds
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn rejects_bad_dimensions() {
        assert!(GridField::new(vec![0.0; 7], 2, 2, 2).is_err());
        assert!(GridField::new(vec![0.0; 8], 2, 2, 2).is_ok());
    }

    #[test]
    fn interpolates_linearly() {
        // f(x,y,z) = x over a 2x2x2 grid
        let g = GridField::from_fn(2, 2, 2, |i, _, _| i as f32).unwrap();
        assert_relative_eq!(g.value_at(Vector3::new(0.25, 0.5, 0.5)), 0.25);
        assert_relative_eq!(g.value_at(Vector3::new(1.0, 0.0, 1.0)), 1.0);
    }

    #[test]
    fn clamps_out_of_bounds() {
        let g = GridField::from_fn(3, 3, 3, |i, _, _| i as f32).unwrap();
        assert_relative_eq!(g.value_at(Vector3::new(-5.0, 1.0, 1.0)), 0.0);
        assert_relative_eq!(g.value_at(Vector3::new(9.0, 1.0, 1.0)), 2.0);
    }
}
