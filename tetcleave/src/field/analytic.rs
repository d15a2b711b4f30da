//! Analytic test fields (sphere, plane, torus, blobby)
use nalgebra::Vector3;

use super::{BoundingBox, ScalarField};

/// Signed distance to a sphere, positive inside
pub struct SphereField {
    center: Vector3<f64>,
    radius: f64,
    bounds: BoundingBox,
}

impl SphereField {
    /// Builds a sphere indicator over the given bounds
    pub fn new(center: Vector3<f64>, radius: f64, bounds: BoundingBox) -> Self {
        Self {
            center,
            radius,
            bounds,
        }
    }
}

impl ScalarField for SphereField {
    fn value_at(&self, p: Vector3<f64>) -> f64 {
        self.radius - (p - self.center).norm()
    }
    fn bounds(&self) -> BoundingBox {
        self.bounds
    }
}

/// Signed distance to a plane `n·x + d = 0`, positive on the normal side
pub struct PlaneField {
    n: Vector3<f64>,
    d: f64,
    bounds: BoundingBox,
}

impl PlaneField {
    /// Builds a plane field from a (not necessarily unit) normal and offset
    pub fn new(n: Vector3<f64>, d: f64, bounds: BoundingBox) -> Self {
        Self { n, d, bounds }
    }

    /// Builds a plane field through three points
    pub fn through_points(
        p1: Vector3<f64>,
        p2: Vector3<f64>,
        p3: Vector3<f64>,
        bounds: BoundingBox,
    ) -> Self {
        let n = (p2 - p1).cross(&(p3 - p1)).normalize();
        Self {
            n,
            d: -n.dot(&p1),
            bounds,
        }
    }
}

impl ScalarField for PlaneField {
    fn value_at(&self, p: Vector3<f64>) -> f64 {
        (self.n.dot(&p) + self.d) / self.n.norm()
    }
    fn bounds(&self) -> BoundingBox {
        self.bounds
    }
}

/// Implicit torus, positive inside the tube
///
/// `major` is the ring radius in the y-z plane, `minor` the tube radius.
pub struct TorusField {
    center: Vector3<f64>,
    major: f64,
    minor: f64,
    bounds: BoundingBox,
}

impl TorusField {
    /// Builds a torus indicator centered at `center`
    pub fn new(
        center: Vector3<f64>,
        major: f64,
        minor: f64,
        bounds: BoundingBox,
    ) -> Self {
        Self {
            center,
            major,
            minor,
            bounds,
        }
    }
}

impl ScalarField for TorusField {
    fn value_at(&self, p: Vector3<f64>) -> f64 {
        let x = p - self.center;
        let ring = self.major - (x.y * x.y + x.z * x.z).sqrt();
        -(ring * ring + x.x * x.x - self.minor * self.minor)
    }
    fn bounds(&self) -> BoundingBox {
        self.bounds
    }
}

/// Sum of compact metaball kernels minus a threshold
pub struct BlobbyField {
    centers: Vec<Vector3<f64>>,
    a: f64,
    b: f64,
    threshold: f64,
    bounds: BoundingBox,
}

impl BlobbyField {
    /// Builds a blobby field from kernel centers
    ///
    /// `a` scales each kernel, `b` is its support radius, and `threshold`
    /// is subtracted from the summed field so the zero level set bounds the
    /// blob.
    pub fn new(
        centers: Vec<Vector3<f64>>,
        a: f64,
        b: f64,
        threshold: f64,
        bounds: BoundingBox,
    ) -> Self {
        Self {
            centers,
            a,
            b,
            threshold,
            bounds,
        }
    }

    fn kernel(&self, r: f64) -> f64 {
        if r < self.b / 3.0 {
            self.a * (1.0 - 3.0 * r * r / (self.b * self.b))
        } else if r <= self.b {
            let t = 1.0 - r / self.b;
            1.5 * self.a * t * t
        } else {
            0.0
        }
    }
}

impl ScalarField for BlobbyField {
    fn value_at(&self, p: Vector3<f64>) -> f64 {
        let mut d = 0.0;
        for c in &self.centers {
            d += self.kernel((c - p).norm());
        }
        d - self.threshold
    }
    fn bounds(&self) -> BoundingBox {
        self.bounds
    }
}
