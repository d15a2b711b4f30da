//! Tetrahedral mesh arena
//!
//! A [`TetMesh`] owns all vertices and tetrahedra as flat arenas addressed
//! by stable integer indices; every cross-reference (tet corners, snap
//! parents, interface vertices, incidence lists) is an index into those
//! arenas.  The mesh is mutated in place through every cleaving stage and
//! handed off read-only afterwards.
//!
//! Adjacency (edges, faces, incidence lists) lives in [`adjacency`] and is
//! built lazily; it can be rebuilt after stenciling replaces tets.
use arrayvec::ArrayVec;
use log::{debug, warn};
use nalgebra::Vector3;
use rayon::prelude::*;

mod adjacency;

pub use adjacency::{Edge, Face};

/// Classification of a vertex by the entity that created it
#[derive(
    Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, strum::Display,
)]
pub enum VertexOrder {
    /// Original background lattice vertex
    Lattice,
    /// Interface vertex on a cut edge
    Cut,
    /// Interface vertex on a face where three materials meet
    Triple,
    /// Interface vertex inside a tet where four materials meet
    Quadruple,
}

/// Geometry that an interface vertex was found to violate
///
/// Recorded during violation checking and consumed by the matching warp
/// phase; indices refer to the mesh arenas / adjacency tables.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Anchor {
    /// Violates the alpha region of a lattice vertex
    Vertex(usize),
    /// Violates the safety region of an edge
    Edge(usize),
    /// Violates the safety region of a face
    Face(usize),
}

/// A mesh vertex
///
/// Lattice vertices carry the sampled dominant material in `label`;
/// interface vertices carry the snap `parent` chain resolved through
/// [`TetMesh::root`].
#[derive(Clone, Debug)]
pub struct Vertex {
    /// Current position (mutated by warping)
    pub pos: Vector3<f64>,
    /// Staged position for the next warp commit
    pub pos_next: Vector3<f64>,
    /// What created this vertex
    pub order: VertexOrder,
    /// Materials meeting at this interface vertex (empty for lattice
    /// vertices), sorted ascending
    pub mats: ArrayVec<usize, 4>,
    /// Dominant material index (lattice vertices only)
    pub label: usize,
    /// Snap parent; `None` for a root vertex
    pub parent: Option<usize>,
    /// Set when the vertex violates some geometry's safety region
    pub violating: bool,
    /// The nearest violated geometry, when `violating`
    pub closest: Option<Anchor>,
    /// Set once the vertex has been moved by warping
    pub warped: bool,
    /// Lattice vertex outside the volume bounds
    pub exterior: bool,
    /// Edge this interface vertex was clamped onto, if any
    pub conformed_edge: Option<usize>,
    /// Face this interface vertex was clamped onto, if any
    pub conformed_face: Option<usize>,
}

impl Vertex {
    /// Builds a lattice vertex at `pos`
    pub fn new(pos: Vector3<f64>) -> Self {
        Self::interface(pos, VertexOrder::Lattice)
    }

    /// Builds an interface vertex of the given order
    pub fn interface(pos: Vector3<f64>, order: VertexOrder) -> Self {
        Self {
            pos,
            pos_next: pos,
            order,
            mats: ArrayVec::new(),
            label: 0,
            parent: None,
            violating: false,
            closest: None,
            warped: false,
            exterior: false,
            conformed_edge: None,
            conformed_face: None,
        }
    }
}

/// A tetrahedron: four vertex indices plus a material label
#[derive(Clone, Debug)]
pub struct Tet {
    /// Corner vertex indices, positively oriented when well-formed
    pub verts: [usize; 4],
    /// Material label
    pub label: usize,
    /// Edge indices in local order (01, 02, 03, 12, 13, 23); adjacency
    pub edges: [usize; 6],
    /// Face indices, `faces[i]` opposite `verts[i]`; adjacency
    pub faces: [usize; 4],
    /// Quadruple-point vertex, once generalized
    pub quadruple: Option<usize>,
    /// Interface geometry has been computed for this tet
    pub evaluated: bool,
}

impl Tet {
    /// Builds a tet from corner indices and a material label
    pub fn new(verts: [usize; 4], label: usize) -> Self {
        Self {
            verts,
            label,
            edges: [usize::MAX; 6],
            faces: [usize::MAX; 4],
            quadruple: None,
            evaluated: false,
        }
    }

    /// Local index (0-3) of vertex `v`, if it is a corner of this tet
    pub fn index_of(&self, v: usize) -> Option<usize> {
        self.verts.iter().position(|&w| w == v)
    }
}

/// Pairs of local corner indices for the six tet edges, in the fixed
/// local order 01, 02, 03, 12, 13, 23
pub const TET_EDGES: [[usize; 2]; 6] =
    [[0, 1], [0, 2], [0, 3], [1, 2], [1, 3], [2, 3]];

/// Local corner indices of the face opposite each corner
pub const TET_FACES: [[usize; 3]; 4] =
    [[1, 2, 3], [0, 2, 3], [0, 1, 3], [0, 1, 2]];

/// Arena-backed tetrahedral mesh
pub struct TetMesh {
    /// Vertex arena
    pub verts: Vec<Vertex>,
    /// Tet arena
    pub tets: Vec<Tet>,

    /// Edge arena (built by [`TetMesh::build_adjacency`])
    pub edges: Vec<Edge>,
    /// Face arena (built by [`TetMesh::build_adjacency`])
    pub faces: Vec<Face>,
    vert_tets: Vec<Vec<usize>>,

    /// Minimum dihedral angle in degrees; set by [`TetMesh::compute_angles`]
    pub min_angle: f64,
    /// Maximum dihedral angle in degrees; set by [`TetMesh::compute_angles`]
    pub max_angle: f64,
}

impl TetMesh {
    /// Builds a mesh from pre-existing vertex and tet arenas
    pub fn new(verts: Vec<Vertex>, tets: Vec<Tet>) -> Self {
        Self {
            verts,
            tets,
            edges: vec![],
            faces: vec![],
            vert_tets: vec![],
            min_angle: 0.0,
            max_angle: 180.0,
        }
    }

    /// Number of vertices
    pub fn vertex_count(&self) -> usize {
        self.verts.len()
    }

    /// Number of tets
    pub fn tet_count(&self) -> usize {
        self.tets.len()
    }

    /// Appends a vertex, returning its index
    pub fn push_vertex(&mut self, v: Vertex) -> usize {
        self.verts.push(v);
        self.verts.len() - 1
    }

    /// Resolves the snap-parent chain of `v` to its root vertex
    ///
    /// A vertex with no parent is its own root.  Chains are short (snapping
    /// only ever points at vertices snapped earlier), so a simple walk
    /// suffices.
    pub fn root(&self, mut v: usize) -> usize {
        while let Some(p) = self.verts[v].parent {
            v = p;
        }
        v
    }

    /// Position of the root of `v`
    pub fn root_pos(&self, v: usize) -> Vector3<f64> {
        self.verts[self.root(v)].pos
    }

    /// Order of the root of `v`
    ///
    /// Snapping demotes interface vertices: a cut whose root is a lattice
    /// vertex no longer counts as a cut.
    pub fn root_order(&self, v: usize) -> VertexOrder {
        self.verts[self.root(v)].order
    }

    /// True if `a` and `b` resolve to the same root vertex
    pub fn same_vertex(&self, a: usize, b: usize) -> bool {
        self.root(a) == self.root(b)
    }

    /// Signed volume of the tet spanned by four positions
    ///
    /// Positive for a positively-oriented (right-handed) tet.
    pub fn signed_volume(
        a: Vector3<f64>,
        b: Vector3<f64>,
        c: Vector3<f64>,
        d: Vector3<f64>,
    ) -> f64 {
        (b - a).cross(&(c - a)).dot(&(d - a)) / 6.0
    }

    /// Signed volume of tet `t` at current vertex positions
    pub fn tet_volume(&self, t: usize) -> f64 {
        let v = &self.tets[t].verts;
        Self::signed_volume(
            self.verts[v[0]].pos,
            self.verts[v[1]].pos,
            self.verts[v[2]].pos,
            self.verts[v[3]].pos,
        )
    }

    /// Computes the mesh-wide dihedral angle extrema, in degrees
    ///
    /// Stores the result in `min_angle` / `max_angle` and returns it.
    /// Zero-volume tets are skipped.
    pub fn compute_angles(&mut self) -> (f64, f64) {
        let verts = &self.verts;
        let (min, max) = self
            .tets
            .par_iter()
            .map(|tet| {
                let p: Vec<_> =
                    tet.verts.iter().map(|&v| verts[v].pos).collect();
                let mut lo = f64::INFINITY;
                let mut hi = f64::NEG_INFINITY;
                for i in 0..3 {
                    for j in (i + 1)..4 {
                        let ni = face_normal(&p, i);
                        let nj = face_normal(&p, j);
                        if ni.norm() < 1e-14 || nj.norm() < 1e-14 {
                            continue;
                        }
                        let dot = (ni.normalize().dot(&nj.normalize()))
                            .clamp(-1.0, 1.0);
                        let angle = 180.0 - dot.acos().to_degrees();
                        lo = lo.min(angle);
                        hi = hi.max(angle);
                    }
                }
                (lo, hi)
            })
            .reduce(
                || (f64::INFINITY, f64::NEG_INFINITY),
                |a, b| (a.0.min(b.0), a.1.max(b.1)),
            );
        self.min_angle = min;
        self.max_angle = max;
        (min, max)
    }

    /// Repairs negatively-oriented tets by swapping two corners
    ///
    /// Returns the number of tets reordered.  Runs a bounded number of
    /// passes; a tet that stays inverted after reordering indicates true
    /// geometric inversion and is left for the quality report.
    pub fn fix_vertex_windup(&mut self) -> usize {
        let mut fixed = 0;
        for pass in 0..2 {
            let mut flipped = 0;
            for t in 0..self.tets.len() {
                if self.tet_volume(t) < 0.0 {
                    self.tets[t].verts.swap(2, 3);
                    flipped += 1;
                }
            }
            fixed += flipped;
            debug!("windup pass {pass}: reordered {flipped} tets");
            if flipped == 0 {
                break;
            }
        }
        let inverted =
            (0..self.tets.len()).filter(|&t| self.tet_volume(t) < 0.0).count();
        if inverted > 0 {
            warn!("{inverted} tets remain inverted after windup repair");
        }
        fixed
    }

    /// Drops every tet carrying the given material label
    ///
    /// Used to strip the synthetic exterior material after cleaving.
    /// Adjacency is invalidated and must be rebuilt.
    pub fn remove_tets_with_label(&mut self, label: usize) {
        let before = self.tets.len();
        self.tets.retain(|t| t.label != label);
        debug!(
            "removed {} tets with label {label}",
            before - self.tets.len()
        );
        self.clear_adjacency();
    }

    /// Rebuilds the vertex arena keeping only vertices referenced by tets
    ///
    /// Vertices are renumbered in order of first appearance in the tet
    /// list; snap parents are discarded (callers must resolve roots before
    /// compacting).  Adjacency is invalidated and must be rebuilt.
    pub fn compact_vertices(&mut self) {
        let mut remap = vec![usize::MAX; self.verts.len()];
        let mut verts = vec![];
        for tet in &mut self.tets {
            for v in &mut tet.verts {
                if remap[*v] == usize::MAX {
                    remap[*v] = verts.len();
                    let mut vert = self.verts[*v].clone();
                    vert.parent = None;
                    verts.push(vert);
                }
                *v = remap[*v];
            }
        }
        debug!(
            "compacted vertex arena: {} of {} kept",
            verts.len(),
            self.verts.len()
        );
        self.verts = verts;
        self.clear_adjacency();
    }
}

/// Outward normal (unnormalized) of the face opposite corner `i`
fn face_normal(p: &[Vector3<f64>], i: usize) -> Vector3<f64> {
    let f = TET_FACES[i];
    let n = (p[f[1]] - p[f[0]]).cross(&(p[f[2]] - p[f[0]]));
    // orient away from the opposite corner
    if n.dot(&(p[i] - p[f[0]])) > 0.0 { -n } else { n }
}

#[cfg(test)]
mod test {
    use super::*;
    use approx::assert_relative_eq;

    pub(crate) fn single_tet() -> TetMesh {
        let verts = vec![
            Vertex::new(Vector3::new(0.0, 0.0, 0.0)),
            Vertex::new(Vector3::new(1.0, 0.0, 0.0)),
            Vertex::new(Vector3::new(0.0, 1.0, 0.0)),
            Vertex::new(Vector3::new(0.0, 0.0, 1.0)),
        ];
        let tets = vec![Tet::new([0, 1, 2, 3], 0)];
        TetMesh::new(verts, tets)
    }

    #[test]
    fn signed_volume_orientation() {
        let m = single_tet();
        assert_relative_eq!(m.tet_volume(0), 1.0 / 6.0);
    }

    #[test]
    fn windup_repair_flips_inverted_tets() {
        let mut m = single_tet();
        m.tets[0].verts = [0, 2, 1, 3]; // inverted
        assert!(m.tet_volume(0) < 0.0);
        assert_eq!(m.fix_vertex_windup(), 1);
        assert!(m.tet_volume(0) > 0.0);
    }

    #[test]
    fn regular_tet_dihedral_angles() {
        // equilateral tet: all dihedrals are acos(1/3) ≈ 70.53°
        let verts = vec![
            Vertex::new(Vector3::new(1.0, 1.0, 1.0)),
            Vertex::new(Vector3::new(1.0, -1.0, -1.0)),
            Vertex::new(Vector3::new(-1.0, 1.0, -1.0)),
            Vertex::new(Vector3::new(-1.0, -1.0, 1.0)),
        ];
        let mut m = TetMesh::new(verts, vec![Tet::new([0, 1, 2, 3], 0)]);
        let (lo, hi) = m.compute_angles();
        assert_relative_eq!(lo, 70.528779, epsilon = 1e-5);
        assert_relative_eq!(hi, 70.528779, epsilon = 1e-5);
    }

    #[test]
    fn root_follows_parent_chain() {
        let mut m = single_tet();
        let a = m.push_vertex(Vertex::interface(
            Vector3::zeros(),
            VertexOrder::Cut,
        ));
        let b = m.push_vertex(Vertex::interface(
            Vector3::zeros(),
            VertexOrder::Triple,
        ));
        m.verts[b].parent = Some(a);
        m.verts[a].parent = Some(0);
        assert_eq!(m.root(b), 0);
        assert_eq!(m.root(1), 1);
    }
}
