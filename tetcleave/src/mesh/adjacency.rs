//! Bottom-up incidence structures (vertex→tet, edge, face)
//!
//! Edges and faces are derived entities: they exist only as incidence
//! records rebuilt from the tet list, never persisted independently.  The
//! interface-vertex slots (`cut`, `triple`) attached to them are the dedup
//! keys guaranteeing exactly-once interface vertex creation.
use std::collections::HashMap;

use arrayvec::ArrayVec;
use log::debug;

use super::{TET_EDGES, TET_FACES, TetMesh};

/// An undirected mesh edge
#[derive(Clone, Debug)]
pub struct Edge {
    /// Endpoint vertex indices, `verts[0] < verts[1]`
    pub verts: [usize; 2],
    /// Alpha safety parameter toward each endpoint
    pub alphas: [f64; 2],
    /// Axis-aligned lattice edge (long) vs diagonal (short)
    pub long: bool,
    /// Cut interface vertex; points at a lattice vertex when virtual
    pub cut: Option<usize>,
    /// Cut computation has run for this edge
    pub evaluated: bool,
}

impl Edge {
    /// Alpha parameter measured from endpoint `v`
    pub fn alpha_for(&self, v: usize) -> f64 {
        if v == self.verts[0] { self.alphas[0] } else { self.alphas[1] }
    }

    /// Sets the alpha parameter measured from endpoint `v`
    pub fn set_alpha_for(&mut self, v: usize, alpha: f64) {
        if v == self.verts[0] {
            self.alphas[0] = alpha;
        } else {
            self.alphas[1] = alpha;
        }
    }

    /// The endpoint that isn't `v`
    pub fn other(&self, v: usize) -> usize {
        if v == self.verts[0] { self.verts[1] } else { self.verts[0] }
    }
}

/// A triangular mesh face, shared by at most two tets
#[derive(Clone, Debug)]
pub struct Face {
    /// Corner vertex indices, sorted ascending
    pub verts: [usize; 3],
    /// Incident tets (1 on the boundary, 2 in the interior)
    pub tets: ArrayVec<usize, 2>,
    /// Triple-point interface vertex; points at a cut when virtual
    pub triple: Option<usize>,
    /// Triple computation has run for this face
    pub evaluated: bool,
}

impl TetMesh {
    /// Builds vertex→tet incidence plus the edge and face arenas
    ///
    /// Re-callable after the tet list changes (stenciling); any previous
    /// edge/face interface data is discarded.
    pub fn build_adjacency(&mut self) {
        self.clear_adjacency();
        self.vert_tets = vec![vec![]; self.verts.len()];

        let mut edge_map: HashMap<(usize, usize), usize> = HashMap::new();
        let mut face_map: HashMap<[usize; 3], usize> = HashMap::new();

        for t in 0..self.tets.len() {
            let vs = self.tets[t].verts;
            for &v in &vs {
                self.vert_tets[v].push(t);
            }

            for (e, [a, b]) in TET_EDGES.iter().enumerate() {
                let (lo, hi) = if vs[*a] < vs[*b] {
                    (vs[*a], vs[*b])
                } else {
                    (vs[*b], vs[*a])
                };
                let id = *edge_map.entry((lo, hi)).or_insert_with(|| {
                    self.edges.push(Edge {
                        verts: [lo, hi],
                        alphas: [0.0, 0.0],
                        long: false,
                        cut: None,
                        evaluated: false,
                    });
                    self.edges.len() - 1
                });
                self.tets[t].edges[e] = id;
            }

            for (f, tri) in TET_FACES.iter().enumerate() {
                let mut key = [vs[tri[0]], vs[tri[1]], vs[tri[2]]];
                key.sort_unstable();
                let id = *face_map.entry(key).or_insert_with(|| {
                    self.faces.push(Face {
                        verts: key,
                        tets: ArrayVec::new(),
                        triple: None,
                        evaluated: false,
                    });
                    self.faces.len() - 1
                });
                if !self.faces[id].tets.contains(&t) {
                    self.faces[id].tets.push(t);
                }
                self.tets[t].faces[f] = id;
            }
        }
        debug!(
            "adjacency built: {} edges, {} faces over {} tets",
            self.edges.len(),
            self.faces.len(),
            self.tets.len()
        );
    }

    /// True once [`TetMesh::build_adjacency`] has run for the current tets
    pub fn has_adjacency(&self) -> bool {
        !self.vert_tets.is_empty()
    }

    pub(crate) fn clear_adjacency(&mut self) {
        self.edges.clear();
        self.faces.clear();
        self.vert_tets.clear();
    }

    /// Tets incident to vertex `v`
    pub fn tets_around_vertex(&self, v: usize) -> &[usize] {
        &self.vert_tets[v]
    }

    /// Edges incident to vertex `v`, via its incident tets
    pub fn edges_around_vertex(&self, v: usize) -> Vec<usize> {
        let mut out = vec![];
        for &t in &self.vert_tets[v] {
            for &e in &self.tets[t].edges {
                if self.edges[e].verts.contains(&v) && !out.contains(&e) {
                    out.push(e);
                }
            }
        }
        out
    }

    /// Faces incident to vertex `v`, via its incident tets
    pub fn faces_around_vertex(&self, v: usize) -> Vec<usize> {
        let mut out = vec![];
        for &t in &self.vert_tets[v] {
            for &f in &self.tets[t].faces {
                if self.faces[f].verts.contains(&v) && !out.contains(&f) {
                    out.push(f);
                }
            }
        }
        out
    }

    /// Edge indices of face `f`, with `edges[i]` opposite `verts[i]`
    pub fn face_edges(&self, f: usize) -> [usize; 3] {
        let face = &self.faces[f];
        let t = face.tets[0];
        let [a, b, c] = face.verts;
        [
            self.tet_edge_between(t, b, c),
            self.tet_edge_between(t, a, c),
            self.tet_edge_between(t, a, b),
        ]
    }

    /// Tets incident to edge `e` (both endpoints are corners)
    pub fn tets_around_edge(&self, e: usize) -> Vec<usize> {
        let [a, b] = self.edges[e].verts;
        self.vert_tets[a]
            .iter()
            .copied()
            .filter(|&t| self.tets[t].verts.contains(&b))
            .collect()
    }

    /// Faces incident to edge `e`
    pub fn faces_around_edge(&self, e: usize) -> Vec<usize> {
        let [a, b] = self.edges[e].verts;
        let mut out = vec![];
        for &t in &self.vert_tets[a] {
            if !self.tets[t].verts.contains(&b) {
                continue;
            }
            for &f in &self.tets[t].faces {
                if self.faces[f].verts.contains(&a)
                    && self.faces[f].verts.contains(&b)
                    && !out.contains(&f)
                {
                    out.push(f);
                }
            }
        }
        out
    }

    /// The two faces of tet `t` that contain edge `e`
    pub fn tet_faces_with_edge(&self, t: usize, e: usize) -> [usize; 2] {
        let [a, b] = self.edges[e].verts;
        let mut out = ArrayVec::<usize, 2>::new();
        for &f in &self.tets[t].faces {
            if self.faces[f].verts.contains(&a) && self.faces[f].verts.contains(&b)
            {
                out.push(f);
            }
        }
        [out[0], out[1]]
    }

    /// The neighbor of tet `t` across face `f`, if any
    pub fn opposite_tet_across_face(&self, t: usize, f: usize) -> Option<usize> {
        self.faces[f].tets.iter().copied().find(|&u| u != t)
    }

    /// Edge index of tet `t` joining vertices `a` and `b`
    pub fn tet_edge_between(&self, t: usize, a: usize, b: usize) -> usize {
        let tet = &self.tets[t];
        for &e in &tet.edges {
            let vs = self.edges[e].verts;
            if vs.contains(&a) && vs.contains(&b) {
                return e;
            }
        }
        unreachable!("vertices {a}, {b} are not an edge of tet {t}")
    }
}

#[cfg(test)]
mod test {
    use super::super::{Tet, TetMesh, Vertex};
    use nalgebra::Vector3;

    fn two_tets() -> TetMesh {
        // two tets sharing the face (0,1,2)
        let verts = vec![
            Vertex::new(Vector3::new(0.0, 0.0, 0.0)),
            Vertex::new(Vector3::new(1.0, 0.0, 0.0)),
            Vertex::new(Vector3::new(0.0, 1.0, 0.0)),
            Vertex::new(Vector3::new(0.0, 0.0, 1.0)),
            Vertex::new(Vector3::new(0.4, 0.4, -1.0)),
        ];
        let tets =
            vec![Tet::new([0, 1, 2, 3], 0), Tet::new([0, 2, 1, 4], 0)];
        let mut m = TetMesh::new(verts, tets);
        m.build_adjacency();
        m
    }

    #[test]
    fn shared_face_is_deduplicated() {
        let m = two_tets();
        // 16 face slots minus one shared face
        assert_eq!(m.faces.len(), 7);
        let shared = m
            .faces
            .iter()
            .position(|f| f.verts == [0, 1, 2])
            .unwrap();
        assert_eq!(m.faces[shared].tets.len(), 2);
        assert_eq!(m.opposite_tet_across_face(0, shared), Some(1));
        assert_eq!(m.opposite_tet_across_face(1, shared), Some(0));
    }

    #[test]
    fn edge_incidence_is_symmetric() {
        let m = two_tets();
        assert_eq!(m.edges.len(), 9); // 6 in the first tet, 3 new in the second
        let e01 = m.tet_edge_between(0, 0, 1);
        assert_eq!(m.tets_around_edge(e01), vec![0, 1]);
        assert_eq!(m.tets_around_vertex(3), &[0]);
        assert_eq!(m.tets_around_vertex(0), &[0, 1]);
    }

    #[test]
    fn rebuild_is_idempotent() {
        let mut m = two_tets();
        let edges = m.edges.len();
        let faces = m.faces.len();
        m.build_adjacency();
        assert_eq!(m.edges.len(), edges);
        assert_eq!(m.faces.len(), faces);
    }

    #[test]
    fn faces_with_edge() {
        let m = two_tets();
        let e01 = m.tet_edge_between(0, 0, 1);
        let fs = m.tet_faces_with_edge(0, e01);
        for f in fs {
            assert!(m.faces[f].verts.contains(&0));
            assert!(m.faces[f].verts.contains(&1));
        }
        assert_eq!(m.faces_around_edge(e01).len(), 3);
    }
}
