//! Stencil re-triangulation of cut tets
//!
//! After generalization every tet carries 15 interface slots:
//!
//! ```text
//!  0-3    lattice corners          A, B, C, D
//!  4-9    edge cuts                AB, AC, AD, BC, BD, CD
//! 10-13   face triples             BCD, ACD, ABD, ABC
//!  14     quadruple                ABCD
//! ```
//!
//! The stencil splits the tet into 24 sub-tets, six per material corner,
//! each spanning a corner, a cut, a triple and the quadruple.  Virtual
//! slots resolve (through snap roots) to coincident vertices, so their
//! sub-tets degenerate and are dropped; the survivors tile the tet
//! exactly.
use log::{info, warn};
use static_assertions::const_assert;

use crate::mesh::{Tet, TetMesh, VertexOrder};

const A: usize = 0;
const B: usize = 1;
const C: usize = 2;
const D: usize = 3;
const AB: usize = 4;
const AC: usize = 5;
const AD: usize = 6;
const BC: usize = 7;
const BD: usize = 8;
const CD: usize = 9;
const BCD: usize = 10;
const ACD: usize = 11;
const ABD: usize = 12;
const ABC: usize = 13;
const ABCD: usize = 14;

/// The 24 output sub-tets, as slot indices into the 15-slot vertex list
pub(crate) const STENCIL_TABLE: [[usize; 4]; 24] = [
    [ABCD, AB, ABD, A],
    [A, AB, ABC, ABCD],
    [ABCD, AC, ABC, A],
    [A, AD, ABD, ABCD],
    [ABCD, AD, ACD, A],
    [A, AC, ACD, ABCD],
    [B, BD, BCD, ABCD],
    [ABCD, BD, ABD, B],
    [B, AB, ABD, ABCD],
    [ABCD, BC, BCD, B],
    [B, BC, ABC, ABCD],
    [ABCD, AB, ABC, B],
    [C, BC, BCD, ABCD],
    [ABCD, BC, ABC, C],
    [C, AC, ABC, ABCD],
    [ABCD, CD, BCD, C],
    [C, CD, ACD, ABCD],
    [ABCD, AC, ACD, C],
    [D, CD, BCD, ABCD],
    [ABCD, CD, ACD, D],
    [D, AD, ACD, ABCD],
    [ABCD, BD, BCD, D],
    [D, BD, ABD, ABCD],
    [ABCD, AD, ABD, D],
];

/// Material corner for each stencil row
pub(crate) const MATERIAL_TABLE: [usize; 24] = [
    A, A, A, A, A, A, B, B, B, B, B, B, C, C, C, C, C, C, D, D, D, D, D, D,
];

/// The 12 (cut, triple) pairs that, joined to the quadruple, triangulate
/// the complete material interface inside a generalized tet
pub(crate) const COMPLETE_INTERFACE_TABLE: [[usize; 2]; 12] = [
    [AB, ABC],
    [AB, ABD],
    [AC, ABC],
    [AC, ACD],
    [AD, ABD],
    [AD, ACD],
    [BC, ABC],
    [BC, BCD],
    [BD, ABD],
    [BD, BCD],
    [CD, ACD],
    [CD, BCD],
];

const fn tables_are_consistent() -> bool {
    let mut i = 0;
    while i < 24 {
        let mut j = 0;
        let mut has_quad = false;
        while j < 4 {
            if STENCIL_TABLE[i][j] > ABCD {
                return false;
            }
            has_quad |= STENCIL_TABLE[i][j] == ABCD;
            j += 1;
        }
        // every sub-tet reaches the quadruple and its material corner
        if !has_quad || MATERIAL_TABLE[i] > D {
            return false;
        }
        i += 1;
    }
    true
}
const_assert!(tables_are_consistent());

/// The 15-slot vertex list for tet `t`, or `None` if generalization
/// failed to fill a slot
pub(crate) fn vertex_list(mesh: &TetMesh, t: usize) -> Option<[usize; 15]> {
    let tet = &mesh.tets[t];
    let mut out = [0; 15];
    out[..4].copy_from_slice(&tet.verts);
    for (i, &e) in tet.edges.iter().enumerate() {
        out[4 + i] = mesh.edges[e].cut?;
    }
    for (i, &f) in tet.faces.iter().enumerate() {
        out[10 + i] = mesh.faces[f].triple?;
    }
    out[14] = tet.quadruple?;
    Some(out)
}

/// Replaces every cut tet with its stencil sub-tets
///
/// A tet is stenciled if any of its edges carries a cut that was created
/// as one (snapped cuts still count; their sub-tets degenerate away on
/// their own).  Uncut tets pass through with the material of their first
/// corner.  Adjacency is invalidated and must be rebuilt by the caller.
pub fn stencil_background_tets(mesh: &mut TetMesh) {
    let mut out = Vec::with_capacity(mesh.tets.len());
    let mut split = 0;
    let mut kept = 0;

    for t in 0..mesh.tets.len() {
        let stencil = mesh.tets[t].edges.iter().any(|&e| {
            mesh.edges[e]
                .cut
                .is_some_and(|c| mesh.verts[c].order == VertexOrder::Cut)
        });

        let verts15 = if stencil {
            let v = vertex_list(mesh, t);
            if v.is_none() {
                warn!("tet {t} has unfilled interface slots; not splitting");
            }
            v
        } else {
            None
        };

        match verts15 {
            Some(verts15) => {
                split += 1;
                for (row, slots) in STENCIL_TABLE.iter().enumerate() {
                    let vs = slots.map(|s| mesh.root(verts15[s]));
                    let degenerate = (0..4).any(|i| {
                        (i + 1..4).any(|j| vs[i] == vs[j])
                    });
                    if degenerate {
                        continue;
                    }
                    let m = mesh.root(verts15[MATERIAL_TABLE[row]]);
                    out.push(Tet::new(vs, mesh.verts[m].label));
                }
            }
            None => {
                kept += 1;
                let tet = &mesh.tets[t];
                out.push(Tet::new(
                    tet.verts,
                    mesh.verts[tet.verts[0]].label,
                ));
            }
        }
    }

    mesh.tets = out;
    mesh.clear_adjacency();
    info!(
        "stenciled {split} tets, kept {kept}, {} total after splitting",
        mesh.tets.len()
    );
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::cleave::generalize_tets;
    use crate::mesh::Vertex;
    use approx::assert_relative_eq;
    use nalgebra::Vector3;

    fn labeled_tet() -> TetMesh {
        let verts = vec![
            Vertex::new(Vector3::new(0.0, 0.0, 0.0)),
            Vertex::new(Vector3::new(1.0, 0.0, 0.0)),
            Vertex::new(Vector3::new(0.0, 1.0, 0.0)),
            Vertex::new(Vector3::new(0.0, 0.0, 1.0)),
        ];
        let mut m = TetMesh::new(verts, vec![Tet::new([0, 1, 2, 3], 0)]);
        for (v, label) in m.verts.iter_mut().zip(0..) {
            v.label = label;
        }
        m.build_adjacency();
        m
    }

    fn fill_full_interface(m: &mut TetMesh) {
        let edges = m.tets[0].edges;
        for e in edges {
            let [a, b] = m.edges[e].verts;
            let mid = (m.verts[a].pos + m.verts[b].pos) * 0.5;
            let cut =
                m.push_vertex(Vertex::interface(mid, VertexOrder::Cut));
            m.edges[e].cut = Some(cut);
        }
        let faces = m.tets[0].faces;
        for f in faces {
            let [a, b, c] = m.faces[f].verts;
            let center =
                (m.verts[a].pos + m.verts[b].pos + m.verts[c].pos) / 3.0;
            let trip = m
                .push_vertex(Vertex::interface(center, VertexOrder::Triple));
            m.faces[f].triple = Some(trip);
        }
        let center = (m.verts[0].pos
            + m.verts[1].pos
            + m.verts[2].pos
            + m.verts[3].pos)
            / 4.0;
        let quad =
            m.push_vertex(Vertex::interface(center, VertexOrder::Quadruple));
        m.tets[0].quadruple = Some(quad);
    }

    #[test]
    fn uncut_tet_passes_through() {
        let mut m = labeled_tet();
        m.verts[1].label = 0;
        m.verts[2].label = 0;
        m.verts[3].label = 0;
        stencil_background_tets(&mut m);
        assert_eq!(m.tets.len(), 1);
        assert_eq!(m.tets[0].verts, [0, 1, 2, 3]);
        assert_eq!(m.tets[0].label, 0);
    }

    #[test]
    fn full_interface_splits_into_24() {
        let mut m = labeled_tet();
        fill_full_interface(&mut m);
        let total = m.tet_volume(0);
        stencil_background_tets(&mut m);

        assert_eq!(m.tets.len(), 24);
        let sum: f64 = (0..24).map(|t| m.tet_volume(t).abs()).sum();
        assert_relative_eq!(sum, total, epsilon = 1e-12);

        // six sub-tets per material corner
        for label in 0..4 {
            let n = m.tets.iter().filter(|t| t.label == label).count();
            assert_eq!(n, 6);
        }
    }

    #[test]
    fn generalized_tet_conserves_volume() {
        // corner 0 differs from the rest, so only its three edges are cut
        let mut m = labeled_tet();
        m.verts[0].label = 1;
        m.verts[1].label = 0;
        m.verts[2].label = 0;
        m.verts[3].label = 0;
        for (a, b) in [(0, 1), (0, 2), (0, 3)] {
            let e = m.tet_edge_between(0, a, b);
            let mid = (m.verts[a].pos + m.verts[b].pos) * 0.5;
            let cut =
                m.push_vertex(Vertex::interface(mid, VertexOrder::Cut));
            m.edges[e].cut = Some(cut);
        }
        generalize_tets(&mut m);
        let total = m.tet_volume(0);
        stencil_background_tets(&mut m);

        assert!(m.tets.len() > 1);
        let sum: f64 =
            (0..m.tets.len()).map(|t| m.tet_volume(t).abs()).sum();
        assert_relative_eq!(sum, total, epsilon = 1e-12);
        assert!(m.tets.iter().any(|t| t.label == 0));
        assert!(m.tets.iter().any(|t| t.label == 1));
    }
}
