//! Generalization to the full interface pattern
//!
//! The stencil stage assumes every tet carries 6 cuts, 4 triples and a
//! quadruple.  Tets with fewer real interfaces are generalized by filling
//! the missing slots with *virtual* interface vertices: references to
//! already-existing vertices (lattice corners or cuts) chosen so that the
//! degenerate stencil tets they produce collapse to zero volume and drop
//! out.  Virtual slots are recognized downstream by their root order being
//! lower than the slot expects.
use log::warn;

use crate::mesh::{TetMesh, VertexOrder};

/// Fills every tet's missing interface slots with virtual vertices
pub fn generalize_tets(mesh: &mut TetMesh) {
    let mut generalized = 0;
    for t in 0..mesh.tets.len() {
        if mesh.tets[t].quadruple.is_some() {
            continue;
        }
        generalize_tet(mesh, t);
        generalized += 1;
    }
    log::info!("generalized {generalized} tets");
}

fn generalize_tet(mesh: &mut TetMesh, t: usize) {
    let edges = mesh.tets[t].edges;
    let faces = mesh.tets[t].faces;

    // real cuts, counted before any virtual ones are added
    let cut_count = edges
        .iter()
        .filter(|&&e| {
            mesh.edges[e]
                .cut
                .is_some_and(|c| mesh.root_order(c) == VertexOrder::Cut)
        })
        .count();

    // virtual cut: the smaller-index endpoint stands in
    for &e in &edges {
        if mesh.edges[e].cut.is_none() {
            mesh.edges[e].cut = Some(mesh.edges[e].verts[0]);
        }
    }

    for &f in &faces {
        if mesh.faces[f].triple.is_none() {
            generalize_face(mesh, f);
        }
    }

    // virtual quadruple, keyed off the real cut pattern
    let triples: Vec<usize> = faces
        .iter()
        .map(|&f| mesh.faces[f].triple.unwrap_or(0))
        .collect();
    let orders: Vec<VertexOrder> =
        triples.iter().map(|&v| mesh.root_order(v)).collect();
    let shared =
        |f: usize| (0..4).any(|g| g != f && triples[g] == triples[f]);
    let quad = match cut_count {
        3 => (0..4).find(|&f| shared(f)),
        4 => (0..4)
            .find(|&f| orders[f] < VertexOrder::Triple && shared(f)),
        5 => (0..4).find(|&f| orders[f] == VertexOrder::Triple),
        _ => (0..4).find(|&f| orders[f] < VertexOrder::Triple),
    };
    match quad {
        Some(f) => mesh.tets[t].quadruple = Some(triples[f]),
        None => {
            warn!(
                "generalization failed for tet {t} with {cut_count} cuts"
            );
            mesh.tets[t].quadruple = Some(triples[0]);
        }
    }
}

/// Fills a face's missing triple with a virtual one
///
/// With exactly one virtual cut on the face, the interface curve enters
/// and leaves through the two real cuts, and the triple collapses onto
/// the real cut adjacent to the virtual cut's target vertex.  With three
/// virtual cuts there is no interface at all and the minimum-index corner
/// stands in.
fn generalize_face(mesh: &mut TetMesh, f: usize) {
    let edges = mesh.face_edges(f);
    let virtuals: Vec<usize> = (0..3)
        .filter(|&i| {
            let cut = mesh.edges[edges[i]].cut.unwrap_or(0);
            mesh.root_order(cut) != VertexOrder::Cut
        })
        .collect();

    let triple = match virtuals.len() {
        1 => {
            let v_e = virtuals[0];
            let target = mesh.edges[edges[v_e]].cut.unwrap_or(0);
            (0..3)
                .filter(|&i| i != v_e)
                .find(|&i| mesh.edges[edges[i]].verts.contains(&target))
                .and_then(|i| mesh.edges[edges[i]].cut)
        }
        3 => mesh.faces[f].verts.iter().min().copied(),
        n => {
            warn!("face {f} has {n} virtual cuts; collapsing onto a corner");
            mesh.faces[f].verts.iter().min().copied()
        }
    };
    mesh.faces[f].triple = triple;
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::mesh::{Tet, Vertex};
    use nalgebra::Vector3;

    fn cut_tet(cut_edges: &[(usize, usize)]) -> (TetMesh, usize) {
        let verts = vec![
            Vertex::new(Vector3::new(0.0, 0.0, 0.0)),
            Vertex::new(Vector3::new(1.0, 0.0, 0.0)),
            Vertex::new(Vector3::new(0.0, 1.0, 0.0)),
            Vertex::new(Vector3::new(0.0, 0.0, 1.0)),
        ];
        let mut m = TetMesh::new(verts, vec![Tet::new([0, 1, 2, 3], 0)]);
        m.build_adjacency();
        for &(a, b) in cut_edges {
            let e = m.tet_edge_between(0, a, b);
            let pa = m.verts[a].pos;
            let pb = m.verts[b].pos;
            let cut = m.push_vertex(Vertex::interface(
                (pa + pb) * 0.5,
                VertexOrder::Cut,
            ));
            m.edges[e].cut = Some(cut);
        }
        (m, 0)
    }

    #[test]
    fn uncut_tet_collapses_everything_onto_a_corner() {
        let (mut m, t) = cut_tet(&[]);
        generalize_tets(&mut m);
        for &e in &m.tets[t].edges {
            let cut = m.edges[e].cut.unwrap();
            assert_eq!(m.verts[cut].order, VertexOrder::Lattice);
            assert_eq!(cut, m.edges[e].verts[0]);
        }
        for &f in &m.tets[t].faces {
            let triple = m.faces[f].triple.unwrap();
            assert_eq!(triple, *m.faces[f].verts.iter().min().unwrap());
        }
        let quad = m.tets[t].quadruple.unwrap();
        assert_eq!(m.root_order(quad), VertexOrder::Lattice);
    }

    #[test]
    fn one_material_corner_generalizes_to_cut() {
        // vertex 0 differs: edges 01, 02, 03 are cut
        let (mut m, t) = cut_tet(&[(0, 1), (0, 2), (0, 3)]);
        generalize_tets(&mut m);

        // the face spanning (1,2,3) has no real cuts and collapses
        let f123 = m.tets[t].faces[0];
        let trip = m.faces[f123].triple.unwrap();
        assert_eq!(m.root_order(trip), VertexOrder::Lattice);

        // the three faces containing vertex 0 each have one virtual cut,
        // so their triples collapse onto real cuts
        for i in 1..4 {
            let f = m.tets[t].faces[i];
            let trip = m.faces[f].triple.unwrap();
            assert_eq!(m.root_order(trip), VertexOrder::Cut);
        }

        // quadruple lands on one of the shared face triples
        let quad = m.tets[t].quadruple.unwrap();
        assert!(m.root_order(quad) < VertexOrder::Quadruple);
    }

    #[test]
    fn every_slot_is_filled() {
        for cuts in [
            vec![],
            vec![(0usize, 1usize), (0, 2), (0, 3)],
            vec![(0, 1), (0, 2), (1, 2)],
            vec![(0, 1), (0, 2), (0, 3), (1, 2), (1, 3)],
        ] {
            let (mut m, t) = cut_tet(&cuts);
            generalize_tets(&mut m);
            for &e in &m.tets[t].edges {
                assert!(m.edges[e].cut.is_some());
            }
            for &f in &m.tets[t].faces {
                assert!(m.faces[f].triple.is_some());
            }
            assert!(m.tets[t].quadruple.is_some());
        }
    }
}
