//! Violation checks for interface vertices
//!
//! An interface vertex violates a lattice entity when it falls inside the
//! entity's alpha safety region; warping would otherwise produce a sliver
//! or inverted tet there.  Each check records the result on the interface
//! vertex (`violating` plus the `closest` anchor the matching warp phase
//! consumes).
//!
//! Every plane test orients its normal against an explicit reference point
//! on the violating side, so the checks hold for either tet winding.
use nalgebra::Vector3;

use crate::mesh::{Anchor, TetMesh, VertexOrder};

/// Re-checks a real cut against its edge endpoints' alpha regions
pub fn check_cut_violates_vertices(mesh: &mut TetMesh, e: usize) {
    let Some(cut) = mesh.edges[e].cut else { return };
    if mesh.root_order(cut) != VertexOrder::Cut {
        return;
    }
    let [a, b] = mesh.edges[e].verts;
    let pa = mesh.verts[a].pos;
    let pb = mesh.verts[b].pos;
    let t = (mesh.root_pos(cut) - pa).norm() / (pb - pa).norm();

    let cut_vert = &mut mesh.verts[cut];
    if t <= mesh.edges[e].alphas[0] {
        cut_vert.violating = true;
        cut_vert.closest = Some(Anchor::Vertex(a));
    } else if t >= 1.0 - mesh.edges[e].alphas[1] {
        cut_vert.violating = true;
        cut_vert.closest = Some(Anchor::Vertex(b));
    } else {
        cut_vert.violating = false;
        cut_vert.closest = None;
    }
}

/// Checks a triple point against the three corner alpha regions of its
/// face
///
/// A corner's region is the cone spanned by the alpha crossings on its two
/// incident face edges; the triple violates the first corner whose cone
/// contains it.
pub fn check_triple_violates_vertices(mesh: &mut TetMesh, f: usize) {
    let Some(triple) = mesh.faces[f].triple else { return };
    if mesh.root_order(triple) != VertexOrder::Triple {
        return;
    }
    mesh.verts[triple].violating = false;
    mesh.verts[triple].closest = None;

    let verts = mesh.faces[f].verts;
    let edges = mesh.face_edges(f);
    let trip = mesh.root_pos(triple);

    for i in 0..3 {
        let a = verts[i];
        let b = verts[(i + 1) % 3];
        let c = verts[(i + 2) % 3];
        let pa = mesh.verts[a].pos;
        let pb = mesh.verts[b].pos;
        let pc = mesh.verts[c].pos;

        // edges[(i+2)%3] joins a and b; edges[(i+1)%3] joins a and c
        let alpha_ab = mesh.edges[edges[(i + 2) % 3]].alpha_for(a);
        let alpha_ac = mesh.edges[edges[(i + 1) % 3]].alpha_for(a);
        let cross_ab = pa * (1.0 - alpha_ab) + pb * alpha_ab;
        let cross_ac = pa * (1.0 - alpha_ac) + pc * alpha_ac;

        let e1 = (pa - pc).normalize();
        let e2 = (pa - pb).normalize();
        let in_cone = e1.dot(&(trip - pc).normalize())
            >= e1.dot(&(cross_ab - pc).normalize())
            && e2.dot(&(trip - pb).normalize())
                >= e2.dot(&(cross_ac - pb).normalize());
        if in_cone {
            mesh.verts[triple].violating = true;
            mesh.verts[triple].closest = Some(Anchor::Vertex(a));
            return;
        }
    }
}

/// Checks a triple point against the three edge alpha regions of its face
///
/// Violating edges compete by angular distance; the closest one wins.
pub fn check_triple_violates_edges(mesh: &mut TetMesh, f: usize) {
    let Some(triple) = mesh.faces[f].triple else { return };
    if mesh.root_order(triple) != VertexOrder::Triple {
        return;
    }
    mesh.verts[triple].violating = false;
    mesh.verts[triple].closest = None;

    let verts = mesh.faces[f].verts;
    let edges = mesh.face_edges(f);
    let trip = mesh.root_pos(triple);

    let mut d_min = f64::INFINITY;
    for i in 0..3 {
        // edges[i] joins b and c; a is the opposite corner
        let a = verts[i];
        let b = verts[(i + 1) % 3];
        let c = verts[(i + 2) % 3];
        let pa = mesh.verts[a].pos;
        let pb = mesh.verts[b].pos;
        let pc = mesh.verts[c].pos;

        let alpha_ca = mesh.edges[edges[(i + 1) % 3]].alpha_for(c);
        let alpha_ba = mesh.edges[edges[(i + 2) % 3]].alpha_for(b);
        let cross_ca = pc * (1.0 - alpha_ca) + pa * alpha_ca;
        let cross_ba = pb * (1.0 - alpha_ba) + pa * alpha_ba;

        let e1 = (pc - pb).normalize();
        let e2 = (pb - pc).normalize();
        let t1 = (trip - pb).normalize();
        let t2 = (trip - pc).normalize();
        let c1 = (cross_ca - pb).normalize();
        let c2 = (cross_ba - pc).normalize();

        if e1.dot(&t1) > e1.dot(&c1) || e2.dot(&t2) > e2.dot(&c2) {
            let dot1 = e1.dot(&t1).clamp(-1.0, 1.0);
            let dot2 = e2.dot(&t2).clamp(-1.0, 1.0);
            let d = dot1.max(dot2).acos();
            if d < d_min {
                d_min = d;
                mesh.verts[triple].violating = true;
                mesh.verts[triple].closest = Some(Anchor::Edge(edges[i]));
            }
        }
    }
}

/// Normal of the plane through `p`, `q`, `r`, flipped so that `reference`
/// lies on the positive side
fn oriented_plane_normal(
    p: Vector3<f64>,
    q: Vector3<f64>,
    r: Vector3<f64>,
    reference: Vector3<f64>,
) -> Vector3<f64> {
    let n = (q - p).cross(&(r - p)).normalize();
    if n.dot(&(reference - p)) < 0.0 { -n } else { n }
}

/// Checks a quadruple point against the four corner alpha regions of its
/// tet
///
/// Each corner region is bounded by three planes through the alpha
/// crossings on the corner's incident edges; the quadruple violates the
/// corner whose region strictly contains it.
pub fn check_quad_violates_vertices(mesh: &mut TetMesh, t: usize) {
    let Some(quad) = mesh.tets[t].quadruple else { return };
    if mesh.root_order(quad) != VertexOrder::Quadruple {
        return;
    }
    mesh.verts[quad].violating = false;
    mesh.verts[quad].closest = None;

    let verts = mesh.tets[t].verts;
    let q = mesh.root_pos(quad);

    for i in 0..4 {
        let vi = verts[i];
        let pi = mesh.verts[vi].pos;
        let others: Vec<usize> = (0..4).filter(|&j| j != i).collect();

        let mut inside = true;
        for m in 0..3 {
            let j = others[m];
            let k = others[(m + 1) % 3];
            let l = others[(m + 2) % 3];
            let e = mesh.tet_edge_between(t, vi, verts[j]);
            let alpha = mesh.edges[e].alpha_for(vi);
            let ev =
                pi * (1.0 - alpha) + mesh.verts[verts[j]].pos * alpha;
            let n = oriented_plane_normal(
                ev,
                mesh.verts[verts[k]].pos,
                mesh.verts[verts[l]].pos,
                pi,
            );
            if n.dot(&(q - ev)) <= 0.0 {
                inside = false;
                break;
            }
        }
        if inside {
            mesh.verts[quad].violating = true;
            mesh.verts[quad].closest = Some(Anchor::Vertex(vi));
            return;
        }
    }
}

/// Checks a quadruple point against the six edge alpha regions of its tet
///
/// An edge region is the wedge between two planes, each through one
/// endpoint and the alpha crossings leaving the other endpoint toward the
/// two off-edge corners.
pub fn check_quad_violates_edges(mesh: &mut TetMesh, t: usize) {
    let Some(quad) = mesh.tets[t].quadruple else { return };
    if mesh.root_order(quad) != VertexOrder::Quadruple {
        return;
    }
    mesh.verts[quad].violating = false;
    mesh.verts[quad].closest = None;

    let verts = mesh.tets[t].verts;
    let q = mesh.root_pos(quad);

    for (e_local, [la, lb]) in crate::mesh::TET_EDGES.iter().enumerate() {
        let a = verts[*la];
        let b = verts[*lb];
        let pa = mesh.verts[a].pos;
        let pb = mesh.verts[b].pos;
        let off: Vec<usize> = verts
            .iter()
            .copied()
            .filter(|&v| v != a && v != b)
            .collect();
        let (c, d) = (off[0], off[1]);
        let pc = mesh.verts[c].pos;
        let pd = mesh.verts[d].pos;

        // plane through b and the crossings leaving a
        let ea_c = mesh.tet_edge_between(t, a, c);
        let ea_d = mesh.tet_edge_between(t, a, d);
        let ca = pa * (1.0 - mesh.edges[ea_c].alpha_for(a))
            + pc * mesh.edges[ea_c].alpha_for(a);
        let da = pa * (1.0 - mesh.edges[ea_d].alpha_for(a))
            + pd * mesh.edges[ea_d].alpha_for(a);
        let n1 = oriented_plane_normal(pb, ca, da, pa);
        let d1 = n1.dot(&(q - pb));

        // plane through a and the crossings leaving b
        let eb_c = mesh.tet_edge_between(t, b, c);
        let eb_d = mesh.tet_edge_between(t, b, d);
        let cb = pb * (1.0 - mesh.edges[eb_c].alpha_for(b))
            + pc * mesh.edges[eb_c].alpha_for(b);
        let db = pb * (1.0 - mesh.edges[eb_d].alpha_for(b))
            + pd * mesh.edges[eb_d].alpha_for(b);
        let n2 = oriented_plane_normal(pa, cb, db, pb);
        let d2 = n2.dot(&(q - pa));

        if d1 > 0.0 && d2 > 0.0 {
            mesh.verts[quad].violating = true;
            mesh.verts[quad].closest =
                Some(Anchor::Edge(mesh.tets[t].edges[e_local]));
            return;
        }
    }
}

/// Checks a quadruple point against the four face alpha regions of its tet
///
/// The region of the face opposite corner `w` is the slab bounded by three
/// planes, each through one face corner and the alpha crossings leaving
/// the other two corners toward `w`.
pub fn check_quad_violates_faces(mesh: &mut TetMesh, t: usize) {
    let Some(quad) = mesh.tets[t].quadruple else { return };
    if mesh.root_order(quad) != VertexOrder::Quadruple {
        return;
    }
    mesh.verts[quad].violating = false;
    mesh.verts[quad].closest = None;

    let verts = mesh.tets[t].verts;
    let q = mesh.root_pos(quad);

    for w in 0..4 {
        let pw = mesh.verts[verts[w]].pos;
        let others: Vec<usize> = (0..4).filter(|&j| j != w).collect();
        let p: Vec<Vector3<f64>> = others
            .iter()
            .map(|&j| mesh.verts[verts[j]].pos)
            .collect();
        let cross: Vec<Vector3<f64>> = others
            .iter()
            .zip(&p)
            .map(|(&j, &pj)| {
                let e = mesh.tet_edge_between(t, verts[j], verts[w]);
                let alpha = mesh.edges[e].alpha_for(verts[j]);
                pj * (1.0 - alpha) + pw * alpha
            })
            .collect();
        let reference = (p[0] + p[1] + p[2] + cross[0] + cross[1] + cross[2])
            / 6.0;

        let mut inside = true;
        for m in 0..3 {
            let n = oriented_plane_normal(
                p[m],
                cross[(m + 1) % 3],
                cross[(m + 2) % 3],
                reference,
            );
            if n.dot(&(q - p[m])) <= 0.0 {
                inside = false;
                break;
            }
        }
        if inside {
            mesh.verts[quad].violating = true;
            mesh.verts[quad].closest =
                Some(Anchor::Face(mesh.tets[t].faces[w]));
            return;
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::mesh::{Tet, Vertex, VertexOrder};

    /// Unit tet with uniform alphas and adjacency ready
    fn alpha_tet(alpha: f64) -> TetMesh {
        let verts = vec![
            Vertex::new(Vector3::new(0.0, 0.0, 0.0)),
            Vertex::new(Vector3::new(1.0, 0.0, 0.0)),
            Vertex::new(Vector3::new(0.0, 1.0, 0.0)),
            Vertex::new(Vector3::new(0.0, 0.0, 1.0)),
        ];
        let mut m = TetMesh::new(verts, vec![Tet::new([0, 1, 2, 3], 0)]);
        m.build_adjacency();
        for e in &mut m.edges {
            e.alphas = [alpha, alpha];
        }
        m
    }

    fn add_cut(m: &mut TetMesh, e: usize, pos: Vector3<f64>) -> usize {
        let cut = m.push_vertex(Vertex::interface(pos, VertexOrder::Cut));
        m.edges[e].cut = Some(cut);
        cut
    }

    #[test]
    fn cut_near_endpoint_violates_it() {
        let mut m = alpha_tet(0.2);
        let e = m.tet_edge_between(0, 0, 1);
        let cut = add_cut(&mut m, e, Vector3::new(0.1, 0.0, 0.0));
        check_cut_violates_vertices(&mut m, e);
        assert!(m.verts[cut].violating);
        assert_eq!(m.verts[cut].closest, Some(Anchor::Vertex(0)));

        m.verts[cut].pos = Vector3::new(0.95, 0.0, 0.0);
        check_cut_violates_vertices(&mut m, e);
        assert_eq!(m.verts[cut].closest, Some(Anchor::Vertex(1)));

        m.verts[cut].pos = Vector3::new(0.5, 0.0, 0.0);
        check_cut_violates_vertices(&mut m, e);
        assert!(!m.verts[cut].violating);
    }

    #[test]
    fn triple_in_corner_cone_violates_vertex() {
        let mut m = alpha_tet(0.2);
        // face opposite vertex 3 spans (0,1,2) in the z=0 plane
        let f = m.tets[0].faces[3];
        let triple = m.push_vertex(Vertex::interface(
            Vector3::new(0.05, 0.05, 0.0),
            VertexOrder::Triple,
        ));
        m.faces[f].triple = Some(triple);
        check_triple_violates_vertices(&mut m, f);
        assert!(m.verts[triple].violating);
        assert_eq!(m.verts[triple].closest, Some(Anchor::Vertex(0)));

        m.verts[triple].pos = Vector3::new(1.0 / 3.0, 1.0 / 3.0, 0.0);
        check_triple_violates_vertices(&mut m, f);
        assert!(!m.verts[triple].violating);
    }

    #[test]
    fn triple_near_edge_violates_it() {
        let mut m = alpha_tet(0.15);
        let f = m.tets[0].faces[3];
        // close to the edge joining (0,0,0) and (1,0,0) but outside both
        // corner cones
        let triple = m.push_vertex(Vertex::interface(
            Vector3::new(0.5, 0.02, 0.0),
            VertexOrder::Triple,
        ));
        m.faces[f].triple = Some(triple);
        check_triple_violates_edges(&mut m, f);
        assert!(m.verts[triple].violating);
        let e01 = m.tet_edge_between(0, 0, 1);
        assert_eq!(m.verts[triple].closest, Some(Anchor::Edge(e01)));
    }

    #[test]
    fn quad_checks_are_winding_independent() {
        for swap in [false, true] {
            let mut m = alpha_tet(0.25);
            if swap {
                m.tets[0].verts.swap(2, 3);
                m.build_adjacency();
                for e in &mut m.edges {
                    e.alphas = [0.25, 0.25];
                }
            }
            let quad = m.push_vertex(Vertex::interface(
                Vector3::new(0.05, 0.05, 0.05),
                VertexOrder::Quadruple,
            ));
            m.tets[0].quadruple = Some(quad);
            check_quad_violates_vertices(&mut m, 0);
            assert!(m.verts[quad].violating, "swap={swap}");
            assert_eq!(m.verts[quad].closest, Some(Anchor::Vertex(0)));

            // centroid is in no corner region
            m.verts[quad].pos = Vector3::new(0.25, 0.25, 0.25);
            check_quad_violates_vertices(&mut m, 0);
            assert!(!m.verts[quad].violating, "swap={swap}");
        }
    }

    #[test]
    fn quad_near_face_violates_it() {
        let mut m = alpha_tet(0.1);
        // hovering just above the z=0 face, central enough to clear the
        // corner and edge wedges
        let quad = m.push_vertex(Vertex::interface(
            Vector3::new(0.3, 0.3, 0.01),
            VertexOrder::Quadruple,
        ));
        m.tets[0].quadruple = Some(quad);
        check_quad_violates_faces(&mut m, 0);
        assert!(m.verts[quad].violating);
        // z=0 face is opposite vertex 3
        assert_eq!(
            m.verts[quad].closest,
            Some(Anchor::Face(m.tets[0].faces[3]))
        );
    }

    #[test]
    fn quad_near_edge_violates_it() {
        let mut m = alpha_tet(0.1);
        let quad = m.push_vertex(Vertex::interface(
            Vector3::new(0.5, 0.01, 0.01),
            VertexOrder::Quadruple,
        ));
        m.tets[0].quadruple = Some(quad);
        check_quad_violates_edges(&mut m, 0);
        assert!(m.verts[quad].violating);
        let e01 = m.tet_edge_between(0, 0, 1);
        assert_eq!(m.verts[quad].closest, Some(Anchor::Edge(e01)));
    }
}
