//! Snapping and warping of violations
//!
//! Runs three phases, each consuming the violations recorded by the
//! matching checks in [`super::violation`]:
//!
//! 1. vertex phase: every lattice vertex absorbs the interface vertices
//!    violating it, warping to their position and dragging the surviving
//!    interfaces along (staged in `pos_next`, then committed).
//! 2. edge phase: triple points violating an edge snap onto its cut.
//! 3. face phase: quadruple points violating a face snap onto its triple.
//!
//! Snapping an interface vertex means either pointing its `parent` at the
//! target (real vertices, so every reference resolves there) or rewriting
//! the edge/face/tet slot (virtual stand-ins).  Degeneracy resolution
//! propagates snaps until the interface pattern is consistent again.
use log::{info, warn};
use nalgebra::{Matrix3, Vector3};
use ordered_float::OrderedFloat;

use super::stencil::{vertex_list, COMPLETE_INTERFACE_TABLE};
use super::violation;
use crate::mesh::{Anchor, TetMesh, VertexOrder};

/// Runs all three snap and warp phases
pub fn snap_and_warp_violations(mesh: &mut TetMesh) {
    snap_and_warp_vertex_violations(mesh);
    snap_and_warp_edge_violations(mesh);
    snap_and_warp_face_violations(mesh);
}

////////////////////////////////////////////////////////////////////////////
// phase 1: vertices

fn snap_and_warp_vertex_violations(mesh: &mut TetMesh) {
    let lattice_verts = mesh
        .verts
        .iter()
        .take_while(|v| v.order == VertexOrder::Lattice)
        .count();
    let mut warped = 0;
    for v in 0..lattice_verts {
        warped += usize::from(snap_and_warp_for_violated_vertex(mesh, v));
    }
    info!("phase 1: warped {warped} of {lattice_verts} lattice vertices");
}

/// Warps `vertex` onto the interface vertices violating it
///
/// Returns false if nothing violated the vertex.  Participating (real but
/// non-violating) interfaces around the vertex are conformed, projected
/// and committed alongside the warp; anything left violating afterwards
/// is snapped away.
fn snap_and_warp_for_violated_vertex(mesh: &mut TetMesh, vertex: usize) -> bool {
    // a visited vertex counts as warped even when it doesn't move, so
    // later phases know its position is final
    mesh.verts[vertex].warped = true;

    let mut viol_edges = vec![];
    let mut part_edges = vec![];
    for e in mesh.edges_around_vertex(vertex) {
        let Some(cut) = mesh.edges[e].cut else { continue };
        if mesh.root_order(cut) != VertexOrder::Cut {
            continue;
        }
        if mesh.verts[cut].violating
            && mesh.verts[cut].closest == Some(Anchor::Vertex(vertex))
        {
            viol_edges.push(e);
        } else {
            part_edges.push(e);
        }
    }

    let mut viol_faces = vec![];
    let mut part_faces = vec![];
    for f in mesh.faces_around_vertex(vertex) {
        let Some(triple) = mesh.faces[f].triple else { continue };
        if mesh.root_order(triple) != VertexOrder::Triple {
            continue;
        }
        if mesh.verts[triple].violating
            && mesh.verts[triple].closest == Some(Anchor::Vertex(vertex))
        {
            viol_faces.push(f);
        } else {
            part_faces.push(f);
        }
    }

    let mut viol_tets = vec![];
    let mut part_tets = vec![];
    for &t in mesh.tets_around_vertex(vertex) {
        let Some(quad) = mesh.tets[t].quadruple else { continue };
        if mesh.root_order(quad) != VertexOrder::Quadruple {
            continue;
        }
        if mesh.verts[quad].violating
            && mesh.verts[quad].closest == Some(Anchor::Vertex(vertex))
        {
            viol_tets.push(t);
        } else {
            part_tets.push(t);
        }
    }

    if viol_edges.is_empty() && viol_faces.is_empty() && viol_tets.is_empty()
    {
        return false;
    }

    // warp target: a lone quadruple or triple wins outright, otherwise
    // the centroid of everything violating
    let warp_point = if viol_tets.len() == 1 {
        let quad = mesh.tets[viol_tets[0]].quadruple.unwrap_or(vertex);
        mesh.root_pos(quad)
    } else if viol_faces.len() == 1 {
        let triple = mesh.faces[viol_faces[0]].triple.unwrap_or(vertex);
        mesh.root_pos(triple)
    } else {
        let mut sum = Vector3::zeros();
        let mut n = 0;
        for &e in &viol_edges {
            sum += mesh.root_pos(mesh.edges[e].cut.unwrap_or(vertex));
            n += 1;
        }
        for &f in &viol_faces {
            sum += mesh.root_pos(mesh.faces[f].triple.unwrap_or(vertex));
            n += 1;
        }
        for &t in &viol_tets {
            sum += mesh.root_pos(mesh.tets[t].quadruple.unwrap_or(vertex));
            n += 1;
        }
        sum / f64::from(n)
    };

    for &t in &part_tets {
        conform_quadruple(mesh, t, vertex, warp_point);
    }

    // drag surviving triples with the warped face plane
    for &f in &part_faces {
        let Some(triple) = mesh.faces[f].triple else { continue };
        let inner = get_inner_tet_for_face(mesh, f, warp_point);
        let Some(q) = mesh.tets[inner].quadruple else { continue };

        if mesh.same_vertex(q, triple) {
            // shared with the quadruple: conforming the quad moves both
            conform_quadruple(mesh, inner, vertex, warp_point);
        } else if mesh.root_order(q) == VertexOrder::Quadruple
            && mesh.verts[q].conformed_face == Some(f)
        {
            mesh.verts[triple].pos_next = mesh.verts[q].pos_next;
            mesh.verts[triple].conformed_edge = None;
        } else if mesh.root_order(q) == VertexOrder::Quadruple
            && mesh.verts[q]
                .conformed_edge
                .is_some_and(|e| mesh.face_edges(f).contains(&e))
        {
            mesh.verts[triple].pos_next = mesh.verts[q].pos_next;
            mesh.verts[triple].conformed_edge =
                mesh.verts[q].conformed_edge;
        } else {
            mesh.verts[triple].pos_next =
                project_triple(mesh, f, q, vertex, warp_point);
            conform_triple(mesh, f, vertex, warp_point);
        }
    }

    // drag surviving cuts with the warped edges
    for &e in &part_edges {
        let Some(cut) = mesh.edges[e].cut else { continue };
        let mut handled = false;
        for f in mesh.faces_around_edge(e) {
            let Some(triple) = mesh.faces[f].triple else { continue };
            if mesh.root_order(triple) == VertexOrder::Triple
                && mesh.verts[triple].conformed_edge == Some(e)
            {
                mesh.verts[cut].pos_next = mesh.verts[triple].pos_next;
                handled = true;
                break;
            }
        }
        if !handled {
            let inner = get_inner_tet_for_edge(mesh, e, warp_point);
            mesh.verts[cut].pos_next =
                project_cut(mesh, e, inner, vertex, warp_point);
        }
    }

    // commit the warp
    mesh.verts[vertex].pos = warp_point;
    for &e in &part_edges {
        if let Some(cut) = mesh.edges[e].cut {
            mesh.verts[cut].pos = mesh.verts[cut].pos_next;
        }
        violation::check_cut_violates_vertices(mesh, e);
    }
    for &f in &part_faces {
        if let Some(triple) = mesh.faces[f].triple {
            mesh.verts[triple].pos = mesh.verts[triple].pos_next;
        }
        violation::check_triple_violates_vertices(mesh, f);
    }
    for &t in &part_tets {
        if let Some(quad) = mesh.tets[t].quadruple {
            mesh.verts[quad].pos = mesh.verts[quad].pos_next;
        }
        violation::check_quad_violates_vertices(mesh, t);
    }

    // cuts of the same interface as a violating one collapse with it
    for &e in &part_edges {
        let Some(cut) = mesh.edges[e].cut else { continue };
        let affected = viol_edges.iter().any(|&ve| {
            mesh.edges[ve]
                .cut
                .is_some_and(|vc| mesh.verts[vc].mats == mesh.verts[cut].mats)
        });
        if affected {
            snap_cut_for_edge_to_vertex(mesh, e, vertex);
        }
    }

    // projections may have pushed survivors into the warped vertex
    for &e in &part_edges {
        let Some(cut) = mesh.edges[e].cut else { continue };
        if mesh.root_order(cut) != VertexOrder::Cut
            || !mesh.verts[cut].violating
        {
            continue;
        }
        match mesh.verts[cut].closest {
            Some(Anchor::Vertex(w)) if w == vertex => {
                snap_cut_for_edge_to_vertex(mesh, e, vertex);
            }
            Some(Anchor::Vertex(w)) if mesh.verts[w].warped => {
                snap_cut_for_edge_to_vertex(mesh, e, w);
                resolve_degeneracies_around_vertex(mesh, w);
            }
            _ => (),
        }
    }
    for &f in &part_faces {
        let Some(triple) = mesh.faces[f].triple else { continue };
        if mesh.root_order(triple) != VertexOrder::Triple
            || !mesh.verts[triple].violating
        {
            continue;
        }
        match mesh.verts[triple].closest {
            Some(Anchor::Vertex(w)) if w == vertex => {
                snap_triple_for_face_to_vertex(mesh, f, vertex);
            }
            Some(Anchor::Vertex(w)) if mesh.verts[w].warped => {
                snap_triple_for_face_to_vertex(mesh, f, w);
                resolve_degeneracies_around_vertex(mesh, w);
            }
            _ => (),
        }
    }
    for &t in &part_tets {
        let Some(quad) = mesh.tets[t].quadruple else { continue };
        if mesh.root_order(quad) == VertexOrder::Quadruple
            && mesh.verts[quad].violating
            && mesh.verts[quad].closest == Some(Anchor::Vertex(vertex))
        {
            snap_quadruple_for_tet_to_vertex(mesh, t, vertex);
        }
    }

    // absorb the violations themselves
    for &e in &viol_edges {
        snap_cut_for_edge_to_vertex(mesh, e, vertex);
    }
    for &f in &viol_faces {
        snap_triple_for_face_to_vertex(mesh, f, vertex);
    }
    for &t in &viol_tets {
        snap_quadruple_for_tet_to_vertex(mesh, t, vertex);
    }

    resolve_degeneracies_around_vertex(mesh, vertex);
    true
}

////////////////////////////////////////////////////////////////////////////
// conforming (barycentric clamping against the warped element)

/// Barycentric coordinates of `p` in the frame spanned by `v1..v4`
fn barycentric(
    p: Vector3<f64>,
    v1: Vector3<f64>,
    v2: Vector3<f64>,
    v3: Vector3<f64>,
    v4: Vector3<f64>,
) -> Option<Vector3<f64>> {
    let a = Matrix3::from_columns(&[v1 - v4, v2 - v4, v3 - v4]);
    a.try_inverse().map(|inv| inv * (p - v4))
}

const CONFORM_EPS: f64 = 1e-3;

/// Edge of face `f` joining vertices `a` and `b`
fn face_edge_between(mesh: &TetMesh, f: usize, a: usize, b: usize) -> usize {
    mesh.tet_edge_between(mesh.faces[f].tets[0], a, b)
}

/// Clamps a warped triple point back into its face
///
/// Works in the warped configuration (the moving corner at `warp_pt`).
/// A single negative barycentric coordinate is zeroed and the triple is
/// marked as conformed to the opposite face edge.
fn conform_triple(
    mesh: &mut TetMesh,
    f: usize,
    warp_vertex: usize,
    warp_pt: Vector3<f64>,
) {
    let Some(trip) = mesh.faces[f].triple else { return };

    let mut verts = mesh.faces[f].verts;
    if let Some(i) = verts.iter().position(|&v| v == warp_vertex) {
        verts.swap(0, i);
    }
    let v1 = warp_pt;
    let v2 = mesh.verts[verts[1]].pos;
    let v3 = mesh.verts[verts[2]].pos;
    let n = (v3 - v1)
        .normalize()
        .cross(&(v2 - v1).normalize())
        .normalize();
    let v4 = v1 + n;

    let p = mesh.verts[trip].pos_next;
    let Some(mut lambda) = barycentric(p, v1, v2, v3, v4) else {
        warn!("degenerate face {f} while conforming triple");
        return;
    };

    if lambda.x < CONFORM_EPS {
        lambda.x = 0.0;
        mesh.verts[trip].conformed_edge =
            Some(face_edge_between(mesh, f, verts[1], verts[2]));
    } else if lambda.y < CONFORM_EPS {
        lambda.y = 0.0;
        mesh.verts[trip].conformed_edge =
            Some(face_edge_between(mesh, f, verts[0], verts[2]));
    } else if lambda.z < CONFORM_EPS {
        lambda.z = 0.0;
        mesh.verts[trip].conformed_edge =
            Some(face_edge_between(mesh, f, verts[0], verts[1]));
    } else {
        mesh.verts[trip].conformed_edge = None;
    }

    let l1 = lambda.x.abs() + lambda.y.abs() + lambda.z.abs();
    lambda /= l1;
    mesh.verts[trip].pos_next =
        v1 * lambda.x + v2 * lambda.y + v3 * lambda.z;
}

/// Clamps a warped quadruple point back into its tet
///
/// One negative coordinate conforms the point to the opposite face, two
/// to the opposite edge.  Reads the current position and stages the
/// result in `pos_next`.
fn conform_quadruple(
    mesh: &mut TetMesh,
    t: usize,
    warp_vertex: usize,
    warp_pt: Vector3<f64>,
) {
    let Some(quad) = mesh.tets[t].quadruple else { return };
    mesh.verts[quad].conformed_edge = None;
    mesh.verts[quad].conformed_face = None;

    let mut verts = mesh.tets[t].verts;
    if let Some(i) = verts.iter().position(|&v| v == warp_vertex) {
        verts.swap(0, i);
    }
    let v1 = warp_pt;
    let v2 = mesh.verts[verts[1]].pos;
    let v3 = mesh.verts[verts[2]].pos;
    let v4 = mesh.verts[verts[3]].pos;

    let p = mesh.root_pos(quad);
    let Some(mut lambda) = barycentric(p, v1, v2, v3, v4) else {
        warn!("degenerate tet {t} while conforming quadruple");
        return;
    };
    let mut lambda_w = 1.0 - (lambda.x + lambda.y + lambda.z);

    let conform_edge = |mesh: &mut TetMesh, a: usize, b: usize| {
        let e = mesh.tet_edge_between(t, a, b);
        mesh.verts[quad].conformed_edge = Some(e);
    };
    let conform_face = |mesh: &mut TetMesh, corner: usize| {
        // the face not containing `corner`
        let fs = mesh.tets[t].faces;
        let f = fs
            .into_iter()
            .find(|&f| !mesh.faces[f].verts.contains(&corner))
            .unwrap_or(fs[0]);
        mesh.verts[quad].conformed_face = Some(f);
    };

    if lambda.x < CONFORM_EPS {
        if lambda.y < CONFORM_EPS {
            lambda.x = 0.0;
            lambda.y = 0.0;
            conform_edge(mesh, verts[2], verts[3]);
        } else if lambda.z < CONFORM_EPS {
            lambda.x = 0.0;
            lambda.z = 0.0;
            conform_edge(mesh, verts[1], verts[3]);
        } else if lambda_w < CONFORM_EPS {
            lambda.x = 0.0;
            lambda_w = 0.0;
            conform_edge(mesh, verts[1], verts[2]);
        } else {
            lambda.x = 0.0;
            conform_face(mesh, verts[0]);
        }
    } else if lambda.y < CONFORM_EPS {
        if lambda.z < CONFORM_EPS {
            lambda.y = 0.0;
            lambda.z = 0.0;
            conform_edge(mesh, verts[0], verts[3]);
        } else if lambda_w < CONFORM_EPS {
            lambda.y = 0.0;
            lambda_w = 0.0;
            conform_edge(mesh, verts[0], verts[2]);
        } else {
            lambda.y = 0.0;
            conform_face(mesh, verts[1]);
        }
    } else if lambda.z < CONFORM_EPS {
        if lambda_w < CONFORM_EPS {
            lambda.z = 0.0;
            lambda_w = 0.0;
            conform_edge(mesh, verts[0], verts[1]);
        } else {
            lambda.z = 0.0;
            conform_face(mesh, verts[2]);
        }
    } else if lambda_w < CONFORM_EPS {
        lambda_w = 0.0;
        conform_face(mesh, verts[3]);
    }

    let l1 = lambda.x + lambda.y + lambda.z + lambda_w;
    lambda /= l1;
    let lw = 1.0 - (lambda.x + lambda.y + lambda.z);
    mesh.verts[quad].pos_next =
        v1 * lambda.x + v2 * lambda.y + v3 * lambda.z + v4 * lw;
}

////////////////////////////////////////////////////////////////////////////
// projection geometry

/// Ray/triangle intersection with loose boundary tolerance
///
/// Rejects degenerate triangles and hits behind (or too close to) the
/// ray origin.
fn triangle_intersection(
    mesh: &TetMesh,
    v1: usize,
    v2: usize,
    v3: usize,
    origin: Vector3<f64>,
    ray: Vector3<f64>,
) -> Option<Vector3<f64>> {
    let eps = 1e-8;
    let eps2 = 1e-3;
    if v1 == v2 || v2 == v3 || v1 == v3 {
        return None;
    }
    let p1 = mesh.verts[v1].pos;
    let p2 = mesh.verts[v2].pos;
    let p3 = mesh.verts[v3].pos;
    if (p1 - p2).norm() < eps
        || (p2 - p3).norm() < eps
        || (p1 - p3).norm() < eps
    {
        return None;
    }

    let e1 = p1 - p3;
    let e2 = p2 - p3;
    let ray = ray.normalize();
    let r1 = ray.cross(&e2);
    let denom = e1.dot(&r1);
    if denom.abs() < eps {
        return None;
    }
    let inv_denom = 1.0 / denom;
    let s = origin - p3;
    let b1 = s.dot(&r1) * inv_denom;
    if !(-eps2..=1.0 + eps2).contains(&b1) {
        return None;
    }
    let r2 = s.cross(&e1);
    let b2 = ray.dot(&r2) * inv_denom;
    if b2 < -eps2 || b1 + b2 > 1.0 + 2.0 * eps2 {
        return None;
    }
    let t = e2.dot(&r2) * inv_denom;
    if t < 0.01 { None } else { Some(origin + ray * t) }
}

/// Ray/triangle intersection clamped into the triangle
///
/// Intersects the supporting plane, clamps the hit into the triangle by
/// barycentric truncation, and reports how far the clamp moved it.
/// Vertices are compared through their snap roots.
fn triangle_intersect(
    mesh: &TetMesh,
    v1: usize,
    v2: usize,
    v3: usize,
    origin: Vector3<f64>,
    ray: Vector3<f64>,
) -> Option<(Vector3<f64>, f64)> {
    let eps = 1e-7;
    if mesh.same_vertex(v1, v2)
        || mesh.same_vertex(v2, v3)
        || mesh.same_vertex(v3, v1)
    {
        return None;
    }
    let p1 = mesh.root_pos(v1);
    let p2 = mesh.root_pos(v2);
    let p3 = mesh.root_pos(v3);
    if (p1 - p2).norm() < eps
        || (p2 - p3).norm() < eps
        || (p3 - p1).norm() < eps
    {
        return None;
    }

    // plane intersection
    let n = (p3 - p1)
        .normalize()
        .cross(&(p2 - p1).normalize())
        .normalize();
    let denom = n.dot(&ray);
    if denom.abs() < 1e-12 {
        return None;
    }
    let t = n.dot(&(p1 - origin)) / denom;
    let pt = origin + ray * t;

    // clamp into the triangle
    let p4 = p1 + n;
    let mut lambda = barycentric(pt, p1, p2, p3, p4)?;
    lambda.x = lambda.x.max(0.0);
    lambda.y = lambda.y.max(0.0);
    lambda.z = lambda.z.max(0.0);
    let l1 = lambda.x + lambda.y + lambda.z;
    if l1 < 1e-12 {
        return None;
    }
    lambda /= l1;
    let tri_pt = p1 * lambda.x + p2 * lambda.y + p3 * lambda.z;

    // project back onto the ray
    let c = ray * ((tri_pt - origin).dot(&ray) / ray.dot(&ray));
    let mut t = c.norm();
    if c.dot(&ray) < 0.0 {
        t = -t;
    }
    let pt = origin + ray * t;
    Some((pt, (tri_pt - pt).norm()))
}

/// Chooses the tet responsible for projecting the cut on edge `e`
///
/// Walks the tets around the edge and picks the first whose boundary the
/// warp ray (edge midpoint toward the warp target) passes through, away
/// from the cut itself.
fn get_inner_tet_for_edge(
    mesh: &TetMesh,
    e: usize,
    warp_pt: Vector3<f64>,
) -> Option<usize> {
    let tets = mesh.tets_around_edge(e);
    let [a, b] = mesh.edges[e].verts;
    let origin = (mesh.verts[a].pos + mesh.verts[b].pos) * 0.5;
    let ray = warp_pt - origin;
    let cut_pos = mesh
        .edges[e]
        .cut
        .map(|c| mesh.root_pos(c))
        .unwrap_or(origin);

    for &t in &tets {
        for &f in &mesh.tets[t].faces {
            let [v1, v2, v3] = mesh.faces[f].verts;
            if let Some(hit) =
                triangle_intersection(mesh, v1, v2, v3, origin, ray)
            {
                if (cut_pos - hit).norm() > 1e-3 {
                    return Some(t);
                }
            }
        }
    }
    // no clean hit: accept any intersected tet
    for &t in &tets {
        for &f in &mesh.tets[t].faces {
            let [v1, v2, v3] = mesh.faces[f].verts;
            if triangle_intersection(mesh, v1, v2, v3, origin, ray)
                .is_some()
            {
                return Some(t);
            }
        }
    }
    warn!("no inner tet found for edge {e}");
    None
}

/// Chooses the tet responsible for projecting the triple on face `f`:
/// the incident tet whose off-face corner leans toward the warp target
fn get_inner_tet_for_face(
    mesh: &TetMesh,
    f: usize,
    warp_pt: Vector3<f64>,
) -> usize {
    let tets = &mesh.faces[f].tets;
    if tets.len() == 1 {
        return tets[0];
    }
    let trip_pos = mesh
        .faces[f]
        .triple
        .map(|t| mesh.root_pos(t))
        .unwrap_or(mesh.verts[mesh.faces[f].verts[0]].pos);
    let ray = (warp_pt - trip_pos).normalize();

    let lean = |t: usize| -> f64 {
        let corner = mesh.tets[t]
            .verts
            .into_iter()
            .find(|v| !mesh.faces[f].verts.contains(v))
            .unwrap_or(mesh.tets[t].verts[0]);
        (mesh.verts[corner].pos - trip_pos).normalize().dot(&ray)
    };
    if lean(tets[0]) > lean(tets[1]) { tets[0] } else { tets[1] }
}

/// New position for a surviving triple point: the intersection of its
/// triple/quadruple interface segment with the warped face plane
fn project_triple(
    mesh: &TetMesh,
    f: usize,
    quad: usize,
    warp_vertex: usize,
    warp_pt: Vector3<f64>,
) -> Vector3<f64> {
    let Some(trip) = mesh.faces[f].triple else { return warp_pt };
    let mut verts = mesh.faces[f].verts;
    if let Some(i) = verts.iter().position(|&v| v == warp_vertex) {
        verts.swap(0, i);
    }
    let p0 = warp_pt;
    let p1 = mesh.verts[verts[1]].pos;
    let p2 = mesh.verts[verts[2]].pos;
    let n = (p1 - p0).cross(&(p2 - p0)).normalize();

    let ia = mesh.root_pos(trip);
    let ib = mesh.root_pos(quad);
    let l = ib - ia;
    if l.norm() < 1e-5 || l.dot(&n) == 0.0 {
        return ia;
    }
    let d = (p0 - ia).dot(&n) / l.dot(&n);
    ia + l * d
}

/// New position for a surviving cut: the intersection of the warped edge
/// with the material interface surface inside `inner_tet`
///
/// The interface inside a generalized tet is the fan of triangles joining
/// each (cut, triple) pair of [`COMPLETE_INTERFACE_TABLE`] to the
/// quadruple; only triangles touching this cut are candidates.
fn project_cut(
    mesh: &TetMesh,
    e: usize,
    inner_tet: Option<usize>,
    warp_vertex: usize,
    warp_pt: Vector3<f64>,
) -> Vector3<f64> {
    let [a, b] = mesh.edges[e].verts;
    let Some(cut) = mesh.edges[e].cut else { return warp_pt };
    let cut_pos = mesh.root_pos(cut);

    // boundary edges keep their hull-conforming cut in place
    if mesh.verts[a].exterior || mesh.verts[b].exterior {
        return cut_pos;
    }

    let static_vertex = if a == warp_vertex { b } else { a };
    let static_pt = mesh.verts[static_vertex].pos;

    let Some(tet) = inner_tet else {
        // no geometry to intersect: reposition proportionally
        let t = (cut_pos - static_pt).norm()
            / (mesh.verts[warp_vertex].pos - static_pt).norm();
        return static_pt + (warp_pt - static_pt) * t;
    };

    let Some(verts15) = vertex_list(mesh, tet) else {
        return cut_pos;
    };
    let quad = verts15[14];
    let ray = (warp_pt - static_pt).normalize();

    let best = COMPLETE_INTERFACE_TABLE
        .iter()
        .filter_map(|row| {
            let v1 = verts15[row[0]];
            let v2 = verts15[row[1]];
            let touches = [v1, v2, quad].into_iter().any(|v| {
                mesh.same_vertex(v, cut)
                    || (mesh.root_pos(v) - cut_pos).norm() < 1e-7
            });
            if !touches {
                return None;
            }
            triangle_intersect(mesh, v1, v2, quad, static_pt, ray)
        })
        .min_by_key(|&(_, err)| OrderedFloat(err));

    let mut pt = best.map(|(p, _)| p).unwrap_or(cut_pos);

    // keep the cut on the warped edge segment
    let len = (warp_pt - static_pt).norm();
    let t = (pt - static_pt).dot(&ray);
    if !(0.0..=len).contains(&t) {
        pt = static_pt + ray * t.clamp(0.0, len);
    }
    pt
}

////////////////////////////////////////////////////////////////////////////
// phase 2: edges

fn snap_and_warp_edge_violations(mesh: &mut TetMesh) {
    for f in 0..mesh.faces.len() {
        violation::check_triple_violates_edges(mesh, f);
    }
    for t in 0..mesh.tets.len() {
        violation::check_quad_violates_edges(mesh, t);
    }
    for e in 0..mesh.edges.len() {
        snap_and_warp_for_violated_edge(mesh, e);
    }
    info!("phase 2: edge violations resolved");
}

fn snap_and_warp_for_violated_edge(mesh: &mut TetMesh, e: usize) {
    let Some(cut) = mesh.edges[e].cut else { return };

    for f in mesh.faces_around_edge(e) {
        let Some(triple) = mesh.faces[f].triple else { continue };
        if mesh.root_order(triple) == VertexOrder::Triple
            && mesh.verts[triple].violating
            && mesh.verts[triple].closest == Some(Anchor::Edge(e))
        {
            snap_triple_for_face_to_cut(mesh, f, cut);
        }
    }

    if mesh.root_order(cut) == VertexOrder::Lattice {
        let root = mesh.root(cut);
        resolve_degeneracies_around_vertex(mesh, root);
    } else {
        resolve_degeneracies_around_edge(mesh, e);
    }
}

////////////////////////////////////////////////////////////////////////////
// phase 3: faces

fn snap_and_warp_face_violations(mesh: &mut TetMesh) {
    for t in 0..mesh.tets.len() {
        violation::check_quad_violates_faces(mesh, t);
    }
    for f in 0..mesh.faces.len() {
        snap_and_warp_for_violated_face(mesh, f);
    }
    info!("phase 3: face violations resolved");
}

fn snap_and_warp_for_violated_face(mesh: &mut TetMesh, f: usize) {
    let Some(triple) = mesh.faces[f].triple else { return };
    let tets: Vec<usize> = mesh.faces[f].tets.iter().copied().collect();

    for t in tets {
        let Some(quad) = mesh.tets[t].quadruple else { continue };
        if mesh.root_order(quad) != VertexOrder::Quadruple
            || !mesh.verts[quad].violating
            || mesh.verts[quad].closest != Some(Anchor::Face(f))
        {
            continue;
        }

        snap_quadruple_for_tet_to_triple(mesh, t, triple);

        let q = mesh.tets[t].quadruple.unwrap_or(triple);
        match mesh.root_order(q) {
            VertexOrder::Lattice => {
                let root = mesh.root(q);
                resolve_degeneracies_around_vertex(mesh, root);
            }
            VertexOrder::Cut => {
                for e in mesh.face_edges(f) {
                    if mesh.edges[e]
                        .cut
                        .is_some_and(|c| mesh.same_vertex(c, q))
                    {
                        snap_quadruple_for_tet_to_edge(mesh, t, e);
                        resolve_degeneracies_around_edge(mesh, e);
                    }
                }
            }
            _ => (),
        }
    }
}

////////////////////////////////////////////////////////////////////////////
// snapping primitives

/// Snaps the cut of edge `e` onto `vertex`
///
/// Real cuts snap through their parent pointer so every reference to them
/// follows; virtual stand-ins just rewrite the edge slot.
fn snap_cut_for_edge_to_vertex(mesh: &mut TetMesh, e: usize, vertex: usize) {
    let Some(cut) = mesh.edges[e].cut else { return };
    if mesh.verts[cut].order == VertexOrder::Cut {
        mesh.verts[cut].parent = Some(vertex);
    } else {
        mesh.edges[e].cut = Some(vertex);
    }
}

fn snap_triple_for_face_to_vertex(
    mesh: &mut TetMesh,
    f: usize,
    vertex: usize,
) {
    let Some(triple) = mesh.faces[f].triple else { return };
    if mesh.verts[triple].order == VertexOrder::Triple {
        mesh.verts[triple].parent = Some(vertex);
    } else {
        mesh.faces[f].triple = Some(vertex);
    }
}

fn snap_triple_for_face_to_cut(mesh: &mut TetMesh, f: usize, cut: usize) {
    let Some(triple) = mesh.faces[f].triple else { return };
    if mesh.verts[triple].order == VertexOrder::Triple {
        mesh.verts[triple].parent = Some(cut);
    } else {
        mesh.faces[f].triple = Some(cut);
    }
}

fn snap_quadruple_for_tet_to_vertex(
    mesh: &mut TetMesh,
    t: usize,
    vertex: usize,
) {
    let Some(quad) = mesh.tets[t].quadruple else { return };
    if mesh.verts[quad].order == VertexOrder::Quadruple {
        mesh.verts[quad].parent = Some(vertex);
    } else {
        mesh.tets[t].quadruple = Some(vertex);
    }
}

fn snap_quadruple_for_tet_to_cut(mesh: &mut TetMesh, t: usize, cut: usize) {
    let Some(quad) = mesh.tets[t].quadruple else { return };
    if mesh.verts[quad].order == VertexOrder::Quadruple {
        mesh.verts[quad].parent = Some(cut);
    } else {
        mesh.tets[t].quadruple = Some(cut);
    }
}

fn snap_quadruple_for_tet_to_triple(
    mesh: &mut TetMesh,
    t: usize,
    triple: usize,
) {
    let Some(quad) = mesh.tets[t].quadruple else { return };
    if mesh.verts[quad].order == VertexOrder::Quadruple {
        mesh.verts[quad].parent = Some(triple);
    } else {
        mesh.tets[t].quadruple = Some(triple);
    }
}

/// Snaps a quadruple onto an edge cut, recursively
///
/// Collapsing a quadruple onto an edge degenerates the two incident
/// triples; if a neighboring tet's quadruple had already snapped onto one
/// of those triples, the collapse propagates around the edge.
fn snap_quadruple_for_tet_to_edge(mesh: &mut TetMesh, t: usize, e: usize) {
    let Some(cut) = mesh.edges[e].cut else { return };
    if let Some(quad) = mesh.tets[t].quadruple {
        if !mesh.same_vertex(quad, cut) {
            snap_quadruple_for_tet_to_cut(mesh, t, cut);
        }
    }

    for f in mesh.tet_faces_with_edge(t, e) {
        let Some(triple) = mesh.faces[f].triple else { continue };
        let order = mesh.root_order(triple);
        if order == VertexOrder::Triple {
            snap_triple_for_face_to_cut(mesh, f, cut);
            if let Some(op) = mesh.opposite_tet_across_face(t, f) {
                let follows = mesh.tets[op]
                    .quadruple
                    .is_some_and(|q| mesh.same_vertex(q, triple));
                if follows {
                    snap_quadruple_for_tet_to_edge(mesh, op, e);
                }
            }
        } else if order == VertexOrder::Cut && !mesh.same_vertex(triple, cut)
        {
            if let Some(op) = mesh.opposite_tet_across_face(t, f) {
                let follows = mesh.tets[op]
                    .quadruple
                    .is_some_and(|q| mesh.same_vertex(q, triple));
                if follows {
                    snap_quadruple_for_tet_to_edge(mesh, op, e);
                }
            }
            snap_triple_for_face_to_cut(mesh, f, cut);
        }
    }
}

////////////////////////////////////////////////////////////////////////////
// degeneracy resolution

/// Propagates snaps around `vertex` until the interface pattern is
/// consistent again
///
/// Four rules iterate to a fixed point: interfaces below a snapped
/// quadruple or triple must follow it down, a triple with two cuts on the
/// vertex degenerates onto it, and a quadruple with three triples on the
/// vertex likewise.
fn resolve_degeneracies_around_vertex(mesh: &mut TetMesh, vertex: usize) {
    let faces = mesh.faces_around_vertex(vertex);
    let tets: Vec<usize> = mesh.tets_around_vertex(vertex).to_vec();

    let mut changed = true;
    while changed {
        changed = false;

        // interfaces under a quadruple snapped to the vertex follow it
        for &t in &tets {
            let follows = mesh.tets[t]
                .quadruple
                .is_some_and(|q| mesh.same_vertex(q, vertex));
            if !follows {
                continue;
            }
            for e in mesh.tets[t].edges {
                let real_cut = mesh.edges[e]
                    .cut
                    .is_some_and(|c| mesh.root_order(c) == VertexOrder::Cut);
                if real_cut && mesh.edges[e].verts.contains(&vertex) {
                    snap_cut_for_edge_to_vertex(mesh, e, vertex);
                    changed = true;
                }
            }
            for f in mesh.tets[t].faces {
                let real_triple = mesh.faces[f].triple.is_some_and(|tr| {
                    mesh.root_order(tr) == VertexOrder::Triple
                });
                if real_triple && mesh.faces[f].verts.contains(&vertex) {
                    snap_triple_for_face_to_vertex(mesh, f, vertex);
                    changed = true;
                }
            }
        }

        // cuts under a triple snapped to the vertex follow it
        for &f in &faces {
            let follows = mesh.faces[f]
                .triple
                .is_some_and(|tr| mesh.same_vertex(tr, vertex));
            if !follows {
                continue;
            }
            for e in mesh.face_edges(f) {
                let real_cut = mesh.edges[e]
                    .cut
                    .is_some_and(|c| mesh.root_order(c) == VertexOrder::Cut);
                if real_cut && mesh.edges[e].verts.contains(&vertex) {
                    snap_cut_for_edge_to_vertex(mesh, e, vertex);
                    changed = true;
                }
            }
        }

        // a triple with two cuts on the vertex degenerates
        for &f in &faces {
            let real_triple = mesh.faces[f]
                .triple
                .is_some_and(|tr| mesh.root_order(tr) == VertexOrder::Triple);
            if !real_triple {
                continue;
            }
            let count = mesh
                .face_edges(f)
                .into_iter()
                .filter(|&e| {
                    mesh.edges[e]
                        .cut
                        .is_some_and(|c| mesh.same_vertex(c, vertex))
                })
                .count();
            if count == 2 {
                snap_triple_for_face_to_vertex(mesh, f, vertex);
                changed = true;
            }
        }

        // a quadruple with three triples on the vertex degenerates
        for &t in &tets {
            let real_quad = mesh.tets[t].quadruple.is_some_and(|q| {
                mesh.root_order(q) == VertexOrder::Quadruple
            });
            if !real_quad {
                continue;
            }
            let count = mesh.tets[t]
                .faces
                .into_iter()
                .filter(|&f| {
                    mesh.faces[f]
                        .triple
                        .is_some_and(|tr| mesh.same_vertex(tr, vertex))
                })
                .count();
            if count == 3 {
                snap_quadruple_for_tet_to_vertex(mesh, t, vertex);
                changed = true;
            }
        }
    }
}

/// Collapses quadruples that have degenerated onto the cut of edge `e`
fn resolve_degeneracies_around_edge(mesh: &mut TetMesh, e: usize) {
    let Some(cut) = mesh.edges[e].cut else { return };
    let tets = mesh.tets_around_edge(e);

    for &t in &tets {
        let on_cut = mesh.tets[t]
            .quadruple
            .is_some_and(|q| mesh.same_vertex(q, cut));
        if on_cut {
            snap_quadruple_for_tet_to_edge(mesh, t, e);
        }
    }

    for &t in &tets {
        let real_quad = mesh.tets[t]
            .quadruple
            .is_some_and(|q| mesh.root_order(q) == VertexOrder::Quadruple);
        if !real_quad {
            continue;
        }
        let count = mesh.tets[t]
            .faces
            .into_iter()
            .filter(|&f| {
                mesh.faces[f]
                    .triple
                    .is_some_and(|tr| mesh.same_vertex(tr, cut))
            })
            .count();
        if count == 2 {
            snap_quadruple_for_tet_to_edge(mesh, t, e);
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::mesh::{Tet, Vertex};

    fn unit_tet() -> TetMesh {
        let verts = vec![
            Vertex::new(Vector3::new(0.0, 0.0, 0.0)),
            Vertex::new(Vector3::new(1.0, 0.0, 0.0)),
            Vertex::new(Vector3::new(0.0, 1.0, 0.0)),
            Vertex::new(Vector3::new(0.0, 0.0, 1.0)),
        ];
        let mut m = TetMesh::new(verts, vec![Tet::new([0, 1, 2, 3], 0)]);
        m.build_adjacency();
        m
    }

    #[test]
    fn conform_quadruple_clamps_to_face() {
        let mut m = unit_tet();
        // outside the tet, past the face opposite vertex 0
        let quad = m.push_vertex(Vertex::interface(
            Vector3::new(0.5, 0.5, 0.5),
            VertexOrder::Quadruple,
        ));
        m.tets[0].quadruple = Some(quad);
        let warp_pt = m.verts[0].pos;
        conform_quadruple(&mut m, 0, 0, warp_pt);
        let p = m.verts[quad].pos_next;
        // clamped onto the x+y+z=1 plane
        assert!((p.x + p.y + p.z - 1.0).abs() < 1e-9);
        assert_eq!(m.verts[quad].conformed_face, Some(m.tets[0].faces[0]));
        assert_eq!(m.verts[quad].conformed_edge, None);
    }

    #[test]
    fn conform_quadruple_interior_point_stays() {
        let mut m = unit_tet();
        let p0 = Vector3::new(0.2, 0.2, 0.2);
        let quad =
            m.push_vertex(Vertex::interface(p0, VertexOrder::Quadruple));
        m.tets[0].quadruple = Some(quad);
        let warp_pt = m.verts[0].pos;
        conform_quadruple(&mut m, 0, 0, warp_pt);
        assert!((m.verts[quad].pos_next - p0).norm() < 1e-9);
        assert_eq!(m.verts[quad].conformed_face, None);
    }

    #[test]
    fn snap_primitives_respect_vertex_origin() {
        let mut m = unit_tet();
        let e = m.tet_edge_between(0, 0, 1);
        let cut = m.push_vertex(Vertex::interface(
            Vector3::new(0.5, 0.0, 0.0),
            VertexOrder::Cut,
        ));
        m.edges[e].cut = Some(cut);

        // a real cut snaps through its parent pointer
        snap_cut_for_edge_to_vertex(&mut m, e, 0);
        assert_eq!(m.verts[cut].parent, Some(0));
        assert_eq!(m.edges[e].cut, Some(cut));
        assert!(m.same_vertex(cut, 0));

        // a virtual cut rewrites the slot instead
        let e2 = m.tet_edge_between(0, 2, 3);
        m.edges[e2].cut = Some(2); // lattice stand-in
        snap_cut_for_edge_to_vertex(&mut m, e2, 3);
        assert_eq!(m.edges[e2].cut, Some(3));
    }

    #[test]
    fn degenerate_triple_collapses_onto_vertex() {
        let mut m = unit_tet();
        let f = m.tets[0].faces[3]; // face (0,1,2)
        let edges = m.face_edges(f);
        for &e in &edges {
            let [a, b] = m.edges[e].verts;
            let mid = (m.verts[a].pos + m.verts[b].pos) * 0.5;
            let cut =
                m.push_vertex(Vertex::interface(mid, VertexOrder::Cut));
            m.edges[e].cut = Some(cut);
        }
        let trip = m.push_vertex(Vertex::interface(
            Vector3::new(0.3, 0.3, 0.0),
            VertexOrder::Triple,
        ));
        m.faces[f].triple = Some(trip);

        // snap the two cuts incident to vertex 0 onto it
        let e01 = m.tet_edge_between(0, 0, 1);
        let e02 = m.tet_edge_between(0, 0, 2);
        snap_cut_for_edge_to_vertex(&mut m, e01, 0);
        snap_cut_for_edge_to_vertex(&mut m, e02, 0);

        resolve_degeneracies_around_vertex(&mut m, 0);
        let t = m.faces[f].triple.unwrap();
        assert!(m.same_vertex(t, 0));
    }

    #[test]
    fn project_triple_stays_on_warped_plane() {
        let mut m = unit_tet();
        let f = m.tets[0].faces[3]; // face (0,1,2), z = 0
        let trip = m.push_vertex(Vertex::interface(
            Vector3::new(0.25, 0.25, 0.0),
            VertexOrder::Triple,
        ));
        m.faces[f].triple = Some(trip);
        let quad = m.push_vertex(Vertex::interface(
            Vector3::new(0.25, 0.25, 0.25),
            VertexOrder::Quadruple,
        ));

        // warp vertex 0 within the z=0 plane; projection must stay there
        let warp_pt = Vector3::new(-0.1, -0.1, 0.0);
        let p = project_triple(&m, f, quad, 0, warp_pt);
        assert!(p.z.abs() < 1e-9);
    }
}
