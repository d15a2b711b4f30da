//! Interface vertex computation
//!
//! Walks the adjacency arenas and materializes the geometry where
//! materials meet: a cut on every edge whose endpoints disagree, a triple
//! point on every face with three cuts, and a quadruple point in every tet
//! with six.  Edges crossing the volume boundary get their cut clamped
//! onto the boundary itself so the output conforms to the domain hull.
use arrayvec::ArrayVec;
use log::{debug, info};
use nalgebra::{Matrix3, Vector3};

use super::violation;
use super::CleaverConfig;
use crate::mesh::{Anchor, TetMesh, Vertex, VertexOrder};
use crate::volume::Volume;

/// Computes all cut, triple and quadruple vertices
pub fn compute_interfaces(
    mesh: &mut TetMesh,
    volume: &Volume,
    config: &CleaverConfig,
) {
    for e in &mut mesh.edges {
        e.evaluated = false;
    }
    let mut cuts = 0;
    for e in 0..mesh.edges.len() {
        if !mesh.edges[e].evaluated {
            compute_cut_for_edge(mesh, e, volume, config);
            cuts += usize::from(mesh.edges[e].cut.is_some());
        }
    }

    for f in &mut mesh.faces {
        f.evaluated = false;
    }
    let mut triples = 0;
    for f in 0..mesh.faces.len() {
        if !mesh.faces[f].evaluated {
            compute_triple_for_face(mesh, f, volume);
            if mesh.faces[f].triple.is_some() {
                violation::check_triple_violates_vertices(mesh, f);
                triples += 1;
            }
        }
    }

    let mut quads = 0;
    for t in 0..mesh.tets.len() {
        compute_quadruple_for_tet(mesh, t);
        quads += usize::from(mesh.tets[t].quadruple.is_some());
    }
    info!("interfaces: {cuts} cuts, {triples} triples, {quads} quadruples");
}

fn sorted_materials<const N: usize>(labels: &[usize]) -> ArrayVec<usize, N> {
    let mut mats = ArrayVec::new();
    for &l in labels {
        if !mats.contains(&l) {
            mats.push(l);
        }
    }
    mats.sort_unstable();
    mats
}

/// Solves `g(t) = 0` on `[0, 1]` by secant steps inside a shrinking
/// bisection bracket, starting from the linear estimate `t0`
///
/// `g_lo` and `g_hi` are the (opposite-signed) values at the bracket
/// endpoints.  Secant steps that escape the bracket fall back to its
/// midpoint, so the iteration cap bounds the work on badly-behaved
/// fields.
fn refine_crossing<G: Fn(f64) -> f64>(
    g: G,
    mut g_lo: f64,
    mut g_hi: f64,
    t0: f64,
    config: &CleaverConfig,
) -> f64 {
    let (mut lo, mut hi) = (0.0, 1.0);
    let mut t = t0.clamp(lo, hi);
    for _ in 0..config.cut_max_iterations {
        let gt = g(t);
        if gt.abs() < config.cut_tolerance {
            break;
        }
        if (gt < 0.0) == (g_lo < 0.0) {
            lo = t;
            g_lo = gt;
        } else {
            hi = t;
            g_hi = gt;
        }
        let secant = lo - g_lo * (hi - lo) / (g_hi - g_lo);
        t = if secant > lo && secant < hi {
            secant
        } else {
            (lo + hi) * 0.5
        };
    }
    t
}

/// Places a cut vertex on edge `e` if its endpoint labels differ
///
/// The crossing parameter starts from linear interpolation of the two
/// dominant materials' corner values, then converges onto the true
/// interface of the underlying fields by bracketed secant iteration.
/// Edges whose field difference never changes sign (sampling mismatch)
/// keep the linear estimate.  Boundary-spanning cuts land exactly on
/// the volume hull instead.  The violation state against both endpoints
/// is recorded immediately.
fn compute_cut_for_edge(
    mesh: &mut TetMesh,
    e: usize,
    volume: &Volume,
    config: &CleaverConfig,
) {
    mesh.edges[e].evaluated = true;
    let [a, b] = mesh.edges[e].verts;
    if mesh.verts[a].label == mesh.verts[b].label {
        return;
    }

    if mesh.verts[a].exterior != mesh.verts[b].exterior {
        compute_boundary_cut(mesh, e, volume);
        return;
    }

    let pa = mesh.verts[a].pos;
    let pb = mesh.verts[b].pos;
    let a_mat = mesh.verts[a].label;
    let b_mat = mesh.verts[b].label;

    let a1 = volume.value_at(pa, a_mat);
    let a2 = volume.value_at(pb, a_mat);
    let b1 = volume.value_at(pa, b_mat);
    let b2 = volume.value_at(pb, b_mat);
    let mut t = ((a1 - b1) / (b2 - a2 + a1 - b1)).clamp(0.0, 1.0);

    let g0 = a1 - b1;
    let g1 = a2 - b2;
    if g0 * g1 < 0.0 {
        let g = |t: f64| {
            let p = pa * (1.0 - t) + pb * t;
            volume.value_at(p, a_mat) - volume.value_at(p, b_mat)
        };
        t = refine_crossing(g, g0, g1, t, config);
    } else {
        // dominance never flips along the edge even though the labels
        // disagree, so there is nothing to converge onto
        debug!("ambiguous edge {e}: keeping the linear estimate t={t}");
    }

    let mut cut =
        Vertex::interface(pa * (1.0 - t) + pb * t, VertexOrder::Cut);
    cut.label = a_mat;
    cut.mats = sorted_materials(&[a_mat, b_mat]);
    cut.closest =
        Some(Anchor::Vertex(if t < 0.5 { a } else { b }));
    cut.violating = t <= mesh.edges[e].alphas[0]
        || t >= 1.0 - mesh.edges[e].alphas[1];
    let cut = mesh.push_vertex(cut);
    mesh.edges[e].cut = Some(cut);
}

/// Cut placement for an edge with exactly one exterior endpoint
///
/// The interface here is the volume hull itself: walk from the interior
/// endpoint toward the exterior one and stop at the first bounding plane.
fn compute_boundary_cut(mesh: &mut TetMesh, e: usize, volume: &Volume) {
    let [v0, v1] = mesh.edges[e].verts;
    let (int_v, ext_v) = if mesh.verts[v0].exterior {
        (v1, v0)
    } else {
        (v0, v1)
    };
    let a = mesh.verts[int_v].pos;
    let b = mesh.verts[ext_v].pos;
    let lo = volume.bounds().min_corner();
    let hi = volume.bounds().max_corner();

    let mut t = f64::INFINITY;
    for axis in 0..3 {
        if b[axis] > hi[axis] {
            t = t.min((hi[axis] - a[axis]) / (b[axis] - a[axis]));
        } else if b[axis] < lo[axis] {
            t = t.min((lo[axis] - a[axis]) / (b[axis] - a[axis]));
        }
    }

    let mut cut =
        Vertex::interface(a * (1.0 - t) + b * t, VertexOrder::Cut);
    cut.label = mesh.verts[v0].label.min(mesh.verts[v1].label);
    cut.mats =
        sorted_materials(&[mesh.verts[v0].label, mesh.verts[v1].label]);

    // t runs from the interior endpoint; alphas from the edge's own order
    let (alpha_near, alpha_far) = if int_v == v0 {
        (mesh.edges[e].alphas[0], mesh.edges[e].alphas[1])
    } else {
        (mesh.edges[e].alphas[1], mesh.edges[e].alphas[0])
    };
    cut.violating = t <= alpha_near || t >= 1.0 - alpha_far;
    cut.closest =
        Some(Anchor::Vertex(if t < 0.5 { int_v } else { ext_v }));
    let cut = mesh.push_vertex(cut);
    mesh.edges[e].cut = Some(cut);
}

/// Clamps `p` into the triangle `(a, b, c)` by truncating negative
/// barycentric coordinates
fn force_point_into_triangle(
    a: Vector3<f64>,
    b: Vector3<f64>,
    c: Vector3<f64>,
    p: Vector3<f64>,
) -> Vector3<f64> {
    let v0 = c - a;
    let v1 = b - a;
    let v2 = p - a;

    let dot00 = v0.dot(&v0);
    let dot01 = v0.dot(&v1);
    let dot02 = v0.dot(&v2);
    let dot11 = v1.dot(&v1);
    let dot12 = v1.dot(&v2);

    let inv_denom = 1.0 / (dot00 * dot11 - dot01 * dot01);
    let mut u = (dot11 * dot02 - dot01 * dot12) * inv_denom;
    let mut v = (dot00 * dot12 - dot01 * dot02) * inv_denom;
    let mut w = 1.0 - u - v;

    u = u.max(0.0);
    v = v.max(0.0);
    w = w.max(0.0);
    let l1 = u + v + w;
    if l1 > 0.0 {
        u /= l1;
        v /= l1;
    }
    a * (1.0 - u - v) + b * v + c * u
}

/// Places a triple point on face `f` if all three of its edges are cut
///
/// The interior position solves the 3x3 barycentric system equating the
/// three dominant materials over the face, then clamps into the triangle.
/// Faces touching the exterior put the triple midway between the two cuts
/// incident to the exterior corner, pinning the curve onto the hull.
fn compute_triple_for_face(mesh: &mut TetMesh, f: usize, volume: &Volume) {
    mesh.faces[f].evaluated = true;
    let edges = mesh.face_edges(f);
    if edges.iter().any(|&e| mesh.edges[e].cut.is_none()) {
        return;
    }

    let verts = mesh.faces[f].verts;
    let labels = [
        mesh.verts[verts[0]].label,
        mesh.verts[verts[1]].label,
        mesh.verts[verts[2]].label,
    ];
    let positions = [
        mesh.verts[verts[0]].pos,
        mesh.verts[verts[1]].pos,
        mesh.verts[verts[2]].pos,
    ];

    if let Some(ext) =
        (0..3).find(|&i| mesh.verts[verts[i]].exterior)
    {
        // midpoint of the two cuts incident to the exterior corner
        let c1 = mesh.edges[edges[(ext + 1) % 3]].cut.unwrap_or(0);
        let c2 = mesh.edges[edges[(ext + 2) % 3]].cut.unwrap_or(0);
        let pos = (mesh.verts[c1].pos + mesh.verts[c2].pos) * 0.5;
        let mut triple = Vertex::interface(pos, VertexOrder::Triple);
        triple.mats = sorted_materials(&labels);
        triple.label = *labels.iter().min().unwrap_or(&0);
        mesh.faces[f].triple = Some(mesh.push_vertex(triple));
        return;
    }

    // barycentric weights where the three indicators tie: M lambda = 1
    let m = Matrix3::from_fn(|i, j| {
        volume.value_at(positions[i], labels[j])
    });
    let pos = match m.try_inverse() {
        Some(inv) => {
            let lambda = inv * Vector3::new(1.0, 1.0, 1.0);
            let l1 = lambda.x.abs() + lambda.y.abs() + lambda.z.abs();
            let lambda = lambda / l1;
            positions[0] * lambda.x
                + positions[1] * lambda.y
                + positions[2] * lambda.z
        }
        // degenerate indicator system: fall back to the cut centroid
        None => {
            let sum: Vector3<f64> = edges
                .iter()
                .map(|&e| {
                    mesh.verts[mesh.edges[e].cut.unwrap_or(0)].pos
                })
                .sum();
            sum / 3.0
        }
    };
    let pos = force_point_into_triangle(
        positions[0],
        positions[1],
        positions[2],
        pos,
    );

    let mut triple = Vertex::interface(pos, VertexOrder::Triple);
    triple.mats = sorted_materials(&labels);
    triple.label = *labels.iter().min().unwrap_or(&0);
    mesh.faces[f].triple = Some(mesh.push_vertex(triple));
}

/// Places a quadruple point in tet `t` if all six of its edges are cut
///
/// Four mutually-tied indicators over a single lattice tet are rare and
/// always near-central, so the centroid is used directly.
fn compute_quadruple_for_tet(mesh: &mut TetMesh, t: usize) {
    mesh.tets[t].evaluated = true;
    if mesh.tets[t].edges.iter().any(|&e| mesh.edges[e].cut.is_none()) {
        return;
    }

    let verts = mesh.tets[t].verts;
    let labels: Vec<usize> =
        verts.iter().map(|&v| mesh.verts[v].label).collect();
    let pos = verts
        .iter()
        .map(|&v| mesh.verts[v].pos)
        .sum::<Vector3<f64>>()
        / 4.0;

    let mut quad = Vertex::interface(pos, VertexOrder::Quadruple);
    quad.mats = sorted_materials(&labels);
    quad.label = *labels.iter().min().unwrap_or(&0);
    mesh.tets[t].quadruple = Some(mesh.push_vertex(quad));
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::cleave::{CleaverConfig, CleaverMesher};
    use crate::field::{BoundingBox, PlaneField, SphereField};
    use crate::lattice::{LatticeOptions, MeshMode};
    use std::sync::Arc;

    #[test]
    fn force_point_clamps_outside_points() {
        let a = Vector3::new(0.0, 0.0, 0.0);
        let b = Vector3::new(1.0, 0.0, 0.0);
        let c = Vector3::new(0.0, 1.0, 0.0);
        let inside = Vector3::new(0.25, 0.25, 0.0);
        assert!((force_point_into_triangle(a, b, c, inside) - inside)
            .norm()
            < 1e-12);
        let outside = Vector3::new(-1.0, 0.5, 0.0);
        let clamped = force_point_into_triangle(a, b, c, outside);
        assert!(clamped.x >= -1e-12);
        assert!(clamped.y >= -1e-12);
        assert!(clamped.x + clamped.y <= 1.0 + 1e-12);
    }

    fn run_to_interfaces(v: &Volume) -> CleaverMesher<'_> {
        let config = CleaverConfig {
            lattice: LatticeOptions {
                mode: MeshMode::Constant,
                max_levels: None,
            },
            ..CleaverConfig::default()
        };
        let mut m = CleaverMesher::new(v, config);
        m.create_background_mesh().unwrap();
        m.sample_volume().unwrap();
        m.compute_alphas().unwrap();
        m.compute_interfaces().unwrap();
        m
    }

    #[test]
    fn two_material_volume_gets_cuts_but_no_triples() {
        let b = BoundingBox::at_origin(Vector3::new(8.0, 8.0, 8.0));
        let p: Arc<dyn crate::field::ScalarField> = Arc::new(
            PlaneField::new(Vector3::new(1.0, 0.0, 0.0), -4.2, b),
        );
        let inv = Arc::new(crate::field::InverseField::new(p.clone()));
        let v = Volume::new(vec![p, inv]).unwrap();
        let m = run_to_interfaces(&v);
        let mesh = m.mesh().unwrap();

        let cut_edges: Vec<_> = mesh
            .edges
            .iter()
            .filter(|e| e.cut.is_some())
            .collect();
        assert!(!cut_edges.is_empty());
        for e in &cut_edges {
            let cut = e.cut.unwrap();
            assert_eq!(mesh.verts[cut].order, VertexOrder::Cut);
            assert_eq!(mesh.verts[cut].mats.as_slice(), &[0, 1]);
            // cut lies on its edge segment
            let pa = mesh.verts[e.verts[0]].pos;
            let pb = mesh.verts[e.verts[1]].pos;
            let t = (mesh.verts[cut].pos - pa).norm() / (pb - pa).norm();
            assert!((0.0..=1.0).contains(&t));
            // a plane interface at x=4.2 crosses near the middle of the
            // lattice edges, never on an endpoint
            assert!((mesh.verts[cut].pos.x - 4.2).abs() < 1.0);
        }
        assert!(mesh.faces.iter().all(|f| f.triple.is_none()));
        assert!(mesh.tets.iter().all(|t| t.quadruple.is_none()));
    }

    #[test]
    fn three_material_volume_gets_triples() {
        let b = BoundingBox::at_origin(Vector3::new(8.0, 8.0, 8.0));
        let s1 = Arc::new(SphereField::new(
            Vector3::new(3.4, 4.0, 4.0),
            2.0,
            b,
        ));
        let s2 = Arc::new(SphereField::new(
            Vector3::new(4.6, 4.0, 4.0),
            2.0,
            b,
        ));
        let bg = Arc::new(crate::field::ConstantField::new(-0.5, b));
        let v = Volume::new(vec![s1, s2, bg]).unwrap();
        let m = run_to_interfaces(&v);
        let mesh = m.mesh().unwrap();

        let triples: Vec<_> = mesh
            .faces
            .iter()
            .filter_map(|f| f.triple)
            .collect();
        assert!(!triples.is_empty());
        for &t in &triples {
            assert_eq!(mesh.verts[t].order, VertexOrder::Triple);
            assert_eq!(mesh.verts[t].mats.len(), 3);
        }
    }

    #[test]
    fn triples_stay_inside_their_faces() {
        let b = BoundingBox::at_origin(Vector3::new(8.0, 8.0, 8.0));
        let s1 = Arc::new(SphereField::new(
            Vector3::new(3.4, 4.0, 4.0),
            2.0,
            b,
        ));
        let s2 = Arc::new(SphereField::new(
            Vector3::new(4.6, 4.0, 4.0),
            2.0,
            b,
        ));
        let bg = Arc::new(crate::field::ConstantField::new(-0.5, b));
        let v = Volume::new(vec![s1, s2, bg]).unwrap();
        let m = run_to_interfaces(&v);
        let mesh = m.mesh().unwrap();

        for f in &mesh.faces {
            let Some(t) = f.triple else { continue };
            let p = mesh.verts[t].pos;
            let clamped = force_point_into_triangle(
                mesh.verts[f.verts[0]].pos,
                mesh.verts[f.verts[1]].pos,
                mesh.verts[f.verts[2]].pos,
                p,
            );
            assert!((clamped - p).norm() < 1e-9);
        }
    }

    #[test]
    fn cuts_converge_onto_curved_interfaces() {
        // the linear estimate alone lands well off a spherical surface,
        // so this only passes if the secant refinement runs
        let b = BoundingBox::at_origin(Vector3::new(8.0, 8.0, 8.0));
        let s: Arc<dyn crate::field::ScalarField> = Arc::new(
            SphereField::new(Vector3::new(4.0, 4.0, 4.0), 2.3, b),
        );
        let bg = Arc::new(crate::field::ConstantField::new(0.0, b));
        let v = Volume::new(vec![s, bg]).unwrap();
        let m = run_to_interfaces(&v);
        let mesh = m.mesh().unwrap();

        let mut checked = 0;
        for e in &mesh.edges {
            let Some(cut) = e.cut else { continue };
            let [a, b] = e.verts;
            if mesh.verts[a].exterior || mesh.verts[b].exterior {
                continue;
            }
            let p = mesh.verts[cut].pos;
            let mats = &mesh.verts[cut].mats;
            let d = (v.value_at(p, mats[0]) - v.value_at(p, mats[1])).abs();
            assert!(d < 1e-6, "unconverged cut: |f0 - f1| = {d}");
            checked += 1;
        }
        assert!(checked > 0);
    }
}
