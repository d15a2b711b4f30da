//! Material sampling and alpha safety parameters
//!
//! Sampling tags every lattice vertex with the dominant material at its
//! position; vertices outside the volume bounds get a synthetic exterior
//! label one past the real materials.  Alphas are per-endpoint fractions
//! of edge length bounding how far a warp may pull a vertex before the
//! surrounding tets risk inversion.
use log::info;
use nalgebra::Vector3;
use rayon::prelude::*;

use super::CleaverConfig;
use crate::lattice::MeshMode;
use crate::mesh::TetMesh;
use crate::volume::Volume;

/// Samples the dominant material at every lattice vertex
pub fn sample_volume(mesh: &mut TetMesh, volume: &Volume) {
    let exterior_label = volume.number_of_materials();
    mesh.verts.par_iter_mut().for_each(|vert| {
        if volume.bounds().contains(vert.pos) {
            vert.label = volume.dominant_material(vert.pos);
            vert.exterior = false;
        } else {
            vert.label = exterior_label;
            vert.exterior = true;
        }
    });
    let outside = mesh.verts.iter().filter(|v| v.exterior).count();
    info!(
        "sampled {} vertices ({outside} exterior)",
        mesh.vertex_count()
    );
}

/// True for an axis-aligned lattice edge
///
/// BCC lattices have two edge classes: axis-aligned (long) edges between
/// cell corners and diagonal (short) edges from centers to corners.
fn is_long_edge(d: Vector3<f64>) -> bool {
    let nonzero =
        [d.x, d.y, d.z].iter().filter(|c| c.abs() > 1e-9).count();
    nonzero == 1
}

/// Computes alpha safety parameters for every edge
///
/// Constant lattices use the long/short pair from the configuration;
/// adaptive lattices use the uniform `alpha_init` since grading blurs the
/// edge classes.  A reduction pass then shrinks alphas so that no tet's
/// safety regions can overlap past its altitudes.
pub fn compute_alphas(mesh: &mut TetMesh, config: &CleaverConfig) {
    for e in 0..mesh.edges.len() {
        let [a, b] = mesh.edges[e].verts;
        let d = mesh.verts[b].pos - mesh.verts[a].pos;
        let long = is_long_edge(d);
        let alpha = match config.lattice.mode {
            MeshMode::Constant => {
                if long {
                    config.alpha_long
                } else {
                    config.alpha_short
                }
            }
            MeshMode::Adaptive => config.alpha_init,
        };
        let edge = &mut mesh.edges[e];
        edge.long = long;
        edge.alphas = [alpha, alpha];
    }

    for t in 0..mesh.tets.len() {
        make_tet_alpha_safe(mesh, t, config.alpha_init);
    }
    info!("alphas computed for {} edges", mesh.edges.len());
}

/// Shrinks the alphas of every edge around `vertex` so their absolute
/// length never exceeds `length`
fn reduce_alphas_around_vertex(mesh: &mut TetMesh, vertex: usize, length: f64) {
    for e in mesh.edges_around_vertex(vertex) {
        let edge = &mesh.edges[e];
        let [a, b] = edge.verts;
        let edge_length = (mesh.verts[b].pos - mesh.verts[a].pos).norm();
        if edge_length < 1e-14 {
            continue;
        }
        if length < edge.alpha_for(vertex) * edge_length {
            mesh.edges[e].set_alpha_for(vertex, length / edge_length);
        }
    }
}

fn make_tet_alpha_safe(mesh: &mut TetMesh, t: usize, alpha_init: f64) {
    for v in 0..4 {
        let xi = (0.5 - alpha_init).clamp(0.0, 0.5);
        let verts = mesh.tets[t].verts;
        let others: Vec<Vector3<f64>> = (0..4)
            .filter(|&i| i != v)
            .map(|i| mesh.verts[verts[i]].pos)
            .collect();
        let n = (others[1] - others[0]).cross(&(others[2] - others[0]));
        if n.norm() < 1e-14 {
            continue;
        }
        let n = n.normalize();
        let altitude =
            n.dot(&(mesh.verts[verts[v]].pos - others[0])).abs();
        let safe_length = (0.5 - xi) * altitude;

        // every corner's edges are limited by this altitude
        for corner in verts {
            reduce_alphas_around_vertex(mesh, corner, safe_length);
        }
    }
}
