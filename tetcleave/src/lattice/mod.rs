//! Background lattice construction
//!
//! Builds the initial conforming tetrahedral lattice that cleaving deforms.
//! Both modes produce BCC-derived tets (cell centers joined to cell
//! corners):
//!
//! - [`MeshMode::Constant`]: a uniform lattice at the volume resolution.
//! - [`MeshMode::Adaptive`]: an octree graded to the sizing field, with
//!   bisection/quadrisection stencils where neighboring cells differ in
//!   size and pyramid splits on the domain boundary.
//!
//! Vertex identity is tracked on a doubled integer grid (cell corners at
//! even coordinates, centers and midpoints at odd), so deduplication is
//! exact and independent of floating-point evaluation order.
use std::collections::HashMap;

use log::{debug, info};
use nalgebra::Vector3;

use crate::mesh::{Tet, TetMesh, Vertex};
use crate::volume::Volume;
use crate::Error;

mod octree;

pub use octree::Octree;

/// Lattice construction mode
#[derive(
    Copy,
    Clone,
    Debug,
    PartialEq,
    Eq,
    strum::Display,
    serde::Serialize,
    serde::Deserialize,
)]
pub enum MeshMode {
    /// Octree graded to the sizing field
    Adaptive,
    /// Uniform lattice at the volume resolution
    Constant,
}

/// Corner indices of each cell face, counter-clockwise as seen from the
/// cell center; corners numbered 0..8 as min, +x, +x+y, +y, +z, +x+z,
/// +x+y+z, +y+z
const FACE_VERTICES: [[usize; 4]; 6] = [
    [0, 3, 7, 4], // -x
    [5, 6, 2, 1], // +x
    [4, 5, 1, 0], // -y
    [3, 2, 6, 7], // +y
    [0, 1, 2, 3], // -z
    [7, 6, 5, 4], // +z
];

/// Chooses which diagonal splits an unshared quad face, per face and
/// octant, so that cells on either side of a coarse/fine boundary agree:
/// the diagonal always joins the corner shared with the parent cell and
/// the parent's face center
const FACE_DIAGONAL_BIT: [[bool; 8]; 6] = [
    [true, true, false, false, false, false, true, true], // -x
    [false, false, true, true, true, true, false, false], // +x
    [false, true, false, true, true, false, true, false], // -y
    [true, false, true, false, false, true, false, true], // +y
    [true, false, false, true, true, false, false, true], // -z
    [false, true, true, false, false, true, true, false], // +z
];

/// Options for the background mesh builder
#[derive(Copy, Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct LatticeOptions {
    /// Construction mode
    pub mode: MeshMode,
    /// Maximum octree depth for adaptive mode; `None` sizes the budget so
    /// the finest cells are about one volume unit wide
    pub max_levels: Option<u32>,
}

impl Default for LatticeOptions {
    fn default() -> Self {
        Self {
            mode: MeshMode::Adaptive,
            max_levels: None,
        }
    }
}

/// Deduplicating vertex pool over the doubled integer grid
struct VertexPool {
    verts: Vec<Vertex>,
    map: HashMap<[u32; 3], usize>,
    origin: Vector3<f64>,
    /// Domain units per doubled-grid step
    scale: f64,
}

impl VertexPool {
    fn new(origin: Vector3<f64>, scale: f64) -> Self {
        Self {
            verts: vec![],
            map: HashMap::new(),
            origin,
            scale,
        }
    }

    fn pos(&self, key: [u32; 3]) -> Vector3<f64> {
        self.origin
            + Vector3::new(
                f64::from(key[0]),
                f64::from(key[1]),
                f64::from(key[2]),
            ) * self.scale
    }

    fn get(&mut self, key: [u32; 3]) -> usize {
        if let Some(&v) = self.map.get(&key) {
            return v;
        }
        let v = self.verts.len();
        self.verts.push(Vertex::new(self.pos(key)));
        self.map.insert(key, v);
        v
    }

    fn lookup(&self, key: [u32; 3]) -> Option<usize> {
        self.map.get(&key).copied()
    }
}

/// Builds the background lattice for `volume`
///
/// The adaptive octree refines while the sizing field's minimum over a
/// cell is smaller than the cell width, until the depth budget is
/// exhausted; it then returns the coarsest lattice satisfying the graded
/// refinement rule rather than iterating further.
pub fn build_background_mesh(
    volume: &Volume,
    opts: &LatticeOptions,
) -> Result<TetMesh, Error> {
    let mut mesh = match opts.mode {
        MeshMode::Constant => build_constant(volume)?,
        MeshMode::Adaptive => build_adaptive(volume, opts)?,
    };
    if mesh.tet_count() == 0 {
        return Err(Error::EmptyBackgroundMesh);
    }
    // start cleaving from a positively-oriented lattice
    mesh.fix_vertex_windup();
    info!(
        "background lattice: {} verts, {} tets ({})",
        mesh.vertex_count(),
        mesh.tet_count(),
        opts.mode
    );
    Ok(mesh)
}

////////////////////////////////////////////////////////////////////////////

fn build_constant(volume: &Volume) -> Result<TetMesh, Error> {
    let size = volume.bounds().size;
    let (w, h, d) = (
        size.x.round() as usize,
        size.y.round() as usize,
        size.z.round() as usize,
    );
    if w == 0 || h == 0 || d == 0 {
        return Err(Error::EmptyBackgroundMesh);
    }
    let mut pool = VertexPool::new(volume.bounds().origin, 0.5);
    let mut tets = vec![];

    let corner = |i: usize, j: usize, k: usize| {
        [(2 * i) as u32, (2 * j) as u32, (2 * k) as u32]
    };
    let center = |i: usize, j: usize, k: usize| {
        [(2 * i + 1) as u32, (2 * j + 1) as u32, (2 * k + 1) as u32]
    };

    for k in 0..d {
        for j in 0..h {
            for i in 0..w {
                let c1 = pool.get(center(i, j, k));
                // cell corners in octant numbering
                let v = [
                    pool.get(corner(i, j, k)),
                    pool.get(corner(i + 1, j, k)),
                    pool.get(corner(i + 1, j + 1, k)),
                    pool.get(corner(i, j + 1, k)),
                    pool.get(corner(i, j, k + 1)),
                    pool.get(corner(i + 1, j, k + 1)),
                    pool.get(corner(i + 1, j + 1, k + 1)),
                    pool.get(corner(i, j + 1, k + 1)),
                ];
                for (f, fv) in FACE_VERTICES.iter().enumerate() {
                    let step = [(-1i64, 0, 0), (1, 0, 0), (0, -1, 0), (0, 1, 0), (0, 0, -1), (0, 0, 1)][f];
                    let ni = i as i64 + step.0;
                    let nj = j as i64 + step.1;
                    let nk = k as i64 + step.2;
                    let inside = ni >= 0
                        && nj >= 0
                        && nk >= 0
                        && ni < w as i64
                        && nj < h as i64
                        && nk < d as i64;
                    if inside {
                        // interior face: 4 BCC tets, emitted once from the
                        // positive side
                        if f % 2 == 1 {
                            let c2 = pool.get(center(
                                ni as usize,
                                nj as usize,
                                nk as usize,
                            ));
                            for e in 0..4 {
                                let v1 = v[fv[e]];
                                let v2 = v[fv[(e + 1) % 4]];
                                tets.push(Tet::new([c1, v1, v2, c2], 0));
                            }
                        }
                    } else {
                        // boundary face: 2 pyramid halves, diagonal parity
                        // following the octant the cell would occupy
                        let octant =
                            (i & 1) | ((j & 1) << 1) | ((k & 1) << 2);
                        let q: Vec<usize> =
                            fv.iter().map(|&c| v[c]).collect();
                        if FACE_DIAGONAL_BIT[f][octant] {
                            tets.push(Tet::new([c1, q[0], q[1], q[2]], 0));
                            tets.push(Tet::new([c1, q[2], q[3], q[0]], 0));
                        } else {
                            tets.push(Tet::new([c1, q[1], q[2], q[3]], 0));
                            tets.push(Tet::new([c1, q[3], q[0], q[1]], 0));
                        }
                    }
                }
            }
        }
    }
    Ok(TetMesh::new(pool.verts, tets))
}

////////////////////////////////////////////////////////////////////////////

/// Minimum of the sizing field over a cell, sampled on a 3×3×3 stencil
fn min_sizing(volume: &Volume, bounds: &crate::field::BoundingBox) -> f64 {
    let mut lo = f64::INFINITY;
    for k in 0..3 {
        for j in 0..3 {
            for i in 0..3 {
                let p = bounds.origin
                    + Vector3::new(
                        bounds.size.x * f64::from(i) / 2.0,
                        bounds.size.y * f64::from(j) / 2.0,
                        bounds.size.z * f64::from(k) / 2.0,
                    );
                lo = lo.min(volume.sizing_at(p));
            }
        }
    }
    lo
}

fn adapt_cell(tree: &mut Octree, id: usize, volume: &Volume) {
    let bounds = tree.cell_bounds(id);
    // cells entirely past the volume stay coarse; the cubified octree can
    // overhang the domain and those tets are stripped after sampling
    let vmax = volume.bounds().max_corner();
    let bmin = bounds.min_corner();
    if bmin.x < vmax.x && bmin.y < vmax.y && bmin.z < vmax.z {
        let lfs = min_sizing(volume, &bounds);
        if lfs < bounds.size.x {
            tree.subdivide(id);
        }
    }
    if let Some(children) = tree.cells[id].children {
        for c in children {
            adapt_cell(tree, c, volume);
        }
    }
}

fn build_adaptive(
    volume: &Volume,
    opts: &LatticeOptions,
) -> Result<TetMesh, Error> {
    let bounds = *volume.bounds();
    let max_size = bounds.size.x.max(bounds.size.y).max(bounds.size.z);
    let levels = opts
        .max_levels
        .unwrap_or_else(|| (max_size.log2().ceil() as u32).clamp(1, 10));
    let mut tree = Octree::new(&bounds, levels);
    adapt_cell(&mut tree, 0, volume);
    tree.balance();
    let leaves = tree.leaves();
    debug!("adaptive octree: {} leaves at depth budget {levels}", leaves.len());

    let scale = tree.size / f64::from(2 * tree.max_val());
    let mut pool = VertexPool::new(tree.origin, scale);

    // first pass: corner + center vertices for every leaf
    for &id in &leaves {
        for key in cell_keys(&tree, id) {
            pool.get(key);
        }
    }

    // second pass: fill each leaf with tets, face by face
    let mut tets = vec![];
    for &id in &leaves {
        emit_cell_tets(&tree, id, &mut pool, &mut tets);
    }
    Ok(TetMesh::new(pool.verts, tets))
}

/// Doubled-grid keys of a leaf's 8 corners (octant order of
/// [`FACE_VERTICES`]) followed by its center
fn cell_keys(tree: &Octree, id: usize) -> [[u32; 3]; 9] {
    let cell = &tree.cells[id];
    let b = [2 * cell.loc[0], 2 * cell.loc[1], 2 * cell.loc[2]];
    let w = 2 * tree.loc_width(cell.level);
    let h = w / 2;
    [
        [b[0], b[1], b[2]],
        [b[0] + w, b[1], b[2]],
        [b[0] + w, b[1] + w, b[2]],
        [b[0], b[1] + w, b[2]],
        [b[0], b[1], b[2] + w],
        [b[0] + w, b[1], b[2] + w],
        [b[0] + w, b[1] + w, b[2] + w],
        [b[0], b[1] + w, b[2] + w],
        [b[0] + h, b[1] + h, b[2] + h],
    ]
}

fn midpoint(a: [u32; 3], b: [u32; 3]) -> [u32; 3] {
    [(a[0] + b[0]) / 2, (a[1] + b[1]) / 2, (a[2] + b[2]) / 2]
}

fn face_center(keys: &[[u32; 3]; 9], fv: &[usize; 4]) -> [u32; 3] {
    let mut out = [0u32; 3];
    for axis in 0..3 {
        out[axis] = (keys[fv[0]][axis]
            + keys[fv[1]][axis]
            + keys[fv[2]][axis]
            + keys[fv[3]][axis])
            / 4;
    }
    out
}

fn emit_cell_tets(
    tree: &Octree,
    id: usize,
    pool: &mut VertexPool,
    tets: &mut Vec<Tet>,
) {
    let keys = cell_keys(tree, id);
    let verts: Vec<usize> = keys[..8].iter().map(|&k| pool.get(k)).collect();
    let c1 = pool.get(keys[8]);
    let cell = &tree.cells[id];

    for (f, fv) in FACE_VERTICES.iter().enumerate() {
        let neighbor = tree.neighbor_at_level(id, f);
        match neighbor {
            // domain boundary, or a neighbor one level coarser: fill to
            // the face itself
            None => {
                let split = (0..4).any(|e| {
                    pool.lookup(midpoint(keys[fv[e]], keys[fv[(e + 1) % 4]]))
                        .is_some()
                });
                if split {
                    let b = pool.get(face_center(&keys, fv));
                    for e in 0..4 {
                        let k1 = keys[fv[e]];
                        let k2 = keys[fv[(e + 1) % 4]];
                        let v1 = verts[fv[e]];
                        let v2 = verts[fv[(e + 1) % 4]];
                        match pool.lookup(midpoint(k1, k2)) {
                            Some(m) => {
                                tets.push(Tet::new([c1, v1, m, b], 0));
                                tets.push(Tet::new([c1, m, v2, b], 0));
                            }
                            None => {
                                tets.push(Tet::new([c1, v1, v2, b], 0));
                            }
                        }
                    }
                } else {
                    let q: Vec<usize> =
                        fv.iter().map(|&c| verts[c]).collect();
                    if FACE_DIAGONAL_BIT[f][usize::from(cell.index)] {
                        tets.push(Tet::new([c1, q[0], q[1], q[2]], 0));
                        tets.push(Tet::new([c1, q[2], q[3], q[0]], 0));
                    } else {
                        tets.push(Tet::new([c1, q[1], q[2], q[3]], 0));
                        tets.push(Tet::new([c1, q[3], q[0], q[1]], 0));
                    }
                }
            }
            Some(n) if tree.cells[n].level == cell.level
                && !tree.cells[n].has_children() =>
            {
                // same-size leaf pair: emit once, from the positive side
                if f % 2 == 1 {
                    let nkeys = cell_keys(tree, n);
                    let c2 = pool
                        .lookup(nkeys[8])
                        .expect("neighbor center exists after vertex pass");
                    for e in 0..4 {
                        let k1 = keys[fv[e]];
                        let k2 = keys[fv[(e + 1) % 4]];
                        let v1 = verts[fv[e]];
                        let v2 = verts[fv[(e + 1) % 4]];
                        match pool.lookup(midpoint(k1, k2)) {
                            Some(m) => {
                                tets.push(Tet::new([c1, v1, m, c2], 0));
                                tets.push(Tet::new([c1, m, v2, c2], 0));
                            }
                            None => {
                                tets.push(Tet::new([c1, v1, v2, c2], 0));
                            }
                        }
                    }
                }
            }
            // neighbor is subdivided: quadrisect toward the shared face,
            // whose midpoints and center exist as the finer cells' corners
            Some(_) => {
                let b = pool
                    .lookup(face_center(&keys, fv))
                    .expect("face center exists across a finer neighbor");
                for e in 0..4 {
                    let k1 = keys[fv[e]];
                    let k2 = keys[fv[(e + 1) % 4]];
                    let v1 = verts[fv[e]];
                    let v2 = verts[fv[(e + 1) % 4]];
                    let m = pool
                        .lookup(midpoint(k1, k2))
                        .expect("edge midpoint exists across a finer neighbor");
                    tets.push(Tet::new([c1, v1, m, b], 0));
                    tets.push(Tet::new([c1, m, v2, b], 0));
                }
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::field::{BoundingBox, ConstantField};
    use std::sync::Arc;

    fn cube_volume(n: usize) -> Volume {
        let b = BoundingBox::at_origin(Vector3::new(
            n as f64, n as f64, n as f64,
        ));
        Volume::new(vec![Arc::new(ConstantField::new(1.0, b))]).unwrap()
    }

    #[test]
    fn constant_lattice_counts() {
        let v = cube_volume(4);
        let opts = LatticeOptions {
            mode: MeshMode::Constant,
            max_levels: None,
        };
        let m = build_background_mesh(&v, &opts).unwrap();
        // (n+1)^3 corners + n^3 centers
        assert_eq!(m.vertex_count(), 125 + 64);
        // interior faces emit 4 tets, boundary faces 2
        let interior = 3 * 4 * 4 * 3;
        let boundary = 6 * 16;
        assert_eq!(m.tet_count(), interior * 4 + boundary * 2);
    }

    #[test]
    fn constant_lattice_is_conforming() {
        let v = cube_volume(3);
        let opts = LatticeOptions {
            mode: MeshMode::Constant,
            max_levels: None,
        };
        let mut m = build_background_mesh(&v, &opts).unwrap();
        m.build_adjacency();
        for f in &m.faces {
            assert!(!f.tets.is_empty() && f.tets.len() <= 2);
        }
        // every tet positively oriented or at least non-degenerate
        for t in 0..m.tet_count() {
            assert!(m.tet_volume(t).abs() > 1e-12);
        }
    }

    #[test]
    fn adaptive_lattice_is_conforming() {
        let mut v = cube_volume(8);
        // refine the -x half of the domain only
        v.set_sizing_field(Arc::new(crate::field::PlaneField::new(
            Vector3::new(1.0, 0.0, 0.0),
            -2.0,
            BoundingBox::at_origin(Vector3::new(8.0, 8.0, 8.0)),
        )));
        let opts = LatticeOptions {
            mode: MeshMode::Adaptive,
            max_levels: Some(3),
        };
        let mut m = build_background_mesh(&v, &opts).unwrap();
        m.build_adjacency();
        // no cracks: a face with a single incident tet must lie on the
        // domain hull (all three corners on a shared boundary plane)
        for f in &m.faces {
            assert!(!f.tets.is_empty() && f.tets.len() <= 2);
            if f.tets.len() == 1 {
                let on_hull = (0..3).any(|axis| {
                    let c0 = m.verts[f.verts[0]].pos[axis];
                    (c0.abs() < 1e-9 || (c0 - 8.0).abs() < 1e-9)
                        && f.verts
                            .iter()
                            .all(|&v| (m.verts[v].pos[axis] - c0).abs() < 1e-9)
                });
                assert!(on_hull, "interior crack at face {:?}", f.verts);
            }
        }
        for t in 0..m.tet_count() {
            assert!(m.tet_volume(t) > 1e-12);
        }
    }

    #[test]
    fn unrefined_octree_still_produces_a_lattice() {
        let mut v = cube_volume(4);
        let b = *v.bounds();
        v.set_sizing_field(Arc::new(ConstantField::new(100.0, b)));
        let opts = LatticeOptions {
            mode: MeshMode::Adaptive,
            max_levels: Some(4),
        };
        let m = build_background_mesh(&v, &opts).unwrap();
        // a single unsubdivided cell: 6 faces of 2 pyramids each
        assert_eq!(m.tet_count(), 12);
    }
}
