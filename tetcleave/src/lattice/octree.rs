//! Adaptive octree over the meshing domain
//!
//! Cells are stored in a flat arena; positions are derived from integer
//! location codes so identical corners always produce identical floats.
//! The root is cubified (all axes stretched to the largest), and a cell at
//! `level` has width `size / 2^(root_level - level)`; level 0 cells are the
//! finest allowed, which is the refinement budget.
use log::debug;
use nalgebra::Vector3;

use crate::field::BoundingBox;

/// Offsets for the 6 face + 12 edge neighbor directions
///
/// Faces come first (-x, +x, -y, +y, -z, +z), then the edge diagonals in
/// the order matching [`HEIGHT_PATHS`].
pub const DIR_OFFSETS: [[i64; 3]; 18] = [
    [-1, 0, 0],
    [1, 0, 0],
    [0, -1, 0],
    [0, 1, 0],
    [0, 0, -1],
    [0, 0, 1],
    [-1, -1, 0],
    [1, -1, 0],
    [-1, 1, 0],
    [1, 1, 0],
    [-1, 0, -1],
    [1, 0, -1],
    [-1, 0, 1],
    [1, 0, 1],
    [0, -1, -1],
    [0, 1, -1],
    [0, -1, 1],
    [0, 1, 1],
];

/// For each direction, the direction pointing back at the querying cell
pub const HEIGHT_PAIRS: [usize; 18] = [
    1, 0, 3, 2, 5, 4, 9, 8, 7, 6, 13, 12, 11, 10, 17, 16, 15, 14,
];

/// Child octants to descend when measuring subdivision height toward a
/// given direction (edge directions repeat their two relevant octants)
pub const HEIGHT_PATHS: [[usize; 4]; 18] = [
    [0b000, 0b010, 0b100, 0b110], // -x
    [0b001, 0b011, 0b101, 0b111], // +x
    [0b000, 0b001, 0b100, 0b101], // -y
    [0b010, 0b011, 0b110, 0b111], // +y
    [0b000, 0b010, 0b001, 0b011], // -z
    [0b100, 0b110, 0b101, 0b111], // +z
    [0b000, 0b100, 0b000, 0b100], // -x,-y
    [0b001, 0b101, 0b001, 0b101], // +x,-y
    [0b010, 0b110, 0b010, 0b110], // -x,+y
    [0b011, 0b111, 0b011, 0b111], // +x,+y
    [0b000, 0b010, 0b000, 0b010], // -x,-z
    [0b001, 0b011, 0b001, 0b011], // +x,-z
    [0b100, 0b110, 0b100, 0b110], // -x,+z
    [0b101, 0b111, 0b101, 0b111], // +x,+z
    [0b000, 0b001, 0b000, 0b001], // -y,-z
    [0b010, 0b011, 0b010, 0b011], // +y,-z
    [0b100, 0b101, 0b100, 0b101], // -y,+z
    [0b110, 0b111, 0b110, 0b111], // +y,+z
];

/// A single octree cell
#[derive(Clone, Debug)]
pub struct Cell {
    /// Level of this cell; the root carries `root_level`, leaves ≥ 0
    pub level: u32,
    /// Location code of the cell's minimum corner, in level-0 cell units
    pub loc: [u32; 3],
    /// Child cell indices (octant order x | y<<1 | z<<2), if subdivided
    pub children: Option<[usize; 8]>,
    /// Octant index within the parent; 0 for the root
    pub index: u8,
}

impl Cell {
    /// True if the cell has been subdivided
    pub fn has_children(&self) -> bool {
        self.children.is_some()
    }
}

/// Flat-arena octree over a cubified bounding box
pub struct Octree {
    /// Cell arena; index 0 is the root
    pub cells: Vec<Cell>,
    /// Level assigned to the root cell
    pub root_level: u32,
    /// Minimum corner of the (cubified) domain
    pub origin: Vector3<f64>,
    /// Edge length of the cubified domain
    pub size: f64,
}

impl Octree {
    /// Builds an unsubdivided octree over `bounds`, stretched to a cube,
    /// with `root_level` levels of subdivision available
    pub fn new(bounds: &BoundingBox, root_level: u32) -> Self {
        let size = bounds.size.x.max(bounds.size.y).max(bounds.size.z);
        Self {
            cells: vec![Cell {
                level: root_level,
                loc: [0; 3],
                children: None,
                index: 0,
            }],
            root_level,
            origin: bounds.origin,
            size,
        }
    }

    /// Number of level-0 cells along each axis
    pub fn max_val(&self) -> u32 {
        1 << self.root_level
    }

    /// Width of a cell at `level`, in domain units
    pub fn width(&self, level: u32) -> f64 {
        self.size / f64::from(1 << (self.root_level - level))
    }

    /// Width of a cell at `level`, in location-code units
    pub fn loc_width(&self, level: u32) -> u32 {
        1 << level
    }

    /// Bounds of cell `id`
    pub fn cell_bounds(&self, id: usize) -> BoundingBox {
        let cell = &self.cells[id];
        let scale = self.size / f64::from(self.max_val());
        let origin = self.origin
            + Vector3::new(
                f64::from(cell.loc[0]),
                f64::from(cell.loc[1]),
                f64::from(cell.loc[2]),
            ) * scale;
        let w = self.width(cell.level);
        BoundingBox::new(origin, Vector3::new(w, w, w))
    }

    /// Subdivides cell `id` into 8 children (no-op below level 1)
    pub fn subdivide(&mut self, id: usize) {
        if self.cells[id].has_children() || self.cells[id].level == 0 {
            return;
        }
        let level = self.cells[id].level - 1;
        let half = self.loc_width(level);
        let loc = self.cells[id].loc;
        let mut children = [0; 8];
        for (i, child) in children.iter_mut().enumerate() {
            let dx = (i & 1) as u32;
            let dy = ((i >> 1) & 1) as u32;
            let dz = ((i >> 2) & 1) as u32;
            self.cells.push(Cell {
                level,
                loc: [
                    loc[0] + dx * half,
                    loc[1] + dy * half,
                    loc[2] + dz * half,
                ],
                children: None,
                index: i as u8,
            });
            *child = self.cells.len() - 1;
        }
        self.cells[id].children = Some(children);
    }

    /// Finds the cell at exactly `level` containing the location code, or
    /// `None` if the region is covered only by a coarser leaf (or lies
    /// outside the domain)
    pub fn cell_at_level(&self, loc: [i64; 3], level: u32) -> Option<usize> {
        let max = i64::from(self.max_val());
        if loc.iter().any(|&c| c < 0 || c >= max) {
            return None;
        }
        let mut id = 0;
        while self.cells[id].level > level {
            let children = self.cells[id].children?;
            let bit = i64::from(self.loc_width(self.cells[id].level - 1));
            let ix = usize::from(loc[0] & bit != 0)
                | (usize::from(loc[1] & bit != 0) << 1)
                | (usize::from(loc[2] & bit != 0) << 2);
            id = children[ix];
        }
        Some(id)
    }

    /// The neighbor of `id` in direction `dir`, at the same level
    ///
    /// Returns `None` on the domain boundary and when the neighboring
    /// region is covered only by a coarser leaf.
    pub fn neighbor_at_level(&self, id: usize, dir: usize) -> Option<usize> {
        let cell = &self.cells[id];
        let shift = i64::from(self.loc_width(cell.level));
        let loc = [
            i64::from(cell.loc[0]) + DIR_OFFSETS[dir][0] * shift,
            i64::from(cell.loc[1]) + DIR_OFFSETS[dir][1] * shift,
            i64::from(cell.loc[2]) + DIR_OFFSETS[dir][2] * shift,
        ];
        self.cell_at_level(loc, cell.level)
    }

    /// Height of the subdivision tree under `id` toward direction `path`,
    /// capped at 3
    pub fn height_for_path(&self, id: usize, path: usize, depth: u32) -> u32 {
        let mut height = 1;
        if depth + 1 == 3 {
            return height;
        }
        if let Some(children) = self.cells[id].children {
            let mut max_height = 0;
            for &octant in &HEIGHT_PATHS[path] {
                max_height = max_height.max(self.height_for_path(
                    children[octant],
                    path,
                    depth + 1,
                ));
            }
            height += max_height;
        }
        height
    }

    /// Enforces the graded-refinement rule over the 18 face and edge
    /// neighbor directions
    ///
    /// Visits leaves in reverse breadth-first order, splitting any leaf
    /// whose neighbor is subdivided more than one level deeper on the
    /// shared face/edge; newly-created children are pushed and revisited.
    pub fn balance(&mut self) {
        let mut queue = std::collections::VecDeque::new();
        let mut stack = vec![];
        queue.push_back(0);
        while let Some(id) = queue.pop_front() {
            if self.cells[id].level == 0 {
                continue;
            }
            if let Some(children) = self.cells[id].children {
                queue.extend(children);
            } else {
                stack.push(id);
            }
        }

        let mut splits = 0;
        while let Some(id) = stack.pop() {
            if self.cells[id].level == 0 {
                continue;
            }
            if !self.cells[id].has_children() {
                for dir in 0..18 {
                    let Some(n) = self.neighbor_at_level(id, dir) else {
                        continue;
                    };
                    if self.height_for_path(n, HEIGHT_PAIRS[dir], 0) > 2 {
                        self.subdivide(id);
                        splits += 1;
                        break;
                    }
                }
            }
            if let Some(children) = self.cells[id].children {
                stack.extend(children);
            }
        }
        debug!("octree balance split {splits} cells");
    }

    /// Indices of all leaf cells, in breadth-first order
    pub fn leaves(&self) -> Vec<usize> {
        let mut out = vec![];
        let mut queue = std::collections::VecDeque::new();
        queue.push_back(0);
        while let Some(id) = queue.pop_front() {
            match self.cells[id].children {
                Some(children) => queue.extend(children),
                None => out.push(id),
            }
        }
        out
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn unit_tree(levels: u32) -> Octree {
        let b = BoundingBox::at_origin(Vector3::new(1.0, 1.0, 1.0));
        Octree::new(&b, levels)
    }

    #[test]
    fn subdivision_geometry() {
        let mut t = unit_tree(2);
        t.subdivide(0);
        let kids = t.cells[0].children.unwrap();
        // octant 0b101 = +x, -y, +z
        let b = t.cell_bounds(kids[0b101]);
        assert_eq!(b.origin, Vector3::new(0.5, 0.0, 0.5));
        assert_eq!(b.size.x, 0.5);
    }

    #[test]
    fn neighbor_lookup() {
        let mut t = unit_tree(2);
        t.subdivide(0);
        let kids = t.cells[0].children.unwrap();
        // +x neighbor of octant 0 is octant 1
        assert_eq!(t.neighbor_at_level(kids[0], 1), Some(kids[1]));
        // -x neighbor of octant 0 leaves the domain
        assert_eq!(t.neighbor_at_level(kids[0], 0), None);
        // coarser neighbors are not found at the same level
        t.subdivide(kids[0]);
        let fine = t.cells[kids[0]].children.unwrap();
        assert_eq!(t.neighbor_at_level(fine[1], 1), None);
    }

    #[test]
    fn balance_bounds_level_gap() {
        let mut t = unit_tree(3);
        t.subdivide(0);
        let kids = t.cells[0].children.unwrap();
        t.subdivide(kids[0]);
        let fine = t.cells[kids[0]].children.unwrap();
        t.subdivide(fine[0]);
        t.balance();
        // after balancing, no leaf neighbors a leaf 2+ levels finer
        for id in t.leaves() {
            for dir in 0..18 {
                if let Some(n) = t.neighbor_at_level(id, dir) {
                    assert!(
                        t.height_for_path(n, HEIGHT_PAIRS[dir], 0) <= 2,
                        "leaf {id} unbalanced in direction {dir}"
                    );
                }
            }
        }
    }
}
