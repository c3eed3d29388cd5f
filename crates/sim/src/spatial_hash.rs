//! Spatial hash neighbour index.
//!
//! Cells are `smoothing_radius` wide. A cell's hash is folded into a key
//! space the size of the particle count, so the counts and offsets tables
//! never outgrow the particle buffers. Different cells can share a key; the
//! neighbour query visits each distinct key once and leaves distance
//! filtering to the kernels.

use glam::{IVec2, Vec2};
use rayon::prelude::*;

use crate::sort::CountingSort;

const HASH_K1: u32 = 15_823;
const HASH_K2: u32 = 9_737_333;

/// Offset-table entry of a key that no particle maps to.
pub const EMPTY_OFFSET: u32 = u32::MAX;

/// The 3x3 block of cells around (and including) a particle's own cell,
/// row by row from the bottom left. Slot `i` is `(i % 3 - 1, i / 3 - 1)`.
pub const NEIGHBOUR_OFFSETS: [IVec2; 9] = [
    IVec2::new(-1, -1),
    IVec2::new(0, -1),
    IVec2::new(1, -1),
    IVec2::new(-1, 0),
    IVec2::new(0, 0),
    IVec2::new(1, 0),
    IVec2::new(-1, 1),
    IVec2::new(0, 1),
    IVec2::new(1, 1),
];

#[inline]
pub fn cell_coord(pos: Vec2, radius: f32) -> IVec2 {
    (pos / radius).floor().as_ivec2()
}

#[inline]
pub fn hash_cell(cell: IVec2) -> u32 {
    (cell.x as u32)
        .wrapping_mul(HASH_K1)
        .wrapping_add((cell.y as u32).wrapping_mul(HASH_K2))
}

#[inline]
pub fn key_from_hash(hash: u32, table_size: u32) -> u32 {
    hash % table_size.max(1)
}

#[inline]
pub fn cell_key(pos: Vec2, radius: f32, table_size: u32) -> u32 {
    key_from_hash(hash_cell(cell_coord(pos, radius)), table_size)
}

/// Offset table over already sorted keys: `offsets[k]` is the first sorted
/// position holding `k`, or [`EMPTY_OFFSET`].
pub fn build_offsets(sorted_keys: &[u32], offsets: &mut Vec<u32>) {
    offsets.clear();
    offsets.resize(sorted_keys.len(), EMPTY_OFFSET);
    for (p, &key) in sorted_keys.iter().enumerate() {
        if p == 0 || sorted_keys[p - 1] != key {
            offsets[key as usize] = p as u32;
        }
    }
}

#[derive(Debug, Default)]
pub struct SpatialHash {
    /// Keys in ascending order after [`SpatialHash::run`].
    keys: Vec<u32>,
    /// `indices[p]` is the original particle index at sorted position `p`.
    indices: Vec<u32>,
    offsets: Vec<u32>,
    sort: CountingSort,
}

impl SpatialHash {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild from the hash positions (predicted positions) of every active
    /// particle. A no-op with zero particles.
    pub fn run(&mut self, positions: &[Vec2], radius: f32) {
        let n = positions.len();
        if n == 0 {
            self.keys.clear();
            self.indices.clear();
            self.offsets.clear();
            return;
        }
        let table_size = n as u32;
        let max_key = table_size - 1;

        positions
            .par_iter()
            .map(|&p| cell_key(p, radius, table_size))
            .collect_into_vec(&mut self.keys);
        self.indices.clear();
        self.indices.extend(0..table_size);

        self.sort.run(&mut self.indices, &mut self.keys, n, max_key);
        build_offsets(&self.keys, &mut self.offsets);
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn sorted_keys(&self) -> &[u32] {
        &self.keys
    }

    pub fn sorted_indices(&self) -> &[u32] {
        &self.indices
    }

    pub fn offsets(&self) -> &[u32] {
        &self.offsets
    }

    /// Call `f` with the sorted position of every particle in the 3x3 cell
    /// block around `pos`, each at most once. Candidates may lie outside the
    /// radius or belong to colliding cells.
    pub fn for_each_candidate(&self, pos: Vec2, radius: f32, mut f: impl FnMut(usize)) {
        let n = self.keys.len();
        if n == 0 {
            return;
        }
        let origin = cell_coord(pos, radius);
        let mut visited = [u32::MAX; 9];
        for (slot, offset) in NEIGHBOUR_OFFSETS.iter().enumerate() {
            let key = key_from_hash(hash_cell(origin + *offset), n as u32);
            if visited[..slot].contains(&key) {
                continue;
            }
            visited[slot] = key;

            let start = self.offsets[key as usize];
            if start == EMPTY_OFFSET {
                continue;
            }
            let mut p = start as usize;
            while p < n && self.keys[p] == key {
                f(p);
                p += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn negative_coordinates_floor_down() {
        assert_eq!(cell_coord(Vec2::new(-0.1, 0.1), 0.5), IVec2::new(-1, 0));
        assert_eq!(cell_coord(Vec2::new(1.0, -1.0), 0.5), IVec2::new(2, -2));
    }

    #[test]
    fn keys_stay_below_table_size() {
        for x in -20..20 {
            for y in -20..20 {
                let key = cell_key(Vec2::new(x as f32, y as f32) * 0.37, 0.35, 13);
                assert!(key < 13);
            }
        }
    }

    #[test]
    fn offsets_point_at_first_of_each_run() {
        let keys = [0, 0, 2, 2, 2, 4];
        let mut offsets = Vec::new();
        build_offsets(&keys, &mut offsets);
        assert_eq!(offsets, vec![0, EMPTY_OFFSET, 2, EMPTY_OFFSET, 5, EMPTY_OFFSET]);
    }

    #[test]
    fn candidates_cover_all_true_neighbours_once() {
        let radius = 0.5;
        let positions: Vec<Vec2> = (0..200)
            .map(|i| Vec2::new((i % 20) as f32 * 0.23 - 2.0, (i / 20) as f32 * 0.19 - 1.0))
            .collect();
        let mut hash = SpatialHash::new();
        hash.run(&positions, radius);

        for (i, &p) in positions.iter().enumerate() {
            let mut seen = Vec::new();
            hash.for_each_candidate(p, radius, |s| seen.push(hash.sorted_indices()[s] as usize));
            let mut unique = seen.clone();
            unique.sort_unstable();
            unique.dedup();
            assert_eq!(unique.len(), seen.len(), "particle {} saw a duplicate", i);

            for (j, &q) in positions.iter().enumerate() {
                if p.distance(q) < radius {
                    assert!(seen.contains(&j), "particle {} missed neighbour {}", i, j);
                }
            }
        }
    }

    #[test]
    fn neighbour_slots_follow_row_order() {
        for (i, offset) in NEIGHBOUR_OFFSETS.iter().enumerate() {
            assert_eq!(*offset, IVec2::new(i as i32 % 3 - 1, i as i32 / 3 - 1));
        }
    }

    #[test]
    fn empty_run_is_noop() {
        let mut hash = SpatialHash::new();
        hash.run(&[], 0.35);
        assert!(hash.is_empty());
        let mut called = false;
        hash.for_each_candidate(Vec2::ZERO, 0.35, |_| called = true);
        assert!(!called);
    }
}
