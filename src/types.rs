//! Grid primitives shared by the search engine and the obstacle map.

use rustc_hash::FxHashSet;
use std::cmp::Ordering;

/// Grid state: (x, y, layer), packed into a single u64 for fast hashing
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub struct GridState {
    pub gx: i32,
    pub gy: i32,
    pub layer: u8,
}

impl GridState {
    #[inline]
    pub fn new(gx: i32, gy: i32, layer: u8) -> Self {
        Self { gx, gy, layer }
    }

    #[inline]
    pub fn as_key(&self) -> u64 {
        // 20 bits x, 20 bits y, 8 bits layer
        let x = (self.gx as u64) & 0xFFFFF;
        let y = (self.gy as u64) & 0xFFFFF;
        let l = self.layer as u64;
        (x << 28) | (y << 8) | l
    }

    #[inline]
    pub fn from_key(key: u64) -> Self {
        let layer = (key & 0xFF) as u8;
        let y = ((key >> 8) & 0xFFFFF) as i32;
        let x = ((key >> 28) & 0xFFFFF) as i32;
        // Sign extension for negative coordinates
        let x = if x & 0x80000 != 0 { x | !0xFFFFF_i32 } else { x };
        let y = if y & 0x80000 != 0 { y | !0xFFFFF_i32 } else { y };
        Self { gx: x, gy: y, layer }
    }

    #[inline]
    pub fn xy(&self) -> (i32, i32) {
        (self.gx, self.gy)
    }

    /// True if `other` is reachable from `self` by exactly one legal move.
    pub fn is_adjacent(&self, other: &GridState) -> bool {
        let dx = (self.gx - other.gx).abs();
        let dy = (self.gy - other.gy).abs();
        if self.layer == other.layer {
            dx <= 1 && dy <= 1 && (dx + dy) > 0
        } else {
            dx == 0 && dy == 0
        }
    }
}

impl From<(i32, i32, u8)> for GridState {
    fn from((gx, gy, layer): (i32, i32, u8)) -> Self {
        Self::new(gx, gy, layer)
    }
}

#[inline]
pub fn pack_xy(gx: i32, gy: i32) -> u64 {
    let x = (gx as u64) & 0xFFFFFFFF;
    let y = (gy as u64) & 0xFFFFFFFF;
    (x << 32) | y
}

/// A* open set entry with reverse ordering for min-heap
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct OpenEntry {
    pub f_score: i32,
    pub g_score: i32,
    pub state: GridState,
    pub counter: u32, // Tie-breaker for deterministic ordering
}

impl Ord for OpenEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reverse ordering for min-heap (lowest f_score, then earliest insertion)
        other
            .f_score
            .cmp(&self.f_score)
            .then_with(|| other.counter.cmp(&self.counter))
    }
}

impl PartialOrd for OpenEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// 8 directions for octilinear routing
pub const DIRECTIONS: [(i32, i32); 8] = [
    (1, 0),   // East
    (1, -1),  // NE
    (0, -1),  // North
    (-1, -1), // NW
    (-1, 0),  // West
    (-1, 1),  // SW
    (0, 1),   // South
    (1, 1),   // SE
];

pub const ORTHO_COST: i32 = 1000;
pub const DIAG_COST: i32 = 1414; // sqrt(2) * 1000

/// Octile distance in cost units.
#[inline]
pub fn octile_cost(dx: i32, dy: i32) -> i32 {
    let dx = dx.abs();
    let dy = dy.abs();
    let diag = dx.min(dy);
    let orth = (dx - dy).abs();
    diag * DIAG_COST + orth * ORTHO_COST
}

/// Unit direction (each component in -1..=1) of a grid step.
#[inline]
pub fn step_direction(dx: i32, dy: i32) -> (i32, i32) {
    (dx.signum(), dy.signum())
}

/// Collects cells that stopped expansion during a failed search.
#[derive(Default, Debug)]
pub struct BlockedCellTracker {
    seen: FxHashSet<u64>,
    cells: Vec<GridState>,
}

impl BlockedCellTracker {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn track(&mut self, gx: i32, gy: i32, layer: u8) {
        let state = GridState::new(gx, gy, layer);
        if self.seen.insert(state.as_key()) {
            self.cells.push(state);
        }
    }

    pub fn into_blocked(self) -> Vec<GridState> {
        self.cells
    }
}

/// A routed grid path with its accumulated cost.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Path {
    pub states: Vec<GridState>,
    pub cost: i32,
}

impl Path {
    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    /// Cost in grid steps (one orthogonal move = 1.0).
    pub fn cost_in_steps(&self) -> f64 {
        self.cost as f64 / ORTHO_COST as f64
    }

    /// (x, y) positions where the path changes layer.
    pub fn via_positions(&self) -> Vec<(i32, i32)> {
        self.states
            .windows(2)
            .filter(|w| w[0].layer != w[1].layer)
            .map(|w| w[0].xy())
            .collect()
    }

    pub fn reversed(&self) -> Path {
        let mut states = self.states.clone();
        states.reverse();
        Path { states, cost: self.cost }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_round_trips_negative_coordinates() {
        for state in [
            GridState::new(0, 0, 0),
            GridState::new(-1, -7, 3),
            GridState::new(524_287, -524_288, 255),
        ] {
            assert_eq!(GridState::from_key(state.as_key()), state);
        }
    }

    #[test]
    fn open_entry_pops_lowest_f_then_earliest() {
        use std::collections::BinaryHeap;
        let s = GridState::new(0, 0, 0);
        let mut heap = BinaryHeap::new();
        heap.push(OpenEntry { f_score: 5, g_score: 0, state: s, counter: 2 });
        heap.push(OpenEntry { f_score: 5, g_score: 0, state: s, counter: 1 });
        heap.push(OpenEntry { f_score: 3, g_score: 0, state: s, counter: 3 });
        let order: Vec<u32> = std::iter::from_fn(|| heap.pop()).map(|e| e.counter).collect();
        assert_eq!(order, vec![3, 1, 2]);
    }

    #[test]
    fn octile() {
        assert_eq!(octile_cost(3, 0), 3 * ORTHO_COST);
        assert_eq!(octile_cost(-2, 5), 2 * DIAG_COST + 3 * ORTHO_COST);
    }
}
