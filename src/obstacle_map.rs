//! Grid-based obstacle map for the A* router.

use rustc_hash::{FxHashMap, FxHashSet};

use crate::types::pack_xy;

/// Inclusive grid rectangle (min_gx, min_gy, max_gx, max_gy)
pub type GridRect = (i32, i32, i32, i32);

#[inline]
fn rect_contains(rect: GridRect, gx: i32, gy: i32) -> bool {
    let (min_gx, min_gy, max_gx, max_gy) = rect;
    gx >= min_gx && gx <= max_gx && gy >= min_gy && gy <= max_gy
}

/// Grid-based obstacle map
///
/// Cloning produces an independent deep copy; the batch router clones the
/// baseline once per net before adding that net's interim obstacles.
#[derive(Clone, Debug)]
pub struct GridObstacleMap {
    /// Blocked cells per layer: layer -> set of (gx, gy) packed as u64
    blocked_cells: Vec<FxHashSet<u64>>,
    /// Blocked via positions
    blocked_vias: FxHashSet<u64>,
    /// Stub proximity costs: (gx, gy) -> cost
    stub_proximity: FxHashMap<u64, i32>,
    num_layers: usize,
    /// Exclusion zone, typically a dense package footprint
    exclusion_zone: Option<GridRect>,
    /// Cells that override the exclusion zone (endpoints inside it)
    allowed_cells: FxHashSet<u64>,
    /// Routable area; everything outside is blocked
    bounds: Option<GridRect>,
}

impl GridObstacleMap {
    pub fn new(num_layers: usize) -> Self {
        Self {
            blocked_cells: (0..num_layers).map(|_| FxHashSet::default()).collect(),
            blocked_vias: FxHashSet::default(),
            stub_proximity: FxHashMap::default(),
            num_layers,
            exclusion_zone: None,
            allowed_cells: FxHashSet::default(),
            bounds: None,
        }
    }

    /// A map whose routable area is `0..width` x `0..height`.
    pub fn with_size(num_layers: usize, width: i32, height: i32) -> Self {
        let mut map = Self::new(num_layers);
        map.set_bounds(0, 0, width - 1, height - 1);
        map
    }

    pub fn num_layers(&self) -> usize {
        self.num_layers
    }

    pub fn bounds(&self) -> Option<GridRect> {
        self.bounds
    }

    pub fn set_bounds(&mut self, min_gx: i32, min_gy: i32, max_gx: i32, max_gy: i32) {
        self.bounds = Some((min_gx, min_gy, max_gx, max_gy));
    }

    /// Add an allowed cell that overrides the exclusion zone
    pub fn add_allowed_cell(&mut self, gx: i32, gy: i32) {
        self.allowed_cells.insert(pack_xy(gx, gy));
    }

    pub fn set_exclusion_zone(&mut self, min_gx: i32, min_gy: i32, max_gx: i32, max_gy: i32) {
        self.exclusion_zone = Some((min_gx, min_gy, max_gx, max_gy));
    }

    pub fn clear_exclusion_zone(&mut self) {
        self.exclusion_zone = None;
    }

    pub fn exclusion_zone(&self) -> Option<GridRect> {
        self.exclusion_zone
    }

    pub fn add_blocked_cell(&mut self, gx: i32, gy: i32, layer: usize) {
        if layer < self.num_layers {
            self.blocked_cells[layer].insert(pack_xy(gx, gy));
        }
    }

    pub fn remove_blocked_cell(&mut self, gx: i32, gy: i32, layer: usize) {
        if layer < self.num_layers {
            self.blocked_cells[layer].remove(&pack_xy(gx, gy));
        }
    }

    pub fn add_blocked_via(&mut self, gx: i32, gy: i32) {
        self.blocked_vias.insert(pack_xy(gx, gy));
    }

    /// Set stub proximity cost; the larger of repeated settings wins
    pub fn set_proximity_cost(&mut self, gx: i32, gy: i32, cost: i32) {
        let key = pack_xy(gx, gy);
        let existing = self.stub_proximity.get(&key).copied().unwrap_or(0);
        if cost > existing {
            self.stub_proximity.insert(key, cost);
        }
    }

    /// Block every cell within `radius` cells of (cx, cy) on one layer.
    pub fn block_disc(&mut self, cx: i32, cy: i32, radius: i32, layer: usize) {
        for (gx, gy) in disc_cells(cx, cy, radius) {
            self.add_blocked_cell(gx, gy, layer);
        }
    }

    /// Forbid vias within `radius` cells of (cx, cy).
    pub fn block_via_disc(&mut self, cx: i32, cy: i32, radius: i32) {
        for (gx, gy) in disc_cells(cx, cy, radius) {
            self.add_blocked_via(gx, gy);
        }
    }

    /// Penalize cells around (cx, cy), tapering linearly to zero at `radius`.
    pub fn add_proximity_disc(&mut self, cx: i32, cy: i32, radius: i32, cost: i32) {
        if radius <= 0 {
            self.set_proximity_cost(cx, cy, cost);
            return;
        }
        for (gx, gy) in disc_cells(cx, cy, radius) {
            let d = (((gx - cx).pow(2) + (gy - cy).pow(2)) as f64).sqrt();
            let scaled = (cost as f64 * (1.0 - d / (radius as f64 + 1.0))).round() as i32;
            if scaled > 0 {
                self.set_proximity_cost(gx, gy, scaled);
            }
        }
    }

    /// Check if cell is blocked.
    ///
    /// Precedence: out of range or explicit block, then zone unless allowed.
    #[inline]
    pub fn is_blocked(&self, gx: i32, gy: i32, layer: usize) -> bool {
        if layer >= self.num_layers {
            return true;
        }
        if let Some(bounds) = self.bounds {
            if !rect_contains(bounds, gx, gy) {
                return true;
            }
        }
        let key = pack_xy(gx, gy);
        if self.blocked_cells[layer].contains(&key) {
            return true;
        }
        if let Some(zone) = self.exclusion_zone {
            if rect_contains(zone, gx, gy) {
                return !self.allowed_cells.contains(&key);
            }
        }
        false
    }

    #[inline]
    pub fn is_via_blocked(&self, gx: i32, gy: i32) -> bool {
        self.blocked_vias.contains(&pack_xy(gx, gy))
    }

    #[inline]
    pub fn proximity_cost(&self, gx: i32, gy: i32) -> i32 {
        self.stub_proximity.get(&pack_xy(gx, gy)).copied().unwrap_or(0)
    }

    pub fn blocked_cell_count(&self) -> usize {
        self.blocked_cells.iter().map(|s| s.len()).sum()
    }

    pub fn blocked_via_count(&self) -> usize {
        self.blocked_vias.len()
    }
}

/// Cells whose centers lie within `radius` cells of (cx, cy).
pub(crate) fn disc_cells(cx: i32, cy: i32, radius: i32) -> impl Iterator<Item = (i32, i32)> {
    let r = radius.max(0);
    let r2 = r * r;
    (-r..=r).flat_map(move |dy| {
        (-r..=r).filter_map(move |dx| (dx * dx + dy * dy <= r2).then_some((cx + dx, cy + dy)))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_block_beats_allow_list() {
        let mut map = GridObstacleMap::new(2);
        map.set_exclusion_zone(0, 0, 10, 10);
        map.add_allowed_cell(3, 3);
        map.add_blocked_cell(3, 3, 0);
        assert!(map.is_blocked(3, 3, 0));
        // Other layer has no explicit block, the allow list applies there
        assert!(!map.is_blocked(3, 3, 1));

        map.remove_blocked_cell(3, 3, 0);
        assert!(!map.is_blocked(3, 3, 0));
        assert!(map.is_blocked(4, 3, 0));
        assert!(!map.is_blocked(11, 3, 0));
    }

    #[test]
    fn clone_is_isolated() {
        let mut original = GridObstacleMap::new(2);
        original.add_blocked_cell(1, 1, 0);
        let mut copy = original.clone();
        copy.add_blocked_cell(2, 2, 1);
        copy.add_blocked_via(5, 5);
        copy.set_proximity_cost(4, 4, 700);
        copy.set_exclusion_zone(0, 0, 3, 3);
        copy.remove_blocked_cell(1, 1, 0);

        assert!(original.is_blocked(1, 1, 0));
        assert!(!original.is_blocked(2, 2, 1));
        assert!(!original.is_via_blocked(5, 5));
        assert_eq!(original.proximity_cost(4, 4), 0);
        assert!(original.exclusion_zone().is_none());
    }

    #[test]
    fn proximity_keeps_maximum() {
        let mut map = GridObstacleMap::new(1);
        map.set_proximity_cost(0, 0, 300);
        map.set_proximity_cost(0, 0, 100);
        assert_eq!(map.proximity_cost(0, 0), 300);
    }

    #[test]
    fn bounds_and_layers() {
        let map = GridObstacleMap::with_size(2, 5, 5);
        assert!(!map.is_blocked(4, 4, 1));
        assert!(map.is_blocked(5, 4, 0));
        assert!(map.is_blocked(-1, 0, 0));
        assert!(map.is_blocked(0, 0, 2));
    }

    #[test]
    fn disc_rasterization() {
        let mut map = GridObstacleMap::new(1);
        map.block_disc(0, 0, 1, 0);
        assert_eq!(map.blocked_cell_count(), 5);
        map.block_via_disc(10, 10, 0);
        assert!(map.is_via_blocked(10, 10));
        assert_eq!(map.blocked_via_count(), 1);
    }
}
