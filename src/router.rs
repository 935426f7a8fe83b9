//! Grid-based A* router implementation.

use log::debug;
use rustc_hash::{FxHashMap, FxHashSet};
use std::collections::BinaryHeap;

use crate::config::ViaModel;
use crate::error::{Result, RouterError};
use crate::obstacle_map::GridObstacleMap;
use crate::types::{
    octile_cost, step_direction, BlockedCellTracker, GridState, OpenEntry, Path, DIAG_COST, DIRECTIONS,
    ORTHO_COST,
};

/// Result of one search. Running out of frontier or budget is not an error.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SearchOutcome {
    Found { path: Path, iterations: u32 },
    NoPath { iterations: u32 },
}

impl SearchOutcome {
    pub fn iterations(&self) -> u32 {
        match self {
            Self::Found { iterations, .. } | Self::NoPath { iterations } => *iterations,
        }
    }

    pub fn path(&self) -> Option<&Path> {
        match self {
            Self::Found { path, .. } => Some(path),
            Self::NoPath { .. } => None,
        }
    }

    pub fn into_path(self) -> Option<Path> {
        match self {
            Self::Found { path, .. } => Some(path),
            Self::NoPath { .. } => None,
        }
    }

    pub fn is_found(&self) -> bool {
        matches!(self, Self::Found { .. })
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SearchOptions {
    /// After a via the route must continue in the direction it arrived in,
    /// and a via can only follow a planar move.
    pub collinear_vias: bool,
    pub via_model: ViaModel,
}

/// Grid A* Router
#[derive(Clone, Debug)]
pub struct GridRouter {
    via_cost: i32,
    h_weight: f32,
    options: SearchOptions,
}

impl GridRouter {
    pub fn new(via_cost: i32, h_weight: f32) -> Result<Self> {
        if !(h_weight.is_finite() && h_weight >= 1.0) {
            return Err(RouterError::config(format!("heuristic weight must be >= 1.0, got {h_weight}")));
        }
        if via_cost < 0 {
            return Err(RouterError::config(format!("via cost must not be negative, got {via_cost}")));
        }
        Ok(Self {
            via_cost,
            h_weight,
            options: SearchOptions::default(),
        })
    }

    pub fn with_options(mut self, options: SearchOptions) -> Self {
        self.options = options;
        self
    }

    pub fn via_cost(&self) -> i32 {
        self.via_cost
    }

    pub fn options(&self) -> SearchOptions {
        self.options
    }

    /// Route from multiple source states to multiple target states.
    pub fn route_multi(
        &self,
        obstacles: &GridObstacleMap,
        sources: &[GridState],
        targets: &[GridState],
        max_iterations: u32,
    ) -> SearchOutcome {
        self.run(obstacles, sources, targets, max_iterations, None)
    }

    /// Same as `route_multi`, but on failure also returns the blocked cells
    /// that stopped expansion, which helps diagnose what prevents the route.
    pub fn route_with_frontier(
        &self,
        obstacles: &GridObstacleMap,
        sources: &[GridState],
        targets: &[GridState],
        max_iterations: u32,
    ) -> (SearchOutcome, Vec<GridState>) {
        let mut tracker = BlockedCellTracker::new();
        let outcome = self.run(obstacles, sources, targets, max_iterations, Some(&mut tracker));
        match outcome {
            SearchOutcome::Found { .. } => (outcome, Vec::new()),
            SearchOutcome::NoPath { .. } => (outcome, tracker.into_blocked()),
        }
    }

    fn run(
        &self,
        obstacles: &GridObstacleMap,
        sources: &[GridState],
        targets: &[GridState],
        max_iterations: u32,
        mut tracker: Option<&mut BlockedCellTracker>,
    ) -> SearchOutcome {
        let mut search = SearchState::new(self, sources, targets, max_iterations);
        loop {
            match search.step(self, obstacles, tracker.as_deref_mut()) {
                Step::Continue => {}
                Step::Found(path) => {
                    debug!(
                        "route found: {} states, cost {}, {} iterations",
                        path.len(),
                        path.cost,
                        search.iterations
                    );
                    return SearchOutcome::Found {
                        path,
                        iterations: search.iterations,
                    };
                }
                Step::Exhausted => {
                    debug!("no route after {} iterations", search.iterations);
                    return SearchOutcome::NoPath {
                        iterations: search.iterations,
                    };
                }
            }
        }
    }

    /// Octile distance heuristic to nearest target
    #[inline]
    pub(crate) fn heuristic_to_targets(&self, state: &GridState, targets: &[GridState]) -> i32 {
        let mut min_h = i32::MAX;
        for target in targets {
            let mut h = octile_cost(state.gx - target.gx, state.gy - target.gy);
            if state.layer != target.layer {
                h += self.via_cost;
            }
            min_h = min_h.min(h);
        }
        if min_h == i32::MAX {
            return 0;
        }
        (min_h as f64 * self.h_weight as f64) as i32
    }

    fn via_layers(&self, current: u8, num_layers: usize) -> impl Iterator<Item = u8> {
        let model = self.options.via_model;
        (0..num_layers as u8).filter(move |&layer| match model {
            ViaModel::Through => layer != current,
            ViaModel::Adjacent => layer.abs_diff(current) == 1,
        })
    }
}

pub(crate) enum Step {
    Continue,
    Found(Path),
    Exhausted,
}

/// Open/closed bookkeeping of one A* search, advanced one pop at a time.
#[derive(Clone, Debug)]
pub(crate) struct SearchState {
    target_set: FxHashSet<u64>,
    target_states: Vec<GridState>,
    open_set: BinaryHeap<OpenEntry>,
    g_costs: FxHashMap<u64, i32>,
    parents: FxHashMap<u64, u64>,
    closed: FxHashSet<u64>,
    counter: u32,
    pub(crate) iterations: u32,
    max_iterations: u32,
    pub(crate) current: Option<GridState>,
}

impl SearchState {
    pub(crate) fn new(
        router: &GridRouter,
        sources: &[GridState],
        targets: &[GridState],
        max_iterations: u32,
    ) -> Self {
        let mut search = Self {
            target_set: targets.iter().map(GridState::as_key).collect(),
            target_states: targets.to_vec(),
            open_set: BinaryHeap::new(),
            g_costs: FxHashMap::default(),
            parents: FxHashMap::default(),
            closed: FxHashSet::default(),
            counter: 0,
            iterations: 0,
            max_iterations,
            current: None,
        };
        for state in sources {
            let key = state.as_key();
            if search.g_costs.contains_key(&key) {
                continue;
            }
            let h = router.heuristic_to_targets(state, &search.target_states);
            search.push(*state, 0, h);
            search.g_costs.insert(key, 0);
        }
        search
    }

    #[inline]
    fn push(&mut self, state: GridState, g_score: i32, h: i32) {
        self.open_set.push(OpenEntry {
            f_score: g_score.saturating_add(h),
            g_score,
            state,
            counter: self.counter,
        });
        self.counter += 1;
    }

    /// Pops and processes one frontier entry.
    pub(crate) fn step(
        &mut self,
        router: &GridRouter,
        obstacles: &GridObstacleMap,
        mut tracker: Option<&mut BlockedCellTracker>,
    ) -> Step {
        if self.iterations >= self.max_iterations {
            return Step::Exhausted;
        }
        let Some(entry) = self.open_set.pop() else {
            return Step::Exhausted;
        };
        self.iterations += 1;

        let current = entry.state;
        let current_key = current.as_key();
        let g = entry.g_score;
        self.current = Some(current);

        if self.closed.contains(&current_key) {
            return Step::Continue;
        }
        self.closed.insert(current_key);

        if self.target_set.contains(&current_key) {
            return Step::Found(self.reconstruct_path(current_key, g));
        }

        let required_direction = if router.options.collinear_vias {
            self.via_exit_direction(current_key, &current)
        } else {
            None
        };

        // Expand neighbors - 8 directions
        for (dx, dy) in DIRECTIONS {
            if let Some(req) = required_direction {
                if (dx, dy) != req {
                    continue;
                }
            }
            let ngx = current.gx + dx;
            let ngy = current.gy + dy;
            let neighbor = GridState::new(ngx, ngy, current.layer);
            let neighbor_key = neighbor.as_key();

            if obstacles.is_blocked(ngx, ngy, current.layer as usize) && !self.target_set.contains(&neighbor_key) {
                if let Some(t) = tracker.as_deref_mut() {
                    t.track(ngx, ngy, current.layer);
                }
                continue;
            }
            if self.closed.contains(&neighbor_key) {
                continue;
            }

            let move_cost = if dx != 0 && dy != 0 { DIAG_COST } else { ORTHO_COST };
            let new_g = g + move_cost + obstacles.proximity_cost(ngx, ngy);
            self.relax(router, neighbor, current_key, new_g);
        }

        // Try via to other layers
        if self.can_place_via(router, current_key, &current) && !obstacles.is_via_blocked(current.gx, current.gy) {
            for layer in router.via_layers(current.layer, obstacles.num_layers()) {
                let neighbor = GridState::new(current.gx, current.gy, layer);
                let neighbor_key = neighbor.as_key();

                if obstacles.is_blocked(current.gx, current.gy, layer as usize)
                    && !self.target_set.contains(&neighbor_key)
                {
                    if let Some(t) = tracker.as_deref_mut() {
                        t.track(current.gx, current.gy, layer);
                    }
                    continue;
                }
                if self.closed.contains(&neighbor_key) {
                    continue;
                }

                // Entering a penalized cell by via pays the penalty twice
                let proximity_cost = obstacles.proximity_cost(current.gx, current.gy) * 2;
                let new_g = g + router.via_cost + proximity_cost;
                self.relax(router, neighbor, current_key, new_g);
            }
        }

        Step::Continue
    }

    #[inline]
    fn relax(&mut self, router: &GridRouter, neighbor: GridState, parent_key: u64, new_g: i32) {
        let neighbor_key = neighbor.as_key();
        let existing_g = self.g_costs.get(&neighbor_key).copied().unwrap_or(i32::MAX);
        if new_g < existing_g {
            self.g_costs.insert(neighbor_key, new_g);
            self.parents.insert(neighbor_key, parent_key);
            let h = router.heuristic_to_targets(&neighbor, &self.target_states);
            self.push(neighbor, new_g, h);
        }
    }

    fn can_place_via(&self, router: &GridRouter, current_key: u64, current: &GridState) -> bool {
        if !router.options.collinear_vias {
            return true;
        }
        // Needs a planar approach move to define the via pair orientation
        match self.parents.get(&current_key) {
            Some(&parent_key) => GridState::from_key(parent_key).layer == current.layer,
            None => false,
        }
    }

    /// Direction the route must leave in when the last move was a via.
    fn via_exit_direction(&self, current_key: u64, current: &GridState) -> Option<(i32, i32)> {
        let parent_key = *self.parents.get(&current_key)?;
        let parent = GridState::from_key(parent_key);
        if parent.xy() != current.xy() || parent.layer == current.layer {
            return None;
        }
        let grandparent = GridState::from_key(*self.parents.get(&parent_key)?);
        let dir = step_direction(parent.gx - grandparent.gx, parent.gy - grandparent.gy);
        (dir != (0, 0)).then_some(dir)
    }

    fn reconstruct_path(&self, goal_key: u64, cost: i32) -> Path {
        let mut states = Vec::new();
        let mut current_key = goal_key;
        loop {
            states.push(GridState::from_key(current_key));
            match self.parents.get(&current_key) {
                Some(&parent_key) => current_key = parent_key,
                None => break,
            }
        }
        states.reverse();
        Path { states, cost }
    }

    pub(crate) fn open_states(&self) -> Vec<GridState> {
        let mut open: Vec<GridState> = self
            .open_set
            .iter()
            .filter(|e| !self.closed.contains(&e.state.as_key()))
            .map(|e| e.state)
            .collect();
        open.sort();
        open.dedup();
        open
    }

    pub(crate) fn closed_states(&self) -> Vec<GridState> {
        let mut closed: Vec<GridState> = self.closed.iter().map(|&k| GridState::from_key(k)).collect();
        closed.sort();
        closed
    }

    pub(crate) fn path_to(&self, state: &GridState) -> Option<Path> {
        let key = state.as_key();
        let g = *self.g_costs.get(&key)?;
        Some(self.reconstruct_path(key, g))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn s(x: i32, y: i32, l: u8) -> GridState {
        GridState::new(x, y, l)
    }

    #[test]
    fn rejects_low_weight() {
        assert!(matches!(GridRouter::new(1000, 0.9), Err(RouterError::Configuration(_))));
        assert!(GridRouter::new(-1, 1.0).is_err());
        assert!(GridRouter::new(0, f32::NAN).is_err());
    }

    #[test]
    fn source_on_target() {
        let map = GridObstacleMap::with_size(1, 4, 4);
        let router = GridRouter::new(5000, 1.0).unwrap();
        let outcome = router.route_multi(&map, &[s(1, 1, 0)], &[s(1, 1, 0)], 10);
        let path = outcome.path().unwrap();
        assert_eq!(path.states, vec![s(1, 1, 0)]);
        assert_eq!(path.cost, 0);
        assert_eq!(outcome.iterations(), 1);
    }

    #[test]
    fn empty_inputs_give_no_path() {
        let map = GridObstacleMap::with_size(1, 4, 4);
        let router = GridRouter::new(5000, 1.0).unwrap();
        assert_eq!(router.route_multi(&map, &[], &[s(1, 1, 0)], 10), SearchOutcome::NoPath { iterations: 0 });
        assert!(!router.route_multi(&map, &[s(0, 0, 0)], &[], 100).is_found());
    }

    #[test]
    fn blocked_target_still_reachable() {
        let mut map = GridObstacleMap::with_size(1, 5, 1);
        map.add_blocked_cell(4, 0, 0);
        let router = GridRouter::new(5000, 1.0).unwrap();
        let outcome = router.route_multi(&map, &[s(0, 0, 0)], &[s(4, 0, 0)], 100);
        assert_eq!(outcome.path().unwrap().len(), 5);
    }

    #[test]
    fn proximity_cost_steers_route() {
        let mut map = GridObstacleMap::with_size(1, 5, 3);
        for x in 1..4 {
            map.set_proximity_cost(x, 1, 5000);
        }
        let router = GridRouter::new(5000, 1.0).unwrap();
        let path = router
            .route_multi(&map, &[s(0, 1, 0)], &[s(4, 1, 0)], 1000)
            .into_path()
            .unwrap();
        assert!(path.states[1..path.len() - 1].iter().all(|st| st.gy != 1));
    }

    #[test]
    fn adjacent_via_model_steps_one_layer_at_a_time() {
        let map = GridObstacleMap::with_size(3, 1, 1);
        let router = GridRouter::new(2000, 1.0)
            .unwrap()
            .with_options(SearchOptions { via_model: ViaModel::Adjacent, ..Default::default() });
        let path = router
            .route_multi(&map, &[s(0, 0, 0)], &[s(0, 0, 2)], 100)
            .into_path()
            .unwrap();
        assert_eq!(path.states, vec![s(0, 0, 0), s(0, 0, 1), s(0, 0, 2)]);
        assert_eq!(path.cost, 4000);
    }

    #[test]
    fn collinear_vias_continue_straight() {
        let mut map = GridObstacleMap::with_size(2, 10, 5);
        // Wall on layer 0 forces a layer change before x = 5
        for y in 0..5 {
            map.add_blocked_cell(5, y, 0);
        }
        let router = GridRouter::new(3000, 1.0)
            .unwrap()
            .with_options(SearchOptions { collinear_vias: true, ..Default::default() });
        let path = router
            .route_multi(&map, &[s(0, 2, 0)], &[s(9, 2, 1)], 10_000)
            .into_path()
            .unwrap();
        let states = &path.states;
        let via_idx = states.windows(2).position(|w| w[0].layer != w[1].layer).unwrap();
        assert!(via_idx >= 1);
        let before = (states[via_idx].gx - states[via_idx - 1].gx, states[via_idx].gy - states[via_idx - 1].gy);
        let after = (
            states[via_idx + 2].gx - states[via_idx + 1].gx,
            states[via_idx + 2].gy - states[via_idx + 1].gy,
        );
        assert_eq!(before, after);
    }

    #[test]
    fn frontier_reports_blocking_cells() {
        let mut map = GridObstacleMap::with_size(1, 5, 5);
        for x in 0..5 {
            map.add_blocked_cell(x, 2, 0);
        }
        let router = GridRouter::new(5000, 1.0).unwrap();
        let (outcome, blocked) = router.route_with_frontier(&map, &[s(2, 0, 0)], &[s(2, 4, 0)], 1000);
        assert!(!outcome.is_found());
        assert!(blocked.contains(&s(2, 2, 0)));
        assert!(blocked.iter().all(|b| map.is_blocked(b.gx, b.gy, b.layer as usize)));
    }
}
