//! Pull-style incremental A* for single-step front ends.
//!
//! The caller owns the pace: `step` advances the search by a fixed number of
//! iterations and hands back a snapshot. Stepping to completion yields the same
//! path as `GridRouter::route_multi` with the same inputs.

use crate::obstacle_map::GridObstacleMap;
use crate::router::{GridRouter, SearchState, Step};
use crate::types::{GridState, Path};

/// State of the search after a `step` call.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SearchSnapshot {
    pub iterations: u32,
    pub current: Option<GridState>,
    pub open: Vec<GridState>,
    pub closed: Vec<GridState>,
    pub found: bool,
    pub done: bool,
    /// Best known path to `current`, for drawing the search head.
    pub current_path: Option<Vec<GridState>>,
}

#[derive(Debug)]
enum Status {
    Running,
    Found(Path),
    Failed,
}

#[derive(Debug)]
pub struct VisualRouter {
    router: GridRouter,
    search: Option<SearchState>,
    status: Status,
}

impl VisualRouter {
    pub fn new(router: GridRouter) -> Self {
        Self {
            router,
            search: None,
            status: Status::Failed,
        }
    }

    /// Start a new search, discarding any previous one.
    pub fn init(&mut self, sources: &[GridState], targets: &[GridState], max_iterations: u32) {
        self.search = Some(SearchState::new(&self.router, sources, targets, max_iterations));
        self.status = Status::Running;
    }

    /// Advance up to `n` iterations and report where the search stands.
    pub fn step(&mut self, obstacles: &GridObstacleMap, n: u32) -> SearchSnapshot {
        if let Some(search) = self.search.as_mut() {
            for _ in 0..n {
                if !matches!(self.status, Status::Running) {
                    break;
                }
                match search.step(&self.router, obstacles, None) {
                    Step::Continue => {}
                    Step::Found(path) => self.status = Status::Found(path),
                    Step::Exhausted => self.status = Status::Failed,
                }
            }
        }
        self.snapshot()
    }

    pub fn is_done(&self) -> bool {
        !matches!(self.status, Status::Running)
    }

    pub fn get_path(&self) -> Option<&Path> {
        match &self.status {
            Status::Found(path) => Some(path),
            _ => None,
        }
    }

    pub fn iterations(&self) -> u32 {
        self.search.as_ref().map_or(0, |s| s.iterations)
    }

    fn snapshot(&self) -> SearchSnapshot {
        let Some(search) = self.search.as_ref() else {
            return SearchSnapshot {
                iterations: 0,
                current: None,
                open: Vec::new(),
                closed: Vec::new(),
                found: false,
                done: true,
                current_path: None,
            };
        };
        SearchSnapshot {
            iterations: search.iterations,
            current: search.current,
            open: search.open_states(),
            closed: search.closed_states(),
            found: self.get_path().is_some(),
            done: self.is_done(),
            current_path: search
                .current
                .and_then(|c| search.path_to(&c))
                .map(|p| p.states),
        }
    }
}
