//! PyO3 bindings. States cross the boundary as `(gx, gy, layer)` tuples.

use pyo3::exceptions::PyValueError;
use pyo3::prelude::*;

use crate::error::RouterError;
use crate::geometry::Point;
use crate::obstacle_map::GridObstacleMap;
use crate::ordering::{mps, NetPlacement};
use crate::router::{GridRouter, SearchOptions};
use crate::types::GridState;
use crate::visual_router::VisualRouter;
use crate::ViaModel;

type PyState = (i32, i32, u8);

impl From<RouterError> for PyErr {
    fn from(err: RouterError) -> Self {
        PyValueError::new_err(err.to_string())
    }
}

fn states(tuples: &[PyState]) -> Vec<GridState> {
    tuples.iter().copied().map(GridState::from).collect()
}

fn tuples(states: &[GridState]) -> Vec<PyState> {
    states.iter().map(|s| (s.gx, s.gy, s.layer)).collect()
}

#[pyclass(name = "GridObstacleMap")]
struct PyObstacleMap(GridObstacleMap);

#[pymethods]
impl PyObstacleMap {
    #[new]
    fn new(num_layers: usize) -> Self {
        Self(GridObstacleMap::new(num_layers))
    }

    fn set_bounds(&mut self, min_gx: i32, min_gy: i32, max_gx: i32, max_gy: i32) {
        self.0.set_bounds(min_gx, min_gy, max_gx, max_gy);
    }

    fn add_allowed_cell(&mut self, gx: i32, gy: i32) {
        self.0.add_allowed_cell(gx, gy);
    }

    fn set_exclusion_zone(&mut self, min_gx: i32, min_gy: i32, max_gx: i32, max_gy: i32) {
        self.0.set_exclusion_zone(min_gx, min_gy, max_gx, max_gy);
    }

    fn add_blocked_cell(&mut self, gx: i32, gy: i32, layer: usize) {
        self.0.add_blocked_cell(gx, gy, layer);
    }

    fn add_blocked_via(&mut self, gx: i32, gy: i32) {
        self.0.add_blocked_via(gx, gy);
    }

    fn set_stub_proximity(&mut self, gx: i32, gy: i32, cost: i32) {
        self.0.set_proximity_cost(gx, gy, cost);
    }

    fn is_blocked(&self, gx: i32, gy: i32, layer: usize) -> bool {
        self.0.is_blocked(gx, gy, layer)
    }

    fn is_via_blocked(&self, gx: i32, gy: i32) -> bool {
        self.0.is_via_blocked(gx, gy)
    }

    #[pyo3(name = "clone")]
    fn deep_copy(&self) -> Self {
        Self(self.0.clone())
    }
}

#[pyclass(name = "GridRouter")]
struct PyGridRouter(GridRouter);

#[pymethods]
impl PyGridRouter {
    #[new]
    #[pyo3(signature = (via_cost, h_weight, adjacent_vias_only = false))]
    fn new(via_cost: i32, h_weight: f32, adjacent_vias_only: bool) -> PyResult<Self> {
        let via_model = if adjacent_vias_only { ViaModel::Adjacent } else { ViaModel::Through };
        let router = GridRouter::new(via_cost, h_weight)?.with_options(SearchOptions {
            collinear_vias: false,
            via_model,
        });
        Ok(Self(router))
    }

    /// Returns (path, iterations); path is None when no route was found.
    fn route_multi(
        &self,
        obstacles: &PyObstacleMap,
        sources: Vec<PyState>,
        targets: Vec<PyState>,
        max_iterations: u32,
    ) -> (Option<Vec<PyState>>, u32) {
        let outcome = self.0.route_multi(&obstacles.0, &states(&sources), &states(&targets), max_iterations);
        (outcome.path().map(|p| tuples(&p.states)), outcome.iterations())
    }

    /// Like `route_multi`, plus the blocked cells hit while searching.
    fn route_with_frontier(
        &self,
        obstacles: &PyObstacleMap,
        sources: Vec<PyState>,
        targets: Vec<PyState>,
        max_iterations: u32,
    ) -> (Option<Vec<PyState>>, u32, Vec<PyState>) {
        let (outcome, blocked) =
            self.0
                .route_with_frontier(&obstacles.0, &states(&sources), &states(&targets), max_iterations);
        (outcome.path().map(|p| tuples(&p.states)), outcome.iterations(), tuples(&blocked))
    }
}

#[pyclass(name = "SearchSnapshot", get_all)]
struct PySearchSnapshot {
    iteration: u32,
    current: Option<PyState>,
    open_count: usize,
    closed_count: usize,
    closed: Vec<PyState>,
    found: bool,
    done: bool,
    path: Option<Vec<PyState>>,
}

#[pyclass(name = "VisualRouter", unsendable)]
struct PyVisualRouter(VisualRouter);

#[pymethods]
impl PyVisualRouter {
    #[new]
    fn new(via_cost: i32, h_weight: f32) -> PyResult<Self> {
        Ok(Self(VisualRouter::new(GridRouter::new(via_cost, h_weight)?)))
    }

    fn init(&mut self, sources: Vec<PyState>, targets: Vec<PyState>, max_iterations: u32) {
        self.0.init(&states(&sources), &states(&targets), max_iterations);
    }

    fn step(&mut self, obstacles: &PyObstacleMap, num_iterations: u32) -> PySearchSnapshot {
        let snap = self.0.step(&obstacles.0, num_iterations);
        let path = match self.0.get_path() {
            Some(found) => Some(tuples(&found.states)),
            None => snap.current_path.as_deref().map(tuples),
        };
        PySearchSnapshot {
            iteration: snap.iterations,
            current: snap.current.map(|s| (s.gx, s.gy, s.layer)),
            open_count: snap.open.len(),
            closed_count: snap.closed.len(),
            closed: tuples(&snap.closed),
            found: snap.found,
            done: snap.done,
            path,
        }
    }

    fn is_done(&self) -> bool {
        self.0.is_done()
    }

    fn get_path(&self) -> Option<Vec<PyState>> {
        self.0.get_path().map(|p| tuples(&p.states))
    }
}

/// Maximum planar subset order for nets given as lists of (x, y) endpoints.
/// Returns (order, rounds) as indices into `nets`.
#[pyfunction]
fn order_nets_mps(nets: Vec<Vec<(f64, f64)>>) -> (Vec<usize>, Vec<Vec<usize>>) {
    let placements: Vec<NetPlacement> = nets
        .into_iter()
        .enumerate()
        .map(|(i, eps)| NetPlacement::new(i.to_string(), eps.into_iter().map(|(x, y)| Point::new(x, y)).collect()))
        .collect();
    let ordering = mps(&placements);
    (ordering.order, ordering.rounds)
}

#[pymodule]
fn pcb_grid_router(m: &Bound<'_, PyModule>) -> PyResult<()> {
    m.add("__version__", env!("CARGO_PKG_VERSION"))?;
    m.add_class::<PyObstacleMap>()?;
    m.add_class::<PyGridRouter>()?;
    m.add_class::<PyVisualRouter>()?;
    m.add_class::<PySearchSnapshot>()?;
    m.add_function(wrap_pyfunction!(order_nets_mps, m)?)?;
    Ok(())
}
