//! Multi-layer grid autorouter for PCB nets and differential pairs.
//!
//! The core is an octilinear A* over (x, y, layer) grid states with via moves
//! between layers. Around it sit the obstacle model, net ordering heuristics,
//! differential pair generation and the batch loop that commits each routed
//! net before the next one is attempted. Python bindings are available with
//! the `python` feature.

pub mod batch;
pub mod config;
pub mod diff_pair;
pub mod error;
pub mod geometry;
pub mod obstacle_map;
pub mod ordering;
pub mod router;
pub mod types;
pub mod visual_router;

#[cfg(feature = "python")]
mod python;

pub use batch::{route_batch, BatchReport, Board, Orientation, RouteFailure, RoutedNet};
pub use config::{OrderingStrategy, RouterConfig, SearchDirection, ViaModel};
pub use diff_pair::{DiffPairRouter, DifferentialPair, RoutedPair};
pub use error::{Result, RouterError};
pub use geometry::{BoardItem, Endpoint, Net, Point, Rect, Segment};
pub use obstacle_map::GridObstacleMap;
pub use router::{GridRouter, SearchOptions, SearchOutcome};
pub use types::{GridState, Path};
pub use visual_router::{SearchSnapshot, VisualRouter};
