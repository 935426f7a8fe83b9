//! Router configuration: plain scalars plus the ordered copper layer stack.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::diff_pair::name_pattern;
use crate::error::{Result, RouterError};
use crate::geometry::Point;
use crate::types::ORTHO_COST;

/// Order in which nets are attempted.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderingStrategy {
    /// Caller order.
    Original,
    /// Innermost nets of a dense footprint first.
    InsideOut,
    /// Maximum planar subset rounds.
    #[default]
    Mps,
}

impl FromStr for OrderingStrategy {
    type Err = RouterError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "original" => Ok(Self::Original),
            "inside_out" => Ok(Self::InsideOut),
            "mps" => Ok(Self::Mps),
            other => Err(RouterError::config(format!("unknown ordering strategy `{other}`"))),
        }
    }
}

impl fmt::Display for OrderingStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Original => "original",
            Self::InsideOut => "inside_out",
            Self::Mps => "mps",
        };
        f.write_str(name)
    }
}

/// Which orientations a connection is searched in.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchDirection {
    Forward,
    Backward,
    /// Forward first, reversed on failure.
    #[default]
    ForwardThenBackward,
}

impl FromStr for SearchDirection {
    type Err = RouterError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "forward" => Ok(Self::Forward),
            "backward" | "reverse" => Ok(Self::Backward),
            "both" | "forward_then_backward" => Ok(Self::ForwardThenBackward),
            other => Err(RouterError::config(format!("unknown search direction `{other}`"))),
        }
    }
}

/// Layers a via move may reach from the current layer.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViaModel {
    /// Through-hole via: any other layer.
    #[default]
    Through,
    /// Only the layers directly above and below.
    Adjacent,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RouterConfig {
    /// Ordered copper layer names; index is the layer ordinal.
    pub layers: Vec<String>,
    /// mm per grid unit.
    pub grid_step: f64,
    pub track_width: f64,
    pub clearance: f64,
    pub via_size: f64,
    pub via_drill: f64,
    /// Via penalty in grid steps.
    pub via_cost: i32,
    pub heuristic_weight: f32,
    pub max_iterations: u32,
    /// mm around unrouted endpoints that carry a proximity penalty.
    pub stub_proximity_radius: f64,
    /// Proximity penalty in grid steps.
    pub stub_proximity_cost: f64,
    pub ordering: OrderingStrategy,
    pub search_direction: SearchDirection,
    pub via_model: ViaModel,
    /// Net-name patterns (`*` wildcard) selecting nets routed as differential pairs.
    pub diff_pair_patterns: Vec<String>,
    /// Edge-to-edge gap; overrides the spacing measured from stubs.
    pub diff_pair_gap: Option<f64>,
    /// Largest relative P/N spacing mismatch between the two ends still accepted.
    pub spacing_tolerance: f64,
    /// Block the board's exclusion zones (dense package footprints).
    pub use_exclusion_zones: bool,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            layers: vec!["F.Cu".into(), "B.Cu".into()],
            grid_step: 0.1,
            track_width: 0.1,
            clearance: 0.1,
            via_size: 0.3,
            via_drill: 0.2,
            via_cost: 25,
            heuristic_weight: 1.5,
            max_iterations: 200_000,
            stub_proximity_radius: 1.0,
            stub_proximity_cost: 2.0,
            ordering: OrderingStrategy::default(),
            search_direction: SearchDirection::default(),
            via_model: ViaModel::default(),
            diff_pair_patterns: Vec::new(),
            diff_pair_gap: None,
            spacing_tolerance: 0.25,
            use_exclusion_zones: true,
        }
    }
}

impl RouterConfig {
    pub fn with_layers<S: Into<String>>(layers: impl IntoIterator<Item = S>) -> Self {
        Self {
            layers: layers.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.layers.is_empty() {
            return Err(RouterError::config("at least one copper layer is required"));
        }
        if self.layers.len() > u8::MAX as usize {
            return Err(RouterError::config(format!("{} layers exceed the supported 255", self.layers.len())));
        }
        for (i, name) in self.layers.iter().enumerate() {
            if self.layers[..i].contains(name) {
                return Err(RouterError::config(format!("duplicate layer `{name}`")));
            }
        }
        if !(self.grid_step.is_finite() && self.grid_step > 0.0) {
            return Err(RouterError::config(format!("grid_step must be positive, got {}", self.grid_step)));
        }
        for (name, v) in [
            ("track_width", self.track_width),
            ("via_size", self.via_size),
        ] {
            if !(v.is_finite() && v > 0.0) {
                return Err(RouterError::config(format!("{name} must be positive, got {v}")));
            }
        }
        for (name, v) in [
            ("clearance", self.clearance),
            ("via_drill", self.via_drill),
            ("stub_proximity_radius", self.stub_proximity_radius),
            ("stub_proximity_cost", self.stub_proximity_cost),
        ] {
            if !(v.is_finite() && v >= 0.0) {
                return Err(RouterError::config(format!("{name} must not be negative, got {v}")));
            }
        }
        if self.via_drill > self.via_size {
            return Err(RouterError::config("via_drill is larger than via_size"));
        }
        if self.via_cost < 0 {
            return Err(RouterError::config("via_cost must not be negative"));
        }
        if self.via_cost.checked_mul(ORTHO_COST).is_none() {
            return Err(RouterError::config(format!("via_cost {} is out of range", self.via_cost)));
        }
        if self.stub_proximity_cost * ORTHO_COST as f64 > i32::MAX as f64 {
            return Err(RouterError::config(format!(
                "stub_proximity_cost {} is out of range",
                self.stub_proximity_cost
            )));
        }
        if !(self.heuristic_weight.is_finite() && self.heuristic_weight >= 1.0) {
            return Err(RouterError::config(format!(
                "heuristic_weight must be >= 1.0, got {}",
                self.heuristic_weight
            )));
        }
        if let Some(gap) = self.diff_pair_gap {
            if !(gap.is_finite() && gap > 0.0) {
                return Err(RouterError::config(format!("diff_pair_gap must be positive, got {gap}")));
            }
        }
        if !(self.spacing_tolerance.is_finite() && self.spacing_tolerance >= 0.0) {
            return Err(RouterError::config("spacing_tolerance must not be negative"));
        }
        for pattern in &self.diff_pair_patterns {
            name_pattern(pattern)?;
        }
        Ok(())
    }

    pub fn num_layers(&self) -> usize {
        self.layers.len()
    }

    pub fn layer_index(&self, name: &str) -> Result<u8> {
        self.layers
            .iter()
            .position(|l| l == name)
            .map(|i| i as u8)
            .ok_or_else(|| RouterError::config(format!("unknown layer `{name}`")))
    }

    pub fn layer_name(&self, layer: u8) -> Option<&str> {
        self.layers.get(layer as usize).map(String::as_str)
    }

    #[inline]
    pub fn to_grid(&self, mm: f64) -> i32 {
        (mm / self.grid_step).round() as i32
    }

    #[inline]
    pub fn to_mm(&self, g: i32) -> f64 {
        g as f64 * self.grid_step
    }

    pub fn point_to_grid(&self, p: Point) -> (i32, i32) {
        (self.to_grid(p.x), self.to_grid(p.y))
    }

    pub fn grid_to_point(&self, gx: i32, gy: i32) -> Point {
        Point::new(self.to_mm(gx), self.to_mm(gy))
    }

    /// Distance in mm to grid cells, rounded up.
    pub fn cells(&self, mm: f64) -> i32 {
        (mm / self.grid_step).ceil().max(0.0) as i32
    }

    /// Via penalty in search cost units.
    pub fn via_cost_units(&self) -> i32 {
        self.via_cost * ORTHO_COST
    }

    pub fn proximity_cost_units(&self) -> i32 {
        (self.stub_proximity_cost * ORTHO_COST as f64).round() as i32
    }

    /// Keep-out from a copper feature of the given half-width for a new track centerline.
    pub fn track_keepout(&self, half_width: f64) -> f64 {
        half_width + self.clearance + self.track_width / 2.0
    }

    /// Keep-out from a copper feature of the given half-width for a new via center.
    pub fn via_keepout(&self, half_width: f64) -> f64 {
        half_width + self.clearance + self.via_size / 2.0
    }
}
