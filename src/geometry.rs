//! Board geometry records and their rasterization into the obstacle grid.
//!
//! Everything is in mm until it reaches `Rasterizer`, which converts with the
//! configured grid step and inflates each feature by the clearances a new
//! track or via needs around it.

use log::warn;
use serde::{Deserialize, Serialize};
use std::ops::{Add, Mul, Neg, Sub};

use crate::config::RouterConfig;
use crate::error::Result;
use crate::obstacle_map::GridObstacleMap;
use crate::types::GridState;

#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn length(self) -> f64 {
        self.x.hypot(self.y)
    }

    pub fn distance(self, other: Point) -> f64 {
        (self - other).length()
    }

    pub fn dot(self, other: Point) -> f64 {
        self.x * other.x + self.y * other.y
    }

    /// z component of the 3D cross product.
    pub fn cross(self, other: Point) -> f64 {
        self.x * other.y - self.y * other.x
    }

    /// Unit vector, or zero for a zero vector.
    pub fn normalized(self) -> Point {
        let len = self.length();
        if len > 0.0 {
            Point::new(self.x / len, self.y / len)
        } else {
            Point::default()
        }
    }

    /// Left-hand normal (rotated +90 degrees).
    pub fn perp(self) -> Point {
        Point::new(-self.y, self.x)
    }

    pub fn rotated(self, degrees: f64) -> Point {
        let (sin, cos) = degrees.to_radians().sin_cos();
        Point::new(self.x * cos - self.y * sin, self.x * sin + self.y * cos)
    }

    pub fn midpoint(self, other: Point) -> Point {
        (self + other) * 0.5
    }

    pub fn centroid(points: &[Point]) -> Option<Point> {
        if points.is_empty() {
            return None;
        }
        let sum = points.iter().fold(Point::default(), |acc, &p| acc + p);
        Some(sum * (1.0 / points.len() as f64))
    }
}

impl Add for Point {
    type Output = Point;
    fn add(self, rhs: Point) -> Point {
        Point::new(self.x + rhs.x, self.y + rhs.y)
    }
}

impl Sub for Point {
    type Output = Point;
    fn sub(self, rhs: Point) -> Point {
        Point::new(self.x - rhs.x, self.y - rhs.y)
    }
}

impl Mul<f64> for Point {
    type Output = Point;
    fn mul(self, rhs: f64) -> Point {
        Point::new(self.x * rhs, self.y * rhs)
    }
}

impl Neg for Point {
    type Output = Point;
    fn neg(self) -> Point {
        Point::new(-self.x, -self.y)
    }
}

/// Distance from `p` to the segment `a`-`b`.
pub fn point_segment_distance(p: Point, a: Point, b: Point) -> f64 {
    let ab = b - a;
    let len2 = ab.dot(ab);
    if len2 == 0.0 {
        return p.distance(a);
    }
    let t = ((p - a).dot(ab) / len2).clamp(0.0, 1.0);
    p.distance(a + ab * t)
}

/// Axis-aligned rectangle in mm.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Rect {
    pub min: Point,
    pub max: Point,
}

impl Rect {
    pub fn new(min: Point, max: Point) -> Self {
        Self {
            min: Point::new(min.x.min(max.x), min.y.min(max.y)),
            max: Point::new(min.x.max(max.x), min.y.max(max.y)),
        }
    }

    pub fn contains(&self, p: Point) -> bool {
        p.x >= self.min.x && p.x <= self.max.x && p.y >= self.min.y && p.y <= self.max.y
    }

    pub fn center(&self) -> Point {
        self.min.midpoint(self.max)
    }
}

/// Wildcard layer name used for through-hole pads.
pub const ALL_COPPER: &str = "*.Cu";

/// The board features the router needs, as supplied by the board loader.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum BoardItem {
    Track {
        net: String,
        start: Point,
        end: Point,
        width: f64,
        layer: String,
    },
    Pad {
        net: String,
        center: Point,
        /// Width and height before rotation.
        size: (f64, f64),
        /// Degrees, counter-clockwise.
        rotation: f64,
        layers: Vec<String>,
    },
    Via {
        net: String,
        position: Point,
        size: f64,
        drill: f64,
    },
    /// Keep-out region such as a dense package footprint.
    Zone { name: String, rect: Rect },
}

impl BoardItem {
    /// Owning net, `None` for zones and unconnected copper.
    pub fn net(&self) -> Option<&str> {
        let net = match self {
            Self::Track { net, .. } | Self::Pad { net, .. } | Self::Via { net, .. } => net,
            Self::Zone { .. } => return None,
        };
        (!net.is_empty()).then_some(net.as_str())
    }

    /// Layer ordinals the item occupies. Vias and zones cover every layer.
    pub fn layers(&self, config: &RouterConfig) -> Result<Vec<u8>> {
        match self {
            Self::Track { layer, .. } => Ok(vec![config.layer_index(layer)?]),
            Self::Pad { layers, .. } => resolve_layers(config, layers),
            Self::Via { .. } | Self::Zone { .. } => Ok((0..config.num_layers() as u8).collect()),
        }
    }
}

/// A copper segment in physical units, ready for the board writer.
#[derive(Clone, Debug, PartialEq)]
pub struct Segment {
    pub start: Point,
    pub end: Point,
    pub layer: u8,
    pub width: f64,
}

impl Segment {
    pub fn length(&self) -> f64 {
        self.start.distance(self.end)
    }
}

/// One end of a connection: any of `states` is an acceptable place to start or stop.
#[derive(Clone, Debug, PartialEq)]
pub struct Endpoint {
    pub position: Point,
    pub states: Vec<GridState>,
}

impl Endpoint {
    pub fn new(config: &RouterConfig, position: Point, layers: &[u8]) -> Self {
        let (gx, gy) = config.point_to_grid(position);
        Self {
            position,
            states: layers.iter().map(|&l| GridState::new(gx, gy, l)).collect(),
        }
    }

    /// Entry point for a pad (its center on every pad layer) or a stub track (its `end`).
    pub fn from_item(config: &RouterConfig, item: &BoardItem) -> Result<Option<Self>> {
        let endpoint = match item {
            BoardItem::Pad { center, layers, .. } => {
                let layers = resolve_layers(config, layers)?;
                Some(Self::new(config, *center, &layers))
            }
            BoardItem::Track { end, layer, .. } => Some(Self::new(config, *end, &[config.layer_index(layer)?])),
            BoardItem::Via { position, .. } => {
                let layers: Vec<u8> = (0..config.num_layers() as u8).collect();
                Some(Self::new(config, *position, &layers))
            }
            BoardItem::Zone { .. } => None,
        };
        Ok(endpoint)
    }

    pub fn cells(&self) -> impl Iterator<Item = (i32, i32)> + '_ {
        self.states.iter().map(GridState::xy)
    }
}

/// A net to route: two or more endpoints, connected in order.
#[derive(Clone, Debug, PartialEq)]
pub struct Net {
    pub name: String,
    pub endpoints: Vec<Endpoint>,
}

impl Net {
    pub fn new(name: impl Into<String>, endpoints: Vec<Endpoint>) -> Self {
        Self {
            name: name.into(),
            endpoints,
        }
    }

    pub fn endpoint_positions(&self) -> Vec<Point> {
        self.endpoints.iter().map(|e| e.position).collect()
    }
}

fn resolve_layers(config: &RouterConfig, names: &[String]) -> Result<Vec<u8>> {
    if names.iter().any(|n| n == ALL_COPPER) {
        return Ok((0..config.num_layers() as u8).collect());
    }
    names.iter().map(|n| config.layer_index(n)).collect()
}

/// Converts board items and routed paths to obstacle cells.
pub struct Rasterizer<'a> {
    config: &'a RouterConfig,
    /// Extra keep-out for wide routed objects, e.g. half a differential pair.
    margin: f64,
    /// Extra keep-out applied to via blocking only.
    via_margin: f64,
}

impl<'a> Rasterizer<'a> {
    pub fn new(config: &'a RouterConfig) -> Self {
        Self::with_margins(config, 0.0, 0.0)
    }

    /// Separate margins for track cells and via positions. A differential
    /// pair places its vias further from the centerline than its tracks.
    pub fn with_margins(config: &'a RouterConfig, margin: f64, via_margin: f64) -> Self {
        Self {
            config,
            margin,
            via_margin,
        }
    }

    pub fn add_item(&self, map: &mut GridObstacleMap, item: &BoardItem) -> Result<()> {
        match item {
            BoardItem::Track {
                start, end, width, layer, ..
            } => {
                let layer = self.config.layer_index(layer)?;
                self.add_track(map, *start, *end, width / 2.0, layer);
            }
            BoardItem::Pad {
                center,
                size,
                rotation,
                layers,
                ..
            } => {
                let layers = resolve_layers(self.config, layers)?;
                self.add_pad(map, *center, *size, *rotation, &layers);
            }
            BoardItem::Via { position, size, .. } => self.add_via(map, *position, size / 2.0),
            BoardItem::Zone { name, rect } => {
                if self.config.use_exclusion_zones {
                    let (min_gx, min_gy) = self.config.point_to_grid(rect.min);
                    let (max_gx, max_gy) = self.config.point_to_grid(rect.max);
                    let zone = (min_gx, min_gy, max_gx, max_gy);
                    // The map holds one zone; a later zone replaces the earlier one
                    if let Some(previous) = map.exclusion_zone().filter(|&z| z != zone) {
                        warn!("exclusion zone {name} replaces zone {previous:?}, only one zone is enforced");
                    }
                    map.set_exclusion_zone(min_gx, min_gy, max_gx, max_gy);
                }
            }
        }
        Ok(())
    }

    pub fn add_track(&self, map: &mut GridObstacleMap, start: Point, end: Point, half_width: f64, layer: u8) {
        let track_keepout = self.config.track_keepout(half_width) + self.margin;
        let via_keepout = self.config.via_keepout(half_width) + self.via_margin;
        let reach = track_keepout.max(via_keepout);
        for (gx, gy, p) in self.cells_around(start, end, reach) {
            let d = point_segment_distance(p, start, end);
            if d < track_keepout - 1e-9 {
                map.add_blocked_cell(gx, gy, layer as usize);
            }
            if d < via_keepout - 1e-9 {
                map.add_blocked_via(gx, gy);
            }
        }
    }

    pub fn add_pad(&self, map: &mut GridObstacleMap, center: Point, size: (f64, f64), rotation: f64, layers: &[u8]) {
        let (hw, hh) = (size.0 / 2.0, size.1 / 2.0);
        let track_extra = self.config.clearance + self.config.track_width / 2.0 + self.margin;
        let via_extra = self.config.clearance + self.config.via_size / 2.0 + self.via_margin;
        let reach = hw.hypot(hh) + track_extra.max(via_extra);
        for (gx, gy, p) in self.cells_around(center, center, reach) {
            let local = (p - center).rotated(-rotation);
            let (lx, ly) = (local.x.abs(), local.y.abs());
            if lx < hw + track_extra - 1e-9 && ly < hh + track_extra - 1e-9 {
                for &layer in layers {
                    map.add_blocked_cell(gx, gy, layer as usize);
                }
            }
            if lx < hw + via_extra - 1e-9 && ly < hh + via_extra - 1e-9 {
                map.add_blocked_via(gx, gy);
            }
        }
    }

    /// Through via: blocks tracks on every layer and other vias around it.
    pub fn add_via(&self, map: &mut GridObstacleMap, position: Point, radius: f64) {
        let track_keepout = self.config.track_keepout(radius) + self.margin;
        let via_keepout = self.config.via_keepout(radius) + self.via_margin;
        let reach = track_keepout.max(via_keepout);
        for (gx, gy, p) in self.cells_around(position, position, reach) {
            let d = p.distance(position);
            if d < track_keepout - 1e-9 {
                for layer in 0..map.num_layers() {
                    map.add_blocked_cell(gx, gy, layer);
                }
            }
            if d < via_keepout - 1e-9 {
                map.add_blocked_via(gx, gy);
            }
        }
    }

    /// Commit a routed segment list and its vias as permanent obstacles.
    pub fn add_route(&self, map: &mut GridObstacleMap, segments: &[Segment], vias: &[Point]) {
        for seg in segments {
            self.add_track(map, seg.start, seg.end, seg.width / 2.0, seg.layer);
        }
        for &via in vias {
            self.add_via(map, via, self.config.via_size / 2.0);
        }
    }

    /// Penalize the area around an endpoint that is still waiting to be routed.
    pub fn add_proximity(&self, map: &mut GridObstacleMap, position: Point) {
        let (gx, gy) = self.config.point_to_grid(position);
        let radius = self.config.cells(self.config.stub_proximity_radius);
        map.add_proximity_disc(gx, gy, radius, self.config.proximity_cost_units());
    }

    fn cells_around(&self, a: Point, b: Point, reach: f64) -> impl Iterator<Item = (i32, i32, Point)> + '_ {
        let cfg = self.config;
        let min_gx = cfg.to_grid(a.x.min(b.x) - reach) - 1;
        let max_gx = cfg.to_grid(a.x.max(b.x) + reach) + 1;
        let min_gy = cfg.to_grid(a.y.min(b.y) - reach) - 1;
        let max_gy = cfg.to_grid(a.y.max(b.y) + reach) + 1;
        (min_gy..=max_gy).flat_map(move |gy| (min_gx..=max_gx).map(move |gx| (gx, gy, cfg.grid_to_point(gx, gy))))
    }
}

/// Reduce a grid path to its corner and via states.
pub fn simplify_states(states: &[GridState]) -> Vec<GridState> {
    if states.len() <= 2 {
        return states.to_vec();
    }
    let mut out = vec![states[0]];
    for i in 1..states.len() - 1 {
        let (prev, cur, next) = (states[i - 1], states[i], states[i + 1]);
        let keep = prev.layer != cur.layer
            || cur.layer != next.layer
            || (cur.gx - prev.gx, cur.gy - prev.gy) != (next.gx - cur.gx, next.gy - cur.gy);
        if keep {
            out.push(cur);
        }
    }
    out.push(states[states.len() - 1]);
    out
}

/// Convert a grid path into mm track segments and via positions.
pub fn path_to_segments(config: &RouterConfig, states: &[GridState]) -> (Vec<Segment>, Vec<Point>) {
    let simple = simplify_states(states);
    let mut segments = Vec::new();
    let mut vias = Vec::new();
    for w in simple.windows(2) {
        let (a, b) = (w[0], w[1]);
        if a.layer != b.layer {
            let p = config.grid_to_point(a.gx, a.gy);
            if vias.last() != Some(&p) {
                vias.push(p);
            }
        } else {
            segments.push(Segment {
                start: config.grid_to_point(a.gx, a.gy),
                end: config.grid_to_point(b.gx, b.gy),
                layer: a.layer,
                width: config.track_width,
            });
        }
    }
    (segments, vias)
}

#[cfg(test)]
mod tests {
    use super::*;
    use float_eq::assert_float_eq;

    fn cfg() -> RouterConfig {
        RouterConfig {
            grid_step: 0.1,
            track_width: 0.1,
            clearance: 0.1,
            via_size: 0.3,
            ..RouterConfig::default()
        }
    }

    #[test]
    fn segment_distance() {
        let a = Point::new(0.0, 0.0);
        let b = Point::new(2.0, 0.0);
        assert_float_eq!(point_segment_distance(Point::new(1.0, 1.0), a, b), 1.0, abs <= 1e-12);
        assert_float_eq!(point_segment_distance(Point::new(3.0, 0.0), a, b), 1.0, abs <= 1e-12);
        assert_float_eq!(point_segment_distance(Point::new(0.5, 0.5), a, a), 0.5f64.hypot(0.5), abs <= 1e-12);
    }

    #[test]
    fn track_blocks_its_layer_only() {
        let config = cfg();
        let mut map = GridObstacleMap::new(2);
        let item = BoardItem::Track {
            net: "A".into(),
            start: Point::new(0.0, 0.0),
            end: Point::new(1.0, 0.0),
            width: 0.1,
            layer: "F.Cu".into(),
        };
        Rasterizer::new(&config).add_item(&mut map, &item).unwrap();
        // keepout 0.05 + 0.1 + 0.05 = 0.2 mm, two cells are too close
        assert!(map.is_blocked(5, 1, 0));
        assert!(!map.is_blocked(5, 2, 0));
        assert!(!map.is_blocked(5, 0, 1));
        // via keepout 0.05 + 0.1 + 0.15 = 0.3 mm
        assert!(map.is_via_blocked(5, 2));
        assert!(!map.is_via_blocked(5, 3));
    }

    #[test]
    fn rotated_pad_footprint() {
        let config = cfg();
        let mut map = GridObstacleMap::new(2);
        // 1.0 x 0.2 pad rotated to vertical
        Rasterizer::new(&config).add_pad(&mut map, Point::new(0.0, 0.0), (1.0, 0.2), 90.0, &[0]);
        assert!(map.is_blocked(0, 6, 0));
        assert!(!map.is_blocked(6, 0, 0));
        assert!(!map.is_blocked(0, 0, 1));
    }

    #[test]
    fn via_blocks_all_layers() {
        let config = cfg();
        let mut map = GridObstacleMap::new(3);
        Rasterizer::new(&config).add_via(&mut map, Point::new(1.0, 1.0), 0.15);
        for layer in 0..3 {
            assert!(map.is_blocked(10, 10, layer));
        }
        assert!(map.is_via_blocked(13, 10));
    }

    #[test]
    fn unknown_layer_is_config_error() {
        let config = cfg();
        let mut map = GridObstacleMap::new(2);
        let item = BoardItem::Pad {
            net: "A".into(),
            center: Point::default(),
            size: (0.3, 0.3),
            rotation: 0.0,
            layers: vec!["In7.Cu".into()],
        };
        assert!(Rasterizer::new(&config).add_item(&mut map, &item).is_err());
    }

    #[test]
    fn item_layers() {
        let config = cfg();
        let via = BoardItem::Via {
            net: "A".into(),
            position: Point::default(),
            size: 0.3,
            drill: 0.2,
        };
        assert_eq!(via.layers(&config).unwrap(), vec![0, 1]);
        let track = BoardItem::Track {
            net: "A".into(),
            start: Point::default(),
            end: Point::new(1.0, 0.0),
            width: 0.1,
            layer: "In1.Cu".into(),
        };
        assert!(matches!(track.layers(&config), Err(crate::RouterError::Configuration(_))));
    }

    #[test]
    fn via_margin_is_separate() {
        let config = cfg();
        let mut map = GridObstacleMap::new(2);
        let raster = Rasterizer::with_margins(&config, 0.0, 0.2);
        raster.add_track(&mut map, Point::new(0.0, 0.0), Point::new(1.0, 0.0), 0.05, 0);
        // track keepout unchanged at 0.2 mm, via keepout 0.3 + 0.2 mm
        assert!(!map.is_blocked(5, 2, 0));
        assert!(map.is_via_blocked(5, 4));
        assert!(!map.is_via_blocked(5, 5));
    }

    #[test]
    fn later_zone_replaces_earlier() {
        let config = cfg();
        let mut map = GridObstacleMap::new(2);
        let raster = Rasterizer::new(&config);
        for (name, min, max) in [("U1", (0.0, 0.0), (1.0, 1.0)), ("U2", (3.0, 3.0), (4.0, 4.0))] {
            let zone = BoardItem::Zone {
                name: name.into(),
                rect: Rect::new(Point::new(min.0, min.1), Point::new(max.0, max.1)),
            };
            raster.add_item(&mut map, &zone).unwrap();
        }
        assert_eq!(map.exclusion_zone(), Some((30, 30, 40, 40)));
        assert!(map.is_blocked(35, 35, 0));
        assert!(!map.is_blocked(5, 5, 0));
    }

    #[test]
    fn simplify_keeps_corners_and_vias() {
        let path: Vec<GridState> = [(0, 0, 0), (1, 0, 0), (2, 0, 0), (2, 0, 1), (3, 1, 1), (4, 2, 1)]
            .into_iter()
            .map(GridState::from)
            .collect();
        let simple = simplify_states(&path);
        assert_eq!(
            simple,
            vec![
                GridState::new(0, 0, 0),
                GridState::new(2, 0, 0),
                GridState::new(2, 0, 1),
                GridState::new(4, 2, 1)
            ]
        );
        let (segments, vias) = path_to_segments(&cfg(), &path);
        assert_eq!(segments.len(), 2);
        assert_eq!(vias.len(), 1);
        assert_float_eq!(vias[0].x, 0.2, abs <= 1e-9);
    }
}
