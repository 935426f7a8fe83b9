//! Batch routing: order the nets, route them one at a time against a shared
//! baseline obstacle map, and commit each success before the next net runs.

use log::{debug, info, warn};
use rustc_hash::{FxHashMap, FxHashSet};
use std::fmt;

use crate::config::{RouterConfig, SearchDirection};
use crate::diff_pair::{pair_nets, DiffPairRouter, DifferentialPair, RoutedPair};
use crate::error::{Result, RouterError};
use crate::geometry::{path_to_segments, BoardItem, Net, Point, Rasterizer, Rect, Segment};
use crate::obstacle_map::GridObstacleMap;
use crate::ordering::{order_nets, NetPlacement};
use crate::router::{GridRouter, SearchOptions, SearchOutcome};
use crate::types::{GridState, Path};

/// Existing board state, as delivered by the board loader.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Board {
    pub items: Vec<BoardItem>,
    /// Routable area, normally the board outline.
    pub outline: Option<Rect>,
}

impl Board {
    pub fn footprints(&self) -> Vec<Rect> {
        self.items
            .iter()
            .filter_map(|item| match item {
                BoardItem::Zone { rect, .. } => Some(*rect),
                _ => None,
            })
            .collect()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Orientation {
    Forward,
    Backward,
}

impl fmt::Display for Orientation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Forward => "forward",
            Self::Backward => "backward",
        })
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct RoutedNet {
    pub name: String,
    /// One path per connection, in routing order.
    pub paths: Vec<Path>,
    pub segments: Vec<Segment>,
    pub vias: Vec<Point>,
    pub iterations: u32,
}

#[derive(Clone, Debug, PartialEq)]
pub struct RouteFailure {
    pub net: String,
    /// N net when the failure belongs to a differential pair.
    pub partner: Option<String>,
    pub orientation: Orientation,
    pub iterations: u32,
    pub error: RouterError,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct BatchReport {
    /// Net names in the order they were attempted.
    pub order: Vec<String>,
    pub routed: Vec<RoutedNet>,
    pub routed_pairs: Vec<RoutedPair>,
    pub failures: Vec<RouteFailure>,
    pub total_iterations: u64,
}

impl BatchReport {
    pub fn successes(&self) -> usize {
        self.routed.len() + self.routed_pairs.len()
    }

    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }

    /// Nets to pass to a follow-up run.
    pub fn failed_net_names(&self) -> Vec<String> {
        self.failures
            .iter()
            .flat_map(|f| std::iter::once(f.net.clone()).chain(f.partner.clone()))
            .collect()
    }

    /// Add the routed copper to `board` so a retry sees it as existing geometry.
    pub fn apply_to(&self, board: &mut Board, config: &RouterConfig) {
        let via = |net: &str, position: Point| BoardItem::Via {
            net: net.to_string(),
            position,
            size: config.via_size,
            drill: config.via_drill,
        };
        let track = |net: &str, seg: &Segment| BoardItem::Track {
            net: net.to_string(),
            start: seg.start,
            end: seg.end,
            width: seg.width,
            layer: config.layer_name(seg.layer).unwrap_or_default().to_string(),
        };
        for routed in &self.routed {
            board.items.extend(routed.segments.iter().map(|s| track(routed.name.as_str(), s)));
            board.items.extend(routed.vias.iter().map(|&p| via(routed.name.as_str(), p)));
        }
        for pair in &self.routed_pairs {
            for (net, track_segments) in [(&pair.p_net, &pair.p_track), (&pair.n_net, &pair.n_track)] {
                board.items.extend(track_segments.iter().map(|c| track(net.as_str(), &c.segment)));
            }
            for v in &pair.via_pairs {
                board.items.push(via(pair.p_net.as_str(), v.p));
                board.items.push(via(pair.n_net.as_str(), v.n));
            }
        }
    }
}

/// Route `nets` on `board`. Only malformed configuration fails the whole call;
/// per-net problems are collected in the report.
pub fn route_batch(board: &Board, config: &RouterConfig, nets: &[Net]) -> Result<BatchReport> {
    config.validate()?;
    let mut batch = BatchRouter::new(board, config, nets)?;
    batch.run()
}

struct BatchRouter<'a> {
    config: &'a RouterConfig,
    board: &'a Board,
    nets: &'a [Net],
    router: GridRouter,
    /// Existing geometry of the nets being routed, by net name.
    net_items: FxHashMap<&'a str, Vec<&'a BoardItem>>,
    /// Nets whose own geometry names a layer the configuration lacks.
    invalid_nets: FxHashMap<&'a str, RouterError>,
    /// Geometry that is permanent for the rest of the batch.
    fixed_items: Vec<&'a BoardItem>,
    committed: Vec<(Vec<Segment>, Vec<Point>)>,
    baseline: GridObstacleMap,
    /// Nets already attempted, whether they succeeded or not.
    settled: FxHashSet<&'a str>,
}

impl<'a> BatchRouter<'a> {
    fn new(board: &'a Board, config: &'a RouterConfig, nets: &'a [Net]) -> Result<Self> {
        let routing: FxHashSet<&str> = nets.iter().map(|n| n.name.as_str()).collect();
        let mut net_items: FxHashMap<&str, Vec<&BoardItem>> = FxHashMap::default();
        let mut invalid_nets: FxHashMap<&str, RouterError> = FxHashMap::default();
        let mut fixed_items = Vec::new();
        for item in &board.items {
            let checked = item.layers(config);
            match (item.net(), checked) {
                (Some(net), Ok(_)) if routing.contains(net) => net_items.entry(net).or_default().push(item),
                (Some(net), Err(err)) if routing.contains(net) => {
                    invalid_nets.entry(net).or_insert(err);
                }
                (_, Ok(_)) => fixed_items.push(item),
                (net, Err(err)) => warn!("ignoring board item of net {}: {err}", net.unwrap_or("<none>")),
            }
        }

        let router = GridRouter::new(config.via_cost_units(), config.heuristic_weight)?.with_options(SearchOptions {
            collinear_vias: false,
            via_model: config.via_model,
        });
        let mut batch = Self {
            config,
            board,
            nets,
            router,
            net_items,
            invalid_nets,
            fixed_items,
            committed: Vec::new(),
            baseline: GridObstacleMap::new(config.num_layers()),
            settled: FxHashSet::default(),
        };
        batch.baseline = batch.rebuild(0.0, 0.0);
        debug!(
            "baseline: {} blocked cells, {} blocked vias",
            batch.baseline.blocked_cell_count(),
            batch.baseline.blocked_via_count()
        );
        Ok(batch)
    }

    /// Rasterize all permanent geometry from scratch with extra margins.
    fn rebuild(&self, margin: f64, via_margin: f64) -> GridObstacleMap {
        let raster = Rasterizer::with_margins(self.config, margin, via_margin);
        let mut map = GridObstacleMap::new(self.config.num_layers());
        if let Some(outline) = self.board.outline {
            let (min_gx, min_gy) = self.config.point_to_grid(outline.min);
            let (max_gx, max_gy) = self.config.point_to_grid(outline.max);
            map.set_bounds(min_gx, min_gy, max_gx, max_gy);
        }
        for &item in &self.fixed_items {
            add_checked(&raster, &mut map, item);
        }
        for (segments, vias) in &self.committed {
            raster.add_route(&mut map, segments, vias);
        }
        map
    }

    fn run(&mut self) -> Result<BatchReport> {
        let nets: &'a [Net] = self.nets;
        let names: Vec<String> = nets.iter().map(|n| n.name.clone()).collect();
        let pairs = pair_nets(&names, &self.config.diff_pair_patterns)?;
        let partner_of: FxHashMap<&str, &str> = pairs.iter().map(|(p, n)| (p.as_str(), n.as_str())).collect();
        let n_side: FxHashSet<&str> = pairs.iter().map(|(_, n)| n.as_str()).collect();
        let by_name: FxHashMap<&str, &'a Net> = nets.iter().map(|n| (n.name.as_str(), n)).collect();

        let placements: Vec<NetPlacement> = nets
            .iter()
            .map(|n| NetPlacement::new(n.name.clone(), n.endpoint_positions()))
            .collect();
        let order = order_nets(self.config.ordering, &placements, &self.board.footprints());
        info!(
            "routing {} nets ({} differential pairs), {} ordering",
            nets.len(),
            pairs.len(),
            self.config.ordering
        );

        let mut report = BatchReport::default();
        for idx in order {
            let net = &nets[idx];
            if n_side.contains(net.name.as_str()) {
                continue;
            }
            match partner_of.get(net.name.as_str()).and_then(|n| by_name.get(n)) {
                Some(&n_net) => {
                    report.order.push(net.name.clone());
                    report.order.push(n_net.name.clone());
                    self.route_pair(net, n_net, &mut report);
                }
                None => {
                    report.order.push(net.name.clone());
                    self.route_single(net, &mut report);
                }
            }
        }

        info!(
            "routed {}/{} ({} failed), {} iterations",
            report.successes(),
            report.successes() + report.failures.len(),
            report.failures.len(),
            report.total_iterations
        );
        Ok(report)
    }

    fn route_single(&mut self, net: &'a Net, report: &mut BatchReport) {
        let outcome = match self.invalid_nets.get(net.name.as_str()) {
            Some(err) => Err((err.clone(), Orientation::Forward, 0)),
            None => self.search_net(&self.net_obstacles(&[net], 0.0, 0.0), net),
        };
        match outcome {
            Ok(routed) => {
                debug!("{}: routed in {} iterations", net.name, routed.iterations);
                report.total_iterations += routed.iterations as u64;
                self.committed.push((routed.segments.clone(), routed.vias.clone()));
                Rasterizer::new(self.config).add_route(&mut self.baseline, &routed.segments, &routed.vias);
                report.routed.push(routed);
            }
            Err((error, orientation, iterations)) => {
                warn!("{}: {error}", net.name);
                report.total_iterations += iterations as u64;
                report.failures.push(RouteFailure {
                    net: net.name.clone(),
                    partner: None,
                    orientation,
                    iterations,
                    error,
                });
            }
        }
        self.settle(net);
    }

    fn route_pair(&mut self, p: &'a Net, n: &'a Net, report: &mut BatchReport) {
        let pair = DifferentialPair {
            name: pair_base_name(&p.name, &n.name),
            p: p.clone(),
            n: n.clone(),
        };
        let router = DiffPairRouter::new(self.config);
        let mut orientation = Orientation::Forward;
        let invalid = [p, n].into_iter().find_map(|net| self.invalid_nets.get(net.name.as_str()));
        let routed = match invalid {
            Some(err) => Err(err.clone()),
            None => router.plan(&pair).and_then(|plan| {
                let spacing = plan.spacing.spacing;
                let mut map = self.net_obstacles(&[p, n], spacing / 2.0, router.via_offset(spacing));
                for s in plan.sources.iter().chain(&plan.targets) {
                    map.add_allowed_cell(s.gx, s.gy);
                }
                let mut iterations = 0u32;
                for &o in self.orientations() {
                    orientation = o;
                    let attempt = match o {
                        Orientation::Forward => router.route_planned(&map, &pair, &plan),
                        Orientation::Backward => router.route_planned_reversed(&map, &pair, &plan),
                    };
                    match attempt {
                        Ok(mut routed) => {
                            routed.iterations = routed.iterations.saturating_add(iterations);
                            return Ok(routed);
                        }
                        Err(RouterError::NoPathFound { iterations: spent, .. }) => {
                            iterations = iterations.saturating_add(spent);
                            debug!("{}: no {o} route, {iterations} iterations so far", pair.name);
                        }
                        Err(err) => return Err(err),
                    }
                }
                Err(RouterError::NoPathFound {
                    net: pair.name.clone(),
                    iterations,
                })
            }),
        };
        match routed {
            Ok(routed) => {
                info!(
                    "{}: spacing {:.4} mm{}, polarity swap {}, {} via pairs",
                    routed.name,
                    routed.spacing.spacing,
                    if routed.spacing.discrepancy { " (stub mismatch)" } else { "" },
                    routed.polarity.swap_required(),
                    routed.via_pairs.len()
                );
                report.total_iterations += routed.iterations as u64;
                let segments: Vec<Segment> = routed.segments().cloned().collect();
                let vias = routed.via_positions();
                Rasterizer::new(self.config).add_route(&mut self.baseline, &segments, &vias);
                self.committed.push((segments, vias));
                report.routed_pairs.push(routed);
            }
            Err(error) => {
                warn!("{}: {error}", pair.name);
                let iterations = match &error {
                    RouterError::NoPathFound { iterations, .. } => *iterations,
                    _ => 0,
                };
                report.total_iterations += iterations as u64;
                report.failures.push(RouteFailure {
                    net: p.name.clone(),
                    partner: Some(n.name.clone()),
                    orientation,
                    iterations,
                    error,
                });
            }
        }
        self.settle(p);
        self.settle(n);
    }

    /// Make a net's own geometry permanent once it has been attempted.
    fn settle(&mut self, net: &'a Net) {
        if !self.settled.insert(net.name.as_str()) {
            return;
        }
        if let Some(items) = self.net_items.get(net.name.as_str()) {
            let raster = Rasterizer::new(self.config);
            for &item in items {
                add_checked(&raster, &mut self.baseline, item);
                self.fixed_items.push(item);
            }
        }
    }

    /// Baseline plus every other unsettled net's geometry and proximity penalty.
    fn net_obstacles(&self, current: &[&Net], margin: f64, via_margin: f64) -> GridObstacleMap {
        let mut map = if margin > 0.0 || via_margin > 0.0 {
            self.rebuild(margin, via_margin)
        } else {
            self.baseline.clone()
        };
        let raster = Rasterizer::with_margins(self.config, margin, via_margin);
        for other in self.nets {
            if self.settled.contains(other.name.as_str()) || current.iter().any(|c| c.name == other.name) {
                continue;
            }
            for &item in self.net_items.get(other.name.as_str()).into_iter().flatten() {
                add_checked(&raster, &mut map, item);
            }
            for ep in &other.endpoints {
                raster.add_proximity(&mut map, ep.position);
            }
        }
        for net in current {
            for ep in &net.endpoints {
                for (gx, gy) in ep.cells() {
                    map.add_allowed_cell(gx, gy);
                }
            }
        }
        map
    }

    fn orientations(&self) -> &'static [Orientation] {
        match self.config.search_direction {
            SearchDirection::Forward => &[Orientation::Forward],
            SearchDirection::Backward => &[Orientation::Backward],
            SearchDirection::ForwardThenBackward => &[Orientation::Forward, Orientation::Backward],
        }
    }

    fn search_net(
        &self,
        map: &GridObstacleMap,
        net: &Net,
    ) -> std::result::Result<RoutedNet, (RouterError, Orientation, u32)> {
        if net.endpoints.len() < 2 {
            let detail = format!("{} endpoints, at least 2 are needed", net.endpoints.len());
            return Err((RouterError::geometry(&net.name, detail), Orientation::Forward, 0));
        }
        let num_layers = self.config.num_layers();
        if let Some(bad) = net
            .endpoints
            .iter()
            .flat_map(|e| &e.states)
            .find(|s| s.layer as usize >= num_layers)
        {
            let msg = format!("net {} uses layer {} of {}", net.name, bad.layer, num_layers);
            return Err((RouterError::Configuration(msg), Orientation::Forward, 0));
        }

        let orientations = self.orientations();

        // Multi-endpoint nets grow a tree: each new endpoint connects to anything routed so far
        let mut tree: Vec<GridState> = net.endpoints[0].states.clone();
        let mut paths = Vec::new();
        let mut iterations = 0u32;
        for endpoint in &net.endpoints[1..] {
            let mut found = None;
            let mut last = Orientation::Forward;
            for &orientation in orientations {
                last = orientation;
                let outcome = match orientation {
                    Orientation::Forward => self.search(map, &tree, &endpoint.states),
                    Orientation::Backward => self.search(map, &endpoint.states, &tree),
                };
                iterations = iterations.saturating_add(outcome.iterations());
                if let Some(path) = outcome.into_path() {
                    found = Some(match orientation {
                        Orientation::Forward => path,
                        Orientation::Backward => path.reversed(),
                    });
                    break;
                }
                debug!("{}: no {orientation} route, {iterations} iterations so far", net.name);
            }
            let Some(path) = found else {
                let error = RouterError::NoPathFound {
                    net: net.name.clone(),
                    iterations,
                };
                return Err((error, last, iterations));
            };
            tree.extend(path.states.iter().copied());
            paths.push(path);
        }

        let mut segments = Vec::new();
        let mut vias = Vec::new();
        for path in &paths {
            let (s, v) = path_to_segments(self.config, &path.states);
            segments.extend(s);
            vias.extend(v);
        }
        Ok(RoutedNet {
            name: net.name.clone(),
            paths,
            segments,
            vias,
            iterations,
        })
    }

    fn search(&self, map: &GridObstacleMap, sources: &[GridState], targets: &[GridState]) -> SearchOutcome {
        self.router.route_multi(map, sources, targets, self.config.max_iterations)
    }
}

/// Items reach the rasterizer only after their layers were checked in `BatchRouter::new`.
fn add_checked(raster: &Rasterizer, map: &mut GridObstacleMap, item: &BoardItem) {
    if let Err(err) = raster.add_item(map, item) {
        warn!("skipping board item of net {}: {err}", item.net().unwrap_or("<none>"));
    }
}

/// "USB_D_P" + "USB_D_N" -> "USB_D"
fn pair_base_name(p: &str, n: &str) -> String {
    let common = p.chars().zip(n.chars()).take_while(|(a, b)| a == b).count();
    let base: String = p.chars().take(common).collect();
    let base = base.trim_end_matches(['_', '-', '+']);
    if base.is_empty() {
        p.to_string()
    } else {
        base.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_names() {
        assert_eq!(pair_base_name("USB_D_P", "USB_D_N"), "USB_D");
        assert_eq!(pair_base_name("LVDS0+", "LVDS0-"), "LVDS0");
        assert_eq!(pair_base_name("P", "N"), "P");
    }

    #[test]
    fn failed_names_include_partners() {
        let report = BatchReport {
            failures: vec![
                RouteFailure {
                    net: "A".into(),
                    partner: None,
                    orientation: Orientation::Backward,
                    iterations: 10,
                    error: RouterError::NoPathFound {
                        net: "A".into(),
                        iterations: 10,
                    },
                },
                RouteFailure {
                    net: "D_P".into(),
                    partner: Some("D_N".into()),
                    orientation: Orientation::Forward,
                    iterations: 0,
                    error: RouterError::geometry("D", "swap"),
                },
            ],
            ..Default::default()
        };
        assert_eq!(report.failed_net_names(), vec!["A", "D_P", "D_N"]);
        assert!(!report.is_complete());
    }
}
