//! Differential pair routing.
//!
//! A pair is routed as a single centerline search. The P and N conductors are
//! parallel offsets of that centerline, and every layer change becomes a via
//! pair placed across the direction of travel. When the P/N sides differ
//! between the two ends, the sides are exchanged at the first via pair by
//! arcing the outer conductor around the other via on the new layer.

use log::{debug, warn};
use regex::Regex;
use std::f64::consts::PI;

use crate::config::RouterConfig;
use crate::error::{Result, RouterError};
use crate::geometry::{simplify_states, Endpoint, Net, Point, Segment};
use crate::obstacle_map::GridObstacleMap;
use crate::router::{GridRouter, SearchOptions};
use crate::types::{GridState, Path};

const EPS: f64 = 1e-9;

/// P and N nets routed together.
#[derive(Clone, Debug, PartialEq)]
pub struct DifferentialPair {
    pub name: String,
    pub p: Net,
    pub n: Net,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SpacingDecision {
    /// Center-to-center distance used for routing.
    pub spacing: f64,
    pub source_spacing: f64,
    pub target_spacing: f64,
    /// The ends (or the configured gap) disagreed and one value was picked.
    pub discrepancy: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PolarityDecision {
    /// P lies left of the travel direction at the source.
    pub p_left_at_source: bool,
    pub p_left_at_target: bool,
}

impl PolarityDecision {
    pub fn swap_required(&self) -> bool {
        self.p_left_at_source != self.p_left_at_target
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SegmentKind {
    /// Offset of the centerline, held at the pair spacing.
    Body,
    /// Short jog between a conductor and its via.
    Exit,
    /// Link from a stub end to the routed body.
    Connector,
    /// Part of a polarity swap around a via.
    Crossover,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ConductorSegment {
    pub segment: Segment,
    pub kind: SegmentKind,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ViaPair {
    pub p: Point,
    pub n: Point,
    pub from_layer: u8,
    pub to_layer: u8,
    pub polarity_swap: bool,
}

/// Everything decided about a pair before searching.
#[derive(Clone, Debug, PartialEq)]
pub struct PairPlan {
    pub name: String,
    pub spacing: SpacingDecision,
    pub polarity: PolarityDecision,
    /// Centerline start and end states.
    pub sources: Vec<GridState>,
    pub targets: Vec<GridState>,
    /// (source, target) stub ends of each conductor.
    pub p_ends: (Point, Point),
    pub n_ends: (Point, Point),
}

impl PairPlan {
    /// The same pair seen from its target end. Travel direction flips, so
    /// left and right swap at both ends.
    pub fn reversed(&self) -> Self {
        Self {
            name: self.name.clone(),
            spacing: SpacingDecision {
                source_spacing: self.spacing.target_spacing,
                target_spacing: self.spacing.source_spacing,
                ..self.spacing
            },
            polarity: PolarityDecision {
                p_left_at_source: !self.polarity.p_left_at_target,
                p_left_at_target: !self.polarity.p_left_at_source,
            },
            sources: self.targets.clone(),
            targets: self.sources.clone(),
            p_ends: (self.p_ends.1, self.p_ends.0),
            n_ends: (self.n_ends.1, self.n_ends.0),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct RoutedPair {
    pub name: String,
    pub p_net: String,
    pub n_net: String,
    pub spacing: SpacingDecision,
    pub polarity: PolarityDecision,
    pub centerline: Path,
    pub p_track: Vec<ConductorSegment>,
    pub n_track: Vec<ConductorSegment>,
    pub via_pairs: Vec<ViaPair>,
    pub iterations: u32,
}

impl RoutedPair {
    pub fn segments(&self) -> impl Iterator<Item = &Segment> {
        self.p_track.iter().chain(&self.n_track).map(|c| &c.segment)
    }

    pub fn via_positions(&self) -> Vec<Point> {
        self.via_pairs.iter().flat_map(|v| [v.p, v.n]).collect()
    }
}

/// Points along a circular arc from `start_angle` to `end_angle` (radians,
/// counter-clockwise when `end_angle > start_angle`), both ends included.
pub fn arc_points(center: Point, radius: f64, start_angle: f64, end_angle: f64) -> Vec<Point> {
    let sweep = end_angle - start_angle;
    let steps = ((sweep.abs() / (PI / 16.0)).ceil() as usize).max(2);
    (0..=steps)
        .map(|i| {
            let a = start_angle + sweep * i as f64 / steps as f64;
            center + Point::new(a.cos(), a.sin()) * radius
        })
        .collect()
}

/// Offset a polyline by `d` to its left (negative `d` offsets right) with
/// miter joins, so each offset edge stays parallel to its source edge.
pub fn offset_polyline(points: &[Point], d: f64, fallback_dir: Point) -> Vec<Point> {
    if points.len() < 2 {
        return points.iter().map(|&p| p + fallback_dir.normalized().perp() * d).collect();
    }
    let normals: Vec<Point> = points.windows(2).map(|w| (w[1] - w[0]).normalized().perp()).collect();
    let last = points.len() - 1;
    points
        .iter()
        .enumerate()
        .map(|(i, &p)| {
            if i == 0 {
                return p + normals[0] * d;
            }
            if i == last {
                return p + normals[last - 1] * d;
            }
            let miter = normals[i - 1] + normals[i];
            if miter.length() < EPS {
                return p + normals[i] * d;
            }
            let miter = miter.normalized();
            p + miter * (d / miter.dot(normals[i]))
        })
        .collect()
}

/// Which side of the travel direction P sits on, at each end.
pub fn detect_polarity(
    name: &str,
    p_ends: (Point, Point),
    n_ends: (Point, Point),
) -> Result<PolarityDecision> {
    let src_mid = p_ends.0.midpoint(n_ends.0);
    let tgt_mid = p_ends.1.midpoint(n_ends.1);
    let travel = (tgt_mid - src_mid).normalized();
    if travel.length() < EPS {
        return Err(RouterError::geometry(name, "source and target of the pair coincide"));
    }
    let side = |p: Point, mid: Point| {
        let c = travel.cross((p - mid).normalized());
        (c.abs() > 1e-6).then_some(c > 0.0)
    };
    let p_left_at_source = side(p_ends.0, src_mid)
        .ok_or_else(|| RouterError::geometry(name, "P and N are in line with the travel direction at the source"))?;
    let p_left_at_target = side(p_ends.1, tgt_mid)
        .ok_or_else(|| RouterError::geometry(name, "P and N are in line with the travel direction at the target"))?;
    Ok(PolarityDecision {
        p_left_at_source,
        p_left_at_target,
    })
}

/// Compile a net-name pattern: `*` matches any run of characters and
/// everything else is literal. The whole name must match.
pub fn name_pattern(pattern: &str) -> Result<Regex> {
    let body: Vec<String> = pattern.split('*').map(regex::escape).collect();
    Regex::new(&format!("^{}$", body.join(".*")))
        .map_err(|e| RouterError::config(format!("bad net pattern `{pattern}`: {e}")))
}

/// Match P/N net names. Nets matching any pattern and ending in a P suffix
/// are paired with the net carrying the matching N suffix.
pub fn pair_nets(names: &[String], patterns: &[String]) -> Result<Vec<(String, String)>> {
    const SUFFIXES: [(&str, &str); 4] = [("_P", "_N"), ("_p", "_n"), ("+", "-"), ("P", "N")];
    let patterns = patterns.iter().map(|p| name_pattern(p)).collect::<Result<Vec<_>>>()?;
    let mut pairs = Vec::new();
    for name in names {
        if !patterns.iter().any(|re| re.is_match(name)) {
            continue;
        }
        for (ps, ns) in SUFFIXES {
            if let Some(base) = name.strip_suffix(ps) {
                let partner = format!("{base}{ns}");
                if names.contains(&partner) {
                    pairs.push((name.clone(), partner));
                    break;
                }
            }
        }
    }
    Ok(pairs)
}

fn two_ends<'n>(pair: &str, net: &'n Net) -> Result<(&'n Endpoint, &'n Endpoint)> {
    match net.endpoints.as_slice() {
        [a, b] => Ok((a, b)),
        eps => Err(RouterError::geometry(
            pair,
            format!("net {} has {} endpoints, a pair conductor needs exactly 2", net.name, eps.len()),
        )),
    }
}

fn layers_of(endpoint: &Endpoint) -> Vec<u8> {
    let mut layers: Vec<u8> = endpoint.states.iter().map(|s| s.layer).collect();
    layers.sort_unstable();
    layers.dedup();
    layers
}

pub struct DiffPairRouter<'a> {
    config: &'a RouterConfig,
}

impl<'a> DiffPairRouter<'a> {
    pub fn new(config: &'a RouterConfig) -> Self {
        Self { config }
    }

    pub fn determine_spacing(
        &self,
        name: &str,
        p_ends: (Point, Point),
        n_ends: (Point, Point),
    ) -> Result<SpacingDecision> {
        let source_spacing = p_ends.0.distance(n_ends.0);
        let target_spacing = p_ends.1.distance(n_ends.1);
        if source_spacing < EPS || target_spacing < EPS {
            return Err(RouterError::geometry(name, "P and N stubs overlap"));
        }
        let mismatch = (source_spacing - target_spacing).abs();
        if mismatch / source_spacing.max(target_spacing) > self.config.spacing_tolerance {
            return Err(RouterError::geometry(
                name,
                format!("stub spacing {source_spacing:.4} mm at source vs {target_spacing:.4} mm at target"),
            ));
        }
        let (spacing, discrepancy) = match self.config.diff_pair_gap {
            Some(gap) => {
                let spacing = self.config.track_width + gap;
                let off = (spacing - source_spacing).abs() > 1e-6 || (spacing - target_spacing).abs() > 1e-6;
                (spacing, off)
            }
            None => (source_spacing, mismatch > 1e-6),
        };
        if discrepancy {
            warn!(
                "{name}: stub spacing {source_spacing:.4}/{target_spacing:.4} mm, routing at {spacing:.4} mm"
            );
        }
        Ok(SpacingDecision {
            spacing,
            source_spacing,
            target_spacing,
            discrepancy,
        })
    }

    pub fn plan(&self, pair: &DifferentialPair) -> Result<PairPlan> {
        let (p_src, p_tgt) = two_ends(&pair.name, &pair.p)?;
        let (n_a, n_b) = two_ends(&pair.name, &pair.n)?;
        let (n_src, n_tgt) = if n_a.position.distance(p_src.position) <= n_b.position.distance(p_src.position) {
            (n_a, n_b)
        } else {
            (n_b, n_a)
        };
        let p_ends = (p_src.position, p_tgt.position);
        let n_ends = (n_src.position, n_tgt.position);

        let spacing = self.determine_spacing(&pair.name, p_ends, n_ends)?;
        let polarity = detect_polarity(&pair.name, p_ends, n_ends)?;
        if polarity.swap_required() && self.config.num_layers() < 2 {
            return Err(RouterError::geometry(
                &pair.name,
                "polarity swap required but there is no other layer to change to",
            ));
        }
        debug!(
            "{}: spacing {:.4} mm, P left at source {}, swap {}",
            pair.name,
            spacing.spacing,
            polarity.p_left_at_source,
            polarity.swap_required()
        );

        Ok(PairPlan {
            name: pair.name.clone(),
            spacing,
            polarity,
            sources: self.center_states(&pair.name, p_src, n_src)?,
            targets: self.center_states(&pair.name, p_tgt, n_tgt)?,
            p_ends,
            n_ends,
        })
    }

    fn center_states(&self, name: &str, p: &Endpoint, n: &Endpoint) -> Result<Vec<GridState>> {
        let n_layers = layers_of(n);
        let shared: Vec<u8> = layers_of(p).into_iter().filter(|l| n_layers.contains(l)).collect();
        if shared.is_empty() {
            return Err(RouterError::geometry(name, "P and N ends share no layer"));
        }
        Ok(Endpoint::new(self.config, p.position.midpoint(n.position), &shared).states)
    }

    /// Distance from the centerline to each via of a via pair.
    pub fn via_offset(&self, spacing: f64) -> f64 {
        (spacing / 2.0).max((self.config.via_size + self.config.clearance) / 2.0)
    }

    /// Plan and route a pair against an obstacle map already inflated for
    /// the pair: tracks by half the spacing, vias by `via_offset`.
    pub fn route(&self, obstacles: &GridObstacleMap, pair: &DifferentialPair) -> Result<RoutedPair> {
        let plan = self.plan(pair)?;
        self.route_planned(obstacles, pair, &plan)
    }

    pub fn route_planned(
        &self,
        obstacles: &GridObstacleMap,
        pair: &DifferentialPair,
        plan: &PairPlan,
    ) -> Result<RoutedPair> {
        let router = GridRouter::new(self.config.via_cost_units(), self.config.heuristic_weight)?.with_options(
            SearchOptions {
                collinear_vias: true,
                via_model: self.config.via_model,
            },
        );
        let (centerline, iterations) = self.search_centerline(&router, obstacles, plan)?;
        if plan.polarity.swap_required() && centerline.via_positions().is_empty() {
            return Err(RouterError::geometry(
                &plan.name,
                "polarity swap required but the centerline has no layer change",
            ));
        }
        let (p_track, n_track, via_pairs) = self.build_conductors(&centerline, plan);
        Ok(RoutedPair {
            name: plan.name.clone(),
            p_net: pair.p.name.clone(),
            n_net: pair.n.name.clone(),
            spacing: plan.spacing,
            polarity: plan.polarity,
            centerline,
            p_track,
            n_track,
            via_pairs,
            iterations,
        })
    }

    /// Like `route_planned`, but the centerline is searched from the target
    /// end. The result still runs from source to target.
    pub fn route_planned_reversed(
        &self,
        obstacles: &GridObstacleMap,
        pair: &DifferentialPair,
        plan: &PairPlan,
    ) -> Result<RoutedPair> {
        let mut routed = self.route_planned(obstacles, pair, &plan.reversed())?;
        routed.spacing = plan.spacing;
        routed.polarity = plan.polarity;
        routed.centerline = routed.centerline.reversed();
        for track in [&mut routed.p_track, &mut routed.n_track] {
            track.reverse();
            for c in track.iter_mut() {
                std::mem::swap(&mut c.segment.start, &mut c.segment.end);
            }
        }
        routed.via_pairs.reverse();
        for v in &mut routed.via_pairs {
            std::mem::swap(&mut v.from_layer, &mut v.to_layer);
        }
        Ok(routed)
    }

    fn search_centerline(
        &self,
        router: &GridRouter,
        obstacles: &GridObstacleMap,
        plan: &PairPlan,
    ) -> Result<(Path, u32)> {
        let max_iterations = self.config.max_iterations;
        if !plan.polarity.swap_required() {
            let outcome = router.route_multi(obstacles, &plan.sources, &plan.targets, max_iterations);
            let iterations = outcome.iterations();
            return outcome.into_path().map(|p| (p, iterations)).ok_or(RouterError::NoPathFound {
                net: plan.name.clone(),
                iterations,
            });
        }

        // A swap needs a layer change: aim for the target position on a layer
        // the route did not start on, then drop back to a real target layer.
        let source_layers: Vec<u8> = plan.sources.iter().map(|s| s.layer).collect();
        let target_xy = plan.targets[0].xy();
        let other_layer_targets: Vec<GridState> = (0..obstacles.num_layers() as u8)
            .filter(|l| !source_layers.contains(l))
            .map(|l| GridState::new(target_xy.0, target_xy.1, l))
            .collect();
        if other_layer_targets.is_empty() {
            return Err(RouterError::geometry(
                &plan.name,
                "polarity swap required but the pair starts on every layer",
            ));
        }
        let outcome = router.route_multi(obstacles, &plan.sources, &other_layer_targets, max_iterations);
        let iterations = outcome.iterations();
        let Some(mut path) = outcome.into_path() else {
            return Err(RouterError::NoPathFound {
                net: plan.name.clone(),
                iterations,
            });
        };
        let end = *path.states.last().unwrap_or(&plan.targets[0]);
        if !plan.targets.contains(&end) {
            if obstacles.is_via_blocked(end.gx, end.gy) {
                return Err(RouterError::NoPathFound {
                    net: plan.name.clone(),
                    iterations,
                });
            }
            path.states.push(plan.targets[0]);
            path.cost += router.via_cost();
        }
        Ok((path, iterations))
    }

    fn build_conductors(
        &self,
        centerline: &Path,
        plan: &PairPlan,
    ) -> (Vec<ConductorSegment>, Vec<ConductorSegment>, Vec<ViaPair>) {
        let cfg = self.config;
        let h = plan.spacing.spacing / 2.0;
        let half_pitch = self.via_offset(plan.spacing.spacing);

        let mut runs: Vec<(u8, Vec<Point>)> = Vec::new();
        for st in simplify_states(&centerline.states) {
            let p = cfg.grid_to_point(st.gx, st.gy);
            match runs.last_mut() {
                Some((layer, pts)) if *layer == st.layer => pts.push(p),
                _ => runs.push((st.layer, vec![p])),
            }
        }

        let mut tracks: [Vec<ConductorSegment>; 2] = [Vec::new(), Vec::new()];
        let mut via_pairs = Vec::new();
        let mut left_is_p = plan.polarity.p_left_at_source;
        let mut swapped = false;
        let mut pending = [
            (plan.p_ends.0, SegmentKind::Connector),
            (plan.n_ends.0, SegmentKind::Connector),
        ];
        let mut skip = 0usize;
        let (src, tgt) = (plan.sources[0], plan.targets[0]);
        let mut incoming = cfg.grid_to_point(tgt.gx, tgt.gy) - cfg.grid_to_point(src.gx, src.gy);
        let mut last_offsets: [Point; 2] = [plan.p_ends.0, plan.n_ends.0];

        for (i, (layer, pts)) in runs.iter().enumerate() {
            let layer = *layer;
            let first_dir = if pts.len() > 1 { pts[1] - pts[0] } else { incoming };
            let left = offset_polyline(pts, h, first_dir);
            let right = offset_polyline(pts, -h, first_dir);
            let offsets = if left_is_p { [left, right] } else { [right, left] };
            let k = skip.min(pts.len() - 1);

            for c in 0..2 {
                let (from, kind) = pending[c];
                push_segment(&mut tracks[c], from, offsets[c][k], layer, cfg.track_width, kind);
                for j in k..pts.len() - 1 {
                    push_segment(
                        &mut tracks[c],
                        offsets[c][j],
                        offsets[c][j + 1],
                        layer,
                        cfg.track_width,
                        SegmentKind::Body,
                    );
                }
                last_offsets[c] = offsets[c][pts.len() - 1];
            }

            let exit_dir = if pts.len() > 1 { pts[pts.len() - 1] - pts[pts.len() - 2] } else { incoming };
            incoming = exit_dir;

            let Some((next_layer, next_pts)) = runs.get(i + 1) else {
                break;
            };
            let c = pts[pts.len() - 1];
            let t = exit_dir.normalized();
            let n = t.perp();
            let left_via = c + n * half_pitch;
            let right_via = c - n * half_pitch;
            let vias = if left_is_p { [left_via, right_via] } else { [right_via, left_via] };
            for cdx in 0..2 {
                push_segment(&mut tracks[cdx], last_offsets[cdx], vias[cdx], layer, cfg.track_width, SegmentKind::Exit);
            }
            let swap_here = plan.polarity.swap_required() && !swapped;
            via_pairs.push(ViaPair {
                p: vias[0],
                n: vias[1],
                from_layer: layer,
                to_layer: *next_layer,
                polarity_swap: swap_here,
            });

            if !swap_here {
                pending = [(vias[0], SegmentKind::Exit), (vias[1], SegmentKind::Exit)];
                skip = 0;
                continue;
            }

            // The conductor on the left goes behind the right-hand via and
            // comes out on the right; the other one moves over to the left.
            let outer = if left_is_p { 0 } else { 1 };
            let inner = 1 - outer;
            let radius = (2.0 * half_pitch).max(cfg.via_size / 2.0 + cfg.clearance + cfg.track_width / 2.0);
            let start_angle = n.y.atan2(n.x);
            let mut crossover = vec![left_via];
            crossover.extend(arc_points(right_via, radius, start_angle, start_angle + PI));
            for w in crossover.windows(2) {
                push_segment(&mut tracks[outer], w[0], w[1], *next_layer, cfg.track_width, SegmentKind::Crossover);
            }
            let arc_end = crossover[crossover.len() - 1];

            // Spacing is restored one arc radius past the via, if the next run is long enough
            let reach = |p: Point| (p - c).dot(t);
            let (outer_from, inner_from) = if next_pts.len() > 1 && reach(next_pts[1]) > radius + EPS {
                let restore_outer = c + t * radius - n * h;
                let restore_inner = c + t * radius + n * h;
                push_segment(
                    &mut tracks[outer],
                    arc_end,
                    restore_outer,
                    *next_layer,
                    cfg.track_width,
                    SegmentKind::Crossover,
                );
                push_segment(
                    &mut tracks[inner],
                    right_via,
                    restore_inner,
                    *next_layer,
                    cfg.track_width,
                    SegmentKind::Crossover,
                );
                skip = 1;
                ((restore_outer, SegmentKind::Body), (restore_inner, SegmentKind::Body))
            } else {
                skip = next_pts.iter().take_while(|&&p| reach(p) <= radius + EPS).count();
                ((arc_end, SegmentKind::Crossover), (right_via, SegmentKind::Crossover))
            };
            pending[outer] = outer_from;
            pending[inner] = inner_from;
            left_is_p = !left_is_p;
            swapped = true;
        }

        let ends = [plan.p_ends.1, plan.n_ends.1];
        let last_layer = runs.last().map_or(0, |r| r.0);
        for c in 0..2 {
            push_segment(&mut tracks[c], last_offsets[c], ends[c], last_layer, cfg.track_width, SegmentKind::Connector);
        }

        let [p_track, n_track] = tracks;
        (p_track, n_track, via_pairs)
    }
}

fn push_segment(track: &mut Vec<ConductorSegment>, start: Point, end: Point, layer: u8, width: f64, kind: SegmentKind) {
    if start.distance(end) < EPS {
        return;
    }
    track.push(ConductorSegment {
        segment: Segment {
            start,
            end,
            layer,
            width,
        },
        kind,
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use float_eq::assert_float_eq;

    fn pt(x: f64, y: f64) -> Point {
        Point::new(x, y)
    }

    #[test]
    fn arc_covers_half_turn() {
        let arc = arc_points(pt(1.0, 0.0), 0.5, PI / 2.0, PI / 2.0 + PI);
        let first = arc[0];
        let last = arc[arc.len() - 1];
        assert_float_eq!(first.x, 1.0, abs <= 1e-9);
        assert_float_eq!(first.y, 0.5, abs <= 1e-9);
        assert_float_eq!(last.x, 1.0, abs <= 1e-9);
        assert_float_eq!(last.y, -0.5, abs <= 1e-9);
        for p in &arc {
            assert_float_eq!(p.distance(pt(1.0, 0.0)), 0.5, abs <= 1e-9);
            // counter-clockwise from the top goes through the left side
            assert!(p.x <= 1.0 + 1e-9);
        }
    }

    #[test]
    fn offset_edges_stay_parallel() {
        let line = [pt(0.0, 0.0), pt(2.0, 0.0), pt(3.0, 1.0)];
        let left = offset_polyline(&line, 0.2, pt(1.0, 0.0));
        assert_float_eq!(left[0].y, 0.2, abs <= 1e-9);
        assert_float_eq!(left[1].y, 0.2, abs <= 1e-9);
        for (src, off) in line.windows(2).zip(left.windows(2)) {
            let a = (src[1] - src[0]).normalized();
            let b = (off[1] - off[0]).normalized();
            assert_float_eq!(a.cross(b), 0.0, abs <= 1e-9);
            assert_float_eq!(point_distance_to_line(off[0], src[0], src[1]), 0.2, abs <= 1e-9);
        }
        let right = offset_polyline(&line, -0.2, pt(1.0, 0.0));
        assert_float_eq!(right[0].y, -0.2, abs <= 1e-9);
        assert_float_eq!(left[2].distance(right[2]), 0.4, abs <= 1e-9);
    }

    fn point_distance_to_line(p: Point, a: Point, b: Point) -> f64 {
        (b - a).normalized().cross(p - a).abs()
    }

    #[test]
    fn spacing_from_stubs() {
        let config = RouterConfig::default();
        let router = DiffPairRouter::new(&config);
        let equal = router
            .determine_spacing("D", (pt(0.0, 0.2), pt(5.0, 0.2)), (pt(0.0, -0.2), pt(5.0, -0.2)))
            .unwrap();
        assert_float_eq!(equal.spacing, 0.4, abs <= 1e-9);
        assert!(!equal.discrepancy);

        let minor = router
            .determine_spacing("D", (pt(0.0, 0.2), pt(5.0, 0.22)), (pt(0.0, -0.2), pt(5.0, -0.2)))
            .unwrap();
        assert_float_eq!(minor.spacing, 0.4, abs <= 1e-9);
        assert!(minor.discrepancy);

        let major = router.determine_spacing("D", (pt(0.0, 0.2), pt(5.0, 1.0)), (pt(0.0, -0.2), pt(5.0, -0.2)));
        assert!(matches!(major, Err(RouterError::GeometryInconsistency { .. })));
    }

    #[test]
    fn configured_gap_wins() {
        let config = RouterConfig {
            diff_pair_gap: Some(0.15),
            ..RouterConfig::default()
        };
        let decision = DiffPairRouter::new(&config)
            .determine_spacing("D", (pt(0.0, 0.2), pt(5.0, 0.2)), (pt(0.0, -0.2), pt(5.0, -0.2)))
            .unwrap();
        assert_float_eq!(decision.spacing, 0.25, abs <= 1e-9);
        assert!(decision.discrepancy);
    }

    #[test]
    fn polarity_by_side_of_travel() {
        let same = detect_polarity("D", (pt(0.0, 0.2), pt(5.0, 0.2)), (pt(0.0, -0.2), pt(5.0, -0.2))).unwrap();
        assert!(same.p_left_at_source);
        assert!(!same.swap_required());

        let crossed = detect_polarity("D", (pt(0.0, 0.2), pt(5.0, -0.2)), (pt(0.0, -0.2), pt(5.0, 0.2))).unwrap();
        assert!(crossed.p_left_at_source);
        assert!(!crossed.p_left_at_target);
        assert!(crossed.swap_required());

        let inline = detect_polarity("D", (pt(0.2, 0.0), pt(5.0, 0.2)), (pt(-0.2, 0.0), pt(5.0, -0.2)));
        assert!(inline.is_err());
    }

    #[test]
    fn reversed_plan_flips_sides() {
        let config = RouterConfig::default();
        let p = Net::new(
            "D_P",
            vec![Endpoint::new(&config, pt(1.0, 1.2), &[0]), Endpoint::new(&config, pt(5.0, 0.8), &[0])],
        );
        let n = Net::new(
            "D_N",
            vec![Endpoint::new(&config, pt(1.0, 0.8), &[0]), Endpoint::new(&config, pt(5.0, 1.2), &[0])],
        );
        let pair = DifferentialPair { name: "D".into(), p, n };
        let plan = DiffPairRouter::new(&config).plan(&pair).unwrap();
        let back = plan.reversed();
        assert_eq!(back.sources, plan.targets);
        assert_eq!(back.p_ends, (pt(5.0, 0.8), pt(1.0, 1.2)));
        // P is right of travel at the target going forward, so left going back
        assert!(!plan.polarity.p_left_at_target);
        assert!(back.polarity.p_left_at_source);
        assert_eq!(back.polarity.swap_required(), plan.polarity.swap_required());
        assert_eq!(back.reversed(), plan);
    }

    #[test]
    fn via_offset_never_below_via_pitch() {
        let config = RouterConfig::default();
        let router = DiffPairRouter::new(&config);
        assert_float_eq!(router.via_offset(0.2), 0.2, abs <= 1e-9);
        assert_float_eq!(router.via_offset(0.6), 0.3, abs <= 1e-9);
    }

    #[test]
    fn pairs_by_suffix_and_pattern() {
        let names: Vec<String> = ["USB_D_P", "USB_D_N", "LVDS0+", "LVDS0-", "CLK_P", "GND"]
            .into_iter()
            .map(String::from)
            .collect();
        let pairs = pair_nets(&names, &["USB*".to_string(), "LVDS*".to_string()]).unwrap();
        assert_eq!(
            pairs,
            vec![
                ("USB_D_P".to_string(), "USB_D_N".to_string()),
                ("LVDS0+".to_string(), "LVDS0-".to_string()),
            ]
        );
        assert!(pair_nets(&names, &[]).unwrap().is_empty());
    }

    #[test]
    fn name_patterns() {
        let matches = |pat: &str, name: &str| name_pattern(pat).unwrap().is_match(name);
        assert!(matches("*", "anything"));
        assert!(matches("DDR_*_P", "DDR_DQS0_P"));
        assert!(matches("*CLK*", "SYS_CLK_N"));
        assert!(!matches("DDR_*_P", "DDR_DQS0_N"));
        assert!(!matches("USB", "USB_D_P"));
        assert!(matches("", ""));
        // regex metacharacters in net names stay literal
        assert!(matches("LVDS0+", "LVDS0+"));
        assert!(!matches("LVDS0+", "LVDS00"));
        assert!(matches("/CPU/D[0]*", "/CPU/D[0]_P"));
        assert!(!matches("A.B*", "AxB_P"));
    }
}
