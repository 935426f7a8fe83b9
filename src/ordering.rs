//! Net ordering heuristics.
//!
//! All functions are pure: they take net endpoint positions and return
//! indices into the input slice in the order the nets should be attempted.

use log::debug;
use std::f64::consts::TAU;

use crate::config::OrderingStrategy;
use crate::geometry::{Point, Rect};

/// What the orderers need to know about a net.
#[derive(Clone, Debug, PartialEq)]
pub struct NetPlacement {
    pub name: String,
    /// Centroid of each endpoint (pad or stub end).
    pub endpoints: Vec<Point>,
}

impl NetPlacement {
    pub fn new(name: impl Into<String>, endpoints: Vec<Point>) -> Self {
        Self {
            name: name.into(),
            endpoints,
        }
    }
}

/// Ordering produced by the maximum planar subset heuristic.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MpsOrdering {
    pub order: Vec<usize>,
    /// Conflict-free batches, in the order they were extracted.
    pub rounds: Vec<Vec<usize>>,
}

impl MpsOrdering {
    pub fn round_of(&self, net: usize) -> Option<usize> {
        self.rounds.iter().position(|r| r.contains(&net))
    }
}

pub fn order_nets(strategy: OrderingStrategy, nets: &[NetPlacement], footprints: &[Rect]) -> Vec<usize> {
    match strategy {
        OrderingStrategy::Original => original(nets),
        OrderingStrategy::InsideOut => inside_out(nets, footprints),
        OrderingStrategy::Mps => mps(nets).order,
    }
}

pub fn original(nets: &[NetPlacement]) -> Vec<usize> {
    (0..nets.len()).collect()
}

/// Nets escaping a dense footprint, innermost first, then everything else in caller order.
pub fn inside_out(nets: &[NetPlacement], footprints: &[Rect]) -> Vec<usize> {
    let mut inner: Vec<(usize, f64)> = Vec::new();
    let mut rest = Vec::new();
    for (i, net) in nets.iter().enumerate() {
        let hit = footprints.iter().find_map(|fp| {
            let inside: Vec<Point> = net.endpoints.iter().copied().filter(|p| fp.contains(*p)).collect();
            Point::centroid(&inside).map(|c| c.distance(fp.center()))
        });
        match hit {
            Some(distance) => inner.push((i, distance)),
            None => rest.push(i),
        }
    }
    inner.sort_by(|a, b| a.1.total_cmp(&b.1));
    inner.into_iter().map(|(i, _)| i).chain(rest).collect()
}

/// Maximum planar subset ordering around the centroid of all endpoints.
pub fn mps(nets: &[NetPlacement]) -> MpsOrdering {
    let all: Vec<Point> = nets.iter().flat_map(|n| n.endpoints.iter().copied()).collect();
    let center = Point::centroid(&all).unwrap_or_default();
    mps_around(nets, center)
}

/// Maximum planar subset ordering with the projection circle centered at `center`.
///
/// Each net becomes a chord between the angles of its first and last endpoint.
/// Two chords conflict when their endpoints interleave on the circle. Rounds
/// are extracted greedily, taking nets with the fewest remaining conflicts first.
pub fn mps_around(nets: &[NetPlacement], center: Point) -> MpsOrdering {
    let chords: Vec<Option<(f64, f64)>> = nets.iter().map(|n| chord(n, center)).collect();
    let n = nets.len();
    let mut conflicts = vec![Vec::new(); n];
    for a in 0..n {
        for b in a + 1..n {
            if let (Some(ca), Some(cb)) = (chords[a], chords[b]) {
                if interleaved(ca, cb) {
                    conflicts[a].push(b);
                    conflicts[b].push(a);
                }
            }
        }
    }

    let mut remaining = vec![true; n];
    let mut left = n;
    let mut result = MpsOrdering::default();
    while left > 0 {
        let mut candidates: Vec<(usize, usize)> = (0..n)
            .filter(|&i| remaining[i])
            .map(|i| (conflicts[i].iter().filter(|&&j| remaining[j]).count(), i))
            .collect();
        candidates.sort_unstable();

        let mut round: Vec<usize> = Vec::new();
        for (_, i) in candidates {
            if round.iter().all(|r| !conflicts[i].contains(r)) {
                round.push(i);
            }
        }
        for &i in &round {
            remaining[i] = false;
        }
        left -= round.len();
        debug!("mps round {}: {} nets", result.rounds.len(), round.len());
        result.order.extend(&round);
        result.rounds.push(round);
    }
    result
}

fn chord(net: &NetPlacement, center: Point) -> Option<(f64, f64)> {
    if net.endpoints.len() < 2 {
        return None;
    }
    let angle = |p: Point| {
        let d = p - center;
        d.y.atan2(d.x).rem_euclid(TAU)
    };
    let a = angle(net.endpoints[0]);
    let b = angle(net.endpoints[net.endpoints.len() - 1]);
    Some((a.min(b), a.max(b)))
}

/// Exactly one end of `b` lies strictly inside the arc spanned by `a`.
fn interleaved(a: (f64, f64), b: (f64, f64)) -> bool {
    let inside = |t: f64| t > a.0 && t < a.1;
    inside(b.0) != inside(b.1) && b.0 != a.0 && b.0 != a.1 && b.1 != a.0 && b.1 != a.1
}

#[cfg(test)]
mod tests {
    use super::*;

    fn on_circle(deg: f64) -> Point {
        let r = deg.to_radians();
        Point::new(r.cos() * 10.0, r.sin() * 10.0)
    }

    fn chord_net(name: &str, a: f64, b: f64) -> NetPlacement {
        NetPlacement::new(name, vec![on_circle(a), on_circle(b)])
    }

    #[test]
    fn nested_nets_share_a_round() {
        let nets = vec![chord_net("outer", 10.0, 100.0), chord_net("inner", 30.0, 60.0)];
        let ordering = mps_around(&nets, Point::default());
        assert_eq!(ordering.rounds.len(), 1);
        assert_eq!(ordering.round_of(0), ordering.round_of(1));
    }

    #[test]
    fn interleaved_nets_split_rounds() {
        let nets = vec![
            NetPlacement::new("a", vec![Point::new(1.0, 0.0), Point::new(-1.0, 0.0)]),
            NetPlacement::new("b", vec![Point::new(0.0, 1.0), Point::new(0.0, -1.0)]),
        ];
        let ordering = mps(&nets);
        assert_eq!(ordering.rounds.len(), 2);
        assert_ne!(ordering.round_of(0), ordering.round_of(1));
        assert_eq!(ordering.order, vec![0, 1]);
    }

    #[test]
    fn fewest_conflicts_go_first() {
        // "hub" crosses both others, which nest inside each other
        let nets = vec![
            chord_net("hub", 0.0, 180.0),
            chord_net("left", 90.0, 270.0),
            chord_net("right", 100.0, 260.0),
        ];
        let ordering = mps_around(&nets, Point::default());
        assert_eq!(ordering.rounds, vec![vec![1, 2], vec![0]]);
        assert_eq!(ordering.order, vec![1, 2, 0]);
    }

    #[test]
    fn single_endpoint_nets_never_conflict() {
        let nets = vec![
            NetPlacement::new("solo", vec![Point::new(1.0, 1.0)]),
            chord_net("a", 0.0, 180.0),
            chord_net("b", 90.0, 270.0),
        ];
        let ordering = mps_around(&nets, Point::default());
        assert_eq!(ordering.round_of(0), Some(0));
    }

    #[test]
    fn inside_out_sorts_by_distance_from_center() {
        let bga = Rect::new(Point::new(0.0, 0.0), Point::new(10.0, 10.0));
        let nets = vec![
            NetPlacement::new("far_away", vec![Point::new(50.0, 50.0), Point::new(60.0, 50.0)]),
            NetPlacement::new("edge", vec![Point::new(9.5, 5.0), Point::new(30.0, 5.0)]),
            NetPlacement::new("center", vec![Point::new(5.0, 5.5), Point::new(30.0, 6.0)]),
            NetPlacement::new("other", vec![Point::new(-20.0, 0.0), Point::new(-30.0, 0.0)]),
            NetPlacement::new("mid", vec![Point::new(7.0, 5.0), Point::new(30.0, 7.0)]),
        ];
        assert_eq!(inside_out(&nets, &[bga]), vec![2, 4, 1, 0, 3]);
        assert_eq!(order_nets(OrderingStrategy::Original, &nets, &[bga]), vec![0, 1, 2, 3, 4]);
    }
}
