use super::math::dist;
use super::types::Point;
use rand::Rng;
use std::f64::consts::{FRAC_PI_4, TAU};

/// Reconstructs up to `segment_count` visible segment centers by walking the
/// trail polyline from the head and emitting a point every `spacing` units of
/// arc length, linearly interpolating between trail vertices.
pub fn segment_positions(trail: &[Point], segment_count: usize, spacing: f64) -> Vec<Point> {
    let Some(head) = trail.first() else {
        return Vec::new();
    };
    let mut segments = Vec::with_capacity(segment_count);
    if segment_count == 0 {
        return segments;
    }
    segments.push(*head);

    let mut walked = 0.0;
    let mut next_at = spacing;
    for window in trail.windows(2) {
        if segments.len() >= segment_count {
            break;
        }
        let (from, to) = (window[0], window[1]);
        let edge = dist(from.x, from.y, to.x, to.y);
        if edge <= f64::EPSILON {
            continue;
        }
        while walked + edge >= next_at && segments.len() < segment_count {
            let t = (next_at - walked) / edge;
            segments.push(Point {
                x: from.x + (to.x - from.x) * t,
                y: from.y + (to.y - from.y) * t,
            });
            next_at += spacing;
        }
        walked += edge;
    }
    segments
}

/// Drops trail vertices past `max_arc` units of accumulated arc length. The
/// vertex that crosses the budget is kept so interpolation spans the full
/// budget.
pub fn prune_trail(trail: &mut Vec<Point>, max_arc: f64) {
    let mut walked = 0.0;
    for index in 1..trail.len() {
        walked += dist(
            trail[index - 1].x,
            trail[index - 1].y,
            trail[index].x,
            trail[index].y,
        );
        if walked >= max_arc {
            trail.truncate(index + 1);
            return;
        }
    }
}

/// Polar spawn sample: radius uniform in `[0.5R, 0.8R]`, heading pointed back
/// at the center perturbed by up to a quarter turn either way.
pub fn spawn_position(arena_radius: f64) -> (Point, f64) {
    let mut rng = rand::thread_rng();
    let theta = rng.gen::<f64>() * TAU;
    let radius = arena_radius * (0.5 + rng.gen::<f64>() * 0.3);
    let x = theta.cos() * radius;
    let y = theta.sin() * radius;
    let heading = (-y).atan2(-x) + (rng.gen::<f64>() * 2.0 - 1.0) * FRAC_PI_4;
    (Point { x, y }, heading)
}

/// Uniform-over-disk food sample, pulled in to 95% of the arena radius so
/// food never spawns flush against the boundary.
pub fn food_spawn_position(arena_radius: f64) -> Point {
    let mut rng = rand::thread_rng();
    let theta = rng.gen::<f64>() * TAU;
    let radius = arena_radius * rng.gen::<f64>().sqrt() * 0.95;
    Point {
        x: theta.cos() * radius,
        y: theta.sin() * radius,
    }
}
