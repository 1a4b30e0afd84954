use super::geometry::spawn_position;
use super::math::normalize_angle;
use super::types::{GameConfig, Point, Snake};
use std::f64::consts::PI;

/// Fresh snake shell with no life state. Identity fields are one-shot: id and
/// color are never reassigned after this.
pub fn new_snake(id: String, name: String, color: String, ai_function: String) -> Snake {
    Snake {
        id,
        name,
        color,
        x: 0.0,
        y: 0.0,
        angle: 0.0,
        speed: 0.0,
        trail: Vec::new(),
        segment_count: 0,
        alive: false,
        died_at: None,
        death_reason: None,
        respawn_at: None,
        kills: 0,
        total_kills: 0,
        deaths: 0,
        best_length: 0,
        submissions: Vec::new(),
        ai_function,
        last_ai_error: None,
    }
}

/// Initial trail laid out behind the spawn heading: `starting_segments * 3`
/// points at half segment spacing, enough arc length to reconstruct the
/// starting body with slack.
pub fn build_spawn_trail(head: Point, heading: f64, config: &GameConfig) -> Vec<Point> {
    let count = (config.starting_segments * 3).max(2);
    let back = heading + PI;
    let step = config.segment_spacing / 2.0;
    (0..count)
        .map(|index| Point {
            x: head.x + back.cos() * step * index as f64,
            y: head.y + back.sin() * step * index as f64,
        })
        .collect()
}

/// Idempotent respawn: places the snake via polar sampling, rebuilds the
/// initial trail, and resets per-life state. Lifetime stats, submissions and
/// identity are untouched.
pub fn respawn(snake: &mut Snake, config: &GameConfig) {
    let (head, heading) = spawn_position(config.arena_radius);
    snake.x = head.x;
    snake.y = head.y;
    snake.angle = normalize_angle(heading);
    snake.speed = config.snake_speed;
    snake.trail = build_spawn_trail(head, snake.angle, config);
    snake.segment_count = config.starting_segments;
    snake.alive = true;
    snake.died_at = None;
    snake.death_reason = None;
    snake.respawn_at = None;
    snake.kills = 0;
    snake.last_ai_error = None;
    snake.best_length = snake.best_length.max(snake.segment_count);
}
