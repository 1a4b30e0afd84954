use serde::{Deserialize, Serialize};

use super::constants::{
    DEFAULT_AI_TIMEOUT_MS, DEFAULT_ARENA_RADIUS, DEFAULT_FOOD_RADIUS, DEFAULT_MAX_FOOD,
    DEFAULT_MAX_TURN_RATE, DEFAULT_MIN_FOOD, DEFAULT_RESPAWN_DELAY_MS, DEFAULT_SEGMENT_SPACING,
    DEFAULT_SNAKE_RADIUS, DEFAULT_SNAKE_SPEED, DEFAULT_STARTING_SEGMENTS, DEFAULT_TICK_RATE_MS,
};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Submission {
    pub tick: u64,
    pub line_count: usize,
    pub wall_clock_ms: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Food {
    pub x: f64,
    pub y: f64,
    pub value: i64,
    pub radius: f64,
}

/// One registered participant. The trail is the ordered history of head
/// positions, newest first; visible body segments are reconstructed from it
/// each tick.
#[derive(Debug, Clone)]
pub struct Snake {
    pub id: String,
    pub name: String,
    pub color: String,
    pub x: f64,
    pub y: f64,
    pub angle: f64,
    pub speed: f64,
    pub trail: Vec<Point>,
    pub segment_count: usize,
    pub alive: bool,
    pub died_at: Option<u64>,
    pub death_reason: Option<String>,
    pub respawn_at: Option<u64>,
    pub kills: u32,
    pub total_kills: u32,
    pub deaths: u32,
    pub best_length: usize,
    pub submissions: Vec<Submission>,
    pub ai_function: String,
    pub last_ai_error: Option<String>,
}

impl Snake {
    pub fn head(&self) -> Point {
        Point {
            x: self.x,
            y: self.y,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GameStatus {
    Waiting,
    Running,
    Paused,
    Finished,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameConfig {
    pub arena_radius: f64,
    pub tick_rate_ms: u64,
    pub snake_speed: f64,
    pub snake_radius: f64,
    pub segment_spacing: f64,
    pub max_turn_rate: f64,
    pub starting_segments: usize,
    pub food_radius: f64,
    pub min_food: usize,
    pub max_food: usize,
    pub respawn_on_death: bool,
    pub respawn_delay_ms: u64,
    pub ai_timeout_ms: u64,
}

impl Default for GameConfig {
    fn default() -> Self {
        Self {
            arena_radius: DEFAULT_ARENA_RADIUS,
            tick_rate_ms: DEFAULT_TICK_RATE_MS,
            snake_speed: DEFAULT_SNAKE_SPEED,
            snake_radius: DEFAULT_SNAKE_RADIUS,
            segment_spacing: DEFAULT_SEGMENT_SPACING,
            max_turn_rate: DEFAULT_MAX_TURN_RATE,
            starting_segments: DEFAULT_STARTING_SEGMENTS,
            food_radius: DEFAULT_FOOD_RADIUS,
            min_food: DEFAULT_MIN_FOOD,
            max_food: DEFAULT_MAX_FOOD,
            respawn_on_death: true,
            respawn_delay_ms: DEFAULT_RESPAWN_DELAY_MS,
            ai_timeout_ms: DEFAULT_AI_TIMEOUT_MS,
        }
    }
}

impl GameConfig {
    /// Ticks between death and respawn, rounded up so a partial tick still
    /// delays the full configured time.
    pub fn respawn_delay_ticks(&self) -> u64 {
        self.respawn_delay_ms.div_ceil(self.tick_rate_ms.max(1))
    }
}
