use crate::game::constants::SNAPSHOT_SEGMENT_STRIDE;
use crate::game::types::{Food, GameConfig, GameStatus, Point, Snake, Submission};
use crate::game::world::World;
use serde::Serialize;
use std::collections::HashMap;

/// One frame on the spectator channel. Everything the viewer sees goes
/// through here so the on-the-wire shape stays in one place.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", content = "data")]
pub enum ServerEvent {
    #[serde(rename = "game:tick")]
    Tick(TickSnapshot),
    #[serde(rename = "game:started")]
    Started,
    #[serde(rename = "game:paused")]
    Paused,
    #[serde(rename = "game:reset")]
    Reset,
    #[serde(rename = "game:finished")]
    Finished {
        #[serde(rename = "winnerId")]
        winner_id: Option<String>,
        #[serde(rename = "winnerName")]
        winner_name: Option<String>,
    },
    #[serde(rename = "snake:registered")]
    SnakeRegistered { name: String, color: String },
    #[serde(rename = "snake:respawned")]
    SnakeRespawned { name: String },
    #[serde(rename = "snake:died")]
    SnakeDied { name: String, reason: String },
}

impl ServerEvent {
    pub fn to_message(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }
}

/// Reduced per-tick view. Rounding here is a bandwidth decision only;
/// authoritative state keeps full precision.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TickSnapshot {
    pub tick: u64,
    pub status: GameStatus,
    pub arena_radius: f64,
    pub spectator_count: usize,
    pub snakes: Vec<SnakeSnapshot>,
    pub food: Vec<FoodSnapshot>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SnakeSnapshot {
    pub id: String,
    pub name: String,
    pub color: String,
    pub alive: bool,
    pub x: f64,
    pub y: f64,
    pub angle: f64,
    pub speed: f64,
    pub segments: Vec<[f64; 2]>,
    pub length: usize,
    pub best_length: usize,
    pub kills: u32,
    pub total_kills: u32,
    pub deaths: u32,
    pub death_reason: Option<String>,
    pub last_ai_error: Option<String>,
    pub submission_count: usize,
    pub last_submission_lines: Option<usize>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FoodSnapshot {
    pub x: f64,
    pub y: f64,
    pub value: i64,
}

fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Every third segment center plus the first and last, rounded to 0.1.
fn sampled_segments(segments: &[Point]) -> Vec<[f64; 2]> {
    let mut out = Vec::new();
    let last = match segments.len() {
        0 => return out,
        len => len - 1,
    };
    for (index, segment) in segments.iter().enumerate() {
        if index % SNAPSHOT_SEGMENT_STRIDE == 0 || index == last {
            out.push([round1(segment.x), round1(segment.y)]);
        }
    }
    out
}

/// Builds the spectator snapshot from the authoritative state and the tick's
/// segment cache, the same geometry collision just used.
pub fn tick_snapshot(
    world: &World,
    segment_cache: &HashMap<String, Vec<Point>>,
    spectator_count: usize,
) -> TickSnapshot {
    let mut snakes: Vec<SnakeSnapshot> = world
        .snakes
        .values()
        .map(|snake| {
            let segments = segment_cache
                .get(&snake.id)
                .map(|segments| sampled_segments(segments))
                .unwrap_or_default();
            SnakeSnapshot {
                id: snake.id.clone(),
                name: snake.name.clone(),
                color: snake.color.clone(),
                alive: snake.alive,
                x: round1(snake.x),
                y: round1(snake.y),
                angle: round2(snake.angle),
                speed: snake.speed,
                segments,
                length: snake.segment_count,
                best_length: snake.best_length,
                kills: snake.kills,
                total_kills: snake.total_kills,
                deaths: snake.deaths,
                death_reason: snake.death_reason.clone(),
                last_ai_error: snake.last_ai_error.clone(),
                submission_count: snake.submissions.len(),
                last_submission_lines: snake
                    .submissions
                    .last()
                    .map(|submission| submission.line_count),
            }
        })
        .collect();
    snakes.sort_by(|a, b| a.name.cmp(&b.name));

    TickSnapshot {
        tick: world.tick,
        status: world.status,
        arena_radius: world.config.arena_radius,
        spectator_count,
        snakes,
        food: world
            .food
            .iter()
            .map(|food| FoodSnapshot {
                x: round1(food.x),
                y: round1(food.y),
                value: food.value,
            })
            .collect(),
    }
}

/// Full-precision authoritative state for `GET /api/state`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DebugState {
    pub tick: u64,
    pub status: GameStatus,
    pub winner_id: Option<String>,
    pub config: GameConfig,
    pub snakes: Vec<DebugSnake>,
    pub food: Vec<Food>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DebugSnake {
    pub id: String,
    pub name: String,
    pub color: String,
    pub x: f64,
    pub y: f64,
    pub angle: f64,
    pub speed: f64,
    pub segment_count: usize,
    pub trail_points: usize,
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

pub fn debug_state(world: &World) -> DebugState {
    let mut snakes: Vec<DebugSnake> = world.snakes.values().map(debug_snake).collect();
    snakes.sort_by(|a, b| a.name.cmp(&b.name));
    DebugState {
        tick: world.tick,
        status: world.status,
        winner_id: world.winner_id.clone(),
        config: world.config.clone(),
        snakes,
        food: world.food.clone(),
    }
}

fn debug_snake(snake: &Snake) -> DebugSnake {
    DebugSnake {
        id: snake.id.clone(),
        name: snake.name.clone(),
        color: snake.color.clone(),
        x: snake.x,
        y: snake.y,
        angle: snake.angle,
        speed: snake.speed,
        segment_count: snake.segment_count,
        trail_points: snake.trail.len(),
        alive: snake.alive,
        died_at: snake.died_at,
        death_reason: snake.death_reason.clone(),
        respawn_at: snake.respawn_at,
        kills: snake.kills,
        total_kills: snake.total_kills,
        deaths: snake.deaths,
        best_length: snake.best_length,
        submissions: snake.submissions.clone(),
        ai_function: snake.ai_function.clone(),
        last_ai_error: snake.last_ai_error.clone(),
    }
}

/// Machine-readable description of the `move(state)` contract, served at
/// `GET /api/docs/ai-contract`.
pub fn ai_contract_doc() -> serde_json::Value {
    serde_json::json!({
        "entryPoint": "move(state)",
        "language": "lua",
        "maxSourceChars": 10_000,
        "timeoutMs": "config.aiTimeoutMs (default 50)",
        "state": {
            "you": { "id": "string", "x": "number", "y": "number", "angle": "radians",
                     "speed": "units/tick", "segments": "[{x, y}]", "length": "integer" },
            "arena": { "radius": "number" },
            "snakes": "[{id, name, x, y, angle, segments, length, alive}]",
            "food": "[{x, y, value}]",
            "tick": "integer"
        },
        "returnValue": [
            "number: absolute target angle in radians",
            "{x, y}: a target point, converted to an angle from your head",
            "anything else: no steering, lastAiError = 'Invalid return'"
        ],
        "helpers": {
            "angleTo(x1, y1, x2, y2)": "angle in radians from (x1, y1) to (x2, y2)",
            "distTo(x1, y1, x2, y2)": "euclidean distance",
            "distFromCenter(x, y)": "distance from the arena center"
        },
        "notes": [
            "Steering is rate-limited to config.maxTurnRate radians per tick.",
            "State is a copy; mutating it has no effect on the game.",
            "Exceeding the timeout forfeits steering for the tick."
        ]
    })
}
