pub const DEFAULT_ARENA_RADIUS: f64 = 2000.0;
pub const DEFAULT_TICK_RATE_MS: u64 = 50;
pub const DEFAULT_SNAKE_SPEED: f64 = 4.0;
pub const DEFAULT_SNAKE_RADIUS: f64 = 12.0;
pub const DEFAULT_SEGMENT_SPACING: f64 = 20.0;
pub const DEFAULT_MAX_TURN_RATE: f64 = 0.25;
pub const DEFAULT_STARTING_SEGMENTS: usize = 10;
pub const DEFAULT_FOOD_RADIUS: f64 = 6.0;
pub const DEFAULT_MIN_FOOD: usize = 200;
pub const DEFAULT_MAX_FOOD: usize = 600;
pub const DEFAULT_RESPAWN_DELAY_MS: u64 = 3000;
pub const DEFAULT_AI_TIMEOUT_MS: u64 = 50;

pub const AI_POOL_SIZE: usize = 32;
pub const MAX_PROGRAM_CHARS: usize = 10_000;
pub const MAX_NAME_CHARS: usize = 20;

// Arc length kept in the trail beyond the visible body.
pub const TRAIL_SLACK_SEGMENTS: f64 = 2.0;

pub const FOOD_VALUE: i64 = 1;
pub const CORPSE_FOOD_VALUE: i64 = 3;
pub const CORPSE_FOOD_RADIUS_SCALE: f64 = 1.5;
pub const CORPSE_FOOD_JITTER: f64 = 5.0;
pub const CORPSE_FOOD_SEGMENT_FRACTION: f64 = 0.5;

pub const FOOD_PER_SNAKE: usize = 20;

pub const SAVE_INTERVAL_MS: u64 = 30_000;

pub const SNAPSHOT_SEGMENT_STRIDE: usize = 3;

pub const COLOR_POOL: [&str; 12] = [
    "#ff6b6b",
    "#ffd166",
    "#06d6a0",
    "#4dabf7",
    "#f06595",
    "#845ef7",
    "#20c997",
    "#fcc419",
    "#ff922b",
    "#74c0fc",
    "#63e6be",
    "#e599f7",
];
