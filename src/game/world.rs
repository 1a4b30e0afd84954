use super::constants::{
    COLOR_POOL, CORPSE_FOOD_JITTER, CORPSE_FOOD_RADIUS_SCALE, CORPSE_FOOD_SEGMENT_FRACTION,
    CORPSE_FOOD_VALUE, FOOD_PER_SNAKE, FOOD_VALUE,
};
use super::geometry::food_spawn_position;
use super::math::dist_sq;
use super::snake::{new_snake, respawn};
use super::types::{Food, GameConfig, GameStatus, Point, Snake, Submission};
use rand::Rng;
use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

/// The authoritative arena state. The tick scheduler is the only mutator;
/// everything else sees snapshots.
#[derive(Debug)]
pub struct World {
    pub snakes: HashMap<String, Snake>,
    pub food: Vec<Food>,
    pub tick: u64,
    pub status: GameStatus,
    pub config: GameConfig,
    pub winner_id: Option<String>,
    color_cursor: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterKind {
    Created,
    Updated,
}

pub fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

impl World {
    pub fn new(config: GameConfig) -> Self {
        Self {
            snakes: HashMap::new(),
            food: Vec::new(),
            tick: 0,
            status: GameStatus::Waiting,
            config,
            winner_id: None,
            color_cursor: 0,
        }
    }

    pub fn alive_count(&self) -> usize {
        self.snakes.values().filter(|snake| snake.alive).count()
    }

    fn next_color(&mut self) -> String {
        let color = COLOR_POOL[self.color_cursor % COLOR_POOL.len()].to_string();
        self.color_cursor += 1;
        color
    }

    fn record_submission(snake: &mut Snake, tick: u64) {
        snake.submissions.push(Submission {
            tick,
            line_count: snake.ai_function.lines().count(),
            wall_clock_ms: now_millis(),
        });
    }

    /// Creates a snake. When the name is already taken, the call is treated
    /// as a resubmission for that snake. Either way the snake is respawned
    /// with the new program active on the next tick.
    pub fn register(&mut self, name: &str, ai_function: String) -> (String, String, RegisterKind) {
        let config = self.config.clone();
        let tick = self.tick;
        if let Some(snake) = self.snakes.values_mut().find(|snake| snake.name == name) {
            snake.ai_function = ai_function;
            Self::record_submission(snake, tick);
            respawn(snake, &config);
            return (snake.id.clone(), snake.color.clone(), RegisterKind::Updated);
        }

        let id = Uuid::new_v4().to_string();
        let color = self.next_color();
        let mut snake = new_snake(id.clone(), name.to_string(), color.clone(), ai_function);
        Self::record_submission(&mut snake, self.tick);
        respawn(&mut snake, &self.config);
        self.snakes.insert(id.clone(), snake);
        (id, color, RegisterKind::Created)
    }

    /// Replaces a snake's program and respawns it immediately. Lifetime stats
    /// survive; per-life state does not.
    pub fn submit(&mut self, id: &str, ai_function: String) -> bool {
        let config = self.config.clone();
        let tick = self.tick;
        let Some(snake) = self.snakes.get_mut(id) else {
            return false;
        };
        snake.ai_function = ai_function;
        Self::record_submission(snake, tick);
        respawn(snake, &config);
        true
    }

    pub fn remove(&mut self, id: &str) -> bool {
        self.snakes.remove(id).is_some()
    }

    /// Takes ownership of a snake rebuilt from a persisted record; advances
    /// the palette cursor so later registrations keep rotating colors.
    pub fn adopt_snake(&mut self, snake: Snake) {
        self.color_cursor += 1;
        self.snakes.insert(snake.id.clone(), snake);
    }

    /// Back to a clean waiting arena: registrations survive, per-life state
    /// and food do not.
    pub fn reset(&mut self) {
        self.tick = 0;
        self.status = GameStatus::Waiting;
        self.winner_id = None;
        self.food.clear();
        let config = self.config.clone();
        for snake in self.snakes.values_mut() {
            respawn(snake, &config);
        }
    }

    /// Head-in-disk food consumption. Eaten food is removed in one stable
    /// rebuild at the end so every head this tick saw the same food list.
    pub fn eat_food(&mut self) {
        if self.food.is_empty() {
            return;
        }
        let mut eaten = vec![false; self.food.len()];
        for snake in self.snakes.values_mut() {
            if !snake.alive {
                continue;
            }
            for (index, food) in self.food.iter().enumerate() {
                if eaten[index] {
                    continue;
                }
                let eat_radius = self.config.snake_radius + food.radius;
                if dist_sq(snake.x, snake.y, food.x, food.y) < eat_radius * eat_radius {
                    eaten[index] = true;
                    snake.segment_count =
                        (snake.segment_count as i64 + food.value).max(0) as usize;
                    snake.best_length = snake.best_length.max(snake.segment_count);
                }
            }
        }
        let mut index = 0;
        self.food.retain(|_| {
            let keep = !eaten[index];
            index += 1;
            keep
        });
    }

    /// Converts a dead snake's cached visible segments into corpse food:
    /// half as many tiles as segments, spread evenly along the body and
    /// jittered, never past the hard food cap.
    pub fn spawn_corpse_food(&mut self, segments: &[Point]) {
        if segments.is_empty() {
            return;
        }
        let count = (segments.len() as f64 * CORPSE_FOOD_SEGMENT_FRACTION).floor() as usize;
        if count == 0 {
            return;
        }
        let mut rng = rand::thread_rng();
        for index in 0..count {
            if self.food.len() >= self.config.max_food {
                break;
            }
            let segment_index =
                ((index as f64 / count as f64) * segments.len() as f64).floor() as usize;
            let segment = segments[segment_index.min(segments.len() - 1)];
            self.food.push(Food {
                x: segment.x + rng.gen_range(-CORPSE_FOOD_JITTER..=CORPSE_FOOD_JITTER),
                y: segment.y + rng.gen_range(-CORPSE_FOOD_JITTER..=CORPSE_FOOD_JITTER),
                value: CORPSE_FOOD_VALUE,
                radius: self.config.food_radius * CORPSE_FOOD_RADIUS_SCALE,
            });
        }
    }

    pub fn food_floor(&self) -> usize {
        (self.config.min_food + FOOD_PER_SNAKE * self.snakes.len()).min(self.config.max_food)
    }

    /// Tops the food list up to the floor with uniformly sampled tiles. The
    /// cap wins over the floor: oldest tiles are dropped first if the list is
    /// ever over it.
    pub fn top_up_food(&mut self) {
        if self.food.len() > self.config.max_food {
            let excess = self.food.len() - self.config.max_food;
            self.food.drain(0..excess);
        }
        let target = self.food_floor();
        while self.food.len() < target {
            let position = food_spawn_position(self.config.arena_radius);
            self.food.push(Food {
                x: position.x,
                y: position.y,
                value: FOOD_VALUE,
                radius: self.config.food_radius,
            });
        }
    }
}
