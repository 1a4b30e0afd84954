use super::constants::{
    AI_POOL_SIZE, DEFAULT_TICK_RATE_MS, SAVE_INTERVAL_MS, TRAIL_SLACK_SEGMENTS,
};
use super::geometry::{prune_trail, segment_positions};
use super::math::{dist_sq, is_in_bounds, normalize_angle, turn_toward};
use super::snake::respawn;
use super::types::{GameConfig, GameStatus, Point};
use super::world::{RegisterKind, World};
use crate::ai::{AiArena, AiFoodView, AiInput, AiPoint, AiPool, AiSelf, AiSnakeView};
use crate::persistence::{saved_state, Persistence};
use crate::protocol::{self, ServerEvent};
use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use uuid::Uuid;

#[cfg(test)]
mod tests;

/// Partial admin config update. Absent fields keep their current value;
/// present fields are range-checked before anything is applied.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigUpdate {
    pub tick_rate_ms: Option<u64>,
    pub arena_radius: Option<f64>,
    pub respawn_on_death: Option<bool>,
    pub respawn_delay_ms: Option<u64>,
    pub snake_speed: Option<f64>,
    pub max_turn_rate: Option<f64>,
}

impl ConfigUpdate {
    pub fn validate(&self) -> Result<(), String> {
        if let Some(tick_rate_ms) = self.tick_rate_ms {
            if !(20..=1000).contains(&tick_rate_ms) {
                return Err("tickRateMs must be within 20..1000".to_string());
            }
        }
        if let Some(arena_radius) = self.arena_radius {
            if !(500.0..=10_000.0).contains(&arena_radius) {
                return Err("arenaRadius must be within 500..10000".to_string());
            }
        }
        if let Some(respawn_delay_ms) = self.respawn_delay_ms {
            if respawn_delay_ms > 30_000 {
                return Err("respawnDelayMs must be within 0..30000".to_string());
            }
        }
        if let Some(snake_speed) = self.snake_speed {
            if !(1.0..=20.0).contains(&snake_speed) {
                return Err("snakeSpeed must be within 1..20".to_string());
            }
        }
        if let Some(max_turn_rate) = self.max_turn_rate {
            if !(0.01..=0.5).contains(&max_turn_rate) {
                return Err("maxTurnRate must be within 0.01..0.5".to_string());
            }
        }
        Ok(())
    }
}

/// The simulation kernel. One logical writer: every tick runs start to finish
/// under the state lock, commands from the HTTP layer take the same lock
/// between ticks, and the loop guard makes overlapping ticks impossible.
pub struct Arena {
    state: Mutex<ArenaState>,
    pool: AiPool,
    loop_running: AtomicBool,
    tick_running: AtomicBool,
}

struct ArenaState {
    world: World,
    sessions: HashMap<String, mpsc::UnboundedSender<String>>,
    persistence: Persistence,
}

impl ArenaState {
    fn broadcast(&mut self, event: &ServerEvent) {
        let message = event.to_message();
        self.sessions
            .retain(|_, sender| sender.send(message.clone()).is_ok());
    }

    fn broadcast_tick(&mut self, segment_cache: &HashMap<String, Vec<Point>>) {
        let snapshot = protocol::tick_snapshot(&self.world, segment_cache, self.sessions.len());
        self.broadcast(&ServerEvent::Tick(snapshot));
    }

    fn enqueue_save(&self) {
        self.persistence.enqueue(saved_state(&self.world));
    }
}

impl Arena {
    pub fn new(world: World, persistence: Persistence) -> Self {
        Self {
            state: Mutex::new(ArenaState {
                world,
                sessions: HashMap::new(),
                persistence,
            }),
            pool: AiPool::new(AI_POOL_SIZE),
            loop_running: AtomicBool::new(false),
            tick_running: AtomicBool::new(false),
        }
    }

    /// Periodic safety-net save, independent of mutation events.
    pub fn start_save_timer(self: &Arc<Self>) {
        let arena = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval =
                tokio::time::interval(Duration::from_millis(SAVE_INTERVAL_MS));
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                interval.tick().await;
                let state = arena.state.lock().await;
                state.enqueue_save();
            }
        });
    }

    pub async fn register(
        &self,
        name: &str,
        ai_function: String,
    ) -> (String, String, RegisterKind) {
        let mut state = self.state.lock().await;
        let (id, color, kind) = state.world.register(name, ai_function);
        let event = match kind {
            RegisterKind::Created => ServerEvent::SnakeRegistered {
                name: name.to_string(),
                color: color.clone(),
            },
            RegisterKind::Updated => ServerEvent::SnakeRespawned {
                name: name.to_string(),
            },
        };
        state.broadcast(&event);
        state.enqueue_save();
        tracing::info!(name, snake_id = %id, ?kind, "snake registered");
        (id, color, kind)
    }

    pub async fn submit(&self, id: &str, ai_function: String) -> bool {
        let mut state = self.state.lock().await;
        if !state.world.submit(id, ai_function) {
            return false;
        }
        let name = state
            .world
            .snakes
            .get(id)
            .map(|snake| snake.name.clone())
            .unwrap_or_default();
        state.broadcast(&ServerEvent::SnakeRespawned { name: name.clone() });
        state.enqueue_save();
        tracing::info!(name, snake_id = id, "program submitted");
        true
    }

    pub async fn remove(&self, id: &str) -> bool {
        let mut state = self.state.lock().await;
        let removed = state.world.remove(id);
        if removed {
            state.enqueue_save();
            tracing::info!(snake_id = id, "snake removed");
        }
        removed
    }

    pub async fn start(self: &Arc<Self>) -> GameStatus {
        {
            let mut state = self.state.lock().await;
            match state.world.status {
                GameStatus::Waiting | GameStatus::Paused => {
                    state.world.status = GameStatus::Running;
                    state.broadcast(&ServerEvent::Started);
                    tracing::info!("game started");
                }
                GameStatus::Running | GameStatus::Finished => {
                    return state.world.status;
                }
            }
        }
        self.ensure_loop();
        GameStatus::Running
    }

    pub async fn pause(&self) -> GameStatus {
        let mut state = self.state.lock().await;
        if state.world.status == GameStatus::Running {
            state.world.status = GameStatus::Paused;
            state.broadcast(&ServerEvent::Paused);
            tracing::info!("game paused");
        }
        state.world.status
    }

    pub async fn reset(&self) {
        let mut state = self.state.lock().await;
        state.world.reset();
        state.broadcast(&ServerEvent::Reset);
        state.enqueue_save();
        tracing::info!("game reset");
    }

    pub async fn update_config(&self, update: ConfigUpdate) -> GameConfig {
        let mut state = self.state.lock().await;
        if let Some(tick_rate_ms) = update.tick_rate_ms {
            state.world.config.tick_rate_ms = tick_rate_ms;
        }
        if let Some(arena_radius) = update.arena_radius {
            state.world.config.arena_radius = arena_radius;
        }
        if let Some(respawn_on_death) = update.respawn_on_death {
            state.world.config.respawn_on_death = respawn_on_death;
        }
        if let Some(respawn_delay_ms) = update.respawn_delay_ms {
            state.world.config.respawn_delay_ms = respawn_delay_ms;
        }
        if let Some(snake_speed) = update.snake_speed {
            state.world.config.snake_speed = snake_speed;
            for snake in state.world.snakes.values_mut() {
                snake.speed = snake_speed;
            }
        }
        if let Some(max_turn_rate) = update.max_turn_rate {
            state.world.config.max_turn_rate = max_turn_rate;
        }
        tracing::info!(config = ?state.world.config, "config updated");
        state.world.config.clone()
    }

    pub async fn debug_state(&self) -> protocol::DebugState {
        let state = self.state.lock().await;
        protocol::debug_state(&state.world)
    }

    pub async fn add_session(&self) -> (String, mpsc::UnboundedReceiver<String>) {
        let session_id = Uuid::new_v4().to_string();
        let (sender, receiver) = mpsc::unbounded_channel();
        let mut state = self.state.lock().await;
        state.sessions.insert(session_id.clone(), sender);
        tracing::debug!(session_id = %session_id, spectators = state.sessions.len(), "spectator connected");
        (session_id, receiver)
    }

    pub async fn remove_session(&self, session_id: &str) {
        let mut state = self.state.lock().await;
        state.sessions.remove(session_id);
        tracing::debug!(session_id, spectators = state.sessions.len(), "spectator disconnected");
    }

    /// Spawns the tick loop if it is not already alive. Ticks fire on a
    /// fixed-rate interval but stay strictly sequential: a tick that overruns
    /// the period pushes the next firing to its completion instead of
    /// overlapping, and missed firings are skipped.
    fn ensure_loop(self: &Arc<Self>) {
        if self
            .loop_running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return;
        }
        let arena = Arc::clone(self);
        tokio::spawn(async move {
            let mut tick_rate_ms = 0u64;
            let mut interval = tokio::time::interval(Duration::from_millis(DEFAULT_TICK_RATE_MS));
            loop {
                {
                    let state = arena.state.lock().await;
                    if state.world.status != GameStatus::Running {
                        // The store must happen under the lock so a
                        // concurrent start() can never observe a stale guard.
                        arena.loop_running.store(false, Ordering::SeqCst);
                        break;
                    }
                    let rate = state.world.config.tick_rate_ms.max(1);
                    if rate != tick_rate_ms {
                        tick_rate_ms = rate;
                        interval = tokio::time::interval(Duration::from_millis(rate));
                        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
                        interval.reset();
                    }
                }
                interval.tick().await;
                arena.run_tick().await;
            }
        });
    }

    /// One full tick. The re-entry guard makes a second in-flight tick
    /// impossible even under pathological scheduling.
    async fn run_tick(&self) {
        if self
            .tick_running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return;
        }
        let mut state = self.state.lock().await;
        if state.world.status == GameStatus::Running {
            self.tick_inner(&mut state).await;
        }
        drop(state);
        self.tick_running.store(false, Ordering::SeqCst);
    }

    async fn tick_inner(&self, state: &mut ArenaState) {
        let config = state.world.config.clone();
        state.world.tick += 1;
        let tick = state.world.tick;
        let mut events: Vec<ServerEvent> = Vec::new();

        // Respawn sweep.
        if config.respawn_on_death {
            for snake in state.world.snakes.values_mut() {
                if snake.alive {
                    continue;
                }
                match snake.respawn_at {
                    Some(respawn_at) if respawn_at <= tick => {}
                    _ => continue,
                }
                respawn(snake, &config);
                tracing::debug!(name = %snake.name, "snake respawned");
                events.push(ServerEvent::SnakeRespawned {
                    name: snake.name.clone(),
                });
            }
        }

        if state.world.alive_count() == 0 {
            for event in &events {
                state.broadcast(event);
            }
            state.broadcast_tick(&HashMap::new());
            return;
        }

        // AI fan-out over the pre-move state: every snake sees the same
        // world. This await is the tick's only suspension point.
        let jobs = Self::build_ai_jobs(&state.world);
        let timeout = Duration::from_millis(config.ai_timeout_ms);
        let outcomes = futures_util::future::join_all(jobs.into_iter().map(
            |(snake_id, source, input)| async move {
                let outcome = self.pool.run(&source, input, timeout).await;
                (snake_id, outcome)
            },
        ))
        .await;

        // Turn, under the governor.
        for (snake_id, outcome) in outcomes {
            let Some(snake) = state.world.snakes.get_mut(&snake_id) else {
                continue;
            };
            if !snake.alive {
                continue;
            }
            snake.last_ai_error = outcome.error;
            if let Some(target) = outcome.target_angle {
                snake.angle =
                    turn_toward(snake.angle, normalize_angle(target), config.max_turn_rate);
            }
        }

        // Move and prune trails.
        for snake in state.world.snakes.values_mut() {
            if !snake.alive {
                continue;
            }
            snake.x += snake.angle.cos() * snake.speed;
            snake.y += snake.angle.sin() * snake.speed;
            let head = snake.head();
            snake.trail.insert(0, head);
            let arc_budget =
                (snake.segment_count as f64 + TRAIL_SLACK_SEGMENTS) * config.segment_spacing;
            prune_trail(&mut snake.trail, arc_budget);
        }

        // Per-tick segment cache, shared by collision and broadcast.
        let mut segment_cache: HashMap<String, Vec<Point>> = HashMap::new();
        for snake in state.world.snakes.values() {
            if !snake.alive {
                continue;
            }
            segment_cache.insert(
                snake.id.clone(),
                segment_positions(&snake.trail, snake.segment_count, config.segment_spacing),
            );
        }

        state.world.eat_food();

        // Collisions, all against the step-7 cache.
        let colliders: Vec<(String, String, Point)> = state
            .world
            .snakes
            .values()
            .filter(|snake| snake.alive)
            .map(|snake| (snake.id.clone(), snake.name.clone(), snake.head()))
            .collect();
        let mut dead: Vec<String> = Vec::new();
        let mut dead_set: HashSet<String> = HashSet::new();
        let mut death_reasons: HashMap<String, String> = HashMap::new();
        let mut killed_by: HashMap<String, String> = HashMap::new();
        let threshold = (2.0 * config.snake_radius) * (2.0 * config.snake_radius);

        for (snake_id, _, head) in &colliders {
            if !is_in_bounds(head.x, head.y, config.arena_radius) {
                dead.push(snake_id.clone());
                dead_set.insert(snake_id.clone());
                death_reasons.insert(snake_id.clone(), "boundary".to_string());
            }
        }

        'victims: for (snake_id, _, head) in &colliders {
            if dead_set.contains(snake_id) {
                continue;
            }
            for (other_id, other_name, _) in &colliders {
                if other_id == snake_id {
                    continue;
                }
                let Some(segments) = segment_cache.get(other_id) else {
                    continue;
                };
                // Index 0 is the opponent's head; the symmetric head-on pass
                // below owns that case.
                for segment in segments.iter().skip(1) {
                    if dist_sq(head.x, head.y, segment.x, segment.y) < threshold {
                        dead.push(snake_id.clone());
                        dead_set.insert(snake_id.clone());
                        death_reasons
                            .insert(snake_id.clone(), format!("snake:{other_name}"));
                        killed_by.insert(snake_id.clone(), other_id.clone());
                        continue 'victims;
                    }
                }
            }
        }

        for (first_index, (first_id, first_name, first_head)) in colliders.iter().enumerate() {
            for (second_id, second_name, second_head) in colliders.iter().skip(first_index + 1) {
                if dead_set.contains(first_id) || dead_set.contains(second_id) {
                    continue;
                }
                if dist_sq(first_head.x, first_head.y, second_head.x, second_head.y) < threshold {
                    dead.push(first_id.clone());
                    dead_set.insert(first_id.clone());
                    death_reasons.insert(first_id.clone(), format!("headon:{second_name}"));
                    dead.push(second_id.clone());
                    dead_set.insert(second_id.clone());
                    death_reasons.insert(second_id.clone(), format!("headon:{first_name}"));
                }
            }
        }

        // Death processing.
        let respawn_delay_ticks = config.respawn_delay_ticks();
        for snake_id in &dead {
            let Some(snake) = state.world.snakes.get_mut(snake_id) else {
                continue;
            };
            snake.alive = false;
            snake.deaths += 1;
            snake.died_at = Some(tick);
            snake.death_reason = death_reasons.get(snake_id).cloned();
            snake.respawn_at = config
                .respawn_on_death
                .then_some(tick + respawn_delay_ticks);
            snake.trail.clear();
            let name = snake.name.clone();
            let reason = snake.death_reason.clone().unwrap_or_default();
            tracing::debug!(name = %name, reason = %reason, "snake died");
            if let Some(segments) = segment_cache.get(snake_id) {
                state.world.spawn_corpse_food(segments);
            }
            segment_cache.remove(snake_id);
            events.push(ServerEvent::SnakeDied { name, reason });
        }
        if !dead.is_empty() {
            state.enqueue_save();
        }

        // Kill credit, revoked when the killer also died this tick.
        for (_, killer_id) in killed_by
            .iter()
            .filter(|(_, killer_id)| !dead_set.contains(*killer_id))
        {
            if let Some(killer) = state.world.snakes.get_mut(killer_id) {
                killer.kills += 1;
                killer.total_kills += 1;
            }
        }

        state.world.top_up_food();

        // Tournament win check.
        if !config.respawn_on_death
            && state.world.snakes.len() >= 2
            && state.world.alive_count() <= 1
        {
            state.world.status = GameStatus::Finished;
            let winner = state
                .world
                .snakes
                .values()
                .find(|snake| snake.alive)
                .map(|snake| (snake.id.clone(), snake.name.clone()));
            state.world.winner_id = winner.as_ref().map(|(id, _)| id.clone());
            tracing::info!(winner = ?winner, "game finished");
            events.push(ServerEvent::Finished {
                winner_id: winner.as_ref().map(|(id, _)| id.clone()),
                winner_name: winner.map(|(_, name)| name),
            });
            state.enqueue_save();
        }

        for event in &events {
            state.broadcast(event);
        }
        state.broadcast_tick(&segment_cache);
    }

    /// Builds every alive snake's read-only AI input from the same pre-move
    /// state. The shared snake and food views are cloned per job: each
    /// program gets its own copy.
    fn build_ai_jobs(world: &World) -> Vec<(String, String, AiInput)> {
        let spacing = world.config.segment_spacing;
        let mut pre_segments: HashMap<String, Vec<AiPoint>> = HashMap::new();
        for snake in world.snakes.values() {
            if !snake.alive {
                continue;
            }
            let segments = segment_positions(&snake.trail, snake.segment_count, spacing)
                .into_iter()
                .map(|point| AiPoint {
                    x: point.x,
                    y: point.y,
                })
                .collect();
            pre_segments.insert(snake.id.clone(), segments);
        }

        let snake_views: Vec<AiSnakeView> = world
            .snakes
            .values()
            .map(|snake| AiSnakeView {
                id: snake.id.clone(),
                name: snake.name.clone(),
                x: snake.x,
                y: snake.y,
                angle: snake.angle,
                segments: pre_segments.get(&snake.id).cloned().unwrap_or_default(),
                length: snake.segment_count,
                alive: snake.alive,
            })
            .collect();
        let food_views: Vec<AiFoodView> = world
            .food
            .iter()
            .map(|food| AiFoodView {
                x: food.x,
                y: food.y,
                value: food.value,
            })
            .collect();

        world
            .snakes
            .values()
            .filter(|snake| snake.alive)
            .map(|snake| {
                let input = AiInput {
                    you: AiSelf {
                        id: snake.id.clone(),
                        x: snake.x,
                        y: snake.y,
                        angle: snake.angle,
                        speed: snake.speed,
                        segments: pre_segments.get(&snake.id).cloned().unwrap_or_default(),
                        length: snake.segment_count,
                    },
                    arena: AiArena {
                        radius: world.config.arena_radius,
                    },
                    snakes: snake_views.clone(),
                    food: food_views.clone(),
                    tick: world.tick,
                };
                (snake.id.clone(), snake.ai_function.clone(), input)
            })
            .collect()
    }
}
