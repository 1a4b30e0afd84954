use crate::game::snake::{new_snake, respawn};
use crate::game::types::{Food, GameConfig, GameStatus, Submission};
use crate::game::world::World;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::sync::mpsc;

pub const DEFAULT_STATE_PATH: &str = "data/state.json";

/// The on-disk blob: long-lived snake metadata plus the food list. Kinematic
/// state is never persisted; snakes are respawned on restore.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SavedState {
    pub tick: u64,
    pub status: GameStatus,
    pub snakes: Vec<SavedSnake>,
    pub food: Vec<Food>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SavedSnake {
    pub id: String,
    pub name: String,
    pub color: String,
    pub ai_function: String,
    pub submissions: Vec<Submission>,
    pub total_kills: u32,
    pub deaths: u32,
    pub best_length: usize,
}

/// Snapshot of the persistable subset of the world. Snakes are sorted by
/// name so identical states serialize to identical blobs.
pub fn saved_state(world: &World) -> SavedState {
    let mut snakes: Vec<SavedSnake> = world
        .snakes
        .values()
        .map(|snake| SavedSnake {
            id: snake.id.clone(),
            name: snake.name.clone(),
            color: snake.color.clone(),
            ai_function: snake.ai_function.clone(),
            submissions: snake.submissions.clone(),
            total_kills: snake.total_kills,
            deaths: snake.deaths,
            best_length: snake.best_length,
        })
        .collect();
    snakes.sort_by(|a, b| a.name.cmp(&b.name));
    SavedState {
        tick: world.tick,
        status: world.status,
        snakes,
        food: world.food.clone(),
    }
}

/// Owns the state file. Mutation events and the periodic timer enqueue full
/// payloads; the task coalesces whatever backlog exists into a single atomic
/// write, so at most one write is ever pending.
pub struct Persistence {
    tx: mpsc::UnboundedSender<SavedState>,
}

impl Persistence {
    pub fn spawn(path: PathBuf) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(saver_task(path, rx));
        Self { tx }
    }

    pub fn enqueue(&self, state: SavedState) {
        let _ = self.tx.send(state);
    }
}

async fn saver_task(path: PathBuf, mut rx: mpsc::UnboundedReceiver<SavedState>) {
    while let Some(mut payload) = rx.recv().await {
        while let Ok(newer) = rx.try_recv() {
            payload = newer;
        }
        if let Err(error) = write_state(&path, &payload) {
            tracing::warn!(%error, path = %path.display(), "state save failed");
        }
    }
}

/// Atomic replace: write the sibling temp file, then rename over the target.
pub fn write_state(path: &Path, state: &SavedState) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let blob = serde_json::to_vec_pretty(state)?;
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, blob)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

pub fn load_state(path: &Path) -> Option<SavedState> {
    let blob = match std::fs::read(path) {
        Ok(blob) => blob,
        Err(_) => return None,
    };
    match serde_json::from_slice(&blob) {
        Ok(state) => Some(state),
        Err(error) => {
            tracing::warn!(%error, path = %path.display(), "state file unreadable; starting fresh");
            None
        }
    }
}

/// Rebuilds a runtime world from a blob: every snake comes back as a fresh
/// shell carrying its lifetime stats, then respawns. The simulation always
/// restarts in `waiting`, whatever status was serialized.
pub fn restore_world(saved: SavedState, config: GameConfig) -> World {
    let mut world = World::new(config);
    world.tick = saved.tick;
    world.status = GameStatus::Waiting;
    for record in saved.snakes {
        let mut snake = new_snake(
            record.id.clone(),
            record.name,
            record.color,
            record.ai_function,
        );
        snake.submissions = record.submissions;
        snake.total_kills = record.total_kills;
        snake.deaths = record.deaths;
        snake.best_length = record.best_length;
        respawn(&mut snake, &world.config);
        world.adopt_snake(snake);
    }
    world.food = saved.food;
    world.top_up_food();
    world
}
