use super::*;
use crate::game::math::angle_diff;
use crate::game::snake::build_spawn_trail;
use crate::game::types::Food;
use std::f64::consts::{FRAC_PI_2, PI};

const HOLD_COURSE: &str = "function move(state) return state.you.angle end";

fn no_food_config() -> GameConfig {
    GameConfig {
        min_food: 0,
        max_food: 0,
        ..GameConfig::default()
    }
}

fn test_arena(config: GameConfig) -> Arc<Arena> {
    let path = std::env::temp_dir().join(format!("snake-arena-{}.json", Uuid::new_v4()));
    let persistence = Persistence::spawn(path);
    Arc::new(Arena::new(World::new(config), persistence))
}

async fn register(arena: &Arena, name: &str, program: &str) -> String {
    let (id, _, _) = arena.register(name, program.to_string()).await;
    id
}

/// Pins a snake to an exact pose with a straight trail laid out behind the
/// heading, replacing the randomized spawn placement.
async fn place(arena: &Arena, id: &str, x: f64, y: f64, angle: f64) {
    let mut state = arena.state.lock().await;
    let config = state.world.config.clone();
    let snake = state.world.snakes.get_mut(id).expect("snake exists");
    snake.x = x;
    snake.y = y;
    snake.angle = angle;
    snake.trail = build_spawn_trail(Point { x, y }, angle, &config);
}

async fn start_running(arena: &Arena) {
    let mut state = arena.state.lock().await;
    state.world.status = GameStatus::Running;
}

async fn snake_clone(arena: &Arena, id: &str) -> crate::game::types::Snake {
    let state = arena.state.lock().await;
    state.world.snakes.get(id).expect("snake exists").clone()
}

#[tokio::test]
async fn steering_is_rate_limited_per_tick() {
    let arena = test_arena(no_food_config());
    let id = register(
        &arena,
        "turner",
        "function move(state) return state.you.angle + 3.0 end",
    )
    .await;
    place(&arena, &id, 0.0, 0.0, 0.0).await;
    start_running(&arena).await;
    arena.run_tick().await;

    let snake = snake_clone(&arena, &id).await;
    assert!(snake.alive);
    assert!((snake.angle - 0.25).abs() < 1e-9);
    assert!(angle_diff(0.0, snake.angle).abs() <= 0.25 + 1e-9);
}

#[tokio::test]
async fn invalid_return_keeps_heading_and_surfaces_error() {
    let arena = test_arena(no_food_config());
    let id = register(&arena, "mute", "function move(state) return nil end").await;
    place(&arena, &id, 0.0, 0.0, 1.0).await;
    start_running(&arena).await;
    arena.run_tick().await;

    let snake = snake_clone(&arena, &id).await;
    assert!(snake.alive);
    assert!((snake.angle - 1.0).abs() < 1e-12);
    assert_eq!(
        snake.last_ai_error.as_deref(),
        Some(crate::ai::INVALID_RETURN_ERROR)
    );
    assert!((snake.x - 1.0f64.cos() * snake.speed).abs() < 1e-9);
}

#[tokio::test]
async fn timed_out_program_forfeits_steering_only() {
    let arena = test_arena(no_food_config());
    let id = register(
        &arena,
        "spinner",
        "function move(state) while true do end end",
    )
    .await;
    place(&arena, &id, 0.0, 0.0, 1.0).await;
    start_running(&arena).await;
    arena.run_tick().await;

    let snake = snake_clone(&arena, &id).await;
    assert!(snake.alive);
    assert_eq!(snake.last_ai_error.as_deref(), Some(crate::ai::TIMEOUT_ERROR));
    assert!((snake.angle - 1.0).abs() < 1e-12);

    // The replaced executor serves the next tick normally.
    arena.submit(&id, HOLD_COURSE.to_string()).await;
    place(&arena, &id, 0.0, 0.0, 1.0).await;
    arena.run_tick().await;
    let snake = snake_clone(&arena, &id).await;
    assert_eq!(snake.last_ai_error, None);
}

#[tokio::test]
async fn head_on_collision_kills_both_without_credit() {
    let arena = test_arena(no_food_config());
    let alpha = register(&arena, "alpha", HOLD_COURSE).await;
    let beta = register(&arena, "beta", HOLD_COURSE).await;
    place(&arena, &alpha, 10.0, 0.0, PI).await;
    place(&arena, &beta, -10.0, 0.0, 0.0).await;
    start_running(&arena).await;
    arena.run_tick().await;

    let alpha = snake_clone(&arena, &alpha).await;
    let beta = snake_clone(&arena, &beta).await;
    assert!(!alpha.alive);
    assert!(!beta.alive);
    assert_eq!(alpha.death_reason.as_deref(), Some("headon:beta"));
    assert_eq!(beta.death_reason.as_deref(), Some("headon:alpha"));
    assert_eq!(alpha.kills, 0);
    assert_eq!(beta.kills, 0);
    assert_eq!(alpha.deaths, 1);
    assert_eq!(beta.deaths, 1);
    assert!(alpha.trail.is_empty());
    assert_eq!(alpha.respawn_at, Some(1 + alpha_respawn_delay(&arena).await));
}

async fn alpha_respawn_delay(arena: &Arena) -> u64 {
    let state = arena.state.lock().await;
    state.world.config.respawn_delay_ticks()
}

#[tokio::test]
async fn head_into_body_credits_the_survivor() {
    let arena = test_arena(no_food_config());
    let mouse = register(&arena, "mouse", HOLD_COURSE).await;
    let wall = register(&arena, "wall", HOLD_COURSE).await;
    place(&arena, &mouse, 0.0, 0.0, 0.0).await;
    place(&arena, &wall, 100.0, 0.0, 0.0).await;
    start_running(&arena).await;
    arena.run_tick().await;

    let mouse = snake_clone(&arena, &mouse).await;
    let wall = snake_clone(&arena, &wall).await;
    assert!(!mouse.alive);
    assert_eq!(mouse.death_reason.as_deref(), Some("snake:wall"));
    assert!(wall.alive);
    assert_eq!(wall.kills, 1);
    assert_eq!(wall.total_kills, 1);
    assert_eq!(mouse.deaths, 1);
}

#[tokio::test]
async fn leaving_the_arena_is_a_boundary_death() {
    let config = GameConfig {
        snake_speed: 10.0,
        ..no_food_config()
    };
    let arena = test_arena(config);
    let runner = register(&arena, "runner", HOLD_COURSE).await;
    place(&arena, &runner, 1995.0, 0.0, 0.0).await;
    start_running(&arena).await;
    arena.run_tick().await;

    let runner = snake_clone(&arena, &runner).await;
    assert!(!runner.alive);
    assert_eq!(runner.death_reason.as_deref(), Some("boundary"));
    assert_eq!(runner.deaths, 1);
    assert_eq!(runner.kills, 0);
}

#[tokio::test]
async fn eating_grows_and_the_floor_is_refilled() {
    let config = GameConfig {
        min_food: 1,
        max_food: 10,
        ..GameConfig::default()
    };
    let arena = test_arena(config);
    let eater = register(&arena, "eater", HOLD_COURSE).await;
    place(&arena, &eater, 10.0, 0.0, 0.0).await;
    {
        let mut state = arena.state.lock().await;
        state.world.food = vec![Food {
            x: 0.0,
            y: 0.0,
            value: 3,
            radius: 6.0,
        }];
    }
    start_running(&arena).await;
    arena.run_tick().await;

    let eater = snake_clone(&arena, &eater).await;
    assert_eq!(eater.segment_count, 13);
    assert_eq!(eater.best_length, 13);

    let state = arena.state.lock().await;
    assert_eq!(state.world.food.len(), state.world.food_floor());
    assert!(state.world.food.iter().all(|food| food.value == 1));
}

#[tokio::test]
async fn corpse_food_appears_where_the_snake_died() {
    let config = GameConfig {
        snake_speed: 10.0,
        min_food: 0,
        max_food: 10,
        ..GameConfig::default()
    };
    let arena = test_arena(config);
    let runner = register(&arena, "runner", HOLD_COURSE).await;
    place(&arena, &runner, 1995.0, 0.0, 0.0).await;
    start_running(&arena).await;
    arena.run_tick().await;

    let state = arena.state.lock().await;
    let corpse: Vec<_> = state
        .world
        .food
        .iter()
        .filter(|food| food.value == crate::game::constants::CORPSE_FOOD_VALUE)
        .collect();
    // Half of the ten cached segments become corpse tiles, jittered around
    // the body the snake died with.
    assert_eq!(corpse.len(), 5);
    assert!(corpse.iter().all(|food| food.x > 1700.0));
    assert!(corpse
        .iter()
        .all(|food| food.radius > state.world.config.food_radius));
    assert_eq!(state.world.food.len(), 10);
}

#[tokio::test]
async fn tournament_ends_when_one_snake_remains() {
    let config = GameConfig {
        respawn_on_death: false,
        ..no_food_config()
    };
    let arena = test_arena(config);
    let ajax = register(&arena, "ajax", HOLD_COURSE).await;
    let brick = register(&arena, "brick", HOLD_COURSE).await;
    let crown = register(&arena, "crown", HOLD_COURSE).await;
    place(&arena, &ajax, 0.0, 0.0, 0.0).await;
    place(&arena, &brick, 0.0, 50.0, 0.0).await;
    place(&arena, &crown, 10.0, 100.0, FRAC_PI_2).await;
    let (_session, mut outbound) = arena.add_session().await;
    start_running(&arena).await;
    arena.run_tick().await;

    {
        let state = arena.state.lock().await;
        assert_eq!(state.world.status, GameStatus::Finished);
        assert_eq!(state.world.winner_id.as_deref(), Some(crown.as_str()));
        assert_eq!(state.world.tick, 1);
    }
    let ajax = snake_clone(&arena, &ajax).await;
    let brick = snake_clone(&arena, &brick).await;
    let crown_snake = snake_clone(&arena, &crown).await;
    assert!(!ajax.alive);
    assert_eq!(ajax.respawn_at, None);
    assert!(!brick.alive);
    assert_eq!(crown_snake.kills, 2);

    let mut saw_finished = false;
    while let Ok(message) = outbound.try_recv() {
        if message.contains("game:finished") {
            saw_finished = true;
            assert!(message.contains("crown"));
        }
    }
    assert!(saw_finished);

    // Finished games schedule no further ticks.
    arena.run_tick().await;
    let state = arena.state.lock().await;
    assert_eq!(state.world.tick, 1);
}

#[tokio::test]
async fn dead_snakes_respawn_after_the_delay() {
    let config = GameConfig {
        snake_speed: 10.0,
        respawn_delay_ms: 100,
        ..no_food_config()
    };
    let arena = test_arena(config);
    let runner = register(&arena, "runner", HOLD_COURSE).await;
    place(&arena, &runner, 1995.0, 0.0, 0.0).await;
    start_running(&arena).await;
    arena.run_tick().await;

    let snake = snake_clone(&arena, &runner).await;
    assert!(!snake.alive);
    assert_eq!(snake.respawn_at, Some(3));

    arena.run_tick().await;
    assert!(!snake_clone(&arena, &runner).await.alive);

    arena.run_tick().await;
    let snake = snake_clone(&arena, &runner).await;
    assert!(snake.alive);
    assert_eq!(snake.segment_count, 10);
    assert_eq!(snake.kills, 0);
    assert_eq!(snake.deaths, 1);
    assert!(!snake.trail.is_empty());
    assert!(snake.death_reason.is_none());
}

#[tokio::test]
async fn submit_respawns_with_the_new_program() {
    let arena = test_arena(no_food_config());
    let id = register(&arena, "student", HOLD_COURSE).await;
    {
        let mut state = arena.state.lock().await;
        let snake = state.world.snakes.get_mut(&id).expect("snake exists");
        snake.kills = 3;
        snake.total_kills = 5;
        snake.deaths = 2;
    }

    let replacement = "function move(state) return 0.0 end";
    assert!(arena.submit(&id, replacement.to_string()).await);
    let snake = snake_clone(&arena, &id).await;
    assert!(snake.alive);
    assert_eq!(snake.ai_function, replacement);
    assert_eq!(snake.kills, 0);
    assert_eq!(snake.total_kills, 5);
    assert_eq!(snake.deaths, 2);
    assert_eq!(snake.submissions.len(), 2);

    assert!(!arena.submit("no-such-id", HOLD_COURSE.to_string()).await);
}

#[tokio::test]
async fn register_with_known_name_is_a_resubmission() {
    let arena = test_arena(no_food_config());
    let (first_id, first_color, kind) = arena.register("echo", HOLD_COURSE.to_string()).await;
    assert_eq!(kind, RegisterKind::Created);

    let (second_id, second_color, kind) = arena
        .register("echo", "function move(state) return 1 end".to_string())
        .await;
    assert_eq!(kind, RegisterKind::Updated);
    assert_eq!(first_id, second_id);
    assert_eq!(first_color, second_color);

    let snake = snake_clone(&arena, &first_id).await;
    assert_eq!(snake.submissions.len(), 2);
    assert!(snake.ai_function.contains("return 1"));
}

#[tokio::test]
async fn reset_keeps_registrations_and_clears_the_rest() {
    let config = GameConfig {
        min_food: 2,
        max_food: 10,
        ..GameConfig::default()
    };
    let arena = test_arena(config);
    let id = register(&arena, "keeper", HOLD_COURSE).await;
    register(&arena, "other", HOLD_COURSE).await;
    start_running(&arena).await;
    arena.run_tick().await;
    {
        let mut state = arena.state.lock().await;
        let snake = state.world.snakes.get_mut(&id).expect("snake exists");
        snake.kills = 4;
    }

    arena.reset().await;
    let state = arena.state.lock().await;
    assert_eq!(state.world.tick, 0);
    assert_eq!(state.world.status, GameStatus::Waiting);
    assert!(state.world.food.is_empty());
    assert_eq!(state.world.snakes.len(), 2);
    assert!(state.world.snakes.values().all(|snake| snake.kills == 0));
    assert!(state
        .world
        .snakes
        .values()
        .any(|snake| snake.name == "keeper"));
}

#[tokio::test]
async fn snapshot_rounds_and_counts_spectators() {
    let config = GameConfig {
        min_food: 1,
        max_food: 5,
        ..GameConfig::default()
    };
    let arena = test_arena(config);
    let id = register(&arena, "viewer-bait", HOLD_COURSE).await;
    place(&arena, &id, 123.456, -77.777, 0.5).await;
    let (_session, mut outbound) = arena.add_session().await;
    start_running(&arena).await;
    arena.run_tick().await;

    let mut tick_frame = None;
    while let Ok(message) = outbound.try_recv() {
        let value: serde_json::Value = serde_json::from_str(&message).expect("valid frame");
        if value["event"] == "game:tick" {
            tick_frame = Some(value);
        }
    }
    let frame = tick_frame.expect("tick frame broadcast");
    let data = &frame["data"];
    assert_eq!(data["tick"], 1);
    assert_eq!(data["spectatorCount"], 1);
    assert_eq!(data["status"], "running");

    let snake = &data["snakes"][0];
    let x = snake["x"].as_f64().expect("x");
    assert!((x * 10.0 - (x * 10.0).round()).abs() < 1e-9);
    let angle = snake["angle"].as_f64().expect("angle");
    assert!((angle * 100.0 - (angle * 100.0).round()).abs() < 1e-9);
    assert!(snake["segments"].as_array().is_some());
    assert_eq!(snake["length"], 10);
}

#[tokio::test]
async fn invariants_hold_across_ticks() {
    let config = GameConfig {
        min_food: 10,
        max_food: 30,
        ..GameConfig::default()
    };
    let arena = test_arena(config);
    let chaser = register(
        &arena,
        "chaser",
        "function move(state)\n  local best = state.food[1]\n  if best == nil then return state.you.angle end\n  return angleTo(state.you.x, state.you.y, best.x, best.y)\nend",
    )
    .await;
    let turner = register(
        &arena,
        "spiral",
        "function move(state) return state.you.angle + 0.4 end",
    )
    .await;
    let holder = register(&arena, "holder", HOLD_COURSE).await;
    // Spread the snakes far apart so ten ticks of movement cannot reach
    // another body; the invariants under test are per-snake.
    place(&arena, &chaser, 500.0, 0.0, PI).await;
    place(&arena, &turner, -500.0, 0.0, 0.0).await;
    place(&arena, &holder, 0.0, 500.0, FRAC_PI_2).await;
    start_running(&arena).await;

    for _ in 0..10 {
        let before: std::collections::HashMap<String, (bool, f64)> = {
            let state = arena.state.lock().await;
            state
                .world
                .snakes
                .values()
                .map(|snake| (snake.id.clone(), (snake.alive, snake.angle)))
                .collect()
        };
        arena.run_tick().await;
        let state = arena.state.lock().await;
        let config = &state.world.config;
        assert!(state.world.food.len() <= config.max_food);
        assert!(state.world.food.len() >= state.world.food_floor());
        for snake in state.world.snakes.values() {
            if snake.alive {
                assert!(snake.x * snake.x + snake.y * snake.y < config.arena_radius.powi(2));
                let head = snake.trail.first().expect("alive snakes keep a trail");
                assert!((head.x - snake.x).abs() < 1e-9);
                assert!((head.y - snake.y).abs() < 1e-9);
                assert!(snake.segment_count >= config.starting_segments);
                if let Some((was_alive, previous_angle)) = before.get(&snake.id) {
                    if *was_alive {
                        assert!(
                            angle_diff(*previous_angle, snake.angle).abs()
                                <= config.max_turn_rate + 1e-9
                        );
                    }
                }
            } else {
                assert!(snake.trail.is_empty());
            }
        }
    }

    for id in [&chaser, &turner, &holder] {
        let state = arena.state.lock().await;
        assert!(state.world.snakes.contains_key(id.as_str()));
    }
}

#[tokio::test]
async fn pause_freezes_the_pipeline() {
    let arena = test_arena(no_food_config());
    let id = register(&arena, "pauser", HOLD_COURSE).await;
    place(&arena, &id, 0.0, 0.0, 0.0).await;
    start_running(&arena).await;
    arena.run_tick().await;
    assert_eq!(arena.pause().await, GameStatus::Paused);
    arena.run_tick().await;

    let state = arena.state.lock().await;
    assert_eq!(state.world.tick, 1);
}

#[tokio::test]
async fn config_update_validates_ranges() {
    let update = ConfigUpdate {
        tick_rate_ms: Some(10),
        ..ConfigUpdate::default()
    };
    assert!(update.validate().is_err());

    let update = ConfigUpdate {
        max_turn_rate: Some(0.6),
        ..ConfigUpdate::default()
    };
    assert!(update.validate().is_err());

    let update = ConfigUpdate {
        tick_rate_ms: Some(100),
        snake_speed: Some(6.0),
        ..ConfigUpdate::default()
    };
    assert!(update.validate().is_ok());

    let arena = test_arena(no_food_config());
    let id = register(&arena, "tuned", HOLD_COURSE).await;
    let config = arena.update_config(update).await;
    assert_eq!(config.tick_rate_ms, 100);
    assert_eq!(config.snake_speed, 6.0);
    let snake = snake_clone(&arena, &id).await;
    assert_eq!(snake.speed, 6.0);
}
