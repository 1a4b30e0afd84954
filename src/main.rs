use axum::{
    extract::rejection::JsonRejection,
    extract::ws::{Message, WebSocket},
    extract::{Path, State, WebSocketUpgrade},
    http::{Method, StatusCode},
    response::IntoResponse,
    routing::{delete, get, post},
    Json, Router,
};
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing_subscriber::EnvFilter;

mod ai;
mod game;
mod persistence;
mod protocol;

use game::arena::{Arena, ConfigUpdate};
use game::constants::{MAX_NAME_CHARS, MAX_PROGRAM_CHARS};
use game::types::{GameConfig, GameStatus};
use game::world::{RegisterKind, World};
use persistence::{load_state, restore_world, Persistence, DEFAULT_STATE_PATH};

#[derive(Debug, Deserialize)]
struct RegisterRequest {
    name: Option<String>,
    #[serde(rename = "aiFunction")]
    ai_function: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SubmitRequest {
    #[serde(rename = "snakeId")]
    snake_id: Option<String>,
    #[serde(rename = "aiFunction")]
    ai_function: Option<String>,
}

#[derive(Debug, Serialize)]
struct RegisterResponse {
    #[serde(rename = "snakeId")]
    snake_id: String,
    color: String,
    message: String,
}

#[derive(Debug, Serialize)]
struct OkResponse {
    ok: bool,
}

#[derive(Debug, Serialize)]
struct StatusResponse {
    ok: bool,
    status: GameStatus,
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    ok: bool,
    error: String,
}

fn error_response(status: StatusCode, message: &str) -> axum::response::Response {
    (
        status,
        Json(ErrorResponse {
            ok: false,
            error: message.to_string(),
        }),
    )
        .into_response()
}

fn bad_request(message: &str) -> axum::response::Response {
    error_response(StatusCode::BAD_REQUEST, message)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let state_path = env::var("STATE_PATH")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(DEFAULT_STATE_PATH));
    let world = match load_state(&state_path) {
        Some(saved) => {
            let world = restore_world(saved, GameConfig::default());
            tracing::info!(
                snakes = world.snakes.len(),
                food = world.food.len(),
                path = %state_path.display(),
                "state restored"
            );
            world
        }
        None => World::new(GameConfig::default()),
    };
    let persistence = Persistence::spawn(state_path);
    let arena = Arc::new(Arena::new(world, persistence));
    arena.start_save_timer();

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::DELETE])
        .allow_headers(Any);

    let app: Router = Router::new()
        .route("/api/health", get(health))
        .route("/api/register", post(register))
        .route("/api/submit", post(submit))
        .route("/api/state", get(state_debug))
        .route("/api/docs/ai-contract", get(ai_contract))
        .route("/api/admin/start", post(admin_start))
        .route("/api/admin/pause", post(admin_pause))
        .route("/api/admin/reset", post(admin_reset))
        .route("/api/admin/snake/:id", delete(admin_remove_snake))
        .route("/api/admin/config", post(admin_config))
        .route("/api/ws", get(ws_handler))
        .layer(cors)
        .with_state(arena);

    let port: u16 = env::var("PORT")
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or(8787);
    let address = format!("0.0.0.0:{port}");
    tracing::info!("listening on {address}");

    let listener = tokio::net::TcpListener::bind(&address).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

async fn health() -> impl IntoResponse {
    Json(OkResponse { ok: true })
}

fn validate_name(name: Option<String>) -> Result<String, &'static str> {
    let name = name.map(|value| value.trim().to_string()).unwrap_or_default();
    if name.is_empty() || name.chars().count() > MAX_NAME_CHARS {
        return Err("name must be 1..20 characters");
    }
    Ok(name)
}

fn validate_program(program: Option<String>) -> Result<String, &'static str> {
    let program = program.unwrap_or_default();
    if program.is_empty() || program.chars().count() > MAX_PROGRAM_CHARS {
        return Err("aiFunction must be 1..10000 characters");
    }
    Ok(program)
}

async fn register(
    State(arena): State<Arc<Arena>>,
    payload: Result<Json<RegisterRequest>, JsonRejection>,
) -> impl IntoResponse {
    let Json(payload) = match payload {
        Ok(payload) => payload,
        Err(rejection) => return bad_request(&rejection.body_text()),
    };
    let name = match validate_name(payload.name) {
        Ok(name) => name,
        Err(message) => return bad_request(message),
    };
    let ai_function = match validate_program(payload.ai_function) {
        Ok(program) => program,
        Err(message) => return bad_request(message),
    };

    let (snake_id, color, kind) = arena.register(&name, ai_function).await;
    let message = match kind {
        RegisterKind::Created => format!("Welcome to the arena, {name}"),
        RegisterKind::Updated => format!("Program updated; {name} respawned"),
    };
    (
        StatusCode::OK,
        Json(RegisterResponse {
            snake_id,
            color,
            message,
        }),
    )
        .into_response()
}

async fn submit(
    State(arena): State<Arc<Arena>>,
    payload: Result<Json<SubmitRequest>, JsonRejection>,
) -> impl IntoResponse {
    let Json(payload) = match payload {
        Ok(payload) => payload,
        Err(rejection) => return bad_request(&rejection.body_text()),
    };
    let Some(snake_id) = payload.snake_id.filter(|id| !id.is_empty()) else {
        return bad_request("snakeId is required");
    };
    let ai_function = match validate_program(payload.ai_function) {
        Ok(program) => program,
        Err(message) => return bad_request(message),
    };

    if arena.submit(&snake_id, ai_function).await {
        (StatusCode::OK, Json(OkResponse { ok: true })).into_response()
    } else {
        error_response(StatusCode::NOT_FOUND, "Unknown snake")
    }
}

async fn state_debug(State(arena): State<Arc<Arena>>) -> impl IntoResponse {
    Json(arena.debug_state().await)
}

async fn ai_contract() -> impl IntoResponse {
    Json(protocol::ai_contract_doc())
}

async fn admin_start(State(arena): State<Arc<Arena>>) -> impl IntoResponse {
    let status = arena.start().await;
    Json(StatusResponse { ok: true, status })
}

async fn admin_pause(State(arena): State<Arc<Arena>>) -> impl IntoResponse {
    let status = arena.pause().await;
    Json(StatusResponse { ok: true, status })
}

async fn admin_reset(State(arena): State<Arc<Arena>>) -> impl IntoResponse {
    arena.reset().await;
    Json(OkResponse { ok: true })
}

async fn admin_remove_snake(
    State(arena): State<Arc<Arena>>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    if arena.remove(&id).await {
        (StatusCode::OK, Json(OkResponse { ok: true })).into_response()
    } else {
        error_response(StatusCode::NOT_FOUND, "Unknown snake")
    }
}

async fn admin_config(
    State(arena): State<Arc<Arena>>,
    payload: Result<Json<ConfigUpdate>, JsonRejection>,
) -> impl IntoResponse {
    let Json(update) = match payload {
        Ok(payload) => payload,
        Err(rejection) => return bad_request(&rejection.body_text()),
    };
    if let Err(message) = update.validate() {
        return bad_request(&message);
    }
    let config = arena.update_config(update).await;
    Json(config).into_response()
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    State(arena): State<Arc<Arena>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, arena))
}

async fn handle_socket(socket: WebSocket, arena: Arc<Arena>) {
    let (mut sender, mut receiver) = socket.split();
    let (session_id, mut outbound) = arena.add_session().await;

    let send_task = tokio::spawn(async move {
        while let Some(payload) = outbound.recv().await {
            if sender.send(Message::Text(payload)).await.is_err() {
                break;
            }
        }
    });

    // Spectators only listen; inbound traffic just keeps the connection
    // alive until close.
    while let Some(result) = receiver.next().await {
        let Ok(message) = result else { break };
        if let Message::Close(_) = message {
            break;
        }
    }

    arena.remove_session(&session_id).await;
    send_task.abort();
}
