use mlua::{Function, HookTriggers, Lua, LuaOptions, LuaSerdeExt, RegistryKey, StdLib, Value};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{mpsc as std_mpsc, Arc};
use std::thread;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, oneshot, Mutex};

use crate::game::constants::MAX_PROGRAM_CHARS;

pub const TIMEOUT_ERROR: &str = "AI timed out";
pub const INVALID_RETURN_ERROR: &str = "Invalid return";
pub const CRASH_ERROR: &str = "Executor crashed";

const HOOK_INSTRUCTION_INTERVAL: u32 = 2048;
const MAX_ERROR_CHARS: usize = 300;

// Escape hatches out of the cooperative sandbox. Occurrences are rewritten to
// a comment before compilation; the restricted stdlib is the real boundary.
const DENYLIST: [&str; 10] = [
    "os",
    "io",
    "require",
    "dofile",
    "load",
    "loadfile",
    "loadstring",
    "package",
    "debug",
    "collectgarbage",
];

/// Exactly the read-only view handed to `move(state)`. Serialized into a
/// fresh Lua table per call, so participant mutation never reaches
/// authoritative state.
#[derive(Debug, Clone, Serialize)]
pub struct AiInput {
    pub you: AiSelf,
    pub arena: AiArena,
    pub snakes: Vec<AiSnakeView>,
    pub food: Vec<AiFoodView>,
    pub tick: u64,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct AiPoint {
    pub x: f64,
    pub y: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct AiSelf {
    pub id: String,
    pub x: f64,
    pub y: f64,
    pub angle: f64,
    pub speed: f64,
    pub segments: Vec<AiPoint>,
    pub length: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct AiArena {
    pub radius: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct AiSnakeView {
    pub id: String,
    pub name: String,
    pub x: f64,
    pub y: f64,
    pub angle: f64,
    pub segments: Vec<AiPoint>,
    pub length: usize,
    pub alive: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct AiFoodView {
    pub x: f64,
    pub y: f64,
    pub value: i64,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct AiOutcome {
    pub target_angle: Option<f64>,
    pub error: Option<String>,
}

struct Job {
    source: Arc<str>,
    input: AiInput,
    deadline: Instant,
    reply: oneshot::Sender<AiOutcome>,
}

struct ExecutorHandle {
    jobs: std_mpsc::Sender<Job>,
    generation: u64,
}

/// Fixed-size pool of isolated Lua executors. Each executor is an OS thread
/// owning one sandboxed VM plus a compiled-program cache keyed by exact
/// source. Executors are checked out of a free queue per call and replaced
/// wholesale on timeout or crash, so the tick scheduler never blocks on a
/// wedged VM.
pub struct AiPool {
    free_tx: mpsc::UnboundedSender<ExecutorHandle>,
    free_rx: Mutex<mpsc::UnboundedReceiver<ExecutorHandle>>,
    next_generation: AtomicU64,
}

impl AiPool {
    pub fn new(size: usize) -> Self {
        let (free_tx, free_rx) = mpsc::unbounded_channel();
        let pool = Self {
            free_tx,
            free_rx: Mutex::new(free_rx),
            next_generation: AtomicU64::new(0),
        };
        for _ in 0..size.max(1) {
            let handle = pool.spawn_executor();
            let _ = pool.free_tx.send(handle);
        }
        pool
    }

    fn spawn_executor(&self) -> ExecutorHandle {
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let (jobs_tx, jobs_rx) = std_mpsc::channel::<Job>();
        thread::Builder::new()
            .name(format!("ai-executor-{generation}"))
            .spawn(move || executor_main(jobs_rx, generation))
            .expect("failed to spawn AI executor thread");
        ExecutorHandle {
            jobs: jobs_tx,
            generation,
        }
    }

    fn replace_executor(&self) {
        let _ = self.free_tx.send(self.spawn_executor());
    }

    /// Runs `move(state)` for one snake under the wall-clock deadline.
    /// Checkout waits are bounded by the same budget: when the pool is
    /// exhausted past the deadline the caller observes null steering and the
    /// tick moves on.
    pub async fn run(&self, source: &str, input: AiInput, timeout: Duration) -> AiOutcome {
        if source.len() > MAX_PROGRAM_CHARS {
            return AiOutcome {
                target_angle: None,
                error: Some("Program too long".to_string()),
            };
        }

        let checkout = tokio::time::timeout(timeout, async {
            let mut free = self.free_rx.lock().await;
            free.recv().await
        })
        .await;
        let handle = match checkout {
            Ok(Some(handle)) => handle,
            Ok(None) => return AiOutcome::default(),
            Err(_) => {
                tracing::debug!("ai pool exhausted; steering skipped this tick");
                return AiOutcome::default();
            }
        };

        let (reply_tx, reply_rx) = oneshot::channel();
        let job = Job {
            source: Arc::from(source),
            input,
            deadline: Instant::now() + timeout,
            reply: reply_tx,
        };
        if handle.jobs.send(job).is_err() {
            tracing::warn!(generation = handle.generation, "ai executor gone; replacing");
            self.replace_executor();
            return AiOutcome {
                target_angle: None,
                error: Some(CRASH_ERROR.to_string()),
            };
        }

        match tokio::time::timeout(timeout, reply_rx).await {
            Ok(Ok(outcome)) => {
                if outcome.error.as_deref() == Some(TIMEOUT_ERROR) {
                    // The in-VM deadline hook fired before our timer did.
                    // Same contract either way: the slot is replaced.
                    drop(handle);
                    self.replace_executor();
                } else {
                    let _ = self.free_tx.send(handle);
                }
                outcome
            }
            Ok(Err(_)) => {
                tracing::warn!(generation = handle.generation, "ai executor crashed; replacing");
                self.replace_executor();
                AiOutcome {
                    target_angle: None,
                    error: Some(CRASH_ERROR.to_string()),
                }
            }
            Err(_) => {
                // Dropping the handle disconnects the worker's job queue; the
                // in-VM hook unwinds the script and the thread exits on its
                // own. A fresh executor takes the slot immediately.
                tracing::warn!(
                    generation = handle.generation,
                    "ai call missed deadline; recycling executor"
                );
                drop(handle);
                self.replace_executor();
                AiOutcome {
                    target_angle: None,
                    error: Some(TIMEOUT_ERROR.to_string()),
                }
            }
        }
    }
}

fn executor_main(jobs: std_mpsc::Receiver<Job>, generation: u64) {
    let lua = match build_lua() {
        Ok(lua) => lua,
        Err(error) => {
            tracing::error!(generation, %error, "failed to initialize Lua executor");
            return;
        }
    };
    let mut programs: HashMap<String, RegistryKey> = HashMap::new();
    while let Ok(job) = jobs.recv() {
        let outcome = run_job(&lua, &mut programs, &job);
        let _ = job.reply.send(outcome);
    }
    tracing::debug!(generation, "ai executor retired");
}

fn build_lua() -> mlua::Result<Lua> {
    Lua::new_with(
        StdLib::MATH | StdLib::TABLE | StdLib::STRING,
        LuaOptions::default(),
    )
}

fn run_job(lua: &Lua, programs: &mut HashMap<String, RegistryKey>, job: &Job) -> AiOutcome {
    let move_fn = match compiled_program(lua, programs, &job.source) {
        Ok(func) => func,
        Err(message) => {
            return AiOutcome {
                target_angle: None,
                error: Some(message),
            }
        }
    };

    let state = match lua.to_value(&job.input) {
        Ok(state) => state,
        Err(error) => {
            return AiOutcome {
                target_angle: None,
                error: Some(truncate_error(&error.to_string())),
            }
        }
    };

    let deadline = job.deadline;
    let _ = lua.set_hook(
        HookTriggers::new().every_nth_instruction(HOOK_INSTRUCTION_INTERVAL),
        move |_lua, _debug| {
            if Instant::now() >= deadline {
                Err(mlua::Error::RuntimeError("deadline exceeded".into()))
            } else {
                Ok(())
            }
        },
    );
    let result = move_fn.call::<_, Value>(state);
    lua.remove_hook();

    match result {
        Ok(value) => coerce_steering(&value, job.input.you.x, job.input.you.y),
        Err(error) => {
            let message = error.to_string();
            if message.contains("deadline exceeded") {
                AiOutcome {
                    target_angle: None,
                    error: Some(TIMEOUT_ERROR.to_string()),
                }
            } else {
                AiOutcome {
                    target_angle: None,
                    error: Some(truncate_error(&message)),
                }
            }
        }
    }
}

/// Looks up or compiles the program, returning its `move` entry point. Each
/// compiled program lives in its own environment table, so globals defined by
/// one participant never leak into another sharing the executor.
fn compiled_program<'lua>(
    lua: &'lua Lua,
    programs: &mut HashMap<String, RegistryKey>,
    source: &str,
) -> Result<Function<'lua>, String> {
    if let Some(key) = programs.get(source) {
        return lua
            .registry_value::<Function>(key)
            .map_err(|error| truncate_error(&error.to_string()));
    }

    let compile = || -> mlua::Result<Function<'lua>> {
        let env = program_environment(lua)?;
        let scrubbed = scrub_source(source);
        lua.load(scrubbed.as_str())
            .set_name("move")
            .set_environment(env.clone())
            .exec()?;
        let move_fn: Value = env.get("move")?;
        match move_fn {
            Value::Function(func) => Ok(func),
            _ => Err(mlua::Error::RuntimeError(
                "move(state) is not defined".into(),
            )),
        }
    };

    match compile() {
        Ok(func) => {
            match lua.create_registry_value(func.clone()) {
                Ok(key) => {
                    programs.insert(source.to_string(), key);
                }
                Err(error) => {
                    tracing::warn!(%error, "failed to cache compiled program");
                }
            }
            Ok(func)
        }
        Err(error) => Err(truncate_error(&error.to_string())),
    }
}

/// Builds the sandboxed environment a program compiles into: the safe stdlib
/// subset plus the steering helpers every program gets.
fn program_environment(lua: &Lua) -> mlua::Result<mlua::Table> {
    let env = lua.create_table()?;
    let globals = lua.globals();
    for name in [
        "math", "string", "table", "pairs", "ipairs", "next", "type", "tostring", "tonumber",
        "select", "pcall", "error", "assert",
    ] {
        env.set(name, globals.get::<_, Value>(name)?)?;
    }
    env.set("print", lua.create_function(|_, _: mlua::MultiValue| Ok(()))?)?;
    env.set(
        "angleTo",
        lua.create_function(|_, (x1, y1, x2, y2): (f64, f64, f64, f64)| {
            Ok((y2 - y1).atan2(x2 - x1))
        })?,
    )?;
    env.set(
        "distTo",
        lua.create_function(|_, (x1, y1, x2, y2): (f64, f64, f64, f64)| {
            let dx = x2 - x1;
            let dy = y2 - y1;
            Ok((dx * dx + dy * dy).sqrt())
        })?,
    )?;
    env.set(
        "distFromCenter",
        lua.create_function(|_, (x, y): (f64, f64)| Ok((x * x + y * y).sqrt()))?,
    )?;
    Ok(env)
}

/// Rewrites denylisted identifiers to an inline comment. Purely textual by
/// design; the restricted stdlib does the actual containment.
pub fn scrub_source(source: &str) -> String {
    let mut out = String::with_capacity(source.len());
    let mut chars = source.char_indices().peekable();
    while let Some((start, ch)) = chars.next() {
        if ch.is_ascii_alphabetic() || ch == '_' {
            let mut end = start + ch.len_utf8();
            while let Some(&(index, next)) = chars.peek() {
                if next.is_ascii_alphanumeric() || next == '_' {
                    end = index + next.len_utf8();
                    chars.next();
                } else {
                    break;
                }
            }
            let ident = &source[start..end];
            if DENYLIST.contains(&ident) {
                out.push_str("--[[scrubbed]]");
            } else {
                out.push_str(ident);
            }
        } else {
            out.push(ch);
        }
    }
    out
}

fn coerce_steering(value: &Value, head_x: f64, head_y: f64) -> AiOutcome {
    match value {
        Value::Integer(angle) => AiOutcome {
            target_angle: Some(*angle as f64),
            error: None,
        },
        Value::Number(angle) if angle.is_finite() => AiOutcome {
            target_angle: Some(*angle),
            error: None,
        },
        Value::Table(table) => {
            let x = table.get::<_, Option<f64>>("x").ok().flatten();
            let y = table.get::<_, Option<f64>>("y").ok().flatten();
            match (x, y) {
                (Some(x), Some(y)) if x.is_finite() && y.is_finite() => AiOutcome {
                    target_angle: Some((y - head_y).atan2(x - head_x)),
                    error: None,
                },
                _ => invalid_return(),
            }
        }
        _ => invalid_return(),
    }
}

fn invalid_return() -> AiOutcome {
    AiOutcome {
        target_angle: None,
        error: Some(INVALID_RETURN_ERROR.to_string()),
    }
}

fn truncate_error(message: &str) -> String {
    let flattened = message.lines().next().unwrap_or(message);
    if flattened.len() <= MAX_ERROR_CHARS {
        flattened.to_string()
    } else {
        let mut cut = MAX_ERROR_CHARS;
        while !flattened.is_char_boundary(cut) {
            cut -= 1;
        }
        flattened[..cut].to_string()
    }
}
