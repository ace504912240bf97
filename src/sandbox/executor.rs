//! Execution Coordinator — runs one request to a terminal outcome.
//!
//! The flow per request: validate input, create an isolate, bind the
//! host bridge, run the wrapped user code, race completion against the
//! async wait budget, collect logs, dispose, map everything to one
//! uniform envelope.
//!
//! V8 isolates are `!Send`, so each execution runs on a dedicated
//! thread with its own single-threaded tokio runtime. The public API is
//! fully async and `Send`-safe; the result comes back over a oneshot
//! channel.

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{debug, warn};

use crate::config::ExecutionConfig;

use super::bridge::{BridgeState, LogEntry, LogKind, SharedBridge};
use super::isolate::{Isolate, IsolateProbe, IsolationStrength};
use super::proxy::FetchProxy;
use super::{SandboxError, ValidationError};

/// Bounded re-check interval for the completion flag while waiting for
/// async work to settle.
const POLL_PERIOD: Duration = Duration::from_millis(100);

/// Cooperative isolation lets the synchronous phase overrun the
/// configured budget, but still terminates at this multiple of it so a
/// tight `while (true)` cannot pin the sandbox thread forever.
const COOPERATIVE_BACKSTOP_FACTOR: u64 = 10;

/// The uniform response envelope. Completed and budget-exhausted
/// executions both report `success: true` (the call was served, partial
/// results are still useful); only pre-run failures — isolate setup or
/// compilation — report `success: false`.
#[derive(Debug, Serialize)]
pub struct ExecutionResult {
    pub success: bool,
    /// Always the string `"undefined"`: the async wrapper swallows the
    /// completion value.
    pub result: String,
    pub logs: Vec<LogEntry>,
    pub errors: Vec<LogEntry>,
    #[serde(rename = "error", skip_serializing_if = "Option::is_none")]
    pub top_level_error: Option<String>,
}

impl ExecutionResult {
    fn completed(logs: Vec<LogEntry>, errors: Vec<LogEntry>) -> Self {
        Self {
            success: true,
            result: "undefined".to_string(),
            logs,
            errors,
            top_level_error: None,
        }
    }

    fn failed(message: String) -> Self {
        Self {
            success: false,
            result: "undefined".to_string(),
            logs: Vec::new(),
            errors: Vec::new(),
            top_level_error: Some(message),
        }
    }
}

/// Orchestrates sandboxed executions. Cheap to share behind an `Arc`;
/// holds no per-request state.
pub struct Executor {
    config: ExecutionConfig,
    fetch: Arc<FetchProxy>,
    probe: Arc<IsolateProbe>,
}

impl Executor {
    pub fn new(config: ExecutionConfig, fetch: Arc<FetchProxy>) -> Self {
        Self {
            config,
            fetch,
            probe: Arc::new(IsolateProbe::default()),
        }
    }

    /// Isolate lifecycle counters, shared across all executions.
    pub fn probe(&self) -> Arc<IsolateProbe> {
        self.probe.clone()
    }

    /// Runs one snippet to a terminal outcome. `Err` is returned only
    /// for pre-sandbox validation failures; every in-sandbox failure
    /// mode is folded into the `ExecutionResult` envelope.
    pub async fn execute(&self, code: &str) -> Result<ExecutionResult, ValidationError> {
        if code.is_empty() {
            return Err(ValidationError::Empty);
        }
        // The limit is in characters, not bytes
        if code.chars().count() > self.config.max_code_length {
            return Err(ValidationError::TooLong {
                max: self.config.max_code_length,
            });
        }

        debug!(code_len = code.len(), "starting sandboxed execution");

        let config = self.config.clone();
        let code = code.to_string();
        let fetch = self.fetch.clone();
        let probe = self.probe.clone();

        // V8 isolates are !Send — run everything on a dedicated thread
        let (tx, rx) = tokio::sync::oneshot::channel();
        std::thread::spawn(move || {
            let rt = match tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
            {
                Ok(rt) => rt,
                Err(e) => {
                    let _ = tx.send(ExecutionResult::failed(format!(
                        "failed to build sandbox runtime: {e}"
                    )));
                    return;
                }
            };
            let result = rt.block_on(run_request(config, code, fetch, probe));
            if tx.send(result).is_err() {
                warn!("execution result receiver dropped before the result was sent");
            }
        });

        Ok(rx
            .await
            .unwrap_or_else(|_| ExecutionResult::failed("sandbox thread panicked".to_string())))
    }
}

/// Wraps user code so that a top-level throw becomes a structured error
/// log rather than an unhandled failure, and so that the completion
/// signal fires on every path out of the user's code.
fn wrap_user_code(code: &str) -> String {
    format!(
        "(async function() {{\n\
         try {{\n\
         {code}\n\
         }} catch (error) {{\n\
         console.error(error.message || String(error));\n\
         }} finally {{\n\
         __jsbox_complete();\n\
         }}\n\
         }})();"
    )
}

/// One request, on the sandbox thread: isolate creation through
/// disposal. Disposal runs on every exit path; the `Drop` impl on
/// [`Isolate`] backstops the paths this function cannot see (panics).
async fn run_request(
    config: ExecutionConfig,
    code: String,
    fetch: Arc<FetchProxy>,
    probe: Arc<IsolateProbe>,
) -> ExecutionResult {
    let bridge: SharedBridge = Rc::new(RefCell::new(BridgeState::default()));
    let mut isolate = Isolate::create(config.memory_limit_mb, probe);

    if let Err(e) = isolate.bind_capabilities(bridge.clone(), fetch) {
        isolate.dispose();
        return ExecutionResult::failed(e.to_string());
    }

    // Hard isolation interrupts the synchronous phase at the configured
    // budget; cooperative isolation only at a far backstop.
    let sync_budget_ms = match config.strength {
        IsolationStrength::Hard => config.timeout_ms,
        IsolationStrength::Cooperative => {
            config.timeout_ms.saturating_mul(COOPERATIVE_BACKSTOP_FACTOR)
        }
    };
    let watchdog = match isolate.start_watchdog(Duration::from_millis(sync_budget_ms)) {
        Ok(watchdog) => watchdog,
        Err(e) => {
            isolate.dispose();
            return ExecutionResult::failed(e.to_string());
        }
    };

    // ── Running: the synchronous phase of the wrapped code ─────────
    let sync_error = isolate.execute("[jsbox:user]", wrap_user_code(&code)).err();

    // The watchdog bounds only the synchronous phase. Cancel it before
    // awaiting async work, so an in-flight fetch or a slow promise gets
    // the full wait budget even when it is looser than the sync timeout.
    let timed_out = watchdog.cancel();

    // ── AwaitingCompletion: race the completion flag against the
    // async wait budget, driving the event loop in bounded slices ──
    let mut async_error: Option<SandboxError> = None;
    if sync_error.is_none() {
        let deadline = Instant::now() + Duration::from_millis(config.async_wait_ms);
        while !bridge.borrow().completed && Instant::now() < deadline {
            match tokio::time::timeout(POLL_PERIOD, isolate.drive_event_loop()).await {
                Ok(Ok(())) => {
                    if bridge.borrow().completed {
                        break;
                    }
                    // Event loop is idle but the flag never fired: the
                    // code parked on a promise nothing will settle.
                    // Keep re-checking until the budget decides.
                    tokio::time::sleep(POLL_PERIOD).await;
                }
                Ok(Err(e)) => {
                    async_error = Some(e);
                    break;
                }
                Err(_) => {} // slice elapsed; re-check flag and budget
            }
        }
    }

    let heap_hit = isolate.heap_limit_hit();

    // Compile failures (nothing of the user's code ever ran) surface as
    // a single top-level error. Terminations are classified below
    // instead: the script error they produce is a side effect.
    if !heap_hit && !timed_out {
        if let Some(e) = sync_error {
            isolate.dispose();
            return ExecutionResult::failed(e.to_string());
        }
    }

    {
        let mut state = bridge.borrow_mut();
        if heap_hit {
            state.push(
                LogKind::Error,
                format!("memory limit exceeded ({} MB)", config.memory_limit_mb),
            );
            state.completed = true;
        } else if timed_out {
            state.push(
                LogKind::Error,
                format!("execution timed out after {sync_budget_ms}ms"),
            );
            state.completed = true;
        } else if let Some(e) = async_error {
            state.push(LogKind::Error, e.to_string());
            state.completed = true;
        }

        if !state.completed {
            let budget_secs = config.async_wait_ms as f64 / 1000.0;
            warn!(budget_secs, "async wait budget exhausted");
            state.push(
                LogKind::Warn,
                format!("execution may not have completed (exceeded {budget_secs}s wait budget)"),
            );
        }
    }

    isolate.dispose();

    let state = bridge.borrow();
    ExecutionResult::completed(state.logs.clone(), state.errors.clone())
}
