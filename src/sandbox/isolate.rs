//! Isolation Manager — lifecycle of one execution environment.
//!
//! One [`Isolate`] per request: fresh heap, fresh global scope, fresh
//! capability bindings, destroyed exactly once no matter how execution
//! ends. The isolate is `!Send` (it wraps a V8 isolate) and lives its
//! whole life on the executor's dedicated thread.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use deno_core::{v8, JsRuntime, PollEventLoopOptions, RuntimeOptions};
use serde::Deserialize;
use tracing::{debug, warn};

use super::bridge::{jsbox_bridge, SharedBridge, BOOTSTRAP_JS};
use super::proxy::FetchProxy;
use super::SandboxError;

/// How forcibly runaway code is interrupted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IsolationStrength {
    /// A watchdog thread terminates V8 execution mid-flight when the
    /// wall-clock budget elapses. Handles CPU-bound infinite loops.
    #[default]
    Hard,
    /// No interruption at the configured budget: a tight synchronous
    /// loop can exceed the wall-clock budget and still complete. A far
    /// backstop (a generous multiple of the budget) still terminates
    /// code that would otherwise run forever, and memory limits remain
    /// enforced.
    Cooperative,
}

/// Observable isolate lifecycle counters. Shared across executions;
/// used by tests to prove that rejected requests never create an
/// isolate and that every created isolate is disposed exactly once.
#[derive(Debug, Default)]
pub struct IsolateProbe {
    created: AtomicU64,
    disposed: AtomicU64,
}

impl IsolateProbe {
    pub fn created(&self) -> u64 {
        self.created.load(Ordering::SeqCst)
    }

    pub fn disposed(&self) -> u64 {
        self.disposed.load(Ordering::SeqCst)
    }
}

/// State for the near-heap-limit callback.
struct HeapLimitState {
    handle: v8::IsolateHandle,
    /// AtomicBool so the callback can work through a shared reference,
    /// even if V8 were to invoke it re-entrantly.
    triggered: AtomicBool,
}

/// V8 near-heap-limit callback. Terminates execution and grants 1 MB of
/// grace so the termination can propagate cleanly instead of aborting
/// the whole process.
extern "C" fn near_heap_limit_callback(
    data: *mut std::ffi::c_void,
    current_heap_limit: usize,
    _initial_heap_limit: usize,
) -> usize {
    // SAFETY: `data` points to the Box<HeapLimitState> owned by the
    // Isolate. The Isolate drops its JsRuntime (and joins any watchdog)
    // before the state, and V8 only invokes this callback while the
    // runtime is executing, so the pointer is always live here.
    let state = unsafe { &*(data as *const HeapLimitState) };
    if !state.triggered.swap(true, Ordering::SeqCst) {
        state.handle.terminate_execution();
    }
    current_heap_limit + 1024 * 1024
}

/// A running watchdog for one execution. Must be cancelled before the
/// isolate is disposed so the `IsolateHandle` it holds stays valid.
pub struct Watchdog {
    cancel: std::sync::mpsc::Sender<()>,
    thread: Option<std::thread::JoinHandle<()>>,
    fired: Arc<AtomicBool>,
}

impl Watchdog {
    /// True once the watchdog has terminated execution.
    pub fn fired(&self) -> bool {
        self.fired.load(Ordering::SeqCst)
    }

    /// Stops the watchdog, waits for its thread to exit, and reports
    /// whether it fired before being cancelled.
    pub fn cancel(mut self) -> bool {
        let _ = self.cancel.send(());
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
        self.fired.load(Ordering::SeqCst)
    }
}

/// One request's execution environment: a fresh `JsRuntime` with an
/// enforced heap ceiling and the host bridge ops registered. Never
/// reused; disposed exactly once.
pub struct Isolate {
    runtime: Option<JsRuntime>,
    heap_state: Box<HeapLimitState>,
    probe: Arc<IsolateProbe>,
}

impl Isolate {
    /// Allocates a fresh environment with `memory_limit_mb` of heap.
    /// Exceeding the ceiling mid-execution terminates that execution
    /// only; concurrent isolates are unaffected.
    pub fn create(memory_limit_mb: usize, probe: Arc<IsolateProbe>) -> Self {
        let create_params =
            v8::CreateParams::default().heap_limits(0, memory_limit_mb * 1024 * 1024);

        let mut runtime = JsRuntime::new(RuntimeOptions {
            extensions: vec![jsbox_bridge::init_ops()],
            create_params: Some(create_params),
            ..Default::default()
        });

        let heap_state = Box::new(HeapLimitState {
            handle: runtime.v8_isolate().thread_safe_handle(),
            triggered: AtomicBool::new(false),
        });
        runtime.v8_isolate().add_near_heap_limit_callback(
            near_heap_limit_callback,
            &*heap_state as *const HeapLimitState as *mut std::ffi::c_void,
        );

        probe.created.fetch_add(1, Ordering::SeqCst);
        debug!(memory_limit_mb, "isolate created");

        Self {
            runtime: Some(runtime),
            heap_state,
            probe,
        }
    }

    /// Installs the host bridge into the isolate's global scope. Runs
    /// before any user code, so user code sees a fixed, pre-populated
    /// environment: `console`, `fetch`, timers, and the standard value
    /// globals only.
    pub fn bind_capabilities(
        &mut self,
        bridge: SharedBridge,
        fetch: Arc<FetchProxy>,
    ) -> Result<(), SandboxError> {
        let runtime = self.runtime.as_mut().ok_or(SandboxError::Disposed)?;
        {
            let op_state = runtime.op_state();
            let mut op_state = op_state.borrow_mut();
            op_state.put(bridge);
            op_state.put(fetch);
        }
        runtime
            .execute_script("[jsbox:bootstrap]", BOOTSTRAP_JS)
            .map_err(|e| SandboxError::Setup(e.to_string()))?;
        Ok(())
    }

    /// Compiles and runs a script to its first suspension point.
    pub fn execute(&mut self, name: &'static str, source: String) -> Result<(), SandboxError> {
        let runtime = self.runtime.as_mut().ok_or(SandboxError::Disposed)?;
        runtime
            .execute_script(name, source)
            .map(|_| ())
            .map_err(|e| SandboxError::Js(e.to_string()))
    }

    /// Drives pending async ops (in-flight fetches, settling promises).
    /// Resolves when the isolate has nothing further to do.
    pub async fn drive_event_loop(&mut self) -> Result<(), SandboxError> {
        let runtime = self.runtime.as_mut().ok_or(SandboxError::Disposed)?;
        runtime
            .run_event_loop(PollEventLoopOptions::default())
            .await
            .map_err(|e| SandboxError::Js(e.to_string()))
    }

    /// Arms a watchdog that forcibly terminates execution after
    /// `timeout`. The caller must `cancel()` it before disposal.
    pub fn start_watchdog(&mut self, timeout: Duration) -> Result<Watchdog, SandboxError> {
        let runtime = self.runtime.as_mut().ok_or(SandboxError::Disposed)?;
        let handle = runtime.v8_isolate().thread_safe_handle();
        let fired = Arc::new(AtomicBool::new(false));
        let fired_flag = fired.clone();
        let (cancel, cancel_rx) = std::sync::mpsc::channel::<()>();

        let thread = std::thread::spawn(move || {
            if let Err(std::sync::mpsc::RecvTimeoutError::Timeout) =
                cancel_rx.recv_timeout(timeout)
            {
                fired_flag.store(true, Ordering::SeqCst);
                handle.terminate_execution();
            }
        });

        Ok(Watchdog {
            cancel,
            thread: Some(thread),
            fired,
        })
    }

    /// True once the heap ceiling was hit and execution terminated.
    pub fn heap_limit_hit(&self) -> bool {
        self.heap_state.triggered.load(Ordering::SeqCst)
    }

    /// Tears the environment down. Idempotent and safe to call on a
    /// partially set up isolate; the first call drops the runtime and
    /// counts the disposal, later calls do nothing.
    pub fn dispose(&mut self) {
        if let Some(runtime) = self.runtime.take() {
            drop(runtime);
            self.probe.disposed.fetch_add(1, Ordering::SeqCst);
            debug!("isolate disposed");
        }
    }
}

impl Drop for Isolate {
    /// Backstop for exit paths that bypass an explicit `dispose()`.
    fn drop(&mut self) {
        if self.runtime.is_some() {
            warn!("isolate dropped without explicit disposal");
            self.dispose();
        }
    }
}
