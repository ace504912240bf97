//! Sandboxed JavaScript execution engine.
//!
//! Every request gets a brand new V8 isolate. No state leaks between
//! executions. The only bridge to the host is a fixed set of named ops:
//! console logging, timers, a completion signal, and a mediated fetch.
//!
//! Module layout:
//! - [`bridge`] — the host capabilities injected into an isolate
//! - [`proxy`] — outbound fetch on behalf of sandboxed code
//! - [`isolate`] — isolate lifecycle: limits, interruption, disposal
//! - [`executor`] — one request end-to-end, from validation to envelope

pub mod bridge;
pub mod executor;
pub mod isolate;
pub mod proxy;

pub use bridge::{LogEntry, LogKind};
pub use executor::{ExecutionResult, Executor};
pub use isolate::{IsolateProbe, IsolationStrength};
pub use proxy::FetchProxy;

/// Errors from inside the engine. These never cross the HTTP boundary
/// directly: the executor folds them into the response envelope.
#[derive(Debug, thiserror::Error)]
pub enum SandboxError {
    #[error("sandbox setup failed: {0}")]
    Setup(String),

    #[error("script error: {0}")]
    Js(String),

    #[error("isolate already disposed")]
    Disposed,
}

/// Pre-sandbox input rejections. Mapped to HTTP 400 by the edge layer;
/// no isolate is created for these.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("code must not be empty")]
    Empty,

    #[error("code exceeds the maximum length ({max} characters)")]
    TooLong { max: usize },
}
