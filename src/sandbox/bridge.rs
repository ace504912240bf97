//! Host Bridge — the capability surface exposed into an isolate.
//!
//! Sandboxed code talks to the host exclusively through the named ops
//! registered here: `console` logging, `console.time`/`timeEnd`, a
//! completion signal, and a mediated `fetch`. Every call crosses the
//! trust boundary as plain string data; argument formatting happens on
//! the sandbox side (see [`BOOTSTRAP_JS`]), so the host never touches a
//! live guest value, let alone executes one.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use std::sync::Arc;
use std::time::Instant;

use deno_core::{op2, OpState};
use serde::Serialize;

use super::proxy::FetchProxy;

/// Console entry categories, mirrored in the response JSON.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogKind {
    Log,
    Warn,
    Info,
    Error,
    Table,
}

impl LogKind {
    /// Kinds arrive as strings from the bootstrap script; anything
    /// unexpected degrades to `log` rather than dropping the entry.
    fn parse(s: &str) -> Self {
        match s {
            "warn" => LogKind::Warn,
            "info" => LogKind::Info,
            "error" => LogKind::Error,
            "table" => LogKind::Table,
            _ => LogKind::Log,
        }
    }
}

/// One captured console emission. Insertion order is significant and is
/// preserved in the response.
#[derive(Debug, Clone, Serialize)]
pub struct LogEntry {
    #[serde(rename = "type")]
    pub kind: LogKind,
    pub content: String,
    /// Epoch milliseconds at emission time.
    pub timestamp: i64,
}

/// Per-execution bridge state: the ordered log sequence, the error
/// sequence, the timer table, and the completion flag. Lives exactly as
/// long as its isolate and is never shared between requests.
#[derive(Default)]
pub struct BridgeState {
    pub logs: Vec<LogEntry>,
    pub errors: Vec<LogEntry>,
    timers: HashMap<String, Instant>,
    pub completed: bool,
}

impl BridgeState {
    /// Appends a log entry. `error`-kind entries go to both the ordered
    /// log sequence and the separate error sequence.
    pub fn push(&mut self, kind: LogKind, content: String) {
        let entry = LogEntry {
            kind,
            content,
            timestamp: chrono::Utc::now().timestamp_millis(),
        };
        if kind == LogKind::Error {
            self.errors.push(entry.clone());
        }
        self.logs.push(entry);
    }

    fn time_start(&mut self, label: String) {
        self.timers.insert(label, Instant::now());
    }

    /// Emits `"<label>: <elapsed>ms"` and forgets the label. Unknown
    /// labels are a no-op, not an error.
    fn time_end(&mut self, label: &str) {
        if let Some(start) = self.timers.remove(label) {
            let elapsed = start.elapsed().as_millis();
            self.push(LogKind::Log, format!("{label}: {elapsed}ms"));
        }
    }
}

/// Shared handle to the bridge state. The isolate's ops and the executor
/// run on the same thread, so a plain `Rc<RefCell<_>>` is enough.
pub type SharedBridge = Rc<RefCell<BridgeState>>;

#[op2(fast)]
fn op_console_log(state: &mut OpState, #[string] kind: &str, #[string] content: &str) {
    let bridge = state.borrow::<SharedBridge>().clone();
    bridge.borrow_mut().push(LogKind::parse(kind), content.to_string());
}

#[op2(fast)]
fn op_time_start(state: &mut OpState, #[string] label: &str) {
    let bridge = state.borrow::<SharedBridge>().clone();
    bridge.borrow_mut().time_start(label.to_string());
}

#[op2(fast)]
fn op_time_end(state: &mut OpState, #[string] label: &str) {
    let bridge = state.borrow::<SharedBridge>().clone();
    bridge.borrow_mut().time_end(label);
}

#[op2(fast)]
fn op_complete(state: &mut OpState) {
    let bridge = state.borrow::<SharedBridge>().clone();
    bridge.borrow_mut().completed = true;
}

/// Outbound fetch on behalf of sandboxed code. Always resolves to a JSON
/// value string — success or failure — so nothing host-side ever throws
/// across the boundary. The bootstrap script turns failure values into
/// sandbox-visible exceptions.
#[op2(async)]
#[string]
async fn op_fetch(
    state: Rc<RefCell<OpState>>,
    #[string] url: String,
    #[string] options_json: String,
) -> String {
    let proxy = state.borrow().borrow::<Arc<FetchProxy>>().clone();
    let outcome = proxy.fetch(&url, &options_json).await;
    // FetchOutcome has no non-serializable fields; this cannot fail.
    serde_json::to_string(&outcome)
        .unwrap_or_else(|e| format!(r#"{{"ok":false,"status":0,"error":"{e}"}}"#))
}

deno_core::extension!(
    jsbox_bridge,
    ops = [op_console_log, op_time_start, op_time_end, op_complete, op_fetch],
);

/// Runs once in every fresh isolate, before any user code. Installs
/// `console`, `fetch`, and a hidden completion hook into the global
/// scope, capturing the ops in closures, then deletes `globalThis.Deno`
/// so user code sees only the fixed capability table plus the standard
/// value and constructor globals.
///
/// Value formatting and table rendering deliberately live here, on the
/// sandbox side of the boundary: the host only ever receives strings.
pub const BOOTSTRAP_JS: &str = r#"
((ops) => {
  function formatValue(value) {
    if (value === undefined) return 'undefined';
    if (value === null) return 'null';
    if (typeof value === 'string') return value;
    if (typeof value === 'number') return String(value);
    if (typeof value === 'boolean') return String(value);
    if (typeof value === 'function') return value.toString();
    if (typeof value === 'object') {
      try {
        return JSON.stringify(value, null, 2);
      } catch (e) {
        return String(value);
      }
    }
    return String(value);
  }

  function formatTable(data) {
    if (!data) return 'undefined';

    if (Array.isArray(data)) {
      if (data.length === 0) return '[]';

      if (typeof data[0] === 'object' && data[0] !== null) {
        const keys = Object.keys(data[0]);
        const maxWidths = {};

        keys.forEach(key => {
          maxWidths[key] = Math.max(
            key.length,
            ...data.map(item => String(item[key] || '').length)
          );
        });

        const headerRow = keys.map(key => key.padEnd(maxWidths[key])).join(' | ');
        const separator = keys.map(key => '-'.repeat(maxWidths[key])).join('-+-');
        const dataRows = data.map(item =>
          keys.map(key => String(item[key] || '').padEnd(maxWidths[key])).join(' | ')
        );

        return [headerRow, separator, ...dataRows].join('\n');
      }

      return data.map((item, index) => index + ': ' + formatValue(item)).join('\n');
    }

    if (typeof data === 'object') {
      const entries = Object.entries(data);
      if (entries.length === 0) return '{}';

      const maxKeyWidth = Math.max('Key'.length, ...entries.map(([key]) => key.length));
      const maxValueWidth = Math.max('Value'.length, ...entries.map(([, value]) => String(value).length));

      const headerRow = 'Key'.padEnd(maxKeyWidth) + ' | ' + 'Value'.padEnd(maxValueWidth);
      const separator = '-'.repeat(maxKeyWidth) + '-+-' + '-'.repeat(maxValueWidth);
      const dataRows = entries.map(([key, value]) =>
        key.padEnd(maxKeyWidth) + ' | ' + String(value).padEnd(maxValueWidth)
      );

      return [headerRow, separator, ...dataRows].join('\n');
    }

    return formatValue(data);
  }

  const emit = (kind, args) => {
    ops.op_console_log(kind, args.map(formatValue).join(' '));
  };

  globalThis.console = {
    log: (...args) => emit('log', args),
    error: (...args) => emit('error', args),
    warn: (...args) => emit('warn', args),
    info: (...args) => emit('info', args),
    table: (data) => ops.op_console_log('table', formatTable(data)),
    time: (label = 'default') => ops.op_time_start(String(label)),
    timeEnd: (label = 'default') => ops.op_time_end(String(label)),
  };

  const fetchOp = ops.op_fetch;
  globalThis.fetch = async function(url, options = {}) {
    const resultJson = await fetchOp(String(url), JSON.stringify(options));
    const result = JSON.parse(resultJson);

    if (result.error) {
      throw new Error(result.error);
    }

    // A Response-like object replaying the buffered body
    return {
      ok: result.ok,
      status: result.status,
      statusText: result.statusText,
      headers: result.headers,
      text: async () => result.body,
      json: async () => {
        try {
          return JSON.parse(result.body);
        } catch (e) {
          throw new Error('response body is not valid JSON');
        }
      }
    };
  };

  Object.defineProperty(globalThis, '__jsbox_complete', {
    value: () => ops.op_complete(),
    enumerable: false,
    writable: false,
    configurable: false,
  });

  delete globalThis.Deno;
})(Deno.core.ops);
"#;
