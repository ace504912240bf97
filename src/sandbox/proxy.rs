//! Network Proxy — mediated outbound HTTP for sandboxed code.
//!
//! Every `fetch` from inside an isolate lands here. The proxy enforces
//! the enabled flag, the domain allow-list, and a per-call timeout that
//! is independent of the execution budgets. All outcomes — success,
//! disabled, not-allowed, timeout, transport error — are plain values;
//! the sandbox side of the bridge decides what becomes an exception.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::FetchConfig;

/// HTTP connect timeout in seconds.
const CONNECT_TIMEOUT_SECS: u64 = 10;

/// Maximum redirects followed per call.
const MAX_REDIRECTS: usize = 5;

/// User-Agent header sent with proxied requests.
const USER_AGENT: &str = "jsbox/0.2 (sandboxed fetch proxy)";

/// The value returned across the trust boundary for every fetch call.
/// Serialized to JSON as-is; a present `error` field is what the sandbox
/// wrapper turns into a thrown `Error`.
#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum FetchOutcome {
    Success {
        ok: bool,
        status: u16,
        #[serde(rename = "statusText")]
        status_text: String,
        headers: HashMap<String, String>,
        body: String,
    },
    Failure {
        ok: bool,
        status: u16,
        error: String,
    },
}

impl FetchOutcome {
    fn failure(status: u16, error: String) -> Self {
        FetchOutcome::Failure { ok: false, status, error }
    }
}

/// Request options accepted from the sandbox. Anything else in the
/// options object is ignored.
#[derive(Debug, Default, Deserialize)]
struct FetchOptions {
    #[serde(default)]
    method: Option<String>,
    #[serde(default)]
    headers: Option<HashMap<String, String>>,
    #[serde(default)]
    body: Option<String>,
}

/// Executes outbound requests on behalf of sandboxed code.
pub struct FetchProxy {
    client: reqwest::Client,
    config: FetchConfig,
    /// Requests actually handed to the network. Denied and disabled
    /// calls never increment this.
    requests_issued: AtomicU64,
}

impl FetchProxy {
    pub fn new(config: FetchConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
            .user_agent(USER_AGENT)
            .redirect(reqwest::redirect::Policy::limited(MAX_REDIRECTS))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            client,
            config,
            requests_issued: AtomicU64::new(0),
        }
    }

    /// Number of requests that reached the network layer.
    pub fn issued(&self) -> u64 {
        self.requests_issued.load(Ordering::Relaxed)
    }

    /// Validates and executes one fetch call. Never returns an error:
    /// every failure mode is folded into a [`FetchOutcome`] value.
    pub async fn fetch(&self, url: &str, options_json: &str) -> FetchOutcome {
        if !self.config.enabled {
            return FetchOutcome::failure(403, "fetch API is disabled".to_string());
        }

        let parsed = match url::Url::parse(url) {
            Ok(parsed) => parsed,
            Err(e) => return FetchOutcome::failure(0, format!("invalid URL: {e}")),
        };

        let host = match parsed.host_str() {
            Some(host) => host,
            None => return FetchOutcome::failure(0, "URL has no host".to_string()),
        };

        if !self.config.allows(host) {
            warn!(host, "fetch denied by allow-list");
            return FetchOutcome::failure(
                403,
                format!(
                    "host {host} is not in the allow-list; allowed domains: {}",
                    self.config.allowed_domains.join(", ")
                ),
            );
        }

        let options: FetchOptions = if options_json.is_empty() {
            FetchOptions::default()
        } else {
            match serde_json::from_str(options_json) {
                Ok(options) => options,
                Err(e) => return FetchOutcome::failure(0, format!("invalid fetch options: {e}")),
            }
        };

        let method = match options.method.as_deref() {
            None => reqwest::Method::GET,
            Some(m) => match m.to_uppercase().parse() {
                Ok(m) => m,
                Err(_) => return FetchOutcome::failure(0, format!("invalid method: {m}")),
            },
        };

        debug!(%method, url, "issuing proxied fetch");
        self.requests_issued.fetch_add(1, Ordering::Relaxed);

        let mut request = self.client.request(method, parsed);
        if let Some(headers) = options.headers {
            for (name, value) in headers {
                request = request.header(name, value);
            }
        }
        if let Some(body) = options.body {
            request = request.body(body);
        }

        // The client timeout covers the whole call including body read;
        // the outer timeout is a backstop in case the builder fell back
        // to a default client above.
        let budget = Duration::from_millis(self.config.timeout_ms);
        match tokio::time::timeout(budget, self.execute(request)).await {
            Ok(outcome) => outcome,
            Err(_) => FetchOutcome::failure(
                0,
                format!("request timed out after {}ms", self.config.timeout_ms),
            ),
        }
    }

    async fn execute(&self, request: reqwest::RequestBuilder) -> FetchOutcome {
        let response = match request.send().await {
            Ok(response) => response,
            Err(e) if e.is_timeout() => {
                return FetchOutcome::failure(
                    0,
                    format!("request timed out after {}ms", self.config.timeout_ms),
                )
            }
            Err(e) => return FetchOutcome::failure(0, format!("request failed: {e}")),
        };

        let status = response.status();
        let headers = response
            .headers()
            .iter()
            .map(|(name, value)| {
                (
                    name.to_string(),
                    value.to_str().unwrap_or_default().to_string(),
                )
            })
            .collect();

        // Buffer the full body as text; the sandbox-side text()/json()
        // accessors replay this buffer.
        let body = match response.text().await {
            Ok(body) => body,
            Err(e) => return FetchOutcome::failure(0, format!("failed to read body: {e}")),
        };

        FetchOutcome::Success {
            ok: status.is_success(),
            status: status.as_u16(),
            status_text: status.canonical_reason().unwrap_or_default().to_string(),
            headers,
            body,
        }
    }
}
