use serde::Deserialize;

use crate::sandbox::isolate::IsolationStrength;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub execution: ExecutionConfig,
    #[serde(default)]
    pub fetch: FetchConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Maximum accepted HTTP request body size in bytes.
    #[serde(default = "default_request_limit")]
    pub request_limit_bytes: usize,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ExecutionConfig {
    /// V8 heap ceiling per isolate, in megabytes.
    #[serde(default = "default_memory_limit_mb")]
    pub memory_limit_mb: usize,
    /// Synchronous execution timeout in milliseconds.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Maximum submitted code length in characters.
    #[serde(default = "default_max_code_length")]
    pub max_code_length: usize,
    /// Outer budget for async work (in-flight fetches) in milliseconds.
    /// Distinct from, and normally looser than, `timeout_ms`.
    #[serde(default = "default_async_wait_ms")]
    pub async_wait_ms: u64,
    /// How forcibly runaway code is interrupted. See [`IsolationStrength`].
    #[serde(default)]
    pub strength: IsolationStrength,
}

#[derive(Debug, Deserialize, Clone)]
pub struct FetchConfig {
    /// Master switch for the sandbox `fetch` capability.
    #[serde(default = "default_fetch_enabled")]
    pub enabled: bool,
    /// Per-call timeout in milliseconds, independent of the execution budgets.
    #[serde(default = "default_fetch_timeout_ms")]
    pub timeout_ms: u64,
    /// Hostnames sandboxed code may reach. `["*"]` allows everything.
    #[serde(default = "default_allowed_domains")]
    pub allowed_domains: Vec<String>,
    /// Set to true to disable allow-list enforcement entirely.
    #[serde(default = "default_allow_all")]
    pub allow_all_domains: bool,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    3000
}

fn default_request_limit() -> usize {
    1024 * 1024 // 1 MB
}

fn default_memory_limit_mb() -> usize {
    128
}

fn default_timeout_ms() -> u64 {
    10_000
}

fn default_max_code_length() -> usize {
    50_000
}

fn default_async_wait_ms() -> u64 {
    15_000
}

fn default_fetch_enabled() -> bool {
    true
}

fn default_fetch_timeout_ms() -> u64 {
    10_000
}

fn default_allowed_domains() -> Vec<String> {
    vec!["*".to_string()]
}

fn default_allow_all() -> bool {
    false
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            request_limit_bytes: default_request_limit(),
        }
    }
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            memory_limit_mb: default_memory_limit_mb(),
            timeout_ms: default_timeout_ms(),
            max_code_length: default_max_code_length(),
            async_wait_ms: default_async_wait_ms(),
            strength: IsolationStrength::default(),
        }
    }
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            enabled: default_fetch_enabled(),
            timeout_ms: default_fetch_timeout_ms(),
            allowed_domains: default_allowed_domains(),
            allow_all_domains: default_allow_all(),
        }
    }
}

impl FetchConfig {
    /// Checks whether a hostname may be reached by sandboxed code.
    ///
    /// A host is allowed if it equals an allow-listed domain or is a
    /// subdomain of one. `["*"]` or `allow_all_domains = true` disables
    /// enforcement.
    pub fn allows(&self, host: &str) -> bool {
        if self.allow_all_domains {
            return true;
        }
        self.allowed_domains.iter().any(|domain| {
            domain == "*" || host == domain || host.ends_with(&format!(".{domain}"))
        })
    }
}

impl Config {
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        // Expand environment variables like ${JSBOX_PORT}
        let expanded = shellexpand::env(&content)?;
        let config: Config = toml::from_str(&expanded)?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Helper to build a FetchConfig with a specific allow-list
    fn fetch_with_domains(domains: Vec<&str>) -> FetchConfig {
        FetchConfig {
            enabled: true,
            timeout_ms: 10_000,
            allowed_domains: domains.into_iter().map(String::from).collect(),
            allow_all_domains: false,
        }
    }

    // ── allows tests ────────────────────────────────────

    #[test]
    fn test_allows_exact_host() {
        let fetch = fetch_with_domains(vec!["example.com"]);
        assert!(fetch.allows("example.com"));
    }

    #[test]
    fn test_allows_subdomain() {
        let fetch = fetch_with_domains(vec!["example.com"]);
        assert!(fetch.allows("api.example.com"));
        assert!(fetch.allows("a.b.example.com"));
    }

    #[test]
    fn test_allows_rejects_other_hosts() {
        let fetch = fetch_with_domains(vec!["example.com"]);
        assert!(!fetch.allows("evil.com"));
    }

    #[test]
    fn test_allows_rejects_suffix_that_is_not_a_subdomain() {
        let fetch = fetch_with_domains(vec!["example.com"]);
        // Same suffix, different registrable domain → rejected
        assert!(!fetch.allows("notexample.com"));
    }

    #[test]
    fn test_allows_wildcard_entry() {
        let fetch = fetch_with_domains(vec!["*"]);
        assert!(fetch.allows("anything.at.all"));
    }

    #[test]
    fn test_allows_allow_all_flag() {
        let mut fetch = fetch_with_domains(vec![]);
        fetch.allow_all_domains = true;
        assert!(fetch.allows("anything.at.all"));
    }

    #[test]
    fn test_allows_empty_list_rejects_all() {
        let fetch = fetch_with_domains(vec![]);
        assert!(!fetch.allows("example.com"));
    }

    #[test]
    fn test_allows_multiple_domains() {
        let fetch = fetch_with_domains(vec!["example.com", "httpbin.org"]);
        assert!(fetch.allows("httpbin.org"));
        assert!(fetch.allows("eu.httpbin.org"));
        assert!(!fetch.allows("example.org"));
    }

    // ── load / defaults tests ───────────────────────────

    #[test]
    fn test_defaults_match_deployment_profile() {
        let config = Config::default();
        assert_eq!(config.server.port, 3000);
        assert_eq!(config.execution.memory_limit_mb, 128);
        assert_eq!(config.execution.timeout_ms, 10_000);
        assert_eq!(config.execution.max_code_length, 50_000);
        assert_eq!(config.execution.async_wait_ms, 15_000);
        assert!(config.fetch.enabled);
        assert_eq!(config.fetch.allowed_domains, vec!["*".to_string()]);
    }

    #[test]
    fn test_load_partial_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("jsbox.toml");
        std::fs::write(
            &path,
            "[execution]\ntimeout_ms = 2000\n\n[fetch]\nallowed_domains = [\"example.com\"]\n",
        )
        .unwrap();

        let config = Config::load(path.to_str().unwrap()).unwrap();
        assert_eq!(config.execution.timeout_ms, 2000);
        // Untouched sections keep their defaults
        assert_eq!(config.execution.memory_limit_mb, 128);
        assert_eq!(config.server.port, 3000);
        assert_eq!(config.fetch.allowed_domains, vec!["example.com".to_string()]);
    }

    #[test]
    fn test_load_expands_env_vars() {
        std::env::set_var("JSBOX_TEST_HOST", "127.0.0.1");
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("jsbox.toml");
        std::fs::write(&path, "[server]\nhost = \"${JSBOX_TEST_HOST}\"\n").unwrap();

        let config = Config::load(path.to_str().unwrap()).unwrap();
        assert_eq!(config.server.host, "127.0.0.1");
    }
}
