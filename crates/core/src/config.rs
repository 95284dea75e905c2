use std::env;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Load .env file (silently ignores if missing).
pub fn load_dotenv() {
    dotenvy::dotenv().ok();
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|s| !s.is_empty())
}

/// Read a profiled env var: tries {PROFILE}_{KEY} first, falls back to {KEY}.
fn profiled_env_opt(profile: &str, key: &str) -> Option<String> {
    if !profile.is_empty() {
        let prefixed = format!("{}_{}", profile, key);
        if let Some(v) = env_opt(&prefixed) {
            return Some(v);
        }
    }
    env_opt(key)
}

fn profiled_env_u64(profile: &str, key: &str, default: u64) -> u64 {
    profiled_env_opt(profile, key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn profiled_env_usize(profile: &str, key: &str, default: usize) -> usize {
    profiled_env_opt(profile, key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

// ── Top-level config ──────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Active profile name (empty = default).
    pub profile: String,
    pub pool: PoolConfig,
    pub logging: LogConfig,
}

/// Well-known env keys that identify a profile when prefixed.
const PROFILE_MARKER_KEYS: &[&str] = &["TASKPOOL_THREADS", "TASKPOOL_LOG"];

impl Config {
    /// Build config from environment variables (call `load_dotenv()` first).
    /// Profile is read from `TASKPOOL_PROFILE` env var. When set (e.g. `PROD`),
    /// every key is first looked up as `{PROFILE}_{KEY}`, falling back to `{KEY}`.
    pub fn from_env() -> Self {
        Self::for_profile(&env_opt("TASKPOOL_PROFILE").unwrap_or_default())
    }

    /// Build config for a specific named profile (empty string = default).
    pub fn for_profile(profile: &str) -> Self {
        let p = profile.to_uppercase();
        let p = p.as_str();
        Self {
            profile: p.to_string(),
            pool: PoolConfig::from_env_profiled(p),
            logging: LogConfig::from_env_profiled(p),
        }
    }

    /// Discover available profiles by scanning env vars for `{PREFIX}_{MARKER_KEY}` patterns.
    /// Always includes "default" (the unprefixed config).
    pub fn available_profiles() -> Vec<String> {
        let mut profiles = std::collections::BTreeSet::new();
        profiles.insert("default".to_string());

        for (key, _) in env::vars() {
            for marker in PROFILE_MARKER_KEYS {
                if let Some(prefix) = key.strip_suffix(&format!("_{}", marker)) {
                    if !prefix.is_empty()
                        && prefix.chars().all(|c| c.is_ascii_uppercase() || c == '_')
                    {
                        profiles.insert(prefix.to_string());
                    }
                }
            }
        }

        profiles.into_iter().collect()
    }

    pub fn profile_label(&self) -> &str {
        if self.profile.is_empty() { "default" } else { &self.profile }
    }

    /// Reject settings that would make the scheduler misbehave at run time.
    pub fn validate(&self) -> Result<(), CoreError> {
        self.pool.validate()
    }

    /// Print a summary for startup logs.
    pub fn log_summary(&self) {
        tracing::info!("Config loaded (profile: {}):", self.profile_label());
        tracing::info!(
            "  pool:        threads={} (resolved {}), high_priority_keep_alive={}s",
            self.pool.worker_threads,
            self.pool.resolved_worker_threads(),
            self.pool.high_priority_keep_alive_secs
        );
        tracing::info!(
            "  batch:       poll={}ms, virtual_stack={}KiB",
            self.pool.batch_poll_interval_ms,
            self.pool.virtual_stack_size_kb
        );
        tracing::info!("  logging:     filter={}", self.logging.filter);
    }

    /// Return the effective configuration as JSON.
    pub fn summary(&self) -> serde_json::Value {
        serde_json::json!({
            "profile": self.profile_label(),
            "pool": {
                "worker_threads": self.pool.worker_threads,
                "resolved_worker_threads": self.pool.resolved_worker_threads(),
                "high_priority_keep_alive_secs": self.pool.high_priority_keep_alive_secs,
                "batch_poll_interval_ms": self.pool.batch_poll_interval_ms,
                "virtual_stack_size_kb": self.pool.virtual_stack_size_kb,
            },
            "logging": { "filter": self.logging.filter },
        })
    }
}

// ── Pool ──────────────────────────────────────────────────────

/// Sizing and timing of the shared worker pools.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Number of normal-priority worker threads. 0 = available parallelism.
    #[serde(default = "default_worker_threads")]
    pub worker_threads: usize,
    /// Idle seconds before an on-demand high-priority thread exits.
    #[serde(default = "default_keep_alive")]
    pub high_priority_keep_alive_secs: u64,
    /// Upper bound on a blocked batch's sleep between re-checks.
    #[serde(default = "default_poll_interval")]
    pub batch_poll_interval_ms: u64,
    /// Stack size of each virtual-pool thread, in KiB.
    #[serde(default = "default_virtual_stack")]
    pub virtual_stack_size_kb: usize,
}

fn default_worker_threads() -> usize { 0 }
fn default_keep_alive() -> u64 { 60 }
fn default_poll_interval() -> u64 { 250 }
fn default_virtual_stack() -> usize { 256 }

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            worker_threads: default_worker_threads(),
            high_priority_keep_alive_secs: default_keep_alive(),
            batch_poll_interval_ms: default_poll_interval(),
            virtual_stack_size_kb: default_virtual_stack(),
        }
    }
}

impl PoolConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            worker_threads: profiled_env_usize(p, "TASKPOOL_THREADS", default_worker_threads()),
            high_priority_keep_alive_secs: profiled_env_u64(
                p,
                "TASKPOOL_HIGH_PRIORITY_KEEP_ALIVE_SECS",
                default_keep_alive(),
            ),
            batch_poll_interval_ms: profiled_env_u64(p, "TASKPOOL_BATCH_POLL_MS", default_poll_interval()),
            virtual_stack_size_kb: profiled_env_usize(
                p,
                "TASKPOOL_VIRTUAL_STACK_KB",
                default_virtual_stack(),
            ),
        }
    }

    /// Config with an explicit normal-pool size and defaults elsewhere.
    pub fn with_threads(worker_threads: usize) -> Self {
        Self {
            worker_threads,
            ..Self::default()
        }
    }

    /// Resolve worker thread count (0 means use available parallelism).
    pub fn resolved_worker_threads(&self) -> usize {
        if self.worker_threads == 0 {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4)
        } else {
            self.worker_threads
        }
    }

    pub fn high_priority_keep_alive(&self) -> Duration {
        Duration::from_secs(self.high_priority_keep_alive_secs)
    }

    pub fn batch_poll_interval(&self) -> Duration {
        Duration::from_millis(self.batch_poll_interval_ms)
    }

    pub fn virtual_stack_size(&self) -> usize {
        self.virtual_stack_size_kb * 1024
    }

    pub fn validate(&self) -> Result<(), CoreError> {
        if self.batch_poll_interval_ms == 0 {
            return Err(CoreError::InvalidConfig(
                "batch_poll_interval_ms must be greater than zero".to_string(),
            ));
        }
        if self.virtual_stack_size_kb == 0 {
            return Err(CoreError::InvalidConfig(
                "virtual_stack_size_kb must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

// ── Logging ───────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// `EnvFilter` directive used when `RUST_LOG` is unset.
    pub filter: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self { filter: "info".to_string() }
    }
}

impl LogConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            filter: profiled_env_opt(p, "TASKPOOL_LOG").unwrap_or_else(|| Self::default().filter),
        }
    }
}
