use std::env;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{PoolError, PoolResult};

/// Load .env file (silently ignores if missing).
pub fn load_dotenv() {
    dotenvy::dotenv().ok();
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|s| !s.is_empty())
}

fn env_parsed<T: std::str::FromStr>(key: &str) -> Option<T> {
    env_opt(key).and_then(|v| v.trim().parse().ok())
}

/// Worker pool configuration, typically parsed from TOML.
///
/// Parsing never validates: a bad pool size is only reported when the
/// pool is first provisioned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Prefix for worker thread names and log fields.
    #[serde(default = "default_name")]
    pub name: String,
    /// Number of workers. `None` = half the available parallelism.
    #[serde(default)]
    pub size: Option<usize>,
    /// Per-task deadline in milliseconds, measured from submission.
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    /// Auxiliary references packaged alongside the task function, in order.
    #[serde(default)]
    pub dependencies: Vec<String>,
    /// Terminal task records kept around for status lookups.
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,
}

fn default_name() -> String {
    "workhorse".to_string()
}

fn default_history_limit() -> usize {
    1024
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            size: None,
            timeout_ms: None,
            dependencies: Vec::new(),
            history_limit: default_history_limit(),
        }
    }
}

impl PoolConfig {
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_size(mut self, size: usize) -> Self {
        self.size = Some(size);
        self
    }

    /// Sub-millisecond remainders round up, so only `Duration::ZERO` maps
    /// to the rejected `timeout_ms = 0`.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        let ms = timeout.as_nanos().div_ceil(1_000_000);
        self.timeout_ms = Some(u64::try_from(ms).unwrap_or(u64::MAX));
        self
    }

    pub fn with_dependencies<I, S>(mut self, deps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dependencies = deps.into_iter().map(Into::into).collect();
        self
    }

    /// Resolve the worker count. An explicit size is returned as-is (even 0);
    /// the default is half the available parallelism, never below 1.
    pub fn resolved_size(&self) -> usize {
        match self.size {
            Some(size) => size,
            None => {
                let cpus = std::thread::available_parallelism()
                    .map(|n| n.get())
                    .unwrap_or(2);
                (cpus / 2).max(1)
            }
        }
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }

    /// Check the settings that are fatal at provisioning time.
    pub fn validate(&self) -> PoolResult<()> {
        if self.resolved_size() < 1 {
            return Err(PoolError::Configuration(
                "pool size must be greater than 0".to_string(),
            ));
        }
        if self.timeout_ms == Some(0) {
            return Err(PoolError::Configuration(
                "timeout_ms must be greater than 0 when set".to_string(),
            ));
        }
        if let Some(pos) = self.dependencies.iter().position(|d| d.trim().is_empty()) {
            return Err(PoolError::Configuration(format!("dependency #{pos} is empty")));
        }
        Ok(())
    }

    /// Parse config from a TOML string.
    pub fn from_toml(toml_str: &str) -> PoolResult<Self> {
        Ok(toml::from_str(toml_str)?)
    }

    /// Load config from a file path.
    pub fn from_file(path: impl AsRef<Path>) -> PoolResult<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml(&content)
    }

    /// Defaults with environment overrides applied (call `load_dotenv()` first).
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env_overrides();
        config
    }

    /// Load from an optional file, then apply environment overrides.
    pub fn load(path: Option<&Path>) -> PoolResult<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env_overrides();
        Ok(config)
    }

    // ── Environment variable overrides ──────────────────────────────

    /// Apply environment variable overrides.
    ///
    /// Convention: `WORKHORSE_<KEY>` overrides `<key>`:
    /// - `WORKHORSE_POOL_NAME` -> `name`
    /// - `WORKHORSE_POOL_SIZE` -> `size`
    /// - `WORKHORSE_TIMEOUT_MS` -> `timeout_ms`
    /// - `WORKHORSE_DEPENDENCIES` -> `dependencies` (comma separated)
    /// - `WORKHORSE_HISTORY_LIMIT` -> `history_limit`
    pub fn apply_env_overrides(&mut self) {
        if let Some(v) = env_opt("WORKHORSE_POOL_NAME") {
            self.name = v;
        }
        if let Some(size) = env_parsed::<usize>("WORKHORSE_POOL_SIZE") {
            self.size = Some(size);
        }
        if let Some(ms) = env_parsed::<u64>("WORKHORSE_TIMEOUT_MS") {
            self.timeout_ms = Some(ms);
        }
        if let Some(v) = env_opt("WORKHORSE_DEPENDENCIES") {
            self.dependencies = v.split(',').map(|d| d.trim().to_string()).collect();
        }
        if let Some(limit) = env_parsed::<usize>("WORKHORSE_HISTORY_LIMIT") {
            self.history_limit = limit;
        }
    }

    /// Print a one-line summary for startup logs.
    pub fn log_summary(&self) {
        tracing::info!(
            pool = %self.name,
            size = self.resolved_size(),
            timeout_ms = ?self.timeout_ms,
            dependencies = self.dependencies.len(),
            "pool config loaded"
        );
    }

    /// JSON view for reports.
    pub fn summary(&self) -> serde_json::Value {
        serde_json::json!({
            "name": self.name,
            "size": self.resolved_size(),
            "timeout_ms": self.timeout_ms,
            "dependencies": self.dependencies,
            "history_limit": self.history_limit,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let cfg = PoolConfig::default();
        assert_eq!(cfg.name, "workhorse");
        assert_eq!(cfg.size, None);
        assert_eq!(cfg.timeout_ms, None);
        assert!(cfg.dependencies.is_empty());
        assert_eq!(cfg.history_limit, 1024);
        assert!(cfg.resolved_size() >= 1);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn parse_full_toml() {
        let toml = r#"
name = "render"
size = 3
timeout_ms = 250
dependencies = ["libm", "lookup-tables"]
history_limit = 10
"#;
        let cfg = PoolConfig::from_toml(toml).unwrap();
        assert_eq!(cfg.name, "render");
        assert_eq!(cfg.resolved_size(), 3);
        assert_eq!(cfg.timeout(), Some(Duration::from_millis(250)));
        assert_eq!(cfg.dependencies, vec!["libm", "lookup-tables"]);
        assert_eq!(cfg.history_limit, 10);
    }

    #[test]
    fn zero_size_parses_but_fails_validation() {
        let cfg = PoolConfig::from_toml("size = 0").unwrap();
        assert_eq!(cfg.resolved_size(), 0);
        let err = cfg.validate().unwrap_err();
        assert!(matches!(err, PoolError::Configuration(_)));
    }

    #[test]
    fn zero_timeout_rejected() {
        let cfg = PoolConfig::default().with_size(1).with_timeout(Duration::ZERO);
        assert!(matches!(cfg.validate(), Err(PoolError::Configuration(_))));
    }

    #[test]
    fn sub_millisecond_timeout_rounds_up() {
        let cfg = PoolConfig::default()
            .with_size(1)
            .with_timeout(Duration::from_micros(500));
        assert_eq!(cfg.timeout_ms, Some(1));
        assert!(cfg.validate().is_ok());

        let cfg = PoolConfig::default().with_timeout(Duration::from_micros(1500));
        assert_eq!(cfg.timeout(), Some(Duration::from_millis(2)));
        let cfg = PoolConfig::default().with_timeout(Duration::from_millis(250));
        assert_eq!(cfg.timeout_ms, Some(250));
    }

    #[test]
    fn empty_dependency_rejected() {
        let cfg = PoolConfig::default().with_dependencies(["a", " "]);
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("dependency #1"));
    }

    #[test]
    fn bad_toml_is_parse_error() {
        let err = PoolConfig::from_toml("size = \"many\"").unwrap_err();
        assert!(matches!(err, PoolError::ConfigParse(_)));
    }

    #[test]
    fn missing_file_is_io_error() {
        let err = PoolConfig::from_file("/nonexistent/workhorse.toml").unwrap_err();
        assert!(matches!(err, PoolError::ConfigIo(_)));
    }

    #[test]
    fn env_overrides() {
        std::env::set_var("WORKHORSE_POOL_SIZE", "7");
        std::env::set_var("WORKHORSE_TIMEOUT_MS", "1500");
        std::env::set_var("WORKHORSE_DEPENDENCIES", "a, b");

        let cfg = PoolConfig::from_env();
        assert_eq!(cfg.size, Some(7));
        assert_eq!(cfg.timeout_ms, Some(1500));
        assert_eq!(cfg.dependencies, vec!["a", "b"]);

        std::env::remove_var("WORKHORSE_POOL_SIZE");
        std::env::remove_var("WORKHORSE_TIMEOUT_MS");
        std::env::remove_var("WORKHORSE_DEPENDENCIES");
    }

    #[test]
    fn summary_reports_resolved_size() {
        let cfg = PoolConfig::default().with_name("demo").with_size(2);
        let summary = cfg.summary();
        assert_eq!(summary["name"], "demo");
        assert_eq!(summary["size"], 2);
    }
}
