//! Configuration for conveyor processes.
//!
//! Layered resolution: built-in defaults, then an optional TOML file, then
//! `CONVEYOR_*` environment variables (env wins). Nothing here is
//! hard-coded into the engine crates; every process builds its broker,
//! result store, worker pool and beat loop from an explicit [`Config`]
//! value - there is no ambient singleton.

use std::env;
use std::fs;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("parse error: {0}")]
    Parse(String),
    #[error("validation error: {0}")]
    Validation(String),
}

/// What a worker does with in-flight work at shutdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ShutdownMode {
    Drain,
    Abandon,
}

impl FromStr for ShutdownMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "drain" => Ok(Self::Drain),
            "abandon" => Ok(Self::Abandon),
            other => Err(ConfigError::Parse(format!(
                "invalid shutdown mode {other:?} (expected drain or abandon)"
            ))),
        }
    }
}

/// Optional sections as they appear in a config file.
#[derive(Debug, Default, Deserialize)]
pub struct RawConfigFile {
    #[serde(default)]
    pub broker_url: Option<String>,
    #[serde(default)]
    pub result_store_url: Option<String>,
    #[serde(default)]
    pub result_ttl_secs: Option<u64>,
    #[serde(default)]
    pub worker: Option<RawWorkerSection>,
    #[serde(default)]
    pub task: Option<RawTaskSection>,
    #[serde(default)]
    pub beat: Option<RawBeatSection>,
    #[serde(default)]
    pub logging: Option<RawLoggingSection>,
}

#[derive(Debug, Default, Deserialize)]
pub struct RawWorkerSection {
    #[serde(default)]
    pub concurrency: Option<usize>,
    #[serde(default)]
    pub dequeue_timeout_ms: Option<u64>,
    #[serde(default)]
    pub shutdown: Option<ShutdownMode>,
    #[serde(default)]
    pub backoff_initial_ms: Option<u64>,
    #[serde(default)]
    pub backoff_max_ms: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
pub struct RawTaskSection {
    #[serde(default)]
    pub max_attempts: Option<u32>,
    #[serde(default)]
    pub soft_time_limit_secs: Option<u64>,
    #[serde(default)]
    pub hard_time_limit_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
pub struct RawBeatSection {
    #[serde(default)]
    pub tick_ms: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
pub struct RawLoggingSection {
    #[serde(default)]
    pub level: Option<String>,
    #[serde(default)]
    pub json: Option<bool>,
}

/// Concrete worker-pool settings.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WorkerSection {
    pub concurrency: usize,
    pub dequeue_timeout_ms: u64,
    pub shutdown: ShutdownMode,
    pub backoff_initial_ms: u64,
    pub backoff_max_ms: u64,
}

impl WorkerSection {
    pub const fn dequeue_timeout(&self) -> Duration {
        Duration::from_millis(self.dequeue_timeout_ms)
    }

    pub const fn backoff_initial(&self) -> Duration {
        Duration::from_millis(self.backoff_initial_ms)
    }

    pub const fn backoff_max(&self) -> Duration {
        Duration::from_millis(self.backoff_max_ms)
    }
}

/// Per-task execution defaults; individual tasks may override.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskSection {
    pub max_attempts: u32,
    pub soft_time_limit_secs: Option<u64>,
    pub hard_time_limit_secs: Option<u64>,
}

impl TaskSection {
    pub fn soft_time_limit(&self) -> Option<Duration> {
        self.soft_time_limit_secs.map(Duration::from_secs)
    }

    pub fn hard_time_limit(&self) -> Option<Duration> {
        self.hard_time_limit_secs.map(Duration::from_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BeatSection {
    pub tick_ms: u64,
}

impl BeatSection {
    pub const fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LoggingSection {
    pub level: String,
    pub json: bool,
}

/// Fully resolved configuration with defaults applied.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Config {
    pub broker_url: String,
    pub result_store_url: String,
    pub result_ttl_secs: u64,
    pub worker: WorkerSection,
    pub task: TaskSection,
    pub beat: BeatSection,
    pub logging: LoggingSection,
}

impl Config {
    pub const fn result_ttl(&self) -> Duration {
        Duration::from_secs(self.result_ttl_secs)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            broker_url: "memory://".to_string(),
            result_store_url: "memory://".to_string(),
            result_ttl_secs: 60 * 60,
            worker: WorkerSection {
                // The demonstrated deployment runs a single slot.
                concurrency: 1,
                dequeue_timeout_ms: 1000,
                shutdown: ShutdownMode::Drain,
                backoff_initial_ms: 100,
                backoff_max_ms: 5000,
            },
            task: TaskSection {
                max_attempts: 3,
                soft_time_limit_secs: None,
                hard_time_limit_secs: None,
            },
            beat: BeatSection { tick_ms: 1000 },
            logging: LoggingSection {
                level: "info".to_string(),
                json: false,
            },
        }
    }
}

/// Load a RawConfigFile from a TOML file.
pub fn load_raw_from_file<P: AsRef<Path>>(path: P) -> Result<RawConfigFile, ConfigError> {
    let s = fs::read_to_string(path)?;
    toml::from_str(&s).map_err(|e| ConfigError::Parse(e.to_string()))
}

#[inline]
fn parse_bool(s: &str) -> Result<bool, ()> {
    match s.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "y" => Ok(true),
        "0" | "false" | "no" | "n" => Ok(false),
        _ => Err(()),
    }
}

/// Helper macro to apply an optional value if present.
macro_rules! apply_opt {
    ($target:expr, $source:expr) => {
        if let Some(v) = $source {
            $target = v;
        }
    };
    ($target:expr, $source:expr, wrap) => {
        if let Some(v) = $source {
            $target = Some(v);
        }
    };
}

/// Load concrete `Config` from an optional file and environment variables.
/// Environment variables take precedence over file values and defaults.
pub fn load_config<P: AsRef<Path>>(path: Option<P>) -> Result<Config, ConfigError> {
    let mut cfg = Config::default();

    if let Some(p) = path {
        let raw = load_raw_from_file(p)?;
        apply_opt!(cfg.broker_url, raw.broker_url);
        apply_opt!(cfg.result_store_url, raw.result_store_url);
        apply_opt!(cfg.result_ttl_secs, raw.result_ttl_secs);
        if let Some(worker) = raw.worker {
            apply_opt!(cfg.worker.concurrency, worker.concurrency);
            apply_opt!(cfg.worker.dequeue_timeout_ms, worker.dequeue_timeout_ms);
            apply_opt!(cfg.worker.shutdown, worker.shutdown);
            apply_opt!(cfg.worker.backoff_initial_ms, worker.backoff_initial_ms);
            apply_opt!(cfg.worker.backoff_max_ms, worker.backoff_max_ms);
        }
        if let Some(task) = raw.task {
            apply_opt!(cfg.task.max_attempts, task.max_attempts);
            apply_opt!(cfg.task.soft_time_limit_secs, task.soft_time_limit_secs, wrap);
            apply_opt!(cfg.task.hard_time_limit_secs, task.hard_time_limit_secs, wrap);
        }
        if let Some(beat) = raw.beat {
            apply_opt!(cfg.beat.tick_ms, beat.tick_ms);
        }
        if let Some(logging) = raw.logging {
            apply_opt!(cfg.logging.level, logging.level);
            apply_opt!(cfg.logging.json, logging.json);
        }
    }

    apply_env_overrides(&mut cfg)?;
    Ok(cfg)
}

/// Helper to parse env var as a specific type.
#[inline]
fn env_parse<T: FromStr>(key: &str) -> Result<Option<T>, ConfigError>
where
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(v) => v
            .parse::<T>()
            .map(Some)
            .map_err(|e| ConfigError::Parse(format!("invalid {}: {}", key, e))),
        Err(_) => Ok(None),
    }
}

#[inline]
fn env_bool(key: &str) -> Result<Option<bool>, ConfigError> {
    match env::var(key) {
        Ok(v) => parse_bool(&v)
            .map(Some)
            .map_err(|_| ConfigError::Parse(format!("invalid {}", key))),
        Err(_) => Ok(None),
    }
}

#[inline]
fn env_str(key: &str) -> Option<String> {
    env::var(key).ok()
}

/// Apply all environment variable overrides to config.
fn apply_env_overrides(cfg: &mut Config) -> Result<(), ConfigError> {
    if let Some(v) = env_str("CONVEYOR_BROKER_URL") {
        cfg.broker_url = v;
    }
    if let Some(v) = env_str("CONVEYOR_RESULT_STORE_URL") {
        cfg.result_store_url = v;
    }
    if let Some(v) = env_parse::<u64>("CONVEYOR_RESULT_TTL_SECS")? {
        cfg.result_ttl_secs = v;
    }

    // Worker
    if let Some(v) = env_parse::<usize>("CONVEYOR_WORKER_CONCURRENCY")? {
        cfg.worker.concurrency = v;
    }
    if let Some(v) = env_parse::<u64>("CONVEYOR_WORKER_DEQUEUE_TIMEOUT_MS")? {
        cfg.worker.dequeue_timeout_ms = v;
    }
    if let Some(v) = env_str("CONVEYOR_WORKER_SHUTDOWN") {
        cfg.worker.shutdown = v.parse()?;
    }
    if let Some(v) = env_parse::<u64>("CONVEYOR_WORKER_BACKOFF_INITIAL_MS")? {
        cfg.worker.backoff_initial_ms = v;
    }
    if let Some(v) = env_parse::<u64>("CONVEYOR_WORKER_BACKOFF_MAX_MS")? {
        cfg.worker.backoff_max_ms = v;
    }

    // Task defaults
    if let Some(v) = env_parse::<u32>("CONVEYOR_TASK_MAX_ATTEMPTS")? {
        cfg.task.max_attempts = v;
    }
    if let Some(v) = env_parse::<u64>("CONVEYOR_TASK_SOFT_TIME_LIMIT_SECS")? {
        cfg.task.soft_time_limit_secs = Some(v);
    }
    if let Some(v) = env_parse::<u64>("CONVEYOR_TASK_HARD_TIME_LIMIT_SECS")? {
        cfg.task.hard_time_limit_secs = Some(v);
    }

    // Beat
    if let Some(v) = env_parse::<u64>("CONVEYOR_BEAT_TICK_MS")? {
        cfg.beat.tick_ms = v;
    }

    // Logging
    if let Some(v) = env_str("CONVEYOR_LOG_LEVEL") {
        cfg.logging.level = v;
    }
    if let Some(v) = env_bool("CONVEYOR_LOG_JSON")? {
        cfg.logging.json = v;
    }

    Ok(())
}

/// Validate higher-level constraints on the resolved configuration.
pub fn validate_config(cfg: &Config) -> Result<(), ConfigError> {
    url::Url::parse(&cfg.broker_url)
        .map_err(|e| ConfigError::Validation(format!("invalid broker_url: {e}")))?;
    url::Url::parse(&cfg.result_store_url)
        .map_err(|e| ConfigError::Validation(format!("invalid result_store_url: {e}")))?;

    if cfg.worker.concurrency == 0 {
        return Err(ConfigError::Validation(
            "worker.concurrency must be >= 1".into(),
        ));
    }
    if cfg.worker.dequeue_timeout_ms == 0 {
        return Err(ConfigError::Validation(
            "worker.dequeue_timeout_ms must be > 0".into(),
        ));
    }
    if cfg.worker.backoff_initial_ms > cfg.worker.backoff_max_ms {
        return Err(ConfigError::Validation(
            "worker.backoff_initial_ms must not exceed worker.backoff_max_ms".into(),
        ));
    }
    if cfg.task.max_attempts == 0 {
        return Err(ConfigError::Validation(
            "task.max_attempts must be >= 1".into(),
        ));
    }
    if let (Some(soft), Some(hard)) = (cfg.task.soft_time_limit_secs, cfg.task.hard_time_limit_secs)
    {
        if soft > hard {
            return Err(ConfigError::Validation(
                "task.soft_time_limit_secs must not exceed task.hard_time_limit_secs".into(),
            ));
        }
    }
    if cfg.beat.tick_ms == 0 {
        return Err(ConfigError::Validation("beat.tick_ms must be > 0".into()));
    }
    if cfg.result_ttl_secs == 0 {
        return Err(ConfigError::Validation(
            "result_ttl_secs must be > 0".into(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_validate() {
        let cfg = Config::default();
        validate_config(&cfg).unwrap();
        assert_eq!(cfg.worker.concurrency, 1);
        assert_eq!(cfg.beat.tick(), Duration::from_secs(1));
    }

    #[test]
    fn file_values_override_defaults() {
        let mut file = tempfile::Builder::new()
            .suffix(".toml")
            .tempfile()
            .unwrap();
        writeln!(
            file,
            r#"
broker_url = "memory://file"
result_ttl_secs = 120

[worker]
concurrency = 4
shutdown = "abandon"

[task]
max_attempts = 5
hard_time_limit_secs = 30

[beat]
tick_ms = 250
"#
        )
        .unwrap();

        let cfg = load_config(Some(file.path())).unwrap();
        assert_eq!(cfg.broker_url, "memory://file");
        assert_eq!(cfg.result_ttl_secs, 120);
        assert_eq!(cfg.worker.concurrency, 4);
        assert_eq!(cfg.worker.shutdown, ShutdownMode::Abandon);
        assert_eq!(cfg.task.max_attempts, 5);
        assert_eq!(cfg.task.hard_time_limit(), Some(Duration::from_secs(30)));
        assert_eq!(cfg.beat.tick_ms, 250);
        // Untouched values keep their defaults.
        assert_eq!(cfg.worker.dequeue_timeout_ms, 1000);
    }

    #[test]
    fn zero_concurrency_is_rejected() {
        let mut cfg = Config::default();
        cfg.worker.concurrency = 0;
        assert!(matches!(
            validate_config(&cfg).unwrap_err(),
            ConfigError::Validation(_)
        ));
    }

    #[test]
    fn inverted_time_limits_are_rejected() {
        let mut cfg = Config::default();
        cfg.task.soft_time_limit_secs = Some(60);
        cfg.task.hard_time_limit_secs = Some(30);
        assert!(validate_config(&cfg).is_err());
    }

    #[test]
    fn shutdown_mode_parses_case_insensitively() {
        assert_eq!("DRAIN".parse::<ShutdownMode>().unwrap(), ShutdownMode::Drain);
        assert_eq!(
            "abandon".parse::<ShutdownMode>().unwrap(),
            ShutdownMode::Abandon
        );
        assert!("hold".parse::<ShutdownMode>().is_err());
    }
}
