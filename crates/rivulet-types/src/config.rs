//! Engine configuration types.
//!
//! `EngineConfig` represents the `rivulet.toml` file that controls worker
//! pool size, the default step cap, and logging output.

use serde::{Deserialize, Serialize};

/// Top-level configuration for the engine and the `rivulet` binary.
///
/// All fields have sensible defaults, so an empty file is valid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Number of workers executing steps concurrently.
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,

    /// Safety cap on terminal step records per run (None = uncapped).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_steps: Option<usize>,

    /// Log line format.
    #[serde(default)]
    pub log_format: LogFormat,

    /// Bridge tracing spans to OpenTelemetry (stdout exporter).
    #[serde(default)]
    pub otel: bool,
}

fn default_max_concurrency() -> usize {
    4
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_concurrency: default_max_concurrency(),
            max_steps: None,
            log_format: LogFormat::default(),
            otel: false,
        }
    }
}

/// Output format for the tracing subscriber.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}
