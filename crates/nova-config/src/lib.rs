//! Debugger configuration for the Nova JPDA engine.
//!
//! ```toml
//! [stepping]
//! use_step_filters = true
//! step_through_filters = false
//! filter_synthetic_methods = true
//! step_filters = ["java.lang.ClassLoader", "sun.*"]
//! suspend = "event_thread"
//!
//! [actions]
//! worker_threads = 2
//!
//! [logging]
//! level = "nova.jpda=debug,info"
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

mod diagnostics;
mod logging;

pub use diagnostics::ConfigDiagnostics;
pub use logging::init_tracing;

/// Which threads a step or breakpoint suspends when it fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SuspendMode {
    #[default]
    All,
    EventThread,
}

/// Stepping options read at every stepping decision point.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SteppingConfig {
    /// Master switch for step filters and smart-stepping exclusions.
    #[serde(default = "default_true")]
    pub use_step_filters: bool,

    /// Keep stepping through filtered code looking for unfiltered code,
    /// instead of stepping straight back out of it.
    #[serde(default)]
    pub step_through_filters: bool,

    #[serde(default = "default_true")]
    pub filter_synthetic_methods: bool,

    #[serde(default)]
    pub filter_static_initializers: bool,

    #[serde(default)]
    pub filter_constructors: bool,

    /// Class patterns added as exclusions to every step request.
    #[serde(default = "SteppingConfig::default_step_filters")]
    pub step_filters: Vec<String>,

    /// Initial session-wide smart-stepping exclusion patterns.
    #[serde(default)]
    pub exclusion_patterns: Vec<String>,

    /// Skip uninteresting code by stepping out rather than stepping on.
    #[serde(default)]
    pub smart_stepping_step_out: bool,

    #[serde(default)]
    pub suspend: SuspendMode,
}

fn default_true() -> bool {
    true
}

impl SteppingConfig {
    fn default_step_filters() -> Vec<String> {
        vec!["java.lang.ClassLoader".to_owned(), "sun.*".to_owned()]
    }

    /// Step filters in effect, empty when filtering is switched off.
    pub fn active_step_filters(&self) -> &[String] {
        if self.use_step_filters {
            &self.step_filters
        } else {
            &[]
        }
    }
}

impl Default for SteppingConfig {
    fn default() -> Self {
        Self {
            use_step_filters: true,
            step_through_filters: false,
            filter_synthetic_methods: true,
            filter_static_initializers: false,
            filter_constructors: false,
            step_filters: Self::default_step_filters(),
            exclusion_patterns: Vec::new(),
            smart_stepping_step_out: false,
            suspend: SuspendMode::All,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionsConfig {
    /// Threads of the pool that runs user-initiated debugger actions.
    #[serde(default = "ActionsConfig::default_worker_threads")]
    pub worker_threads: usize,
}

impl ActionsConfig {
    fn default_worker_threads() -> usize {
        2
    }
}

impl Default for ActionsConfig {
    fn default() -> Self {
        Self {
            worker_threads: Self::default_worker_threads(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// A simple level (`info`, `debug`, ...) or a full `EnvFilter` directive
    /// string.
    #[serde(default = "LoggingConfig::default_level")]
    pub level: String,

    #[serde(default)]
    pub json: bool,

    #[serde(default = "default_true")]
    pub stderr: bool,

    /// Append logs to this file. If it cannot be opened, file logging is
    /// disabled while other sinks remain active.
    #[serde(default)]
    pub file: Option<PathBuf>,
}

impl LoggingConfig {
    fn default_level() -> String {
        "info".to_owned()
    }

    pub(crate) fn normalize_level_directives(input: &str) -> String {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Self::default_level();
        }

        match trimmed.to_ascii_lowercase().as_str() {
            "trace" => "trace".to_owned(),
            "debug" => "debug".to_owned(),
            "info" => "info".to_owned(),
            "warn" | "warning" => "warn".to_owned(),
            "error" => "error".to_owned(),
            _ => trimmed.to_owned(),
        }
    }

    fn config_env_filter(&self) -> tracing_subscriber::EnvFilter {
        let directives = Self::normalize_level_directives(&self.level);
        tracing_subscriber::EnvFilter::try_new(directives).unwrap_or_else(|_| {
            tracing_subscriber::EnvFilter::default()
                .add_directive(tracing_subscriber::filter::LevelFilter::INFO.into())
        })
    }

    /// Effective filter: the configured directives, with `RUST_LOG` merged in
    /// when set.
    pub fn env_filter(&self) -> tracing_subscriber::EnvFilter {
        let env_directives = std::env::var("RUST_LOG")
            .ok()
            .map(|value| value.trim().to_owned())
            .filter(|value| !value.is_empty());

        let config_directives = Self::normalize_level_directives(&self.level);

        match env_directives {
            Some(env_directives) => {
                let combined = format!("{config_directives},{env_directives}");
                tracing_subscriber::EnvFilter::try_new(combined)
                    .or_else(|_| tracing_subscriber::EnvFilter::try_new(env_directives))
                    .unwrap_or_else(|_| self.config_env_filter())
            }
            None => self.config_env_filter(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: Self::default_level(),
            json: false,
            stderr: true,
            file: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DebuggerConfig {
    #[serde(default)]
    pub stepping: SteppingConfig,

    #[serde(default)]
    pub actions: ActionsConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse toml config: {0}")]
    Toml(String),
}

impl From<toml::de::Error> for ConfigError {
    fn from(err: toml::de::Error) -> Self {
        // The `Display` impl embeds a source snippet; keep just the message.
        ConfigError::Toml(err.message().to_owned())
    }
}

impl DebuggerConfig {
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        Self::load_from_path_with_diagnostics(path).map(|(config, _)| config)
    }

    /// Like [`DebuggerConfig::load_from_path`], also reporting unknown keys.
    /// Each unknown key is logged at `warn`.
    pub fn load_from_path_with_diagnostics(
        path: impl AsRef<Path>,
    ) -> Result<(Self, ConfigDiagnostics), ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let (config, unknown_keys) = diagnostics::deserialize_with_unknown_keys::<Self>(&text)?;
        for key in &unknown_keys {
            tracing::warn!(
                target: "nova.config",
                path = %path.display(),
                key = %key,
                "ignoring unknown config key"
            );
        }
        Ok((config, ConfigDiagnostics { unknown_keys }))
    }
}
