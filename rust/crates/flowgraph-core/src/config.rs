//! Ambient engine configuration, layered the standard way: built-in
//! defaults, overridden by environment variables under a crate-specific
//! prefix.
//!
//! This is defaulting only — the explicit per-run options a caller passes
//! to `Pipeline::run` always win over anything configured here.

use serde::Deserialize;

/// Engine-wide defaults.
#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    /// Logging configuration.
    #[serde(default)]
    pub log: LogConfig,

    /// Default root directory for a `FileStore` cache when a run doesn't
    /// specify one explicitly.
    #[serde(default = "default_cache_dir")]
    pub cache_dir: String,

    /// Default `max_threads` for the parallel executor when a run doesn't
    /// specify one explicitly. `0` means unbounded.
    #[serde(default)]
    pub default_max_threads: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LogConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

fn default_cache_dir() -> String {
    ".flowgraph-cache".to_string()
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            log: LogConfig::default(),
            cache_dir: default_cache_dir(),
            default_max_threads: 0,
        }
    }
}

impl EngineConfig {
    /// Load configuration from environment (prefix `FLOWGRAPH_`) and an
    /// optional `.env` file, falling back to defaults for anything unset.
    pub fn load() -> Result<Self, config::ConfigError> {
        let _ = dotenvy::dotenv();

        let builder = config::Config::builder()
            .set_default("cache_dir", default_cache_dir())?
            .set_default("default_max_threads", 0)?
            .add_source(
                config::Environment::with_prefix("FLOWGRAPH")
                    .separator("_")
                    .try_parsing(true),
            );

        builder.build()?.try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let cfg = EngineConfig::default();
        assert_eq!(cfg.log.level, "info");
        assert_eq!(cfg.default_max_threads, 0);
    }
}
