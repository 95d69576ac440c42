//! Configuration loading and parsing.
//!
//! Parses `rill.toml` (or an override path provided by the binary) into a
//! raw [`ConfigFile`] mirror and an applied [`Config`] whose effective
//! values are clamped to sane ranges. Unknown fields are ignored (TOML
//! deserialization tolerance) so the file format can evolve without
//! immediate warnings; a missing or unparsable file falls back to defaults
//! rather than failing startup.

use anyhow::Result;
use serde::Deserialize;
use std::{fs, path::PathBuf};
use tracing::info;

/// `[events]`: the logic loop's channel and the built-in tick source.
#[derive(Debug, Deserialize, Clone)]
pub struct EventsConfig {
    /// Bound of the event channel. Clamped to at least `MIN_CAPACITY`.
    #[serde(default = "EventsConfig::default_capacity")]
    pub capacity: usize,
    /// Interval of the periodic tick source in milliseconds; 0 disables it.
    #[serde(default = "EventsConfig::default_tick_ms")]
    pub tick_ms: u64,
}

impl EventsConfig {
    const fn default_capacity() -> usize {
        8192
    }
    const fn default_tick_ms() -> u64 {
        16
    }
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            capacity: Self::default_capacity(),
            tick_ms: Self::default_tick_ms(),
        }
    }
}

/// `[log]`: file appender directory and fallback filter expression.
#[derive(Debug, Deserialize, Clone)]
pub struct LogConfig {
    #[serde(default = "LogConfig::default_directory")]
    pub directory: PathBuf,
    /// `EnvFilter` expression used when `RUST_LOG` is unset.
    #[serde(default = "LogConfig::default_filter")]
    pub filter: String,
}

impl LogConfig {
    fn default_directory() -> PathBuf {
        PathBuf::from("logs")
    }
    fn default_filter() -> String {
        "info".to_string()
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            directory: Self::default_directory(),
            filter: Self::default_filter(),
        }
    }
}

/// `[window]`: the initial scene size handed to `set_size`.
#[derive(Debug, Deserialize, Clone)]
pub struct WindowConfig {
    #[serde(default = "WindowConfig::default_width")]
    pub width: f32,
    #[serde(default = "WindowConfig::default_height")]
    pub height: f32,
    #[serde(default = "WindowConfig::default_title")]
    pub title: String,
}

impl WindowConfig {
    const fn default_width() -> f32 {
        640.0
    }
    const fn default_height() -> f32 {
        480.0
    }
    fn default_title() -> String {
        "rill".to_string()
    }
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            width: Self::default_width(),
            height: Self::default_height(),
            title: Self::default_title(),
        }
    }
}

/// Raw mirror of the configuration file.
#[derive(Debug, Deserialize, Default, Clone)]
pub struct ConfigFile {
    #[serde(default)]
    pub events: EventsConfig,
    #[serde(default)]
    pub log: LogConfig,
    #[serde(default)]
    pub window: WindowConfig,
}

/// Parsed configuration plus clamped effective values.
#[derive(Debug, Clone, Default)]
pub struct Config {
    /// Original file contents, when a file was read.
    pub raw: Option<String>,
    /// Parsed (or default) data.
    pub file: ConfigFile,
    /// Channel capacity after clamping.
    pub effective_capacity: usize,
}

/// Smallest permitted event channel bound; anything lower starves the loop
/// of its own follow-up events.
pub const MIN_CAPACITY: usize = 16;

/// Best-effort config path following platform conventions: prefer a local
/// `rill.toml`, then the platform config directory.
pub fn discover() -> PathBuf {
    let local = PathBuf::from("rill.toml");
    if local.exists() {
        return local;
    }
    if let Some(dir) = dirs::config_dir() {
        return dir.join("rill").join("rill.toml");
    }
    PathBuf::from("rill.toml")
}

pub fn load_from(path: Option<PathBuf>) -> Result<Config> {
    let path = path.unwrap_or_else(discover);
    let mut config = if let Ok(content) = fs::read_to_string(&path) {
        match toml::from_str::<ConfigFile>(&content) {
            Ok(file) => Config {
                raw: Some(content),
                file,
                effective_capacity: 0, // computed below
            },
            Err(error) => {
                // parse errors fall back to defaults rather than aborting
                info!(target: "config", path = %path.display(), error = %error, "config parse failed, using defaults");
                Config::default()
            }
        }
    } else {
        Config::default()
    };
    config.apply();
    Ok(config)
}

impl Config {
    /// Clamps the raw values into their effective counterparts.
    pub fn apply(&mut self) -> usize {
        let raw = self.file.events.capacity;
        let clamped = raw.max(MIN_CAPACITY);
        if clamped != raw {
            info!(target: "config", raw, clamped, "event_capacity_clamped");
        }
        self.effective_capacity = clamped;
        clamped
    }

    pub fn tick_interval(&self) -> Option<std::time::Duration> {
        match self.file.events.tick_ms {
            0 => None,
            ms => Some(std::time::Duration::from_millis(ms)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(content: &str) -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("rill.toml");
        let mut file = fs::File::create(&path).expect("create config");
        file.write_all(content.as_bytes()).expect("write config");
        (dir, path)
    }

    #[test]
    fn defaults_when_file_is_missing() {
        let config = load_from(Some(PathBuf::from("/definitely/not/here.toml"))).unwrap();
        assert!(config.raw.is_none());
        assert_eq!(config.effective_capacity, 8192);
        assert_eq!(config.file.window.title, "rill");
        assert_eq!(
            config.tick_interval(),
            Some(std::time::Duration::from_millis(16))
        );
    }

    #[test]
    fn parses_and_clamps() {
        let (_dir, path) = write_config(
            r#"
            [events]
            capacity = 4
            tick_ms = 0

            [window]
            width = 800.0
            height = 600.0
            "#,
        );
        let config = load_from(Some(path)).unwrap();
        assert!(config.raw.is_some());
        // 4 is below the floor
        assert_eq!(config.effective_capacity, MIN_CAPACITY);
        assert_eq!(config.tick_interval(), None);
        assert_eq!(config.file.window.width, 800.0);
        assert_eq!(config.file.window.title, "rill"); // default survives partial sections
    }

    #[test]
    fn unknown_fields_are_tolerated() {
        let (_dir, path) = write_config(
            r#"
            [events]
            capacity = 100
            some_future_knob = "zap"

            [totally_new_section]
            x = 1
            "#,
        );
        let config = load_from(Some(path)).unwrap();
        assert_eq!(config.effective_capacity, 100);
    }

    #[test]
    fn parse_errors_fall_back_to_defaults() {
        let (_dir, path) = write_config("this is not { toml");
        let config = load_from(Some(path)).unwrap();
        assert!(config.raw.is_none());
        assert_eq!(config.effective_capacity, 8192);
    }
}
