//! Application-level configuration loading: avatar palette, timer bounds and sync tuning.

use std::{env, fs, io::ErrorKind, path::PathBuf, time::Duration};

use serde::Deserialize;
use tracing::{info, warn};

/// Default location on disk where the server looks for the JSON configuration.
const DEFAULT_CONFIG_PATH: &str = "config/app.json";
/// Environment variable that overrides [`DEFAULT_CONFIG_PATH`].
const CONFIG_PATH_ENV: &str = "LIVE_QUIZ_CONFIG_PATH";
/// Fallback color returned when the palette is exhausted.
const DEFAULT_COLOR: &str = "#ffffff";

/// Bounds and default of the per-question timer, in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct TimerConfig {
    /// Used when a session is created without an explicit timer.
    pub default_seconds: u32,
    /// Smallest accepted timer.
    pub min_seconds: u32,
    /// Largest accepted timer.
    pub max_seconds: u32,
}

impl Default for TimerConfig {
    fn default() -> Self {
        Self {
            default_seconds: 20,
            min_seconds: 5,
            max_seconds: 300,
        }
    }
}

impl TimerConfig {
    /// Whether `seconds` lies within the configured bounds.
    pub fn accepts(&self, seconds: u32) -> bool {
        (self.min_seconds..=self.max_seconds).contains(&seconds)
    }
}

#[derive(Debug, Clone)]
/// Immutable runtime configuration shared across the application.
pub struct AppConfig {
    avatar_colors: Vec<String>,
    /// Question timer settings.
    pub timer: TimerConfig,
    /// Tolerance after the scheduled end during which answers are still accepted.
    pub answer_grace_ms: u64,
    /// Whether the server locks questions whose stored end has passed.
    pub auto_lock_on_expiry: bool,
    /// Per-session broadcast capacity of the change fan-out.
    pub feed_capacity: usize,
    /// Upper bound on the durable writes of one transition.
    pub transition_timeout: Option<Duration>,
    /// Longest accepted display name, in characters.
    pub max_name_length: usize,
}

impl AppConfig {
    /// Load the application configuration from disk, falling back to built-in defaults.
    pub fn load() -> Self {
        let path = resolve_config_path();
        match fs::read_to_string(&path) {
            Ok(contents) => match serde_json::from_str::<RawConfig>(&contents) {
                Ok(raw) => {
                    let app_config: Self = raw.into();
                    info!(
                        path = %path.display(),
                        colors = app_config.avatar_colors.len(),
                        timer_default = app_config.timer.default_seconds,
                        "loaded configuration"
                    );
                    app_config
                }
                Err(err) => {
                    warn!(
                        path = %path.display(),
                        error = %err,
                        "failed to parse config; falling back to defaults"
                    );
                    Self::default()
                }
            },
            Err(err) if err.kind() == ErrorKind::NotFound => {
                info!(
                    path = %path.display(),
                    "config file not found; using built-in defaults"
                );
                Self::default()
            }
            Err(err) => {
                warn!(
                    path = %path.display(),
                    error = %err,
                    "failed to read config; falling back to defaults"
                );
                Self::default()
            }
        }
    }

    /// Return the first palette color not already listed in `used`, compared case-insensitively.
    ///
    /// When every palette entry is taken the fallback color is returned so callers always
    /// receive a value.
    pub fn first_unused_color<'a>(&self, used: impl IntoIterator<Item = &'a str>) -> String {
        let used: Vec<String> = used.into_iter().map(str::to_ascii_lowercase).collect();
        self.avatar_colors
            .iter()
            .find(|candidate| !used.contains(&candidate.to_ascii_lowercase()))
            .cloned()
            .unwrap_or_else(|| DEFAULT_COLOR.to_string())
    }

    /// Configured avatar palette.
    pub fn avatar_colors(&self) -> &[String] {
        &self.avatar_colors
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        RawConfig::default().into()
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
/// JSON representation of the configuration file located at [`DEFAULT_CONFIG_PATH`].
struct RawConfig {
    avatar_colors: Vec<String>,
    timer: TimerConfig,
    answer_grace_ms: u64,
    auto_lock_on_expiry: bool,
    feed_capacity: usize,
    transition_timeout_ms: u64,
    max_name_length: usize,
}

impl Default for RawConfig {
    fn default() -> Self {
        Self {
            avatar_colors: default_colors(),
            timer: TimerConfig::default(),
            answer_grace_ms: 750,
            auto_lock_on_expiry: true,
            feed_capacity: 64,
            transition_timeout_ms: 5_000,
            max_name_length: 24,
        }
    }
}

impl From<RawConfig> for AppConfig {
    fn from(value: RawConfig) -> Self {
        let avatar_colors = value
            .avatar_colors
            .into_iter()
            .filter(|color| {
                let valid = is_hex_color(color);
                if !valid {
                    warn!(color = %color, "ignoring malformed avatar color");
                }
                valid
            })
            .collect();

        Self {
            avatar_colors,
            timer: value.timer,
            answer_grace_ms: value.answer_grace_ms,
            auto_lock_on_expiry: value.auto_lock_on_expiry,
            feed_capacity: value.feed_capacity.max(1),
            transition_timeout: (value.transition_timeout_ms > 0)
                .then(|| Duration::from_millis(value.transition_timeout_ms)),
            max_name_length: value.max_name_length.max(1),
        }
    }
}

/// Whether `value` is a `#RRGGBB` color.
pub fn is_hex_color(value: &str) -> bool {
    value.len() == 7
        && value.starts_with('#')
        && value[1..].chars().all(|c| c.is_ascii_hexdigit())
}

/// Resolve the configuration path taking the environment override into account.
fn resolve_config_path() -> PathBuf {
    env::var_os(CONFIG_PATH_ENV)
        .map(PathBuf::from)
        .filter(|path| !path.as_os_str().is_empty())
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
}

/// Built-in avatar palette shipped with the binary.
fn default_colors() -> Vec<String> {
    [
        "#e6194b", "#3cb44b", "#ffe119", "#4363d8", "#f58231", "#911eb4", "#46f0f0", "#f032e6",
        "#bcf60c", "#fabebe", "#008080", "#e6beff", "#9a6324", "#fffac8", "#800000", "#aaffc3",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_unused_color_skips_taken_entries() {
        let config = AppConfig::default();
        let first = config.first_unused_color([]);
        assert_eq!(first, "#e6194b");
        let second = config.first_unused_color(["#E6194B"]);
        assert_eq!(second, "#3cb44b");
    }

    #[test]
    fn exhausted_palette_falls_back() {
        let config = AppConfig::default();
        let used: Vec<&str> = config.avatar_colors().iter().map(String::as_str).collect();
        assert_eq!(config.first_unused_color(used), DEFAULT_COLOR);
    }

    #[test]
    fn partial_file_keeps_defaults_for_missing_fields() {
        let raw: RawConfig =
            serde_json::from_str(r##"{ "avatar_colors": ["#000000", "red"], "timer": { "default_seconds": 45 } }"##)
                .unwrap();
        let config = AppConfig::from(raw);
        assert_eq!(config.avatar_colors(), ["#000000".to_string()]);
        assert_eq!(config.timer.default_seconds, 45);
        assert_eq!(config.timer.max_seconds, 300);
        assert_eq!(config.answer_grace_ms, 750);
        assert_eq!(config.transition_timeout, Some(Duration::from_secs(5)));
    }

    #[test]
    fn timer_bounds_are_inclusive() {
        let timer = TimerConfig::default();
        assert!(timer.accepts(5));
        assert!(timer.accepts(300));
        assert!(!timer.accepts(4));
        assert!(!timer.accepts(301));
    }
}
