//! Application-level configuration: gameplay timings, series clamps, and the
//! answer-option palette.

use std::path::PathBuf;
use std::time::Duration;
use std::{env, fs, io::ErrorKind};

use serde::Deserialize;
use tracing::{info, warn};

/// Default location on disk where the server looks for the JSON configuration.
const DEFAULT_CONFIG_PATH: &str = "config/app.json";
/// Environment variable that overrides [`DEFAULT_CONFIG_PATH`].
const CONFIG_PATH_ENV: &str = "BLINDTEST_BACK_CONFIG_PATH";

/// Immutable runtime configuration shared across the application.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Answer window, armed when the host reports playback started.
    pub question_window: Duration,
    /// Bound on the "everyone saw the reveal" acknowledgment barrier.
    pub reveal_ack_wait: Duration,
    /// Minimum time the intermediate standings stay on screen.
    pub standings_min_display: Duration,
    /// Bound on the "ready for next" acknowledgment barrier.
    pub standings_max_wait: Duration,
    /// How long a disconnected host or participant is kept before eviction.
    pub disconnect_grace: Duration,
    /// Interval between sweeper passes over the room registry.
    pub sweep_interval: Duration,
    /// Upper clamp on songs per game.
    pub max_songs_per_game: usize,
    /// Upper clamp on games per series.
    pub max_games_in_series: u32,
    /// Palette mapped positionally to the four answer options.
    pub option_colors: Vec<String>,
    /// Path of the JSON catalog served by the built-in file provider.
    pub catalog_path: PathBuf,
}

impl AppConfig {
    /// Load the application configuration from disk, falling back to the
    /// baked-in defaults when the file is absent or unreadable.
    pub fn load() -> Self {
        let path = resolve_config_path();
        match fs::read_to_string(&path) {
            Ok(contents) => match serde_json::from_str::<RawConfig>(&contents) {
                Ok(raw) => {
                    let config: Self = raw.into();
                    info!(path = %path.display(), "loaded configuration");
                    config
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
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            question_window: Duration::from_secs(15),
            reveal_ack_wait: Duration::from_secs(2),
            standings_min_display: Duration::from_secs(6),
            standings_max_wait: Duration::from_secs(14),
            disconnect_grace: Duration::from_secs(30),
            sweep_interval: Duration::from_secs(5),
            max_songs_per_game: 30,
            max_games_in_series: 5,
            option_colors: default_colors(),
            catalog_path: PathBuf::from("config/catalog.json"),
        }
    }
}

/// JSON representation of the configuration file. Every field is optional and
/// defaults to the built-in value; durations are expressed in milliseconds.
#[derive(Debug, Deserialize)]
struct RawConfig {
    question_window_ms: Option<u64>,
    reveal_ack_wait_ms: Option<u64>,
    standings_min_display_ms: Option<u64>,
    standings_max_wait_ms: Option<u64>,
    disconnect_grace_ms: Option<u64>,
    sweep_interval_ms: Option<u64>,
    max_songs_per_game: Option<usize>,
    max_games_in_series: Option<u32>,
    option_colors: Option<Vec<String>>,
    catalog_path: Option<PathBuf>,
}

impl From<RawConfig> for AppConfig {
    fn from(raw: RawConfig) -> Self {
        let defaults = AppConfig::default();
        let duration = |ms: Option<u64>, fallback: Duration| {
            ms.map(Duration::from_millis).unwrap_or(fallback)
        };

        let option_colors = match raw.option_colors {
            Some(colors) if colors.len() == 4 => colors,
            Some(colors) => {
                warn!(
                    count = colors.len(),
                    "option palette must have exactly 4 entries; using defaults"
                );
                defaults.option_colors.clone()
            }
            None => defaults.option_colors.clone(),
        };

        Self {
            question_window: duration(raw.question_window_ms, defaults.question_window),
            reveal_ack_wait: duration(raw.reveal_ack_wait_ms, defaults.reveal_ack_wait),
            standings_min_display: duration(
                raw.standings_min_display_ms,
                defaults.standings_min_display,
            ),
            standings_max_wait: duration(raw.standings_max_wait_ms, defaults.standings_max_wait),
            disconnect_grace: duration(raw.disconnect_grace_ms, defaults.disconnect_grace),
            sweep_interval: duration(raw.sweep_interval_ms, defaults.sweep_interval),
            max_songs_per_game: raw.max_songs_per_game.unwrap_or(defaults.max_songs_per_game),
            max_games_in_series: raw
                .max_games_in_series
                .unwrap_or(defaults.max_games_in_series),
            option_colors,
            catalog_path: raw.catalog_path.unwrap_or(defaults.catalog_path),
        }
    }
}

/// Resolve the configuration path taking the environment override into account.
fn resolve_config_path() -> PathBuf {
    env::var_os(CONFIG_PATH_ENV)
        .map(PathBuf::from)
        .filter(|path| !path.as_os_str().is_empty())
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
}

/// Palette mapped positionally to the four answer buttons.
fn default_colors() -> Vec<String> {
    vec!["red".into(), "blue".into(), "yellow".into(), "green".into()]
}
