//! Launcher configuration loaded from a RON file.
//!
//! Every field has a default, so an empty file (or no file at all) yields a
//! working configuration:
//!
//! ```ron
//! (
//!     port: 3000,
//!     entry_points: ["index.html", "index.js"],
//!     interpreter: Some("node"),
//!     bind_failure: recover,
//!     gate: (threshold: 5, window_ms: 500, show: "shift+`", quit: "shift+escape"),
//! )
//! ```

use std::{
    env, fs,
    path::{Path, PathBuf},
    time::Duration,
};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::classifier::DEFAULT_ENTRY_POINTS;

/// Port used when a submission does not name one.
pub const DEFAULT_PORT: u16 = 3000;

/// Name of the per-user configuration directory under `$HOME`.
const CONFIG_DIR: &str = ".kiosk";
/// Default configuration file name.
const CONFIG_FILE: &str = "config.ron";
/// Default key-value store file name.
const STORE_FILE: &str = "store.json";

/// Errors produced while locating or parsing the configuration.
#[derive(Debug, Error, Clone)]
pub enum ConfigError {
    /// I/O or filesystem read error.
    #[error("{message}")]
    Read {
        /// Path associated with the read error.
        path: PathBuf,
        /// Human-readable error message.
        message: String,
    },
    /// RON syntax or type error.
    #[error("{message}")]
    Parse {
        /// Path of the offending file.
        path: PathBuf,
        /// Parser message, prefixed with the line and column.
        message: String,
    },
    /// A value parsed but is not usable.
    #[error("{message}")]
    Invalid {
        /// Description of the offending value.
        message: String,
    },
}

impl ConfigError {
    /// Render a human-friendly error message including the location.
    pub fn pretty(&self) -> String {
        match self {
            Self::Read { path, message } => {
                format!("Read error at {}: {}", path.display(), message)
            }
            Self::Parse { path, message } => {
                format!("Config parse error in {}: {}", path.display(), message)
            }
            Self::Invalid { message } => format!("Invalid config: {message}"),
        }
    }
}

/// What to do when the static server cannot bind its port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BindFailurePolicy {
    /// Report the error and show the input collector again.
    #[default]
    Recover,
    /// Propagate the error to the shell, which exits.
    Fatal,
}

/// Settings for the hidden key-combination gates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GateConfig {
    /// Presses needed, beyond this count, before the action fires.
    pub threshold: u32,
    /// Inactivity window after which the count resets.
    pub window_ms: u64,
    /// Chord that reveals the input collector.
    pub show: String,
    /// Chord that quits the shell.
    pub quit: String,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            threshold: 5,
            window_ms: 500,
            show: "shift+`".to_string(),
            quit: "shift+escape".to_string(),
        }
    }
}

impl GateConfig {
    /// The debounce window as a duration.
    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }
}

/// Top-level launcher configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Default port for static and process targets.
    pub port: u16,
    /// Entry points searched for in directories, highest priority first.
    pub entry_points: Vec<String>,
    /// Program used to run `.js` entry points; `None` executes them directly.
    pub interpreter: Option<String>,
    /// Handling of static server bind failures.
    pub bind_failure: BindFailurePolicy,
    /// Location of the key-value store file.
    pub store: Option<PathBuf>,
    /// Override gate settings.
    pub gate: GateConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            entry_points: DEFAULT_ENTRY_POINTS.iter().map(|s| s.to_string()).collect(),
            interpreter: Some("node".to_string()),
            bind_failure: BindFailurePolicy::default(),
            store: None,
            gate: GateConfig::default(),
        }
    }
}

impl Config {
    /// Parse a configuration from RON source. `path` is used for error reporting.
    pub fn from_ron(src: &str, path: &Path) -> Result<Self, ConfigError> {
        ron::from_str(src).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
    }

    /// Load a configuration file.
    pub fn load_from_path(path: &Path) -> Result<Self, ConfigError> {
        let src = fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        Self::from_ron(&src, path)
    }

    /// Load from an explicit path, or the default location when present, or defaults.
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        match resolve_config_path(explicit)? {
            Some(p) => Self::load_from_path(&p),
            None => Ok(Self::default()),
        }
    }

    /// The key-value store file: configured path, else `~/.kiosk/store.json`.
    pub fn store_path(&self) -> PathBuf {
        self.store
            .clone()
            .unwrap_or_else(|| config_dir().join(STORE_FILE))
    }
}

/// `~/.kiosk`, falling back to the working directory when there is no home.
fn config_dir() -> PathBuf {
    home::home_dir()
        .or_else(|| env::current_dir().ok())
        .unwrap_or_else(|| PathBuf::from("."))
        .join(CONFIG_DIR)
}

/// Resolve the configuration file to load.
///
/// An explicit path must exist. Without one, `~/.kiosk/config.ron` is used if it
/// exists; otherwise `None` selects the built-in defaults.
pub fn resolve_config_path(explicit: Option<&Path>) -> Result<Option<PathBuf>, ConfigError> {
    if let Some(p) = explicit {
        if p.exists() {
            return Ok(Some(p.to_path_buf()));
        }
        return Err(ConfigError::Read {
            path: p.to_path_buf(),
            message: "Config file not found".to_string(),
        });
    }
    let default = config_dir().join(CONFIG_FILE);
    Ok(default.exists().then_some(default))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_gives_defaults() {
        let cfg = Config::from_ron("()", Path::new("config.ron")).expect("parse");
        assert_eq!(cfg, Config::default());
        assert_eq!(cfg.port, 3000);
        assert_eq!(cfg.gate.window(), Duration::from_millis(500));
    }

    #[test]
    fn partial_override() {
        let cfg = Config::from_ron(
            r#"(port: 8080, interpreter: None, bind_failure: fatal, gate: (threshold: 2))"#,
            Path::new("config.ron"),
        )
        .expect("parse");
        assert_eq!(cfg.port, 8080);
        assert_eq!(cfg.interpreter, None);
        assert_eq!(cfg.bind_failure, BindFailurePolicy::Fatal);
        assert_eq!(cfg.gate.threshold, 2);
        assert_eq!(cfg.gate.show, "shift+`");
    }

    #[test]
    fn parse_error_reports_location() {
        let err = Config::from_ron("(port: \"nope\")", Path::new("/etc/kiosk.ron"))
            .expect_err("type error");
        let pretty = err.pretty();
        assert!(pretty.contains("/etc/kiosk.ron"), "{pretty}");
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn explicit_missing_path_is_an_error() {
        let err = resolve_config_path(Some(Path::new("/no/such/kiosk.ron"))).expect_err("missing");
        assert!(matches!(err, ConfigError::Read { .. }));
    }

    #[test]
    fn load_reads_explicit_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("kiosk.ron");
        fs::write(&path, "(port: 4000, entry_points: [\"main.html\"])").expect("write");
        let cfg = Config::load(Some(&path)).expect("load");
        assert_eq!(cfg.port, 4000);
        assert_eq!(cfg.entry_points, vec!["main.html".to_string()]);
    }
}
