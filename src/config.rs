use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, instrument, warn};

/// Script path used when neither the config file nor the environment picks one.
pub const DEFAULT_SCRIPT: &str = "scripts/main.py";

/// Shell configuration, loaded from `<config dir>/script-relay/config.json`.
///
/// Every field is optional; the getters apply the fallback chains, so a
/// missing or unparseable config file never stops the shell from starting.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Interpreter executable; discovered on PATH when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interpreter: Option<String>,
    /// Script the shell runs; tilde-expanded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub script: Option<String>,
    /// Working directory for the child. The child inherits the shell's own
    /// working directory when unset.
    #[serde(default, skip_serializing_if = "Option::is_none", rename = "workingDir")]
    pub working_dir: Option<String>,
}

impl Config {
    /// Returns the interpreter to spawn.
    ///
    /// Resolution order: config value, `SCRIPT_RELAY_PYTHON`, `python3` or
    /// `python` on PATH, bare `python3` as a last resort (so the spawn
    /// failure names the missing executable).
    pub fn interpreter(&self) -> PathBuf {
        if let Some(interpreter) = &self.interpreter {
            return PathBuf::from(shellexpand::tilde(interpreter).as_ref());
        }
        if let Ok(interpreter) = std::env::var("SCRIPT_RELAY_PYTHON") {
            return PathBuf::from(interpreter);
        }
        which::which("python3")
            .or_else(|_| which::which("python"))
            .unwrap_or_else(|_| PathBuf::from("python3"))
    }

    /// Returns the script path, falling back to `SCRIPT_RELAY_SCRIPT` and
    /// then [`DEFAULT_SCRIPT`]. Relative paths resolve against the shell's
    /// working directory.
    pub fn script_path(&self) -> PathBuf {
        if let Some(script) = &self.script {
            return PathBuf::from(shellexpand::tilde(script).as_ref());
        }
        if let Ok(script) = std::env::var("SCRIPT_RELAY_SCRIPT") {
            return PathBuf::from(script);
        }
        PathBuf::from(DEFAULT_SCRIPT)
    }

    /// Working-directory override for the child, if configured.
    pub fn working_dir(&self) -> Option<PathBuf> {
        self.working_dir
            .as_ref()
            .map(|dir| PathBuf::from(shellexpand::tilde(dir).as_ref()))
    }
}

/// Path of the config file (`<config dir>/script-relay/config.json`)
pub fn config_path() -> PathBuf {
    dirs::config_dir()
        .map(|d| d.join("script-relay").join("config.json"))
        .unwrap_or_else(|| PathBuf::from("config.json"))
}

#[instrument(name = "load_config")]
pub fn load_config() -> Config {
    load_config_from(&config_path())
}

/// Load a config file, degrading to defaults on any failure.
pub fn load_config_from(path: &Path) -> Config {
    if !path.exists() {
        info!(path = %path.display(), "Config file not found, using defaults");
        return Config::default();
    }

    let contents = match std::fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Failed to read config, using defaults");
            return Config::default();
        }
    };

    match serde_json::from_str::<Config>(&contents) {
        Ok(config) => {
            info!(path = %path.display(), "Successfully loaded config");
            config
        }
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Failed to parse config, using defaults");
            Config::default()
        }
    }
}
