//! Configuration and script loading.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use pagebridge::{BridgeConfig, Script, ScriptedProvider};
use serde::de::DeserializeOwned;
use tracing::debug;

/// `$CONFIG_DIR/pagebridge/config.json`.
pub fn default_config_path() -> Option<PathBuf> {
	dirs::config_dir().map(|dir| dir.join("pagebridge").join("config.json"))
}

/// Loads `explicit`, else the default config file if it exists, else defaults.
pub fn load_config(explicit: Option<&Path>) -> Result<BridgeConfig> {
	if let Some(path) = explicit {
		return read_json(path);
	}
	match default_config_path() {
		Some(path) if path.is_file() => read_json(&path),
		_ => {
			debug!(target = "pagebridge.config", "no config file, using defaults");
			Ok(BridgeConfig::default())
		}
	}
}

/// Loads the page script, or exposes every capability as an echo.
pub fn load_provider(script: Option<&Path>) -> Result<ScriptedProvider> {
	match script {
		Some(path) => Ok(ScriptedProvider::from_script(read_json::<Script>(path)?)),
		None => Ok(ScriptedProvider::echo()),
	}
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
	let raw = std::fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
	let value = serde_json::from_str(&raw).with_context(|| format!("invalid JSON in {}", path.display()))?;
	debug!(target = "pagebridge.config", path = %path.display(), "loaded");
	Ok(value)
}
