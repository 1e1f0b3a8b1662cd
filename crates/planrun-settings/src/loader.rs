//! Layered settings loading: defaults → JSON file → environment.

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::{debug, warn};

use crate::errors::{Result, SettingsError};
use crate::types::PlanrunSettings;

/// Directory under `$HOME` holding the settings file.
const SETTINGS_DIR: &str = ".planrun";
/// Settings file name.
const SETTINGS_FILE: &str = "settings.json";

/// Default settings file location: `~/.planrun/settings.json`.
pub fn settings_path() -> Result<PathBuf> {
    let home = std::env::var_os("HOME").ok_or(SettingsError::NoHome)?;
    Ok(PathBuf::from(home).join(SETTINGS_DIR).join(SETTINGS_FILE))
}

/// Load settings from the default path with environment overrides.
pub fn load_settings() -> Result<PlanrunSettings> {
    load_settings_from_path(&settings_path()?)
}

/// Load settings from `path`, deep-merged over defaults, then apply
/// `PLANRUN_*` environment overrides and validate.
///
/// A missing file is not an error: defaults (plus env) are returned.
pub fn load_settings_from_path(path: &Path) -> Result<PlanrunSettings> {
    let defaults = serde_json::to_value(PlanrunSettings::default())?;
    let merged = match std::fs::read_to_string(path) {
        Ok(raw) => {
            let user: Value = serde_json::from_str(&raw)?;
            debug!(?path, "loaded settings file");
            deep_merge(defaults, user)
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!(?path, "no settings file, using defaults");
            defaults
        }
        Err(source) => {
            return Err(SettingsError::Io {
                path: path.to_path_buf(),
                source,
            });
        }
    };

    let mut settings: PlanrunSettings = serde_json::from_value(merged)?;
    apply_env_overrides(&mut settings, |name| std::env::var(name).ok());
    settings.validate();
    Ok(settings)
}

/// Recursively merge `overlay` into `base`. Objects merge key by key;
/// any other overlay value replaces the base value.
pub fn deep_merge(base: Value, overlay: Value) -> Value {
    match (base, overlay) {
        (Value::Object(mut base_map), Value::Object(overlay_map)) => {
            for (key, overlay_val) in overlay_map {
                let merged = match base_map.remove(&key) {
                    Some(base_val) => deep_merge(base_val, overlay_val),
                    None => overlay_val,
                };
                let _ = base_map.insert(key, merged);
            }
            Value::Object(base_map)
        }
        (_, overlay) => overlay,
    }
}

/// Apply `PLANRUN_*` overrides read through `lookup`.
///
/// Unparseable values are ignored with a warning.
pub fn apply_env_overrides(settings: &mut PlanrunSettings, lookup: impl Fn(&str) -> Option<String>) {
    fn parsed<T: std::str::FromStr>(
        lookup: &impl Fn(&str) -> Option<String>,
        name: &str,
    ) -> Option<T> {
        let raw = lookup(name)?;
        match raw.trim().parse() {
            Ok(v) => Some(v),
            Err(_) => {
                warn!(name, value = %raw, "ignoring unparseable env override");
                None
            }
        }
    }

    if let Some(level) = lookup("PLANRUN_LOG_LEVEL") {
        settings.logging.level = level;
    }
    if let Some(json) = parsed(&lookup, "PLANRUN_LOG_JSON") {
        settings.logging.json = json;
    }
    if let Some(v) = parsed(&lookup, "PLANRUN_MAX_ACTIVE_SESSIONS") {
        settings.runtime.max_active_sessions = v;
    }
    if let Some(v) = parsed(&lookup, "PLANRUN_MAX_ITERATIONS") {
        settings.runtime.max_iterations = v;
    }
    if let Some(v) = parsed(&lookup, "PLANRUN_ERROR_GRACE_MS") {
        settings.runtime.error_grace_ms = v;
    }
    if let Some(v) = parsed(&lookup, "PLANRUN_MAX_RETRIES") {
        settings.retry.max_retries = v;
    }
}
