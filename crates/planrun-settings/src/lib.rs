//! # planrun-settings
//!
//! Configuration management with layered sources for planrun.
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults** : [`PlanrunSettings::default()`]
//! 2. **User file** : `~/.planrun/settings.json` (deep-merged over defaults)
//! 3. **Environment variables** : `PLANRUN_*` overrides (highest priority)
//!
//! The loaded value is owned by the caller and injected into the runtime;
//! there is no process-wide settings cache.
//!
//! # Usage
//!
//! ```no_run
//! use planrun_settings::load_settings;
//!
//! let settings = load_settings().unwrap_or_default();
//! println!("grace: {}ms", settings.runtime.error_grace_ms);
//! ```

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{
    apply_env_overrides, deep_merge, load_settings, load_settings_from_path, settings_path,
};
pub use types::*;
