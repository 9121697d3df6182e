//! # livefolio-settings
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults**: [`LivefolioSettings::default()`]
//! 2. **User file**: `~/.livefolio/settings.json` (deep-merged over defaults)
//! 3. **Environment variables**: `LIVEFOLIO_*` overrides (highest priority)

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{
    apply_env_overrides, apply_overrides_from, deep_merge, load_settings,
    load_settings_from_path, settings_dir, settings_path,
};
pub use types::{
    ClientSettings, LivefolioSettings, LogLevel, LogOutput, LoggingSettings, ModuleLevel,
    ServerSettings,
};
