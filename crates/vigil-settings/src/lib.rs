//! # vigil-settings
//!
//! Layered configuration for the relay server.
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults**: [`VigilSettings::default()`]
//! 2. **Settings file**: `~/.vigil/settings.json` or an explicit path
//! 3. **Environment variables**: `VIGIL_*` overrides (highest priority)
//!
//! Loaded settings are passed down explicitly; there is no global instance.

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{
    deep_merge, load_settings, load_settings_from_path, resolve_data_path, settings_path,
    vigil_home,
};
pub use types::*;
