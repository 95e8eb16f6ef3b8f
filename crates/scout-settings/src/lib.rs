//! # scout-settings
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults**: [`ScoutSettings::default()`]
//! 2. **User file**: `~/.scout/settings.json` (deep-merged over defaults)
//! 3. **Environment variables**: `SCOUT_*` and provider key overrides
//!
//! ```no_run
//! let settings = scout_settings::load_settings().unwrap_or_default();
//! println!("model: {:?}", settings.provider.model);
//! ```

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{
    apply_env_overrides, apply_overrides_from, deep_merge, load_settings, load_settings_from_path,
    scout_dir, settings_path, validate,
};
pub use types::*;
