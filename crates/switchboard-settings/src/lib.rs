//! # switchboard-settings
//!
//! Layered configuration for switchboard hubs and their host process.
//!
//! Priority, lowest first:
//! 1. Compiled defaults ([`SwitchboardSettings::default()`])
//! 2. `~/.switchboard/settings.json`, deep-merged over the defaults
//! 3. `SWITCHBOARD_*` environment variables

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{
    apply_env_overrides, deep_merge, load_settings, load_settings_from_path, settings_path,
};
pub use types::*;

use std::sync::OnceLock;

static SETTINGS: OnceLock<SwitchboardSettings> = OnceLock::new();

/// Process-wide settings, loaded on first access. Falls back to defaults if
/// loading fails.
pub fn get_settings() -> &'static SwitchboardSettings {
    SETTINGS.get_or_init(|| {
        load_settings().unwrap_or_else(|err| {
            tracing::warn!(error = %err, "failed to load settings, using defaults");
            SwitchboardSettings::default()
        })
    })
}

/// Install settings explicitly. Returns them back if already initialized.
#[allow(clippy::result_large_err)]
pub fn init_settings(
    settings: SwitchboardSettings,
) -> std::result::Result<(), SwitchboardSettings> {
    SETTINGS.set(settings)
}
