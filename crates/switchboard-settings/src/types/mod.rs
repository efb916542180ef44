//! Settings type definitions.
//!
//! Every type is camelCase on the wire and `#[serde(default)]`, so a settings
//! file only needs the keys it changes.

mod hub;
mod server;

pub use hub::*;
pub use server::*;

use serde::{Deserialize, Serialize};

use crate::errors::Result;

/// Root settings document (`~/.switchboard/settings.json`).
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SwitchboardSettings {
    /// Hub protocol and session limits.
    pub hub: HubOptions,
    /// Listener settings.
    pub server: ServerSettings,
    /// Log output.
    pub logging: LoggingSettings,
}

impl SwitchboardSettings {
    /// Validate every section.
    pub fn validate(&self) -> Result<()> {
        self.hub.validate()
    }
}
