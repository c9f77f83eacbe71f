//! # nexus-settings
//!
//! Configuration for the Nexus relay, loaded from three layers (in priority
//! order):
//! 1. **Compiled defaults**: [`NexusSettings::default()`]
//! 2. **Settings file**: `~/.nexus/settings.json` or an explicit path
//!    (deep-merged over defaults)
//! 3. **Environment variables**: credentials and `NEXUS_*` overrides
//!
//! Credentials and both listen ports have no default. [`NexusSettings::validate`]
//! turns their absence into a [`SettingsError::Missing`], which the binary
//! treats as fatal.

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{
    apply_env_overrides, deep_merge, load_settings, load_settings_from_path,
    load_settings_with_env, settings_path,
};
pub use types::*;
