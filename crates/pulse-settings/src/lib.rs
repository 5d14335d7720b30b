//! # pulse-settings
//!
//! Configuration management with layered sources for the Pulse client.
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults** — [`PulseSettings::default()`]
//! 2. **User file** — `~/.pulse/settings.json` (deep-merged over defaults)
//! 3. **Environment variables** — `PULSE_*` overrides (highest priority)

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{
    apply_env_overrides, deep_merge, load_settings, load_settings_from_path, settings_path,
};
pub use types::{
    ApiSettings, NotificationSettings, PulseSettings, RealtimeSettings, StoreSettings,
};

use std::sync::OnceLock;

/// Global settings singleton.
///
/// Initialized on first access via [`get_settings`]. If loading fails,
/// compiled defaults are used.
static SETTINGS: OnceLock<PulseSettings> = OnceLock::new();

/// Get the global settings instance.
///
/// On first call, loads settings from `~/.pulse/settings.json` with env var
/// overrides. On subsequent calls, returns the cached value.
pub fn get_settings() -> &'static PulseSettings {
    SETTINGS.get_or_init(|| load_settings().unwrap_or_default())
}

/// Initialize the global settings with a specific value.
///
/// # Errors
///
/// Returns the provided settings back if the global was already initialized.
pub fn init_settings(settings: PulseSettings) -> std::result::Result<(), PulseSettings> {
    SETTINGS.set(settings)
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn re_exports_work() {
        let _settings = PulseSettings::default();
        let _path = settings_path();
    }

    #[test]
    fn deep_merge_re_exported() {
        let a = serde_json::json!({"x": 1});
        let b = serde_json::json!({"y": 2});
        let merged = deep_merge(a, b);
        assert_eq!(merged["x"], 1);
        assert_eq!(merged["y"], 2);
    }
}
