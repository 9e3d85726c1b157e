use anyhow::{bail, Context, Result};
use serde::Serialize;
use std::env;
use std::time::Duration;

/// The active per-user configuration, as supplied by the environment.
///
/// The controller holds a snapshot and replaces it whole on every
/// configuration-change notification; it never mutates one in place.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct UserConfig {
    pub user_id: u32,
    pub geo_detection_enabled: bool,
}

/// Service-level settings loaded once at startup.
#[derive(Debug, Clone)]
pub struct ServiceSettings {
    /// How long a provider may sit in enabled-initializing before it is
    /// treated as implicitly uncertain.
    pub provider_init_timeout_ms: u64,

    /// Random extra delay added to the initialization timeout so both
    /// providers don't time out in lockstep.
    pub provider_init_timeout_fuzz_ms: u64,

    /// Debounce delay between a provider reporting uncertainty and the
    /// controller suggesting "no opinion" downstream.
    pub uncertainty_delay_ms: u64,

    pub primary_provider_name: String,
    pub secondary_provider_name: String,

    // Initial user configuration for the binary; tests supply their own
    // Environment and ignore these.
    pub initial_user_id: u32,
    pub initial_geo_detection_enabled: bool,
}

impl ServiceSettings {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok(); // Load .env if present, ignore if missing
        Self::from_getter(|key| env::var(key).ok())
    }

    /// Parse settings from a custom getter function (for testing)
    pub fn from_getter<F>(get: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        Ok(ServiceSettings {
            provider_init_timeout_ms: get("PROVIDER_INIT_TIMEOUT_MS")
                .unwrap_or_else(|| "300000".to_string())
                .parse()
                .context("PROVIDER_INIT_TIMEOUT_MS must be a whole number of milliseconds")?,

            provider_init_timeout_fuzz_ms: get("PROVIDER_INIT_TIMEOUT_FUZZ_MS")
                .unwrap_or_else(|| "60000".to_string())
                .parse()
                .context("PROVIDER_INIT_TIMEOUT_FUZZ_MS must be a whole number of milliseconds")?,

            uncertainty_delay_ms: get("UNCERTAINTY_DELAY_MS")
                .unwrap_or_else(|| "300000".to_string())
                .parse()
                .context("UNCERTAINTY_DELAY_MS must be a whole number of milliseconds")?,

            primary_provider_name: get("PRIMARY_PROVIDER_NAME")
                .unwrap_or_else(|| "primary".to_string()),
            secondary_provider_name: get("SECONDARY_PROVIDER_NAME")
                .unwrap_or_else(|| "secondary".to_string()),

            initial_user_id: get("INITIAL_USER_ID")
                .unwrap_or_else(|| "0".to_string())
                .parse()
                .context("INITIAL_USER_ID must be a non-negative integer")?,

            initial_geo_detection_enabled: get("GEO_DETECTION_ENABLED")
                .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
                .unwrap_or(true),
        })
    }

    /// Create settings from a map (convenience for testing)
    #[cfg(test)]
    pub fn from_map(map: &std::collections::HashMap<&str, &str>) -> Result<Self> {
        Self::from_getter(|key| map.get(key).map(|v| v.to_string()))
    }

    /// Validate settings at startup.
    /// Returns Ok(()) if all validations pass, or Err with details of what failed.
    pub fn validate(&self) -> Result<()> {
        let mut errors: Vec<String> = Vec::new();

        if self.uncertainty_delay_ms == 0 {
            errors.push("UNCERTAINTY_DELAY_MS must be greater than 0.".to_string());
        }

        if self.provider_init_timeout_ms == 0 {
            errors.push("PROVIDER_INIT_TIMEOUT_MS must be greater than 0.".to_string());
        }

        // A fuzz larger than the timeout itself usually means swapped values.
        if self.provider_init_timeout_fuzz_ms > self.provider_init_timeout_ms {
            errors.push(format!(
                "PROVIDER_INIT_TIMEOUT_FUZZ_MS={} exceeds PROVIDER_INIT_TIMEOUT_MS={}.",
                self.provider_init_timeout_fuzz_ms, self.provider_init_timeout_ms
            ));
        }

        if self.primary_provider_name.trim().is_empty()
            || self.secondary_provider_name.trim().is_empty()
        {
            errors.push("Provider names cannot be empty.".to_string());
        }

        if self.primary_provider_name == self.secondary_provider_name {
            errors.push(format!(
                "Provider names must differ (both are '{}'). Event routing is by name.",
                self.primary_provider_name
            ));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            bail!(
                "Configuration validation failed:\n  - {}",
                errors.join("\n  - ")
            )
        }
    }

    pub fn provider_init_timeout(&self) -> Duration {
        Duration::from_millis(self.provider_init_timeout_ms)
    }

    pub fn provider_init_timeout_fuzz(&self) -> Duration {
        Duration::from_millis(self.provider_init_timeout_fuzz_ms)
    }

    pub fn uncertainty_delay(&self) -> Duration {
        Duration::from_millis(self.uncertainty_delay_ms)
    }

    pub fn initial_user_config(&self) -> UserConfig {
        UserConfig {
            user_id: self.initial_user_id,
            geo_detection_enabled: self.initial_geo_detection_enabled,
        }
    }
}
