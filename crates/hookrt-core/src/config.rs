#![forbid(unsafe_code)]

//! Runtime configuration.
//!
//! Defaults suit an interactive host: flushes are deferred with zero delay
//! (next tick) and hook-order checking follows `debug_assertions`.
//!
//! Environment overrides:
//!
//! | Variable | Field | Format |
//! |----------|-------|--------|
//! | `HOOKRT_FLUSH_DELAY_MS` | `flush_delay` | unsigned integer milliseconds |
//! | `HOOKRT_CHECK_HOOK_ORDER` | `check_hook_order` | `1`/`0`, `true`/`false`, `on`/`off` |

use std::time::Duration;

use crate::error::ConfigError;

/// Environment variable overriding [`RuntimeConfig::flush_delay`].
pub const ENV_FLUSH_DELAY_MS: &str = "HOOKRT_FLUSH_DELAY_MS";
/// Environment variable overriding [`RuntimeConfig::check_hook_order`].
pub const ENV_CHECK_HOOK_ORDER: &str = "HOOKRT_CHECK_HOOK_ORDER";

/// Configuration for a [`Runtime`](crate::Runtime).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeConfig {
    /// Delay passed to the host timer when a flush is scheduled.
    pub flush_delay: Duration,
    /// Whether [`HookCursor::finish`](crate::HookCursor::finish) verifies the
    /// call count against the first pass.
    pub check_hook_order: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            flush_delay: Duration::ZERO,
            check_hook_order: cfg!(debug_assertions),
        }
    }
}

impl RuntimeConfig {
    /// Set the flush delay.
    #[must_use]
    pub fn with_flush_delay(mut self, delay: Duration) -> Self {
        self.flush_delay = delay;
        self
    }

    /// Enable or disable the hook count check.
    #[must_use]
    pub fn with_hook_order_check(mut self, enabled: bool) -> Self {
        self.check_hook_order = enabled;
        self
    }

    /// Defaults overridden by process environment variables.
    ///
    /// # Errors
    ///
    /// [`ConfigError::InvalidValue`] if a variable is set but unparsable.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults overridden by values from `lookup`.
    ///
    /// # Errors
    ///
    /// [`ConfigError::InvalidValue`] if a value is present but unparsable.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        if let Some(raw) = lookup(ENV_FLUSH_DELAY_MS) {
            let millis = raw.trim().parse::<u64>().map_err(|_| ConfigError::InvalidValue {
                key: ENV_FLUSH_DELAY_MS.to_string(),
                value: raw.clone(),
            })?;
            config.flush_delay = Duration::from_millis(millis);
        }
        if let Some(raw) = lookup(ENV_CHECK_HOOK_ORDER) {
            config.check_hook_order =
                parse_flag(&raw).ok_or_else(|| ConfigError::InvalidValue {
                    key: ENV_CHECK_HOOK_ORDER.to_string(),
                    value: raw.clone(),
                })?;
        }
        Ok(config)
    }

    /// Parse a TOML policy document.
    ///
    /// Recognised keys: `flush_delay_ms` (integer) and `check_hook_order`
    /// (bool). Missing keys keep their defaults.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Parse`] if the document is not valid TOML or a key has
    /// the wrong type.
    #[cfg(feature = "policy-config")]
    pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
        #[derive(serde::Deserialize)]
        #[serde(deny_unknown_fields)]
        struct Policy {
            flush_delay_ms: Option<u64>,
            check_hook_order: Option<bool>,
        }

        let policy: Policy =
            toml::from_str(source).map_err(|e| ConfigError::Parse(e.to_string()))?;
        let mut config = Self::default();
        if let Some(millis) = policy.flush_delay_ms {
            config.flush_delay = Duration::from_millis(millis);
        }
        if let Some(check) = policy.check_hook_order {
            config.check_hook_order = check;
        }
        Ok(config)
    }
}

/// Parse a boolean-ish environment flag.
pub fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "on" | "yes" => Some(true),
        "0" | "false" | "off" | "no" => Some(false),
        _ => None,
    }
}
