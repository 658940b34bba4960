//! Engine preferences.
//!
//! The engine reads a handful of boolean knobs from the environment. Hosts
//! that manage their own preferences build an [`EngineConfig`] directly and
//! hand it to [`RuntimeBuilder::config`](crate::RuntimeBuilder::config).

use crate::error::PromiseError;

pub const ENV_ENABLED: &str = "PROMISE_ENGINE_ENABLED";
pub const ENV_REJECT_HANDLERS_RECOVER: &str = "PROMISE_ENGINE_REJECT_HANDLERS_RECOVER";
pub const ENV_DETECT_SELF_RESOLUTION: &str = "PROMISE_ENGINE_DETECT_SELF_RESOLUTION";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Whether promises are exposed to non-privileged contexts.
    /// Privileged contexts always get them.
    pub promises_enabled: bool,
    /// When set, the value returned by an `onReject` handler fulfills the
    /// derived promise instead of rejecting it.
    pub reject_handlers_recover: bool,
    /// Reject a promise that is fulfilled with itself instead of leaving it
    /// pending forever. Indirect cycles are never detected.
    pub detect_self_resolution: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            promises_enabled: true,
            reject_handlers_recover: false,
            detect_self_resolution: true,
        }
    }
}

impl EngineConfig {
    /// Read the configuration from `PROMISE_ENGINE_*` environment variables,
    /// falling back to the defaults for unset keys.
    pub fn from_env() -> Result<Self, PromiseError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub(crate) fn from_lookup<F>(lookup: F) -> Result<Self, PromiseError>
    where
        F: Fn(&'static str) -> Option<String>,
    {
        let defaults = Self::default();
        let config = Self {
            promises_enabled: read_flag(&lookup, ENV_ENABLED)?.unwrap_or(defaults.promises_enabled),
            reject_handlers_recover: read_flag(&lookup, ENV_REJECT_HANDLERS_RECOVER)?.unwrap_or(defaults.reject_handlers_recover),
            detect_self_resolution: read_flag(&lookup, ENV_DETECT_SELF_RESOLUTION)?.unwrap_or(defaults.detect_self_resolution),
        };
        log::debug!("EngineConfig loaded: {config:?}");
        Ok(config)
    }
}

fn read_flag<F>(lookup: &F, key: &'static str) -> Result<Option<bool>, PromiseError>
where
    F: Fn(&'static str) -> Option<String>,
{
    let Some(raw) = lookup(key) else {
        return Ok(None);
    };
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(Some(true)),
        "0" | "false" | "no" | "off" => Ok(Some(false)),
        _ => Err(PromiseError::InvalidConfig { key, value: raw }),
    }
}
