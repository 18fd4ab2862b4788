use crate::DebugError;
use std::time::Duration;

pub const DEBUG_ENV: &str = "LOOPSCOPE_DEBUG";
pub const INTERRUPT_TIMEOUT_ENV: &str = "LOOPSCOPE_INTERRUPT_TIMEOUT_MS";
pub const DEFAULT_SESSION_HEADER: &str = "x-loopscope-session-id";
pub const DEFAULT_CALL_PREFIX: &str = "call_";

/// Runtime configuration for the debug layer.
#[derive(Clone, Debug, PartialEq)]
pub struct DebugConfig {
    /// When false, instrumented calls run the wrapped function directly.
    pub enabled: bool,
    /// Header carrying the durable session id on reconnect.
    pub session_header: String,
    /// Upper bound on an interrupt pause. `None` waits until acknowledged or torn down.
    pub interrupt_timeout: Option<Duration>,
    /// Prefix stripped from tool-call names before matching registered functions.
    pub call_prefix: String,
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            session_header: DEFAULT_SESSION_HEADER.to_string(),
            interrupt_timeout: None,
            call_prefix: DEFAULT_CALL_PREFIX.to_string(),
        }
    }
}

impl DebugConfig {
    pub fn enabled() -> Self {
        Self {
            enabled: true,
            ..Self::default()
        }
    }

    pub fn from_env() -> Result<Self, DebugError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, DebugError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        if let Some(value) = lookup(DEBUG_ENV) {
            config.enabled = is_truthy(&value);
        }
        if let Some(raw) = lookup(INTERRUPT_TIMEOUT_ENV)
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
        {
            let millis = raw.parse::<u64>().map_err(|error| {
                DebugError::InvalidConfiguration(format!(
                    "{INTERRUPT_TIMEOUT_ENV} must be an integer number of milliseconds, got '{raw}': {error}"
                ))
            })?;
            config.interrupt_timeout = Some(Duration::from_millis(millis));
        }
        Ok(config)
    }
}

pub fn is_truthy(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}
