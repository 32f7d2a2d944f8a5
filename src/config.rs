//! Dispatch settings.
//!
//! Defaults suit production. [`DispatchConfig::from_env`] reads overrides:
//!
//! | variable | field | default |
//! |----------|-------|---------|
//! | `KIWI_STRICT` | `strict` | off |
//! | `DEBUG` | `expose_debug` | off |
//! | `KIWI_SLOW_REQUEST_MS` | `slow_request` | 50 ms |
//! | `KIWI_TRACE_LIMIT` | `payload_trace_limit` | 1000 |
//! | `KIWI_STREAM_BUFFER` | `stream_buffer` | 64 |
//! | `KIWI_VERBOSE` | `log_registrations` | off |
//!
//! Flags accept `1`, `true` or `yes` in any case.

use std::time::Duration;
use tracing::warn;

#[derive(Debug, Clone, PartialEq)]
pub struct DispatchConfig {
    /// Return fatal failures to the caller (and resume panics) after the error envelope is built.
    pub strict: bool,
    /// Keep the envelope's `debug` field on the wire.
    pub expose_debug: bool,
    /// Requests slower than this are logged at `warn`.
    pub slow_request: Duration,
    /// Characters of raw payload included in fatal traces.
    pub payload_trace_limit: usize,
    /// Chunks buffered per streaming response.
    pub stream_buffer: usize,
    /// Log every parameter binding at registration.
    pub log_registrations: bool,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            strict: false,
            expose_debug: false,
            slow_request: Duration::from_millis(50),
            payload_trace_limit: 1000,
            stream_buffer: 64,
            log_registrations: false,
        }
    }
}

impl DispatchConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds a config from any key lookup; unparsable numbers keep their default.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let number = |key: &str, fallback: u64| -> u64 {
            match lookup(key) {
                None => fallback,
                Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
                    warn!(key, value = %raw, "ignoring malformed setting");
                    fallback
                }),
            }
        };
        Self {
            strict: lookup("KIWI_STRICT").is_some_and(|v| flag(&v)),
            expose_debug: lookup("DEBUG").is_some_and(|v| flag(&v)),
            slow_request: Duration::from_millis(number(
                "KIWI_SLOW_REQUEST_MS",
                u64::try_from(defaults.slow_request.as_millis()).unwrap_or(u64::MAX),
            )),
            payload_trace_limit: usize::try_from(number("KIWI_TRACE_LIMIT", defaults.payload_trace_limit as u64))
                .unwrap_or(defaults.payload_trace_limit),
            stream_buffer: usize::try_from(number("KIWI_STREAM_BUFFER", defaults.stream_buffer as u64))
                .unwrap_or(defaults.stream_buffer),
            log_registrations: lookup("KIWI_VERBOSE").is_some_and(|v| flag(&v)),
        }
    }

    pub fn strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    pub fn expose_debug(mut self, expose: bool) -> Self {
        self.expose_debug = expose;
        self
    }

    pub fn slow_request(mut self, threshold: Duration) -> Self {
        self.slow_request = threshold;
        self
    }
}

fn flag(value: &str) -> bool {
    let value = value.trim();
    value == "1" || value.eq_ignore_ascii_case("true") || value.eq_ignore_ascii_case("yes")
}
