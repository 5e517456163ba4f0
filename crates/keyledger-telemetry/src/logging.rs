//! Structured logging to stdout, JSON in production and pretty in development.

use crate::{LogFormat, TelemetryConfig, TelemetryError};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Initialize the logging subsystem.
///
/// `RUST_LOG` takes precedence over the configured level.
pub fn init_logging(config: &TelemetryConfig) -> Result<(), TelemetryError> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    match config.log_format {
        LogFormat::Json => init_json_logging(filter),
        LogFormat::Pretty => init_pretty_logging(filter),
    }
}

fn init_json_logging(filter: EnvFilter) -> Result<(), TelemetryError> {
    let json_layer = fmt::layer()
        .json()
        .with_target(true)
        .with_current_span(true)
        .with_span_list(false)
        .flatten_event(true)
        .with_filter(filter);

    tracing_subscriber::registry()
        .with(json_layer)
        .try_init()
        .map_err(|e| TelemetryError::LoggingInit(e.to_string()))
}

fn init_pretty_logging(filter: EnvFilter) -> Result<(), TelemetryError> {
    let pretty_layer = fmt::layer()
        .pretty()
        .with_target(true)
        .with_file(true)
        .with_line_number(true)
        .with_filter(filter);

    tracing_subscriber::registry()
        .with(pretty_layer)
        .try_init()
        .map_err(|e| TelemetryError::LoggingInit(e.to_string()))
}

/// Standard log event names, carried in the `event` field.
pub mod events {
    /// Control plane is starting up.
    pub const STARTUP: &str = "startup";

    /// Control plane is shutting down.
    pub const SHUTDOWN: &str = "shutdown";

    /// Server is accepting connections.
    pub const LISTENING: &str = "listening";

    /// Tokens were debited from a key.
    pub const KEY_USED: &str = "key_used";

    /// A public `credit` or `use` call was refused.
    pub const KEY_REJECTED: &str = "key_rejected";

    /// Credits moved from a parent agent to a sub-agent.
    pub const CREDITS_TRANSFERRED: &str = "credits_transferred";

    /// An expired agent was deleted.
    pub const AGENT_EXPIRED: &str = "agent_expired";

    /// A store call failed.
    pub const STORE_ERROR: &str = "store_error";
}

/// Helper macros that stamp the standard `event` field.
#[macro_export]
macro_rules! log_startup {
    ($($field:tt)*) => {
        tracing::info!(
            event = $crate::logging::events::STARTUP,
            $($field)*
        )
    };
}

#[macro_export]
macro_rules! log_shutdown {
    ($($field:tt)*) => {
        tracing::info!(
            event = $crate::logging::events::SHUTDOWN,
            $($field)*
        )
    };
}

#[macro_export]
macro_rules! log_listening {
    ($($field:tt)*) => {
        tracing::info!(
            event = $crate::logging::events::LISTENING,
            $($field)*
        )
    };
}

#[macro_export]
macro_rules! log_key_used {
    ($($field:tt)*) => {
        tracing::info!(
            event = $crate::logging::events::KEY_USED,
            $($field)*
        )
    };
}

#[macro_export]
macro_rules! log_key_rejected {
    ($($field:tt)*) => {
        tracing::warn!(
            event = $crate::logging::events::KEY_REJECTED,
            $($field)*
        )
    };
}

#[macro_export]
macro_rules! log_credits_transferred {
    ($($field:tt)*) => {
        tracing::info!(
            event = $crate::logging::events::CREDITS_TRANSFERRED,
            $($field)*
        )
    };
}

#[macro_export]
macro_rules! log_agent_expired {
    ($($field:tt)*) => {
        tracing::info!(
            event = $crate::logging::events::AGENT_EXPIRED,
            $($field)*
        )
    };
}

#[macro_export]
macro_rules! log_store_error {
    ($($field:tt)*) => {
        tracing::error!(
            event = $crate::logging::events::STORE_ERROR,
            $($field)*
        )
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    // The global subscriber can only be installed once per process, so
    // initialization itself is not exercised here.

    #[test]
    fn test_log_format_parse() {
        assert_eq!(LogFormat::parse("json"), Some(LogFormat::Json));
        assert_eq!(LogFormat::parse("JSON"), Some(LogFormat::Json));
        assert_eq!(LogFormat::parse("pretty"), Some(LogFormat::Pretty));
        assert_eq!(LogFormat::parse("yaml"), None);
    }

    #[test]
    fn test_event_names_are_distinct() {
        let names = [
            events::STARTUP,
            events::SHUTDOWN,
            events::LISTENING,
            events::KEY_USED,
            events::KEY_REJECTED,
            events::CREDITS_TRANSFERRED,
            events::AGENT_EXPIRED,
            events::STORE_ERROR,
        ];
        let unique: std::collections::HashSet<_> = names.iter().collect();
        assert_eq!(unique.len(), names.len());
    }
}
