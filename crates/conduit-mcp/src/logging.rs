//! Forwarding of provider log notifications.

use serde_json::Value;
use tracing::{debug, error, info, warn};

use crate::protocol::{LoggingLevel, LoggingMessageParams};

/// Receives `notifications/message` traffic from every session.
pub trait LogSink: Send + Sync {
    /// Handle one log message emitted by `provider`.
    fn record(&self, provider: &str, message: &LoggingMessageParams);
}

/// Re-emits provider logs as `tracing` events at the matching level.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingLogSink;

impl LogSink for TracingLogSink {
    fn record(&self, provider: &str, message: &LoggingMessageParams) {
        let logger = message.logger.as_deref().unwrap_or("-");
        let text = match &message.data {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };

        match message.level {
            LoggingLevel::Debug => {
                debug!(target: "conduit::provider", provider, logger, "{}", text)
            }
            LoggingLevel::Info | LoggingLevel::Notice => {
                info!(target: "conduit::provider", provider, logger, "{}", text)
            }
            LoggingLevel::Warning => {
                warn!(target: "conduit::provider", provider, logger, "{}", text)
            }
            _ => error!(target: "conduit::provider", provider, logger, "{}", text),
        }
    }
}
