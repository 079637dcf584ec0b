//! Registry of active provider sessions.

use std::sync::Arc;

use conduit_core::{ConfigValidationError, ServerConfig};
use futures::future::join_all;
use tracing::{debug, error, info, warn};

use crate::error::McpError;
use crate::logging::{LogSink, TracingLogSink};
use crate::session::ProviderSession;
use crate::tools::ToolDescriptor;
use crate::transport::{Connector, DefaultConnector};

/// Outcome of [`SessionRegistry::create_sessions`].
#[derive(Debug, Default)]
pub struct StartupReport {
    /// Providers now holding a ready session.
    pub connected: Vec<String>,
    /// Providers disabled in the configuration.
    pub skipped: Vec<String>,
    /// Providers that failed to start, with the reason.
    pub failed: Vec<(String, McpError)>,
}

impl StartupReport {
    pub fn all_connected(&self) -> bool {
        self.failed.is_empty()
    }
}

/// All sessions the host talks to, in creation order.
pub struct SessionRegistry {
    sessions: Vec<Arc<ProviderSession>>,
    connector: Arc<dyn Connector>,
    log_sink: Arc<dyn LogSink>,
}

impl SessionRegistry {
    /// Registry using the real transports and the tracing log sink.
    pub fn new() -> Self {
        Self::with_connector(Arc::new(DefaultConnector))
    }

    pub fn with_connector(connector: Arc<dyn Connector>) -> Self {
        Self {
            sessions: Vec::new(),
            connector,
            log_sink: Arc::new(TracingLogSink),
        }
    }

    /// Replace the sink provider log notifications are forwarded to.
    pub fn with_log_sink(mut self, log_sink: Arc<dyn LogSink>) -> Self {
        self.log_sink = log_sink;
        self
    }

    /// Parse and validate a servers document.
    pub fn load_config(raw: &str) -> Result<Vec<ServerConfig>, ConfigValidationError> {
        conduit_core::config::parse_servers(raw)
    }

    /// Connect every enabled provider in `configs`.
    ///
    /// Connections are attempted concurrently. A provider that fails is
    /// logged and left out; the rest still start.
    pub async fn create_sessions(&mut self, configs: &[ServerConfig]) -> StartupReport {
        let mut report = StartupReport::default();
        let mut pending = Vec::new();

        for config in configs {
            if !config.is_enabled() {
                debug!(server = %config.name, "Skipping disabled server");
                report.skipped.push(config.name.clone());
            } else if self.contains(&config.name)
                || pending.iter().any(|c: &&ServerConfig| c.name == config.name)
            {
                warn!(server = %config.name, "Skipping duplicate server");
                report.failed.push((
                    config.name.clone(),
                    McpError::protocol(format!("provider '{}' is already registered", config.name)),
                ));
            } else {
                pending.push(config);
            }
        }

        info!(count = pending.len(), "Starting MCP servers");

        let connector = Arc::clone(&self.connector);
        let attempts = pending.iter().map(|config| {
            let connector = Arc::clone(&connector);
            let sink = Arc::clone(&self.log_sink);
            async move { ProviderSession::connect(config, connector.as_ref(), sink).await }
        });
        let results = join_all(attempts).await;

        for (config, result) in pending.into_iter().zip(results) {
            match result {
                Ok(session) => {
                    report.connected.push(config.name.clone());
                    self.sessions.push(Arc::new(session));
                }
                Err(e) => {
                    error!(server = %config.name, error = %e, "Failed to start server");
                    report.failed.push((config.name.clone(), e));
                }
            }
        }

        info!(
            success = report.connected.len(),
            failed = report.failed.len(),
            "MCP servers started"
        );

        report
    }

    /// Look up a session by provider name.
    pub fn resolve(&self, name: &str) -> Result<Arc<ProviderSession>, McpError> {
        self.sessions
            .iter()
            .find(|s| s.name() == name)
            .cloned()
            .ok_or_else(|| McpError::UnknownProvider(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.sessions.iter().any(|s| s.name() == name)
    }

    pub fn sessions(&self) -> &[Arc<ProviderSession>] {
        &self.sessions
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Every permitted tool across all sessions, under qualified names.
    ///
    /// Fetched fresh on each call. A provider whose listing fails is logged
    /// and left out of this result.
    pub async fn tool_descriptors(&self) -> Vec<ToolDescriptor> {
        let mut descriptors = Vec::new();

        for session in &self.sessions {
            let tools = match session.list_tools().await {
                Ok(tools) => tools,
                Err(e) => {
                    warn!(server = %session.name(), error = %e, "Failed to list tools");
                    continue;
                }
            };

            let filter = session.filter();
            descriptors.extend(
                tools
                    .into_iter()
                    .filter(|tool| filter.permits(&tool.name))
                    .map(|tool| ToolDescriptor::new(session.name(), tool)),
            );
        }

        descriptors
    }

    /// Close every session, newest first.
    pub async fn close_all(&self) {
        for session in self.sessions.iter().rev() {
            if let Err(e) = session.close().await {
                error!(server = %session.name(), error = %e, "Failed to close session");
            }
        }
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
