//! A live MCP session with one provider.
//!
//! A [`ProviderSession`] runs the `initialize` handshake and turns method
//! calls into JSON-RPC exchanges. Requests are serialized: only one is
//! outstanding at a time. A background task owns the transport and reads it
//! continuously, so log notifications and server pings are handled whenever
//! they arrive.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use conduit_core::{ServerConfig, TransportKind};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value};
use tokio::sync::{mpsc, oneshot, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::{McpError, TransportError};
use crate::logging::LogSink;
use crate::protocol::{
    methods, CallToolParams, CallToolResult, GetPromptParams, GetPromptResult, Incoming,
    InitializeParams, InitializeResult, JsonRpcError, JsonRpcNotification, JsonRpcRequest,
    JsonRpcResponse, ListPromptsResult, ListResourcesResult, ListToolsResult,
    LoggingMessageParams, McpToolDefinition, PaginatedParams, Prompt, ReadResourceParams,
    ReadResourceResult, RequestId, Resource, ServerInfo,
};
use crate::tools::ToolFilter;
use crate::transport::{Connector, Transport};

/// Upper bound on list pages fetched for one call.
const MAX_PAGES: usize = 64;

/// Connection state for a provider session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Transport open, handshake not done.
    Connected,
    /// Handshake complete.
    Ready,
    /// The transport broke; only `close` is meaningful.
    Failed,
    /// Close in progress.
    Closing,
    /// Closed.
    Disconnected,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Connected => write!(f, "connected"),
            Self::Ready => write!(f, "ready"),
            Self::Failed => write!(f, "failed"),
            Self::Closing => write!(f, "closing"),
            Self::Disconnected => write!(f, "disconnected"),
        }
    }
}

/// A list result that may continue on another page.
trait Page: DeserializeOwned {
    type Item;

    fn into_parts(self) -> (Vec<Self::Item>, Option<String>);
}

impl Page for ListToolsResult {
    type Item = McpToolDefinition;

    fn into_parts(self) -> (Vec<Self::Item>, Option<String>) {
        (self.tools, self.next_cursor)
    }
}

impl Page for ListResourcesResult {
    type Item = Resource;

    fn into_parts(self) -> (Vec<Self::Item>, Option<String>) {
        (self.resources, self.next_cursor)
    }
}

impl Page for ListPromptsResult {
    type Item = Prompt;

    fn into_parts(self) -> (Vec<Self::Item>, Option<String>) {
        (self.prompts, self.next_cursor)
    }
}

type Reply = Result<Value, McpError>;

/// Outbound work handed to a session's I/O task.
enum Command {
    Send {
        payload: String,
        done: oneshot::Sender<Result<(), TransportError>>,
    },
    /// The request timed out; the transport may drop what it holds for it.
    Abandon(RequestId),
    Close {
        done: oneshot::Sender<Result<(), TransportError>>,
    },
}

/// Requests waiting for their response, by id.
#[derive(Default)]
struct Waiters(std::sync::Mutex<HashMap<RequestId, oneshot::Sender<Reply>>>);

impl Waiters {
    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<RequestId, oneshot::Sender<Reply>>> {
        self.0.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn insert(&self, id: RequestId, waiter: oneshot::Sender<Reply>) {
        self.lock().insert(id, waiter);
    }

    fn take(&self, id: &RequestId) -> Option<oneshot::Sender<Reply>> {
        self.lock().remove(id)
    }

    /// Fail every waiter; the first one gets `error` itself.
    fn fail_all(&self, error: TransportError) {
        let mut error = Some(error);
        for (_, waiter) in self.lock().drain() {
            let reason = error.take().unwrap_or(TransportError::ConnectionClosed);
            let _ = waiter.send(Err(reason.into()));
        }
    }

    fn clear(&self) {
        self.lock().clear();
    }
}

enum Event {
    Inbound(Result<String, TransportError>),
    Command(Option<Command>),
}

/// Owns the transport for one session.
///
/// Writes whatever the session submits and dispatches every inbound
/// message as it arrives: responses go to their waiter, log notifications
/// go to the sink even when no request is outstanding.
struct SessionIo {
    name: String,
    transport: Box<dyn Transport>,
    commands: mpsc::UnboundedReceiver<Command>,
    waiters: Arc<Waiters>,
    state: Arc<RwLock<ConnectionState>>,
    log_sink: Arc<dyn LogSink>,
    lost: bool,
}

impl SessionIo {
    async fn run(mut self) {
        loop {
            let reading = !self.lost;
            // Inbound first: traffic already buffered is handled before a close
            let event = tokio::select! {
                biased;
                inbound = self.transport.receive(), if reading => Event::Inbound(inbound),
                command = self.commands.recv() => Event::Command(command),
            };

            match event {
                Event::Inbound(Ok(raw)) => self.dispatch(&raw).await,
                Event::Inbound(Err(e)) => self.lose(e).await,
                Event::Command(Some(Command::Send { payload, done })) => {
                    let sent = if self.lost {
                        Err(TransportError::ConnectionClosed)
                    } else {
                        self.transport.send(&payload).await
                    };
                    let _ = done.send(sent);
                }
                Event::Command(Some(Command::Abandon(id))) => self.transport.abandon(&id),
                Event::Command(Some(Command::Close { done })) => {
                    let _ = done.send(self.transport.close().await);
                    break;
                }
                Event::Command(None) => {
                    if let Err(e) = self.transport.close().await {
                        debug!(server = %self.name, error = %e, "Failed to close dropped session");
                    }
                    break;
                }
            }
        }
        self.waiters.clear();
    }

    async fn dispatch(&mut self, raw: &str) {
        match Incoming::parse(raw) {
            Err(e) => warn!(server = %self.name, error = %e, "Discarding malformed message"),
            Ok(Incoming::Response { id, outcome }) => match self.waiters.take(&id) {
                Some(waiter) => {
                    let reply = outcome.map_err(|(code, message)| McpError::server_error(code, message));
                    let _ = waiter.send(reply);
                }
                None => warn!(server = %self.name, id = %id, "Discarding unexpected response"),
            },
            Ok(Incoming::Notification { method, params }) => self.on_notification(&method, params),
            Ok(Incoming::Request { id, method, .. }) => {
                let sent = match answer_server_request(&self.name, id, &method) {
                    Ok(reply) => self.transport.send(&reply).await.map_err(McpError::from),
                    Err(e) => Err(e),
                };
                if let Err(e) = sent {
                    warn!(server = %self.name, method, error = %e, "Failed to answer server request");
                }
            }
        }
    }

    fn on_notification(&self, method: &str, params: Option<Value>) {
        if method != methods::LOG_MESSAGE {
            debug!(server = %self.name, method, "Ignoring notification");
            return;
        }

        match params.map(serde_json::from_value::<LoggingMessageParams>) {
            Some(Ok(message)) => self.log_sink.record(&self.name, &message),
            Some(Err(e)) => warn!(server = %self.name, error = %e, "Malformed log notification"),
            None => warn!(server = %self.name, "Log notification without params"),
        }
    }

    async fn lose(&mut self, error: TransportError) {
        self.lost = true;
        {
            let mut state = self.state.write().await;
            if matches!(*state, ConnectionState::Connected | ConnectionState::Ready) {
                warn!(server = %self.name, error = %error, "MCP transport lost");
                *state = ConnectionState::Failed;
            }
        }
        self.waiters.fail_all(error);
    }
}

fn answer_server_request(server: &str, id: RequestId, method: &str) -> Result<String, McpError> {
    let reply = if method == methods::PING {
        serde_json::to_string(&JsonRpcResponse::success(id, json!({})))?
    } else {
        debug!(server, method, "Rejecting server request");
        serde_json::to_string(&JsonRpcResponse::<Value>::failure(
            id,
            JsonRpcError::new(
                JsonRpcError::METHOD_NOT_FOUND,
                format!("Method not found: {}", method),
            ),
        ))?
    };
    Ok(reply)
}

/// A session with a single MCP provider.
pub struct ProviderSession {
    name: String,
    kind: TransportKind,
    filter: ToolFilter,
    /// Bound on each request/response exchange.
    timeout: Duration,
    commands: mpsc::UnboundedSender<Command>,
    /// Taken on close.
    io: Mutex<Option<JoinHandle<()>>>,
    waiters: Arc<Waiters>,
    /// Held for the length of one request.
    in_flight: Mutex<()>,
    state: Arc<RwLock<ConnectionState>>,
    server: RwLock<Option<InitializeResult>>,
    request_counter: AtomicU64,
}

impl ProviderSession {
    /// Wrap an already open transport and start reading from it.
    ///
    /// Must be called inside a tokio runtime. The session still needs
    /// [`initialize`](Self::initialize).
    pub fn new(config: &ServerConfig, transport: Box<dyn Transport>, log_sink: Arc<dyn LogSink>) -> Self {
        let (commands, receiver) = mpsc::unbounded_channel();
        let waiters = Arc::new(Waiters::default());
        let state = Arc::new(RwLock::new(ConnectionState::Connected));

        let io = tokio::spawn(
            SessionIo {
                name: config.name.clone(),
                transport,
                commands: receiver,
                waiters: Arc::clone(&waiters),
                state: Arc::clone(&state),
                log_sink,
                lost: false,
            }
            .run(),
        );

        Self {
            name: config.name.clone(),
            kind: config.kind(),
            filter: ToolFilter::from_config(config),
            timeout: config.timeout(),
            commands,
            io: Mutex::new(Some(io)),
            waiters,
            in_flight: Mutex::new(()),
            state,
            server: RwLock::new(None),
            request_counter: AtomicU64::new(1),
        }
    }

    /// Open the configured transport and complete the handshake.
    ///
    /// Any failure is reported as [`McpError::Connection`] naming the
    /// provider and transport; a half-open transport is closed first.
    pub async fn connect(
        config: &ServerConfig,
        connector: &dyn Connector,
        log_sink: Arc<dyn LogSink>,
    ) -> Result<Self, McpError> {
        info!(server = %config.name, transport = %config.kind(), "Connecting to MCP server");

        let transport = connector
            .open(config)
            .await
            .map_err(|e| McpError::connection(&config.name, config.kind(), e.into()))?;

        let session = Self::new(config, transport, log_sink);
        if let Err(e) = session.initialize().await {
            if let Err(close_err) = session.close().await {
                debug!(server = %config.name, error = %close_err, "Failed to close after handshake error");
            }
            return Err(McpError::connection(&config.name, config.kind(), e));
        }

        Ok(session)
    }

    /// Get the provider name.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> TransportKind {
        self.kind
    }

    /// Allow and deny lists from the configuration.
    pub fn filter(&self) -> &ToolFilter {
        &self.filter
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Get the current connection state.
    pub async fn state(&self) -> ConnectionState {
        *self.state.read().await
    }

    /// Check if the session is ready for use.
    pub async fn is_ready(&self) -> bool {
        *self.state.read().await == ConnectionState::Ready
    }

    /// Identity reported by the provider during the handshake.
    pub async fn server_info(&self) -> Option<ServerInfo> {
        self.server.read().await.as_ref().map(|r| r.server_info.clone())
    }

    fn next_request_id(&self) -> u64 {
        self.request_counter.fetch_add(1, Ordering::SeqCst)
    }

    fn closed(&self) -> McpError {
        McpError::NotInitialized {
            provider: self.name.clone(),
            state: ConnectionState::Disconnected.to_string(),
        }
    }

    async fn ensure_ready(&self) -> Result<(), McpError> {
        let state = *self.state.read().await;
        if state != ConnectionState::Ready {
            return Err(McpError::NotInitialized {
                provider: self.name.clone(),
                state: state.to_string(),
            });
        }
        Ok(())
    }

    /// Hand one message to the I/O task and wait until it is written.
    async fn submit(&self, payload: String) -> Result<(), McpError> {
        let (done, sent) = oneshot::channel();
        self.commands
            .send(Command::Send { payload, done })
            .map_err(|_| self.closed())?;
        match sent.await {
            Ok(result) => Ok(result?),
            Err(_) => Err(self.closed()),
        }
    }

    /// Send a request and wait for its response, bounded by the session timeout.
    async fn request<P, R>(&self, method: &str, params: Option<P>) -> Result<R, McpError>
    where
        P: Serialize,
        R: DeserializeOwned,
    {
        let _in_flight = self.in_flight.lock().await;

        let id = RequestId::from(self.next_request_id());
        let payload = serde_json::to_string(&JsonRpcRequest::new(id.clone(), method, params))?;
        let (waiter, response) = oneshot::channel();
        self.waiters.insert(id.clone(), waiter);

        let outcome = match tokio::time::timeout(self.timeout, self.exchange(payload, response)).await {
            Ok(outcome) => outcome,
            Err(_) => {
                self.abandon(&id, method).await;
                Err(McpError::Timeout {
                    method: method.to_string(),
                    timeout: self.timeout,
                })
            }
        };
        if outcome.is_err() {
            self.waiters.take(&id);
        }

        let value = outcome?;
        serde_json::from_value(value)
            .map_err(|e| McpError::protocol(format!("invalid {} result: {}", method, e)))
    }

    async fn exchange(&self, payload: String, response: oneshot::Receiver<Reply>) -> Reply {
        self.submit(payload).await?;
        match response.await {
            Ok(reply) => reply,
            Err(_) => Err(self.closed()),
        }
    }

    /// Forget a timed-out request and tell the provider to stop working on it.
    async fn abandon(&self, id: &RequestId, method: &str) {
        self.waiters.take(id);
        let _ = self.commands.send(Command::Abandon(id.clone()));

        // initialize may not be cancelled
        if method == methods::INITIALIZE {
            return;
        }
        let params = json!({"requestId": id, "reason": format!("{} timed out", method)});
        match tokio::time::timeout(self.timeout, self.notify(methods::CANCELLED, Some(params))).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => debug!(server = %self.name, error = %e, "Failed to send cancellation"),
            Err(_) => debug!(server = %self.name, "Cancellation not sent in time"),
        }
    }

    /// Send a notification (no response expected).
    async fn notify<P: Serialize>(&self, method: &str, params: Option<P>) -> Result<(), McpError> {
        let payload = serde_json::to_string(&JsonRpcNotification::new(method, params))?;
        self.submit(payload).await
    }

    /// Run the `initialize` handshake.
    pub async fn initialize(&self) -> Result<(), McpError> {
        let state = *self.state.read().await;
        if state != ConnectionState::Connected {
            return Err(McpError::protocol(format!("cannot initialize in state {}", state)));
        }

        debug!(server = %self.name, "Initializing MCP session");

        let result: InitializeResult = self
            .request(methods::INITIALIZE, Some(InitializeParams::default()))
            .await?;
        self.notify::<()>(methods::INITIALIZED, None).await?;

        info!(
            server = %self.name,
            server_name = %result.server_info.name,
            protocol_version = %result.protocol_version,
            "MCP session initialized"
        );

        *self.server.write().await = Some(result);

        let mut state = self.state.write().await;
        if *state != ConnectionState::Connected {
            // The transport went away right after the handshake
            return Err(McpError::NotInitialized {
                provider: self.name.clone(),
                state: state.to_string(),
            });
        }
        *state = ConnectionState::Ready;

        Ok(())
    }

    async fn list_all<T: Page>(&self, method: &str) -> Result<Vec<T::Item>, McpError> {
        let mut items = Vec::new();
        let mut cursor = None;

        for _ in 0..MAX_PAGES {
            let page: T = self.request(method, Some(PaginatedParams { cursor })).await?;
            let (batch, next) = page.into_parts();
            items.extend(batch);

            match next {
                Some(next) if !next.is_empty() => cursor = Some(next),
                _ => return Ok(items),
            }
        }

        warn!(server = %self.name, method, "Stopped paging after {} pages", MAX_PAGES);
        Ok(items)
    }

    /// Tools advertised by the provider, unfiltered.
    pub async fn list_tools(&self) -> Result<Vec<McpToolDefinition>, McpError> {
        self.ensure_ready().await?;
        let tools = self.list_all::<ListToolsResult>(methods::TOOLS_LIST).await?;
        debug!(server = %self.name, tool_count = tools.len(), "Listed tools");
        Ok(tools)
    }

    /// Invoke a tool by its raw name.
    ///
    /// A result flagged `isError` is still `Ok`; only protocol and transport
    /// failures are errors.
    pub async fn call_tool(
        &self,
        name: &str,
        arguments: Option<Value>,
    ) -> Result<CallToolResult, McpError> {
        self.ensure_ready().await?;

        debug!(server = %self.name, tool = name, "Calling tool");

        let params = CallToolParams {
            name: name.to_string(),
            arguments,
        };
        let result: CallToolResult = self.request(methods::TOOLS_CALL, Some(params)).await?;

        if result.is_error {
            warn!(server = %self.name, tool = name, "Tool returned error");
        }

        Ok(result)
    }

    pub async fn list_resources(&self) -> Result<Vec<Resource>, McpError> {
        self.ensure_ready().await?;
        self.list_all::<ListResourcesResult>(methods::RESOURCES_LIST).await
    }

    pub async fn read_resource(&self, uri: &str) -> Result<ReadResourceResult, McpError> {
        self.ensure_ready().await?;
        debug!(server = %self.name, uri, "Reading resource");
        self.request(
            methods::RESOURCES_READ,
            Some(ReadResourceParams { uri: uri.to_string() }),
        )
        .await
    }

    pub async fn list_prompts(&self) -> Result<Vec<Prompt>, McpError> {
        self.ensure_ready().await?;
        self.list_all::<ListPromptsResult>(methods::PROMPTS_LIST).await
    }

    /// Render a prompt template with the given arguments.
    pub async fn get_prompt(
        &self,
        name: &str,
        arguments: Option<HashMap<String, String>>,
    ) -> Result<GetPromptResult, McpError> {
        self.ensure_ready().await?;
        self.request(
            methods::PROMPTS_GET,
            Some(GetPromptParams {
                name: name.to_string(),
                arguments,
            }),
        )
        .await
    }

    /// Close the session and release its transport.
    ///
    /// Safe to call more than once and on a session whose handshake failed.
    /// Requests still waiting fail.
    pub async fn close(&self) -> Result<(), McpError> {
        {
            let mut state = self.state.write().await;
            if matches!(*state, ConnectionState::Closing | ConnectionState::Disconnected) {
                return Ok(());
            }
            *state = ConnectionState::Closing;
        }

        debug!(server = %self.name, "Closing MCP session");

        let (done, closed) = oneshot::channel();
        let result = match self.commands.send(Command::Close { done }) {
            Ok(()) => closed.await.unwrap_or(Ok(())),
            Err(_) => Ok(()),
        };
        if let Some(io) = self.io.lock().await.take() {
            if let Err(e) = io.await {
                debug!(server = %self.name, error = %e, "Session I/O task ended abnormally");
            }
        }
        self.waiters.clear();

        *self.state.write().await = ConnectionState::Disconnected;
        info!(server = %self.name, "MCP session closed");

        result.map_err(McpError::from)
    }
}

impl std::fmt::Debug for ProviderSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderSession")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{LoggingLevel, ToolContent};
    use crate::testing::{MockConnector, RecordingSink, ScriptedProvider};

    fn config(name: &str) -> ServerConfig {
        ServerConfig::stdio(name, "unused", Vec::new())
    }

    async fn ready(provider: &ScriptedProvider) -> ProviderSession {
        let sink = Arc::new(RecordingSink::default());
        let connector = MockConnector::new().with_provider(provider.clone());
        ProviderSession::connect(&config(&provider.server_name), &connector, sink)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_connect_runs_handshake() {
        let provider = ScriptedProvider::new("weather").with_tool("get_forecast", "Forecast");
        let session = ready(&provider).await;

        assert!(session.is_ready().await);
        assert_eq!(session.server_info().await.unwrap().name, "weather");
        assert_eq!(provider.methods_seen(), vec!["initialize", "notifications/initialized"]);
    }

    #[tokio::test]
    async fn test_list_and_call_tool() {
        let provider = ScriptedProvider::new("calc")
            .with_tool("add", "Add numbers")
            .with_result("add", "3");
        let session = ready(&provider).await;

        let tools = session.list_tools().await.unwrap();
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0].name, "add");

        let result = session
            .call_tool("add", Some(json!({"a": 1, "b": 2})))
            .await
            .unwrap();
        assert_eq!(result.first_text(), Some("3"));
        assert_eq!(provider.calls(), vec![("add".to_string(), Some(json!({"a": 1, "b": 2})))]);
    }

    #[tokio::test]
    async fn test_server_error_is_returned() {
        let provider = ScriptedProvider::new("calc");
        let session = ready(&provider).await;

        let err = session.call_tool("missing", None).await.unwrap_err();
        assert!(matches!(err, McpError::ServerError { code: -32602, .. }));
    }

    #[tokio::test]
    async fn test_tool_error_result_is_ok() {
        let provider = ScriptedProvider::new("calc")
            .with_tool("div", "Divide")
            .with_error_result("div", "division by zero");
        let session = ready(&provider).await;

        let result = session.call_tool("div", None).await.unwrap();
        assert!(result.is_error);
        assert_eq!(result.content, vec![ToolContent::text("division by zero")]);
    }

    #[tokio::test]
    async fn test_log_notifications_reach_sink() {
        let provider = ScriptedProvider::new("weather")
            .with_tool("get_alerts", "Alerts")
            .with_log(LoggingLevel::Warning, "upstream slow");
        let sink = Arc::new(RecordingSink::default());
        let connector = MockConnector::new().with_provider(provider.clone());
        let session = ProviderSession::connect(&config("weather"), &connector, sink.clone())
            .await
            .unwrap();

        session.call_tool("get_alerts", None).await.unwrap();

        let records = sink.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].0, "weather");
        assert_eq!(records[0].1.level, LoggingLevel::Warning);
        assert_eq!(records[0].1.data, json!("upstream slow"));
    }

    #[tokio::test]
    async fn test_log_between_requests_reaches_sink() {
        let provider = ScriptedProvider::new("weather").with_greeting_log(LoggingLevel::Info, "warming up");
        let sink = Arc::new(RecordingSink::default());
        let connector = MockConnector::new().with_provider(provider);
        let session = ProviderSession::connect(&config("weather"), &connector, sink.clone())
            .await
            .unwrap();

        for _ in 0..100 {
            if !sink.records().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        let records = sink.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].1.level, LoggingLevel::Info);
        assert_eq!(records[0].1.data, json!("warming up"));
        session.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_timed_out_call_leaves_session_usable() {
        let provider = ScriptedProvider::new("weather")
            .with_tool("get_alerts", "Alerts")
            .with_tool("get_forecast", "Forecast")
            .stalling("get_forecast");
        let connector = MockConnector::new().with_provider(provider.clone());
        let config = config("weather").with_timeout(0.05);
        let session = ProviderSession::connect(&config, &connector, Arc::new(RecordingSink::default()))
            .await
            .unwrap();

        let err = session.call_tool("get_forecast", None).await.unwrap_err();
        assert!(matches!(err, McpError::Timeout { ref method, .. } if method == "tools/call"));
        assert_eq!(session.state().await, ConnectionState::Ready);

        let result = session.call_tool("get_alerts", None).await.unwrap();
        assert_eq!(result.first_text(), Some("get_alerts ok"));
        assert!(provider
            .methods_seen()
            .iter()
            .any(|m| m == "notifications/cancelled"));
    }

    #[tokio::test]
    async fn test_server_ping_is_answered() {
        let provider = ScriptedProvider::new("weather")
            .with_tool("get_alerts", "Alerts")
            .pinging();
        let session = ready(&provider).await;

        let result = session.call_tool("get_alerts", None).await.unwrap();
        assert!(!result.is_error);
        assert!(provider.ping_answered());
    }

    #[tokio::test]
    async fn test_resources_and_prompts() {
        let provider = ScriptedProvider::new("files")
            .with_resource("file:///logs/app.log", "line one")
            .with_prompt("summarize");
        let session = ready(&provider).await;

        let resources = session.list_resources().await.unwrap();
        assert_eq!(resources[0].uri, "file:///logs/app.log");

        let contents = session.read_resource("file:///logs/app.log").await.unwrap();
        assert_eq!(contents.text(), "line one");

        let prompts = session.list_prompts().await.unwrap();
        assert_eq!(prompts[0].name, "summarize");

        let mut args = HashMap::new();
        args.insert("topic".to_string(), "rust".to_string());
        let rendered = session.get_prompt("summarize", Some(args)).await.unwrap();
        assert_eq!(rendered.messages[0].content.as_text(), Some("summarize: rust"));
    }

    #[tokio::test]
    async fn test_operations_fail_before_handshake() {
        let provider = ScriptedProvider::new("calc");
        let session = ProviderSession::new(
            &config("calc"),
            Box::new(provider.transport()),
            Arc::new(RecordingSink::default()),
        );

        let err = session.list_tools().await.unwrap_err();
        assert!(matches!(err, McpError::NotInitialized { ref state, .. } if state == "connected"));
    }

    #[tokio::test]
    async fn test_operations_fail_after_close() {
        let provider = ScriptedProvider::new("calc").with_tool("add", "Add");
        let session = ready(&provider).await;
        session.close().await.unwrap();

        let err = session.call_tool("add", None).await.unwrap_err();
        assert!(matches!(err, McpError::NotInitialized { .. }));
    }

    #[tokio::test]
    async fn test_close_twice_closes_once() {
        let provider = ScriptedProvider::new("calc");
        let session = ready(&provider).await;

        session.close().await.unwrap();
        session.close().await.unwrap();
        assert_eq!(provider.close_count(), 1);
        assert_eq!(session.state().await, ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_handshake_timeout() {
        let provider = ScriptedProvider::new("slow").silent();
        let connector = MockConnector::new().with_provider(provider.clone());
        let config = config("slow").with_timeout(0.05);

        let err = ProviderSession::connect(&config, &connector, Arc::new(RecordingSink::default()))
            .await
            .unwrap_err();

        match err {
            McpError::Connection { provider: name, kind, source } => {
                assert_eq!(name, "slow");
                assert_eq!(kind, TransportKind::Stdio);
                assert!(matches!(*source, McpError::Timeout { .. }));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(provider.close_count(), 1);
    }

    #[tokio::test]
    async fn test_handshake_rejected() {
        let provider = ScriptedProvider::new("broken").failing_initialize();
        let connector = MockConnector::new().with_provider(provider);

        let err = ProviderSession::connect(
            &config("broken"),
            &connector,
            Arc::new(RecordingSink::default()),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, McpError::Connection { .. }));
        assert!(!err.is_transport());
    }
}
