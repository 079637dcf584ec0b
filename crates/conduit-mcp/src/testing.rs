//! In-memory MCP providers for tests.
//!
//! [`ScriptedProvider`] answers the JSON-RPC methods the host uses from a
//! fixed script, records what it was asked, and hands out
//! [`MockTransport`]s through [`MockConnector`].

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use conduit_core::{ServerConfig, TransportKind};
use serde_json::{json, Value};
use tokio::sync::mpsc;

use crate::error::TransportError;
use crate::logging::LogSink;
use crate::protocol::{
    methods, Incoming, JsonRpcError, LoggingLevel, LoggingMessageParams, RequestId,
    MCP_PROTOCOL_VERSION,
};
use crate::transport::{Connector, Transport};

const SERVER_PING_ID: &str = "server-ping";

#[derive(Debug, Default)]
struct ProviderLog {
    methods: Vec<String>,
    calls: Vec<(String, Option<Value>)>,
    closes: usize,
    ping_answered: bool,
}

/// A provider whose answers are fixed up front.
#[derive(Debug, Clone, Default)]
pub struct ScriptedProvider {
    pub server_name: String,
    tools: Vec<(String, String)>,
    results: HashMap<String, (String, bool)>,
    resources: BTreeMap<String, String>,
    prompts: Vec<String>,
    logs: Vec<(LoggingLevel, Value)>,
    greeting: Option<(LoggingLevel, Value)>,
    stalled: Vec<String>,
    fail_initialize: bool,
    fail_list_tools: bool,
    silent: bool,
    ping_first: bool,
    log: Arc<Mutex<ProviderLog>>,
}

impl ScriptedProvider {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            server_name: name.into(),
            ..Self::default()
        }
    }

    /// Advertise a tool taking an object argument.
    pub fn with_tool(mut self, name: impl Into<String>, description: impl Into<String>) -> Self {
        self.tools.push((name.into(), description.into()));
        self
    }

    /// Text returned when `tool` is called.
    pub fn with_result(mut self, tool: impl Into<String>, text: impl Into<String>) -> Self {
        self.results.insert(tool.into(), (text.into(), false));
        self
    }

    /// Text returned with `isError: true` when `tool` is called.
    pub fn with_error_result(mut self, tool: impl Into<String>, text: impl Into<String>) -> Self {
        self.results.insert(tool.into(), (text.into(), true));
        self
    }

    pub fn with_resource(mut self, uri: impl Into<String>, text: impl Into<String>) -> Self {
        self.resources.insert(uri.into(), text.into());
        self
    }

    pub fn with_prompt(mut self, name: impl Into<String>) -> Self {
        self.prompts.push(name.into());
        self
    }

    /// Emit a log notification ahead of every `tools/call` response.
    pub fn with_log(mut self, level: LoggingLevel, data: impl Into<Value>) -> Self {
        self.logs.push((level, data.into()));
        self
    }

    /// Emit one log notification right after the handshake, unprompted.
    pub fn with_greeting_log(mut self, level: LoggingLevel, data: impl Into<Value>) -> Self {
        self.greeting = Some((level, data.into()));
        self
    }

    /// Never answer `tools/call` for `tool`.
    pub fn stalling(mut self, tool: impl Into<String>) -> Self {
        self.stalled.push(tool.into());
        self
    }

    /// Answer `initialize` with an error.
    pub fn failing_initialize(mut self) -> Self {
        self.fail_initialize = true;
        self
    }

    /// Answer `tools/list` with an error.
    pub fn failing_list_tools(mut self) -> Self {
        self.fail_list_tools = true;
        self
    }

    /// Never answer anything.
    pub fn silent(mut self) -> Self {
        self.silent = true;
        self
    }

    /// Ping the host before answering each `tools/call`.
    pub fn pinging(mut self) -> Self {
        self.ping_first = true;
        self
    }

    /// A fresh transport connected to this provider.
    pub fn transport(&self) -> MockTransport {
        let (outbox, inbox) = mpsc::unbounded_channel();
        MockTransport {
            provider: self.clone(),
            kind: TransportKind::Stdio,
            outbox,
            inbox,
            connected: true,
            close_order: None,
        }
    }

    /// Methods received, in order.
    pub fn methods_seen(&self) -> Vec<String> {
        self.lock().methods.clone()
    }

    /// Tool calls received, in order.
    pub fn calls(&self) -> Vec<(String, Option<Value>)> {
        self.lock().calls.clone()
    }

    pub fn close_count(&self) -> usize {
        self.lock().closes
    }

    pub fn ping_answered(&self) -> bool {
        self.lock().ping_answered
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ProviderLog> {
        self.log.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Messages to deliver for one request, ending with its response.
    fn answer(&self, id: RequestId, method: &str, params: Option<Value>) -> Vec<Value> {
        self.lock().methods.push(method.to_string());

        let mut out = Vec::new();
        let outcome = match method {
            methods::INITIALIZE if self.fail_initialize => {
                Err((JsonRpcError::INTERNAL_ERROR, "initialization refused".to_string()))
            }
            methods::INITIALIZE => Ok(json!({
                "protocolVersion": MCP_PROTOCOL_VERSION,
                "capabilities": {"tools": {}, "resources": {}, "prompts": {}, "logging": {}},
                "serverInfo": {"name": self.server_name, "version": "1.0.0"}
            })),
            methods::TOOLS_LIST if self.fail_list_tools => {
                Err((JsonRpcError::INTERNAL_ERROR, "tools unavailable".to_string()))
            }
            methods::TOOLS_LIST => Ok(json!({
                "tools": self.tools.iter().map(|(name, description)| json!({
                    "name": name,
                    "description": description,
                    "inputSchema": {"type": "object", "properties": {}}
                })).collect::<Vec<_>>()
            })),
            methods::TOOLS_CALL => {
                let name = params
                    .as_ref()
                    .and_then(|p| p.get("name"))
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                let arguments = params.as_ref().and_then(|p| p.get("arguments")).cloned();

                if self.ping_first {
                    out.push(json!({"jsonrpc": "2.0", "id": SERVER_PING_ID, "method": methods::PING}));
                }
                for (level, data) in &self.logs {
                    out.push(json!({
                        "jsonrpc": "2.0",
                        "method": methods::LOG_MESSAGE,
                        "params": {"level": level, "logger": self.server_name, "data": data}
                    }));
                }

                if self.stalled.contains(&name) {
                    self.lock().calls.push((name, arguments));
                    return out;
                }

                if !self.tools.iter().any(|(tool, _)| *tool == name) {
                    Err((JsonRpcError::INVALID_PARAMS, format!("Unknown tool: {}", name)))
                } else {
                    self.lock().calls.push((name.clone(), arguments));
                    let (text, is_error) = self
                        .results
                        .get(&name)
                        .cloned()
                        .unwrap_or_else(|| (format!("{} ok", name), false));
                    Ok(json!({"content": [{"type": "text", "text": text}], "isError": is_error}))
                }
            }
            methods::RESOURCES_LIST => Ok(json!({
                "resources": self.resources.keys().map(|uri| json!({"uri": uri, "name": uri})).collect::<Vec<_>>()
            })),
            methods::RESOURCES_READ => {
                let uri = params
                    .as_ref()
                    .and_then(|p| p.get("uri"))
                    .and_then(Value::as_str)
                    .unwrap_or_default();
                match self.resources.get(uri) {
                    Some(text) => Ok(json!({
                        "contents": [{"uri": uri, "mimeType": "text/plain", "text": text}]
                    })),
                    None => Err((-32002, format!("Resource not found: {}", uri))),
                }
            }
            methods::PROMPTS_LIST => Ok(json!({
                "prompts": self.prompts.iter().map(|name| json!({
                    "name": name,
                    "arguments": [{"name": "topic", "required": false}]
                })).collect::<Vec<_>>()
            })),
            methods::PROMPTS_GET => {
                let name = params
                    .as_ref()
                    .and_then(|p| p.get("name"))
                    .and_then(Value::as_str)
                    .unwrap_or_default();
                let args: Vec<String> = params
                    .as_ref()
                    .and_then(|p| p.get("arguments"))
                    .and_then(Value::as_object)
                    .map(|m| m.values().filter_map(Value::as_str).map(str::to_string).collect())
                    .unwrap_or_default();
                let text = if args.is_empty() {
                    name.to_string()
                } else {
                    format!("{}: {}", name, args.join(", "))
                };
                Ok(json!({"messages": [{"role": "user", "content": {"type": "text", "text": text}}]}))
            }
            other => Err((JsonRpcError::METHOD_NOT_FOUND, format!("Method not found: {}", other))),
        };

        out.push(match outcome {
            Ok(result) => json!({"jsonrpc": "2.0", "id": id, "result": result}),
            Err((code, message)) => {
                json!({"jsonrpc": "2.0", "id": id, "error": {"code": code, "message": message}})
            }
        });
        out
    }
}

/// Transport backed by a [`ScriptedProvider`].
#[derive(Debug)]
pub struct MockTransport {
    provider: ScriptedProvider,
    kind: TransportKind,
    /// Messages queued for the host; the transport holds both ends, so
    /// an empty queue waits instead of closing.
    outbox: mpsc::UnboundedSender<String>,
    inbox: mpsc::UnboundedReceiver<String>,
    connected: bool,
    close_order: Option<Arc<Mutex<Vec<String>>>>,
}

#[async_trait]
impl Transport for MockTransport {
    fn kind(&self) -> TransportKind {
        self.kind
    }

    async fn send(&mut self, message: &str) -> Result<(), TransportError> {
        if !self.connected {
            return Err(TransportError::NotConnected);
        }

        let incoming = Incoming::parse(message).map_err(TransportError::Protocol)?;
        match incoming {
            Incoming::Request { id, method, params } => {
                if self.provider.silent {
                    self.provider.lock().methods.push(method);
                } else {
                    for reply in self.provider.answer(id, &method, params) {
                        let _ = self.outbox.send(reply.to_string());
                    }
                }
            }
            Incoming::Notification { method, .. } => {
                if method == methods::INITIALIZED {
                    if let Some((level, data)) = &self.provider.greeting {
                        let log = json!({
                            "jsonrpc": "2.0",
                            "method": methods::LOG_MESSAGE,
                            "params": {"level": level, "data": data}
                        });
                        let _ = self.outbox.send(log.to_string());
                    }
                }
                self.provider.lock().methods.push(method);
            }
            Incoming::Response { id, outcome } => {
                if id == RequestId::from(SERVER_PING_ID) && outcome.is_ok() {
                    self.provider.lock().ping_answered = true;
                }
            }
        }
        Ok(())
    }

    async fn receive(&mut self) -> Result<String, TransportError> {
        if !self.connected {
            return Err(TransportError::NotConnected);
        }
        match self.inbox.recv().await {
            Some(message) => Ok(message),
            None => {
                self.connected = false;
                Err(TransportError::ConnectionClosed)
            }
        }
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        if self.connected {
            self.connected = false;
            self.provider.lock().closes += 1;
            if let Some(order) = &self.close_order {
                order
                    .lock()
                    .unwrap_or_else(|poisoned| poisoned.into_inner())
                    .push(self.provider.server_name.clone());
            }
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected
    }
}

/// Connector that serves registered [`ScriptedProvider`]s by name.
///
/// Unknown names fail to open the way a missing executable would.
#[derive(Debug, Clone, Default)]
pub struct MockConnector {
    providers: HashMap<String, ScriptedProvider>,
    opened: Arc<Mutex<Vec<String>>>,
    close_order: Arc<Mutex<Vec<String>>>,
}

impl MockConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_provider(mut self, provider: ScriptedProvider) -> Self {
        self.providers.insert(provider.server_name.clone(), provider);
        self
    }

    /// Names opened so far, in order.
    pub fn opened(&self) -> Vec<String> {
        self.opened
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Names whose transports were closed, in order.
    pub fn close_order(&self) -> Vec<String> {
        self.close_order
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn open(&self, config: &ServerConfig) -> Result<Box<dyn Transport>, TransportError> {
        self.opened
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(config.name.clone());

        let provider = self.providers.get(&config.name).ok_or_else(|| {
            TransportError::SpawnFailed(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("no scripted provider named '{}'", config.name),
            ))
        })?;

        let mut transport = provider.transport();
        transport.kind = config.kind();
        transport.close_order = Some(Arc::clone(&self.close_order));
        Ok(Box::new(transport))
    }
}

/// Log sink that keeps every record.
#[derive(Debug, Default)]
pub struct RecordingSink {
    records: Mutex<Vec<(String, LoggingMessageParams)>>,
}

impl RecordingSink {
    pub fn records(&self) -> Vec<(String, LoggingMessageParams)> {
        self.records
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

impl LogSink for RecordingSink {
    fn record(&self, provider: &str, message: &LoggingMessageParams) {
        self.records
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push((provider.to_string(), message.clone()));
    }
}
