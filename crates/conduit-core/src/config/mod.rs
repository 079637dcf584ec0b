//! Configuration: the tool-provider servers file and host settings.

mod servers;
mod settings;
mod validation;

pub use servers::{
    load_servers_file, parse_servers, DecodeErrors, RemoteConfig, ServerConfig, StdioConfig,
    TransportConfig, TransportKind, DEFAULT_TIMEOUT_SECS, READ_TIMEOUT_FACTOR, SERVERS_KEY,
};
pub use settings::{
    EndpointSettings, ModelSettings, Settings, DEFAULT_LOGS_URI, DEFAULT_SYSTEM_PROMPT,
};
pub use validation::{ConfigValidationError, IssueSeverity, ValidationIssue, ValidationResult};
