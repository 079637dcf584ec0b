//! # conduit-core
//!
//! Core types and configuration for Conduit.
//!
//! This crate provides:
//! - The tool-provider configuration file format and its validation
//! - Host settings (model vendor, models, API keys)
//! - The shared error type
//! - A buffered Server-Sent-Events parser used by every streaming client

pub mod config;
pub mod error;
pub mod sse;
pub mod vendor;

pub use config::{
    ConfigValidationError, DecodeErrors, RemoteConfig, ServerConfig, Settings, StdioConfig,
    TransportConfig, TransportKind,
};
pub use error::{Error, Result};
pub use vendor::VendorKind;
