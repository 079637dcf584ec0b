//! Host settings: which vendor to talk to and how.

use std::path::PathBuf;

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use url::Url;

use super::validation::ValidationResult;
use crate::error::Error;
use crate::vendor::VendorKind;

/// Instruction sent to vendors that take a system prompt.
pub const DEFAULT_SYSTEM_PROMPT: &str =
    "You are a helpful assistant. Please use tools when necessary.";

/// Resource read by the shell's `logs` command.
pub const DEFAULT_LOGS_URI: &str = "file:///logs/app.log";

/// Host settings.
///
/// Assembled from defaults, `conduit.toml` files and the environment.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Vendor driving the conversation.
    pub vendor: VendorKind,
    /// Path of the tool-provider configuration file.
    pub servers_file: PathBuf,
    /// Model name per vendor.
    pub models: ModelSettings,
    /// Output token cap per model request.
    pub max_tokens: u32,
    pub system_prompt: String,
    /// Upper bound on model round-trips within one query.
    pub max_tool_rounds: usize,
    pub logs_uri: String,
    /// Base URL overrides, mainly for proxies.
    pub endpoints: EndpointSettings,
    pub anthropic_api_key: Option<String>,
    pub openai_api_key: Option<String>,
    pub google_api_key: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            vendor: VendorKind::Anthropic,
            servers_file: PathBuf::from("servers-config.json"),
            models: ModelSettings::default(),
            max_tokens: 1000,
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            max_tool_rounds: 20,
            logs_uri: DEFAULT_LOGS_URI.to_string(),
            endpoints: EndpointSettings::default(),
            anthropic_api_key: None,
            openai_api_key: None,
            google_api_key: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelSettings {
    pub anthropic: String,
    pub openai: String,
    pub google: String,
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self {
            anthropic: "claude-3-5-sonnet-20241022".to_string(),
            openai: "gpt-4o-mini".to_string(),
            google: "gemini-2.5-pro".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EndpointSettings {
    pub anthropic: Option<String>,
    pub openai: Option<String>,
    pub google: Option<String>,
}

impl Settings {
    /// Load settings from all sources.
    pub fn load() -> Result<Self, figment::Error> {
        Self::figment().extract()
    }

    /// The layered sources, lowest precedence first.
    pub fn figment() -> Figment {
        Figment::new()
            .merge(Serialized::defaults(Settings::default()))
            // User config
            .merge(Toml::file(Self::config_dir().join("conduit.toml")))
            // Project config
            .merge(Toml::file("conduit.toml"))
            .merge(Env::prefixed("CONDUIT_").split("__"))
            .merge(Env::raw().only(&[
                VendorKind::Anthropic.api_key_var(),
                VendorKind::OpenAi.api_key_var(),
                VendorKind::Google.api_key_var(),
            ]))
    }

    /// Load and validate settings.
    pub fn load_validated() -> Result<Self, Error> {
        let settings = Self::load()?;
        settings.validate().into_result()?;
        Ok(settings)
    }

    /// Validate the settings.
    pub fn validate(&self) -> ValidationResult {
        let mut result = ValidationResult::new();

        if self.max_tokens == 0 {
            result.add_error("max_tokens", "max_tokens must be greater than 0");
        }

        if self.max_tool_rounds == 0 {
            result.add_error("max_tool_rounds", "max_tool_rounds must be greater than 0");
        }

        if self.logs_uri.trim().is_empty() {
            result.add_error("logs_uri", "logs_uri cannot be empty");
        }

        if self.system_prompt.trim().is_empty() {
            result.add_warning("system_prompt", "system prompt is empty");
        }

        for vendor in VendorKind::ALL {
            if self.model(vendor).trim().is_empty() {
                result.add_error(format!("models.{}", vendor), "model name cannot be empty");
            }

            if let Some(endpoint) = self.endpoint(vendor) {
                if !matches!(Url::parse(endpoint), Ok(url) if matches!(url.scheme(), "http" | "https"))
                {
                    result.add_error(
                        format!("endpoints.{}", vendor),
                        "endpoint must be an http:// or https:// URL",
                    );
                }
            }
        }

        if self
            .api_key(self.vendor)
            .map(str::is_empty)
            .unwrap_or(false)
        {
            result.add_warning(
                format!("{}_api_key", self.vendor),
                "API key is empty string",
            );
        }

        result
    }

    /// Model configured for `vendor`.
    pub fn model(&self, vendor: VendorKind) -> &str {
        match vendor {
            VendorKind::Anthropic => &self.models.anthropic,
            VendorKind::OpenAi => &self.models.openai,
            VendorKind::Google => &self.models.google,
        }
    }

    /// Base URL override for `vendor`.
    pub fn endpoint(&self, vendor: VendorKind) -> Option<&str> {
        match vendor {
            VendorKind::Anthropic => self.endpoints.anthropic.as_deref(),
            VendorKind::OpenAi => self.endpoints.openai.as_deref(),
            VendorKind::Google => self.endpoints.google.as_deref(),
        }
    }

    /// API key for `vendor`, if one was supplied.
    pub fn api_key(&self, vendor: VendorKind) -> Option<&str> {
        match vendor {
            VendorKind::Anthropic => self.anthropic_api_key.as_deref(),
            VendorKind::OpenAi => self.openai_api_key.as_deref(),
            VendorKind::Google => self.google_api_key.as_deref(),
        }
    }

    /// Get the configuration directory.
    pub fn config_dir() -> PathBuf {
        dirs::config_dir()
            .map(|p| p.join("conduit"))
            .unwrap_or_else(|| PathBuf::from("~/.config/conduit"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings_are_valid() {
        let settings = Settings::default();
        let result = settings.validate();
        assert!(result.is_ok(), "default settings should be valid: {:?}", result.issues);
        assert_eq!(settings.max_tokens, 1000);
        assert_eq!(settings.model(VendorKind::OpenAi), "gpt-4o-mini");
    }

    #[test]
    fn test_zero_rounds_is_error() {
        let settings = Settings {
            max_tool_rounds: 0,
            ..Settings::default()
        };
        let result = settings.validate();
        assert!(result.errors().any(|e| e.field == "max_tool_rounds"));
    }

    #[test]
    fn test_bad_endpoint_is_error() {
        let mut settings = Settings::default();
        settings.endpoints.google = Some("ftp://example.com".to_string());
        let result = settings.validate();
        assert!(result.errors().any(|e| e.field == "endpoints.google"));
    }

    #[test]
    fn test_layered_sources() {
        figment::Jail::expect_with(|jail| {
            jail.create_file(
                "conduit.toml",
                r#"
                    vendor = "openai"
                    max_tokens = 2000

                    [models]
                    openai = "gpt-4o"
                "#,
            )?;
            jail.set_env("CONDUIT_MAX_TOKENS", "1500");
            jail.set_env("CONDUIT_MODELS__GOOGLE", "gemini-2.0-flash");
            jail.set_env("OPENAI_API_KEY", "sk-test");

            let settings = Settings::load()?;
            assert_eq!(settings.vendor, VendorKind::OpenAi);
            assert_eq!(settings.max_tokens, 1500);
            assert_eq!(settings.model(VendorKind::OpenAi), "gpt-4o");
            assert_eq!(settings.model(VendorKind::Google), "gemini-2.0-flash");
            assert_eq!(settings.api_key(VendorKind::OpenAi), Some("sk-test"));
            Ok(())
        });
    }
}
