//! Provider configuration helpers.
//!
//! [`ProviderConfig`] is the option set every provider constructor accepts:
//! endpoint override, API key, TLS relaxation, wire debugging, and the
//! OpenAI-compatibility toggle. Keys and endpoints fall back to per-provider
//! environment variables so application code rarely has to thread secrets.
//!
//! ## Environment Variables
//!
//! | Provider | API key | Base URL |
//! |----------|---------|----------|
//! | anthropic | `ANTHROPIC_API_KEY` | `ANTHROPIC_BASE_URL` |
//! | gemini | `GEMINI_API_KEY` | `GEMINI_BASE_URL` |
//! | openai | `OPENAI_API_KEY` | `OPENAI_BASE_URL` |
//!
//! # Examples
//!
//! ```rust
//! use agent_core::config::{KnownProvider, ProviderConfig};
//!
//! let config = ProviderConfig::new()
//!     .with_base_url("http://localhost:11434/v1")
//!     .with_api_key("not-needed");
//!
//! let url = config.resolve_base_url(KnownProvider::OpenAi);
//! assert_eq!(url, "http://localhost:11434/v1");
//! ```

use std::env;
use std::str::FromStr;

/// The backends this crate ships adapters for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KnownProvider {
    /// Anthropic messages API.
    Anthropic,
    /// Google Gemini generateContent API.
    Gemini,
    /// OpenAI chat completions API, and every server speaking its wire
    /// format (LM Studio, Ollama, vLLM, llama.cpp).
    OpenAi,
}

impl KnownProvider {
    /// Registry name of the provider.
    pub fn name(&self) -> &'static str {
        match self {
            KnownProvider::Anthropic => "anthropic",
            KnownProvider::Gemini => "gemini",
            KnownProvider::OpenAi => "openai",
        }
    }

    /// Default API endpoint.
    pub fn default_base_url(&self) -> &'static str {
        match self {
            KnownProvider::Anthropic => "https://api.anthropic.com",
            KnownProvider::Gemini => "https://generativelanguage.googleapis.com/v1beta",
            KnownProvider::OpenAi => "https://api.openai.com/v1",
        }
    }

    /// Environment variable consulted for the API key.
    pub fn api_key_env(&self) -> &'static str {
        match self {
            KnownProvider::Anthropic => "ANTHROPIC_API_KEY",
            KnownProvider::Gemini => "GEMINI_API_KEY",
            KnownProvider::OpenAi => "OPENAI_API_KEY",
        }
    }

    /// Environment variable consulted for the endpoint override.
    pub fn base_url_env(&self) -> &'static str {
        match self {
            KnownProvider::Anthropic => "ANTHROPIC_BASE_URL",
            KnownProvider::Gemini => "GEMINI_BASE_URL",
            KnownProvider::OpenAi => "OPENAI_BASE_URL",
        }
    }
}

impl FromStr for KnownProvider {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "anthropic" => Ok(KnownProvider::Anthropic),
            "gemini" | "google" => Ok(KnownProvider::Gemini),
            "openai" => Ok(KnownProvider::OpenAi),
            other => Err(format!("unknown provider: {other}")),
        }
    }
}

impl std::fmt::Display for KnownProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Options accepted by every provider constructor.
#[derive(Clone, Default)]
pub struct ProviderConfig {
    /// Endpoint override; falls back to the provider env var, then the
    /// provider default.
    pub base_url: Option<String>,
    /// Auth secret; falls back to the provider env var.
    pub api_key: Option<String>,
    /// Accept invalid TLS certificates. Local proxies only.
    pub skip_verify_ssl: bool,
    /// Log request/response wire traffic at debug level.
    pub debug: bool,
    /// Treat non-OpenAI model ids as first-class on the OpenAI wire
    /// (capability widening in the compat shim).
    pub openai_compatibility_mode: bool,
}

/// Masks the API key so configs are safe to log.
impl std::fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("base_url", &self.base_url)
            .field("api_key", &self.api_key.as_ref().map(|_| "***"))
            .field("skip_verify_ssl", &self.skip_verify_ssl)
            .field("debug", &self.debug)
            .field("openai_compatibility_mode", &self.openai_compatibility_mode)
            .finish()
    }
}

impl ProviderConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    pub fn with_skip_verify_ssl(mut self, skip: bool) -> Self {
        self.skip_verify_ssl = skip;
        self
    }

    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    pub fn with_openai_compatibility(mut self, enabled: bool) -> Self {
        self.openai_compatibility_mode = enabled;
        self
    }

    /// The API key for `provider`: explicit value first, then the provider's
    /// environment variable. Empty values are treated as absent.
    pub fn resolve_api_key(&self, provider: KnownProvider) -> Option<String> {
        self.api_key
            .clone()
            .filter(|key| !key.trim().is_empty())
            .or_else(|| {
                env::var(provider.api_key_env())
                    .ok()
                    .filter(|key| !key.trim().is_empty())
            })
    }

    /// The endpoint for `provider`: explicit value, environment variable,
    /// then the provider default.
    pub fn resolve_base_url(&self, provider: KnownProvider) -> String {
        self.base_url
            .clone()
            .filter(|url| !url.trim().is_empty())
            .or_else(|| {
                env::var(provider.base_url_env())
                    .ok()
                    .filter(|url| !url.trim().is_empty())
            })
            .unwrap_or_else(|| provider.default_base_url().to_string())
    }
}
