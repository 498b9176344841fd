//! Backend adapters.
//!
//! Each submodule maps the normalized message model onto one backend's wire
//! format and back:
//!
//! - [`openai`]: the OpenAI chat-completions wire (and therefore LM Studio,
//!   Ollama, vLLM, llama.cpp)
//! - [`anthropic`]: the Anthropic messages API
//! - [`gemini`]: the Google Gemini generateContent API
//! - [`compat`]: a shim over the OpenAI adapter for arbitrary compatible
//!   endpoints, with capability widening for non-OpenAI model ids
//!
//! Shared here: HTTP client construction, response-status classification
//! (including Retry-After handling), and registration of the default
//! provider set on the process-wide registry.

pub mod anthropic;
pub mod compat;
pub mod gemini;
pub mod openai;

use crate::config::ProviderConfig;
use crate::provider::retryable_status;
use crate::{Error, Result};
use std::sync::Once;
use std::time::Duration;

/// Default per-request HTTP timeout.
pub(crate) const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Build the HTTP client an adapter uses for every request.
pub(crate) fn http_client(config: &ProviderConfig) -> Result<reqwest::Client> {
    let mut builder = reqwest::Client::builder().timeout(HTTP_TIMEOUT);
    if config.skip_verify_ssl {
        builder = builder.danger_accept_invalid_certs(true);
    }
    builder.build().map_err(Error::from)
}

/// Map a non-success HTTP response to the error taxonomy.
///
/// 429 with a parsable `Retry-After` becomes a [`Error::RetryAfter`] sentinel
/// so the retry engine honors the server's pacing.
pub(crate) fn classify_response(
    status: reqwest::StatusCode,
    retry_after: Option<Duration>,
    body: String,
) -> Error {
    let code = status.as_u16();
    let detail = format!("{code}: {body}");
    match code {
        401 | 403 => Error::unauthorized(detail),
        429 => {
            let err = Error::rate_limited(detail);
            match retry_after {
                Some(delay) => Error::retry_after(delay, err),
                None => err,
            }
        }
        _ if retryable_status(code) => Error::unavailable(detail),
        400 | 422 => Error::invalid_input(detail),
        _ => Error::api(detail),
    }
}

/// Parse a `Retry-After` header value. Only the delta-seconds form is
/// supported; HTTP-date values are ignored.
pub(crate) fn parse_retry_after(headers: &reqwest::header::HeaderMap) -> Option<Duration> {
    headers
        .get(reqwest::header::RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

/// Log one side of the wire traffic when debug is enabled.
pub(crate) fn log_wire(debug: bool, direction: &str, payload: &str) {
    if debug {
        log::debug!("{direction}: {payload}");
    }
}

/// Register the built-in providers and their stock models on the
/// process-wide registry. Safe to call more than once.
pub fn register_default_providers() {
    static ONCE: Once = Once::new();
    ONCE.call_once(|| {
        let registry = crate::model::global();
        // Registration on a fresh registry only fails on duplicates, which
        // the Once guard rules out.
        let _ = anthropic::register(registry);
        let _ = gemini::register(registry);
        let _ = openai::register(registry);
        let _ = compat::register(registry);
    });
}
