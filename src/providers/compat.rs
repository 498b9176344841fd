//! OpenAI-wire-compatible shim.
//!
//! Wraps the [`openai`](super::openai) adapter so any endpoint speaking the
//! same wire format can serve chat, whatever models it hosts. Model ids that
//! are not registered OpenAI models get their capability set widened with
//! `{completion, attachment}` before delegation: the remote server is the
//! only authority on what such a model can do, so the shim assumes enough to
//! let the session proceed.

use crate::config::ProviderConfig;
use crate::model::{Capability, ModelInfo, Registry};
use crate::provider::{Chat, ChatProvider};
use crate::providers::openai::OpenAiProvider;
use crate::Result;
use std::sync::Arc;

pub(crate) const PROVIDER_NAME: &str = "openai_compatible";

/// Shim provider delegating to the OpenAI adapter.
pub struct CompatProvider {
    inner: OpenAiProvider,
}

impl CompatProvider {
    pub fn new(config: &ProviderConfig) -> Result<Self> {
        Ok(Self {
            inner: OpenAiProvider::compatible(config, PROVIDER_NAME)?,
        })
    }

    fn widen(model: &ModelInfo) -> ModelInfo {
        if model.provider == super::openai::PROVIDER_NAME {
            return model.clone();
        }
        let mut widened = model.clone();
        for capability in [Capability::Completion, Capability::Attachment] {
            if !widened.capabilities.contains(&capability) {
                widened.capabilities.push(capability);
            }
        }
        widened
    }
}

impl ChatProvider for CompatProvider {
    fn name(&self) -> &str {
        PROVIDER_NAME
    }

    fn new_chat(&self, system_prompt: &str, model: &ModelInfo) -> Result<Box<dyn Chat>> {
        self.inner.new_chat(system_prompt, &Self::widen(model))
    }

    fn is_retryable_error(&self, err: &crate::Error) -> bool {
        self.inner.is_retryable_error(err)
    }
}

/// Register the shim on the registry.
pub fn register(registry: &Registry) -> Result<()> {
    registry.register_chat_provider(PROVIDER_NAME, |config| {
        Ok(Arc::new(CompatProvider::new(config)?) as Arc<dyn ChatProvider>)
    })
}
