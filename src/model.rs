//! Model descriptors and the process-wide provider/model registry.
//!
//! A [`ModelInfo`] describes one model: wire name, context window, default
//! output budget, capability set, and cost coefficients. The capability set
//! gates feature selection: only [`Capability::Reasoning`] models receive a
//! thinking budget, only [`Capability::Embedding`] models may back an
//! embedder.
//!
//! The [`Registry`] maps provider names to chat/embedder constructors
//! (independently) and holds the registered models. A process-wide instance
//! is available through [`global`] and the free registration functions;
//! tests can build private registries. Registration is write-once per name:
//! duplicates fail with [`Error::AlreadyExists`]. Lookups of unknown model
//! ids return a synthetic `{completion, embedding}` descriptor so unknown
//! ids still function degradedly.

use crate::config::ProviderConfig;
use crate::provider::{ChatProvider, EmbedderProvider};
use crate::{Error, Result};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// What a model can do.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum Capability {
    /// Chat/text completion.
    Completion,
    /// Text embedding.
    Embedding,
    /// Extended thinking; unlocks the reasoning-effort option.
    Reasoning,
    /// Binary attachments (images, documents).
    Attachment,
}

/// Descriptor for one registered model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ModelInfo {
    /// Name of the provider that serves this model.
    pub provider: String,
    /// Stable identifier used by callers.
    pub id: String,
    /// Human-readable name.
    pub name: String,
    /// Identifier sent on the wire, where it differs from `id`.
    pub wire_name: String,
    /// Context window in tokens.
    pub context_window: u32,
    /// Default maximum output tokens.
    pub default_max_tokens: u32,
    /// Capability set.
    pub capabilities: Vec<Capability>,
    /// Cost per million input tokens, in dollars. Reported, never enforced.
    pub input_cost_per_mtok: f64,
    /// Cost per million output tokens, in dollars. Reported, never enforced.
    pub output_cost_per_mtok: f64,
}

impl ModelInfo {
    /// Start a descriptor with conservative defaults.
    pub fn new(provider: impl Into<String>, id: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            provider: provider.into(),
            name: id.clone(),
            wire_name: id.clone(),
            id,
            context_window: 128_000,
            default_max_tokens: 4096,
            capabilities: vec![Capability::Completion],
            input_cost_per_mtok: 0.0,
            output_cost_per_mtok: 0.0,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_wire_name(mut self, wire_name: impl Into<String>) -> Self {
        self.wire_name = wire_name.into();
        self
    }

    pub fn with_context_window(mut self, tokens: u32) -> Self {
        self.context_window = tokens;
        self
    }

    pub fn with_default_max_tokens(mut self, tokens: u32) -> Self {
        self.default_max_tokens = tokens;
        self
    }

    pub fn with_capabilities(mut self, capabilities: Vec<Capability>) -> Self {
        self.capabilities = capabilities;
        self
    }

    pub fn with_costs(mut self, input_per_mtok: f64, output_per_mtok: f64) -> Self {
        self.input_cost_per_mtok = input_per_mtok;
        self.output_cost_per_mtok = output_per_mtok;
        self
    }

    /// True if the capability set contains `capability`.
    pub fn supports(&self, capability: Capability) -> bool {
        self.capabilities.contains(&capability)
    }

    /// Synthetic descriptor for an id nobody registered: chat and embedding
    /// are assumed so the id still functions, degradedly.
    pub fn synthetic_default(id: &str) -> Self {
        ModelInfo::new("", id).with_capabilities(vec![Capability::Completion, Capability::Embedding])
    }
}

/// Constructor for a chat provider under a [`ProviderConfig`].
pub type ChatProviderFactory =
    Arc<dyn Fn(&ProviderConfig) -> Result<Arc<dyn ChatProvider>> + Send + Sync>;

/// Constructor for an embedder provider under a [`ProviderConfig`].
pub type EmbedderProviderFactory =
    Arc<dyn Fn(&ProviderConfig) -> Result<Arc<dyn EmbedderProvider>> + Send + Sync>;

/// Registry of named providers and models.
///
/// Append-only at runtime for models, write-once per name for providers.
#[derive(Default)]
pub struct Registry {
    models: RwLock<Vec<ModelInfo>>,
    chat: RwLock<HashMap<String, ChatProviderFactory>>,
    embedders: RwLock<HashMap<String, EmbedderProviderFactory>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a model descriptor. Fails on a duplicate id.
    pub fn register_model(&self, model: ModelInfo) -> Result<()> {
        let mut models = self.models.write().expect("model table poisoned");
        if models.iter().any(|m| m.id == model.id) {
            return Err(Error::already_exists(format!("model {}", model.id)));
        }
        models.push(model);
        Ok(())
    }

    /// Register a chat-provider constructor. Fails on a duplicate name.
    pub fn register_chat_provider<F>(&self, name: &str, factory: F) -> Result<()>
    where
        F: Fn(&ProviderConfig) -> Result<Arc<dyn ChatProvider>> + Send + Sync + 'static,
    {
        let mut chat = self.chat.write().expect("chat table poisoned");
        if chat.contains_key(name) {
            return Err(Error::already_exists(format!("chat provider {name}")));
        }
        chat.insert(name.to_string(), Arc::new(factory));
        Ok(())
    }

    /// Register an embedder-provider constructor. Fails on a duplicate name.
    pub fn register_embedder_provider<F>(&self, name: &str, factory: F) -> Result<()>
    where
        F: Fn(&ProviderConfig) -> Result<Arc<dyn EmbedderProvider>> + Send + Sync + 'static,
    {
        let mut embedders = self.embedders.write().expect("embedder table poisoned");
        if embedders.contains_key(name) {
            return Err(Error::already_exists(format!("embedder provider {name}")));
        }
        embedders.insert(name.to_string(), Arc::new(factory));
        Ok(())
    }

    /// Look up a model by id. The bool reports whether the id was actually
    /// registered; unknown ids yield [`ModelInfo::synthetic_default`].
    pub fn get_model(&self, id: &str) -> (ModelInfo, bool) {
        let models = self.models.read().expect("model table poisoned");
        match models.iter().find(|m| m.id == id) {
            Some(model) => (model.clone(), true),
            None => (ModelInfo::synthetic_default(id), false),
        }
    }

    /// All models registered for one provider.
    pub fn models_for_provider(&self, provider: &str) -> Vec<ModelInfo> {
        let models = self.models.read().expect("model table poisoned");
        models.iter().filter(|m| m.provider == provider).cloned().collect()
    }

    /// Construct the chat provider registered under `name`.
    pub fn chat_provider(
        &self,
        name: &str,
        config: &ProviderConfig,
    ) -> Result<Arc<dyn ChatProvider>> {
        let factory = {
            let chat = self.chat.read().expect("chat table poisoned");
            chat.get(name).cloned()
        };
        match factory {
            Some(factory) => factory(config),
            None => Err(Error::not_found(format!("chat provider {name}"))),
        }
    }

    /// Construct the embedder provider registered under `name`.
    pub fn embedder_provider(
        &self,
        name: &str,
        config: &ProviderConfig,
    ) -> Result<Arc<dyn EmbedderProvider>> {
        let factory = {
            let embedders = self.embedders.read().expect("embedder table poisoned");
            embedders.get(name).cloned()
        };
        match factory {
            Some(factory) => factory(config),
            None => Err(Error::not_found(format!("embedder provider {name}"))),
        }
    }
}

static GLOBAL: Lazy<Registry> = Lazy::new(Registry::new);

/// The process-wide registry.
pub fn global() -> &'static Registry {
    &GLOBAL
}

/// Register a model on the process-wide registry.
pub fn register_model(model: ModelInfo) -> Result<()> {
    global().register_model(model)
}

/// Register a chat provider on the process-wide registry.
pub fn register_chat_provider<F>(name: &str, factory: F) -> Result<()>
where
    F: Fn(&ProviderConfig) -> Result<Arc<dyn ChatProvider>> + Send + Sync + 'static,
{
    global().register_chat_provider(name, factory)
}

/// Register an embedder provider on the process-wide registry.
pub fn register_embedder_provider<F>(name: &str, factory: F) -> Result<()>
where
    F: Fn(&ProviderConfig) -> Result<Arc<dyn EmbedderProvider>> + Send + Sync + 'static,
{
    global().register_embedder_provider(name, factory)
}

/// Look up a model on the process-wide registry.
pub fn get_model(id: &str) -> (ModelInfo, bool) {
    global().get_model(id)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn claude() -> ModelInfo {
        ModelInfo::new("anthropic", "claude-sonnet-4-5")
            .with_name("Claude Sonnet 4.5")
            .with_context_window(200_000)
            .with_default_max_tokens(8192)
            .with_capabilities(vec![
                Capability::Completion,
                Capability::Reasoning,
                Capability::Attachment,
            ])
            .with_costs(3.0, 15.0)
    }

    #[test]
    fn test_model_builder_and_supports() {
        let model = claude();
        assert_eq!(model.wire_name, "claude-sonnet-4-5");
        assert!(model.supports(Capability::Reasoning));
        assert!(!model.supports(Capability::Embedding));
    }

    #[test]
    fn test_register_model_rejects_duplicates() {
        let registry = Registry::new();
        registry.register_model(claude()).unwrap();
        assert!(matches!(
            registry.register_model(claude()),
            Err(Error::AlreadyExists(_))
        ));
    }

    #[test]
    fn test_get_model_known_and_synthetic() {
        let registry = Registry::new();
        registry.register_model(claude()).unwrap();

        let (model, present) = registry.get_model("claude-sonnet-4-5");
        assert!(present);
        assert_eq!(model.provider, "anthropic");

        let (fallback, present) = registry.get_model("no-such-model");
        assert!(!present);
        assert_eq!(fallback.id, "no-such-model");
        assert!(fallback.supports(Capability::Completion));
        assert!(fallback.supports(Capability::Embedding));
        assert!(!fallback.supports(Capability::Reasoning));
    }

    #[test]
    fn test_models_for_provider_filters() {
        let registry = Registry::new();
        registry.register_model(claude()).unwrap();
        registry
            .register_model(ModelInfo::new("gemini", "gemini-2.0-flash"))
            .unwrap();

        let anthropic = registry.models_for_provider("anthropic");
        assert_eq!(anthropic.len(), 1);
        assert_eq!(anthropic[0].id, "claude-sonnet-4-5");
    }

    #[test]
    fn test_unknown_provider_lookup_fails() {
        let registry = Registry::new();
        let config = ProviderConfig::default();
        assert!(matches!(
            registry.chat_provider("nope", &config),
            Err(Error::NotFound(_))
        ));
        assert!(matches!(
            registry.embedder_provider("nope", &config),
            Err(Error::NotFound(_))
        ));
    }
}
