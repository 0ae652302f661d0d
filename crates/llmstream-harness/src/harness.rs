use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tracing::debug;

use crate::cycle::{ToolCycle, ToolResolver};
use crate::errors::HarnessError;
use crate::model::{ProviderId, StreamOptions};
use crate::provider::{CompletionRequest, ProviderAdapter};
use crate::pump::stream_completion;
use crate::stream::EventStream;

pub(crate) struct HarnessInner {
    providers: HashMap<ProviderId, Arc<dyn ProviderAdapter>>,
    options: StreamOptions,
}

impl HarnessInner {
    pub(crate) fn provider(&self, id: &ProviderId) -> Option<Arc<dyn ProviderAdapter>> {
        self.providers.get(id).cloned()
    }
}

/// Entry point for streaming completions from registered providers.
#[derive(Clone)]
pub struct Harness {
    pub(crate) inner: Arc<HarnessInner>,
}

impl Harness {
    /// Starts a builder for registering providers and creating a `Harness`.
    pub fn builder() -> HarnessBuilder {
        HarnessBuilder::default()
    }

    pub fn options(&self) -> &StreamOptions {
        &self.inner.options
    }

    /// Starts a single provider invocation at depth 0.
    ///
    /// A `ToolCalls` terminal ends the stream; resolution is left to the caller
    /// (see [`Harness::tool_cycle`] for the automatic loop).
    pub fn stream(
        &self,
        provider: &ProviderId,
        request: CompletionRequest,
    ) -> Result<EventStream, HarnessError> {
        let adapter = self.resolve_provider(provider)?;
        validate_request(&request)?;
        debug!(provider = %provider, model = %request.config.model, "stream requested");
        Ok(stream_completion(adapter, request, 0, &self.inner.options))
    }

    /// Builds a tool cycle bound to `provider` and `resolver`.
    pub fn tool_cycle(
        &self,
        provider: &ProviderId,
        resolver: Arc<dyn ToolResolver>,
    ) -> Result<ToolCycle, HarnessError> {
        let adapter = self.resolve_provider(provider)?;
        Ok(ToolCycle::new(adapter, resolver, self.inner.options.clone()))
    }

    fn resolve_provider(&self, provider: &ProviderId) -> Result<Arc<dyn ProviderAdapter>, HarnessError> {
        self.inner
            .provider(provider)
            .ok_or_else(|| HarnessError::ProviderNotFound {
                provider: provider.clone(),
            })
    }
}

pub(crate) fn validate_request(request: &CompletionRequest) -> Result<(), HarnessError> {
    if request.config.model.trim().is_empty() {
        return Err(HarnessError::Validation("model must not be empty".into()));
    }
    if request.config.max_tokens == 0 {
        return Err(HarnessError::Validation(
            "max_tokens must be greater than 0".into(),
        ));
    }
    if request.conversation.dialogue().next().is_none() {
        return Err(HarnessError::Validation(
            "conversation must contain at least one user or assistant turn".into(),
        ));
    }
    Ok(())
}

/// Builder used to register provider adapters before creating a `Harness`.
#[derive(Default)]
pub struct HarnessBuilder {
    providers: Vec<Arc<dyn ProviderAdapter>>,
    options: StreamOptions,
}

impl HarnessBuilder {
    /// Registers a provider adapter.
    ///
    /// Register one adapter per provider id (for example one `anthropic` adapter).
    pub fn register_provider(mut self, provider: Arc<dyn ProviderAdapter>) -> Self {
        self.providers.push(provider);
        self
    }

    /// Overrides buffer capacity and tool depth for every stream.
    pub fn options(mut self, options: StreamOptions) -> Self {
        self.options = options;
        self
    }

    /// Builds the harness and validates provider registration (including duplicates).
    pub fn build(self) -> Result<Harness, HarnessError> {
        self.options.validate()?;
        let mut map: HashMap<ProviderId, Arc<dyn ProviderAdapter>> = HashMap::new();
        let mut seen: HashSet<ProviderId> = HashSet::new();
        for provider in self.providers {
            let id = provider.id();
            if !seen.insert(id.clone()) {
                return Err(HarnessError::Config(format!(
                    "duplicate provider registration: {id}"
                )));
            }
            map.insert(id, provider);
        }
        Ok(Harness {
            inner: Arc::new(HarnessInner {
                providers: map,
                options: self.options,
            }),
        })
    }
}
