use std::collections::HashMap;
use std::sync::Arc;

use tabgate_core_types::{
    GatewayError, GatewayResult, ImagePolicy, Modality, ModelDescriptor,
};
use url::Url;

use crate::contract::{Adapter, WorkerSettings};
use crate::navigation::NavigationHandler;

/// A model reference as it appears in a request: a plain id, or
/// `adapterKind/id` to bind the lookup to one adapter.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ModelKey<'a> {
    pub qualifier: Option<&'a str>,
    pub id: &'a str,
}

impl<'a> ModelKey<'a> {
    pub fn parse(raw: &'a str) -> Self {
        match raw.split_once('/') {
            Some((qualifier, id)) if !qualifier.is_empty() => Self {
                qualifier: Some(qualifier),
                id,
            },
            _ => Self {
                qualifier: None,
                id: raw,
            },
        }
    }

    /// Whether this key may resolve against the given adapter kind.
    pub fn binds_to(&self, kind: &str) -> bool {
        self.qualifier.map_or(true, |q| q == kind)
    }
}

/// Immutable-after-startup set of adapters, addressed by kind.
pub struct AdapterRegistry {
    adapters: Vec<Arc<dyn Adapter>>,
    index: HashMap<String, usize>,
}

impl AdapterRegistry {
    pub fn new(adapters: Vec<Arc<dyn Adapter>>) -> GatewayResult<Self> {
        let mut index = HashMap::new();
        for (pos, adapter) in adapters.iter().enumerate() {
            if index.insert(adapter.kind().to_string(), pos).is_some() {
                return Err(GatewayError::internal(format!(
                    "duplicate adapter kind '{}'",
                    adapter.kind()
                )));
            }
        }
        Ok(Self { adapters, index })
    }

    pub fn adapter(&self, kind: &str) -> Option<&Arc<dyn Adapter>> {
        self.index.get(kind).map(|&pos| &self.adapters[pos])
    }

    pub fn kinds(&self) -> impl Iterator<Item = &str> {
        self.adapters.iter().map(|a| a.kind())
    }

    /// Resolve a model key against one adapter kind.
    ///
    /// An empty id resolves to the adapter's default (first registered)
    /// model. A `kind/id` key only resolves against the named kind. Callers
    /// distinguish "no such adapter" (`adapter(kind)` is `None`) from
    /// "adapter does not know this model" (this returns `None`).
    pub fn resolve_model(&self, kind: &str, key: &str) -> Option<(String, ModelDescriptor)> {
        let adapter = self.adapter(kind)?;
        let parsed = ModelKey::parse(key);
        if !parsed.binds_to(kind) {
            return None;
        }
        let models = adapter.models();
        let descriptor = if parsed.id.is_empty() {
            models.into_iter().next()?
        } else {
            models.into_iter().find(|m| m.id == parsed.id)?
        };
        Some((descriptor.upstream_id.clone(), descriptor))
    }

    pub fn supports_model(&self, kind: &str, key: &str) -> bool {
        self.resolve_model(kind, key).is_some()
    }

    pub fn image_policy(&self, kind: &str, key: &str) -> Option<ImagePolicy> {
        self.resolve_model(kind, key)
            .map(|(_, descriptor)| descriptor.image_policy)
    }

    pub fn model_type(&self, kind: &str, key: &str) -> Option<Modality> {
        self.resolve_model(kind, key)
            .map(|(_, descriptor)| descriptor.modality)
    }

    pub fn list_models(&self, kind: &str) -> Vec<ModelDescriptor> {
        self.adapter(kind)
            .map(|adapter| adapter.models())
            .unwrap_or_default()
    }

    pub fn target_url(&self, kind: &str, worker: &WorkerSettings) -> GatewayResult<Url> {
        let adapter = self
            .adapter(kind)
            .ok_or_else(|| GatewayError::internal(format!("unknown adapter kind '{kind}'")))?;
        adapter.target_url(worker)
    }

    pub fn navigation_handlers(&self, kind: &str) -> Vec<Arc<dyn NavigationHandler>> {
        self.adapter(kind)
            .map(|adapter| adapter.navigation_handlers())
            .unwrap_or_default()
    }
}
