//! Scripted adapters shared by the pool test modules.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tabgate_adapters::{Adapter, AdapterContext, AdapterRegistry, ModelKey, WorkerSettings};
use tabgate_core_types::{
    GatewayError, GatewayResult, GenerateOutput, GenerateRequest, ImagePolicy, ModelDescriptor,
};
use url::Url;

#[derive(Clone, Debug)]
pub enum ScriptedResult {
    Text(&'static str),
    Error(&'static str),
    /// Sleep, then produce text. Used to hold a worker busy.
    Slow(Duration, &'static str),
}

struct Inner {
    kind: String,
    models: Vec<ModelDescriptor>,
    script: Mutex<VecDeque<ScriptedResult>>,
    calls: AtomicUsize,
}

/// An adapter whose outcomes are queued up front. Without a script it
/// answers with a deterministic per-kind string.
#[derive(Clone)]
pub struct ScriptedAdapter {
    inner: Arc<Inner>,
}

impl ScriptedAdapter {
    pub fn new(kind: &str, models: Vec<ModelDescriptor>) -> Self {
        Self {
            inner: Arc::new(Inner {
                kind: kind.to_string(),
                models,
                script: Mutex::new(VecDeque::new()),
                calls: AtomicUsize::new(0),
            }),
        }
    }

    pub fn text(kind: &str, model: &str) -> Self {
        Self::new(kind, vec![ModelDescriptor::text(model, format!("up-{model}"))])
    }

    pub fn text_with_policy(kind: &str, model: &str, policy: ImagePolicy) -> Self {
        Self::new(
            kind,
            vec![ModelDescriptor::text(model, format!("up-{model}")).with_image_policy(policy)],
        )
    }

    pub fn image(kind: &str, model: &str, policy: ImagePolicy) -> Self {
        Self::new(
            kind,
            vec![ModelDescriptor::image(model, format!("up-{model}")).with_image_policy(policy)],
        )
    }

    pub fn script(&self, result: ScriptedResult) {
        self.inner.script.lock().push_back(result);
    }

    pub fn calls(&self) -> usize {
        self.inner.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Adapter for ScriptedAdapter {
    fn kind(&self) -> &str {
        &self.inner.kind
    }

    fn display_name(&self) -> &str {
        &self.inner.kind
    }

    fn models(&self) -> Vec<ModelDescriptor> {
        self.inner.models.clone()
    }

    fn target_url(&self, worker: &WorkerSettings) -> GatewayResult<Url> {
        if let Some(url) = &worker.entry_url {
            return Ok(url.clone());
        }
        Url::parse(&format!("https://{}.example.test/", self.inner.kind))
            .map_err(|err| GatewayError::internal(err.to_string()))
    }

    async fn generate(
        &self,
        _cx: &AdapterContext,
        req: &GenerateRequest,
    ) -> GatewayResult<GenerateOutput> {
        let key = ModelKey::parse(&req.model_key);
        if !key.binds_to(&self.inner.kind)
            || !self.inner.models.iter().any(|m| m.id == key.id)
        {
            return Err(GatewayError::invalid_model(&req.model_key));
        }
        self.inner.calls.fetch_add(1, Ordering::SeqCst);
        let next = self.inner.script.lock().pop_front();
        match next {
            None => Ok(GenerateOutput::text(format!(
                "answer from {}",
                self.inner.kind
            ))),
            Some(ScriptedResult::Text(text)) => Ok(GenerateOutput::text(text)),
            Some(ScriptedResult::Error(message)) => Err(GatewayError::classified(message)),
            Some(ScriptedResult::Slow(delay, text)) => {
                tokio::time::sleep(delay).await;
                Ok(GenerateOutput::text(text))
            }
        }
    }
}

pub fn registry_with(adapters: Vec<ScriptedAdapter>) -> Arc<AdapterRegistry> {
    let adapters: Vec<Arc<dyn Adapter>> = adapters
        .into_iter()
        .map(|a| Arc::new(a) as Arc<dyn Adapter>)
        .collect();
    Arc::new(AdapterRegistry::new(adapters).expect("test registry"))
}
