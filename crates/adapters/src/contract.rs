use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use tabgate_core_types::{GatewayError, GatewayResult, GenerateOutput, GenerateRequest, ModelDescriptor};
use tabgate_page::{AuthGate, DriverPage, ProxySpec};
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::navigation::NavigationHandler;

/// The `backend.adapter.<kind>` configuration section, handed to the adapter
/// at construction.
#[derive(Clone, Debug, Default)]
pub struct AdapterSettings(pub serde_json::Value);

impl AdapterSettings {
    pub fn parse<T: DeserializeOwned>(&self) -> GatewayResult<T> {
        serde_json::from_value(self.0.clone())
            .map_err(|err| GatewayError::internal(format!("adapter options: {err}")))
    }
}

/// Worker-level knobs an adapter may honor when computing its entry URL.
#[derive(Clone, Debug, Default)]
pub struct WorkerSettings {
    pub entry_url: Option<Url>,
}

/// Everything an adapter sees while driving one generation. Read-only from
/// the adapter's standpoint.
#[derive(Clone)]
pub struct AdapterContext {
    pub page: Arc<dyn DriverPage>,
    pub proxy: Option<ProxySpec>,
    pub user_data_dir: PathBuf,
    /// Serializes background re-authentication against the foreground task.
    pub auth_gate: Arc<AuthGate>,
    pub cancel: CancellationToken,
}

/// The narrow protocol every adapter satisfies: compute the entry URL,
/// enumerate models, expose navigation handlers, and run one generation
/// (navigate, submit, await, extract).
#[async_trait]
pub trait Adapter: Send + Sync {
    /// Stable type tag, referenced from worker configuration.
    fn kind(&self) -> &str;

    fn display_name(&self) -> &str;

    fn models(&self) -> Vec<ModelDescriptor>;

    /// Entry URL for a worker bound to this adapter.
    fn target_url(&self, worker: &WorkerSettings) -> GatewayResult<Url>;

    /// Ordered handlers invoked on every page navigation (login expiry,
    /// cookie refresh, banner dismissal). Handlers must take the auth gate
    /// before any input that could race the task.
    fn navigation_handlers(&self) -> Vec<Arc<dyn NavigationHandler>> {
        Vec::new()
    }

    async fn generate(
        &self,
        cx: &AdapterContext,
        req: &GenerateRequest,
    ) -> GatewayResult<GenerateOutput>;
}
