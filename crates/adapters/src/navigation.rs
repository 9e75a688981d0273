use std::sync::Arc;

use async_trait::async_trait;
use tabgate_core_types::GatewayResult;
use tabgate_page::{AuthGate, DriverPage};
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// What a handler sees for one navigation.
#[derive(Clone)]
pub struct NavigationContext {
    pub page: Arc<dyn DriverPage>,
    pub url: String,
    pub auth_gate: Arc<AuthGate>,
}

/// A callback on page navigation. Registered by adapters; a merge worker
/// composes every member's handlers into one ordered chain.
#[async_trait]
pub trait NavigationHandler: Send + Sync {
    fn name(&self) -> &str;

    async fn on_navigation(&self, cx: &NavigationContext) -> GatewayResult<()>;
}

/// Subscribe the merged handler chain to a page's navigation events.
///
/// Handlers run in registration order per event; a failing handler is logged
/// and does not stop the chain. The task ends when the worker shuts down or
/// the page goes away.
pub fn spawn_navigation_chain(
    page: Arc<dyn DriverPage>,
    handlers: Vec<Arc<dyn NavigationHandler>>,
    auth_gate: Arc<AuthGate>,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    let mut events = page.subscribe_navigations();
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                event = events.recv() => match event {
                    Ok(nav) => {
                        let cx = NavigationContext {
                            page: Arc::clone(&page),
                            url: nav.url,
                            auth_gate: Arc::clone(&auth_gate),
                        };
                        for handler in &handlers {
                            if let Err(err) = handler.on_navigation(&cx).await {
                                warn!(handler = handler.name(), %err, url = %cx.url, "navigation handler failed");
                            }
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        debug!(skipped, "navigation events lagged");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        }
    })
}
