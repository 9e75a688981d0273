//! A browser process hosting one or more workers as isolated tabs.

use std::path::PathBuf;
use std::sync::Arc;

use tabgate_core_types::{GatewayError, GatewayResult};
use tabgate_page::{BrowserHandle, BrowserLauncher, LaunchSpec, ProxySpec};
use tokio::sync::OnceCell;
use tracing::{debug, info};

use crate::worker::Worker;

/// Instance-level proxy selection. `Disabled` forces a direct connection
/// even when a global proxy exists.
#[derive(Clone, Debug, Default)]
pub enum ProxyChoice {
    #[default]
    Inherit,
    Disabled,
    Override(ProxySpec),
}

impl ProxyChoice {
    pub fn resolve(&self, global: Option<&ProxySpec>) -> Option<ProxySpec> {
        match self {
            ProxyChoice::Inherit => global.cloned(),
            ProxyChoice::Disabled => None,
            ProxyChoice::Override(spec) => Some(spec.clone()),
        }
    }
}

#[derive(Clone, Debug)]
pub struct InstanceSpec {
    pub name: String,
    pub user_data_dir: PathBuf,
    pub proxy: ProxyChoice,
    pub headless: bool,
    pub executable: Option<PathBuf>,
}

/// Isolation boundary: workers of one instance share a browser process (and
/// therefore cookies/storage); workers of different instances never do. The
/// user-data directory belongs to exactly one instance for the process
/// lifetime.
pub struct Instance {
    spec: InstanceSpec,
    launcher: Arc<dyn BrowserLauncher>,
    resolved_proxy: Option<ProxySpec>,
    browser: OnceCell<Arc<dyn BrowserHandle>>,
    workers: Vec<Arc<Worker>>,
}

impl Instance {
    pub fn new(
        spec: InstanceSpec,
        launcher: Arc<dyn BrowserLauncher>,
        global_proxy: Option<&ProxySpec>,
        workers: Vec<Arc<Worker>>,
    ) -> Arc<Self> {
        let resolved_proxy = spec.proxy.resolve(global_proxy);
        Arc::new(Self {
            spec,
            launcher,
            resolved_proxy,
            browser: OnceCell::new(),
            workers,
        })
    }

    pub fn name(&self) -> &str {
        &self.spec.name
    }

    pub fn workers(&self) -> &[Arc<Worker>] {
        &self.workers
    }

    pub fn proxy(&self) -> Option<&ProxySpec> {
        self.resolved_proxy.as_ref()
    }

    /// The shared browser, launched on first use. Later workers of the same
    /// instance reuse it and only add a tab.
    pub async fn browser(&self) -> GatewayResult<Arc<dyn BrowserHandle>> {
        let handle = self
            .browser
            .get_or_try_init(|| async {
                info!(instance = %self.spec.name, dir = %self.spec.user_data_dir.display(), "launching browser");
                let spec = LaunchSpec {
                    user_data_dir: self.spec.user_data_dir.clone(),
                    proxy: self.resolved_proxy.clone(),
                    headless: self.spec.headless,
                    executable: self.spec.executable.clone(),
                };
                self.launcher
                    .launch(&spec)
                    .await
                    .map_err(GatewayError::from)
            })
            .await?;
        Ok(Arc::clone(handle))
    }

    /// Initialize this instance's workers in configured order.
    pub async fn init_workers(&self, login_mode: bool) -> GatewayResult<()> {
        for worker in &self.workers {
            let browser = self.browser().await?;
            worker.init(&browser, login_mode).await?;
        }
        Ok(())
    }

    pub async fn shutdown(&self) {
        for worker in &self.workers {
            worker.shutdown().await;
        }
        if let Some(browser) = self.browser.get() {
            if let Err(err) = browser.close().await {
                debug!(instance = %self.spec.name, %err, "browser close failed");
            }
        }
    }
}
