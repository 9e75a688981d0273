//! A worker is one browser tab bound to one adapter type, or to an ordered
//! set of types (a merge worker) that can route a task to any supporting
//! member.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tabgate_adapters::{
    spawn_navigation_chain, AdapterContext, AdapterRegistry, WorkerSettings,
};
use tabgate_core_types::{
    GatewayError, GatewayResult, GenerateOutput, GenerateRequest, ImagePolicy, Modality,
};
use tabgate_page::{AuthGate, BrowserHandle, Cookie, DriverPage, ProxySpec};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

use crate::failover::{run_failover, AttemptOutcome, FailoverPolicy, FailoverRun};

const PER_URL_BUDGET: Duration = Duration::from_secs(30);

/// Single-vs-merge is behavioral, not structural: a tagged variant, switched
/// on in routing.
#[derive(Clone, Debug)]
pub enum WorkerKind {
    Single {
        kind: String,
    },
    Merge {
        kinds: Vec<String>,
        /// Adapter whose page the worker parks on while idle.
        monitor: Option<String>,
    },
}

impl WorkerKind {
    pub fn member_kinds(&self) -> &[String] {
        match self {
            WorkerKind::Single { kind } => std::slice::from_ref(kind),
            WorkerKind::Merge { kinds, .. } => kinds,
        }
    }

    pub fn is_merge(&self) -> bool {
        matches!(self, WorkerKind::Merge { .. })
    }

    pub fn monitor(&self) -> Option<&str> {
        match self {
            WorkerKind::Merge { monitor, .. } => monitor.as_deref(),
            WorkerKind::Single { .. } => None,
        }
    }
}

#[derive(Clone, Debug)]
pub struct WorkerSpec {
    pub name: String,
    pub kind: WorkerKind,
    /// Optional per-worker entry URL override.
    pub entry_url: Option<Url>,
}

pub struct Worker {
    spec: WorkerSpec,
    registry: Arc<AdapterRegistry>,
    failover: FailoverPolicy,
    user_data_dir: PathBuf,
    proxy: Option<ProxySpec>,
    page: parking_lot::RwLock<Option<Arc<dyn DriverPage>>>,
    /// Number of generate operations currently suspended inside this worker.
    /// The pool never dispatches a second task while one is in flight, so an
    /// external observer only ever sees 0 or 1.
    busy: AtomicUsize,
    initialized: AtomicBool,
    auth_gate: Arc<AuthGate>,
    shutdown: CancellationToken,
}

/// Reservation of a worker for one task. Dropping releases the counter.
pub struct BusyGuard {
    worker: Arc<Worker>,
}

impl Drop for BusyGuard {
    fn drop(&mut self) {
        self.worker.busy.store(0, Ordering::SeqCst);
    }
}

impl Worker {
    pub fn new(
        spec: WorkerSpec,
        registry: Arc<AdapterRegistry>,
        failover: FailoverPolicy,
        user_data_dir: PathBuf,
        proxy: Option<ProxySpec>,
    ) -> Arc<Self> {
        Arc::new(Self {
            spec,
            registry,
            failover,
            user_data_dir,
            proxy,
            page: parking_lot::RwLock::new(None),
            busy: AtomicUsize::new(0),
            initialized: AtomicBool::new(false),
            auth_gate: Arc::new(AuthGate::new()),
            shutdown: CancellationToken::new(),
        })
    }

    pub fn name(&self) -> &str {
        &self.spec.name
    }

    pub fn kind(&self) -> &WorkerKind {
        &self.spec.kind
    }

    pub fn busy(&self) -> usize {
        self.busy.load(Ordering::SeqCst)
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }

    pub fn auth_gate(&self) -> Arc<AuthGate> {
        Arc::clone(&self.auth_gate)
    }

    fn worker_settings(&self) -> WorkerSettings {
        WorkerSettings {
            entry_url: self.spec.entry_url.clone(),
        }
    }

    /// Reserve the worker for one task. Fails when a task is already in
    /// flight; the caller skips to another candidate instead of waiting.
    pub fn try_reserve(self: &Arc<Self>) -> Option<BusyGuard> {
        self.busy
            .compare_exchange(0, 1, Ordering::SeqCst, Ordering::SeqCst)
            .ok()?;
        Some(BusyGuard {
            worker: Arc::clone(self),
        })
    }

    /// Bring the worker's tab up. Idempotent; in login mode the navigation
    /// handler chain is not installed so an operator can drive the page.
    pub async fn init(
        self: &Arc<Self>,
        browser: &Arc<dyn BrowserHandle>,
        login_mode: bool,
    ) -> GatewayResult<()> {
        if self.is_initialized() {
            return Ok(());
        }

        tokio::fs::create_dir_all(&self.user_data_dir)
            .await
            .map_err(|err| {
                GatewayError::internal(format!(
                    "user data dir {}: {err}",
                    self.user_data_dir.display()
                ))
            })?;

        let page = browser
            .new_page("about:blank")
            .await
            .map_err(GatewayError::from)?;

        // Merge workers try member entry URLs in configured order; the first
        // one that loads within the per-URL budget wins.
        let mut entered = None;
        let mut last_err: Option<GatewayError> = None;
        for kind in self.spec.kind.member_kinds() {
            let url = self.registry.target_url(kind, &self.worker_settings())?;
            match page.navigate(url.as_str(), PER_URL_BUDGET).await {
                Ok(()) => {
                    entered = Some((kind.clone(), url));
                    break;
                }
                Err(err) => {
                    warn!(worker = %self.spec.name, %kind, %url, %err, "entry url unreachable");
                    last_err = Some(err.into());
                }
            }
        }
        let (entry_kind, entry_url) = entered.ok_or_else(|| {
            last_err.unwrap_or_else(|| {
                GatewayError::internal(format!(
                    "worker '{}' has no reachable entry url",
                    self.spec.name
                ))
            })
        })?;

        if login_mode {
            info!(worker = %self.spec.name, "login mode: navigation handlers disabled");
        } else {
            let mut handlers = Vec::new();
            for kind in self.spec.kind.member_kinds() {
                handlers.extend(self.registry.navigation_handlers(kind));
            }
            if !handlers.is_empty() {
                spawn_navigation_chain(
                    Arc::clone(&page),
                    handlers,
                    Arc::clone(&self.auth_gate),
                    self.shutdown.clone(),
                );
            }
        }

        *self.page.write() = Some(page);
        self.initialized.store(true, Ordering::SeqCst);
        info!(worker = %self.spec.name, kind = %entry_kind, url = %entry_url, "worker initialized");
        Ok(())
    }

    /// Whether any member adapter knows this model, honoring a `kind/id`
    /// qualifier.
    pub fn supports(&self, model_key: &str) -> bool {
        self.spec
            .kind
            .member_kinds()
            .iter()
            .any(|kind| self.registry.supports_model(kind, model_key))
    }

    fn supporting_kinds(&self, model_key: &str) -> Vec<&str> {
        self.spec
            .kind
            .member_kinds()
            .iter()
            .filter(|kind| self.registry.supports_model(kind, model_key))
            .map(String::as_str)
            .collect()
    }

    /// Most permissive wins across supporting members: the scheduler may pick
    /// a member that accepts images even when another forbids them.
    pub fn image_policy(&self, model_key: &str) -> ImagePolicy {
        let policies: Vec<ImagePolicy> = self
            .supporting_kinds(model_key)
            .iter()
            .filter_map(|kind| self.registry.image_policy(kind, model_key))
            .collect();
        if policies.contains(&ImagePolicy::Optional) {
            ImagePolicy::Optional
        } else if policies.contains(&ImagePolicy::Required) {
            ImagePolicy::Required
        } else {
            ImagePolicy::Forbidden
        }
    }

    /// Modality of the first supporting member.
    pub fn model_type(&self, model_key: &str) -> Option<Modality> {
        self.supporting_kinds(model_key)
            .first()
            .and_then(|kind| self.registry.model_type(kind, model_key))
    }

    fn adapter_context(&self, req: &GenerateRequest) -> GatewayResult<AdapterContext> {
        let page = self
            .page
            .read()
            .clone()
            .ok_or_else(GatewayError::browser_not_initialized)?;
        Ok(AdapterContext {
            page,
            proxy: self.proxy.clone(),
            user_data_dir: self.user_data_dir.clone(),
            auth_gate: Arc::clone(&self.auth_gate),
            cancel: req.cancel.clone(),
        })
    }

    /// Run one generation on this worker.
    ///
    /// Merge workers with failover enabled walk every supporting member in
    /// configured order through the failover executor; otherwise only the
    /// first supporting member is attempted. An image-bearing request never
    /// goes to a member that forbids images while a non-forbidding
    /// supporting member exists.
    pub async fn generate(&self, req: &GenerateRequest) -> GatewayResult<GenerateOutput> {
        let mut candidates = self.supporting_kinds(&req.model_key);
        if req.has_images() {
            let accepting: Vec<&str> = candidates
                .iter()
                .filter(|kind| {
                    self.registry.image_policy(kind, &req.model_key)
                        .map_or(false, |policy| policy != ImagePolicy::Forbidden)
                })
                .copied()
                .collect();
            if !accepting.is_empty() {
                candidates = accepting;
            }
        }
        if candidates.is_empty() {
            return Err(GatewayError::invalid_model(&req.model_key));
        }
        let cx = self.adapter_context(req)?;

        if self.spec.kind.is_merge() && self.failover.enabled && candidates.len() > 1 {
            let run = run_failover(
                &candidates,
                self.failover.max_retries,
                |kind| {
                    let cx = cx.clone();
                    let kind = kind.to_string();
                    async move {
                        match self.attempt_member(&kind, &cx, req).await {
                            Ok(output) => AttemptOutcome::Done(output),
                            Err(err) => AttemptOutcome::Fail(err),
                        }
                    }
                },
                |kind, err, attempt| {
                    warn!(
                        worker = %self.spec.name,
                        member = %kind,
                        attempt,
                        %err,
                        "member attempt failed, trying next"
                    );
                },
            )
            .await;
            match run {
                FailoverRun::Finished(result) => result,
                FailoverRun::Starved => {
                    Err(GatewayError::internal("no adapter member was attempted"))
                }
            }
        } else {
            self.attempt_member(candidates[0], &cx, req).await
        }
    }

    async fn attempt_member(
        &self,
        kind: &str,
        cx: &AdapterContext,
        req: &GenerateRequest,
    ) -> GatewayResult<GenerateOutput> {
        let adapter = self
            .registry
            .adapter(kind)
            .ok_or_else(|| GatewayError::internal(format!("unknown adapter kind '{kind}'")))?;
        adapter.generate(cx, req).await
    }

    /// Park an idle merge worker on its monitor adapter's page.
    pub async fn navigate_to_monitor(&self) -> GatewayResult<()> {
        let Some(monitor) = self.spec.kind.monitor() else {
            return Ok(());
        };
        if self.busy() != 0 {
            return Ok(());
        }
        let page = self
            .page
            .read()
            .clone()
            .ok_or_else(GatewayError::browser_not_initialized)?;
        let target = self.registry.target_url(monitor, &self.worker_settings())?;
        let current = page.current_url().await.map_err(GatewayError::from)?;
        let already_there = Url::parse(&current)
            .ok()
            .and_then(|url| url.host_str().map(str::to_string))
            .map_or(false, |host| target.host_str() == Some(host.as_str()));
        if already_there {
            return Ok(());
        }
        debug!(worker = %self.spec.name, url = %target, "parking on monitor");
        page.navigate(target.as_str(), PER_URL_BUDGET)
            .await
            .map_err(GatewayError::from)
    }

    pub async fn cookies(&self, domain: Option<&str>) -> GatewayResult<Vec<Cookie>> {
        let page = self
            .page
            .read()
            .clone()
            .ok_or_else(GatewayError::browser_not_initialized)?;
        page.cookies(domain).await.map_err(GatewayError::from)
    }

    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        let page = self.page.write().take();
        if let Some(page) = page {
            if let Err(err) = page.close().await {
                debug!(worker = %self.spec.name, %err, "page close failed during shutdown");
            }
        }
        self.initialized.store(false, Ordering::SeqCst);
    }
}
