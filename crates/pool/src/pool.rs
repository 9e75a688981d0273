//! Candidate construction and the load-balancing strategy across workers.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use tabgate_core_types::{
    GatewayError, GatewayResult, GenerateOutput, GenerateRequest, ImagePolicy,
};
use tracing::{debug, warn};

use crate::failover::{run_failover, AttemptOutcome, FailoverPolicy, FailoverRun};
use crate::instance::Instance;
use crate::worker::Worker;

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    #[default]
    LeastBusy,
    RoundRobin,
    Random,
}

/// Outcome of one dispatch attempt across the pool.
pub enum ExecuteOutcome {
    Completed(GatewayResult<GenerateOutput>),
    /// Every candidate was busy; the task should return to the queue head.
    AllBusy,
}

#[derive(Clone, Debug, serde::Serialize)]
pub struct WorkerSnapshot {
    pub name: String,
    pub busy: usize,
    pub initialized: bool,
}

#[derive(Clone, Debug, serde::Serialize)]
pub struct PoolSnapshot {
    pub workers: Vec<WorkerSnapshot>,
    pub in_flight: usize,
}

/// The set of workers plus the scheduling strategy across them. Maximum
/// concurrency equals the worker count; admission refuses or queues beyond
/// that.
pub struct Pool {
    instances: Vec<Arc<Instance>>,
    workers: Vec<Arc<Worker>>,
    strategy: Strategy,
    failover: FailoverPolicy,
    rr_cursor: AtomicUsize,
}

impl Pool {
    pub fn new(
        instances: Vec<Arc<Instance>>,
        strategy: Strategy,
        failover: FailoverPolicy,
    ) -> Arc<Self> {
        let workers = instances
            .iter()
            .flat_map(|instance| instance.workers().iter().cloned())
            .collect();
        Arc::new(Self {
            instances,
            workers,
            strategy,
            failover,
            rr_cursor: AtomicUsize::new(0),
        })
    }

    pub fn instances(&self) -> &[Arc<Instance>] {
        &self.instances
    }

    pub fn workers(&self) -> &[Arc<Worker>] {
        &self.workers
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// Global in-flight task count: the sum of all busy counters.
    pub fn in_flight(&self) -> usize {
        self.workers.iter().map(|w| w.busy()).sum()
    }

    pub fn any_initialized(&self) -> bool {
        self.workers.iter().any(|w| w.is_initialized())
    }

    pub fn first_initialized(&self) -> Option<Arc<Worker>> {
        self.workers.iter().find(|w| w.is_initialized()).cloned()
    }

    pub fn snapshot(&self) -> PoolSnapshot {
        PoolSnapshot {
            workers: self
                .workers
                .iter()
                .map(|w| WorkerSnapshot {
                    name: w.name().to_string(),
                    busy: w.busy(),
                    initialized: w.is_initialized(),
                })
                .collect(),
            in_flight: self.in_flight(),
        }
    }

    /// Ordered candidate list for a model.
    ///
    /// Image-aware dispatch: when the request carries images and at least one
    /// supporting worker accepts them for this model, workers that forbid
    /// them are dropped so an image-bearing request never lands where it
    /// cannot be served.
    pub fn candidates(
        &self,
        model_key: &str,
        has_images: bool,
    ) -> GatewayResult<Vec<Arc<Worker>>> {
        let mut candidates: Vec<Arc<Worker>> = self
            .workers
            .iter()
            .filter(|w| w.supports(model_key))
            .cloned()
            .collect();

        if has_images
            && candidates
                .iter()
                .any(|w| w.image_policy(model_key) != ImagePolicy::Forbidden)
        {
            candidates.retain(|w| w.image_policy(model_key) != ImagePolicy::Forbidden);
        }

        if candidates.is_empty() {
            return Err(GatewayError::invalid_model(model_key));
        }

        match self.strategy {
            // Stable sort keeps configured order among ties.
            Strategy::LeastBusy => candidates.sort_by_key(|w| w.busy()),
            Strategy::RoundRobin => {
                let offset = self.rr_cursor.fetch_add(1, Ordering::SeqCst) % candidates.len();
                candidates.rotate_left(offset);
            }
            Strategy::Random => candidates.shuffle(&mut rand::thread_rng()),
        }

        Ok(candidates)
    }

    /// Admission-time image policy check over the candidate set: reject only
    /// when *every* candidate forbids (images present) or *every* candidate
    /// requires (none present).
    pub fn check_image_policy(
        &self,
        candidates: &[Arc<Worker>],
        model_key: &str,
        image_count: usize,
    ) -> GatewayResult<()> {
        let policies: Vec<ImagePolicy> = candidates
            .iter()
            .map(|w| w.image_policy(model_key))
            .collect();
        if image_count > 0 && policies.iter().all(|p| *p == ImagePolicy::Forbidden) {
            return Err(GatewayError::image_forbidden(model_key));
        }
        if image_count == 0 && policies.iter().all(|p| *p == ImagePolicy::Required) {
            return Err(GatewayError::image_required(model_key));
        }
        Ok(())
    }

    /// Try to run a request on the pool right now.
    ///
    /// The attempt function reserves a worker (skipping busy ones without
    /// spending retry budget), runs the generation, and releases the worker
    /// when the adapter returns. Cross-worker failover walks the whole
    /// candidate list when enabled; otherwise only the head is attempted.
    pub async fn try_execute(&self, req: &GenerateRequest) -> ExecuteOutcome {
        let candidates = match self.candidates(&req.model_key, req.has_images()) {
            Ok(candidates) => candidates,
            Err(err) => return ExecuteOutcome::Completed(Err(err)),
        };
        let candidates: &[Arc<Worker>] = if self.failover.enabled {
            &candidates
        } else {
            &candidates[..1]
        };

        let run = run_failover(
            candidates,
            self.failover.max_retries,
            |worker| {
                let worker = Arc::clone(worker);
                async move {
                    if !worker.is_initialized() {
                        return AttemptOutcome::Skip("not initialized");
                    }
                    let Some(guard) = worker.try_reserve() else {
                        return AttemptOutcome::Skip("busy");
                    };
                    debug!(worker = %worker.name(), task = %req.meta.task_id, "dispatching task");
                    let result = worker.generate(req).await;
                    drop(guard);
                    self.park_if_idle(&worker);
                    match result {
                        Ok(output) => AttemptOutcome::Done(output),
                        Err(err) => AttemptOutcome::Fail(err),
                    }
                }
            },
            |worker, err, attempt| {
                warn!(
                    worker = %worker.name(),
                    attempt,
                    %err,
                    "worker attempt failed"
                );
            },
        )
        .await;

        match run {
            FailoverRun::Finished(result) => ExecuteOutcome::Completed(result),
            FailoverRun::Starved => ExecuteOutcome::AllBusy,
        }
    }

    /// Merge workers with a monitor park there while idle; best-effort.
    fn park_if_idle(&self, worker: &Arc<Worker>) {
        if worker.kind().monitor().is_none() {
            return;
        }
        let worker = Arc::clone(worker);
        tokio::spawn(async move {
            if let Err(err) = worker.navigate_to_monitor().await {
                debug!(worker = %worker.name(), %err, "monitor parking failed");
            }
        });
    }

    pub async fn shutdown(&self) {
        for instance in &self.instances {
            instance.shutdown().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instance::{InstanceSpec, ProxyChoice};
    use crate::testing::{registry_with, ScriptedAdapter, ScriptedResult};
    use crate::worker::{WorkerKind, WorkerSpec};
    use std::path::PathBuf;
    use std::time::Duration;
    use tabgate_adapters::AdapterRegistry;
    use tabgate_core_types::ErrorCode;
    use tabgate_page::{BrowserHandle, NoopBrowser};

    fn tmp_dir() -> PathBuf {
        tempfile::tempdir().expect("scratch dir").into_path()
    }

    fn single_worker(name: &str, kind: &str, registry: &Arc<AdapterRegistry>) -> Arc<Worker> {
        Worker::new(
            WorkerSpec {
                name: name.to_string(),
                kind: WorkerKind::Single {
                    kind: kind.to_string(),
                },
                entry_url: None,
            },
            Arc::clone(registry),
            FailoverPolicy::default(),
            tmp_dir(),
            None,
        )
    }

    fn instance_with(workers: Vec<Arc<Worker>>) -> Arc<Instance> {
        Instance::new(
            InstanceSpec {
                name: "default".into(),
                user_data_dir: tmp_dir(),
                proxy: ProxyChoice::Inherit,
                headless: true,
                executable: None,
            },
            NoopBrowser::new(),
            None,
            workers,
        )
    }

    async fn init_all(pool: &Pool) {
        let browser = NoopBrowser::new() as Arc<dyn BrowserHandle>;
        for worker in pool.workers() {
            worker.init(&browser, false).await.expect("worker init");
        }
    }

    #[tokio::test]
    async fn unknown_model_yields_invalid_model() {
        let registry = registry_with(vec![ScriptedAdapter::text("alpha", "m-a")]);
        let pool = Pool::new(
            vec![instance_with(vec![single_worker("w0", "alpha", &registry)])],
            Strategy::LeastBusy,
            FailoverPolicy::default(),
        );
        let err = pool.candidates("m-z", false).expect_err("unknown model");
        assert_eq!(err.code, ErrorCode::InvalidModel);
    }

    #[tokio::test]
    async fn image_aware_dispatch_drops_forbidding_workers() {
        let registry = registry_with(vec![
            ScriptedAdapter::text_with_policy("alpha", "shared", ImagePolicy::Forbidden),
            ScriptedAdapter::text_with_policy("beta", "shared", ImagePolicy::Optional),
        ]);
        let w_forbid = single_worker("w-forbid", "alpha", &registry);
        let w_accept = single_worker("w-accept", "beta", &registry);
        let pool = Pool::new(
            vec![instance_with(vec![w_forbid, w_accept])],
            Strategy::LeastBusy,
            FailoverPolicy::default(),
        );

        let with_images = pool.candidates("shared", true).expect("candidates");
        assert_eq!(with_images.len(), 1);
        assert_eq!(with_images[0].name(), "w-accept");

        let without_images = pool.candidates("shared", false).expect("candidates");
        assert_eq!(without_images.len(), 2);
    }

    #[tokio::test]
    async fn image_policy_check_rejects_only_unanimous_sets() {
        let registry = registry_with(vec![
            ScriptedAdapter::text_with_policy("alpha", "m-forbid", ImagePolicy::Forbidden),
            ScriptedAdapter::image("beta", "m-need", ImagePolicy::Required),
        ]);
        let pool = Pool::new(
            vec![instance_with(vec![
                single_worker("w0", "alpha", &registry),
                single_worker("w1", "beta", &registry),
            ])],
            Strategy::LeastBusy,
            FailoverPolicy::default(),
        );

        let forbid_cands = pool.candidates("m-forbid", false).expect("candidates");
        let err = pool
            .check_image_policy(&forbid_cands, "m-forbid", 1)
            .expect_err("all forbid");
        assert_eq!(err.code, ErrorCode::ImageForbidden);
        pool.check_image_policy(&forbid_cands, "m-forbid", 0)
            .expect("no images is fine");

        let need_cands = pool.candidates("m-need", false).expect("candidates");
        let err = pool
            .check_image_policy(&need_cands, "m-need", 0)
            .expect_err("all require");
        assert_eq!(err.code, ErrorCode::ImageRequired);
        pool.check_image_policy(&need_cands, "m-need", 1)
            .expect("image present is fine");
    }

    #[tokio::test]
    async fn least_busy_prefers_idle_workers_and_config_order() {
        let registry = registry_with(vec![ScriptedAdapter::text("alpha", "m-a")]);
        let w0 = single_worker("w0", "alpha", &registry);
        let w1 = single_worker("w1", "alpha", &registry);
        let pool = Pool::new(
            vec![instance_with(vec![Arc::clone(&w0), Arc::clone(&w1)])],
            Strategy::LeastBusy,
            FailoverPolicy::default(),
        );

        let order = pool.candidates("m-a", false).expect("candidates");
        assert_eq!(order[0].name(), "w0");

        let _guard = w0.try_reserve().expect("reserve w0");
        let order = pool.candidates("m-a", false).expect("candidates");
        assert_eq!(order[0].name(), "w1");
    }

    #[tokio::test]
    async fn round_robin_rotates_the_head() {
        let registry = registry_with(vec![ScriptedAdapter::text("alpha", "m-a")]);
        let pool = Pool::new(
            vec![instance_with(vec![
                single_worker("w0", "alpha", &registry),
                single_worker("w1", "alpha", &registry),
            ])],
            Strategy::RoundRobin,
            FailoverPolicy::default(),
        );
        let first = pool.candidates("m-a", false).expect("candidates")[0]
            .name()
            .to_string();
        let second = pool.candidates("m-a", false).expect("candidates")[0]
            .name()
            .to_string();
        assert_ne!(first, second);
        let third = pool.candidates("m-a", false).expect("candidates")[0]
            .name()
            .to_string();
        assert_eq!(first, third);
    }

    #[tokio::test]
    async fn cross_worker_failover_reaches_the_second_worker() {
        let alpha = ScriptedAdapter::text("alpha", "shared");
        alpha.script(ScriptedResult::Error("Timeout waiting for upstream"));
        let beta = ScriptedAdapter::text("beta", "shared");
        beta.script(ScriptedResult::Text("rescued"));
        let registry = registry_with(vec![alpha.clone(), beta.clone()]);
        let pool = Pool::new(
            vec![instance_with(vec![
                single_worker("w0", "alpha", &registry),
                single_worker("w1", "beta", &registry),
            ])],
            Strategy::LeastBusy,
            FailoverPolicy::default(),
        );
        init_all(&pool).await;

        let req = GenerateRequest::new("hi", "shared", false);
        match pool.try_execute(&req).await {
            ExecuteOutcome::Completed(Ok(out)) => {
                assert_eq!(out.text.as_deref(), Some("rescued"));
            }
            _ => panic!("expected cross-worker rescue"),
        }
        assert_eq!(alpha.calls(), 1);
        assert_eq!(beta.calls(), 1);
    }

    #[tokio::test]
    async fn failover_disabled_stops_at_the_head() {
        let alpha = ScriptedAdapter::text("alpha", "shared");
        alpha.script(ScriptedResult::Error("Timeout waiting for upstream"));
        let beta = ScriptedAdapter::text("beta", "shared");
        let registry = registry_with(vec![alpha.clone(), beta.clone()]);
        let pool = Pool::new(
            vec![instance_with(vec![
                single_worker("w0", "alpha", &registry),
                single_worker("w1", "beta", &registry),
            ])],
            Strategy::LeastBusy,
            FailoverPolicy {
                enabled: false,
                max_retries: 2,
            },
        );
        init_all(&pool).await;

        let req = GenerateRequest::new("hi", "shared", false);
        match pool.try_execute(&req).await {
            ExecuteOutcome::Completed(Err(err)) => {
                assert_eq!(err.code, ErrorCode::FailoverExhausted);
                assert!(err.message.contains("Timeout"));
            }
            _ => panic!("expected failure without failover"),
        }
        assert_eq!(beta.calls(), 0);
    }

    #[tokio::test]
    async fn all_busy_pool_reports_starvation() {
        let registry = registry_with(vec![ScriptedAdapter::text("alpha", "m-a")]);
        let w0 = single_worker("w0", "alpha", &registry);
        let pool = Pool::new(
            vec![instance_with(vec![Arc::clone(&w0)])],
            Strategy::LeastBusy,
            FailoverPolicy::default(),
        );
        init_all(&pool).await;

        let _guard = w0.try_reserve().expect("hold the only worker");
        let req = GenerateRequest::new("hi", "m-a", false);
        match pool.try_execute(&req).await {
            ExecuteOutcome::AllBusy => {}
            _ => panic!("expected AllBusy"),
        }
    }

    #[tokio::test]
    async fn busy_counter_stays_within_bounds_during_execution() {
        let alpha = ScriptedAdapter::text("alpha", "m-a");
        alpha.script(ScriptedResult::Slow(Duration::from_millis(50), "done"));
        let registry = registry_with(vec![alpha]);
        let w0 = single_worker("w0", "alpha", &registry);
        let pool = Pool::new(
            vec![instance_with(vec![Arc::clone(&w0)])],
            Strategy::LeastBusy,
            FailoverPolicy::default(),
        );
        init_all(&pool).await;

        let req = GenerateRequest::new("hi", "m-a", false);
        let pool_clone = Arc::clone(&pool);
        let task = tokio::spawn(async move { pool_clone.try_execute(&req).await });

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(w0.busy(), 1);
        assert_eq!(pool.in_flight(), 1);

        match task.await.expect("join") {
            ExecuteOutcome::Completed(Ok(out)) => assert_eq!(out.text.as_deref(), Some("done")),
            _ => panic!("expected completion"),
        }
        assert_eq!(w0.busy(), 0);
    }
}
