//! Install / activate state machine and the control-message entry point.
//!
//! The controller owns every piece of shared worker state: the mode flag,
//! the connected pages and the handles to the cache and the network. The
//! interceptor and the prefetch coordinator only ever see what it hands them.

use std::sync::{Arc, RwLock};

use futures::future::join_all;
use metrics::counter;
use serde::Serialize;
use time::{OffsetDateTime, format_description::well_known::Rfc3339};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use super::{
    clients::{ClientId, ClientRegistry},
    config::WorkerConfig,
    fetcher::ResourceFetcher,
    interceptor::RequestInterceptor,
    lock::{rw_read, rw_write},
    messages::{ControlMessage, PrefetchSummary},
    mode::{ModeFlag, RetrievalMode},
    network::Network,
    prefetch::{PrefetchCoordinator, PrefetchJob},
    store::CacheStorage,
};

const SOURCE: &str = "worker::lifecycle";
const METRIC_EVICTED_GENERATION: &str = "offline_worker_evicted_generation_total";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum WorkerState {
    Installing,
    Waiting,
    Activating,
    Active,
}

impl WorkerState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Installing => "installing",
            Self::Waiting => "waiting",
            Self::Activating => "activating",
            Self::Active => "active",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InstallReport {
    pub seeded: usize,
    pub failed: usize,
    /// Always set: a new version never waits for older pages to close.
    pub skip_waiting: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActivationReport {
    pub evicted: Vec<String>,
    pub claimed: usize,
}

#[derive(Debug)]
pub enum MessageOutcome {
    ModeChanged {
        previous: RetrievalMode,
        current: RetrievalMode,
    },
    /// The job runs in the background; awaiting the handle yields its tallies.
    PrefetchStarted {
        total: usize,
        job: JoinHandle<PrefetchSummary>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerStatus {
    pub state: WorkerState,
    pub mode: RetrievalMode,
    pub cache_name: String,
    pub cached_entries: usize,
    pub clients: usize,
    /// RFC 3339 timestamp of the last activation.
    pub activated_at: Option<String>,
}

pub struct LifecycleController {
    config: WorkerConfig,
    state: RwLock<WorkerState>,
    activated_at: RwLock<Option<OffsetDateTime>>,
    storage: Arc<dyn CacheStorage>,
    mode: Arc<ModeFlag>,
    clients: Arc<ClientRegistry>,
    fetcher: Arc<ResourceFetcher>,
    prefetch: Arc<PrefetchCoordinator>,
    interceptor: Arc<RequestInterceptor>,
}

impl LifecycleController {
    pub fn new(
        config: WorkerConfig,
        storage: Arc<dyn CacheStorage>,
        network: Arc<dyn Network>,
    ) -> Self {
        let mode = Arc::new(ModeFlag::new());
        let clients = Arc::new(ClientRegistry::new());
        let fetcher = Arc::new(ResourceFetcher::new(
            config.origin.clone(),
            config.cache_name.clone(),
            storage.clone(),
            network,
        ));
        let prefetch = Arc::new(PrefetchCoordinator::new(
            fetcher.clone(),
            clients.clone(),
            config.prefetch_batch_size,
        ));
        let interceptor = Arc::new(RequestInterceptor::new(fetcher.clone(), mode.clone()));

        Self {
            config,
            state: RwLock::new(WorkerState::Installing),
            activated_at: RwLock::new(None),
            storage,
            mode,
            clients,
            fetcher,
            prefetch,
            interceptor,
        }
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    pub fn state(&self) -> WorkerState {
        *rw_read(&self.state, SOURCE, "state")
    }

    pub fn mode(&self) -> RetrievalMode {
        self.mode.current()
    }

    pub fn clients(&self) -> &Arc<ClientRegistry> {
        &self.clients
    }

    pub fn interceptor(&self) -> &Arc<RequestInterceptor> {
        &self.interceptor
    }

    /// Install, then activate straight away.
    pub async fn start(&self) -> (InstallReport, ActivationReport) {
        let install = self.install().await;
        let activation = self.activate().await;
        (install, activation)
    }

    /// Open the current generation and seed it with the core files.
    ///
    /// Seeding is best effort: a core file that cannot be fetched is counted
    /// and logged, and installation still completes.
    pub async fn install(&self) -> InstallReport {
        self.transition(WorkerState::Installing);

        if let Err(error) = self.storage.open(&self.config.cache_name).await {
            warn!(
                target = "offline_worker::lifecycle",
                cache = %self.config.cache_name,
                error = %error,
                "failed to open cache generation during install"
            );
        }

        let results = join_all(self.config.seed_paths.iter().map(|path| async move {
            let locator = match self.fetcher.locate(path) {
                Ok(locator) => locator,
                Err(error) => {
                    warn!(
                        target = "offline_worker::lifecycle",
                        path = %path,
                        error = %error,
                        "invalid seed path"
                    );
                    return false;
                }
            };
            match self.fetcher.refresh(&locator).await {
                Ok(_) => true,
                Err(error) => {
                    warn!(
                        target = "offline_worker::lifecycle",
                        path = %path,
                        error = %error,
                        "failed to seed core file"
                    );
                    false
                }
            }
        }))
        .await;

        let seeded = results.iter().filter(|seeded| **seeded).count();
        let report = InstallReport {
            seeded,
            failed: results.len() - seeded,
            skip_waiting: true,
        };

        info!(
            target = "offline_worker::lifecycle",
            cache = %self.config.cache_name,
            seeded = report.seeded,
            failed = report.failed,
            "install complete"
        );
        self.transition(WorkerState::Waiting);

        report
    }

    /// Evict every stale generation, claim all connected pages and reset the
    /// mode flag. Safe to repeat: the current generation is never evicted.
    pub async fn activate(&self) -> ActivationReport {
        self.transition(WorkerState::Activating);

        let names = match self.storage.names().await {
            Ok(names) => names,
            Err(error) => {
                warn!(
                    target = "offline_worker::lifecycle",
                    error = %error,
                    "failed to list cache generations"
                );
                Vec::new()
            }
        };

        let mut evicted = Vec::new();
        for name in names.into_iter().filter(|name| *name != self.config.cache_name) {
            match self.storage.delete(&name).await {
                Ok(_) => {
                    counter!(METRIC_EVICTED_GENERATION).increment(1);
                    info!(
                        target = "offline_worker::lifecycle",
                        cache = %name,
                        "evicted stale cache generation"
                    );
                    evicted.push(name);
                }
                Err(error) => {
                    warn!(
                        target = "offline_worker::lifecycle",
                        cache = %name,
                        error = %error,
                        "failed to evict stale cache generation"
                    );
                }
            }
        }

        let claimed = self.clients.claim(&self.config.cache_name);
        self.mode.reset();
        *rw_write(&self.activated_at, SOURCE, "activate") = Some(OffsetDateTime::now_utc());
        self.transition(WorkerState::Active);

        ActivationReport { evicted, claimed }
    }

    /// Apply a control message sent by `client`.
    pub fn handle_message(
        &self,
        client: Option<ClientId>,
        message: ControlMessage,
    ) -> MessageOutcome {
        match message {
            ControlMessage::UpdateCacheStrategy { cache_first } => {
                let current = RetrievalMode::from_cache_first(cache_first);
                let previous = self.mode.set(current);
                info!(
                    target = "offline_worker::lifecycle",
                    previous = previous.as_str(),
                    current = current.as_str(),
                    "retrieval mode updated"
                );
                MessageOutcome::ModeChanged { previous, current }
            }
            ControlMessage::CacheResources {
                resources,
                force_update,
            } => {
                let total = resources.len();
                let coordinator = self.prefetch.clone();
                let job = tokio::spawn(async move {
                    coordinator
                        .run(PrefetchJob {
                            resources,
                            client,
                            force_update,
                        })
                        .await
                });
                MessageOutcome::PrefetchStarted { total, job }
            }
        }
    }

    /// Run a prefetch job on the caller's task.
    pub async fn prefetch(&self, job: PrefetchJob) -> PrefetchSummary {
        self.prefetch.run(job).await
    }

    pub async fn status(&self) -> WorkerStatus {
        let cached_entries = match self.storage.open(&self.config.cache_name).await {
            Ok(generation) => generation.keys().await.map(|keys| keys.len()).unwrap_or(0),
            Err(_) => 0,
        };

        let activated_at =
            (*rw_read(&self.activated_at, SOURCE, "status")).and_then(|at| at.format(&Rfc3339).ok());

        WorkerStatus {
            state: self.state(),
            mode: self.mode(),
            cache_name: self.config.cache_name.clone(),
            cached_entries,
            clients: self.clients.len(),
            activated_at,
        }
    }

    fn transition(&self, next: WorkerState) {
        let previous = std::mem::replace(&mut *rw_write(&self.state, SOURCE, "transition"), next);
        if previous != next {
            info!(
                target = "offline_worker::lifecycle",
                from = previous.as_str(),
                to = next.as_str(),
                "worker state changed"
            );
        }
    }
}
