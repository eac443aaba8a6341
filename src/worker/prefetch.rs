//! Bulk prefetch with progress reporting.
//!
//! A job is processed in fixed-size batches: every resource of a batch is
//! resolved concurrently, and the next batch starts only once the whole batch
//! has settled. That caps the number of requests in flight at the batch size.
//! One failing resource never blocks the others; it is tallied and logged.

use std::{num::NonZeroUsize, sync::Arc, time::Instant};

use futures::future::join_all;
use metrics::{counter, histogram};
use tracing::{info, warn};

use super::{
    classify::ResourceClass,
    clients::{ClientId, ClientRegistry},
    fetcher::ResourceFetcher,
    messages::{PrefetchSummary, WorkerMessage},
};

const METRIC_PREFETCH_ITEM: &str = "offline_worker_prefetch_item_total";
const METRIC_PREFETCH_MS: &str = "offline_worker_prefetch_ms";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrefetchJob {
    /// Absolute remote URLs or origin paths, with or without the leading `/`.
    pub resources: Vec<String>,
    /// Page that asked for the job; progress is broadcast when unknown.
    pub client: Option<ClientId>,
    pub force_update: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrefetchOutcome {
    /// Fetched and stored for the first time.
    Success,
    /// Re-fetched over an existing cached copy.
    Updated,
    /// Already cached and not forced.
    Skipped,
    Failed,
}

impl PrefetchOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Updated => "updated",
            Self::Skipped => "skipped",
            Self::Failed => "failed",
        }
    }
}

impl PrefetchSummary {
    fn record(&mut self, outcome: PrefetchOutcome) {
        match outcome {
            PrefetchOutcome::Success => self.success += 1,
            PrefetchOutcome::Updated => {
                self.success += 1;
                self.updated += 1;
            }
            PrefetchOutcome::Skipped => self.skipped += 1,
            PrefetchOutcome::Failed => self.failed += 1,
        }
    }
}

pub struct PrefetchCoordinator {
    fetcher: Arc<ResourceFetcher>,
    clients: Arc<ClientRegistry>,
    batch_size: NonZeroUsize,
}

impl PrefetchCoordinator {
    pub fn new(
        fetcher: Arc<ResourceFetcher>,
        clients: Arc<ClientRegistry>,
        batch_size: NonZeroUsize,
    ) -> Self {
        Self {
            fetcher,
            clients,
            batch_size,
        }
    }

    /// Run `job` to completion, reporting a progress event after every batch
    /// and one completion event at the end.
    pub async fn run(&self, job: PrefetchJob) -> PrefetchSummary {
        let started = Instant::now();
        let total = job.resources.len();
        let mut summary = PrefetchSummary {
            total,
            ..PrefetchSummary::default()
        };

        info!(
            target = "offline_worker::prefetch",
            total,
            force_update = job.force_update,
            client = job.client.as_ref().map(ClientId::as_str),
            "prefetch started"
        );

        let mut current = 0;
        for batch in job.resources.chunks(self.batch_size.get()) {
            let outcomes = join_all(
                batch
                    .iter()
                    .map(|resource| self.prefetch_one(resource, job.force_update)),
            )
            .await;

            for outcome in outcomes {
                summary.record(outcome);
            }

            current += batch.len();
            let url = batch.last().cloned().unwrap_or_default();
            self.clients.post(
                job.client.as_ref(),
                WorkerMessage::CacheProgress {
                    current,
                    total,
                    url,
                },
            );
        }

        self.clients
            .post(job.client.as_ref(), WorkerMessage::CacheComplete(summary));

        let elapsed = started.elapsed();
        histogram!(METRIC_PREFETCH_MS).record(elapsed.as_secs_f64() * 1000.0);
        info!(
            target = "offline_worker::prefetch",
            success = summary.success,
            failed = summary.failed,
            skipped = summary.skipped,
            updated = summary.updated,
            total,
            elapsed_ms = elapsed.as_millis() as u64,
            "prefetch finished"
        );

        summary
    }

    async fn prefetch_one(&self, resource: &str, force_update: bool) -> PrefetchOutcome {
        let outcome = self.resolve(resource, force_update).await;
        counter!(METRIC_PREFETCH_ITEM, "outcome" => outcome.as_str()).increment(1);
        outcome
    }

    async fn resolve(&self, resource: &str, force_update: bool) -> PrefetchOutcome {
        let locator = match self.fetcher.locate(resource) {
            Ok(locator) => locator,
            Err(error) => {
                warn!(
                    target = "offline_worker::prefetch",
                    resource,
                    error = %error,
                    "skipping unresolvable resource"
                );
                return PrefetchOutcome::Failed;
            }
        };

        let markup = ResourceClass::classify(locator.path(), false) == ResourceClass::Markup;
        let cached = self.fetcher.find_cached(&locator, markup).await.is_some();
        if cached && !force_update {
            return PrefetchOutcome::Skipped;
        }

        match self.fetcher.refresh(&locator).await {
            Ok(_) if cached => PrefetchOutcome::Updated,
            Ok(_) => PrefetchOutcome::Success,
            Err(error) => {
                warn!(
                    target = "offline_worker::prefetch",
                    resource,
                    error = %error,
                    "prefetch failed"
                );
                PrefetchOutcome::Failed
            }
        }
    }
}
