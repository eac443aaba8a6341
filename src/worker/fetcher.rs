//! Single-resource resolution against the network and the current cache
//! generation.

use std::sync::Arc;

use axum::http::StatusCode;
use metrics::counter;
use tracing::{debug, instrument, warn};
use url::Url;

use super::{
    classify::{LocatorError, ResourceLocator},
    error::{FetchError, NetworkError},
    mode::RetrievalMode,
    network::{Network, NetworkRequest},
    store::{CacheGeneration, CacheStorage, StoredResponse},
};

const METRIC_CACHE_HIT: &str = "offline_worker_cache_hit_total";
const METRIC_CACHE_MISS: &str = "offline_worker_cache_miss_total";
const METRIC_CACHE_WRITE_FAILURE: &str = "offline_worker_cache_write_failure_total";
const METRIC_NETWORK_FAILURE: &str = "offline_worker_network_failure_total";

/// Which store is consulted first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LookupOrder {
    CacheFirst,
    /// Network, then the cache when the network cannot deliver.
    NetworkFirst,
}

impl From<RetrievalMode> for LookupOrder {
    fn from(mode: RetrievalMode) -> Self {
        match mode {
            RetrievalMode::CacheFirst => Self::CacheFirst,
            RetrievalMode::NetworkFirst => Self::NetworkFirst,
        }
    }
}

/// Which network responses may be written to the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorePolicy {
    Always,
    SameOriginOnly,
}

impl StorePolicy {
    fn allows(self, locator: &ResourceLocator) -> bool {
        match self {
            Self::Always => true,
            Self::SameOriginOnly => !locator.is_remote(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchPlan {
    pub order: LookupOrder,
    /// Markup probes the cache without its query string.
    pub markup: bool,
    pub store: StorePolicy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolvedFrom {
    Cache,
    Network,
}

/// A successfully resolved resource.
#[derive(Debug, Clone)]
pub struct Resolved {
    pub response: StoredResponse,
    /// Key the response is stored under: always the originally requested one.
    pub key: String,
    /// Cache key or URL that actually satisfied the request.
    pub matched: String,
    pub source: ResolvedFrom,
}

pub struct ResourceFetcher {
    origin: Url,
    cache_name: String,
    storage: Arc<dyn CacheStorage>,
    network: Arc<dyn Network>,
}

impl ResourceFetcher {
    pub fn new(
        origin: Url,
        cache_name: impl Into<String>,
        storage: Arc<dyn CacheStorage>,
        network: Arc<dyn Network>,
    ) -> Self {
        Self {
            origin,
            cache_name: cache_name.into(),
            storage,
            network,
        }
    }

    pub fn origin(&self) -> &Url {
        &self.origin
    }

    pub fn cache_name(&self) -> &str {
        &self.cache_name
    }

    pub fn network(&self) -> &Arc<dyn Network> {
        &self.network
    }

    pub fn locate(&self, reference: &str) -> Result<ResourceLocator, LocatorError> {
        ResourceLocator::resolve(reference, &self.origin)
    }

    /// Resolve `locator` in the order `plan` asks for.
    ///
    /// Whatever candidate satisfies the request, the response ends up stored
    /// under the locator's own key.
    #[instrument(skip_all, fields(key = %locator.cache_key(), order = ?plan.order))]
    pub async fn fetch_resource(
        &self,
        locator: &ResourceLocator,
        plan: FetchPlan,
    ) -> Result<Resolved, FetchError> {
        match plan.order {
            LookupOrder::CacheFirst => {
                if let Some(resolved) = self.from_cache(locator, plan.markup).await {
                    return Ok(resolved);
                }
                self.from_network(locator, plan.store).await
            }
            LookupOrder::NetworkFirst => match self.from_network(locator, plan.store).await {
                Ok(resolved) => Ok(resolved),
                Err(error) => {
                    debug!(
                        target = "offline_worker::fetcher",
                        error = %error,
                        "network failed, falling back to cache"
                    );
                    match self.from_cache(locator, plan.markup).await {
                        Some(resolved) => Ok(resolved),
                        None => Err(error),
                    }
                }
            },
        }
    }

    /// Fetch `locator` from the network and store it, ignoring any cached
    /// copy.
    pub async fn refresh(&self, locator: &ResourceLocator) -> Result<Resolved, FetchError> {
        self.from_network(locator, StorePolicy::Always).await
    }

    /// Find a cached copy under any candidate key, without re-storing it.
    pub async fn find_cached(
        &self,
        locator: &ResourceLocator,
        markup: bool,
    ) -> Option<(String, StoredResponse)> {
        let generation = self.open_generation().await?;

        for candidate in locator.cache_candidates(markup) {
            match generation.lookup(&candidate).await {
                Ok(Some(response)) => return Some((candidate, response)),
                Ok(None) => {}
                Err(error) => {
                    warn!(
                        target = "offline_worker::fetcher",
                        key = %candidate,
                        error = %error,
                        "cache lookup failed"
                    );
                    return None;
                }
            }
        }

        None
    }

    async fn from_cache(&self, locator: &ResourceLocator, markup: bool) -> Option<Resolved> {
        let key = locator.cache_key();

        let Some((matched, response)) = self.find_cached(locator, markup).await else {
            counter!(METRIC_CACHE_MISS).increment(1);
            return None;
        };
        counter!(METRIC_CACHE_HIT).increment(1);

        if matched != key {
            debug!(
                target = "offline_worker::fetcher",
                matched = %matched,
                "cache hit under a candidate key, re-storing"
            );
            self.store(&key, &response).await;
        }

        Some(Resolved {
            response,
            key,
            matched,
            source: ResolvedFrom::Cache,
        })
    }

    async fn from_network(
        &self,
        locator: &ResourceLocator,
        policy: StorePolicy,
    ) -> Result<Resolved, FetchError> {
        let key = locator.cache_key();
        let remote = locator.is_remote();

        let mut last_status: Option<StatusCode> = None;
        let mut last_error: Option<NetworkError> = None;

        // Candidates are tried one at a time so the first casing that answers
        // deterministically wins.
        for url in locator.network_candidates(&self.origin) {
            match self.network.send(NetworkRequest::get(url.clone())).await {
                Ok(response) if accepts(remote, response.status()) => {
                    if policy.allows(locator) {
                        self.store(&key, &response).await;
                    }
                    return Ok(Resolved {
                        response,
                        key,
                        matched: url.to_string(),
                        source: ResolvedFrom::Network,
                    });
                }
                Ok(response) => {
                    debug!(
                        target = "offline_worker::fetcher",
                        url = %url,
                        status = response.status().as_u16(),
                        "candidate rejected"
                    );
                    last_status = Some(response.status());
                }
                Err(error) => {
                    counter!(METRIC_NETWORK_FAILURE).increment(1);
                    debug!(
                        target = "offline_worker::fetcher",
                        url = %url,
                        error = %error,
                        "candidate unreachable"
                    );
                    last_error = Some(error);
                }
            }
        }

        match (last_status, last_error) {
            (None, Some(source)) => Err(FetchError::Network { url: key, source }),
            (status, _) => Err(FetchError::not_found(key, status)),
        }
    }

    async fn open_generation(&self) -> Option<Arc<dyn CacheGeneration>> {
        match self.storage.open(&self.cache_name).await {
            Ok(generation) => Some(generation),
            Err(error) => {
                warn!(
                    target = "offline_worker::fetcher",
                    cache = %self.cache_name,
                    error = %error,
                    "cache generation unavailable"
                );
                None
            }
        }
    }

    /// Write `response` under `key`; failures only cost the cached copy.
    async fn store(&self, key: &str, response: &StoredResponse) -> bool {
        let Some(generation) = self.open_generation().await else {
            counter!(METRIC_CACHE_WRITE_FAILURE).increment(1);
            return false;
        };

        match generation.put(key, response.clone()).await {
            Ok(()) => true,
            Err(error) => {
                counter!(METRIC_CACHE_WRITE_FAILURE).increment(1);
                warn!(
                    target = "offline_worker::fetcher",
                    key = %key,
                    error = %error,
                    "cache write failed, serving uncached"
                );
                false
            }
        }
    }
}

/// Remote resources accept any 2xx; local candidates need exactly 200 so
/// that a casing probe never settles on an empty or partial answer.
fn accepts(remote: bool, status: StatusCode) -> bool {
    if remote {
        status.is_success()
    } else {
        status == StatusCode::OK
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::worker::{
        store::MemoryCacheStorage,
        testing::{ScriptedNetwork, UnavailableStorage},
    };

    const ORIGIN: &str = "https://cards.example/";

    fn fetcher(network: Arc<ScriptedNetwork>) -> (ResourceFetcher, Arc<MemoryCacheStorage>) {
        let storage = Arc::new(MemoryCacheStorage::new());
        let fetcher = ResourceFetcher::new(
            Url::parse(ORIGIN).expect("origin"),
            "cards-v1",
            storage.clone(),
            network,
        );
        (fetcher, storage)
    }

    fn plan(order: LookupOrder, markup: bool) -> FetchPlan {
        FetchPlan {
            order,
            markup,
            store: StorePolicy::Always,
        }
    }

    async fn cached(storage: &MemoryCacheStorage, key: &str) -> Option<StoredResponse> {
        let generation = storage.open("cards-v1").await.expect("open");
        generation.lookup(key).await.expect("lookup")
    }

    #[tokio::test]
    async fn unavailable_cache_still_serves_from_the_network() {
        let network = Arc::new(ScriptedNetwork::new());
        network.serve("https://cards.example/a.json", "{}");
        let fetcher = ResourceFetcher::new(
            Url::parse(ORIGIN).expect("origin"),
            "cards-v1",
            Arc::new(UnavailableStorage),
            network,
        );
        let locator = fetcher.locate("a.json").expect("locate");

        for order in [LookupOrder::CacheFirst, LookupOrder::NetworkFirst] {
            let resolved = fetcher
                .fetch_resource(&locator, plan(order, false))
                .await
                .expect("served without a cache");
            assert_eq!(resolved.source, ResolvedFrom::Network);
            assert_eq!(resolved.response.body().as_ref(), b"{}");
        }
        assert!(fetcher.find_cached(&locator, false).await.is_none());
    }

    #[tokio::test]
    async fn variant_match_is_stored_under_the_requested_key() {
        let network = Arc::new(ScriptedNetwork::new());
        network.serve("https://cards.example/img/Image.jpg", "jpeg bytes");
        let (fetcher, storage) = fetcher(network.clone());

        let locator = fetcher.locate("/img/Image.JPG").expect("locate");
        let resolved = fetcher
            .fetch_resource(&locator, plan(LookupOrder::NetworkFirst, false))
            .await
            .expect("resolves through a casing variant");

        assert_eq!(resolved.key, "/img/Image.JPG");
        assert_eq!(resolved.matched, "https://cards.example/img/Image.jpg");
        assert!(cached(&storage, "/img/Image.JPG").await.is_some());
        assert!(cached(&storage, "/img/Image.jpg").await.is_none());
        assert_eq!(
            network.requests(),
            vec![
                "https://cards.example/img/Image.JPG",
                "https://cards.example/img/Image.jpg",
            ]
        );
    }

    #[tokio::test]
    async fn cache_first_hit_skips_the_network() {
        let network = Arc::new(ScriptedNetwork::new());
        let (fetcher, storage) = fetcher(network.clone());
        storage
            .open("cards-v1")
            .await
            .expect("open")
            .put("/a.json", ScriptedNetwork::ok("{}"))
            .await
            .expect("seed");

        let locator = fetcher.locate("a.json").expect("locate");
        let resolved = fetcher
            .fetch_resource(&locator, plan(LookupOrder::CacheFirst, false))
            .await
            .expect("cache hit");

        assert_eq!(resolved.source, ResolvedFrom::Cache);
        assert!(network.requests().is_empty());
    }

    #[tokio::test]
    async fn cache_variant_hit_is_restored_under_the_requested_key() {
        let network = Arc::new(ScriptedNetwork::new());
        let (fetcher, storage) = fetcher(network);
        storage
            .open("cards-v1")
            .await
            .expect("open")
            .put("/img/Cat.jpg", ScriptedNetwork::ok("cat"))
            .await
            .expect("seed");

        let locator = fetcher.locate("/img/Cat.JPG").expect("locate");
        let resolved = fetcher
            .fetch_resource(&locator, plan(LookupOrder::CacheFirst, false))
            .await
            .expect("variant hit");

        assert_eq!(resolved.matched, "/img/Cat.jpg");
        assert!(cached(&storage, "/img/Cat.JPG").await.is_some());
    }

    #[tokio::test]
    async fn markup_query_shares_the_cached_document() {
        let network = Arc::new(ScriptedNetwork::new());
        let (fetcher, storage) = fetcher(network.clone());
        storage
            .open("cards-v1")
            .await
            .expect("open")
            .put("/view.html", ScriptedNetwork::ok("<html>"))
            .await
            .expect("seed");

        let locator = fetcher.locate("/view.html?id=5").expect("locate");
        let resolved = fetcher
            .fetch_resource(&locator, plan(LookupOrder::CacheFirst, true))
            .await
            .expect("served from the query-less document");

        assert_eq!(resolved.source, ResolvedFrom::Cache);
        assert_eq!(resolved.key, "/view.html?id=5");
        assert!(cached(&storage, "/view.html?id=5").await.is_some());
        assert!(network.requests().is_empty());
    }

    #[tokio::test]
    async fn network_first_falls_back_to_cache() {
        let network = Arc::new(ScriptedNetwork::new());
        network.fail("https://cards.example/packs.json");
        let (fetcher, storage) = fetcher(network);
        storage
            .open("cards-v1")
            .await
            .expect("open")
            .put("/packs.json", ScriptedNetwork::ok("[]"))
            .await
            .expect("seed");

        let locator = fetcher.locate("/packs.json").expect("locate");
        let resolved = fetcher
            .fetch_resource(&locator, plan(LookupOrder::NetworkFirst, false))
            .await
            .expect("cache fallback");
        assert_eq!(resolved.source, ResolvedFrom::Cache);
    }

    #[tokio::test]
    async fn remote_resources_skip_casing_variants() {
        let network = Arc::new(ScriptedNetwork::new());
        network.status("https://cdn.example/Photo.PNG", StatusCode::NOT_FOUND);
        let (fetcher, _) = fetcher(network.clone());

        let locator = fetcher
            .locate("https://cdn.example/Photo.PNG")
            .expect("locate");
        let err = fetcher
            .refresh(&locator)
            .await
            .expect_err("remote 404 is not found");

        assert!(matches!(err, FetchError::NotFound { .. }));
        assert_eq!(err.status(), Some(StatusCode::NOT_FOUND));
        assert_eq!(network.requests(), vec!["https://cdn.example/Photo.PNG"]);
    }

    #[tokio::test]
    async fn unreachable_network_is_a_network_error() {
        let network = Arc::new(ScriptedNetwork::new());
        network.fail("https://cards.example/a.json");
        network.fail("https://cards.example/a.JSON");
        network.fail("https://cards.example/a.Json");
        let (fetcher, _) = fetcher(network);

        let locator = fetcher.locate("a.json").expect("locate");
        let err = fetcher.refresh(&locator).await.expect_err("offline");
        assert!(matches!(err, FetchError::Network { .. }));
    }

    #[tokio::test]
    async fn same_origin_policy_does_not_store_remote_responses() {
        let network = Arc::new(ScriptedNetwork::new());
        network.serve("https://cdn.example/lib.js", "js");
        let (fetcher, storage) = fetcher(network);

        let locator = fetcher.locate("https://cdn.example/lib.js").expect("locate");
        fetcher
            .fetch_resource(
                &locator,
                FetchPlan {
                    order: LookupOrder::NetworkFirst,
                    markup: false,
                    store: StorePolicy::SameOriginOnly,
                },
            )
            .await
            .expect("served");

        assert!(cached(&storage, "https://cdn.example/lib.js").await.is_none());
    }

    #[tokio::test]
    async fn failed_cache_write_still_serves_the_response() {
        let network = Arc::new(ScriptedNetwork::new());
        network.serve("https://cards.example/big.json", "0123456789");
        let storage = Arc::new(MemoryCacheStorage::with_quota(4));
        let fetcher = ResourceFetcher::new(
            Url::parse(ORIGIN).expect("origin"),
            "cards-v1",
            storage.clone(),
            network,
        );

        let locator = fetcher.locate("/big.json").expect("locate");
        let resolved = fetcher.refresh(&locator).await.expect("served uncached");
        assert_eq!(resolved.response.body().len(), 10);

        let generation = storage.open("cards-v1").await.expect("open");
        assert!(generation.lookup("/big.json").await.expect("lookup").is_none());
    }
}
