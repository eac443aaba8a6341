//! The offline caching engine.
//!
//! A [`LifecycleController`] owns one worker version: it installs (seeds the
//! current cache generation), activates (evicts stale generations and claims
//! connected pages) and applies control messages. Requests are answered by
//! the [`RequestInterceptor`], which resolves them through the
//! [`ResourceFetcher`] in the order the current [`RetrievalMode`] dictates.
//!
//! The engine talks to the outside world only through two traits:
//! [`CacheStorage`] for the durable request/response store and [`Network`]
//! for upstream requests.

pub mod classify;
pub mod clients;
pub mod config;
pub mod error;
pub mod fetcher;
pub mod interceptor;
pub mod lifecycle;
mod lock;
pub mod messages;
pub mod mode;
pub mod network;
pub mod prefetch;
pub mod store;
#[cfg(test)]
pub(crate) mod testing;
pub mod variants;

pub use classify::{LocatorError, ResourceClass, ResourceLocator};
pub use clients::{ClientId, ClientRegistry, Subscription};
pub use config::WorkerConfig;
pub use error::{CacheStoreError, ControlError, FetchError, NetworkError};
pub use fetcher::{FetchPlan, LookupOrder, Resolved, ResolvedFrom, ResourceFetcher, StorePolicy};
pub use interceptor::{
    InterceptedRequest, Interception, RequestInterceptor, WORKER_CACHE_HEADER,
    unavailable_response,
};
pub use lifecycle::{
    ActivationReport, InstallReport, LifecycleController, MessageOutcome, WorkerState,
    WorkerStatus,
};
pub use messages::{ControlMessage, PrefetchSummary, WorkerMessage};
pub use mode::{ModeFlag, RetrievalMode};
pub use network::{Network, NetworkRequest};
pub use prefetch::{PrefetchCoordinator, PrefetchJob, PrefetchOutcome};
pub use store::{CacheGeneration, CacheStorage, MemoryCacheStorage, StoredResponse};
pub use variants::case_variants;
