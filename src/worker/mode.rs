use std::sync::atomic::{AtomicBool, Ordering};

use serde::Serialize;

/// Retrieval order for mode-aware requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum RetrievalMode {
    #[default]
    NetworkFirst,
    CacheFirst,
}

impl RetrievalMode {
    pub fn from_cache_first(cache_first: bool) -> Self {
        if cache_first {
            Self::CacheFirst
        } else {
            Self::NetworkFirst
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::NetworkFirst => "networkFirst",
            Self::CacheFirst => "cacheFirst",
        }
    }
}

/// Process-wide retrieval mode, shared by the lifecycle controller and the
/// interceptor.
///
/// Never persisted: a fresh worker always starts network-first.
#[derive(Debug, Default)]
pub struct ModeFlag {
    cache_first: AtomicBool,
}

impl ModeFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> RetrievalMode {
        RetrievalMode::from_cache_first(self.cache_first.load(Ordering::Acquire))
    }

    /// Overwrite the mode, returning the previous one.
    pub fn set(&self, mode: RetrievalMode) -> RetrievalMode {
        let previous = self
            .cache_first
            .swap(mode == RetrievalMode::CacheFirst, Ordering::AcqRel);
        RetrievalMode::from_cache_first(previous)
    }

    pub fn reset(&self) {
        self.set(RetrievalMode::default());
    }
}
