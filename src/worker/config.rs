use std::num::NonZeroUsize;

use url::Url;

pub const DEFAULT_CACHE_PREFIX: &str = "offline-worker";
pub const DEFAULT_CACHE_VERSION: &str = "v1";
pub const DEFAULT_PREFETCH_BATCH_SIZE: usize = 10;
pub const DEFAULT_SEED_PATHS: [&str; 4] = ["/", "/index.html", "/view.html", "/packs.json"];

/// Everything the engine needs to know about the site it serves.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerConfig {
    pub origin: Url,
    /// Name of the current cache generation. Any other generation is stale.
    pub cache_name: String,
    /// Core files cached at install time.
    pub seed_paths: Vec<String>,
    pub prefetch_batch_size: NonZeroUsize,
}

impl WorkerConfig {
    pub fn new(origin: Url, cache_prefix: &str, cache_version: &str) -> Self {
        Self {
            origin,
            cache_name: generation_name(cache_prefix, cache_version),
            seed_paths: DEFAULT_SEED_PATHS.iter().map(|p| p.to_string()).collect(),
            prefetch_batch_size: NonZeroUsize::new(DEFAULT_PREFETCH_BATCH_SIZE)
                .unwrap_or(NonZeroUsize::MIN),
        }
    }

    pub fn with_seed_paths(mut self, seed_paths: Vec<String>) -> Self {
        self.seed_paths = seed_paths;
        self
    }

    pub fn with_prefetch_batch_size(mut self, batch_size: NonZeroUsize) -> Self {
        self.prefetch_batch_size = batch_size;
        self
    }
}

pub fn generation_name(prefix: &str, version: &str) -> String {
    format!("{prefix}-{version}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generation_name_joins_prefix_and_version() {
        let config = WorkerConfig::new(
            Url::parse("https://cards.example/").expect("origin"),
            "flashcards",
            "v7",
        );
        assert_eq!(config.cache_name, "flashcards-v7");
        assert_eq!(config.prefetch_batch_size.get(), 10);
        assert_eq!(config.seed_paths.first().map(String::as_str), Some("/"));
    }
}
