//! Cache generations kept on disk so they outlive the process.
//!
//! Each generation is a directory under the storage root. It holds an
//! `index.json` mapping request keys to status, headers and a body file, plus
//! one body file per entry. Bodies are written before the index that points
//! at them, and the index is replaced by rename, so a crash never leaves an
//! entry pointing at a half-written body.

use std::{
    collections::{BTreeMap, HashMap},
    path::{Path, PathBuf},
    sync::Arc,
};

use async_trait::async_trait;
use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tokio::{fs, sync::Mutex};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::worker::{CacheGeneration, CacheStorage, CacheStoreError, StoredResponse};

const INDEX_FILE: &str = "index.json";
const INDEX_TMP_FILE: &str = "index.json.tmp";

#[derive(Debug, Clone, Serialize, Deserialize)]
struct IndexEntry {
    body: String,
    status: u16,
    headers: Vec<(String, String)>,
    size: usize,
}

type Index = BTreeMap<String, IndexEntry>;

/// Filesystem-backed [`CacheStorage`].
pub struct DiskCacheStorage {
    root: PathBuf,
    quota_bytes: Option<usize>,
    generations: Mutex<HashMap<String, Arc<DiskGeneration>>>,
}

impl DiskCacheStorage {
    /// Initialise storage rooted at `root`, creating the directory if necessary.
    pub fn new(root: PathBuf) -> Result<Self, std::io::Error> {
        std::fs::create_dir_all(&root)?;
        Ok(Self {
            root,
            quota_bytes: None,
            generations: Mutex::new(HashMap::new()),
        })
    }

    /// Limit every generation to `quota_bytes` of response bodies.
    pub fn with_quota(mut self, quota_bytes: usize) -> Self {
        self.quota_bytes = Some(quota_bytes);
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn generation_dir(&self, name: &str) -> Result<PathBuf, CacheStoreError> {
        if !is_valid_generation_name(name) {
            return Err(CacheStoreError::unavailable(
                name,
                "name is not usable as a directory",
            ));
        }
        Ok(self.root.join(name))
    }
}

#[async_trait]
impl CacheStorage for DiskCacheStorage {
    async fn open(&self, name: &str) -> Result<Arc<dyn CacheGeneration>, CacheStoreError> {
        let mut generations = self.generations.lock().await;
        if let Some(generation) = generations.get(name) {
            let generation: Arc<dyn CacheGeneration> = generation.clone();
            return Ok(generation);
        }

        let dir = self.generation_dir(name)?;
        fs::create_dir_all(&dir)
            .await
            .map_err(|err| CacheStoreError::unavailable(name, err))?;

        let index = match fs::read(dir.join(INDEX_FILE)).await {
            Ok(bytes) => serde_json::from_slice::<Index>(&bytes)
                .map_err(|err| CacheStoreError::unavailable(name, err))?,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Index::new(),
            Err(err) => return Err(CacheStoreError::unavailable(name, err)),
        };
        debug!(
            target = "offline_worker::disk_cache",
            cache = %name,
            entries = index.len(),
            "opened cache generation"
        );

        let generation = Arc::new(DiskGeneration {
            name: name.to_string(),
            dir,
            quota_bytes: self.quota_bytes,
            index: Mutex::new(index),
        });
        generations.insert(name.to_string(), generation.clone());

        let generation: Arc<dyn CacheGeneration> = generation;
        Ok(generation)
    }

    async fn names(&self) -> Result<Vec<String>, CacheStoreError> {
        let root = self.root.display().to_string();
        let mut entries = fs::read_dir(&self.root)
            .await
            .map_err(|err| CacheStoreError::unavailable(&root, err))?;

        let mut names = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|err| CacheStoreError::unavailable(&root, err))?
        {
            let is_dir = entry
                .file_type()
                .await
                .map(|kind| kind.is_dir())
                .unwrap_or(false);
            if !is_dir {
                continue;
            }
            if let Some(name) = entry.file_name().to_str()
                && is_valid_generation_name(name)
            {
                names.push(name.to_string());
            }
        }

        names.sort();
        Ok(names)
    }

    async fn delete(&self, name: &str) -> Result<bool, CacheStoreError> {
        let dir = self.generation_dir(name)?;
        let mut generations = self.generations.lock().await;
        generations.remove(name);

        match fs::remove_dir_all(&dir).await {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(err) => Err(CacheStoreError::unavailable(name, err)),
        }
    }
}

struct DiskGeneration {
    name: String,
    dir: PathBuf,
    quota_bytes: Option<usize>,
    index: Mutex<Index>,
}

impl DiskGeneration {
    async fn persist(&self, index: &Index) -> Result<(), std::io::Error> {
        let encoded = serde_json::to_vec(index).map_err(std::io::Error::other)?;
        let tmp = self.dir.join(INDEX_TMP_FILE);
        fs::write(&tmp, encoded).await?;
        fs::rename(&tmp, self.dir.join(INDEX_FILE)).await
    }

    async fn remove_body(&self, file: &str) {
        match fs::remove_file(self.dir.join(file)).await {
            Ok(()) => {}
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => warn!(
                target = "offline_worker::disk_cache",
                cache = %self.name,
                file = %file,
                error = %err,
                "failed to remove orphaned body"
            ),
        }
    }
}

#[async_trait]
impl CacheGeneration for DiskGeneration {
    fn name(&self) -> &str {
        &self.name
    }

    async fn lookup(&self, key: &str) -> Result<Option<StoredResponse>, CacheStoreError> {
        let Some(entry) = self.index.lock().await.get(key).cloned() else {
            return Ok(None);
        };

        let body = match fs::read(self.dir.join(&entry.body)).await {
            Ok(body) => Bytes::from(body),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(CacheStoreError::io(key, err)),
        };
        let status =
            StatusCode::from_u16(entry.status).map_err(|err| CacheStoreError::io(key, err))?;

        let mut headers = HeaderMap::new();
        for (name, value) in &entry.headers {
            if let (Ok(name), Ok(value)) = (
                HeaderName::from_bytes(name.as_bytes()),
                HeaderValue::from_str(value),
            ) {
                headers.append(name, value);
            }
        }

        Ok(Some(StoredResponse::new(status, headers, body)))
    }

    async fn put(&self, key: &str, response: StoredResponse) -> Result<(), CacheStoreError> {
        let mut index = self.index.lock().await;

        if let Some(quota) = self.quota_bytes {
            let used: usize = index
                .iter()
                .filter(|(existing, _)| existing.as_str() != key)
                .map(|(_, entry)| entry.size)
                .sum();
            if used + response.body().len() > quota {
                return Err(CacheStoreError::QuotaExceeded {
                    key: key.to_string(),
                    quota,
                });
            }
        }

        let file = format!("{}.body", Uuid::new_v4());
        fs::write(self.dir.join(&file), response.body())
            .await
            .map_err(|err| CacheStoreError::io(key, err))?;

        let entry = IndexEntry {
            body: file.clone(),
            status: response.status().as_u16(),
            headers: response
                .headers()
                .iter()
                .filter_map(|(name, value)| {
                    value
                        .to_str()
                        .ok()
                        .map(|value| (name.as_str().to_string(), value.to_string()))
                })
                .collect(),
            size: response.body().len(),
        };

        let previous = index.insert(key.to_string(), entry);
        if let Err(err) = self.persist(&index).await {
            match previous {
                Some(previous) => index.insert(key.to_string(), previous),
                None => index.remove(key),
            };
            self.remove_body(&file).await;
            return Err(CacheStoreError::io(key, err));
        }

        if let Some(previous) = previous {
            self.remove_body(&previous.body).await;
        }
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool, CacheStoreError> {
        let mut index = self.index.lock().await;
        let Some(removed) = index.remove(key) else {
            return Ok(false);
        };

        if let Err(err) = self.persist(&index).await {
            index.insert(key.to_string(), removed);
            return Err(CacheStoreError::io(key, err));
        }

        self.remove_body(&removed.body).await;
        Ok(true)
    }

    async fn keys(&self) -> Result<Vec<String>, CacheStoreError> {
        Ok(self.index.lock().await.keys().cloned().collect())
    }
}

fn is_valid_generation_name(name: &str) -> bool {
    !name.is_empty()
        && !name.starts_with('.')
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
}
