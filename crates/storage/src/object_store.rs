//! Object storage interface for realtime radar chunks (S3 compatible).

use async_trait::async_trait;
use bytes::Bytes;
use object_store::{aws::AmazonS3Builder, path::Path, ObjectStore};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::fs;
use tracing::{debug, instrument};

use radar_common::{FeedError, FeedResult};

/// Configuration for object storage connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObjectStorageConfig {
    /// Custom endpoint URL (MinIO, localstack); `None` uses AWS
    #[serde(default)]
    pub endpoint: Option<String>,
    /// Bucket name
    #[serde(default = "default_bucket")]
    pub bucket: String,
    /// AWS region
    #[serde(default = "default_region")]
    pub region: String,
    /// Access key ID (omit for anonymous access)
    #[serde(default)]
    pub access_key_id: Option<String>,
    /// Secret access key
    #[serde(default)]
    pub secret_access_key: Option<String>,
    /// Allow HTTP (for local MinIO)
    #[serde(default)]
    pub allow_http: bool,
    /// Send unsigned requests (public buckets)
    #[serde(default = "default_skip_signature")]
    pub skip_signature: bool,
}

fn default_bucket() -> String {
    "unidata-nexrad-level2-chunks".to_string()
}

fn default_region() -> String {
    "us-east-1".to_string()
}

fn default_skip_signature() -> bool {
    true
}

impl Default for ObjectStorageConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            bucket: default_bucket(),
            region: default_region(),
            access_key_id: None,
            secret_access_key: None,
            allow_http: false,
            skip_signature: default_skip_signature(),
        }
    }
}

/// Object storage client for the chunk bucket.
pub struct ObjectStorage {
    store: Arc<dyn ObjectStore>,
    bucket: String,
}

impl ObjectStorage {
    /// Create a new object storage client from config.
    pub fn new(config: &ObjectStorageConfig) -> FeedResult<Self> {
        let mut builder = AmazonS3Builder::new()
            .with_bucket_name(&config.bucket)
            .with_region(&config.region)
            .with_allow_http(config.allow_http)
            .with_skip_signature(config.skip_signature);

        if let Some(endpoint) = &config.endpoint {
            builder = builder.with_endpoint(endpoint);
        }
        if let (Some(key), Some(secret)) = (&config.access_key_id, &config.secret_access_key) {
            builder = builder
                .with_access_key_id(key)
                .with_secret_access_key(secret);
        }

        let store = builder
            .build()
            .map_err(|e| FeedError::Configuration(format!("Failed to create S3 client: {}", e)))?;

        Ok(Self {
            store: Arc::new(store),
            bucket: config.bucket.clone(),
        })
    }

    /// Wrap an existing store (in-memory stores in tests, custom backends).
    pub fn with_store(store: Arc<dyn ObjectStore>, bucket: impl Into<String>) -> Self {
        Self {
            store,
            bucket: bucket.into(),
        }
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    /// Write bytes to a path in the bucket.
    #[instrument(skip(self, data), fields(bucket = %self.bucket, path = %path))]
    pub async fn put(&self, path: &str, data: Bytes) -> FeedResult<()> {
        let location = Path::from(path);
        debug!(size = data.len(), "Writing object");

        self.store
            .put(&location, data.into())
            .await
            .map_err(|e| FeedError::Transfer(format!("Failed to write {}: {}", path, e)))?;

        Ok(())
    }

    /// Read bytes from a path.
    #[instrument(skip(self), fields(bucket = %self.bucket, path = %path))]
    pub async fn get(&self, path: &str) -> FeedResult<Bytes> {
        let location = Path::from(path);

        let result = self
            .store
            .get(&location)
            .await
            .map_err(|e| FeedError::Transfer(format!("Failed to read {}: {}", path, e)))?;

        let bytes = result
            .bytes()
            .await
            .map_err(|e| FeedError::Transfer(format!("Failed to read bytes of {}: {}", path, e)))?;

        debug!(size = bytes.len(), "Read object");
        Ok(bytes)
    }

    /// Check if an object exists.
    pub async fn exists(&self, path: &str) -> FeedResult<bool> {
        let location = Path::from(path);

        match self.store.head(&location).await {
            Ok(_) => Ok(true),
            Err(object_store::Error::NotFound { .. }) => Ok(false),
            Err(e) => Err(FeedError::Transfer(format!(
                "Failed to check {}: {}",
                path, e
            ))),
        }
    }

    /// List objects with a given prefix (e.g. `KTLX/585/`).
    pub async fn list(&self, prefix: &str) -> FeedResult<Vec<String>> {
        use futures::TryStreamExt;

        let prefix_path = Path::from(prefix);
        let mut paths = Vec::new();

        let mut stream = self.store.list(Some(&prefix_path));
        while let Some(meta) = stream
            .try_next()
            .await
            .map_err(|e| FeedError::Transfer(format!("List failed: {}", e)))?
        {
            paths.push(meta.location.to_string());
        }

        Ok(paths)
    }
}

/// Fetches a chunk by its object key and materialises it locally.
#[async_trait]
pub trait ChunkFetcher: Send + Sync {
    /// Download the chunk at `raw_path` and return the local file holding it.
    ///
    /// Fetching the same key twice yields byte-identical files.
    async fn fetch(&self, raw_path: &str) -> FeedResult<PathBuf>;

    /// Delete a local chunk file once it has been decoded.
    async fn remove(&self, local: &std::path::Path) -> FeedResult<()> {
        match fs::remove_file(local).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(FeedError::Io(e)),
        }
    }
}

/// Chunk store client: object storage reads written to a per-site folder.
pub struct ChunkStore {
    storage: ObjectStorage,
    data_dir: PathBuf,
}

impl ChunkStore {
    pub fn new(storage: ObjectStorage, data_dir: impl Into<PathBuf>) -> Self {
        Self {
            storage,
            data_dir: data_dir.into(),
        }
    }

    pub fn storage(&self) -> &ObjectStorage {
        &self.storage
    }

    /// Local file for a chunk key.
    ///
    /// Format: {data_dir}/{site}/{key with '/' replaced by '_'}
    pub fn local_path(&self, raw_path: &str) -> PathBuf {
        let site = raw_path
            .split('/')
            .next()
            .filter(|s| !s.is_empty())
            .unwrap_or("unknown");
        self.data_dir.join(site).join(raw_path.replace('/', "_"))
    }
}

#[async_trait]
impl ChunkFetcher for ChunkStore {
    #[instrument(skip(self), fields(bucket = %self.storage.bucket))]
    async fn fetch(&self, raw_path: &str) -> FeedResult<PathBuf> {
        let bytes = self.storage.get(raw_path).await?;
        let final_path = self.local_path(raw_path);

        if let Some(parent) = final_path.parent() {
            fs::create_dir_all(parent).await.map_err(|e| {
                FeedError::Transfer(format!("Failed to create {}: {}", parent.display(), e))
            })?;
        }

        // Concurrent fetches of the same key each write their own partial file
        let temp_path = final_path.with_extension(format!("{}.partial", uuid::Uuid::new_v4().simple()));
        fs::write(&temp_path, &bytes)
            .await
            .map_err(|e| FeedError::Transfer(format!("Failed to write {}: {}", temp_path.display(), e)))?;
        fs::rename(&temp_path, &final_path)
            .await
            .map_err(|e| FeedError::Transfer(format!("Failed to move {}: {}", final_path.display(), e)))?;

        debug!(path = %final_path.display(), size = bytes.len(), "Chunk stored locally");
        Ok(final_path)
    }
}
