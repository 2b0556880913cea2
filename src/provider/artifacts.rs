//! Bundle artifact storage.
//!
//! Step bundles are uploaded to external storage under their
//! content-addressed prefixes before any stack update references them, so
//! both forward and rollback templates are fetchable at all times.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use aws_sdk_s3::Client;
use tokio::fs;
use tracing::{debug, info};

use crate::error::{ProviderError, Result};
use crate::planner::DeploymentStep;

/// Trait for bundle artifact storage backends.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Stores an object under a key.
    async fn put_object(&self, key: &str, body: Vec<u8>) -> Result<()>;

    /// Fetches an object by key, or `None` if it does not exist.
    async fn get_object(&self, key: &str) -> Result<Option<Vec<u8>>>;
}

/// S3-backed artifact store.
#[derive(Debug)]
pub struct S3ArtifactStore {
    /// S3 client.
    client: Client,
    /// Bucket name.
    bucket: String,
}

impl S3ArtifactStore {
    /// Creates a new artifact store against the ambient AWS configuration.
    pub async fn new(bucket: &str, region: Option<&str>) -> Self {
        let config = if let Some(region_str) = region {
            aws_config::from_env()
                .region(aws_config::Region::new(region_str.to_string()))
                .load()
                .await
        } else {
            aws_config::load_from_env().await
        };

        Self::with_client(Client::new(&config), bucket)
    }

    /// Creates a new artifact store from an existing client.
    #[must_use]
    pub fn with_client(client: Client, bucket: &str) -> Self {
        Self {
            client,
            bucket: bucket.to_string(),
        }
    }
}

#[async_trait]
impl ArtifactStore for S3ArtifactStore {
    async fn put_object(&self, key: &str, body: Vec<u8>) -> Result<()> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(body.into())
            .send()
            .await
            .map_err(|e| ProviderError::api(format!("S3 put error for {key}: {e}")))?;

        Ok(())
    }

    async fn get_object(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let result = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await;

        match result {
            Ok(response) => {
                let bytes = response.body.collect().await.map_err(|e| {
                    ProviderError::api(format!("S3 read error for {key}: {e}"))
                })?;
                Ok(Some(bytes.to_vec()))
            }
            Err(sdk_err) => {
                let service_err = sdk_err.into_service_error();
                if service_err.is_no_such_key() {
                    Ok(None)
                } else {
                    Err(ProviderError::api(format!("S3 get error for {key}: {service_err}")).into())
                }
            }
        }
    }
}

/// Uploads step bundles to an artifact store.
#[derive(Debug)]
pub struct BundleUploader<A: ArtifactStore> {
    /// Backing store.
    store: A,
}

impl<A: ArtifactStore> BundleUploader<A> {
    /// Creates a new uploader.
    #[must_use]
    pub const fn new(store: A) -> Self {
        Self { store }
    }

    /// Uploads every file under a local directory to a remote prefix.
    ///
    /// # Errors
    ///
    /// Returns an error if a file cannot be read or stored.
    pub async fn upload_dir(&self, prefix: &str, dir: &Path) -> Result<usize> {
        let mut files = Vec::new();
        collect_files(dir, dir, &mut files)?;
        files.sort();

        for relative in &files {
            let key = format!(
                "{}/{}",
                prefix.trim_end_matches('/'),
                relative.to_string_lossy().replace('\\', "/")
            );
            let body = fs::read(dir.join(relative)).await?;
            debug!("Uploading {key}");
            self.store.put_object(&key, body).await?;
        }

        Ok(files.len())
    }

    /// Uploads the bundles of every step, each under its deployment prefix.
    ///
    /// Rollback prefixes of later steps point at earlier deployments, so
    /// only distinct deployment prefixes are uploaded.
    ///
    /// # Errors
    ///
    /// Returns an error if any upload fails.
    pub async fn upload_steps(&self, steps: &[DeploymentStep]) -> Result<usize> {
        let mut uploaded = 0;
        let mut seen = HashSet::new();

        for step in steps {
            let prefix = step.deployment.bundle_prefix().to_string();
            if seen.insert(prefix.clone()) {
                uploaded += self.upload_dir(&prefix, &step.bundle_dir).await?;
            }
        }

        info!("Uploaded {uploaded} bundle file(s) for {} step(s)", steps.len());
        Ok(uploaded)
    }
}

/// Collects relative file paths under a directory.
fn collect_files(root: &Path, dir: &Path, out: &mut Vec<PathBuf>) -> Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            collect_files(root, &entry.path(), out)?;
        } else if let Ok(relative) = entry.path().strip_prefix(root) {
            out.push(relative.to_path_buf());
        }
    }
    Ok(())
}
