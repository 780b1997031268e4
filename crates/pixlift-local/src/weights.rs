use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;

use pixlift_core::{config::WeightSpec, errors::Error, Result};

/// Fetches a weight file from its release URL.
#[async_trait]
pub trait WeightFetcher: Send + Sync {
    /// Download `url` into `dest`, returning the number of bytes written.
    async fn fetch(&self, url: &str, dest: &Path) -> Result<u64>;
}

#[derive(Clone, Debug, Default)]
pub struct HttpWeightFetcher {
    http: reqwest::Client,
}

impl HttpWeightFetcher {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl WeightFetcher for HttpWeightFetcher {
    async fn fetch(&self, url: &str, dest: &Path) -> Result<u64> {
        let mut resp = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| Error::External(format!("weight download error: {e}")))?;

        if !resp.status().is_success() {
            return Err(Error::External(format!(
                "weight download failed: {} {url}",
                resp.status()
            )));
        }

        // Stream into a sibling `.part` file so an interrupted download never
        // looks like a complete one.
        let partial = partial_path(dest);
        let mut file = tokio::fs::File::create(&partial).await?;
        let mut written = 0u64;
        loop {
            let chunk = match resp.chunk().await {
                Ok(Some(chunk)) => chunk,
                Ok(None) => break,
                Err(e) => {
                    drop(file);
                    let _ = tokio::fs::remove_file(&partial).await;
                    return Err(Error::External(format!("weight download error: {e}")));
                }
            };
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        file.flush().await?;
        drop(file);

        tokio::fs::rename(&partial, dest).await?;
        Ok(written)
    }
}

fn partial_path(dest: &Path) -> PathBuf {
    let mut name = dest.file_name().unwrap_or_default().to_os_string();
    name.push(".part");
    dest.with_file_name(name)
}

/// Make sure `spec` is present in `dir`, downloading it only when the file is
/// missing. No checksum check; an existing file is trusted as-is.
pub async fn ensure_weight(
    dir: &Path,
    spec: &WeightSpec,
    fetcher: &dyn WeightFetcher,
) -> Result<PathBuf> {
    let path = dir.join(&spec.file_name);
    if tokio::fs::try_exists(&path).await? {
        tracing::debug!(path = %path.display(), "weights present");
        return Ok(path);
    }

    tokio::fs::create_dir_all(dir).await?;
    tracing::info!(url = %spec.url, path = %path.display(), "downloading weights");
    let bytes = fetcher.fetch(&spec.url, &path).await?;
    tracing::info!(path = %path.display(), bytes, "weights downloaded");
    Ok(path)
}
