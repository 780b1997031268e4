//! Enhancement backend port.
//!
//! A backend takes the input image on disk and either points at a remote
//! result or writes its output next to it. Failures come back as an
//! [`EnhanceError`] carrying the reason.

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::config::BackendKind;

/// Paths of a single enhancement request. Both files are owned by the
/// caller's scope and are removed when it ends.
#[derive(Clone, Copy, Debug)]
pub struct EnhanceJob<'a> {
    pub input: &'a Path,
    pub output: &'a Path,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Enhanced {
    /// Publicly reachable URL of the enhanced image.
    Url(String),
    /// Enhanced image written to this path (normally `EnhanceJob::output`).
    File(PathBuf),
}

#[derive(Debug, thiserror::Error)]
pub enum EnhanceError {
    #[error("backend returned no result")]
    NoResult,

    #[error("input could not be decoded: {0}")]
    Decode(String),

    #[error("input has {pixels} pixels, limit is {limit}")]
    TooLarge { pixels: u64, limit: u64 },

    #[error("download failed: {0}")]
    Download(String),

    #[error("backend error: {0}")]
    Backend(String),
}

pub type EnhanceResult = std::result::Result<Enhanced, EnhanceError>;

#[async_trait]
pub trait EnhanceBackend: Send + Sync {
    fn kind(&self) -> BackendKind;

    async fn enhance(&self, job: EnhanceJob<'_>) -> EnhanceResult;
}
