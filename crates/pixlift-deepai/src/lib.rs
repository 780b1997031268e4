//! DeepAI adapter (remote super-resolution).
//!
//! Uploads the photo to the `torch-srgan` endpoint and hands back the URL of
//! the enhanced image.

use async_trait::async_trait;

use pixlift_core::{
    config::{BackendKind, DeepaiConfig},
    enhance::{EnhanceBackend, EnhanceError, EnhanceJob, EnhanceResult, Enhanced},
    errors::Error,
    Result,
};

const RESULT_FIELD: &str = "output_url";

#[derive(Clone, Debug)]
pub struct DeepaiClient {
    api_key: String,
    endpoint: String,
    http: reqwest::Client,
}

impl DeepaiClient {
    pub fn new(cfg: &DeepaiConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(cfg.timeout)
            .build()
            .map_err(|e| Error::External(format!("deepai http client: {e}")))?;
        Ok(Self {
            api_key: cfg.api_key.clone(),
            endpoint: cfg.endpoint.clone(),
            http,
        })
    }

    /// One multipart upload, no retry. `Ok(None)` means the API answered but
    /// gave no usable result.
    pub async fn upscale(&self, bytes: Vec<u8>, file_name: String) -> Result<Option<String>> {
        let form = reqwest::multipart::Form::new().part(
            "image",
            reqwest::multipart::Part::bytes(bytes)
                .file_name(file_name)
                .mime_str("image/jpeg")
                .map_err(|e| Error::External(format!("deepai multipart error: {e}")))?,
        );

        let resp = self
            .http
            .post(&self.endpoint)
            .header("api-key", &self.api_key)
            .multipart(form)
            .send()
            .await
            .map_err(|e| Error::External(format!("deepai request error: {e}")))?;

        let status = resp.status();
        let body = resp
            .text()
            .await
            .map_err(|e| Error::External(format!("deepai body error: {e}")))?;

        let url = serde_json::from_str::<serde_json::Value>(&body)
            .ok()
            .and_then(|v| extract_output_url(&v));

        if url.is_none() {
            tracing::warn!(
                %status,
                body = %body.chars().take(200).collect::<String>(),
                "deepai response carried no {RESULT_FIELD}"
            );
        }

        Ok(url)
    }
}

fn extract_output_url(v: &serde_json::Value) -> Option<String> {
    v.get(RESULT_FIELD)
        .and_then(|u| u.as_str())
        .map(str::trim)
        .filter(|u| !u.is_empty())
        .map(str::to_string)
}

#[async_trait]
impl EnhanceBackend for DeepaiClient {
    fn kind(&self) -> BackendKind {
        BackendKind::Deepai
    }

    async fn enhance(&self, job: EnhanceJob<'_>) -> EnhanceResult {
        let bytes = tokio::fs::read(job.input)
            .await
            .map_err(|e| EnhanceError::Backend(format!("reading input: {e}")))?;

        let file_name = job
            .input
            .file_name()
            .and_then(|s| s.to_str())
            .unwrap_or("photo.jpg")
            .to_string();

        match self.upscale(bytes, file_name).await {
            Ok(Some(url)) => Ok(Enhanced::Url(url)),
            Ok(None) => Err(EnhanceError::NoResult),
            Err(e) => Err(EnhanceError::Backend(e.to_string())),
        }
    }
}
