//! Local model backend: upscaler followed by a face restorer.
//!
//! Weights are fetched on first use and both models are constructed exactly
//! once per backend, however many requests race for them.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::OnceCell;

use pixlift_core::{
    config::{BackendKind, LocalModelConfig},
    enhance::{EnhanceBackend, EnhanceError, EnhanceJob, EnhanceResult},
    errors::Error,
    Result,
};

#[cfg(feature = "candle")]
pub mod candle;
pub mod pipeline;
pub mod runtime;
pub mod weights;

use pipeline::PipelineOptions;
use runtime::{LoadedModels, ModelRuntime, WeightPaths};
use weights::{ensure_weight, HttpWeightFetcher, WeightFetcher};

/// The inference runtime compiled into this build, if any.
#[cfg(feature = "candle")]
pub fn default_runtime() -> Option<Arc<dyn ModelRuntime>> {
    Some(Arc::new(candle::CandleRuntime::new()))
}

#[cfg(not(feature = "candle"))]
pub fn default_runtime() -> Option<Arc<dyn ModelRuntime>> {
    None
}

pub struct LocalBackend {
    cfg: LocalModelConfig,
    runtime: Arc<dyn ModelRuntime>,
    fetcher: Arc<dyn WeightFetcher>,
    models: OnceCell<Arc<LoadedModels>>,
}

impl LocalBackend {
    pub fn new(cfg: LocalModelConfig, runtime: Arc<dyn ModelRuntime>) -> Self {
        Self::with_fetcher(cfg, runtime, Arc::new(HttpWeightFetcher::new()))
    }

    pub fn with_fetcher(
        cfg: LocalModelConfig,
        runtime: Arc<dyn ModelRuntime>,
        fetcher: Arc<dyn WeightFetcher>,
    ) -> Self {
        Self {
            cfg,
            runtime,
            fetcher,
            models: OnceCell::new(),
        }
    }

    /// Fetch weights and load both models on first call; later calls reuse
    /// them. A failed attempt leaves the cell empty so the next request retries.
    pub async fn models(&self) -> Result<Arc<LoadedModels>> {
        let models = self
            .models
            .get_or_try_init(|| async {
                let dir = &self.cfg.model_dir;
                let weights = WeightPaths {
                    upscaler: ensure_weight(dir, &self.cfg.upscaler, self.fetcher.as_ref())
                        .await?,
                    face_restorer: ensure_weight(
                        dir,
                        &self.cfg.face_restorer,
                        self.fetcher.as_ref(),
                    )
                    .await?,
                };

                let runtime = Arc::clone(&self.runtime);
                let loaded = tokio::task::spawn_blocking(move || runtime.load(&weights))
                    .await
                    .map_err(|e| Error::External(format!("model loading task failed: {e}")))??;

                tracing::info!(
                    runtime = self.runtime.name(),
                    device = %loaded.device,
                    "models loaded"
                );
                Ok::<_, Error>(Arc::new(loaded))
            })
            .await?;
        Ok(Arc::clone(models))
    }
}

#[async_trait]
impl EnhanceBackend for LocalBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Local
    }

    async fn enhance(&self, job: EnhanceJob<'_>) -> EnhanceResult {
        let models = self
            .models()
            .await
            .map_err(|e| EnhanceError::Backend(e.to_string()))?;

        let opts = PipelineOptions {
            upscale_factor: self.cfg.upscale_factor,
            max_input_pixels: self.cfg.max_input_pixels,
            face_restore_weight: self.cfg.face_restore_weight,
            face_restore_max_side: self.cfg.face_restore_max_side,
        };
        let (input, output) = (job.input.to_path_buf(), job.output.to_path_buf());

        tokio::task::spawn_blocking(move || pipeline::run(&models, &input, &output, opts))
            .await
            .map_err(|e| EnhanceError::Backend(format!("inference task failed: {e}")))?
    }
}

#[cfg(test)]
mod tests {
    use std::{
        path::Path,
        sync::atomic::{AtomicBool, AtomicUsize, Ordering},
        time::Duration,
    };

    use image::{imageops::FilterType, Rgb, RgbImage};
    use pixlift_core::{config::WeightSpec, enhance::Enhanced};

    use super::*;
    use crate::runtime::{FaceRestorer, Upscaler};

    struct NearestUpscaler;

    impl Upscaler for NearestUpscaler {
        fn upscale(&self, img: &RgbImage, scale: u32) -> Result<RgbImage> {
            Ok(image::imageops::resize(
                img,
                img.width() * scale,
                img.height() * scale,
                FilterType::Nearest,
            ))
        }
    }

    struct PassthroughRestorer;

    impl FaceRestorer for PassthroughRestorer {
        fn restore(&self, img: &RgbImage) -> Result<RgbImage> {
            Ok(img.clone())
        }
    }

    #[derive(Default)]
    struct CountingRuntime {
        loads: AtomicUsize,
    }

    impl ModelRuntime for CountingRuntime {
        fn name(&self) -> &'static str {
            "counting"
        }

        fn load(&self, weights: &WeightPaths) -> Result<LoadedModels> {
            assert!(weights.upscaler.exists());
            assert!(weights.face_restorer.exists());
            self.loads.fetch_add(1, Ordering::SeqCst);
            // Keep the window open so racing requests pile up on the cell.
            std::thread::sleep(Duration::from_millis(50));
            Ok(LoadedModels {
                upscaler: Box::new(NearestUpscaler),
                face_restorer: Box::new(PassthroughRestorer),
                device: "cpu".to_string(),
            })
        }
    }

    #[derive(Default)]
    struct FlakyFetcher {
        calls: AtomicUsize,
        fail_first: AtomicBool,
    }

    #[async_trait]
    impl WeightFetcher for FlakyFetcher {
        async fn fetch(&self, _url: &str, dest: &Path) -> Result<u64> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_first.swap(false, Ordering::SeqCst) {
                return Err(Error::External("connection reset".to_string()));
            }
            tokio::fs::write(dest, b"onnx").await?;
            Ok(4)
        }
    }

    struct Fixture {
        dir: tempfile::TempDir,
        runtime: Arc<CountingRuntime>,
        fetcher: Arc<FlakyFetcher>,
        backend: Arc<LocalBackend>,
    }

    fn fixture(max_input_pixels: Option<u64>) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let cfg = LocalModelConfig {
            model_dir: dir.path().join("weights"),
            upscaler: WeightSpec {
                url: "https://example.invalid/up.onnx".to_string(),
                file_name: "up.onnx".to_string(),
            },
            face_restorer: WeightSpec {
                url: "https://example.invalid/face.onnx".to_string(),
                file_name: "face.onnx".to_string(),
            },
            upscale_factor: 4,
            max_input_pixels,
            face_restore_weight: 0.5,
            face_restore_max_side: 1024,
        };
        let runtime = Arc::new(CountingRuntime::default());
        let fetcher = Arc::new(FlakyFetcher::default());
        let backend = Arc::new(LocalBackend::with_fetcher(
            cfg,
            runtime.clone(),
            fetcher.clone(),
        ));
        Fixture {
            dir,
            runtime,
            fetcher,
            backend,
        }
    }

    fn write_png(path: &Path, w: u32, h: u32) {
        let img = RgbImage::from_fn(w, h, |x, y| Rgb([(x * 10) as u8, (y * 10) as u8, 128]));
        img.save_with_format(path, image::ImageFormat::Png).unwrap();
    }

    async fn run(f: &Fixture, name: &str) -> EnhanceResult {
        let input = f.dir.path().join(format!("{name}_in.jpg"));
        let output = f.dir.path().join(format!("{name}_out.jpg"));
        if !input.exists() {
            write_png(&input, 8, 6);
        }
        f.backend
            .enhance(EnhanceJob {
                input: &input,
                output: &output,
            })
            .await
    }

    #[tokio::test]
    async fn enhances_to_four_times_the_size() {
        let f = fixture(None);
        let out = run(&f, "a").await.unwrap();

        let Enhanced::File(path) = out else {
            panic!("expected a file result");
        };
        let decoded = image::open(&path).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (32, 24));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_first_requests_load_models_once() {
        let f = fixture(None);
        let mut set = tokio::task::JoinSet::new();
        for i in 0..8 {
            let backend = f.backend.clone();
            let input = f.dir.path().join(format!("c{i}_in.png"));
            let output = f.dir.path().join(format!("c{i}_out.jpg"));
            write_png(&input, 4, 4);
            set.spawn(async move {
                backend
                    .enhance(EnhanceJob {
                        input: &input,
                        output: &output,
                    })
                    .await
            });
        }
        while let Some(res) = set.join_next().await {
            assert!(res.unwrap().is_ok());
        }

        assert_eq!(f.runtime.loads.load(Ordering::SeqCst), 1);
        // One download per weight file.
        assert_eq!(f.fetcher.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn undecodable_input_is_a_failure_result() {
        let f = fixture(None);
        let input = f.dir.path().join("junk_in.jpg");
        std::fs::write(&input, b"definitely not an image").unwrap();

        let err = run(&f, "junk").await.unwrap_err();
        assert!(matches!(err, EnhanceError::Decode(_)));
    }

    #[tokio::test]
    async fn truncated_jpeg_is_a_failure_result() {
        let f = fixture(None);
        let input = f.dir.path().join("trunc_in.jpg");
        std::fs::write(&input, b"\xff\xd8\xff\xe0\x00\x10JFIF").unwrap();

        let err = run(&f, "trunc").await.unwrap_err();
        assert!(matches!(err, EnhanceError::Decode(_)));
    }

    #[tokio::test]
    async fn oversized_input_is_rejected() {
        let f = fixture(Some(40));
        let err = run(&f, "big").await.unwrap_err();
        assert!(matches!(
            err,
            EnhanceError::TooLarge {
                pixels: 48,
                limit: 40
            }
        ));
    }

    #[tokio::test]
    async fn failed_initialization_is_retried() {
        let f = fixture(None);
        f.fetcher.fail_first.store(true, Ordering::SeqCst);

        let err = run(&f, "first").await.unwrap_err();
        assert!(matches!(err, EnhanceError::Backend(_)));
        assert_eq!(f.runtime.loads.load(Ordering::SeqCst), 0);

        run(&f, "second").await.unwrap();
        assert_eq!(f.runtime.loads.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn default_runtime_matches_features() {
        assert_eq!(default_runtime().is_some(), cfg!(feature = "candle"));
    }
}
