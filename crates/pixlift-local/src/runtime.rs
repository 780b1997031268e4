use std::path::PathBuf;

use image::RgbImage;

use pixlift_core::Result;

/// Super-resolution model.
pub trait Upscaler: Send + Sync {
    /// Returns an image exactly `scale` times larger on both axes.
    fn upscale(&self, img: &RgbImage, scale: u32) -> Result<RgbImage>;
}

/// Face restoration model, run on the already-upscaled frame. Returns the
/// restored frame at the input's dimensions; blending it back is up to the
/// caller.
pub trait FaceRestorer: Send + Sync {
    fn restore(&self, img: &RgbImage) -> Result<RgbImage>;
}

/// Local paths of the two weight files.
#[derive(Clone, Debug)]
pub struct WeightPaths {
    pub upscaler: PathBuf,
    pub face_restorer: PathBuf,
}

/// Both models, loaded once and shared read-only afterwards.
pub struct LoadedModels {
    pub upscaler: Box<dyn Upscaler>,
    pub face_restorer: Box<dyn FaceRestorer>,
    /// Compute device picked at load time (e.g. `cuda:0`, `cpu`).
    pub device: String,
}

/// Inference runtime that turns weight files into models.
///
/// `load` is blocking and may take seconds; callers run it off the async
/// executor.
pub trait ModelRuntime: Send + Sync {
    fn name(&self) -> &'static str;

    fn load(&self, weights: &WeightPaths) -> Result<LoadedModels>;
}
