//! ONNX inference on candle.
//!
//! The upscaler graph takes `[1, 3, H, W]` in `0..1` and returns its native
//! scale (4x for Real-ESRGAN exports). The face restorer graph takes a fixed
//! `[1, 3, 512, 512]` frame in `-1..1`. No face detection or alignment: the
//! whole frame is restored and resized back; the pipeline decides whether and
//! how much of it to blend in.

use std::{collections::HashMap, path::Path};

use candle_core::{DType, Device, Tensor};
use candle_onnx::onnx::ModelProto;
use image::{imageops::FilterType, RgbImage};

use pixlift_core::{errors::Error, Result};

use crate::runtime::{FaceRestorer, LoadedModels, ModelRuntime, Upscaler, WeightPaths};

const FACE_INPUT_SIZE: u32 = 512;

fn ext(e: impl std::fmt::Display) -> Error {
    Error::External(format!("candle: {e}"))
}

#[derive(Clone, Copy, Debug)]
enum PixelRange {
    /// `0..1`
    Unit,
    /// `-1..1`
    Signed,
}

impl PixelRange {
    /// (scale, offset) mapping `0..255` into the range.
    fn normalize(self) -> (f64, f64) {
        match self {
            PixelRange::Unit => (1.0 / 255.0, 0.0),
            PixelRange::Signed => (1.0 / 127.5, -1.0),
        }
    }

    fn denormalize(self) -> (f64, f64) {
        match self {
            PixelRange::Unit => (255.0, 0.0),
            PixelRange::Signed => (127.5, 127.5),
        }
    }
}

#[derive(Debug, Default)]
pub struct CandleRuntime;

impl CandleRuntime {
    pub fn new() -> Self {
        Self
    }
}

impl ModelRuntime for CandleRuntime {
    fn name(&self) -> &'static str {
        "candle-onnx"
    }

    fn load(&self, weights: &WeightPaths) -> Result<LoadedModels> {
        let device = Device::cuda_if_available(0).map_err(ext)?;
        let label = if device.is_cuda() { "cuda:0" } else { "cpu" };

        let upscaler = OnnxGraph::load(&weights.upscaler, device.clone())?;
        let face = OnnxGraph::load(&weights.face_restorer, device)?;

        Ok(LoadedModels {
            upscaler: Box::new(OnnxUpscaler { graph: upscaler }),
            face_restorer: Box::new(OnnxFaceRestorer { graph: face }),
            device: label.to_string(),
        })
    }
}

struct OnnxGraph {
    model: ModelProto,
    input: String,
    output: String,
    device: Device,
}

impl OnnxGraph {
    fn load(path: &Path, device: Device) -> Result<Self> {
        let model = candle_onnx::read_file(path).map_err(ext)?;
        let graph = model
            .graph
            .as_ref()
            .ok_or_else(|| Error::External(format!("{}: no graph", path.display())))?;
        let input = graph
            .input
            .first()
            .map(|i| i.name.clone())
            .ok_or_else(|| Error::External(format!("{}: graph has no input", path.display())))?;
        let output = graph
            .output
            .first()
            .map(|o| o.name.clone())
            .ok_or_else(|| Error::External(format!("{}: graph has no output", path.display())))?;

        Ok(Self {
            model,
            input,
            output,
            device,
        })
    }

    fn run(&self, img: &RgbImage, range: PixelRange) -> Result<RgbImage> {
        let x = image_to_tensor(img, &self.device, range)?;
        let mut inputs = HashMap::new();
        inputs.insert(self.input.clone(), x);

        let mut outputs = candle_onnx::simple_eval(&self.model, inputs).map_err(ext)?;
        let y = outputs
            .remove(&self.output)
            .ok_or_else(|| Error::External(format!("missing output `{}`", self.output)))?;
        tensor_to_image(&y, range)
    }
}

fn image_to_tensor(img: &RgbImage, device: &Device, range: PixelRange) -> Result<Tensor> {
    let (w, h) = img.dimensions();
    let (mul, add) = range.normalize();
    let data: Vec<f32> = img.as_raw().iter().map(|&v| f32::from(v)).collect();

    Tensor::from_vec(data, (h as usize, w as usize, 3), device)
        .and_then(|t| t.permute((2, 0, 1)))
        .and_then(|t| t.affine(mul, add))
        .and_then(|t| t.unsqueeze(0))
        .map_err(ext)
}

fn tensor_to_image(t: &Tensor, range: PixelRange) -> Result<RgbImage> {
    let (mul, add) = range.denormalize();
    let t = t
        .squeeze(0)
        .and_then(|t| t.to_dtype(DType::F32))
        .and_then(|t| t.affine(mul, add))
        .and_then(|t| t.clamp(0f32, 255f32))
        .and_then(|t| t.to_device(&Device::Cpu))
        .map_err(ext)?;

    let (c, h, w) = t.dims3().map_err(ext)?;
    if c != 3 {
        return Err(Error::External(format!("expected 3 channels, got {c}")));
    }

    let data = t
        .permute((1, 2, 0))
        .and_then(|t| t.contiguous())
        .and_then(|t| t.flatten_all())
        .and_then(|t| t.to_vec1::<f32>())
        .map_err(ext)?;
    let bytes = data.into_iter().map(|v| v.round() as u8).collect();

    RgbImage::from_raw(w as u32, h as u32, bytes)
        .ok_or_else(|| Error::External("output buffer size mismatch".to_string()))
}

struct OnnxUpscaler {
    graph: OnnxGraph,
}

impl Upscaler for OnnxUpscaler {
    fn upscale(&self, img: &RgbImage, scale: u32) -> Result<RgbImage> {
        let out = self.graph.run(img, PixelRange::Unit)?;

        let (tw, th) = (img.width() * scale, img.height() * scale);
        if out.dimensions() == (tw, th) {
            return Ok(out);
        }
        // Model's native scale differs from the requested one.
        Ok(image::imageops::resize(&out, tw, th, FilterType::Lanczos3))
    }
}

struct OnnxFaceRestorer {
    graph: OnnxGraph,
}

impl FaceRestorer for OnnxFaceRestorer {
    fn restore(&self, img: &RgbImage) -> Result<RgbImage> {
        let (w, h) = img.dimensions();
        let frame = image::imageops::resize(img, FACE_INPUT_SIZE, FACE_INPUT_SIZE, FilterType::Lanczos3);
        let restored = self.graph.run(&frame, PixelRange::Signed)?;
        Ok(image::imageops::resize(&restored, w, h, FilterType::Lanczos3))
    }
}
