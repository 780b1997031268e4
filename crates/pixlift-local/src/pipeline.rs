use std::path::Path;

use image::{ImageFormat, ImageReader, RgbImage};

use pixlift_core::enhance::{EnhanceError, EnhanceResult, Enhanced};

use crate::runtime::{FaceRestorer, LoadedModels};

#[derive(Clone, Copy, Debug)]
pub struct PipelineOptions {
    pub upscale_factor: u32,
    pub max_input_pixels: Option<u64>,
    pub face_restore_weight: f32,
    pub face_restore_max_side: u32,
}

/// Decode → size check → upscale → restore faces → encode. Blocking.
pub fn run(
    models: &LoadedModels,
    input: &Path,
    output: &Path,
    opts: PipelineOptions,
) -> EnhanceResult {
    // Header-only probe first so oversized inputs are rejected before their
    // pixels are allocated.
    let (width, height) = open_reader(input)?
        .into_dimensions()
        .map_err(|e| EnhanceError::Decode(e.to_string()))?;
    let pixels = u64::from(width) * u64::from(height);
    if let Some(limit) = opts.max_input_pixels {
        if pixels > limit {
            return Err(EnhanceError::TooLarge { pixels, limit });
        }
    }

    let img = open_reader(input)?
        .decode()
        .map_err(|e| EnhanceError::Decode(e.to_string()))?
        .to_rgb8();

    let upscaled = models
        .upscaler
        .upscale(&img, opts.upscale_factor)
        .map_err(|e| EnhanceError::Backend(format!("upscaler: {e}")))?;
    let restored = restore_faces(models.face_restorer.as_ref(), upscaled, &opts)?;

    restored
        .save_with_format(output, ImageFormat::Jpeg)
        .map_err(|e| EnhanceError::Backend(format!("encoding result: {e}")))?;

    tracing::debug!(
        width,
        height,
        out_width = restored.width(),
        out_height = restored.height(),
        "pipeline finished"
    );
    Ok(Enhanced::File(output.to_path_buf()))
}

/// Blend the restorer's output into the upscaled frame. Frames much larger
/// than the restorer's working size are left alone: the restored frame would
/// only contribute blur there.
fn restore_faces(
    restorer: &dyn FaceRestorer,
    upscaled: RgbImage,
    opts: &PipelineOptions,
) -> Result<RgbImage, EnhanceError> {
    let (w, h) = upscaled.dimensions();
    if opts.face_restore_weight <= 0.0 || w.max(h) > opts.face_restore_max_side {
        tracing::debug!(width = w, height = h, "face restoration skipped");
        return Ok(upscaled);
    }

    let restored = restorer
        .restore(&upscaled)
        .map_err(|e| EnhanceError::Backend(format!("face restorer: {e}")))?;
    if restored.dimensions() != (w, h) {
        return Err(EnhanceError::Backend(format!(
            "face restorer returned {:?}, expected {:?}",
            restored.dimensions(),
            (w, h)
        )));
    }
    Ok(blend(&upscaled, &restored, opts.face_restore_weight))
}

fn blend(base: &RgbImage, overlay: &RgbImage, weight: f32) -> RgbImage {
    let mut out = base.clone();
    for (dst, src) in out.pixels_mut().zip(overlay.pixels()) {
        for ch in 0..3 {
            let v = f32::from(dst.0[ch]) * (1.0 - weight) + f32::from(src.0[ch]) * weight;
            dst.0[ch] = v.round().clamp(0.0, 255.0) as u8;
        }
    }
    out
}

fn open_reader(
    input: &Path,
) -> Result<ImageReader<std::io::BufReader<std::fs::File>>, EnhanceError> {
    ImageReader::open(input)
        .and_then(|r| r.with_guessed_format())
        .map_err(|e| EnhanceError::Decode(e.to_string()))
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use image::Rgb;
    use pixlift_core::Result;

    use super::*;

    /// Returns a flat frame, like a restorer that only saw a downscaled copy.
    struct FlatRestorer {
        color: Rgb<u8>,
        calls: AtomicUsize,
    }

    impl FlatRestorer {
        fn new(color: [u8; 3]) -> Self {
            Self {
                color: Rgb(color),
                calls: AtomicUsize::new(0),
            }
        }
    }

    impl FaceRestorer for FlatRestorer {
        fn restore(&self, img: &RgbImage) -> Result<RgbImage> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(RgbImage::from_pixel(img.width(), img.height(), self.color))
        }
    }

    struct ShrinkingRestorer;

    impl FaceRestorer for ShrinkingRestorer {
        fn restore(&self, _img: &RgbImage) -> Result<RgbImage> {
            Ok(RgbImage::new(512, 512))
        }
    }

    fn opts(weight: f32, max_side: u32) -> PipelineOptions {
        PipelineOptions {
            upscale_factor: 4,
            max_input_pixels: None,
            face_restore_weight: weight,
            face_restore_max_side: max_side,
        }
    }

    fn checkerboard(side: u32) -> RgbImage {
        RgbImage::from_fn(side, side, |x, y| {
            if (x + y) % 2 == 0 {
                Rgb([255, 255, 255])
            } else {
                Rgb([0, 0, 0])
            }
        })
    }

    #[test]
    fn large_frames_keep_upscaler_detail() {
        let restorer = FlatRestorer::new([128, 128, 128]);
        let frame = checkerboard(64);

        let out = restore_faces(&restorer, frame.clone(), &opts(0.5, 32)).unwrap();

        assert_eq!(out, frame);
        assert_eq!(restorer.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn small_frames_are_blended_by_weight() {
        let restorer = FlatRestorer::new([200, 100, 0]);
        let frame = RgbImage::from_pixel(16, 16, Rgb([0, 100, 200]));

        let out = restore_faces(&restorer, frame, &opts(0.5, 32)).unwrap();

        assert_eq!(restorer.calls.load(Ordering::SeqCst), 1);
        assert!(out.pixels().all(|p| *p == Rgb([100, 100, 100])));
    }

    #[test]
    fn zero_weight_skips_the_restorer() {
        let restorer = FlatRestorer::new([0, 0, 0]);
        let frame = checkerboard(8);

        let out = restore_faces(&restorer, frame.clone(), &opts(0.0, 1024)).unwrap();

        assert_eq!(out, frame);
        assert_eq!(restorer.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn restorer_must_keep_dimensions() {
        let err = restore_faces(&ShrinkingRestorer, checkerboard(8), &opts(0.5, 1024)).unwrap_err();
        assert!(matches!(err, EnhanceError::Backend(_)));
    }
}
