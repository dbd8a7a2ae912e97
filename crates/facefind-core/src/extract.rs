//! Face extraction shared by ingestion and matching: decode, optional
//! downscale before detection, crop, embed.

use crate::adapter::{FaceDetector, FaceEmbedder};
use crate::types::{BoundingBox, Embedding};
use image::imageops::{self, FilterType};
use image::RgbImage;
use std::borrow::Cow;
use std::path::Path;
use thiserror::Error;

type BoxedError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Error, Debug)]
pub enum ExtractError {
    #[error("cannot read image: {0}")]
    Decode(#[from] image::ImageError),
    #[error("face box ({x:.1}, {y:.1}, {width:.1}x{height:.1}) has no area inside the {image_width}x{image_height} image")]
    EmptyCrop {
        x: f32,
        y: f32,
        width: f32,
        height: f32,
        image_width: u32,
        image_height: u32,
    },
    #[error("detector failed: {0}")]
    Detector(#[source] BoxedError),
    #[error("embedder failed: {0}")]
    Embedder(#[source] BoxedError),
}

/// Decode an image file into 8-bit RGB.
pub fn load_image(path: &Path) -> Result<RgbImage, ExtractError> {
    Ok(image::open(path)?.into_rgb8())
}

/// Shrink `image` so its longer side is at most `max_dimension`, keeping the
/// aspect ratio. Returns the (possibly borrowed) image and the scale applied.
///
/// Images already within bounds, and `max_dimension == 0`, pass through at scale 1.
pub fn downscale(image: &RgbImage, max_dimension: u32) -> (Cow<'_, RgbImage>, f32) {
    let longer = image.width().max(image.height());
    if max_dimension == 0 || longer <= max_dimension {
        return (Cow::Borrowed(image), 1.0);
    }

    let scale = max_dimension as f32 / longer as f32;
    let new_w = ((image.width() as f32 * scale).round() as u32).clamp(1, max_dimension);
    let new_h = ((image.height() as f32 * scale).round() as u32).clamp(1, max_dimension);
    let resized = imageops::resize(image, new_w, new_h, FilterType::Triangle);

    tracing::debug!(
        from = ?(image.width(), image.height()),
        to = ?(new_w, new_h),
        "downscaled image before detection"
    );

    (Cow::Owned(resized), scale)
}

/// Run the detector, optionally on a downscaled copy, and return boxes in the
/// coordinate space of the original `image`, in adapter order.
pub fn detect_faces<D: FaceDetector>(
    detector: &mut D,
    image: &RgbImage,
    max_dimension: Option<u32>,
) -> Result<Vec<BoundingBox>, ExtractError> {
    let (input, scale) = match max_dimension {
        Some(max) => downscale(image, max),
        None => (Cow::Borrowed(image), 1.0),
    };

    let detections = detector
        .detect(&input)
        .map_err(|e| ExtractError::Detector(Box::new(e)))?;

    Ok(detections.into_iter().map(|b| b.unscale(scale)).collect())
}

/// Cut the bounding box out of the image, clamped to the image bounds.
pub fn crop(image: &RgbImage, bbox: &BoundingBox) -> Result<RgbImage, ExtractError> {
    let (img_w, img_h) = image.dimensions();

    let x1 = bbox.x.max(0.0).floor();
    let y1 = bbox.y.max(0.0).floor();
    let x2 = (bbox.x + bbox.width).min(img_w as f32).ceil();
    let y2 = (bbox.y + bbox.height).min(img_h as f32).ceil();

    if !(x2 > x1 && y2 > y1) {
        return Err(ExtractError::EmptyCrop {
            x: bbox.x,
            y: bbox.y,
            width: bbox.width,
            height: bbox.height,
            image_width: img_w,
            image_height: img_h,
        });
    }

    let (x, y) = (x1 as u32, y1 as u32);
    let w = (x2 as u32).min(img_w) - x;
    let h = (y2 as u32).min(img_h) - y;

    Ok(imageops::crop_imm(image, x, y, w, h).to_image())
}

/// Crop one detected face and embed it.
pub fn embed_face<E: FaceEmbedder>(
    embedder: &mut E,
    image: &RgbImage,
    bbox: &BoundingBox,
) -> Result<Embedding, ExtractError> {
    let face = crop(image, bbox)?;
    embedder
        .embed(&face)
        .map_err(|e| ExtractError::Embedder(Box::new(e)))
}
