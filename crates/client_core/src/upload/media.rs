use std::io::Cursor;

use async_trait::async_trait;
use image::{imageops::FilterType, DynamicImage, GenericImageView, ImageFormat, ImageReader};

use crate::error::UploadError;

pub const THUMBNAIL_MIME_TYPE: &str = "image/jpeg";

/// Decodes picked media far enough to describe it in the outgoing message.
#[async_trait]
pub trait MediaDecoder: Send + Sync {
    async fn image_dimensions(&self, data: &[u8]) -> Result<(u32, u32), UploadError>;
    async fn video_first_frame(&self, data: &[u8]) -> Result<DynamicImage, UploadError>;
}

/// Reads image headers with the `image` crate. It has no video support, so
/// video attachments fail at the metadata step.
pub struct ImageCrateDecoder;

#[async_trait]
impl MediaDecoder for ImageCrateDecoder {
    async fn image_dimensions(&self, data: &[u8]) -> Result<(u32, u32), UploadError> {
        ImageReader::new(Cursor::new(data))
            .with_guessed_format()
            .map_err(|err| UploadError::Metadata(err.to_string()))?
            .into_dimensions()
            .map_err(|err| UploadError::Metadata(err.to_string()))
    }

    async fn video_first_frame(&self, _data: &[u8]) -> Result<DynamicImage, UploadError> {
        Err(UploadError::Metadata("no video decoder available".to_string()))
    }
}

/// Fits `width`x`height` inside the bounds without scaling up. Height is
/// bounded first, then width; fractional pixels are dropped.
pub fn bounded_thumbnail_size(width: u32, height: u32, max_width: u32, max_height: u32) -> (u32, u32) {
    let (mut w, mut h) = (u64::from(width), u64::from(height));
    let (max_w, max_h) = (u64::from(max_width), u64::from(max_height));
    if h > max_h && h > 0 {
        w = w * max_h / h;
        h = max_h;
    }
    if w > max_w && w > 0 {
        h = h * max_w / w;
        w = max_w;
    }
    (w.max(1) as u32, h.max(1) as u32)
}

/// A JPEG preview frame ready for upload.
#[derive(Debug, Clone)]
pub struct Thumbnail {
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

pub fn encode_thumbnail_jpeg(
    frame: &DynamicImage,
    max_width: u32,
    max_height: u32,
) -> Result<Thumbnail, UploadError> {
    let (frame_w, frame_h) = frame.dimensions();
    let (width, height) = bounded_thumbnail_size(frame_w, frame_h, max_width, max_height);
    let resized = if (width, height) == (frame_w, frame_h) {
        frame.clone()
    } else {
        frame.resize_exact(width, height, FilterType::Triangle)
    };
    let rgb = DynamicImage::ImageRgb8(resized.to_rgb8());
    let mut data = Vec::new();
    rgb.write_to(&mut Cursor::new(&mut data), ImageFormat::Jpeg)
        .map_err(|err| UploadError::Metadata(format!("failed to encode thumbnail: {err}")))?;
    Ok(Thumbnail {
        data,
        width,
        height,
    })
}

#[cfg(test)]
mod tests {
    use image::{Rgb, RgbImage};

    use super::*;

    #[test]
    fn keeps_small_frames_untouched() {
        assert_eq!(bounded_thumbnail_size(640, 480, 800, 600), (640, 480));
        assert_eq!(bounded_thumbnail_size(800, 600, 800, 600), (800, 600));
    }

    #[test]
    fn bounds_height_then_width() {
        assert_eq!(bounded_thumbnail_size(1920, 1080, 800, 600), (800, 450));
        assert_eq!(bounded_thumbnail_size(1080, 1920, 800, 600), (337, 600));
        assert_eq!(bounded_thumbnail_size(4000, 100, 800, 600), (800, 20));
    }

    #[test]
    fn encodes_bounded_jpeg() {
        let frame = DynamicImage::ImageRgb8(RgbImage::from_pixel(1600, 900, Rgb([10, 20, 30])));
        let thumbnail = encode_thumbnail_jpeg(&frame, 800, 600).expect("thumbnail");
        assert_eq!((thumbnail.width, thumbnail.height), (800, 450));
        assert_eq!(&thumbnail.data[..2], &[0xFF, 0xD8]);
    }

    #[tokio::test]
    async fn reads_png_dimensions() {
        let mut png = Vec::new();
        DynamicImage::ImageRgb8(RgbImage::new(12, 7))
            .write_to(&mut Cursor::new(&mut png), ImageFormat::Png)
            .expect("png");
        let dims = ImageCrateDecoder
            .image_dimensions(&png)
            .await
            .expect("dimensions");
        assert_eq!(dims, (12, 7));
    }

    #[tokio::test]
    async fn video_is_unsupported_by_default() {
        let err = ImageCrateDecoder
            .video_first_frame(b"not a video")
            .await
            .expect_err("no video decoder");
        assert!(matches!(err, UploadError::Metadata(_)));
    }
}
