//! Frame encoding helpers.
//!
//! - `encode_jpeg_data_url`: lossy snapshot for the classifier request body.
//! - `fit_to_surface`: scale a video frame onto the recordable surface.
//! - `decode_jpeg`: in-memory decode for HTTP camera sources.

use anyhow::{anyhow, Context, Result};
use base64::{engine::general_purpose::STANDARD as BASE64_STANDARD, Engine as _};
use image::codecs::jpeg::JpegEncoder;
use image::{imageops, ExtendedColorType, ImageEncoder, RgbImage};

const DATA_URL_PREFIX: &str = "data:image/jpeg;base64,";

/// Encode an RGB frame as JPEG at `quality` (1..=100).
pub fn encode_jpeg(frame: &RgbImage, quality: u8) -> Result<Vec<u8>> {
    if frame.width() == 0 || frame.height() == 0 {
        return Err(anyhow!("cannot encode an empty frame"));
    }
    let mut out = Vec::with_capacity((frame.width() * frame.height() / 4) as usize);
    JpegEncoder::new_with_quality(&mut out, quality.clamp(1, 100))
        .write_image(
            frame.as_raw(),
            frame.width(),
            frame.height(),
            ExtendedColorType::Rgb8,
        )
        .context("encode jpeg")?;
    Ok(out)
}

/// Encode an RGB frame as a `data:image/jpeg;base64,...` URL.
pub fn encode_jpeg_data_url(frame: &RgbImage, quality: u8) -> Result<String> {
    let jpeg = encode_jpeg(frame, quality)?;
    let mut url = String::with_capacity(DATA_URL_PREFIX.len() + jpeg.len() * 4 / 3 + 4);
    url.push_str(DATA_URL_PREFIX);
    BASE64_STANDARD.encode_string(&jpeg, &mut url);
    Ok(url)
}

pub fn decode_jpeg(bytes: &[u8]) -> Result<RgbImage> {
    let image = image::load_from_memory(bytes).context("decode jpeg")?;
    Ok(image.into_rgb8())
}

/// Scale `frame` to exactly `width` x `height`. Same-size frames are copied as-is.
pub fn fit_to_surface(frame: &RgbImage, width: u32, height: u32) -> RgbImage {
    if frame.width() == width && frame.height() == height {
        return frame.clone();
    }
    imageops::resize(frame, width, height, imageops::FilterType::Triangle)
}
