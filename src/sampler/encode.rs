use base64::{engine::general_purpose::STANDARD, Engine as _};
use image::codecs::jpeg::JpegEncoder;
use image::RgbImage;

use crate::capture::CaptureError;

pub const DEFAULT_JPEG_QUALITY: u8 = 85;

/// A JPEG-compressed frame ready to be sent for inference.
#[derive(Debug, Clone)]
pub struct EncodedFrame {
    pub bytes: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

impl EncodedFrame {
    /// `data:image/jpeg;base64,...`, the form the detection endpoint accepts.
    pub fn to_data_url(&self) -> String {
        format!("data:image/jpeg;base64,{}", STANDARD.encode(&self.bytes))
    }
}

/// Encodes a frame at its native resolution. Quality is clamped to 1..=100.
pub fn encode_jpeg(frame: &RgbImage, quality: u8) -> Result<EncodedFrame, CaptureError> {
    let (width, height) = frame.dimensions();
    if width == 0 || height == 0 {
        return Err(CaptureError::Frame("video has no dimensions yet".into()));
    }

    let mut bytes = Vec::new();
    JpegEncoder::new_with_quality(&mut bytes, quality.clamp(1, 100))
        .encode_image(frame)
        .map_err(|err| CaptureError::Frame(format!("jpeg encoding failed: {err}")))?;

    Ok(EncodedFrame {
        bytes,
        width,
        height,
    })
}
