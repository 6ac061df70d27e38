//! Frame decoding and face cropping.

use crate::types::BoundingBox;
use base64::Engine;
use image::{imageops, GrayImage};
use thiserror::Error;

const DATA_URL_PREFIX: &[u8] = b"data:";

#[derive(Error, Debug)]
pub enum FrameError {
    #[error("image payload is empty")]
    Empty,
    #[error("malformed data URL: {0}")]
    MalformedDataUrl(&'static str),
    #[error("base64 decode failed: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("image decode failed: {0}")]
    Decode(#[from] image::ImageError),
}

/// Decode an image payload into an 8-bit grayscale frame.
///
/// Accepts raw encoded bytes (PNG, JPEG, ...) or a browser-style
/// `data:<mime>;base64,<payload>` URL.
pub fn decode_payload(payload: &[u8]) -> Result<GrayImage, FrameError> {
    let payload = trim_whitespace(payload);
    if payload.is_empty() {
        return Err(FrameError::Empty);
    }

    let decoded;
    let bytes = if payload.starts_with(DATA_URL_PREFIX) {
        decoded = decode_data_url(payload)?;
        decoded.as_slice()
    } else {
        payload
    };

    Ok(image::load_from_memory(bytes)?.to_luma8())
}

fn trim_whitespace(bytes: &[u8]) -> &[u8] {
    let start = bytes
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .unwrap_or(bytes.len());
    let end = bytes
        .iter()
        .rposition(|b| !b.is_ascii_whitespace())
        .map_or(start, |i| i + 1);
    &bytes[start..end]
}

fn decode_data_url(url: &[u8]) -> Result<Vec<u8>, FrameError> {
    let comma = url
        .iter()
        .position(|&b| b == b',')
        .ok_or(FrameError::MalformedDataUrl("missing ',' separator"))?;
    let (header, data) = (&url[..comma], &url[comma + 1..]);
    if !header.ends_with(b";base64") {
        return Err(FrameError::MalformedDataUrl("only base64 payloads are supported"));
    }
    if data.is_empty() {
        return Err(FrameError::Empty);
    }
    Ok(base64::prelude::BASE64_STANDARD.decode(data)?)
}

/// Crop `face` out of `frame`, clamping the box to the frame bounds.
///
/// Returns `None` when nothing of the box lies inside the frame.
pub fn crop_face(frame: &GrayImage, face: &BoundingBox) -> Option<GrayImage> {
    let (width, height) = frame.dimensions();
    let x0 = face.x.max(0.0).floor() as u32;
    let y0 = face.y.max(0.0).floor() as u32;
    let x1 = ((face.x + face.width).max(0.0).ceil() as u32).min(width);
    let y1 = ((face.y + face.height).max(0.0).ceil() as u32).min(height);

    if x0 >= x1 || y0 >= y1 {
        return None;
    }
    Some(imageops::crop_imm(frame, x0, y0, x1 - x0, y1 - y0).to_image())
}
