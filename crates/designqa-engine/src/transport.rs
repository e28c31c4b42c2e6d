use anyhow::{bail, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use designqa_contracts::media::MediaType;
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::PngEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, Rgba, RgbaImage};
use serde_json::{json, Value};

use crate::config::TransportLimits;
use crate::intake::ImageAsset;

const JPEG_QUALITY: u8 = 88;
const MAX_SHRINK_PASSES: usize = 4;

/// Image bytes as they will travel to the analysis service.
#[derive(Debug, Clone)]
pub struct TransportImage {
    pub media_type: MediaType,
    pub bytes: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub downscaled: bool,
}

impl TransportImage {
    pub fn base64(&self) -> String {
        BASE64.encode(&self.bytes)
    }

    pub fn inline_data(&self) -> Value {
        json!({
            "inlineData": {
                "mimeType": self.media_type.mime(),
                "data": self.base64(),
            }
        })
    }
}

/// Passes the asset through when it fits `limits`; otherwise flattens it
/// onto white, shrinks it and re-encodes as JPEG until it fits. GIF never
/// travels as-is: it is re-encoded as PNG, or shrunk like any other image.
pub fn prepare_for_transport(asset: &ImageAsset, limits: &TransportLimits) -> Result<TransportImage> {
    let longest = asset.width().max(asset.height());
    let within_edge = longest <= limits.max_edge;
    if within_edge && asset.byte_len() <= limits.max_bytes && asset.media_type() != MediaType::Gif {
        return Ok(TransportImage {
            media_type: asset.media_type(),
            bytes: asset.bytes().to_vec(),
            width: asset.width(),
            height: asset.height(),
            downscaled: false,
        });
    }
    if within_edge && asset.media_type() == MediaType::Gif {
        let mut bytes = Vec::new();
        asset
            .decode()?
            .write_with_encoder(PngEncoder::new(&mut bytes))?;
        if bytes.len() <= limits.max_bytes {
            return Ok(TransportImage {
                media_type: MediaType::Png,
                bytes,
                width: asset.width(),
                height: asset.height(),
                downscaled: false,
            });
        }
    }

    let flattened = flatten_alpha(&asset.decode()?.to_rgba8());
    let mut edge = longest.min(limits.max_edge).max(1);
    for _ in 0..MAX_SHRINK_PASSES {
        let resized = flattened.resize(edge, edge, FilterType::Triangle).to_rgb8();
        let (width, height) = resized.dimensions();
        let mut bytes = Vec::new();
        DynamicImage::ImageRgb8(resized)
            .write_with_encoder(JpegEncoder::new_with_quality(&mut bytes, JPEG_QUALITY))?;
        if bytes.len() <= limits.max_bytes {
            return Ok(TransportImage {
                media_type: MediaType::Jpeg,
                bytes,
                width,
                height,
                downscaled: true,
            });
        }
        edge = (edge * 3 / 4).max(1);
    }

    bail!(
        "{} stays above {} bytes after downscaling",
        asset.name(),
        limits.max_bytes
    )
}

fn flatten_alpha(rgba: &RgbaImage) -> DynamicImage {
    let mut flattened = RgbaImage::new(rgba.width(), rgba.height());
    for (x, y, pixel) in rgba.enumerate_pixels() {
        let alpha = u16::from(pixel[3]);
        let blend = |channel: u8| -> u8 {
            (((u16::from(channel) * alpha) + (255 * (255 - alpha))) / 255) as u8
        };
        flattened.put_pixel(
            x,
            y,
            Rgba([blend(pixel[0]), blend(pixel[1]), blend(pixel[2]), 255]),
        );
    }
    DynamicImage::ImageRgba8(flattened)
}
