use std::fmt;
use std::fs;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use designqa_contracts::errors::SessionError;
use designqa_contracts::geometry::RenderedSize;
use designqa_contracts::media::MediaType;
use image::{DynamicImage, ImageFormat};
use sha2::{Digest, Sha256};

/// A file as handed over by a picker or a drop target: a name, the media
/// type it claims to be, and its bytes. Both input paths end here.
#[derive(Clone)]
pub struct ImageUpload {
    pub name: String,
    pub declared_type: String,
    pub bytes: Vec<u8>,
}

impl ImageUpload {
    pub fn new(name: impl Into<String>, declared_type: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            declared_type: declared_type.into(),
            bytes,
        }
    }

    /// Reads a file, declaring its type from the extension.
    pub fn from_path(path: &Path) -> Result<Self> {
        let bytes = fs::read(path).with_context(|| format!("failed reading {}", path.display()))?;
        let declared_type = MediaType::from_path(path)
            .map(|media| media.mime().to_string())
            .unwrap_or_else(|| "application/octet-stream".to_string());
        let name = path
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_else(|| path.to_string_lossy().to_string());
        Ok(Self::new(name, declared_type, bytes))
    }
}

impl fmt::Debug for ImageUpload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImageUpload")
            .field("name", &self.name)
            .field("declared_type", &self.declared_type)
            .field("bytes", &self.bytes.len())
            .finish()
    }
}

/// One validated image. Clones share the same bytes.
#[derive(Clone)]
pub struct ImageAsset {
    inner: Arc<AssetInner>,
}

struct AssetInner {
    name: String,
    media_type: MediaType,
    bytes: Vec<u8>,
    digest: String,
    width: u32,
    height: u32,
}

impl ImageAsset {
    /// Checks the declared type against the allowlist, then decodes the
    /// bytes as that type to learn the pixel size.
    pub fn from_upload(upload: ImageUpload) -> Result<Self, SessionError> {
        let media_type = MediaType::from_mime(&upload.declared_type).ok_or_else(|| {
            SessionError::UnsupportedMediaType {
                declared: upload.declared_type.clone(),
            }
        })?;
        let decoded = image::load_from_memory_with_format(&upload.bytes, image_format(media_type))
            .map_err(|err| SessionError::UndecodableImage {
                reason: format!("{} as {media_type}: {err}", upload.name),
            })?;
        if decoded.width() == 0 || decoded.height() == 0 {
            return Err(SessionError::UndecodableImage {
                reason: format!("{} has no pixels", upload.name),
            });
        }

        Ok(Self {
            inner: Arc::new(AssetInner {
                digest: digest_hex(&upload.bytes),
                width: decoded.width(),
                height: decoded.height(),
                name: upload.name,
                media_type,
                bytes: upload.bytes,
            }),
        })
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn media_type(&self) -> MediaType {
        self.inner.media_type
    }

    pub fn bytes(&self) -> &[u8] {
        &self.inner.bytes
    }

    pub fn byte_len(&self) -> usize {
        self.inner.bytes.len()
    }

    /// Hex SHA-256 of the uploaded bytes.
    pub fn digest(&self) -> &str {
        &self.inner.digest
    }

    pub fn width(&self) -> u32 {
        self.inner.width
    }

    pub fn height(&self) -> u32 {
        self.inner.height
    }

    pub fn size(&self) -> RenderedSize {
        RenderedSize::new(self.inner.width, self.inner.height)
    }

    pub fn preview_data_url(&self) -> String {
        format!(
            "data:{};base64,{}",
            self.inner.media_type.mime(),
            BASE64.encode(&self.inner.bytes)
        )
    }

    pub fn decode(&self) -> Result<DynamicImage> {
        image::load_from_memory_with_format(&self.inner.bytes, image_format(self.inner.media_type))
            .with_context(|| format!("failed decoding {}", self.inner.name))
    }
}

impl fmt::Debug for ImageAsset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImageAsset")
            .field("name", &self.inner.name)
            .field("media_type", &self.inner.media_type)
            .field("size", &(self.inner.width, self.inner.height))
            .field("digest", &&self.inner.digest[..12.min(self.inner.digest.len())])
            .finish()
    }
}

pub(crate) fn image_format(media_type: MediaType) -> ImageFormat {
    match media_type {
        MediaType::Png => ImageFormat::Png,
        MediaType::Jpeg => ImageFormat::Jpeg,
        MediaType::Gif => ImageFormat::Gif,
        MediaType::Webp => ImageFormat::WebP,
    }
}

pub(crate) fn digest_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}
