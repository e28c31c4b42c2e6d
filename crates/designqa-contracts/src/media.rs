use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

/// Raster formats accepted at intake. Anything else is rejected before it
/// can reach the analysis service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaType {
    Png,
    Jpeg,
    Gif,
    Webp,
}

pub const SUPPORTED_MEDIA_TYPES: &[MediaType] = &[
    MediaType::Png,
    MediaType::Jpeg,
    MediaType::Gif,
    MediaType::Webp,
];

impl MediaType {
    pub fn mime(self) -> &'static str {
        match self {
            Self::Png => "image/png",
            Self::Jpeg => "image/jpeg",
            Self::Gif => "image/gif",
            Self::Webp => "image/webp",
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            Self::Png => "png",
            Self::Jpeg => "jpg",
            Self::Gif => "gif",
            Self::Webp => "webp",
        }
    }

    /// Parses a declared MIME type such as `image/png` or
    /// `image/jpeg; charset=binary`.
    pub fn from_mime(raw: &str) -> Option<Self> {
        let essence = raw
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();
        match essence.as_str() {
            "image/png" => Some(Self::Png),
            "image/jpeg" | "image/jpg" | "image/pjpeg" => Some(Self::Jpeg),
            "image/gif" => Some(Self::Gif),
            "image/webp" => Some(Self::Webp),
            _ => None,
        }
    }

    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.trim().trim_start_matches('.').to_ascii_lowercase().as_str() {
            "png" => Some(Self::Png),
            "jpg" | "jpeg" => Some(Self::Jpeg),
            "gif" => Some(Self::Gif),
            "webp" => Some(Self::Webp),
            _ => None,
        }
    }

    pub fn from_path(path: &Path) -> Option<Self> {
        path.extension()
            .and_then(|ext| ext.to_str())
            .and_then(Self::from_extension)
    }
}

impl fmt::Display for MediaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.mime())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageSlot {
    Design,
    Live,
}

impl ImageSlot {
    pub const ALL: [ImageSlot; 2] = [ImageSlot::Design, ImageSlot::Live];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Design => "design",
            Self::Live => "live",
        }
    }

    pub fn other(self) -> Self {
        match self {
            Self::Design => Self::Live,
            Self::Live => Self::Design,
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "design" | "mockup" => Some(Self::Design),
            "live" | "screenshot" => Some(Self::Live),
            _ => None,
        }
    }
}

impl fmt::Display for ImageSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::{ImageSlot, MediaType, SUPPORTED_MEDIA_TYPES};

    #[test]
    fn allowlist_accepts_the_four_raster_types_only() {
        assert_eq!(MediaType::from_mime("image/png"), Some(MediaType::Png));
        assert_eq!(
            MediaType::from_mime(" Image/JPEG; charset=binary"),
            Some(MediaType::Jpeg)
        );
        assert_eq!(MediaType::from_mime("image/jpg"), Some(MediaType::Jpeg));
        assert_eq!(MediaType::from_mime("image/gif"), Some(MediaType::Gif));
        assert_eq!(MediaType::from_mime("image/webp"), Some(MediaType::Webp));
        assert_eq!(MediaType::from_mime("image/svg+xml"), None);
        assert_eq!(MediaType::from_mime("image/tiff"), None);
        assert_eq!(MediaType::from_mime("application/pdf"), None);
        assert_eq!(MediaType::from_mime(""), None);
        assert_eq!(SUPPORTED_MEDIA_TYPES.len(), 4);
    }

    #[test]
    fn media_type_from_path_uses_extension() {
        assert_eq!(
            MediaType::from_path(Path::new("/tmp/Mockup.PNG")),
            Some(MediaType::Png)
        );
        assert_eq!(
            MediaType::from_path(Path::new("shot.jpeg")),
            Some(MediaType::Jpeg)
        );
        assert_eq!(MediaType::from_path(Path::new("notes.txt")), None);
        assert_eq!(MediaType::from_path(Path::new("no_extension")), None);
    }

    #[test]
    fn slot_parse_and_other() {
        assert_eq!(ImageSlot::parse("Design"), Some(ImageSlot::Design));
        assert_eq!(ImageSlot::parse("screenshot"), Some(ImageSlot::Live));
        assert_eq!(ImageSlot::parse("both"), None);
        assert_eq!(ImageSlot::Design.other(), ImageSlot::Live);
        assert_eq!(ImageSlot::Live.to_string(), "live");
    }
}
