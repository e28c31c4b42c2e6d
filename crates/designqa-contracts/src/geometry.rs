//! The single mapping between normalized anchors and on-screen pixels.
//!
//! The overlay renderer and pixel-based anchor authoring both go through
//! [`Anchor::to_pixels`] and [`Anchor::from_pixels`], so a region drawn on
//! screen and the anchor it produces always agree.

use crate::errors::AnchorError;
use crate::report::Anchor;

/// Current display size of the live image, in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenderedSize {
    pub width: u32,
    pub height: u32,
}

impl RenderedSize {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelRect {
    pub left: u32,
    pub top: u32,
    pub width: u32,
    pub height: u32,
}

impl PixelRect {
    pub fn new(left: u32, top: u32, width: u32, height: u32) -> Self {
        Self {
            left,
            top,
            width,
            height,
        }
    }

    pub fn right(&self) -> u32 {
        self.left.saturating_add(self.width)
    }

    pub fn bottom(&self) -> u32 {
        self.top.saturating_add(self.height)
    }
}

fn to_px(fraction: f64, extent: u32) -> u32 {
    (fraction * f64::from(extent)).round().clamp(0.0, f64::from(extent)) as u32
}

fn to_fraction(px: u32, extent: u32) -> f64 {
    f64::from(px.min(extent)) / f64::from(extent)
}

impl Anchor {
    /// Scales the anchor to `size`. Edges are rounded independently and the
    /// result is clipped to the image, so adjacent anchors never overlap by
    /// a rounding pixel.
    pub fn to_pixels(&self, size: RenderedSize) -> PixelRect {
        let left = to_px(self.x(), size.width);
        let top = to_px(self.y(), size.height);
        let right = to_px(self.x() + self.width(), size.width);
        let bottom = to_px(self.y() + self.height(), size.height);
        PixelRect {
            left,
            top,
            width: right.saturating_sub(left),
            height: bottom.saturating_sub(top),
        }
    }

    /// Inverse of [`Anchor::to_pixels`]. The rectangle is clipped to the
    /// rendered image first; a region with no area left is refused.
    pub fn from_pixels(rect: PixelRect, size: RenderedSize) -> Result<Anchor, AnchorError> {
        if size.is_empty() {
            return Err(AnchorError::EmptyCanvas {
                width: size.width,
                height: size.height,
            });
        }
        let left = rect.left.min(size.width);
        let top = rect.top.min(size.height);
        let right = rect.right().min(size.width);
        let bottom = rect.bottom().min(size.height);
        if right <= left || bottom <= top {
            return Err(AnchorError::EmptyRegion);
        }
        let x = to_fraction(left, size.width);
        let y = to_fraction(top, size.height);
        Anchor::new(
            x,
            y,
            to_fraction(right, size.width) - x,
            to_fraction(bottom, size.height) - y,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::{PixelRect, RenderedSize};
    use crate::errors::AnchorError;
    use crate::report::Anchor;

    #[test]
    fn anchor_scales_to_rendered_size() -> anyhow::Result<()> {
        let anchor = Anchor::new(0.1, 0.2, 0.15, 0.05)?;
        assert_eq!(
            anchor.to_pixels(RenderedSize::new(1000, 2000)),
            PixelRect::new(100, 400, 150, 100)
        );
        assert_eq!(
            anchor.to_pixels(RenderedSize::new(200, 100)),
            PixelRect::new(20, 20, 30, 5)
        );
        Ok(())
    }

    #[test]
    fn overflowing_anchor_is_clipped_to_image() -> anyhow::Result<()> {
        let anchor = Anchor::new(0.9, 0.95, 0.5, 0.5)?;
        let rect = anchor.to_pixels(RenderedSize::new(100, 100));
        assert_eq!(rect, PixelRect::new(90, 95, 10, 5));
        Ok(())
    }

    #[test]
    fn authoring_and_rendering_share_the_transform() -> anyhow::Result<()> {
        let size = RenderedSize::new(1280, 800);
        let drawn = PixelRect::new(64, 200, 320, 40);
        let anchor = Anchor::from_pixels(drawn, size)?;
        assert_eq!(anchor.to_pixels(size), drawn);

        // Same anchor on a half-size preview lands on the scaled region.
        let half = anchor.to_pixels(RenderedSize::new(640, 400));
        assert_eq!(half, PixelRect::new(32, 100, 160, 20));
        Ok(())
    }

    #[test]
    fn authoring_clips_and_refuses_empty_regions() -> anyhow::Result<()> {
        let size = RenderedSize::new(100, 50);
        let anchor = Anchor::from_pixels(PixelRect::new(80, 40, 100, 100), size)?;
        assert_eq!(anchor.to_pixels(size), PixelRect::new(80, 40, 20, 10));

        assert_eq!(
            Anchor::from_pixels(PixelRect::new(10, 10, 0, 5), size),
            Err(AnchorError::EmptyRegion)
        );
        assert_eq!(
            Anchor::from_pixels(PixelRect::new(120, 10, 5, 5), size),
            Err(AnchorError::EmptyRegion)
        );
        assert_eq!(
            Anchor::from_pixels(PixelRect::new(0, 0, 5, 5), RenderedSize::new(0, 10)),
            Err(AnchorError::EmptyCanvas {
                width: 0,
                height: 10
            })
        );
        Ok(())
    }
}
