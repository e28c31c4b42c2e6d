use std::fmt::Write as _;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use designqa_contracts::geometry::{PixelRect, RenderedSize};
use designqa_contracts::report::Report;
use image::imageops::{self, FilterType};
use image::{ImageFormat, Rgba, RgbaImage};

use crate::intake::ImageAsset;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OverlayStyle {
    pub fill: [u8; 4],
    pub stroke: [u8; 4],
    pub stroke_width: u32,
    pub badge: [u8; 4],
    pub badge_text: [u8; 4],
    pub badge_scale: u32,
}

impl Default for OverlayStyle {
    fn default() -> Self {
        Self {
            fill: [230, 40, 60, 64],
            stroke: [230, 40, 60, 255],
            stroke_width: 2,
            badge: [230, 40, 60, 255],
            badge_text: [255, 255, 255, 255],
            badge_scale: 2,
        }
    }
}

// 3x5 bitmaps, one row per entry, high bit on the left.
const DIGITS: [[u8; 5]; 10] = [
    [0b111, 0b101, 0b101, 0b101, 0b111],
    [0b010, 0b110, 0b010, 0b010, 0b111],
    [0b111, 0b001, 0b111, 0b100, 0b111],
    [0b111, 0b001, 0b111, 0b001, 0b111],
    [0b101, 0b101, 0b111, 0b001, 0b001],
    [0b111, 0b100, 0b111, 0b001, 0b111],
    [0b111, 0b100, 0b111, 0b101, 0b111],
    [0b111, 0b001, 0b001, 0b001, 0b001],
    [0b111, 0b101, 0b111, 0b101, 0b111],
    [0b111, 0b101, 0b111, 0b001, 0b111],
];
const GLYPH_WIDTH: u32 = 3;
const GLYPH_HEIGHT: u32 = 5;

/// Draws every specific issue onto the live screenshot as a tinted, outlined
/// region with its one-based number. `rendered` rescales the screenshot
/// first; anchors are placed against whatever size is drawn.
pub fn render_overlay(
    live: &ImageAsset,
    report: &Report,
    style: &OverlayStyle,
    rendered: Option<RenderedSize>,
) -> Result<RgbaImage> {
    let mut canvas = live.decode()?.to_rgba8();
    if let Some(size) = rendered.filter(|size| !size.is_empty() && *size != live.size()) {
        canvas = imageops::resize(&canvas, size.width, size.height, FilterType::Triangle);
    }
    let size = RenderedSize::new(canvas.width(), canvas.height());

    for (index, issue) in report.specific_issues.iter().enumerate() {
        let rect = issue.anchor.to_pixels(size);
        if rect.width == 0 || rect.height == 0 {
            continue;
        }
        fill_rect(&mut canvas, rect, style.fill);
        stroke_rect(&mut canvas, rect, style.stroke, style.stroke_width.max(1));
        draw_badge(&mut canvas, rect.left, rect.top, index + 1, style);
    }
    Ok(canvas)
}

pub fn save_overlay(image: &RgbaImage, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed creating {}", parent.display()))?;
    }
    image
        .save_with_format(path, ImageFormat::Png)
        .with_context(|| format!("failed writing overlay {}", path.display()))
}

/// Plain-text rendering of a report, with specific issues located on the
/// live screenshot at its natural size.
pub fn render_text(report: &Report, design: &ImageAsset, live: &ImageAsset) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Design QA report");
    let _ = writeln!(out, "Score: {}/100", report.score);
    let _ = writeln!(
        out,
        "Design: {} ({}x{})",
        design.name(),
        design.width(),
        design.height()
    );
    let _ = writeln!(
        out,
        "Live: {} ({}x{})",
        live.name(),
        live.width(),
        live.height()
    );

    let _ = writeln!(out);
    let _ = writeln!(out, "General issues ({}):", report.general_issues.len());
    if report.general_issues.is_empty() {
        let _ = writeln!(out, "  none");
    }
    for (index, issue) in report.general_issues.iter().enumerate() {
        let _ = writeln!(out, "  {}. {issue}", index + 1);
    }

    let _ = writeln!(out);
    let _ = writeln!(out, "Specific issues ({}):", report.specific_issues.len());
    if report.specific_issues.is_empty() {
        let _ = writeln!(out, "  none");
    }
    for (index, issue) in report.specific_issues.iter().enumerate() {
        let anchor = issue.anchor;
        let rect = anchor.to_pixels(live.size());
        let _ = writeln!(out, "  {}. {}", index + 1, issue.description);
        let _ = writeln!(
            out,
            "     region x={} y={} w={} h={} ({:.1}%, {:.1}%, {:.1}% x {:.1}%)",
            rect.left,
            rect.top,
            rect.width,
            rect.height,
            anchor.x() * 100.0,
            anchor.y() * 100.0,
            anchor.width() * 100.0,
            anchor.height() * 100.0
        );
    }
    out
}

fn blend(canvas: &mut RgbaImage, x: u32, y: u32, color: [u8; 4]) {
    if x >= canvas.width() || y >= canvas.height() {
        return;
    }
    let alpha = u32::from(color[3]);
    let pixel = canvas.get_pixel_mut(x, y);
    let mix = |src: u8, dst: u8| -> u8 {
        ((u32::from(src) * alpha + u32::from(dst) * (255 - alpha)) / 255) as u8
    };
    let out_alpha = alpha + u32::from(pixel[3]) * (255 - alpha) / 255;
    *pixel = Rgba([
        mix(color[0], pixel[0]),
        mix(color[1], pixel[1]),
        mix(color[2], pixel[2]),
        out_alpha.min(255) as u8,
    ]);
}

fn fill_rect(canvas: &mut RgbaImage, rect: PixelRect, color: [u8; 4]) {
    for y in rect.top..rect.bottom() {
        for x in rect.left..rect.right() {
            blend(canvas, x, y, color);
        }
    }
}

fn stroke_rect(canvas: &mut RgbaImage, rect: PixelRect, color: [u8; 4], width: u32) {
    let width = width.min(rect.width).min(rect.height);
    for y in rect.top..rect.bottom() {
        for x in rect.left..rect.right() {
            let on_edge = x < rect.left + width
                || x >= rect.right().saturating_sub(width)
                || y < rect.top + width
                || y >= rect.bottom().saturating_sub(width);
            if on_edge {
                blend(canvas, x, y, color);
            }
        }
    }
}

fn draw_badge(canvas: &mut RgbaImage, left: u32, top: u32, number: usize, style: &OverlayStyle) {
    let scale = style.badge_scale.max(1);
    let digits: Vec<usize> = number
        .to_string()
        .bytes()
        .map(|digit| usize::from(digit - b'0'))
        .collect();
    let count = digits.len() as u32;
    let pad = scale;
    let badge_width = pad * 2 + count * GLYPH_WIDTH * scale + count.saturating_sub(1) * scale;
    let badge_height = pad * 2 + GLYPH_HEIGHT * scale;
    let x0 = left.min(canvas.width().saturating_sub(badge_width));
    let y0 = top.min(canvas.height().saturating_sub(badge_height));

    fill_rect(
        canvas,
        PixelRect::new(x0, y0, badge_width, badge_height),
        style.badge,
    );
    for (slot, digit) in digits.iter().enumerate() {
        let glyph_left = x0 + pad + slot as u32 * (GLYPH_WIDTH + 1) * scale;
        for (row, bits) in DIGITS[*digit].iter().enumerate() {
            for col in 0..GLYPH_WIDTH {
                if bits & (0b100 >> col) == 0 {
                    continue;
                }
                let px = glyph_left + col * scale;
                let py = y0 + pad + row as u32 * scale;
                fill_rect(canvas, PixelRect::new(px, py, scale, scale), style.badge_text);
            }
        }
    }
}
