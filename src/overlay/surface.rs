use anyhow::{Context, Result};
use image::{Rgba, RgbaImage};
use std::path::Path;

use super::glyphs::{glyph, text_width, GLYPH_ASCENT, GLYPH_HEIGHT, GLYPH_WIDTH};

/// Axis-aligned rectangle in surface pixels, top-left anchored.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Rect {
    pub x: f32,
    pub y: f32,
    pub w: f32,
    pub h: f32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl Color {
    pub const fn rgb(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b, a: 255 }
    }

    /// Same color with opacity `alpha` (0.0-1.0).
    pub fn with_alpha(self, alpha: f32) -> Self {
        Self {
            a: (alpha.clamp(0.0, 1.0) * 255.0).round() as u8,
            ..self
        }
    }
}

/// Drawing target for the overlay, modelled on a 2D canvas context.
pub trait Surface {
    /// Resize the drawing area. Contents after a resize are unspecified until `clear`.
    fn resize(&mut self, width: u32, height: u32);

    fn size(&self) -> (u32, u32);

    /// Reset every pixel to fully transparent.
    fn clear(&mut self);

    /// Stroke the outline of `rect`, centered on its edges.
    fn stroke_rect(&mut self, rect: Rect, color: Color, line_width: f32);

    fn fill_rect(&mut self, rect: Rect, color: Color);

    /// Draw `text` with its left edge at `x` and baseline at `baseline`.
    fn fill_text(&mut self, text: &str, x: f32, baseline: f32, color: Color);

    fn measure_text(&self, text: &str) -> f32;
}

/// In-memory RGBA surface.
///
/// Counts draw calls (stroke, fill, text) since the last `clear`.
#[derive(Clone, Debug)]
pub struct RasterSurface {
    image: RgbaImage,
    draw_calls: usize,
}

impl RasterSurface {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            image: RgbaImage::new(width, height),
            draw_calls: 0,
        }
    }

    pub fn image(&self) -> &RgbaImage {
        &self.image
    }

    pub fn into_image(self) -> RgbaImage {
        self.image
    }

    pub fn draw_calls(&self) -> usize {
        self.draw_calls
    }

    pub fn save_png(&self, path: &Path) -> Result<()> {
        self.image
            .save_with_format(path, image::ImageFormat::Png)
            .with_context(|| format!("write overlay {}", path.display()))
    }

    fn blend(&mut self, x: u32, y: u32, color: Color) {
        if color.a == 0 {
            return;
        }
        let dst = self.image.get_pixel_mut(x, y);
        if color.a == 255 {
            *dst = Rgba([color.r, color.g, color.b, 255]);
            return;
        }
        // Source-over compositing.
        let d = *dst;
        let sa = color.a as f32 / 255.0;
        let da = d[3] as f32 / 255.0;
        let out_a = sa + da * (1.0 - sa);
        let mix = |s: u8, d: u8| -> u8 {
            ((s as f32 * sa + d as f32 * da * (1.0 - sa)) / out_a)
                .round()
                .clamp(0.0, 255.0) as u8
        };
        *dst = Rgba([
            mix(color.r, d[0]),
            mix(color.g, d[1]),
            mix(color.b, d[2]),
            (out_a * 255.0).round() as u8,
        ]);
    }
}

impl Default for RasterSurface {
    fn default() -> Self {
        Self::new(0, 0)
    }
}

impl Surface for RasterSurface {
    fn resize(&mut self, width: u32, height: u32) {
        if self.image.dimensions() != (width, height) {
            self.image = RgbaImage::new(width, height);
        }
    }

    fn size(&self) -> (u32, u32) {
        self.image.dimensions()
    }

    fn clear(&mut self) {
        for pixel in self.image.pixels_mut() {
            *pixel = Rgba([0, 0, 0, 0]);
        }
        self.draw_calls = 0;
    }

    fn stroke_rect(&mut self, rect: Rect, color: Color, line_width: f32) {
        self.draw_calls += 1;
        let (width, height) = self.image.dimensions();
        let half = line_width.max(0.0) / 2.0;
        let Some((ox0, ox1)) = span(rect.x - half, rect.x + rect.w + half, width) else {
            return;
        };
        let Some((oy0, oy1)) = span(rect.y - half, rect.y + rect.h + half, height) else {
            return;
        };
        let inner_x = span(rect.x + half, rect.x + rect.w - half, width);
        let inner_y = span(rect.y + half, rect.y + rect.h - half, height);
        for y in oy0..oy1 {
            for x in ox0..ox1 {
                let inside = match (inner_x, inner_y) {
                    (Some((ix0, ix1)), Some((iy0, iy1))) => {
                        (ix0..ix1).contains(&x) && (iy0..iy1).contains(&y)
                    }
                    _ => false,
                };
                if !inside {
                    self.blend(x, y, color);
                }
            }
        }
    }

    fn fill_rect(&mut self, rect: Rect, color: Color) {
        self.draw_calls += 1;
        let (width, height) = self.image.dimensions();
        let Some((x0, x1)) = span(rect.x, rect.x + rect.w, width) else {
            return;
        };
        let Some((y0, y1)) = span(rect.y, rect.y + rect.h, height) else {
            return;
        };
        for y in y0..y1 {
            for x in x0..x1 {
                self.blend(x, y, color);
            }
        }
    }

    fn fill_text(&mut self, text: &str, x: f32, baseline: f32, color: Color) {
        self.draw_calls += 1;
        if !x.is_finite() || !baseline.is_finite() {
            return;
        }
        let (width, height) = self.image.dimensions();
        let left = x.round() as i64;
        let top = baseline.round() as i64 - GLYPH_ASCENT as i64;
        for (i, ch) in text.chars().enumerate() {
            let pattern = glyph(ch);
            let cell_x = left + (i as i64) * GLYPH_WIDTH as i64;
            if cell_x >= width as i64 {
                break;
            }
            for row in 0..GLYPH_HEIGHT as i64 {
                let py = top + row;
                if py < 0 || py >= height as i64 {
                    continue;
                }
                let bits = pattern[row as usize];
                for col in 0..GLYPH_WIDTH as i64 {
                    let px = cell_x + col;
                    if px < 0 || px >= width as i64 {
                        continue;
                    }
                    if (bits >> (7 - col)) & 1 == 1 {
                        self.blend(px as u32, py as u32, color);
                    }
                }
            }
        }
    }

    fn measure_text(&self, text: &str) -> f32 {
        text_width(text) as f32
    }
}

/// Half-open pixel range covering `start..end`, clipped to `0..limit`.
fn span(start: f32, end: f32, limit: u32) -> Option<(u32, u32)> {
    if !start.is_finite() || !end.is_finite() {
        return None;
    }
    let (lo, hi) = if start <= end {
        (start, end)
    } else {
        (end, start)
    };
    let lo = lo.round().max(0.0);
    let hi = hi.round().min(limit as f32);
    if hi <= lo {
        None
    } else {
        Some((lo as u32, hi as u32))
    }
}
