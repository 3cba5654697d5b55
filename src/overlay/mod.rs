//! Client-side bounding-box overlay.
//!
//! Predictions arrive in source-image pixels. The overlay is drawn on a surface
//! sized to the image as displayed, so every box is scaled by
//! `displayed / natural` per axis and converted from center form to a top-left
//! rectangle. The surface is cleared on every redraw; nothing accumulates.

mod glyphs;
mod surface;

pub use glyphs::{text_width, GLYPH_ASCENT, GLYPH_HEIGHT, GLYPH_WIDTH};
pub use surface::{Color, RasterSurface, Rect, Surface};

use crate::prediction::Prediction;

/// Class colors, assigned in first-seen order and cycled.
pub const PALETTE: [Color; 7] = [
    Color::rgb(0x22, 0xc5, 0x5e),
    Color::rgb(0x3b, 0x82, 0xf6),
    Color::rgb(0xf5, 0x9e, 0x0b),
    Color::rgb(0xef, 0x44, 0x44),
    Color::rgb(0xa8, 0x55, 0xf7),
    Color::rgb(0x14, 0xb8, 0xa6),
    Color::rgb(0xea, 0xb3, 0x08),
];

pub const BOX_LINE_WIDTH: f32 = 2.0;
pub const LABEL_HEIGHT: f32 = 18.0;
pub const LABEL_PADDING: f32 = 4.0;
pub const LABEL_BACKGROUND_ALPHA: f32 = 0.18;
pub const LABEL_TEXT_COLOR: Color = Color::rgb(0x0a, 0x0a, 0x0a);
/// Smallest baseline that keeps a label's glyphs on the surface.
const LABEL_MIN_BASELINE: f32 = 12.0;
const LABEL_BASELINE_OFFSET: f32 = 4.0;

/// Geometry of the displayed image.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ImageLayout {
    pub displayed_width: f32,
    pub displayed_height: f32,
    pub natural_width: u32,
    pub natural_height: u32,
}

impl ImageLayout {
    pub fn new(
        displayed_width: f32,
        displayed_height: f32,
        natural_width: u32,
        natural_height: u32,
    ) -> Self {
        Self {
            displayed_width,
            displayed_height,
            natural_width,
            natural_height,
        }
    }

    /// Image shown at its natural size.
    pub fn natural(width: u32, height: u32) -> Self {
        Self::new(width as f32, height as f32, width, height)
    }

    /// Image scaled down (never up) to fit a `max_width` x `max_height` box,
    /// aspect ratio preserved.
    pub fn fit_within(natural_width: u32, natural_height: u32, max_width: f32, max_height: f32) -> Self {
        if natural_width == 0 || natural_height == 0 {
            return Self::new(0.0, 0.0, natural_width, natural_height);
        }
        let scale = (max_width / natural_width as f32)
            .min(max_height / natural_height as f32)
            .min(1.0)
            .max(0.0);
        Self::new(
            natural_width as f32 * scale,
            natural_height as f32 * scale,
            natural_width,
            natural_height,
        )
    }

    /// False until the image has a non-zero displayed size.
    pub fn is_laid_out(&self) -> bool {
        self.displayed_width.is_finite()
            && self.displayed_height.is_finite()
            && self.displayed_width > 0.0
            && self.displayed_height > 0.0
    }

    /// Per-axis `displayed / natural`. Missing natural dimensions fall back to
    /// the displayed ones (scale 1).
    pub fn scale(&self) -> (f32, f32) {
        let natural_w = if self.natural_width == 0 {
            self.displayed_width
        } else {
            self.natural_width as f32
        };
        let natural_h = if self.natural_height == 0 {
            self.displayed_height
        } else {
            self.natural_height as f32
        };
        (
            self.displayed_width / natural_w,
            self.displayed_height / natural_h,
        )
    }

    pub fn surface_size(&self) -> (u32, u32) {
        (
            self.displayed_width.floor() as u32,
            self.displayed_height.floor() as u32,
        )
    }
}

/// Map a center-form prediction to a top-left display rectangle.
pub fn project(prediction: &Prediction, scale_x: f32, scale_y: f32) -> Rect {
    Rect {
        x: (prediction.center_x - prediction.width / 2.0) * scale_x,
        y: (prediction.center_y - prediction.height / 2.0) * scale_y,
        w: prediction.width * scale_x,
        h: prediction.height * scale_y,
    }
}

/// Stable class to color mapping.
///
/// Built from the unfiltered predictions so a class keeps its color while the
/// threshold moves.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ClassPalette {
    classes: Vec<String>,
}

impl ClassPalette {
    pub fn from_predictions(predictions: &[Prediction]) -> Self {
        let mut classes: Vec<String> = Vec::new();
        for prediction in predictions {
            if !classes.iter().any(|c| c == &prediction.class_name) {
                classes.push(prediction.class_name.clone());
            }
        }
        Self { classes }
    }

    pub fn color_for(&self, class_name: &str) -> Color {
        let index = self
            .classes
            .iter()
            .position(|c| c == class_name)
            .unwrap_or(self.classes.len());
        PALETTE[index % PALETTE.len()]
    }
}

/// What a redraw did.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RenderOutcome {
    /// Image not laid out yet; surface untouched.
    NotLaidOut,
    /// Server-rendered image shown instead; surface cleared.
    Suppressed,
    /// No active predictions; surface cleared.
    Empty,
    /// Number of boxes drawn.
    Drawn(usize),
}

/// Redraw the overlay for `active` on `surface`.
///
/// Idempotent: the surface is resized and fully cleared before drawing.
pub fn render<S: Surface + ?Sized>(
    surface: &mut S,
    layout: &ImageLayout,
    active: &[Prediction],
    palette: &ClassPalette,
    annotated_present: bool,
) -> RenderOutcome {
    if !layout.is_laid_out() {
        return RenderOutcome::NotLaidOut;
    }
    let (width, height) = layout.surface_size();
    surface.resize(width, height);
    surface.clear();
    if annotated_present {
        return RenderOutcome::Suppressed;
    }
    if active.is_empty() {
        return RenderOutcome::Empty;
    }

    let (scale_x, scale_y) = layout.scale();
    for prediction in active {
        let rect = project(prediction, scale_x, scale_y);
        let color = palette.color_for(&prediction.class_name);
        surface.stroke_rect(rect, color, BOX_LINE_WIDTH);

        let label = prediction.label();
        let label_width = surface.measure_text(&label) + LABEL_PADDING * 2.0;
        surface.fill_rect(
            Rect {
                x: rect.x,
                y: (rect.y - LABEL_HEIGHT).max(0.0),
                w: label_width,
                h: LABEL_HEIGHT,
            },
            color.with_alpha(LABEL_BACKGROUND_ALPHA),
        );
        surface.fill_text(
            &label,
            rect.x + LABEL_PADDING,
            (rect.y - LABEL_BASELINE_OFFSET).max(LABEL_MIN_BASELINE),
            LABEL_TEXT_COLOR,
        );
    }
    log::debug!(
        "overlay drew {} boxes on {}x{} surface",
        active.len(),
        width,
        height
    );
    RenderOutcome::Drawn(active.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hold(class: &str, confidence: f32, cx: f32, cy: f32, w: f32, h: f32) -> Prediction {
        Prediction::new(class, confidence, cx, cy, w, h).expect("valid prediction")
    }

    /// Records every call instead of rasterizing.
    #[derive(Default)]
    struct RecordingSurface {
        size: (u32, u32),
        clears: usize,
        strokes: Vec<(Rect, Color)>,
        fills: Vec<(Rect, Color)>,
        texts: Vec<(String, f32, f32)>,
    }

    impl Surface for RecordingSurface {
        fn resize(&mut self, width: u32, height: u32) {
            self.size = (width, height);
        }
        fn size(&self) -> (u32, u32) {
            self.size
        }
        fn clear(&mut self) {
            self.clears += 1;
            self.strokes.clear();
            self.fills.clear();
            self.texts.clear();
        }
        fn stroke_rect(&mut self, rect: Rect, color: Color, _line_width: f32) {
            self.strokes.push((rect, color));
        }
        fn fill_rect(&mut self, rect: Rect, color: Color) {
            self.fills.push((rect, color));
        }
        fn fill_text(&mut self, text: &str, x: f32, baseline: f32, _color: Color) {
            self.texts.push((text.to_string(), x, baseline));
        }
        fn measure_text(&self, text: &str) -> f32 {
            text_width(text) as f32
        }
    }

    #[test]
    fn projects_center_boxes_into_display_space() {
        let layout = ImageLayout::new(400.0, 100.0, 200, 100);
        let (sx, sy) = layout.scale();
        let rect = project(&hold("hold", 0.9, 100.0, 50.0, 40.0, 20.0), sx, sy);
        assert_eq!(
            rect,
            Rect {
                x: 160.0,
                y: 40.0,
                w: 80.0,
                h: 20.0
            }
        );
    }

    #[test]
    fn zero_natural_size_falls_back_to_displayed() {
        let layout = ImageLayout::new(320.0, 240.0, 0, 0);
        assert_eq!(layout.scale(), (1.0, 1.0));
    }

    #[test]
    fn fit_within_never_upscales() {
        let layout = ImageLayout::fit_within(720, 1280, 360.0, 2000.0);
        assert_eq!(layout.surface_size(), (360, 640));
        let small = ImageLayout::fit_within(100, 50, 1000.0, 1000.0);
        assert_eq!(small.surface_size(), (100, 50));
    }

    #[test]
    fn palette_assigns_first_seen_and_cycles() {
        let classes = [
            "hold", "volume", "crimp", "jug", "sloper", "pinch", "pocket", "edge",
        ];
        let predictions: Vec<_> = classes
            .iter()
            .map(|c| hold(c, 0.5, 10.0, 10.0, 4.0, 4.0))
            .collect();
        let palette = ClassPalette::from_predictions(&predictions);
        assert_eq!(palette.color_for("hold"), PALETTE[0]);
        assert_eq!(palette.color_for("volume"), PALETTE[1]);
        assert_eq!(palette.color_for("edge"), PALETTE[0]);
    }

    #[test]
    fn labels_are_clamped_to_the_top_edge() {
        let mut surface = RecordingSurface::default();
        let active = vec![hold("hold", 0.874, 20.0, 5.0, 10.0, 10.0)];
        let palette = ClassPalette::from_predictions(&active);
        let outcome = render(
            &mut surface,
            &ImageLayout::natural(100, 100),
            &active,
            &palette,
            false,
        );
        assert_eq!(outcome, RenderOutcome::Drawn(1));
        assert_eq!(surface.fills[0].0.y, 0.0);
        assert_eq!(surface.fills[0].0.w, text_width("hold 87%") as f32 + 8.0);
        assert_eq!(surface.fills[0].1.a, 46);
        assert_eq!(surface.texts[0], ("hold 87%".to_string(), 19.0, 12.0));
    }

    #[test]
    fn annotated_image_suppresses_drawing_but_still_clears() {
        let mut surface = RecordingSurface::default();
        let active = vec![hold("hold", 0.9, 50.0, 50.0, 10.0, 10.0)];
        let palette = ClassPalette::from_predictions(&active);
        let outcome = render(
            &mut surface,
            &ImageLayout::natural(100, 100),
            &active,
            &palette,
            true,
        );
        assert_eq!(outcome, RenderOutcome::Suppressed);
        assert_eq!(surface.clears, 1);
        assert!(surface.strokes.is_empty());
    }

    #[test]
    fn unlaid_image_is_a_no_op() {
        let mut surface = RecordingSurface::default();
        let active = vec![hold("hold", 0.9, 50.0, 50.0, 10.0, 10.0)];
        let outcome = render(
            &mut surface,
            &ImageLayout::new(0.0, 240.0, 640, 480),
            &active,
            &ClassPalette::default(),
            false,
        );
        assert_eq!(outcome, RenderOutcome::NotLaidOut);
        assert_eq!(surface.clears, 0);
    }

    #[test]
    fn rendering_twice_yields_identical_pixels() {
        let active = vec![
            hold("hold", 0.9, 100.0, 50.0, 40.0, 20.0),
            hold("volume", 0.6, 30.0, 80.0, 20.0, 20.0),
        ];
        let palette = ClassPalette::from_predictions(&active);
        let layout = ImageLayout::new(400.0, 100.0, 200, 100);
        let mut surface = RasterSurface::default();
        render(&mut surface, &layout, &active, &palette, false);
        let first = surface.image().clone();
        render(&mut surface, &layout, &active, &palette, false);
        assert_eq!(surface.image(), &first);
        assert_eq!(surface.draw_calls(), 6);
    }
}
