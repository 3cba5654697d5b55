//! Overlay rendering on the raster surface.

use climblog_capture::overlay::{
    render, ClassPalette, ImageLayout, RasterSurface, RenderOutcome, Surface, PALETTE,
};
use climblog_capture::prediction::Prediction;
use image::Rgba;

fn pred(class: &str, confidence: f32, cx: f32, cy: f32, w: f32, h: f32) -> Prediction {
    Prediction::new(class, confidence, cx, cy, w, h).expect("valid prediction")
}

fn rgba(color: climblog_capture::overlay::Color) -> Rgba<u8> {
    Rgba([color.r, color.g, color.b, color.a])
}

#[test]
fn boxes_land_at_scaled_display_coordinates() {
    // Natural 200x100 shown at 400x100: scale 2x horizontally.
    let active = vec![pred("hold", 0.9, 100.0, 50.0, 40.0, 20.0)];
    let palette = ClassPalette::from_predictions(&active);
    let mut surface = RasterSurface::default();
    let outcome = render(
        &mut surface,
        &ImageLayout::new(400.0, 100.0, 200, 100),
        &active,
        &palette,
        false,
    );

    assert_eq!(outcome, RenderOutcome::Drawn(1));
    assert_eq!(surface.size(), (400, 100));
    let image = surface.image();
    // Left and right edges of the 160,40 80x20 box.
    assert_eq!(image.get_pixel(160, 50), &rgba(PALETTE[0]));
    assert_eq!(image.get_pixel(239, 50), &rgba(PALETTE[0]));
    // Interior stays clear.
    assert_eq!(image.get_pixel(200, 50), &Rgba([0, 0, 0, 0]));
    // Label background sits directly above the box.
    assert_eq!(image.get_pixel(230, 25)[3], 46);
}

#[test]
fn fractional_display_sizes_floor_the_surface() {
    let active = vec![pred("hold", 0.5, 10.0, 10.0, 4.0, 4.0)];
    let mut surface = RasterSurface::default();
    render(
        &mut surface,
        &ImageLayout::new(320.7, 180.2, 1280, 720),
        &active,
        &ClassPalette::from_predictions(&active),
        false,
    );
    assert_eq!(surface.size(), (320, 180));
}

#[test]
fn classes_keep_colors_when_filtered_out() {
    let raw = vec![
        pred("volume", 0.2, 20.0, 20.0, 10.0, 10.0),
        pred("hold", 0.9, 60.0, 60.0, 10.0, 10.0),
    ];
    let palette = ClassPalette::from_predictions(&raw);
    let active = climblog_capture::filter::filter(&raw, 0.35);
    let mut surface = RasterSurface::default();
    render(
        &mut surface,
        &ImageLayout::natural(100, 100),
        &active,
        &palette,
        false,
    );
    // "hold" was second in the raw list.
    assert_eq!(surface.image().get_pixel(55, 60), &rgba(PALETTE[1]));
}

#[test]
fn clearing_removes_boxes_when_predictions_go_away() {
    let active = vec![pred("hold", 0.9, 50.0, 50.0, 20.0, 20.0)];
    let palette = ClassPalette::from_predictions(&active);
    let layout = ImageLayout::natural(100, 100);
    let mut surface = RasterSurface::default();
    render(&mut surface, &layout, &active, &palette, false);
    assert!(surface.image().pixels().any(|p| p[3] > 0));

    assert_eq!(
        render(&mut surface, &layout, &[], &palette, false),
        RenderOutcome::Empty
    );
    assert_eq!(surface.draw_calls(), 0);
    assert!(surface.image().pixels().all(|p| p[3] == 0));
}

#[test]
fn overlay_exports_png() {
    let dir = tempfile::TempDir::new().expect("temp dir");
    let path = dir.path().join("overlay.png");
    let active = vec![pred("hold", 0.9, 50.0, 50.0, 20.0, 20.0)];
    let mut surface = RasterSurface::default();
    render(
        &mut surface,
        &ImageLayout::natural(100, 80),
        &active,
        &ClassPalette::from_predictions(&active),
        false,
    );
    surface.save_png(&path).expect("save png");
    let reloaded = image::open(&path).expect("reopen").to_rgba8();
    assert_eq!(reloaded.dimensions(), (100, 80));
    assert_eq!(&reloaded, surface.image());
}
