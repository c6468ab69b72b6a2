//! Plot rasterisation
//!
//! Renders a [`VswrPlot`] to an RGBA image: verdict-shaded background, grid,
//! the VSWR curve, a dashed limit line and dashed window markers. The title
//! sits in the top margin and the capture time in the bottom margin.

use super::glyphs::{glyph, text_width, ADVANCE, GLYPH_HEIGHT, GLYPH_WIDTH};
use super::VswrPlot;
use crate::core::vswr::Verdict;
use image::{Rgba, RgbaImage};

/// Colours and geometry
#[derive(Debug, Clone, PartialEq)]
pub struct PlotStyle {
    /// Image width in pixels
    pub width: u32,
    /// Image height in pixels
    pub height: u32,
    /// Margin in pixels
    pub margin: u32,
    /// Background for a passing unit
    pub pass_background: [u8; 4],
    /// Background for a failing unit
    pub fail_background: [u8; 4],
    /// Grid lines
    pub grid: [u8; 4],
    /// Axes
    pub axis: [u8; 4],
    /// VSWR curve
    pub curve: [u8; 4],
    /// Limit line
    pub limit: [u8; 4],
    /// Window start/stop markers
    pub window: [u8; 4],
    /// Title and timestamp text
    pub text: [u8; 4],
    /// Title magnification; the timestamp uses one step less
    pub title_scale: u32,
    /// Dash length in pixels
    pub dash: u32,
}

impl Default for PlotStyle {
    fn default() -> Self {
        Self {
            width: 1000,
            height: 600,
            margin: 50,
            pass_background: [0x90, 0xEE, 0x90, 0xFF],
            fail_background: [0xFF, 0xE4, 0xE1, 0xFF],
            grid: [0xC8, 0xC8, 0xC8, 0xFF],
            axis: [0x33, 0x33, 0x33, 0xFF],
            curve: [0x00, 0x00, 0xFF, 0xFF],
            limit: [0xFF, 0x00, 0x00, 0xFF],
            window: [0x00, 0x80, 0x00, 0xFF],
            text: [0x00, 0x00, 0x00, 0xFF],
            title_scale: 3,
            dash: 8,
        }
    }
}

/// Renders plots to RGBA images
#[derive(Debug, Clone, Default)]
pub struct PngRenderer {
    style: PlotStyle,
}

impl PngRenderer {
    /// Renderer with a custom style
    pub fn new(style: PlotStyle) -> Self {
        Self { style }
    }

    /// Style in use
    pub fn style(&self) -> &PlotStyle {
        &self.style
    }

    /// Rasterise `plot`; `None` if it has no samples
    pub fn render(&self, plot: &VswrPlot) -> Option<RgbaImage> {
        let (x_min, x_max) = plot.x_range()?;
        let style = &self.style;
        let background = match plot.verdict {
            Verdict::Pass => style.pass_background,
            Verdict::Fail | Verdict::EmptyWindow => style.fail_background,
        };
        let mut image = RgbaImage::from_pixel(style.width, style.height, Rgba(background));

        let canvas = Canvas {
            width: style.width as i32,
            height: style.height as i32,
            margin: style.margin as i32,
            x_range: (f64::from(x_min), f64::from(x_max.max(x_min + 1))),
            y_range: (1.0, plot.y_max()),
        };

        // Grid, then axes on top of it
        for i in 0..=10 {
            let x = canvas.margin + i * canvas.plot_width() / 10;
            draw_line(&mut image, (x, canvas.margin), (x, canvas.height - canvas.margin), style.grid, None);
            let y = canvas.margin + i * canvas.plot_height() / 10;
            draw_line(&mut image, (canvas.margin, y), (canvas.width - canvas.margin, y), style.grid, None);
        }
        let bottom = canvas.height - canvas.margin;
        draw_line(&mut image, (canvas.margin, bottom), (canvas.width - canvas.margin, bottom), style.axis, None);
        draw_line(&mut image, (canvas.margin, canvas.margin), (canvas.margin, bottom), style.axis, None);

        for marker in [plot.window.start_khz, plot.window.stop_khz] {
            let x = canvas.px(f64::from(marker));
            draw_line(&mut image, (x, canvas.margin), (x, bottom), style.window, Some(style.dash));
        }
        if plot.vswr_max.is_finite() {
            let y = canvas.py(plot.vswr_max);
            draw_line(&mut image, (canvas.margin, y), (canvas.width - canvas.margin, y), style.limit, Some(style.dash));
        }

        let points: Vec<(i32, i32)> = plot
            .curve
            .iter()
            .map(|(f, v)| (canvas.px(f64::from(*f)), canvas.py(*v)))
            .collect();
        if let [only] = points.as_slice() {
            set_pixel(&mut image, only.0, only.1, style.curve);
        }
        for pair in points.windows(2) {
            draw_line(&mut image, pair[0], pair[1], style.curve, None);
        }

        let title_scale = style.title_scale.max(1);
        draw_text_centred(&mut image, &plot.title, 0, style.margin, title_scale, style.text);
        let stamp = plot.captured_at.format("%Y-%m-%d %H:%M:%S").to_string();
        let stamp_scale = (title_scale - 1).max(1);
        draw_text_centred(&mut image, &stamp, style.height - style.margin, style.margin, stamp_scale, style.text);

        Some(image)
    }
}

/// Data-to-pixel mapping
struct Canvas {
    width: i32,
    height: i32,
    margin: i32,
    x_range: (f64, f64),
    y_range: (f64, f64),
}

impl Canvas {
    fn plot_width(&self) -> i32 {
        self.width - 2 * self.margin
    }

    fn plot_height(&self) -> i32 {
        self.height - 2 * self.margin
    }

    fn px(&self, x: f64) -> i32 {
        let t = (x - self.x_range.0) / (self.x_range.1 - self.x_range.0);
        self.margin + (t * f64::from(self.plot_width())) as i32
    }

    fn py(&self, y: f64) -> i32 {
        // Values off the axis are pinned to its edges.
        let y = if y.is_nan() { self.y_range.1 } else { y.clamp(self.y_range.0, self.y_range.1) };
        let t = (y - self.y_range.0) / (self.y_range.1 - self.y_range.0);
        (self.height - self.margin) - (t * f64::from(self.plot_height())) as i32
    }
}

fn set_pixel(image: &mut RgbaImage, x: i32, y: i32, color: [u8; 4]) {
    if x >= 0 && y >= 0 && (x as u32) < image.width() && (y as u32) < image.height() {
        image.put_pixel(x as u32, y as u32, Rgba(color));
    }
}

/// Draw `text` centred horizontally and vertically within a band of rows
fn draw_text_centred(image: &mut RgbaImage, text: &str, band_top: u32, band_height: u32, scale: u32, color: [u8; 4]) {
    let width = i64::from(text_width(text, scale));
    let x = (i64::from(image.width()) - width).max(0) / 2;
    let y = i64::from(band_top) + (i64::from(band_height) - i64::from(GLYPH_HEIGHT * scale)).max(0) / 2;
    let (Ok(x), Ok(y)) = (i32::try_from(x), i32::try_from(y)) else {
        return;
    };
    draw_text(image, text, (x, y), scale, color);
}

fn draw_text(image: &mut RgbaImage, text: &str, origin: (i32, i32), scale: u32, color: [u8; 4]) {
    let scale = scale as i32;
    let mut left = origin.0;
    for c in text.chars() {
        for (row, bits) in glyph(c).iter().enumerate() {
            for col in 0..GLYPH_WIDTH {
                if bits & (0x10 >> col) == 0 {
                    continue;
                }
                let x = left + col as i32 * scale;
                let y = origin.1 + row as i32 * scale;
                for dy in 0..scale {
                    for dx in 0..scale {
                        set_pixel(image, x + dx, y + dy, color);
                    }
                }
            }
        }
        left += ADVANCE as i32 * scale;
    }
}

/// Bresenham line, optionally dashed
fn draw_line(image: &mut RgbaImage, from: (i32, i32), to: (i32, i32), color: [u8; 4], dash: Option<u32>) {
    let (x1, y1) = to;
    let dx = (x1 - from.0).abs();
    let dy = -(y1 - from.1).abs();
    let sx = if from.0 < x1 { 1 } else { -1 };
    let sy = if from.1 < y1 { 1 } else { -1 };
    let mut err = dx + dy;
    let (mut x, mut y) = from;
    let mut step = 0u32;

    loop {
        let on = dash.map_or(true, |d| (step / d.max(1)) % 2 == 0);
        if on {
            set_pixel(image, x, y, color);
        }
        if x == x1 && y == y1 {
            break;
        }
        step += 1;

        let e2 = 2 * err;
        if e2 >= dy {
            err += dy;
            x += sx;
        }
        if e2 <= dx {
            err += dx;
            y += sy;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::vswr::{ScanResult, VswrWindow};

    fn plot(verdict: Verdict) -> VswrPlot {
        let result = ScanResult::from_pairs(&[(1_000, 1.2), (1_500, 1.1), (2_000, 1.3)]).unwrap();
        VswrPlot::new("test", &result, VswrWindow::new(1_200, 1_800), 1.5, verdict)
    }

    #[test]
    fn test_background_follows_verdict() {
        let renderer = PngRenderer::default();
        let pass = renderer.render(&plot(Verdict::Pass)).unwrap();
        let fail = renderer.render(&plot(Verdict::Fail)).unwrap();
        assert_eq!(pass.get_pixel(2, 2).0, renderer.style().pass_background);
        assert_eq!(fail.get_pixel(2, 2).0, renderer.style().fail_background);
    }

    #[test]
    fn test_title_drawn_in_top_margin() {
        let renderer = PngRenderer::default();
        let style = renderer.style();
        let text_in_rows = |image: &RgbaImage, rows: std::ops::Range<u32>| {
            rows.flat_map(|y| (0..image.width()).map(move |x| (x, y)))
                .filter(|(x, y)| image.get_pixel(*x, *y).0 == style.text)
                .count()
        };

        let mut titled = plot(Verdict::Pass);
        titled.title = "ABCDE E-Dot-Final".into();
        let image = renderer.render(&titled).unwrap();
        let title_pixels = text_in_rows(&image, 0..style.margin);
        assert!(title_pixels > 200, "only {title_pixels} title pixels");
        // Capture time along the bottom
        assert!(text_in_rows(&image, style.height - style.margin..style.height) > 100);

        let mut untitled = plot(Verdict::Fail);
        untitled.title.clear();
        let image = renderer.render(&untitled).unwrap();
        assert_eq!(text_in_rows(&image, 0..style.margin), 0);
        assert_eq!(image.get_pixel(2, 2).0, style.fail_background);
    }

    #[test]
    fn test_curve_and_limit_drawn() {
        let renderer = PngRenderer::default();
        let image = renderer.render(&plot(Verdict::Pass)).unwrap();
        let count = |color: [u8; 4]| image.pixels().filter(|p| p.0 == color).count();
        assert!(count(renderer.style().curve) > 100);
        assert!(count(renderer.style().limit) > 100);
        assert!(count(renderer.style().window) > 100);
    }

    #[test]
    fn test_out_of_range_values_stay_on_canvas() {
        let result = ScanResult::from_pairs(&[(1_000, 9.0), (2_000, f64::INFINITY)]).unwrap();
        let plot = VswrPlot::new("spike", &result, VswrWindow::new(1_000, 2_000), 1.5, Verdict::Fail);
        assert!(PngRenderer::default().render(&plot).is_some());
    }
}
