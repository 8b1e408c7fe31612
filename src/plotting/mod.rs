use image::{ImageError, ImageFormat, Rgb, RgbImage};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::{debug, info};

use crate::config::PlotDefaults;
use crate::error::{StatsError, StatsResult};
use crate::reader::Table;
use crate::storage::DatasetStore;

const BACKGROUND: Rgb<u8> = Rgb([255, 255, 255]);
const AXIS: Rgb<u8> = Rgb([40, 40, 40]);
const GRID: Rgb<u8> = Rgb([225, 225, 225]);
const BAR: Rgb<u8> = Rgb([31, 119, 180]);
const BAR_EDGE: Rgb<u8> = Rgb([20, 80, 125]);
const MARKER: Rgb<u8> = Rgb([31, 119, 180]);

const MIN_SIZE: u32 = 64;
const MAX_SIZE: u32 = 4096;
const MAX_BINS: usize = 1000;

/// Chart kinds the renderer knows how to draw
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlotKind {
    Hist,
    Scatter,
}

impl Default for PlotKind {
    fn default() -> Self {
        PlotKind::Hist
    }
}

impl PlotKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlotKind::Hist => "hist",
            PlotKind::Scatter => "scatter",
        }
    }
}

impl FromStr for PlotKind {
    type Err = StatsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "hist" => Ok(PlotKind::Hist),
            "scatter" => Ok(PlotKind::Scatter),
            other => Err(StatsError::bad_input(format!(
                "unsupported plot kind '{}'; expected 'hist' or 'scatter'",
                other
            ))),
        }
    }
}

/// Per-request overrides of the configured plot defaults
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PlotOptions {
    pub bins: Option<usize>,
    pub width: Option<u32>,
    pub height: Option<u32>,
}

impl PlotOptions {
    /// Merge with `defaults` and validate the result
    pub fn resolve(&self, defaults: &PlotDefaults) -> StatsResult<PlotDefaults> {
        let settings = PlotDefaults {
            bins: self.bins.unwrap_or(defaults.bins),
            width: self.width.unwrap_or(defaults.width),
            height: self.height.unwrap_or(defaults.height),
        };

        if settings.bins == 0 || settings.bins > MAX_BINS {
            return Err(StatsError::bad_input(format!(
                "bins must be between 1 and {}, got {}",
                MAX_BINS, settings.bins
            )));
        }
        for (label, size) in [("width", settings.width), ("height", settings.height)] {
            if !(MIN_SIZE..=MAX_SIZE).contains(&size) {
                return Err(StatsError::bad_input(format!(
                    "{} must be between {} and {} pixels, got {}",
                    label, MIN_SIZE, MAX_SIZE, size
                )));
            }
        }
        Ok(settings)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PlotResult {
    pub plot_path: String,
}

/// Equal-width bins over `[min, max]`
#[derive(Debug, Clone, PartialEq)]
pub struct Histogram {
    pub min: f64,
    pub max: f64,
    pub counts: Vec<usize>,
}

impl Histogram {
    /// Bin `values`; a constant sample is widened to `[v - 0.5, v + 0.5]`
    pub fn from_values(values: &[f64], bins: usize) -> Option<Self> {
        if values.is_empty() || bins == 0 {
            return None;
        }

        let mut min_val = values.iter().fold(f64::INFINITY, |a, &b| a.min(b));
        let mut max_val = values.iter().fold(f64::NEG_INFINITY, |a, &b| a.max(b));
        if min_val == max_val {
            min_val -= 0.5;
            max_val += 0.5;
        }

        let bin_width = (max_val - min_val) / bins as f64;
        let mut counts = vec![0; bins];
        for &value in values {
            let bin_index = ((value - min_val) / bin_width).floor() as usize;
            // max lands on the right edge of the last bin
            counts[bin_index.min(bins - 1)] += 1;
        }

        Some(Self {
            min: min_val,
            max: max_val,
            counts,
        })
    }
}

/// Raster drawing surface with a framed plot area
struct Canvas {
    image: RgbImage,
    left: u32,
    right: u32,
    top: u32,
    bottom: u32,
}

impl Canvas {
    fn new(width: u32, height: u32) -> Self {
        let image = RgbImage::from_pixel(width, height, BACKGROUND);
        let margin_x = (width / 10).max(8);
        let margin_y = (height / 10).max(8);
        Self {
            image,
            left: margin_x,
            right: width - margin_x / 2,
            top: margin_y / 2,
            bottom: height - margin_y,
        }
    }

    fn plot_width(&self) -> f64 {
        (self.right - self.left) as f64
    }

    fn plot_height(&self) -> f64 {
        (self.bottom - self.top) as f64
    }

    /// Map data coordinates in `[0, 1]` to pixels
    fn to_pixel(&self, fx: f64, fy: f64) -> (i64, i64) {
        let px = self.left as f64 + fx.clamp(0.0, 1.0) * self.plot_width();
        let py = self.bottom as f64 - fy.clamp(0.0, 1.0) * self.plot_height();
        (px.round() as i64, py.round() as i64)
    }

    fn put(&mut self, x: i64, y: i64, color: Rgb<u8>) {
        if x >= 0 && y >= 0 && (x as u32) < self.image.width() && (y as u32) < self.image.height() {
            self.image.put_pixel(x as u32, y as u32, color);
        }
    }

    fn fill_rect(&mut self, x0: i64, y0: i64, x1: i64, y1: i64, color: Rgb<u8>) {
        for y in y0.min(y1)..=y0.max(y1) {
            for x in x0.min(x1)..=x0.max(x1) {
                self.put(x, y, color);
            }
        }
    }

    fn outline_rect(&mut self, x0: i64, y0: i64, x1: i64, y1: i64, color: Rgb<u8>) {
        self.line(x0, y0, x1, y0, color);
        self.line(x1, y0, x1, y1, color);
        self.line(x1, y1, x0, y1, color);
        self.line(x0, y1, x0, y0, color);
    }

    /// Bresenham line
    fn line(&mut self, x0: i64, y0: i64, x1: i64, y1: i64, color: Rgb<u8>) {
        let (mut x, mut y) = (x0, y0);
        let dx = (x1 - x0).abs();
        let dy = -(y1 - y0).abs();
        let sx = if x0 < x1 { 1 } else { -1 };
        let sy = if y0 < y1 { 1 } else { -1 };
        let mut err = dx + dy;
        loop {
            self.put(x, y, color);
            if x == x1 && y == y1 {
                break;
            }
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

    fn marker(&mut self, cx: i64, cy: i64, radius: i64, color: Rgb<u8>) {
        for dy in -radius..=radius {
            for dx in -radius..=radius {
                if dx * dx + dy * dy <= radius * radius {
                    self.put(cx + dx, cy + dy, color);
                }
            }
        }
    }

    fn grid(&mut self, divisions: u32) {
        for i in 1..divisions {
            let f = i as f64 / divisions as f64;
            let (x, _) = self.to_pixel(f, 0.0);
            let (_, y) = self.to_pixel(0.0, f);
            self.line(x, self.top as i64, x, self.bottom as i64, GRID);
            self.line(self.left as i64, y, self.right as i64, y, GRID);
        }
    }

    fn axes(&mut self) {
        let (left, right) = (self.left as i64, self.right as i64);
        let (top, bottom) = (self.top as i64, self.bottom as i64);
        self.outline_rect(left, top, right, bottom, AXIS);
        for i in 0..=5 {
            let f = i as f64 / 5.0;
            let (x, _) = self.to_pixel(f, 0.0);
            let (_, y) = self.to_pixel(0.0, f);
            self.line(x, bottom, x, bottom + 4, AXIS);
            self.line(left - 4, y, left, y, AXIS);
        }
    }

    fn into_image(self) -> RgbImage {
        self.image
    }
}

/// Bar chart of `values` binned into `settings.bins` bins
pub fn render_histogram(values: &[f64], settings: &PlotDefaults) -> StatsResult<RgbImage> {
    let histogram = Histogram::from_values(values, settings.bins)
        .ok_or_else(|| StatsError::bad_input("no values to plot"))?;
    let tallest = histogram.counts.iter().copied().max().unwrap_or(0).max(1) as f64;

    let mut canvas = Canvas::new(settings.width, settings.height);
    canvas.grid(5);

    let bins = histogram.counts.len() as f64;
    for (i, &count) in histogram.counts.iter().enumerate() {
        if count == 0 {
            continue;
        }
        let (x0, y0) = canvas.to_pixel(i as f64 / bins, count as f64 / tallest);
        let (x1, y1) = canvas.to_pixel((i + 1) as f64 / bins, 0.0);
        canvas.fill_rect(x0, y0, x1, y1, BAR);
        canvas.outline_rect(x0, y0, x1, y1, BAR_EDGE);
    }

    canvas.axes();
    Ok(canvas.into_image())
}

/// Scatter plot of `(x, y)` points scaled to their bounding box
pub fn render_scatter(points: &[(f64, f64)], settings: &PlotDefaults) -> StatsResult<RgbImage> {
    if points.is_empty() {
        return Err(StatsError::bad_input("no points to plot"));
    }

    let (x_min, x_max) = padded_range(points.iter().map(|p| p.0));
    let (y_min, y_max) = padded_range(points.iter().map(|p| p.1));

    let mut canvas = Canvas::new(settings.width, settings.height);
    canvas.grid(5);

    let radius = (settings.width.min(settings.height) / 160).max(2) as i64;
    for &(x, y) in points {
        let (px, py) = canvas.to_pixel((x - x_min) / (x_max - x_min), (y - y_min) / (y_max - y_min));
        canvas.marker(px, py, radius, MARKER);
    }

    canvas.axes();
    Ok(canvas.into_image())
}

/// Data range with 5% padding each side, never zero width
fn padded_range(values: impl Iterator<Item = f64>) -> (f64, f64) {
    let (min, max) = values.fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| {
        (lo.min(v), hi.max(v))
    });
    if min == max {
        return (min - 0.5, max + 0.5);
    }
    let pad = (max - min) * 0.05;
    (min - pad, max + pad)
}

/// Write `image` as PNG via a temporary file so a failed save leaves nothing behind
pub fn save_png(image: RgbImage, path: &Path) -> StatsResult<()> {
    let tmp_path = path.with_extension("png.tmp");

    let saved = image.save_with_format(&tmp_path, ImageFormat::Png);
    drop(image);

    if let Err(e) = saved {
        let _ = std::fs::remove_file(&tmp_path);
        return Err(match e {
            ImageError::IoError(source) => StatsError::io(&tmp_path, source),
            other => StatsError::parse(format!("failed to encode {}: {}", path.display(), other)),
        });
    }

    std::fs::rename(&tmp_path, path).map_err(|e| {
        let _ = std::fs::remove_file(&tmp_path);
        StatsError::io(path, e)
    })
}

fn require<'a>(column: Option<&'a str>, axis: &str, kind: PlotKind) -> StatsResult<&'a str> {
    column.filter(|c| !c.is_empty()).ok_or_else(|| {
        StatsError::bad_input(format!("{} plot requires the '{}' column", kind.as_str(), axis))
    })
}

/// Render `table` and store the image next to the dataset
pub fn plot_table(
    table: &Table,
    store: &DatasetStore,
    dataset_id: &str,
    kind: PlotKind,
    x: Option<&str>,
    y: Option<&str>,
    settings: &PlotDefaults,
) -> StatsResult<PlotResult> {
    let image = match kind {
        PlotKind::Hist => {
            let column = require(x, "x", kind)?;
            let values: Vec<f64> = table.numeric_values(column)?.into_iter().flatten().collect();
            debug!("Histogram of '{}' over {} values", column, values.len());
            render_histogram(&values, settings)?
        }
        PlotKind::Scatter => {
            let x_col = require(x, "x", kind)?;
            let y_col = require(y, "y", kind)?;
            let points: Vec<(f64, f64)> = table
                .numeric_values(x_col)?
                .into_iter()
                .zip(table.numeric_values(y_col)?)
                .filter_map(|(x, y)| Some((x?, y?)))
                .collect();
            debug!("Scatter of '{}' vs '{}' over {} points", x_col, y_col, points.len());
            render_scatter(&points, settings)?
        }
    };

    let path: PathBuf = store.plot_path(dataset_id)?;
    save_png(image, &path)?;
    info!("🖼️ Saved plot: {}", path.display());

    Ok(PlotResult {
        plot_path: path.display().to_string(),
    })
}
