//! Channel compositing: crop, intensity window, color lookup and blending,
//! plus the collage helpers used to assemble per-subject strips.

use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_line_segment_mut};
use imageproc::rect::Rect as PixelRect;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::frame::{Frame, Rect};
use crate::roi::Shape;
use crate::stats::percentile_sorted;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WindowKind {
    Absolute,
    #[default]
    Percentile,
}

/// Clip bounds for the signal channel, either raw counts or percentiles.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IntensityWindow {
    pub kind: WindowKind,
    pub low: f64,
    pub high: f64,
}

impl Default for IntensityWindow {
    fn default() -> Self {
        Self {
            kind: WindowKind::Percentile,
            low: 0.0,
            high: 100.0,
        }
    }
}

impl IntensityWindow {
    pub fn bounds(&self, frame: &Frame) -> (f64, f64) {
        match self.kind {
            WindowKind::Absolute => (self.low, self.high),
            WindowKind::Percentile => {
                let mut sorted: Vec<f64> = frame
                    .data
                    .iter()
                    .map(|&v| v as f64)
                    .filter(|v| v.is_finite())
                    .collect();
                sorted.sort_by(|a, b| a.total_cmp(b));
                (
                    percentile_sorted(&sorted, self.low),
                    percentile_sorted(&sorted, self.high),
                )
            }
        }
    }

    /// Clip to the window and rescale to `[0, 1]`. An empty window maps to zero.
    pub fn apply(&self, frame: &Frame) -> Frame {
        let (lo, hi) = self.bounds(frame);
        rescale(frame, lo, hi)
    }
}

fn rescale(frame: &Frame, lo: f64, hi: f64) -> Frame {
    let span = hi - lo;
    let mut out = frame.clone();
    for v in &mut out.data {
        *v = if span > 0.0 && v.is_finite() {
            ((*v as f64 - lo) / span).clamp(0.0, 1.0) as f32
        } else {
            0.0
        };
    }
    out
}

pub fn normalize_min_max(frame: &Frame) -> Frame {
    let (lo, hi) = frame.min_max();
    rescale(frame, lo as f64, hi as f64)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColorMap {
    Gray,
    #[default]
    Hot,
    Inferno,
    Magma,
    Viridis,
    Jet,
}

const GRAY: &[[u8; 3]] = &[[0, 0, 0], [255, 255, 255]];
const HOT: &[[u8; 3]] = &[[0, 0, 0], [160, 0, 0], [255, 64, 0], [255, 200, 0], [255, 255, 255]];
const INFERNO: &[[u8; 3]] = &[
    [0, 0, 4],
    [40, 11, 84],
    [101, 21, 110],
    [159, 42, 99],
    [212, 72, 66],
    [245, 125, 21],
    [250, 193, 39],
    [252, 255, 164],
];
const MAGMA: &[[u8; 3]] = &[
    [0, 0, 4],
    [28, 16, 68],
    [79, 18, 123],
    [129, 37, 129],
    [181, 54, 122],
    [229, 80, 100],
    [251, 135, 97],
    [254, 194, 135],
    [252, 253, 191],
];
const VIRIDIS: &[[u8; 3]] = &[
    [68, 1, 84],
    [72, 40, 120],
    [62, 74, 137],
    [49, 104, 142],
    [38, 130, 142],
    [31, 158, 137],
    [53, 183, 121],
    [109, 205, 89],
    [180, 222, 44],
    [253, 231, 37],
];
const JET: &[[u8; 3]] = &[
    [0, 0, 128],
    [0, 0, 255],
    [0, 128, 255],
    [0, 255, 255],
    [128, 255, 128],
    [255, 255, 0],
    [255, 128, 0],
    [255, 0, 0],
    [128, 0, 0],
];

impl ColorMap {
    fn stops(&self) -> &'static [[u8; 3]] {
        match self {
            ColorMap::Gray => GRAY,
            ColorMap::Hot => HOT,
            ColorMap::Inferno => INFERNO,
            ColorMap::Magma => MAGMA,
            ColorMap::Viridis => VIRIDIS,
            ColorMap::Jet => JET,
        }
    }

    /// Color at `t` in `[0, 1]`, linearly interpolated between stops.
    pub fn sample(&self, t: f64) -> Rgb<u8> {
        let stops = self.stops();
        let t = if t.is_finite() { t.clamp(0.0, 1.0) } else { 0.0 };
        let pos = t * (stops.len() - 1) as f64;
        let i = (pos.floor() as usize).min(stops.len() - 2);
        let f = pos - i as f64;
        let (a, b) = (stops[i], stops[i + 1]);
        Rgb([
            lerp(a[0], b[0], f),
            lerp(a[1], b[1], f),
            lerp(a[2], b[2], f),
        ])
    }

    pub fn sample_reversed(&self, t: f64) -> Rgb<u8> {
        self.sample(1.0 - t)
    }
}

fn lerp(a: u8, b: u8, f: f64) -> u8 {
    (a as f64 + (b as f64 - a as f64) * f).round().clamp(0.0, 255.0) as u8
}

/// Color a `[0, 1]` frame through a lookup table.
pub fn colorize(normalized: &Frame, cmap: ColorMap) -> RgbImage {
    RgbImage::from_fn(normalized.width as u32, normalized.height as u32, |x, y| {
        cmap.sample(normalized.get(x as usize, y as usize) as f64)
    })
}

pub fn gray_rgb(normalized: &Frame) -> RgbImage {
    colorize(normalized, ColorMap::Gray)
}

/// `out = (1 - opacity) * base + opacity * overlay`.
pub fn blend(base: &RgbImage, overlay: &RgbImage, opacity: f64) -> Result<RgbImage> {
    if base.dimensions() != overlay.dimensions() {
        let (bw, bh) = base.dimensions();
        let (ow, oh) = overlay.dimensions();
        return Err(Error::Dimension {
            expected: (bw as usize, bh as usize),
            actual: (ow as usize, oh as usize),
        });
    }
    let a = opacity.clamp(0.0, 1.0);
    let mut out = base.clone();
    for (dst, src) in out.pixels_mut().zip(overlay.pixels()) {
        for c in 0..3 {
            dst.0[c] = ((1.0 - a) * dst.0[c] as f64 + a * src.0[c] as f64).round() as u8;
        }
    }
    Ok(out)
}

/// Draw a time-progress strip along the bottom edge.
pub fn draw_progress_bar(img: &mut RgbImage, fraction: f64) {
    let (w, h) = img.dimensions();
    if w == 0 || h == 0 {
        return;
    }
    let bar_h = (h / 40).max(4).min(h);
    let y = (h - bar_h) as i32;
    draw_filled_rect_mut(img, PixelRect::at(0, y).of_size(w, bar_h), Rgb([40, 40, 40]));
    let filled = (fraction.clamp(0.0, 1.0) * w as f64).round() as u32;
    if filled > 0 {
        draw_filled_rect_mut(img, PixelRect::at(0, y).of_size(filled, bar_h), Rgb([255, 255, 255]));
    }
}

/// 3x5 bitmap glyphs, one row per byte, high bit on the left.
fn glyph(c: char) -> Option<[u8; 5]> {
    let rows = match c {
        '0' => [0b111, 0b101, 0b101, 0b101, 0b111],
        '1' => [0b010, 0b110, 0b010, 0b010, 0b111],
        '2' => [0b111, 0b001, 0b111, 0b100, 0b111],
        '3' => [0b111, 0b001, 0b111, 0b001, 0b111],
        '4' => [0b101, 0b101, 0b111, 0b001, 0b001],
        '5' => [0b111, 0b100, 0b111, 0b001, 0b111],
        '6' => [0b111, 0b100, 0b111, 0b101, 0b111],
        '7' => [0b111, 0b001, 0b001, 0b001, 0b001],
        '8' => [0b111, 0b101, 0b111, 0b101, 0b111],
        '9' => [0b111, 0b101, 0b111, 0b001, 0b111],
        ':' => [0b000, 0b010, 0b000, 0b010, 0b000],
        _ => return None,
    };
    Some(rows)
}

/// Acquisition time as `h:mm`.
pub fn format_clock(minutes: u32) -> String {
    format!("{}:{:02}", minutes / 60, minutes % 60)
}

/// Draw `text` in the top-left corner, white on a black box. Characters
/// outside digits and `:` leave a blank cell.
pub fn draw_label(img: &mut RgbImage, text: &str) {
    let (w, h) = img.dimensions();
    if w == 0 || h == 0 || text.is_empty() {
        return;
    }
    let px = (h / 64).max(1);
    let cells = text.chars().count() as u32;
    let box_w = cells * 4 * px + px;
    let box_h = 7 * px;
    draw_filled_rect_mut(img, PixelRect::at(0, 0).of_size(box_w, box_h), Rgb([0, 0, 0]));
    let white = Rgb([255, 255, 255]);
    for (i, c) in text.chars().enumerate() {
        let Some(rows) = glyph(c) else {
            continue;
        };
        let x0 = px + i as u32 * 4 * px;
        for (r, bits) in rows.iter().enumerate() {
            for col in 0..3u32 {
                if bits & (0b100 >> col) != 0 {
                    let x = (x0 + col * px) as i32;
                    let y = (px + r as u32 * px) as i32;
                    draw_filled_rect_mut(img, PixelRect::at(x, y).of_size(px, px), white);
                }
            }
        }
    }
}

/// Stand-in tile for a missing time point: black with a red cross.
pub fn placeholder(width: u32, height: u32) -> RgbImage {
    let mut img = RgbImage::new(width, height);
    if width == 0 || height == 0 {
        return img;
    }
    let red = Rgb([255, 0, 0]);
    let (w, h) = ((width - 1) as f32, (height - 1) as f32);
    let thickness = (width.min(height) / 100).max(1) as i32;
    for d in -thickness / 2..=thickness / 2 {
        let d = d as f32;
        draw_line_segment_mut(&mut img, (d, 0.0), (w + d, h), red);
        draw_line_segment_mut(&mut img, (w + d, 0.0), (d, h), red);
    }
    img
}

/// Vertical color scale, high values on top.
pub fn colorbar(cmap: ColorMap, width: u32, height: u32) -> RgbImage {
    let span = height.saturating_sub(1).max(1) as f64;
    RgbImage::from_fn(width, height, |_, y| cmap.sample(1.0 - y as f64 / span))
}

/// Place images side by side, top-aligned on black.
pub fn hstack(images: &[RgbImage]) -> RgbImage {
    let width = images.iter().map(|i| i.width()).sum();
    let height = images.iter().map(|i| i.height()).max().unwrap_or(0);
    let mut out = RgbImage::new(width, height);
    let mut x0 = 0;
    for img in images {
        image::imageops::replace(&mut out, img, x0 as i64, 0);
        x0 += img.width();
    }
    out
}

/// Stack images top to bottom, left-aligned on black.
pub fn vstack(images: &[RgbImage]) -> RgbImage {
    let width = images.iter().map(|i| i.width()).max().unwrap_or(0);
    let height = images.iter().map(|i| i.height()).sum();
    let mut out = RgbImage::new(width, height);
    let mut y0 = 0;
    for img in images {
        image::imageops::replace(&mut out, img, 0, y0 as i64);
        y0 += img.height();
    }
    out
}

/// Per-run compositing settings.
#[derive(Debug, Clone, PartialEq)]
pub struct Compositor {
    pub crop: Option<Rect>,
    pub window: IntensityWindow,
    pub colormap: ColorMap,
    pub opacity: f64,
    pub progress_bar: bool,
    /// Stamp the acquisition time in the top-left corner.
    pub timestamp: bool,
}

/// Where a composite sits in its series.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimeStamp {
    pub minutes: u32,
    /// Fraction of the canonical series elapsed, `[0, 1]`.
    pub fraction: f64,
}

impl Default for Compositor {
    fn default() -> Self {
        Self {
            crop: None,
            window: IntensityWindow::default(),
            colormap: ColorMap::Hot,
            opacity: 0.5,
            progress_bar: true,
            timestamp: true,
        }
    }
}

impl Compositor {
    /// Bounds actually used for `width` x `height` frames.
    pub fn crop_rect(&self, width: usize, height: usize) -> Rect {
        self.crop
            .map(|r| r.clamp_to(width, height))
            .unwrap_or_else(|| Rect::full(width, height))
    }

    pub fn view_mapping(&self, width: usize, height: usize) -> ViewMapping {
        ViewMapping::for_crop(&self.crop_rect(width, height), 1.0)
    }

    /// Composite one time point, stamped with its place in the series when given.
    pub fn compose(&self, structural: &Frame, signal: &Frame, stamp: Option<TimeStamp>) -> Result<RgbImage> {
        if structural.dims() != signal.dims() {
            return Err(Error::Dimension {
                expected: structural.dims(),
                actual: signal.dims(),
            });
        }
        let rect = self.crop_rect(structural.width, structural.height);
        let base = gray_rgb(&normalize_min_max(&structural.crop(&rect)));
        let overlay = colorize(&self.window.apply(&signal.crop(&rect)), self.colormap);
        let mut out = blend(&base, &overlay, self.opacity)?;
        if let Some(stamp) = stamp {
            if self.progress_bar {
                draw_progress_bar(&mut out, stamp.fraction);
            }
            if self.timestamp {
                draw_label(&mut out, &format_clock(stamp.minutes));
            }
        }
        Ok(out)
    }
}

/// Smallest accepted view scale.
pub const MIN_SCALE: f64 = 1e-6;

/// Exact map between canonical acquisition space and a cropped, scaled view.
///
/// `view = (canonical - origin) * scale + offset`, with `scale` always
/// finite and at least [`MIN_SCALE`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "ViewMappingFields")]
pub struct ViewMapping {
    pub origin: (f64, f64),
    scale: f64,
    pub offset: (f64, f64),
}

#[derive(Deserialize)]
struct ViewMappingFields {
    origin: (f64, f64),
    scale: f64,
    offset: (f64, f64),
}

impl TryFrom<ViewMappingFields> for ViewMapping {
    type Error = Error;

    fn try_from(fields: ViewMappingFields) -> Result<Self> {
        ViewMapping::new(fields.origin, fields.scale, fields.offset)
    }
}

impl ViewMapping {
    /// Rejects a scale that is not finite or below [`MIN_SCALE`].
    pub fn new(origin: (f64, f64), scale: f64, offset: (f64, f64)) -> Result<Self> {
        if !scale.is_finite() || scale < MIN_SCALE {
            return Err(Error::InputMalformed(format!("view scale {} must be positive", scale)));
        }
        Ok(Self { origin, scale, offset })
    }

    /// A non-finite scale falls back to 1; anything smaller is raised to [`MIN_SCALE`].
    pub fn for_crop(rect: &Rect, scale: f64) -> Self {
        let scale = if scale.is_finite() { scale.max(MIN_SCALE) } else { 1.0 };
        Self {
            origin: (rect.x as f64, rect.y as f64),
            scale,
            offset: (0.0, 0.0),
        }
    }

    pub fn scale(&self) -> f64 {
        self.scale
    }

    pub fn to_view(&self, x: f64, y: f64) -> (f64, f64) {
        (
            (x - self.origin.0) * self.scale + self.offset.0,
            (y - self.origin.1) * self.scale + self.offset.1,
        )
    }

    pub fn to_canonical(&self, x: f64, y: f64) -> (f64, f64) {
        (
            (x - self.offset.0) / self.scale + self.origin.0,
            (y - self.offset.1) / self.scale + self.origin.1,
        )
    }

    pub fn shape_to_view(&self, shape: &Shape) -> Shape {
        let (tx, ty) = self.to_view(0.0, 0.0);
        shape.map_axis_aligned(self.scale, self.scale, tx, ty)
    }

    pub fn shape_to_canonical(&self, shape: &Shape) -> Shape {
        let (tx, ty) = self.to_canonical(0.0, 0.0);
        let inv = 1.0 / self.scale;
        shape.map_axis_aligned(inv, inv, tx, ty)
    }
}
