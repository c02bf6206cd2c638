//! Spatiotemporal footprint of the signal channel across a subject's series.

use image::{Rgb, RgbImage};
use imageproc::drawing::draw_line_segment_mut;
use serde::{Deserialize, Serialize};

use crate::compose::{gray_rgb, normalize_min_max, ColorMap};
use crate::error::{Error, Result};
use crate::frame::{Frame, Mask};
use crate::segment::{self, Component};
use crate::stats;

/// Boost applied to the Otsu level when outlining anatomy.
pub const ANATOMY_BOOST: f64 = 1.10;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SegmentationConfig {
    /// Multiplier on the Otsu level.
    pub boost: f64,
    pub min_area: usize,
    /// Time-point indices splitting early/mid/late phases.
    pub phase_boundaries: (usize, usize),
}

impl Default for SegmentationConfig {
    fn default() -> Self {
        Self {
            boost: 1.0,
            min_area: 10,
            phase_boundaries: (5, 15),
        }
    }
}

#[derive(Debug, Clone)]
pub struct TimePointSegmentation {
    pub time: u32,
    /// Union of the kept components.
    pub mask: Mask,
    pub components: Vec<Component>,
}

impl TimePointSegmentation {
    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }

    pub fn centroid(&self) -> Option<(f64, f64)> {
        let (mut sx, mut sy, mut n) = (0.0, 0.0, 0usize);
        for c in &self.components {
            for &(x, y) in &c.pixels {
                sx += x as f64;
                sy += y as f64;
                n += 1;
            }
        }
        (n > 0).then(|| (sx / n as f64, sy / n as f64))
    }
}

pub fn segment_time_point(signal: &Frame, time: u32, config: &SegmentationConfig) -> TimePointSegmentation {
    let raw = segment::threshold_mask(signal, config.boost);
    let components = segment::components(&raw, config.min_area);
    let mut mask = Mask::new(signal.width, signal.height);
    for c in &components {
        for &(x, y) in &c.pixels {
            mask.set(x, y, true);
        }
    }
    TimePointSegmentation {
        time,
        mask,
        components,
    }
}

/// Earliest and latest time index at which each pixel was segmented.
#[derive(Debug, Clone, PartialEq)]
pub struct PersistenceMap {
    pub width: usize,
    pub height: usize,
    pub times: Vec<u32>,
    pub first: Vec<Option<usize>>,
    pub last: Vec<Option<usize>>,
}

impl PersistenceMap {
    pub fn build(segmentations: &[TimePointSegmentation], width: usize, height: usize) -> Result<Self> {
        let mut first = vec![None; width * height];
        let mut last = vec![None; width * height];
        for (idx, seg) in segmentations.iter().enumerate() {
            if seg.mask.dims() != (width, height) {
                return Err(Error::Dimension {
                    expected: (width, height),
                    actual: seg.mask.dims(),
                });
            }
            for (i, &on) in seg.mask.data.iter().enumerate() {
                if on {
                    first[i].get_or_insert(idx);
                    last[i] = Some(idx);
                }
            }
        }
        Ok(Self {
            width,
            height,
            times: segmentations.iter().map(|s| s.time).collect(),
            first,
            last,
        })
    }

    pub fn earliest_time(&self, x: usize, y: usize) -> Option<u32> {
        self.first[y * self.width + x].map(|i| self.times[i])
    }

    pub fn explored(&self) -> Mask {
        Mask {
            width: self.width,
            height: self.height,
            data: self.first.iter().map(Option::is_some).collect(),
        }
    }

    fn index_color(&self, idx: usize, cmap: ColorMap) -> Rgb<u8> {
        let span = self.times.len().saturating_sub(1).max(1) as f64;
        cmap.sample(idx as f64 / span)
    }

    /// Each explored pixel colored by its earliest time index.
    pub fn render_persistence(&self, cmap: ColorMap) -> RgbImage {
        self.render_indices(&self.first, cmap)
    }

    /// Each explored pixel colored by its latest time index.
    pub fn render_temporal(&self, cmap: ColorMap) -> RgbImage {
        self.render_indices(&self.last, cmap)
    }

    fn render_indices(&self, indices: &[Option<usize>], cmap: ColorMap) -> RgbImage {
        RgbImage::from_fn(self.width as u32, self.height as u32, |x, y| {
            match indices[y as usize * self.width + x as usize] {
                Some(idx) => self.index_color(idx, cmap),
                None => Rgb([0, 0, 0]),
            }
        })
    }
}

/// Additive early (red), mid (green) and late (blue) occupancy.
pub fn render_phase_map(
    segmentations: &[TimePointSegmentation],
    width: usize,
    height: usize,
    boundaries: (usize, usize),
) -> RgbImage {
    let mut img = RgbImage::new(width as u32, height as u32);
    for (idx, seg) in segmentations.iter().enumerate() {
        let channel = if idx < boundaries.0 {
            0
        } else if idx < boundaries.1 {
            1
        } else {
            2
        };
        for (x, y) in seg.mask.coords() {
            if x < width && y < height {
                img.get_pixel_mut(x as u32, y as u32).0[channel] = 255;
            }
        }
    }
    img
}

fn draw_closed(img: &mut RgbImage, contour: &[(usize, usize)], color: Rgb<u8>) {
    match contour {
        [] => {}
        [(x, y)] => {
            if *x < img.width() as usize && *y < img.height() as usize {
                img.put_pixel(*x as u32, *y as u32, color);
            }
        }
        _ => {
            for i in 0..contour.len() {
                let (ax, ay) = contour[i];
                let (bx, by) = contour[(i + 1) % contour.len()];
                draw_line_segment_mut(img, (ax as f32, ay as f32), (bx as f32, by as f32), color);
            }
        }
    }
}

/// Boundary of the largest blob in the Otsu segmentation of the averaged structural frame.
pub fn anatomical_outline(structural: &[&Frame]) -> Option<Vec<(usize, usize)>> {
    let mean = Frame::average(structural)?;
    let mask = segment::threshold_mask(&mean, ANATOMY_BOOST);
    let comps = segment::components(&mask, 1);
    segment::largest(&comps).map(|c| c.contour.clone())
}

/// Every time point's contours over `base`, colored by time index.
pub fn render_contour_evolution(
    base: &Frame,
    segmentations: &[TimePointSegmentation],
    outline: Option<&[(usize, usize)]>,
    cmap: ColorMap,
) -> RgbImage {
    let mut img = gray_rgb(&normalize_min_max(base));
    if let Some(outline) = outline {
        draw_closed(&mut img, outline, Rgb([255, 255, 255]));
    }
    let span = segmentations.len().saturating_sub(1).max(1) as f64;
    for (idx, seg) in segmentations.iter().enumerate() {
        let color = cmap.sample(idx as f64 / span);
        for c in &seg.components {
            draw_closed(&mut img, &c.contour, color);
        }
    }
    img
}

/// Draw the anatomy outline on an already rendered map.
pub fn overlay_outline(img: &mut RgbImage, outline: &[(usize, usize)]) {
    draw_closed(img, outline, Rgb([255, 255, 255]));
}

/// Per-subject summary of the explored footprint.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FootprintMetrics {
    pub total_explored_area: f64,
    pub circularity: f64,
    pub dispersion_x: f64,
    pub dispersion_y: f64,
    pub dispersion: f64,
    pub centroid_path_length: f64,
    pub net_displacement: f64,
}

impl FootprintMetrics {
    pub const COLUMNS: [&'static str; 7] = [
        "total_explored_area",
        "footprint_circularity",
        "dispersion_x",
        "dispersion_y",
        "dispersion",
        "centroid_path_length",
        "net_displacement",
    ];

    pub fn values(&self) -> [f64; 7] {
        [
            self.total_explored_area,
            self.circularity,
            self.dispersion_x,
            self.dispersion_y,
            self.dispersion,
            self.centroid_path_length,
            self.net_displacement,
        ]
    }

    pub fn compute(map: &PersistenceMap, segmentations: &[TimePointSegmentation]) -> Self {
        let explored = map.explored();
        let xs: Vec<f64> = explored.coords().map(|(x, _)| x as f64).collect();
        let ys: Vec<f64> = explored.coords().map(|(_, y)| y as f64).collect();
        let comps = segment::components(&explored, 1);
        let area: f64 = comps.iter().map(|c| c.area() as f64).sum();
        let perimeter: f64 = comps.iter().map(|c| c.perimeter).sum();
        let dx = stats::population_variance(&xs).unwrap_or(0.0).sqrt();
        let dy = stats::population_variance(&ys).unwrap_or(0.0).sqrt();

        let centroids: Vec<(f64, f64)> = segmentations.iter().filter_map(|s| s.centroid()).collect();
        let path = centroids
            .windows(2)
            .map(|w| (w[1].0 - w[0].0).hypot(w[1].1 - w[0].1))
            .sum();
        let net = match (centroids.first(), centroids.last()) {
            (Some(a), Some(b)) => (b.0 - a.0).hypot(b.1 - a.1),
            _ => 0.0,
        };
        Self {
            total_explored_area: explored.count() as f64,
            circularity: segment::circularity(area, perimeter),
            dispersion_x: dx,
            dispersion_y: dy,
            dispersion: dx.hypot(dy),
            centroid_path_length: path,
            net_displacement: net,
        }
    }
}

/// All signal-path products for one subject.
#[derive(Debug, Clone)]
pub struct SignalPath {
    pub segmentations: Vec<TimePointSegmentation>,
    pub persistence: PersistenceMap,
    pub outline: Option<Vec<(usize, usize)>>,
    pub metrics: FootprintMetrics,
}

/// Analyze registered, equally sized frames in time order.
pub fn analyze(
    times: &[u32],
    structural: &[&Frame],
    signal: &[&Frame],
    config: &SegmentationConfig,
) -> Result<SignalPath> {
    if times.len() != signal.len() || structural.len() != signal.len() {
        return Err(Error::InputMalformed(
            "signal path needs one structural and one signal frame per time point".into(),
        ));
    }
    let first = signal.first().ok_or(Error::InsufficientData {
        required: 1,
        available: 0,
    })?;
    let (w, h) = first.dims();
    for frame in structural.iter().chain(signal) {
        if frame.dims() != (w, h) {
            return Err(Error::Dimension {
                expected: (w, h),
                actual: frame.dims(),
            });
        }
    }
    let segmentations: Vec<TimePointSegmentation> = times
        .iter()
        .zip(signal)
        .map(|(&t, f)| segment_time_point(f, t, config))
        .collect();
    let persistence = PersistenceMap::build(&segmentations, w, h)?;
    let metrics = FootprintMetrics::compute(&persistence, &segmentations);
    Ok(SignalPath {
        outline: anatomical_outline(structural),
        segmentations,
        persistence,
        metrics,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spot(cx: usize, cy: usize, r: usize) -> Frame {
        Frame::from_fn(32, 32, |x, y| {
            let d2 = (x as i64 - cx as i64).pow(2) + (y as i64 - cy as i64).pow(2);
            if d2 <= (r * r) as i64 {
                500.0
            } else {
                20.0
            }
        })
    }

    #[test]
    fn persistence_keeps_earliest_index() {
        let config = SegmentationConfig {
            min_area: 1,
            ..Default::default()
        };
        let frames = [spot(10, 10, 3), spot(12, 10, 3), Frame::filled(32, 32, 5.0)];
        let refs: Vec<&Frame> = frames.iter().collect();
        let path = analyze(&[0, 30, 60], &refs, &refs, &config).unwrap();
        assert!(path.segmentations[2].is_empty());
        assert_eq!(path.persistence.earliest_time(10, 10), Some(0));
        assert_eq!(path.persistence.earliest_time(15, 10), Some(30));
        assert_eq!(path.persistence.earliest_time(0, 0), None);
        assert!((path.metrics.centroid_path_length - 2.0).abs() < 1e-9);
        assert!((path.metrics.net_displacement - 2.0).abs() < 1e-9);
        assert!(path.metrics.total_explored_area > 29.0);
    }

    #[test]
    fn phase_map_is_additive() {
        let config = SegmentationConfig {
            min_area: 1,
            ..Default::default()
        };
        let segs: Vec<TimePointSegmentation> = [spot(8, 8, 2), spot(8, 8, 2)]
            .iter()
            .enumerate()
            .map(|(i, f)| segment_time_point(f, i as u32, &config))
            .collect();
        let img = render_phase_map(&segs, 32, 32, (1, 2));
        assert_eq!(img.get_pixel(8, 8), &Rgb([255, 255, 0]));
        assert_eq!(img.get_pixel(0, 0), &Rgb([0, 0, 0]));
    }

    #[test]
    fn mismatched_inputs_are_rejected() {
        let a = Frame::filled(4, 4, 1.0);
        let b = Frame::filled(5, 4, 1.0);
        let config = SegmentationConfig::default();
        assert!(analyze(&[0, 1], &[&a, &b], &[&a, &b], &config).is_err());
        assert!(analyze(&[0], &[&a], &[&a, &a], &config).is_err());
    }
}
