//! Global thresholding, connected components and boundary tracing.

use crate::frame::{Frame, Mask, Rect};

const BINS: usize = 256;

/// Otsu threshold over finite values, in intensity units. `None` for flat input.
pub fn otsu_threshold<I>(values: I) -> Option<f64>
where
    I: IntoIterator<Item = f32>,
{
    let values: Vec<f64> = values
        .into_iter()
        .filter(|v| v.is_finite())
        .map(f64::from)
        .collect();
    let lo = values.iter().copied().fold(f64::INFINITY, f64::min);
    let hi = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if !(hi > lo) {
        return None;
    }
    let width = (hi - lo) / BINS as f64;
    let mut hist = [0usize; BINS];
    for v in &values {
        let bin = (((v - lo) / width) as usize).min(BINS - 1);
        hist[bin] += 1;
    }

    let total = values.len() as f64;
    let sum_all: f64 = hist.iter().enumerate().map(|(i, &c)| i as f64 * c as f64).sum();
    let (mut w0, mut sum0) = (0.0, 0.0);
    let (mut best_t, mut best_var) = (0usize, -1.0);
    for (t, &count) in hist.iter().enumerate().take(BINS - 1) {
        w0 += count as f64;
        sum0 += t as f64 * count as f64;
        let w1 = total - w0;
        if w0 == 0.0 || w1 == 0.0 {
            continue;
        }
        let m0 = sum0 / w0;
        let m1 = (sum_all - sum0) / w1;
        let between = w0 * w1 * (m0 - m1).powi(2);
        if between > best_var {
            best_var = between;
            best_t = t;
        }
    }
    Some(lo + (best_t + 1) as f64 * width)
}

/// Pixels strictly above `otsu * boost`. Flat frames give an empty mask.
pub fn threshold_mask(frame: &Frame, boost: f64) -> Mask {
    let mut mask = Mask::new(frame.width, frame.height);
    let Some(otsu) = otsu_threshold(frame.data.iter().copied()) else {
        return mask;
    };
    let cut = otsu * boost;
    for (dst, &v) in mask.data.iter_mut().zip(&frame.data) {
        *dst = (v as f64) > cut;
    }
    mask
}

/// One 8-connected foreground blob.
#[derive(Debug, Clone, PartialEq)]
pub struct Component {
    pub pixels: Vec<(usize, usize)>,
    pub centroid: (f64, f64),
    pub bbox: Rect,
    /// Closed outer boundary, clockwise from the top-left pixel.
    pub contour: Vec<(usize, usize)>,
    pub perimeter: f64,
}

impl Component {
    pub fn area(&self) -> usize {
        self.pixels.len()
    }

    /// `4π A / P²`; zero when the perimeter is degenerate.
    pub fn circularity(&self) -> f64 {
        circularity(self.area() as f64, self.perimeter)
    }

    pub fn to_mask(&self, width: usize, height: usize) -> Mask {
        let mut mask = Mask::new(width, height);
        for &(x, y) in &self.pixels {
            mask.set(x, y, true);
        }
        mask
    }
}

pub fn circularity(area: f64, perimeter: f64) -> f64 {
    if perimeter <= 0.0 {
        0.0
    } else {
        4.0 * std::f64::consts::PI * area / (perimeter * perimeter)
    }
}

const NEIGHBORS: [(i64, i64); 8] = [
    (-1, 0),
    (-1, -1),
    (0, -1),
    (1, -1),
    (1, 0),
    (1, 1),
    (0, 1),
    (-1, 1),
];

/// Components with at least `min_area` pixels, in raster order of their first pixel.
pub fn components(mask: &Mask, min_area: usize) -> Vec<Component> {
    let (w, h) = mask.dims();
    let mut labels = vec![0u32; w * h];
    let mut next = 0u32;
    let mut out = Vec::new();
    for start in 0..w * h {
        if !mask.data[start] || labels[start] != 0 {
            continue;
        }
        next += 1;
        labels[start] = next;
        let mut stack = vec![start];
        let mut pixels = Vec::new();
        while let Some(idx) = stack.pop() {
            let (x, y) = (idx % w, idx / w);
            pixels.push((x, y));
            for (dx, dy) in NEIGHBORS {
                let (nx, ny) = (x as i64 + dx, y as i64 + dy);
                if nx < 0 || ny < 0 || nx >= w as i64 || ny >= h as i64 {
                    continue;
                }
                let n = ny as usize * w + nx as usize;
                if mask.data[n] && labels[n] == 0 {
                    labels[n] = next;
                    stack.push(n);
                }
            }
        }
        if pixels.len() < min_area.max(1) {
            continue;
        }
        pixels.sort_by_key(|&(x, y)| (y, x));
        let label = next;
        let inside = |x: i64, y: i64| {
            x >= 0 && y >= 0 && x < w as i64 && y < h as i64 && labels[y as usize * w + x as usize] == label
        };
        let contour = trace_boundary(pixels[0], inside, pixels.len());
        out.push(describe(pixels, contour));
    }
    out
}

fn describe(pixels: Vec<(usize, usize)>, contour: Vec<(usize, usize)>) -> Component {
    let n = pixels.len() as f64;
    let (sx, sy) = pixels
        .iter()
        .fold((0.0, 0.0), |(sx, sy), &(x, y)| (sx + x as f64, sy + y as f64));
    let (mut x0, mut y0, mut x1, mut y1) = (usize::MAX, usize::MAX, 0, 0);
    for &(x, y) in &pixels {
        x0 = x0.min(x);
        y0 = y0.min(y);
        x1 = x1.max(x);
        y1 = y1.max(y);
    }
    let perimeter = closed_length(&contour);
    Component {
        centroid: (sx / n, sy / n),
        bbox: Rect::new(x0, y0, x1 - x0 + 1, y1 - y0 + 1),
        contour,
        perimeter,
        pixels,
    }
}

fn closed_length(contour: &[(usize, usize)]) -> f64 {
    if contour.len() < 2 {
        return 0.0;
    }
    let mut len = 0.0;
    for i in 0..contour.len() {
        let (ax, ay) = contour[i];
        let (bx, by) = contour[(i + 1) % contour.len()];
        let diagonal = ax != bx && ay != by;
        len += if diagonal { std::f64::consts::SQRT_2 } else { 1.0 };
    }
    len
}

fn direction(dx: i64, dy: i64) -> usize {
    NEIGHBORS
        .iter()
        .position(|&d| d == (dx, dy))
        .unwrap_or(0)
}

/// Moore-neighbor tracing. `start` must be the first pixel of the blob in
/// raster order, so its west neighbor is background.
fn trace_boundary(
    start: (usize, usize),
    inside: impl Fn(i64, i64) -> bool,
    area: usize,
) -> Vec<(usize, usize)> {
    let start = (start.0 as i64, start.1 as i64);
    let mut contour = vec![(start.0 as usize, start.1 as usize)];
    let start_back = 0usize;
    let (mut p, mut back) = (start, start_back);
    let cap = 4 * area + 16;
    for _ in 0..cap {
        let mut moved = false;
        for k in 1..=8 {
            let d = (back + k) % 8;
            let q = (p.0 + NEIGHBORS[d].0, p.1 + NEIGHBORS[d].1);
            if inside(q.0, q.1) {
                let prev = (back + k + 7) % 8;
                let c = (p.0 + NEIGHBORS[prev].0, p.1 + NEIGHBORS[prev].1);
                back = direction(c.0 - q.0, c.1 - q.1);
                p = q;
                moved = true;
                break;
            }
        }
        if !moved {
            break;
        }
        if p == start && back == start_back {
            break;
        }
        if p == start {
            // Entered the start from another side; keep walking.
            contour.push((p.0 as usize, p.1 as usize));
            continue;
        }
        contour.push((p.0 as usize, p.1 as usize));
    }
    if contour.len() > 1 && contour.last() == contour.first() {
        contour.pop();
    }
    contour
}

pub fn largest(components: &[Component]) -> Option<&Component> {
    components.iter().max_by_key(|c| c.area())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn square_mask(w: usize, h: usize, r: Rect) -> Mask {
        let mut mask = Mask::new(w, h);
        for y in r.y..r.y + r.height {
            for x in r.x..r.x + r.width {
                mask.set(x, y, true);
            }
        }
        mask
    }

    #[test]
    fn otsu_splits_bimodal_values() {
        let mut values = vec![10.0f32; 50];
        values.extend(vec![200.0f32; 50]);
        let t = otsu_threshold(values).unwrap();
        assert!(t > 10.0 && t < 200.0);
        assert!(otsu_threshold(vec![3.0f32; 10]).is_none());
    }

    #[test]
    fn square_boundary_and_perimeter() {
        let mask = square_mask(10, 10, Rect::new(2, 3, 4, 4));
        let comps = components(&mask, 1);
        assert_eq!(comps.len(), 1);
        let c = &comps[0];
        assert_eq!(c.area(), 16);
        assert_eq!(c.bbox, Rect::new(2, 3, 4, 4));
        assert_eq!(c.centroid, (3.5, 4.5));
        assert_eq!(c.contour.len(), 12);
        assert_eq!(c.contour[0], (2, 3));
        assert!((c.perimeter - 12.0).abs() < 1e-9);
    }

    #[test]
    fn min_area_drops_specks() {
        let mut mask = square_mask(12, 12, Rect::new(0, 0, 5, 5));
        mask.set(10, 10, true);
        assert_eq!(components(&mask, 2).len(), 1);
        let all = components(&mask, 1);
        assert_eq!(all.len(), 2);
        assert_eq!(all[1].contour, vec![(10, 10)]);
        assert_eq!(all[1].perimeter, 0.0);
    }

    #[test]
    fn flat_frame_segments_to_nothing() {
        let frame = Frame::filled(8, 8, 5.0);
        assert!(threshold_mask(&frame, 1.0).is_blank());
    }
}
