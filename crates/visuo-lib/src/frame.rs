use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Single-channel intensity image, row-major.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub width: usize,
    pub height: usize,
    pub data: Vec<f32>,
}

impl Frame {
    pub fn new(width: usize, height: usize) -> Self {
        Self::filled(width, height, 0.0)
    }

    pub fn filled(width: usize, height: usize, value: f32) -> Self {
        Self {
            width,
            height,
            data: vec![value; width * height],
        }
    }

    pub fn from_vec(width: usize, height: usize, data: Vec<f32>) -> Result<Self> {
        if data.len() != width * height {
            return Err(Error::InputMalformed(format!(
                "buffer of {} samples does not match {}x{}",
                data.len(),
                width,
                height
            )));
        }
        Ok(Self {
            width,
            height,
            data,
        })
    }

    pub fn from_fn(width: usize, height: usize, f: impl Fn(usize, usize) -> f32) -> Self {
        let mut data = Vec::with_capacity(width * height);
        for y in 0..height {
            for x in 0..width {
                data.push(f(x, y));
            }
        }
        Self {
            width,
            height,
            data,
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn dims(&self) -> (usize, usize) {
        (self.width, self.height)
    }

    #[inline]
    pub fn get(&self, x: usize, y: usize) -> f32 {
        self.data[y * self.width + x]
    }

    #[inline]
    pub fn set(&mut self, x: usize, y: usize, value: f32) {
        self.data[y * self.width + x] = value;
    }

    /// Bilinear sample at continuous pixel coordinates; `None` outside the frame.
    pub fn sample(&self, x: f64, y: f64) -> Option<f64> {
        if self.is_empty() || x < 0.0 || y < 0.0 {
            return None;
        }
        let max_x = (self.width - 1) as f64;
        let max_y = (self.height - 1) as f64;
        if x > max_x || y > max_y {
            return None;
        }
        let x0 = x.floor() as usize;
        let y0 = y.floor() as usize;
        let x1 = (x0 + 1).min(self.width - 1);
        let y1 = (y0 + 1).min(self.height - 1);
        let fx = x - x0 as f64;
        let fy = y - y0 as f64;
        let top = self.get(x0, y0) as f64 * (1.0 - fx) + self.get(x1, y0) as f64 * fx;
        let bottom = self.get(x0, y1) as f64 * (1.0 - fx) + self.get(x1, y1) as f64 * fx;
        Some(top * (1.0 - fy) + bottom * fy)
    }

    pub fn min_max(&self) -> (f32, f32) {
        let mut lo = f32::INFINITY;
        let mut hi = f32::NEG_INFINITY;
        for &v in &self.data {
            if v.is_finite() {
                lo = lo.min(v);
                hi = hi.max(v);
            }
        }
        if lo > hi {
            (0.0, 0.0)
        } else {
            (lo, hi)
        }
    }

    pub fn mean(&self) -> f64 {
        if self.is_empty() {
            return 0.0;
        }
        self.data.iter().map(|&v| v as f64).sum::<f64>() / self.len() as f64
    }

    /// Copy out the part of the frame covered by `rect` (clamped to the frame).
    pub fn crop(&self, rect: &Rect) -> Frame {
        let r = rect.clamp_to(self.width, self.height);
        Frame::from_fn(r.width, r.height, |x, y| self.get(r.x + x, r.y + y))
    }

    /// Pixel-wise mean of equally sized frames.
    pub fn average(frames: &[&Frame]) -> Option<Frame> {
        let first = frames.first()?;
        if frames.iter().any(|f| f.dims() != first.dims()) {
            return None;
        }
        let mut acc = vec![0.0f64; first.len()];
        for frame in frames {
            for (a, &v) in acc.iter_mut().zip(frame.data.iter()) {
                *a += v as f64;
            }
        }
        let n = frames.len() as f64;
        Some(Frame {
            width: first.width,
            height: first.height,
            data: acc.into_iter().map(|v| (v / n) as f32).collect(),
        })
    }
}

/// Binary pixel mask sharing a frame's geometry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mask {
    pub width: usize,
    pub height: usize,
    pub data: Vec<bool>,
}

impl Mask {
    pub fn new(width: usize, height: usize) -> Self {
        Self {
            width,
            height,
            data: vec![false; width * height],
        }
    }

    pub fn full(width: usize, height: usize) -> Self {
        Self {
            width,
            height,
            data: vec![true; width * height],
        }
    }

    #[inline]
    pub fn get(&self, x: usize, y: usize) -> bool {
        self.data[y * self.width + x]
    }

    #[inline]
    pub fn set(&mut self, x: usize, y: usize, value: bool) {
        self.data[y * self.width + x] = value;
    }

    pub fn count(&self) -> usize {
        self.data.iter().filter(|&&v| v).count()
    }

    pub fn is_blank(&self) -> bool {
        !self.data.iter().any(|&v| v)
    }

    pub fn dims(&self) -> (usize, usize) {
        (self.width, self.height)
    }

    /// Coordinates of set pixels in raster order.
    pub fn coords(&self) -> impl Iterator<Item = (usize, usize)> + '_ {
        let w = self.width;
        self.data
            .iter()
            .enumerate()
            .filter(|(_, &v)| v)
            .map(move |(i, _)| (i % w, i / w))
    }

    pub fn combine(&self, other: &Mask, op: impl Fn(bool, bool) -> bool) -> Result<Mask> {
        if self.dims() != other.dims() {
            return Err(Error::Dimension {
                expected: self.dims(),
                actual: other.dims(),
            });
        }
        Ok(Mask {
            width: self.width,
            height: self.height,
            data: self
                .data
                .iter()
                .zip(other.data.iter())
                .map(|(&a, &b)| op(a, b))
                .collect(),
        })
    }

    pub fn crop(&self, rect: &Rect) -> Mask {
        let r = rect.clamp_to(self.width, self.height);
        let mut out = Mask::new(r.width, r.height);
        for y in 0..r.height {
            for x in 0..r.width {
                out.set(x, y, self.get(r.x + x, r.y + y));
            }
        }
        out
    }
}

/// Axis-aligned pixel rectangle in acquisition space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Rect {
    pub x: usize,
    pub y: usize,
    pub width: usize,
    pub height: usize,
}

impl Rect {
    pub fn new(x: usize, y: usize, width: usize, height: usize) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn full(width: usize, height: usize) -> Self {
        Self::new(0, 0, width, height)
    }

    pub fn clamp_to(&self, width: usize, height: usize) -> Rect {
        let x = self.x.min(width);
        let y = self.y.min(height);
        Rect {
            x,
            y,
            width: self.width.min(width - x),
            height: self.height.min(height - y),
        }
    }

    pub fn contains(&self, x: usize, y: usize) -> bool {
        x >= self.x && y >= self.y && x < self.x + self.width && y < self.y + self.height
    }

    pub fn area(&self) -> usize {
        self.width * self.height
    }
}

/// The two co-registered channels of an acquisition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    /// Broadband anatomy (white field).
    Structural,
    /// Narrowband signal (fluorescence).
    Signal,
}

impl Channel {
    pub fn from_token(token: &str) -> Option<Self> {
        match token.to_ascii_uppercase().as_str() {
            "WF" => Some(Channel::Structural),
            "FL" => Some(Channel::Signal),
            _ => None,
        }
    }

    pub fn token(&self) -> &'static str {
        match self {
            Channel::Structural => "WF",
            Channel::Signal => "FL",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bilinear_sample_interpolates_between_pixels() {
        let frame = Frame::from_fn(2, 2, |x, y| (x + 2 * y) as f32);
        assert_eq!(frame.sample(0.5, 0.0), Some(0.5));
        assert_eq!(frame.sample(0.5, 0.5), Some(1.5));
        assert!(frame.sample(1.5, 0.0).is_none());
    }

    #[test]
    fn crop_clamps_to_frame() {
        let frame = Frame::from_fn(4, 3, |x, y| (y * 4 + x) as f32);
        let cropped = frame.crop(&Rect::new(2, 1, 10, 10));
        assert_eq!(cropped.dims(), (2, 2));
        assert_eq!(cropped.get(0, 0), 6.0);
        assert_eq!(cropped.get(1, 1), 11.0);
    }

    #[test]
    fn channel_tokens_are_case_insensitive() {
        assert_eq!(Channel::from_token("wf"), Some(Channel::Structural));
        assert_eq!(Channel::from_token("FL"), Some(Channel::Signal));
        assert_eq!(Channel::from_token("BF"), None);
    }
}
