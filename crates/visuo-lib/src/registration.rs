//! Frame alignment: intra-series (to the first time point) or to a template.
//!
//! Estimation is coarse-to-fine. An integer shift comes from FFT
//! cross-correlation of the row and column intensity projections, then a
//! forward-additive Lucas-Kanade loop refines a translation or affine warp
//! on standardized intensities until the step or the correlation gain drops
//! below tolerance.

use log::debug;
use nalgebra::{DMatrix, DVector};
use realfft::num_complex::Complex;
use realfft::RealFftPlanner;
use serde::{Deserialize, Serialize};

use crate::error::{Degradation, Error, Result};
use crate::frame::Frame;

/// 2D affine map `p' = A p + t`, stored row-major as `[[a, b, tx], [c, d, ty]]`.
/// Registration transforms map moving-frame pixels onto the fixed frame.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Transform {
    pub matrix: [[f64; 3]; 2],
}

impl Default for Transform {
    fn default() -> Self {
        Self::identity()
    }
}

impl Transform {
    pub fn identity() -> Self {
        Self {
            matrix: [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0]],
        }
    }

    pub fn translation(tx: f64, ty: f64) -> Self {
        Self {
            matrix: [[1.0, 0.0, tx], [0.0, 1.0, ty]],
        }
    }

    pub fn offset(&self) -> (f64, f64) {
        (self.matrix[0][2], self.matrix[1][2])
    }

    pub fn apply(&self, x: f64, y: f64) -> (f64, f64) {
        let m = &self.matrix;
        (
            m[0][0] * x + m[0][1] * y + m[0][2],
            m[1][0] * x + m[1][1] * y + m[1][2],
        )
    }

    pub fn determinant(&self) -> f64 {
        let m = &self.matrix;
        m[0][0] * m[1][1] - m[0][1] * m[1][0]
    }

    pub fn inverse(&self) -> Option<Transform> {
        let det = self.determinant();
        if det.abs() < 1e-12 || !det.is_finite() {
            return None;
        }
        let [[a, b, tx], [c, d, ty]] = self.matrix;
        let (ia, ib, ic, id) = (d / det, -b / det, -c / det, a / det);
        Some(Transform {
            matrix: [
                [ia, ib, -(ia * tx + ib * ty)],
                [ic, id, -(ic * tx + id * ty)],
            ],
        })
    }

    /// `self ∘ other`: apply `other` first.
    pub fn compose(&self, other: &Transform) -> Transform {
        let a = &self.matrix;
        let b = &other.matrix;
        let mut out = [[0.0; 3]; 2];
        for (r, row) in out.iter_mut().enumerate() {
            row[0] = a[r][0] * b[0][0] + a[r][1] * b[1][0];
            row[1] = a[r][0] * b[0][1] + a[r][1] * b[1][1];
            row[2] = a[r][0] * b[0][2] + a[r][1] * b[1][2] + a[r][2];
        }
        Transform { matrix: out }
    }

    pub fn is_identity(&self, tol: f64) -> bool {
        let id = Transform::identity();
        self.matrix
            .iter()
            .flatten()
            .zip(id.matrix.iter().flatten())
            .all(|(a, b)| (a - b).abs() <= tol)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MotionModel {
    #[default]
    Translation,
    Affine,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RegistrationMode {
    None,
    #[default]
    Intra,
    Template,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistrationConfig {
    pub motion: MotionModel,
    pub max_iterations: usize,
    /// Minimum correlation gain per iteration before the loop counts as converged.
    pub tolerance: f64,
}

impl Default for RegistrationConfig {
    fn default() -> Self {
        Self {
            motion: MotionModel::Translation,
            max_iterations: 200,
            tolerance: 1e-6,
        }
    }
}

const STEP_EPSILON: f64 = 1e-3;
const MIN_OVERLAP: f64 = 0.1;

/// Estimate the transform that maps `moving` onto `fixed`.
pub fn estimate(fixed: &Frame, moving: &Frame, config: &RegistrationConfig) -> Result<Transform> {
    if fixed.dims() != moving.dims() {
        return Err(Error::Dimension {
            expected: fixed.dims(),
            actual: moving.dims(),
        });
    }
    if fixed.width < 4 || fixed.height < 4 {
        return Err(Error::Registration("frame too small to align".into()));
    }
    if fixed.data == moving.data {
        return Ok(Transform::identity());
    }
    let fixed = standardize(fixed);
    let moving = standardize(moving);
    let (gx, gy) = gradients(&moving);

    let (sx, sy) = coarse_shift(&fixed, &moving)?;
    let n_params = match config.motion {
        MotionModel::Translation => 2,
        MotionModel::Affine => 6,
    };
    // [a11 - 1, a21, a12, a22 - 1, tx, ty] around the frame center.
    let mut p = [0.0f64, 0.0, 0.0, 0.0, sx, sy];
    let cx = (fixed.width - 1) as f64 / 2.0;
    let cy = (fixed.height - 1) as f64 / 2.0;
    let radius = cx.max(cy).max(1.0);
    let stride = (fixed.width.max(fixed.height) / 256).max(1);
    let total = ((fixed.width / stride) * (fixed.height / stride)) as f64;
    let mut prev_corr = f64::NEG_INFINITY;

    for iter in 0..config.max_iterations {
        let mut h = DMatrix::<f64>::zeros(n_params, n_params);
        let mut b = DVector::<f64>::zeros(n_params);
        let mut ncc = Ncc::default();
        let mut sd = vec![0.0; n_params];

        for y in (0..fixed.height).step_by(stride) {
            for x in (0..fixed.width).step_by(stride) {
                let xc = x as f64 - cx;
                let yc = y as f64 - cy;
                let u = (1.0 + p[0]) * xc + p[2] * yc + p[4] + cx;
                let v = p[1] * xc + (1.0 + p[3]) * yc + p[5] + cy;
                let (Some(iw), Some(dx), Some(dy)) =
                    (moving.sample(u, v), gx.sample(u, v), gy.sample(u, v))
                else {
                    continue;
                };
                let f = fixed.get(x, y) as f64;
                ncc.add(f, iw);
                let err = f - iw;
                if n_params == 2 {
                    sd[0] = dx;
                    sd[1] = dy;
                } else {
                    sd.copy_from_slice(&[dx * xc, dy * xc, dx * yc, dy * yc, dx, dy]);
                }
                for i in 0..n_params {
                    b[i] += sd[i] * err;
                    for j in i..n_params {
                        h[(i, j)] += sd[i] * sd[j];
                    }
                }
            }
        }
        if (ncc.n as f64) < MIN_OVERLAP * total {
            return Err(Error::Registration(format!(
                "overlap fell to {} pixels",
                ncc.n
            )));
        }
        for i in 0..n_params {
            for j in 0..i {
                h[(i, j)] = h[(j, i)];
            }
        }
        let corr = ncc.value();
        let dp = h
            .lu()
            .solve(&b)
            .ok_or_else(|| Error::Registration("singular gradient system".into()))?;

        let step = if n_params == 2 {
            p[4] += dp[0];
            p[5] += dp[1];
            (dp[0] * dp[0] + dp[1] * dp[1]).sqrt()
        } else {
            let mut acc = 0.0;
            for i in 0..6 {
                p[i] += dp[i];
                let scale = if i < 4 { radius } else { 1.0 };
                acc += (dp[i] * scale).powi(2);
            }
            acc.sqrt()
        };
        if !step.is_finite() {
            return Err(Error::Registration("diverged".into()));
        }
        if step < STEP_EPSILON || (corr - prev_corr).abs() < config.tolerance {
            debug!("registration converged after {} iteration(s), ncc={:.4}", iter + 1, corr);
            return fixed_to_moving(&p, cx, cy)
                .inverse()
                .ok_or_else(|| Error::Registration("degenerate warp".into()));
        }
        prev_corr = corr;
    }
    Err(Error::Registration(format!(
        "no convergence within {} iterations",
        config.max_iterations
    )))
}

fn fixed_to_moving(p: &[f64; 6], cx: f64, cy: f64) -> Transform {
    let (a, b, c, d) = (1.0 + p[0], p[2], p[1], 1.0 + p[3]);
    Transform {
        matrix: [
            [a, b, cx - a * cx - b * cy + p[4]],
            [c, d, cy - c * cx - d * cy + p[5]],
        ],
    }
}

#[derive(Default)]
struct Ncc {
    n: usize,
    sa: f64,
    sb: f64,
    saa: f64,
    sbb: f64,
    sab: f64,
}

impl Ncc {
    fn add(&mut self, a: f64, b: f64) {
        self.n += 1;
        self.sa += a;
        self.sb += b;
        self.saa += a * a;
        self.sbb += b * b;
        self.sab += a * b;
    }

    fn value(&self) -> f64 {
        let n = self.n as f64;
        if n < 2.0 {
            return 0.0;
        }
        let cov = self.sab - self.sa * self.sb / n;
        let va = self.saa - self.sa * self.sa / n;
        let vb = self.sbb - self.sb * self.sb / n;
        if va <= 0.0 || vb <= 0.0 {
            0.0
        } else {
            cov / (va * vb).sqrt()
        }
    }
}

fn standardize(frame: &Frame) -> Frame {
    let mean = frame.mean();
    let var = frame
        .data
        .iter()
        .map(|&v| (v as f64 - mean).powi(2))
        .sum::<f64>()
        / frame.len().max(1) as f64;
    let sd = var.sqrt();
    let mut out = frame.clone();
    for v in &mut out.data {
        *v = if sd > 0.0 {
            ((*v as f64 - mean) / sd) as f32
        } else {
            0.0
        };
    }
    out
}

/// Central differences, one-sided at the border.
fn gradients(frame: &Frame) -> (Frame, Frame) {
    let (w, h) = frame.dims();
    let gx = Frame::from_fn(w, h, |x, y| {
        let l = x.saturating_sub(1);
        let r = (x + 1).min(w - 1);
        (frame.get(r, y) - frame.get(l, y)) / (r - l).max(1) as f32
    });
    let gy = Frame::from_fn(w, h, |x, y| {
        let u = y.saturating_sub(1);
        let d = (y + 1).min(h - 1);
        (frame.get(x, d) - frame.get(x, u)) / (d - u).max(1) as f32
    });
    (gx, gy)
}

/// Integer shift of `moving` relative to `fixed` from projection cross-correlation.
fn coarse_shift(fixed: &Frame, moving: &Frame) -> Result<(f64, f64)> {
    let (w, h) = fixed.dims();
    let cols = |f: &Frame| -> Vec<f64> {
        (0..w)
            .map(|x| (0..h).map(|y| f.get(x, y) as f64).sum())
            .collect()
    };
    let rows = |f: &Frame| -> Vec<f64> {
        (0..h)
            .map(|y| (0..w).map(|x| f.get(x, y) as f64).sum())
            .collect()
    };
    let sx = xcorr_lag(&cols(fixed), &cols(moving))?;
    let sy = xcorr_lag(&rows(fixed), &rows(moving))?;
    Ok((sx as f64, sy as f64))
}

fn xcorr_lag(a: &[f64], b: &[f64]) -> Result<i64> {
    let n = a.len();
    let len = (2 * n).next_power_of_two();
    let mut planner = RealFftPlanner::<f64>::new();
    let r2c = planner.plan_fft_forward(len);
    let c2r = planner.plan_fft_inverse(len);

    let spectrum = |signal: &[f64]| -> Result<Vec<Complex<f64>>> {
        let mean = signal.iter().sum::<f64>() / signal.len().max(1) as f64;
        let mut input = r2c.make_input_vec();
        for (slot, v) in input.iter_mut().zip(signal) {
            *slot = v - mean;
        }
        let mut out = r2c.make_output_vec();
        r2c.process(&mut input, &mut out)
            .map_err(|e| Error::Registration(e.to_string()))?;
        Ok(out)
    };
    let fa = spectrum(a)?;
    let fb = spectrum(b)?;
    let mut cross: Vec<Complex<f64>> = fa.iter().zip(&fb).map(|(x, y)| x.conj() * y).collect();
    if let Some(first) = cross.first_mut() {
        first.im = 0.0;
    }
    if let Some(last) = cross.last_mut() {
        last.im = 0.0;
    }
    let mut corr = c2r.make_output_vec();
    c2r.process(&mut cross, &mut corr)
        .map_err(|e| Error::Registration(e.to_string()))?;

    let max_lag = (n / 2) as i64;
    let mut best = (0i64, f64::NEG_INFINITY);
    for (k, &value) in corr.iter().enumerate() {
        let lag = if k > len / 2 { k as i64 - len as i64 } else { k as i64 };
        if lag.abs() >= max_lag {
            continue;
        }
        if value > best.1 || (value == best.1 && lag.abs() < best.0.abs()) {
            best = (lag, value);
        }
    }
    Ok(best.0)
}

/// Resample `moving` into the fixed frame: `out(q) = moving(T⁻¹ q)`, zero outside.
pub fn warp(moving: &Frame, transform: &Transform) -> Result<Frame> {
    if transform.is_identity(0.0) {
        return Ok(moving.clone());
    }
    let inv = transform
        .inverse()
        .ok_or_else(|| Error::Registration("transform is not invertible".into()))?;
    Ok(Frame::from_fn(moving.width, moving.height, |x, y| {
        let (u, v) = inv.apply(x as f64, y as f64);
        moving.sample(u, v).unwrap_or(0.0) as f32
    }))
}

/// Center a template into a `width` x `height` canvas, padding with zeros or cropping.
pub fn fit_template(template: &Frame, width: usize, height: usize) -> Frame {
    if template.dims() == (width, height) {
        return template.clone();
    }
    let ox = (width as i64 - template.width as i64) / 2;
    let oy = (height as i64 - template.height as i64) / 2;
    Frame::from_fn(width, height, |x, y| {
        let sx = x as i64 - ox;
        let sy = y as i64 - oy;
        if sx >= 0 && sy >= 0 && (sx as usize) < template.width && (sy as usize) < template.height {
            template.get(sx as usize, sy as usize)
        } else {
            0.0
        }
    })
}

/// Per-time-point transforms for one subject, plus any fallbacks taken.
#[derive(Debug, Clone, Default)]
pub struct SeriesRegistration {
    pub transforms: Vec<Transform>,
    pub fallbacks: Vec<Degradation>,
}

/// Align each structural frame of a series.
///
/// `frames` are `(time, structural)` in time order. Intra mode aligns to the
/// first frame; template mode additionally aligns that first frame to the
/// template and chains the two transforms. Estimation failures fall back to
/// the identity for that step.
pub fn register_series(
    subject: &str,
    frames: &[(u32, &Frame)],
    mode: RegistrationMode,
    template: Option<&Frame>,
    config: &RegistrationConfig,
) -> Result<SeriesRegistration> {
    let mut out = SeriesRegistration::default();
    let Some(&(first_time, reference)) = frames.first() else {
        return Ok(out);
    };
    if mode == RegistrationMode::None {
        out.transforms = vec![Transform::identity(); frames.len()];
        return Ok(out);
    }

    let mut fallback = |time: u32, err: &Error| {
        let event = Degradation::RegistrationFallback {
            subject: subject.to_string(),
            time,
            reason: err.to_string(),
        };
        event.log();
        out.fallbacks.push(event);
    };

    let to_template = match mode {
        RegistrationMode::Template => {
            let template = template.ok_or_else(|| {
                Error::InputMalformed("template registration requires a template image".into())
            })?;
            let fitted = fit_template(template, reference.width, reference.height);
            match estimate(&fitted, reference, config) {
                Ok(t) => t,
                Err(err) => {
                    fallback(first_time, &err);
                    Transform::identity()
                }
            }
        }
        _ => Transform::identity(),
    };

    let mut transforms = Vec::with_capacity(frames.len());
    for (idx, &(time, frame)) in frames.iter().enumerate() {
        let to_reference = if idx == 0 {
            Transform::identity()
        } else {
            match estimate(reference, frame, config) {
                Ok(t) => t,
                Err(err) => {
                    fallback(time, &err);
                    Transform::identity()
                }
            }
        };
        transforms.push(to_template.compose(&to_reference));
    }
    out.transforms = transforms;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn blobs(cx: f64, cy: f64) -> Frame {
        Frame::from_fn(64, 64, |x, y| {
            let (x, y) = (x as f64, y as f64);
            let a = (-((x - cx).powi(2) + (y - cy).powi(2)) / 50.0).exp();
            let b = (-((x - cx - 9.0).powi(2) + (y - cy + 6.0).powi(2)) / 18.0).exp();
            (100.0 + 900.0 * a + 400.0 * b) as f32
        })
    }

    #[test]
    fn identical_frames_give_identity() {
        let frame = blobs(30.0, 30.0);
        let t = estimate(&frame, &frame, &RegistrationConfig::default()).unwrap();
        assert!(t.is_identity(1e-9));
    }

    #[test]
    fn recovers_known_shift() {
        let fixed = blobs(28.0, 30.0);
        let moving = blobs(33.0, 33.0);
        let t = estimate(&fixed, &moving, &RegistrationConfig::default()).unwrap();
        let (tx, ty) = t.offset();
        assert!((tx + 5.0).abs() < 0.5, "tx={tx}");
        assert!((ty + 3.0).abs() < 0.5, "ty={ty}");

        let aligned = warp(&moving, &t).unwrap();
        assert!((aligned.get(28, 30) - fixed.get(28, 30)).abs() < 5.0);
    }

    #[test]
    fn affine_model_also_recovers_shift() {
        let fixed = blobs(30.0, 30.0);
        let moving = blobs(32.0, 29.0);
        let config = RegistrationConfig {
            motion: MotionModel::Affine,
            ..Default::default()
        };
        let t = estimate(&fixed, &moving, &config).unwrap();
        let (tx, ty) = t.apply(30.0, 30.0);
        assert!((tx - 28.0).abs() < 0.5 && (ty - 31.0).abs() < 0.5, "({tx}, {ty})");
    }

    #[test]
    fn inverse_and_compose_cancel() {
        let t = Transform {
            matrix: [[1.1, 0.2, 3.0], [-0.1, 0.9, -2.0]],
        };
        let inv = t.inverse().unwrap();
        assert!(t.compose(&inv).is_identity(1e-12));
    }

    #[test]
    fn template_is_centered() {
        let template = Frame::filled(2, 2, 7.0);
        let fitted = fit_template(&template, 4, 4);
        assert_eq!(fitted.get(1, 1), 7.0);
        assert_eq!(fitted.get(2, 2), 7.0);
        assert_eq!(fitted.get(0, 0), 0.0);
        let cropped = fit_template(&Frame::from_fn(6, 6, |x, _| x as f32), 2, 2);
        assert_eq!(cropped.get(0, 0), 2.0);
    }

    #[test]
    fn flat_frames_fall_back_to_identity() {
        let a = Frame::filled(16, 16, 1.0);
        let b = Frame::filled(16, 16, 2.0);
        let series = register_series(
            "s",
            &[(0, &a), (30, &b)],
            RegistrationMode::Intra,
            None,
            &RegistrationConfig::default(),
        )
        .unwrap();
        assert_eq!(series.transforms.len(), 2);
        assert!(series.transforms[1].is_identity(0.0));
        assert_eq!(series.fallbacks.len(), 1);
    }
}
