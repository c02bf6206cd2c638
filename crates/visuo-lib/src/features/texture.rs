//! Gray-level co-occurrence and size-zone texture matrices.

use crate::frame::{Frame, Mask};

/// Gray levels of a masked image, `0` outside the mask and `1..=levels` inside.
pub struct Quantized {
    pub width: usize,
    pub height: usize,
    pub levels: usize,
    pub data: Vec<u16>,
}

impl Quantized {
    /// Equal-width binning over the masked intensity range.
    pub fn by_range(image: &Frame, mask: &Mask, levels: usize) -> Self {
        let levels = levels.clamp(1, u16::MAX as usize);
        let (mut lo, mut hi) = (f64::INFINITY, f64::NEG_INFINITY);
        for (&v, &m) in image.data.iter().zip(&mask.data) {
            if m && v.is_finite() {
                lo = lo.min(v as f64);
                hi = hi.max(v as f64);
            }
        }
        let width = if hi > lo { (hi - lo) / levels as f64 } else { 1.0 };
        Self::map(image, mask, levels, |v| {
            (((v - lo) / width) as usize).min(levels - 1) + 1
        })
    }

    /// Fixed mapping of 16-bit counts onto 256 levels.
    pub fn sixteen_to_eight_bit(image: &Frame, mask: &Mask) -> Self {
        Self::map(image, mask, 256, |v| {
            (v.clamp(0.0, 65535.0) / 65536.0 * 255.0) as usize + 1
        })
    }

    fn map(image: &Frame, mask: &Mask, levels: usize, f: impl Fn(f64) -> usize) -> Self {
        let data = image
            .data
            .iter()
            .zip(&mask.data)
            .map(|(&v, &m)| if m && v.is_finite() { f(v as f64) as u16 } else { 0 })
            .collect();
        Self {
            width: image.width,
            height: image.height,
            levels,
            data,
        }
    }

    #[inline]
    fn at(&self, x: i64, y: i64) -> u16 {
        if x < 0 || y < 0 || x >= self.width as i64 || y >= self.height as i64 {
            0
        } else {
            self.data[y as usize * self.width + x as usize]
        }
    }
}

/// The four unique in-plane neighbor directions at distance one.
pub const ALL_DIRECTIONS: [(i64, i64); 4] = [(1, 0), (1, 1), (0, 1), (-1, 1)];

/// Normalized symmetric co-occurrence matrix for one offset. `None` without pairs.
pub fn cooccurrence(q: &Quantized, offset: (i64, i64)) -> Option<Vec<f64>> {
    let n = q.levels;
    let mut p = vec![0.0; n * n];
    let mut total = 0.0;
    for y in 0..q.height as i64 {
        for x in 0..q.width as i64 {
            let a = q.at(x, y);
            let b = q.at(x + offset.0, y + offset.1);
            if a == 0 || b == 0 {
                continue;
            }
            let (i, j) = (a as usize - 1, b as usize - 1);
            p[i * n + j] += 1.0;
            p[j * n + i] += 1.0;
            total += 2.0;
        }
    }
    if total == 0.0 {
        return None;
    }
    for v in &mut p {
        *v /= total;
    }
    Some(p)
}

/// Co-occurrence statistics (gray levels counted from 1).
#[derive(Debug, Clone, Default)]
pub struct GlcmStats {
    pub autocorrelation: f64,
    pub cluster_prominence: f64,
    pub cluster_shade: f64,
    pub cluster_tendency: f64,
    pub contrast: f64,
    pub correlation: f64,
    pub difference_average: f64,
    pub difference_entropy: f64,
    pub id: f64,
    pub idm: f64,
    pub joint_average: f64,
    pub joint_energy: f64,
    pub joint_entropy: f64,
    pub maximum_probability: f64,
    pub sum_squares: f64,
}

impl GlcmStats {
    pub fn from_matrix(p: &[f64], n: usize) -> Self {
        let mut s = GlcmStats::default();
        let mut px = vec![0.0; n];
        for i in 0..n {
            for j in 0..n {
                px[i] += p[i * n + j];
            }
        }
        // Symmetric matrix: marginals coincide.
        let mu: f64 = px.iter().enumerate().map(|(i, v)| (i + 1) as f64 * v).sum();
        let var: f64 = px
            .iter()
            .enumerate()
            .map(|(i, v)| ((i + 1) as f64 - mu).powi(2) * v)
            .sum();
        let mut diff = vec![0.0; n];
        for i in 0..n {
            for j in 0..n {
                let v = p[i * n + j];
                if v == 0.0 {
                    continue;
                }
                let (fi, fj) = ((i + 1) as f64, (j + 1) as f64);
                let d = fi - fj;
                let cross = fi + fj - 2.0 * mu;
                s.autocorrelation += fi * fj * v;
                s.cluster_prominence += cross.powi(4) * v;
                s.cluster_shade += cross.powi(3) * v;
                s.cluster_tendency += cross.powi(2) * v;
                s.contrast += d * d * v;
                s.id += v / (1.0 + d.abs());
                s.idm += v / (1.0 + d * d);
                s.joint_energy += v * v;
                s.joint_entropy -= v * v.log2();
                s.maximum_probability = s.maximum_probability.max(v);
                diff[i.abs_diff(j)] += v;
            }
        }
        for (k, &v) in diff.iter().enumerate() {
            if v > 0.0 {
                s.difference_average += k as f64 * v;
                s.difference_entropy -= v * v.log2();
            }
        }
        s.joint_average = mu;
        s.sum_squares = var;
        s.correlation = if var > 0.0 {
            (s.autocorrelation - mu * mu) / var
        } else {
            1.0
        };
        s
    }

    pub fn named(&self) -> Vec<(&'static str, f64)> {
        vec![
            ("Autocorrelation", self.autocorrelation),
            ("ClusterProminence", self.cluster_prominence),
            ("ClusterShade", self.cluster_shade),
            ("ClusterTendency", self.cluster_tendency),
            ("Contrast", self.contrast),
            ("Correlation", self.correlation),
            ("DifferenceAverage", self.difference_average),
            ("DifferenceEntropy", self.difference_entropy),
            ("Id", self.id),
            ("Idm", self.idm),
            ("JointAverage", self.joint_average),
            ("JointEnergy", self.joint_energy),
            ("JointEntropy", self.joint_entropy),
            ("MaximumProbability", self.maximum_probability),
            ("SumSquares", self.sum_squares),
        ]
    }
}

/// Mean of the per-direction statistics over directions that have pairs.
pub fn glcm_averaged(q: &Quantized, directions: &[(i64, i64)]) -> Option<Vec<(&'static str, f64)>> {
    let per_dir: Vec<Vec<(&'static str, f64)>> = directions
        .iter()
        .filter_map(|&d| cooccurrence(q, d))
        .map(|p| GlcmStats::from_matrix(&p, q.levels).named())
        .collect();
    let first = per_dir.first()?;
    let k = per_dir.len() as f64;
    Some(
        first
            .iter()
            .enumerate()
            .map(|(idx, (name, _))| (*name, per_dir.iter().map(|d| d[idx].1).sum::<f64>() / k))
            .collect(),
    )
}

/// Size-zone statistics over 8-connected zones of equal gray level.
#[derive(Debug, Clone, Default)]
pub struct GlszmStats {
    pub gray_level_non_uniformity: f64,
    pub gray_level_variance: f64,
    pub high_gray_level_zone_emphasis: f64,
    pub large_area_emphasis: f64,
    pub low_gray_level_zone_emphasis: f64,
    pub size_zone_non_uniformity: f64,
    pub small_area_emphasis: f64,
    pub zone_entropy: f64,
    pub zone_percentage: f64,
    pub zone_variance: f64,
}

/// `(gray level, zone size)` for every zone in the region.
pub fn zones(q: &Quantized) -> Vec<(u16, usize)> {
    let (w, h) = (q.width, q.height);
    let mut seen = vec![false; w * h];
    let mut out = Vec::new();
    for start in 0..w * h {
        let level = q.data[start];
        if level == 0 || seen[start] {
            continue;
        }
        seen[start] = true;
        let mut stack = vec![start];
        let mut size = 0;
        while let Some(idx) = stack.pop() {
            size += 1;
            let (x, y) = ((idx % w) as i64, (idx / w) as i64);
            for dy in -1..=1 {
                for dx in -1..=1 {
                    if dx == 0 && dy == 0 {
                        continue;
                    }
                    let (nx, ny) = (x + dx, y + dy);
                    if q.at(nx, ny) != level {
                        continue;
                    }
                    let n = ny as usize * w + nx as usize;
                    if !seen[n] {
                        seen[n] = true;
                        stack.push(n);
                    }
                }
            }
        }
        out.push((level, size));
    }
    out
}

impl GlszmStats {
    pub fn compute(q: &Quantized) -> Option<Self> {
        let zones = zones(q);
        if zones.is_empty() {
            return None;
        }
        let nz = zones.len() as f64;
        let np = q.data.iter().filter(|&&l| l != 0).count() as f64;
        let max_size = zones.iter().map(|z| z.1).max().unwrap_or(1);
        let mut by_level = vec![0.0; q.levels + 1];
        let mut by_size = vec![0.0; max_size + 1];
        let mut joint = std::collections::BTreeMap::<(u16, usize), f64>::new();
        let mut s = GlszmStats::default();
        for &(level, size) in &zones {
            let (i, j) = (level as f64, size as f64);
            by_level[level as usize] += 1.0;
            by_size[size] += 1.0;
            *joint.entry((level, size)).or_default() += 1.0;
            s.small_area_emphasis += 1.0 / (j * j);
            s.large_area_emphasis += j * j;
            s.low_gray_level_zone_emphasis += 1.0 / (i * i);
            s.high_gray_level_zone_emphasis += i * i;
        }
        s.small_area_emphasis /= nz;
        s.large_area_emphasis /= nz;
        s.low_gray_level_zone_emphasis /= nz;
        s.high_gray_level_zone_emphasis /= nz;
        s.gray_level_non_uniformity = by_level.iter().map(|c| c * c).sum::<f64>() / nz;
        s.size_zone_non_uniformity = by_size.iter().map(|c| c * c).sum::<f64>() / nz;
        s.zone_percentage = nz / np;

        let (mut mu_i, mut mu_j) = (0.0, 0.0);
        for (&(level, size), &count) in &joint {
            let p = count / nz;
            mu_i += level as f64 * p;
            mu_j += size as f64 * p;
        }
        for (&(level, size), &count) in &joint {
            let p = count / nz;
            s.gray_level_variance += p * (level as f64 - mu_i).powi(2);
            s.zone_variance += p * (size as f64 - mu_j).powi(2);
            s.zone_entropy -= p * p.log2();
        }
        Some(s)
    }

    pub fn named(&self) -> Vec<(&'static str, f64)> {
        vec![
            ("GrayLevelNonUniformity", self.gray_level_non_uniformity),
            ("GrayLevelVariance", self.gray_level_variance),
            ("HighGrayLevelZoneEmphasis", self.high_gray_level_zone_emphasis),
            ("LargeAreaEmphasis", self.large_area_emphasis),
            ("LowGrayLevelZoneEmphasis", self.low_gray_level_zone_emphasis),
            ("SizeZoneNonUniformity", self.size_zone_non_uniformity),
            ("SmallAreaEmphasis", self.small_area_emphasis),
            ("ZoneEntropy", self.zone_entropy),
            ("ZonePercentage", self.zone_percentage),
            ("ZoneVariance", self.zone_variance),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn checker() -> (Frame, Mask) {
        let frame = Frame::from_fn(4, 4, |x, y| if (x + y) % 2 == 0 { 0.0 } else { 10.0 });
        (frame, Mask::full(4, 4))
    }

    #[test]
    fn horizontal_checkerboard_contrast() {
        let (frame, mask) = checker();
        let q = Quantized::by_range(&frame, &mask, 2);
        let p = cooccurrence(&q, (1, 0)).unwrap();
        let stats = GlcmStats::from_matrix(&p, 2);
        assert!((stats.contrast - 1.0).abs() < 1e-12);
        assert!((stats.idm - 0.5).abs() < 1e-12);
        assert!((stats.joint_energy - 0.5).abs() < 1e-12);
    }

    #[test]
    fn uniform_region_is_one_zone() {
        let frame = Frame::filled(5, 5, 42.0);
        let q = Quantized::by_range(&frame, &Mask::full(5, 5), 32);
        let z = zones(&q);
        assert_eq!(z, vec![(1, 25)]);
        let stats = GlszmStats::compute(&q).unwrap();
        assert_eq!(stats.zone_percentage, 1.0 / 25.0);
        assert_eq!(stats.zone_entropy, 0.0);
    }

    #[test]
    fn checkerboard_levels_connect_diagonally() {
        let (frame, mask) = checker();
        let q = Quantized::by_range(&frame, &mask, 2);
        assert_eq!(zones(&q).len(), 2);
    }
}
