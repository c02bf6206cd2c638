//! Intensity histogram statistics over a masked region.

use crate::stats;

/// Width-based binning used by the entropy and uniformity terms.
pub const HISTOGRAM_BINS: usize = 32;

#[derive(Debug, Clone, Default)]
pub struct FirstOrder {
    pub energy: f64,
    pub entropy: f64,
    pub minimum: f64,
    pub p10: f64,
    pub p90: f64,
    pub maximum: f64,
    pub mean: f64,
    pub median: f64,
    pub interquartile_range: f64,
    pub range: f64,
    pub mean_absolute_deviation: f64,
    pub robust_mean_absolute_deviation: f64,
    pub root_mean_squared: f64,
    pub standard_deviation: f64,
    pub skewness: f64,
    pub kurtosis: f64,
    pub variance: f64,
    pub uniformity: f64,
}

impl FirstOrder {
    /// `values` must be non-empty and finite.
    pub fn compute(values: &[f64]) -> Option<Self> {
        let mean = stats::mean(values)?;
        let mut sorted = values.to_vec();
        sorted.sort_by(|a, b| a.total_cmp(b));
        let n = values.len() as f64;
        let pct = |q| stats::percentile_sorted(&sorted, q);
        let (p10, p90) = (pct(10.0), pct(90.0));
        let minimum = sorted[0];
        let maximum = sorted[sorted.len() - 1];
        let variance = stats::population_variance(values)?;

        let robust: Vec<f64> = sorted.iter().copied().filter(|&v| v >= p10 && v <= p90).collect();
        let robust_mean = stats::mean(&robust).unwrap_or(mean);
        let rmad = if robust.is_empty() {
            0.0
        } else {
            robust.iter().map(|v| (v - robust_mean).abs()).sum::<f64>() / robust.len() as f64
        };

        let (entropy, uniformity) = histogram_terms(values, minimum, maximum);
        let energy = values.iter().map(|v| v * v).sum::<f64>();

        Some(Self {
            energy,
            entropy,
            minimum,
            p10,
            p90,
            maximum,
            mean,
            median: pct(50.0),
            interquartile_range: pct(75.0) - pct(25.0),
            range: maximum - minimum,
            mean_absolute_deviation: values.iter().map(|v| (v - mean).abs()).sum::<f64>() / n,
            robust_mean_absolute_deviation: rmad,
            root_mean_squared: (energy / n).sqrt(),
            standard_deviation: variance.sqrt(),
            skewness: stats::skewness(values),
            kurtosis: stats::kurtosis(values),
            variance,
            uniformity,
        })
    }

    pub fn named(&self) -> Vec<(&'static str, f64)> {
        vec![
            ("10Percentile", self.p10),
            ("90Percentile", self.p90),
            ("Energy", self.energy),
            ("Entropy", self.entropy),
            ("InterquartileRange", self.interquartile_range),
            ("Kurtosis", self.kurtosis),
            ("Maximum", self.maximum),
            ("Mean", self.mean),
            ("MeanAbsoluteDeviation", self.mean_absolute_deviation),
            ("Median", self.median),
            ("Minimum", self.minimum),
            ("Range", self.range),
            ("RobustMeanAbsoluteDeviation", self.robust_mean_absolute_deviation),
            ("RootMeanSquared", self.root_mean_squared),
            ("Skewness", self.skewness),
            ("TotalEnergy", self.energy),
            ("Uniformity", self.uniformity),
            ("Variance", self.variance),
        ]
    }
}

fn histogram_terms(values: &[f64], lo: f64, hi: f64) -> (f64, f64) {
    if !(hi > lo) {
        return (0.0, 1.0);
    }
    let width = (hi - lo) / HISTOGRAM_BINS as f64;
    let mut hist = [0usize; HISTOGRAM_BINS];
    for v in values {
        let bin = (((v - lo) / width) as usize).min(HISTOGRAM_BINS - 1);
        hist[bin] += 1;
    }
    let n = values.len() as f64;
    let mut entropy = 0.0;
    let mut uniformity = 0.0;
    for &count in &hist {
        if count == 0 {
            continue;
        }
        let p = count as f64 / n;
        entropy -= p * p.log2();
        uniformity += p * p;
    }
    (entropy, uniformity)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uniform_region_has_no_spread() {
        let fo = FirstOrder::compute(&[42.0; 9]).unwrap();
        assert_eq!(fo.mean, 42.0);
        assert_eq!(fo.standard_deviation, 0.0);
        assert_eq!(fo.entropy, 0.0);
        assert_eq!(fo.uniformity, 1.0);
        assert_eq!(fo.range, 0.0);
    }

    #[test]
    fn two_level_region() {
        let fo = FirstOrder::compute(&[0.0, 0.0, 10.0, 10.0]).unwrap();
        assert_eq!(fo.mean, 5.0);
        assert_eq!(fo.variance, 25.0);
        assert!((fo.entropy - 1.0).abs() < 1e-12);
        assert!((fo.uniformity - 0.5).abs() < 1e-12);
        assert_eq!(fo.root_mean_squared, 50f64.sqrt());
    }
}
