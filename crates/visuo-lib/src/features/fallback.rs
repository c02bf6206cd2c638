//! Small deterministic descriptor set: moments, one-offset co-occurrence
//! texture and basic shape of the region.

use super::shape::ShapeStats;
use super::texture::{cooccurrence, GlcmStats, Quantized};
use super::{masked_values, FeatureExtractor};
use crate::error::Result;
use crate::frame::{Frame, Mask};
use crate::stats;
use crate::table::FeatureVector;

/// Columns in the order they are computed.
pub const FALLBACK_FEATURES: [&str; 16] = [
    "mean_intensity",
    "std_intensity",
    "intensity_variance",
    "skewness",
    "kurtosis",
    "robust_mean_intensity",
    "total_integrated_intensity",
    "glcm_contrast",
    "glcm_homogeneity",
    "glcm_energy",
    "area",
    "perimeter",
    "eccentricity",
    "circularity",
    "centroid_x",
    "centroid_y",
];

pub struct FallbackExtractor;

impl FeatureExtractor for FallbackExtractor {
    fn name(&self) -> &'static str {
        "fallback"
    }

    fn feature_names(&self) -> Vec<String> {
        FALLBACK_FEATURES.iter().map(|s| s.to_string()).collect()
    }

    fn extract(&self, image: &Frame, mask: &Mask) -> Result<FeatureVector> {
        let values = masked_values(image, mask)?;
        let mut out = FeatureVector::new();

        let mean = stats::mean(&values).unwrap_or(f64::NAN);
        let variance = stats::population_variance(&values).unwrap_or(f64::NAN);
        let kurtosis = match stats::kurtosis(&values) {
            k if k == 0.0 => 0.0,
            k => k - 3.0,
        };
        let mut sorted = values.clone();
        sorted.sort_by(|a, b| a.total_cmp(b));
        let p90 = stats::percentile_sorted(&sorted, 90.0);
        let top: Vec<f64> = sorted.iter().copied().filter(|&v| v >= p90).collect();

        out.insert("mean_intensity".into(), mean);
        out.insert("std_intensity".into(), variance.sqrt());
        out.insert("intensity_variance".into(), variance);
        out.insert("skewness".into(), stats::skewness(&values));
        out.insert("kurtosis".into(), kurtosis);
        out.insert("robust_mean_intensity".into(), stats::mean(&top).unwrap_or(mean));
        out.insert("total_integrated_intensity".into(), values.iter().sum());

        let q = Quantized::sixteen_to_eight_bit(image, mask);
        let glcm = cooccurrence(&q, (1, 0)).map(|p| GlcmStats::from_matrix(&p, q.levels));
        let (contrast, homogeneity, energy) = match glcm {
            Some(g) => (g.contrast, g.idm, g.joint_energy.sqrt()),
            None => (f64::NAN, f64::NAN, f64::NAN),
        };
        out.insert("glcm_contrast".into(), contrast);
        out.insert("glcm_homogeneity".into(), homogeneity);
        out.insert("glcm_energy".into(), energy);

        if let Some(shape) = ShapeStats::compute(mask) {
            out.insert("area".into(), shape.area);
            out.insert("perimeter".into(), shape.perimeter);
            out.insert("eccentricity".into(), shape.eccentricity());
            out.insert("circularity".into(), shape.circularity());
            out.insert("centroid_x".into(), shape.centroid.0);
            out.insert("centroid_y".into(), shape.centroid.1);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uniform_region_of_42() {
        let image = Frame::filled(10, 10, 42.0);
        let mut mask = Mask::new(10, 10);
        for y in 2..8 {
            for x in 3..7 {
                mask.set(x, y, true);
            }
        }
        let out = FallbackExtractor.extract(&image, &mask).unwrap();
        assert_eq!(out["mean_intensity"], 42.0);
        assert_eq!(out["std_intensity"], 0.0);
        assert_eq!(out["skewness"], 0.0);
        assert_eq!(out["robust_mean_intensity"], 42.0);
        assert_eq!(out["total_integrated_intensity"], 42.0 * 24.0);
        assert_eq!(out["glcm_contrast"], 0.0);
        assert_eq!(out["glcm_energy"], 1.0);
        assert_eq!(out["area"], 24.0);
        assert_eq!(out["centroid_x"], 4.5);
    }
}
