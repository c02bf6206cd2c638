//! Per-region descriptor extraction.
//!
//! Two interchangeable extractors share the [`FeatureExtractor`] contract:
//! a rich radiomics-style set ([`primary::PrimaryExtractor`]) and a small
//! deterministic set ([`fallback::FallbackExtractor`]). A failed unit yields
//! a vector of NaNs over the extractor's columns and an
//! [`Degradation::ExtractionGap`], never an error.

pub mod fallback;
pub mod first_order;
pub mod primary;
pub mod shape;
pub mod texture;

use serde::{Deserialize, Serialize};

use crate::error::{Degradation, Error, Result};
use crate::frame::{Frame, Mask};
use crate::table::FeatureVector;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExtractionMode {
    #[default]
    Primary,
    Fallback,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum FeatureClass {
    #[serde(rename = "firstorder")]
    FirstOrder,
    #[serde(rename = "glcm")]
    Glcm,
    #[serde(rename = "glszm")]
    Glszm,
    #[serde(rename = "shape2D")]
    Shape2D,
}

impl FeatureClass {
    pub const ALL: [FeatureClass; 4] = [
        FeatureClass::FirstOrder,
        FeatureClass::Glcm,
        FeatureClass::Glszm,
        FeatureClass::Shape2D,
    ];

    pub fn prefix(&self) -> &'static str {
        match self {
            FeatureClass::FirstOrder => "firstorder",
            FeatureClass::Glcm => "glcm",
            FeatureClass::Glszm => "glszm",
            FeatureClass::Shape2D => "shape2D",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|c| c.prefix().eq_ignore_ascii_case(name.trim()))
    }
}

pub trait FeatureExtractor: Send + Sync {
    fn name(&self) -> &'static str;

    /// Every column this extractor can produce, whatever the input.
    fn feature_names(&self) -> Vec<String>;

    /// Descriptors of `image` restricted to `mask`.
    fn extract(&self, image: &Frame, mask: &Mask) -> Result<FeatureVector>;
}

pub fn build_extractor(mode: ExtractionMode, classes: &[FeatureClass]) -> Box<dyn FeatureExtractor> {
    match mode {
        ExtractionMode::Primary => Box::new(primary::PrimaryExtractor::new(classes)),
        ExtractionMode::Fallback => Box::new(fallback::FallbackExtractor),
    }
}

/// Finite intensities under the mask; at least two are required.
pub(crate) fn masked_values(image: &Frame, mask: &Mask) -> Result<Vec<f64>> {
    if image.dims() != mask.dims() {
        return Err(Error::Dimension {
            expected: image.dims(),
            actual: mask.dims(),
        });
    }
    let values: Vec<f64> = image
        .data
        .iter()
        .zip(&mask.data)
        .filter(|(v, m)| **m && v.is_finite())
        .map(|(&v, _)| v as f64)
        .collect();
    if values.len() < 2 {
        return Err(Error::InsufficientData {
            required: 2,
            available: values.len(),
        });
    }
    Ok(values)
}

/// Run one extraction unit, converting failure into a logged gap.
///
/// The returned vector always carries every column of
/// [`FeatureExtractor::feature_names`]; anything not computed is NaN.
pub fn extract_unit(
    extractor: &dyn FeatureExtractor,
    image: &Frame,
    mask: &Mask,
    subject: &str,
    time: u32,
    region: &str,
) -> (FeatureVector, Option<Degradation>) {
    let schema = extractor.feature_names();
    match extractor.extract(image, mask) {
        Ok(mut values) => {
            for name in schema {
                values.entry(name).or_insert(f64::NAN);
            }
            (values, None)
        }
        Err(err) => {
            let gap = Degradation::ExtractionGap {
                subject: subject.to_string(),
                time,
                region: region.to_string(),
                reason: err.to_string(),
            };
            gap.log();
            let values = schema.into_iter().map(|name| (name, f64::NAN)).collect();
            (values, Some(gap))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn class_names_parse() {
        assert_eq!(FeatureClass::from_name("shape2d"), Some(FeatureClass::Shape2D));
        assert_eq!(FeatureClass::from_name("glcm"), Some(FeatureClass::Glcm));
        assert_eq!(FeatureClass::from_name("ngtdm"), None);
    }

    #[test]
    fn tiny_mask_becomes_gap() {
        let image = Frame::filled(4, 4, 1.0);
        let mut mask = Mask::new(4, 4);
        mask.set(1, 1, true);
        let extractor = build_extractor(ExtractionMode::Fallback, &[]);
        let (values, gap) = extract_unit(extractor.as_ref(), &image, &mask, "s1", 30, "roi");
        assert_eq!(values.keys().cloned().collect::<Vec<_>>(), {
            let mut names = extractor.feature_names();
            names.sort();
            names
        });
        assert!(values.values().all(|v| v.is_nan()));
        assert!(matches!(gap, Some(Degradation::ExtractionGap { time: 30, .. })));
    }

    #[test]
    fn failed_primary_unit_keeps_every_class_column() {
        let image = Frame::filled(6, 6, 3.0);
        let mask = Mask::new(6, 6);
        let extractor = build_extractor(ExtractionMode::Primary, &[FeatureClass::FirstOrder, FeatureClass::Glszm]);
        let (values, gap) = extract_unit(extractor.as_ref(), &image, &mask, "s1", 0, "empty");
        assert!(gap.is_some());
        assert!(values.contains_key("firstorder_Mean"));
        assert!(values.contains_key("glszm_ZoneEntropy"));
        assert!(!values.contains_key("glcm_Contrast"));
        assert!(values.values().all(|v| v.is_nan()));
    }

    #[test]
    fn successful_unit_matches_schema() {
        let image = Frame::from_fn(8, 8, |x, y| (x + 2 * y) as f32);
        let mask = Mask::full(8, 8);
        for mode in [ExtractionMode::Primary, ExtractionMode::Fallback] {
            let extractor = build_extractor(mode, &[]);
            let (values, gap) = extract_unit(extractor.as_ref(), &image, &mask, "s1", 0, "frame");
            assert!(gap.is_none());
            let mut names = extractor.feature_names();
            names.sort();
            assert_eq!(values.keys().cloned().collect::<Vec<_>>(), names, "{}", extractor.name());
        }
    }
}
