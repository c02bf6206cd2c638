//! Radiomics-style descriptor classes, named `<class>_<Feature>`.

use super::first_order::FirstOrder;
use super::shape::ShapeStats;
use super::texture::{glcm_averaged, GlcmStats, GlszmStats, Quantized, ALL_DIRECTIONS};
use super::{masked_values, FeatureClass, FeatureExtractor};
use crate::error::Result;
use crate::frame::{Frame, Mask};
use crate::table::FeatureVector;

/// Gray levels used by the texture classes.
pub const TEXTURE_LEVELS: usize = 32;

pub struct PrimaryExtractor {
    classes: Vec<FeatureClass>,
}

impl PrimaryExtractor {
    /// An empty class list selects every class.
    pub fn new(classes: &[FeatureClass]) -> Self {
        let mut classes = if classes.is_empty() {
            FeatureClass::ALL.to_vec()
        } else {
            classes.to_vec()
        };
        classes.sort();
        classes.dedup();
        Self { classes }
    }
}

impl FeatureExtractor for PrimaryExtractor {
    fn name(&self) -> &'static str {
        "primary"
    }

    fn feature_names(&self) -> Vec<String> {
        let mut names = Vec::new();
        for &class in &self.classes {
            let named = match class {
                FeatureClass::FirstOrder => FirstOrder::default().named(),
                FeatureClass::Glcm => GlcmStats::default().named(),
                FeatureClass::Glszm => GlszmStats::default().named(),
                FeatureClass::Shape2D => ShapeStats::default().named(),
            };
            names.extend(named.into_iter().map(|(name, _)| format!("{}_{}", class.prefix(), name)));
        }
        names
    }

    fn extract(&self, image: &Frame, mask: &Mask) -> Result<FeatureVector> {
        let values = masked_values(image, mask)?;
        let mut out = FeatureVector::new();
        let mut put = |class: FeatureClass, named: Vec<(&'static str, f64)>| {
            for (name, value) in named {
                out.insert(format!("{}_{}", class.prefix(), name), value);
            }
        };
        let quantized = self
            .classes
            .iter()
            .any(|c| matches!(c, FeatureClass::Glcm | FeatureClass::Glszm))
            .then(|| Quantized::by_range(image, mask, TEXTURE_LEVELS));

        for &class in &self.classes {
            match class {
                FeatureClass::FirstOrder => {
                    if let Some(fo) = FirstOrder::compute(&values) {
                        put(class, fo.named());
                    }
                }
                FeatureClass::Glcm => {
                    if let Some(stats) = quantized.as_ref().and_then(|q| glcm_averaged(q, &ALL_DIRECTIONS)) {
                        put(class, stats);
                    }
                }
                FeatureClass::Glszm => {
                    if let Some(stats) = quantized.as_ref().and_then(GlszmStats::compute) {
                        put(class, stats.named());
                    }
                }
                FeatureClass::Shape2D => {
                    if let Some(stats) = ShapeStats::compute(mask) {
                        put(class, stats.named());
                    }
                }
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn class_selection_limits_columns() {
        let image = Frame::from_fn(8, 8, |x, y| (x * y) as f32);
        let mask = Mask::full(8, 8);
        let only_first = PrimaryExtractor::new(&[FeatureClass::FirstOrder]);
        let out = only_first.extract(&image, &mask).unwrap();
        assert!(out.keys().all(|k| k.starts_with("firstorder_")));
        assert_eq!(out["firstorder_Maximum"], 49.0);

        let all = PrimaryExtractor::new(&[]).extract(&image, &mask).unwrap();
        for prefix in ["firstorder_", "glcm_", "glszm_", "shape2D_"] {
            assert!(all.keys().any(|k| k.starts_with(prefix)), "{prefix}");
        }
        assert_eq!(all["shape2D_PixelSurface"], 64.0);
    }
}
