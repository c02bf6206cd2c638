use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use visuo_lib::compose::{ColorMap, Compositor, IntensityWindow};
use visuo_lib::features::{ExtractionMode, FeatureClass};
use visuo_lib::registration::{MotionModel, RegistrationConfig, RegistrationMode};
use visuo_lib::signal_path::SegmentationConfig;
use visuo_lib::Rect;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistrationSettings {
    pub mode: RegistrationMode,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub template: Option<PathBuf>,
    pub motion: MotionModel,
    pub max_iterations: usize,
    pub tolerance: f64,
}

impl Default for RegistrationSettings {
    fn default() -> Self {
        let params = RegistrationConfig::default();
        Self {
            mode: RegistrationMode::Intra,
            template: None,
            motion: params.motion,
            max_iterations: params.max_iterations,
            tolerance: params.tolerance,
        }
    }
}

impl RegistrationSettings {
    pub fn params(&self) -> RegistrationConfig {
        RegistrationConfig {
            motion: self.motion,
            max_iterations: self.max_iterations,
            tolerance: self.tolerance,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeatureSettings {
    pub mode: ExtractionMode,
    /// Primary extractor classes; empty selects all of them.
    pub classes: Vec<FeatureClass>,
    /// Region names to extract from; empty uses the crop area.
    pub regions: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputSettings {
    pub collages: bool,
    pub animations: bool,
    pub signal_path: bool,
    /// Skip every image product and write only the tables.
    pub features_only: bool,
}

impl Default for OutputSettings {
    fn default() -> Self {
        Self {
            collages: true,
            animations: true,
            signal_path: true,
            features_only: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    pub input_dir: PathBuf,
    pub output_dir: PathBuf,
    pub colormap: ColorMap,
    pub opacity: f64,
    /// Suffix for the feature tables, written as `__<tag>`.
    pub feature_tag: String,
    // Tables last so TOML output stays valid.
    pub registration: RegistrationSettings,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub crop: Option<Rect>,
    pub window: IntensityWindow,
    pub segmentation: SegmentationConfig,
    pub features: FeatureSettings,
    pub outputs: OutputSettings,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            input_dir: PathBuf::from("."),
            output_dir: PathBuf::from("output"),
            colormap: ColorMap::Hot,
            opacity: 0.5,
            feature_tag: String::new(),
            registration: RegistrationSettings::default(),
            crop: None,
            window: IntensityWindow::default(),
            segmentation: SegmentationConfig::default(),
            features: FeatureSettings::default(),
            outputs: OutputSettings::default(),
        }
    }
}

impl RunConfig {
    pub fn compositor(&self) -> Compositor {
        Compositor {
            crop: self.crop,
            window: self.window,
            colormap: self.colormap,
            opacity: self.opacity.clamp(0.0, 1.0),
            progress_bar: true,
            timestamp: true,
        }
    }

    fn tag_suffix(&self) -> String {
        let tag = self.feature_tag.trim();
        if tag.is_empty() {
            String::new()
        } else {
            format!("__{}", tag)
        }
    }

    pub fn raw_results_path(&self) -> PathBuf {
        self.output_dir
            .join(format!("_Feature_Extraction_Raw_Results{}.csv", self.tag_suffix()))
    }

    pub fn group_summary_path(&self) -> PathBuf {
        self.output_dir
            .join(format!("_Feature_Extraction_Group_Summary{}.csv", self.tag_suffix()))
    }

    pub fn signal_path_table(&self) -> PathBuf {
        self.output_dir.join("_Signal_Path_Features.csv")
    }
}

pub fn read_config(path: &Path) -> Result<RunConfig> {
    let contents = fs::read_to_string(path)
        .with_context(|| format!("failed to read config {}", path.display()))?;
    let config: RunConfig =
        toml::from_str(&contents).with_context(|| format!("parsing config {}", path.display()))?;
    Ok(config)
}

pub fn write_config(path: &Path, config: &RunConfig) -> Result<()> {
    let text = toml::to_string_pretty(config).context("serializing config")?;
    fs::write(path, text).with_context(|| format!("writing config {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;
    use visuo_lib::compose::WindowKind;

    #[test]
    fn partial_toml_fills_defaults() {
        let config: RunConfig = toml::from_str(
            r#"
            input_dir = "data"
            colormap = "viridis"
            feature_tag = "pilot"

            [registration]
            mode = "template"
            template = "atlas.tif"

            [window]
            kind = "absolute"
            high = 4000.0

            [features]
            mode = "fallback"
            classes = ["firstorder", "shape2D"]
            "#,
        )
        .unwrap();
        assert_eq!(config.input_dir, PathBuf::from("data"));
        assert_eq!(config.registration.mode, RegistrationMode::Template);
        assert_eq!(config.registration.max_iterations, 200);
        assert_eq!(config.window.kind, WindowKind::Absolute);
        assert_eq!(config.window.low, 0.0);
        assert_eq!(config.colormap, ColorMap::Viridis);
        assert_eq!(config.features.classes, vec![FeatureClass::FirstOrder, FeatureClass::Shape2D]);
        assert!(config.outputs.collages);
        assert!(config
            .raw_results_path()
            .ends_with("_Feature_Extraction_Raw_Results__pilot.csv"));
    }

    #[test]
    fn config_file_round_trips() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("run.toml");
        let config = RunConfig {
            crop: Some(Rect::new(4, 4, 32, 24)),
            opacity: 0.7,
            ..Default::default()
        };
        write_config(&path, &config).unwrap();
        assert_eq!(read_config(&path).unwrap(), config);
        assert!(config.group_summary_path().ends_with("_Feature_Extraction_Group_Summary.csv"));
    }
}
