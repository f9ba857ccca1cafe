use std::path::{Path, PathBuf};

use glam::Vec4;
use serde::Deserialize;

use crate::error::ConfigError;
use crate::render_graph::{DisplayTransform, PipelineConfig, ToneMapOperator};

/// Output tone mapping applied when the presented channel has not been
/// tone mapped by the graph itself.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToneMapping {
    None,
    #[default]
    AcesFilmic,
    Agx,
}

impl ToneMapping {
    pub fn operator(self) -> Option<ToneMapOperator> {
        match self {
            ToneMapping::None => None,
            ToneMapping::AcesFilmic => Some(ToneMapOperator::AcesFilmic),
            ToneMapping::Agx => Some(ToneMapOperator::Agx),
        }
    }
}

/// Window and renderer options.
///
/// Every field has a default, so a config file only lists what it changes:
///
/// ```json
/// { "width": 1920, "height": 1080, "exposure": 1.2,
///   "pipeline": { "bloom": { "strength": 0.3 } } }
/// ```
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default)]
pub struct ViewerConfig {
    pub title: String,
    pub width: u32,
    pub height: u32,
    pub tone_mapping: ToneMapping,
    pub exposure: f32,
    pub shadows: bool,
    pub clear_color: [f32; 4],
    /// Replaces the mounted scene's own pipeline when set.
    pub pipeline: Option<PipelineConfig>,
    /// Scene asset paths are resolved against this directory.
    pub assets_dir: PathBuf,
}

impl Default for ViewerConfig {
    fn default() -> Self {
        Self {
            title: "uspace".to_string(),
            width: 1280,
            height: 720,
            tone_mapping: ToneMapping::AcesFilmic,
            exposure: 0.8,
            shadows: true,
            clear_color: [0.0, 0.0, 0.0, 1.0],
            pipeline: None,
            assets_dir: PathBuf::from("assets"),
        }
    }
}

impl ViewerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config = serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        tracing::debug!(path = %path.display(), "loaded viewer config");
        Ok(config)
    }

    pub fn title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    pub fn size(mut self, width: u32, height: u32) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    pub fn tone_mapping(mut self, tone_mapping: ToneMapping, exposure: f32) -> Self {
        self.tone_mapping = tone_mapping;
        self.exposure = exposure;
        self
    }

    pub fn shadows(mut self, enabled: bool) -> Self {
        self.shadows = enabled;
        self
    }

    pub fn clear_color(mut self, color: Vec4) -> Self {
        self.clear_color = color.to_array();
        self
    }

    pub fn pipeline(mut self, pipeline: PipelineConfig) -> Self {
        self.pipeline = Some(pipeline);
        self
    }

    pub fn assets_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.assets_dir = dir.into();
        self
    }

    pub fn display(&self) -> DisplayTransform {
        DisplayTransform {
            operator: self.tone_mapping.operator(),
            exposure: self.exposure,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_display_transform() {
        let config = ViewerConfig::default();
        assert_eq!(config.display(), DisplayTransform::default());
        assert!(config.shadows);
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let config: ViewerConfig = serde_json::from_str(
            r#"{ "tone_mapping": "agx", "exposure": 8.0, "pipeline": { "dithering": true } }"#,
        )
        .unwrap();
        assert_eq!(config.tone_mapping, ToneMapping::Agx);
        assert_eq!(config.width, 1280);
        assert!(config.pipeline.unwrap().dithering);
    }

    #[test]
    fn builder_setters() {
        let config = ViewerConfig::new()
            .size(640, 480)
            .tone_mapping(ToneMapping::None, 1.0)
            .clear_color(Vec4::new(0.1, 0.2, 0.3, 1.0));
        assert_eq!((config.width, config.height), (640, 480));
        assert_eq!(config.display(), DisplayTransform::IDENTITY);
        assert_eq!(config.clear_color, [0.1, 0.2, 0.3, 1.0]);
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let err = ViewerConfig::load(Path::new("/no/such/uspace.json")).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}
