// 该文件是 Niuheng （牛衡） 项目的一部分。
// src/config.rs - 推理流水线配置
//
// 本文件根据 Apache 许可证第 2.0 版（以下简称“许可证”）授权使用；
// 除非遵守该许可证条款，否则您不得使用本文件。
// 您可通过以下网址获取许可证副本：
// http://www.apache.org/licenses/LICENSE-2.0
// 除非适用法律要求或书面同意，根据本许可协议分发的软件均按“原样”提供，
// 不附带任何形式的明示或暗示的保证或条件。
// 有关许可权限与限制的具体条款，请参阅本许可协议。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, Wareless Group

use std::path::Path;

use serde::Deserialize;
use thiserror::Error;
use tracing::info;

use crate::{
  distance::OperatingRange,
  mapping::TrainingResolution,
  model::{
    COW_CLASS_ID, DEFAULT_IOU_THRESHOLD, DEFAULT_PLACEHOLDER_CONFIDENCE, DecoderConfig,
    decode::DEFAULT_CONFIDENCE_THRESHOLD,
  },
};

#[derive(Error, Debug)]
pub enum ConfigError {
  #[error("配置文件读取失败: {0}")]
  Io(#[from] std::io::Error),
  #[error("配置文件解析失败: {0}")]
  Parse(#[from] toml::de::Error),
  #[error("配置无效: {0}")]
  Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
  pub confidence_threshold: f32,
  pub iou_threshold: f32,
  pub target_class: usize,
}

impl Default for DetectorConfig {
  fn default() -> Self {
    Self {
      confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
      iou_threshold: DEFAULT_IOU_THRESHOLD,
      target_class: COW_CLASS_ID,
    }
  }
}

impl DetectorConfig {
  pub fn decoder_config(&self) -> DecoderConfig {
    DecoderConfig {
      target_class: self.target_class,
      confidence_threshold: self.confidence_threshold,
      ..Default::default()
    }
  }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct RegressorConfig {
  /// 结果中展示的占位置信度
  pub placeholder_confidence: f32,
}

impl Default for RegressorConfig {
  fn default() -> Self {
    Self {
      placeholder_confidence: DEFAULT_PLACEHOLDER_CONFIDENCE,
    }
  }
}

/// 流水线配置。`training_resolution` 必须给出，其余字段都有默认值。
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PipelineConfig {
  pub training_resolution: TrainingResolution,
  #[serde(default)]
  pub detector: DetectorConfig,
  #[serde(default)]
  pub regressor: RegressorConfig,
  #[serde(default)]
  pub distance: OperatingRange,
}

impl PipelineConfig {
  pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
    let path = path.as_ref();
    info!("读取配置文件: {}", path.display());
    let text = std::fs::read_to_string(path)?;
    text.parse()
  }

  pub fn validate(&self) -> Result<(), ConfigError> {
    let TrainingResolution { width, height } = self.training_resolution;
    TrainingResolution::new(width, height).map_err(|e| ConfigError::Invalid(e.to_string()))?;

    let unit = 0.0..=1.0;
    if !unit.contains(&self.detector.confidence_threshold) {
      return Err(ConfigError::Invalid(format!(
        "置信度阈值应在 [0, 1] 内: {}",
        self.detector.confidence_threshold
      )));
    }
    if !unit.contains(&self.detector.iou_threshold) {
      return Err(ConfigError::Invalid(format!(
        "IoU 阈值应在 [0, 1] 内: {}",
        self.detector.iou_threshold
      )));
    }
    if !(self.distance.min_m > 0.0 && self.distance.min_m < self.distance.max_m) {
      return Err(ConfigError::Invalid(format!(
        "距离范围无效: {:.2} - {:.2} m",
        self.distance.min_m, self.distance.max_m
      )));
    }
    Ok(())
  }
}

impl std::str::FromStr for PipelineConfig {
  type Err = ConfigError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    let config: Self = toml::from_str(s)?;
    config.validate()?;
    Ok(config)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::io::Write;

  #[test]
  fn minimal_config_uses_defaults() {
    let config: PipelineConfig = "[training_resolution]\nwidth = 1920\nheight = 1080\n"
      .parse()
      .unwrap();

    assert_eq!(config.training_resolution, TrainingResolution::new(1920, 1080).unwrap());
    assert_eq!(config.detector, DetectorConfig::default());
    assert_eq!(config.regressor.placeholder_confidence, 0.85);
    assert_eq!(config.distance, OperatingRange::default());
  }

  #[test]
  fn training_resolution_is_required() {
    let result = "[detector]\nconfidence_threshold = 0.3\n".parse::<PipelineConfig>();
    assert!(matches!(result, Err(ConfigError::Parse(_))));

    let result = "[training_resolution]\nwidth = 0\nheight = 1080\n".parse::<PipelineConfig>();
    assert!(matches!(result, Err(ConfigError::Invalid(_))));
  }

  #[test]
  fn reads_from_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(
      file,
      r#"
[training_resolution]
width = 1280
height = 720

[detector]
confidence_threshold = 0.4
iou_threshold = 0.5

[distance]
min_m = 1.0
max_m = 6.0
"#
    )
    .unwrap();

    let config = PipelineConfig::from_file(file.path()).unwrap();
    assert_eq!(config.detector.confidence_threshold, 0.4);
    assert_eq!(config.detector.target_class, COW_CLASS_ID);
    assert_eq!(config.distance.max_m, 6.0);
  }

  #[test]
  fn rejects_inverted_distance_range() {
    let text = "[training_resolution]\nwidth = 1\nheight = 1\n[distance]\nmin_m = 5.0\nmax_m = 2.0\n";
    assert!(matches!(
      text.parse::<PipelineConfig>(),
      Err(ConfigError::Invalid(_))
    ));
  }

  #[test]
  fn shipped_config_is_valid() {
    let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("config/pipeline.toml");
    let config = PipelineConfig::from_file(path).unwrap();
    assert_eq!(config.training_resolution, TrainingResolution::new(1920, 1080).unwrap());
    assert_eq!(config.detector.target_class, crate::model::COW_CLASS_ID);
  }
}
