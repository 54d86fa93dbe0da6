// 该文件是 Niuheng （牛衡） 项目的一部分。
// src/pipeline.rs - 检测到重量的推理流水线
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

//! 每个被分析的帧经过 letterbox、检测、解码与 NMS 得到 [`FrameDetections`]；
//! 拍摄时取置信度最高的检测，映射到拍摄图像，计算尺寸特征并回归重量。
//! 除模型加载外，各阶段的错误都在这里被转换为空结果或失败结果。

use image::RgbImage;
use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};
use url::Url;

use crate::{
  FromUrl,
  config::PipelineConfig,
  distance::OperatingRange,
  error::CoreError,
  geometry::{BBox, Size},
  mapping::{BBoxCoordinateMapper, MappedBox, NormalizedDims},
  model::{
    CowDetector, Detection, DetectionDecoder, DetectorBackend, FailureKind, FrameDetections,
    Model, RegressorBackend, WeightRegressor, WeightResult,
    onnx::{OnnxDetector, OnnxDetectorBuilder, OnnxRegressor, OnnxRegressorBuilder},
  },
};

/// 用户可以纠正的拒绝原因，不属于推理错误
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PredictionRejected {
  #[error("距离超出工作范围: {0:.2} m")]
  InvalidDistance(f32),
  #[error("当前帧没有检测到牛")]
  NoDetection,
}

/// 一次拍摄的完整预测记录
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PredictionReport {
  pub capture_size: Size,
  pub distance_m: f32,
  /// 被分析帧上的检测
  pub detection: Detection,
  pub weight: WeightResult,
  pub timestamp_ms: i64,
}

pub struct Pipeline<D, R> {
  detector: CowDetector<D>,
  regressor: WeightRegressor<R>,
  mapper: BBoxCoordinateMapper,
  range: OperatingRange,
}

impl Pipeline<OnnxDetector, OnnxRegressor> {
  /// 加载两个 ONNX 模型，失败时返回 [`CoreError::ModelLoad`]
  pub fn load(detector: &Url, regressor: &Url, config: &PipelineConfig) -> Result<Self, CoreError> {
    let detector = OnnxDetectorBuilder::from_url(detector)?.build()?;
    let regressor = OnnxRegressorBuilder::from_url(regressor)?.build()?;
    Ok(Self::new(detector, regressor, config))
  }
}

impl<D: DetectorBackend, R: RegressorBackend> Pipeline<D, R> {
  pub fn new(detector: D, regressor: R, config: &PipelineConfig) -> Self {
    let decoder = DetectionDecoder::new(config.detector.decoder_config());
    info!(
      "流水线配置: 训练分辨率 {}x{}, 置信度阈值 {}, IoU 阈值 {}, 距离范围 {:.2}-{:.2} m",
      config.training_resolution.width,
      config.training_resolution.height,
      config.detector.confidence_threshold,
      config.detector.iou_threshold,
      config.distance.min_m,
      config.distance.max_m
    );

    Self {
      detector: CowDetector::new(detector, decoder, config.detector.iou_threshold),
      regressor: WeightRegressor::new(regressor)
        .with_placeholder_confidence(config.regressor.placeholder_confidence),
      mapper: BBoxCoordinateMapper::new(config.training_resolution),
      range: config.distance,
    }
  }

  pub fn detector(&self) -> &CowDetector<D> {
    &self.detector
  }

  pub fn regressor(&self) -> &WeightRegressor<R> {
    &self.regressor
  }

  /// 分析一帧，不会失败：错误时返回空结果
  pub fn analyze(&self, image: &RgbImage) -> FrameDetections {
    self.detector.detect_or_empty(image)
  }

  /// 用分析帧上置信度最高的检测对拍摄图像做重量预测
  pub fn predict(
    &self,
    capture: &RgbImage,
    detections: &FrameDetections,
    distance_cm: f32,
  ) -> Result<PredictionReport, PredictionRejected> {
    let distance_m = self.range.validate(distance_cm).map_err(|e| match e {
      CoreError::InvalidDistance(d) => PredictionRejected::InvalidDistance(d),
      _ => PredictionRejected::InvalidDistance(distance_cm / 100.0),
    })?;

    let detection = detections.best().ok_or(PredictionRejected::NoDetection)?;
    let capture_size = Size::of(capture);

    let weight = match self.mapper.map(&detection.bbox, detections.image_size, capture_size) {
      Ok(mapped) => self
        .regressor
        .predict(capture, &mapped, distance_m, detection.confidence),
      Err(e) => {
        warn!("无法映射检测框: {}", e);
        let mapped = MappedBox {
          capture_bbox: BBox::new(0.0, 0.0, 0.0, 0.0),
          normalized: NormalizedDims::default(),
        };
        WeightResult::failed(FailureKind::InvalidCrop, &mapped, 0.0, detection.confidence)
      }
    };

    Ok(PredictionReport {
      capture_size,
      distance_m,
      detection: detection.clone(),
      weight,
      timestamp_ms: chrono::Utc::now().timestamp_millis(),
    })
  }

  /// 释放两个模型，之后的分析返回空结果，预测返回失败结果
  pub fn release(&self) {
    self.detector.release();
    self.regressor.release();
  }

  pub fn is_released(&self) -> bool {
    self.detector.is_released() && self.regressor.is_released()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::{
    frame::{DetectorTensor, RegressorTensor},
    mapping::TrainingResolution,
    model::{COW_CLASS_ID, DetectorOutput},
  };

  struct OneCow;

  impl DetectorBackend for OneCow {
    fn forward(&mut self, _input: &DetectorTensor) -> Result<DetectorOutput, CoreError> {
      let mut values = vec![0.5, 0.5, 0.2, 0.3];
      let mut scores = vec![0.0; 80];
      scores[COW_CLASS_ID] = 0.9;
      values.extend(scores);
      DetectorOutput::new(values, 80, 1)
    }
  }

  struct Linear;

  impl RegressorBackend for Linear {
    fn forward(&mut self, _image: &RegressorTensor, size_feature: f32) -> Result<f32, CoreError> {
      Ok(100.0 + size_feature * 1e-4)
    }
  }

  fn config() -> PipelineConfig {
    "[training_resolution]\nwidth = 1280\nheight = 960\n".parse().unwrap()
  }

  #[test]
  fn preview_to_capture_end_to_end() {
    let pipeline = Pipeline::new(OneCow, Linear, &config());

    let preview = RgbImage::new(1280, 960);
    let detections = pipeline.analyze(&preview);
    assert_eq!(detections.items[0].bbox.as_array(), [512.0, 288.0, 768.0, 672.0]);

    // 拍摄分辨率是预览的两倍
    let capture = RgbImage::new(2560, 1920);
    let report = pipeline.predict(&capture, &detections, 200.0).unwrap();

    assert_eq!(report.weight.scaled_bbox.as_array(), [1024.0, 576.0, 1536.0, 1344.0]);
    // 训练分辨率下 256 x 384
    assert_eq!(report.weight.normalized.area, 256.0 * 384.0);
    assert_eq!(report.weight.size_feature, 256.0 * 384.0 * 4.0);
    assert!(report.weight.is_valid());
    assert_eq!(report.distance_m, 2.0);
  }

  #[test]
  fn rejections() {
    let pipeline = Pipeline::new(OneCow, Linear, &config());
    let capture = RgbImage::new(640, 480);

    let empty = FrameDetections::empty(Size::new(640, 480));
    assert_eq!(
      pipeline.predict(&capture, &empty, 200.0),
      Err(PredictionRejected::NoDetection)
    );

    let detections = pipeline.analyze(&capture);
    assert_eq!(
      pipeline.predict(&capture, &detections, 0.0),
      Err(PredictionRejected::InvalidDistance(0.0))
    );
    assert!(matches!(
      pipeline.predict(&capture, &detections, 2000.0),
      Err(PredictionRejected::InvalidDistance(_))
    ));
  }

  #[test]
  fn released_pipeline_degrades_gracefully() {
    let pipeline = Pipeline::new(OneCow, Linear, &config());
    let frame = RgbImage::new(640, 480);
    let detections = pipeline.analyze(&frame);

    pipeline.release();
    assert!(pipeline.is_released());
    assert!(pipeline.analyze(&frame).is_empty());

    let report = pipeline.predict(&frame, &detections, 150.0).unwrap();
    assert_eq!(report.weight.failure, Some(FailureKind::Released));
  }

  #[test]
  fn empty_capture_is_a_failure_result() {
    let pipeline = Pipeline::new(OneCow, Linear, &config());
    let detections = pipeline.analyze(&RgbImage::new(640, 480));

    let report = pipeline.predict(&RgbImage::new(0, 0), &detections, 150.0).unwrap();
    assert_eq!(report.weight.failure, Some(FailureKind::InvalidCrop));
  }

  #[test]
  fn training_resolution_comes_from_config() {
    let mut config = config();
    config.training_resolution = TrainingResolution::new(640, 480).unwrap();
    let pipeline = Pipeline::new(OneCow, Linear, &config);

    let preview = RgbImage::new(1280, 960);
    let detections = pipeline.analyze(&preview);
    let report = pipeline.predict(&preview, &detections, 100.0).unwrap();
    assert_eq!(report.weight.normalized.width, 128.0);
    assert_eq!(report.weight.normalized.height, 192.0);
  }
}
