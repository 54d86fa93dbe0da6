// 该文件是 Niuheng （牛衡） 项目的一部分。
// src/model/weight.rs - 重量回归
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

use std::time::Instant;

use image::RgbImage;
use serde::Serialize;
use tracing::{info, warn};

use crate::{
  error::CoreError,
  feature::size_feature,
  frame::{REGRESSOR_INPUT_SIZE, RegressorTensor},
  geometry::{BBox, Capture},
  mapping::{MappedBox, NormalizedDims},
  model::{Model, ModelSlot, RegressorBackend},
  preprocess::crop_to_tensor,
};

/// 结果置信度的默认占位值。
///
/// 回归模型不输出置信度，该值只是界面展示用的常量，与检测置信度无关。
pub const DEFAULT_PLACEHOLDER_CONFIDENCE: f32 = 0.85;

pub struct RegressorInput {
  pub image: RegressorTensor,
  pub size_feature: f32,
}

/// 预测失败的原因
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
  InvalidCrop,
  Inference,
  NonFinite,
  Released,
}

impl From<&CoreError> for FailureKind {
  fn from(err: &CoreError) -> Self {
    match err {
      CoreError::InvalidCrop(_) | CoreError::InvalidInput(_) => FailureKind::InvalidCrop,
      CoreError::Released => FailureKind::Released,
      _ => FailureKind::Inference,
    }
  }
}

/// 一次重量预测的结果，创建后不再修改
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WeightResult {
  pub weight_kg: f32,
  /// 占位置信度，见 [`DEFAULT_PLACEHOLDER_CONFIDENCE`]
  pub confidence: f32,
  pub detection_confidence: f32,
  pub scaled_bbox: BBox<Capture>,
  pub normalized: NormalizedDims,
  pub size_feature: f32,
  pub failure: Option<FailureKind>,
}

impl WeightResult {
  /// 失败结果：重量与置信度为 0，保留框与特征以便排查
  pub fn failed(
    kind: FailureKind,
    mapped: &MappedBox,
    size_feature: f32,
    detection_confidence: f32,
  ) -> Self {
    Self {
      weight_kg: 0.0,
      confidence: 0.0,
      detection_confidence,
      scaled_bbox: mapped.capture_bbox,
      normalized: mapped.normalized,
      size_feature,
      failure: Some(kind),
    }
  }

  pub fn is_valid(&self) -> bool {
    self.failure.is_none()
  }
}

pub struct WeightRegressor<B> {
  slot: ModelSlot<B>,
  placeholder_confidence: f32,
}

impl<B: RegressorBackend> WeightRegressor<B> {
  pub fn new(backend: B) -> Self {
    Self {
      slot: ModelSlot::new("重量回归模型", backend),
      placeholder_confidence: DEFAULT_PLACEHOLDER_CONFIDENCE,
    }
  }

  pub fn with_placeholder_confidence(mut self, confidence: f32) -> Self {
    self.placeholder_confidence = confidence;
    self
  }

  pub fn is_released(&self) -> bool {
    self.slot.is_released()
  }

  /// 裁剪 → 归一化 → 回归。任何失败都转为 [`WeightResult::failed`]，不会返回错误。
  pub fn predict(
    &self,
    capture: &RgbImage,
    mapped: &MappedBox,
    distance_m: f32,
    detection_confidence: f32,
  ) -> WeightResult {
    let feature = size_feature(mapped.normalized.area, distance_m);
    let failed = |kind| WeightResult::failed(kind, mapped, feature, detection_confidence);

    let now = Instant::now();
    let image = match crop_to_tensor::<REGRESSOR_INPUT_SIZE>(capture, &mapped.capture_bbox) {
      Ok(tensor) => tensor,
      Err(e) => {
        warn!("裁剪失败: {}", e);
        return failed(FailureKind::from(&e));
      }
    };
    let preprocess = now.elapsed();

    let input = RegressorInput {
      image,
      size_feature: feature,
    };

    let now = Instant::now();
    let weight_kg = match self.forward(&input) {
      Ok(weight) if weight.is_finite() => weight,
      Ok(weight) => {
        warn!("模型输出非有限值: {}", weight);
        return failed(FailureKind::NonFinite);
      }
      Err(e) => {
        warn!("重量回归失败: {}", e);
        return failed(FailureKind::from(&e));
      }
    };

    info!(
      "重量预测: {:.1} kg (尺寸特征 {:.1}, 距离 {:.2} m), 预处理 {:.2?}, 推理 {:.2?}",
      weight_kg,
      feature,
      distance_m,
      preprocess,
      now.elapsed()
    );

    WeightResult {
      weight_kg,
      confidence: self.placeholder_confidence,
      detection_confidence,
      scaled_bbox: mapped.capture_bbox,
      normalized: mapped.normalized,
      size_feature: feature,
      failure: None,
    }
  }

  fn forward(&self, input: &RegressorInput) -> Result<f32, CoreError> {
    self
      .slot
      .with(|backend| backend.forward(&input.image, input.size_feature))
  }
}

impl<B: RegressorBackend> Model for WeightRegressor<B> {
  type Input = RegressorInput;
  type Output = f32;
  type Error = CoreError;

  fn infer(&self, input: &Self::Input) -> Result<Self::Output, Self::Error> {
    let weight = self.forward(input)?;

    if !weight.is_finite() {
      return Err(CoreError::inference(format!("模型输出非有限值: {}", weight)));
    }
    Ok(weight)
  }

  fn release(&self) {
    self.slot.release();
  }
}
