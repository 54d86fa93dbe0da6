// 该文件是 Niuheng （牛衡） 项目的一部分。
// src/model/yolo.rs - 牛只检测器
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
use tracing::{debug, info, warn};

use crate::{
  error::CoreError,
  frame::DETECTOR_INPUT_SIZE,
  geometry::Size,
  model::{
    DetectionDecoder, DetectorBackend, FrameDetections, Model, ModelSlot, non_max_suppression,
  },
  preprocess::letterbox,
};

/// letterbox → 推理 → 解码 → NMS
pub struct CowDetector<B> {
  slot: ModelSlot<B>,
  decoder: DetectionDecoder,
  iou_threshold: f32,
}

impl<B: DetectorBackend> CowDetector<B> {
  pub fn new(backend: B, decoder: DetectionDecoder, iou_threshold: f32) -> Self {
    Self {
      slot: ModelSlot::new("检测模型", backend),
      decoder,
      iou_threshold,
    }
  }

  pub fn decoder(&self) -> &DetectionDecoder {
    &self.decoder
  }

  pub fn is_released(&self) -> bool {
    self.slot.is_released()
  }

  pub fn detect(&self, image: &RgbImage) -> Result<FrameDetections, CoreError> {
    let image_size = Size::of(image);

    let now = Instant::now();
    let (tensor, transform) = letterbox::<DETECTOR_INPUT_SIZE>(image)?;
    let preprocess = now.elapsed();

    let now = Instant::now();
    let output = self.slot.with(|backend| backend.forward(&tensor))?;
    let inference = now.elapsed();

    let now = Instant::now();
    let candidates = self.decoder.decode(&output, &transform, image_size);
    let candidate_count = candidates.len();
    let items = non_max_suppression(candidates, self.iou_threshold);
    let postprocess = now.elapsed();

    info!(
      "检测完成: 预处理 {:.2?}, 推理 {:.2?}, 后处理 {:.2?}",
      preprocess, inference, postprocess
    );
    debug!(
      "帧 {}: 候选 {} 个, NMS 后 {} 个",
      image_size,
      candidate_count,
      items.len()
    );

    Ok(FrameDetections {
      image_size,
      items: items.into_boxed_slice(),
    })
  }

  /// 与 [`Self::detect`] 相同，但任何错误都记录后返回空结果
  pub fn detect_or_empty(&self, image: &RgbImage) -> FrameDetections {
    match self.detect(image) {
      Ok(detections) => detections,
      Err(e) => {
        warn!("检测失败，返回空结果: {}", e);
        FrameDetections::empty(Size::of(image))
      }
    }
  }
}

impl<B: DetectorBackend> Model for CowDetector<B> {
  type Input = RgbImage;
  type Output = FrameDetections;
  type Error = CoreError;

  fn infer(&self, input: &Self::Input) -> Result<Self::Output, Self::Error> {
    self.detect(input)
  }

  fn release(&self) {
    self.slot.release();
  }
}
