// 该文件是 Niuheng （牛衡） 项目的一部分。
// src/model.rs - 模型
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

use serde::Serialize;

use crate::geometry::{BBox, Image, Size};

pub trait Model {
  type Input;
  type Output;
  type Error;

  fn infer(&self, input: &Self::Input) -> Result<Self::Output, Self::Error>;

  /// 释放模型资源，之后的推理返回错误
  fn release(&self);
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Detection {
  /// 被分析帧原图坐标
  pub bbox: BBox<Image>,
  pub confidence: f32,
  pub class_id: usize,
}

/// 一帧的检测结果，连同该帧的尺寸一起传递
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FrameDetections {
  pub image_size: Size,
  pub items: Box<[Detection]>,
}

impl FrameDetections {
  pub fn empty(image_size: Size) -> Self {
    Self {
      image_size,
      items: Box::new([]),
    }
  }

  pub fn is_empty(&self) -> bool {
    self.items.is_empty()
  }

  /// 置信度最高的检测（NMS 之后即第一个）
  pub fn best(&self) -> Option<&Detection> {
    self.items.first()
  }
}

pub mod backend;
pub mod decode;
pub mod nms;
pub mod onnx;
mod slot;
mod weight;
mod yolo;

pub use self::backend::{DetectorBackend, DetectorOutput, RegressorBackend};
pub use self::decode::{COW_CLASS_ID, DecoderConfig, DetectionDecoder};
pub use self::nms::{DEFAULT_IOU_THRESHOLD, non_max_suppression};
pub use self::slot::ModelSlot;
pub use self::weight::{
  DEFAULT_PLACEHOLDER_CONFIDENCE, FailureKind, RegressorInput, WeightRegressor, WeightResult,
};
pub use self::yolo::CowDetector;
