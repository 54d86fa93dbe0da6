// 该文件是 Niuheng （牛衡） 项目的一部分。
// src/mapping.rs - 预览到拍摄坐标映射与训练分辨率归一化
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

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{
  error::CoreError,
  geometry::{BBox, Capture, Image, Size, Space},
};

/// 回归模型训练数据的图像分辨率。
///
/// 尺寸特征必须在这个分辨率下计算，因此只能来自配置，没有内置默认值。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrainingResolution {
  pub width: u32,
  pub height: u32,
}

impl TrainingResolution {
  pub fn new(width: u32, height: u32) -> Result<Self, CoreError> {
    if width == 0 || height == 0 {
      return Err(CoreError::InvalidInput(format!(
        "训练分辨率无效: {}x{}",
        width, height
      )));
    }
    Ok(Self { width, height })
  }

  pub fn size(&self) -> Size {
    Size::new(self.width, self.height)
  }
}

/// 训练分辨率下的框尺寸。横纵方向分别缩放，不保持长宽比。
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct NormalizedDims {
  pub width: f32,
  pub height: f32,
  pub area: f32,
}

/// 映射到拍摄图像后的框及其归一化尺寸
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MappedBox {
  pub capture_bbox: BBox<Capture>,
  pub normalized: NormalizedDims,
}

/// 按两个图像尺寸之比逐边缩放，横纵比例可以不同
pub fn rescale<Src: Space, Dst: Space>(bbox: &BBox<Src>, from: Size, to: Size) -> Result<BBox<Dst>, CoreError> {
  if from.is_empty() || to.is_empty() {
    return Err(CoreError::InvalidInput(format!(
      "无法在 {} 与 {} 之间缩放边界框",
      from, to
    )));
  }

  let sx = to.width as f32 / from.width as f32;
  let sy = to.height as f32 / from.height as f32;
  Ok(bbox.map_axes(|x| x * sx, |y| y * sy))
}

#[derive(Debug, Clone, Copy)]
pub struct BBoxCoordinateMapper {
  training: TrainingResolution,
}

impl BBoxCoordinateMapper {
  pub fn new(training: TrainingResolution) -> Self {
    Self { training }
  }

  pub fn training(&self) -> TrainingResolution {
    self.training
  }

  /// 拍摄空间的框换算到训练分辨率下的宽、高、面积
  pub fn normalize(&self, bbox: &BBox<Capture>, capture: Size) -> Result<NormalizedDims, CoreError> {
    if capture.is_empty() {
      return Err(CoreError::InvalidInput(format!("拍摄图像尺寸无效: {}", capture)));
    }

    let nx = self.training.width as f32 / capture.width as f32;
    let ny = self.training.height as f32 / capture.height as f32;
    let width = bbox.width() * nx;
    let height = bbox.height() * ny;

    Ok(NormalizedDims {
      width,
      height,
      area: width * height,
    })
  }

  /// 预览帧上的检测框映射到拍摄图像，并计算归一化尺寸
  pub fn map(&self, bbox: &BBox<Image>, preview: Size, capture: Size) -> Result<MappedBox, CoreError> {
    let capture_bbox = rescale::<Image, Capture>(bbox, preview, capture)?.clamp_to(capture);
    let normalized = self.normalize(&capture_bbox, capture)?;

    debug!(
      "坐标映射: {:?} ({}) -> {:?} ({}), 归一化 {:.1}x{:.1}={:.1}",
      bbox, preview, capture_bbox, capture, normalized.width, normalized.height, normalized.area
    );

    Ok(MappedBox {
      capture_bbox,
      normalized,
    })
  }
}
