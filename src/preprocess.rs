// 该文件是 Niuheng （牛衡） 项目的一部分。
// src/preprocess.rs - letterbox 与裁剪预处理
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

use image::{
  Rgb, RgbImage,
  imageops::{self, FilterType},
};
use serde::Serialize;
use tracing::debug;

use crate::{
  error::CoreError,
  frame::RgbNchwTensor,
  geometry::{BBox, Capture, Image, Letterbox, Size},
};

/// letterbox 填充灰度值，与检测器训练时一致
pub const LETTERBOX_PAD_VALUE: u8 = 114;

/// ImageNet 通道均值
pub const IMAGENET_MEAN: [f32; 3] = [0.485, 0.456, 0.406];
/// ImageNet 通道标准差
pub const IMAGENET_STD: [f32; 3] = [0.229, 0.224, 0.225];

/// 原图到 letterbox 画布的映射：先等比缩放 `scale`，再平移 `(offset_x, offset_y)`。
///
/// 每次预处理都会返回新的值，它只属于产生它的那一帧。
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct LetterboxTransform {
  pub scale: f32,
  pub offset_x: i32,
  pub offset_y: i32,
}

impl LetterboxTransform {
  /// 计算把 `source` 放进 `target×target` 画布的变换，同时返回缩放后的尺寸
  pub fn fit(source: Size, target: u32) -> Result<(Self, Size), CoreError> {
    if source.is_empty() || target == 0 {
      return Err(CoreError::InvalidInput(format!(
        "无法对尺寸为 {} 的图像做 letterbox (目标 {})",
        source, target
      )));
    }

    let t = target as f32;
    let scale = (t / source.width as f32).min(t / source.height as f32);

    // 极端长宽比时至少保留 1 像素
    let scaled_w = ((source.width as f32 * scale).round() as u32).clamp(1, target);
    let scaled_h = ((source.height as f32 * scale).round() as u32).clamp(1, target);

    let transform = Self {
      scale,
      offset_x: ((target - scaled_w) / 2) as i32,
      offset_y: ((target - scaled_h) / 2) as i32,
    };
    Ok((transform, Size::new(scaled_w, scaled_h)))
  }

  /// letterbox 像素坐标还原到原图坐标（去填充、去缩放），不做裁剪
  pub fn to_image(&self, bbox: &BBox<Letterbox>) -> BBox<Image> {
    let (ox, oy, s) = (self.offset_x as f32, self.offset_y as f32, self.scale);
    bbox.map_axes(|x| (x - ox) / s, |y| (y - oy) / s)
  }

  /// 原图坐标映射到 letterbox 像素坐标
  pub fn to_letterbox(&self, bbox: &BBox<Image>) -> BBox<Letterbox> {
    let (ox, oy, s) = (self.offset_x as f32, self.offset_y as f32, self.scale);
    bbox.map_axes(|x| x * s + ox, |y| y * s + oy)
  }
}

/// 将任意尺寸图像等比缩放并居中填充到 `S×S`，输出 [0,1] 归一化的 NCHW 张量。
///
/// 检测器阶段不做均值/方差归一化。
pub fn letterbox<const S: u32>(
  image: &RgbImage,
) -> Result<(RgbNchwTensor<S, S>, LetterboxTransform), CoreError> {
  let (transform, scaled) = LetterboxTransform::fit(Size::of(image), S)?;

  let resized = imageops::resize(image, scaled.width, scaled.height, FilterType::Triangle);
  let mut canvas = RgbImage::from_pixel(S, S, Rgb([LETTERBOX_PAD_VALUE; 3]));
  imageops::replace(
    &mut canvas,
    &resized,
    transform.offset_x as i64,
    transform.offset_y as i64,
  );

  debug!(
    "Letterbox: 缩放={:.4}, 偏移=({},{}), 缩放后尺寸={}",
    transform.scale, transform.offset_x, transform.offset_y, scaled
  );

  let tensor = RgbNchwTensor::from_image(&canvas, |_, v| v as f32 / 255.0)?;
  Ok((tensor, transform))
}

/// 按拍摄空间边界框裁剪并缩放到 `S×S`，做 ImageNet 归一化后输出 NCHW 张量
pub fn crop_to_tensor<const S: u32>(
  image: &RgbImage,
  bbox: &BBox<Capture>,
) -> Result<RgbNchwTensor<S, S>, CoreError> {
  if !bbox.is_finite() {
    return Err(CoreError::InvalidCrop(format!("边界框坐标非有限值: {:?}", bbox)));
  }

  let size = Size::of(image);
  let left = bbox.left.max(0.0) as u32;
  let top = bbox.top.max(0.0) as u32;
  let right = bbox.right.clamp(0.0, size.width as f32) as u32;
  let bottom = bbox.bottom.clamp(0.0, size.height as f32) as u32;

  if right <= left || bottom <= top {
    return Err(CoreError::InvalidCrop(format!(
      "裁剪尺寸为零: {:?} 位于 {} 图像内",
      bbox, size
    )));
  }

  let crop = imageops::crop_imm(image, left, top, right - left, bottom - top).to_image();
  let resized = imageops::resize(&crop, S, S, FilterType::Triangle);

  RgbNchwTensor::from_image(&resized, |c, v| {
    (v as f32 / 255.0 - IMAGENET_MEAN[c]) / IMAGENET_STD[c]
  })
}
