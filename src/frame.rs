// 该文件是 Niuheng （牛衡） 项目的一部分。
// src/frame.rs - NCHW 浮点张量帧定义
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

use image::RgbImage;
use ndarray::Array4;

use crate::error::CoreError;

const RGB_CHANNELS: usize = 3;

/// 检测器输入边长
pub const DETECTOR_INPUT_SIZE: u32 = 640;
/// 重量回归模型输入边长
pub const REGRESSOR_INPUT_SIZE: u32 = 224;

/// 检测器输入张量 `[1, 3, 640, 640]`
pub type DetectorTensor = RgbNchwTensor<DETECTOR_INPUT_SIZE, DETECTOR_INPUT_SIZE>;
/// 回归模型图像输入张量 `[1, 3, 224, 224]`
pub type RegressorTensor = RgbNchwTensor<REGRESSOR_INPUT_SIZE, REGRESSOR_INPUT_SIZE>;

/// 通道优先（R、G、B 各占一块连续平面）的浮点图像张量
#[derive(Debug, Clone)]
pub struct RgbNchwTensor<const W: u32, const H: u32> {
  data: Box<[f32]>,
}

impl<const W: u32, const H: u32> Default for RgbNchwTensor<W, H> {
  fn default() -> Self {
    let size = RGB_CHANNELS * (W as usize) * (H as usize);
    let data = vec![0f32; size].into_boxed_slice();
    Self { data }
  }
}

impl<const W: u32, const H: u32> TryFrom<Vec<f32>> for RgbNchwTensor<W, H> {
  type Error = CoreError;

  fn try_from(data: Vec<f32>) -> Result<Self, Self::Error> {
    if data.len() != RGB_CHANNELS * W as usize * H as usize {
      return Err(CoreError::InvalidInput(format!(
        "数据长度不匹配: 期望长度 {}, 实际长度 {}",
        RGB_CHANNELS * W as usize * H as usize,
        data.len()
      )));
    }

    Ok(Self {
      data: data.into_boxed_slice(),
    })
  }
}

impl<const W: u32, const H: u32> RgbNchwTensor<W, H> {
  /// 由 `W×H` 的 RGB 图像逐像素转换，`f` 对每个通道的 0–255 取值做归一化
  pub fn from_image(image: &RgbImage, f: impl Fn(usize, u8) -> f32) -> Result<Self, CoreError> {
    if image.dimensions() != (W, H) {
      return Err(CoreError::InvalidInput(format!(
        "图像尺寸不匹配: 期望 {}x{}, 实际 {}x{}",
        W,
        H,
        image.width(),
        image.height()
      )));
    }

    let mut tensor = Self::default();
    let plane = tensor.plane_size();
    let slice = tensor.as_mut();

    for (x, y, pixel) in image.enumerate_pixels() {
      let idx = (y as usize) * (W as usize) + (x as usize);
      for c in 0..RGB_CHANNELS {
        slice[c * plane + idx] = f(c, pixel[c]);
      }
    }

    Ok(tensor)
  }

  pub fn height(&self) -> usize {
    H as usize
  }

  pub fn width(&self) -> usize {
    W as usize
  }

  pub fn channels(&self) -> usize {
    RGB_CHANNELS
  }

  pub fn plane_size(&self) -> usize {
    (W as usize) * (H as usize)
  }

  pub fn as_slice(&self) -> &[f32] {
    &self.data
  }

  /// 读取某通道某像素的值
  pub fn get(&self, channel: usize, x: u32, y: u32) -> f32 {
    self.data[channel * self.plane_size() + (y as usize) * (W as usize) + (x as usize)]
  }

  /// 转为批大小为 1 的 `[1, 3, H, W]` 数组
  pub fn to_array(&self) -> Array4<f32> {
    // 长度由构造保证，不会失败
    Array4::from_shape_fn((1, RGB_CHANNELS, H as usize, W as usize), |(_, c, y, x)| {
      self.data[c * self.plane_size() + y * (W as usize) + x]
    })
  }
}

impl<const W: u32, const H: u32> AsMut<[f32]> for RgbNchwTensor<W, H> {
  fn as_mut(&mut self) -> &mut [f32] {
    &mut self.data
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use image::Rgb;

  #[test]
  fn planes_are_contiguous_per_channel() {
    let mut image = RgbImage::new(2, 2);
    image.put_pixel(1, 0, Rgb([10, 20, 30]));
    let tensor = RgbNchwTensor::<2, 2>::from_image(&image, |_, v| v as f32).unwrap();

    assert_eq!(tensor.as_slice()[1], 10.0);
    assert_eq!(tensor.as_slice()[4 + 1], 20.0);
    assert_eq!(tensor.as_slice()[8 + 1], 30.0);
    assert_eq!(tensor.get(2, 1, 0), 30.0);
  }

  #[test]
  fn rejects_wrong_dimensions() {
    let image = RgbImage::new(3, 2);
    assert!(RgbNchwTensor::<2, 2>::from_image(&image, |_, v| v as f32).is_err());
    assert!(RgbNchwTensor::<2, 2>::try_from(vec![0.0; 5]).is_err());
  }

  #[test]
  fn array_has_batch_dimension() {
    let tensor = RgbNchwTensor::<4, 3>::default();
    assert_eq!(tensor.to_array().shape(), &[1, 3, 3, 4]);
  }
}
