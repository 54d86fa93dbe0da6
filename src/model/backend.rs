// 该文件是 Niuheng （牛衡） 项目的一部分。
// src/model/backend.rs - 推理后端接口
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

use crate::{
  error::CoreError,
  frame::{DetectorTensor, RegressorTensor},
};

/// 检测器原始输出 `[1, 4 + num_classes, num_anchors]`。
///
/// 第 `a` 行存放所有锚点的第 `a` 个属性：前 4 行为 `(cx, cy, w, h)`，
/// 之后每行是一个类别的得分。
#[derive(Debug, Clone)]
pub struct DetectorOutput {
  values: Box<[f32]>,
  num_classes: usize,
  num_anchors: usize,
}

impl DetectorOutput {
  pub const BOX_PARAMS: usize = 4;

  pub fn new(values: Vec<f32>, num_classes: usize, num_anchors: usize) -> Result<Self, CoreError> {
    if num_classes == 0 {
      return Err(CoreError::inference("检测器输出不含类别得分"));
    }

    let expected = (Self::BOX_PARAMS + num_classes) * num_anchors;
    if values.len() != expected {
      return Err(CoreError::inference(format!(
        "检测器输出长度不匹配: 期望 {} (= (4 + {}) x {}), 实际 {}",
        expected,
        num_classes,
        num_anchors,
        values.len()
      )));
    }

    Ok(Self {
      values: values.into_boxed_slice(),
      num_classes,
      num_anchors,
    })
  }

  /// 从张量形状 `[1, rows, anchors]` 推断类别数
  pub fn from_shape(values: Vec<f32>, shape: &[usize]) -> Result<Self, CoreError> {
    match shape {
      [1, rows, anchors] if *rows > Self::BOX_PARAMS => {
        Self::new(values, rows - Self::BOX_PARAMS, *anchors)
      }
      _ => Err(CoreError::inference(format!(
        "检测器输出形状无效: {:?}",
        shape
      ))),
    }
  }

  pub fn num_classes(&self) -> usize {
    self.num_classes
  }

  pub fn num_anchors(&self) -> usize {
    self.num_anchors
  }

  #[inline]
  pub fn get(&self, attribute: usize, anchor: usize) -> f32 {
    self.values[attribute * self.num_anchors + anchor]
  }

  /// 锚点的 `(cx, cy, w, h)`
  pub fn box_params(&self, anchor: usize) -> [f32; 4] {
    [
      self.get(0, anchor),
      self.get(1, anchor),
      self.get(2, anchor),
      self.get(3, anchor),
    ]
  }

  pub fn class_score(&self, class_id: usize, anchor: usize) -> f32 {
    self.get(Self::BOX_PARAMS + class_id, anchor)
  }
}

/// 检测模型后端：输入 letterbox 张量，输出原始检测张量
pub trait DetectorBackend: Send {
  fn forward(&mut self, input: &DetectorTensor) -> Result<DetectorOutput, CoreError>;
}

/// 重量回归模型后端：输入裁剪图像张量与尺寸特征，输出单个标量
pub trait RegressorBackend: Send {
  fn forward(&mut self, image: &RegressorTensor, size_feature: f32) -> Result<f32, CoreError>;
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn indexes_attribute_major() {
    // 2 个类别，3 个锚点
    let values: Vec<f32> = (0..18).map(|v| v as f32).collect();
    let output = DetectorOutput::new(values, 2, 3).unwrap();

    assert_eq!(output.box_params(1), [1.0, 4.0, 7.0, 10.0]);
    assert_eq!(output.class_score(0, 2), 14.0);
    assert_eq!(output.class_score(1, 0), 15.0);
  }

  #[test]
  fn rejects_malformed_output() {
    assert!(DetectorOutput::new(vec![0.0; 17], 2, 3).is_err());
    assert!(DetectorOutput::new(vec![0.0; 12], 0, 3).is_err());
    assert!(DetectorOutput::from_shape(vec![0.0; 12], &[1, 4, 3]).is_err());
    assert_eq!(
      DetectorOutput::from_shape(vec![0.0; 84 * 10], &[1, 84, 10])
        .unwrap()
        .num_classes(),
      80
    );
  }
}
