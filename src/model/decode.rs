// 该文件是 Niuheng （牛衡） 项目的一部分。
// src/model/decode.rs - 检测器输出解码
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

use tracing::debug;

use crate::{
  geometry::{BBox, Letterbox, Size},
  model::{Detection, backend::DetectorOutput},
  preprocess::LetterboxTransform,
};

/// COCO 数据集中 “cow” 的类别索引
pub const COW_CLASS_ID: usize = 19;
pub const DEFAULT_CONFIDENCE_THRESHOLD: f32 = 0.25;

/// 解码参数
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DecoderConfig {
  /// letterbox 画布边长 S
  pub input_size: u32,
  /// 只保留该类别
  pub target_class: usize,
  pub confidence_threshold: f32,
}

impl Default for DecoderConfig {
  fn default() -> Self {
    Self {
      input_size: crate::frame::DETECTOR_INPUT_SIZE,
      target_class: COW_CLASS_ID,
      confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
    }
  }
}

/// 把检测器输出的归一化 `(cx, cy, w, h)` 还原为原图像素坐标的检测结果
#[derive(Debug, Clone, Default)]
pub struct DetectionDecoder {
  config: DecoderConfig,
}

impl DetectionDecoder {
  pub fn new(config: DecoderConfig) -> Self {
    Self { config }
  }

  pub fn config(&self) -> &DecoderConfig {
    &self.config
  }

  /// 逐锚点取最高类别得分（并列时取较小的类别索引），
  /// 仅保留目标类别且得分不低于阈值的候选，其余在 NMS 之前丢弃。
  pub fn decode(
    &self,
    output: &DetectorOutput,
    transform: &LetterboxTransform,
    image_size: Size,
  ) -> Vec<Detection> {
    let s = self.config.input_size as f32;
    let mut detections = Vec::new();
    let mut target_candidates = 0usize;

    for anchor in 0..output.num_anchors() {
      let (class_id, score) = argmax_class(output, anchor);

      if class_id != self.config.target_class {
        continue;
      }
      target_candidates += 1;
      if !(score >= self.config.confidence_threshold) {
        continue;
      }

      let [cx, cy, w, h] = output.box_params(anchor);
      let letterboxed = BBox::<Letterbox>::from_center(cx * s, cy * s, w * s, h * s);
      let bbox = transform.to_image(&letterboxed).clamp_to(image_size);

      debug!(
        "锚点 {}: 归一化=({:.3},{:.3},{:.3},{:.3}) -> {:?} -> {:?}, 置信度={:.3}",
        anchor, cx, cy, w, h, letterboxed, bbox, score
      );

      detections.push(Detection {
        bbox,
        confidence: score,
        class_id,
      });
    }

    debug!(
      "解码完成: 锚点 {}, 目标类别候选 {}, 通过阈值 {}",
      output.num_anchors(),
      target_candidates,
      detections.len()
    );

    detections
  }
}

fn argmax_class(output: &DetectorOutput, anchor: usize) -> (usize, f32) {
  let mut best = (0usize, output.class_score(0, anchor));
  for c in 1..output.num_classes() {
    let score = output.class_score(c, anchor);
    if score > best.1 {
      best = (c, score);
    }
  }
  best
}

#[cfg(test)]
mod tests {
  use super::*;

  /// 构造单锚点输出，`scores` 为各类别得分
  fn single_anchor(params: [f32; 4], scores: &[f32]) -> DetectorOutput {
    let mut values = params.to_vec();
    values.extend_from_slice(scores);
    DetectorOutput::new(values, scores.len(), 1).unwrap()
  }

  fn cow_scores(score: f32) -> Vec<f32> {
    let mut scores = vec![0.0; 80];
    scores[COW_CLASS_ID] = score;
    scores
  }

  #[test]
  fn decodes_reference_scenario_exactly() {
    let output = single_anchor([0.5, 0.5, 0.2, 0.3], &cow_scores(0.9));
    let transform = LetterboxTransform {
      scale: 0.5,
      offset_x: 0,
      offset_y: 80,
    };

    let detections = DetectionDecoder::default().decode(&output, &transform, Size::new(1280, 960));

    assert_eq!(detections.len(), 1);
    let det = &detections[0];
    assert_eq!(det.class_id, COW_CLASS_ID);
    assert_eq!(det.confidence, 0.9);
    assert_eq!(det.bbox.as_array(), [512.0, 288.0, 768.0, 672.0]);
  }

  #[test]
  fn drops_other_classes_and_low_scores() {
    let transform = LetterboxTransform {
      scale: 1.0,
      offset_x: 0,
      offset_y: 0,
    };
    let size = Size::new(640, 640);
    let decoder = DetectionDecoder::default();

    let mut person = vec![0.0; 80];
    person[0] = 0.95;
    person[COW_CLASS_ID] = 0.9;
    assert!(decoder.decode(&single_anchor([0.5; 4], &person), &transform, size).is_empty());

    let weak = cow_scores(0.2);
    assert!(decoder.decode(&single_anchor([0.5; 4], &weak), &transform, size).is_empty());

    let exact = cow_scores(DEFAULT_CONFIDENCE_THRESHOLD);
    assert_eq!(decoder.decode(&single_anchor([0.5; 4], &exact), &transform, size).len(), 1);
  }

  #[test]
  fn ties_resolve_to_lowest_class() {
    let decoder = DetectionDecoder::new(DecoderConfig {
      target_class: 1,
      ..Default::default()
    });
    let transform = LetterboxTransform {
      scale: 1.0,
      offset_x: 0,
      offset_y: 0,
    };
    let output = single_anchor([0.5; 4], &[0.0, 0.7, 0.7]);
    let detections = decoder.decode(&output, &transform, Size::new(640, 640));
    assert_eq!(detections[0].class_id, 1);

    let decoder = DetectionDecoder::new(DecoderConfig {
      target_class: 2,
      ..Default::default()
    });
    assert!(decoder.decode(&output, &transform, Size::new(640, 640)).is_empty());
  }

  #[test]
  fn boxes_are_clamped_to_original_image() {
    let output = single_anchor([0.05, 0.5, 0.4, 0.9], &cow_scores(0.8));
    let transform = LetterboxTransform {
      scale: 0.5,
      offset_x: 0,
      offset_y: 80,
    };
    let det = &DetectionDecoder::default().decode(&output, &transform, Size::new(1280, 960))[0];
    assert_eq!(det.bbox.left, 0.0);
    assert_eq!(det.bbox.top, 0.0);
    assert_eq!(det.bbox.bottom, 960.0);
  }

  #[test]
  fn letterbox_round_trip_through_decoder() {
    let (transform, _) = LetterboxTransform::fit(Size::new(1920, 1080), 640).unwrap();
    let original = BBox::<crate::geometry::Image>::new(300.0, 200.0, 900.0, 700.0);
    let lb = transform.to_letterbox(&original);

    let s = 640.0;
    let params = [
      (lb.left + lb.right) / 2.0 / s,
      (lb.top + lb.bottom) / 2.0 / s,
      lb.width() / s,
      lb.height() / s,
    ];
    let output = single_anchor(params, &cow_scores(0.6));
    let det = &DetectionDecoder::default().decode(&output, &transform, Size::new(1920, 1080))[0];

    for (a, b) in original.as_array().iter().zip(det.bbox.as_array()) {
      assert!((a - b).abs() <= 1.0, "{} vs {}", a, b);
    }
  }
}
