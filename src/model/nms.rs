// 该文件是 Niuheng （牛衡） 项目的一部分。
// src/model/nms.rs - 非极大值抑制
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

use std::cmp::Ordering;

use crate::model::Detection;

pub const DEFAULT_IOU_THRESHOLD: f32 = 0.45;

/// 非极大值抑制
///
/// 输入应为同一类别的检测结果。按置信度降序（稳定排序）逐个保留，
/// 与已保留框 IoU 大于 `iou_threshold` 的框被抑制。输出按置信度降序排列。
pub fn non_max_suppression(mut detections: Vec<Detection>, iou_threshold: f32) -> Vec<Detection> {
  detections.sort_by(|a, b| {
    b.confidence
      .partial_cmp(&a.confidence)
      .unwrap_or(Ordering::Equal)
  });

  let mut suppressed = vec![false; detections.len()];
  let mut result = Vec::new();

  for i in 0..detections.len() {
    if suppressed[i] {
      continue;
    }

    let best = &detections[i];
    for j in (i + 1)..detections.len() {
      if !suppressed[j] && best.bbox.iou(&detections[j].bbox) > iou_threshold {
        suppressed[j] = true;
      }
    }
    result.push(best.clone());
  }

  result
}
