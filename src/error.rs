// 该文件是 Niuheng （牛衡） 项目的一部分。
// src/error.rs - 推理核心错误分类
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

use thiserror::Error;

/// 推理核心内部各阶段使用的错误。
///
/// 只有 [`CoreError::ModelLoad`] 会越过核心边界返回给调用方，
/// 其余错误在检测器/回归器边界被转换为空结果或失败结果并记录日志。
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CoreError {
  #[error("模型加载失败: {path}: {reason}")]
  ModelLoad { path: String, reason: String },
  #[error("输入无效: {0}")]
  InvalidInput(String),
  #[error("裁剪区域无效: {0}")]
  InvalidCrop(String),
  #[error("距离超出工作范围: {0:.2} m")]
  InvalidDistance(f32),
  #[error("推理失败: {0}")]
  Inference(String),
  #[error("模型已释放")]
  Released,
}

impl CoreError {
  pub fn model_load(path: impl Into<String>, reason: impl std::fmt::Display) -> Self {
    CoreError::ModelLoad {
      path: path.into(),
      reason: reason.to_string(),
    }
  }

  pub fn inference(reason: impl std::fmt::Display) -> Self {
    CoreError::Inference(reason.to_string())
  }

  /// 是否为需要用户介入的致命错误
  pub fn is_fatal(&self) -> bool {
    matches!(self, CoreError::ModelLoad { .. })
  }
}
