// 该文件是 Niuheng （牛衡） 项目的一部分。
// src/output.rs - 结果输出
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
use serde::Serialize;
use thiserror::Error;
use url::Url;

use crate::{FromUrl, model::FrameDetections, pipeline::PredictionReport};

pub trait Render<Frame, Output>: Sized {
  type Error;
  fn render_result(&self, frame: &Frame, result: &Output) -> Result<(), Self::Error>;
}

/// 需要在图像上标出的框
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Mark {
  /// 检测框
  Detection([f32; 4]),
  /// 参与重量预测的框
  Weighed([f32; 4]),
  /// 预测失败的框
  Rejected([f32; 4]),
}

/// 可以画在原图上并随图保存元数据的结果
pub trait Annotation: Serialize {
  fn marks(&self) -> Vec<Mark>;

  /// 画在第一个框旁的文字
  fn label(&self) -> Option<String> {
    None
  }

  fn is_empty(&self) -> bool {
    self.marks().is_empty()
  }
}

impl Annotation for FrameDetections {
  fn marks(&self) -> Vec<Mark> {
    self
      .items
      .iter()
      .map(|item| Mark::Detection(item.bbox.as_array()))
      .collect()
  }
}

impl Annotation for PredictionReport {
  fn marks(&self) -> Vec<Mark> {
    let bbox = self.weight.scaled_bbox.as_array();
    if self.weight.is_valid() {
      vec![Mark::Weighed(bbox)]
    } else {
      vec![Mark::Rejected(bbox)]
    }
  }

  fn label(&self) -> Option<String> {
    Some(if self.weight.is_valid() {
      format!("{:.1} kg  {:.2} m", self.weight.weight_kg, self.distance_m)
    } else {
      format!("-- kg  {:.2} m", self.distance_m)
    })
  }
}

#[cfg(any(feature = "save_image_file", feature = "directory_record"))]
pub mod draw;

#[cfg(any(feature = "save_image_file", feature = "directory_record"))]
pub use self::draw::FontError;

#[cfg(feature = "save_image_file")]
mod save_image_file;
#[cfg(feature = "save_image_file")]
pub use self::save_image_file::{SaveImageFileError, SaveImageFileOutput};

#[cfg(feature = "directory_record")]
mod directory_record;
#[cfg(feature = "directory_record")]
pub use self::directory_record::{DirectoryRecordOutput, DirectoryRecordOutputError};

#[derive(Error, Debug)]
pub enum OutputError {
  #[cfg(feature = "save_image_file")]
  #[error("保存图像文件错误: {0}")]
  SaveImageFileError(#[from] SaveImageFileError),
  #[cfg(feature = "directory_record")]
  #[error("目录记录输出错误: {0}")]
  DirectoryRecordOutputError(#[from] DirectoryRecordOutputError),
  #[error("URI 方案不匹配")]
  SchemeMismatch,
}

pub enum OutputWrapper {
  #[cfg(feature = "save_image_file")]
  SaveImageFileOutput(SaveImageFileOutput),
  #[cfg(feature = "directory_record")]
  DirectoryRecordOutput(DirectoryRecordOutput),
  /// 只记录日志，不落盘
  Discard,
}

impl FromUrl for OutputWrapper {
  type Error = OutputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    #[allow(unused_imports)]
    use crate::FromUrlWithScheme;

    match url.scheme() {
      #[cfg(feature = "save_image_file")]
      SaveImageFileOutput::SCHEME => {
        let output = SaveImageFileOutput::from_url(url)?;
        Ok(OutputWrapper::SaveImageFileOutput(output))
      }
      #[cfg(feature = "directory_record")]
      DirectoryRecordOutput::SCHEME => {
        let output = DirectoryRecordOutput::from_url(url)?;
        Ok(OutputWrapper::DirectoryRecordOutput(output))
      }
      "null" => Ok(OutputWrapper::Discard),
      _ => Err(OutputError::SchemeMismatch),
    }
  }
}

impl<R: Annotation> Render<RgbImage, R> for OutputWrapper {
  type Error = OutputError;

  fn render_result(&self, frame: &RgbImage, result: &R) -> Result<(), Self::Error> {
    match self {
      #[cfg(feature = "save_image_file")]
      OutputWrapper::SaveImageFileOutput(output) => output
        .render_result(frame, result)
        .map_err(OutputError::from),
      #[cfg(feature = "directory_record")]
      OutputWrapper::DirectoryRecordOutput(output) => output
        .render_result(frame, result)
        .map_err(OutputError::from),
      OutputWrapper::Discard => {
        tracing::debug!("丢弃输出: {} 个标记", result.marks().len());
        Ok(())
      }
    }
  }
}
