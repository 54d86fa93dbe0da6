// 该文件是 Niuheng （牛衡） 项目的一部分。
// src/output/directory_record.rs - 按日期目录记录结果
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

use std::{
  path::PathBuf,
  sync::atomic::{AtomicU16, Ordering},
};

use chrono::{Datelike, Local};
use image::RgbImage;
use thiserror::Error;
use tracing::debug;

use crate::{
  FromUrl, FromUrlWithScheme,
  output::{
    Annotation, Render,
    draw::{Draw, FontError, Record},
  },
};

#[derive(Error, Debug)]
pub enum DirectoryRecordOutputError {
  #[error("URI 方案不匹配")]
  SchemeMismatch,
  #[error("图像错误: {0}")]
  ImageError(#[from] image::ImageError),
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("字体错误: {0}")]
  FontError(#[from] FontError),
}

/// 存放方式：`draw` 保存标注后的图像，`raw` 保存原图；两者都附带 JSON 记录
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Style {
  Draw,
  Raw,
}

/// `folder:///data/records?style=raw&always&font=/usr/share/fonts/DejaVuSans.ttf`
///
/// 结果保存在 `目录/年/月/日/时-分-秒-序号.png`，默认只保存有标记的结果。
pub struct DirectoryRecordOutput {
  directory: PathBuf,
  style: Style,
  draw: Draw,
  frame_counter: AtomicU16,
  always: bool,
}

impl FromUrlWithScheme for DirectoryRecordOutput {
  const SCHEME: &'static str = "folder";
}

impl FromUrl for DirectoryRecordOutput {
  type Error = DirectoryRecordOutputError;

  fn from_url(uri: &url::Url) -> Result<Self, Self::Error> {
    if uri.scheme() != Self::SCHEME {
      return Err(DirectoryRecordOutputError::SchemeMismatch);
    }

    let style = match uri.query_pairs().find(|(k, _)| k == "style") {
      Some((_, v)) if v == "raw" => Style::Raw,
      _ => Style::Draw,
    };
    let always = uri.query_pairs().any(|(k, _)| k == "always");

    Ok(DirectoryRecordOutput {
      directory: PathBuf::from(uri.path()),
      style,
      draw: Draw::from_url(uri)?,
      frame_counter: AtomicU16::new(0),
      always,
    })
  }
}

impl DirectoryRecordOutput {
  fn frame_id(&self) -> u16 {
    self.frame_counter.fetch_add(1, Ordering::Relaxed).wrapping_add(1)
  }

  fn frame_path(&self) -> Result<PathBuf, DirectoryRecordOutputError> {
    let now = Local::now();
    let directory = self
      .directory
      .join(now.year().to_string())
      .join(format!("{:02}", now.month()))
      .join(format!("{:02}", now.day()));
    std::fs::create_dir_all(&directory)?;

    Ok(directory.join(format!(
      "{}-{:04X}.png",
      now.format("%H-%M-%S"),
      self.frame_id()
    )))
  }
}

impl<R: Annotation> Render<RgbImage, R> for DirectoryRecordOutput {
  type Error = DirectoryRecordOutputError;

  fn render_result(&self, frame: &RgbImage, result: &R) -> Result<(), Self::Error> {
    if !self.always && result.is_empty() {
      return Ok(());
    }

    let path = self.frame_path()?;
    match self.style {
      Style::Draw => self.draw.annotate(frame, result).save(&path)?,
      Style::Raw => frame.save(&path)?,
    }
    Record.record(result, &path)?;
    debug!("记录结果到 {}", path.display());

    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::{
    geometry::{BBox, Image, Size},
    model::{Detection, FrameDetections},
  };

  fn files_under(dir: &std::path::Path) -> Vec<PathBuf> {
    let mut files = Vec::new();
    let mut stack = vec![dir.to_path_buf()];
    while let Some(current) = stack.pop() {
      for entry in std::fs::read_dir(current).unwrap() {
        let path = entry.unwrap().path();
        if path.is_dir() {
          stack.push(path);
        } else {
          files.push(path);
        }
      }
    }
    files.sort();
    files
  }

  #[test]
  fn skips_empty_results_unless_always() {
    let dir = tempfile::tempdir().unwrap();
    let url = url::Url::parse(&format!("folder://{}?style=raw", dir.path().display())).unwrap();
    let output = DirectoryRecordOutput::from_url(&url).unwrap();
    let frame = RgbImage::new(8, 8);

    output
      .render_result(&frame, &FrameDetections::empty(Size::new(8, 8)))
      .unwrap();
    assert!(files_under(dir.path()).is_empty());

    let detections = FrameDetections {
      image_size: Size::new(8, 8),
      items: vec![Detection {
        bbox: BBox::<Image>::new(1.0, 1.0, 6.0, 6.0),
        confidence: 0.7,
        class_id: 19,
      }]
      .into_boxed_slice(),
    };
    output.render_result(&frame, &detections).unwrap();

    let files = files_under(dir.path());
    assert_eq!(files.len(), 2);
    assert!(files.iter().any(|p| p.extension().is_some_and(|e| e == "json")));
    assert!(files.iter().any(|p| p.extension().is_some_and(|e| e == "png")));
  }
}
