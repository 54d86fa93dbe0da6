// 该文件是 Niuheng （牛衡） 项目的一部分。
// src/output/draw.rs - 在图像上绘制结果
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

use std::path::Path;

use ab_glyph::{FontArc, InvalidFont, PxScale};
use image::{Rgb, RgbImage};
use imageproc::{
  drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut, text_size},
  rect::Rect,
};
use thiserror::Error;
use url::Url;

use crate::output::{Annotation, Mark};

const BOX_THICKNESS: i32 = 3;
const LABEL_FONT_SIZE: f32 = 24.0;
const LABEL_PADDING: i32 = 2;
const DETECTION_COLOR: [u8; 3] = [0, 0, 255]; // 蓝色
const WEIGHED_COLOR: [u8; 3] = [0, 200, 0]; // 绿色
const REJECTED_COLOR: [u8; 3] = [255, 0, 0]; // 红色
const LABEL_TEXT_COLOR: [u8; 3] = [255, 255, 255];

#[derive(Error, Debug)]
pub enum FontError {
  #[error("无法读取字体文件: {0}")]
  Io(#[from] std::io::Error),
  #[error("字体文件无效: {0}")]
  Invalid(#[from] InvalidFont),
}

/// 读取 TrueType/OpenType 字体
pub fn load_font(path: impl AsRef<Path>) -> Result<FontArc, FontError> {
  let data = std::fs::read(path)?;
  Ok(FontArc::try_from_vec(data)?)
}

/// 没有字体时只画框，重量与距离仍写在 JSON 记录里
pub struct Draw {
  thickness: i32,
  font: Option<FontArc>,
  font_scale: PxScale,
  detection_color: [u8; 3],
  weighed_color: [u8; 3],
  rejected_color: [u8; 3],
}

impl Default for Draw {
  fn default() -> Self {
    Self {
      thickness: BOX_THICKNESS,
      font: None,
      font_scale: PxScale::from(LABEL_FONT_SIZE),
      detection_color: DETECTION_COLOR,
      weighed_color: WEIGHED_COLOR,
      rejected_color: REJECTED_COLOR,
    }
  }
}

impl Draw {
  /// 按输出 URL 的 `font=<路径>` 参数加载标签字体
  pub fn from_url(url: &Url) -> Result<Self, FontError> {
    let draw = Self::default();
    match url.query_pairs().find(|(k, _)| k == "font") {
      Some((_, path)) => Ok(draw.with_font(load_font(path.as_ref())?)),
      None => Ok(draw),
    }
  }

  pub fn with_thickness(mut self, thickness: i32) -> Self {
    self.thickness = thickness.max(1);
    self
  }

  pub fn with_font(mut self, font: FontArc) -> Self {
    self.font = Some(font);
    self
  }

  pub fn with_font_size(mut self, size: f32) -> Self {
    self.font_scale = PxScale::from(size.max(1.0));
    self
  }

  pub fn has_font(&self) -> bool {
    self.font.is_some()
  }

  /// 在框的上方绘制标签，上方放不下时放在框内
  fn draw_label(&self, image: &mut RgbImage, bbox: &[f32; 4], label: &str, color: [u8; 3]) {
    let Some(font) = &self.font else {
      return;
    };
    let (w, h) = (image.width() as i32, image.height() as i32);
    if w == 0 || h == 0 || label.is_empty() {
      return;
    }

    let (text_width, text_height) = text_size(self.font_scale, font, label);
    let label_height = text_height as i32 + 2 * LABEL_PADDING;
    let label_width = (text_width as i32 + 2 * LABEL_PADDING).min(w);

    let x = (bbox[0].floor() as i32).clamp(0, (w - label_width).max(0));
    let top = bbox[1].floor() as i32;
    let y = if top >= label_height { top - label_height } else { top.clamp(0, h - 1) };

    let rect = Rect::at(x, y).of_size(label_width.max(1) as u32, label_height.max(1) as u32);
    draw_filled_rect_mut(image, rect, Rgb(color));
    draw_text_mut(
      image,
      Rgb(LABEL_TEXT_COLOR),
      x + LABEL_PADDING,
      y + LABEL_PADDING,
      self.font_scale,
      font,
      label,
    );
  }

  /// 绘制像素坐标 `[left, top, right, bottom]` 的边框，向内加粗
  fn draw_bbox(&self, image: &mut RgbImage, bbox: &[f32; 4], color: [u8; 3]) {
    let (w, h) = (image.width() as i32, image.height() as i32);
    if w == 0 || h == 0 {
      return;
    }

    let x_min = (bbox[0].floor() as i32).clamp(0, w - 1);
    let y_min = (bbox[1].floor() as i32).clamp(0, h - 1);
    let x_max = (bbox[2].ceil() as i32).clamp(0, w - 1);
    let y_max = (bbox[3].ceil() as i32).clamp(0, h - 1);

    for t in 0..self.thickness {
      let width = x_max - x_min - 2 * t;
      let height = y_max - y_min - 2 * t;
      if width <= 0 || height <= 0 {
        break;
      }
      let rect = Rect::at(x_min + t, y_min + t).of_size(width as u32 + 1, height as u32 + 1);
      draw_hollow_rect_mut(image, rect, Rgb(color));
    }
  }

  fn color_of(&self, mark: &Mark) -> ([f32; 4], [u8; 3]) {
    match *mark {
      Mark::Detection(bbox) => (bbox, self.detection_color),
      Mark::Weighed(bbox) => (bbox, self.weighed_color),
      Mark::Rejected(bbox) => (bbox, self.rejected_color),
    }
  }

  pub fn draw_annotation<R: Annotation>(&self, image: &mut RgbImage, result: &R) {
    let marks = result.marks();
    for mark in &marks {
      let (bbox, color) = self.color_of(mark);
      self.draw_bbox(image, &bbox, color);
    }

    // 标签跟随第一个框
    if let (Some(mark), Some(label)) = (marks.first(), result.label()) {
      let (bbox, color) = self.color_of(mark);
      self.draw_label(image, &bbox, &label, color);
    }
  }

  pub fn annotate<R: Annotation>(&self, frame: &RgbImage, result: &R) -> RgbImage {
    let mut image = frame.clone();
    self.draw_annotation(&mut image, result);
    image
  }
}

/// 把结果写成与图像同名的 JSON 文件
pub struct Record;

impl Record {
  pub fn record<R: Annotation>(&self, result: &R, image_path: &Path) -> Result<(), std::io::Error> {
    let json = serde_json::to_string_pretty(result).map_err(std::io::Error::other)?;
    std::fs::write(image_path.with_extension("json"), json)
  }
}
