// 该文件是 Niuheng （牛衡） 项目的一部分。
// src/geometry.rs - 带坐标空间标记的边界框
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

//! 边界框在不同坐标空间之间流转：检测器的 letterbox 空间、被分析帧（预览）的
//! 原图空间、以及高分辨率拍摄图像空间。空间以零大小类型参数标记，
//! 不同空间的框不能混用，只能通过 [`crate::preprocess::LetterboxTransform`]
//! 或 [`crate::mapping`] 中的函数显式转换。

use std::{fmt, marker::PhantomData};

use serde::Serialize;

/// 坐标空间标记
pub trait Space: Copy + Default + fmt::Debug + Send + Sync + 'static {
  const NAME: &'static str;
}

/// 检测器输入（S×S letterbox 画布）像素空间
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Letterbox;

/// 被分析帧的原图像素空间（实时检测时即预览帧）
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Image;

/// 高分辨率拍摄图像像素空间
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Capture;

impl Space for Letterbox {
  const NAME: &'static str = "letterbox";
}

impl Space for Image {
  const NAME: &'static str = "image";
}

impl Space for Capture {
  const NAME: &'static str = "capture";
}

/// 图像尺寸（像素）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Size {
  pub width: u32,
  pub height: u32,
}

impl Size {
  pub const fn new(width: u32, height: u32) -> Self {
    Self { width, height }
  }

  pub fn of(image: &image::RgbImage) -> Self {
    let (width, height) = image.dimensions();
    Self { width, height }
  }

  pub fn is_empty(&self) -> bool {
    self.width == 0 || self.height == 0
  }
}

impl fmt::Display for Size {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}x{}", self.width, self.height)
  }
}

/// 轴对齐边界框 `[left, top, right, bottom]`，坐标空间由 `S` 标记
#[derive(Clone, Copy, PartialEq, Serialize)]
#[serde(bound(serialize = ""))]
pub struct BBox<S: Space> {
  pub left: f32,
  pub top: f32,
  pub right: f32,
  pub bottom: f32,
  #[serde(skip)]
  _space: PhantomData<S>,
}

impl<S: Space> fmt::Debug for BBox<S> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(
      f,
      "BBox<{}>[{:.1}, {:.1}, {:.1}, {:.1}]",
      S::NAME,
      self.left,
      self.top,
      self.right,
      self.bottom
    )
  }
}

impl<S: Space> BBox<S> {
  /// 由任意两个角点构造，保证 `left ≤ right`、`top ≤ bottom`
  pub fn new(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
    Self {
      left: x1.min(x2),
      top: y1.min(y2),
      right: x1.max(x2),
      bottom: y1.max(y2),
      _space: PhantomData,
    }
  }

  /// 由中心点与宽高构造
  pub fn from_center(cx: f32, cy: f32, w: f32, h: f32) -> Self {
    Self::new(cx - w / 2.0, cy - h / 2.0, cx + w / 2.0, cy + h / 2.0)
  }

  pub fn width(&self) -> f32 {
    self.right - self.left
  }

  pub fn height(&self) -> f32 {
    self.bottom - self.top
  }

  pub fn area(&self) -> f32 {
    self.width() * self.height()
  }

  pub fn is_finite(&self) -> bool {
    self.left.is_finite() && self.top.is_finite() && self.right.is_finite() && self.bottom.is_finite()
  }

  /// 限制在 `[0, width] × [0, height]` 范围内
  pub fn clamp_to(&self, size: Size) -> Self {
    let (w, h) = (size.width as f32, size.height as f32);
    Self::new(
      self.left.clamp(0.0, w),
      self.top.clamp(0.0, h),
      self.right.clamp(0.0, w),
      self.bottom.clamp(0.0, h),
    )
  }

  /// 交并比，并集面积为零时返回 0
  pub fn iou(&self, other: &Self) -> f32 {
    let x1 = self.left.max(other.left);
    let y1 = self.top.max(other.top);
    let x2 = self.right.min(other.right);
    let y2 = self.bottom.min(other.bottom);

    let intersection = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
    let union = self.area() + other.area() - intersection;

    if union > 0.0 {
      intersection / union
    } else {
      0.0
    }
  }

  pub fn as_array(&self) -> [f32; 4] {
    [self.left, self.top, self.right, self.bottom]
  }

  /// 按坐标轴独立缩放并重新标记坐标空间，仅供本 crate 的空间转换函数使用
  pub(crate) fn map_axes<T: Space>(&self, fx: impl Fn(f32) -> f32, fy: impl Fn(f32) -> f32) -> BBox<T> {
    BBox::new(fx(self.left), fy(self.top), fx(self.right), fy(self.bottom))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn new_orders_corners() {
    let b = BBox::<Image>::new(10.0, 40.0, 2.0, 5.0);
    assert_eq!(b.as_array(), [2.0, 5.0, 10.0, 40.0]);
    assert_eq!(b.width(), 8.0);
    assert_eq!(b.height(), 35.0);
  }

  #[test]
  fn clamp_keeps_box_inside_image() {
    let b = BBox::<Image>::new(-5.0, -1.0, 120.0, 90.0).clamp_to(Size::new(100, 80));
    assert_eq!(b.as_array(), [0.0, 0.0, 100.0, 80.0]);
  }

  #[test]
  fn iou_of_identical_and_disjoint_boxes() {
    let a = BBox::<Image>::new(0.0, 0.0, 10.0, 10.0);
    let b = BBox::<Image>::new(20.0, 20.0, 30.0, 30.0);
    assert_eq!(a.iou(&a), 1.0);
    assert_eq!(a.iou(&b), 0.0);
  }

  #[test]
  fn iou_with_zero_union_is_zero() {
    let p = BBox::<Image>::new(5.0, 5.0, 5.0, 5.0);
    assert_eq!(p.iou(&p), 0.0);
  }

  #[test]
  fn iou_of_half_overlap() {
    let a = BBox::<Image>::new(0.0, 0.0, 10.0, 10.0);
    let b = BBox::<Image>::new(5.0, 0.0, 15.0, 10.0);
    // 交集 50，并集 150
    assert!((a.iou(&b) - 1.0 / 3.0).abs() < 1e-6);
  }
}
