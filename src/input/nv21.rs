// 该文件是 Niuheng （牛衡） 项目的一部分。
// src/input/nv21.rs - NV21 原始帧输入
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

use std::{fs::File, io::Read, path::PathBuf};

use image::{Rgb, RgbImage, imageops};
use thiserror::Error;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::{FromUrl, FromUrlWithScheme};

const NV21_SCHEME: &str = "nv21";

#[derive(Error, Debug)]
pub enum Nv21InputError {
  #[error("URI schema mismatch")]
  SchemaMismatch,
  #[error("缺少参数: {0}")]
  MissingParam(&'static str),
  #[error("参数 {0} 无效: {1}")]
  InvalidParam(&'static str, String),
  #[error("I/O error: {0}")]
  IoError(#[from] std::io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rotation {
  None,
  Cw90,
  Cw180,
  Cw270,
}

impl TryFrom<u32> for Rotation {
  type Error = Nv21InputError;

  fn try_from(degrees: u32) -> Result<Self, Self::Error> {
    match degrees % 360 {
      0 => Ok(Rotation::None),
      90 => Ok(Rotation::Cw90),
      180 => Ok(Rotation::Cw180),
      270 => Ok(Rotation::Cw270),
      _ => Err(Nv21InputError::InvalidParam("rotate", degrees.to_string())),
    }
  }
}

impl Rotation {
  pub fn apply(self, image: RgbImage) -> RgbImage {
    match self {
      Rotation::None => image,
      Rotation::Cw90 => imageops::rotate90(&image),
      Rotation::Cw180 => imageops::rotate180(&image),
      Rotation::Cw270 => imageops::rotate270(&image),
    }
  }
}

/// 一帧 NV21 数据的字节数：Y 平面 + 交错的 VU 平面
pub fn nv21_frame_len(width: u32, height: u32) -> usize {
  let (w, h) = (width as usize, height as usize);
  w * h + 2 * w.div_ceil(2) * h.div_ceil(2)
}

/// BT.601 有限范围 YUV 转 RGB（整数运算，10 位定点）
#[inline]
fn yuv_to_rgb(y: u8, u: u8, v: u8) -> Rgb<u8> {
  let y = (y as i32 - 16).max(0) * 1192;
  let u = u as i32 - 128;
  let v = v as i32 - 128;

  let r = (y + 1634 * v).clamp(0, 262143);
  let g = (y - 833 * v - 400 * u).clamp(0, 262143);
  let b = (y + 2066 * u).clamp(0, 262143);

  Rgb([(r >> 10) as u8, (g >> 10) as u8, (b >> 10) as u8])
}

/// 把一帧 NV21 数据转换为 RGB 图像，长度不足时返回 `None`
pub fn nv21_to_rgb(data: &[u8], width: u32, height: u32) -> Option<RgbImage> {
  if data.len() < nv21_frame_len(width, height) {
    return None;
  }

  let (w, h) = (width as usize, height as usize);
  let chroma_stride = 2 * w.div_ceil(2);
  let (luma, chroma) = data.split_at(w * h);

  Some(RgbImage::from_fn(width, height, |x, y| {
    let (x, y) = (x as usize, y as usize);
    let uv = (y / 2) * chroma_stride + (x / 2) * 2;
    // NV21 中色度顺序为 V、U
    yuv_to_rgb(luma[y * w + x], chroma[uv + 1], chroma[uv])
  }))
}

/// 连续存放的 NV21 帧文件，`nv21:///path/dump.yuv?width=1280&height=720&rotate=90`
pub struct Nv21Input {
  path: PathBuf,
  file: File,
  width: u32,
  height: u32,
  rotation: Rotation,
  buffer: Vec<u8>,
}

impl FromUrl for Nv21Input {
  type Error = Nv21InputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != NV21_SCHEME {
      error!(
        "URI scheme mismatch: expected '{}', found '{}'",
        NV21_SCHEME,
        url.scheme()
      );
      return Err(Nv21InputError::SchemaMismatch);
    }

    let mut width = None;
    let mut height = None;
    let mut rotation = Rotation::None;
    for (key, value) in url.query_pairs() {
      let parse = |name: &'static str| {
        value
          .parse::<u32>()
          .map_err(|_| Nv21InputError::InvalidParam(name, value.to_string()))
      };
      match key.as_ref() {
        "width" => width = Some(parse("width")?),
        "height" => height = Some(parse("height")?),
        "rotate" => rotation = Rotation::try_from(parse("rotate")?)?,
        _ => debug!("忽略未知参数: {}={}", key, value),
      }
    }

    let width = width.ok_or(Nv21InputError::MissingParam("width"))?;
    let height = height.ok_or(Nv21InputError::MissingParam("height"))?;
    if width == 0 || height == 0 {
      return Err(Nv21InputError::InvalidParam("width/height", format!("{}x{}", width, height)));
    }

    let path = PathBuf::from(url.path());
    let file = File::open(&path)?;
    info!(
      "读取 NV21 帧文件 {}: {}x{}, 旋转 {:?}",
      path.display(),
      width,
      height,
      rotation
    );

    Ok(Self {
      path,
      file,
      width,
      height,
      rotation,
      buffer: vec![0u8; nv21_frame_len(width, height)],
    })
  }
}

impl FromUrlWithScheme for Nv21Input {
  const SCHEME: &'static str = NV21_SCHEME;
}

impl Iterator for Nv21Input {
  type Item = RgbImage;

  fn next(&mut self) -> Option<Self::Item> {
    match self.file.read_exact(&mut self.buffer) {
      Ok(()) => {}
      Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return None,
      Err(e) => {
        warn!("读取 {} 失败: {}", self.path.display(), e);
        return None;
      }
    }

    let image = nv21_to_rgb(&self.buffer, self.width, self.height)?;
    Some(self.rotation.apply(image))
  }
}
