// 该文件是 Niuheng （牛衡） 项目的一部分。
// src/input.rs - 图像输入
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
use thiserror::Error;

use crate::{FromUrl, FromUrlWithScheme};

mod image_dir;
mod image_file;
mod nv21;

pub use self::image_dir::ImageDirInput;
pub use self::image_file::{ImageFileInput, ImageFileInputError};
pub use self::nv21::{Nv21Input, Nv21InputError, Rotation, nv21_frame_len, nv21_to_rgb};

#[derive(Error, Debug)]
pub enum InputError {
  #[error("Image file input error: {0}")]
  ImageFileInputError(#[from] ImageFileInputError),
  #[error("NV21 input error: {0}")]
  Nv21InputError(#[from] Nv21InputError),
  #[error("URI scheme mismatch")]
  SchemeMismatch,
}

/// 按 URL 方案选择的图像来源，逐帧产出 RGB 图像
pub enum InputWrapper {
  ImageFile(ImageFileInput),
  ImageDir(ImageDirInput),
  Nv21(Nv21Input),
}

impl FromUrl for InputWrapper {
  type Error = InputError;

  fn from_url(url: &url::Url) -> Result<Self, Self::Error> {
    if url.scheme() == ImageFileInput::SCHEME {
      return Ok(InputWrapper::ImageFile(ImageFileInput::from_url(url)?));
    }
    if url.scheme() == ImageDirInput::SCHEME {
      return Ok(InputWrapper::ImageDir(ImageDirInput::from_url(url)?));
    }
    if url.scheme() == Nv21Input::SCHEME {
      return Ok(InputWrapper::Nv21(Nv21Input::from_url(url)?));
    }
    Err(InputError::SchemeMismatch)
  }
}

impl Iterator for InputWrapper {
  type Item = RgbImage;

  fn next(&mut self) -> Option<Self::Item> {
    match self {
      InputWrapper::ImageFile(input) => input.next(),
      InputWrapper::ImageDir(input) => input.next(),
      InputWrapper::Nv21(input) => input.next(),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn unknown_scheme_is_rejected() {
    let url = url::Url::parse("v4l2:///dev/video0").unwrap();
    assert!(matches!(
      InputWrapper::from_url(&url),
      Err(InputError::SchemeMismatch)
    ));
  }
}
