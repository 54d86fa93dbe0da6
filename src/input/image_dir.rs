// 该文件是 Niuheng （牛衡） 项目的一部分。
// src/input/image_dir.rs - 图像目录输入
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
  collections::VecDeque,
  fs,
  path::{Path, PathBuf},
};

use image::RgbImage;
use tracing::{error, info, warn};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  input::image_file::{ImageFileInputError, load_rgb},
};

const IMAGE_DIR_SCHEME: &str = "folder";
const IMAGE_EXTENSIONS: [&str; 4] = ["jpg", "jpeg", "png", "bmp"];

fn is_image(path: &Path) -> bool {
  path
    .extension()
    .and_then(|ext| ext.to_str())
    .map(|ext| IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
    .unwrap_or(false)
}

/// 目录中的图像按文件名顺序逐张产出，无法解码的文件记录后跳过
pub struct ImageDirInput {
  paths: VecDeque<PathBuf>,
}

impl ImageDirInput {
  pub fn open(dir: &Path) -> Result<Self, ImageFileInputError> {
    let mut paths = Vec::new();
    for entry in fs::read_dir(dir)? {
      let path = entry?.path();
      if path.is_file() && is_image(&path) {
        paths.push(path);
      }
    }
    paths.sort();
    info!("目录 {} 中找到 {} 张图像", dir.display(), paths.len());

    Ok(Self {
      paths: paths.into(),
    })
  }

  pub fn remaining(&self) -> usize {
    self.paths.len()
  }
}

impl FromUrl for ImageDirInput {
  type Error = ImageFileInputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != IMAGE_DIR_SCHEME {
      error!(
        "URI scheme mismatch: expected '{}', found '{}'",
        IMAGE_DIR_SCHEME,
        url.scheme()
      );
      return Err(ImageFileInputError::SchemaMismatch);
    }
    Self::open(Path::new(url.path()))
  }
}

impl FromUrlWithScheme for ImageDirInput {
  const SCHEME: &'static str = IMAGE_DIR_SCHEME;
}

impl Iterator for ImageDirInput {
  type Item = RgbImage;

  fn next(&mut self) -> Option<Self::Item> {
    while let Some(path) = self.paths.pop_front() {
      match load_rgb(&path) {
        Ok(image) => return Some(image),
        Err(e) => warn!("跳过无法读取的图像 {}: {}", path.display(), e),
      }
    }
    None
  }
}
