// 该文件是 Niuheng （牛衡） 项目的一部分。
// src/distance/fixed.rs - 固定距离
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

use tracing::{error, info};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  distance::{DistanceError, DistanceSource, LidarReading, LidarStatus},
};

const FIXED_SCHEME: &str = "fixed";

/// 手工测量的固定距离，`fixed:<厘米>`
#[derive(Debug, Clone)]
pub struct FixedDistance {
  distance_cm: u16,
}

impl FixedDistance {
  pub fn new(distance_cm: u16) -> Self {
    Self { distance_cm }
  }
}

impl FromUrl for FixedDistance {
  type Error = DistanceError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != FIXED_SCHEME {
      error!(
        "URI scheme mismatch: expected '{}', found '{}'",
        FIXED_SCHEME,
        url.scheme()
      );
      return Err(DistanceError::SchemeMismatch);
    }

    let distance_cm = url
      .path()
      .trim()
      .parse::<u16>()
      .map_err(|e| DistanceError::Fixed(format!("{}: {}", url.path(), e)))?;
    info!("使用固定距离 {} cm", distance_cm);

    Ok(Self::new(distance_cm))
  }
}

impl FromUrlWithScheme for FixedDistance {
  const SCHEME: &'static str = FIXED_SCHEME;
}

impl DistanceSource for FixedDistance {
  fn latest(&self) -> Option<LidarReading> {
    Some(LidarReading {
      distance_cm: self.distance_cm,
      strength: u16::MAX,
      temperature_c: 0.0,
      timestamp_ms: chrono::Utc::now().timestamp_millis().max(0) as u64,
      status: LidarStatus::Connected,
    })
  }
}
