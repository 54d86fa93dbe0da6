// 该文件是 Niuheng （牛衡） 项目的一部分。
// src/distance.rs - 距离来源
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

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{FromUrl, error::CoreError};

mod fixed;
pub use self::fixed::FixedDistance;

#[cfg(feature = "http_lidar")]
mod http_poll;
#[cfg(feature = "http_lidar")]
pub use self::http_poll::{HttpLidar, HttpLidarError};

#[cfg(feature = "serial_lidar")]
mod tf_luna;
#[cfg(feature = "serial_lidar")]
pub use self::tf_luna::{SerialLidar, SerialLidarError, TF_LUNA_FRAME_LEN, TfLunaDecoder};

/// TF-Luna 的有效量程上限（厘米）
pub const LIDAR_MAX_VALID_CM: u16 = 800;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LidarStatus {
  Connected,
  #[default]
  Disconnected,
  Error,
  #[serde(other)]
  Unknown,
}

/// 一次激光测距读数，字段名与测距服务的 JSON 保持一致
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LidarReading {
  #[serde(rename = "jarak")]
  pub distance_cm: u16,
  #[serde(rename = "kekuatan")]
  pub strength: u16,
  #[serde(rename = "suhu")]
  pub temperature_c: f32,
  #[serde(rename = "timestamp")]
  pub timestamp_ms: u64,
  #[serde(default)]
  pub status: LidarStatus,
}

impl LidarReading {
  /// 传感器自身的合理性检查，与工作距离范围无关
  pub fn is_valid(&self) -> bool {
    self.distance_cm > 0 && self.distance_cm < LIDAR_MAX_VALID_CM && self.strength > 0
  }

  pub fn is_connected(&self) -> bool {
    self.status == LidarStatus::Connected
  }

  pub fn distance_m(&self) -> f32 {
    self.distance_cm as f32 / 100.0
  }
}

/// 拍摄时可用的最新距离
pub trait DistanceSource: Send + Sync {
  fn latest(&self) -> Option<LidarReading>;
}

/// 允许参与预测的距离范围（米）
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(default)]
pub struct OperatingRange {
  pub min_m: f32,
  pub max_m: f32,
}

impl Default for OperatingRange {
  fn default() -> Self {
    Self {
      min_m: 0.5,
      max_m: 10.0,
    }
  }
}

impl OperatingRange {
  /// 厘米换算为米并检查范围
  pub fn validate(&self, distance_cm: f32) -> Result<f32, CoreError> {
    let distance_m = distance_cm / 100.0;
    if !(distance_m > 0.0 && distance_m >= self.min_m && distance_m <= self.max_m) {
      return Err(CoreError::InvalidDistance(distance_m));
    }
    Ok(distance_m)
  }
}

#[derive(Error, Debug)]
pub enum DistanceError {
  #[error("固定距离参数错误: {0}")]
  Fixed(String),
  #[cfg(feature = "http_lidar")]
  #[error("HTTP 测距错误: {0}")]
  Http(#[from] HttpLidarError),
  #[cfg(feature = "serial_lidar")]
  #[error("串口测距错误: {0}")]
  Serial(#[from] SerialLidarError),
  #[error("URI scheme mismatch")]
  SchemeMismatch,
}

pub enum DistanceWrapper {
  Fixed(FixedDistance),
  #[cfg(feature = "http_lidar")]
  Http(HttpLidar),
  #[cfg(feature = "serial_lidar")]
  Serial(SerialLidar),
}

impl FromUrl for DistanceWrapper {
  type Error = DistanceError;

  fn from_url(url: &url::Url) -> Result<Self, Self::Error> {
    use crate::FromUrlWithScheme;

    if url.scheme() == FixedDistance::SCHEME {
      return Ok(DistanceWrapper::Fixed(FixedDistance::from_url(url)?));
    }
    #[cfg(feature = "http_lidar")]
    {
      if url.scheme() == HttpLidar::SCHEME {
        return Ok(DistanceWrapper::Http(HttpLidar::from_url(url)?));
      }
    }
    #[cfg(feature = "serial_lidar")]
    {
      if url.scheme() == SerialLidar::SCHEME {
        return Ok(DistanceWrapper::Serial(SerialLidar::from_url(url)?));
      }
    }
    Err(DistanceError::SchemeMismatch)
  }
}

impl DistanceSource for DistanceWrapper {
  fn latest(&self) -> Option<LidarReading> {
    match self {
      DistanceWrapper::Fixed(source) => source.latest(),
      #[cfg(feature = "http_lidar")]
      DistanceWrapper::Http(source) => source.latest(),
      #[cfg(feature = "serial_lidar")]
      DistanceWrapper::Serial(source) => source.latest(),
    }
  }
}

/// 从最新读数中取出可用于预测的距离（厘米）。
///
/// 传感器断开或出错后保留的旧读数不可用。
pub fn usable_distance_cm(source: &dyn DistanceSource) -> Option<f32> {
  source
    .latest()
    .filter(|reading| reading.is_connected() && reading.is_valid())
    .map(|reading| reading.distance_cm as f32)
}

#[cfg(test)]
mod tests {
  use super::*;

  fn reading(distance_cm: u16, strength: u16) -> LidarReading {
    LidarReading {
      distance_cm,
      strength,
      temperature_c: 25.0,
      timestamp_ms: 0,
      status: LidarStatus::Connected,
    }
  }

  #[test]
  fn sensor_validity() {
    assert!(reading(250, 1200).is_valid());
    assert!(!reading(0, 1200).is_valid());
    assert!(!reading(800, 1200).is_valid());
    assert!(!reading(250, 0).is_valid());
  }

  #[test]
  fn only_connected_readings_are_usable() {
    struct Last(LidarReading);
    impl DistanceSource for Last {
      fn latest(&self) -> Option<LidarReading> {
        Some(self.0.clone())
      }
    }

    let mut last = reading(250, 1200);
    assert_eq!(usable_distance_cm(&Last(last.clone())), Some(250.0));

    for status in [LidarStatus::Disconnected, LidarStatus::Error, LidarStatus::Unknown] {
      last.status = status;
      assert_eq!(usable_distance_cm(&Last(last.clone())), None);
    }
  }

  #[test]
  fn operating_range_converts_and_rejects() {
    let range = OperatingRange::default();
    assert_eq!(range.validate(250.0), Ok(2.5));
    assert_eq!(range.validate(50.0), Ok(0.5));
    assert_eq!(range.validate(0.0), Err(CoreError::InvalidDistance(0.0)));
    assert_eq!(range.validate(-10.0), Err(CoreError::InvalidDistance(-0.1)));
    assert_eq!(range.validate(1200.0), Err(CoreError::InvalidDistance(12.0)));
    assert!(range.validate(f32::NAN).is_err());
  }

  #[test]
  fn parses_bridge_json() {
    let json = r#"{"jarak": 312, "kekuatan": 5120, "suhu": 41.5, "timestamp": 1718000000123, "status": "connected"}"#;
    let reading: LidarReading = serde_json::from_str(json).unwrap();

    assert_eq!(reading.distance_cm, 312);
    assert_eq!(reading.distance_m(), 3.12);
    assert!(reading.is_connected());

    let json = r#"{"jarak": 0, "kekuatan": 0, "suhu": 0.0, "timestamp": 0, "status": "rebooting"}"#;
    let reading: LidarReading = serde_json::from_str(json).unwrap();
    assert_eq!(reading.status, LidarStatus::Unknown);
  }

  #[test]
  fn selects_source_by_scheme() {
    let url = url::Url::parse("fixed:275").unwrap();
    let source = DistanceWrapper::from_url(&url).unwrap();
    assert_eq!(usable_distance_cm(&source), Some(275.0));

    let url = url::Url::parse("ftp://example.com").unwrap();
    assert!(matches!(
      DistanceWrapper::from_url(&url),
      Err(DistanceError::SchemeMismatch)
    ));
  }
}
