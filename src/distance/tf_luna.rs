// 该文件是 Niuheng （牛衡） 项目的一部分。
// src/distance/tf_luna.rs - TF-Luna 串口帧解析
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
  io::{ErrorKind, Read},
  sync::{
    Arc, Mutex, PoisonError,
    atomic::{AtomicBool, Ordering},
  },
  thread::{self, JoinHandle},
  time::{Duration, Instant},
};

use thiserror::Error;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  distance::{DistanceSource, LidarReading, LidarStatus},
};

const SERIAL_SCHEME: &str = "serial";

pub const TF_LUNA_FRAME_LEN: usize = 9;
const TF_LUNA_HEADER: u8 = 0x59;
pub const TF_LUNA_BAUD_RATE: u32 = 115_200;
/// 单次读取的超时，同时决定停止请求的响应时间
const READ_TIMEOUT: Duration = Duration::from_millis(100);
/// 读到 EOF 时的等待间隔
const IDLE_INTERVAL: Duration = Duration::from_millis(10);
/// 超过该时间没有完整数据帧，最后的读数标记为断开
const STALE_AFTER: Duration = Duration::from_secs(1);

/// 从任意切分的字节流中还原 TF-Luna 数据帧。
///
/// 帧格式：`0x59 0x59 | 距离 L H | 强度 L H | 温度 L H | 校验`，
/// 校验为前 8 字节之和的低 8 位。校验失败时跳过一个字节重新寻找帧头。
#[derive(Debug, Default)]
pub struct TfLunaDecoder {
  buffer: Vec<u8>,
  dropped: usize,
}

impl TfLunaDecoder {
  pub fn new() -> Self {
    Self::default()
  }

  /// 因失步或校验错误丢弃的字节数
  pub fn dropped(&self) -> usize {
    self.dropped
  }

  pub fn push(&mut self, bytes: &[u8], timestamp_ms: u64) -> Vec<LidarReading> {
    self.buffer.extend_from_slice(bytes);
    let mut readings = Vec::new();

    loop {
      let start = self
        .buffer
        .windows(2)
        .position(|w| w == [TF_LUNA_HEADER, TF_LUNA_HEADER]);

      let Some(start) = start else {
        // 保留可能是帧头前半部分的最后一个字节
        let keep = usize::from(self.buffer.last() == Some(&TF_LUNA_HEADER));
        let discard = self.buffer.len() - keep;
        self.dropped += discard;
        self.buffer.drain(..discard);
        break;
      };

      self.dropped += start;
      self.buffer.drain(..start);

      if self.buffer.len() < TF_LUNA_FRAME_LEN {
        break;
      }

      let frame = &self.buffer[..TF_LUNA_FRAME_LEN];
      match parse_frame(frame, timestamp_ms) {
        Some(reading) => {
          readings.push(reading);
          self.buffer.drain(..TF_LUNA_FRAME_LEN);
        }
        None => {
          debug!("TF-Luna 校验失败: {:02x?}", frame);
          self.dropped += 1;
          self.buffer.drain(..1);
        }
      }
    }

    readings
  }
}

fn checksum(bytes: &[u8]) -> u8 {
  bytes.iter().fold(0u8, |acc, b| acc.wrapping_add(*b))
}

fn parse_frame(frame: &[u8], timestamp_ms: u64) -> Option<LidarReading> {
  if checksum(&frame[..8]) != frame[8] {
    return None;
  }

  let word = |i: usize| u16::from_le_bytes([frame[i], frame[i + 1]]);
  Some(LidarReading {
    distance_cm: word(2),
    strength: word(4),
    temperature_c: word(6) as f32 / 8.0 - 256.0,
    timestamp_ms,
    status: LidarStatus::Connected,
  })
}

#[derive(Error, Debug)]
pub enum SerialLidarError {
  #[error("URI scheme mismatch")]
  SchemeMismatch,
  #[error("波特率参数无效: {0}")]
  InvalidBaudRate(String),
  #[error("串口打开失败: {0}")]
  Port(#[from] serialport::Error),
  #[error("线程创建失败: {0}")]
  Spawn(#[from] std::io::Error),
}

struct Shared {
  latest: Mutex<Option<LidarReading>>,
  stop: AtomicBool,
}

/// 从串口读取 TF-Luna 数据，如 `serial:///dev/ttyUSB0?baud=115200`
pub struct SerialLidar {
  port: String,
  shared: Arc<Shared>,
  handle: Option<JoinHandle<()>>,
}

impl FromUrl for SerialLidar {
  type Error = SerialLidarError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != SERIAL_SCHEME {
      error!(
        "URI scheme mismatch: expected '{}', found '{}'",
        SERIAL_SCHEME,
        url.scheme()
      );
      return Err(SerialLidarError::SchemeMismatch);
    }

    let baud_rate = match url.query_pairs().find(|(k, _)| k == "baud") {
      Some((_, v)) => v
        .parse::<u32>()
        .map_err(|e| SerialLidarError::InvalidBaudRate(format!("{}: {}", v, e)))?,
      None => TF_LUNA_BAUD_RATE,
    };

    let port = serialport::new(url.path(), baud_rate)
      .timeout(READ_TIMEOUT)
      .open()?;
    info!("打开测距串口: {} ({} baud)", url.path(), baud_rate);

    Self::from_reader(url.path(), port)
  }
}

impl FromUrlWithScheme for SerialLidar {
  const SCHEME: &'static str = SERIAL_SCHEME;
}

impl SerialLidar {
  /// 在后台线程中从任意字节流解码。读取应当带超时，否则停止请求要等到下一次返回。
  pub fn from_reader<R>(port: impl Into<String>, reader: R) -> Result<Self, SerialLidarError>
  where
    R: Read + Send + 'static,
  {
    let shared = Arc::new(Shared {
      latest: Mutex::new(None),
      stop: AtomicBool::new(false),
    });
    let handle = {
      let shared = shared.clone();
      thread::Builder::new()
        .name("lidar-serial".into())
        .spawn(move || read_loop(reader, shared))?
    };

    Ok(Self {
      port: port.into(),
      shared,
      handle: Some(handle),
    })
  }

  pub fn port(&self) -> &str {
    &self.port
  }
}

impl DistanceSource for SerialLidar {
  fn latest(&self) -> Option<LidarReading> {
    self
      .shared
      .latest
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .clone()
  }
}

impl Drop for SerialLidar {
  fn drop(&mut self) {
    self.shared.stop.store(true, Ordering::Release);
    if let Some(handle) = self.handle.take()
      && handle.join().is_err()
    {
      warn!("测距串口线程异常退出");
    }
    debug!("测距串口 {} 已关闭", self.port);
  }
}

fn set_status(shared: &Shared, status: LidarStatus) {
  let mut latest = shared.latest.lock().unwrap_or_else(PoisonError::into_inner);
  if let Some(reading) = latest.as_mut() {
    reading.status = status;
  }
}

fn read_loop<R: Read>(mut reader: R, shared: Arc<Shared>) {
  let mut decoder = TfLunaDecoder::new();
  let mut buf = [0u8; 64];
  let mut last_frame: Option<Instant> = None;

  while !shared.stop.load(Ordering::Acquire) {
    match reader.read(&mut buf) {
      Ok(0) => thread::sleep(IDLE_INTERVAL),
      Ok(n) => {
        let now = chrono::Utc::now().timestamp_millis().max(0) as u64;
        if let Some(reading) = decoder.push(&buf[..n], now).pop() {
          debug!(
            "TF-Luna: {} cm, 强度 {}, {:.1} °C",
            reading.distance_cm, reading.strength, reading.temperature_c
          );
          *shared.latest.lock().unwrap_or_else(PoisonError::into_inner) = Some(reading);
          last_frame = Some(Instant::now());
        }
      }
      Err(e) if matches!(e.kind(), ErrorKind::TimedOut | ErrorKind::WouldBlock) => {}
      Err(e) if e.kind() == ErrorKind::Interrupted => continue,
      Err(e) => {
        warn!("读取测距串口失败: {}", e);
        set_status(&shared, LidarStatus::Error);
        break;
      }
    }

    if last_frame.is_some_and(|t| t.elapsed() > STALE_AFTER) {
      warn!("测距串口超过 {:?} 没有数据", STALE_AFTER);
      set_status(&shared, LidarStatus::Disconnected);
      last_frame = None;
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::{io::Write, sync::mpsc};

  fn frame(distance: u16, strength: u16, temp_raw: u16) -> Vec<u8> {
    let mut bytes = vec![TF_LUNA_HEADER, TF_LUNA_HEADER];
    bytes.extend_from_slice(&distance.to_le_bytes());
    bytes.extend_from_slice(&strength.to_le_bytes());
    bytes.extend_from_slice(&temp_raw.to_le_bytes());
    bytes.push(checksum(&bytes));
    bytes
  }

  #[test]
  fn decodes_single_frame() {
    // 2560 / 8 - 256 = 64 °C
    let readings = TfLunaDecoder::new().push(&frame(312, 1500, 2560), 7);
    assert_eq!(readings.len(), 1);
    assert_eq!(readings[0].distance_cm, 312);
    assert_eq!(readings[0].strength, 1500);
    assert_eq!(readings[0].temperature_c, 64.0);
    assert_eq!(readings[0].timestamp_ms, 7);
  }

  #[test]
  fn resynchronizes_across_chunks() {
    let mut stream = vec![0x00, 0x13, TF_LUNA_HEADER];
    stream.extend(frame(100, 10, 2200));
    stream.extend(frame(101, 11, 2200));

    let mut decoder = TfLunaDecoder::new();
    let mut readings = Vec::new();
    for chunk in stream.chunks(4) {
      readings.extend(decoder.push(chunk, 0));
    }

    let distances: Vec<u16> = readings.iter().map(|r| r.distance_cm).collect();
    assert_eq!(distances, vec![100, 101]);
    assert_eq!(decoder.dropped(), 3);
  }

  #[test]
  fn corrupted_frame_is_skipped() {
    let mut bad = frame(200, 20, 2200);
    bad[8] = bad[8].wrapping_add(1);
    bad.extend(frame(201, 21, 2200));

    let readings = TfLunaDecoder::new().push(&bad, 0);
    assert_eq!(readings.len(), 1);
    assert_eq!(readings[0].distance_cm, 201);
  }

  /// 行为类似带读超时的串口：没有数据时返回 `TimedOut`
  struct ChannelPort(mpsc::Receiver<Vec<u8>>);

  impl Read for ChannelPort {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
      match self.0.recv_timeout(READ_TIMEOUT) {
        Ok(bytes) => {
          let n = bytes.len().min(buf.len());
          buf[..n].copy_from_slice(&bytes[..n]);
          Ok(n)
        }
        Err(mpsc::RecvTimeoutError::Timeout) => Err(ErrorKind::TimedOut.into()),
        Err(mpsc::RecvTimeoutError::Disconnected) => Ok(0),
      }
    }
  }

  fn wait_for(lidar: &SerialLidar, check: impl Fn(Option<LidarReading>) -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
      if check(lidar.latest()) {
        return true;
      }
      thread::sleep(Duration::from_millis(10));
    }
    false
  }

  #[test]
  fn reads_frames_from_device_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(&frame(150, 800, 2200)).unwrap();
    file.flush().unwrap();

    let device = std::fs::File::open(file.path()).unwrap();
    let lidar = SerialLidar::from_reader(file.path().display().to_string(), device).unwrap();

    assert!(wait_for(&lidar, |r| r.is_some()));
    assert_eq!(lidar.latest().map(|r| r.distance_cm), Some(150));
  }

  #[test]
  fn drop_returns_on_silent_device() {
    let (tx, rx) = mpsc::channel::<Vec<u8>>();
    let lidar = SerialLidar::from_reader("silent", ChannelPort(rx)).unwrap();

    let (done_tx, done_rx) = mpsc::channel();
    thread::spawn(move || {
      drop(lidar);
      let _ = done_tx.send(());
    });

    assert!(done_rx.recv_timeout(Duration::from_secs(3)).is_ok());
    // 发送端一直保持打开，设备只是没有数据
    drop(tx);
  }

  #[test]
  fn silence_marks_reading_disconnected() {
    let (tx, rx) = mpsc::channel::<Vec<u8>>();
    let lidar = SerialLidar::from_reader("flaky", ChannelPort(rx)).unwrap();

    tx.send(frame(220, 900, 2200)).unwrap();
    assert!(wait_for(&lidar, |r| r.is_some_and(|r| r.is_connected())));
    assert_eq!(crate::distance::usable_distance_cm(&lidar), Some(220.0));

    assert!(wait_for(&lidar, |r| r.is_some_and(|r| r.status == LidarStatus::Disconnected)));
    assert_eq!(crate::distance::usable_distance_cm(&lidar), None);

    tx.send(frame(221, 900, 2200)).unwrap();
    assert!(wait_for(&lidar, |r| r.is_some_and(|r| r.is_connected() && r.distance_cm == 221)));
  }

  #[test]
  fn rejects_bad_urls() {
    let url = Url::parse("http://127.0.0.1/").unwrap();
    assert!(matches!(
      SerialLidar::from_url(&url),
      Err(SerialLidarError::SchemeMismatch)
    ));

    let url = Url::parse("serial:///dev/ttyUSB0?baud=fast").unwrap();
    assert!(matches!(
      SerialLidar::from_url(&url),
      Err(SerialLidarError::InvalidBaudRate(_))
    ));
  }
}
