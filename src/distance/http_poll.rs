// 该文件是 Niuheng （牛衡） 项目的一部分。
// src/distance/http_poll.rs - 轮询测距服务
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
  sync::{
    Arc, Mutex, PoisonError,
    atomic::{AtomicBool, Ordering},
  },
  thread::{self, JoinHandle},
  time::Duration,
};

use reqwest::blocking::Client;
use thiserror::Error;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  distance::{DistanceSource, LidarReading, LidarStatus},
};

const HTTP_SCHEME: &str = "http";
const LIDAR_ENDPOINT: &str = "/api/lidar";

const POLL_INTERVAL: Duration = Duration::from_millis(100);
const RETRY_INTERVAL: Duration = Duration::from_secs(1);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Error, Debug)]
pub enum HttpLidarError {
  #[error("URI scheme mismatch")]
  SchemeMismatch,
  #[error("测距服务地址无效: {0}")]
  InvalidUrl(#[from] url::ParseError),
  #[error("HTTP 客户端错误: {0}")]
  Client(#[from] reqwest::Error),
  #[error("线程创建失败: {0}")]
  Spawn(#[from] std::io::Error),
}

#[derive(Default)]
struct Shared {
  latest: Mutex<Option<LidarReading>>,
  connected: AtomicBool,
  stop: AtomicBool,
}

/// 后台线程每 100 ms 请求一次 `/api/lidar`，失败后等待 1 s 重试
pub struct HttpLidar {
  endpoint: Url,
  shared: Arc<Shared>,
  handle: Option<JoinHandle<()>>,
}

impl FromUrl for HttpLidar {
  type Error = HttpLidarError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != HTTP_SCHEME {
      error!(
        "URI scheme mismatch: expected '{}', found '{}'",
        HTTP_SCHEME,
        url.scheme()
      );
      return Err(HttpLidarError::SchemeMismatch);
    }

    let endpoint = url.join(LIDAR_ENDPOINT)?;
    let client = Client::builder()
      .connect_timeout(REQUEST_TIMEOUT)
      .timeout(REQUEST_TIMEOUT)
      .build()?;

    let shared = Arc::new(Shared::default());
    let handle = {
      let shared = shared.clone();
      let endpoint = endpoint.clone();
      thread::Builder::new()
        .name("lidar-http".into())
        .spawn(move || poll_loop(client, endpoint, shared))?
    };

    info!("开始轮询测距服务: {}", endpoint);
    Ok(Self {
      endpoint,
      shared,
      handle: Some(handle),
    })
  }
}

impl FromUrlWithScheme for HttpLidar {
  const SCHEME: &'static str = HTTP_SCHEME;
}

impl HttpLidar {
  pub fn endpoint(&self) -> &Url {
    &self.endpoint
  }

  pub fn is_connected(&self) -> bool {
    self.shared.connected.load(Ordering::Acquire)
  }
}

impl DistanceSource for HttpLidar {
  fn latest(&self) -> Option<LidarReading> {
    self
      .shared
      .latest
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .clone()
  }
}

impl Drop for HttpLidar {
  fn drop(&mut self) {
    self.shared.stop.store(true, Ordering::Release);
    if let Some(handle) = self.handle.take() {
      // 轮询线程最多阻塞一个请求超时
      let _ = handle.join();
    }
    debug!("测距轮询线程已退出");
  }
}

fn fetch(client: &Client, endpoint: &Url) -> Result<LidarReading, reqwest::Error> {
  client
    .get(endpoint.clone())
    .send()?
    .error_for_status()?
    .json::<LidarReading>()
}

fn set_connected(shared: &Shared, connected: bool) {
  if shared.connected.swap(connected, Ordering::AcqRel) != connected {
    info!("测距服务连接状态: {}", if connected { "已连接" } else { "已断开" });
  }
}

fn poll_loop(client: Client, endpoint: Url, shared: Arc<Shared>) {
  while !shared.stop.load(Ordering::Acquire) {
    let wait = match fetch(&client, &endpoint) {
      Ok(reading) => {
        debug!("测距数据: {:?}", reading);
        set_connected(&shared, reading.is_connected());
        *shared.latest.lock().unwrap_or_else(PoisonError::into_inner) = Some(reading);
        POLL_INTERVAL
      }
      Err(e) => {
        warn!("请求测距服务失败: {}", e);
        set_connected(&shared, false);
        // 保留最后的读数用于展示，但不再可用于预测
        let mut latest = shared.latest.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(reading) = latest.as_mut() {
          reading.status = LidarStatus::Disconnected;
        }
        RETRY_INTERVAL
      }
    };
    sleep_unless_stopped(&shared, wait);
  }
}

/// 分段睡眠，以便尽快响应停止请求
fn sleep_unless_stopped(shared: &Shared, total: Duration) {
  let step = Duration::from_millis(20);
  let mut slept = Duration::ZERO;
  while slept < total && !shared.stop.load(Ordering::Acquire) {
    thread::sleep(step);
    slept += step;
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::distance::usable_distance_cm;
  use std::{
    io::{Read, Write},
    net::TcpListener,
    time::Instant,
  };

  /// 只会返回固定 JSON 的最小 HTTP 服务
  fn serve_json(body: &'static str) -> Url {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    thread::spawn(move || {
      for stream in listener.incoming() {
        let Ok(mut stream) = stream else { break };
        let mut buf = [0u8; 1024];
        let _ = stream.read(&mut buf);
        let response = format!(
          "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
          body.len(),
          body
        );
        let _ = stream.write_all(response.as_bytes());
      }
    });
    Url::parse(&format!("http://{}", addr)).unwrap()
  }

  #[test]
  fn polls_latest_reading() {
    let url = serve_json(
      r#"{"jarak": 245, "kekuatan": 900, "suhu": 38.2, "timestamp": 1, "status": "connected"}"#,
    );
    let lidar = HttpLidar::from_url(&url).unwrap();
    assert_eq!(lidar.endpoint().path(), "/api/lidar");

    let deadline = Instant::now() + Duration::from_secs(5);
    while lidar.latest().is_none() && Instant::now() < deadline {
      thread::sleep(Duration::from_millis(20));
    }

    let reading = lidar.latest().unwrap();
    assert_eq!(reading.distance_cm, 245);
    assert!(lidar.is_connected());
  }

  #[test]
  fn reading_goes_stale_when_bridge_disappears() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let url = Url::parse(&format!("http://{}", listener.local_addr().unwrap())).unwrap();
    let server = thread::spawn(move || {
      let (mut stream, _) = listener.accept().unwrap();
      let mut buf = [0u8; 1024];
      let _ = stream.read(&mut buf);
      let body = r#"{"jarak": 245, "kekuatan": 900, "suhu": 38.2, "timestamp": 1, "status": "connected"}"#;
      let response = format!(
        "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        body.len(),
        body
      );
      stream.write_all(response.as_bytes()).unwrap();
      // 返回后监听端口关闭
    });

    let lidar = HttpLidar::from_url(&url).unwrap();
    let deadline = Instant::now() + Duration::from_secs(5);
    while lidar.latest().is_none() && Instant::now() < deadline {
      thread::sleep(Duration::from_millis(20));
    }
    server.join().unwrap();
    assert_eq!(lidar.latest().map(|r| r.distance_cm), Some(245));

    let deadline = Instant::now() + Duration::from_secs(5);
    while lidar.is_connected() && Instant::now() < deadline {
      thread::sleep(Duration::from_millis(20));
    }
    assert!(!lidar.is_connected());

    let reading = lidar.latest().unwrap();
    assert_eq!(reading.distance_cm, 245);
    assert_eq!(reading.status, LidarStatus::Disconnected);
    assert_eq!(usable_distance_cm(&lidar), None);
  }

  #[test]
  fn rejects_other_schemes() {
    let url = Url::parse("serial:///dev/ttyUSB0").unwrap();
    assert!(matches!(
      HttpLidar::from_url(&url),
      Err(HttpLidarError::SchemeMismatch)
    ));
  }
}
