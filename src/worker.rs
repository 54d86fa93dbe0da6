// 该文件是 Niuheng （牛衡） 项目的一部分。
// src/worker.rs - 检测与预测工作线程
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

//! 两个互不阻塞的工作线程：
//!
//! - [`DetectionWorker`] 分析预览帧。正在处理一帧时提交的新帧直接丢弃，
//!   结果写入 [`LatestDetections`]。
//! - [`PredictionWorker`] 处理拍摄请求，通过每个请求自带的通道回复。

use std::{
  sync::{
    Arc, Mutex,
    atomic::{AtomicBool, AtomicUsize, Ordering},
    mpsc::{self, Receiver, Sender, SyncSender, TrySendError},
  },
  thread::JoinHandle,
};

use image::RgbImage;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::{
  model::FrameDetections,
  pipeline::{PredictionRejected, PredictionReport},
};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WorkerError {
  #[error("工作线程已停止")]
  Stopped,
  #[error("无法启动工作线程: {0}")]
  Spawn(String),
}

/// 最近一次分析结果。读取得到一份拷贝，不会看到写了一半的结果。
#[derive(Debug, Default)]
pub struct LatestDetections {
  slot: Mutex<Option<FrameDetections>>,
}

impl LatestDetections {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn publish(&self, detections: FrameDetections) {
    match self.slot.lock() {
      Ok(mut slot) => *slot = Some(detections),
      Err(poisoned) => *poisoned.into_inner() = Some(detections),
    }
  }

  pub fn snapshot(&self) -> Option<FrameDetections> {
    match self.slot.lock() {
      Ok(slot) => slot.clone(),
      Err(poisoned) => poisoned.into_inner().clone(),
    }
  }

  pub fn clear(&self) {
    match self.slot.lock() {
      Ok(mut slot) => *slot = None,
      Err(poisoned) => *poisoned.into_inner() = None,
    }
  }
}

pub struct DetectionWorker {
  sender: Option<SyncSender<RgbImage>>,
  handle: Option<JoinHandle<()>>,
  busy: Arc<AtomicBool>,
  latest: Arc<LatestDetections>,
  processed: Arc<AtomicUsize>,
  dropped: AtomicUsize,
}

impl DetectionWorker {
  /// 启动分析线程，`analyze` 在该线程上逐帧调用
  pub fn spawn<F>(analyze: F) -> Result<Self, WorkerError>
  where
    F: Fn(&RgbImage) -> FrameDetections + Send + 'static,
  {
    let (sender, receiver) = mpsc::sync_channel::<RgbImage>(1);
    let busy = Arc::new(AtomicBool::new(false));
    let latest = Arc::new(LatestDetections::new());
    let processed = Arc::new(AtomicUsize::new(0));

    let handle = {
      let busy = busy.clone();
      let latest = latest.clone();
      let processed = processed.clone();
      std::thread::Builder::new()
        .name("niuheng-detect".into())
        .spawn(move || {
          for frame in receiver {
            let detections = analyze(&frame);
            debug!("分析完成: {} 个检测", detections.items.len());
            latest.publish(detections);
            processed.fetch_add(1, Ordering::Relaxed);
            busy.store(false, Ordering::Release);
          }
          debug!("分析线程退出");
        })
        .map_err(|e| WorkerError::Spawn(e.to_string()))?
    };

    Ok(Self {
      sender: Some(sender),
      handle: Some(handle),
      busy,
      latest,
      processed,
      dropped: AtomicUsize::new(0),
    })
  }

  /// 提交一帧。线程正忙时丢弃该帧并返回 `false`。
  pub fn submit(&self, frame: RgbImage) -> bool {
    let Some(sender) = &self.sender else {
      return false;
    };

    if self.busy.swap(true, Ordering::AcqRel) {
      self.dropped.fetch_add(1, Ordering::Relaxed);
      return false;
    }

    match sender.try_send(frame) {
      Ok(()) => true,
      Err(TrySendError::Full(_)) | Err(TrySendError::Disconnected(_)) => {
        self.busy.store(false, Ordering::Release);
        self.dropped.fetch_add(1, Ordering::Relaxed);
        false
      }
    }
  }

  pub fn latest(&self) -> Option<FrameDetections> {
    self.latest.snapshot()
  }

  pub fn latest_slot(&self) -> Arc<LatestDetections> {
    self.latest.clone()
  }

  pub fn is_busy(&self) -> bool {
    self.busy.load(Ordering::Acquire)
  }

  pub fn processed(&self) -> usize {
    self.processed.load(Ordering::Relaxed)
  }

  pub fn dropped(&self) -> usize {
    self.dropped.load(Ordering::Relaxed)
  }

  /// 停止接收新帧，等待正在处理的帧结束
  pub fn shutdown(&mut self) {
    self.sender.take();
    if let Some(handle) = self.handle.take()
      && handle.join().is_err()
    {
      warn!("分析线程异常退出");
    }
  }
}

impl Drop for DetectionWorker {
  fn drop(&mut self) {
    self.shutdown();
  }
}

pub type PredictionReply = Result<PredictionReport, PredictionRejected>;

struct PredictionRequest {
  capture: RgbImage,
  detections: FrameDetections,
  distance_cm: f32,
  reply: Sender<PredictionReply>,
}

pub struct PredictionWorker {
  sender: Option<Sender<PredictionRequest>>,
  handle: Option<JoinHandle<()>>,
}

impl PredictionWorker {
  pub fn spawn<F>(predict: F) -> Result<Self, WorkerError>
  where
    F: Fn(&RgbImage, &FrameDetections, f32) -> PredictionReply + Send + 'static,
  {
    let (sender, receiver) = mpsc::channel::<PredictionRequest>();

    let handle = std::thread::Builder::new()
      .name("niuheng-predict".into())
      .spawn(move || {
        for request in receiver {
          let reply = predict(&request.capture, &request.detections, request.distance_cm);
          if let Err(rejected) = &reply {
            info!("预测被拒绝: {}", rejected);
          }
          if request.reply.send(reply).is_err() {
            debug!("预测结果无人接收");
          }
        }
        debug!("预测线程退出");
      })
      .map_err(|e| WorkerError::Spawn(e.to_string()))?;

    Ok(Self {
      sender: Some(sender),
      handle: Some(handle),
    })
  }

  /// 提交拍摄请求，结果从返回的通道中取得
  pub fn submit(
    &self,
    capture: RgbImage,
    detections: FrameDetections,
    distance_cm: f32,
  ) -> Result<Receiver<PredictionReply>, WorkerError> {
    let sender = self.sender.as_ref().ok_or(WorkerError::Stopped)?;
    let (reply, receiver) = mpsc::channel();

    sender
      .send(PredictionRequest {
        capture,
        detections,
        distance_cm,
        reply,
      })
      .map_err(|_| WorkerError::Stopped)?;

    Ok(receiver)
  }

  pub fn shutdown(&mut self) {
    self.sender.take();
    if let Some(handle) = self.handle.take()
      && handle.join().is_err()
    {
      warn!("预测线程异常退出");
    }
  }
}

impl Drop for PredictionWorker {
  fn drop(&mut self) {
    self.shutdown();
  }
}

#[cfg(test)]
mod tests {
  use std::{sync::mpsc::channel, time::Duration};

  use super::*;
  use crate::{
    geometry::{BBox, Image, Size},
    model::Detection,
  };

  fn one_detection(width: u32) -> FrameDetections {
    FrameDetections {
      image_size: Size::new(width, 10),
      items: vec![Detection {
        bbox: BBox::<Image>::new(1.0, 1.0, 5.0, 5.0),
        confidence: 0.5,
        class_id: 19,
      }]
      .into_boxed_slice(),
    }
  }

  #[test]
  fn latest_slot_returns_copies() {
    let latest = LatestDetections::new();
    assert!(latest.snapshot().is_none());

    latest.publish(one_detection(10));
    let first = latest.snapshot().unwrap();
    latest.publish(FrameDetections::empty(Size::new(20, 20)));

    assert_eq!(first.image_size, Size::new(10, 10));
    assert!(latest.snapshot().unwrap().is_empty());

    latest.clear();
    assert!(latest.snapshot().is_none());
  }

  #[test]
  fn busy_worker_drops_frames() {
    let (entered_tx, entered_rx) = channel::<()>();
    let (gate_tx, gate_rx) = channel::<()>();
    let gate_rx = Mutex::new(gate_rx);

    let mut worker = DetectionWorker::spawn(move |frame| {
      entered_tx.send(()).unwrap();
      gate_rx.lock().unwrap().recv().unwrap();
      one_detection(frame.width())
    })
    .unwrap();

    assert!(worker.submit(RgbImage::new(10, 10)));
    entered_rx.recv_timeout(Duration::from_secs(5)).unwrap();

    // 第一帧仍在处理中
    assert!(worker.is_busy());
    assert!(!worker.submit(RgbImage::new(11, 10)));
    assert!(!worker.submit(RgbImage::new(12, 10)));
    assert_eq!(worker.dropped(), 2);

    gate_tx.send(()).unwrap();
    worker.shutdown();

    assert_eq!(worker.processed(), 1);
    assert_eq!(worker.latest().unwrap().image_size.width, 10);
    assert!(!worker.submit(RgbImage::new(13, 10)));
  }

  #[test]
  fn idle_worker_accepts_next_frame() {
    let mut worker = DetectionWorker::spawn(|frame| one_detection(frame.width())).unwrap();

    for width in [10, 20, 30] {
      let mut accepted = worker.submit(RgbImage::new(width, 10));
      for _ in 0..500 {
        if accepted {
          break;
        }
        std::thread::sleep(Duration::from_millis(10));
        accepted = worker.submit(RgbImage::new(width, 10));
      }
      assert!(accepted);
    }

    worker.shutdown();
    assert_eq!(worker.processed(), 3);
    assert_eq!(worker.latest().unwrap().image_size.width, 30);
  }

  #[test]
  fn prediction_replies_per_request() {
    let mut worker = PredictionWorker::spawn(|_capture, detections, _distance| {
      if detections.is_empty() {
        Err(PredictionRejected::NoDetection)
      } else {
        Err(PredictionRejected::InvalidDistance(0.0))
      }
    })
    .unwrap();

    let empty = worker
      .submit(RgbImage::new(4, 4), FrameDetections::empty(Size::new(4, 4)), 100.0)
      .unwrap();
    let full = worker
      .submit(RgbImage::new(4, 4), one_detection(4), 0.0)
      .unwrap();

    assert_eq!(empty.recv().unwrap(), Err(PredictionRejected::NoDetection));
    assert_eq!(full.recv().unwrap(), Err(PredictionRejected::InvalidDistance(0.0)));

    worker.shutdown();
    assert!(matches!(
      worker.submit(RgbImage::new(4, 4), one_detection(4), 100.0),
      Err(WorkerError::Stopped)
    ));
  }
}
