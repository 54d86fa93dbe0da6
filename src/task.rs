// 该文件是 Niuheng （牛衡） 项目的一部分。
// src/task.rs - 任务调度
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
    mpsc::{Receiver, TryRecvError},
  },
  thread,
  time::{Duration, Instant},
};

use image::RgbImage;
use tracing::{info, warn};

use crate::{
  distance::{DistanceSource, usable_distance_cm},
  model::{DetectorBackend, RegressorBackend},
  output::Render,
  pipeline::{Pipeline, PredictionReport},
  worker::{DetectionWorker, PredictionReply, PredictionWorker},
};

pub trait Task<I, M, O>: Sized {
  type Error;
  fn run_task(self, input: I, model: M, output: O) -> Result<(), Self::Error>;
}

/// 读取一帧，分析后立即用同一帧拍摄
pub struct OneShotTask<S> {
  distance: S,
}

impl<S: DistanceSource> OneShotTask<S> {
  pub fn new(distance: S) -> Self {
    Self { distance }
  }
}

impl<S, I, D, R, O, RE> Task<I, Arc<Pipeline<D, R>>, O> for OneShotTask<S>
where
  S: DistanceSource,
  I: Iterator<Item = RgbImage>,
  D: DetectorBackend,
  R: RegressorBackend,
  O: Render<RgbImage, PredictionReport, Error = RE>,
  RE: std::error::Error + Sync + Send + 'static,
{
  type Error = anyhow::Error;

  fn run_task(self, mut input: I, pipeline: Arc<Pipeline<D, R>>, output: O) -> Result<(), Self::Error> {
    info!("开始任务...");
    let frame = input.next().ok_or_else(|| anyhow::anyhow!("没有输入帧"))?;
    let distance_cm = usable_distance_cm(&self.distance)
      .ok_or_else(|| anyhow::anyhow!("没有可用的测距读数"))?;
    info!("输入帧获取成功，距离 {} cm，开始推理...", distance_cm);

    let now = Instant::now();
    let detections = pipeline.analyze(&frame);
    let analyzed = now.elapsed();
    let report = pipeline.predict(&frame, &detections, distance_cm)?;
    let elapsed = now.elapsed();
    info!("推理完成，耗时: {:.2?} / {:.2?}", analyzed, elapsed);

    output.render_result(&frame, &report)?;
    info!(
      "渲染完成，重量 {:.1} kg，耗时: {:.2?}",
      report.weight.weight_kg,
      now.elapsed()
    );

    pipeline.release();
    Ok(())
  }
}

/// 对同一帧反复分析和拍摄，统计平均耗时
pub struct RepeatShotTask<S> {
  distance: S,
  repeat_times: usize,
}

impl<S: DistanceSource> RepeatShotTask<S> {
  const WARMUP: usize = 2;

  pub fn new(distance: S) -> Self {
    Self {
      distance,
      repeat_times: 1000,
    }
  }

  pub fn with_repeat_times(mut self, repeat_times: usize) -> Self {
    self.repeat_times = repeat_times.max(1);
    self
  }
}

fn average(times: &[Duration], skip: usize) -> Duration {
  let measured = if times.len() > skip { &times[skip..] } else { times };
  if measured.is_empty() {
    return Duration::ZERO;
  }
  measured.iter().sum::<Duration>() / measured.len() as u32
}

impl<S, I, D, R, O, RE> Task<I, Arc<Pipeline<D, R>>, O> for RepeatShotTask<S>
where
  S: DistanceSource,
  I: Iterator<Item = RgbImage>,
  D: DetectorBackend,
  R: RegressorBackend,
  O: Render<RgbImage, PredictionReport, Error = RE>,
  RE: std::error::Error + Sync + Send + 'static,
{
  type Error = anyhow::Error;

  fn run_task(self, mut input: I, pipeline: Arc<Pipeline<D, R>>, output: O) -> Result<(), Self::Error> {
    info!("开始任务...");
    let frame = input.next().ok_or_else(|| anyhow::anyhow!("没有输入帧"))?;
    info!("输入帧获取成功，开始推理...");

    let mut analyze_times = Vec::with_capacity(self.repeat_times);
    let mut predict_times = Vec::with_capacity(self.repeat_times);
    let mut last = None;

    for i in 0..self.repeat_times {
      let Some(distance_cm) = usable_distance_cm(&self.distance) else {
        warn!("({})没有可用的测距读数", i);
        continue;
      };

      let now = Instant::now();
      let detections = pipeline.analyze(&frame);
      let analyzed = now.elapsed();
      analyze_times.push(analyzed);

      let now = Instant::now();
      match pipeline.predict(&frame, &detections, distance_cm) {
        Ok(report) => {
          let elapsed = now.elapsed();
          predict_times.push(elapsed);
          info!("({})推理完成，耗时: {:.2?} / {:.2?}", i, analyzed, elapsed);
          last = Some(report);
        }
        Err(rejected) => warn!("({})预测被拒绝: {}", i, rejected),
      }
    }

    warn!(
      "平均分析时间: {:.2?}，平均预测时间: {:.2?}",
      average(&analyze_times, Self::WARMUP),
      average(&predict_times, Self::WARMUP)
    );

    if let Some(report) = last {
      output.render_result(&frame, &report)?;
    }

    pipeline.release();
    Ok(())
  }
}

/// 预览帧交给分析线程，每隔若干帧用当前帧与最近的检测结果拍摄一次。
/// 同一时间最多只有一次拍摄在等待预测结果。
pub struct ContinuousTask<S> {
  distance: S,
  frame_number: Option<usize>,
  capture_every: usize,
}

impl<S: DistanceSource> ContinuousTask<S> {
  pub fn new(distance: S) -> Self {
    Self {
      distance,
      frame_number: None,
      capture_every: 30,
    }
  }

  pub fn with_frame_number(mut self, frame_number: Option<usize>) -> Self {
    self.frame_number = frame_number;
    self
  }

  pub fn with_capture_every(mut self, capture_every: usize) -> Self {
    self.capture_every = capture_every.max(1);
    self
  }
}

static INTERRUPTED: AtomicBool = AtomicBool::new(false);

/// 每个进程只能注册一次 Ctrl-C 处理函数，之后的任务只重置标记
fn install_interrupt_handler() -> Result<(), ctrlc::Error> {
  static INSTALLED: Mutex<bool> = Mutex::new(false);

  let mut installed = INSTALLED.lock().unwrap_or_else(PoisonError::into_inner);
  if !*installed {
    ctrlc::set_handler(|| {
      info!("收到中断信号，准备退出...");
      INTERRUPTED.store(true, Ordering::Release);
      thread::spawn(|| {
        thread::sleep(Duration::from_secs(30));
        warn!("强制退出程序");
        std::process::exit(1);
      });
    })?;
    *installed = true;
  }
  INTERRUPTED.store(false, Ordering::Release);
  Ok(())
}

struct PendingShot {
  frame: RgbImage,
  reply: Receiver<PredictionReply>,
}

fn render_reply<O, RE>(output: &O, frame: &RgbImage, reply: PredictionReply) -> Result<(), RE>
where
  O: Render<RgbImage, PredictionReport, Error = RE>,
{
  match reply {
    Ok(report) => {
      info!(
        "拍摄结果: {:.1} kg (置信度 {:.2})",
        report.weight.weight_kg, report.weight.confidence
      );
      output.render_result(frame, &report)
    }
    Err(rejected) => {
      warn!("拍摄被拒绝: {}", rejected);
      Ok(())
    }
  }
}

impl<S, I, D, R, O, RE> Task<I, Arc<Pipeline<D, R>>, O> for ContinuousTask<S>
where
  S: DistanceSource,
  I: Iterator<Item = RgbImage>,
  D: DetectorBackend + 'static,
  R: RegressorBackend + 'static,
  O: Render<RgbImage, PredictionReport, Error = RE>,
  RE: std::error::Error + Sync + Send + 'static,
{
  type Error = anyhow::Error;

  fn run_task(self, input: I, pipeline: Arc<Pipeline<D, R>>, output: O) -> Result<(), Self::Error> {
    info!("开始任务...");
    install_interrupt_handler()?;

    let mut detection = {
      let pipeline = pipeline.clone();
      DetectionWorker::spawn(move |frame| pipeline.analyze(frame))?
    };
    let mut prediction = {
      let pipeline = pipeline.clone();
      PredictionWorker::spawn(move |capture, detections, distance_cm| {
        pipeline.predict(capture, detections, distance_cm)
      })?
    };

    let mut pending: Option<PendingShot> = None;
    let mut frame_index = 0usize;
    let mut now = Instant::now();

    for frame in input {
      frame_index = frame_index.wrapping_add(1);

      if frame_index % self.capture_every == 0 && pending.is_some() {
        info!("第 {} 帧: 上一次拍摄尚未完成，跳过拍摄", frame_index);
      } else if frame_index % self.capture_every == 0 {
        match (detection.latest(), usable_distance_cm(&self.distance)) {
          (Some(detections), Some(distance_cm)) => {
            let reply = prediction.submit(frame.clone(), detections, distance_cm)?;
            pending = Some(PendingShot {
              frame: frame.clone(),
              reply,
            });
          }
          (None, _) => info!("第 {} 帧: 尚无分析结果，跳过拍摄", frame_index),
          (_, None) => warn!("第 {} 帧: 没有可用的测距读数，跳过拍摄", frame_index),
        }
      }

      if !detection.submit(frame) {
        info!("第 {} 帧: 分析线程忙，丢弃", frame_index);
      }

      if let Some(shot) = pending.take() {
        match shot.reply.try_recv() {
          Ok(reply) => render_reply(&output, &shot.frame, reply)?,
          Err(TryRecvError::Empty) => pending = Some(shot),
          Err(TryRecvError::Disconnected) => warn!("预测线程未返回结果"),
        }
      }

      info!("处理第 {} 帧，耗时: {:.2?}", frame_index, now.elapsed());
      now = Instant::now();

      if self.frame_number.is_some_and(|n| frame_index >= n) {
        info!("达到指定帧数 {}, 退出任务循环", frame_index);
        break;
      }
      if INTERRUPTED.load(Ordering::Acquire) {
        warn!("中断信号接收，退出任务循环");
        break;
      }
    }

    detection.shutdown();
    if let Some(shot) = pending {
      match shot.reply.recv() {
        Ok(reply) => render_reply(&output, &shot.frame, reply)?,
        Err(_) => warn!("预测线程未返回结果"),
      }
    }
    prediction.shutdown();

    info!(
      "分析 {} 帧，丢弃 {} 帧",
      detection.processed(),
      detection.dropped()
    );
    pipeline.release();

    info!("任务完成，退出");
    Ok(())
  }
}
