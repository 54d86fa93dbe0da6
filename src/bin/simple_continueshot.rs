// 该文件是 Niuheng （牛衡） 项目的一部分。
// src/bin/simple_continueshot.rs - 连续分析与定时称重
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use std::{path::PathBuf, sync::Arc};

use anyhow::Result;
use clap::Parser;
use niuheng::{
  FromUrl,
  config::PipelineConfig,
  distance::DistanceWrapper,
  input::InputWrapper,
  output::OutputWrapper,
  pipeline::Pipeline,
  task::{ContinuousTask, Task},
};
use tracing::info;
use url::Url;

/// Niuheng 连续称重参数
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 检测模型
  #[arg(long, value_name = "MODEL")]
  pub detector: Url,
  /// 重量回归模型
  #[arg(long, value_name = "MODEL")]
  pub regressor: Url,
  /// 流水线配置文件
  #[arg(long, value_name = "CONFIG")]
  pub config: PathBuf,
  /// 输入来源
  #[arg(long, value_name = "SOURCE")]
  pub input: Url,
  /// 测距来源
  #[arg(long, value_name = "DISTANCE")]
  pub distance: Url,
  /// 输出路径
  #[arg(long, value_name = "OUTPUT")]
  pub output: Url,

  #[arg(long, value_name = "FRAME_NUMBER")]
  pub frame_number: Option<usize>,
  /// 每隔多少帧拍摄一次
  #[arg(long, value_name = "FRAMES", default_value_t = 30)]
  pub capture_every: usize,
}

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = Args::parse();

  info!("检测模型: {}", args.detector);
  info!("回归模型: {}", args.regressor);
  info!("输入来源: {}", args.input);
  info!("测距来源: {}", args.distance);
  info!("输出路径: {}", args.output);

  let config = PipelineConfig::from_file(&args.config)?;
  let input = InputWrapper::from_url(&args.input)?;
  let distance = DistanceWrapper::from_url(&args.distance)?;
  let output = OutputWrapper::from_url(&args.output)?;
  let pipeline = Pipeline::load(&args.detector, &args.regressor, &config)?;

  ContinuousTask::new(distance)
    .with_frame_number(args.frame_number)
    .with_capture_every(args.capture_every)
    .run_task(input, Arc::new(pipeline), output)?;

  Ok(())
}
