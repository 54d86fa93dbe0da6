// 该文件是 Niuheng （牛衡） 项目的一部分。
// src/bin/benchmark_repeatshot.rs - 重复推理性能测试
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
  task::{RepeatShotTask, Task},
};
use tracing::info;
use url::Url;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  #[arg(long, value_name = "MODEL")]
  pub detector: Url,
  #[arg(long, value_name = "MODEL")]
  pub regressor: Url,
  #[arg(long, value_name = "CONFIG")]
  pub config: PathBuf,
  #[arg(long, value_name = "SOURCE")]
  pub input: Url,
  #[arg(long, value_name = "DISTANCE", default_value = "fixed:200")]
  pub distance: Url,
  #[arg(long, value_name = "OUTPUT", default_value = "null:")]
  pub output: Url,
  /// 重复次数
  #[arg(long, default_value_t = 1000)]
  pub times: usize,
}

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = Args::parse();

  info!("检测模型: {}", args.detector);
  info!("回归模型: {}", args.regressor);
  info!("输入来源: {}", args.input);
  info!("重复次数: {}", args.times);

  let config = PipelineConfig::from_file(&args.config)?;
  let input = InputWrapper::from_url(&args.input)?;
  let distance = DistanceWrapper::from_url(&args.distance)?;
  let output = OutputWrapper::from_url(&args.output)?;
  let pipeline = Pipeline::load(&args.detector, &args.regressor, &config)?;

  RepeatShotTask::new(distance)
    .with_repeat_times(args.times)
    .run_task(input, Arc::new(pipeline), output)?;

  Ok(())
}
