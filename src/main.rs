// 该文件是 Pici （批次） 项目的一部分。
// src/main.rs - 项目主程序
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

use std::{thread, time::Duration};

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use pici::{
  config::Args,
  model::OnnxEngine,
  report::TracingReporter,
  task::{Cancellation, run_pipeline},
};

const FORCE_EXIT_AFTER: Duration = Duration::from_secs(30);

fn main() -> Result<()> {
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
    .init();

  let config = Args::parse().into_config()?;

  info!("模型文件路径: {}", config.model.display());
  info!("标签文件路径: {}", config.labels.display());
  info!("图像目录: {:?}", config.image_dirs);
  info!("图像尺寸: {}", config.image_size);
  info!("批次大小: {}", config.batch_size);
  info!("输出文件: {}", config.output.display());
  info!("筛选策略: {:?}", config.score_policy);

  let cancellation = Cancellation::default();
  let handler = cancellation.clone();
  ctrlc::set_handler(move || {
    if handler.is_cancelled() {
      warn!("再次收到中断信号，强制退出");
      std::process::exit(130);
    }
    info!("收到中断信号，当前批次完成后退出...");
    handler.cancel();
    thread::spawn(|| {
      thread::sleep(FORCE_EXIT_AFTER);
      warn!("强制退出程序");
      std::process::exit(1);
    });
  })
  .context("设置 Ctrl-C 处理失败")?;

  let summary = run_pipeline(&config, OnnxEngine, cancellation, &TracingReporter)?;

  if summary.cancelled {
    info!("任务已中断，输出文件: {}", config.output.display());
  } else {
    info!("任务完成，输出文件: {}", config.output.display());
  }
  Ok(())
}
