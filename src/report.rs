// 该文件是 Pici （批次） 项目的一部分。
// src/report.rs - 运行事件报告
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
  path::{Path, PathBuf},
  time::Duration,
};

use tracing::{info, warn};

use crate::{input::DecodeError, model::ModelError, output::DetectResult, task::RunSummary};

/// 流水线事件的接收者，由调用方注入到各组件中
pub trait Reporter {
  fn directory_unreadable(&self, _path: &Path, _err: &walkdir::Error) {}
  fn decode_failed(&self, _path: &Path, _err: &DecodeError) {}
  fn batch_skipped(&self, _paths: &[PathBuf]) {}
  fn batch_failed(&self, _paths: &[PathBuf], _err: &ModelError) {}
  fn batch_completed(&self, _survivors: &[PathBuf], _elapsed: Duration) {}
  fn result_written(&self, _result: &DetectResult) {}
  fn cancelled(&self, _batches: usize) {}
  fn output_close_failed(&self, _err: &dyn std::error::Error) {}
  fn finished(&self, _summary: &RunSummary) {}
}

/// 通过 `tracing` 输出的默认实现
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingReporter;

impl Reporter for TracingReporter {
  fn directory_unreadable(&self, path: &Path, err: &walkdir::Error) {
    warn!("无法读取目录 {}: {}", path.display(), err);
  }

  fn decode_failed(&self, path: &Path, err: &DecodeError) {
    warn!("读取图像 {} 失败: {}", path.display(), err);
  }

  fn batch_skipped(&self, paths: &[PathBuf]) {
    warn!("批次中 {} 个文件全部读取失败，跳过推理", paths.len());
  }

  fn batch_failed(&self, paths: &[PathBuf], err: &ModelError) {
    warn!("批次推理失败 {:?}: {}", paths, err);
  }

  fn batch_completed(&self, survivors: &[PathBuf], elapsed: Duration) {
    info!("推理完成，{} 个文件，耗时: {:.2?}", survivors.len(), elapsed);
  }

  fn result_written(&self, result: &DetectResult) {
    let labels = result
      .detections
      .iter()
      .map(|d| d.label.as_str())
      .collect::<Vec<_>>()
      .join(",");
    info!("{} = {}", result.file_name, labels);
  }

  fn cancelled(&self, batches: usize) {
    info!("收到中断信号，已完成 {} 个批次，停止处理", batches);
  }

  fn output_close_failed(&self, err: &dyn std::error::Error) {
    warn!("关闭结果文件失败: {}", err);
  }

  fn finished(&self, summary: &RunSummary) {
    info!(
      "处理完成: 推理批次 {}, 跳过批次 {}, 失败批次 {}, 写入文件 {}, 读取失败 {}",
      summary.batches_run,
      summary.batches_skipped,
      summary.batches_failed,
      summary.files_written,
      summary.decode_failures
    );
  }
}
