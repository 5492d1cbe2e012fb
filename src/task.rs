// 该文件是 Pici （批次） 项目的一部分。
// src/task.rs - 批量推理任务
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
  path::PathBuf,
  sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
  },
};

use anyhow::Context;
use tracing::{debug, info};

use crate::{
  catalog::Catalog,
  config::PipelineConfig,
  frame::BatchFrame,
  input::{BatchBuilder, Batches},
  model::{DetectionOutput, Engine, GraphLoader, Model, ModelError},
  output::{JsonRecordOutput, Record, ResultWriter},
  report::Reporter,
};

pub trait Task<I, M, O>: Sized {
  type Output;
  type Error;
  fn run_task(self, input: I, model: M, output: O) -> Result<Self::Output, Self::Error>;
}

/// 取消信号，只在批次之间检查
#[derive(Debug, Default, Clone)]
pub struct Cancellation {
  flag: Arc<AtomicBool>,
}

impl Cancellation {
  pub fn cancel(&self) {
    self.flag.store(true, Ordering::SeqCst);
  }

  pub fn is_cancelled(&self) -> bool {
    self.flag.load(Ordering::SeqCst)
  }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RunSummary {
  /// 成功推理并写出的批次
  pub batches_run: usize,
  /// 全部文件读取失败、未推理的批次
  pub batches_skipped: usize,
  /// 推理失败、结果丢弃的批次
  pub batches_failed: usize,
  pub files_written: usize,
  pub decode_failures: usize,
  pub cancelled: bool,
}

/// 顺序执行：组批 → 并发解码 → 推理 → 写出，同一时刻只有一个批次在推理
pub struct BatchTask<'r, R: Reporter + ?Sized> {
  builder: BatchBuilder,
  frame: BatchFrame,
  cancellation: Cancellation,
  reporter: &'r R,
}

impl<'r, R: Reporter + ?Sized> BatchTask<'r, R> {
  /// 批量帧在此分配一次，之后所有批次复用
  pub fn new(
    builder: BatchBuilder,
    image_size: usize,
    batch_size: usize,
    cancellation: Cancellation,
    reporter: &'r R,
  ) -> Self {
    Self {
      builder,
      frame: BatchFrame::new(image_size, batch_size),
      cancellation,
      reporter,
    }
  }
}

impl<'r, R, I, M, O> Task<I, &M, ResultWriter<O>> for BatchTask<'r, R>
where
  R: Reporter + ?Sized,
  I: Iterator<Item = Vec<PathBuf>>,
  M: Model<Input = BatchFrame, Output = DetectionOutput, Error = ModelError>,
  O: Record,
  O::Error: std::error::Error + Send + Sync + 'static,
{
  type Output = RunSummary;
  type Error = anyhow::Error;

  fn run_task(
    mut self,
    input: I,
    model: &M,
    mut output: ResultWriter<O>,
  ) -> Result<Self::Output, Self::Error> {
    info!("开始任务...");
    let mut summary = RunSummary::default();

    for batch in input {
      if self.cancellation.is_cancelled() {
        summary.cancelled = true;
        self.reporter.cancelled(summary.batches_run);
        break;
      }

      debug!("处理批次: {} 个文件", batch.len());
      let survivors = self.builder.build(&mut self.frame, &batch, self.reporter);
      summary.decode_failures += batch.len() - survivors.len();
      if survivors.is_empty() {
        self.reporter.batch_skipped(&batch);
        summary.batches_skipped += 1;
        continue;
      }

      let now = std::time::Instant::now();
      match model.infer(&self.frame) {
        Ok(detections) => {
          self.reporter.batch_completed(&survivors, now.elapsed());
          match output.write(&survivors, &detections, self.reporter) {
            Ok(written) => summary.files_written += written,
            Err(e) => {
              if let Err(close) = output.finish() {
                self.reporter.output_close_failed(&close);
              }
              return Err(anyhow::Error::new(e).context("写入检测结果失败"));
            }
          }
          summary.batches_run += 1;
        }
        Err(e) => {
          self.reporter.batch_failed(&batch, &e);
          summary.batches_failed += 1;
        }
      }
    }

    output.finish().context("关闭结果文件失败")?;
    self.reporter.finished(&summary);
    Ok(summary)
  }
}

/// 按配置加载标签与模型、创建输出，然后运行整个流水线
pub fn run_pipeline<E, R>(
  config: &PipelineConfig,
  engine: E,
  cancellation: Cancellation,
  reporter: &R,
) -> anyhow::Result<RunSummary>
where
  E: Engine,
  R: Reporter + ?Sized,
{
  config.validate()?;

  let catalog = Catalog::load(&config.labels)
    .with_context(|| format!("加载标签文件 {} 失败", config.labels.display()))?;
  let detector = GraphLoader::new(&config.model)
    .load(engine)
    .with_context(|| format!("加载模型 {} 失败", config.model.display()))?;
  let builder = BatchBuilder::new(config.threads).context("创建解码线程池失败")?;
  let output = JsonRecordOutput::create(&config.output)
    .with_context(|| format!("创建结果文件 {} 失败", config.output.display()))?;

  let batches = Batches::new(
    &config.image_dirs,
    config.batch_size,
    &config.extensions,
    reporter,
  );
  let writer = ResultWriter::new(output, catalog, config.score_policy);

  BatchTask::new(
    builder,
    config.image_size as usize,
    config.batch_size,
    cancellation,
    reporter,
  )
  .run_task(batches, &detector, writer)
}
