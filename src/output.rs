// 该文件是 Pici （批次） 项目的一部分。
// src/output.rs - 检测结果输出
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

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{catalog::Catalog, model::DetectionOutput, report::Reporter};

mod json_record;
pub use self::json_record::{JsonRecordError, JsonRecordOutput};

/// 按文件逐条写出结果
pub trait Record {
  type Error;

  fn record(&mut self, result: &DetectResult) -> Result<(), Self::Error>;
  fn finish(self) -> Result<(), Self::Error>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Detection {
  pub score: f32,
  pub id: i64,
  pub label: String,
  pub top: f32,
  pub left: f32,
  pub bottom: f32,
  pub right: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetectResult {
  pub file_name: String,
  pub detections: Vec<Detection>,
}

/// 检测结果的筛选策略
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum ScorePolicy {
  /// 写出 `num_detections` 范围内的全部检测，由下游自行筛选
  #[default]
  ReportAll,
  /// 丢弃分数低于阈值的检测
  MinScore(f32),
}

impl ScorePolicy {
  pub fn accepts(&self, score: f32) -> bool {
    match self {
      ScorePolicy::ReportAll => true,
      ScorePolicy::MinScore(threshold) => score >= *threshold,
    }
  }
}

/// 将平铺的输出数组按存活文件拆分成逐文件的结果
pub fn demux<'a>(
  survivors: &'a [PathBuf],
  output: &'a DetectionOutput,
  catalog: &'a Catalog,
  policy: ScorePolicy,
) -> impl Iterator<Item = DetectResult> + 'a {
  survivors.iter().enumerate().map(move |(file, path)| {
    let detections = (0..output.count(file))
      .filter(|&d| policy.accepts(output.score(file, d)))
      .map(|d| {
        let id = output.class_id(file, d);
        let [top, left, bottom, right] = output.bbox(file, d);
        Detection {
          score: output.score(file, d),
          id,
          label: catalog.label(id).to_string(),
          top,
          left,
          bottom,
          right,
        }
      })
      .collect();

    DetectResult {
      file_name: path.display().to_string(),
      detections,
    }
  })
}

#[derive(Debug, Error)]
pub enum WriteError<E> {
  #[error("存活文件数 {survivors} 与模型输出的文件数 {outputs} 不一致")]
  FileCountMismatch { survivors: usize, outputs: usize },
  #[error(transparent)]
  RecordError(#[from] E),
}

/// 结果写出器：拆分一个批次的输出并逐文件交给 [`Record`]
pub struct ResultWriter<O: Record> {
  output: O,
  catalog: Catalog,
  policy: ScorePolicy,
}

impl<O: Record> ResultWriter<O> {
  pub fn new(output: O, catalog: Catalog, policy: ScorePolicy) -> Self {
    Self {
      output,
      catalog,
      policy,
    }
  }

  pub fn catalog(&self) -> &Catalog {
    &self.catalog
  }

  /// 按存活顺序写出，返回写出的文件数
  pub fn write<R: Reporter + ?Sized>(
    &mut self,
    survivors: &[PathBuf],
    detections: &DetectionOutput,
    reporter: &R,
  ) -> Result<usize, WriteError<O::Error>> {
    if survivors.len() != detections.file_count() {
      return Err(WriteError::FileCountMismatch {
        survivors: survivors.len(),
        outputs: detections.file_count(),
      });
    }

    let mut written = 0;
    for result in demux(survivors, detections, &self.catalog, self.policy) {
      self.output.record(&result)?;
      reporter.result_written(&result);
      written += 1;
    }
    Ok(written)
  }

  pub fn finish(self) -> Result<(), O::Error> {
    self.output.finish()
  }
}
