// 该文件是 Pici （批次） 项目的一部分。
// src/output/json_record.rs - JSON 流式记录输出
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
  fs::File,
  io::{BufWriter, Write},
  path::Path,
};

use thiserror::Error;
use tracing::{info, warn};

use crate::output::{DetectResult, Record};

const INDENT: &[u8] = b"  ";

#[derive(Error, Debug)]
pub enum JsonRecordError {
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("JSON 序列化错误: {0}")]
  JsonError(#[from] serde_json::Error),
  #[error("输出已关闭")]
  Closed,
}

/// 以缩进格式逐条追加到一个 JSON 数组中。
///
/// 创建时写入 `[`，[`Record::finish`] 或析构时写入 `]`。
/// 每条记录写完立即 flush，运行中断时已写出的记录仍然保留。
pub struct JsonRecordOutput<W: Write> {
  writer: Option<W>,
  records: usize,
}

impl JsonRecordOutput<BufWriter<File>> {
  pub fn create(path: impl AsRef<Path>) -> Result<Self, JsonRecordError> {
    let path = path.as_ref();
    if let Some(parent) = path.parent()
      && !parent.as_os_str().is_empty()
    {
      std::fs::create_dir_all(parent)?;
    }

    info!("创建结果文件: {}", path.display());
    let file = File::create(path)?;
    Self::new(BufWriter::new(file))
  }
}

impl<W: Write> JsonRecordOutput<W> {
  pub fn new(mut writer: W) -> Result<Self, JsonRecordError> {
    writer.write_all(b"[")?;
    writer.flush()?;
    Ok(Self {
      writer: Some(writer),
      records: 0,
    })
  }

  pub fn records(&self) -> usize {
    self.records
  }

  /// 写入数组结尾并交还底层写入器
  pub fn close(mut self) -> Result<W, JsonRecordError> {
    let mut writer = self.writer.take().ok_or(JsonRecordError::Closed)?;
    write_end(&mut writer, self.records)?;
    Ok(writer)
  }
}

fn write_end<W: Write>(writer: &mut W, records: usize) -> std::io::Result<()> {
  if records > 0 {
    writer.write_all(b"\n")?;
  }
  writer.write_all(b"]\n")?;
  writer.flush()
}

impl<W: Write> Record for JsonRecordOutput<W> {
  type Error = JsonRecordError;

  fn record(&mut self, result: &DetectResult) -> Result<(), Self::Error> {
    let writer = self.writer.as_mut().ok_or(JsonRecordError::Closed)?;
    let text = serde_json::to_string_pretty(result)?;

    let separator: &[u8] = if self.records == 0 { b"\n" } else { b",\n" };
    writer.write_all(separator)?;
    for (i, line) in text.lines().enumerate() {
      if i > 0 {
        writer.write_all(b"\n")?;
      }
      writer.write_all(INDENT)?;
      writer.write_all(line.as_bytes())?;
    }
    writer.flush()?;

    self.records += 1;
    Ok(())
  }

  fn finish(self) -> Result<(), Self::Error> {
    self.close().map(drop)
  }
}

// 流水线总会显式 finish，这里只兜底未 finish 就被丢弃的写出器
impl<W: Write> Drop for JsonRecordOutput<W> {
  fn drop(&mut self) {
    if let Some(mut writer) = self.writer.take()
      && let Err(e) = write_end(&mut writer, self.records)
    {
      warn!("关闭结果文件失败: {}", e);
    }
  }
}
