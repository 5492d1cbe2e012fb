// 该文件是 Pici （批次） 项目的一部分。
// src/input/batch.rs - 批量张量组装
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

use rayon::{ThreadPool, ThreadPoolBuildError, ThreadPoolBuilder, prelude::*};
use tracing::debug;

use crate::{frame::BatchFrame, input::read_image_file::read_image_into, report::Reporter};

/// 并发解码一批文件并写入共享的批量帧
pub struct BatchBuilder {
  pool: ThreadPool,
}

impl BatchBuilder {
  /// `threads` 为 `None` 时使用 rayon 的默认线程数
  pub fn new(threads: Option<usize>) -> Result<Self, ThreadPoolBuildError> {
    let mut builder = ThreadPoolBuilder::new().thread_name(|i| format!("pici-decode-{}", i));
    if let Some(threads) = threads {
      builder = builder.num_threads(threads);
    }
    Ok(Self {
      pool: builder.build()?,
    })
  }

  /// 每个文件一个任务，写入各自预先分配的槽位；等待全部任务结束后压紧。
  ///
  /// 返回解码成功的文件（存活列表），顺序与输入一致，
  /// 第 `i` 个存活文件对应 `frame` 的第 `i` 个槽位。
  /// 失败的文件报告给 `reporter` 后丢弃，不会中断整个批次。
  ///
  /// # Panics
  ///
  /// `paths` 多于 `frame` 的容量时 panic。
  pub fn build<R: Reporter + ?Sized>(
    &self,
    frame: &mut BatchFrame,
    paths: &[PathBuf],
    reporter: &R,
  ) -> Vec<PathBuf> {
    let size = frame.image_size() as u32;
    let slot_len = frame.slot_len();
    let slots = frame.slots_mut(paths.len());

    let outcomes: Vec<_> = self.pool.install(|| {
      slots
        .par_chunks_exact_mut(slot_len)
        .zip(paths.par_iter())
        .map(|(slot, path)| read_image_into(path, size, slot))
        .collect()
    });

    let mut survivors = Vec::with_capacity(paths.len());
    let mut succeeded = Vec::with_capacity(paths.len());
    for (path, outcome) in paths.iter().zip(outcomes) {
      match outcome {
        Ok(()) => {
          survivors.push(path.clone());
          succeeded.push(true);
        }
        Err(e) => {
          reporter.decode_failed(path, &e);
          succeeded.push(false);
        }
      }
    }

    let count = frame.compact(&succeeded);
    debug!("批次组装完成: {}/{} 个文件可用", count, paths.len());
    survivors
  }
}
