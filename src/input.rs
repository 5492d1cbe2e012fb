// 该文件是 Pici （批次） 项目的一部分。
// src/input.rs - 图像目录输入
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
  collections::VecDeque,
  path::{Path, PathBuf},
};

use walkdir::WalkDir;

use crate::report::Reporter;

mod batch;
mod read_image_file;

pub use self::batch::BatchBuilder;
pub use self::read_image_file::{DecodeError, decode_into, read_image_into};

/// 递归遍历一个目录，按名称顺序深度优先产出匹配扩展名的文件。
///
/// 不跟随符号链接，链接到目录或文件的条目都会被跳过。
pub struct ImageFiles<'r, R: Reporter + ?Sized> {
  walker: walkdir::IntoIter,
  root: PathBuf,
  extensions: Vec<String>,
  reporter: &'r R,
}

impl<'r, R: Reporter + ?Sized> ImageFiles<'r, R> {
  pub fn new(root: impl AsRef<Path>, extensions: &[String], reporter: &'r R) -> Self {
    let root = root.as_ref().to_path_buf();
    Self {
      walker: WalkDir::new(&root).sort_by_file_name().into_iter(),
      root,
      extensions: extensions
        .iter()
        .map(|e| e.trim_start_matches('.').to_ascii_lowercase())
        .collect(),
      reporter,
    }
  }

  fn matches(&self, path: &Path) -> bool {
    path
      .extension()
      .and_then(|ext| ext.to_str())
      .is_some_and(|ext| {
        let ext = ext.to_ascii_lowercase();
        self.extensions.iter().any(|wanted| *wanted == ext)
      })
  }
}

impl<R: Reporter + ?Sized> Iterator for ImageFiles<'_, R> {
  type Item = PathBuf;

  fn next(&mut self) -> Option<Self::Item> {
    loop {
      let entry = match self.walker.next()? {
        Ok(entry) => entry,
        Err(e) => {
          let path = e.path().unwrap_or(&self.root);
          self.reporter.directory_unreadable(path, &e);
          continue;
        }
      };

      if entry.file_type().is_file() && self.matches(entry.path()) {
        return Some(entry.into_path());
      }
    }
  }
}

/// 按目录依次组批：批次满或一个目录遍历结束时产出，批次不跨目录
pub struct Batches<'r, R: Reporter + ?Sized> {
  roots: VecDeque<PathBuf>,
  current: Option<ImageFiles<'r, R>>,
  batch_size: usize,
  extensions: Vec<String>,
  reporter: &'r R,
}

impl<'r, R: Reporter + ?Sized> Batches<'r, R> {
  /// # Panics
  ///
  /// `batch_size` 为 0 时 panic。
  pub fn new(
    roots: &[PathBuf],
    batch_size: usize,
    extensions: &[String],
    reporter: &'r R,
  ) -> Self {
    assert!(batch_size > 0, "批次大小必须大于 0");
    Self {
      roots: roots.iter().cloned().collect(),
      current: None,
      batch_size,
      extensions: extensions.to_vec(),
      reporter,
    }
  }
}

impl<R: Reporter + ?Sized> Iterator for Batches<'_, R> {
  type Item = Vec<PathBuf>;

  fn next(&mut self) -> Option<Self::Item> {
    loop {
      if self.current.is_none() {
        let root = self.roots.pop_front()?;
        self.current = Some(ImageFiles::new(root, &self.extensions, self.reporter));
      }

      let files = self.current.as_mut()?;
      let batch: Vec<PathBuf> = files.by_ref().take(self.batch_size).collect();
      if batch.len() < self.batch_size {
        self.current = None;
      }
      if !batch.is_empty() {
        return Some(batch);
      }
    }
  }
}
