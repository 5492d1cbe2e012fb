// 该文件是 Pici （批次） 项目的一部分。
// src/config.rs - 项目参数配置
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

use std::path::{Path, PathBuf};

use clap::Parser;
use serde::Deserialize;
use thiserror::Error;

use crate::output::ScorePolicy;

pub const DEFAULT_IMAGE_SIZE: u32 = 300;
pub const DEFAULT_BATCH_SIZE: usize = 30;
pub const DEFAULT_EXTENSION: &str = "jpg";

/// Pici 项目参数配置
#[derive(Parser, Debug, Default)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// JSON 配置文件，命令行参数优先
  #[arg(long, value_name = "FILE")]
  pub config: Option<PathBuf>,

  /// 模型文件路径
  #[arg(long, value_name = "FILE")]
  pub model: Option<PathBuf>,

  /// 标签文件路径（pbtxt 格式）
  #[arg(long, value_name = "FILE")]
  pub labels: Option<PathBuf>,

  /// 图像根目录，可重复指定
  #[arg(long = "image-dir", value_name = "DIR")]
  pub image_dirs: Vec<PathBuf>,

  /// 模型输入图像边长（默认 300）
  #[arg(long, value_name = "PIXELS")]
  pub image_size: Option<u32>,

  /// 每批图像数（默认 30）
  #[arg(long, value_name = "COUNT")]
  pub batch_size: Option<usize>,

  /// 结果 JSON 文件路径
  #[arg(long, value_name = "FILE")]
  pub output: Option<PathBuf>,

  /// 图像扩展名，可重复指定，不区分大小写（默认 jpg）
  #[arg(long = "extension", value_name = "EXT")]
  pub extensions: Vec<String>,

  /// 只写出分数不低于该值的检测；不指定时写出全部检测
  #[arg(long, value_name = "THRESHOLD")]
  pub min_score: Option<f32>,

  /// 解码线程数（默认为 CPU 核数）
  #[arg(long, value_name = "COUNT")]
  pub threads: Option<usize>,
}

/// 配置文件格式
#[derive(Deserialize, Debug, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct FileConfig {
  pub model_to_use: Option<PathBuf>,
  pub labels_to_use: Option<PathBuf>,
  pub image_directories: Vec<PathBuf>,
  pub image_size: Option<u32>,
  pub batch_size: Option<usize>,
  pub output_file_name: Option<PathBuf>,
  pub extensions: Vec<String>,
  pub min_score: Option<f32>,
  pub threads: Option<usize>,
}

#[derive(Error, Debug)]
pub enum ConfigError {
  #[error("读取配置文件 {0} 失败: {1}")]
  ReadError(PathBuf, std::io::Error),
  #[error("解析配置文件 {0} 失败: {1}")]
  ParseError(PathBuf, serde_json::Error),
  #[error("未指定模型文件")]
  MissingModel,
  #[error("未指定标签文件")]
  MissingLabels,
  #[error("未指定图像目录")]
  NoImageDirectories,
  #[error("图像目录路径为空")]
  EmptyImageDirectory,
  #[error("图像尺寸不能为 0")]
  ZeroImageSize,
  #[error("批次大小不能为 0")]
  ZeroBatchSize,
  #[error("未指定输出文件")]
  MissingOutput,
  #[error("未指定图像扩展名")]
  NoExtensions,
  #[error("分数阈值无效: {0}")]
  InvalidMinScore(f32),
  #[error("解码线程数不能为 0")]
  ZeroThreads,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
  pub model: PathBuf,
  pub labels: PathBuf,
  pub image_dirs: Vec<PathBuf>,
  pub image_size: u32,
  pub batch_size: usize,
  pub output: PathBuf,
  pub extensions: Vec<String>,
  pub score_policy: ScorePolicy,
  pub threads: Option<usize>,
}

impl FileConfig {
  pub fn load(path: &Path) -> Result<Self, ConfigError> {
    let text =
      std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError(path.to_path_buf(), e))?;
    serde_json::from_str(&text).map_err(|e| ConfigError::ParseError(path.to_path_buf(), e))
  }
}

fn non_empty<T>(items: Vec<T>, fallback: Vec<T>) -> Vec<T> {
  if items.is_empty() { fallback } else { items }
}

impl Args {
  /// 合并配置文件与命令行参数并校验
  pub fn into_config(self) -> Result<PipelineConfig, ConfigError> {
    let file = match &self.config {
      Some(path) => FileConfig::load(path)?,
      None => FileConfig::default(),
    };

    let extensions = non_empty(self.extensions, file.extensions);
    let config = PipelineConfig {
      model: self
        .model
        .or(file.model_to_use)
        .ok_or(ConfigError::MissingModel)?,
      labels: self
        .labels
        .or(file.labels_to_use)
        .ok_or(ConfigError::MissingLabels)?,
      image_dirs: non_empty(self.image_dirs, file.image_directories),
      image_size: self
        .image_size
        .or(file.image_size)
        .unwrap_or(DEFAULT_IMAGE_SIZE),
      batch_size: self
        .batch_size
        .or(file.batch_size)
        .unwrap_or(DEFAULT_BATCH_SIZE),
      output: self
        .output
        .or(file.output_file_name)
        .ok_or(ConfigError::MissingOutput)?,
      extensions: non_empty(extensions, vec![DEFAULT_EXTENSION.to_string()]),
      score_policy: match self.min_score.or(file.min_score) {
        Some(threshold) => ScorePolicy::MinScore(threshold),
        None => ScorePolicy::ReportAll,
      },
      threads: self.threads.or(file.threads),
    };

    config.validate()?;
    Ok(config)
  }
}

impl PipelineConfig {
  /// 启动前拒绝空值与零值
  pub fn validate(&self) -> Result<(), ConfigError> {
    if self.model.as_os_str().is_empty() {
      return Err(ConfigError::MissingModel);
    }
    if self.labels.as_os_str().is_empty() {
      return Err(ConfigError::MissingLabels);
    }
    if self.image_dirs.is_empty() {
      return Err(ConfigError::NoImageDirectories);
    }
    if self.image_dirs.iter().any(|d| d.as_os_str().is_empty()) {
      return Err(ConfigError::EmptyImageDirectory);
    }
    if self.image_size == 0 {
      return Err(ConfigError::ZeroImageSize);
    }
    if self.batch_size == 0 {
      return Err(ConfigError::ZeroBatchSize);
    }
    if self.output.as_os_str().is_empty() {
      return Err(ConfigError::MissingOutput);
    }
    if self.extensions.is_empty() || self.extensions.iter().any(|e| e.trim().is_empty()) {
      return Err(ConfigError::NoExtensions);
    }
    if let ScorePolicy::MinScore(threshold) = self.score_policy
      && !threshold.is_finite()
    {
      return Err(ConfigError::InvalidMinScore(threshold));
    }
    if self.threads == Some(0) {
      return Err(ConfigError::ZeroThreads);
    }
    Ok(())
  }
}
