// 该文件是 Pici （批次） 项目的一部分。
// src/model.rs - 模型与推理引擎接口
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

use thiserror::Error;
use tracing::{debug, info};

use crate::frame::{AsNhwcBatch, BatchFrame};

/// TensorFlow Object Detection API 导出图的固定节点名
pub const INPUT_NODE: &str = "image_tensor";
pub const OUTPUT_BOXES: &str = "detection_boxes";
pub const OUTPUT_SCORES: &str = "detection_scores";
pub const OUTPUT_CLASSES: &str = "detection_classes";
pub const OUTPUT_NUM_DETECTIONS: &str = "num_detections";
pub const OUTPUT_NODES: [&str; 4] = [
  OUTPUT_BOXES,
  OUTPUT_SCORES,
  OUTPUT_CLASSES,
  OUTPUT_NUM_DETECTIONS,
];

#[cfg(feature = "onnxruntime")]
mod onnx;
#[cfg(feature = "onnxruntime")]
pub use self::onnx::{OnnxEngine, OnnxEngineError};

pub trait Model {
  type Input;
  type Output;
  type Error;

  fn infer(&self, input: &Self::Input) -> Result<Self::Output, Self::Error>;
}

/// 输入张量视图（NHWC, u8）
#[derive(Debug, Clone, Copy)]
pub struct InputTensor<'a> {
  pub shape: [usize; 4],
  pub data: &'a [u8],
}

/// 推理输出张量，统一转为 f32
#[derive(Debug, Clone, PartialEq)]
pub struct OutputTensor {
  pub shape: Vec<usize>,
  pub data: Vec<f32>,
}

impl OutputTensor {
  pub fn new(shape: Vec<usize>, data: Vec<f32>) -> Self {
    Self { shape, data }
  }
}

/// 外部推理引擎的最小接口：导入图、按节点名执行
pub trait Engine {
  type Graph;
  type Error: std::error::Error + Send + Sync + 'static;

  fn import_graph(&self, bytes: &[u8]) -> Result<Self::Graph, Self::Error>;

  /// 按 `outputs` 的顺序返回输出张量
  fn run(
    &self,
    graph: &Self::Graph,
    input_name: &str,
    input: InputTensor<'_>,
    outputs: &[&str],
  ) -> Result<Vec<OutputTensor>, Self::Error>;
}

#[derive(Error, Debug)]
pub enum ModelError {
  #[error("模型加载错误: {0}")]
  ModelLoadError(#[from] std::io::Error),
  #[error("推理引擎错误: {0}")]
  EngineError(Box<dyn std::error::Error + Send + Sync>),
  #[error("输出数量不匹配: 期望 {expected}, 实际 {actual}")]
  OutputCountMismatch { expected: usize, actual: usize },
  #[error("输出形状错误: {0}")]
  ShapeError(String),
}

impl ModelError {
  fn engine<E: std::error::Error + Send + Sync + 'static>(err: E) -> Self {
    ModelError::EngineError(Box::new(err))
  }
}

pub struct GraphLoader {
  model_path: PathBuf,
}

impl GraphLoader {
  pub fn new(model_path: impl AsRef<Path>) -> Self {
    Self {
      model_path: model_path.as_ref().to_path_buf(),
    }
  }

  /// 读取整个模型文件并交给引擎导入，不做额外校验
  pub fn load<E: Engine>(self, engine: E) -> Result<Detector<E>, ModelError> {
    info!("加载模型文件: {}", self.model_path.display());
    let model_data = std::fs::read(&self.model_path)?;
    debug!(
      "模型文件大小: {:.2} MB",
      model_data.len() as f64 / (1024.0 * 1024.0)
    );

    let graph = engine.import_graph(&model_data).map_err(ModelError::engine)?;
    info!("模型加载完成");

    Ok(Detector { engine, graph })
  }
}

/// 已导入的图与其引擎。同一时刻只有一个批次在推理
pub struct Detector<E: Engine> {
  engine: E,
  graph: E::Graph,
}

impl<E: Engine> Detector<E> {
  pub fn engine(&self) -> &E {
    &self.engine
  }
}

impl<E: Engine> Model for Detector<E> {
  type Input = BatchFrame;
  type Output = DetectionOutput;
  type Error = ModelError;

  fn infer(&self, input: &Self::Input) -> Result<Self::Output, Self::Error> {
    let shape = input.shape();
    debug!("设置模型输入: {:?}", shape);
    let tensor = InputTensor {
      shape,
      data: input.as_nhwc(),
    };

    debug!("执行模型推理");
    let outputs = self
      .engine
      .run(&self.graph, INPUT_NODE, tensor, &OUTPUT_NODES)
      .map_err(ModelError::engine)?;

    DetectionOutput::from_tensors(outputs, shape[0])
  }
}

/// 四个按图像、检测序号对齐的输出数组
#[derive(Debug, Clone, PartialEq)]
pub struct DetectionOutput {
  files: usize,
  slots: usize,
  boxes: Vec<f32>,
  scores: Vec<f32>,
  classes: Vec<f32>,
  counts: Vec<f32>,
}

impl DetectionOutput {
  /// `tensors` 顺序为 boxes, scores, classes, num_detections
  pub fn from_tensors(tensors: Vec<OutputTensor>, files: usize) -> Result<Self, ModelError> {
    let [boxes, scores, classes, counts]: [OutputTensor; 4] =
      tensors
        .try_into()
        .map_err(|rest: Vec<OutputTensor>| ModelError::OutputCountMismatch {
          expected: OUTPUT_NODES.len(),
          actual: rest.len(),
        })?;

    let slots = match boxes.shape.as_slice() {
      [n, d, 4] if *n == files => *d,
      shape => {
        return Err(ModelError::ShapeError(format!(
          "{}: 期望 [{}, D, 4], 实际 {:?}",
          OUTPUT_BOXES, files, shape
        )));
      }
    };
    check_shape(OUTPUT_SCORES, &scores, &[files, slots])?;
    check_shape(OUTPUT_CLASSES, &classes, &[files, slots])?;
    if counts.data.len() != files {
      return Err(ModelError::ShapeError(format!(
        "{}: 期望 {} 个元素, 实际 {:?}",
        OUTPUT_NUM_DETECTIONS, files, counts.shape
      )));
    }
    check_len(OUTPUT_BOXES, &boxes, files * slots * 4)?;

    Ok(Self {
      files,
      slots,
      boxes: boxes.data,
      scores: scores.data,
      classes: classes.data,
      counts: counts.data,
    })
  }

  pub fn file_count(&self) -> usize {
    self.files
  }

  /// 每张图像可容纳的检测数（第二维）
  pub fn detection_slots(&self) -> usize {
    self.slots
  }

  /// 第 `file` 张图像的有效检测数，超出第二维的部分被截断
  pub fn count(&self, file: usize) -> usize {
    let raw = self.counts[file];
    if !raw.is_finite() || raw <= 0.0 {
      return 0;
    }
    (raw as usize).min(self.slots)
  }

  pub fn score(&self, file: usize, detection: usize) -> f32 {
    self.scores[file * self.slots + detection]
  }

  pub fn class_id(&self, file: usize, detection: usize) -> i64 {
    self.classes[file * self.slots + detection].round() as i64
  }

  /// `[top, left, bottom, right]`，归一化坐标
  pub fn bbox(&self, file: usize, detection: usize) -> [f32; 4] {
    let offset = (file * self.slots + detection) * 4;
    let b = &self.boxes[offset..offset + 4];
    [b[0], b[1], b[2], b[3]]
  }
}

fn check_shape(name: &str, tensor: &OutputTensor, expected: &[usize]) -> Result<(), ModelError> {
  if tensor.shape != expected {
    return Err(ModelError::ShapeError(format!(
      "{}: 期望 {:?}, 实际 {:?}",
      name, expected, tensor.shape
    )));
  }
  check_len(name, tensor, expected.iter().product())
}

fn check_len(name: &str, tensor: &OutputTensor, expected: usize) -> Result<(), ModelError> {
  if tensor.data.len() != expected {
    return Err(ModelError::ShapeError(format!(
      "{}: 数据长度期望 {}, 实际 {}",
      name,
      expected,
      tensor.data.len()
    )));
  }
  Ok(())
}
