// 该文件是 Pici （批次） 项目的一部分。
// src/model/onnx.rs - ONNX Runtime 推理后端
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

use ndarray::{ArrayView, IxDyn};
use ort::session::{Session, builder::GraphOptimizationLevel};
use thiserror::Error;
use tracing::{debug, info};

use crate::model::{Engine, InputTensor, OutputTensor};

#[derive(Error, Debug)]
pub enum OnnxEngineError {
  #[error("ONNX Runtime 错误: {0}")]
  OrtError(#[from] ort::Error),
  #[error("输入形状错误: {0}")]
  ShapeError(#[from] ndarray::ShapeError),
  #[error("模型中不存在节点: {0}")]
  NodeNotFound(String),
}

/// 基于 ONNX Runtime 的推理引擎。
///
/// 由 TF 冻结图转换而来的模型节点名常带有 `:0` 后缀，两种写法都能匹配。
#[derive(Debug, Default, Clone, Copy)]
pub struct OnnxEngine;

fn resolve_node<'a>(mut names: impl Iterator<Item = &'a str>, wanted: &str) -> Option<&'a str> {
  names.find(|name| {
    *name == wanted
      || name
        .strip_prefix(wanted)
        .is_some_and(|suffix| suffix == ":0")
  })
}

impl Engine for OnnxEngine {
  type Graph = Session;
  type Error = OnnxEngineError;

  fn import_graph(&self, bytes: &[u8]) -> Result<Self::Graph, Self::Error> {
    info!("创建 ONNX Runtime 推理会话");
    let session = Session::builder()?
      .with_optimization_level(GraphOptimizationLevel::Level3)?
      .commit_from_memory(bytes)?;

    debug!(
      "模型输入: {:?}",
      session.inputs.iter().map(|i| &i.name).collect::<Vec<_>>()
    );
    debug!(
      "模型输出: {:?}",
      session.outputs.iter().map(|o| &o.name).collect::<Vec<_>>()
    );
    Ok(session)
  }

  fn run(
    &self,
    graph: &Self::Graph,
    input_name: &str,
    input: InputTensor<'_>,
    outputs: &[&str],
  ) -> Result<Vec<OutputTensor>, Self::Error> {
    let input_node = resolve_node(graph.inputs.iter().map(|i| i.name.as_str()), input_name)
      .ok_or_else(|| OnnxEngineError::NodeNotFound(input_name.to_string()))?;
    let output_nodes = outputs
      .iter()
      .map(|name| {
        resolve_node(graph.outputs.iter().map(|o| o.name.as_str()), name)
          .ok_or_else(|| OnnxEngineError::NodeNotFound(name.to_string()))
      })
      .collect::<Result<Vec<_>, _>>()?;

    let view = ArrayView::from_shape(IxDyn(&input.shape), input.data)?;
    let results = graph.run(ort::inputs![input_node => view]?)?;

    let mut tensors = Vec::with_capacity(output_nodes.len());
    for node in output_nodes {
      let value = results
        .get(node)
        .ok_or_else(|| OnnxEngineError::NodeNotFound(node.to_string()))?;
      let array = value.try_extract_tensor::<f32>()?;
      tensors.push(OutputTensor::new(
        array.shape().to_vec(),
        array.iter().copied().collect(),
      ));
    }
    Ok(tensors)
  }
}
