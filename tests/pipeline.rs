// 该文件是 Pici （批次） 项目的一部分。
// tests/pipeline.rs - 流水线集成测试
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
  cell::{Cell, RefCell},
  path::{Path, PathBuf},
  time::Duration,
};

use image::{Rgb, RgbImage};
use pici::{
  catalog::Catalog,
  config::PipelineConfig,
  input::{BatchBuilder, Batches, DecodeError},
  model::{Engine, GraphLoader, InputTensor, ModelError, OutputTensor},
  output::{DetectResult, Record, ResultWriter, ScorePolicy},
  report::Reporter,
  task::{BatchTask, Cancellation, RunSummary, Task, run_pipeline},
};
use tempfile::TempDir;
use thiserror::Error;

const LABELS: &str = "item {\n  name: \"cat\"\n  id: 1\n  display_name: \"Cat\"\n}\n";
const IMAGE_SIZE: u32 = 16;

#[derive(Error, Debug)]
#[error("scripted engine failure")]
struct ScriptedError;

/// 每个文件返回两个检测：类别 1（0.9）与类别 7（0.3）
#[derive(Default)]
struct ScriptedEngine {
  runs: Cell<usize>,
  batch_sizes: RefCell<Vec<usize>>,
  cancel_after: Option<(usize, Cancellation)>,
  fail_on_run: Option<usize>,
}

impl Engine for &ScriptedEngine {
  type Graph = ();
  type Error = ScriptedError;

  fn import_graph(&self, _bytes: &[u8]) -> Result<Self::Graph, Self::Error> {
    Ok(())
  }

  fn run(
    &self,
    _graph: &Self::Graph,
    _input_name: &str,
    input: InputTensor<'_>,
    _outputs: &[&str],
  ) -> Result<Vec<OutputTensor>, Self::Error> {
    let run = self.runs.get() + 1;
    self.runs.set(run);
    self.batch_sizes.borrow_mut().push(input.shape[0]);
    if let Some((after, cancellation)) = &self.cancel_after
      && run == *after
    {
      cancellation.cancel();
    }
    if self.fail_on_run == Some(run) {
      return Err(ScriptedError);
    }

    let n = input.shape[0];
    let mut boxes = Vec::new();
    let mut scores = Vec::new();
    let mut classes = Vec::new();
    for _ in 0..n {
      boxes.extend_from_slice(&[0.1, 0.1, 0.5, 0.5, 0.0, 0.0, 1.0, 1.0, 0.0, 0.0, 0.0, 0.0]);
      scores.extend_from_slice(&[0.9, 0.3, 0.05]);
      classes.extend_from_slice(&[1.0, 7.0, 1.0]);
    }
    Ok(vec![
      OutputTensor::new(vec![n, 3, 4], boxes),
      OutputTensor::new(vec![n, 3], scores),
      OutputTensor::new(vec![n, 3], classes),
      OutputTensor::new(vec![n], vec![2.0; n]),
    ])
  }
}

#[derive(Default)]
struct RecordingReporter {
  decode_failures: RefCell<Vec<PathBuf>>,
  skipped: Cell<usize>,
  failed: Cell<usize>,
  completed: Cell<usize>,
  written: Cell<usize>,
  close_failures: Cell<usize>,
  cancelled: Cell<bool>,
}

impl Reporter for RecordingReporter {
  fn decode_failed(&self, path: &Path, _err: &DecodeError) {
    self.decode_failures.borrow_mut().push(path.to_path_buf());
  }

  fn batch_skipped(&self, _paths: &[PathBuf]) {
    self.skipped.set(self.skipped.get() + 1);
  }

  fn batch_failed(&self, _paths: &[PathBuf], _err: &ModelError) {
    self.failed.set(self.failed.get() + 1);
  }

  fn batch_completed(&self, _survivors: &[PathBuf], _elapsed: Duration) {
    self.completed.set(self.completed.get() + 1);
  }

  fn result_written(&self, _result: &DetectResult) {
    self.written.set(self.written.get() + 1);
  }

  fn output_close_failed(&self, _err: &dyn std::error::Error) {
    self.close_failures.set(self.close_failures.get() + 1);
  }

  fn cancelled(&self, _batches: usize) {
    self.cancelled.set(true);
  }
}

struct Workspace {
  dir: TempDir,
}

impl Workspace {
  fn new() -> Self {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("label_map.pbtxt"), LABELS).unwrap();
    std::fs::write(dir.path().join("model.onnx"), b"graph").unwrap();
    std::fs::create_dir_all(dir.path().join("images")).unwrap();
    Self { dir }
  }

  fn image(&self, name: &str) -> PathBuf {
    let path = self.dir.path().join("images").join(name);
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent).unwrap();
    }
    RgbImage::from_pixel(32, 24, Rgb([90, 120, 150]))
      .save(&path)
      .unwrap();
    path
  }

  fn corrupt(&self, name: &str) -> PathBuf {
    let path = self.dir.path().join("images").join(name);
    std::fs::write(&path, b"this is not really a jpeg").unwrap();
    path
  }

  fn config(&self, batch_size: usize) -> PipelineConfig {
    PipelineConfig {
      model: self.dir.path().join("model.onnx"),
      labels: self.dir.path().join("label_map.pbtxt"),
      image_dirs: vec![self.dir.path().join("images")],
      image_size: IMAGE_SIZE,
      batch_size,
      output: self.dir.path().join("out/results.json"),
      extensions: vec!["jpg".to_string()],
      score_policy: ScorePolicy::ReportAll,
      threads: Some(2),
    }
  }

  fn results(&self) -> Vec<DetectResult> {
    let text = std::fs::read_to_string(self.dir.path().join("out/results.json")).unwrap();
    serde_json::from_str(&text).unwrap()
  }
}

fn run(
  config: &PipelineConfig,
  engine: &ScriptedEngine,
  cancellation: Cancellation,
) -> (RunSummary, RecordingReporter) {
  let reporter = RecordingReporter::default();
  let summary = run_pipeline(config, engine, cancellation, &reporter).unwrap();
  (summary, reporter)
}

#[test]
fn corrupt_file_is_dropped_from_its_batch() {
  let workspace = Workspace::new();
  let a = workspace.image("a.jpg");
  let bad = workspace.corrupt("b.jpg");
  let c = workspace.image("c.jpg");
  let d = workspace.image("d.jpg");

  let engine = ScriptedEngine::default();
  let (summary, reporter) = run(&workspace.config(4), &engine, Cancellation::default());

  assert_eq!(engine.runs.get(), 1);
  assert_eq!(*engine.batch_sizes.borrow(), vec![3]);
  assert_eq!(*reporter.decode_failures.borrow(), vec![bad]);
  assert_eq!(summary.batches_run, 1);
  assert_eq!(summary.files_written, 3);
  assert_eq!(summary.decode_failures, 1);

  let results = workspace.results();
  let names: Vec<&str> = results.iter().map(|r| r.file_name.as_str()).collect();
  let expected: Vec<String> = [a, c, d].iter().map(|p| p.display().to_string()).collect();
  assert_eq!(names, expected);
}

#[test]
fn every_detection_is_written_without_score_filter() {
  let workspace = Workspace::new();
  workspace.image("cat.jpg");

  let engine = ScriptedEngine::default();
  run(&workspace.config(4), &engine, Cancellation::default());

  let results = workspace.results();
  assert_eq!(results.len(), 1);
  let detections = &results[0].detections;
  assert_eq!(detections.len(), 2);
  assert_eq!(detections[0].label, "Cat");
  assert!((detections[0].score - 0.9).abs() < 1e-6);
  assert_eq!(
    (
      detections[0].top,
      detections[0].left,
      detections[0].bottom,
      detections[0].right
    ),
    (0.1, 0.1, 0.5, 0.5)
  );
  assert_eq!(detections[1].label, "unknown");
  assert_eq!(detections[1].id, 7);
  assert!((detections[1].score - 0.3).abs() < 1e-6);
}

#[test]
fn min_score_policy_is_applied_when_requested() {
  let workspace = Workspace::new();
  workspace.image("cat.jpg");

  let mut config = workspace.config(4);
  config.score_policy = ScorePolicy::MinScore(0.5);
  let engine = ScriptedEngine::default();
  run(&config, &engine, Cancellation::default());

  let results = workspace.results();
  assert_eq!(results[0].detections.len(), 1);
  assert_eq!(results[0].detections[0].label, "Cat");
}

#[test]
fn all_failed_batch_never_reaches_engine() {
  let workspace = Workspace::new();
  workspace.corrupt("a.jpg");
  workspace.corrupt("b.jpg");
  workspace.image("c.jpg");

  let engine = ScriptedEngine::default();
  let (summary, reporter) = run(&workspace.config(2), &engine, Cancellation::default());

  assert_eq!(engine.runs.get(), 1);
  assert_eq!(*engine.batch_sizes.borrow(), vec![1]);
  assert_eq!(reporter.skipped.get(), 1);
  assert_eq!(summary.batches_skipped, 1);
  assert_eq!(workspace.results().len(), 1);
}

#[test]
fn cancellation_between_batches_stops_cleanly() {
  let workspace = Workspace::new();
  for i in 0..10 {
    workspace.image(&format!("{:02}.jpg", i));
  }

  let cancellation = Cancellation::default();
  let engine = ScriptedEngine {
    cancel_after: Some((2, cancellation.clone())),
    ..Default::default()
  };
  let (summary, reporter) = run(&workspace.config(2), &engine, cancellation);

  assert_eq!(engine.runs.get(), 2);
  assert!(summary.cancelled);
  assert!(reporter.cancelled.get());
  assert_eq!(summary.batches_run, 2);
  assert_eq!(workspace.results().len(), 4);
}

#[test]
fn engine_failure_loses_only_that_batch() {
  let workspace = Workspace::new();
  for i in 0..6 {
    workspace.image(&format!("{:02}.jpg", i));
  }

  let engine = ScriptedEngine {
    fail_on_run: Some(2),
    ..Default::default()
  };
  let (summary, reporter) = run(&workspace.config(2), &engine, Cancellation::default());

  assert_eq!(engine.runs.get(), 3);
  assert_eq!(reporter.failed.get(), 1);
  assert_eq!(reporter.completed.get(), 2);
  assert_eq!(summary.batches_failed, 1);
  assert_eq!(summary.batches_run, 2);

  let names: Vec<String> = workspace
    .results()
    .into_iter()
    .map(|r| r.file_name)
    .collect();
  assert_eq!(names.len(), 4);
  assert!(names[0].ends_with("00.jpg"));
  assert!(names[1].ends_with("01.jpg"));
  assert!(names[2].ends_with("04.jpg"));
  assert!(names[3].ends_with("05.jpg"));
}

#[test]
fn batches_flush_at_directory_boundaries() {
  let workspace = Workspace::new();
  workspace.image("a.jpg");
  workspace.image("b.jpg");
  workspace.image("c.jpg");
  let second = workspace.dir.path().join("more");
  std::fs::create_dir_all(&second).unwrap();
  RgbImage::from_pixel(8, 8, Rgb([1, 2, 3]))
    .save(second.join("d.jpg"))
    .unwrap();

  let mut config = workspace.config(2);
  config.image_dirs.push(second);
  let engine = ScriptedEngine::default();
  let (summary, reporter) = run(&config, &engine, Cancellation::default());

  assert_eq!(*engine.batch_sizes.borrow(), vec![2, 1, 1]);
  assert_eq!(summary.files_written, 4);
  assert_eq!(reporter.written.get(), 4);
}

#[test]
fn empty_tree_writes_empty_array() {
  let workspace = Workspace::new();
  let engine = ScriptedEngine::default();
  let (summary, _) = run(&workspace.config(3), &engine, Cancellation::default());

  assert_eq!(engine.runs.get(), 0);
  assert_eq!(summary, RunSummary::default());
  assert!(workspace.results().is_empty());
}

#[test]
fn missing_label_file_is_fatal() {
  let workspace = Workspace::new();
  workspace.image("a.jpg");
  let mut config = workspace.config(2);
  config.labels = workspace.dir.path().join("missing.pbtxt");

  let engine = ScriptedEngine::default();
  let reporter = RecordingReporter::default();
  let result = run_pipeline(&config, &engine, Cancellation::default(), &reporter);

  assert!(result.is_err());
  assert_eq!(engine.runs.get(), 0);
}

#[derive(Error, Debug)]
#[error("disk full")]
struct DiskFull;

#[derive(Default)]
struct FullDisk {
  finish_calls: Cell<usize>,
}

impl Record for &FullDisk {
  type Error = DiskFull;

  fn record(&mut self, _result: &DetectResult) -> Result<(), Self::Error> {
    Err(DiskFull)
  }

  fn finish(self) -> Result<(), Self::Error> {
    self.finish_calls.set(self.finish_calls.get() + 1);
    Err(DiskFull)
  }
}

#[test]
fn record_failure_closes_output_through_reporter() {
  let workspace = Workspace::new();
  workspace.image("a.jpg");
  workspace.image("b.jpg");
  let config = workspace.config(2);

  let engine = ScriptedEngine::default();
  let detector = GraphLoader::new(&config.model).load(&engine).unwrap();
  let reporter = RecordingReporter::default();
  let disk = FullDisk::default();
  let writer = ResultWriter::new(&disk, Catalog::parse(LABELS).unwrap(), ScorePolicy::ReportAll);
  let batches = Batches::new(&config.image_dirs, 2, &config.extensions, &reporter);
  let task = BatchTask::new(
    BatchBuilder::new(Some(1)).unwrap(),
    IMAGE_SIZE as usize,
    2,
    Cancellation::default(),
    &reporter,
  );

  let result = task.run_task(batches, &detector, writer);

  assert!(result.is_err());
  assert_eq!(engine.runs.get(), 1);
  assert_eq!(reporter.completed.get(), 1);
  assert_eq!(reporter.written.get(), 0);
  assert_eq!(disk.finish_calls.get(), 1);
  assert_eq!(reporter.close_failures.get(), 1);
}
