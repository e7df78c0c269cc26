// 该文件是 Senlin （森林） 项目的一部分。
// src/model/onnx.rs - ONNX Runtime 树冠检测模型
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

//! 导出为 ONNX 的 RetinaNet 类检测器。
//!
//! 输入为 `[1, 3, H, W]` 的 f32 张量（取值 0..1），输出三个张量：
//! 边界框 `[N, 4]`（像素坐标）、置信度 `[N]`、类别 `[N]`。
//!
//! 模型通过 URL 配置，例如：
//! `onnx:///models/deepforest.onnx?score=0.1&iou=0.15`

use std::{borrow::Cow, path::PathBuf, sync::Mutex};

use ndarray::{Array3, Axis};
use ort::{
  logging::LogLevel,
  session::{Session, SessionInputs},
  value::TensorRef,
};
use thiserror::Error;
use tracing::{debug, info};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  model::{DetectItem, DetectResult, Model},
};

const DEFAULT_INPUT_NAME: &str = "images";
const DEFAULT_BOXES_NAME: &str = "boxes";
const DEFAULT_SCORES_NAME: &str = "scores";
const DEFAULT_LABELS_NAME: &str = "labels";
const DEFAULT_SCORE_THRESHOLD: f32 = 0.1;

#[derive(Error, Debug)]
pub enum OnnxModelError {
  #[error("模型路径错误: {0}")]
  ModelPathError(String),
  #[error("模型参数无效: {key}={value}")]
  InvalidQuery { key: String, value: String },
  #[error("模型文件不存在: {0}")]
  ModelNotFound(PathBuf),
  #[error("ONNX Runtime 错误: {0}")]
  OrtError(String),
  #[error("模型缺少张量: {0}")]
  MissingTensor(String),
  #[error("模型输出形状错误: {0}")]
  OutputShape(String),
  #[error("推理会话锁获取失败")]
  SessionPoisoned,
}

fn ort_error(e: impl std::fmt::Display) -> OnnxModelError {
  OnnxModelError::OrtError(e.to_string())
}

#[derive(Debug, Clone)]
pub struct OnnxModelBuilder {
  model_path: PathBuf,
  input_name: String,
  boxes_name: String,
  scores_name: String,
  labels_name: String,
  score_threshold: f32,
  iou_threshold: Option<f32>,
}

impl FromUrlWithScheme for OnnxModelBuilder {
  const SCHEME: &'static str = "onnx";
}

impl FromUrl for OnnxModelBuilder {
  type Error = OnnxModelError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(OnnxModelError::ModelPathError(format!(
        "模型路径必须使用 {} 方案, 实际为 {}",
        Self::SCHEME,
        url.scheme()
      )));
    }
    if url.path().is_empty() {
      return Err(OnnxModelError::ModelPathError(url.to_string()));
    }

    let mut builder = OnnxModelBuilder {
      model_path: PathBuf::from(url.path()),
      input_name: DEFAULT_INPUT_NAME.to_string(),
      boxes_name: DEFAULT_BOXES_NAME.to_string(),
      scores_name: DEFAULT_SCORES_NAME.to_string(),
      labels_name: DEFAULT_LABELS_NAME.to_string(),
      score_threshold: DEFAULT_SCORE_THRESHOLD,
      iou_threshold: None,
    };

    for (key, value) in url.query_pairs() {
      let invalid = || OnnxModelError::InvalidQuery {
        key: key.to_string(),
        value: value.to_string(),
      };
      match &*key {
        "input" => builder.input_name = value.to_string(),
        "boxes" => builder.boxes_name = value.to_string(),
        "scores" => builder.scores_name = value.to_string(),
        "labels" => builder.labels_name = value.to_string(),
        "score" => builder.score_threshold = value.parse().map_err(|_| invalid())?,
        "iou" => {
          let iou: f32 = value.parse().map_err(|_| invalid())?;
          if !(0.0..=1.0).contains(&iou) {
            return Err(invalid());
          }
          builder.iou_threshold = Some(iou);
        }
        _ => return Err(invalid()),
      }
    }

    Ok(builder)
  }
}

impl OnnxModelBuilder {
  pub fn score_threshold(mut self, threshold: f32) -> Self {
    self.score_threshold = threshold;
    self
  }

  /// URL 中配置的抑制阈值（`iou` 参数）
  pub fn iou_threshold(&self) -> Option<f32> {
    self.iou_threshold
  }

  pub fn model_path(&self) -> &PathBuf {
    &self.model_path
  }

  pub fn build(self) -> Result<OnnxModel, OnnxModelError> {
    if !self.model_path.is_file() {
      return Err(OnnxModelError::ModelNotFound(self.model_path));
    }

    info!("加载模型文件: {}", self.model_path.display());
    let session = Session::builder()
      .map_err(ort_error)?
      .with_log_level(LogLevel::Error)
      .map_err(ort_error)?
      .commit_from_file(&self.model_path)
      .map_err(ort_error)?;

    let inputs: Vec<String> = session.inputs().iter().map(|i| i.name().to_string()).collect();
    let outputs: Vec<String> = session.outputs().iter().map(|o| o.name().to_string()).collect();
    debug!("模型输入: {:?}, 模型输出: {:?}", inputs, outputs);

    if !inputs.contains(&self.input_name) {
      return Err(OnnxModelError::MissingTensor(self.input_name));
    }
    for name in [&self.boxes_name, &self.scores_name] {
      if !outputs.contains(name) {
        return Err(OnnxModelError::MissingTensor(name.clone()));
      }
    }
    let has_labels = outputs.contains(&self.labels_name);
    info!("模型加载完成");

    Ok(OnnxModel {
      session: Mutex::new(session),
      input_name: self.input_name,
      boxes_name: self.boxes_name,
      scores_name: self.scores_name,
      labels_name: has_labels.then_some(self.labels_name),
      score_threshold: self.score_threshold,
    })
  }
}

pub struct OnnxModel {
  session: Mutex<Session>,
  input_name: String,
  boxes_name: String,
  scores_name: String,
  labels_name: Option<String>,
  score_threshold: f32,
}

impl OnnxModel {
  /// (行, 列, 通道) u8 图块转为 [1, 通道, 行, 列] f32 张量
  fn preprocess(input: &Array3<u8>) -> (Vec<i64>, Vec<f32>) {
    let (height, width, channels) = input.dim();
    let mut data = Vec::with_capacity(channels * height * width);
    for plane in input.axis_iter(Axis(2)) {
      data.extend(plane.iter().map(|&v| v as f32 / 255.0));
    }
    (
      vec![1, channels as i64, height as i64, width as i64],
      data,
    )
  }
}

/// 模型声明了类别输出时，读取失败直接报错，不退化为单一类别
fn decode_labels<E: std::fmt::Display>(
  name: &str,
  extracted: Result<&[i64], E>,
) -> Result<Vec<u32>, OnnxModelError> {
  let labels = extracted.map_err(|e| {
    OnnxModelError::OutputShape(format!("类别输出 {} 无法按 i64 读取: {}", name, e))
  })?;
  Ok(labels.iter().map(|&l| l.max(0) as u32).collect())
}

impl Model for OnnxModel {
  type Input = Array3<u8>;
  type Output = DetectResult;
  type Error = OnnxModelError;

  fn infer(&self, input: &Self::Input) -> Result<Self::Output, Self::Error> {
    let (dims, data) = Self::preprocess(input);
    let tensor = TensorRef::from_array_view((dims, data.as_slice())).map_err(ort_error)?;

    let mut session = self
      .session
      .lock()
      .map_err(|_| OnnxModelError::SessionPoisoned)?;
    let inputs: SessionInputs<'_, '_, 0> =
      SessionInputs::ValueMap(vec![(Cow::Borrowed(self.input_name.as_str()), tensor.into())]);
    let outputs = session.run(inputs).map_err(ort_error)?;

    let (_, boxes) = outputs[self.boxes_name.as_str()]
      .try_extract_tensor::<f32>()
      .map_err(ort_error)?;
    let (_, scores) = outputs[self.scores_name.as_str()]
      .try_extract_tensor::<f32>()
      .map_err(ort_error)?;
    let labels: Vec<u32> = match &self.labels_name {
      Some(name) => decode_labels(
        name,
        outputs[name.as_str()]
          .try_extract_tensor::<i64>()
          .map(|(_, labels)| labels),
      )?,
      None => vec![0; scores.len()],
    };

    if boxes.len() != scores.len() * 4 || labels.len() != scores.len() {
      return Err(OnnxModelError::OutputShape(format!(
        "边界框 {} 个值, 置信度 {} 个值, 类别 {} 个值",
        boxes.len(),
        scores.len(),
        labels.len()
      )));
    }

    let items: Vec<DetectItem> = boxes
      .chunks_exact(4)
      .zip(scores.iter().zip(labels))
      .filter(|(_, (score, _))| **score >= self.score_threshold)
      .map(|(bbox, (&score, class_id))| DetectItem {
        class_id,
        score,
        bbox: [bbox[0], bbox[1], bbox[2], bbox[3]],
      })
      .collect();

    debug!("图块检测到 {} 个目标", items.len());
    Ok(DetectResult::from(items))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn parses_relative_model_url() {
    let url = Url::parse("onnx:models/deepforest.onnx?iou=0.15&score=0.3").unwrap();
    let builder = OnnxModelBuilder::from_url(&url).unwrap();
    assert_eq!(builder.model_path(), &PathBuf::from("models/deepforest.onnx"));
    assert_eq!(builder.iou_threshold(), Some(0.15));
    assert_eq!(builder.score_threshold, 0.3);
    assert_eq!(builder.input_name, DEFAULT_INPUT_NAME);
  }

  #[test]
  fn parses_absolute_model_url_with_tensor_names() {
    let url = Url::parse("onnx:///opt/models/tree.onnx?input=x&boxes=b&scores=s&labels=l").unwrap();
    let builder = OnnxModelBuilder::from_url(&url).unwrap();
    assert_eq!(builder.model_path(), &PathBuf::from("/opt/models/tree.onnx"));
    assert_eq!(builder.iou_threshold(), None);
    assert_eq!(
      (
        builder.input_name.as_str(),
        builder.boxes_name.as_str(),
        builder.scores_name.as_str(),
        builder.labels_name.as_str()
      ),
      ("x", "b", "s", "l")
    );
  }

  #[test]
  fn rejects_wrong_scheme_and_bad_query() {
    let url = Url::parse("rknn:///model.rknn").unwrap();
    assert!(matches!(
      OnnxModelBuilder::from_url(&url),
      Err(OnnxModelError::ModelPathError(_))
    ));

    let url = Url::parse("onnx:model.onnx?iou=1.5").unwrap();
    assert!(matches!(
      OnnxModelBuilder::from_url(&url),
      Err(OnnxModelError::InvalidQuery { .. })
    ));

    let url = Url::parse("onnx:model.onnx?unknown=1").unwrap();
    assert!(matches!(
      OnnxModelBuilder::from_url(&url),
      Err(OnnxModelError::InvalidQuery { .. })
    ));
  }

  #[test]
  fn missing_model_file_fails_before_runtime() {
    let url = Url::parse("onnx:///nonexistent/deepforest.onnx").unwrap();
    let result = OnnxModelBuilder::from_url(&url).unwrap().build();
    assert!(matches!(result, Err(OnnxModelError::ModelNotFound(_))));
  }

  #[test]
  fn unreadable_labels_are_an_error() {
    let labels = decode_labels::<String>("labels", Ok(&[0, 2, -1][..])).unwrap();
    assert_eq!(labels, vec![0, 2, 0]);

    let err = decode_labels("labels", Err("dtype mismatch: int32")).unwrap_err();
    assert!(matches!(err, OnnxModelError::OutputShape(msg) if msg.contains("int32")));
  }

  #[test]
  fn preprocess_is_planar_and_normalized() {
    let patch = Array3::from_shape_fn((2, 2, 3), |(r, c, ch)| (ch * 100 + r * 2 + c) as u8);
    let (dims, data) = OnnxModel::preprocess(&patch);
    assert_eq!(dims, vec![1, 3, 2, 2]);
    assert_eq!(data.len(), 12);
    assert_eq!(data[0], 0.0);
    assert_eq!(data[4], 100.0 / 255.0);
    assert_eq!(data[11], 203.0 / 255.0);
  }
}
