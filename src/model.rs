// 该文件是 Senlin （森林） 项目的一部分。
// src/model.rs - 模型
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

/// 单个图块上的检测模型。模型对象由调用方显式构造并持有。
pub trait Model {
  type Input;
  type Output;
  type Error;

  fn infer(&self, input: &Self::Input) -> Result<Self::Output, Self::Error>;
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DetectItem {
  pub class_id: u32,
  pub score: f32,
  pub bbox: [f32; 4], // [x_min, y_min, x_max, y_max]，像素坐标
}

impl DetectItem {
  pub fn area(&self) -> f32 {
    let [x_min, y_min, x_max, y_max] = self.bbox;
    (x_max - x_min).max(0.0) * (y_max - y_min).max(0.0)
  }

  /// 两个边界框的 IoU
  pub fn iou(&self, other: &DetectItem) -> f32 {
    let x1 = self.bbox[0].max(other.bbox[0]);
    let y1 = self.bbox[1].max(other.bbox[1]);
    let x2 = self.bbox[2].min(other.bbox[2]);
    let y2 = self.bbox[3].min(other.bbox[3]);

    let intersection = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
    let union = self.area() + other.area() - intersection;

    if union > 0.0 {
      intersection / union
    } else {
      0.0
    }
  }

  pub fn translated(&self, dx: f32, dy: f32) -> Self {
    let [x_min, y_min, x_max, y_max] = self.bbox;
    Self {
      bbox: [x_min + dx, y_min + dy, x_max + dx, y_max + dy],
      ..*self
    }
  }
}

#[derive(Debug, Clone, Default)]
pub struct DetectResult {
  pub items: Box<[DetectItem]>,
}

impl DetectResult {
  pub fn len(&self) -> usize {
    self.items.len()
  }

  pub fn is_empty(&self) -> bool {
    self.items.is_empty()
  }

  pub fn iter(&self) -> impl Iterator<Item = &DetectItem> {
    self.items.iter()
  }
}

impl From<Vec<DetectItem>> for DetectResult {
  fn from(items: Vec<DetectItem>) -> Self {
    Self {
      items: items.into_boxed_slice(),
    }
  }
}

pub trait WithLabel: Sized + std::fmt::Debug {
  fn to_label_str(&self) -> String;
  fn from_label_id(id: u32) -> Self;
}

/// 树冠检测模型只有一个类别
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TreeLabel {
  Tree,
  Unknown(u32),
}

impl WithLabel for TreeLabel {
  fn to_label_str(&self) -> String {
    match self {
      TreeLabel::Tree => "Tree".to_string(),
      TreeLabel::Unknown(id) => format!("class_{}", id),
    }
  }

  fn from_label_id(id: u32) -> Self {
    match id {
      0 => TreeLabel::Tree,
      other => TreeLabel::Unknown(other),
    }
  }
}

#[cfg(feature = "model_onnx")]
mod onnx;
#[cfg(feature = "model_onnx")]
pub use self::onnx::{OnnxModel, OnnxModelBuilder, OnnxModelError};
