// 该文件是 Senlin （森林） 项目的一部分。
// src/predict.rs - 分块滑窗推理
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

use std::time::Instant;

use ndarray::{Array3, ArrayView3, s};
use thiserror::Error;
use tracing::{debug, info};

use crate::model::{DetectItem, DetectResult, Model};

#[derive(Error, Debug)]
pub enum PredictError {
  #[error("窗口 {window:?} 推理失败: {message}")]
  Inference { window: Window, message: String },
  #[error("推理参数无效: {0}")]
  InvalidParams(String),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PatchParams {
  /// 窗口边长（像素）
  pub patch_size: usize,
  /// 相邻窗口重叠比例，取值 [0, 1)
  pub patch_overlap: f32,
  /// 跨窗口合并时的 IoU 抑制阈值
  pub iou_threshold: f32,
}

impl PatchParams {
  pub fn validate(&self) -> Result<(), PredictError> {
    if self.patch_size == 0 {
      return Err(PredictError::InvalidParams("窗口尺寸必须至少为 1".to_string()));
    }
    if !(0.0..1.0).contains(&self.patch_overlap) {
      return Err(PredictError::InvalidParams(format!(
        "重叠比例必须在 [0, 1) 之间, 实际为 {}",
        self.patch_overlap
      )));
    }
    if !(0.0..=1.0).contains(&self.iou_threshold) {
      return Err(PredictError::InvalidParams(format!(
        "IoU 阈值必须在 [0, 1] 之间, 实际为 {}",
        self.iou_threshold
      )));
    }
    Ok(())
  }

  /// 相邻窗口起点间距
  pub fn stride(&self) -> usize {
    let overlap = (self.patch_size as f32 * self.patch_overlap) as usize;
    (self.patch_size - overlap).max(1)
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window {
  pub row: usize,
  pub col: usize,
  pub height: usize,
  pub width: usize,
}

/// 单个轴向上的窗口起点。最后一个窗口贴齐边缘，保证完整覆盖。
fn window_starts(length: usize, size: usize, stride: usize) -> Vec<usize> {
  if length <= size {
    return vec![0];
  }
  let mut starts: Vec<usize> = (0..)
    .map(|i| i * stride)
    .take_while(|&start| start + size < length)
    .collect();
  starts.push(length - size);
  starts.dedup();
  starts
}

pub fn compute_windows(height: usize, width: usize, params: &PatchParams) -> Vec<Window> {
  let stride = params.stride();
  let rows = window_starts(height, params.patch_size, stride);
  let cols = window_starts(width, params.patch_size, stride);

  rows
    .iter()
    .flat_map(|&row| {
      cols.iter().map(move |&col| Window {
        row,
        col,
        height: params.patch_size.min(height),
        width: params.patch_size.min(width),
      })
    })
    .collect()
}

/// 非极大值抑制，与类别无关
pub fn nms(mut items: Vec<DetectItem>, iou_threshold: f32) -> Vec<DetectItem> {
  // 按置信度降序排序
  items.sort_by(|a, b| b.score.total_cmp(&a.score));

  let mut kept: Vec<DetectItem> = Vec::with_capacity(items.len());
  for item in items {
    if kept.iter().all(|best| best.iou(&item) <= iou_threshold) {
      kept.push(item);
    }
  }
  kept
}

/// 对整幅影像滑窗推理，窗口内结果平移回整图坐标后统一做抑制
pub fn predict_tile<M>(
  model: &M,
  image: ArrayView3<'_, u8>,
  params: &PatchParams,
) -> Result<DetectResult, PredictError>
where
  M: Model<Input = Array3<u8>, Output = DetectResult>,
  M::Error: std::fmt::Display,
{
  params.validate()?;

  let (height, width, _) = image.dim();
  let windows = compute_windows(height, width, params);
  info!(
    "开始推理: 影像 {}x{}, 窗口 {} 像素, 重叠 {}, 共 {} 个窗口",
    width,
    height,
    params.patch_size,
    params.patch_overlap,
    windows.len()
  );

  let now = Instant::now();
  let mut items = Vec::new();
  for (index, window) in windows.iter().enumerate() {
    let patch = image
      .slice(s![
        window.row..window.row + window.height,
        window.col..window.col + window.width,
        ..
      ])
      .to_owned();

    let result = model
      .infer(&patch)
      .map_err(|e| PredictError::Inference {
        window: *window,
        message: e.to_string(),
      })?;
    debug!("({}) 窗口 {:?} 检测到 {} 个目标", index, window, result.len());

    items.extend(
      result
        .iter()
        .map(|item| item.translated(window.col as f32, window.row as f32)),
    );
  }

  let before = items.len();
  let kept = nms(items, params.iou_threshold);
  info!(
    "推理完成，耗时: {:.2?}，抑制前 {} 个目标，保留 {} 个",
    now.elapsed(),
    before,
    kept.len()
  );

  Ok(DetectResult::from(kept))
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::cell::Cell;

  /// 把值为 255 的像素框成一个目标
  struct BrightSpotModel {
    calls: Cell<usize>,
  }

  impl Model for BrightSpotModel {
    type Input = Array3<u8>;
    type Output = DetectResult;
    type Error = String;

    fn infer(&self, input: &Self::Input) -> Result<Self::Output, Self::Error> {
      self.calls.set(self.calls.get() + 1);
      let mut bbox = [f32::MAX, f32::MAX, f32::MIN, f32::MIN];
      let mut found = false;
      for ((r, c, _), &v) in input.indexed_iter() {
        if v == 255 {
          found = true;
          bbox[0] = bbox[0].min(c as f32);
          bbox[1] = bbox[1].min(r as f32);
          bbox[2] = bbox[2].max(c as f32 + 1.0);
          bbox[3] = bbox[3].max(r as f32 + 1.0);
        }
      }
      let items = if found {
        vec![DetectItem {
          class_id: 0,
          score: 0.9,
          bbox,
        }]
      } else {
        vec![]
      };
      Ok(DetectResult::from(items))
    }
  }

  struct FailingModel;

  impl Model for FailingModel {
    type Input = Array3<u8>;
    type Output = DetectResult;
    type Error = String;

    fn infer(&self, _input: &Self::Input) -> Result<Self::Output, Self::Error> {
      Err("runtime unavailable".to_string())
    }
  }

  fn params(patch_size: usize, patch_overlap: f32) -> PatchParams {
    PatchParams {
      patch_size,
      patch_overlap,
      iou_threshold: 0.15,
    }
  }

  #[test]
  fn window_starts_reach_the_edge() {
    assert_eq!(window_starts(10, 4, 4), vec![0, 4, 6]);
    assert_eq!(window_starts(8, 4, 4), vec![0, 4]);
    assert_eq!(window_starts(3, 4, 4), vec![0]);
    assert_eq!(window_starts(128, 64, 32), vec![0, 32, 64]);
  }

  #[test]
  fn windows_cover_image() {
    let (height, width) = (100, 37);
    let p = params(16, 0.3);
    let mut covered = ndarray::Array2::<bool>::from_elem((height, width), false);
    for w in compute_windows(height, width, &p) {
      assert!(w.row + w.height <= height && w.col + w.width <= width);
      covered
        .slice_mut(s![w.row..w.row + w.height, w.col..w.col + w.width])
        .fill(true);
    }
    assert!(covered.iter().all(|&c| c));
  }

  #[test]
  fn stride_follows_overlap() {
    assert_eq!(params(400, 0.25).stride(), 300);
    assert_eq!(params(10, 0.0).stride(), 10);
    assert_eq!(params(1, 0.9).stride(), 1);
  }

  #[test]
  fn nms_drops_overlapping_duplicates() {
    let boxes = vec![
      DetectItem {
        class_id: 0,
        score: 0.5,
        bbox: [1.0, 0.0, 11.0, 10.0],
      },
      DetectItem {
        class_id: 0,
        score: 0.9,
        bbox: [0.0, 0.0, 10.0, 10.0],
      },
      DetectItem {
        class_id: 0,
        score: 0.7,
        bbox: [50.0, 50.0, 60.0, 60.0],
      },
    ];
    let kept = nms(boxes, 0.15);
    assert_eq!(kept.len(), 2);
    assert_eq!(kept[0].score, 0.9);
    assert_eq!(kept[1].score, 0.7);
  }

  #[test]
  fn overlapping_windows_yield_one_detection() {
    let mut image = Array3::<u8>::zeros((128, 128, 3));
    image.slice_mut(s![40..50, 40..50, ..]).fill(255);

    let model = BrightSpotModel {
      calls: Cell::new(0),
    };
    let result = predict_tile(&model, image.view(), &params(64, 0.5)).unwrap();

    assert_eq!(model.calls.get(), 9);
    assert_eq!(result.len(), 1);
    assert_eq!(result.items[0].bbox, [40.0, 40.0, 50.0, 50.0]);
  }

  #[test]
  fn model_failure_is_inference_error() {
    let image = Array3::<u8>::zeros((32, 32, 3));
    let err = predict_tile(&FailingModel, image.view(), &params(16, 0.0)).unwrap_err();
    match err {
      PredictError::Inference { window, message } => {
        assert_eq!((window.row, window.col), (0, 0));
        assert_eq!(message, "runtime unavailable");
      }
      other => panic!("unexpected error: {other}"),
    }
  }

  #[test]
  fn invalid_params_are_rejected() {
    let image = Array3::<u8>::zeros((8, 8, 3));
    for p in [params(0, 0.1), params(8, 1.0), params(8, -0.1)] {
      assert!(matches!(
        predict_tile(&FailingModel, image.view(), &p),
        Err(PredictError::InvalidParams(_))
      ));
    }
  }
}
