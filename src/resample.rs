// 该文件是 Senlin （森林） 项目的一部分。
// src/resample.rs - 正射影像重采样
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

//! 两种重采样策略：
//!
//! - 分块：按目标尺寸切分为固定大小的块，每块独立做面积平均，
//!   峰值内存只与块大小有关；
//! - 整图：整幅图像交给 `image` 做一次平滑滤波缩放，适合内存充足的场景。
//!
//! 两种策略的输出尺寸都为 `(round(H·f), round(W·f), C)`。

use image::{
  ImageBuffer, Luma,
  imageops::{self, FilterType},
};
use ndarray::{Array2, Array3, ArrayView2, ArrayView3, ArrayViewD, Axis, Ix3, s};
use thiserror::Error;
use tracing::{debug, info};

pub const DEFAULT_TILE_SIZE: usize = 512;

#[derive(Error, Debug)]
pub enum ResampleError {
  #[error("缩放倍率必须为正数, 实际为 {0}")]
  NonPositiveFactor(f64),
  #[error("输入数组必须为三维 (行, 列, 通道), 实际为 {0} 维")]
  NotThreeDimensional(usize),
  #[error("分块尺寸必须至少为 1")]
  InvalidTileSize,
  #[error("缩放后尺寸为零: {height}x{width}")]
  EmptyOutput { height: usize, width: usize },
  #[error("{0} 个像素未被任何分块覆盖")]
  Uncovered(usize),
  #[error("图像缓冲区尺寸错误: {0}")]
  ImageBuffer(String),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ResizeStrategy {
  /// 按目标尺寸分块做面积平均
  Tiled { tile_size: usize },
  /// 整图一次缩放
  Whole { filter: FilterType },
}

impl Default for ResizeStrategy {
  fn default() -> Self {
    ResizeStrategy::Tiled {
      tile_size: DEFAULT_TILE_SIZE,
    }
  }
}

/// 目标尺寸上的一个分块，区间左闭右开
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tile {
  pub row_start: usize,
  pub row_end: usize,
  pub col_start: usize,
  pub col_end: usize,
}

/// 以 `tile_size` 为边长切分 `height x width`，末尾分块裁剪到剩余尺寸
pub fn tile_grid(height: usize, width: usize, tile_size: usize) -> impl Iterator<Item = Tile> {
  let step = tile_size.max(1);
  (0..height).step_by(step).flat_map(move |row_start| {
    (0..width).step_by(step).map(move |col_start| Tile {
      row_start,
      row_end: (row_start + step).min(height),
      col_start,
      col_end: (col_start + step).min(width),
    })
  })
}

pub fn target_shape(height: usize, width: usize, factor: f64) -> (usize, usize) {
  (
    (height as f64 * factor).round() as usize,
    (width as f64 * factor).round() as usize,
  )
}

#[derive(Debug, Clone, Default)]
pub struct Resampler {
  strategy: ResizeStrategy,
}

impl Resampler {
  pub fn new(strategy: ResizeStrategy) -> Self {
    Self { strategy }
  }

  pub fn strategy(&self) -> ResizeStrategy {
    self.strategy
  }

  pub fn resample(
    &self,
    image: ArrayView3<'_, u8>,
    factor: f64,
  ) -> Result<Array3<u8>, ResampleError> {
    if !(factor.is_finite() && factor > 0.0) {
      return Err(ResampleError::NonPositiveFactor(factor));
    }

    let (height, width, _) = image.dim();
    let (out_height, out_width) = target_shape(height, width, factor);
    if out_height == 0 || out_width == 0 {
      return Err(ResampleError::EmptyOutput {
        height: out_height,
        width: out_width,
      });
    }

    info!(
      "重采样 {}x{} -> {}x{} ({:?})",
      width, height, out_width, out_height, self.strategy
    );
    match self.strategy {
      ResizeStrategy::Tiled { tile_size } => {
        resample_tiled(image, (out_height, out_width), tile_size)
      }
      ResizeStrategy::Whole { filter } => resample_whole(image, (out_height, out_width), filter),
    }
  }

  /// 维度未知的输入，先检查是否为三维
  pub fn resample_dyn(
    &self,
    image: ArrayViewD<'_, u8>,
    factor: f64,
  ) -> Result<Array3<u8>, ResampleError> {
    let ndim = image.ndim();
    let image = image
      .into_dimensionality::<Ix3>()
      .map_err(|_| ResampleError::NotThreeDimensional(ndim))?;
    self.resample(image, factor)
  }
}

/// 单个目标轴向区间对应的源区间与面积权重
struct AxisWeights {
  src_start: usize,
  src_end: usize,
  // 每个目标像素的 (相对 src_start 的源索引, 权重)
  taps: Vec<Vec<(usize, f32)>>,
}

impl AxisWeights {
  fn new(dst_start: usize, dst_end: usize, scale: f64, src_len: usize) -> Self {
    let last = src_len - 1;
    let src_start = ((dst_start as f64 * scale).floor() as usize).min(last);
    let src_end = ((dst_end as f64 * scale).ceil() as usize).clamp(src_start + 1, src_len);

    let taps = (dst_start..dst_end)
      .map(|dst| {
        let lo = dst as f64 * scale;
        let hi = (dst + 1) as f64 * scale;
        let first = (lo.floor() as usize).max(src_start);
        let end = (hi.ceil() as usize).min(src_end);

        let mut taps: Vec<(usize, f32)> = (first..end)
          .filter_map(|src| {
            let weight = hi.min((src + 1) as f64) - lo.max(src as f64);
            (weight > 0.0).then_some((src - src_start, weight))
          })
          .map(|(idx, weight)| (idx, weight as f32))
          .collect();

        let total: f32 = taps.iter().map(|(_, w)| w).sum();
        if total > 0.0 {
          taps.iter_mut().for_each(|(_, w)| *w /= total);
        } else {
          // 浮点误差导致区间为空时退化为最近邻
          taps = vec![(first.min(src_end - 1) - src_start, 1.0)];
        }
        taps
      })
      .collect();

    Self {
      src_start,
      src_end,
      taps,
    }
  }
}

fn area_average(source: ArrayView3<'_, u8>, rows: &AxisWeights, cols: &AxisWeights) -> Array3<u8> {
  let (src_rows, _, channels) = source.dim();
  let (dst_rows, dst_cols) = (rows.taps.len(), cols.taps.len());

  let mut horizontal = Array3::<f32>::zeros((src_rows, dst_cols, channels));
  for r in 0..src_rows {
    for (c, taps) in cols.taps.iter().enumerate() {
      for ch in 0..channels {
        horizontal[[r, c, ch]] = taps
          .iter()
          .map(|&(src, w)| source[[r, src, ch]] as f32 * w)
          .sum();
      }
    }
  }

  Array3::from_shape_fn((dst_rows, dst_cols, channels), |(r, c, ch)| {
    let value: f32 = rows.taps[r]
      .iter()
      .map(|&(src, w)| horizontal[[src, c, ch]] * w)
      .sum();
    value.round().clamp(0.0, u8::MAX as f32) as u8
  })
}

fn resample_tiled(
  image: ArrayView3<'_, u8>,
  (out_height, out_width): (usize, usize),
  tile_size: usize,
) -> Result<Array3<u8>, ResampleError> {
  if tile_size == 0 {
    return Err(ResampleError::InvalidTileSize);
  }

  let (height, width, channels) = image.dim();
  let scale_y = height as f64 / out_height as f64;
  let scale_x = width as f64 / out_width as f64;

  let mut output = Array3::<u8>::zeros((out_height, out_width, channels));
  // 未写入的像素保持“未设置”状态
  let mut covered = Array2::<bool>::from_elem((out_height, out_width), false);

  let mut tiles = 0usize;
  for tile in tile_grid(out_height, out_width, tile_size) {
    let rows = AxisWeights::new(tile.row_start, tile.row_end, scale_y, height);
    let cols = AxisWeights::new(tile.col_start, tile.col_end, scale_x, width);
    let source = image.slice(s![
      rows.src_start..rows.src_end,
      cols.src_start..cols.src_end,
      ..
    ]);

    let resampled = area_average(source, &rows, &cols);
    output
      .slice_mut(s![tile.row_start..tile.row_end, tile.col_start..tile.col_end, ..])
      .assign(&resampled);
    covered
      .slice_mut(s![tile.row_start..tile.row_end, tile.col_start..tile.col_end])
      .fill(true);
    tiles += 1;
  }
  debug!("共处理 {} 个分块", tiles);

  let uncovered = covered.iter().filter(|&&c| !c).count();
  if uncovered > 0 {
    return Err(ResampleError::Uncovered(uncovered));
  }
  Ok(output)
}

fn resample_whole(
  image: ArrayView3<'_, u8>,
  (out_height, out_width): (usize, usize),
  filter: FilterType,
) -> Result<Array3<u8>, ResampleError> {
  let (height, width, channels) = image.dim();
  let mut output = Array3::<u8>::zeros((out_height, out_width, channels));

  for (ch, mut target) in output.axis_iter_mut(Axis(2)).enumerate() {
    let plane: Vec<u8> = image.index_axis(Axis(2), ch).iter().copied().collect();
    let buffer = ImageBuffer::<Luma<u8>, Vec<u8>>::from_raw(width as u32, height as u32, plane)
      .ok_or_else(|| ResampleError::ImageBuffer(format!("{}x{}", width, height)))?;

    let resized = imageops::resize(&buffer, out_width as u32, out_height as u32, filter);
    let resized = ArrayView2::from_shape((out_height, out_width), resized.as_raw())
      .map_err(|e| ResampleError::ImageBuffer(e.to_string()))?;
    target.assign(&resized);
  }

  Ok(output)
}
