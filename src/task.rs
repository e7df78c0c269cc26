// 该文件是 Senlin （森林） 项目的一部分。
// src/task.rs - 任务编排
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

use ndarray::Array3;
use thiserror::Error;
use tracing::info;

use crate::{
  args::{ArgsError, RunArgs},
  input::InputError,
  model::{DetectResult, Model, TreeLabel},
  ortho::Orthomosaic,
  output::{DetectionTable, Export, ExportError, OutputWrapper},
  predict::{PatchParams, PredictError, predict_tile},
  resample::{ResampleError, Resampler},
};

#[derive(Error, Debug)]
pub enum TaskError {
  #[error(transparent)]
  Args(#[from] ArgsError),
  #[error("读取影像失败: {0}")]
  Input(#[from] InputError),
  #[error("重采样失败: {0}")]
  Resample(#[from] ResampleError),
  #[error("推理失败: {0}")]
  Predict(#[from] PredictError),
  #[error("导出失败: {0}")]
  Export(#[from] ExportError),
}

pub trait Task<I, M, O>: Sized {
  type Output;
  type Error;
  fn run_task(self, input: I, model: M, output: O) -> Result<Self::Output, Self::Error>;
}

/// 一次运行的结果摘要
#[derive(Debug, Clone)]
pub struct TaskReport {
  /// 推理所用栅格的 (行, 列, 通道)
  pub raster_shape: (usize, usize, usize),
  pub table: DetectionTable,
}

/// 单幅正射影像：缩放、滑窗推理、导出
#[derive(Debug, Clone)]
pub struct OrthoTask {
  input_path: String,
  resize_factor: f64,
  resampler: Resampler,
  patch: PatchParams,
}

impl OrthoTask {
  pub fn new(
    input_path: impl Into<String>,
    resize_factor: f64,
    resampler: Resampler,
    patch: PatchParams,
  ) -> Self {
    Self {
      input_path: input_path.into(),
      resize_factor,
      resampler,
      patch,
    }
  }
}

impl<'a, M, O> Task<Orthomosaic, &'a M, &'a O> for OrthoTask
where
  M: Model<Input = Array3<u8>, Output = DetectResult>,
  M::Error: std::fmt::Display,
  O: Export,
  TaskError: From<O::Error>,
{
  type Output = TaskReport;
  type Error = TaskError;

  fn run_task(self, input: Orthomosaic, model: &'a M, output: &'a O) -> Result<TaskReport, TaskError> {
    info!("开始任务...");
    let now = Instant::now();

    let ortho = if self.resize_factor != 1.0 {
      let pixels = self.resampler.resample(input.pixels(), self.resize_factor)?;
      input.with_pixels(pixels)?
    } else {
      input
    };
    let raster_shape = ortho.pixels().dim();

    let result = predict_tile(model, ortho.pixels(), &self.patch)?;
    let table = DetectionTable::tagged::<TreeLabel>(&result, &self.input_path);
    output.export(&table, ortho.georef())?;

    info!("任务完成，共 {} 个目标，耗时: {:.2?}", table.len(), now.elapsed());
    Ok(TaskReport {
      raster_shape,
      table,
    })
  }
}

/// 按已校验的参数完成一次运行。
///
/// IoU 阈值优先取命令行参数，其次取模型配置中的默认值，两者都没有时报错。
/// 输出格式在读取影像之前确定，格式不支持时不会产生任何文件读写。
pub fn run<M>(
  args: &RunArgs,
  resampler: Resampler,
  default_iou: Option<f32>,
  model: &M,
) -> Result<TaskReport, TaskError>
where
  M: Model<Input = Array3<u8>, Output = DetectResult>,
  M::Error: std::fmt::Display,
{
  let iou_threshold = args
    .iou_threshold
    .or(default_iou)
    .ok_or_else(|| ArgsError::InvalidParameter {
      name: "iou_threshold",
      value: String::new(),
      reason: "命令行与模型配置均未给出 IoU 阈值".to_string(),
    })?;

  let patch = PatchParams {
    patch_size: args.patch_size,
    patch_overlap: args.patch_overlap,
    iou_threshold,
  };
  patch.validate()?;
  let output = OutputWrapper::from_path(&args.output)?;

  info!("输入影像: {}", args.input);
  info!("输出文件: {}", args.output);
  let ortho = Orthomosaic::open(&args.input)?;
  info!(
    "影像尺寸: {}x{}，缩放倍率: {}",
    ortho.width(),
    ortho.height(),
    args.resize_factor
  );

  OrthoTask::new(&args.input, args.resize_factor, resampler, patch).run_task(ortho, model, &output)
}
