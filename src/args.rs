// 该文件是 Senlin （森林） 项目的一部分。
// src/args.rs - 项目参数配置
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

use std::str::FromStr;

use clap::{Parser, ValueEnum};
use image::imageops::FilterType;
use thiserror::Error;
use url::Url;

use crate::resample::{DEFAULT_TILE_SIZE, Resampler, ResizeStrategy};

/// 只给出输入、窗口尺寸和输出时使用的重叠比例
pub const LEGACY_PATCH_OVERLAP: f32 = 0.3;

pub const DEFAULT_MODEL_URL: &str = "onnx:deepforest.onnx?iou=0.15&score=0.1";

pub const USAGE: &str = "senlin <输入影像> <窗口尺寸> <重叠比例> <缩放倍率> [<IoU 阈值>] <输出文件>\n\
                         senlin <输入影像> <窗口尺寸> <输出文件>";

#[derive(Error, Debug)]
pub enum ArgsError {
  #[error("缺少参数: {0}\n用法: {usage}", usage = USAGE)]
  MissingArgument(String),
  #[error("参数 {name} 无效: {value:?}, {reason}")]
  InvalidParameter {
    name: &'static str,
    value: String,
    reason: String,
  },
}

impl ArgsError {
  fn invalid(name: &'static str, value: &str, reason: impl Into<String>) -> Self {
    ArgsError::InvalidParameter {
      name,
      value: value.to_string(),
      reason: reason.into(),
    }
  }
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResizeMode {
  /// 分块面积平均，内存占用受分块尺寸限制
  #[default]
  Tiled,
  /// 整图 Lanczos 缩放
  Whole,
}

/// Senlin 项目参数配置
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None, override_usage = USAGE)]
pub struct Args {
  /// 位置参数，按顺序解析
  #[arg(value_name = "ARGS")]
  pub positional: Vec<String>,

  /// 模型地址，例如 onnx:///models/deepforest.onnx?iou=0.15
  #[arg(long, value_name = "MODEL", env = "SENLIN_MODEL", default_value = DEFAULT_MODEL_URL)]
  pub model: Url,

  /// 缩放方式
  #[arg(long, value_enum, default_value_t = ResizeMode::Tiled)]
  pub resize_strategy: ResizeMode,

  /// 分块缩放的分块边长（目标像素）
  #[arg(long, default_value_t = DEFAULT_TILE_SIZE, value_name = "PIXELS")]
  pub resize_tile_size: usize,
}

impl Args {
  pub fn run_args(&self) -> Result<RunArgs, ArgsError> {
    RunArgs::from_positional(self.positional.as_slice())
  }

  pub fn resampler(&self) -> Result<Resampler, ArgsError> {
    let strategy = match self.resize_strategy {
      ResizeMode::Tiled => {
        if self.resize_tile_size == 0 {
          return Err(ArgsError::invalid(
            "resize_tile_size",
            "0",
            "分块尺寸必须至少为 1",
          ));
        }
        ResizeStrategy::Tiled {
          tile_size: self.resize_tile_size,
        }
      }
      ResizeMode::Whole => ResizeStrategy::Whole {
        filter: FilterType::Lanczos3,
      },
    };
    Ok(Resampler::new(strategy))
  }
}

/// 一次运行所需的全部位置参数，已完成校验
#[derive(Debug, Clone, PartialEq)]
pub struct RunArgs {
  pub input: String,
  pub patch_size: usize,
  pub patch_overlap: f32,
  pub resize_factor: f64,
  pub iou_threshold: Option<f32>,
  pub output: String,
}

fn parse_number<T: FromStr>(name: &'static str, value: &str) -> Result<T, ArgsError> {
  value
    .trim()
    .parse()
    .map_err(|_| ArgsError::invalid(name, value, "不是合法的数字"))
}

fn parse_patch_size(value: &str) -> Result<usize, ArgsError> {
  let size: usize = parse_number("patch_size", value)?;
  if size == 0 {
    return Err(ArgsError::invalid("patch_size", value, "必须至少为 1"));
  }
  Ok(size)
}

fn parse_overlap(value: &str) -> Result<f32, ArgsError> {
  let overlap: f32 = parse_number("patch_overlap", value)?;
  if !(0.0..1.0).contains(&overlap) {
    return Err(ArgsError::invalid("patch_overlap", value, "必须在 [0, 1) 之间"));
  }
  Ok(overlap)
}

fn parse_resize_factor(value: &str) -> Result<f64, ArgsError> {
  let factor: f64 = parse_number("resize_factor", value)?;
  if !(factor.is_finite() && factor > 0.0) {
    return Err(ArgsError::invalid("resize_factor", value, "必须为正的有限数"));
  }
  Ok(factor)
}

fn parse_iou(value: &str) -> Result<f32, ArgsError> {
  let iou: f32 = parse_number("iou_threshold", value)?;
  if !(0.0..=1.0).contains(&iou) {
    return Err(ArgsError::invalid("iou_threshold", value, "必须在 [0, 1] 之间"));
  }
  Ok(iou)
}

impl RunArgs {
  /// 按参数个数区分调用形式，不做任何文件读写
  pub fn from_positional<S: AsRef<str>>(args: &[S]) -> Result<Self, ArgsError> {
    let args: Vec<&str> = args.iter().map(AsRef::as_ref).collect();
    match args.as_slice() {
      [input, patch_size, output] => Ok(RunArgs {
        input: input.to_string(),
        patch_size: parse_patch_size(patch_size)?,
        patch_overlap: LEGACY_PATCH_OVERLAP,
        resize_factor: 1.0,
        iou_threshold: None,
        output: output.to_string(),
      }),
      [input, patch_size, overlap, factor, output] => Ok(RunArgs {
        input: input.to_string(),
        patch_size: parse_patch_size(patch_size)?,
        patch_overlap: parse_overlap(overlap)?,
        resize_factor: parse_resize_factor(factor)?,
        iou_threshold: None,
        output: output.to_string(),
      }),
      [input, patch_size, overlap, factor, iou, output] => Ok(RunArgs {
        input: input.to_string(),
        patch_size: parse_patch_size(patch_size)?,
        patch_overlap: parse_overlap(overlap)?,
        resize_factor: parse_resize_factor(factor)?,
        iou_threshold: Some(parse_iou(iou)?),
        output: output.to_string(),
      }),
      [] => Err(ArgsError::MissingArgument("输入影像".to_string())),
      [_] => Err(ArgsError::MissingArgument("窗口尺寸".to_string())),
      [_, _] => Err(ArgsError::MissingArgument("输出文件".to_string())),
      [_, _, _, _] => Err(ArgsError::MissingArgument("输出文件".to_string())),
      [.., extra] => Err(ArgsError::invalid("args", extra, "多余的参数")),
    }
  }
}
