// 该文件是 Senlin （森林） 项目的一部分。
// src/main.rs - 项目主程序
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use anyhow::Result;
use clap::Parser;
use tracing::info;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use senlin::args::Args;

fn init_tracing() {
  let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
  tracing_subscriber::registry()
    .with(filter)
    .with(tracing_subscriber::fmt::layer())
    .init();
}

#[cfg(feature = "model_onnx")]
fn main() -> Result<()> {
  use senlin::{FromUrl, model::OnnxModelBuilder, task};

  init_tracing();

  let args = Args::parse();
  // 参数先于任何文件读写完成校验
  let run_args = args.run_args()?;
  let resampler = args.resampler()?;

  info!("模型地址: {}", args.model);
  info!("窗口尺寸: {}，重叠比例: {}", run_args.patch_size, run_args.patch_overlap);
  info!("缩放方式: {:?}", resampler.strategy());

  let builder = OnnxModelBuilder::from_url(&args.model)?;
  let default_iou = builder.iou_threshold();
  let model = builder.build()?;

  let report = task::run(&run_args, resampler, default_iou, &model)?;
  let (height, width, channels) = report.raster_shape;
  info!(
    "推理栅格 {}x{}x{}，共写出 {} 个树冠到 {}",
    width,
    height,
    channels,
    report.table.len(),
    run_args.output
  );

  Ok(())
}

#[cfg(not(feature = "model_onnx"))]
fn main() -> Result<()> {
  init_tracing();

  let args = Args::parse();
  args.run_args()?;
  args.resampler()?;
  info!("模型地址: {}", args.model);
  anyhow::bail!("未启用任何模型后端，请使用 model_onnx 特性重新编译")
}
