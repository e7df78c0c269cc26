// 该文件是 Senlin （森林） 项目的一部分。
// src/input.rs - 栅格输入
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

use std::path::PathBuf;

use thiserror::Error;

mod geotiff;
pub use self::geotiff::GeoTiffInput;

#[derive(Error, Debug)]
pub enum InputError {
  #[error("无法打开栅格文件 {path}: {source}")]
  Open {
    path: PathBuf,
    source: std::io::Error,
  },
  #[error("TIFF 解码错误: {0}")]
  TiffError(#[from] tiff::TiffError),
  #[error("波段数不足: 至少需要 3 个波段, 实际只有 {0} 个")]
  TooFewBands(usize),
  #[error("正射影像必须为 3 通道, 实际为 {0} 通道")]
  ChannelMismatch(usize),
  #[error("不支持的像素格式: {0}")]
  UnsupportedSampleFormat(String),
  #[error("数据长度不匹配: 期望 {width}x{height} 的整数倍, 实际长度 {len}")]
  ShapeMismatch {
    width: usize,
    height: usize,
    len: usize,
  },
}
