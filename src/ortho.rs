// 该文件是 Senlin （森林） 项目的一部分。
// src/ortho.rs - 正射影像定义（HWC 排布）
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

use std::path::Path;

use ndarray::{Array3, ArrayView3, s};

use crate::{georef::GeoReference, input::GeoTiffInput, input::InputError};

pub const RGB_CHANNELS: usize = 3;

/// 三通道正射影像，数据按 (行, 列, 通道) 排布
#[derive(Debug, Clone)]
pub struct Orthomosaic {
  pixels: Array3<u8>,
  georef: GeoReference,
}

impl Orthomosaic {
  pub fn new(pixels: Array3<u8>, georef: GeoReference) -> Result<Self, InputError> {
    let channels = pixels.shape()[2];
    if channels != RGB_CHANNELS {
      return Err(InputError::ChannelMismatch(channels));
    }
    Ok(Self { pixels, georef })
  }

  /// 打开 GeoTIFF 并保留前三个波段
  pub fn open(path: impl AsRef<Path>) -> Result<Self, InputError> {
    GeoTiffInput::open(path)?.into_orthomosaic()
  }

  pub fn height(&self) -> usize {
    self.pixels.shape()[0]
  }

  pub fn width(&self) -> usize {
    self.pixels.shape()[1]
  }

  pub fn channels(&self) -> usize {
    RGB_CHANNELS
  }

  pub fn pixels(&self) -> ArrayView3<'_, u8> {
    self.pixels.view()
  }

  pub fn georef(&self) -> &GeoReference {
    &self.georef
  }

  /// 替换像素数据（例如重采样之后），地理参考随尺寸同步缩放
  pub fn with_pixels(self, pixels: Array3<u8>) -> Result<Self, InputError> {
    let src = (self.height(), self.width());
    let dst = (pixels.shape()[0], pixels.shape()[1]);
    let georef = self.georef.resampled(src, dst);
    Self::new(pixels, georef)
  }

  pub fn into_parts(self) -> (Array3<u8>, GeoReference) {
    (self.pixels, self.georef)
  }
}

/// 从 (波段, 行, 列) 数组中按原顺序取前三个波段，并转为 (行, 列, 通道)
pub fn select_rgb_bands(bands: ArrayView3<'_, u8>) -> Result<Array3<u8>, InputError> {
  let band_count = bands.shape()[0];
  if band_count < RGB_CHANNELS {
    return Err(InputError::TooFewBands(band_count));
  }

  Ok(
    bands
      .slice(s![..RGB_CHANNELS, .., ..])
      .permuted_axes([1, 2, 0])
      .as_standard_layout()
      .into_owned(),
  )
}
