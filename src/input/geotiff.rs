// 该文件是 Senlin （森林） 项目的一部分。
// src/input/geotiff.rs - GeoTIFF 文件输入
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
  fs::File,
  io::BufReader,
  path::{Path, PathBuf},
};

use ndarray::Array3;
use tiff::{
  decoder::{Decoder, DecodingResult, Limits},
  tags::Tag,
};
use tracing::{debug, info, warn};

use crate::{
  georef::{GeoKeys, GeoReference, GeoTransform},
  input::InputError,
  ortho::{Orthomosaic, select_rgb_bands},
};

pub struct GeoTiffInput {
  path: PathBuf,
  decoder: Decoder<BufReader<File>>,
}

impl GeoTiffInput {
  pub fn open(path: impl AsRef<Path>) -> Result<Self, InputError> {
    let path = path.as_ref().to_path_buf();
    info!("打开栅格文件: {}", path.display());
    let file = File::open(&path).map_err(|source| InputError::Open {
      path: path.clone(),
      source,
    })?;

    // 正射影像通常远超解码器默认的内存上限
    let decoder = Decoder::new(BufReader::new(file))?.with_limits(Limits::unlimited());
    Ok(Self { path, decoder })
  }

  pub fn path(&self) -> &Path {
    &self.path
  }

  /// 读取地理参考标签。缺少标签时退化为像素坐标。
  pub fn read_georeference(&mut self) -> GeoReference {
    let scale = self.find_f64_vec(Tag::ModelPixelScaleTag);
    let tiepoint = self.find_f64_vec(Tag::ModelTiepointTag);
    let matrix = self.find_f64_vec(Tag::ModelTransformationTag);

    let transform = match (scale, tiepoint, matrix) {
      (Some(scale), Some(tiepoint), _) => GeoTransform::from_scale_tiepoint(&scale, &tiepoint),
      (_, _, Some(matrix)) => GeoTransform::from_model_transformation(&matrix),
      _ => None,
    };
    let transform = transform.unwrap_or_else(|| {
      warn!("{} 缺少地理参考标签, 输出将使用像素坐标", self.path.display());
      GeoTransform::identity()
    });

    let keys = match self.decoder.find_tag(Tag::GeoKeyDirectoryTag) {
      Ok(Some(value)) => value
        .into_u32_vec()
        .map(|directory| GeoKeys::parse(&directory))
        .unwrap_or_default(),
      _ => GeoKeys::default(),
    };
    if keys.epsg().is_none() {
      warn!("{} 未声明 EPSG 坐标系", self.path.display());
    }

    let georef = GeoReference::new(transform, &keys);
    debug!("地理参考: {:?}", georef);
    georef
  }

  /// 读取全部波段，返回 (波段, 行, 列) 数组
  pub fn read_bands(&mut self) -> Result<Array3<u8>, InputError> {
    let (width, height) = self.decoder.dimensions()?;
    let (width, height) = (width as usize, height as usize);
    let colortype = self.decoder.colortype()?;
    debug!("栅格尺寸: {}x{}, 像素格式: {:?}", width, height, colortype);

    let samples = match self.decoder.read_image()? {
      DecodingResult::U8(data) => data,
      DecodingResult::U16(data) => data.into_iter().map(|v| v.min(u8::MAX as u16) as u8).collect(),
      DecodingResult::F32(data) => data.into_iter().map(|v| v.round() as u8).collect(),
      DecodingResult::F64(data) => data.into_iter().map(|v| v.round() as u8).collect(),
      _ => {
        return Err(InputError::UnsupportedSampleFormat(format!(
          "{:?}",
          colortype
        )));
      }
    };

    let pixels = width * height;
    if pixels == 0 || samples.len() % pixels != 0 {
      return Err(InputError::ShapeMismatch {
        width,
        height,
        len: samples.len(),
      });
    }
    let bands = samples.len() / pixels;
    info!("读取 {} 个波段, 尺寸 {}x{}", bands, width, height);

    // 文件中各波段交错存放 (行, 列, 波段)
    let interleaved = Array3::from_shape_vec((height, width, bands), samples).map_err(|_| {
      InputError::ShapeMismatch {
        width,
        height,
        len: pixels * bands,
      }
    })?;
    Ok(interleaved.permuted_axes([2, 0, 1]))
  }

  pub fn into_orthomosaic(mut self) -> Result<Orthomosaic, InputError> {
    let georef = self.read_georeference();
    let bands = self.read_bands()?;
    let pixels = select_rgb_bands(bands.view())?;
    Orthomosaic::new(pixels, georef)
  }

  fn find_f64_vec(&mut self, tag: Tag) -> Option<Vec<f64>> {
    match self.decoder.find_tag(tag) {
      Ok(Some(value)) => value.into_f64_vec().ok(),
      _ => None,
    }
  }
}
