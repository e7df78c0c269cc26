// 该文件是 Senlin （森林） 项目的一部分。
// src/georef.rs - 地理参考（像素坐标到地图坐标）
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

const GT_RASTER_TYPE_GEO_KEY: u32 = 1025;
const GEOGRAPHIC_TYPE_GEO_KEY: u32 = 2048;
const PROJECTED_CS_TYPE_GEO_KEY: u32 = 3072;
const RASTER_PIXEL_IS_POINT: u32 = 2;
const USER_DEFINED: u32 = 32767;

/// 仿射变换，系数顺序与 GDAL 一致：
///   x = c[0] + col * c[1] + row * c[2]
///   y = c[3] + col * c[4] + row * c[5]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeoTransform {
  coeffs: [f64; 6],
}

impl Default for GeoTransform {
  fn default() -> Self {
    Self::identity()
  }
}

impl GeoTransform {
  pub fn new(coeffs: [f64; 6]) -> Self {
    Self { coeffs }
  }

  /// 像素坐标即地图坐标
  pub fn identity() -> Self {
    Self {
      coeffs: [0.0, 1.0, 0.0, 0.0, 0.0, 1.0],
    }
  }

  /// 由 ModelPixelScale 与 ModelTiepoint 标签构造（北向朝上，无旋转）
  pub fn from_scale_tiepoint(scale: &[f64], tiepoint: &[f64]) -> Option<Self> {
    if scale.len() < 2 || tiepoint.len() < 6 {
      return None;
    }
    let (sx, sy) = (scale[0], scale[1]);
    let (i, j) = (tiepoint[0], tiepoint[1]);
    let (x, y) = (tiepoint[3], tiepoint[4]);
    Some(Self {
      coeffs: [x - i * sx, sx, 0.0, y + j * sy, 0.0, -sy],
    })
  }

  /// 由 ModelTransformation 标签（4x4 行优先矩阵）构造
  pub fn from_model_transformation(matrix: &[f64]) -> Option<Self> {
    if matrix.len() < 16 {
      return None;
    }
    Some(Self {
      coeffs: [
        matrix[3], matrix[0], matrix[1], matrix[7], matrix[4], matrix[5],
      ],
    })
  }

  pub fn coeffs(&self) -> [f64; 6] {
    self.coeffs
  }

  pub fn apply(&self, col: f64, row: f64) -> (f64, f64) {
    let c = &self.coeffs;
    (
      c[0] + col * c[1] + row * c[2],
      c[3] + col * c[4] + row * c[5],
    )
  }

  /// 像素尺寸按比例放大，用于重采样后的栅格。
  /// `sx`、`sy` 为原像素数与新像素数之比。
  pub fn scaled(&self, sx: f64, sy: f64) -> Self {
    let c = &self.coeffs;
    Self {
      coeffs: [c[0], c[1] * sx, c[2] * sy, c[3], c[4] * sx, c[5] * sy],
    }
  }

  /// 将左上角平移半个像素（PixelIsPoint 栅格）
  fn shift_half_pixel(&self) -> Self {
    let c = &self.coeffs;
    Self {
      coeffs: [
        c[0] - 0.5 * c[1] - 0.5 * c[2],
        c[1],
        c[2],
        c[3] - 0.5 * c[4] - 0.5 * c[5],
        c[4],
        c[5],
      ],
    }
  }
}

/// GeoKeyDirectory 中本项目用到的键
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GeoKeys {
  pub raster_pixel_is_point: bool,
  pub geographic_type: Option<u32>,
  pub projected_type: Option<u32>,
}

impl GeoKeys {
  /// 解析 GeoKeyDirectoryTag。仅处理直接存放在目录中的 SHORT 值。
  pub fn parse(directory: &[u32]) -> Self {
    let mut keys = GeoKeys::default();
    if directory.len() < 4 {
      return keys;
    }

    let count = directory[3] as usize;
    for entry in directory[4..].chunks_exact(4).take(count) {
      let (key_id, location, value) = (entry[0], entry[1], entry[3]);
      if location != 0 {
        continue;
      }
      match key_id {
        GT_RASTER_TYPE_GEO_KEY => keys.raster_pixel_is_point = value == RASTER_PIXEL_IS_POINT,
        GEOGRAPHIC_TYPE_GEO_KEY if value != USER_DEFINED => keys.geographic_type = Some(value),
        PROJECTED_CS_TYPE_GEO_KEY if value != USER_DEFINED => keys.projected_type = Some(value),
        _ => {}
      }
    }
    keys
  }

  /// 投影坐标系优先，其次地理坐标系
  pub fn epsg(&self) -> Option<u32> {
    self.projected_type.or(self.geographic_type)
  }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct GeoReference {
  pub transform: GeoTransform,
  pub epsg: Option<u32>,
}

impl GeoReference {
  pub fn new(transform: GeoTransform, keys: &GeoKeys) -> Self {
    let transform = if keys.raster_pixel_is_point {
      transform.shift_half_pixel()
    } else {
      transform
    };
    Self {
      transform,
      epsg: keys.epsg(),
    }
  }

  pub fn pixel_to_map(&self, col: f64, row: f64) -> (f64, f64) {
    self.transform.apply(col, row)
  }

  /// 栅格从 (src_h, src_w) 重采样到 (dst_h, dst_w) 后的地理参考
  pub fn resampled(&self, src: (usize, usize), dst: (usize, usize)) -> Self {
    let sy = src.0 as f64 / dst.0 as f64;
    let sx = src.1 as f64 / dst.1 as f64;
    Self {
      transform: self.transform.scaled(sx, sy),
      epsg: self.epsg,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn scale_tiepoint_maps_corners() {
    let gt = GeoTransform::from_scale_tiepoint(
      &[0.5, 0.5, 0.0],
      &[0.0, 0.0, 0.0, 500_000.0, 4_200_000.0, 0.0],
    )
    .unwrap();
    assert_eq!(gt.apply(0.0, 0.0), (500_000.0, 4_200_000.0));
    assert_eq!(gt.apply(10.0, 20.0), (500_005.0, 4_199_990.0));
  }

  #[test]
  fn model_transformation_is_row_major() {
    let m = [
      2.0, 0.0, 0.0, 100.0, //
      0.0, -2.0, 0.0, 200.0, //
      0.0, 0.0, 0.0, 0.0, //
      0.0, 0.0, 0.0, 1.0,
    ];
    let gt = GeoTransform::from_model_transformation(&m).unwrap();
    assert_eq!(gt.apply(1.0, 1.0), (102.0, 198.0));
  }

  #[test]
  fn resampled_keeps_extent() {
    let georef = GeoReference {
      transform: GeoTransform::new([0.0, 1.0, 0.0, 100.0, 0.0, -1.0]),
      epsg: Some(32610),
    };
    let half = georef.resampled((100, 200), (50, 100));
    assert_eq!(half.pixel_to_map(100.0, 50.0), georef.pixel_to_map(200.0, 100.0));
    assert_eq!(half.epsg, Some(32610));
  }

  #[test]
  fn geokeys_prefer_projected() {
    let directory = [1, 1, 0, 3, 1025, 0, 1, 1, 2048, 0, 1, 4326, 3072, 0, 1, 32610];
    let keys = GeoKeys::parse(&directory);
    assert!(!keys.raster_pixel_is_point);
    assert_eq!(keys.epsg(), Some(32610));
  }

  #[test]
  fn pixel_is_point_shifts_origin() {
    let keys = GeoKeys::parse(&[1, 1, 0, 1, 1025, 0, 1, 2]);
    let georef = GeoReference::new(GeoTransform::new([10.0, 2.0, 0.0, 20.0, 0.0, -2.0]), &keys);
    assert_eq!(georef.pixel_to_map(0.0, 0.0), (9.0, 21.0));
  }
}
