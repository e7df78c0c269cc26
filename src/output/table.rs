// 该文件是 Senlin （森林） 项目的一部分。
// src/output/table.rs - 检测结果表
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

use crate::{
  georef::GeoReference,
  model::{DetectResult, WithLabel},
};

/// 一个检测目标，坐标为像素坐标
#[derive(Debug, Clone, PartialEq)]
pub struct BoxRecord {
  pub xmin: f64,
  pub ymin: f64,
  pub xmax: f64,
  pub ymax: f64,
  pub label: String,
  pub score: f32,
  pub image_path: String,
}

impl BoxRecord {
  /// 地图坐标下的闭合外环（首尾相同的五个点），方向为逆时针
  pub fn map_ring(&self, georef: &GeoReference) -> [(f64, f64); 5] {
    let corner = |col: f64, row: f64| georef.pixel_to_map(col, row);
    let first = corner(self.xmin, self.ymin);
    let mut ring = [
      first,
      corner(self.xmax, self.ymin),
      corner(self.xmax, self.ymax),
      corner(self.xmin, self.ymax),
      first,
    ];
    // 北向上的影像行号向南增长，像素顺序在地图上是顺时针
    if signed_area(&ring) < 0.0 {
      ring.reverse();
    }
    ring
  }

  /// 地图坐标下的外包矩形 [min_x, min_y, max_x, max_y]
  pub fn map_bounds(&self, georef: &GeoReference) -> [f64; 4] {
    bounds(self.map_ring(georef).iter().copied())
  }
}

/// 鞋带公式，逆时针为正
fn signed_area(ring: &[(f64, f64)]) -> f64 {
  ring
    .windows(2)
    .map(|w| w[0].0 * w[1].1 - w[1].0 * w[0].1)
    .sum::<f64>()
    / 2.0
}

fn bounds(points: impl Iterator<Item = (f64, f64)>) -> [f64; 4] {
  points.fold(
    [f64::INFINITY, f64::INFINITY, f64::NEG_INFINITY, f64::NEG_INFINITY],
    |[min_x, min_y, max_x, max_y], (x, y)| [min_x.min(x), min_y.min(y), max_x.max(x), max_y.max(y)],
  )
}

/// 一次运行的全部检测结果。所有记录的 `image_path` 都等于输入栅格路径。
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DetectionTable {
  records: Vec<BoxRecord>,
}

impl DetectionTable {
  pub fn tagged<T: WithLabel>(result: &DetectResult, image_path: &str) -> Self {
    let records = result
      .iter()
      .map(|item| BoxRecord {
        xmin: item.bbox[0] as f64,
        ymin: item.bbox[1] as f64,
        xmax: item.bbox[2] as f64,
        ymax: item.bbox[3] as f64,
        label: T::from_label_id(item.class_id).to_label_str(),
        score: item.score,
        image_path: image_path.to_string(),
      })
      .collect();
    Self { records }
  }

  pub fn records(&self) -> &[BoxRecord] {
    &self.records
  }

  pub fn len(&self) -> usize {
    self.records.len()
  }

  pub fn is_empty(&self) -> bool {
    self.records.is_empty()
  }

  /// 全部记录在地图坐标下的范围，空表返回 None
  pub fn map_extent(&self, georef: &GeoReference) -> Option<[f64; 4]> {
    if self.records.is_empty() {
      return None;
    }
    Some(bounds(self.records.iter().flat_map(|r| {
      let [min_x, min_y, max_x, max_y] = r.map_bounds(georef);
      [(min_x, min_y), (max_x, max_y)]
    })))
  }
}
