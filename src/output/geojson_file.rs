// 该文件是 Senlin （森林） 项目的一部分。
// src/output/geojson_file.rs - GeoJSON 输出
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
  io::{BufWriter, Write},
  path::{Path, PathBuf},
};

use geojson::{Feature, FeatureCollection, GeoJson, Geometry, JsonObject, Value};
use serde_json::json;
use thiserror::Error;

use crate::{
  georef::GeoReference,
  output::{BoxRecord, DetectionTable, Export},
};

#[derive(Error, Debug)]
pub enum GeoJsonError {
  #[error("I/O 错误: {0}")]
  Io(#[from] std::io::Error),
  #[error("JSON 序列化错误: {0}")]
  Json(#[from] serde_json::Error),
}

#[derive(Debug, Clone)]
pub struct GeoJsonOutput {
  path: PathBuf,
}

impl GeoJsonOutput {
  pub fn new(path: impl Into<PathBuf>) -> Self {
    Self { path: path.into() }
  }

  pub fn path(&self) -> &Path {
    &self.path
  }

  fn feature(record: &BoxRecord, georef: &GeoReference) -> Feature {
    let ring = record
      .map_ring(georef)
      .iter()
      .map(|&(x, y)| vec![x, y])
      .collect();
    let [xmin, ymin, xmax, ymax] = record.map_bounds(georef);

    let mut properties = JsonObject::new();
    properties.insert("xmin".to_string(), json!(xmin));
    properties.insert("ymin".to_string(), json!(ymin));
    properties.insert("xmax".to_string(), json!(xmax));
    properties.insert("ymax".to_string(), json!(ymax));
    properties.insert("label".to_string(), json!(record.label));
    properties.insert("score".to_string(), json!(record.score));
    properties.insert("image_path".to_string(), json!(record.image_path));

    Feature {
      bbox: None,
      geometry: Some(Geometry::new(Value::Polygon(vec![ring]))),
      id: None,
      properties: Some(properties),
      foreign_members: None,
    }
  }
}

impl Export for GeoJsonOutput {
  type Error = GeoJsonError;

  fn export(&self, table: &DetectionTable, georef: &GeoReference) -> Result<(), Self::Error> {
    // 投影坐标用旧式 crs 成员标注
    let foreign_members = georef.epsg.map(|code| {
      let mut members = JsonObject::new();
      members.insert(
        "crs".to_string(),
        json!({
          "type": "name",
          "properties": { "name": format!("urn:ogc:def:crs:EPSG::{code}") }
        }),
      );
      members
    });

    let collection = GeoJson::FeatureCollection(FeatureCollection {
      bbox: table.map_extent(georef).map(|e| e.to_vec()),
      features: table
        .records()
        .iter()
        .map(|record| Self::feature(record, georef))
        .collect(),
      foreign_members,
    });

    let mut writer = BufWriter::new(File::create(&self.path)?);
    serde_json::to_writer(&mut writer, &collection)?;
    writer.flush()?;
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::{
    georef::GeoTransform,
    model::{DetectItem, DetectResult, TreeLabel},
  };

  #[test]
  fn writes_feature_collection_with_crs() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("trees.geojson");
    let georef = GeoReference {
      transform: GeoTransform::new([100.0, 1.0, 0.0, 200.0, 0.0, -1.0]),
      epsg: Some(32633),
    };
    let result = DetectResult::from(vec![DetectItem {
      class_id: 0,
      score: 0.5,
      bbox: [0.0, 0.0, 4.0, 2.0],
    }]);
    let table = DetectionTable::tagged::<TreeLabel>(&result, "in.tif");
    GeoJsonOutput::new(&path).export(&table, &georef).unwrap();

    let text = std::fs::read_to_string(&path).unwrap();
    let collection = match text.parse::<GeoJson>().unwrap() {
      GeoJson::FeatureCollection(fc) => fc,
      other => panic!("unexpected document: {other:?}"),
    };
    assert_eq!(collection.features.len(), 1);

    let feature = &collection.features[0];
    assert_eq!(feature.property("image_path"), Some(&json!("in.tif")));
    assert_eq!(feature.property("label"), Some(&json!("Tree")));
    assert_eq!(feature.property("xmax"), Some(&json!(104.0)));
    assert_eq!(feature.property("ymin"), Some(&json!(198.0)));

    let crs = collection
      .foreign_members
      .as_ref()
      .and_then(|m| m.get("crs"))
      .unwrap();
    assert_eq!(crs["properties"]["name"], "urn:ogc:def:crs:EPSG::32633");
  }
}
