// 该文件是 Senlin （森林） 项目的一部分。
// src/output/geopackage.rs - GeoPackage 输出
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

//! 最小的 GeoPackage 1.3 矢量写出：必需的元数据表加一个多边形要素表。
//! 几何使用 GeoPackage 二进制格式（"GP" 头 + 外包矩形 + 小端 WKB）。

use std::path::{Path, PathBuf};

use rusqlite::{Connection, params};
use thiserror::Error;
use tracing::{debug, warn};

use crate::{
  georef::GeoReference,
  output::{BoxRecord, DetectionTable, Export},
};

const APPLICATION_ID: i32 = 0x4750_4B47; // "GPKG"
const USER_VERSION: i32 = 10300;
const GEOMETRY_COLUMN: &str = "geom";
const UNDEFINED_CARTESIAN_SRS: i32 = -1;

const WGS84_WKT: &str = r#"GEOGCS["WGS 84",DATUM["WGS_1984",SPHEROID["WGS 84",6378137,298.257223563,AUTHORITY["EPSG","7030"]],AUTHORITY["EPSG","6326"]],PRIMEM["Greenwich",0,AUTHORITY["EPSG","8901"]],UNIT["degree",0.0174532925199433,AUTHORITY["EPSG","9122"]],AXIS["Latitude",NORTH],AXIS["Longitude",EAST],AUTHORITY["EPSG","4326"]]"#;

const METADATA_SCHEMA: &str = r#"
CREATE TABLE gpkg_spatial_ref_sys (
  srs_name TEXT NOT NULL,
  srs_id INTEGER NOT NULL PRIMARY KEY,
  organization TEXT NOT NULL,
  organization_coordsys_id INTEGER NOT NULL,
  definition TEXT NOT NULL,
  description TEXT
);
CREATE TABLE gpkg_contents (
  table_name TEXT NOT NULL PRIMARY KEY,
  data_type TEXT NOT NULL,
  identifier TEXT UNIQUE,
  description TEXT DEFAULT '',
  last_change DATETIME NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ','now')),
  min_x DOUBLE,
  min_y DOUBLE,
  max_x DOUBLE,
  max_y DOUBLE,
  srs_id INTEGER,
  CONSTRAINT fk_gc_r_srs_id FOREIGN KEY (srs_id) REFERENCES gpkg_spatial_ref_sys(srs_id)
);
CREATE TABLE gpkg_geometry_columns (
  table_name TEXT NOT NULL,
  column_name TEXT NOT NULL,
  geometry_type_name TEXT NOT NULL,
  srs_id INTEGER NOT NULL,
  z TINYINT NOT NULL,
  m TINYINT NOT NULL,
  CONSTRAINT pk_geom_cols PRIMARY KEY (table_name, column_name),
  CONSTRAINT fk_gc_tn FOREIGN KEY (table_name) REFERENCES gpkg_contents(table_name),
  CONSTRAINT fk_gc_srs FOREIGN KEY (srs_id) REFERENCES gpkg_spatial_ref_sys (srs_id)
);
"#;

#[derive(Error, Debug)]
pub enum GeoPackageError {
  #[error("I/O 错误: {0}")]
  Io(#[from] std::io::Error),
  #[error("SQLite 错误: {0}")]
  Sqlite(#[from] rusqlite::Error),
  #[error("无法从输出路径得到图层名: {0}")]
  LayerName(PathBuf),
}

#[derive(Debug, Clone)]
pub struct GeoPackageOutput {
  path: PathBuf,
}

impl GeoPackageOutput {
  pub const EXTENSION: &'static str = "gpkg";

  pub fn new(path: impl Into<PathBuf>) -> Self {
    Self { path: path.into() }
  }

  pub fn path(&self) -> &Path {
    &self.path
  }

  /// 图层名取文件名主干
  pub fn layer_name(&self) -> Result<String, GeoPackageError> {
    self
      .path
      .file_stem()
      .and_then(|s| s.to_str())
      .filter(|s| !s.is_empty())
      .map(str::to_string)
      .ok_or_else(|| GeoPackageError::LayerName(self.path.clone()))
  }
}

fn quote_ident(name: &str) -> String {
  format!("\"{}\"", name.replace('"', "\"\""))
}

/// GeoPackage 二进制几何：头部 + 外包矩形 [minx, maxx, miny, maxy] + WKB 多边形
fn encode_polygon(srs_id: i32, ring: &[(f64, f64)]) -> Vec<u8> {
  let (min_x, min_y, max_x, max_y) = ring.iter().fold(
    (f64::INFINITY, f64::INFINITY, f64::NEG_INFINITY, f64::NEG_INFINITY),
    |(a, b, c, d), &(x, y)| (a.min(x), b.min(y), c.max(x), d.max(y)),
  );

  let mut blob = Vec::with_capacity(8 + 32 + 13 + ring.len() * 16);
  blob.extend_from_slice(b"GP");
  blob.push(0); // version
  blob.push(0b0000_0011); // 小端，外包矩形为 [minx, maxx, miny, maxy]
  blob.extend_from_slice(&srs_id.to_le_bytes());
  for v in [min_x, max_x, min_y, max_y] {
    blob.extend_from_slice(&v.to_le_bytes());
  }

  blob.push(1); // WKB 小端
  blob.extend_from_slice(&3u32.to_le_bytes()); // Polygon
  blob.extend_from_slice(&1u32.to_le_bytes());
  blob.extend_from_slice(&(ring.len() as u32).to_le_bytes());
  for &(x, y) in ring {
    blob.extend_from_slice(&x.to_le_bytes());
    blob.extend_from_slice(&y.to_le_bytes());
  }
  blob
}

/// 栅格坐标系在 GeoPackage 中的 srs_id 与 WKT 定义。
/// 注册表中查不到的编码退化为未定义笛卡尔坐标系。
fn resolve_srs(epsg: Option<u32>) -> (i32, Option<&'static str>) {
  let Some(code) = epsg else {
    return (UNDEFINED_CARTESIAN_SRS, None);
  };
  match u16::try_from(code).ok().and_then(crs_definitions::from_code) {
    Some(def) => (i32::from(def.code), Some(def.wkt)),
    None => {
      warn!("EPSG:{} 不在坐标系注册表中, 几何将使用未定义坐标系", code);
      (UNDEFINED_CARTESIAN_SRS, None)
    }
  }
}

fn create_metadata(conn: &Connection, srs_id: i32, definition: Option<&str>) -> rusqlite::Result<()> {
  conn.execute_batch(&format!(
    "PRAGMA application_id = {APPLICATION_ID}; PRAGMA user_version = {USER_VERSION};"
  ))?;
  conn.execute_batch(METADATA_SCHEMA)?;

  let mut insert = conn.prepare(
    "INSERT OR IGNORE INTO gpkg_spatial_ref_sys \
     (srs_name, srs_id, organization, organization_coordsys_id, definition, description) \
     VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
  )?;
  insert.execute(params![
    "Undefined cartesian SRS",
    -1,
    "NONE",
    -1,
    "undefined",
    "undefined cartesian coordinate reference system"
  ])?;
  insert.execute(params![
    "Undefined geographic SRS",
    0,
    "NONE",
    0,
    "undefined",
    "undefined geographic coordinate reference system"
  ])?;
  insert.execute(params![
    "WGS 84 geodetic",
    4326,
    "EPSG",
    4326,
    WGS84_WKT,
    "longitude/latitude coordinates in decimal degrees on the WGS 84 spheroid"
  ])?;
  if let Some(definition) = definition {
    insert.execute(params![
      format!("EPSG:{srs_id}"),
      srs_id,
      "EPSG",
      srs_id,
      definition,
      Option::<String>::None
    ])?;
  }
  Ok(())
}

fn insert_record(
  stmt: &mut rusqlite::Statement<'_>,
  record: &BoxRecord,
  georef: &GeoReference,
  srs_id: i32,
) -> rusqlite::Result<()> {
  let ring = record.map_ring(georef);
  let [min_x, min_y, max_x, max_y] = record.map_bounds(georef);
  stmt.execute(params![
    encode_polygon(srs_id, &ring),
    min_x,
    min_y,
    max_x,
    max_y,
    record.label,
    f64::from(record.score),
    record.image_path
  ])?;
  Ok(())
}

impl Export for GeoPackageOutput {
  type Error = GeoPackageError;

  fn export(&self, table: &DetectionTable, georef: &GeoReference) -> Result<(), Self::Error> {
    let layer = self.layer_name()?;
    if self.path.exists() {
      warn!("覆盖已有输出文件: {}", self.path.display());
      std::fs::remove_file(&self.path)?;
    }

    let (srs_id, definition) = resolve_srs(georef.epsg);
    debug!("GeoPackage 图层 {}，坐标系 {}", layer, srs_id);

    let mut conn = Connection::open(&self.path)?;
    let tx = conn.transaction()?;
    create_metadata(&tx, srs_id, definition)?;

    let table_ident = quote_ident(&layer);
    tx.execute_batch(&format!(
      "CREATE TABLE {table_ident} (\
         fid INTEGER PRIMARY KEY AUTOINCREMENT NOT NULL, \
         {GEOMETRY_COLUMN} POLYGON, \
         xmin DOUBLE, ymin DOUBLE, xmax DOUBLE, ymax DOUBLE, \
         label TEXT, score DOUBLE, image_path TEXT)"
    ))?;

    let extent = table.map_extent(georef);
    tx.execute(
      "INSERT INTO gpkg_contents \
       (table_name, data_type, identifier, last_change, min_x, min_y, max_x, max_y, srs_id) \
       VALUES (?1, 'features', ?1, ?2, ?3, ?4, ?5, ?6, ?7)",
      params![
        layer,
        chrono::Utc::now()
          .format("%Y-%m-%dT%H:%M:%S%.3fZ")
          .to_string(),
        extent.map(|e| e[0]),
        extent.map(|e| e[1]),
        extent.map(|e| e[2]),
        extent.map(|e| e[3]),
        srs_id
      ],
    )?;
    tx.execute(
      "INSERT INTO gpkg_geometry_columns \
       (table_name, column_name, geometry_type_name, srs_id, z, m) \
       VALUES (?1, ?2, 'POLYGON', ?3, 0, 0)",
      params![layer, GEOMETRY_COLUMN, srs_id],
    )?;

    {
      let mut stmt = tx.prepare(&format!(
        "INSERT INTO {table_ident} \
         ({GEOMETRY_COLUMN}, xmin, ymin, xmax, ymax, label, score, image_path) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)"
      ))?;
      for record in table.records() {
        insert_record(&mut stmt, record, georef, srs_id)?;
      }
    }
    tx.commit()?;

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

  fn georef() -> GeoReference {
    GeoReference {
      transform: GeoTransform::new([500000.0, 0.1, 0.0, 4100000.0, 0.0, -0.1]),
      epsg: Some(32611),
    }
  }

  fn table() -> DetectionTable {
    let result = DetectResult::from(vec![
      DetectItem {
        class_id: 0,
        score: 0.75,
        bbox: [10.0, 20.0, 30.0, 40.0],
      },
      DetectItem {
        class_id: 0,
        score: 0.5,
        bbox: [100.0, 100.0, 110.0, 120.0],
      },
    ]);
    DetectionTable::tagged::<TreeLabel>(&result, "site/ortho.tif")
  }

  #[test]
  fn polygon_blob_layout() {
    let ring = [(0.0, 0.0), (2.0, 0.0), (2.0, 1.0), (0.0, 1.0), (0.0, 0.0)];
    let blob = encode_polygon(32611, &ring);
    assert_eq!(&blob[..2], b"GP");
    assert_eq!(blob[2], 0);
    assert_eq!(blob[3], 0x03);
    assert_eq!(i32::from_le_bytes(blob[4..8].try_into().unwrap()), 32611);
    let max_x = f64::from_le_bytes(blob[16..24].try_into().unwrap());
    assert_eq!(max_x, 2.0);
    assert_eq!(blob[40], 1);
    assert_eq!(u32::from_le_bytes(blob[41..45].try_into().unwrap()), 3);
    assert_eq!(u32::from_le_bytes(blob[49..53].try_into().unwrap()), 5);
    assert_eq!(blob.len(), 40 + 13 + 5 * 16);
  }

  #[test]
  fn writes_feature_table_named_after_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("crowns.gpkg");
    GeoPackageOutput::new(&path)
      .export(&table(), &georef())
      .unwrap();

    let conn = Connection::open(&path).unwrap();
    let app_id: i32 = conn
      .query_row("PRAGMA application_id", [], |r| r.get(0))
      .unwrap();
    assert_eq!(app_id, APPLICATION_ID);

    let (data_type, srs_id): (String, i32) = conn
      .query_row(
        "SELECT data_type, srs_id FROM gpkg_contents WHERE table_name = 'crowns'",
        [],
        |r| Ok((r.get(0)?, r.get(1)?)),
      )
      .unwrap();
    assert_eq!(data_type, "features");
    assert_eq!(srs_id, 32611);

    let (org, definition): (String, String) = conn
      .query_row(
        "SELECT organization, definition FROM gpkg_spatial_ref_sys WHERE srs_id = 32611",
        [],
        |r| Ok((r.get(0)?, r.get(1)?)),
      )
      .unwrap();
    assert_eq!(org, "EPSG");
    assert_ne!(definition, "undefined");
    assert!(definition.contains("UTM zone 11N"));

    let mut stmt = conn
      .prepare("SELECT xmin, ymax, label, score, image_path, geom FROM crowns ORDER BY fid")
      .unwrap();
    let rows: Vec<(f64, f64, String, f64, String, Vec<u8>)> = stmt
      .query_map([], |r| {
        Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?, r.get(4)?, r.get(5)?))
      })
      .unwrap()
      .collect::<Result<_, _>>()
      .unwrap();

    assert_eq!(rows.len(), 2);
    assert!((rows[0].0 - 500001.0).abs() < 1e-6);
    assert!((rows[0].1 - 4099998.0).abs() < 1e-6);
    assert_eq!(rows[0].2, "Tree");
    assert_eq!(rows[0].3, 0.75);
    assert!(rows.iter().all(|r| r.4 == "site/ortho.tif"));
    assert!(rows.iter().all(|r| &r.5[..2] == b"GP"));
  }

  #[test]
  fn replaces_existing_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("trees.gpkg");
    std::fs::write(&path, b"not a database").unwrap();

    let output = GeoPackageOutput::new(&path);
    output.export(&table(), &georef()).unwrap();
    output.export(&DetectionTable::default(), &georef()).unwrap();

    let conn = Connection::open(&path).unwrap();
    let count: i64 = conn
      .query_row("SELECT count(*) FROM trees", [], |r| r.get(0))
      .unwrap();
    assert_eq!(count, 0);
  }

  #[test]
  fn unknown_crs_uses_undefined_srs() {
    let dir = tempfile::tempdir().unwrap();
    for (name, epsg) in [("plain", None), ("unregistered", Some(100_000))] {
      let path = dir.path().join(format!("{name}.gpkg"));
      let georef = GeoReference {
        transform: GeoTransform::identity(),
        epsg,
      };
      GeoPackageOutput::new(&path).export(&table(), &georef).unwrap();

      let conn = Connection::open(&path).unwrap();
      let srs_id: i32 = conn
        .query_row(
          "SELECT srs_id FROM gpkg_geometry_columns WHERE table_name = ?1",
          [name],
          |r| r.get(0),
        )
        .unwrap();
      assert_eq!(srs_id, -1);

      // 只有 -1 与 0 两行允许 undefined 定义
      let undefined: i64 = conn
        .query_row(
          "SELECT count(*) FROM gpkg_spatial_ref_sys WHERE definition = 'undefined' AND srs_id > 0",
          [],
          |r| r.get(0),
        )
        .unwrap();
      assert_eq!(undefined, 0);
    }
  }
}
