// 该文件是 Senlin （森林） 项目的一部分。
// src/output.rs - 输出定义
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

use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::info;

use crate::georef::GeoReference;

mod geojson_file;
mod geopackage;
mod table;

pub use self::geojson_file::{GeoJsonError, GeoJsonOutput};
pub use self::geopackage::{GeoPackageError, GeoPackageOutput};
pub use self::table::{BoxRecord, DetectionTable};

/// 把检测结果表写成带坐标参考的矢量数据集
pub trait Export {
  type Error;
  fn export(&self, table: &DetectionTable, georef: &GeoReference) -> Result<(), Self::Error>;
}

#[derive(Error, Debug)]
pub enum ExportError {
  #[error("GeoPackage 输出错误: {0}")]
  GeoPackage(#[from] GeoPackageError),
  #[error("GeoJSON 输出错误: {0}")]
  GeoJson(#[from] GeoJsonError),
  #[error("无法创建输出目录 {path}: {source}")]
  CreateDir {
    path: PathBuf,
    source: std::io::Error,
  },
  #[error("不支持的输出格式: {0}")]
  UnsupportedFormat(String),
}

/// 按扩展名选择输出格式
#[derive(Debug, Clone)]
pub enum OutputWrapper {
  GeoPackage(GeoPackageOutput),
  GeoJson(GeoJsonOutput),
}

impl OutputWrapper {
  pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ExportError> {
    let path = path.as_ref();
    let extension = path
      .extension()
      .and_then(|e| e.to_str())
      .map(|e| e.to_ascii_lowercase());

    match extension.as_deref() {
      Some(GeoPackageOutput::EXTENSION) => Ok(OutputWrapper::GeoPackage(GeoPackageOutput::new(path))),
      Some("geojson") | Some("json") => Ok(OutputWrapper::GeoJson(GeoJsonOutput::new(path))),
      _ => Err(ExportError::UnsupportedFormat(path.display().to_string())),
    }
  }

  pub fn path(&self) -> &Path {
    match self {
      OutputWrapper::GeoPackage(output) => output.path(),
      OutputWrapper::GeoJson(output) => output.path(),
    }
  }
}

/// 输出文件的父目录不存在时逐级创建
pub(crate) fn ensure_parent_dir(path: &Path) -> Result<(), ExportError> {
  if let Some(parent) = path.parent()
    && !parent.as_os_str().is_empty()
  {
    std::fs::create_dir_all(parent).map_err(|source| ExportError::CreateDir {
      path: parent.to_path_buf(),
      source,
    })?;
  }
  Ok(())
}

impl Export for OutputWrapper {
  type Error = ExportError;

  fn export(&self, table: &DetectionTable, georef: &GeoReference) -> Result<(), Self::Error> {
    ensure_parent_dir(self.path())?;
    match self {
      OutputWrapper::GeoPackage(output) => output.export(table, georef)?,
      OutputWrapper::GeoJson(output) => output.export(table, georef)?,
    }
    info!("写入 {} 个检测框到: {}", table.len(), self.path().display());
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn format_follows_extension() {
    assert!(matches!(
      OutputWrapper::from_path("out/trees.gpkg"),
      Ok(OutputWrapper::GeoPackage(_))
    ));
    assert!(matches!(
      OutputWrapper::from_path("out/TREES.GPKG"),
      Ok(OutputWrapper::GeoPackage(_))
    ));
    assert!(matches!(
      OutputWrapper::from_path("trees.geojson"),
      Ok(OutputWrapper::GeoJson(_))
    ));
    assert!(matches!(
      OutputWrapper::from_path("trees.shp"),
      Err(ExportError::UnsupportedFormat(_))
    ));
    assert!(matches!(
      OutputWrapper::from_path("trees"),
      Err(ExportError::UnsupportedFormat(_))
    ));
  }

  #[test]
  fn parent_directories_are_created() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("a/b/c/trees.gpkg");
    ensure_parent_dir(&path).unwrap();
    assert!(dir.path().join("a/b/c").is_dir());
    ensure_parent_dir(Path::new("trees.gpkg")).unwrap();
  }
}
