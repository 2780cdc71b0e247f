// 该文件是 Yuwai （域外） 项目的一部分。
// src/model/store.rs - 模型表的保存与加载
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

use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, error, info};
use url::Url;

use crate::model::{ClassId, ClassModel, ModelTable};
use crate::{FromUrl, FromUrlWithScheme};

const MODEL_TABLE_VERSION: u32 = 1;

#[derive(Error, Debug)]
pub enum StoreError {
  #[error("URI 方案不匹配: 期望 {expected}, 实际 {found}")]
  SchemeMismatch { expected: &'static str, found: String },
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("JSON 错误: {0}")]
  JsonError(#[from] serde_json::Error),
  #[error("不支持的模型表版本: {0}")]
  UnsupportedVersion(u32),
  #[error("类别 {0} 重复出现")]
  DuplicateClass(ClassId),
}

#[derive(Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct ModelTableFile {
  version: u32,
  fitted_at: DateTime<Utc>,
  tailsize: usize,
  classes: Vec<ClassEntry>,
}

#[derive(Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct ClassEntry {
  class: ClassId,
  model: ClassModel,
}

impl ModelTable {
  /// 整体写入 JSON 文件；先写临时文件再改名，避免留下半个文件
  pub fn save(&self, path: &Path) -> Result<(), StoreError> {
    let file = ModelTableFile {
      version: MODEL_TABLE_VERSION,
      fitted_at: self.fitted_at(),
      tailsize: self.tailsize(),
      classes: self
        .iter()
        .map(|(class, model)| ClassEntry {
          class,
          model: model.clone(),
        })
        .collect(),
    };

    let tmp = path.with_extension("tmp");
    let written = write_json(&tmp, &file).and_then(|()| Ok(std::fs::rename(&tmp, path)?));
    if let Err(e) = written {
      error!("模型表写入失败: {}", e);
      if tmp.exists() {
        let _ = std::fs::remove_file(&tmp);
      }
      return Err(e);
    }
    info!("模型表已保存: {} ({} 个类别)", path.display(), self.len());
    Ok(())
  }

  pub fn load(path: &Path) -> Result<Self, StoreError> {
    info!("加载模型表: {}", path.display());
    let reader = BufReader::new(File::open(path)?);
    let file: ModelTableFile = serde_json::from_reader(reader)?;
    if file.version != MODEL_TABLE_VERSION {
      error!("模型表版本 {} 不受支持", file.version);
      return Err(StoreError::UnsupportedVersion(file.version));
    }

    let mut classes = std::collections::BTreeMap::new();
    for entry in file.classes {
      if classes.insert(entry.class, entry.model).is_some() {
        return Err(StoreError::DuplicateClass(entry.class));
      }
    }
    debug!("模型表拟合时间: {}", file.fitted_at);
    Ok(ModelTable::new(classes, file.tailsize, file.fitted_at))
  }
}

fn write_json(path: &Path, file: &ModelTableFile) -> Result<(), StoreError> {
  let mut writer = BufWriter::new(File::create(path)?);
  serde_json::to_writer_pretty(&mut writer, file)?;
  writer.flush()?;
  Ok(())
}

/// `weibull:///path/to/table.json` 形式的模型表地址
#[derive(Debug, Clone)]
pub struct ModelTableSource {
  path: PathBuf,
}

impl ModelTableSource {
  pub fn path(&self) -> &Path {
    &self.path
  }

  pub fn load(&self) -> Result<ModelTable, StoreError> {
    ModelTable::load(&self.path)
  }

  pub fn save(&self, table: &ModelTable) -> Result<(), StoreError> {
    table.save(&self.path)
  }
}

impl FromUrlWithScheme for ModelTableSource {
  const SCHEME: &'static str = "weibull";
}

impl FromUrl for ModelTableSource {
  type Error = StoreError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(StoreError::SchemeMismatch {
        expected: Self::SCHEME,
        found: url.scheme().to_string(),
      });
    }
    Ok(ModelTableSource {
      path: PathBuf::from(url.path()),
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::activation::DistanceMetric;
  use crate::model::TailModel;
  use crate::weibull::Weibull;
  use rstest::rstest;
  use std::collections::BTreeMap;

  fn sample_table() -> ModelTable {
    let mut classes = BTreeMap::new();
    classes.insert(
      ClassId(0),
      ClassModel::Fitted(TailModel::new(
        Weibull::new(1.234_567_890_123_456_7, 0.1 + 0.2).expect("weibull"),
        vec![1.0 / 3.0, -2.5e-17, 1e300].into(),
        DistanceMetric::EuCos { eu_weight: 0.005 },
        20,
      )),
    );
    classes.insert(ClassId(1), ClassModel::Unfitted {
      reason: "类别 1 没有被正确分类的训练样本".into(),
    });
    classes.insert(
      ClassId(2),
      ClassModel::Fitted(TailModel::new(
        Weibull::new(7.0, 42.0).expect("weibull"),
        vec![0.0, 1.0, 2.0].into(),
        DistanceMetric::Cosine,
        3,
      )),
    );
    ModelTable::new(classes, 20, Utc::now())
  }

  #[rstest]
  fn save_then_load_is_identical() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("weibull.json");
    let table = sample_table();
    table.save(&path).expect("save");
    let loaded = ModelTable::load(&path).expect("load");
    // f64 与时间戳都必须逐位一致
    assert_eq!(loaded, table);
    assert!(!path.with_extension("tmp").exists());
  }

  #[rstest]
  fn failed_save_leaves_no_temp_file() {
    let dir = tempfile::tempdir().expect("tempdir");
    // 目标是非空目录，改名会失败
    let path = dir.path().join("weibull.json");
    std::fs::create_dir(&path).expect("mkdir");
    std::fs::write(path.join("keep"), b"x").expect("write");

    assert!(sample_table().save(&path).is_err());
    assert!(!path.with_extension("tmp").exists());
    assert!(path.join("keep").exists());
  }

  #[rstest]
  fn load_rejects_unknown_version() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("weibull.json");
    std::fs::write(
      &path,
      r#"{"version":9,"fitted_at":"2026-01-01T00:00:00Z","tailsize":1,"classes":[]}"#,
    )
    .expect("write");
    assert!(matches!(
      ModelTable::load(&path),
      Err(StoreError::UnsupportedVersion(9))
    ));
  }

  #[rstest]
  fn load_rejects_duplicates() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("weibull.json");
    let unfitted = r#"{"status":"unfitted","reason":"x"}"#;
    std::fs::write(
      &path,
      format!(
        r#"{{"version":1,"fitted_at":"2026-01-01T00:00:00Z","tailsize":1,"classes":[{{"class":3,"model":{unfitted}}},{{"class":3,"model":{unfitted}}}]}}"#
      ),
    )
    .expect("write");
    assert!(matches!(
      ModelTable::load(&path),
      Err(StoreError::DuplicateClass(ClassId(3)))
    ));
  }

  #[rstest]
  fn load_rejects_invalid_parameters() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("weibull.json");
    std::fs::write(
      &path,
      r#"{"version":1,"fitted_at":"2026-01-01T00:00:00Z","tailsize":1,"classes":[{"class":0,"model":{"status":"fitted","shape":0.0,"scale":1.0,"mean":[1.0],"metric":{"kind":"euclidean"},"tail_len":1}}]}"#,
    )
    .expect("write");
    assert!(matches!(ModelTable::load(&path), Err(StoreError::JsonError(_))));
  }

  #[rstest]
  #[case("weibull:///tmp/table.json", true)]
  #[case("jsonl:///tmp/table.json", false)]
  fn source_from_url(#[case] url: &str, #[case] ok: bool) {
    let url = Url::parse(url).expect("url");
    let source = ModelTableSource::from_url(&url);
    assert_eq!(source.is_ok(), ok);
    if let Ok(source) = source {
      assert_eq!(source.path(), Path::new("/tmp/table.json"));
    }
  }
}
