// 该文件是 Yuwai （域外） 项目的一部分。
// src/output/jsonl_output.rs - 重新分组结果的 JSON Lines 输出
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
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::Mutex;

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, error, info};
use url::Url;

use crate::detection::{DetectionRecord, GroupedDetections, RevisedRecord};
use crate::output::Render;
use crate::{FromUrl, FromUrlWithScheme};

#[derive(Error, Debug)]
pub enum JsonLinesOutputError {
  #[error("期望输出方式 '{0}', 实际输出方式 '{1}'")]
  SchemeMismatch(String, String),
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("JSON 错误: {0}")]
  JsonError(#[from] serde_json::Error),
  #[error("写入锁已损坏")]
  Poisoned,
}

/// 每张图片一行，内容为 K + 1 个箱子的分组检测结果，最后一个箱子为未知
pub struct JsonLinesOutput {
  writer: Mutex<BufWriter<File>>,
}

impl JsonLinesOutput {
  pub fn create(path: &Path) -> Result<Self, JsonLinesOutputError> {
    if let Some(parent) = path.parent() {
      if !parent.as_os_str().is_empty() && !parent.exists() {
        std::fs::create_dir_all(parent)?;
      }
    }
    info!("输出文件: {}", path.display());
    Ok(Self {
      writer: Mutex::new(BufWriter::new(File::create(path)?)),
    })
  }

  fn write_line<M: Serialize>(&self, grouped: &GroupedDetections<M>) -> Result<(), JsonLinesOutputError> {
    let mut writer = self.writer.lock().map_err(|_| JsonLinesOutputError::Poisoned)?;
    serde_json::to_writer(&mut *writer, grouped)?;
    writer.write_all(b"\n")?;
    Ok(())
  }
}

impl FromUrlWithScheme for JsonLinesOutput {
  const SCHEME: &'static str = "jsonl";
}

impl FromUrl for JsonLinesOutput {
  type Error = JsonLinesOutputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      error!(
        "URI scheme mismatch: expected '{}', found '{}'",
        Self::SCHEME,
        url.scheme()
      );
      return Err(JsonLinesOutputError::SchemeMismatch(
        Self::SCHEME.to_string(),
        url.scheme().to_string(),
      ));
    }
    Self::create(Path::new(url.path()))
  }
}

impl<M: Clone + Serialize> Render<DetectionRecord<M>, RevisedRecord<M>> for JsonLinesOutput {
  type Error = JsonLinesOutputError;

  fn render_result(
    &self,
    _input: &DetectionRecord<M>,
    result: &RevisedRecord<M>,
  ) -> Result<(), Self::Error> {
    debug!("写入第 {} 张图片的分组结果", result.image());
    self.write_line(&result.clone().partition())
  }

  fn finish(&self) -> Result<(), Self::Error> {
    let mut writer = self.writer.lock().map_err(|_| JsonLinesOutputError::Poisoned)?;
    writer.flush()?;
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::decision::Assignment;
  use crate::detection::{Instance, RevisedInstance};
  use crate::model::ClassId;
  use rstest::rstest;

  #[rstest]
  fn writes_one_line_per_image() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("nested").join("out.jsonl");
    let output = JsonLinesOutput::create(&path).expect("create");

    let instance = Instance {
      bbox: [0.0, 0.0, 2.0, 2.0],
      score: 0.75,
      mask: 7u8,
      activation: vec![1.0, 0.0].into(),
      original_class: ClassId(1),
    };
    let input = DetectionRecord::new(0, vec![instance.clone()]);
    let revised = RevisedRecord::new(0, 2, vec![RevisedInstance {
      instance,
      assignment: Assignment::known(ClassId(0), 0.8),
    }]);
    for _ in 0..2 {
      output.render_result(&input, &revised).expect("render");
    }
    Render::<DetectionRecord<u8>, RevisedRecord<u8>>::finish(&output).expect("finish");

    let text = std::fs::read_to_string(&path).expect("read");
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines.len(), 2);
    let grouped: GroupedDetections<u8> = serde_json::from_str(lines[0]).expect("parse");
    assert_eq!(grouped.bins(), 3);
    assert_eq!(grouped.masks[0], vec![7]);
    assert!(grouped.masks[2].is_empty());
  }
}
