// 该文件是 Yuwai （域外） 项目的一部分。
// src/output/record_output.rs - 逐实例文本记录输出
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

use thiserror::Error;
use url::Url;

use crate::decision::{Assignment, RejectReason};
use crate::detection::{DetectionRecord, RevisedInstance, RevisedRecord};
use crate::output::Render;
use crate::{FromUrl, FromUrlWithScheme};

#[derive(Error, Debug)]
pub enum RecordOutputError {
  #[error("URI 方案不匹配")]
  SchemeMismatch,
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("写入锁已损坏")]
  Poisoned,
}

/// 每个实例一行：
/// `图片, 原始类别, 新标签, 得分, x_min, y_min, x_max, y_max[, 原因]`
///
/// 地址带 `?reason` 时附加判为未知的原因。
pub struct RecordOutput {
  writer: Mutex<BufWriter<File>>,
  with_reason: bool,
}

fn reason_str(assignment: &Assignment) -> &'static str {
  match &assignment.reason {
    None => "accepted",
    Some(RejectReason::BelowThreshold) => "below_threshold",
    Some(RejectReason::UnknownDominant) => "unknown_dominant",
    Some(RejectReason::UnfittedClass { .. }) => "unfitted_class",
    Some(RejectReason::QueryError { .. }) => "query_error",
  }
}

impl RecordOutput {
  pub fn create(path: &Path, with_reason: bool) -> Result<Self, RecordOutputError> {
    Ok(Self {
      writer: Mutex::new(BufWriter::new(File::create(path)?)),
      with_reason,
    })
  }

  fn record<M>(&self, image: u64, revised: &RevisedInstance<M>) -> String {
    let instance = &revised.instance;
    let score = match revised.assignment.score {
      Some(score) => format!("{:.4}", score),
      None => "-".to_string(),
    };
    let mut record = format!(
      "{}, {}, {}, {}, {:.4}, {:.4}, {:.4}, {:.4}",
      image,
      instance.original_class,
      revised.assignment.label,
      score,
      instance.bbox[0],
      instance.bbox[1],
      instance.bbox[2],
      instance.bbox[3]
    );
    if self.with_reason {
      record.push_str(", ");
      record.push_str(reason_str(&revised.assignment));
    }
    record
  }
}

impl FromUrlWithScheme for RecordOutput {
  const SCHEME: &'static str = "record";
}

impl FromUrl for RecordOutput {
  type Error = RecordOutputError;

  fn from_url(uri: &Url) -> Result<Self, Self::Error> {
    if uri.scheme() != Self::SCHEME {
      return Err(RecordOutputError::SchemeMismatch);
    }
    let with_reason = uri.query_pairs().any(|(k, _)| k == "reason");
    Self::create(Path::new(uri.path()), with_reason)
  }
}

impl<M> Render<DetectionRecord<M>, RevisedRecord<M>> for RecordOutput {
  type Error = RecordOutputError;

  fn render_result(
    &self,
    _input: &DetectionRecord<M>,
    result: &RevisedRecord<M>,
  ) -> Result<(), Self::Error> {
    let mut writer = self.writer.lock().map_err(|_| RecordOutputError::Poisoned)?;
    for revised in result.instances() {
      writeln!(writer, "{}", self.record(result.image(), revised))?;
    }
    Ok(())
  }

  fn finish(&self) -> Result<(), Self::Error> {
    let mut writer = self.writer.lock().map_err(|_| RecordOutputError::Poisoned)?;
    writer.flush()?;
    Ok(())
  }
}
