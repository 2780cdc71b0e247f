// 该文件是 Yuwai （域外） 项目的一部分。
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

use serde::Serialize;
use thiserror::Error;
use url::Url;

use crate::detection::{DetectionRecord, RevisedRecord};
use crate::{FromUrl, FromUrlWithScheme};

pub trait Render<Input, Output>: Sized {
  type Error;
  fn render_result(&self, input: &Input, result: &Output) -> Result<(), Self::Error>;

  /// 所有结果写完后调用一次
  fn finish(&self) -> Result<(), Self::Error> {
    Ok(())
  }
}

impl<Input, Output, R: Render<Input, Output>> Render<Input, Output> for &R {
  type Error = R::Error;

  fn render_result(&self, input: &Input, result: &Output) -> Result<(), Self::Error> {
    (**self).render_result(input, result)
  }

  fn finish(&self) -> Result<(), Self::Error> {
    (**self).finish()
  }
}

mod jsonl_output;
pub use self::jsonl_output::{JsonLinesOutput, JsonLinesOutputError};

mod record_output;
pub use self::record_output::{RecordOutput, RecordOutputError};

mod summary;
pub use self::summary::{SummaryCounts, SummaryOutput};

#[derive(Error, Debug)]
pub enum OutputError {
  #[error("JSON Lines 输出错误: {0}")]
  JsonLinesOutputError(#[from] JsonLinesOutputError),
  #[error("记录输出错误: {0}")]
  RecordOutputError(#[from] RecordOutputError),
  #[error("URI 方案不匹配")]
  SchemeMismatch,
}

pub enum OutputWrapper {
  JsonLinesOutput(JsonLinesOutput),
  RecordOutput(RecordOutput),
  SummaryOutput(SummaryOutput),
}

impl FromUrl for OutputWrapper {
  type Error = OutputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    match url.scheme() {
      JsonLinesOutput::SCHEME => {
        let output = JsonLinesOutput::from_url(url)?;
        Ok(OutputWrapper::JsonLinesOutput(output))
      }
      RecordOutput::SCHEME => {
        let output = RecordOutput::from_url(url)?;
        Ok(OutputWrapper::RecordOutput(output))
      }
      SummaryOutput::SCHEME => Ok(OutputWrapper::SummaryOutput(SummaryOutput::default())),
      _ => Err(OutputError::SchemeMismatch),
    }
  }
}

impl<M: Clone + Serialize> Render<DetectionRecord<M>, RevisedRecord<M>> for OutputWrapper {
  type Error = OutputError;

  fn render_result(
    &self,
    input: &DetectionRecord<M>,
    result: &RevisedRecord<M>,
  ) -> Result<(), Self::Error> {
    match self {
      OutputWrapper::JsonLinesOutput(output) => output
        .render_result(input, result)
        .map_err(OutputError::from),
      OutputWrapper::RecordOutput(output) => output
        .render_result(input, result)
        .map_err(OutputError::from),
      OutputWrapper::SummaryOutput(output) => {
        output.render_result(input, result).map_err(|e| match e {})
      }
    }
  }

  fn finish(&self) -> Result<(), Self::Error> {
    match self {
      OutputWrapper::JsonLinesOutput(output) => {
        Render::<DetectionRecord<M>, RevisedRecord<M>>::finish(output).map_err(OutputError::from)
      }
      OutputWrapper::RecordOutput(output) => {
        Render::<DetectionRecord<M>, RevisedRecord<M>>::finish(output).map_err(OutputError::from)
      }
      OutputWrapper::SummaryOutput(output) => {
        Render::<DetectionRecord<M>, RevisedRecord<M>>::finish(output).map_err(|e| match e {})
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use rstest::rstest;

  #[rstest]
  #[case("summary:", true)]
  #[case("image:///tmp/out.png", false)]
  fn wrapper_dispatches_on_scheme(#[case] url: &str, #[case] ok: bool) {
    let url = Url::parse(url).expect("url");
    assert_eq!(OutputWrapper::from_url(&url).is_ok(), ok);
  }

  #[rstest]
  fn wrapper_opens_files() {
    let dir = tempfile::tempdir().expect("tempdir");
    let jsonl = Url::parse(&format!("jsonl://{}/out.jsonl", dir.path().display())).expect("url");
    assert!(matches!(
      OutputWrapper::from_url(&jsonl),
      Ok(OutputWrapper::JsonLinesOutput(_))
    ));
    let record = Url::parse(&format!("record://{}/out.txt", dir.path().display())).expect("url");
    assert!(matches!(
      OutputWrapper::from_url(&record),
      Ok(OutputWrapper::RecordOutput(_))
    ));
  }
}
