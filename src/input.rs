// 该文件是 Yuwai （域外） 项目的一部分。
// src/input.rs - 检测结果与训练样本输入
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
use std::io::{BufRead, BufReader, Lines};
use std::marker::PhantomData;
use std::path::Path;

use serde::de::DeserializeOwned;
use thiserror::Error;
use tracing::{error, info};
use url::Url;

use crate::detection::{DetectionError, DetectionRecord, GroupedDetections};
use crate::{FromUrl, FromUrlWithScheme};

#[derive(Error, Debug)]
pub enum InputError {
  #[error("URI 方案不匹配")]
  SchemeMismatch,
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("第 {line} 行解析失败: {source}")]
  ParseError {
    line: u64,
    #[source]
    source: serde_json::Error,
  },
  #[error("第 {line} 行检测结果无效: {source}")]
  DetectionError {
    line: u64,
    #[source]
    source: DetectionError,
  },
}

/// JSON Lines 文件输入，每个非空行反序列化为一个 `T`
pub struct JsonLinesInput<T> {
  lines: Lines<BufReader<File>>,
  line: u64,
  _phantom: PhantomData<T>,
}

impl<T> JsonLinesInput<T> {
  pub fn open(path: &Path) -> Result<Self, InputError> {
    info!("打开输入文件: {}", path.display());
    let file = File::open(path)?;
    Ok(Self {
      lines: BufReader::new(file).lines(),
      line: 0,
      _phantom: PhantomData,
    })
  }
}

impl<T> FromUrlWithScheme for JsonLinesInput<T> {
  const SCHEME: &'static str = "jsonl";
}

impl<T> FromUrl for JsonLinesInput<T> {
  type Error = InputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      error!(
        "URI scheme mismatch: expected '{}', found '{}'",
        Self::SCHEME,
        url.scheme()
      );
      return Err(InputError::SchemeMismatch);
    }
    Self::open(Path::new(url.path()))
  }
}

impl<T: DeserializeOwned> JsonLinesInput<T> {
  /// 读取下一行，返回 (行号, 内容)
  fn next_line(&mut self) -> Option<Result<(u64, T), InputError>> {
    loop {
      let text = match self.lines.next()? {
        Ok(text) => text,
        Err(e) => return Some(Err(e.into())),
      };
      self.line += 1;
      if text.trim().is_empty() {
        continue;
      }
      let line = self.line;
      return Some(
        serde_json::from_str(&text)
          .map(|value| (line, value))
          .map_err(|source| InputError::ParseError { line, source }),
      );
    }
  }
}

impl<M> JsonLinesInput<GroupedDetections<M>> {
  /// 把每行的分组检测结果展开为 `DetectionRecord`，图片序号从 0 开始
  pub fn into_records(self) -> DetectionRecords<M> {
    DetectionRecords {
      inner: self,
      image: 0,
    }
  }
}

impl<T: DeserializeOwned> Iterator for JsonLinesInput<T> {
  type Item = Result<T, InputError>;

  fn next(&mut self) -> Option<Self::Item> {
    self.next_line().map(|r| r.map(|(_, value)| value))
  }
}

pub struct DetectionRecords<M> {
  inner: JsonLinesInput<GroupedDetections<M>>,
  image: u64,
}

impl<M: DeserializeOwned> Iterator for DetectionRecords<M> {
  type Item = Result<DetectionRecord<M>, InputError>;

  fn next(&mut self) -> Option<Self::Item> {
    let (line, grouped) = match self.inner.next_line()? {
      Ok(value) => value,
      Err(e) => return Some(Err(e)),
    };
    let image = self.image;
    self.image += 1;
    Some(
      grouped
        .into_record(image)
        .map_err(|source| InputError::DetectionError { line, source }),
    )
  }
}
