// 该文件是 Yuwai （域外） 项目的一部分。
// src/output/summary.rs - 重新分组前后的数量统计
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

use std::convert::Infallible;
use std::sync::Mutex;

use tracing::info;

use crate::FromUrlWithScheme;
use crate::detection::{DetectionRecord, RevisedRecord};
use crate::output::Render;

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SummaryCounts {
  pub images: usize,
  /// 上游检测器给出的每类数量
  pub original: Vec<usize>,
  /// 重新分组后的每类数量，最后一项为未知
  pub revised: Vec<usize>,
}

fn accumulate(total: &mut Vec<usize>, counts: &[usize]) {
  if total.len() < counts.len() {
    total.resize(counts.len(), 0);
  }
  for (t, c) in total.iter_mut().zip(counts) {
    *t += c;
  }
}

/// 只写日志，不产生文件；`summary:` 地址
#[derive(Debug, Default)]
pub struct SummaryOutput {
  counts: Mutex<SummaryCounts>,
}

impl SummaryOutput {
  pub fn counts(&self) -> SummaryCounts {
    self.counts.lock().unwrap_or_else(|e| e.into_inner()).clone()
  }
}

impl FromUrlWithScheme for SummaryOutput {
  const SCHEME: &'static str = "summary";
}

impl crate::FromUrl for SummaryOutput {
  type Error = Infallible;

  fn from_url(_url: &url::Url) -> Result<Self, Self::Error> {
    Ok(Self::default())
  }
}

impl<M> Render<DetectionRecord<M>, RevisedRecord<M>> for SummaryOutput {
  type Error = Infallible;

  fn render_result(
    &self,
    input: &DetectionRecord<M>,
    result: &RevisedRecord<M>,
  ) -> Result<(), Self::Error> {
    let original = input.counts(result.known_classes());
    let revised = result.counts();
    info!(
      "图片 {}: 原始 {:?} -> 修正 {:?}",
      result.image(),
      original,
      revised
    );

    let mut counts = self.counts.lock().unwrap_or_else(|e| e.into_inner());
    counts.images += 1;
    accumulate(&mut counts.original, &original);
    accumulate(&mut counts.revised, &revised);
    Ok(())
  }

  fn finish(&self) -> Result<(), Self::Error> {
    let counts = self.counts();
    info!("共处理 {} 张图片", counts.images);
    for (class, n) in counts.original.iter().enumerate() {
      let after = counts.revised.get(class).copied().unwrap_or(0);
      info!("类别 {}: {} -> {}", class, n, after);
    }
    if let Some(unknown) = counts.revised.get(counts.original.len()) {
      info!("未知: {}", unknown);
    }
    Ok(())
  }
}
