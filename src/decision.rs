// 该文件是 Yuwai （域外） 项目的一部分。
// src/decision.rs - 阈值判定与标签分配
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
use std::fmt;
use std::marker::PhantomData;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::detection::{DetectionRecord, RevisedInstance, RevisedRecord};
use crate::model::{ClassId, Model, ModelTable};
use crate::openmax::{OpenMaxScores, RecalibrateError, Recalibrator};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Label {
  Known(ClassId),
  Unknown,
}

impl Label {
  /// 重新分组后的箱子序号：已知类别 c 为 c，未知为 K
  pub fn bin(self, known_classes: usize) -> usize {
    match self {
      Label::Known(class) => class.index(),
      Label::Unknown => known_classes,
    }
  }
}

impl fmt::Display for Label {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Label::Known(class) => write!(f, "{}", class),
      Label::Unknown => write!(f, "unknown"),
    }
  }
}

/// 被判为未知的原因
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RejectReason {
  /// 最高已知类别得分低于阈值
  BelowThreshold,
  /// 未知类别得分高于所有已知类别
  UnknownDominant,
  /// 胜出的已知类别没有拟合模型
  UnfittedClass { class: ClassId },
  /// 重校准失败
  QueryError { message: String },
}

/// 单个实例的最终判定
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Assignment {
  pub label: Label,
  /// 支撑该判定的校准得分；重校准失败时为空
  pub score: Option<f64>,
  pub reason: Option<RejectReason>,
}

impl Assignment {
  pub fn known(class: ClassId, score: f64) -> Self {
    Self {
      label: Label::Known(class),
      score: Some(score),
      reason: None,
    }
  }

  pub fn unknown(score: f64, reason: RejectReason) -> Self {
    Self {
      label: Label::Unknown,
      score: Some(score),
      reason: Some(reason),
    }
  }

  pub fn failed(err: &RecalibrateError) -> Self {
    Self {
      label: Label::Unknown,
      score: None,
      reason: Some(RejectReason::QueryError {
        message: err.to_string(),
      }),
    }
  }

  pub fn is_failed(&self) -> bool {
    matches!(self.reason, Some(RejectReason::QueryError { .. }))
  }
}

/// 按阈值把修正后的得分映射为标签
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Thresholder {
  threshold: f64,
}

impl Thresholder {
  pub fn new(threshold: f64) -> Self {
    Self { threshold }
  }

  pub fn threshold(&self) -> f64 {
    self.threshold
  }

  /// 判定规则：
  /// 1. 未知得分严格高于最高已知得分时判为未知；
  /// 2. 胜出的已知类别未拟合时判为未知；
  /// 3. 最高已知得分不低于阈值（含等于）时判为该类别，否则为未知。
  pub fn assign(&self, scores: &OpenMaxScores, table: &ModelTable) -> Assignment {
    let (best, best_score) = scores.top_known();
    if scores.unknown() > best_score {
      return Assignment::unknown(scores.unknown(), RejectReason::UnknownDominant);
    }
    if table.fitted(best).is_none() {
      return Assignment::unknown(best_score, RejectReason::UnfittedClass { class: best });
    }
    if best_score >= self.threshold {
      Assignment::known(best, best_score)
    } else {
      Assignment::unknown(best_score, RejectReason::BelowThreshold)
    }
  }
}

/// 重校准 + 阈值判定，`M` 为检测结果中掩码的类型
#[derive(Debug, Clone)]
pub struct OpenSetClassifier<M> {
  recalibrator: Recalibrator,
  thresholder: Thresholder,
  _phantom: PhantomData<M>,
}

impl<M: Clone> OpenSetClassifier<M> {
  pub fn new(recalibrator: Recalibrator, thresholder: Thresholder) -> Self {
    Self {
      recalibrator,
      thresholder,
      _phantom: PhantomData,
    }
  }

  pub fn recalibrator(&self) -> &Recalibrator {
    &self.recalibrator
  }

  pub fn known_classes(&self) -> usize {
    self.recalibrator.config().known_classes
  }

  /// 单个实例的判定；重校准失败时判为未知并带上错误标记，不会中断批处理
  pub fn classify(&self, activation: &[f64]) -> Assignment {
    match self.recalibrator.recalibrate(activation) {
      Ok(scores) => self.thresholder.assign(&scores, self.recalibrator.table()),
      Err(e) => {
        warn!("重校准失败，判为未知: {}", e);
        Assignment::failed(&e)
      }
    }
  }

  pub fn revise(&self, record: &DetectionRecord<M>) -> RevisedRecord<M> {
    let instances = record
      .instances()
      .iter()
      .map(|instance| RevisedInstance {
        assignment: self.classify(&instance.activation),
        instance: instance.clone(),
      })
      .collect();
    RevisedRecord::new(record.image(), self.known_classes(), instances)
  }
}

impl<M: Clone> Model for OpenSetClassifier<M> {
  type Input = DetectionRecord<M>;
  type Output = RevisedRecord<M>;
  type Error = Infallible;

  fn infer(&self, input: &Self::Input) -> Result<Self::Output, Self::Error> {
    Ok(self.revise(input))
  }
}
