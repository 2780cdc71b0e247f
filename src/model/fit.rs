// 该文件是 Yuwai （域外） 项目的一部分。
// src/model/fit.rs - 尾部模型拟合
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

use std::collections::BTreeMap;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::activation::{ActivationVector, DistanceError, DistanceMetric};
use crate::model::{ClassId, ClassModel, ModelTable, TailModel};
use crate::openmax::rank_classes;
use crate::weibull::{Weibull, WeibullError};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum FitError {
  #[error("类别 {0} 没有被正确分类的训练样本")]
  InsufficientData(ClassId),
  #[error("类别 {class} 的 Weibull 拟合失败: {source}")]
  Convergence {
    class: ClassId,
    #[source]
    source: WeibullError,
  },
  #[error("类别 {class} 的训练样本无效: {source}")]
  InvalidSample {
    class: ClassId,
    #[source]
    source: DistanceError,
  },
  #[error("类别 {class} 超出已知类别数 {known_classes}")]
  UnknownClass { class: ClassId, known_classes: usize },
  #[error("尾部长度必须大于 0")]
  ZeroTailsize,
  #[error("已知类别数 {0} 超出类别编号范围")]
  TooManyClasses(usize),
}

impl FitError {
  pub fn class(&self) -> Option<ClassId> {
    match self {
      FitError::InsufficientData(class) => Some(*class),
      FitError::Convergence { class, .. }
      | FitError::InvalidSample { class, .. }
      | FitError::UnknownClass { class, .. } => Some(*class),
      FitError::ZeroTailsize | FitError::TooManyClasses(_) => None,
    }
  }
}

/// 单个类别拟合失败时的处理方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FitFailurePolicy {
  /// 任一类别失败即中止整个拟合
  #[default]
  Abort,
  /// 将失败类别记录为未拟合，推理时该类别的样本视为未知候选
  MarkUnfitted,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FitConfig {
  pub known_classes: usize,
  pub tailsize: usize,
  pub metric: DistanceMetric,
  pub on_failure: FitFailurePolicy,
}

/// 带标签的训练样本
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingSample {
  pub label: ClassId,
  pub activation: ActivationVector,
}

impl TrainingSample {
  /// 前 K 个得分的最大值是否落在标签上
  pub fn is_correct(&self, known_classes: usize) -> bool {
    known_classes > 0
      && self.activation.dim() >= known_classes
      && rank_classes(&self.activation[..known_classes]).first() == Some(&self.label)
  }
}

pub struct TailFitter {
  config: FitConfig,
}

impl TailFitter {
  pub fn new(config: FitConfig) -> Result<Self, FitError> {
    if config.tailsize == 0 {
      return Err(FitError::ZeroTailsize);
    }
    if config.known_classes > 0 && ClassId::try_from(config.known_classes - 1).is_err() {
      return Err(FitError::TooManyClasses(config.known_classes));
    }
    Ok(Self { config })
  }

  pub fn config(&self) -> &FitConfig {
    &self.config
  }

  /// 从带标签的训练样本拟合：先筛选正确分类的样本，再按类别分组
  pub fn fit_samples<'a, I>(&self, samples: I) -> Result<ModelTable, FitError>
  where
    I: IntoIterator<Item = &'a TrainingSample>,
  {
    let known = self.config.known_classes;
    let mut groups: BTreeMap<ClassId, Vec<ActivationVector>> =
      (0..known).map_while(|c| ClassId::try_from(c).ok()).map(|c| (c, Vec::new())).collect();
    let (mut total, mut kept) = (0usize, 0usize);
    for sample in samples {
      total += 1;
      if sample.label.index() >= known {
        return Err(FitError::UnknownClass {
          class: sample.label,
          known_classes: known,
        });
      }
      if sample.is_correct(known) {
        kept += 1;
        if let Some(group) = groups.get_mut(&sample.label) {
          group.push(sample.activation.clone());
        }
      }
    }
    info!("训练样本 {} 个，其中正确分类 {} 个", total, kept);
    self.fit_classes(&groups)
  }

  /// 对每个类别的正确分类激活向量拟合尾部模型
  pub fn fit_classes(
    &self,
    groups: &BTreeMap<ClassId, Vec<ActivationVector>>,
  ) -> Result<ModelTable, FitError> {
    let mut classes = BTreeMap::new();
    for (&class, activations) in groups {
      match self.fit_class(class, activations) {
        Ok(model) => {
          info!(
            "类别 {}: 尾部 {} 个, shape = {:.4}, scale = {:.4}",
            class,
            model.tail_len(),
            model.shape(),
            model.scale()
          );
          classes.insert(class, ClassModel::Fitted(model));
        }
        Err(e) => match self.config.on_failure {
          FitFailurePolicy::Abort => {
            error!("类别 {} 拟合失败，中止: {}", class, e);
            return Err(e);
          }
          FitFailurePolicy::MarkUnfitted => {
            warn!("类别 {} 拟合失败，记录为未拟合: {}", class, e);
            classes.insert(class, ClassModel::Unfitted {
              reason: e.to_string(),
            });
          }
        },
      }
    }
    Ok(ModelTable::new(classes, self.config.tailsize, Utc::now()))
  }

  pub fn fit_class(&self, class: ClassId, activations: &[ActivationVector]) -> Result<TailModel, FitError> {
    let invalid = |source| FitError::InvalidSample { class, source };
    if activations.is_empty() {
      return Err(FitError::InsufficientData(class));
    }
    let metric = self.config.metric;
    let mean = ActivationVector::mean_of(activations).map_err(invalid)?;
    let mut distances = activations
      .iter()
      .map(|a| metric.distance(a, &mean))
      .collect::<Result<Vec<f64>, _>>()
      .map_err(invalid)?;

    // 与均值重合的样本距离为 0，不属于尾部，Weibull 也无法拟合
    let total = distances.len();
    distances.retain(|d| *d > 0.0);
    if distances.len() < total {
      warn!(
        "类别 {} 有 {} 个样本与均值重合，已从尾部中剔除",
        class,
        total - distances.len()
      );
    }

    // 降序排列后取最大的 tailsize 个
    distances.sort_by(|a, b| b.total_cmp(a));
    if distances.len() < self.config.tailsize {
      warn!(
        "类别 {} 仅有 {} 个样本，少于尾部长度 {}，使用全部样本（降级拟合）",
        class,
        distances.len(),
        self.config.tailsize
      );
    }
    distances.truncate(self.config.tailsize);
    debug!("类别 {} 尾部距离: {:?}", class, distances);

    let weibull = Weibull::fit_mle(&distances).map_err(|source| FitError::Convergence { class, source })?;
    Ok(TailModel::new(weibull, mean, metric, distances.len()))
  }
}
