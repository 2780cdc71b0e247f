// 该文件是 Yuwai （域外） 项目的一部分。
// src/config.rs - 开集识别参数配置
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

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::activation::DistanceMetric;
use crate::decision::Thresholder;
use crate::model::{FitConfig, FitFailurePolicy};
use crate::openmax::{OpenMaxConfig, RankWeighting};

#[derive(Error, Debug)]
pub enum ConfigError {
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("配置解析错误: {0}")]
  JsonError(#[from] serde_json::Error),
  #[error("已知类别数必须大于 0")]
  NoKnownClasses,
  #[error("尾部长度必须大于 0")]
  ZeroTailsize,
  #[error("alpha ({alpha}) 不能超过已知类别数 ({known_classes})")]
  AlphaTooLarge { alpha: usize, known_classes: usize },
  #[error("阈值必须在 [0, 1] 之间: {0}")]
  ThresholdOutOfRange(f64),
  #[error("eucos 距离的欧氏权重必须为非负有限值: {0}")]
  InvalidEuWeight(f64),
}

/// 拟合与推理共用的参数
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct OpenSetConfig {
  /// 已知类别数 K
  pub known_classes: usize,
  /// 每个类别参与拟合的最大距离个数
  pub tailsize: usize,
  /// 参与修正的前 alpha 个类别
  pub alpha: usize,
  pub metric: DistanceMetric,
  /// 已知类别的最低得分
  pub threshold: f64,
  pub weighting: RankWeighting,
  pub on_fit_failure: FitFailurePolicy,
}

impl Default for OpenSetConfig {
  fn default() -> Self {
    Self {
      known_classes: 50,
      tailsize: 20,
      alpha: 10,
      metric: DistanceMetric::Euclidean,
      threshold: 0.1,
      weighting: RankWeighting::Linear,
      on_fit_failure: FitFailurePolicy::Abort,
    }
  }
}

impl OpenSetConfig {
  pub fn load(path: &Path) -> Result<Self, ConfigError> {
    let text = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&text)?)
  }

  /// 检查各参数的取值范围
  #[must_use = "Validation should not be ignored"]
  pub fn validate(self) -> Result<Self, ConfigError> {
    if self.known_classes == 0 {
      return Err(ConfigError::NoKnownClasses);
    }
    if self.tailsize == 0 {
      return Err(ConfigError::ZeroTailsize);
    }
    if self.alpha > self.known_classes {
      return Err(ConfigError::AlphaTooLarge {
        alpha: self.alpha,
        known_classes: self.known_classes,
      });
    }
    if !(0.0..=1.0).contains(&self.threshold) {
      return Err(ConfigError::ThresholdOutOfRange(self.threshold));
    }
    if let DistanceMetric::EuCos { eu_weight } = self.metric {
      if !(eu_weight.is_finite() && eu_weight >= 0.0) {
        return Err(ConfigError::InvalidEuWeight(eu_weight));
      }
    }
    Ok(self)
  }

  pub fn fit_config(&self) -> FitConfig {
    FitConfig {
      known_classes: self.known_classes,
      tailsize: self.tailsize,
      metric: self.metric,
      on_failure: self.on_fit_failure,
    }
  }

  pub fn openmax_config(&self) -> OpenMaxConfig {
    OpenMaxConfig {
      known_classes: self.known_classes,
      alpha: self.alpha,
      metric: self.metric,
      weighting: self.weighting,
    }
  }

  pub fn thresholder(&self) -> Thresholder {
    Thresholder::new(self.threshold)
  }
}
