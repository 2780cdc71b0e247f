// 该文件是 Yuwai （域外） 项目的一部分。
// src/args.rs - 命令行参数与配置文件合并
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

use std::path::PathBuf;

use clap::{Args, ValueEnum};
use tracing::info;

use crate::activation::DistanceMetric;
use crate::config::{ConfigError, OpenSetConfig};
use crate::model::FitFailurePolicy;
use crate::openmax::RankWeighting;

/// eucos 距离未指定权重时使用的欧氏权重
pub const DEFAULT_EU_WEIGHT: f64 = 0.5;

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricKind {
  Euclidean,
  Cosine,
  Eucos,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum WeightingKind {
  Linear,
  Uniform,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailurePolicyKind {
  Abort,
  MarkUnfitted,
}

/// 两个程序共用的开集参数，命令行中给出的值覆盖配置文件
#[derive(Args, Debug, Clone, Default)]
pub struct OpenSetArgs {
  /// JSON 配置文件
  #[arg(long, value_name = "FILE")]
  pub config: Option<PathBuf>,

  /// 已知类别数 K
  #[arg(long, value_name = "K")]
  pub known_classes: Option<usize>,

  /// 每个类别参与拟合的最大距离个数
  #[arg(long, value_name = "N")]
  pub tailsize: Option<usize>,

  /// 参与修正的前 alpha 个类别
  #[arg(long, value_name = "N")]
  pub alpha: Option<usize>,

  /// 距离度量
  #[arg(long, value_enum)]
  pub metric: Option<MetricKind>,

  /// eucos 距离的欧氏权重
  #[arg(long, value_name = "WEIGHT")]
  pub eu_weight: Option<f64>,

  /// 已知类别的最低得分 (0.0 - 1.0)
  #[arg(long, value_name = "THRESHOLD")]
  pub threshold: Option<f64>,

  /// 排名权重
  #[arg(long, value_enum)]
  pub weighting: Option<WeightingKind>,

  /// 类别拟合失败时的处理方式
  #[arg(long, value_enum)]
  pub on_fit_failure: Option<FailurePolicyKind>,
}

impl OpenSetArgs {
  /// 读取配置文件（若有），叠加命令行参数后校验
  pub fn resolve(&self) -> Result<OpenSetConfig, ConfigError> {
    let mut config = match &self.config {
      Some(path) => {
        info!("读取配置文件: {}", path.display());
        OpenSetConfig::load(path)?
      }
      None => OpenSetConfig::default(),
    };

    if let Some(k) = self.known_classes {
      config.known_classes = k;
    }
    if let Some(n) = self.tailsize {
      config.tailsize = n;
    }
    if let Some(alpha) = self.alpha {
      config.alpha = alpha;
    }
    if let Some(threshold) = self.threshold {
      config.threshold = threshold;
    }
    config.metric = match (self.metric, self.eu_weight) {
      (Some(MetricKind::Euclidean), _) => DistanceMetric::Euclidean,
      (Some(MetricKind::Cosine), _) => DistanceMetric::Cosine,
      (Some(MetricKind::Eucos), weight) => DistanceMetric::EuCos {
        eu_weight: weight.unwrap_or(DEFAULT_EU_WEIGHT),
      },
      // 只给权重时沿用配置中的 eucos
      (None, Some(eu_weight)) => match config.metric {
        DistanceMetric::EuCos { .. } => DistanceMetric::EuCos { eu_weight },
        other => other,
      },
      (None, None) => config.metric,
    };
    if let Some(weighting) = self.weighting {
      config.weighting = match weighting {
        WeightingKind::Linear => RankWeighting::Linear,
        WeightingKind::Uniform => RankWeighting::Uniform,
      };
    }
    if let Some(policy) = self.on_fit_failure {
      config.on_fit_failure = match policy {
        FailurePolicyKind::Abort => FitFailurePolicy::Abort,
        FailurePolicyKind::MarkUnfitted => FitFailurePolicy::MarkUnfitted,
      };
    }

    config.validate()
  }
}
