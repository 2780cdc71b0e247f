// 该文件是 Yuwai （域外） 项目的一部分。
// src/openmax.rs - OpenMax 得分重校准
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

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, error};

use crate::activation::{ActivationVector, DistanceMetric};
use crate::model::{ClassId, Model, ModelTable};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum RecalibrateError {
  #[error("查询向量无效: {0}")]
  InvalidQuery(String),
  #[error("类别 {class} 使用 {fitted} 距离拟合，但请求的是 {requested} 距离")]
  MetricMismatch {
    class: ClassId,
    fitted: &'static str,
    requested: &'static str,
  },
  #[error("已知类别数必须大于 0")]
  NoKnownClasses,
  #[error("模型表的类别与已知类别数 {known_classes} 不符: {found:?}")]
  TableClassMismatch {
    known_classes: usize,
    found: Vec<ClassId>,
  },
}

/// 排名权重方案，rank 从 1 开始
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RankWeighting {
  /// `(alpha - rank + 1) / alpha`
  #[default]
  Linear,
  /// 前 alpha 个类别权重均为 1
  Uniform,
}

impl RankWeighting {
  pub fn weight(self, rank: usize, alpha: usize) -> f64 {
    if rank == 0 || rank > alpha {
      return 0.0;
    }
    match self {
      RankWeighting::Linear => (alpha - rank + 1) as f64 / alpha as f64,
      RankWeighting::Uniform => 1.0,
    }
  }
}

#[derive(Debug, Clone, PartialEq)]
pub struct OpenMaxConfig {
  pub known_classes: usize,
  pub alpha: usize,
  pub metric: DistanceMetric,
  pub weighting: RankWeighting,
}

/// 按原始得分降序排列类别编号，得分相同时编号小的在前
pub fn rank_classes(scores: &[f64]) -> Vec<ClassId> {
  let mut order: Vec<u32> = (0u32..).zip(scores).map(|(i, _)| i).collect();
  // sort_by 是稳定排序，相同得分保持升序
  order.sort_by(|&a, &b| scores[b as usize].total_cmp(&scores[a as usize]));
  order.into_iter().map(ClassId).collect()
}

/// 数值稳定的 softmax
pub fn softmax(scores: &[f64]) -> Box<[f64]> {
  let max = scores.iter().copied().fold(f64::NEG_INFINITY, f64::max);
  let exps: Vec<f64> = scores.iter().map(|s| (s - max).exp()).collect();
  let sum: f64 = exps.iter().sum();
  exps.into_iter().map(|e| e / sum).collect()
}

/// 一次重校准的结果
#[derive(Debug, Clone, PartialEq)]
pub struct OpenMaxScores {
  /// K 个已知类别 + 1 个未知类别，和为 1
  revised: Box<[f64]>,
  /// 前 K 个原始激活值
  raw: Box<[f64]>,
}

impl OpenMaxScores {
  pub fn revised(&self) -> &[f64] {
    &self.revised
  }

  pub fn known(&self) -> &[f64] {
    &self.revised[..self.raw.len()]
  }

  pub fn unknown(&self) -> f64 {
    self.revised[self.raw.len()]
  }

  pub fn raw(&self) -> &[f64] {
    &self.raw
  }

  /// 未经修正的闭集概率，用于对比
  pub fn closed_set(&self) -> Box<[f64]> {
    softmax(&self.raw)
  }

  /// 修正后得分最高的已知类别，得分相同取编号小者
  pub fn top_known(&self) -> (ClassId, f64) {
    let mut best = (ClassId(0), f64::NEG_INFINITY);
    for (class, &s) in (0u32..).zip(self.known()) {
      if s > best.1 {
        best = (ClassId(class), s);
      }
    }
    best
  }
}

/// OpenMax 重校准器
///
/// 持有只读的模型表，可在多个线程间共享；每次查询互不影响。
#[derive(Debug, Clone)]
pub struct Recalibrator {
  table: Arc<ModelTable>,
  config: OpenMaxConfig,
}

impl Recalibrator {
  /// 创建重校准器，所有已拟合模型的距离度量必须与配置一致
  pub fn new(table: Arc<ModelTable>, mut config: OpenMaxConfig) -> Result<Self, RecalibrateError> {
    if config.known_classes == 0 {
      return Err(RecalibrateError::NoKnownClasses);
    }
    // 模型表必须恰好覆盖 0..K，未拟合的类别也要显式记录
    let covered = table.len() == config.known_classes
      && table.iter().enumerate().all(|(i, (class, _))| class.index() == i);
    if !covered {
      let found: Vec<ClassId> = table.iter().map(|(class, _)| class).collect();
      error!("模型表包含 {} 个类别，配置的已知类别数为 {}", found.len(), config.known_classes);
      return Err(RecalibrateError::TableClassMismatch {
        known_classes: config.known_classes,
        found,
      });
    }
    let fitted = table.iter().filter_map(|(c, m)| m.as_fitted().map(|m| (c, m)));
    for (class, model) in fitted {
      if model.metric() != config.metric {
        error!("类别 {} 的距离度量与配置不一致", class);
        return Err(RecalibrateError::MetricMismatch {
          class,
          fitted: model.metric().name(),
          requested: config.metric.name(),
        });
      }
    }
    config.alpha = config.alpha.min(config.known_classes);
    Ok(Self { table, config })
  }

  pub fn table(&self) -> &ModelTable {
    &self.table
  }

  pub fn config(&self) -> &OpenMaxConfig {
    &self.config
  }

  /// 修正 K 个已知类别的得分并给出未知得分，返回 K + 1 维 softmax
  ///
  /// 类别 c 的修正得分为 `s_c * (1 - w_c)`，未知得分为 `Σ s_c * w_c`，
  /// 其中 `w_c` 为排名权重乘以 Weibull CDF。
  /// 单调性只在原始得分非负时成立：远离类别均值时该类得分不增、未知得分不减。
  /// 原始得分为负时 CDF 增大反而会抬高该类得分、压低未知得分。
  pub fn recalibrate(&self, query: &[f64]) -> Result<OpenMaxScores, RecalibrateError> {
    let known = self.config.known_classes;
    if query.is_empty() {
      return Err(RecalibrateError::InvalidQuery("激活向量为空".into()));
    }
    if query.len() < known {
      return Err(RecalibrateError::InvalidQuery(format!(
        "激活向量维度 {} 小于已知类别数 {}",
        query.len(),
        known
      )));
    }
    if query.iter().any(|v| !v.is_finite()) {
      return Err(RecalibrateError::InvalidQuery("激活向量包含非有限值".into()));
    }

    let raw: Box<[f64]> = query[..known].into();
    let alpha = self.config.alpha;
    if alpha == 0 {
      let mut revised = softmax(&raw).into_vec();
      revised.push(0.0);
      return Ok(OpenMaxScores {
        revised: revised.into_boxed_slice(),
        raw,
      });
    }

    let mut weights = vec![0.0; known];
    for (i, class) in rank_classes(&raw).into_iter().take(alpha).enumerate() {
      let cdf = match self.table.fitted(class) {
        Some(model) => model
          .outlier_probability(query)
          .map_err(|e| RecalibrateError::InvalidQuery(format!("类别 {}: {}", class, e)))?,
        // 未拟合的类别视为必然离群
        None => 1.0,
      };
      weights[class.index()] = self.config.weighting.weight(i + 1, alpha) * cdf;
    }

    let mut scores: Vec<f64> = raw.iter().zip(&weights).map(|(s, w)| s * (1.0 - w)).collect();
    let unknown: f64 = raw.iter().zip(&weights).map(|(s, w)| s * w).sum();
    scores.push(unknown);
    debug!("修正权重: {:?}, 未知得分: {}", weights, unknown);

    Ok(OpenMaxScores {
      revised: softmax(&scores),
      raw,
    })
  }
}

impl Model for Recalibrator {
  type Input = ActivationVector;
  type Output = OpenMaxScores;
  type Error = RecalibrateError;

  fn infer(&self, input: &Self::Input) -> Result<Self::Output, Self::Error> {
    self.recalibrate(input)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::model::{ClassModel, TailModel};
  use crate::weibull::Weibull;
  use chrono::Utc;
  use proptest::prelude::*;
  use rstest::{fixture, rstest};
  use std::collections::BTreeMap;

  const SIMPLEX_TOL: f64 = 1e-6;

  fn fitted(mean: Vec<f64>, metric: DistanceMetric) -> ClassModel {
    ClassModel::Fitted(TailModel::new(
      Weibull::new(2.0, 1.0).expect("weibull"),
      mean.into(),
      metric,
      5,
    ))
  }

  /// 三个类别的均值分别偏向各自的坐标轴；`extra` 追加不参与打分的维度
  fn three_classes(extra: usize) -> Arc<ModelTable> {
    let mean = |axis: usize| {
      let mut m = vec![1.0; 3 + extra];
      m[3..].iter_mut().for_each(|v| *v = 0.0);
      m[axis] = 5.0;
      m
    };
    let mut classes = BTreeMap::new();
    for axis in 0..3 {
      classes.insert(ClassId::try_from(axis).expect("class"), fitted(mean(axis), DistanceMetric::Euclidean));
    }
    Arc::new(ModelTable::new(classes, 5, Utc::now()))
  }

  #[fixture]
  fn table() -> Arc<ModelTable> {
    three_classes(0)
  }

  fn config(alpha: usize) -> OpenMaxConfig {
    OpenMaxConfig {
      known_classes: 3,
      alpha,
      metric: DistanceMetric::Euclidean,
      weighting: RankWeighting::Linear,
    }
  }

  fn assert_simplex(scores: &[f64]) {
    assert!(scores.iter().all(|s| (0.0..=1.0).contains(s)), "{scores:?}");
    assert!((scores.iter().sum::<f64>() - 1.0).abs() < SIMPLEX_TOL, "{scores:?}");
  }

  #[rstest]
  #[case(RankWeighting::Linear, 1, 3, 1.0)]
  #[case(RankWeighting::Linear, 2, 3, 2.0 / 3.0)]
  #[case(RankWeighting::Linear, 3, 3, 1.0 / 3.0)]
  #[case(RankWeighting::Linear, 4, 3, 0.0)]
  #[case(RankWeighting::Uniform, 3, 3, 1.0)]
  #[case(RankWeighting::Uniform, 4, 3, 0.0)]
  fn rank_weights(#[case] w: RankWeighting, #[case] rank: usize, #[case] alpha: usize, #[case] expected: f64) {
    assert!((w.weight(rank, alpha) - expected).abs() < 1e-12);
  }

  #[rstest]
  fn ranking_breaks_ties_by_index() {
    let order = rank_classes(&[1.0, 3.0, 3.0, 0.5]);
    assert_eq!(order, vec![ClassId(1), ClassId(2), ClassId(0), ClassId(3)]);
  }

  #[rstest]
  fn near_query_stays_known(table: Arc<ModelTable>) {
    let r = Recalibrator::new(table, config(2)).expect("recalibrator");
    let scores = r.recalibrate(&[5.1, 1.0, 1.0]).expect("scores");
    assert_simplex(scores.revised());
    assert_eq!(scores.revised().len(), 4);
    assert_eq!(scores.top_known().0, ClassId(0));
    assert!(scores.top_known().1 > scores.unknown());
  }

  #[rstest]
  fn far_query_moves_mass_to_unknown(table: Arc<ModelTable>) {
    let r = Recalibrator::new(table, config(3)).expect("recalibrator");
    let scores = r.recalibrate(&[50.0, 40.0, 1.0]).expect("scores");
    assert_simplex(scores.revised());
    assert!(scores.unknown() > 0.99);
  }

  #[rstest]
  fn alpha_zero_is_plain_softmax(table: Arc<ModelTable>) {
    let r = Recalibrator::new(table, config(0)).expect("recalibrator");
    let query = [50.0, 40.0, 1.0];
    let scores = r.recalibrate(&query).expect("scores");
    let plain = softmax(&query);
    assert_eq!(scores.known(), &*plain);
    assert_eq!(scores.unknown(), 0.0);
    assert_eq!(scores.closed_set(), plain);
  }

  #[rstest]
  fn unfitted_class_counts_as_outlier() {
    let mut classes = BTreeMap::new();
    classes.insert(ClassId(0), ClassModel::Unfitted { reason: "x".into() });
    classes.insert(ClassId(1), fitted(vec![1.0, 4.0], DistanceMetric::Euclidean));
    let table = Arc::new(ModelTable::new(classes, 5, Utc::now()));
    let r = Recalibrator::new(table, OpenMaxConfig {
      known_classes: 2,
      ..config(1)
    })
    .expect("recalibrator");
    // 类别 0 的得分被全部转移到未知
    let scores = r.recalibrate(&[4.0, 1.0]).expect("scores");
    let pre = softmax(&[0.0, 1.0, 4.0]);
    assert!(scores.revised().iter().zip(pre.iter()).all(|(a, b)| (a - b).abs() < 1e-12));
  }

  #[rstest]
  #[case(vec![0], 3)]
  #[case(vec![0, 1, 2], 2)]
  #[case(vec![0, 1, 3], 3)]
  fn table_must_cover_known_classes(#[case] ids: Vec<u32>, #[case] known_classes: usize) {
    let classes: BTreeMap<_, _> = ids
      .iter()
      .map(|&c| (ClassId(c), fitted(vec![1.0; 3], DistanceMetric::Euclidean)))
      .collect();
    let table = Arc::new(ModelTable::new(classes, 5, Utc::now()));
    let err = Recalibrator::new(table, OpenMaxConfig {
      known_classes,
      ..config(1)
    })
    .expect_err("class mismatch");
    assert!(matches!(err, RecalibrateError::TableClassMismatch { .. }));
  }

  #[rstest]
  fn metric_mismatch_rejected(table: Arc<ModelTable>) {
    let mut cfg = config(2);
    cfg.metric = DistanceMetric::Cosine;
    let err = Recalibrator::new(table, cfg).expect_err("mismatch");
    assert!(matches!(err, RecalibrateError::MetricMismatch { class: ClassId(0), .. }));
  }

  #[rstest]
  #[case(&[])]
  #[case(&[1.0, 2.0])]
  #[case(&[1.0, f64::NAN, 2.0])]
  #[case(&[1.0, 2.0, f64::INFINITY])]
  fn invalid_queries(table: Arc<ModelTable>, #[case] query: &[f64]) {
    let r = Recalibrator::new(table, config(2)).expect("recalibrator");
    assert!(matches!(r.recalibrate(query), Err(RecalibrateError::InvalidQuery(_))));
  }

  #[rstest]
  fn query_dimension_must_match_means(table: Arc<ModelTable>) {
    let r = Recalibrator::new(table, config(2)).expect("recalibrator");
    assert!(matches!(
      r.recalibrate(&[5.0, 1.0, 1.0, 0.0]),
      Err(RecalibrateError::InvalidQuery(_))
    ));
  }

  proptest! {
    #[test]
    fn revised_scores_form_simplex(
      query in prop::collection::vec(-20.0f64..20.0, 3),
      alpha in 0usize..=3,
    ) {
      let r = Recalibrator::new(three_classes(0), config(alpha)).expect("recalibrator");
      let scores = r.recalibrate(&query).expect("scores");
      prop_assert_eq!(scores.revised().len(), 4);
      prop_assert!(scores.revised().iter().all(|s| (0.0..=1.0).contains(s)));
      prop_assert!((scores.revised().iter().sum::<f64>() - 1.0).abs() < SIMPLEX_TOL);
    }

    #[test]
    fn moving_away_from_top_class_never_helps_it(
      offset in 0.0f64..3.0,
      extra in 0.0f64..3.0,
    ) {
      // 原始得分不变，只沿第四维拉远与类别 0 均值的距离
      let r = Recalibrator::new(three_classes(1), config(1)).expect("recalibrator");
      let near = r.recalibrate(&[6.0, 1.0, 1.0, offset]).expect("near");
      let far = r.recalibrate(&[6.0, 1.0, 1.0, offset + extra]).expect("far");
      prop_assert_eq!(near.raw(), far.raw());
      prop_assert!(far.known()[0] <= near.known()[0] + 1e-12);
      prop_assert!(far.unknown() + 1e-12 >= near.unknown());
    }
  }
}
