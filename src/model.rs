// 该文件是 Yuwai （域外） 项目的一部分。
// src/model.rs - 尾部模型与模型表
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
use std::fmt;
use std::num::TryFromIntError;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::activation::{ActivationVector, DistanceError, DistanceMetric};
use crate::weibull::Weibull;

/// 推理模型：输入一个样本，输出一个结果
pub trait Model {
  type Input;
  type Output;
  type Error;

  fn infer(&self, input: &Self::Input) -> Result<Self::Output, Self::Error>;
}

/// 已知类别编号，从 0 开始；类别 c 的原始得分位于激活向量第 c 个元素
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClassId(pub u32);

impl ClassId {
  pub fn index(self) -> usize {
    self.0 as usize
  }
}

/// 编号超出 `u32` 范围时失败
impl TryFrom<usize> for ClassId {
  type Error = TryFromIntError;

  fn try_from(index: usize) -> Result<Self, Self::Error> {
    u32::try_from(index).map(ClassId)
  }
}

impl fmt::Display for ClassId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.0)
  }
}

/// 单个类别的 Weibull 尾部模型
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TailModel {
  #[serde(flatten)]
  weibull: Weibull,
  mean: ActivationVector,
  metric: DistanceMetric,
  /// 实际参与拟合的尾部长度，小于配置值时为降级拟合
  tail_len: usize,
}

impl TailModel {
  pub fn new(weibull: Weibull, mean: ActivationVector, metric: DistanceMetric, tail_len: usize) -> Self {
    Self {
      weibull,
      mean,
      metric,
      tail_len,
    }
  }

  pub fn weibull(&self) -> &Weibull {
    &self.weibull
  }

  pub fn shape(&self) -> f64 {
    self.weibull.shape()
  }

  pub fn scale(&self) -> f64 {
    self.weibull.scale()
  }

  pub fn mean(&self) -> &ActivationVector {
    &self.mean
  }

  pub fn metric(&self) -> DistanceMetric {
    self.metric
  }

  pub fn tail_len(&self) -> usize {
    self.tail_len
  }

  /// 查询向量到类均值的距离
  pub fn distance(&self, query: &[f64]) -> Result<f64, DistanceError> {
    self.metric.distance(query, &self.mean)
  }

  /// 查询向量属于该类尾部之外的概率
  pub fn outlier_probability(&self, query: &[f64]) -> Result<f64, DistanceError> {
    Ok(self.weibull.cdf(self.distance(query)?))
  }
}

/// 模型表中的一项：拟合成功，或记录为未拟合
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ClassModel {
  Fitted(TailModel),
  Unfitted { reason: String },
}

impl ClassModel {
  pub fn as_fitted(&self) -> Option<&TailModel> {
    match self {
      ClassModel::Fitted(model) => Some(model),
      ClassModel::Unfitted { .. } => None,
    }
  }
}

/// 类别编号到尾部模型的映射
///
/// 整体加载，推理期间只读；重新拟合时整体替换，不做原地修改。
#[derive(Debug, Clone, PartialEq)]
pub struct ModelTable {
  classes: BTreeMap<ClassId, ClassModel>,
  tailsize: usize,
  fitted_at: DateTime<Utc>,
}

impl ModelTable {
  pub fn new(classes: BTreeMap<ClassId, ClassModel>, tailsize: usize, fitted_at: DateTime<Utc>) -> Self {
    Self {
      classes,
      tailsize,
      fitted_at,
    }
  }

  pub fn get(&self, class: ClassId) -> Option<&ClassModel> {
    self.classes.get(&class)
  }

  /// 已拟合的模型；缺失或未拟合的类别返回 `None`
  pub fn fitted(&self, class: ClassId) -> Option<&TailModel> {
    self.get(class).and_then(ClassModel::as_fitted)
  }

  pub fn iter(&self) -> impl Iterator<Item = (ClassId, &ClassModel)> {
    self.classes.iter().map(|(c, m)| (*c, m))
  }

  pub fn len(&self) -> usize {
    self.classes.len()
  }

  pub fn is_empty(&self) -> bool {
    self.classes.is_empty()
  }

  pub fn tailsize(&self) -> usize {
    self.tailsize
  }

  pub fn fitted_at(&self) -> DateTime<Utc> {
    self.fitted_at
  }

  /// 所有已拟合类别中最大的尺度参数
  pub fn max_scale(&self) -> Option<f64> {
    self
      .classes
      .values()
      .filter_map(ClassModel::as_fitted)
      .map(TailModel::scale)
      .reduce(f64::max)
  }
}

pub mod fit;
pub mod store;

pub use self::fit::{FitConfig, FitError, FitFailurePolicy, TailFitter, TrainingSample};
pub use self::store::{ModelTableSource, StoreError};

#[cfg(test)]
mod tests {
  use super::*;
  use rstest::rstest;

  #[rstest]
  #[case(0, Some(ClassId(0)))]
  #[case(u32::MAX as usize, Some(ClassId(u32::MAX)))]
  fn class_id_from_index(#[case] index: usize, #[case] expected: Option<ClassId>) {
    assert_eq!(ClassId::try_from(index).ok(), expected);
  }

  #[rstest]
  #[cfg(target_pointer_width = "64")]
  fn class_id_rejects_index_beyond_u32() {
    assert!(ClassId::try_from(u32::MAX as usize + 1).is_err());
  }

  fn tail(scale: f64) -> ClassModel {
    ClassModel::Fitted(TailModel::new(
      Weibull::new(2.0, scale).expect("weibull"),
      vec![0.0, 0.0].into(),
      DistanceMetric::Euclidean,
      3,
    ))
  }

  #[rstest]
  fn table_lookup() {
    let mut classes = BTreeMap::new();
    classes.insert(ClassId(0), tail(1.0));
    classes.insert(ClassId(1), ClassModel::Unfitted { reason: "空".into() });
    classes.insert(ClassId(2), tail(3.0));
    let table = ModelTable::new(classes, 3, Utc::now());

    assert_eq!(table.len(), 3);
    assert!(table.fitted(ClassId(0)).is_some());
    assert!(table.fitted(ClassId(1)).is_none());
    assert!(table.get(ClassId(1)).is_some());
    assert!(table.fitted(ClassId(7)).is_none());
    assert_eq!(table.max_scale(), Some(3.0));
  }

  #[rstest]
  fn outlier_probability_grows_with_distance() {
    let model = tail(1.0);
    let model = model.as_fitted().expect("fitted");
    let near = model.outlier_probability(&[0.1, 0.0]).expect("near");
    let far = model.outlier_probability(&[3.0, 0.0]).expect("far");
    assert!(near < far);
    assert!(model.outlier_probability(&[1.0]).is_err());
  }
}
