// 该文件是 Yuwai （域外） 项目的一部分。
// src/activation.rs - 激活向量与距离度量
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

use std::ops::Deref;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// 单个检测实例的激活向量（闭集分类器的 logit / 特征）
///
/// 创建后不可变，内部以 `Box<[f64]>` 保存。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ActivationVector(Box<[f64]>);

impl ActivationVector {
  pub fn dim(&self) -> usize {
    self.0.len()
  }

  pub fn is_finite(&self) -> bool {
    self.0.iter().all(|v| v.is_finite())
  }

  /// 逐元素均值；输入为空或维度不一致时返回错误
  pub fn mean_of<'a, I>(vectors: I) -> Result<Self, DistanceError>
  where
    I: IntoIterator<Item = &'a ActivationVector>,
  {
    let mut iter = vectors.into_iter();
    let first = iter.next().ok_or(DistanceError::Empty)?;
    let mut sum: Vec<f64> = first.0.to_vec();
    let mut count = 1usize;
    for v in iter {
      if v.dim() != sum.len() {
        return Err(DistanceError::DimensionMismatch(sum.len(), v.dim()));
      }
      for (s, x) in sum.iter_mut().zip(v.iter()) {
        *s += x;
      }
      count += 1;
    }
    let n = count as f64;
    sum.iter_mut().for_each(|s| *s /= n);
    Ok(Self(sum.into_boxed_slice()))
  }
}

impl Deref for ActivationVector {
  type Target = [f64];

  fn deref(&self) -> &Self::Target {
    &self.0
  }
}

impl From<Vec<f64>> for ActivationVector {
  fn from(values: Vec<f64>) -> Self {
    Self(values.into_boxed_slice())
  }
}

impl From<&[f64]> for ActivationVector {
  fn from(values: &[f64]) -> Self {
    Self(values.into())
  }
}

impl<const N: usize> From<[f64; N]> for ActivationVector {
  fn from(values: [f64; N]) -> Self {
    Self(Box::new(values))
  }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum DistanceError {
  #[error("向量为空")]
  Empty,
  #[error("维度不一致: {0} 与 {1}")]
  DimensionMismatch(usize, usize),
  #[error("向量范数为零，无法计算余弦距离")]
  ZeroNorm,
  #[error("向量包含非有限值")]
  NonFinite,
}

/// 距离度量
///
/// 拟合时记录在 `TailModel` 中，推理时必须使用同一度量。
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case", deny_unknown_fields)]
pub enum DistanceMetric {
  #[default]
  Euclidean,
  /// `1 - cos(a, b)`，取值 `[0, 2]`
  Cosine,
  /// `eu_weight * euclidean + cosine`
  EuCos { eu_weight: f64 },
}

impl DistanceMetric {
  pub fn distance(&self, a: &[f64], b: &[f64]) -> Result<f64, DistanceError> {
    if a.is_empty() || b.is_empty() {
      return Err(DistanceError::Empty);
    }
    if a.len() != b.len() {
      return Err(DistanceError::DimensionMismatch(a.len(), b.len()));
    }
    let d = match *self {
      DistanceMetric::Euclidean => euclidean(a, b),
      DistanceMetric::Cosine => cosine(a, b)?,
      DistanceMetric::EuCos { eu_weight } => eu_weight * euclidean(a, b) + cosine(a, b)?,
    };
    if d.is_finite() {
      Ok(d)
    } else {
      Err(DistanceError::NonFinite)
    }
  }

  pub fn name(&self) -> &'static str {
    match self {
      DistanceMetric::Euclidean => "euclidean",
      DistanceMetric::Cosine => "cosine",
      DistanceMetric::EuCos { .. } => "eucos",
    }
  }
}

fn euclidean(a: &[f64], b: &[f64]) -> f64 {
  a.iter()
    .zip(b)
    .map(|(x, y)| (x - y) * (x - y))
    .sum::<f64>()
    .sqrt()
}

fn cosine(a: &[f64], b: &[f64]) -> Result<f64, DistanceError> {
  let dot: f64 = a.iter().zip(b).map(|(x, y)| x * y).sum();
  let na = a.iter().map(|x| x * x).sum::<f64>().sqrt();
  let nb = b.iter().map(|x| x * x).sum::<f64>().sqrt();
  if na == 0.0 || nb == 0.0 {
    return Err(DistanceError::ZeroNorm);
  }
  // 舍入误差可能让相似度略超出 [-1, 1]
  Ok(1.0 - (dot / (na * nb)).clamp(-1.0, 1.0))
}
