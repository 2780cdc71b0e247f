// 该文件是 Yuwai （域外） 项目的一部分。
// src/weibull.rs - 双参数 Weibull 分布拟合
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

use serde::{Deserialize, Serialize};
use statrs::distribution::{ContinuousCDF, Weibull as WeibullDist};
use thiserror::Error;
use tracing::debug;

const MLE_MAX_ITERATIONS: usize = 200;
const MLE_TOLERANCE: f64 = 1e-10;
/// ln(x) 的方差低于该值时视为退化样本
const DEGENERATE_LOG_VARIANCE: f64 = 1e-12;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum WeibullError {
  #[error("至少需要 2 个样本才能拟合，实际为 {0}")]
  TooFewSamples(usize),
  #[error("样本必须为正的有限值: {0}")]
  InvalidSample(f64),
  #[error("样本方差过小，无法拟合（退化尾部）")]
  Degenerate,
  #[error("极大似然估计在 {0} 次迭代后未收敛")]
  NoConvergence(usize),
  #[error("参数无效: shape = {shape}, scale = {scale}")]
  InvalidParameters { shape: f64, scale: f64 },
}

/// 双参数 Weibull 分布，`shape > 0`、`scale > 0`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "WeibullParams")]
pub struct Weibull {
  shape: f64,
  scale: f64,
}

/// 反序列化时先读出原始参数，再经 `Weibull::new` 校验
#[derive(Deserialize)]
struct WeibullParams {
  shape: f64,
  scale: f64,
}

impl TryFrom<WeibullParams> for Weibull {
  type Error = WeibullError;

  fn try_from(params: WeibullParams) -> Result<Self, Self::Error> {
    Weibull::new(params.shape, params.scale)
  }
}

impl Weibull {
  pub fn new(shape: f64, scale: f64) -> Result<Self, WeibullError> {
    let valid = shape.is_finite() && scale.is_finite() && shape > 0.0 && scale > 0.0;
    if !valid {
      return Err(WeibullError::InvalidParameters { shape, scale });
    }
    Ok(Self { shape, scale })
  }

  pub fn shape(&self) -> f64 {
    self.shape
  }

  pub fn scale(&self) -> f64 {
    self.scale
  }

  /// 累积分布函数；负数与零处为 0
  pub fn cdf(&self, x: f64) -> f64 {
    match WeibullDist::new(self.shape, self.scale) {
      Ok(dist) => dist.cdf(x),
      Err(_) => f64::NAN,
    }
  }

  /// 极大似然估计
  ///
  /// 对形状参数 k 用牛顿法求解
  /// `Σ x^k ln x / Σ x^k - 1/k - mean(ln x) = 0`，
  /// 再由 `λ = (mean(x^k))^(1/k)` 得到尺度参数。
  /// 样本先按最大值归一化，k 与归一化无关。
  pub fn fit_mle(samples: &[f64]) -> Result<Self, WeibullError> {
    if samples.len() < 2 {
      return Err(WeibullError::TooFewSamples(samples.len()));
    }
    if let Some(&bad) = samples.iter().find(|x| !(x.is_finite() && **x > 0.0)) {
      return Err(WeibullError::InvalidSample(bad));
    }

    let max = samples.iter().copied().fold(f64::MIN, f64::max);
    let xs: Vec<f64> = samples.iter().map(|x| x / max).collect();
    let logs: Vec<f64> = xs.iter().map(|x| x.ln()).collect();
    let n = xs.len() as f64;
    let mean_log = logs.iter().sum::<f64>() / n;
    let var_log = logs.iter().map(|l| (l - mean_log).powi(2)).sum::<f64>() / n;
    if var_log < DEGENERATE_LOG_VARIANCE {
      return Err(WeibullError::Degenerate);
    }

    // 矩估计初值 k ≈ π / (σ √6)
    let mut k = std::f64::consts::PI / (var_log.sqrt() * 6f64.sqrt());
    for iteration in 0..MLE_MAX_ITERATIONS {
      let (mut s0, mut s1, mut s2) = (0.0, 0.0, 0.0);
      for (x, l) in xs.iter().zip(&logs) {
        let p = x.powf(k);
        s0 += p;
        s1 += p * l;
        s2 += p * l * l;
      }
      let ratio = s1 / s0;
      let g = ratio - 1.0 / k - mean_log;
      let dg = s2 / s0 - ratio * ratio + 1.0 / (k * k);
      let mut next = k - g / dg;
      if !next.is_finite() {
        break;
      }
      if next <= 0.0 {
        next = k / 2.0;
      }
      let converged = (next - k).abs() <= MLE_TOLERANCE * k;
      k = next;
      if converged {
        let mean_pow = xs.iter().map(|x| x.powf(k)).sum::<f64>() / n;
        let scale = max * mean_pow.powf(1.0 / k);
        debug!("Weibull 拟合在 {} 次迭代后收敛: k = {}, λ = {}", iteration + 1, k, scale);
        return Self::new(k, scale).map_err(|_| WeibullError::NoConvergence(iteration + 1));
      }
    }

    Err(WeibullError::NoConvergence(MLE_MAX_ITERATIONS))
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use rstest::rstest;

  /// 逆 CDF 采样得到确定性的 Weibull 分位数
  fn quantiles(shape: f64, scale: f64, n: usize) -> Vec<f64> {
    (1..=n)
      .map(|i| {
        let p = (i as f64 - 0.5) / n as f64;
        scale * (-(1.0 - p).ln()).powf(1.0 / shape)
      })
      .collect()
  }

  #[rstest]
  #[case(1.5, 2.0)]
  #[case(3.0, 0.4)]
  #[case(0.8, 10.0)]
  fn fit_recovers_parameters(#[case] shape: f64, #[case] scale: f64) {
    let samples = quantiles(shape, scale, 2000);
    let fitted = Weibull::fit_mle(&samples).expect("fit");
    assert!((fitted.shape() - shape).abs() / shape < 0.05, "{fitted:?}");
    assert!((fitted.scale() - scale).abs() / scale < 0.05, "{fitted:?}");
  }

  #[rstest]
  fn fit_small_tail() {
    let fitted = Weibull::fit_mle(&[0.3, 0.4, 0.5]).expect("fit");
    let p = fitted.cdf(0.35);
    assert!(p > 0.0 && p < 1.0);
  }

  #[rstest]
  #[case(&[10.0], WeibullError::TooFewSamples(1))]
  #[case(&[], WeibullError::TooFewSamples(0))]
  #[case(&[2.0, 2.0, 2.0], WeibullError::Degenerate)]
  #[case(&[1.0, 0.0], WeibullError::InvalidSample(0.0))]
  #[case(&[1.0, -3.0], WeibullError::InvalidSample(-3.0))]
  fn fit_rejects(#[case] samples: &[f64], #[case] expected: WeibullError) {
    assert_eq!(Weibull::fit_mle(samples), Err(expected));
  }

  #[rstest]
  fn cdf_shape() {
    let w = Weibull::new(2.0, 1.0).expect("weibull");
    assert_eq!(w.cdf(0.0), 0.0);
    assert_eq!(w.cdf(-1.0), 0.0);
    assert!((w.cdf(1.0) - (1.0 - (-1.0f64).exp())).abs() < 1e-12);
    assert!(w.cdf(0.5) < w.cdf(0.6));
    assert!(w.cdf(100.0) > 1.0 - 1e-12);
  }

  #[rstest]
  fn deserialise_validates() {
    let ok: Weibull = serde_json::from_str(r#"{"shape":2.0,"scale":0.5}"#).expect("parse");
    assert_eq!(ok, Weibull::new(2.0, 0.5).expect("weibull"));
    let bad: Result<Weibull, _> = serde_json::from_str(r#"{"shape":-2.0,"scale":0.5}"#);
    assert!(bad.is_err());
  }

  #[rstest]
  #[case(0.0, 1.0)]
  #[case(1.0, -1.0)]
  #[case(f64::NAN, 1.0)]
  fn new_rejects_invalid(#[case] shape: f64, #[case] scale: f64) {
    assert!(Weibull::new(shape, scale).is_err());
  }
}
