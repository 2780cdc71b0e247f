// 该文件是 Yuwai （域外） 项目的一部分。
// src/task.rs - 拟合与批量重校准任务
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

use std::sync::mpsc::Receiver;
use std::{thread, time::Duration, time::Instant};

use tracing::{error, info, warn};

use crate::decision::Label;
use crate::detection::{DetectionRecord, RevisedRecord};
use crate::model::{Model, ModelTable, ModelTableSource, TailFitter, TrainingSample};
use crate::output::Render;

pub trait Task<I, M, O>: Sized {
  type Output;
  type Error;
  fn run_task(self, input: I, model: M, output: O) -> Result<Self::Output, Self::Error>;
}

/// 读取全部训练样本，拟合后写入模型表
#[derive(Default, Debug)]
pub struct FitTask;

impl<E, I> Task<I, TailFitter, ModelTableSource> for FitTask
where
  E: std::error::Error + Sync + Send + 'static,
  I: Iterator<Item = Result<TrainingSample, E>>,
{
  type Output = ModelTable;
  type Error = anyhow::Error;

  fn run_task(
    self,
    input: I,
    fitter: TailFitter,
    output: ModelTableSource,
  ) -> Result<Self::Output, Self::Error> {
    info!("读取训练样本...");
    let samples = input.collect::<Result<Vec<_>, _>>()?;
    info!("共 {} 个训练样本，开始拟合...", samples.len());
    let now = Instant::now();
    let table = fitter.fit_samples(&samples)?;
    info!("拟合完成，耗时: {:.2?}", now.elapsed());
    output.save(&table)?;
    Ok(table)
  }
}

/// 批量重校准的统计
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BatchStats {
  pub images: usize,
  pub instances: usize,
  pub known: usize,
  /// 含 `failed`
  pub unknown: usize,
  pub failed: usize,
  /// 无法解析而跳过的输入记录
  pub skipped: usize,
}

impl BatchStats {
  fn add<Mk>(&mut self, record: &RevisedRecord<Mk>) {
    let instances = record.instances();
    self.images += 1;
    self.instances += instances.len();
    self.known += instances
      .iter()
      .filter(|r| matches!(r.assignment.label, Label::Known(_)))
      .count();
    self.unknown += record.unknown_count();
    self.failed += record.failed_count();
  }
}

/// 逐张图片重校准并写出结果，可限制图片数量，可响应 Ctrl-C
#[derive(Default, Debug)]
pub struct RecalibrateTask {
  max_images: Option<usize>,
  interrupt: bool,
}

impl RecalibrateTask {
  pub fn with_max_images(mut self, max_images: Option<usize>) -> Self {
    self.max_images = max_images;
    self
  }

  /// 安装 Ctrl-C 处理；每个进程只能安装一次
  pub fn with_interrupt(mut self, interrupt: bool) -> Self {
    self.interrupt = interrupt;
    self
  }

  fn install_interrupt(&self) -> Result<Option<Receiver<()>>, ctrlc::Error> {
    if !self.interrupt {
      return Ok(None);
    }
    let (tx, rx) = std::sync::mpsc::channel();
    ctrlc::set_handler(move || {
      info!("收到中断信号，准备退出...");
      let _ = tx.send(());
      thread::spawn(|| {
        thread::sleep(Duration::from_secs(30));
        warn!("强制退出程序");
        std::process::exit(1);
      });
    })?;
    Ok(Some(rx))
  }

  fn limit_reached(&self, images: usize) -> bool {
    self.max_images.map(|n| images >= n).unwrap_or(false)
  }
}

impl<
  Mk,
  IE: std::error::Error + Sync + Send + 'static,
  ME: std::error::Error + Sync + Send + 'static,
  RE: std::error::Error + Sync + Send + 'static,
  I: Iterator<Item = Result<DetectionRecord<Mk>, IE>>,
  M: Model<Input = DetectionRecord<Mk>, Output = RevisedRecord<Mk>, Error = ME>,
  O: Render<DetectionRecord<Mk>, RevisedRecord<Mk>, Error = RE>,
> Task<I, M, O> for RecalibrateTask
{
  type Output = BatchStats;
  type Error = anyhow::Error;

  fn run_task(self, input: I, model: M, output: O) -> Result<Self::Output, Self::Error> {
    info!("开始任务...");
    let rx = self.install_interrupt()?;

    let mut stats = BatchStats::default();
    let started = Instant::now();
    for item in input {
      if self.limit_reached(stats.images) {
        info!("达到指定图片数 {}, 退出任务循环", stats.images);
        break;
      }
      let record = match item {
        Ok(record) => record,
        Err(e) => {
          error!("跳过无效输入: {}", e);
          stats.skipped += 1;
          continue;
        }
      };

      let now = Instant::now();
      let result = model.infer(&record)?;
      let elapsed_a = now.elapsed();
      output.render_result(&record, &result)?;
      let elapsed_b = now.elapsed();
      stats.add(&result);
      info!(
        "第 {} 张图片: {} 个实例，其中未知 {} 个，耗时: {:.2?} / {:.2?}",
        record.image(),
        result.instances().len(),
        result.unknown_count(),
        elapsed_a,
        elapsed_b
      );

      if rx.as_ref().is_some_and(|rx| rx.try_recv().is_ok()) {
        warn!("中断信号接收，退出任务循环");
        break;
      }
    }
    output.finish()?;

    info!(
      "任务完成: {} 张图片, {} 个实例, 已知 {}, 未知 {} (失败 {}), 跳过 {} 条输入, 总耗时 {:.2?}",
      stats.images,
      stats.instances,
      stats.known,
      stats.unknown,
      stats.failed,
      stats.skipped,
      started.elapsed()
    );
    Ok(stats)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::activation::DistanceMetric;
  use crate::decision::{OpenSetClassifier, Thresholder};
  use crate::detection::Instance;
  use crate::model::{ClassId, FitConfig, FitFailurePolicy};
  use crate::openmax::{OpenMaxConfig, RankWeighting, Recalibrator};
  use crate::output::SummaryOutput;
  use crate::FromUrl;
  use rstest::rstest;
  use std::sync::Arc;

  fn samples() -> Vec<TrainingSample> {
    let mut samples = Vec::new();
    for i in 0..8 {
      let d = 0.05 * i as f64;
      samples.push(TrainingSample {
        label: ClassId(0),
        activation: vec![4.0 + d, 1.0 - d].into(),
      });
      samples.push(TrainingSample {
        label: ClassId(1),
        activation: vec![1.0 - d, 4.0 + d * d].into(),
      });
    }
    samples
  }

  fn fitter() -> TailFitter {
    TailFitter::new(FitConfig {
      known_classes: 2,
      tailsize: 5,
      metric: DistanceMetric::Euclidean,
      on_failure: FitFailurePolicy::Abort,
    })
    .expect("fitter")
  }

  #[rstest]
  fn fit_task_saves_table() {
    let dir = tempfile::tempdir().expect("tempdir");
    let url = url::Url::parse(&format!("weibull://{}/table.json", dir.path().display())).expect("url");
    let source = ModelTableSource::from_url(&url).expect("source");
    let input = samples().into_iter().map(Ok::<_, std::io::Error>);

    let table = FitTask.run_task(input, fitter(), source.clone()).expect("fit");
    assert_eq!(table.len(), 2);
    assert_eq!(source.load().expect("load"), table);
  }

  #[rstest]
  fn recalibrate_task_counts_and_limits() {
    let table = Arc::new(fitter().fit_samples(&samples()).expect("table"));
    let recalibrator = Recalibrator::new(table, OpenMaxConfig {
      known_classes: 2,
      alpha: 2,
      metric: DistanceMetric::Euclidean,
      weighting: RankWeighting::Linear,
    })
    .expect("recalibrator");
    let classifier: OpenSetClassifier<()> = OpenSetClassifier::new(recalibrator, Thresholder::new(0.1));

    let instance = |activation: Vec<f64>| Instance {
      bbox: [0.0; 4],
      score: 1.0,
      mask: (),
      activation: activation.into(),
      original_class: ClassId(0),
    };
    let records = (0..5u64).map(|image| {
      if image == 1 {
        return Err(std::io::Error::other("bad line"));
      }
      Ok(DetectionRecord::new(image, vec![
        instance(vec![4.1, 0.95]),
        instance(vec![]),
      ]))
    });

    let output = SummaryOutput::default();
    let stats = RecalibrateTask::default()
      .with_max_images(Some(3))
      .run_task(records, classifier, &output)
      .expect("run");
    assert_eq!(stats.images, 3);
    assert_eq!(stats.skipped, 1);
    assert_eq!(stats.instances, 6);
    assert_eq!(stats.failed, 3);
    assert_eq!(stats.known + stats.unknown, stats.instances);
    assert_eq!(output.counts().images, 3);
  }
}
