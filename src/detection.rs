// 该文件是 Yuwai （域外） 项目的一部分。
// src/detection.rs - 检测结果与重新分组
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
use thiserror::Error;

use crate::activation::ActivationVector;
use crate::decision::{Assignment, Label};
use crate::model::ClassId;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DetectionError {
  #[error("分组数量不一致: 边框 {bboxes}, 掩码 {masks}, 激活 {activations}")]
  BinCountMismatch {
    bboxes: usize,
    masks: usize,
    activations: usize,
  },
  #[error("分组数量 {0} 超出类别编号范围")]
  TooManyBins(usize),
  #[error("第 {bin} 组实例数量不一致: 边框 {bboxes}, 掩码 {masks}, 激活 {activations}")]
  InstanceCountMismatch {
    bin: usize,
    bboxes: usize,
    masks: usize,
    activations: usize,
  },
}

/// 单个检测实例，`M` 为上游给出的掩码，原样透传
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instance<M> {
  pub bbox: [f32; 4], // [x_min, y_min, x_max, y_max]
  pub score: f32,
  pub mask: M,
  pub activation: ActivationVector,
  /// 上游检测器给出的类别
  pub original_class: ClassId,
}

/// 一张图片的检测结果，按实例顺序存放
#[derive(Debug, Clone, PartialEq)]
pub struct DetectionRecord<M> {
  image: u64,
  instances: Vec<Instance<M>>,
}

impl<M> DetectionRecord<M> {
  pub fn new(image: u64, instances: Vec<Instance<M>>) -> Self {
    Self { image, instances }
  }

  pub fn image(&self) -> u64 {
    self.image
  }

  pub fn instances(&self) -> &[Instance<M>] {
    &self.instances
  }

  pub fn len(&self) -> usize {
    self.instances.len()
  }

  pub fn is_empty(&self) -> bool {
    self.instances.is_empty()
  }

  /// 每个箱子中的实例数量
  pub fn counts(&self, bins: usize) -> Vec<usize> {
    let mut counts = vec![0; bins];
    for instance in &self.instances {
      if let Some(c) = counts.get_mut(instance.original_class.index()) {
        *c += 1;
      }
    }
    counts
  }
}

/// 上游 / 下游交换的分组格式：每个类别一个箱子，三个并列数组按下标对齐
///
/// 边框行为 `[x_min, y_min, x_max, y_max, score]`。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupedDetections<M> {
  pub bboxes: Vec<Vec<[f32; 5]>>,
  pub masks: Vec<Vec<M>>,
  pub activations: Vec<Vec<ActivationVector>>,
}

impl<M> GroupedDetections<M> {
  pub fn with_bins(bins: usize) -> Self {
    Self {
      bboxes: (0..bins).map(|_| Vec::new()).collect(),
      masks: (0..bins).map(|_| Vec::new()).collect(),
      activations: (0..bins).map(|_| Vec::new()).collect(),
    }
  }

  pub fn bins(&self) -> usize {
    self.bboxes.len()
  }

  /// 展开为按实例排列的记录，第 i 个箱子中的实例的原始类别为 i
  pub fn into_record(self, image: u64) -> Result<DetectionRecord<M>, DetectionError> {
    let (nb, nm, na) = (self.bboxes.len(), self.masks.len(), self.activations.len());
    if nb != nm || nb != na {
      return Err(DetectionError::BinCountMismatch {
        bboxes: nb,
        masks: nm,
        activations: na,
      });
    }

    let mut instances = Vec::new();
    let bins = self.bboxes.into_iter().zip(self.masks).zip(self.activations);
    for (bin, ((bboxes, masks), activations)) in bins.enumerate() {
      if bboxes.len() != masks.len() || bboxes.len() != activations.len() {
        return Err(DetectionError::InstanceCountMismatch {
          bin,
          bboxes: bboxes.len(),
          masks: masks.len(),
          activations: activations.len(),
        });
      }
      let original_class = ClassId::try_from(bin).map_err(|_| DetectionError::TooManyBins(nb))?;
      for ((b, mask), activation) in bboxes.into_iter().zip(masks).zip(activations) {
        instances.push(Instance {
          bbox: [b[0], b[1], b[2], b[3]],
          score: b[4],
          mask,
          activation,
          original_class,
        });
      }
    }
    Ok(DetectionRecord::new(image, instances))
  }

  fn push(&mut self, bin: usize, instance: Instance<M>) {
    let [x0, y0, x1, y1] = instance.bbox;
    self.bboxes[bin].push([x0, y0, x1, y1, instance.score]);
    self.masks[bin].push(instance.mask);
    self.activations[bin].push(instance.activation);
  }
}

impl<M> From<DetectionRecord<M>> for GroupedDetections<M> {
  /// 按原始类别分组，箱子数量取最大类别编号 + 1
  fn from(record: DetectionRecord<M>) -> Self {
    let bins = record
      .instances
      .iter()
      .map(|i| i.original_class.index() + 1)
      .max()
      .unwrap_or(0);
    let mut grouped = GroupedDetections::with_bins(bins);
    for instance in record.instances {
      let bin = instance.original_class.index();
      grouped.push(bin, instance);
    }
    grouped
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RevisedInstance<M> {
  pub instance: Instance<M>,
  pub assignment: Assignment,
}

/// 重校准后的检测结果
#[derive(Debug, Clone, PartialEq)]
pub struct RevisedRecord<M> {
  image: u64,
  known_classes: usize,
  instances: Vec<RevisedInstance<M>>,
}

impl<M> RevisedRecord<M> {
  pub fn new(image: u64, known_classes: usize, instances: Vec<RevisedInstance<M>>) -> Self {
    Self {
      image,
      known_classes,
      instances,
    }
  }

  pub fn image(&self) -> u64 {
    self.image
  }

  pub fn known_classes(&self) -> usize {
    self.known_classes
  }

  pub fn instances(&self) -> &[RevisedInstance<M>] {
    &self.instances
  }

  /// K + 1 个箱子中的实例数量，最后一个为未知
  pub fn counts(&self) -> Vec<usize> {
    let mut counts = vec![0; self.known_classes + 1];
    for revised in &self.instances {
      counts[self.bin_of(revised.assignment.label)] += 1;
    }
    counts
  }

  pub fn unknown_count(&self) -> usize {
    self
      .instances
      .iter()
      .filter(|r| r.assignment.label == Label::Unknown)
      .count()
  }

  pub fn failed_count(&self) -> usize {
    self.instances.iter().filter(|r| r.assignment.is_failed()).count()
  }

  /// 超出 K 的已知标签归入未知箱
  fn bin_of(&self, label: Label) -> usize {
    label.bin(self.known_classes).min(self.known_classes)
  }

  /// 分成 K + 1 个箱子，保持每个实例的边框、掩码与激活向量对应关系
  pub fn partition(self) -> GroupedDetections<M> {
    let mut grouped = GroupedDetections::with_bins(self.known_classes + 1);
    let known = self.known_classes;
    for revised in self.instances {
      let bin = revised.assignment.label.bin(known).min(known);
      grouped.push(bin, revised.instance);
    }
    grouped
  }
}
