// 该文件是 Yuwai （域外） 项目的一部分。
// src/bin/yuwai_rebin.rs - 重校准检测结果并重新分组
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use url::Url;

use tracing::info;
use yuwai::{
  FromUrl,
  args::OpenSetArgs,
  decision::OpenSetClassifier,
  detection::GroupedDetections,
  input::JsonLinesInput,
  model::ModelTableSource,
  openmax::Recalibrator,
  output::OutputWrapper,
  task::{RecalibrateTask, Task},
};

/// 掩码原样透传，不关心其结构
type Mask = serde_json::Value;

/// Yuwai 重新分组参数
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 模型表 (weibull:///path)
  #[arg(long, value_name = "MODEL")]
  pub model: Url,
  /// 检测结果 (jsonl:///path)
  #[arg(long, value_name = "SOURCE")]
  pub input: Url,
  /// 输出 (jsonl:///path, record:///path[?reason], summary:)
  #[arg(long, value_name = "OUTPUT")]
  pub output: Url,

  /// 最多处理的图片数
  #[arg(long, value_name = "MAX_IMAGES")]
  pub max_images: Option<usize>,

  #[command(flatten)]
  pub open_set: OpenSetArgs,
}

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = Args::parse();
  let config = args.open_set.resolve()?;

  info!("模型表: {}", args.model);
  info!("输入来源: {}", args.input);
  info!("输出路径: {}", args.output);
  info!(
    "K = {}, alpha = {}, 阈值 = {}, 距离 = {}",
    config.known_classes,
    config.alpha,
    config.threshold,
    config.metric.name()
  );

  let table = ModelTableSource::from_url(&args.model)?.load()?;
  let recalibrator = Recalibrator::new(Arc::new(table), config.openmax_config())?;
  let classifier: OpenSetClassifier<Mask> = OpenSetClassifier::new(recalibrator, config.thresholder());

  let input: JsonLinesInput<GroupedDetections<Mask>> = JsonLinesInput::from_url(&args.input)?;
  let output = OutputWrapper::from_url(&args.output)?;

  RecalibrateTask::default()
    .with_max_images(args.max_images)
    .with_interrupt(true)
    .run_task(input.into_records(), classifier, output)?;

  Ok(())
}
