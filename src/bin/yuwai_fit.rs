// 该文件是 Yuwai （域外） 项目的一部分。
// src/bin/yuwai_fit.rs - 从训练样本拟合 Weibull 模型表
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use anyhow::Result;
use clap::Parser;
use url::Url;

use tracing::info;
use yuwai::{
  FromUrl,
  args::OpenSetArgs,
  input::JsonLinesInput,
  model::{ModelTableSource, TailFitter, TrainingSample},
  task::{FitTask, Task},
};

/// Yuwai 模型拟合参数
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 训练样本 (jsonl:///path)
  #[arg(long, value_name = "SOURCE")]
  pub input: Url,
  /// 模型表保存位置 (weibull:///path)
  #[arg(long, value_name = "MODEL")]
  pub model: Url,

  #[command(flatten)]
  pub open_set: OpenSetArgs,
}

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = Args::parse();
  let config = args.open_set.resolve()?;

  info!("训练样本: {}", args.input);
  info!("模型表: {}", args.model);
  info!(
    "K = {}, tailsize = {}, 距离 = {}",
    config.known_classes,
    config.tailsize,
    config.metric.name()
  );

  let input: JsonLinesInput<TrainingSample> = JsonLinesInput::from_url(&args.input)?;
  let source = ModelTableSource::from_url(&args.model)?;
  let fitter = TailFitter::new(config.fit_config())?;

  let table = FitTask.run_task(input, fitter, source)?;
  info!(
    "已拟合 {} / {} 个类别",
    table.iter().filter(|(_, m)| m.as_fitted().is_some()).count(),
    table.len()
  );

  Ok(())
}
