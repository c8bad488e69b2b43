// 该文件是 Tanjing （探镜） 项目的一部分。
// src/bin/simple_oneshot.rs - 单次推理示例
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

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Parser;
use url::Url;

use tanjing::{
  Detector, FromUrl,
  input::InputWrapper,
  model::{DirectoryAssets, ModelCache, TractEngineBuilder},
  output::OutputWrapper,
  task::{OneShotTask, Task},
};
use tracing::info;

const MODEL_CACHE_NAME: &str = "modelCache.onnx";

/// Tanjing 单次推理参数
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// ONNX 模型路径，例如 onnx:///models/model.onnx?width=480&height=640
  #[arg(long, value_name = "MODEL")]
  pub model: Url,
  /// 输入来源，例如 image:///photos/a.jpg
  #[arg(long, value_name = "SOURCE")]
  pub input: Url,
  /// 输出路径，例如 json:///tmp/result.json 或 log:
  #[arg(long, value_name = "OUTPUT", default_value = "log:")]
  pub output: Url,
  /// 模型缓存目录，指定后先把模型复制到缓存再加载
  #[arg(long, value_name = "DIR")]
  pub cache_dir: Option<PathBuf>,
}

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = Args::parse();

  info!("模型文件路径: {}", args.model);
  info!("输入来源: {}", args.input);
  info!("输出路径: {}", args.output);

  let builder = TractEngineBuilder::from_url(&args.model)?;
  let config = builder.configuration();
  let mut detector = match &args.cache_dir {
    Some(cache_dir) => {
      let model_path = Path::new(args.model.path());
      let asset_dir = model_path.parent().unwrap_or(Path::new("/"));
      let asset_name = model_path
        .file_name()
        .and_then(|n| n.to_str())
        .context("模型路径缺少文件名")?;
      Detector::load_cached(
        config,
        &ModelCache::new(cache_dir),
        &DirectoryAssets::new(asset_dir),
        asset_name,
        MODEL_CACHE_NAME,
        |cached| builder.model_path(cached).build(),
      )?
    }
    None => Detector::load(config, || builder.build())?,
  };
  let input = InputWrapper::from_url(&args.input)?;
  let output = OutputWrapper::from_url(&args.output)?;

  let result = OneShotTask.run_task(input, &mut detector, output);
  detector.close();
  result
}
