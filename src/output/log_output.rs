// 该文件是 Tanjing （探镜） 项目的一部分。
// src/output/log_output.rs - 日志输出
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

use image::RgbImage;
use thiserror::Error;
use tracing::{error, info};
use url::Url;

use crate::{FromUrl, FromUrlWithScheme, model::Detection, output::Render};

#[derive(Error, Debug)]
pub enum LogOutputError {
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
}

/// 把检测结果写入日志，`log:?limit=N` 限制逐条输出的数量
#[derive(Debug, Default)]
pub struct LogOutput {
  limit: Option<usize>,
}

impl FromUrlWithScheme for LogOutput {
  const SCHEME: &'static str = "log";
}

impl FromUrl for LogOutput {
  type Error = LogOutputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      error!(
        "URI scheme mismatch: expected '{}', found '{}'",
        Self::SCHEME,
        url.scheme()
      );
      return Err(LogOutputError::SchemeMismatch(url.scheme().to_string()));
    }

    let limit = url
      .query_pairs()
      .find(|(k, _)| k == "limit")
      .and_then(|(_, v)| v.parse().ok());

    Ok(LogOutput { limit })
  }
}

impl LogOutput {
  /// 逐条检测的日志行，坐标换算为像素
  pub fn describe(&self, width: u32, height: u32, result: &[Detection]) -> Vec<String> {
    let limit = self.limit.unwrap_or(result.len());
    result
      .iter()
      .take(limit)
      .map(|det| {
        let px = det.bbox.to_pixels(width, height);
        format!(
          "  - {:.2}% at ({:.0}, {:.0}, {:.0}x{:.0})",
          det.score * 100.0,
          px.left,
          px.top,
          px.width(),
          px.height()
        )
      })
      .collect()
  }
}

impl Render<RgbImage, Vec<Detection>> for LogOutput {
  type Error = LogOutputError;

  fn render_result(&self, frame: &RgbImage, result: &Vec<Detection>) -> Result<(), Self::Error> {
    let (width, height) = frame.dimensions();
    info!(
      "图像 {}x{}: 检测到 {} 个对象",
      width,
      height,
      result.len()
    );
    for line in self.describe(width, height, result) {
      info!("{}", line);
    }
    Ok(())
  }
}
