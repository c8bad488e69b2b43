// 该文件是 Tanjing （探镜） 项目的一部分。
// src/output/json_record.rs - JSON 记录输出
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

use image::RgbImage;
use serde_json::{Value, json};
use thiserror::Error;
use tracing::info;
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  model::{BoundingBox, Detection},
  output::Render,
};

#[derive(Error, Debug)]
pub enum JsonRecordError {
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("JSON 错误: {0}")]
  JsonError(#[from] serde_json::Error),
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
}

/// 把检测结果写成 JSON 文件，`?pretty` 输出缩进格式
pub struct JsonRecordOutput {
  path: PathBuf,
  pretty: bool,
}

impl FromUrlWithScheme for JsonRecordOutput {
  const SCHEME: &'static str = "json";
}

impl FromUrl for JsonRecordOutput {
  type Error = JsonRecordError;

  fn from_url(uri: &Url) -> Result<Self, Self::Error> {
    if uri.scheme() != Self::SCHEME {
      return Err(JsonRecordError::SchemeMismatch(format!(
        "期望保存方式 '{}', 实际保存方式 '{}'",
        Self::SCHEME,
        uri.scheme()
      )));
    }

    let pretty = uri.query_pairs().any(|(k, _)| k == "pretty");

    Ok(JsonRecordOutput {
      path: PathBuf::from(uri.path()),
      pretty,
    })
  }
}

fn bbox_json(bbox: &BoundingBox) -> Value {
  json!([bbox.left, bbox.top, bbox.right, bbox.bottom])
}

/// 检测结果的 JSON 表示，同时给出归一化坐标与像素坐标
pub fn record(width: u32, height: u32, detections: &[Detection]) -> Value {
  let items: Vec<Value> = detections
    .iter()
    .map(|det| {
      json!({
        "score": det.score,
        "bbox": bbox_json(&det.bbox),
        "pixels": bbox_json(&det.bbox.to_pixels(width, height)),
      })
    })
    .collect();

  json!({
    "width": width,
    "height": height,
    "count": detections.len(),
    "detections": items,
  })
}

impl JsonRecordOutput {
  pub fn path(&self) -> &Path {
    &self.path
  }

  fn save(&self, value: &Value) -> Result<(), JsonRecordError> {
    if let Some(parent) = self.path.parent()
      && !parent.as_os_str().is_empty()
    {
      std::fs::create_dir_all(parent)?;
    }

    let text = if self.pretty {
      serde_json::to_string_pretty(value)?
    } else {
      serde_json::to_string(value)?
    };
    std::fs::write(&self.path, text)?;

    info!("保存检测结果到文件: {}", self.path.display());
    Ok(())
  }
}

impl Render<RgbImage, Vec<Detection>> for JsonRecordOutput {
  type Error = JsonRecordError;

  fn render_result(&self, frame: &RgbImage, result: &Vec<Detection>) -> Result<(), Self::Error> {
    let (width, height) = frame.dimensions();
    self.save(&record(width, height, result))
  }
}
