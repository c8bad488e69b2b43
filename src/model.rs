// 该文件是 Tanjing （探镜） 项目的一部分。
// src/model.rs - 模型
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

use thiserror::Error;
use url::Url;

use crate::{decode::RawOutputs, tensor::InputTensor};

pub const DEFAULT_INPUT_WIDTH: u32 = 480;
pub const DEFAULT_INPUT_HEIGHT: u32 = 640;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigurationError {
  #[error("模型输入尺寸无效: {width}x{height}")]
  ZeroSize { width: u32, height: u32 },
  #[error("参数 {0} 无法解析: {1}")]
  InvalidQuery(String, String),
}

/// 推理引擎要求的输入尺寸，在检测器生命周期内保持不变
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModelConfiguration {
  input_width: u32,
  input_height: u32,
}

impl Default for ModelConfiguration {
  fn default() -> Self {
    Self {
      input_width: DEFAULT_INPUT_WIDTH,
      input_height: DEFAULT_INPUT_HEIGHT,
    }
  }
}

impl ModelConfiguration {
  pub fn new(input_width: u32, input_height: u32) -> Result<Self, ConfigurationError> {
    if input_width == 0 || input_height == 0 {
      return Err(ConfigurationError::ZeroSize {
        width: input_width,
        height: input_height,
      });
    }
    Ok(Self {
      input_width,
      input_height,
    })
  }

  /// 从 URL 查询参数 `width` / `height` 读取，缺省时使用默认值
  pub fn from_query(url: &Url) -> Result<Self, ConfigurationError> {
    let mut width = DEFAULT_INPUT_WIDTH;
    let mut height = DEFAULT_INPUT_HEIGHT;
    for (k, v) in url.query_pairs() {
      let target = match &*k {
        "width" => &mut width,
        "height" => &mut height,
        _ => continue,
      };
      *target = v
        .parse()
        .map_err(|_| ConfigurationError::InvalidQuery(k.to_string(), v.to_string()))?;
    }
    Self::new(width, height)
  }

  pub fn input_width(&self) -> u32 {
    self.input_width
  }

  pub fn input_height(&self) -> u32 {
    self.input_height
  }
}

/// 归一化到原图坐标系的边界框，不做截断
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
  pub left: f32,
  pub top: f32,
  pub right: f32,
  pub bottom: f32,
}

impl BoundingBox {
  /// 换算到像素坐标
  pub fn to_pixels(&self, width: u32, height: u32) -> BoundingBox {
    let (w, h) = (width as f32, height as f32);
    BoundingBox {
      left: self.left * w,
      top: self.top * h,
      right: self.right * w,
      bottom: self.bottom * h,
    }
  }

  pub fn width(&self) -> f32 {
    self.right - self.left
  }

  pub fn height(&self) -> f32 {
    self.bottom - self.top
  }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Detection {
  pub bbox: BoundingBox,
  pub score: f32,
}

#[derive(Error, Debug)]
pub enum EngineError {
  #[error("模型加载错误: {0}")]
  ModelLoadError(#[from] std::io::Error),
  #[error("模型无效: {0}")]
  ModelInvalid(String),
  #[error("模型路径错误: {0}")]
  ModelPathError(String),
  #[error("模型配置错误: {0}")]
  Configuration(#[from] ConfigurationError),
  #[error("推理错误: {0}")]
  InferenceError(String),
}

/// 推理引擎边界
///
/// 引擎不保证可重入，因此 `run` 需要独占引用。每次调用都返回新分配的
/// 输出，调用方之间不共享缓冲区。
pub trait Engine {
  fn run(&mut self, input: &InputTensor) -> Result<RawOutputs, EngineError>;
}

impl<E: Engine + ?Sized> Engine for Box<E> {
  fn run(&mut self, input: &InputTensor) -> Result<RawOutputs, EngineError> {
    (**self).run(input)
  }
}

pub mod asset;
pub use self::asset::{AssetError, AssetStore, DirectoryAssets, ModelCache};

#[cfg(feature = "engine_tract")]
mod tract;
#[cfg(feature = "engine_tract")]
pub use self::tract::{TractEngine, TractEngineBuilder};
