// 该文件是 Tanjing （探镜） 项目的一部分。
// src/detector.rs - 目标检测器
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

use std::{
  path::PathBuf,
  sync::{Arc, Mutex},
};

use image::RgbImage;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::{
  decode::{DecodeError, decode},
  model::{
    AssetError, AssetStore, Detection, Engine, EngineError, ModelCache, ModelConfiguration,
  },
  preprocess::{PreprocessError, prepare},
};

/// 错误类别，供调用方决定恢复策略
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
  InvalidInput,
  EngineLoadFailure,
  EngineInferenceFailure,
  EngineUnavailable,
}

#[derive(Error, Debug)]
pub enum DetectorError {
  #[error("输入图像无效: {0}")]
  InvalidImage(#[from] PreprocessError),
  #[error("模型输出无效: {0}")]
  MalformedOutputs(#[from] DecodeError),
  #[error("模型资源错误: {0}")]
  Asset(#[from] AssetError),
  #[error("推理引擎加载失败: {0}")]
  EngineLoad(#[source] EngineError),
  #[error("推理失败: {0}")]
  EngineInference(#[source] EngineError),
  #[error("后台任务异常退出")]
  TaskAborted,
  #[error("推理引擎已关闭")]
  EngineClosed,
  #[error("检测器锁已失效")]
  LockPoisoned,
}

impl DetectorError {
  pub fn kind(&self) -> ErrorKind {
    match self {
      DetectorError::InvalidImage(_) | DetectorError::MalformedOutputs(_) => ErrorKind::InvalidInput,
      DetectorError::Asset(_) | DetectorError::EngineLoad(_) => ErrorKind::EngineLoadFailure,
      DetectorError::EngineInference(_) | DetectorError::TaskAborted => {
        ErrorKind::EngineInferenceFailure
      }
      DetectorError::EngineClosed | DetectorError::LockPoisoned => ErrorKind::EngineUnavailable,
    }
  }
}

/// 单个推理引擎之上的检测器
///
/// 每次 `detect` 都使用独立分配的输入与输出缓冲区。`close` 之后引擎被释放，
/// 再次调用 `detect` 返回 [`DetectorError::EngineClosed`]。
pub struct Detector<E> {
  engine: Option<E>,
  config: ModelConfiguration,
}

impl<E: Engine> Detector<E> {
  pub fn new(engine: E, config: ModelConfiguration) -> Self {
    info!(
      "创建检测器, 模型输入尺寸 {}x{}",
      config.input_width(),
      config.input_height()
    );
    Self {
      engine: Some(engine),
      config,
    }
  }

  /// 构建引擎并创建检测器，引擎构建错误归为加载失败
  pub fn load<F>(config: ModelConfiguration, build: F) -> Result<Self, DetectorError>
  where
    F: FnOnce() -> Result<E, EngineError>,
  {
    let engine = build().map_err(DetectorError::EngineLoad)?;
    Ok(Self::new(engine, config))
  }

  /// 先把模型资源复制到缓存，再以缓存路径构建引擎
  ///
  /// 缓存文件已存在时直接复用。资源错误与引擎构建错误都归为加载失败。
  pub fn load_cached<A, F>(
    config: ModelConfiguration,
    cache: &ModelCache,
    assets: &A,
    asset_name: &str,
    cache_name: &str,
    build: F,
  ) -> Result<Self, DetectorError>
  where
    A: AssetStore + ?Sized,
    F: FnOnce(PathBuf) -> Result<E, EngineError>,
  {
    let path = cache.materialize(assets, asset_name, cache_name)?;
    debug!("从缓存加载模型: {}", path.display());
    Self::load(config, || build(path))
  }

  pub fn configuration(&self) -> ModelConfiguration {
    self.config
  }

  pub fn is_closed(&self) -> bool {
    self.engine.is_none()
  }

  pub fn detect(&mut self, image: &RgbImage) -> Result<Vec<Detection>, DetectorError> {
    let engine = self.engine.as_mut().ok_or(DetectorError::EngineClosed)?;
    let (src_width, src_height) = image.dimensions();
    let (dst_width, dst_height) = (self.config.input_width(), self.config.input_height());

    let now = std::time::Instant::now();
    let input = prepare(image, dst_width, dst_height)?;
    debug!("预处理完成，耗时: {:.2?}", now.elapsed());

    let raw = engine.run(&input).map_err(DetectorError::EngineInference)?;
    debug!("推理完成，耗时: {:.2?}", now.elapsed());

    let detections = decode(&raw, src_width, src_height, dst_width, dst_height)?;
    info!(
      "检测到 {} 个物体，耗时: {:.2?}",
      detections.len(),
      now.elapsed()
    );
    Ok(detections)
  }

  /// 释放推理引擎，重复调用无副作用
  pub fn close(&mut self) {
    if self.engine.take().is_some() {
      info!("推理引擎已释放");
    }
  }
}

/// 以互斥锁串行化并发请求的共享检测器
pub struct SharedDetector<E> {
  inner: Arc<Mutex<Detector<E>>>,
}

impl<E> Clone for SharedDetector<E> {
  fn clone(&self) -> Self {
    Self {
      inner: Arc::clone(&self.inner),
    }
  }
}

impl<E: Engine> SharedDetector<E> {
  pub fn new(detector: Detector<E>) -> Self {
    Self {
      inner: Arc::new(Mutex::new(detector)),
    }
  }

  pub fn detect(&self, image: &RgbImage) -> Result<Vec<Detection>, DetectorError> {
    let mut guard = self.inner.lock().map_err(|_| {
      warn!("检测器锁已失效");
      DetectorError::LockPoisoned
    })?;
    guard.detect(image)
  }

  pub fn close(&self) {
    // 持锁线程崩溃时仍需释放引擎
    let mut guard = match self.inner.lock() {
      Ok(guard) => guard,
      Err(poisoned) => poisoned.into_inner(),
    };
    guard.close();
  }
}

impl<E: Engine> From<Detector<E>> for SharedDetector<E> {
  fn from(detector: Detector<E>) -> Self {
    Self::new(detector)
  }
}
