// 该文件是 Tanjing （探镜） 项目的一部分。
// src/model/tract.rs - 基于 tract 的 ONNX 推理引擎
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

use std::path::PathBuf;

use tracing::{debug, error, info};
use tract_onnx::prelude::*;
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  decode::RawOutputs,
  model::{Engine, EngineError, ModelConfiguration},
  tensor::{InputTensor, RGB_CHANNELS},
};

const TRACT_NUM_OUTPUTS: usize = 4;
const OUTPUT_BOXES: usize = 0;
const OUTPUT_COUNT: usize = 1;
const OUTPUT_LABELS: usize = 2;
const OUTPUT_SCORES: usize = 3;

type Plan = TypedRunnableModel<TypedModel>;

pub struct TractEngine {
  model: Plan,
  config: ModelConfiguration,
}

pub struct TractEngineBuilder {
  model_path: PathBuf,
  config: ModelConfiguration,
}

impl FromUrlWithScheme for TractEngineBuilder {
  const SCHEME: &'static str = "onnx";
}

impl FromUrl for TractEngineBuilder {
  type Error = EngineError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(EngineError::ModelPathError(format!(
        "模型路径必须使用 {} 方案",
        Self::SCHEME
      )));
    }

    Ok(TractEngineBuilder {
      model_path: PathBuf::from(url.path()),
      config: ModelConfiguration::from_query(url)?,
    })
  }
}

impl TractEngineBuilder {
  pub fn new(model_path: impl Into<PathBuf>, config: ModelConfiguration) -> Self {
    Self {
      model_path: model_path.into(),
      config,
    }
  }

  /// 替换模型文件路径，通常指向 [`crate::model::ModelCache`] 落地后的缓存文件
  pub fn model_path(mut self, path: impl Into<PathBuf>) -> Self {
    self.model_path = path.into();
    self
  }

  pub fn configuration(&self) -> ModelConfiguration {
    self.config
  }

  pub fn build(self) -> Result<TractEngine, EngineError> {
    info!("加载模型文件: {}", self.model_path.display());
    if !self.model_path.is_file() {
      error!("模型文件不存在: {}", self.model_path.display());
      return Err(EngineError::ModelPathError(format!(
        "模型文件不存在: {}",
        self.model_path.display()
      )));
    }

    let height = self.config.input_height() as usize;
    let width = self.config.input_width() as usize;
    let model = tract_onnx::onnx()
      .model_for_path(&self.model_path)
      .map_err(|e| EngineError::ModelInvalid(format!("无法解析模型: {}", e)))?
      .with_input_fact(
        0,
        InferenceFact::dt_shape(f32::datum_type(), tvec!(1, height, width, RGB_CHANNELS)),
      )
      .map_err(|e| EngineError::ModelInvalid(format!("无法设置输入形状: {}", e)))?
      .into_optimized()
      .map_err(|e| EngineError::ModelInvalid(format!("无法优化模型: {}", e)))?;

    let num_outputs = model.output_outlets().map(|o| o.len()).unwrap_or(0);
    if num_outputs != TRACT_NUM_OUTPUTS {
      error!(
        "预期模型输出数量为 {}, 实际为 {}",
        TRACT_NUM_OUTPUTS, num_outputs
      );
      return Err(EngineError::ModelInvalid(format!(
        "预期模型输出数量为 {}, 实际为 {}",
        TRACT_NUM_OUTPUTS, num_outputs
      )));
    }

    let model = model
      .into_runnable()
      .map_err(|e| EngineError::ModelInvalid(format!("无法构建推理计划: {}", e)))?;
    info!("模型加载完成, 输入尺寸 {}x{}", width, height);

    Ok(TractEngine {
      model,
      config: self.config,
    })
  }
}

impl TractEngine {
  pub fn configuration(&self) -> ModelConfiguration {
    self.config
  }
}

fn output_f32(outputs: &TVec<TValue>, index: usize) -> Result<Vec<f32>, EngineError> {
  let tensor = outputs
    .get(index)
    .ok_or_else(|| EngineError::InferenceError(format!("缺少第 {} 个输出", index)))?;
  let cast = tensor
    .cast_to::<f32>()
    .map_err(|e| EngineError::InferenceError(format!("第 {} 个输出无法转换: {}", index, e)))?;
  let slice = cast
    .as_slice::<f32>()
    .map_err(|e| EngineError::InferenceError(format!("第 {} 个输出无法读取: {}", index, e)))?;
  Ok(slice.to_vec())
}

fn output_u8(outputs: &TVec<TValue>, index: usize) -> Result<Vec<u8>, EngineError> {
  let tensor = outputs
    .get(index)
    .ok_or_else(|| EngineError::InferenceError(format!("缺少第 {} 个输出", index)))?;
  let cast = tensor
    .cast_to::<u8>()
    .map_err(|e| EngineError::InferenceError(format!("第 {} 个输出无法转换: {}", index, e)))?;
  let slice = cast
    .as_slice::<u8>()
    .map_err(|e| EngineError::InferenceError(format!("第 {} 个输出无法读取: {}", index, e)))?;
  Ok(slice.to_vec())
}

impl Engine for TractEngine {
  fn run(&mut self, input: &InputTensor) -> Result<RawOutputs, EngineError> {
    debug!("设置模型输入: {:?}", input.shape());
    let tensor = Tensor::from_shape(&input.shape(), input.as_nhwc())
      .map_err(|e| EngineError::InferenceError(format!("无法构建输入张量: {}", e)))?;

    debug!("执行模型推理");
    let outputs = self
      .model
      .run(tvec!(tensor.into()))
      .map_err(|e| EngineError::InferenceError(e.to_string()))?;

    debug!("获取模型输出");
    Ok(RawOutputs {
      boxes: output_f32(&outputs, OUTPUT_BOXES)?,
      detection_count: output_u8(&outputs, OUTPUT_COUNT)?,
      labels: output_f32(&outputs, OUTPUT_LABELS)?,
      scores: output_f32(&outputs, OUTPUT_SCORES)?,
    })
  }
}
