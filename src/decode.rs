// 该文件是 Tanjing （探镜） 项目的一部分。
// src/decode.rs - 检测结果解码
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
use tracing::debug;

use crate::model::{BoundingBox, Detection};

/// 单次推理最多输出的检测数量
pub const MAX_DETECTIONS: usize = 1000;
/// 检测数量由 4 个字节分段累加
pub const COUNT_CHUNKS: usize = 4;
/// 分段饱和值，表示数量在下一段继续
pub const COUNT_CHUNK_SATURATED: u8 = u8::MAX;

const BOX_COORDS: usize = 4;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
  #[error("检测数量张量长度应为 4, 实际为 {0}")]
  CountLength(usize),
  #[error("边界框张量长度 {0} 不是 4 的整数倍")]
  BoxesNotAligned(usize),
  #[error("检测条目数 {0} 超过上限 1000")]
  TooManyEntries(usize),
  #[error("{name} 张量长度不匹配: 期望 {expected}, 实际 {actual}")]
  LengthMismatch {
    name: &'static str,
    expected: usize,
    actual: usize,
  },
  #[error("图像尺寸无效: 原图 {src_width}x{src_height}, 模型 {dst_width}x{dst_height}")]
  DegenerateDimensions {
    src_width: u32,
    src_height: u32,
    dst_width: u32,
    dst_height: u32,
  },
}

/// 单张图片推理得到的四个输出张量
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawOutputs {
  /// `[1, N, 4]`，每项为模型输入坐标系下归一化的 `(x1, y1, x2, y2)`
  pub boxes: Vec<f32>,
  /// `[4]`，饱和分段计数
  pub detection_count: Vec<u8>,
  /// `[1, N]`，类别索引，解码时不使用
  pub labels: Vec<f32>,
  /// `[1, N]`，与 `boxes` 逐项对应
  pub scores: Vec<f32>,
}

impl RawOutputs {
  /// 张量中实际包含的检测条目数
  pub fn entries(&self) -> usize {
    self.scores.len()
  }

  pub fn validate(&self) -> Result<(), DecodeError> {
    if self.detection_count.len() != COUNT_CHUNKS {
      return Err(DecodeError::CountLength(self.detection_count.len()));
    }
    if self.boxes.len() % BOX_COORDS != 0 {
      return Err(DecodeError::BoxesNotAligned(self.boxes.len()));
    }
    let entries = self.boxes.len() / BOX_COORDS;
    if entries > MAX_DETECTIONS {
      return Err(DecodeError::TooManyEntries(entries));
    }
    if self.scores.len() != entries {
      return Err(DecodeError::LengthMismatch {
        name: "scores",
        expected: entries,
        actual: self.scores.len(),
      });
    }
    if self.labels.len() != entries {
      return Err(DecodeError::LengthMismatch {
        name: "labels",
        expected: entries,
        actual: self.labels.len(),
      });
    }
    Ok(())
  }
}

/// 解码饱和分段计数
///
/// 依次累加各段，遇到小于 255 的段即为最后一段。结果不超过
/// `available` 与 [`MAX_DETECTIONS`]。
pub fn detection_count(chunks: &[u8], available: usize) -> usize {
  let mut total = 0usize;
  for &chunk in chunks.iter().take(COUNT_CHUNKS) {
    total += chunk as usize;
    if chunk < COUNT_CHUNK_SATURATED {
      break;
    }
  }
  total.min(available).min(MAX_DETECTIONS)
}

/// 抵消预处理拉伸的仿射变换 `x' = ax * x + bx`, `y' = ay * y + by`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AspectCorrection {
  pub ax: f64,
  pub bx: f64,
  pub ay: f64,
  pub by: f64,
}

impl AspectCorrection {
  pub const IDENTITY: AspectCorrection = AspectCorrection {
    ax: 1.0,
    bx: 0.0,
    ay: 1.0,
    by: 0.0,
  };

  /// 根据原图尺寸 `src` 与模型输入尺寸 `dst` 计算校正
  pub fn between(
    src_width: u32,
    src_height: u32,
    dst_width: u32,
    dst_height: u32,
  ) -> Result<Self, DecodeError> {
    if src_width == 0 || src_height == 0 || dst_width == 0 || dst_height == 0 {
      return Err(DecodeError::DegenerateDimensions {
        src_width,
        src_height,
        dst_width,
        dst_height,
      });
    }

    // dst_ratio 与 src_ratio 的比较用整数交叉相乘，避免浮点误差
    let dst_cross = dst_width as u64 * src_height as u64;
    let src_cross = src_width as u64 * dst_height as u64;
    if dst_cross == src_cross {
      return Ok(Self::IDENTITY);
    }

    let src_ratio = src_width as f64 / src_height as f64;
    let dst_ratio = dst_width as f64 / dst_height as f64;

    if dst_cross > src_cross {
      let src_width = src_width as f64;
      let not_scaled_width = src_width * dst_ratio / src_ratio;
      let ax = not_scaled_width / src_width;
      let bx = -ax * (not_scaled_width - src_width) / 2.0 / not_scaled_width;
      Ok(Self {
        ax,
        bx,
        ..Self::IDENTITY
      })
    } else {
      let src_height = src_height as f64;
      let not_scaled_height = src_height * src_ratio / dst_ratio;
      let ay = not_scaled_height / src_height;
      let by = -ay * (not_scaled_height - src_height) / 2.0 / not_scaled_height;
      Ok(Self {
        ay,
        by,
        ..Self::IDENTITY
      })
    }
  }

  pub fn is_identity(&self) -> bool {
    *self == Self::IDENTITY
  }

  pub fn map_x(&self, x: f32) -> f32 {
    (self.ax * x as f64 + self.bx) as f32
  }

  pub fn map_y(&self, y: f32) -> f32 {
    (self.ay * y as f64 + self.by) as f32
  }

  pub fn apply(&self, &[x1, y1, x2, y2]: &[f32; BOX_COORDS]) -> BoundingBox {
    BoundingBox {
      left: self.map_x(x1),
      top: self.map_y(y1),
      right: self.map_x(x2),
      bottom: self.map_y(y2),
    }
  }
}

/// 将原始输出转换为原图坐标系下的检测结果
///
/// 保持原始顺序，不做阈值过滤、不做 NMS、不做截断。
pub fn decode(
  raw: &RawOutputs,
  src_width: u32,
  src_height: u32,
  dst_width: u32,
  dst_height: u32,
) -> Result<Vec<Detection>, DecodeError> {
  raw.validate()?;
  let correction = AspectCorrection::between(src_width, src_height, dst_width, dst_height)?;
  let count = detection_count(&raw.detection_count, raw.entries());
  debug!(
    "解码 {} 个检测结果, 分段计数 {:?}, 校正 {:?}",
    count, raw.detection_count, correction
  );

  let detections: Vec<Detection> = raw
    .boxes
    .chunks_exact(BOX_COORDS)
    .zip(raw.scores.iter())
    .take(count)
    .map(|(coords, &score)| -> Result<Detection, DecodeError> {
      let coords: &[f32; BOX_COORDS] = coords
        .try_into()
        .map_err(|_| DecodeError::BoxesNotAligned(raw.boxes.len()))?;
      Ok(Detection {
        bbox: correction.apply(coords),
        score,
      })
    })
    .collect::<Result<_, _>>()?;

  Ok(detections)
}
