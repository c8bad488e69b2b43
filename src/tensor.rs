// 该文件是 Tanjing （探镜） 项目的一部分。
// src/tensor.rs - NHWC 输入张量定义
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

pub const RGB_CHANNELS: usize = 3;

/// 归一化后的模型输入，布局为 `[1, H, W, C]`
#[derive(Debug, Clone, PartialEq)]
pub struct InputTensor {
  data: Box<[f32]>,
  height: usize,
  width: usize,
}

impl InputTensor {
  /// 从 NHWC 排列的数据创建张量，长度不匹配时返回 `None`
  pub fn from_nhwc(data: Vec<f32>, height: usize, width: usize) -> Option<Self> {
    if data.len() != RGB_CHANNELS * height * width {
      return None;
    }

    Some(Self {
      data: data.into_boxed_slice(),
      height,
      width,
    })
  }

  pub fn height(&self) -> usize {
    self.height
  }

  pub fn width(&self) -> usize {
    self.width
  }

  pub fn channels(&self) -> usize {
    RGB_CHANNELS
  }

  pub fn shape(&self) -> [usize; 4] {
    [1, self.height, self.width, RGB_CHANNELS]
  }

  pub fn get(&self, y: usize, x: usize, c: usize) -> Option<f32> {
    if y >= self.height || x >= self.width || c >= RGB_CHANNELS {
      return None;
    }
    self
      .data
      .get((y * self.width + x) * RGB_CHANNELS + c)
      .copied()
  }

  pub fn as_nhwc(&self) -> &[f32] {
    &self.data
  }
}
