// 该文件是 Tanjing （探镜） 项目的一部分。
// src/preprocess.rs - 图像预处理
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

use image::{RgbImage, imageops::FilterType};
use thiserror::Error;
use tracing::debug;

use crate::tensor::{InputTensor, RGB_CHANNELS};

const PIXEL_MAX: f32 = 255.0;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PreprocessError {
  #[error("图像尺寸无效: {width}x{height}")]
  DegenerateImage { width: u32, height: u32 },
  #[error("目标尺寸无效: {width}x{height}")]
  DegenerateTarget { width: u32, height: u32 },
}

/// 将图像拉伸到模型输入尺寸并归一化到 [0, 1]
///
/// 不保持宽高比，画面直接拉伸铺满目标尺寸。宽高比的失真由
/// [`crate::decode::AspectCorrection`] 在后处理阶段补偿。
pub fn prepare(
  image: &RgbImage,
  target_width: u32,
  target_height: u32,
) -> Result<InputTensor, PreprocessError> {
  let (width, height) = image.dimensions();
  if width == 0 || height == 0 {
    return Err(PreprocessError::DegenerateImage { width, height });
  }
  if target_width == 0 || target_height == 0 {
    return Err(PreprocessError::DegenerateTarget {
      width: target_width,
      height: target_height,
    });
  }

  debug!(
    "拉伸图像: {}x{} -> {}x{}",
    width, height, target_width, target_height
  );
  let resized = if (width, height) == (target_width, target_height) {
    image.clone()
  } else {
    image::imageops::resize(image, target_width, target_height, FilterType::Triangle)
  };

  let data: Vec<f32> = resized
    .into_raw()
    .into_iter()
    .map(|value| value as f32 / PIXEL_MAX)
    .collect();
  debug_assert_eq!(
    data.len(),
    RGB_CHANNELS * target_width as usize * target_height as usize
  );

  // 长度由 resize 的输出尺寸保证
  InputTensor::from_nhwc(data, target_height as usize, target_width as usize).ok_or(
    PreprocessError::DegenerateTarget {
      width: target_width,
      height: target_height,
    },
  )
}

#[cfg(test)]
mod tests {
  use super::*;
  use image::Rgb;

  #[test]
  fn white_image_normalizes_to_one() {
    let image = RgbImage::from_pixel(10, 10, Rgb([255, 255, 255]));
    let tensor = prepare(&image, 2, 2).unwrap();

    assert_eq!(tensor.shape(), [1, 2, 2, 3]);
    assert!(tensor.as_nhwc().iter().all(|&v| v == 1.0));
  }

  #[test]
  fn black_image_normalizes_to_zero() {
    let image = RgbImage::from_pixel(7, 3, Rgb([0, 0, 0]));
    let tensor = prepare(&image, 4, 4).unwrap();

    assert!(tensor.as_nhwc().iter().all(|&v| v == 0.0));
  }

  #[test]
  fn stretches_to_exact_target_shape() {
    let image = RgbImage::from_pixel(40, 10, Rgb([10, 20, 30]));
    let tensor = prepare(&image, 3, 5).unwrap();

    assert_eq!(tensor.shape(), [1, 5, 3, 3]);
    assert_eq!(tensor.as_nhwc().len(), 45);
  }

  #[test]
  fn wide_image_is_stretched_not_padded() {
    // 左半黑、右半白，拉伸后每一行都应从黑过渡到白
    let image = RgbImage::from_fn(40, 10, |x, _| {
      if x < 20 {
        Rgb([0, 0, 0])
      } else {
        Rgb([255, 255, 255])
      }
    });
    let tensor = prepare(&image, 4, 4).unwrap();

    for y in 0..4 {
      for c in 0..3 {
        let left = tensor.get(y, 0, c).unwrap();
        let right = tensor.get(y, 3, c).unwrap();
        assert!(left < 0.05, "row {y} left = {left}");
        assert!(right > 0.95, "row {y} right = {right}");
      }
    }
  }

  #[test]
  fn keeps_channel_order() {
    let image = RgbImage::from_pixel(2, 2, Rgb([255, 0, 51]));
    let tensor = prepare(&image, 2, 2).unwrap();

    assert_eq!(tensor.get(1, 1, 0), Some(1.0));
    assert_eq!(tensor.get(1, 1, 1), Some(0.0));
    assert_eq!(tensor.get(1, 1, 2), Some(0.2));
  }

  #[test]
  fn rejects_zero_area_image() {
    let image = RgbImage::new(0, 5);
    assert_eq!(
      prepare(&image, 2, 2),
      Err(PreprocessError::DegenerateImage {
        width: 0,
        height: 5
      })
    );
  }

  #[test]
  fn rejects_zero_target() {
    let image = RgbImage::new(3, 3);
    assert!(matches!(
      prepare(&image, 0, 2),
      Err(PreprocessError::DegenerateTarget { .. })
    ));
  }
}
