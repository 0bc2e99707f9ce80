// 该文件是 Xunfeng （巡风） 项目的一部分。
// src/frame.rs - NHWC 帧定义
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

pub const RGB_CHANNELS: usize = 3;

/// 按 NHWC 排列的 RGB 帧，尺寸在运行时确定
#[derive(Debug, Clone, PartialEq)]
pub struct RgbFrame {
  width: u32,
  height: u32,
  data: Box<[u8]>,
}

impl RgbFrame {
  /// 全黑帧，用于模型预热
  pub fn blank(width: u32, height: u32) -> Self {
    let size = RGB_CHANNELS * (width as usize) * (height as usize);
    Self {
      width,
      height,
      data: vec![0u8; size].into_boxed_slice(),
    }
  }

  pub fn from_raw(width: u32, height: u32, data: Vec<u8>) -> Option<Self> {
    if data.len() != RGB_CHANNELS * width as usize * height as usize {
      return None;
    }
    Some(Self {
      width,
      height,
      data: data.into_boxed_slice(),
    })
  }

  pub fn width(&self) -> u32 {
    self.width
  }

  pub fn height(&self) -> u32 {
    self.height
  }

  pub fn as_nhwc(&self) -> &[u8] {
    &self.data
  }

  /// 缩放到目标尺寸，尺寸相同时直接克隆
  pub fn resized(&self, width: u32, height: u32) -> Self {
    if self.width == width && self.height == height {
      return self.clone();
    }
    let image = image::imageops::resize(&self.to_rgb_image(), width, height, FilterType::Triangle);
    Self::from(image)
  }

  pub fn to_rgb_image(&self) -> RgbImage {
    // 尺寸在构造时已校验
    RgbImage::from_raw(self.width, self.height, self.data.to_vec())
      .unwrap_or_else(|| RgbImage::new(self.width, self.height))
  }
}

impl From<RgbImage> for RgbFrame {
  fn from(image: RgbImage) -> Self {
    let (width, height) = image.dimensions();
    Self {
      width,
      height,
      data: image.into_raw().into_boxed_slice(),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use image::Rgb;

  #[test]
  fn from_raw_checks_length() {
    assert!(RgbFrame::from_raw(2, 2, vec![0; 12]).is_some());
    assert!(RgbFrame::from_raw(2, 2, vec![0; 11]).is_none());
  }

  #[test]
  fn image_conversion_keeps_pixels() {
    let mut image = RgbImage::new(3, 2);
    image.put_pixel(2, 1, Rgb([10, 20, 30]));
    let frame = RgbFrame::from(image.clone());
    assert_eq!(frame.width(), 3);
    assert_eq!(frame.height(), 2);
    assert_eq!(&frame.as_nhwc()[15..18], &[10, 20, 30]);
    assert_eq!(frame.to_rgb_image(), image);
  }

  #[test]
  fn resize_changes_dimensions() {
    let frame = RgbFrame::blank(64, 48);
    let resized = frame.resized(32, 16);
    assert_eq!((resized.width(), resized.height()), (32, 16));
    assert_eq!(resized.as_nhwc().len(), 32 * 16 * 3);
    assert_eq!(frame.resized(64, 48), frame);
  }
}
