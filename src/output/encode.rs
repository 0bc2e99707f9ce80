// 该文件是 Xunfeng （巡风） 项目的一部分。
// src/output/encode.rs - 推流消息编码
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

use base64::{Engine as _, engine::general_purpose::STANDARD};
use image::{RgbImage, codecs::jpeg::JpegEncoder};
use serde::Serialize;

use crate::{
  frame::RgbFrame,
  output::{OutputError, draw::Draw},
  task::FrameResult,
};

/// 每个已处理帧对应一条出站消息
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StreamMessage {
  /// base64 编码的 JPEG
  pub frame: String,
  pub timestamp: f64,
  pub frame_number: u64,
  pub detections: usize,
  pub width: u32,
  pub height: u32,
  pub model: String,
}

impl StreamMessage {
  pub fn to_json(&self) -> Result<String, OutputError> {
    Ok(serde_json::to_string(self)?)
  }
}

/// 画框、压缩为 JPEG 并组装消息
#[derive(Debug, Clone)]
pub struct FrameEncoder {
  quality: u8,
  draw: Draw,
}

impl FrameEncoder {
  pub fn new(quality: u8) -> Self {
    Self {
      quality: quality.clamp(1, 100),
      draw: Draw::default(),
    }
  }

  pub fn encode(&self, frame: &RgbFrame, result: &FrameResult) -> Result<StreamMessage, OutputError> {
    let mut image = frame.to_rgb_image();
    self.draw.draw_detections(&mut image, &result.detections);
    let jpeg = self.encode_jpeg(&image)?;

    Ok(StreamMessage {
      frame: STANDARD.encode(jpeg),
      timestamp: result.timestamp,
      frame_number: result.frame_index,
      detections: result.detections.len(),
      width: image.width(),
      height: image.height(),
      model: result.model_name.clone(),
    })
  }

  fn encode_jpeg(&self, image: &RgbImage) -> Result<Vec<u8>, OutputError> {
    let mut buffer = Vec::new();
    JpegEncoder::new_with_quality(&mut buffer, self.quality).encode_image(image)?;
    Ok(buffer)
  }
}

#[cfg(test)]
mod tests {
  use std::time::Duration;

  use super::*;
  use crate::model::{BoundingBox, DetectItem, DetectResult};

  fn frame_result() -> FrameResult {
    FrameResult {
      frame_index: 7,
      timestamp: 1_700_000_000.25,
      detections: DetectResult::new(vec![DetectItem {
        class_id: 1,
        score: 0.8,
        bbox: BoundingBox::from_corners(2.0, 2.0, 12.0, 10.0),
      }]),
      model_name: "model_20250314_150926.rknn".to_string(),
      inference_time: Duration::from_millis(12),
    }
  }

  #[test]
  fn message_carries_frame_metadata_and_jpeg() {
    let message = FrameEncoder::new(70)
      .encode(&RgbFrame::blank(32, 24), &frame_result())
      .unwrap();
    assert_eq!(message.frame_number, 7);
    assert_eq!(message.detections, 1);
    assert_eq!((message.width, message.height), (32, 24));
    assert_eq!(message.model, "model_20250314_150926.rknn");

    let jpeg = STANDARD.decode(&message.frame).unwrap();
    assert_eq!(&jpeg[..2], &[0xFF, 0xD8]);
    let decoded = image::load_from_memory(&jpeg).unwrap();
    assert_eq!((decoded.width(), decoded.height()), (32, 24));
  }

  #[test]
  fn json_uses_wire_field_names() {
    let message = FrameEncoder::new(50)
      .encode(&RgbFrame::blank(8, 8), &frame_result())
      .unwrap();
    let value: serde_json::Value = serde_json::from_str(&message.to_json().unwrap()).unwrap();
    for key in ["frame", "timestamp", "frame_number", "detections", "width", "height", "model"] {
      assert!(value.get(key).is_some(), "missing {key}");
    }
    assert_eq!(value["timestamp"], 1_700_000_000.25);
  }
}
