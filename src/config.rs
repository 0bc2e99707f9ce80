// 该文件是 Xunfeng （巡风） 项目的一部分。
// src/config.rs - 流水线配置
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

use std::{path::PathBuf, time::Duration};

use thiserror::Error;
use url::Url;

use crate::model::DetectorOptions;

#[derive(Error, Debug)]
pub enum ConfigError {
  #[error("目标帧率必须大于 0")]
  ZeroFps,
  #[error("JPEG 质量必须在 1 到 100 之间, 实际为 {0}")]
  JpegQuality(u8),
  #[error("{name} 必须在 0.0 到 1.0 之间, 实际为 {value}")]
  Threshold { name: &'static str, value: f32 },
  #[error("帧尺寸必须大于 0, 实际为 {width}x{height}")]
  FrameSize { width: u32, height: u32 },
  #[error("推理尺寸必须大于 0")]
  InferenceSize,
  #[error("推流地址无效: {0}")]
  ServerUrl(#[from] url::ParseError),
}

/// 流水线的全部可调参数。
///
/// 帧率、画质、阈值、尺寸以及两个外部连接的地址都集中在这里，
/// 命令行参数最终被转换为这个结构。
#[derive(Debug, Clone)]
pub struct PipelineConfig {
  pub target_fps: u32,
  pub jpeg_quality: u8,
  pub confidence: f32,
  pub iou_threshold: f32,
  pub width: u32,
  pub height: u32,
  pub inference_size: u32,
  pub server: String,
  pub websocket_path: String,
  pub mqtt_enabled: bool,
  pub mqtt_broker: String,
  pub mqtt_port: u16,
  pub mqtt_topic: String,
  pub mqtt_client_id: String,
  pub models_dir: PathBuf,
  pub loop_input: bool,
  pub max_frames: Option<u64>,
  pub connect_timeout: Duration,
  pub stats_interval: Duration,
}

impl Default for PipelineConfig {
  fn default() -> Self {
    Self {
      target_fps: 5,
      jpeg_quality: 70,
      confidence: 0.6,
      iou_threshold: 0.4,
      width: 640,
      height: 480,
      inference_size: 640,
      server: "ws://127.0.0.1:8080".to_string(),
      websocket_path: "/ws/video-input".to_string(),
      mqtt_enabled: true,
      mqtt_broker: "127.0.0.1".to_string(),
      mqtt_port: 1883,
      mqtt_topic: "topgun/ai".to_string(),
      mqtt_client_id: "xunfeng-stream".to_string(),
      models_dir: PathBuf::from("models"),
      loop_input: true,
      max_frames: None,
      connect_timeout: Duration::from_secs(5),
      stats_interval: Duration::from_secs(2),
    }
  }
}

impl PipelineConfig {
  pub fn validate(&self) -> Result<(), ConfigError> {
    if self.target_fps == 0 {
      return Err(ConfigError::ZeroFps);
    }
    if !(1..=100).contains(&self.jpeg_quality) {
      return Err(ConfigError::JpegQuality(self.jpeg_quality));
    }
    for (name, value) in [
      ("置信度阈值", self.confidence),
      ("IoU 阈值", self.iou_threshold),
    ] {
      if !(0.0..=1.0).contains(&value) {
        return Err(ConfigError::Threshold { name, value });
      }
    }
    if self.width == 0 || self.height == 0 {
      return Err(ConfigError::FrameSize {
        width: self.width,
        height: self.height,
      });
    }
    if self.inference_size == 0 {
      return Err(ConfigError::InferenceSize);
    }
    self.stream_url()?;
    Ok(())
  }

  /// 推流服务地址与 WebSocket 路径拼接后的完整地址
  pub fn stream_url(&self) -> Result<Url, ConfigError> {
    let base = Url::parse(&self.server)?;
    Ok(base.join(&self.websocket_path)?)
  }

  pub fn detector_options(&self) -> DetectorOptions {
    DetectorOptions {
      confidence: self.confidence,
      iou_threshold: self.iou_threshold,
      inference_size: self.inference_size,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn default_config_is_valid() {
    let config = PipelineConfig::default();
    assert!(config.validate().is_ok());
  }

  #[test]
  fn stream_url_joins_path() {
    let config = PipelineConfig {
      server: "ws://10.0.0.2:9000".to_string(),
      ..Default::default()
    };
    assert_eq!(
      config.stream_url().unwrap().as_str(),
      "ws://10.0.0.2:9000/ws/video-input"
    );
  }

  #[test]
  fn rejects_out_of_range_values() {
    let config = PipelineConfig {
      target_fps: 0,
      ..Default::default()
    };
    assert!(matches!(config.validate(), Err(ConfigError::ZeroFps)));

    let config = PipelineConfig {
      jpeg_quality: 0,
      ..Default::default()
    };
    assert!(matches!(config.validate(), Err(ConfigError::JpegQuality(0))));

    let config = PipelineConfig {
      confidence: 1.5,
      ..Default::default()
    };
    assert!(matches!(
      config.validate(),
      Err(ConfigError::Threshold { .. })
    ));

    let config = PipelineConfig {
      height: 0,
      ..Default::default()
    };
    assert!(matches!(
      config.validate(),
      Err(ConfigError::FrameSize { .. })
    ));

    let config = PipelineConfig {
      server: "not a url".to_string(),
      ..Default::default()
    };
    assert!(matches!(config.validate(), Err(ConfigError::ServerUrl(_))));
  }
}
