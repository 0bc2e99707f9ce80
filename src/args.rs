// 该文件是 Xunfeng （巡风） 项目的一部分。
// src/args.rs - 项目参数配置
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use std::{path::PathBuf, time::Duration};

use clap::Parser;
use url::Url;

use xunfeng::config::PipelineConfig;

/// Xunfeng 检测推流参数配置
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 模型路径，指向目录时使用其中最新的模型
  /// 例如: yolo26:///opt/models/best.rknn 或 yolo26:///opt/models
  #[arg(long, env = "XUNFENG_MODEL", value_name = "MODEL")]
  pub model: Url,

  /// 输入来源
  /// - 图片或图片目录: image:///path/to/frames
  /// - 视频文件: gst://file/path/to/video.mp4
  #[arg(long, env = "XUNFENG_INPUT", value_name = "SOURCE")]
  pub input: Url,

  /// 目标帧率
  #[arg(long, env = "XUNFENG_FPS", default_value = "5", value_name = "FPS")]
  pub fps: u32,

  /// JPEG 质量 (1 - 100)
  #[arg(long, env = "XUNFENG_QUALITY", default_value = "70", value_name = "QUALITY")]
  pub quality: u8,

  /// 置信度阈值 (0.0 - 1.0)
  #[arg(long, env = "XUNFENG_CONF", default_value = "0.6", value_name = "THRESHOLD")]
  pub conf: f32,

  /// NMS IoU 阈值 (0.0 - 1.0)
  #[arg(long, env = "XUNFENG_IOU", default_value = "0.4", value_name = "THRESHOLD")]
  pub iou: f32,

  /// 推流帧宽度
  #[arg(long, env = "XUNFENG_WIDTH", default_value = "640")]
  pub width: u32,

  /// 推流帧高度
  #[arg(long, env = "XUNFENG_HEIGHT", default_value = "480")]
  pub height: u32,

  /// 推理输入尺寸
  #[arg(long, env = "XUNFENG_IMGSZ", default_value = "640")]
  pub imgsz: u32,

  /// 推流服务地址
  #[arg(long, env = "XUNFENG_SERVER", default_value = "ws://127.0.0.1:8080", value_name = "URL")]
  pub server: String,

  /// WebSocket 路径
  #[arg(long, env = "XUNFENG_WS_PATH", default_value = "/ws/video-input")]
  pub ws_path: String,

  /// MQTT 服务器
  #[arg(long, env = "XUNFENG_MQTT_BROKER", default_value = "127.0.0.1", value_name = "HOST")]
  pub mqtt_broker: String,

  #[arg(long, env = "XUNFENG_MQTT_PORT", default_value = "1883")]
  pub mqtt_port: u16,

  /// 模型更新主题
  #[arg(long, env = "XUNFENG_TOPIC", default_value = "topgun/ai")]
  pub topic: String,

  #[arg(long, env = "XUNFENG_CLIENT_ID", default_value = "xunfeng-stream")]
  pub client_id: String,

  /// 不接收模型更新
  #[arg(long)]
  pub no_mqtt: bool,

  /// 新模型的保存目录
  #[arg(long, env = "XUNFENG_MODELS_DIR", default_value = "models", value_name = "DIR")]
  pub models_dir: PathBuf,

  /// 输入结束后不再循环播放
  #[arg(long)]
  pub no_loop: bool,

  /// 最大处理帧数
  #[arg(long, value_name = "COUNT")]
  pub max_frames: Option<u64>,

  /// 连接超时（秒）
  #[arg(long, default_value = "5", value_name = "SECONDS")]
  pub connect_timeout: u64,
}

impl Args {
  pub fn pipeline_config(&self) -> PipelineConfig {
    PipelineConfig {
      target_fps: self.fps,
      jpeg_quality: self.quality,
      confidence: self.conf,
      iou_threshold: self.iou,
      width: self.width,
      height: self.height,
      inference_size: self.imgsz,
      server: self.server.clone(),
      websocket_path: self.ws_path.clone(),
      mqtt_enabled: !self.no_mqtt,
      mqtt_broker: self.mqtt_broker.clone(),
      mqtt_port: self.mqtt_port,
      mqtt_topic: self.topic.clone(),
      mqtt_client_id: self.client_id.clone(),
      models_dir: self.models_dir.clone(),
      loop_input: !self.no_loop,
      max_frames: self.max_frames,
      connect_timeout: Duration::from_secs(self.connect_timeout),
      ..PipelineConfig::default()
    }
  }
}
