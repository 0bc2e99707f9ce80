// 该文件是 Xunfeng （巡风） 项目的一部分。
// src/output.rs - 结果输出
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use thiserror::Error;

pub mod draw;

mod encode;
pub use self::encode::{FrameEncoder, StreamMessage};

mod publisher;
pub use self::publisher::{ConnectionState, ConnectionStatus, PublishOutcome, StreamPublisher, Transport};

mod websocket;
pub use self::websocket::{WebSocketError, WebSocketTransport};

#[derive(Error, Debug)]
pub enum OutputError {
  #[error("JPEG 编码错误: {0}")]
  Encode(#[from] image::ImageError),
  #[error("消息序列化错误: {0}")]
  Serialize(#[from] serde_json::Error),
  #[error("WebSocket 错误: {0}")]
  WebSocket(#[from] WebSocketError),
}
