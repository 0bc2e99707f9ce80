// 该文件是 Xunfeng （巡风） 项目的一部分。
// src/update.rs - 模型热更新
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

//! 通过发布/订阅通道接收模型文件，落盘后加载、预热并替换在用模型。

use thiserror::Error;

mod channel;
mod listener;
mod message;
mod mqtt;
mod persist;

pub use self::channel::{ChannelEvent, MemoryChannel, MemorySender, ShutdownHook, UpdateChannel};
pub use self::listener::{ListenerHandle, ModelUpdateListener, UpdateOutcome};
pub use self::message::{DecodeError, ModelUpdatePayload};
pub use self::mqtt::{MqttSettings, MqttUpdateChannel};
pub use self::persist::{ModelStore, PersistError};

#[derive(Error, Debug)]
pub enum UpdateError {
  #[error("MQTT 客户端错误: {0}")]
  Mqtt(#[from] rumqttc::ClientError),
  #[error("监听线程启动失败: {0}")]
  Spawn(#[from] std::io::Error),
}
