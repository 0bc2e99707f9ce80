// 该文件是 Xunfeng （巡风） 项目的一部分。
// src/update/mqtt.rs - MQTT 模型更新通道
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

use std::{
  sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
  },
  time::Duration,
};

use rumqttc::{Client, Connection, Event, MqttOptions, Packet, QoS};
use tracing::{debug, info, warn};

use crate::update::{ChannelEvent, ShutdownHook, UpdateChannel, UpdateError};

const KEEP_ALIVE: Duration = Duration::from_secs(60);
// 模型文件经 base64 后可能有上百 MB
const MAX_PACKET_SIZE: usize = 512 * 1024 * 1024;
const REQUEST_CAPACITY: usize = 10;
const INITIAL_BACKOFF: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(120);
const SLEEP_SLICE: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, PartialEq)]
pub struct MqttSettings {
  pub broker: String,
  pub port: u16,
  pub topic: String,
  pub client_id: String,
}

impl MqttSettings {
  fn options(&self) -> MqttOptions {
    let mut options = MqttOptions::new(&self.client_id, &self.broker, self.port);
    options
      .set_keep_alive(KEEP_ALIVE)
      .set_clean_session(true)
      .set_max_packet_size(MAX_PACKET_SIZE, MAX_PACKET_SIZE);
    options
  }
}

/// 订阅单个主题的 MQTT 通道，断线后按指数退避重连并重新订阅
pub struct MqttUpdateChannel {
  client: Client,
  connection: Connection,
  topic: String,
  closed: Arc<AtomicBool>,
  connected_once: bool,
  backoff: Duration,
}

impl MqttUpdateChannel {
  /// 建立客户端并登记订阅，实际连接在第一次 `recv` 时发生
  pub fn connect(settings: &MqttSettings) -> Result<Self, UpdateError> {
    let (client, connection) = Client::new(settings.options(), REQUEST_CAPACITY);
    client.subscribe(settings.topic.as_str(), QoS::AtLeastOnce)?;
    info!(
      "MQTT 客户端 {} -> {}:{}, 主题 {}",
      settings.client_id, settings.broker, settings.port, settings.topic
    );

    Ok(Self {
      client,
      connection,
      topic: settings.topic.clone(),
      closed: Arc::new(AtomicBool::new(false)),
      connected_once: false,
      backoff: INITIAL_BACKOFF,
    })
  }

  fn is_closed(&self) -> bool {
    self.closed.load(Ordering::SeqCst)
  }

  /// 分片睡眠，关闭时尽快返回
  fn wait_backoff(&mut self) {
    let mut remaining = self.backoff;
    while !remaining.is_zero() && !self.is_closed() {
      let step = remaining.min(SLEEP_SLICE);
      std::thread::sleep(step);
      remaining -= step;
    }
    self.backoff = (self.backoff * 2).min(MAX_BACKOFF);
  }

  fn on_connack(&mut self) {
    self.backoff = INITIAL_BACKOFF;
    // 干净会话不保留订阅，重连后需要重新订阅
    if self.connected_once
      && let Err(e) = self.client.try_subscribe(self.topic.as_str(), QoS::AtLeastOnce)
    {
      warn!("重新订阅 {} 失败: {}", self.topic, e);
    }
    self.connected_once = true;
  }
}

impl UpdateChannel for MqttUpdateChannel {
  fn recv(&mut self) -> Option<ChannelEvent> {
    loop {
      if self.is_closed() {
        return None;
      }
      let event = self.connection.iter().next()?;
      if self.is_closed() {
        return None;
      }

      match event {
        Ok(Event::Incoming(Packet::ConnAck(_))) => {
          self.on_connack();
          return Some(ChannelEvent::Connected);
        }
        Ok(Event::Incoming(Packet::Publish(publish))) => {
          return Some(ChannelEvent::Message {
            topic: publish.topic,
            payload: publish.payload.to_vec(),
          });
        }
        Ok(Event::Incoming(Packet::SubAck(_))) => {
          debug!("已订阅 {}", self.topic);
        }
        Ok(_) => {}
        Err(e) => {
          let reason = e.to_string();
          debug!("{:?} 后重连", self.backoff);
          self.wait_backoff();
          return Some(ChannelEvent::Disconnected(reason));
        }
      }
    }
  }

  fn shutdown_hook(&self) -> ShutdownHook {
    let closed = Arc::clone(&self.closed);
    let client = self.client.clone();
    ShutdownHook::new(move || {
      closed.store(true, Ordering::SeqCst);
      // 唤醒阻塞在事件循环上的监听线程
      if let Err(e) = client.try_disconnect() {
        debug!("断开 MQTT 连接: {}", e);
      }
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn settings() -> MqttSettings {
    MqttSettings {
      broker: "127.0.0.1".to_string(),
      port: 1883,
      topic: "topgun/ai".to_string(),
      client_id: "xunfeng-test".to_string(),
    }
  }

  #[test]
  fn options_carry_broker_and_session_settings() {
    let options = settings().options();
    assert_eq!(options.broker_address(), ("127.0.0.1".to_string(), 1883));
    assert_eq!(options.client_id(), "xunfeng-test");
    assert_eq!(options.keep_alive(), KEEP_ALIVE);
    assert!(options.clean_session());
  }

  #[test]
  fn backoff_doubles_up_to_limit() {
    let mut channel = MqttUpdateChannel::connect(&settings()).unwrap();
    channel.shutdown_hook().fire();
    for _ in 0..10 {
      channel.wait_backoff();
    }
    assert_eq!(channel.backoff, MAX_BACKOFF);
    channel.on_connack();
    assert_eq!(channel.backoff, INITIAL_BACKOFF);
  }

  #[test]
  fn closed_channel_yields_nothing() {
    let mut channel = MqttUpdateChannel::connect(&settings()).unwrap();
    channel.shutdown_hook().fire();
    assert_eq!(channel.recv(), None);
  }
}
