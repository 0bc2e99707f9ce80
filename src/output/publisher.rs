// 该文件是 Xunfeng （巡风） 项目的一部分。
// src/output/publisher.rs - 推流发布
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

use std::sync::{
  Arc,
  atomic::{AtomicBool, Ordering},
};

use tracing::{info, warn};

use crate::output::{OutputError, StreamMessage};

const FAILURE_LOG_EVERY: u64 = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
  Connected,
  Disconnected,
}

/// 出站连接状态，由传输层更新、发布端读取
#[derive(Debug, Clone, Default)]
pub struct ConnectionStatus(Arc<AtomicBool>);

impl ConnectionStatus {
  pub fn new(state: ConnectionState) -> Self {
    let status = Self::default();
    status.set(state);
    status
  }

  pub fn set(&self, state: ConnectionState) {
    self.0.store(state == ConnectionState::Connected, Ordering::SeqCst);
  }

  pub fn state(&self) -> ConnectionState {
    if self.0.load(Ordering::SeqCst) {
      ConnectionState::Connected
    } else {
      ConnectionState::Disconnected
    }
  }

  pub fn is_connected(&self) -> bool {
    self.state() == ConnectionState::Connected
  }
}

/// 出站传输。`send` 不得阻塞主循环
pub trait Transport: Send {
  fn send(&self, message: &str) -> Result<(), OutputError>;

  fn status(&self) -> ConnectionStatus;

  /// 发送完已排队的消息后关闭
  fn close(&mut self);

  /// 已经 `send` 成功、但断线后没能写出的消息总数
  fn discarded(&self) -> u64 {
    0
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishOutcome {
  Sent,
  /// 未连接，消息未发送
  Dropped,
  Failed,
}

pub struct StreamPublisher<T: Transport> {
  transport: T,
  status: ConnectionStatus,
  last_state: ConnectionState,
  sent: u64,
  dropped: u64,
  failed: u64,
  discarded: u64,
}

impl<T: Transport> StreamPublisher<T> {
  pub fn new(transport: T) -> Self {
    let status = transport.status();
    let last_state = status.state();
    Self {
      transport,
      status,
      last_state,
      sent: 0,
      dropped: 0,
      failed: 0,
      discarded: 0,
    }
  }

  pub fn publish(&mut self, message: &StreamMessage) -> PublishOutcome {
    let state = self.status.state();
    if state != self.last_state {
      match state {
        ConnectionState::Connected => info!("推流连接已恢复"),
        ConnectionState::Disconnected => warn!("推流连接已断开, 帧将被丢弃"),
      }
      self.last_state = state;
    }
    if state == ConnectionState::Disconnected {
      self.dropped += 1;
      return PublishOutcome::Dropped;
    }

    match message.to_json().and_then(|json| self.transport.send(&json)) {
      Ok(()) => {
        self.sent += 1;
        PublishOutcome::Sent
      }
      Err(e) => {
        self.failed += 1;
        if self.failed % FAILURE_LOG_EVERY == 1 {
          warn!("发送失败 (累计 {} 次): {}", self.failed, e);
        }
        PublishOutcome::Failed
      }
    }
  }

  pub fn sent(&self) -> u64 {
    self.sent
  }

  pub fn dropped(&self) -> u64 {
    self.dropped
  }

  pub fn failed(&self) -> u64 {
    self.failed
  }

  pub fn transport(&self) -> &T {
    &self.transport
  }

  /// 上次调用以来传输层丢弃的已排队消息数
  pub fn take_discarded(&mut self) -> u64 {
    let total = self.transport.discarded();
    let fresh = total.saturating_sub(self.discarded);
    self.discarded = total;
    fresh
  }

  /// 关闭传输，返回关闭过程中新丢弃的消息数
  pub fn close(&mut self) -> u64 {
    self.transport.close();
    self.take_discarded()
  }
}
