// 该文件是 Xunfeng （巡风） 项目的一部分。
// src/update/channel.rs - 模型更新通道
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
    mpsc::{self, Receiver, RecvTimeoutError, Sender},
  },
  time::Duration,
};

const MEMORY_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// 通道投递给处理函数的事件
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
  Connected,
  Message { topic: String, payload: Vec<u8> },
  Disconnected(String),
}

/// 关闭通道的回调，由监听线程之外的一方调用
pub struct ShutdownHook(Box<dyn FnOnce() + Send>);

impl ShutdownHook {
  pub fn new(f: impl FnOnce() + Send + 'static) -> Self {
    Self(Box::new(f))
  }

  pub fn fire(self) {
    (self.0)()
  }
}

/// 入站发布/订阅连接的抽象。
///
/// `recv` 阻塞直到下一个事件，返回 `None` 表示通道已关闭。
pub trait UpdateChannel: Send + 'static {
  fn recv(&mut self) -> Option<ChannelEvent>;

  fn shutdown_hook(&self) -> ShutdownHook;
}

/// 进程内通道，用于注入事件
pub struct MemoryChannel {
  receiver: Receiver<ChannelEvent>,
  closed: Arc<AtomicBool>,
}

#[derive(Clone)]
pub struct MemorySender {
  sender: Sender<ChannelEvent>,
}

impl MemorySender {
  pub fn send(&self, event: ChannelEvent) -> bool {
    self.sender.send(event).is_ok()
  }

  pub fn publish(&self, topic: &str, payload: Vec<u8>) -> bool {
    self.send(ChannelEvent::Message {
      topic: topic.to_string(),
      payload,
    })
  }
}

impl MemoryChannel {
  pub fn new() -> (MemorySender, MemoryChannel) {
    let (sender, receiver) = mpsc::channel();
    (
      MemorySender { sender },
      MemoryChannel {
        receiver,
        closed: Arc::new(AtomicBool::new(false)),
      },
    )
  }
}

impl UpdateChannel for MemoryChannel {
  fn recv(&mut self) -> Option<ChannelEvent> {
    loop {
      if self.closed.load(Ordering::SeqCst) {
        return None;
      }
      match self.receiver.recv_timeout(MEMORY_POLL_INTERVAL) {
        Ok(event) => return Some(event),
        Err(RecvTimeoutError::Timeout) => continue,
        Err(RecvTimeoutError::Disconnected) => return None,
      }
    }
  }

  fn shutdown_hook(&self) -> ShutdownHook {
    let closed = Arc::clone(&self.closed);
    ShutdownHook::new(move || closed.store(true, Ordering::SeqCst))
  }
}
