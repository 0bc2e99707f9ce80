// 该文件是 Xunfeng （巡风） 项目的一部分。
// src/output/websocket.rs - WebSocket 推流
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
  io::ErrorKind,
  net::TcpStream,
  sync::{
    Arc,
    atomic::{AtomicBool, AtomicU64, Ordering},
    mpsc::{self, Receiver, RecvTimeoutError, SyncSender, TrySendError},
  },
  thread::{self, JoinHandle},
  time::Duration,
};

use thiserror::Error;
use tracing::{debug, error, info, warn};
use tungstenite::{Message, WebSocket};
use url::Url;

use crate::output::{ConnectionState, ConnectionStatus, OutputError, Transport};

const QUEUE_CAPACITY: usize = 8;
const POLL_INTERVAL: Duration = Duration::from_millis(20);
const READ_POLL: Duration = Duration::from_millis(5);
const INITIAL_BACKOFF: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(30);
const SLEEP_SLICE: Duration = Duration::from_millis(100);

#[derive(Error, Debug)]
pub enum WebSocketError {
  #[error("不支持的 URI 方案: {0}")]
  Scheme(String),
  #[error("无法解析地址 {0}: {1}")]
  Resolve(String, std::io::Error),
  #[error("无法连接到 {0}: {1}")]
  Connect(String, std::io::Error),
  #[error("握手失败: {0}")]
  Handshake(String),
  #[error("IO 错误: {0}")]
  Io(#[from] std::io::Error),
  #[error("发送队列已满")]
  QueueFull,
  #[error("连接已关闭")]
  Closed,
}

type Socket = WebSocket<TcpStream>;

/// 基于 tungstenite 的出站连接。
///
/// 套接字由独立的写线程持有，发布端只往有界队列里投递，不会阻塞主循环。
/// 断线后写线程按退避间隔重连。
pub struct WebSocketTransport {
  sender: Option<SyncSender<String>>,
  status: ConnectionStatus,
  closed: Arc<AtomicBool>,
  discarded: Arc<AtomicU64>,
  worker: Option<JoinHandle<()>>,
}

impl WebSocketTransport {
  /// 在超时内完成首次握手，失败即返回错误
  pub fn connect(url: &Url, timeout: Duration) -> Result<Self, WebSocketError> {
    let socket = open(url, timeout)?;
    info!("WebSocket 已连接: {}", url);

    let status = ConnectionStatus::new(ConnectionState::Connected);
    let closed = Arc::new(AtomicBool::new(false));
    let discarded = Arc::new(AtomicU64::new(0));
    let (sender, receiver) = mpsc::sync_channel(QUEUE_CAPACITY);

    let writer = Writer {
      url: url.clone(),
      timeout,
      socket: Some(socket),
      receiver,
      status: status.clone(),
      closed: Arc::clone(&closed),
      discarded: Arc::clone(&discarded),
      backoff: INITIAL_BACKOFF,
    };
    let worker = thread::Builder::new()
      .name("ws-writer".into())
      .spawn(move || writer.run())?;

    Ok(Self {
      sender: Some(sender),
      status,
      closed,
      discarded,
      worker: Some(worker),
    })
  }
}

impl Transport for WebSocketTransport {
  fn send(&self, message: &str) -> Result<(), OutputError> {
    let sender = self.sender.as_ref().ok_or(WebSocketError::Closed)?;
    sender.try_send(message.to_string()).map_err(|e| match e {
      TrySendError::Full(_) => WebSocketError::QueueFull,
      TrySendError::Disconnected(_) => WebSocketError::Closed,
    })?;
    Ok(())
  }

  fn status(&self) -> ConnectionStatus {
    self.status.clone()
  }

  fn close(&mut self) {
    // 丢弃发送端后写线程会先发完队列再退出
    self.closed.store(true, Ordering::SeqCst);
    self.sender.take();
    if let Some(worker) = self.worker.take()
      && worker.join().is_err()
    {
      error!("WebSocket 写线程异常退出");
    }
    self.status.set(ConnectionState::Disconnected);
  }

  fn discarded(&self) -> u64 {
    self.discarded.load(Ordering::SeqCst)
  }
}

impl Drop for WebSocketTransport {
  fn drop(&mut self) {
    self.close();
  }
}

fn open(url: &Url, timeout: Duration) -> Result<Socket, WebSocketError> {
  if url.scheme() != "ws" {
    return Err(WebSocketError::Scheme(url.scheme().to_string()));
  }
  let addrs = url
    .socket_addrs(|| None)
    .map_err(|e| WebSocketError::Resolve(url.to_string(), e))?;

  let mut last_error = std::io::Error::new(ErrorKind::NotFound, "没有可用地址");
  let mut stream = None;
  for addr in addrs.iter() {
    match TcpStream::connect_timeout(addr, timeout) {
      Ok(s) => {
        stream = Some(s);
        break;
      }
      Err(e) => last_error = e,
    }
  }
  let stream = stream.ok_or_else(|| WebSocketError::Connect(url.to_string(), last_error))?;

  stream.set_read_timeout(Some(timeout))?;
  stream.set_write_timeout(Some(timeout))?;
  stream.set_nodelay(true)?;

  let (socket, _) =
    tungstenite::client(url.as_str(), stream).map_err(|e| WebSocketError::Handshake(e.to_string()))?;
  // 握手后改为短读超时，写线程轮询服务端消息
  socket.get_ref().set_read_timeout(Some(READ_POLL))?;
  Ok(socket)
}

struct Writer {
  url: Url,
  timeout: Duration,
  socket: Option<Socket>,
  receiver: Receiver<String>,
  status: ConnectionStatus,
  closed: Arc<AtomicBool>,
  discarded: Arc<AtomicU64>,
  backoff: Duration,
}

impl Writer {
  fn run(mut self) {
    loop {
      match self.receiver.recv_timeout(POLL_INTERVAL) {
        Ok(message) => self.write(message),
        Err(RecvTimeoutError::Timeout) => {}
        Err(RecvTimeoutError::Disconnected) => break,
      }
      self.poll_incoming();
      if self.socket.is_none() && !self.closed.load(Ordering::SeqCst) {
        self.reconnect();
      }
    }

    if let Some(mut socket) = self.socket.take() {
      if let Err(e) = socket.close(None).and_then(|_| socket.flush()) {
        debug!("关闭 WebSocket: {}", e);
      }
    }
    self.status.set(ConnectionState::Disconnected);
    debug!("WebSocket 写线程退出");
  }

  fn write(&mut self, message: String) {
    let Some(socket) = self.socket.as_mut() else {
      // 断线期间已排队的帧直接丢弃
      self.discard();
      return;
    };
    if let Err(e) = socket.send(Message::Text(message)) {
      self.discard();
      self.disconnect(&e.to_string());
    }
  }

  fn discard(&self) {
    let total = self.discarded.fetch_add(1, Ordering::SeqCst) + 1;
    debug!("丢弃已排队的帧 (累计 {} 帧)", total);
  }

  fn poll_incoming(&mut self) {
    let Some(socket) = self.socket.as_mut() else {
      return;
    };
    loop {
      match socket.read() {
        Ok(Message::Text(text)) => log_server_message(&text),
        Ok(Message::Close(frame)) => {
          let reason = frame.map(|f| f.reason.to_string()).unwrap_or_default();
          self.disconnect(&format!("服务端关闭连接 {}", reason));
          return;
        }
        Ok(_) => {}
        Err(tungstenite::Error::Io(e))
          if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) =>
        {
          return;
        }
        Err(e) => {
          self.disconnect(&e.to_string());
          return;
        }
      }
    }
  }

  fn disconnect(&mut self, reason: &str) {
    warn!("WebSocket 断开: {}", reason);
    self.socket = None;
    self.status.set(ConnectionState::Disconnected);
  }

  fn reconnect(&mut self) {
    let mut remaining = self.backoff;
    while !remaining.is_zero() && !self.closed.load(Ordering::SeqCst) {
      let step = remaining.min(SLEEP_SLICE);
      thread::sleep(step);
      remaining -= step;
    }
    if self.closed.load(Ordering::SeqCst) {
      return;
    }

    match open(&self.url, self.timeout) {
      Ok(socket) => {
        info!("WebSocket 已重连: {}", self.url);
        self.socket = Some(socket);
        self.backoff = INITIAL_BACKOFF;
        self.status.set(ConnectionState::Connected);
      }
      Err(e) => {
        debug!("WebSocket 重连失败: {}", e);
        self.backoff = (self.backoff * 2).min(MAX_BACKOFF);
      }
    }
  }
}

fn log_server_message(text: &str) {
  match serde_json::from_str::<serde_json::Value>(text) {
    Ok(value) if value.get("status").is_some() => info!("服务端: {}", value),
    _ => debug!("服务端消息: {}", text),
  }
}

#[cfg(test)]
mod tests {
  use std::net::TcpListener;

  use super::*;

  fn accept_one(listener: TcpListener) -> JoinHandle<Vec<String>> {
    thread::spawn(move || {
      let (stream, _) = listener.accept().unwrap();
      let mut socket = tungstenite::accept(stream).unwrap();
      socket
        .send(Message::Text(r#"{"status": "ready"}"#.to_string()))
        .unwrap();
      let mut received = Vec::new();
      loop {
        match socket.read() {
          Ok(Message::Text(text)) => received.push(text),
          Ok(Message::Close(_)) | Err(_) => break,
          Ok(_) => {}
        }
      }
      received
    })
  }

  #[test]
  fn queued_messages_are_delivered_before_close() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let url = Url::parse(&format!("ws://{}/ws/video-input", listener.local_addr().unwrap())).unwrap();
    let server = accept_one(listener);

    let mut transport = WebSocketTransport::connect(&url, Duration::from_secs(5)).unwrap();
    assert!(transport.status().is_connected());
    for n in 0..3 {
      while let Err(OutputError::WebSocket(WebSocketError::QueueFull)) = transport.send(&format!("frame {n}")) {
        thread::sleep(Duration::from_millis(5));
      }
    }
    transport.close();
    assert!(!transport.status().is_connected());

    assert_eq!(server.join().unwrap(), vec!["frame 0", "frame 1", "frame 2"]);
  }

  #[test]
  fn writer_counts_frames_queued_while_disconnected() {
    let (_sender, receiver) = mpsc::sync_channel(QUEUE_CAPACITY);
    let discarded = Arc::new(AtomicU64::new(0));
    let mut writer = Writer {
      url: Url::parse("ws://127.0.0.1:1/").unwrap(),
      timeout: Duration::from_millis(100),
      socket: None,
      receiver,
      status: ConnectionStatus::default(),
      closed: Arc::new(AtomicBool::new(false)),
      discarded: Arc::clone(&discarded),
      backoff: INITIAL_BACKOFF,
    };

    writer.write("frame 1".to_string());
    writer.write("frame 2".to_string());
    assert_eq!(discarded.load(Ordering::SeqCst), 2);
  }

  #[test]
  fn refused_connection_is_an_error() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    let url = Url::parse(&format!("ws://{addr}/")).unwrap();
    assert!(WebSocketTransport::connect(&url, Duration::from_millis(500)).is_err());
  }

  #[test]
  fn secure_scheme_is_rejected() {
    let url = Url::parse("wss://127.0.0.1:1/").unwrap();
    assert!(matches!(
      WebSocketTransport::connect(&url, Duration::from_millis(100)),
      Err(WebSocketError::Scheme(_))
    ));
  }

  #[test]
  fn send_after_close_fails() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let url = Url::parse(&format!("ws://{}/", listener.local_addr().unwrap())).unwrap();
    let server = accept_one(listener);

    let mut transport = WebSocketTransport::connect(&url, Duration::from_secs(5)).unwrap();
    transport.close();
    assert!(matches!(
      transport.send("late"),
      Err(OutputError::WebSocket(WebSocketError::Closed))
    ));
    assert!(server.join().unwrap().is_empty());
  }
}
