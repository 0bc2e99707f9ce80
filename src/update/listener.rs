// 该文件是 Xunfeng （巡风） 项目的一部分。
// src/update/listener.rs - 模型更新监听
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
  path::PathBuf,
  sync::Arc,
  thread::{self, JoinHandle},
};

use tracing::{debug, error, info, warn};

use crate::{
  model::{DetectorError, DetectorLoader, ModelHandle, ModelRegistry},
  update::{
    ChannelEvent, DecodeError, ModelStore, ModelUpdatePayload, PersistError, ShutdownHook,
    UpdateChannel, UpdateError,
  },
};

/// 一条消息处理到哪一步为止
#[derive(Debug)]
pub enum UpdateOutcome {
  /// 不是模型更新消息
  Ignored,
  /// 信封完整但数据损坏
  Rejected(DecodeError),
  PersistFailed(PersistError),
  /// 已落盘，扩展名不是模型文件
  Persisted { path: PathBuf },
  /// 已落盘，但加载或预热失败，在用模型不变
  LoadFailed { path: PathBuf, error: DetectorError },
  Swapped {
    path: PathBuf,
    previous: String,
    current: String,
  },
}

/// 解码、落盘、加载并替换模型
pub struct ModelUpdateListener {
  registry: Arc<ModelRegistry>,
  loader: Arc<dyn DetectorLoader>,
  store: ModelStore,
}

impl ModelUpdateListener {
  pub fn new(registry: Arc<ModelRegistry>, loader: Arc<dyn DetectorLoader>, store: ModelStore) -> Self {
    Self {
      registry,
      loader,
      store,
    }
  }

  pub fn handle_event(&self, event: ChannelEvent) -> Option<UpdateOutcome> {
    match event {
      ChannelEvent::Connected => {
        info!("模型更新通道已连接");
        None
      }
      ChannelEvent::Disconnected(reason) => {
        warn!("模型更新通道断开, 正在重连: {}", reason);
        None
      }
      ChannelEvent::Message { topic, payload } => {
        debug!("收到 {} 上的消息, {} 字节", topic, payload.len());
        let outcome = self.handle_message(&payload);
        report(&outcome);
        Some(outcome)
      }
    }
  }

  pub fn handle_message(&self, raw: &[u8]) -> UpdateOutcome {
    let payload = match ModelUpdatePayload::parse(raw) {
      None => return UpdateOutcome::Ignored,
      Some(Err(e)) => return UpdateOutcome::Rejected(e),
      Some(Ok(payload)) => payload,
    };

    info!(
      "收到新模型: {} ({:.2} MB)",
      payload.filename,
      payload.bytes.len() as f64 / (1024.0 * 1024.0)
    );
    if payload.declared_size != 0 && payload.declared_size != payload.bytes.len() as u64 {
      warn!(
        "声明大小 {} 与实际大小 {} 不一致",
        payload.declared_size,
        payload.bytes.len()
      );
    }

    let path = match self.store.persist(&payload) {
      Ok(path) => path,
      Err(e) => return UpdateOutcome::PersistFailed(e),
    };

    if !self.loader.recognizes(&path) {
      return UpdateOutcome::Persisted { path };
    }

    // 加载和预热都在锁外完成，替换只是一次指针交换
    let handle = match ModelHandle::load(self.loader.as_ref(), &path) {
      Ok(handle) => handle,
      Err(error) => return UpdateOutcome::LoadFailed { path, error },
    };
    let current = handle.name().to_string();
    let previous = self.registry.swap(handle);

    UpdateOutcome::Swapped {
      path,
      previous: previous.name().to_string(),
      current,
    }
  }

  /// 在独立线程上跟随通道投递处理消息
  pub fn spawn<C: UpdateChannel>(self, mut channel: C) -> Result<ListenerHandle, UpdateError> {
    let hook = channel.shutdown_hook();
    let thread = thread::Builder::new()
      .name("model-update".into())
      .spawn(move || {
        while let Some(event) = channel.recv() {
          self.handle_event(event);
        }
        debug!("模型更新通道已关闭");
      })?;

    Ok(ListenerHandle {
      hook: Some(hook),
      thread: Some(thread),
    })
  }
}

fn report(outcome: &UpdateOutcome) {
  match outcome {
    UpdateOutcome::Ignored => debug!("忽略非模型消息"),
    UpdateOutcome::Rejected(e) => warn!("模型消息无效: {}", e),
    UpdateOutcome::PersistFailed(e) => error!("模型文件保存失败: {}", e),
    UpdateOutcome::Persisted { path } => {
      warn!("文件 {} 不是可加载的模型, 仅保存", path.display())
    }
    UpdateOutcome::LoadFailed { path, error } => {
      error!("模型加载失败 {}: {}, 继续使用当前模型", path.display(), error)
    }
    UpdateOutcome::Swapped {
      previous, current, ..
    } => info!("模型已更新: {} → {}", previous, current),
  }
}

/// 监听线程的句柄，`stop` 关闭通道并等待线程退出
pub struct ListenerHandle {
  hook: Option<ShutdownHook>,
  thread: Option<JoinHandle<()>>,
}

impl ListenerHandle {
  pub fn stop(mut self) {
    self.shutdown();
  }

  fn shutdown(&mut self) {
    if let Some(hook) = self.hook.take() {
      hook.fire();
    }
    if let Some(thread) = self.thread.take()
      && thread.join().is_err()
    {
      error!("模型更新线程异常退出");
    }
  }
}

impl Drop for ListenerHandle {
  fn drop(&mut self) {
    self.shutdown();
  }
}

#[cfg(test)]
mod tests {
  use std::{
    path::Path,
    sync::atomic::{AtomicUsize, Ordering},
  };

  use super::*;
  use crate::{
    frame::RgbFrame,
    model::{DetectResult, Detector},
  };

  struct NullDetector;

  impl Detector for NullDetector {
    fn detect(&self, _frame: &RgbFrame) -> Result<DetectResult, DetectorError> {
      Ok(DetectResult::default())
    }

    fn input_size(&self) -> (u32, u32) {
      (4, 4)
    }
  }

  /// 内容为 "bad" 的文件加载失败
  #[derive(Default)]
  struct ContentLoader {
    loads: AtomicUsize,
  }

  impl DetectorLoader for ContentLoader {
    fn extensions(&self) -> &[&str] {
      &["pt", "pth"]
    }

    fn load(&self, path: &Path) -> Result<Box<dyn Detector>, DetectorError> {
      self.loads.fetch_add(1, Ordering::SeqCst);
      if std::fs::read(path)? == b"bad" {
        return Err(DetectorError::Load {
          path: path.to_path_buf(),
          reason: "corrupt".to_string(),
        });
      }
      Ok(Box::new(NullDetector))
    }
  }

  fn listener(dir: &Path) -> (ModelUpdateListener, Arc<ModelRegistry>, Arc<ContentLoader>) {
    let registry = Arc::new(ModelRegistry::new(ModelHandle::new(
      Box::new(NullDetector),
      "models/initial.pt",
    )));
    let loader = Arc::new(ContentLoader::default());
    let listener = ModelUpdateListener::new(
      Arc::clone(&registry),
      Arc::clone(&loader) as Arc<dyn DetectorLoader>,
      ModelStore::new(dir),
    );
    (listener, registry, loader)
  }

  #[test]
  fn loadable_model_is_swapped_in() {
    let dir = tempfile::tempdir().unwrap();
    let (listener, registry, _) = listener(dir.path());

    let outcome = listener.handle_message(&ModelUpdatePayload::encode("best.pt", b"weights"));
    let UpdateOutcome::Swapped {
      path,
      previous,
      current,
    } = outcome
    else {
      panic!("unexpected outcome {outcome:?}");
    };
    assert_eq!(previous, "initial.pt");
    assert_eq!(registry.current().name(), current);
    assert_eq!(registry.current().path(), path);
    assert_eq!(std::fs::read(&path).unwrap(), b"weights");
  }

  #[test]
  fn load_failure_keeps_current_model() {
    let dir = tempfile::tempdir().unwrap();
    let (listener, registry, loader) = listener(dir.path());
    let before = registry.current();

    let outcome = listener.handle_message(&ModelUpdatePayload::encode("broken.pt", b"bad"));
    assert!(matches!(outcome, UpdateOutcome::LoadFailed { .. }));
    assert!(Arc::ptr_eq(&before, &registry.current()));
    assert_eq!(loader.loads.load(Ordering::SeqCst), 1);
  }

  #[test]
  fn unrecognized_extension_is_only_persisted() {
    let dir = tempfile::tempdir().unwrap();
    let (listener, registry, loader) = listener(dir.path());
    let before = registry.current();

    let outcome = listener.handle_message(&ModelUpdatePayload::encode("labels.yaml", b"names: []"));
    let UpdateOutcome::Persisted { path } = outcome else {
      panic!("unexpected outcome {outcome:?}");
    };
    assert_eq!(path.extension().unwrap(), "yaml");
    assert_eq!(std::fs::read(&path).unwrap(), b"names: []");
    assert!(Arc::ptr_eq(&before, &registry.current()));
    assert_eq!(loader.loads.load(Ordering::SeqCst), 0);
  }

  #[test]
  fn unrelated_and_corrupt_messages_change_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let (listener, registry, _) = listener(dir.path());
    let before = registry.current();

    assert!(matches!(
      listener.handle_message(b"plain text"),
      UpdateOutcome::Ignored
    ));
    assert!(matches!(
      listener.handle_message(br#"{"metadata": {"filename": "a.pt"}, "data": "%%%"}"#),
      UpdateOutcome::Rejected(_)
    ));
    assert!(Arc::ptr_eq(&before, &registry.current()));
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
  }

  #[test]
  fn persist_round_trip_preserves_bytes() {
    let dir = tempfile::tempdir().unwrap();
    let (listener, _, _) = listener(dir.path());
    let bytes: Vec<u8> = (0..=255u8).cycle().take(4096).collect();

    let outcome = listener.handle_message(&ModelUpdatePayload::encode("blob.bin", &bytes));
    let UpdateOutcome::Persisted { path } = outcome else {
      panic!("unexpected outcome {outcome:?}");
    };
    assert_eq!(std::fs::read(path).unwrap(), bytes);
  }
}
