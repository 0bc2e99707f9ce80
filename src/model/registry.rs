// 该文件是 Xunfeng （巡风） 项目的一部分。
// src/model/registry.rs - 当前模型登记
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

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::debug;

use crate::model::ModelHandle;

/// 持有唯一一个在用模型。
///
/// 锁只保护指针的读写；调用方拿到的 `Arc` 在替换之后依旧有效，
/// 旧模型在最后一个使用者释放时才真正析构。
pub struct ModelRegistry {
  current: Mutex<Arc<ModelHandle>>,
}

impl ModelRegistry {
  pub fn new(handle: ModelHandle) -> Self {
    Self {
      current: Mutex::new(Arc::new(handle)),
    }
  }

  fn guard(&self) -> MutexGuard<'_, Arc<ModelHandle>> {
    // 指针赋值不会半途而废，中毒后直接沿用
    self.current.lock().unwrap_or_else(PoisonError::into_inner)
  }

  pub fn current(&self) -> Arc<ModelHandle> {
    Arc::clone(&self.guard())
  }

  /// 替换在用模型，返回被替换下来的那一个
  pub fn swap(&self, handle: ModelHandle) -> Arc<ModelHandle> {
    let next = Arc::new(handle);
    debug!("切换模型: {}", next.name());
    std::mem::replace(&mut *self.guard(), next)
  }
}

#[cfg(test)]
mod tests {
  use std::{
    path::Path,
    sync::{
      Barrier,
      atomic::{AtomicBool, Ordering},
    },
    thread,
  };

  use super::*;
  use crate::{
    frame::RgbFrame,
    model::{DetectResult, Detector, DetectorError},
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

  fn handle(name: &str) -> ModelHandle {
    ModelHandle::new(Box::new(NullDetector), Path::new("models").join(name))
  }

  #[test]
  fn swap_returns_previous_handle() {
    let registry = ModelRegistry::new(handle("a.pt"));
    assert_eq!(registry.current().name(), "a.pt");

    let previous = registry.swap(handle("b.pt"));
    assert_eq!(previous.name(), "a.pt");
    assert_eq!(registry.current().name(), "b.pt");
  }

  #[test]
  fn reader_keeps_old_handle_alive_across_swap() {
    let registry = ModelRegistry::new(handle("a.pt"));
    let in_use = registry.current();
    let previous = registry.swap(handle("b.pt"));
    assert!(Arc::ptr_eq(&in_use, &previous));
    drop(previous);
    // 仍可正常推理
    assert!(in_use.detect(&RgbFrame::blank(4, 4)).is_ok());
    assert_eq!(Arc::strong_count(&in_use), 1);
  }

  #[test]
  fn concurrent_readers_see_old_or_new_only() {
    let registry = Arc::new(ModelRegistry::new(handle("old.pt")));
    let barrier = Arc::new(Barrier::new(5));
    let done = Arc::new(AtomicBool::new(false));

    let readers: Vec<_> = (0..4)
      .map(|_| {
        let registry = Arc::clone(&registry);
        let barrier = Arc::clone(&barrier);
        let done = Arc::clone(&done);
        thread::spawn(move || {
          barrier.wait();
          let mut seen_new = false;
          while !done.load(Ordering::SeqCst) {
            let name = registry.current().name().to_string();
            assert!(name == "old.pt" || name == "new.pt", "unexpected handle {name}");
            if name == "new.pt" {
              seen_new = true;
            } else {
              // 一旦看到新模型，之后不会再回到旧模型
              assert!(!seen_new);
            }
          }
        })
      })
      .collect();

    barrier.wait();
    registry.swap(handle("new.pt"));
    done.store(true, Ordering::SeqCst);
    for reader in readers {
      reader.join().unwrap();
    }
    assert_eq!(registry.current().name(), "new.pt");
  }
}
