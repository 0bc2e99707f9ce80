// 该文件是 Xunfeng （巡风） 项目的一部分。
// src/task/clock.rs - 单调时钟
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
  sync::{Arc, Mutex, PoisonError},
  time::{Duration, Instant},
};

pub trait Clock {
  fn now(&self) -> Instant;

  fn sleep(&self, duration: Duration);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
  fn now(&self) -> Instant {
    Instant::now()
  }

  fn sleep(&self, duration: Duration) {
    if !duration.is_zero() {
      std::thread::sleep(duration);
    }
  }
}

/// 手动推进的时钟，`sleep` 直接把时间往前拨。
///
/// 克隆体共享同一时间线，测试里的检测器可以借此模拟推理耗时。
#[derive(Debug, Clone)]
pub struct ManualClock {
  now: Arc<Mutex<Instant>>,
  slept: Arc<Mutex<Vec<Duration>>>,
}

impl Default for ManualClock {
  fn default() -> Self {
    Self::new()
  }
}

impl ManualClock {
  pub fn new() -> Self {
    Self {
      now: Arc::new(Mutex::new(Instant::now())),
      slept: Arc::default(),
    }
  }

  pub fn advance(&self, duration: Duration) {
    let mut now = self.now.lock().unwrap_or_else(PoisonError::into_inner);
    *now += duration;
  }

  /// 每次 `sleep` 请求的时长，按调用顺序
  pub fn sleeps(&self) -> Vec<Duration> {
    self.slept.lock().unwrap_or_else(PoisonError::into_inner).clone()
  }
}

impl Clock for ManualClock {
  fn now(&self) -> Instant {
    *self.now.lock().unwrap_or_else(PoisonError::into_inner)
  }

  fn sleep(&self, duration: Duration) {
    self
      .slept
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .push(duration);
    self.advance(duration);
  }
}
