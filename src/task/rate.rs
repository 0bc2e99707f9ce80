// 该文件是 Xunfeng （巡风） 项目的一部分。
// src/task/rate.rs - 帧率控制
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

use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
  Process,
  Skip,
}

/// 按目标间隔决定处理或跳过，并给出本轮应睡眠的时长
#[derive(Debug, Clone)]
pub struct RateController {
  interval: Duration,
  pending_skips: u32,
}

impl RateController {
  pub fn new(interval: Duration) -> Self {
    Self {
      interval,
      pending_skips: 0,
    }
  }

  pub fn from_fps(fps: u32) -> Self {
    Self::new(Duration::from_secs_f64(1.0 / f64::from(fps.max(1))))
  }

  pub fn interval(&self) -> Duration {
    self.interval
  }

  pub fn begin(&mut self) -> Decision {
    if self.pending_skips > 0 {
      self.pending_skips -= 1;
      Decision::Skip
    } else {
      Decision::Process
    }
  }

  pub fn finish(&mut self, loop_time: Duration) -> Duration {
    // 超过目标间隔的 1.5 倍即视为落后
    if loop_time.saturating_mul(2) > self.interval.saturating_mul(3) {
      self.pending_skips = 1;
    }
    self.interval.saturating_sub(loop_time)
  }
}
