// 该文件是 Xunfeng （巡风） 项目的一部分。
// src/task/inference.rs - 推理阶段
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

use chrono::Utc;
use tracing::warn;

use crate::{
  frame::RgbFrame,
  model::{DetectResult, ModelRegistry},
  task::Clock,
};

/// 单帧推理结果
#[derive(Debug, Clone)]
pub struct FrameResult {
  /// 从 1 开始，每处理一帧加 1
  pub frame_index: u64,
  /// Unix 时间戳（秒）
  pub timestamp: f64,
  pub detections: DetectResult,
  pub model_name: String,
  pub inference_time: Duration,
}

pub struct InferenceStage<C: Clock> {
  clock: C,
}

impl<C: Clock> InferenceStage<C> {
  pub fn new(clock: C) -> Self {
    Self { clock }
  }

  /// 用当前模型推理一帧。检测器报错时该帧记为无检测，不中断主循环
  pub fn run(&self, frame: &RgbFrame, registry: &ModelRegistry, frame_index: u64) -> FrameResult {
    // 只在取指针时持锁，推理期间模型被替换不影响本帧
    let model = registry.current();

    let start = self.clock.now();
    let detections = model.detect(frame).unwrap_or_else(|e| {
      warn!("第 {} 帧推理失败: {}", frame_index, e);
      DetectResult::default()
    });
    let inference_time = self.clock.now().saturating_duration_since(start);

    FrameResult {
      frame_index,
      timestamp: Utc::now().timestamp_micros() as f64 / 1_000_000.0,
      detections,
      model_name: model.name().to_string(),
      inference_time,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::{
    model::{BoundingBox, DetectItem, Detector, DetectorError, ModelHandle},
    task::ManualClock,
  };

  struct TimedDetector {
    clock: ManualClock,
    cost: Duration,
    fail: bool,
  }

  impl Detector for TimedDetector {
    fn detect(&self, _frame: &RgbFrame) -> Result<DetectResult, DetectorError> {
      self.clock.advance(self.cost);
      if self.fail {
        return Err(DetectorError::Inference("npu busy".to_string()));
      }
      Ok(DetectResult::new(vec![DetectItem {
        class_id: 0,
        score: 0.9,
        bbox: BoundingBox::from_corners(0.0, 0.0, 1.0, 1.0),
      }]))
    }

    fn input_size(&self) -> (u32, u32) {
      (2, 2)
    }
  }

  fn registry(clock: &ManualClock, fail: bool) -> ModelRegistry {
    ModelRegistry::new(ModelHandle::new(
      Box::new(TimedDetector {
        clock: clock.clone(),
        cost: Duration::from_millis(40),
        fail,
      }),
      "models/best.rknn",
    ))
  }

  #[test]
  fn result_is_stamped_with_model_and_timing() {
    let clock = ManualClock::new();
    let registry = registry(&clock, false);
    let result = InferenceStage::new(clock).run(&RgbFrame::blank(2, 2), &registry, 3);
    assert_eq!(result.frame_index, 3);
    assert_eq!(result.detections.len(), 1);
    assert_eq!(result.model_name, "best.rknn");
    assert_eq!(result.inference_time, Duration::from_millis(40));
    assert!(result.timestamp > 1_600_000_000.0);
  }

  #[test]
  fn detector_error_becomes_empty_result() {
    let clock = ManualClock::new();
    let registry = registry(&clock, true);
    let result = InferenceStage::new(clock).run(&RgbFrame::blank(2, 2), &registry, 1);
    assert!(result.detections.is_empty());
    assert_eq!(result.model_name, "best.rknn");
  }
}
