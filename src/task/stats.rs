// 该文件是 Xunfeng （巡风） 项目的一部分。
// src/task/stats.rs - 运行统计
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

use std::time::{Duration, Instant};

use tracing::info;

use crate::task::FrameResult;

/// 单次运行的累计计数，只由主循环修改
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PipelineStats {
  pub frames_processed: u64,
  pub frames_dropped: u64,
  pub detections_total: u64,
  pub frames_unsent: u64,
  pub inference_total: Duration,
  pub encode_total: Duration,
}

impl PipelineStats {
  fn average(&self, total: Duration) -> Duration {
    if self.frames_processed == 0 {
      Duration::ZERO
    } else {
      Duration::from_nanos((total.as_nanos() / u128::from(self.frames_processed)) as u64)
    }
  }

  pub fn avg_inference(&self) -> Duration {
    self.average(self.inference_total)
  }

  pub fn avg_encode(&self) -> Duration {
    self.average(self.encode_total)
  }

  pub fn avg_detections(&self) -> f64 {
    if self.frames_processed == 0 {
      0.0
    } else {
      self.detections_total as f64 / self.frames_processed as f64
    }
  }

  pub fn fps(&self, elapsed: Duration) -> f64 {
    let secs = elapsed.as_secs_f64();
    if secs > 0.0 {
      self.frames_processed as f64 / secs
    } else {
      0.0
    }
  }
}

/// 运行结束时的汇总
#[derive(Debug, Clone, PartialEq)]
pub struct RunReport {
  pub stats: PipelineStats,
  pub elapsed: Duration,
  pub model: String,
}

impl RunReport {
  pub fn fps(&self) -> f64 {
    self.stats.fps(self.elapsed)
  }
}

#[derive(Debug, Clone, Default)]
struct LastFrame {
  detections: usize,
  inference: Duration,
  encode: Duration,
}

pub struct StatsAggregator {
  stats: PipelineStats,
  start: Instant,
  last_report: Instant,
  interval: Duration,
  last: LastFrame,
}

impl StatsAggregator {
  pub fn new(start: Instant, interval: Duration) -> Self {
    Self {
      stats: PipelineStats::default(),
      start,
      last_report: start,
      interval,
      last: LastFrame::default(),
    }
  }

  pub fn record_frame(&mut self, result: &FrameResult, encode_time: Duration) {
    self.stats.frames_processed += 1;
    self.stats.detections_total += result.detections.len() as u64;
    self.stats.inference_total += result.inference_time;
    self.stats.encode_total += encode_time;
    self.last = LastFrame {
      detections: result.detections.len(),
      inference: result.inference_time,
      encode: encode_time,
    };
  }

  pub fn record_dropped(&mut self) {
    self.stats.frames_dropped += 1;
  }

  pub fn record_unsent(&mut self, count: u64) {
    self.stats.frames_unsent += count;
  }

  /// 距上次汇总满一个周期时输出一行状态，返回是否输出
  pub fn maybe_report(&mut self, now: Instant) -> bool {
    if now.saturating_duration_since(self.last_report) < self.interval || self.stats.frames_processed == 0 {
      return false;
    }
    let elapsed = now.saturating_duration_since(self.start);
    let stats = &self.stats;
    info!(
      "帧: {:5} | FPS: {:4.1} | 检测: {:2} (平均 {:4.1}) | 推理: {:5.1}ms (平均 {:5.1}ms) | 编码: {:4.1}ms | 丢帧: {:4}",
      stats.frames_processed,
      stats.fps(elapsed),
      self.last.detections,
      stats.avg_detections(),
      as_millis(self.last.inference),
      as_millis(stats.avg_inference()),
      as_millis(self.last.encode),
      stats.frames_dropped,
    );
    self.last_report = now;
    true
  }

  pub fn final_summary(self, now: Instant, model: &str) -> RunReport {
    let report = RunReport {
      elapsed: now.saturating_duration_since(self.start),
      stats: self.stats,
      model: model.to_string(),
    };
    let stats = &report.stats;
    info!("运行时长: {:.2}s", report.elapsed.as_secs_f64());
    info!(
      "处理帧数: {} (丢弃 {}, 未发送 {})",
      stats.frames_processed, stats.frames_dropped, stats.frames_unsent
    );
    info!("平均帧率: {:.2}", report.fps());
    info!(
      "检测总数: {} (平均每帧 {:.2})",
      stats.detections_total,
      stats.avg_detections()
    );
    info!(
      "平均推理: {:.1}ms, 平均编码: {:.1}ms",
      as_millis(stats.avg_inference()),
      as_millis(stats.avg_encode())
    );
    info!("模型: {}", report.model);
    report
  }
}

fn as_millis(duration: Duration) -> f64 {
  duration.as_secs_f64() * 1000.0
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::model::{BoundingBox, DetectItem, DetectResult};

  fn result(detections: usize, inference_ms: u64) -> FrameResult {
    let item = DetectItem {
      class_id: 0,
      score: 0.7,
      bbox: BoundingBox::default(),
    };
    FrameResult {
      frame_index: 1,
      timestamp: 0.0,
      detections: DetectResult::new(vec![item; detections]),
      model_name: "m.rknn".to_string(),
      inference_time: Duration::from_millis(inference_ms),
    }
  }

  #[test]
  fn averages_cover_processed_frames_only() {
    let start = Instant::now();
    let mut stats = StatsAggregator::new(start, Duration::from_secs(2));
    stats.record_frame(&result(2, 30), Duration::from_millis(4));
    stats.record_frame(&result(4, 50), Duration::from_millis(6));
    stats.record_dropped();
    stats.record_unsent(1);

    let report = stats.final_summary(start + Duration::from_secs(1), "m.rknn");
    assert_eq!(report.stats.frames_processed, 2);
    assert_eq!(report.stats.frames_dropped, 1);
    assert_eq!(report.stats.frames_unsent, 1);
    assert_eq!(report.stats.detections_total, 6);
    assert_eq!(report.stats.avg_detections(), 3.0);
    assert_eq!(report.stats.avg_inference(), Duration::from_millis(40));
    assert_eq!(report.stats.avg_encode(), Duration::from_millis(5));
    assert_eq!(report.fps(), 2.0);
  }

  #[test]
  fn empty_run_has_zero_averages() {
    let start = Instant::now();
    let report = StatsAggregator::new(start, Duration::from_secs(2)).final_summary(start, "m");
    assert_eq!(report.fps(), 0.0);
    assert_eq!(report.stats.avg_detections(), 0.0);
    assert_eq!(report.stats.avg_inference(), Duration::ZERO);
  }

  #[test]
  fn report_is_emitted_once_per_interval() {
    let start = Instant::now();
    let mut stats = StatsAggregator::new(start, Duration::from_secs(2));
    stats.record_frame(&result(1, 10), Duration::ZERO);
    assert!(!stats.maybe_report(start + Duration::from_millis(1999)));
    assert!(stats.maybe_report(start + Duration::from_secs(2)));
    assert!(!stats.maybe_report(start + Duration::from_secs(3)));
    assert!(stats.maybe_report(start + Duration::from_secs(4)));
  }
}
