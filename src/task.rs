// 该文件是 Xunfeng （巡风） 项目的一部分。
// src/task.rs - 推流任务
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

use tracing::{info, warn};

use crate::{
  config::PipelineConfig,
  input::FrameSource,
  model::ModelRegistry,
  output::{FrameEncoder, PublishOutcome, StreamPublisher, Transport},
  update::ListenerHandle,
};

mod clock;
pub use self::clock::{Clock, ManualClock, SystemClock};

mod inference;
pub use self::inference::{FrameResult, InferenceStage};

mod rate;
pub use self::rate::{Decision, RateController};

mod stats;
pub use self::stats::{PipelineStats, RunReport, StatsAggregator};

pub trait Task<I, M, O>: Sized {
  type Output;
  type Error;
  fn run_task(self, input: I, model: M, output: O) -> Result<Self::Output, Self::Error>;
}

/// 持续推流任务：取帧、限速、推理、编码、发布。
///
/// 运行标志被置为 `false`、输入耗尽（不循环时）或达到帧数上限时退出，
/// 退出前停止模型更新监听并关闭出站连接。
pub struct StreamTask<C: Clock = SystemClock> {
  target_fps: u32,
  width: u32,
  height: u32,
  jpeg_quality: u8,
  loop_input: bool,
  max_frames: Option<u64>,
  stats_interval: Duration,
  running: Arc<AtomicBool>,
  listener: Option<ListenerHandle>,
  clock: C,
}

impl StreamTask<SystemClock> {
  pub fn new(config: &PipelineConfig, running: Arc<AtomicBool>) -> Self {
    Self {
      target_fps: config.target_fps,
      width: config.width,
      height: config.height,
      jpeg_quality: config.jpeg_quality,
      loop_input: config.loop_input,
      max_frames: config.max_frames,
      stats_interval: config.stats_interval,
      running,
      listener: None,
      clock: SystemClock,
    }
  }
}

impl<C: Clock + Clone> StreamTask<C> {
  pub fn with_clock<D: Clock + Clone>(self, clock: D) -> StreamTask<D> {
    StreamTask {
      target_fps: self.target_fps,
      width: self.width,
      height: self.height,
      jpeg_quality: self.jpeg_quality,
      loop_input: self.loop_input,
      max_frames: self.max_frames,
      stats_interval: self.stats_interval,
      running: self.running,
      listener: self.listener,
      clock,
    }
  }

  /// 任务结束时一并停止的模型更新监听
  pub fn with_listener(mut self, listener: Option<ListenerHandle>) -> Self {
    self.listener = listener;
    self
  }

  fn is_running(&self) -> bool {
    self.running.load(Ordering::SeqCst)
  }
}

impl<C, I, T> Task<I, Arc<ModelRegistry>, StreamPublisher<T>> for StreamTask<C>
where
  C: Clock + Clone,
  I: FrameSource,
  T: Transport,
{
  type Output = RunReport;
  type Error = anyhow::Error;

  fn run_task(
    mut self,
    mut input: I,
    registry: Arc<ModelRegistry>,
    mut publisher: StreamPublisher<T>,
  ) -> Result<Self::Output, Self::Error> {
    let clock = self.clock.clone();
    let mut rate = RateController::from_fps(self.target_fps);
    info!(
      "开始推流: {} FPS (间隔 {:?}) @ {}x{}, JPEG 质量 {}, 模型 {}",
      self.target_fps,
      rate.interval(),
      self.width,
      self.height,
      self.jpeg_quality,
      registry.current().name()
    );

    let inference = InferenceStage::new(clock.clone());
    let encoder = FrameEncoder::new(self.jpeg_quality);
    let mut stats = StatsAggregator::new(clock.now(), self.stats_interval);

    let mut frame_index: u64 = 0;
    // 刚回到开头仍取不到帧说明输入为空，避免空转
    let mut just_rewound = false;

    while self.is_running() {
      let loop_start = clock.now();

      let Some(frame) = input.next() else {
        info!("输入结束");
        if !self.loop_input || just_rewound {
          break;
        }
        if let Err(e) = input.rewind() {
          warn!("无法回到输入开头: {}", e);
          break;
        }
        info!("从头循环播放");
        just_rewound = true;
        continue;
      };
      just_rewound = false;

      if rate.begin() == Decision::Skip {
        stats.record_dropped();
        continue;
      }

      // 帧号按处理顺序编排，未能送达的帧（断线、编码失败）在接收端留下空号
      frame_index += 1;
      let frame = if (frame.width(), frame.height()) == (self.width, self.height) {
        frame
      } else {
        frame.resized(self.width, self.height)
      };

      let result = inference.run(&frame, &registry, frame_index);

      let encode_start = clock.now();
      match encoder.encode(&frame, &result) {
        Ok(message) => {
          stats.record_frame(&result, clock.now().saturating_duration_since(encode_start));
          match publisher.publish(&message) {
            PublishOutcome::Sent => {}
            PublishOutcome::Dropped | PublishOutcome::Failed => stats.record_unsent(1),
          }
        }
        Err(e) => {
          warn!("第 {} 帧编码失败: {}", frame_index, e);
          stats.record_frame(&result, Duration::ZERO);
          stats.record_unsent(1);
        }
      }
      // 之前已交给传输层、断线时仍在队列里的帧
      stats.record_unsent(publisher.take_discarded());

      stats.maybe_report(clock.now());

      if self.max_frames.is_some_and(|n| frame_index >= n) {
        info!("达到指定帧数 {}, 退出任务循环", frame_index);
        break;
      }

      let sleep = rate.finish(clock.now().saturating_duration_since(loop_start));
      clock.sleep(sleep);
    }

    if !self.is_running() {
      warn!("收到停止信号，退出任务循环");
    }

    if let Some(listener) = self.listener.take() {
      listener.stop();
    }
    stats.record_unsent(publisher.close());
    info!(
      "推流结束: 已发送 {} 帧, 断线丢弃 {} 帧, 发送失败 {} 帧",
      publisher.sent(),
      publisher.dropped(),
      publisher.failed()
    );

    let report = stats.final_summary(clock.now(), registry.current().name());
    info!("任务完成，退出");
    Ok(report)
  }
}
