// 该文件是 Xunfeng （巡风） 项目的一部分。
// src/main.rs - 项目主程序
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

mod args;

use std::sync::{
  Arc,
  atomic::{AtomicBool, Ordering},
};

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};

use xunfeng::{
  FromUrl,
  config::PipelineConfig,
  input::InputWrapper,
  model::{DetectorLoader, ModelHandle, ModelRegistry, open_loader, resolve_model_path},
  output::{StreamPublisher, WebSocketTransport},
  task::{StreamTask, Task},
  update::{ListenerHandle, ModelStore, ModelUpdateListener, MqttSettings, MqttUpdateChannel},
};

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = args::Args::parse();
  let config = args.pipeline_config();
  config.validate()?;

  info!("巡风检测推流");
  info!("模型: {}", args.model);
  info!("输入来源: {}", args.input);
  info!(
    "目标: {} FPS @ {}x{}, JPEG {}%, 推理尺寸 {}",
    config.target_fps, config.width, config.height, config.jpeg_quality, config.inference_size
  );

  let loader = open_loader(&args.model, config.detector_options()).context("无法识别模型方案")?;
  let model_path = resolve_model_path(&args.model, loader.as_ref()).context("找不到可用的模型")?;
  let handle = ModelHandle::load(loader.as_ref(), &model_path)
    .with_context(|| format!("模型加载失败: {}", model_path.display()))?;
  info!("已加载模型: {}", handle.name());
  let registry = Arc::new(ModelRegistry::new(handle));

  let input = InputWrapper::from_url(&args.input).context("无法打开输入来源")?;

  let running = Arc::new(AtomicBool::new(true));
  {
    let running = Arc::clone(&running);
    ctrlc::set_handler(move || {
      info!("收到中断信号，准备退出...");
      running.store(false, Ordering::SeqCst);
    })
    .context("无法设置 Ctrl-C 处理函数")?;
  }

  let listener = if config.mqtt_enabled {
    start_listener(&config, Arc::clone(&registry), loader)
  } else {
    info!("已禁用模型更新");
    None
  };

  // 监听句柄在出错返回时随之停止
  let stream_url = config.stream_url()?;
  let transport = WebSocketTransport::connect(&stream_url, config.connect_timeout)
    .with_context(|| format!("无法连接推流服务 {}", stream_url))?;

  StreamTask::new(&config, running)
    .with_listener(listener)
    .run_task(input, registry, StreamPublisher::new(transport))?;

  Ok(())
}

/// 模型更新不可用时仅告警，推流照常进行
fn start_listener(
  config: &PipelineConfig,
  registry: Arc<ModelRegistry>,
  loader: Arc<dyn DetectorLoader>,
) -> Option<ListenerHandle> {
  let settings = MqttSettings {
    broker: config.mqtt_broker.clone(),
    port: config.mqtt_port,
    topic: config.mqtt_topic.clone(),
    client_id: config.mqtt_client_id.clone(),
  };
  let listener = ModelUpdateListener::new(registry, loader, ModelStore::new(&config.models_dir));

  match MqttUpdateChannel::connect(&settings).and_then(|channel| listener.spawn(channel)) {
    Ok(handle) => Some(handle),
    Err(e) => {
      warn!("模型更新不可用: {}, 继续推流", e);
      None
    }
  }
}
