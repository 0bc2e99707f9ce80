// 该文件是 Xunfeng （巡风） 项目的一部分。
// src/update/message.rs - 模型更新消息
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

use base64::{Engine as _, engine::general_purpose::STANDARD};
use serde::Deserialize;
use thiserror::Error;

const DEFAULT_FILENAME: &str = "model.pt";

#[derive(Error, Debug)]
pub enum DecodeError {
  #[error("base64 解码失败: {0}")]
  Base64(#[from] base64::DecodeError),
  #[error("模型数据为空")]
  Empty,
}

#[derive(Deserialize)]
struct Envelope {
  metadata: Metadata,
  data: String,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct Metadata {
  filename: Option<String>,
  size: u64,
}

/// 解码后的模型文件，`declared_size` 只作参考
#[derive(Debug, Clone, PartialEq)]
pub struct ModelUpdatePayload {
  pub filename: String,
  pub declared_size: u64,
  pub bytes: Vec<u8>,
}

impl ModelUpdatePayload {
  /// 解析通道上的原始消息。
  ///
  /// 不是 JSON 或缺少 `metadata` / `data` 的消息返回 `None`，
  /// 视为同一主题上的无关消息；信封完整但内容损坏则返回错误。
  pub fn parse(raw: &[u8]) -> Option<Result<Self, DecodeError>> {
    let envelope: Envelope = serde_json::from_slice(raw).ok()?;
    Some(Self::decode(envelope))
  }

  fn decode(envelope: Envelope) -> Result<Self, DecodeError> {
    let bytes = STANDARD.decode(envelope.data.trim())?;
    if bytes.is_empty() {
      return Err(DecodeError::Empty);
    }
    Ok(Self {
      filename: envelope
        .metadata
        .filename
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| DEFAULT_FILENAME.to_string()),
      declared_size: envelope.metadata.size,
      bytes,
    })
  }

  /// 生成通道消息，供测试与工具使用
  pub fn encode(filename: &str, bytes: &[u8]) -> Vec<u8> {
    serde_json::json!({
      "metadata": { "filename": filename, "size": bytes.len() },
      "data": STANDARD.encode(bytes),
    })
    .to_string()
    .into_bytes()
  }
}
