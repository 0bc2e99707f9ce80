// 该文件是 Xunfeng （巡风） 项目的一部分。
// src/update/persist.rs - 模型文件落盘
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
  io::{ErrorKind, Write},
  path::{Path, PathBuf},
};

use chrono::{DateTime, Local};
use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::debug;

use crate::update::ModelUpdatePayload;

// 同一秒内的重名上限，正常情况下远远用不到
const MAX_SUFFIX: u32 = 1000;

#[derive(Error, Debug)]
pub enum PersistError {
  #[error("无法创建模型目录 {0}: {1}")]
  CreateDir(PathBuf, std::io::Error),
  #[error("写入临时文件失败: {0}")]
  Write(std::io::Error),
  #[error("无法落盘到 {0}: {1}")]
  Rename(PathBuf, std::io::Error),
  #[error("同一秒内重名文件过多: {0}")]
  Exhausted(String),
}

/// 模型目录，文件名为 `model_<YYYYMMDD_HHMMSS>[_n]<ext>`
#[derive(Debug, Clone)]
pub struct ModelStore {
  dir: PathBuf,
}

impl ModelStore {
  pub fn new(dir: impl Into<PathBuf>) -> Self {
    Self { dir: dir.into() }
  }

  pub fn persist(&self, payload: &ModelUpdatePayload) -> Result<PathBuf, PersistError> {
    self.persist_at(payload, Local::now())
  }

  /// 先写入同目录下的临时文件，再以不覆盖的方式改名，
  /// 目标文件名上不会出现写了一半的文件。
  pub fn persist_at(
    &self,
    payload: &ModelUpdatePayload,
    now: DateTime<Local>,
  ) -> Result<PathBuf, PersistError> {
    std::fs::create_dir_all(&self.dir).map_err(|e| PersistError::CreateDir(self.dir.clone(), e))?;

    let mut file = NamedTempFile::new_in(&self.dir).map_err(PersistError::Write)?;
    file.write_all(&payload.bytes).map_err(PersistError::Write)?;
    file.as_file().sync_all().map_err(PersistError::Write)?;

    let stem = format!("model_{}", now.format("%Y%m%d_%H%M%S"));
    let ext = extension_of(&payload.filename);

    for suffix in 0..MAX_SUFFIX {
      let name = if suffix == 0 {
        format!("{}{}", stem, ext)
      } else {
        format!("{}_{}{}", stem, suffix, ext)
      };
      let path = self.dir.join(&name);
      match file.persist_noclobber(&path) {
        Ok(_) => {
          debug!("模型文件已写入: {}", path.display());
          return Ok(path);
        }
        Err(e) if e.error.kind() == ErrorKind::AlreadyExists => {
          file = e.file;
        }
        Err(e) => return Err(PersistError::Rename(path, e.error)),
      }
    }

    Err(PersistError::Exhausted(stem))
  }
}

/// 原始文件名的扩展名（含点），没有扩展名时为空
fn extension_of(filename: &str) -> String {
  Path::new(filename)
    .extension()
    .map(|ext| format!(".{}", ext.to_string_lossy()))
    .unwrap_or_default()
}
