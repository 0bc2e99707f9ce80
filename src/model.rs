// 该文件是 Xunfeng （巡风） 项目的一部分。
// src/model.rs - 模型
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use std::{
  path::{Path, PathBuf},
  sync::Arc,
  time::SystemTime,
};

use chrono::{DateTime, Local};
use thiserror::Error;
use tracing::{debug, info};
use url::Url;

use crate::frame::RgbFrame;

mod registry;
pub use self::registry::ModelRegistry;

#[cfg(feature = "model_yolo26")]
mod yolo26;
#[cfg(feature = "model_yolo26")]
pub use self::yolo26::{Yolo26, Yolo26Error, Yolo26Loader};

#[derive(Error, Debug)]
pub enum DetectorError {
  #[error("模型加载错误 {path}: {reason}")]
  Load { path: PathBuf, reason: String },
  #[error("模型预热失败: {0}")]
  WarmUp(String),
  #[error("推理错误: {0}")]
  Inference(String),
  #[error("模型路径错误: {0}")]
  ModelPath(String),
  #[error("不支持的模型方案: {0}")]
  SchemeMismatch(String),
  #[error("模型方案 {scheme} 未编译进来，请使用 `--features {feature}` 重新构建")]
  BackendDisabled {
    scheme: String,
    feature: &'static str,
  },
  #[error("I/O 错误: {0}")]
  Io(#[from] std::io::Error),
}

/// 推理参数，由配置传给具体的检测器实现
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DetectorOptions {
  pub confidence: f32,
  pub iou_threshold: f32,
  pub inference_size: u32,
}

impl Default for DetectorOptions {
  fn default() -> Self {
    Self {
      confidence: 0.6,
      iou_threshold: 0.4,
      inference_size: 640,
    }
  }
}

/// 中心点加宽高的检测框，坐标为送入检测器那一帧的像素坐标
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct BoundingBox {
  pub center_x: f32,
  pub center_y: f32,
  pub width: f32,
  pub height: f32,
}

impl BoundingBox {
  pub fn from_corners(x_min: f32, y_min: f32, x_max: f32, y_max: f32) -> Self {
    Self {
      center_x: (x_min + x_max) / 2.0,
      center_y: (y_min + y_max) / 2.0,
      width: (x_max - x_min).max(0.0),
      height: (y_max - y_min).max(0.0),
    }
  }

  /// [x_min, y_min, x_max, y_max]
  pub fn corners(&self) -> [f32; 4] {
    let (hw, hh) = (self.width / 2.0, self.height / 2.0);
    [
      self.center_x - hw,
      self.center_y - hh,
      self.center_x + hw,
      self.center_y + hh,
    ]
  }

  pub fn area(&self) -> f32 {
    self.width * self.height
  }

  pub fn iou(&self, other: &BoundingBox) -> f32 {
    let [ax1, ay1, ax2, ay2] = self.corners();
    let [bx1, by1, bx2, by2] = other.corners();
    let intersection = (ax2.min(bx2) - ax1.max(bx1)).max(0.0) * (ay2.min(by2) - ay1.max(by1)).max(0.0);
    let union = self.area() + other.area() - intersection;
    if union > 0.0 {
      intersection / union
    } else {
      0.0
    }
  }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DetectItem {
  pub class_id: u32,
  pub score: f32,
  pub bbox: BoundingBox,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct DetectResult {
  pub items: Box<[DetectItem]>,
}

impl DetectResult {
  pub fn new(items: Vec<DetectItem>) -> Self {
    Self {
      items: items.into_boxed_slice(),
    }
  }

  pub fn len(&self) -> usize {
    self.items.len()
  }

  pub fn is_empty(&self) -> bool {
    self.items.is_empty()
  }

  /// 置信度过滤后按类别做非极大值抑制
  pub fn suppress(self, confidence: f32, iou_threshold: f32) -> Self {
    let mut candidates: Vec<DetectItem> = self
      .items
      .into_vec()
      .into_iter()
      .filter(|item| item.score >= confidence)
      .collect();
    candidates.sort_by(|a, b| b.score.total_cmp(&a.score));

    let mut kept: Vec<DetectItem> = Vec::with_capacity(candidates.len());
    for item in candidates {
      let overlapped = kept
        .iter()
        .any(|best| best.class_id == item.class_id && best.bbox.iou(&item.bbox) >= iou_threshold);
      if !overlapped {
        kept.push(item);
      }
    }
    Self::new(kept)
  }
}

/// 不透明的检测器：图像进，检测框出
pub trait Detector: Send + Sync {
  fn detect(&self, frame: &RgbFrame) -> Result<DetectResult, DetectorError>;

  /// 检测器期望的输入尺寸，预热时按此尺寸构造空白帧
  fn input_size(&self) -> (u32, u32);

  fn warm_up(&self) -> Result<(), DetectorError> {
    let (width, height) = self.input_size();
    self
      .detect(&RgbFrame::blank(width, height))
      .map(|_| ())
      .map_err(|e| DetectorError::WarmUp(e.to_string()))
  }
}

/// 检测库的加载入口，负责识别模型扩展名并从文件构造检测器
pub trait DetectorLoader: Send + Sync {
  /// 可加载的扩展名（不含点，小写）
  fn extensions(&self) -> &[&str];

  fn load(&self, path: &Path) -> Result<Box<dyn Detector>, DetectorError>;

  fn recognizes(&self, path: &Path) -> bool {
    path
      .extension()
      .and_then(|ext| ext.to_str())
      .map(|ext| {
        let ext = ext.to_ascii_lowercase();
        self.extensions().iter().any(|known| *known == ext)
      })
      .unwrap_or(false)
  }
}

/// 已加载并预热的模型，构造后不可变
pub struct ModelHandle {
  detector: Box<dyn Detector>,
  path: PathBuf,
  name: String,
  loaded_at: DateTime<Local>,
}

impl std::fmt::Debug for ModelHandle {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("ModelHandle")
      .field("path", &self.path)
      .field("name", &self.name)
      .field("loaded_at", &self.loaded_at)
      .finish_non_exhaustive()
  }
}

impl ModelHandle {
  pub fn new(detector: Box<dyn Detector>, path: impl Into<PathBuf>) -> Self {
    let path = path.into();
    let name = path
      .file_name()
      .map(|name| name.to_string_lossy().into_owned())
      .unwrap_or_else(|| path.display().to_string());
    Self {
      detector,
      path,
      name,
      loaded_at: Local::now(),
    }
  }

  /// 加载并预热，只有完整可用的模型才会返回
  pub fn load(loader: &dyn DetectorLoader, path: &Path) -> Result<Self, DetectorError> {
    info!("加载模型文件: {}", path.display());
    let detector = loader.load(path)?;
    debug!("预热模型: {}", path.display());
    detector.warm_up()?;
    Ok(Self::new(detector, path))
  }

  pub fn detect(&self, frame: &RgbFrame) -> Result<DetectResult, DetectorError> {
    self.detector.detect(frame)
  }

  pub fn name(&self) -> &str {
    &self.name
  }

  pub fn path(&self) -> &Path {
    &self.path
  }

  pub fn loaded_at(&self) -> DateTime<Local> {
    self.loaded_at
  }
}

/// 目录中可识别的模型文件及其修改时间与大小
#[derive(Debug, Clone)]
pub struct ModelFileInfo {
  pub path: PathBuf,
  pub modified: SystemTime,
  pub size: u64,
}

/// 按修改时间从新到旧列出目录中的模型文件，目录不存在时返回空
pub fn list_models(dir: &Path, loader: &dyn DetectorLoader) -> Result<Vec<ModelFileInfo>, DetectorError> {
  if !dir.is_dir() {
    return Ok(Vec::new());
  }

  let mut models = Vec::new();
  for entry in std::fs::read_dir(dir)? {
    let entry = entry?;
    let path = entry.path();
    if !path.is_file() || !loader.recognizes(&path) {
      continue;
    }
    let metadata = entry.metadata()?;
    models.push(ModelFileInfo {
      path,
      modified: metadata.modified()?,
      size: metadata.len(),
    });
  }
  models.sort_by(|a, b| b.modified.cmp(&a.modified).then_with(|| b.path.cmp(&a.path)));
  Ok(models)
}

/// 模型 URL 指向的文件；指向目录时取其中最新的可识别模型
pub fn resolve_model_path(url: &Url, loader: &dyn DetectorLoader) -> Result<PathBuf, DetectorError> {
  let path = PathBuf::from(crate::url_path(url));
  if path.is_file() {
    return Ok(path);
  }
  if !path.is_dir() {
    return Err(DetectorError::ModelPath(format!("{} 不存在", path.display())));
  }

  let models = list_models(&path, loader)?;
  for info in models.iter() {
    debug!(
      "可用模型: {} ({:.2} MB, {})",
      info.path.display(),
      info.size as f64 / (1024.0 * 1024.0),
      DateTime::<Local>::from(info.modified).format("%Y-%m-%d %H:%M:%S")
    );
  }
  models
    .into_iter()
    .next()
    .map(|info| info.path)
    .ok_or_else(|| DetectorError::ModelPath(format!("目录 {} 中没有可加载的模型", path.display())))
}

/// 已知的模型方案及其对应的编译特性
const MODEL_BACKENDS: [(&str, &str); 1] = [("yolo26", "model_yolo26")];

/// 根据模型 URL 的方案选择检测库
#[cfg_attr(not(feature = "model_yolo26"), allow(unused_variables))]
pub fn open_loader(url: &Url, options: DetectorOptions) -> Result<Arc<dyn DetectorLoader>, DetectorError> {
  #[cfg(feature = "model_yolo26")]
  {
    use crate::{FromUrl, FromUrlWithScheme};

    if url.scheme() == Yolo26Loader::SCHEME {
      return Ok(Arc::new(Yolo26Loader::from_url(url)?.with_options(options)));
    }
  }

  match MODEL_BACKENDS.iter().find(|(scheme, _)| *scheme == url.scheme()) {
    Some(&(scheme, feature)) => Err(DetectorError::BackendDisabled {
      scheme: scheme.to_string(),
      feature,
    }),
    None => Err(DetectorError::SchemeMismatch(url.scheme().to_string())),
  }
}
