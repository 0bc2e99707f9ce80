// 该文件是 Xunfeng （巡风） 项目的一部分。
// src/model/yolo26.rs - RKNN YOLO26 检测器
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use std::{
  path::Path,
  sync::{Mutex, PoisonError},
};

use rknpu::{Context, InitFlags, TensorType};
use thiserror::Error;
use tracing::{debug, error};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  frame::RgbFrame,
  model::{BoundingBox, DetectItem, DetectResult, Detector, DetectorError, DetectorLoader, DetectorOptions},
};

const YOLO26_NUM_INPUTS: u32 = 1;
const YOLO26_NUM_OUTPUTS: u32 = 6;
const YOLO26_CLASS_NUM: usize = 80;
const YOLO26_STRIDES: [usize; 3] = [8, 16, 32];
const YOLO26_EXTENSIONS: [&str; 1] = ["rknn"];

#[derive(Error, Debug)]
pub enum Yolo26Error {
  #[error("模型加载错误: {0}")]
  ModelLoadError(#[from] std::io::Error),
  #[error("模型无效: {0}, 错误: {1}")]
  ModelInvalid(String, rknpu::Error),
  #[error("RKNN 错误: {0}")]
  RknnError(#[from] rknpu::Error),
}

impl Yolo26Error {
  pub fn invalid(msg: &str, e: rknpu::Error) -> Self {
    Yolo26Error::ModelInvalid(msg.to_string(), e)
  }
}

/// 按 `.rknn` 文件构造 YOLO26 检测器
pub struct Yolo26Loader {
  options: DetectorOptions,
}

impl Yolo26Loader {
  pub fn new(options: DetectorOptions) -> Self {
    Self { options }
  }

  pub fn with_options(mut self, options: DetectorOptions) -> Self {
    self.options = options;
    self
  }

  fn build(&self, path: &Path) -> Result<Yolo26, Yolo26Error> {
    let mode_data = std::fs::read(path)?;
    debug!(
      "模型文件大小: {:.2} MB",
      mode_data.len() as f64 / (1024.0 * 1024.0)
    );

    let context = Context::new(&mode_data, InitFlags::default())?;

    match context.sdk_version() {
      Ok(version) => {
        if let Ok(api_ver) = version.api_version() {
          debug!("模型 API 版本: {}", api_ver);
        }
        if let Ok(drv_ver) = version.driver_version() {
          debug!("模型驱动版本: {}", drv_ver);
        }
      }
      Err(e) => {
        error!(" 查询 SDK 版本失败: {}", e);
        return Err(Yolo26Error::invalid("无法查询 SDK 版本", e));
      }
    }

    let num_inputs = context
      .num_inputs()
      .map_err(|e| Yolo26Error::invalid("无法获取输入数量", e))?;
    let num_outputs = context
      .num_outputs()
      .map_err(|e| Yolo26Error::invalid("无法获取输出数量", e))?;

    if num_inputs != YOLO26_NUM_INPUTS || num_outputs != YOLO26_NUM_OUTPUTS {
      let msg = format!(
        "预期模型输入/输出数量为 {}/{}, 实际为 {}/{}",
        YOLO26_NUM_INPUTS, YOLO26_NUM_OUTPUTS, num_inputs, num_outputs
      );
      error!("{}", msg);
      return Err(Yolo26Error::invalid(&msg, rknpu::Error::InvalidModel));
    }

    Ok(Yolo26 {
      context: Mutex::new(context),
      options: self.options,
    })
  }
}

impl FromUrlWithScheme for Yolo26Loader {
  const SCHEME: &'static str = "yolo26";
}

impl FromUrl for Yolo26Loader {
  type Error = DetectorError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(DetectorError::ModelPath(format!(
        "模型路径必须使用 {} 方案",
        Self::SCHEME
      )));
    }
    Ok(Self::new(DetectorOptions::default()))
  }
}

impl DetectorLoader for Yolo26Loader {
  fn extensions(&self) -> &[&str] {
    &YOLO26_EXTENSIONS
  }

  fn load(&self, path: &Path) -> Result<Box<dyn Detector>, DetectorError> {
    let model = self.build(path).map_err(|e| DetectorError::Load {
      path: path.to_path_buf(),
      reason: e.to_string(),
    })?;
    Ok(Box::new(model))
  }
}

pub struct Yolo26 {
  context: Mutex<Context>,
  options: DetectorOptions,
}

impl Yolo26 {
  fn infer(&self, input: &RgbFrame) -> Result<DetectResult, Yolo26Error> {
    let context = self.context.lock().unwrap_or_else(PoisonError::into_inner);

    debug!("设置模型输入");
    context.set_input(
      0,
      input.as_nhwc(),
      rknpu::TensorFormat::NHWC,
      TensorType::UInt8,
    )?;

    debug!("执行模型推理");
    context.run()?;

    let output = context.get_outputs()?;
    Ok(self.postprocess(output))
  }

  fn postprocess(&self, output: rknpu::Output) -> DetectResult {
    let size = self.options.inference_size as usize;
    let input_side = size as f32;
    let mut items = Vec::new();

    for (head_idx, stride) in YOLO26_STRIDES.into_iter().enumerate() {
      let (map_h, map_w) = (size / stride, size / stride);
      let spatial = map_h * map_w;
      let reg_expected = 4 * spatial;
      let cls_expected = YOLO26_CLASS_NUM * spatial;

      // 由于 RKNN 输出顺序可能不同，需要根据张量大小来判断哪个是回归，哪个是分类
      let output_idx1 = head_idx * 2;
      let output_idx2 = head_idx * 2 + 1;

      let tensor1 = match output.get_f32(output_idx1) {
        Ok(data) => data,
        Err(e) => {
          error!("获取第 {} 个输出失败: {}", output_idx1, e);
          continue;
        }
      };

      let tensor2 = match output.get_f32(output_idx2) {
        Ok(data) => data,
        Err(e) => {
          error!("获取第 {} 个输出失败: {}", output_idx2, e);
          continue;
        }
      };

      let (reg, cls) = match match_reg_cls_tensors(tensor1, tensor2, reg_expected, cls_expected) {
        Some(tensors) => tensors,
        None => {
          error!("检测头 {}: 输出大小不匹配", head_idx);
          continue;
        }
      };

      let stride = stride as f32;
      for h in 0..map_h {
        for w in 0..map_w {
          let idx = h * map_w + w;

          let (score, class_id) = {
            let mut max_logit = f32::MIN;
            let mut cls_idx = 0usize;
            for c in 0..YOLO26_CLASS_NUM {
              let logit = cls[c * spatial + idx];
              if logit > max_logit {
                max_logit = logit;
                cls_idx = c;
              }
            }
            (sigmoid(max_logit), cls_idx as u32)
          };

          if score < self.options.confidence {
            continue;
          }

          let grid_x = (w as f32) + 0.5;
          let grid_y = (h as f32) + 0.5;

          let xmin = ((grid_x - reg[idx]) * stride).clamp(0.0, input_side);
          let ymin = ((grid_y - reg[spatial + idx]) * stride).clamp(0.0, input_side);
          let xmax = ((grid_x + reg[2 * spatial + idx]) * stride).clamp(0.0, input_side);
          let ymax = ((grid_y + reg[3 * spatial + idx]) * stride).clamp(0.0, input_side);

          if xmin < xmax && ymin < ymax {
            items.push(DetectItem {
              class_id,
              score,
              bbox: BoundingBox::from_corners(xmin, ymin, xmax, ymax),
            });
          }
        }
      }
    }

    debug!("检测到 {} 个物体", items.len());
    DetectResult::new(items).suppress(self.options.confidence, self.options.iou_threshold)
  }
}

impl Detector for Yolo26 {
  fn detect(&self, frame: &RgbFrame) -> Result<DetectResult, DetectorError> {
    let side = self.options.inference_size;
    let input = frame.resized(side, side);
    let result = self
      .infer(&input)
      .map_err(|e| DetectorError::Inference(e.to_string()))?;

    // 检测框换算回原始帧坐标
    let scale_x = frame.width() as f32 / side as f32;
    let scale_y = frame.height() as f32 / side as f32;
    let items = result
      .items
      .iter()
      .map(|item| DetectItem {
        bbox: BoundingBox {
          center_x: item.bbox.center_x * scale_x,
          center_y: item.bbox.center_y * scale_y,
          width: item.bbox.width * scale_x,
          height: item.bbox.height * scale_y,
        },
        ..item.clone()
      })
      .collect();
    Ok(DetectResult::new(items))
  }

  fn input_size(&self) -> (u32, u32) {
    (self.options.inference_size, self.options.inference_size)
  }
}

/// 根据张量大小匹配回归和分类输出，返回 (reg, cls)
fn match_reg_cls_tensors<'a>(
  tensor1: &'a [f32],
  tensor2: &'a [f32],
  reg_expected: usize,
  cls_expected: usize,
) -> Option<(&'a [f32], &'a [f32])> {
  if tensor1.len() == reg_expected && tensor2.len() == cls_expected {
    Some((tensor1, tensor2))
  } else if tensor1.len() == cls_expected && tensor2.len() == reg_expected {
    Some((tensor2, tensor1))
  } else {
    None
  }
}

fn sigmoid(x: f32) -> f32 {
  1.0 / (1.0 + (-x).exp())
}
