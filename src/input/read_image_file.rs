// 该文件是 Xunfeng （巡风） 项目的一部分。
// src/input/read_image_file.rs - 图像文件输入
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use std::path::{Path, PathBuf};

use image::ImageReader;
use thiserror::Error;
use tracing::{debug, error, warn};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  frame::RgbFrame,
  input::{FrameSource, InputError},
  url_path,
};

const IMAGE_EXTENSIONS: [&str; 5] = ["jpg", "jpeg", "png", "bmp", "webp"];

#[derive(Error, Debug)]
pub enum ImageFileInputError {
  #[error("URI schema mismatch")]
  SchemaMismatch,
  #[error("I/O error: {0}")]
  IoError(#[from] std::io::Error),
  #[error("No image found in {0}")]
  Empty(PathBuf),
}

/// 单张图片或图片目录（按文件名排序）构成的帧序列
pub struct ImageFileInput {
  files: Vec<PathBuf>,
  cursor: usize,
}

impl FromUrlWithScheme for ImageFileInput {
  const SCHEME: &'static str = "image";
}

impl FromUrl for ImageFileInput {
  type Error = ImageFileInputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      error!(
        "URI scheme mismatch: expected '{}', found '{}'",
        Self::SCHEME,
        url.scheme()
      );
      return Err(ImageFileInputError::SchemaMismatch);
    }

    Self::open(url_path(url))
  }
}

impl ImageFileInput {
  pub fn open(path: impl AsRef<Path>) -> Result<Self, ImageFileInputError> {
    let path = path.as_ref();
    let files = if path.is_dir() {
      let mut files = Vec::new();
      for entry in std::fs::read_dir(path)? {
        let file = entry?.path();
        if is_image_file(&file) {
          files.push(file);
        }
      }
      files.sort();
      files
    } else {
      // 让不存在的文件在这里报错，而不是在第一次取帧时
      std::fs::metadata(path)?;
      vec![path.to_path_buf()]
    };

    if files.is_empty() {
      return Err(ImageFileInputError::Empty(path.to_path_buf()));
    }
    debug!("图片输入共 {} 个文件: {}", files.len(), path.display());

    Ok(Self { files, cursor: 0 })
  }

  pub fn len(&self) -> usize {
    self.files.len()
  }

  pub fn is_empty(&self) -> bool {
    self.files.is_empty()
  }
}

fn is_image_file(path: &Path) -> bool {
  path
    .extension()
    .and_then(|ext| ext.to_str())
    .map(|ext| IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
    .unwrap_or(false)
}

impl Iterator for ImageFileInput {
  type Item = RgbFrame;

  fn next(&mut self) -> Option<Self::Item> {
    // 读取失败的文件跳过，不中断序列
    while let Some(path) = self.files.get(self.cursor) {
      self.cursor += 1;
      let decoded = ImageReader::open(path)
        .map_err(image::ImageError::IoError)
        .and_then(|reader| reader.with_guessed_format().map_err(image::ImageError::IoError))
        .and_then(|reader| reader.decode());
      match decoded {
        Ok(image) => return Some(RgbFrame::from(image.to_rgb8())),
        Err(e) => warn!("读取图片失败 {}: {}", path.display(), e),
      }
    }
    None
  }
}

impl FrameSource for ImageFileInput {
  fn rewind(&mut self) -> Result<(), InputError> {
    self.cursor = 0;
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use image::{Rgb, RgbImage};

  fn write_image(path: &Path, value: u8) {
    RgbImage::from_pixel(4, 3, Rgb([value, value, value]))
      .save(path)
      .unwrap();
  }

  #[test]
  fn directory_is_read_in_name_order_and_rewinds() {
    let dir = tempfile::tempdir().unwrap();
    write_image(&dir.path().join("b.png"), 2);
    write_image(&dir.path().join("a.png"), 1);
    std::fs::write(dir.path().join("notes.txt"), "skip me").unwrap();

    let mut input = ImageFileInput::open(dir.path()).unwrap();
    assert_eq!(input.len(), 2);
    assert_eq!(input.next().unwrap().as_nhwc()[0], 1);
    assert_eq!(input.next().unwrap().as_nhwc()[0], 2);
    assert!(input.next().is_none());

    input.rewind().unwrap();
    assert_eq!(input.next().unwrap().as_nhwc()[0], 1);
  }

  #[test]
  fn from_url_checks_scheme() {
    let url = Url::parse("file:///tmp/a.png").unwrap();
    assert!(matches!(
      ImageFileInput::from_url(&url),
      Err(ImageFileInputError::SchemaMismatch)
    ));
  }

  #[test]
  fn from_url_decodes_spaces_and_cjk_in_path() {
    let dir = tempfile::tempdir().unwrap();
    let frames = dir.path().join("my frames 巡风");
    std::fs::create_dir(&frames).unwrap();
    write_image(&frames.join("a.png"), 7);

    let url = Url::parse(&format!("image://{}", frames.display())).unwrap();
    let mut input = ImageFileInput::from_url(&url).unwrap();
    assert_eq!(input.len(), 1);
    assert_eq!(input.next().unwrap().as_nhwc()[0], 7);
  }

  #[test]
  fn empty_directory_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    assert!(matches!(
      ImageFileInput::open(dir.path()),
      Err(ImageFileInputError::Empty(_))
    ));
  }
}
