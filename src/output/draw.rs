// 该文件是 Xunfeng （巡风） 项目的一部分。
// src/output/draw.rs - 目标检测结果可视化
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use image::{Rgb, RgbImage};
use imageproc::{drawing::draw_hollow_rect_mut, rect::Rect};

use crate::model::{BoundingBox, DetectResult};

const BOX_THICKNESS: u32 = 2;

// 按类别循环取色
const PALETTE: [[u8; 3]; 6] = [
  [0, 0, 255],
  [255, 56, 56],
  [72, 249, 10],
  [255, 178, 29],
  [0, 194, 255],
  [207, 210, 49],
];

/// 在帧上绘制检测框，框坐标与帧同一像素空间
#[derive(Debug, Clone)]
pub struct Draw {
  thickness: u32,
}

impl Default for Draw {
  fn default() -> Self {
    Self {
      thickness: BOX_THICKNESS,
    }
  }
}

impl Draw {
  pub fn draw_detections(&self, image: &mut RgbImage, result: &DetectResult) {
    for item in result.items.iter() {
      let color = PALETTE[item.class_id as usize % PALETTE.len()];
      self.draw_bbox(image, &item.bbox, Rgb(color));
    }
  }

  fn draw_bbox(&self, image: &mut RgbImage, bbox: &BoundingBox, color: Rgb<u8>) {
    let (w, h) = (image.width() as i32, image.height() as i32);
    if w == 0 || h == 0 {
      return;
    }
    let [x_min, y_min, x_max, y_max] = bbox.corners();

    let x_min = (x_min.floor() as i32).clamp(0, w - 1);
    let y_min = (y_min.floor() as i32).clamp(0, h - 1);
    let x_max = (x_max.ceil() as i32).clamp(0, w - 1);
    let y_max = (y_max.ceil() as i32).clamp(0, h - 1);

    if x_min >= x_max || y_min >= y_max {
      return;
    }

    // 由外向内逐层绘制加粗边框
    for t in 0..self.thickness as i32 {
      let (width, height) = (x_max - x_min - 2 * t, y_max - y_min - 2 * t);
      if width <= 0 || height <= 0 {
        break;
      }
      let rect = Rect::at(x_min + t, y_min + t).of_size(width as u32 + 1, height as u32 + 1);
      draw_hollow_rect_mut(image, rect, color);
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::model::DetectItem;

  fn result(bbox: BoundingBox) -> DetectResult {
    DetectResult::new(vec![DetectItem {
      class_id: 0,
      score: 0.9,
      bbox,
    }])
  }

  #[test]
  fn box_edges_are_drawn() {
    let mut image = RgbImage::new(20, 20);
    Draw::default().draw_detections(&mut image, &result(BoundingBox::from_corners(5.0, 5.0, 15.0, 15.0)));

    let color = Rgb(PALETTE[0]);
    assert_eq!(*image.get_pixel(5, 10), color);
    assert_eq!(*image.get_pixel(6, 10), color);
    assert_eq!(*image.get_pixel(15, 10), color);
    assert_eq!(*image.get_pixel(10, 5), color);
    assert_eq!(*image.get_pixel(10, 10), Rgb([0, 0, 0]));
  }

  #[test]
  fn boxes_outside_the_frame_are_clipped() {
    let mut image = RgbImage::new(10, 10);
    Draw::default().draw_detections(
      &mut image,
      &result(BoundingBox::from_corners(-50.0, -50.0, 100.0, 100.0)),
    );
    assert_eq!(*image.get_pixel(0, 5), Rgb(PALETTE[0]));
    assert_eq!(*image.get_pixel(9, 5), Rgb(PALETTE[0]));

    let mut image = RgbImage::new(10, 10);
    Draw::default().draw_detections(&mut image, &result(BoundingBox::from_corners(30.0, 30.0, 40.0, 40.0)));
    assert!(image.pixels().all(|p| *p == Rgb([0, 0, 0])));
  }
}
