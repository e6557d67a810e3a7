// 该文件是 Nametag （名牌检测） 项目的一部分。
// src/output/draw.rs - 检测结果可视化
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

use std::borrow::Cow;

use ab_glyph::{Font, FontRef, PxScale, ScaleFont};
use image::{Rgb, RgbImage};
use imageproc::{
  drawing::{draw_hollow_rect_mut, draw_text_mut},
  rect::Rect,
};
use thiserror::Error;

use crate::{
  frame::RgbNhwcFrame,
  model::{DetectResult, NAME_TAG_LABEL},
};

// 绘制样式固定，不可配置
const BOX_COLOR: [u8; 3] = [0, 255, 0]; // 绿色
const BOX_THICKNESS: i32 = 2;
const LABEL_COLOR: [u8; 3] = [0, 255, 0];
const LABEL_FONT_SIZE: f32 = 18.0;
const LABEL_OFFSET_Y: i32 = 10; // 文字基线在框上方的距离

static FONT_DATA: &[u8] = include_bytes!("../../assets/font.ttf");

#[derive(Error, Debug)]
pub enum DrawError {
  #[error("字体加载错误")]
  FontLoadError,
}

/// 把框裁剪到图像外扩一个线宽的范围内，超出部分本来就不可见
fn clip_box(bbox: [i32; 4], width: u32, height: u32) -> [i32; 4] {
  let max_x = i32::try_from(width).unwrap_or(i32::MAX).saturating_add(BOX_THICKNESS);
  let max_y = i32::try_from(height).unwrap_or(i32::MAX).saturating_add(BOX_THICKNESS);
  let [x_min, y_min, x_max, y_max] = bbox;
  [
    x_min.clamp(-BOX_THICKNESS, max_x),
    y_min.clamp(-BOX_THICKNESS, max_y),
    x_max.clamp(-BOX_THICKNESS, max_x),
    y_max.clamp(-BOX_THICKNESS, max_y),
  ]
}

pub struct Draw {
  font: FontRef<'static>,
  label: &'static str,
}

impl Draw {
  pub fn new() -> Result<Self, DrawError> {
    let font = FontRef::try_from_slice(FONT_DATA).map_err(|_| DrawError::FontLoadError)?;
    Ok(Self {
      font,
      label: NAME_TAG_LABEL,
    })
  }

  /// 以整数像素坐标 `[x_min, y_min, x_max, y_max]` 绘制边框，线宽向框内加粗。
  /// 坐标需先经 [`clip_box`] 裁剪。
  fn draw_bbox(&self, image: &mut RgbImage, bbox: [i32; 4]) {
    let [x_min, y_min, x_max, y_max] = bbox;
    for thickness in 0..BOX_THICKNESS {
      let (left, top) = (x_min + thickness, y_min + thickness);
      let (right, bottom) = (x_max - thickness, y_max - thickness);
      if right < left || bottom < top {
        break;
      }
      let rect = Rect::at(left, top).of_size((right - left + 1) as u32, (bottom - top + 1) as u32);
      draw_hollow_rect_mut(image, rect, Rgb(BOX_COLOR));
    }
  }

  /// 在 (x, baseline) 处绘制标签，超出图像的部分被裁掉
  fn draw_label(&self, image: &mut RgbImage, x: i32, baseline: i32) {
    let scale = PxScale::from(LABEL_FONT_SIZE);
    let ascent = self.font.as_scaled(scale).ascent().ceil() as i32;
    draw_text_mut(
      image,
      Rgb(LABEL_COLOR),
      x,
      baseline - ascent,
      scale,
      &self.font,
      self.label,
    );
  }

  pub fn draw_detections_on_image(&self, image: &mut RgbImage, result: &DetectResult) {
    for item in result.items.iter() {
      let bbox = clip_box(item.pixel_box(), image.width(), image.height());
      self.draw_bbox(image, bbox);
      self.draw_label(image, bbox[0], bbox[1].saturating_sub(LABEL_OFFSET_Y));
    }
  }

  /// 没有检测结果时原样借出输入帧，保证输出与输入逐字节相同
  pub fn draw_detection<'f>(
    &self,
    frame: &'f RgbNhwcFrame,
    result: &DetectResult,
  ) -> Cow<'f, RgbNhwcFrame> {
    if result.is_empty() {
      return Cow::Borrowed(frame);
    }

    let mut image = frame.to_rgb_image();
    self.draw_detections_on_image(&mut image, result);
    Cow::Owned(RgbNhwcFrame::from(image))
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::model::DetectItem;

  const GREEN: Rgb<u8> = Rgb(BOX_COLOR);
  const BLACK: Rgb<u8> = Rgb([0, 0, 0]);

  fn single(bbox: [f32; 4]) -> DetectResult {
    std::iter::once(DetectItem {
      class_id: 0,
      score: 0.9,
      bbox,
    })
    .collect()
  }

  #[test]
  fn box_outline_is_two_pixels_thick() {
    let draw = Draw::new().unwrap();
    let mut image = RgbImage::new(100, 100);
    draw.draw_detections_on_image(&mut image, &single([10.0, 10.0, 50.0, 50.0]));

    for x in [10, 11, 49, 50] {
      assert_eq!(*image.get_pixel(x, 30), GREEN, "column {}", x);
    }
    for y in [10, 11, 49, 50] {
      assert_eq!(*image.get_pixel(30, y), GREEN, "row {}", y);
    }
    assert_eq!(*image.get_pixel(12, 30), BLACK);
    assert_eq!(*image.get_pixel(30, 30), BLACK);
    assert_eq!(*image.get_pixel(51, 30), BLACK);
  }

  #[test]
  fn label_is_drawn_above_the_box() {
    let draw = Draw::new().unwrap();
    let mut image = RgbImage::new(120, 120);
    draw.draw_detections_on_image(&mut image, &single([10.0, 70.0, 60.0, 110.0]));

    let label_pixels = (20..60)
      .flat_map(|y| (10..120).map(move |x| (x, y)))
      .filter(|&(x, y)| *image.get_pixel(x, y) != BLACK)
      .count();
    assert!(label_pixels > 0);
    // 框内不应有文字
    assert_eq!(*image.get_pixel(35, 90), BLACK);
  }

  #[test]
  fn empty_result_borrows_the_input_frame() {
    let draw = Draw::new().unwrap();
    let frame = RgbNhwcFrame::with_shape(16, 16);
    let drawn = draw.draw_detection(&frame, &DetectResult::default());
    assert!(matches!(drawn, Cow::Borrowed(_)));
    assert_eq!(&*drawn, &frame);
  }

  #[test]
  fn boxes_are_clipped_around_the_frame() {
    assert_eq!(
      clip_box([i32::MIN, -5, i32::MAX, 20], 32, 16),
      [-2, -2, 34, 18]
    );
    assert_eq!(clip_box([3, 4, 10, 12], 32, 16), [3, 4, 10, 12]);
  }

  #[test]
  fn saturated_boxes_do_not_overflow() {
    let draw = Draw::new().unwrap();
    let frame = RgbNhwcFrame::with_shape(32, 32);
    let drawn = draw.draw_detection(&frame, &single([-3e9, -3e9, 3e9, 3e9]));
    assert_eq!(drawn.width(), 32);

    let mut image = RgbImage::new(32, 32);
    draw.draw_detections_on_image(&mut image, &single([0.0, 0.0, 1e8, 1e8]));
    // 只有左边和上边落在图像内
    assert_eq!(*image.get_pixel(0, 20), GREEN);
    assert_eq!(*image.get_pixel(20, 1), GREEN);
    assert_eq!(*image.get_pixel(31, 20), BLACK);
  }

  #[test]
  fn boxes_outside_the_frame_do_not_panic() {
    let draw = Draw::new().unwrap();
    let frame = RgbNhwcFrame::with_shape(32, 32);
    let drawn = draw.draw_detection(&frame, &single([-20.0, -20.0, 200.0, 200.0]));
    assert_eq!(drawn.width(), 32);
    assert_eq!(drawn.height(), 32);
  }
}
