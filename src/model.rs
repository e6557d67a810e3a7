// 该文件是 Nametag （名牌检测） 项目的一部分。
// src/model.rs - 模型
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

/// 名牌类别在模型中的编号
pub const NAME_TAG_CLASS_ID: u32 = 0;

/// 名牌类别的固定名称，绘制与日志都使用它
pub const NAME_TAG_LABEL: &str = "name_tag";

pub trait Model {
  type Input;
  type Output;
  type Error;

  fn infer(&self, input: &Self::Input) -> Result<Self::Output, Self::Error>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct DetectItem {
  pub class_id: u32,
  pub score: f32,
  pub bbox: [f32; 4], // [x_min, y_min, x_max, y_max]，原图像素坐标
}

impl DetectItem {
  /// 像素整数坐标，与 Python `int()` 一致向零截断
  pub fn pixel_box(&self) -> [i32; 4] {
    self.bbox.map(|v| v as i32)
  }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DetectResult {
  pub items: Box<[DetectItem]>,
}

impl DetectResult {
  pub fn is_empty(&self) -> bool {
    self.items.is_empty()
  }

  pub fn len(&self) -> usize {
    self.items.len()
  }

  /// 只保留指定类别的检测结果
  pub fn retain_class(&self, class_id: u32) -> DetectResult {
    self
      .items
      .iter()
      .filter(|item| item.class_id == class_id)
      .cloned()
      .collect()
  }
}

impl FromIterator<DetectItem> for DetectResult {
  fn from_iter<T: IntoIterator<Item = DetectItem>>(iter: T) -> Self {
    DetectResult {
      items: iter.into_iter().collect(),
    }
  }
}

#[cfg(feature = "model_onnx")]
mod yolo;
#[cfg(feature = "model_onnx")]
pub use self::yolo::{YoloError, YoloOnnx, YoloOnnxBuilder};
