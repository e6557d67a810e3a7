// 该文件是 Nametag （名牌检测） 项目的一部分。
// src/model/yolo.rs - ONNX YOLO 检测模型
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

use std::path::PathBuf;

use image::{
  Rgb, RgbImage,
  imageops::{self, FilterType},
};
use thiserror::Error;
use tracing::{debug, info};
use tract_onnx::prelude::*;
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  frame::RgbNhwcFrame,
  model::{DetectItem, DetectResult, Model},
};

const YOLO_DEFAULT_INPUT_SIZE: u32 = 640;
const YOLO_DEFAULT_CONFIDENCE: f32 = 0.25;
const YOLO_DEFAULT_IOU: f32 = 0.7;
const YOLO_BOX_ATTRS: usize = 4; // cx, cy, w, h
const LETTERBOX_FILL: u8 = 114;

const YOLO_SCHEME: &str = "onnx";

#[derive(Error, Debug)]
pub enum YoloError {
  #[error("模型路径错误: {0}")]
  ModelPathError(String),
  #[error("模型加载错误: {0:#}")]
  ModelLoadError(TractError),
  #[error("模型推理错误: {0:#}")]
  InferenceError(TractError),
  #[error("模型输出无效: {0}")]
  InvalidOutput(String),
}

/// YOLOv8 风格的 ONNX 检测模型，输出 `[1, 4 + 类别数, 候选框数]`
pub struct YoloOnnx {
  model: SimplePlan<TypedFact, Box<dyn TypedOp>, TypedModel>,
  input_size: u32,
  confidence: f32,
  iou: f32,
}

pub struct YoloOnnxBuilder {
  model_path: PathBuf,
  input_size: u32,
  confidence: f32,
  iou: f32,
}

impl FromUrlWithScheme for YoloOnnxBuilder {
  const SCHEME: &'static str = YOLO_SCHEME;
}

impl FromUrl for YoloOnnxBuilder {
  type Error = YoloError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(YoloError::ModelPathError(format!(
        "模型路径必须使用 {} 方案",
        Self::SCHEME
      )));
    }

    let builder = YoloOnnxBuilder::new(crate::url_file_path(url));
    Ok(
      builder
        .input_size(crate::url_query(url, "size").unwrap_or(YOLO_DEFAULT_INPUT_SIZE))
        .confidence(crate::url_query(url, "conf").unwrap_or(YOLO_DEFAULT_CONFIDENCE))
        .iou(crate::url_query(url, "iou").unwrap_or(YOLO_DEFAULT_IOU)),
    )
  }
}

impl YoloOnnxBuilder {
  pub fn new<P: Into<PathBuf>>(model_path: P) -> Self {
    YoloOnnxBuilder {
      model_path: model_path.into(),
      input_size: YOLO_DEFAULT_INPUT_SIZE,
      confidence: YOLO_DEFAULT_CONFIDENCE,
      iou: YOLO_DEFAULT_IOU,
    }
  }

  pub fn input_size(mut self, input_size: u32) -> Self {
    self.input_size = input_size;
    self
  }

  pub fn confidence(mut self, confidence: f32) -> Self {
    self.confidence = confidence;
    self
  }

  pub fn iou(mut self, iou: f32) -> Self {
    self.iou = iou;
    self
  }

  pub fn build(self) -> Result<YoloOnnx, YoloError> {
    if self.input_size == 0 {
      return Err(YoloError::ModelPathError("输入尺寸必须大于 0".to_string()));
    }
    if !self.model_path.is_file() {
      return Err(YoloError::ModelPathError(format!(
        "模型文件不存在: {}",
        self.model_path.display()
      )));
    }

    info!("加载模型文件: {}", self.model_path.display());
    let size = self.input_size as usize;
    let model = tract_onnx::onnx()
      .model_for_path(&self.model_path)
      .and_then(|model| {
        model.with_input_fact(
          0,
          InferenceFact::dt_shape(f32::datum_type(), tvec!(1, 3, size, size)),
        )
      })
      .and_then(|model| model.into_optimized())
      .and_then(|model| model.into_runnable())
      .map_err(YoloError::ModelLoadError)?;
    info!("模型加载完成");
    debug!(
      "输入尺寸: {}, 置信度阈值: {}, NMS 阈值: {}",
      self.input_size, self.confidence, self.iou
    );

    Ok(YoloOnnx {
      model,
      input_size: self.input_size,
      confidence: self.confidence,
      iou: self.iou,
    })
  }
}

/// 等比缩放并居中填充到正方形输入，记录缩放比例和填充量以便还原坐标
#[derive(Debug, Clone, Copy, PartialEq)]
struct Letterbox {
  gain: f32,
  resized: (u32, u32),
  pad: (f32, f32), // 左、上填充
}

impl Letterbox {
  fn new(frame_size: (u32, u32), input_size: u32) -> Self {
    let (width, height) = (frame_size.0 as f32, frame_size.1 as f32);
    let size = input_size as f32;
    let gain = (size / width).min(size / height);
    let resized = ((width * gain).round(), (height * gain).round());
    // 与 Ultralytics 一致：奇数填充时多出的一行放在下方/右侧
    let pad = (
      ((size - resized.0) / 2.0 - 0.1).round().max(0.0),
      ((size - resized.1) / 2.0 - 0.1).round().max(0.0),
    );
    Letterbox {
      gain,
      resized: (resized.0.max(1.0) as u32, resized.1.max(1.0) as u32),
      pad,
    }
  }

  /// 模型输入坐标还原为原图坐标
  fn to_frame(&self, x: f32, y: f32) -> (f32, f32) {
    ((x - self.pad.0) / self.gain, (y - self.pad.1) / self.gain)
  }
}

impl YoloOnnx {
  fn build_input(&self, frame: &RgbNhwcFrame, letterbox: &Letterbox) -> Tensor {
    let size = self.input_size;
    let resized = imageops::resize(
      &frame.to_rgb_image(),
      letterbox.resized.0,
      letterbox.resized.1,
      FilterType::Triangle,
    );
    let mut canvas = RgbImage::from_pixel(size, size, Rgb([LETTERBOX_FILL; 3]));
    imageops::overlay(
      &mut canvas,
      &resized,
      letterbox.pad.0 as i64,
      letterbox.pad.1 as i64,
    );
    tract_ndarray::Array4::from_shape_fn(
      (1, 3, size as usize, size as usize),
      |(_, channel, y, x)| canvas.get_pixel(x as u32, y as u32)[channel] as f32 / 255.0,
    )
    .into_tensor()
  }
}

impl Model for YoloOnnx {
  type Input = RgbNhwcFrame;
  type Output = DetectResult;
  type Error = YoloError;

  fn infer(&self, input: &Self::Input) -> Result<Self::Output, Self::Error> {
    if input.width() == 0 || input.height() == 0 {
      return Ok(DetectResult::default());
    }

    debug!("设置模型输入");
    let letterbox = Letterbox::new((input.width(), input.height()), self.input_size);
    let tensor = self.build_input(input, &letterbox);

    debug!("执行模型推理");
    let outputs = self
      .model
      .run(tvec!(tensor.into()))
      .map_err(YoloError::InferenceError)?;

    let output = outputs
      .first()
      .ok_or_else(|| YoloError::InvalidOutput("模型没有输出".to_string()))?;
    let view = output
      .to_array_view::<f32>()
      .map_err(YoloError::InferenceError)?;

    let candidates = decode_predictions(
      view,
      &letterbox,
      (input.width() as f32, input.height() as f32),
      self.confidence,
    )?;
    let items = non_max_suppression(candidates, self.iou);

    debug!("检测到 {} 个物体", items.len());
    Ok(items.into_iter().collect())
  }
}

/// 解析 YOLOv8 原始输出。
///
/// 输出布局为 `[1, 4 + C, N]`，部分导出会转置为 `[1, N, 4 + C]`，
/// 以较小的一维作为属性维度。
fn decode_predictions(
  view: tract_ndarray::ArrayViewD<f32>,
  letterbox: &Letterbox,
  frame_size: (f32, f32),
  confidence: f32,
) -> Result<Vec<DetectItem>, YoloError> {
  let view = view
    .into_dimensionality::<tract_ndarray::Ix3>()
    .map_err(|e| YoloError::InvalidOutput(format!("输出维度错误: {}", e)))?;

  let (_, d1, d2) = view.dim();
  let transposed = d1 > d2;
  let (attrs, proposals) = if transposed { (d2, d1) } else { (d1, d2) };
  if attrs <= YOLO_BOX_ATTRS {
    return Err(YoloError::InvalidOutput(format!(
      "属性维度 {} 过小，至少需要 {}",
      attrs,
      YOLO_BOX_ATTRS + 1
    )));
  }

  let at = |attr: usize, proposal: usize| {
    if transposed {
      view[[0, proposal, attr]]
    } else {
      view[[0, attr, proposal]]
    }
  };

  let mut items = Vec::new();
  for i in 0..proposals {
    let (class_id, score) = (YOLO_BOX_ATTRS..attrs)
      .map(|a| ((a - YOLO_BOX_ATTRS) as u32, at(a, i)))
      .fold((0u32, f32::MIN), |best, cur| if cur.1 > best.1 { cur } else { best });

    if score < confidence {
      continue;
    }

    let (cx, cy, w, h) = (at(0, i), at(1, i), at(2, i), at(3, i));
    let (x_min, y_min) = letterbox.to_frame(cx - w / 2.0, cy - h / 2.0);
    let (x_max, y_max) = letterbox.to_frame(cx + w / 2.0, cy + h / 2.0);

    items.push(DetectItem {
      class_id,
      score,
      bbox: [
        x_min.clamp(0.0, frame_size.0),
        y_min.clamp(0.0, frame_size.1),
        x_max.clamp(0.0, frame_size.0),
        y_max.clamp(0.0, frame_size.1),
      ],
    });
  }

  Ok(items)
}

fn iou(a: &[f32; 4], b: &[f32; 4]) -> f32 {
  let ix = (a[2].min(b[2]) - a[0].max(b[0])).max(0.0);
  let iy = (a[3].min(b[3]) - a[1].max(b[1])).max(0.0);
  let inter = ix * iy;
  if inter == 0.0 {
    return 0.0;
  }
  let area_a = (a[2] - a[0]) * (a[3] - a[1]);
  let area_b = (b[2] - b[0]) * (b[3] - b[1]);
  inter / (area_a + area_b - inter)
}

/// 按类别分别做非极大值抑制，结果按置信度降序
fn non_max_suppression(mut candidates: Vec<DetectItem>, threshold: f32) -> Vec<DetectItem> {
  candidates.sort_by(|a, b| b.score.total_cmp(&a.score));

  let mut kept: Vec<DetectItem> = Vec::with_capacity(candidates.len());
  for candidate in candidates {
    let suppressed = kept
      .iter()
      .any(|k| k.class_id == candidate.class_id && iou(&k.bbox, &candidate.bbox) > threshold);
    if !suppressed {
      kept.push(candidate);
    }
  }
  kept
}
