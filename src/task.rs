// 该文件是 Nametag （名牌检测） 项目的一部分。
// src/task.rs - 逐帧检测任务
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

use std::time::Instant;

use anyhow::Context;
use tracing::{info, warn};

use crate::{
  frame::RgbNhwcFrame,
  input::VideoInfo,
  model::{DetectResult, Model, NAME_TAG_CLASS_ID, NAME_TAG_LABEL},
  output::Render,
  record::{DetectionLog, LogEntry},
};

/// 源帧率未知时使用的输出帧率
pub const FALLBACK_FPS: f64 = 24.0;

pub trait Task<I, M, O>: Sized {
  type Output;
  type Error;
  fn run_task(self, input: I, model: M, output: O) -> Result<Self::Output, Self::Error>;
}

/// 输出端使用的帧率：源帧率为 0、负数或非有限值时退回 [`FALLBACK_FPS`]
pub fn sink_fps(info: &VideoInfo) -> f64 {
  if info.fps.is_finite() && info.fps > 0.0 {
    info.fps
  } else {
    warn!("源视频帧率无效 ({}), 使用默认帧率 {}", info.fps, FALLBACK_FPS);
    FALLBACK_FPS
  }
}

/// 单帧推理失败时的处理方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InferFailurePolicy {
  /// 立即终止任务并返回错误
  #[default]
  Abort,
  /// 记录警告，原样写出该帧后继续
  SkipFrame,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RunResult {
  /// 读取并写出的帧数
  pub frames: u64,
  /// 被接受的检测总数
  pub detections: u64,
  pub log: DetectionLog,
}

#[derive(Debug, Clone)]
pub struct DetectionTask {
  target_class: u32,
  on_infer_error: InferFailurePolicy,
}

impl Default for DetectionTask {
  fn default() -> Self {
    DetectionTask {
      target_class: NAME_TAG_CLASS_ID,
      on_infer_error: InferFailurePolicy::default(),
    }
  }
}

impl DetectionTask {
  pub fn with_target_class(mut self, class_id: u32) -> Self {
    self.target_class = class_id;
    self
  }

  pub fn with_infer_failure_policy(mut self, policy: InferFailurePolicy) -> Self {
    self.on_infer_error = policy;
    self
  }
}

impl<
  ME: std::error::Error + Sync + Send + 'static,
  RE: std::error::Error + Sync + Send + 'static,
  I: Iterator<Item = RgbNhwcFrame>,
  M: Model<Input = RgbNhwcFrame, Output = DetectResult, Error = ME>,
  O: Render<RgbNhwcFrame, DetectResult, Error = RE>,
> Task<I, M, O> for DetectionTask
{
  type Output = RunResult;
  type Error = anyhow::Error;

  fn run_task(self, input: I, model: M, output: O) -> Result<Self::Output, Self::Error> {
    info!("开始任务...");
    let started = Instant::now();
    let mut frames: u64 = 0;
    let mut detections: u64 = 0;
    let mut log = DetectionLog::default();

    for frame in input {
      let now = Instant::now();
      let result = match model.infer(&frame) {
        Ok(result) => result.retain_class(self.target_class),
        Err(e) => match self.on_infer_error {
          InferFailurePolicy::Abort => {
            return Err(e).with_context(|| format!("第 {} 帧推理失败", frames));
          }
          InferFailurePolicy::SkipFrame => {
            warn!("第 {} 帧推理失败，跳过标注: {}", frames, e);
            DetectResult::default()
          }
        },
      };
      let elapsed_infer = now.elapsed();

      for item in result.items.iter() {
        log.append(LogEntry {
          frame: frames,
          label: NAME_TAG_LABEL.to_string(),
          coordinates: item.pixel_box(),
        });
      }
      detections += result.len() as u64;

      output
        .render_result(&frame, &result)
        .with_context(|| format!("第 {} 帧写出失败", frames))?;
      info!(
        "第 {} 帧: {} 个名牌，耗时: {:.2?} / {:.2?}",
        frames,
        result.len(),
        elapsed_infer,
        now.elapsed()
      );
      frames += 1;
    }

    output.finish().context("关闭输出失败")?;
    info!(
      "任务完成: {} 帧, {} 个名牌, 总耗时 {:.2?}",
      frames,
      detections,
      started.elapsed()
    );

    Ok(RunResult {
      frames,
      detections,
      log,
    })
  }
}

#[cfg(test)]
mod tests {
  use std::cell::RefCell;

  use thiserror::Error;

  use super::*;
  use crate::model::DetectItem;

  #[derive(Error, Debug)]
  #[error("mock failure")]
  struct MockError;

  /// 按帧序号返回预设结果的模型，`None` 表示该帧推理失败
  struct ScriptedModel {
    script: Vec<Option<Vec<DetectItem>>>,
    calls: RefCell<usize>,
  }

  impl Model for ScriptedModel {
    type Input = RgbNhwcFrame;
    type Output = DetectResult;
    type Error = MockError;

    fn infer(&self, _input: &RgbNhwcFrame) -> Result<DetectResult, MockError> {
      let mut calls = self.calls.borrow_mut();
      let index = *calls;
      *calls += 1;
      match self.script.get(index) {
        Some(Some(items)) => Ok(items.iter().cloned().collect()),
        Some(None) => Err(MockError),
        None => Ok(DetectResult::default()),
      }
    }
  }

  #[derive(Default)]
  struct CountingSink {
    rendered: RefCell<Vec<usize>>,
  }

  impl Render<RgbNhwcFrame, DetectResult> for &CountingSink {
    type Error = MockError;

    fn render_result(&self, _frame: &RgbNhwcFrame, result: &DetectResult) -> Result<(), MockError> {
      self.rendered.borrow_mut().push(result.len());
      Ok(())
    }
  }

  fn item(class_id: u32, bbox: [f32; 4]) -> DetectItem {
    DetectItem {
      class_id,
      score: 0.8,
      bbox,
    }
  }

  fn frames(n: usize) -> impl Iterator<Item = RgbNhwcFrame> {
    (0..n).map(|_| RgbNhwcFrame::with_shape(8, 8))
  }

  fn info_with_fps(fps: f64) -> VideoInfo {
    VideoInfo {
      width: 8,
      height: 8,
      fps,
      frame_count: None,
    }
  }

  #[test]
  fn unknown_frame_rate_falls_back() {
    assert_eq!(sink_fps(&info_with_fps(0.0)), 24.0);
    assert_eq!(sink_fps(&info_with_fps(-5.0)), 24.0);
    assert_eq!(sink_fps(&info_with_fps(f64::NAN)), 24.0);
    assert_eq!(sink_fps(&info_with_fps(29.97)), 29.97);
  }

  #[test]
  fn only_target_class_is_logged() {
    let model = ScriptedModel {
      script: vec![
        Some(vec![]),
        Some(vec![
          item(0, [10.7, 20.2, 30.9, 40.0]),
          item(3, [1.0, 1.0, 2.0, 2.0]),
          item(0, [0.0, 0.0, 4.0, 4.0]),
        ]),
      ],
      calls: RefCell::new(0),
    };
    let sink = CountingSink::default();

    let result = DetectionTask::default()
      .run_task(frames(3), model, &sink)
      .unwrap();

    assert_eq!(result.frames, 3);
    assert_eq!(result.detections, 2);
    assert_eq!(*sink.rendered.borrow(), vec![0, 2, 0]);
    let entries = result.log.entries();
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0].frame, 1);
    assert_eq!(entries[0].coordinates, [10, 20, 30, 40]);
    assert_eq!(entries[0].label, "name_tag");
  }

  #[test]
  fn infer_failure_aborts_by_default() {
    let model = ScriptedModel {
      script: vec![Some(vec![]), None],
      calls: RefCell::new(0),
    };
    let sink = CountingSink::default();

    let err = DetectionTask::default()
      .run_task(frames(4), model, &sink)
      .unwrap_err();

    assert!(format!("{:#}", err).contains("mock failure"));
    assert_eq!(sink.rendered.borrow().len(), 1);
  }

  #[test]
  fn skip_frame_policy_keeps_every_frame() {
    let model = ScriptedModel {
      script: vec![None, Some(vec![item(0, [1.0, 1.0, 5.0, 5.0])]), None],
      calls: RefCell::new(0),
    };
    let sink = CountingSink::default();

    let result = DetectionTask::default()
      .with_infer_failure_policy(InferFailurePolicy::SkipFrame)
      .run_task(frames(4), model, &sink)
      .unwrap();

    assert_eq!(result.frames, 4);
    assert_eq!(result.detections, 1);
    assert_eq!(*sink.rendered.borrow(), vec![0, 1, 0, 0]);
  }

  #[test]
  fn custom_target_class() {
    let model = ScriptedModel {
      script: vec![Some(vec![item(0, [0.0; 4]), item(2, [1.0, 2.0, 3.0, 4.0])])],
      calls: RefCell::new(0),
    };
    let sink = CountingSink::default();

    let result = DetectionTask::default()
      .with_target_class(2)
      .run_task(frames(1), model, &sink)
      .unwrap();

    assert_eq!(result.log.len(), 1);
    assert_eq!(result.log.entries()[0].coordinates, [1, 2, 3, 4]);
  }
}
