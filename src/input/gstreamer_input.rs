// 该文件是 Nametag （名牌检测） 项目的一部分。
// src/input/gstreamer_input.rs - GStreamer 视频文件输入
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

//! # GStreamer 视频文件输入模块
//!
//! 逐帧解码视频文件，输出 RGB 帧。管道结构：
//!
//! ```text
//! filesrc ! decodebin ! videoconvert ! video/x-raw,format=RGB ! appsink
//! ```
//!
//! 与摄像头输入不同，文件输入不能丢帧，因此 appsink 使用 `sync=false drop=false`。
//!
//! ## 系统依赖
//!
//! **Ubuntu/Debian:**
//! ```bash
//! sudo apt-get install libgstreamer1.0-dev libgstreamer-plugins-base1.0-dev \
//!   gstreamer1.0-plugins-good gstreamer1.0-libav
//! ```
//!
//! ## 基本用法
//!
//! ```no_run
//! use nametag::{FromUrl, input::{GStreamerFileInput, VideoSource}};
//! use url::Url;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let url = Url::parse("gst://file/tmp/upload.mp4")?;
//! let input = GStreamerFileInput::from_url(&url)?;
//! println!("{:?}", input.info());
//! for frame in input {
//!     println!("处理帧: {}x{}", frame.width(), frame.height());
//! }
//! # Ok(())
//! # }
//! ```

use std::path::Path;

use gstreamer::{self as gst, prelude::*};
use gstreamer_app as gst_app;
use gstreamer_video as gst_video;
use thiserror::Error;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  frame::RgbNhwcFrame,
  input::{InputError, VideoInfo, VideoSource},
};

/// 预卷（读取视频属性）的最长等待时间
const PREROLL_TIMEOUT_SECS: u64 = 10;

/// GStreamer 输入错误类型
#[derive(Error, Debug)]
pub enum GStreamerInputError {
  /// URI scheme 不匹配（期望 "gst://file/..."）
  #[error("URI scheme mismatch")]
  SchemeMismatch,
  /// 输入文件不存在
  #[error("Input file not found: {0}")]
  FileNotFound(String),
  /// GStreamer 库错误
  #[error("GStreamer error: {0}")]
  GStreamerError(#[from] gst::glib::Error),
  /// GStreamer 布尔操作错误
  #[error("GStreamer boolean error: {0}")]
  GStreamerBoolError(#[from] gst::glib::BoolError),
  /// 无法获取 appsink 元素
  #[error("Failed to get appsink element")]
  AppSinkNotFound,
  /// 无法转换元素为 appsink
  #[error("Failed to convert element to appsink")]
  AppSinkConversionFailed,
  /// 无法从 caps 获取视频信息
  #[error("Failed to get video info from caps")]
  VideoInfoError,
  /// 不支持的视频格式
  #[error("Unsupported video format: {0:?}")]
  UnsupportedFormat(gst_video::VideoFormat),
  /// 管道错误
  #[error("Pipeline error: {0}")]
  PipelineError(String),
  /// 缓冲区大小不匹配
  #[error("Buffer size mismatch: expected {expected} bytes, got {actual} bytes")]
  BufferSizeMismatch { expected: usize, actual: usize },
  /// 状态改变错误
  #[error("State change error: {0}")]
  StateChangeError(#[from] gst::StateChangeError),
}

const GSTREAMER_INPUT_SCHEME: &str = "gst";

/// GStreamer 视频文件输入
///
/// 打开时先预卷管道以读取宽、高、帧率，然后切换到播放状态逐帧拉取。
/// 预卷得到的样本会作为第一帧再次由 `pull_sample` 返回，因此不会漏帧。
pub struct GStreamerFileInput {
  pipeline: gst::Pipeline,
  appsink: gst_app::AppSink,
  info: VideoInfo,
  video_info: gst_video::VideoInfo,
  frames_read: u64,
  /// 读取出错后不再继续
  stopped: bool,
  error: Option<InputError>,
}

impl FromUrlWithScheme for GStreamerFileInput {
  const SCHEME: &'static str = GSTREAMER_INPUT_SCHEME;
}

impl FromUrl for GStreamerFileInput {
  type Error = GStreamerInputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME || url.host_str() != Some("file") {
      error!(
        "URI scheme mismatch: expected '{}://file/...', found '{}'",
        Self::SCHEME,
        url
      );
      return Err(GStreamerInputError::SchemeMismatch);
    }

    Self::open(crate::url_file_path(url))
  }
}

impl GStreamerFileInput {
  pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, GStreamerInputError> {
    let path = path.as_ref();
    if !path.is_file() {
      return Err(GStreamerInputError::FileNotFound(path.display().to_string()));
    }

    gst::init()?;

    let pipeline_desc = format!(
      "filesrc location=\"{}\" ! decodebin ! videoconvert ! video/x-raw,format=RGB ! \
       appsink name=sink sync=false max-buffers=4 drop=false",
      path.display()
    );
    info!("GStreamer pipeline description: {}", pipeline_desc);

    let pipeline = gst::parse::launch(&pipeline_desc)?
      .downcast::<gst::Pipeline>()
      .map_err(|_| GStreamerInputError::PipelineError("Failed to create pipeline".to_string()))?;

    let appsink = pipeline
      .by_name("sink")
      .ok_or(GStreamerInputError::AppSinkNotFound)?
      .downcast::<gst_app::AppSink>()
      .map_err(|_| GStreamerInputError::AppSinkConversionFailed)?;

    // 预卷以获取 caps
    pipeline.set_state(gst::State::Paused)?;
    let (state_result, _, _) = pipeline.state(gst::ClockTime::from_seconds(PREROLL_TIMEOUT_SECS));
    if let Err(e) = state_result {
      let _ = pipeline.set_state(gst::State::Null);
      return Err(e.into());
    }

    let preroll = match appsink.pull_preroll() {
      Ok(sample) => sample,
      Err(e) => {
        let _ = pipeline.set_state(gst::State::Null);
        return Err(GStreamerInputError::PipelineError(format!(
          "Failed to preroll video: {}",
          e
        )));
      }
    };

    let caps = preroll
      .caps()
      .ok_or_else(|| GStreamerInputError::PipelineError("No caps in sample".to_string()))?;
    let video_info =
      gst_video::VideoInfo::from_caps(caps).map_err(|_| GStreamerInputError::VideoInfoError)?;

    let fps = fraction_to_f64(video_info.fps());
    let frame_count = pipeline
      .query_duration::<gst::ClockTime>()
      .and_then(|duration| estimate_frame_count(duration.nseconds(), fps));

    let info = VideoInfo {
      width: video_info.width(),
      height: video_info.height(),
      fps,
      frame_count,
    };
    info!(
      "Video opened: {}x{} @ {:.3} fps, frames: {:?}",
      info.width, info.height, info.fps, info.frame_count
    );

    pipeline.set_state(gst::State::Playing)?;

    Ok(GStreamerFileInput {
      pipeline,
      appsink,
      info,
      video_info,
      frames_read: 0,
      stopped: false,
      error: None,
    })
  }

  fn pull_sample(&self) -> Result<Option<gst::Sample>, GStreamerInputError> {
    match self.appsink.pull_sample() {
      Ok(sample) => Ok(Some(sample)),
      Err(_) if self.appsink.is_eos() => {
        debug!("Reached end of stream");
        Ok(None)
      }
      Err(e) => Err(GStreamerInputError::PipelineError(self.bus_error().unwrap_or_else(
        || format!("Failed to pull sample: {}", e),
      ))),
    }
  }

  /// 管道总线上的错误消息，比 `pull_sample` 的返回值更有用
  fn bus_error(&self) -> Option<String> {
    let message = self.pipeline.bus()?.pop_filtered(&[gst::MessageType::Error])?;
    match message.view() {
      gst::MessageView::Error(err) => Some(format!("{} ({:?})", err.error(), err.debug())),
      _ => None,
    }
  }

  fn record_error(&mut self, e: GStreamerInputError) {
    error!("视频读取在第 {} 帧后中断: {}", self.frames_read, e);
    self.stopped = true;
    self.error = Some(InputError::ReadInterrupted {
      frames_read: self.frames_read,
      reason: e.to_string(),
    });
  }
}

impl Drop for GStreamerFileInput {
  fn drop(&mut self) {
    if let Err(e) = self.pipeline.set_state(gst::State::Null) {
      warn!("Failed to stop GStreamer pipeline: {}", e);
    }
  }
}

impl Iterator for GStreamerFileInput {
  type Item = RgbNhwcFrame;

  fn next(&mut self) -> Option<Self::Item> {
    if self.stopped {
      return None;
    }

    let frame = self
      .pull_sample()
      .and_then(|sample| match sample {
        Some(sample) => convert_sample_to_nhwc(&sample, &self.video_info).map(Some),
        None => Ok(None),
      });
    match frame {
      Ok(Some(frame)) => {
        self.frames_read += 1;
        Some(frame)
      }
      Ok(None) => None,
      Err(e) => {
        self.record_error(e);
        None
      }
    }
  }
}

impl VideoSource for GStreamerFileInput {
  fn info(&self) -> VideoInfo {
    self.info
  }

  fn take_error(&mut self) -> Option<InputError> {
    self.error.take()
  }
}

fn fraction_to_f64(fraction: gst::Fraction) -> f64 {
  let (numer, denom) = (fraction.numer(), fraction.denom());
  if numer <= 0 || denom <= 0 {
    0.0
  } else {
    numer as f64 / denom as f64
  }
}

fn estimate_frame_count(duration_ns: u64, fps: f64) -> Option<u64> {
  if fps <= 0.0 || duration_ns == 0 {
    return None;
  }
  Some((duration_ns as f64 / 1_000_000_000.0 * fps).round() as u64)
}

fn convert_sample_to_nhwc(
  sample: &gst::Sample,
  fallback_info: &gst_video::VideoInfo,
) -> Result<RgbNhwcFrame, GStreamerInputError> {
  let buffer = sample
    .buffer()
    .ok_or_else(|| GStreamerInputError::PipelineError("No buffer in sample".to_string()))?;

  // 分辨率在流中途可能变化，优先使用样本自带的 caps
  let video_info = match sample.caps() {
    Some(caps) => {
      gst_video::VideoInfo::from_caps(caps).map_err(|_| GStreamerInputError::VideoInfoError)?
    }
    None => fallback_info.clone(),
  };

  if video_info.format() != gst_video::VideoFormat::Rgb {
    return Err(GStreamerInputError::UnsupportedFormat(video_info.format()));
  }

  let frame = gst_video::VideoFrameRef::from_buffer_ref_readable(buffer, &video_info)?;
  let data = frame.plane_data(0)?;
  let stride = frame.plane_stride()[0] as usize;

  let width = video_info.width();
  let height = video_info.height();
  let mut output = RgbNhwcFrame::with_shape(width, height);
  let row_bytes = output.row_bytes();

  let expected = stride * (height as usize).saturating_sub(1) + row_bytes;
  if data.len() < expected {
    return Err(GStreamerInputError::BufferSizeMismatch {
      expected,
      actual: data.len(),
    });
  }

  // 按行拷贝，去掉每行末尾的对齐填充
  for (row, dst) in output.as_mut().chunks_exact_mut(row_bytes).enumerate() {
    let src = &data[row * stride..row * stride + row_bytes];
    dst.copy_from_slice(src);
  }

  Ok(output)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn zero_fraction_is_unknown_fps() {
    assert_eq!(fraction_to_f64(gst::Fraction::new(0, 1)), 0.0);
    assert_eq!(fraction_to_f64(gst::Fraction::new(30000, 1001)), 30000.0 / 1001.0);
  }

  #[test]
  fn frame_count_needs_fps_and_duration() {
    assert_eq!(estimate_frame_count(2_000_000_000, 25.0), Some(50));
    assert_eq!(estimate_frame_count(2_000_000_000, 0.0), None);
    assert_eq!(estimate_frame_count(0, 25.0), None);
  }

  #[test]
  fn from_url_rejects_other_hosts() {
    let url = Url::parse("gst://camera/dev/video0").unwrap();
    assert!(matches!(
      GStreamerFileInput::from_url(&url),
      Err(GStreamerInputError::SchemeMismatch)
    ));
  }

  #[test]
  fn missing_file_fails_before_gstreamer_init() {
    let url = Url::parse("gst://file/nonexistent/definitely/missing.mp4").unwrap();
    assert!(matches!(
      GStreamerFileInput::from_url(&url),
      Err(GStreamerInputError::FileNotFound(_))
    ));
  }
}
