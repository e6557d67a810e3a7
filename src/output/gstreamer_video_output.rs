// 该文件是 Nametag （名牌检测） 项目的一部分。
// src/output/gstreamer_video_output.rs - GStreamer 视频文件输出
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

//! # GStreamer 视频文件输出模块
//!
//! 将标注后的视频帧编码保存为视频文件。宽、高、帧率与输入视频一致。
//!
//! ## 容器与编码
//!
//! - 容器按扩展名选择：`.mp4`/`.mov` (mp4mux/qtmux)、`.mkv` (matroskamux)、`.avi` (avimux)，
//!   其他扩展名按 MP4 处理
//! - 编码：[`VideoCodec::Mpeg4`]（avenc_mpeg4，默认）或 [`VideoCodec::H264`]（x264enc）
//!
//! ## URL Scheme
//!
//! `gstvideo:///output.mp4?width=1280&height=720&fps=30&codec=mp4v`
//!
//! ## 基本用法
//!
//! ```no_run
//! use nametag::{FromUrl, output::GStreamerVideoOutput};
//! use url::Url;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let url = Url::parse("gstvideo:///tmp/output_temp.mp4?width=1280&height=720&fps=30")?;
//! let output = GStreamerVideoOutput::from_url(&url)?;
//! # Ok(())
//! # }
//! ```

use std::cell::Cell;
use std::path::{Path, PathBuf};

use gstreamer::{self as gst, prelude::*};
use gstreamer_app as gst_app;
use gstreamer_video as gst_video;
use thiserror::Error;
use tracing::{error, info, warn};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  frame::RgbNhwcFrame,
  model::DetectResult,
  output::{
    Render, VideoCodec,
    draw::{Draw, DrawError},
  },
};

/// 结束时等待 EOS 的最长时间
const EOS_TIMEOUT_SECS: u64 = 30;
/// avenc_mpeg4 默认码率过低，这里固定为 8 Mbps
const MPEG4_BITRATE: u32 = 8_000_000;

/// GStreamer 视频输出错误类型
#[derive(Error, Debug)]
pub enum GStreamerVideoOutputError {
  /// URI scheme 不匹配
  #[error("URI scheme mismatch")]
  SchemeMismatch,
  /// 参数错误
  #[error("Invalid parameter: {0}")]
  InvalidParameter(String),
  /// GStreamer 库错误
  #[error("GStreamer error: {0}")]
  GStreamerError(#[from] gst::glib::Error),
  /// GStreamer 布尔操作错误
  #[error("GStreamer boolean error: {0}")]
  GStreamerBoolError(#[from] gst::glib::BoolError),
  /// 无法获取 appsrc 元素
  #[error("Failed to get appsrc element")]
  AppSrcNotFound,
  /// 无法转换元素为 appsrc
  #[error("Failed to convert element to appsrc")]
  AppSrcConversionFailed,
  /// 管道错误
  #[error("Pipeline error: {0}")]
  PipelineError(String),
  /// 状态改变错误
  #[error("State change error: {0}")]
  StateChangeError(#[from] gst::StateChangeError),
  /// 缓冲区创建错误
  #[error("Buffer creation error")]
  BufferCreationError,
  /// 帧尺寸与输出不一致
  #[error("Frame size mismatch: expected {expected:?}, got {actual:?}")]
  FrameSizeMismatch {
    expected: (u32, u32),
    actual: (u32, u32),
  },
  /// 绘制错误
  #[error("Draw error: {0}")]
  DrawError(#[from] DrawError),
}

const GSTREAMER_VIDEO_OUTPUT_SCHEME: &str = "gstvideo";

/// GStreamer 视频文件输出
///
/// 每帧绘制检测框后推入 appsrc，时间戳按帧序号和帧率计算。
/// 调用 [`Render::finish`] 发送 EOS 并等待文件写完；未调用时在 `Drop` 中尽力完成。
pub struct GStreamerVideoOutput {
  pipeline: gst::Pipeline,
  appsrc: gst_app::AppSrc,
  video_info: gst_video::VideoInfo,
  fps: gst::Fraction,
  frame_count: Cell<u64>,
  draw: Draw,
  path: PathBuf,
  closed: bool,
}

impl FromUrlWithScheme for GStreamerVideoOutput {
  const SCHEME: &'static str = GSTREAMER_VIDEO_OUTPUT_SCHEME;
}

impl FromUrl for GStreamerVideoOutput {
  type Error = GStreamerVideoOutputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      error!(
        "URI scheme mismatch: expected '{}', found '{}'",
        Self::SCHEME,
        url.scheme()
      );
      return Err(GStreamerVideoOutputError::SchemeMismatch);
    }

    let width = crate::url_query(url, "width").unwrap_or(640);
    let height = crate::url_query(url, "height").unwrap_or(480);
    let fps = crate::url_query(url, "fps").unwrap_or(30.0);
    let codec = match url.query_pairs().find(|(k, _)| k == "codec") {
      Some((_, v)) => v
        .parse()
        .map_err(|e| GStreamerVideoOutputError::InvalidParameter(format!("{}", e)))?,
      None => VideoCodec::default(),
    };

    Self::create(crate::url_file_path(url), width, height, fps, codec)
  }
}

fn encoder_description(codec: VideoCodec) -> String {
  match codec {
    VideoCodec::Mpeg4 => format!("avenc_mpeg4 bitrate={}", MPEG4_BITRATE),
    VideoCodec::H264 => "x264enc speed-preset=fast ! h264parse".to_string(),
  }
}

fn muxer_for_path(path: &Path) -> &'static str {
  let extension = path
    .extension()
    .and_then(|e| e.to_str())
    .map(|e| e.to_ascii_lowercase());
  match extension.as_deref() {
    Some("mkv") => "matroskamux",
    Some("avi") => "avimux",
    Some("mov") => "qtmux",
    _ => "mp4mux",
  }
}

fn fps_fraction(fps: f64) -> gst::Fraction {
  gst::Fraction::approximate_f64(fps)
    .unwrap_or_else(|| gst::Fraction::new((fps * 1000.0).round() as i32, 1000))
}

/// 第 `index` 帧的时间戳（纳秒）
fn frame_timestamp_ns(index: u64, fps: gst::Fraction) -> u64 {
  let (numer, denom) = (fps.numer() as u128, fps.denom() as u128);
  (index as u128 * 1_000_000_000 * denom / numer) as u64
}

impl GStreamerVideoOutput {
  pub fn create<P: AsRef<Path>>(
    path: P,
    width: u32,
    height: u32,
    fps: f64,
    codec: VideoCodec,
  ) -> Result<Self, GStreamerVideoOutputError> {
    let path = path.as_ref();
    if width == 0 || height == 0 {
      return Err(GStreamerVideoOutputError::InvalidParameter(format!(
        "视频尺寸无效: {}x{}",
        width, height
      )));
    }
    if !fps.is_finite() || fps <= 0.0 {
      return Err(GStreamerVideoOutputError::InvalidParameter(format!(
        "帧率无效: {}",
        fps
      )));
    }

    let draw = Draw::new()?;

    // 重复初始化是安全的空操作
    gst::init()?;

    let fps = fps_fraction(fps);
    let pipeline_desc = format!(
      "appsrc name=src block=true ! videoconvert ! {} ! {} ! filesink location=\"{}\"",
      encoder_description(codec),
      muxer_for_path(path),
      path.display()
    );
    info!("Creating video output pipeline: {}", pipeline_desc);

    let pipeline = gst::parse::launch(&pipeline_desc)?
      .downcast::<gst::Pipeline>()
      .map_err(|_| {
        GStreamerVideoOutputError::PipelineError("Failed to create pipeline".to_string())
      })?;

    let appsrc = pipeline
      .by_name("src")
      .ok_or(GStreamerVideoOutputError::AppSrcNotFound)?
      .downcast::<gst_app::AppSrc>()
      .map_err(|_| GStreamerVideoOutputError::AppSrcConversionFailed)?;

    let video_info = gst_video::VideoInfo::builder(gst_video::VideoFormat::Rgb, width, height)
      .fps(fps)
      .build()?;
    let caps = video_info.to_caps()?;
    appsrc.set_caps(Some(&caps));
    appsrc.set_format(gst::Format::Time);

    pipeline.set_state(gst::State::Playing)?;

    info!(
      "Video output initialized: {}x{} @ {}/{} fps ({:?}) -> {}",
      width,
      height,
      fps.numer(),
      fps.denom(),
      codec,
      path.display()
    );

    Ok(GStreamerVideoOutput {
      pipeline,
      appsrc,
      video_info,
      fps,
      frame_count: Cell::new(0),
      draw,
      path: path.to_path_buf(),
      closed: false,
    })
  }

  fn push_frame(&self, frame: &RgbNhwcFrame) -> Result<(), GStreamerVideoOutputError> {
    let expected = (self.video_info.width(), self.video_info.height());
    let actual = (frame.width(), frame.height());
    if expected != actual {
      return Err(GStreamerVideoOutputError::FrameSizeMismatch { expected, actual });
    }

    let mut buffer = gst::Buffer::with_size(self.video_info.size())
      .map_err(|_| GStreamerVideoOutputError::BufferCreationError)?;

    let index = self.frame_count.get();
    {
      let buffer_ref = buffer
        .get_mut()
        .ok_or(GStreamerVideoOutputError::BufferCreationError)?;
      let pts = frame_timestamp_ns(index, self.fps);
      let next = frame_timestamp_ns(index + 1, self.fps);
      buffer_ref.set_pts(gst::ClockTime::from_nseconds(pts));
      buffer_ref.set_duration(gst::ClockTime::from_nseconds(next - pts));

      // 按行写入，目标行宽包含对齐填充
      let mut video_frame =
        gst_video::VideoFrameRef::from_buffer_ref_writable(buffer_ref, &self.video_info)?;
      let stride = video_frame.plane_stride()[0] as usize;
      let plane = video_frame.plane_data_mut(0)?;
      let row_bytes = frame.row_bytes();
      for (row, src) in frame.as_nhwc().chunks_exact(row_bytes).enumerate() {
        plane[row * stride..row * stride + row_bytes].copy_from_slice(src);
      }
    }

    self.appsrc.push_buffer(buffer).map_err(|e| {
      GStreamerVideoOutputError::PipelineError(format!("Failed to push buffer: {:?}", e))
    })?;
    self.frame_count.set(index + 1);

    Ok(())
  }

  fn wait_for_eos(&self) -> Result<(), GStreamerVideoOutputError> {
    let bus = self.pipeline.bus().ok_or_else(|| {
      GStreamerVideoOutputError::PipelineError("Pipeline has no bus".to_string())
    })?;

    match bus.timed_pop_filtered(
      gst::ClockTime::from_seconds(EOS_TIMEOUT_SECS),
      &[gst::MessageType::Eos, gst::MessageType::Error],
    ) {
      Some(message) => match message.view() {
        gst::MessageView::Error(err) => Err(GStreamerVideoOutputError::PipelineError(format!(
          "{} ({:?})",
          err.error(),
          err.debug()
        ))),
        _ => Ok(()),
      },
      None => Err(GStreamerVideoOutputError::PipelineError(
        "Timed out waiting for EOS".to_string(),
      )),
    }
  }

  fn close(&mut self) -> Result<(), GStreamerVideoOutputError> {
    if self.closed {
      return Ok(());
    }
    self.closed = true;

    // 发送 EOS 让 muxer 写完文件，无论成败都要停止管道
    let result = self
      .appsrc
      .end_of_stream()
      .map_err(|e| {
        GStreamerVideoOutputError::PipelineError(format!("Failed to send EOS: {:?}", e))
      })
      .and_then(|_| self.wait_for_eos());
    let state = self.pipeline.set_state(gst::State::Null);
    result?;
    state?;

    info!(
      "Video output closed. Total frames written: {} -> {}",
      self.frame_count.get(),
      self.path.display()
    );
    Ok(())
  }
}

impl Drop for GStreamerVideoOutput {
  fn drop(&mut self) {
    if let Err(e) = self.close() {
      warn!("Failed to close GStreamer video output: {}", e);
    }
  }
}

impl Render<RgbNhwcFrame, DetectResult> for GStreamerVideoOutput {
  type Error = GStreamerVideoOutputError;

  fn render_result(&self, frame: &RgbNhwcFrame, result: &DetectResult) -> Result<(), Self::Error> {
    let annotated = self.draw.draw_detection(frame, result);
    self.push_frame(&annotated)
  }

  fn finish(mut self) -> Result<(), Self::Error> {
    self.close()
  }
}
