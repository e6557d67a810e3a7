// 该文件是 Nametag （名牌检测） 项目的一部分。
// src/input.rs - 视频输入
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

use thiserror::Error;

use crate::frame::RgbNhwcFrame;

/// 视频源属性，在打开时确定
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VideoInfo {
  pub width: u32,
  pub height: u32,
  /// 帧率，未知时为 0
  pub fps: f64,
  /// 总帧数（估计值），容器不提供时长时为 `None`
  pub frame_count: Option<u64>,
}

/// 顺序读取的视频源。
///
/// 迭代器返回 `None` 后读取结束。结束原因可能是读到结尾，也可能是解码出错；
/// 出错时 [`VideoSource::take_error`] 返回该错误，调用方据此区分完整与截断的结果。
pub trait VideoSource: Iterator<Item = RgbNhwcFrame> {
  fn info(&self) -> VideoInfo;

  /// 取出导致读取提前结束的错误
  fn take_error(&mut self) -> Option<InputError> {
    None
  }
}

#[cfg(feature = "gstreamer_input")]
mod gstreamer_input;
#[cfg(feature = "gstreamer_input")]
pub use self::gstreamer_input::{GStreamerFileInput, GStreamerInputError};

#[derive(Error, Debug)]
pub enum InputError {
  #[cfg(feature = "gstreamer_input")]
  #[error("GStreamer input error: {0}")]
  GStreamerInputError(#[from] GStreamerInputError),
  #[error("URI scheme mismatch")]
  SchemeMismatch,
  #[error("视频读取在第 {frames_read} 帧后中断: {reason}")]
  ReadInterrupted { frames_read: u64, reason: String },
}

/// 按 URL 方案打开视频源
pub fn open_video_source(url: &url::Url) -> Result<Box<dyn VideoSource>, InputError> {
  #[cfg(feature = "gstreamer_input")]
  {
    use crate::{FromUrl, FromUrlWithScheme};

    if url.scheme() == GStreamerFileInput::SCHEME {
      let input = GStreamerFileInput::from_url(url)?;
      return Ok(Box::new(input));
    }
  }
  let _ = url;
  Err(InputError::SchemeMismatch)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn unknown_scheme_is_rejected() {
    let url = url::Url::parse("rtsp://camera/stream").unwrap();
    assert!(matches!(
      open_video_source(&url),
      Err(InputError::SchemeMismatch)
    ));
  }

  #[cfg(feature = "gstreamer_input")]
  #[test]
  fn missing_file_cannot_be_opened() {
    let dir = tempfile::tempdir().unwrap();
    let url = crate::file_url("gst://file/", dir.path().join("missing.mp4")).unwrap();
    assert!(matches!(
      open_video_source(&url),
      Err(InputError::GStreamerInputError(GStreamerInputError::FileNotFound(_)))
    ));
  }
}
