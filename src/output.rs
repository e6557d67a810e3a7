// 该文件是 Nametag （名牌检测） 项目的一部分。
// src/output.rs - 输出定义
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

use std::str::FromStr;

use thiserror::Error;

/// 输出端：每收到一帧及其检测结果就写出一帧
pub trait Render<Frame, Output>: Sized {
  type Error;
  fn render_result(&self, frame: &Frame, result: &Output) -> Result<(), Self::Error>;

  /// 完成输出，刷新并关闭底层资源
  fn finish(self) -> Result<(), Self::Error> {
    Ok(())
  }
}

pub mod draw;

#[cfg(feature = "gstreamer_output")]
mod gstreamer_video_output;
#[cfg(feature = "gstreamer_output")]
pub use self::gstreamer_video_output::{GStreamerVideoOutput, GStreamerVideoOutputError};

/// 输出视频的编码方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VideoCodec {
  /// MPEG-4 Part 2（mp4v），浏览器通常无法直接播放，需要再编码
  #[default]
  Mpeg4,
  /// H.264
  H264,
}

impl VideoCodec {
  /// 可被 `FromStr` 解析回来的名称
  pub fn name(&self) -> &'static str {
    match self {
      VideoCodec::Mpeg4 => "mp4v",
      VideoCodec::H264 => "h264",
    }
  }
}

#[derive(Error, Debug)]
#[error("未知的编码方式: {0}")]
pub struct UnknownCodec(String);

impl FromStr for VideoCodec {
  type Err = UnknownCodec;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.to_ascii_lowercase().as_str() {
      "mp4v" | "mpeg4" => Ok(VideoCodec::Mpeg4),
      "h264" | "avc1" | "x264" => Ok(VideoCodec::H264),
      _ => Err(UnknownCodec(s.to_string())),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn codec_names_are_case_insensitive() {
    assert_eq!("MP4V".parse::<VideoCodec>().unwrap(), VideoCodec::Mpeg4);
    assert_eq!("avc1".parse::<VideoCodec>().unwrap(), VideoCodec::H264);
    assert!("vp9".parse::<VideoCodec>().is_err());
    for codec in [VideoCodec::Mpeg4, VideoCodec::H264] {
      assert_eq!(codec.name().parse::<VideoCodec>().unwrap(), codec);
    }
  }
}
