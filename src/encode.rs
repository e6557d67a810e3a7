// 该文件是 Nametag （名牌检测） 项目的一部分。
// src/encode.rs - 视频再编码
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

//! # 视频再编码
//!
//! 管道直接写出的 MPEG-4 Part 2 视频在浏览器中通常无法播放，
//! 任务结束后调用外部 ffmpeg 转为 H.264 / yuv420p。
//!
//! 此模块需要系统安装 ffmpeg 命令行工具。只调用一次，不重试。

use std::{
  ffi::OsString,
  path::PathBuf,
  process::{Command, ExitStatus, Stdio},
};

use thiserror::Error;
use tracing::{error, info};

#[derive(Error, Debug)]
pub enum ReencodeError {
  #[error("无法执行编码工具 (请确保已安装): {0}")]
  Spawn(#[source] std::io::Error),
  #[error("编码工具执行失败: {status}")]
  Failed { status: ExitStatus },
  #[error("编码工具执行成功但输出文件不存在: {0}")]
  MissingOutput(PathBuf),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodeParams {
  pub codec: String,
  pub preset: String,
  /// 质量参数（0-51，越小质量越好）
  pub crf: u8,
  pub pixel_format: String,
  pub overwrite: bool,
}

impl Default for EncodeParams {
  fn default() -> Self {
    EncodeParams {
      codec: "libx264".to_string(),
      preset: "fast".to_string(),
      crf: 23,
      pixel_format: "yuv420p".to_string(),
      overwrite: true,
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReencodeRequest {
  pub input: PathBuf,
  pub output: PathBuf,
  pub params: EncodeParams,
}

impl ReencodeRequest {
  pub fn new<P: Into<PathBuf>, Q: Into<PathBuf>>(input: P, output: Q) -> Self {
    ReencodeRequest {
      input: input.into(),
      output: output.into(),
      params: EncodeParams::default(),
    }
  }

  pub fn with_params(mut self, params: EncodeParams) -> Self {
    self.params = params;
    self
  }

  /// 传给 ffmpeg 的参数列表
  pub fn args(&self) -> Vec<OsString> {
    let mut args: Vec<OsString> = Vec::with_capacity(12);
    if self.params.overwrite {
      args.push("-y".into());
    }
    args.push("-i".into());
    args.push(self.input.clone().into());
    args.push("-c:v".into());
    args.push(self.params.codec.clone().into());
    args.push("-preset".into());
    args.push(self.params.preset.clone().into());
    args.push("-crf".into());
    args.push(self.params.crf.to_string().into());
    args.push("-pix_fmt".into());
    args.push(self.params.pixel_format.clone().into());
    args.push(self.output.clone().into());
    args
  }
}

pub trait Reencode {
  fn reencode(&self, request: &ReencodeRequest) -> Result<(), ReencodeError>;
}

/// 调用外部 ffmpeg 进程同步完成再编码
#[derive(Debug, Clone)]
pub struct FfmpegEncoder {
  program: PathBuf,
}

impl Default for FfmpegEncoder {
  fn default() -> Self {
    FfmpegEncoder {
      program: PathBuf::from("ffmpeg"),
    }
  }
}

impl FfmpegEncoder {
  pub fn with_program<P: Into<PathBuf>>(program: P) -> Self {
    FfmpegEncoder {
      program: program.into(),
    }
  }
}

impl Reencode for FfmpegEncoder {
  fn reencode(&self, request: &ReencodeRequest) -> Result<(), ReencodeError> {
    info!(
      "开始再编码: {} -> {}",
      request.input.display(),
      request.output.display()
    );

    let status = Command::new(&self.program)
      .args(request.args())
      .stdin(Stdio::null())
      .stdout(Stdio::null())
      .stderr(Stdio::null())
      .status()
      .map_err(|e| {
        error!("无法执行 {}: {}", self.program.display(), e);
        ReencodeError::Spawn(e)
      })?;

    if !status.success() {
      error!("{} 执行失败: {}", self.program.display(), status);
      return Err(ReencodeError::Failed { status });
    }
    if !request.output.is_file() {
      error!("再编码输出不存在: {}", request.output.display());
      return Err(ReencodeError::MissingOutput(request.output.clone()));
    }

    info!("再编码完成: {}", request.output.display());
    Ok(())
  }
}
