// 该文件是 Nametag （名牌检测） 项目的一部分。
// src/bin/nametag_detect.rs - 视频名牌检测
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

use anyhow::{Context, Result, bail};
use chrono::Utc;
use clap::Parser;
use tracing::{error, info};
use url::Url;

use nametag::{
  FromUrl, FromUrlWithScheme,
  encode::FfmpegEncoder,
  input::{self, GStreamerFileInput},
  model::YoloOnnxBuilder,
  output::{GStreamerVideoOutput, VideoCodec},
  report::{self, Delivery},
  session::Session,
  task::{DetectionTask, InferFailurePolicy, Task, sink_fps},
};

/// 视频名牌检测参数配置
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 待检测的视频文件（mp4, mov, avi）
  #[arg(long, value_name = "VIDEO")]
  pub input: PathBuf,

  /// 模型地址，支持 conf / iou / size 参数
  /// 例如: onnx:model/best.onnx?conf=0.25&iou=0.7
  #[arg(long, value_name = "MODEL", default_value = "onnx:model/best.onnx")]
  pub model: Url,

  /// 结果输出目录
  #[arg(long, value_name = "DIR", default_value = "output")]
  pub output_dir: PathBuf,

  /// 管道输出编码 (mp4v / h264)
  #[arg(long, value_name = "CODEC", default_value = "mp4v")]
  pub codec: VideoCodec,

  /// 不调用 ffmpeg 再编码，直接交付管道输出
  #[arg(long)]
  pub no_reencode: bool,

  /// ffmpeg 可执行文件
  #[arg(long, value_name = "PROGRAM", default_value = "ffmpeg")]
  pub ffmpeg: PathBuf,

  /// 推理失败时跳过该帧而不是终止
  #[arg(long)]
  pub skip_failed_frames: bool,

  /// 检测日志 JSON 路径，默认写到输出目录下的 detections.json
  #[arg(long, value_name = "FILE")]
  pub log_json: Option<PathBuf>,
}

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = Args::parse();
  let started_at = Utc::now();

  info!("输入视频: {}", args.input.display());
  info!("模型地址: {}", args.model);
  info!("输出目录: {}", args.output_dir.display());

  let session = Session::stage(&args.input).context("无法读取上传的视频")?;
  std::fs::create_dir_all(&args.output_dir).context("无法创建输出目录")?;

  let model = YoloOnnxBuilder::from_url(&args.model)
    .and_then(|builder| builder.build())
    .context("模型加载失败")?;

  let input_url = nametag::file_url(
    &format!("{}://file/", GStreamerFileInput::SCHEME),
    session.input_path(),
  )?;
  let mut source = input::open_video_source(&input_url).context("无法打开视频")?;
  let info = source.info();
  info!(
    "视频信息: {}x{} @ {} fps, 约 {:?} 帧",
    info.width, info.height, info.fps, info.frame_count
  );

  let mut output_url = nametag::file_url(
    &format!("{}:///", GStreamerVideoOutput::SCHEME),
    session.raw_output_path(),
  )?;
  output_url
    .query_pairs_mut()
    .append_pair("width", &info.width.to_string())
    .append_pair("height", &info.height.to_string())
    .append_pair("fps", &sink_fps(&info).to_string())
    .append_pair("codec", args.codec.name());
  info!("输出地址: {}", output_url);
  let output = GStreamerVideoOutput::from_url(&output_url).context("无法创建输出视频")?;

  let policy = if args.skip_failed_frames {
    InferFailurePolicy::SkipFrame
  } else {
    InferFailurePolicy::Abort
  };
  let result = DetectionTask::default()
    .with_infer_failure_policy(policy)
    .run_task(&mut source, model, output)?;
  if let Some(e) = source.take_error() {
    return Err(e).context("视频未能完整读取，输出不完整");
  }

  let encoder = FfmpegEncoder::with_program(&args.ffmpeg);
  let encoder = (!args.no_reencode).then_some(&encoder);
  let report = report::finalize(&session, result, encoder, &args.output_dir, started_at)
    .context("无法交付结果视频")?;

  if report.result.log.is_empty() {
    println!("no detections");
  } else {
    println!("{}", report.result.log.render_table());
  }

  let log_path = args
    .log_json
    .unwrap_or_else(|| args.output_dir.join("detections.json"));
  report
    .result
    .log
    .write_json(&log_path)
    .context("无法写入检测日志")?;

  info!(
    "共 {} 帧, {} 个名牌 ({} - {})",
    report.result.frames,
    report.result.detections,
    report.started_at_rfc3339(),
    report.finished_at_rfc3339()
  );

  match &report.delivery {
    Delivery::Ready(download) => {
      println!(
        "{} ({}): {}",
        download.file_name,
        download.mime,
        download.path.display()
      );
      Ok(())
    }
    Delivery::Unavailable(e) => {
      error!("无法生成兼容格式的视频: {}", e);
      bail!("视频再编码失败，检测日志已写入 {}", log_path.display())
    }
  }
}
