// 该文件是 Nametag （名牌检测） 项目的一部分。
// src/report.rs - 运行报告
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

use std::path::Path;

use chrono::{DateTime, SecondsFormat, Utc};
use tracing::{info, warn};

use crate::{
  encode::{Reencode, ReencodeError, ReencodeRequest},
  session::{Download, Session, SessionError},
  task::RunResult,
};

/// 最终视频的交付状态
#[derive(Debug)]
pub enum Delivery {
  Ready(Download),
  /// 再编码失败，兼容格式的视频不可用；原始输出与日志仍然有效
  Unavailable(ReencodeError),
}

#[derive(Debug)]
pub struct RunReport {
  pub result: RunResult,
  pub delivery: Delivery,
  pub started_at: DateTime<Utc>,
  pub finished_at: DateTime<Utc>,
}

impl RunReport {
  pub fn download(&self) -> Option<&Download> {
    match &self.delivery {
      Delivery::Ready(download) => Some(download),
      Delivery::Unavailable(_) => None,
    }
  }

  pub fn started_at_rfc3339(&self) -> String {
    self.started_at.to_rfc3339_opts(SecondsFormat::Millis, true)
  }

  pub fn finished_at_rfc3339(&self) -> String {
    self.finished_at.to_rfc3339_opts(SecondsFormat::Millis, true)
  }
}

/// 收尾：有编码器时先把原始输出再编码，否则直接交付原始输出
pub fn finalize<E: Reencode + ?Sized, P: AsRef<Path>>(
  session: &Session,
  result: RunResult,
  encoder: Option<&E>,
  dest_dir: P,
  started_at: DateTime<Utc>,
) -> Result<RunReport, SessionError> {
  let artifact = match encoder {
    Some(encoder) => {
      let request = ReencodeRequest::new(session.raw_output_path(), session.reencoded_output_path());
      match encoder.reencode(&request) {
        Ok(()) => Ok(request.output),
        Err(e) => {
          warn!("再编码失败，无法提供兼容格式的视频: {}", e);
          Err(e)
        }
      }
    }
    None => {
      info!("跳过再编码，直接交付原始输出");
      Ok(session.raw_output_path())
    }
  };

  let delivery = match artifact {
    Ok(path) => Delivery::Ready(session.deliver(path, dest_dir)?),
    Err(e) => Delivery::Unavailable(e),
  };

  Ok(RunReport {
    result,
    delivery,
    started_at,
    finished_at: Utc::now(),
  })
}
