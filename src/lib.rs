// 该文件是 Nametag （名牌检测） 项目的一部分。
// src/lib.rs - 库主文件
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

pub mod encode;
pub mod frame;
pub mod input;
pub mod model;
pub mod output;
pub mod record;
pub mod report;
pub mod session;
pub mod task;

pub trait FromUrl {
  type Error;
  fn from_url(url: &url::Url) -> Result<Self, Self::Error>
  where
    Self: Sized;
}

pub trait FromUrlWithScheme: FromUrl {
  const SCHEME: &'static str;
}

/// 从 URL 中取出文件路径。
///
/// `scheme:relative/path` 形式保留相对路径，`scheme:///abs/path` 形式给出绝对路径，
/// 两者都会做百分号解码。
pub fn url_file_path(url: &url::Url) -> String {
  let path = url.path();
  urlencoding::decode(path)
    .map(|p| p.into_owned())
    .unwrap_or_else(|_| path.to_string())
}

/// 以 `base` 的 scheme 和 host 构造指向本地绝对路径的 URL，路径各段做百分号编码。
///
/// 与 [`url_file_path`] 互逆：`gst://file/` + `/tmp/a b.mp4` 得到
/// `gst://file/tmp/a%20b.mp4`。
pub fn file_url<P: AsRef<std::path::Path>>(
  base: &str,
  path: P,
) -> Result<url::Url, url::ParseError> {
  use std::path::Component;

  let mut url = url::Url::parse(base)?;
  {
    let mut segments = url
      .path_segments_mut()
      .map_err(|_| url::ParseError::RelativeUrlWithCannotBeABaseBase)?;
    segments.clear();
    for component in path.as_ref().components() {
      if let Component::Normal(segment) = component {
        segments.push(&segment.to_string_lossy());
      }
    }
  }
  Ok(url)
}

/// 读取 URL 查询参数并解析为指定类型，缺失或无法解析时返回 `None`。
pub fn url_query<T: std::str::FromStr>(url: &url::Url, key: &str) -> Option<T> {
  url
    .query_pairs()
    .find(|(k, _)| k == key)
    .and_then(|(_, v)| v.parse::<T>().ok())
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn url_file_path_keeps_relative_paths() {
    let url = url::Url::parse("onnx:model/best.onnx").unwrap();
    assert_eq!(url_file_path(&url), "model/best.onnx");
  }

  #[test]
  fn url_file_path_decodes_absolute_paths() {
    let url = url::Url::parse("onnx:///opt/models/name%20tag.onnx").unwrap();
    assert_eq!(url_file_path(&url), "/opt/models/name tag.onnx");
  }

  #[test]
  fn file_url_round_trips_through_url_file_path() {
    let url = file_url("gst://file/", "/tmp/name tag/100%.mp4").unwrap();
    assert_eq!(url.scheme(), "gst");
    assert_eq!(url.host_str(), Some("file"));
    assert_eq!(url_file_path(&url), "/tmp/name tag/100%.mp4");

    let url = file_url("gstvideo:///", "/tmp/out.mp4").unwrap();
    assert_eq!(url_file_path(&url), "/tmp/out.mp4");
  }

  #[test]
  fn url_query_parses_typed_values() {
    let url = url::Url::parse("onnx:model/best.onnx?conf=0.4&size=320&bad=x").unwrap();
    assert_eq!(url_query::<f32>(&url, "conf"), Some(0.4));
    assert_eq!(url_query::<u32>(&url, "size"), Some(320));
    assert_eq!(url_query::<u32>(&url, "bad"), None);
    assert_eq!(url_query::<u32>(&url, "iou"), None);
  }
}
