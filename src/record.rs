// 该文件是 Nametag （名牌检测） 项目的一部分。
// src/record.rs - 检测日志
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

//! # 检测日志
//!
//! 每个被接受的检测对应一条 [`LogEntry`]，按帧序号追加到 [`DetectionLog`]。
//! 日志只能在任务运行时追加，运行结束后只读。
//!
//! 导出时每条记录变成一行 `Frame / Label / Coordinates`，
//! 坐标写成 `"(x1, y1, x2, y2)"`。

use std::{fs::File, io::BufWriter, path::Path};

use serde::Serialize;
use thiserror::Error;
use tracing::info;

#[derive(Error, Debug)]
pub enum RecordError {
  #[error("IO error: {0}")]
  IoError(#[from] std::io::Error),
  #[error("JSON error: {0}")]
  JsonError(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
  pub frame: u64,
  pub label: String,
  pub coordinates: [i32; 4], // [x1, y1, x2, y2]
}

impl LogEntry {
  pub fn coordinates_text(&self) -> String {
    let [x1, y1, x2, y2] = self.coordinates;
    format!("({}, {}, {}, {})", x1, y1, x2, y2)
  }
}

/// 导出用的一行
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogRow {
  #[serde(rename = "Frame")]
  pub frame: u64,
  #[serde(rename = "Label")]
  pub label: String,
  #[serde(rename = "Coordinates")]
  pub coordinates: String,
}

impl From<&LogEntry> for LogRow {
  fn from(entry: &LogEntry) -> Self {
    LogRow {
      frame: entry.frame,
      label: entry.label.clone(),
      coordinates: entry.coordinates_text(),
    }
  }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DetectionLog {
  entries: Vec<LogEntry>,
}

impl DetectionLog {
  /// 追加一条记录，只在任务循环中调用
  pub(crate) fn append(&mut self, entry: LogEntry) {
    debug_assert!(
      self.entries.last().is_none_or(|last| last.frame <= entry.frame),
      "帧序号必须单调不减"
    );
    self.entries.push(entry);
  }

  pub fn entries(&self) -> &[LogEntry] {
    &self.entries
  }

  pub fn len(&self) -> usize {
    self.entries.len()
  }

  pub fn is_empty(&self) -> bool {
    self.entries.is_empty()
  }

  pub fn rows(&self) -> impl Iterator<Item = LogRow> + '_ {
    self.entries.iter().map(LogRow::from)
  }

  pub fn write_json<P: AsRef<Path>>(&self, path: P) -> Result<(), RecordError> {
    let path = path.as_ref();
    let writer = BufWriter::new(File::create(path)?);
    let rows: Vec<LogRow> = self.rows().collect();
    serde_json::to_writer_pretty(writer, &rows)?;
    info!("检测日志已写入 {} ({} 条)", path.display(), rows.len());
    Ok(())
  }

  /// 终端显示用的纯文本表格
  pub fn render_table(&self) -> String {
    const HEADERS: [&str; 3] = ["Frame", "Label", "Coordinates"];

    let rows: Vec<[String; 3]> = self
      .rows()
      .map(|row| [row.frame.to_string(), row.label, row.coordinates])
      .collect();

    let mut widths = HEADERS.map(str::len);
    for row in &rows {
      for (width, cell) in widths.iter_mut().zip(row) {
        *width = (*width).max(cell.chars().count());
      }
    }

    let format_line = |cells: [&str; 3]| {
      format!(
        "{:>w0$}  {:<w1$}  {:<w2$}",
        cells[0],
        cells[1],
        cells[2],
        w0 = widths[0],
        w1 = widths[1],
        w2 = widths[2]
      )
      .trim_end()
      .to_string()
    };

    let mut lines = Vec::with_capacity(rows.len() + 2);
    lines.push(format_line(HEADERS));
    lines.push(
      widths
        .iter()
        .map(|w| "-".repeat(*w))
        .collect::<Vec<_>>()
        .join("  "),
    );
    for row in &rows {
      lines.push(format_line([&row[0], &row[1], &row[2]]));
    }
    lines.join("\n")
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn entry(frame: u64, coordinates: [i32; 4]) -> LogEntry {
    LogEntry {
      frame,
      label: "name_tag".to_string(),
      coordinates,
    }
  }

  fn sample_log() -> DetectionLog {
    let mut log = DetectionLog::default();
    log.append(entry(2, [10, 10, 50, 50]));
    log.append(entry(5, [10, 10, 50, 50]));
    log.append(entry(12, [-3, 0, 640, 480]));
    log
  }

  #[test]
  fn coordinates_are_formatted_as_tuple() {
    let rows: Vec<LogRow> = sample_log().rows().collect();
    assert_eq!(rows[0].coordinates, "(10, 10, 50, 50)");
    assert_eq!(rows[2].coordinates, "(-3, 0, 640, 480)");
    assert_eq!(rows[1].frame, 5);
    assert_eq!(rows[1].label, "name_tag");
  }

  #[test]
  fn json_export_uses_column_names() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("log.json");
    sample_log().write_json(&path).unwrap();

    let value: serde_json::Value =
      serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
    let rows = value.as_array().unwrap();
    assert_eq!(rows.len(), 3);
    assert_eq!(rows[0]["Frame"], 2);
    assert_eq!(rows[0]["Label"], "name_tag");
    assert_eq!(rows[0]["Coordinates"], "(10, 10, 50, 50)");
  }

  #[test]
  fn empty_log_exports_empty_array() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("log.json");
    DetectionLog::default().write_json(&path).unwrap();
    assert_eq!(std::fs::read_to_string(&path).unwrap(), "[]");
  }

  #[test]
  fn table_has_header_and_one_line_per_entry() {
    let table = sample_log().render_table();
    let lines: Vec<&str> = table.lines().collect();
    assert_eq!(lines.len(), 5);
    assert!(lines[0].starts_with("Frame"));
    assert!(lines[0].contains("Coordinates"));
    assert!(lines[2].contains("name_tag"));
    assert!(lines[2].ends_with("(10, 10, 50, 50)"));
    assert!(lines[4].trim_start().starts_with("12"));
  }
}
