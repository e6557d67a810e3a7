// 该文件是 Nametag （名牌检测） 项目的一部分。
// src/session.rs - 上传暂存与下载交付
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

//! # 上传与下载
//!
//! 上传的视频先复制到一个临时目录，管道的原始输出也写在同一目录下。
//! [`Session`] 释放时临时目录随之删除。
//!
//! 最终视频以固定文件名 `annotated_output.mp4` 和 MIME `video/mp4` 交付。

use std::path::{Path, PathBuf};

use tempfile::TempDir;
use thiserror::Error;
use tracing::{error, info};

/// 允许上传的扩展名（不区分大小写）
pub const ALLOWED_EXTENSIONS: [&str; 3] = ["mp4", "mov", "avi"];

/// 管道原始输出的文件名
pub const RAW_OUTPUT_FILE_NAME: &str = "output_temp.mp4";
/// 再编码输出的文件名
pub const REENCODED_FILE_NAME: &str = "output_h264.mp4";
/// 交付给用户的文件名
pub const DOWNLOAD_FILE_NAME: &str = "annotated_output.mp4";
pub const DOWNLOAD_MIME: &str = "video/mp4";

#[derive(Error, Debug)]
pub enum SessionError {
  #[error("不支持的文件类型: {0} (仅支持 mp4, mov, avi)")]
  UnsupportedExtension(String),
  #[error("文件不存在: {0}")]
  FileNotFound(PathBuf),
  #[error("IO error: {0}")]
  IoError(#[from] std::io::Error),
}

/// 检查上传文件扩展名，返回小写的扩展名
pub fn check_extension(path: &Path) -> Result<String, SessionError> {
  let extension = path
    .extension()
    .and_then(|e| e.to_str())
    .map(|e| e.to_ascii_lowercase())
    .unwrap_or_default();
  if ALLOWED_EXTENSIONS.contains(&extension.as_str()) {
    Ok(extension)
  } else {
    error!("拒绝上传文件: {}", path.display());
    Err(SessionError::UnsupportedExtension(
      path.display().to_string(),
    ))
  }
}

/// 可下载的结果文件
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Download {
  pub path: PathBuf,
  pub file_name: &'static str,
  pub mime: &'static str,
}

#[derive(Debug)]
pub struct Session {
  dir: TempDir,
  input: PathBuf,
}

impl Session {
  /// 校验扩展名后把上传文件复制进新的临时目录
  pub fn stage<P: AsRef<Path>>(upload: P) -> Result<Self, SessionError> {
    let upload = upload.as_ref();
    let extension = check_extension(upload)?;
    if !upload.is_file() {
      return Err(SessionError::FileNotFound(upload.to_path_buf()));
    }

    let dir = tempfile::Builder::new().prefix("nametag-").tempdir()?;
    let input = dir.path().join(format!("upload.{}", extension));
    std::fs::copy(upload, &input)?;
    info!("上传文件已暂存: {} -> {}", upload.display(), input.display());

    Ok(Session { dir, input })
  }

  pub fn work_dir(&self) -> &Path {
    self.dir.path()
  }

  pub fn input_path(&self) -> &Path {
    &self.input
  }

  pub fn raw_output_path(&self) -> PathBuf {
    self.dir.path().join(RAW_OUTPUT_FILE_NAME)
  }

  pub fn reencoded_output_path(&self) -> PathBuf {
    self.dir.path().join(REENCODED_FILE_NAME)
  }

  /// 把最终视频复制到 `dest_dir/annotated_output.mp4`
  pub fn deliver<P: AsRef<Path>, Q: AsRef<Path>>(
    &self,
    artifact: P,
    dest_dir: Q,
  ) -> Result<Download, SessionError> {
    let artifact = artifact.as_ref();
    if !artifact.is_file() {
      return Err(SessionError::FileNotFound(artifact.to_path_buf()));
    }

    let dest_dir = dest_dir.as_ref();
    std::fs::create_dir_all(dest_dir)?;
    let path = dest_dir.join(DOWNLOAD_FILE_NAME);
    std::fs::copy(artifact, &path)?;
    info!("结果已交付: {}", path.display());

    Ok(Download {
      path,
      file_name: DOWNLOAD_FILE_NAME,
      mime: DOWNLOAD_MIME,
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn upload(dir: &Path, name: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, b"fake video").unwrap();
    path
  }

  #[test]
  fn extension_check_is_case_insensitive() {
    assert_eq!(check_extension(Path::new("a.MP4")).unwrap(), "mp4");
    assert_eq!(check_extension(Path::new("b.Mov")).unwrap(), "mov");
    assert_eq!(check_extension(Path::new("c.avi")).unwrap(), "avi");
    assert!(check_extension(Path::new("d.mkv")).is_err());
    assert!(check_extension(Path::new("noext")).is_err());
  }

  #[test]
  fn rejected_upload_is_not_staged() {
    let src = tempfile::tempdir().unwrap();
    let path = upload(src.path(), "clip.webm");
    assert!(matches!(
      Session::stage(&path),
      Err(SessionError::UnsupportedExtension(_))
    ));
  }

  #[test]
  fn staging_copies_into_temporary_dir() {
    let src = tempfile::tempdir().unwrap();
    let path = upload(src.path(), "clip.MOV");
    let session = Session::stage(&path).unwrap();

    assert_eq!(std::fs::read(session.input_path()).unwrap(), b"fake video");
    assert!(session.input_path().starts_with(session.work_dir()));
    assert_eq!(
      session.raw_output_path().file_name().unwrap(),
      RAW_OUTPUT_FILE_NAME
    );
  }

  #[test]
  fn temporary_dir_is_removed_on_drop() {
    let src = tempfile::tempdir().unwrap();
    let session = Session::stage(upload(src.path(), "clip.mp4")).unwrap();
    let work_dir = session.work_dir().to_path_buf();
    assert!(work_dir.is_dir());
    drop(session);
    assert!(!work_dir.exists());
  }

  #[test]
  fn delivery_uses_fixed_name_and_mime() {
    let src = tempfile::tempdir().unwrap();
    let dest = tempfile::tempdir().unwrap();
    let session = Session::stage(upload(src.path(), "clip.mp4")).unwrap();
    std::fs::write(session.raw_output_path(), b"annotated").unwrap();

    let download = session
      .deliver(session.raw_output_path(), dest.path())
      .unwrap();
    assert_eq!(download.file_name, "annotated_output.mp4");
    assert_eq!(download.mime, "video/mp4");
    assert_eq!(download.path, dest.path().join("annotated_output.mp4"));
    assert_eq!(std::fs::read(&download.path).unwrap(), b"annotated");
  }

  #[test]
  fn delivering_a_missing_artifact_fails() {
    let src = tempfile::tempdir().unwrap();
    let dest = tempfile::tempdir().unwrap();
    let session = Session::stage(upload(src.path(), "clip.mp4")).unwrap();
    assert!(matches!(
      session.deliver(session.reencoded_output_path(), dest.path()),
      Err(SessionError::FileNotFound(_))
    ));
  }
}
