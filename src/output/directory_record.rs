// 该文件是 Liaowang （瞭望） 项目的一部分。
// src/output/directory_record.rs - 目录记录输出
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

use chrono::{DateTime, Datelike, Local};
use image::RgbImage;
use tracing::debug;
use url::Url;

use crate::{FromUrl, FromUrlWithScheme, UrlError, decoded_path, output::OutputError};

/// 按日期分目录保存标注后的帧：folder:///dir[?always]
///
/// 默认只保存有检测结果的帧，带上 `always` 参数后每帧都保存。
#[derive(Debug, Clone)]
pub struct DirectoryRecord {
  directory: PathBuf,
  frame_counter: u16,
  always: bool,
}

impl DirectoryRecord {
  pub fn new(directory: impl Into<PathBuf>, always: bool) -> Self {
    Self {
      directory: directory.into(),
      frame_counter: 0,
      always,
    }
  }

  fn next_frame_id(&mut self) -> u16 {
    self.frame_counter = self.frame_counter.wrapping_add(1);
    self.frame_counter
  }

  fn frame_path(&mut self, now: DateTime<Local>) -> PathBuf {
    let directory = self
      .directory
      .join(now.year().to_string())
      .join(format!("{:02}", now.month()))
      .join(format!("{:02}", now.day()));
    directory.join(format!(
      "{}-{:04X}.png",
      now.format("%H-%M-%S"),
      self.next_frame_id()
    ))
  }

  pub fn record(&mut self, image: &RgbImage, annotations: usize) -> Result<(), OutputError> {
    if !self.always && annotations == 0 {
      return Ok(());
    }

    let path = self.frame_path(Local::now());
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)?;
    }
    image.save(&path)?;
    debug!("记录帧 {} ({} 个标注)", path.display(), annotations);
    Ok(())
  }
}

impl FromUrlWithScheme for DirectoryRecord {
  const SCHEME: &'static str = "folder";
}

impl FromUrl for DirectoryRecord {
  type Error = UrlError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    UrlError::check_scheme(url, Self::SCHEME)?;
    let always = url.query_pairs().any(|(k, _)| k == "always");
    Ok(Self::new(decoded_path(url)?, always))
  }
}
