// 该文件是 Liaowang （瞭望） 项目的一部分。
// src/model/replay.rs - 回放预先记录的检测结果
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

use std::{
  path::PathBuf,
  sync::atomic::{AtomicUsize, Ordering},
  time::Duration,
};

use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, info};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme, UrlError, decoded_path,
  input::Frame,
  model::{DetectResult, Detection, Model, ModelLoader},
};

#[derive(Error, Debug)]
pub enum ReplayError {
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("检测记录解析错误: {0}")]
  JsonError(#[from] serde_json::Error),
  #[error("第 {frame} 帧的检测置信度 {confidence} 超出 [0, 1]")]
  InvalidConfidence { frame: usize, confidence: f32 },
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ReplayFile {
  Frames(Vec<Vec<Detection>>),
  Single(Vec<Detection>),
}

/// replay:///path/detections.json?delay_ms=30
#[derive(Debug, Clone)]
pub struct ReplayLoader {
  path: PathBuf,
  delay: Option<Duration>,
}

impl ReplayLoader {
  pub fn new(path: impl Into<PathBuf>) -> Self {
    Self {
      path: path.into(),
      delay: None,
    }
  }

  pub fn with_delay(mut self, delay: Option<Duration>) -> Self {
    self.delay = delay;
    self
  }
}

impl FromUrlWithScheme for ReplayLoader {
  const SCHEME: &'static str = "replay";
}

impl FromUrl for ReplayLoader {
  type Error = UrlError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    UrlError::check_scheme(url, Self::SCHEME)?;

    let mut delay = None;
    for (k, v) in url.query_pairs() {
      if k == "delay_ms" {
        let ms = v
          .parse::<u64>()
          .map_err(|e| UrlError::InvalidQuery(format!("delay_ms={}: {}", v, e)))?;
        delay = Some(Duration::from_millis(ms));
      }
    }

    Ok(Self::new(decoded_path(url)?).with_delay(delay))
  }
}

impl ModelLoader for ReplayLoader {
  type Model = ReplayModel;
  type Error = ReplayError;

  fn load(&self) -> Result<Self::Model, Self::Error> {
    info!("读取检测记录: {}", self.path.display());
    let content = std::fs::read_to_string(&self.path)?;
    let frames = match serde_json::from_str::<ReplayFile>(&content)? {
      ReplayFile::Frames(frames) => frames,
      ReplayFile::Single(detections) => vec![detections],
    };

    for (frame, detections) in frames.iter().enumerate() {
      if let Some(bad) = detections
        .iter()
        .find(|d| !(0.0..=1.0).contains(&d.confidence))
      {
        return Err(ReplayError::InvalidConfidence {
          frame,
          confidence: bad.confidence,
        });
      }
    }

    debug!("共 {} 帧检测记录", frames.len());
    Ok(ReplayModel::new(
      frames.into_iter().map(DetectResult::from).collect(),
      self.delay,
    ))
  }
}

/// 按调用次数循环返回记录的检测结果
pub struct ReplayModel {
  frames: Box<[DetectResult]>,
  cursor: AtomicUsize,
  delay: Option<Duration>,
}

impl ReplayModel {
  pub fn new(frames: Vec<DetectResult>, delay: Option<Duration>) -> Self {
    Self {
      frames: frames.into_boxed_slice(),
      cursor: AtomicUsize::new(0),
      delay,
    }
  }
}

impl Model for ReplayModel {
  type Error = ReplayError;

  fn infer(&self, _frame: &Frame) -> Result<DetectResult, Self::Error> {
    if let Some(delay) = self.delay {
      std::thread::sleep(delay);
    }
    if self.frames.is_empty() {
      return Ok(DetectResult::default());
    }
    let index = self.cursor.fetch_add(1, Ordering::Relaxed) % self.frames.len();
    Ok(self.frames[index].clone())
  }
}
