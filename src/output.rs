// 该文件是 Liaowang （瞭望） 项目的一部分。
// src/output.rs - 叠加层输出定义
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
use tracing::info;
use url::Url;

use crate::{FromUrl, FromUrlWithScheme, UrlError, input::Frame};

pub type Color = [u8; 3];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rect {
  pub x: i32,
  pub y: i32,
  pub width: u32,
  pub height: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub enum DrawCommand {
  StrokeRect {
    rect: Rect,
    color: Color,
    line_width: u32,
  },
  FillText {
    text: String,
    x: i32,
    y: i32,
    color: Color,
  },
}

#[derive(Error, Debug)]
pub enum OutputError {
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("图像错误: {0}")]
  ImageError(#[from] image::ImageError),
  #[error("字体无效: {0}")]
  InvalidFont(String),
  #[error(transparent)]
  Url(#[from] UrlError),
}

/// 叠加在原始视频之上的可绘制层
pub trait OverlaySurface: Send {
  fn size(&self) -> (u32, u32);
  fn resize(&mut self, width: u32, height: u32);
  fn clear(&mut self);
  fn stroke_rect(&mut self, rect: Rect, color: Color, line_width: u32);
  fn fill_text(&mut self, text: &str, x: i32, y: i32, color: Color);
  /// 一轮绘制完成后，将叠加层与对应的帧一起交给输出端
  fn present(&mut self, frame: &Frame) -> Result<(), OutputError>;
}

pub mod draw;

#[cfg(feature = "save_image_file")]
mod canvas;
#[cfg(feature = "save_image_file")]
pub use self::canvas::{CanvasSurface, ImageFileSink};

#[cfg(feature = "directory_record")]
mod directory_record;
#[cfg(feature = "directory_record")]
pub use self::directory_record::DirectoryRecord;

/// 记录绘制命令的表面，log: 输出时逐条打印标注
#[derive(Debug, Default)]
pub struct RecordSurface {
  width: u32,
  height: u32,
  commands: Vec<DrawCommand>,
  log: bool,
}

impl RecordSurface {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn with_log(mut self, log: bool) -> Self {
    self.log = log;
    self
  }

  pub fn commands(&self) -> &[DrawCommand] {
    &self.commands
  }

  pub fn rects(&self) -> impl Iterator<Item = &Rect> {
    self.commands.iter().filter_map(|cmd| match cmd {
      DrawCommand::StrokeRect { rect, .. } => Some(rect),
      DrawCommand::FillText { .. } => None,
    })
  }

  pub fn texts(&self) -> impl Iterator<Item = &str> {
    self.commands.iter().filter_map(|cmd| match cmd {
      DrawCommand::FillText { text, .. } => Some(text.as_str()),
      DrawCommand::StrokeRect { .. } => None,
    })
  }
}

impl FromUrlWithScheme for RecordSurface {
  const SCHEME: &'static str = "log";
}

impl FromUrl for RecordSurface {
  type Error = UrlError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    UrlError::check_scheme(url, Self::SCHEME)?;
    Ok(RecordSurface::new().with_log(true))
  }
}

impl OverlaySurface for RecordSurface {
  fn size(&self) -> (u32, u32) {
    (self.width, self.height)
  }

  fn resize(&mut self, width: u32, height: u32) {
    self.width = width;
    self.height = height;
    self.commands.clear();
  }

  fn clear(&mut self) {
    self.commands.clear();
  }

  fn stroke_rect(&mut self, rect: Rect, color: Color, line_width: u32) {
    self.commands.push(DrawCommand::StrokeRect {
      rect,
      color,
      line_width,
    });
  }

  fn fill_text(&mut self, text: &str, x: i32, y: i32, color: Color) {
    self.commands.push(DrawCommand::FillText {
      text: text.to_string(),
      x,
      y,
      color,
    });
  }

  fn present(&mut self, frame: &Frame) -> Result<(), OutputError> {
    if self.log {
      for (rect, text) in self.rects().zip(self.texts()) {
        info!(
          "帧 {}: {} at ({}, {}, {}x{})",
          frame.index, text, rect.x, rect.y, rect.width, rect.height
        );
      }
    }
    Ok(())
  }
}

/// 按 URL 方案选择的输出
pub enum OutputWrapper {
  Log(RecordSurface),
  #[cfg(feature = "save_image_file")]
  Canvas(CanvasSurface),
}

impl FromUrl for OutputWrapper {
  type Error = OutputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    match url.scheme() {
      RecordSurface::SCHEME => Ok(OutputWrapper::Log(RecordSurface::from_url(url)?)),
      #[cfg(feature = "save_image_file")]
      ImageFileSink::SCHEME => Ok(OutputWrapper::Canvas(CanvasSurface::new(
        ImageFileSink::from_url(url)?,
      )?)),
      #[cfg(feature = "directory_record")]
      DirectoryRecord::SCHEME => Ok(OutputWrapper::Canvas(CanvasSurface::new(
        DirectoryRecord::from_url(url)?,
      )?)),
      other => Err(UrlError::UnsupportedScheme(other.to_string()).into()),
    }
  }
}

impl OutputWrapper {
  /// 为标签文字加载字体；仅栅格化输出需要
  pub fn load_font(&mut self, path: &std::path::Path) -> Result<(), OutputError> {
    match self {
      OutputWrapper::Log(_) => {
        info!("log 输出不需要字体，忽略 {}", path.display());
        Ok(())
      }
      #[cfg(feature = "save_image_file")]
      OutputWrapper::Canvas(canvas) => canvas.load_font(path),
    }
  }
}

impl OverlaySurface for OutputWrapper {
  fn size(&self) -> (u32, u32) {
    match self {
      OutputWrapper::Log(surface) => surface.size(),
      #[cfg(feature = "save_image_file")]
      OutputWrapper::Canvas(surface) => surface.size(),
    }
  }

  fn resize(&mut self, width: u32, height: u32) {
    match self {
      OutputWrapper::Log(surface) => surface.resize(width, height),
      #[cfg(feature = "save_image_file")]
      OutputWrapper::Canvas(surface) => surface.resize(width, height),
    }
  }

  fn clear(&mut self) {
    match self {
      OutputWrapper::Log(surface) => surface.clear(),
      #[cfg(feature = "save_image_file")]
      OutputWrapper::Canvas(surface) => surface.clear(),
    }
  }

  fn stroke_rect(&mut self, rect: Rect, color: Color, line_width: u32) {
    match self {
      OutputWrapper::Log(surface) => surface.stroke_rect(rect, color, line_width),
      #[cfg(feature = "save_image_file")]
      OutputWrapper::Canvas(surface) => surface.stroke_rect(rect, color, line_width),
    }
  }

  fn fill_text(&mut self, text: &str, x: i32, y: i32, color: Color) {
    match self {
      OutputWrapper::Log(surface) => surface.fill_text(text, x, y, color),
      #[cfg(feature = "save_image_file")]
      OutputWrapper::Canvas(surface) => surface.fill_text(text, x, y, color),
    }
  }

  fn present(&mut self, frame: &Frame) -> Result<(), OutputError> {
    match self {
      OutputWrapper::Log(surface) => surface.present(frame),
      #[cfg(feature = "save_image_file")]
      OutputWrapper::Canvas(surface) => surface.present(frame),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn resize_and_clear_drop_commands() {
    let mut surface = RecordSurface::new();
    surface.resize(640, 480);
    let rect = Rect {
      x: 1,
      y: 2,
      width: 3,
      height: 4,
    };
    surface.stroke_rect(rect, [0, 255, 0], 2);
    surface.fill_text("a", 0, 0, [0, 255, 0]);
    assert_eq!(surface.commands().len(), 2);
    assert_eq!(surface.rects().count(), 1);
    assert_eq!(surface.texts().collect::<Vec<_>>(), vec!["a"]);

    surface.clear();
    assert!(surface.commands().is_empty());
    assert_eq!(surface.size(), (640, 480));
  }

  #[test]
  fn log_scheme_builds_record_surface() {
    let url = Url::parse("log:").unwrap();
    assert!(matches!(
      OutputWrapper::from_url(&url),
      Ok(OutputWrapper::Log(_))
    ));
    let url = Url::parse("rtsp://0.0.0.0:8554/live").unwrap();
    assert!(matches!(
      OutputWrapper::from_url(&url),
      Err(OutputError::Url(UrlError::UnsupportedScheme(_)))
    ));
  }
}
