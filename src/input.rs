// 该文件是 Liaowang （瞭望） 项目的一部分。
// src/input.rs - 摄像头采集源
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

use image::RgbImage;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::{FromUrl, FromUrlWithScheme, UrlError};

mod image_file;
pub use self::image_file::{ImageFileBackend, StillImageDevice};

#[cfg(feature = "v4l_input")]
mod v4l_camera;
#[cfg(feature = "v4l_input")]
pub use self::v4l_camera::{V4lBackend, V4lCamera};

/// 帧数据
#[derive(Debug, Clone)]
pub struct Frame {
  /// RGB 图像数据
  pub image: RgbImage,
  /// 帧索引
  pub index: u64,
  /// 时间戳（毫秒，自采集开始）
  pub timestamp_ms: u64,
}

impl Frame {
  pub fn width(&self) -> u32 {
    self.image.width()
  }

  pub fn height(&self) -> u32 {
    self.image.height()
  }
}

/// 请求的采集分辨率，设备可能不会严格遵守
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Constraints {
  pub width: u32,
  pub height: u32,
}

impl Default for Constraints {
  fn default() -> Self {
    Self {
      width: 640,
      height: 480,
    }
  }
}

#[derive(Error, Debug)]
pub enum DeviceError {
  #[error("no video input device available: {0}")]
  NotFound(String),
  #[error("permission denied for video input device: {0}")]
  PermissionDenied(String),
  #[error("unsupported pixel format: {0}")]
  UnsupportedFormat(String),
  #[error("I/O error: {0}")]
  IoError(std::io::Error),
  #[error("image decode error: {0}")]
  ImageError(#[from] image::ImageError),
  #[error("capture failed: {0}")]
  CaptureFailed(String),
}

impl DeviceError {
  /// 按错误类型区分设备缺失与权限不足
  pub fn from_io(device: &str, err: std::io::Error) -> Self {
    match err.kind() {
      std::io::ErrorKind::NotFound => DeviceError::NotFound(device.to_string()),
      std::io::ErrorKind::PermissionDenied => DeviceError::PermissionDenied(device.to_string()),
      _ => DeviceError::IoError(err),
    }
  }
}

/// 已打开的视频输入设备
pub trait CaptureDevice: Send {
  fn width(&self) -> u32;
  fn height(&self) -> u32;
  fn grab(&mut self) -> Result<Frame, DeviceError>;
}

/// 可按约束打开设备的采集后端
pub trait CaptureBackend: Send {
  fn open(&self, constraints: &Constraints) -> Result<Box<dyn CaptureDevice>, DeviceError>;
}

enum CaptureState {
  Inactive,
  Active(Box<dyn CaptureDevice>),
}

impl CaptureState {
  fn is_active(&self) -> bool {
    matches!(self, CaptureState::Active(_))
  }
}

/// 采集源，同一时刻最多持有一个活动的设备流
pub struct CaptureSource {
  backend: Box<dyn CaptureBackend>,
  state: CaptureState,
  generation: u64,
}

impl CaptureSource {
  pub fn new<B: CaptureBackend + 'static>(backend: B) -> Self {
    Self {
      backend: Box::new(backend),
      state: CaptureState::Inactive,
      generation: 0,
    }
  }

  /// 打开设备；已处于活动状态时直接返回当前分辨率
  pub fn start(&mut self, constraints: &Constraints) -> Result<(u32, u32), DeviceError> {
    if let CaptureState::Active(device) = &self.state {
      debug!("采集已在进行中，忽略重复的启动请求");
      return Ok((device.width(), device.height()));
    }

    info!(
      "打开视频输入设备，请求分辨率 {}x{}",
      constraints.width, constraints.height
    );
    let device = self.backend.open(constraints)?;
    let size = (device.width(), device.height());
    if size != (constraints.width, constraints.height) {
      warn!(
        "设备未按请求分辨率工作: 请求 {}x{}, 实际 {}x{}",
        constraints.width, constraints.height, size.0, size.1
      );
    }

    self.generation = self.generation.wrapping_add(1);
    self.state = CaptureState::Active(device);
    info!("采集已启动: {}x{}", size.0, size.1);
    Ok(size)
  }

  /// 释放设备，可重复调用
  pub fn stop(&mut self) {
    if let CaptureState::Active(device) = std::mem::replace(&mut self.state, CaptureState::Inactive)
    {
      drop(device);
      self.generation = self.generation.wrapping_add(1);
      info!("采集已停止，设备已释放");
    }
  }

  pub fn is_active(&self) -> bool {
    self.state.is_active()
  }

  /// 每次启动或停止都会递增，用于识别过期的帧
  pub fn generation(&self) -> u64 {
    self.generation
  }

  pub fn current_frame_size(&self) -> Option<(u32, u32)> {
    match &self.state {
      CaptureState::Active(device) => Some((device.width(), device.height())),
      CaptureState::Inactive => None,
    }
  }

  pub fn sample(&mut self) -> Option<Result<Frame, DeviceError>> {
    match &mut self.state {
      CaptureState::Active(device) => Some(device.grab()),
      CaptureState::Inactive => None,
    }
  }
}

impl Drop for CaptureSource {
  fn drop(&mut self) {
    self.stop();
  }
}

pub enum InputWrapper {
  ImageFile(ImageFileBackend),
  #[cfg(feature = "v4l_input")]
  V4l(V4lBackend),
}

impl FromUrl for InputWrapper {
  type Error = UrlError;

  fn from_url(url: &url::Url) -> Result<Self, Self::Error> {
    match url.scheme() {
      ImageFileBackend::SCHEME => Ok(InputWrapper::ImageFile(ImageFileBackend::from_url(url)?)),
      #[cfg(feature = "v4l_input")]
      V4lBackend::SCHEME => Ok(InputWrapper::V4l(V4lBackend::from_url(url)?)),
      other => Err(UrlError::UnsupportedScheme(other.to_string())),
    }
  }
}

impl CaptureBackend for InputWrapper {
  fn open(&self, constraints: &Constraints) -> Result<Box<dyn CaptureDevice>, DeviceError> {
    match self {
      InputWrapper::ImageFile(backend) => backend.open(constraints),
      #[cfg(feature = "v4l_input")]
      InputWrapper::V4l(backend) => backend.open(constraints),
    }
  }
}
