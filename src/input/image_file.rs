// 该文件是 Liaowang （瞭望） 项目的一部分。
// src/input/image_file.rs - 静态图片模拟摄像头
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

use std::{path::PathBuf, time::Instant};

use image::{ImageReader, RgbImage};
use tracing::{debug, info};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme, UrlError, decoded_path,
  input::{CaptureBackend, CaptureDevice, Constraints, DeviceError, Frame},
};

/// 以图片文件作为摄像头，每次采集都返回同一张图
#[derive(Debug, Clone)]
pub struct ImageFileBackend {
  path: PathBuf,
}

impl ImageFileBackend {
  pub fn new(path: impl Into<PathBuf>) -> Self {
    Self { path: path.into() }
  }
}

impl FromUrlWithScheme for ImageFileBackend {
  const SCHEME: &'static str = "image";
}

impl FromUrl for ImageFileBackend {
  type Error = UrlError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    UrlError::check_scheme(url, Self::SCHEME)?;
    Ok(Self::new(decoded_path(url)?))
  }
}

impl CaptureBackend for ImageFileBackend {
  fn open(&self, constraints: &Constraints) -> Result<Box<dyn CaptureDevice>, DeviceError> {
    let device_name = self.path.display().to_string();
    info!("读取图片文件: {}", device_name);
    let image = ImageReader::open(&self.path)
      .map_err(|e| DeviceError::from_io(&device_name, e))?
      .decode()?
      .to_rgb8();

    if (image.width(), image.height()) != (constraints.width, constraints.height) {
      debug!(
        "图片尺寸 {}x{} 与请求的 {}x{} 不同，按原尺寸输出",
        image.width(),
        image.height(),
        constraints.width,
        constraints.height
      );
    }

    Ok(Box::new(StillImageDevice::new(image)))
  }
}

pub struct StillImageDevice {
  image: RgbImage,
  frame_index: u64,
  start_time: Instant,
}

impl StillImageDevice {
  pub fn new(image: RgbImage) -> Self {
    Self {
      image,
      frame_index: 0,
      start_time: Instant::now(),
    }
  }
}

impl CaptureDevice for StillImageDevice {
  fn width(&self) -> u32 {
    self.image.width()
  }

  fn height(&self) -> u32 {
    self.image.height()
  }

  fn grab(&mut self) -> Result<Frame, DeviceError> {
    let frame = Frame {
      image: self.image.clone(),
      index: self.frame_index,
      timestamp_ms: self.start_time.elapsed().as_millis() as u64,
    };
    self.frame_index += 1;
    Ok(frame)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn missing_file_is_not_found() {
    let backend = ImageFileBackend::new("/definitely/not/here.png");
    let err = backend.open(&Constraints::default()).err().unwrap();
    assert!(matches!(err, DeviceError::NotFound(_)));
  }

  #[test]
  fn still_image_is_replayed_with_increasing_index() {
    let path = std::env::temp_dir().join(format!("liaowang-still-{}.png", std::process::id()));
    RgbImage::from_pixel(32, 24, image::Rgb([10, 20, 30]))
      .save(&path)
      .unwrap();

    let mut device = ImageFileBackend::new(&path)
      .open(&Constraints::default())
      .unwrap();
    assert_eq!((device.width(), device.height()), (32, 24));
    let first = device.grab().unwrap();
    let second = device.grab().unwrap();
    assert_eq!(first.index, 0);
    assert_eq!(second.index, 1);
    assert_eq!(second.image.get_pixel(3, 3), &image::Rgb([10, 20, 30]));

    std::fs::remove_file(path).ok();
  }

  #[test]
  fn url_path_is_decoded() {
    let url = Url::parse("image:///tmp/a%20b.png").unwrap();
    let backend = ImageFileBackend::from_url(&url).unwrap();
    assert_eq!(backend.path, PathBuf::from("/tmp/a b.png"));
  }
}
