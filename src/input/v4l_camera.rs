// 该文件是 Liaowang （瞭望） 项目的一部分。
// src/input/v4l_camera.rs - V4L2 摄像头
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

use std::{pin::Pin, time::Instant};

use image::RgbImage;
use tracing::{debug, error, info};
use url::Url;
use v4l::{
  FourCC, buffer::Type, io::mmap::Stream, io::traits::CaptureStream, prelude::*, video::Capture,
};

use crate::{
  FromUrl, FromUrlWithScheme, UrlError, decoded_path,
  input::{CaptureBackend, CaptureDevice, Constraints, DeviceError, Frame},
};

const V4L_DEFAULT_DEVICE: &str = "/dev/video0";
const V4L_BUFFER_COUNT: u32 = 4;

#[derive(Debug, Clone)]
pub struct V4lBackend {
  device_path: String,
}

impl FromUrlWithScheme for V4lBackend {
  const SCHEME: &'static str = "v4l";
}

impl FromUrl for V4lBackend {
  type Error = UrlError;

  // v4l:///dev/video0，路径为空时使用默认设备
  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    UrlError::check_scheme(url, Self::SCHEME)?;
    let device_path = match decoded_path(url) {
      Ok(path) if path != "/" => path,
      _ => V4L_DEFAULT_DEVICE.to_string(),
    };
    Ok(V4lBackend { device_path })
  }
}

impl CaptureBackend for V4lBackend {
  fn open(&self, constraints: &Constraints) -> Result<Box<dyn CaptureDevice>, DeviceError> {
    Ok(Box::new(V4lCamera::open(&self.device_path, constraints)?))
  }
}

/// V4L2 摄像头
///
/// v4l 的 Stream 需要引用 Device，这里用 Pin<Box<Device>> 固定设备地址，
/// 使得同一结构体中保存的 Stream 引用始终有效。
pub struct V4lCamera {
  device: Pin<Box<Device>>,
  stream: Option<Stream<'static>>,
  device_path: String,
  frame_index: u64,
  width: u32,
  height: u32,
  start_time: Instant,
}

impl V4lCamera {
  pub fn open(device_path: &str, constraints: &Constraints) -> Result<Self, DeviceError> {
    info!("打开 V4L2 设备: {}", device_path);
    let device = Box::pin(
      Device::with_path(device_path).map_err(|e| DeviceError::from_io(device_path, e))?,
    );

    let mut format = device
      .format()
      .map_err(|e| DeviceError::from_io(device_path, e))?;
    format.width = constraints.width;
    format.height = constraints.height;
    format.fourcc = FourCC::new(b"YUYV");
    let format = device
      .set_format(&format)
      .map_err(|e| DeviceError::from_io(device_path, e))?;

    if format.fourcc != FourCC::new(b"YUYV") {
      error!("设备不支持 YUYV 格式，实际格式: {}", format.fourcc);
      return Err(DeviceError::UnsupportedFormat(format.fourcc.to_string()));
    }
    debug!("V4L2 格式: {}x{} {}", format.width, format.height, format.fourcc);

    let mut camera = Self {
      device,
      stream: None,
      device_path: device_path.to_string(),
      frame_index: 0,
      width: format.width,
      height: format.height,
      start_time: Instant::now(),
    };

    // SAFETY: device 被 Pin<Box> 固定在堆上不会移动；stream 与 device 存于同一结构体，
    // 并在 Drop 中先于 device 释放
    let device_ref: &Device = &camera.device;
    let stream = unsafe {
      let device_static: &'static Device = std::mem::transmute(device_ref);
      Stream::with_buffers(device_static, Type::VideoCapture, V4L_BUFFER_COUNT)
        .map_err(|e| DeviceError::from_io(device_path, e))?
    };
    camera.stream = Some(stream);

    Ok(camera)
  }

  fn yuyv_to_rgb(yuyv: &[u8], width: u32, height: u32) -> Vec<u8> {
    let mut rgb = Vec::with_capacity((width * height * 3) as usize);

    for chunk in yuyv.chunks_exact(4) {
      let y0 = chunk[0] as f32;
      let u = chunk[1] as f32 - 128.0;
      let y1 = chunk[2] as f32;
      let v = chunk[3] as f32 - 128.0;

      for y in [y0, y1] {
        let r = (y + 1.402 * v).clamp(0.0, 255.0) as u8;
        let g = (y - 0.344 * u - 0.714 * v).clamp(0.0, 255.0) as u8;
        let b = (y + 1.772 * u).clamp(0.0, 255.0) as u8;
        rgb.extend_from_slice(&[r, g, b]);
      }
    }

    rgb
  }
}

impl CaptureDevice for V4lCamera {
  fn width(&self) -> u32 {
    self.width
  }

  fn height(&self) -> u32 {
    self.height
  }

  fn grab(&mut self) -> Result<Frame, DeviceError> {
    let stream = self
      .stream
      .as_mut()
      .ok_or_else(|| DeviceError::CaptureFailed(format!("{} 的采集流已关闭", self.device_path)))?;

    let (buffer, _meta) = stream
      .next()
      .map_err(|e| DeviceError::CaptureFailed(e.to_string()))?;
    let rgb_data = Self::yuyv_to_rgb(buffer, self.width, self.height);
    let image = RgbImage::from_raw(self.width, self.height, rgb_data)
      .ok_or_else(|| DeviceError::CaptureFailed("采集缓冲区大小与分辨率不符".to_string()))?;

    let frame = Frame {
      image,
      index: self.frame_index,
      timestamp_ms: self.start_time.elapsed().as_millis() as u64,
    };
    self.frame_index += 1;
    Ok(frame)
  }
}

impl Drop for V4lCamera {
  fn drop(&mut self) {
    // stream 必须先于 device 释放
    self.stream.take();
    debug!("释放 V4L2 设备: {}", self.device_path);
  }
}
