// 该文件是 Liaowang （瞭望） 项目的一部分。
// src/output/canvas.rs - 栅格化叠加层
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

use std::path::{Path, PathBuf};

use ab_glyph::{FontArc, PxScale};
use image::{Rgb, RgbImage, Rgba, RgbaImage};
use imageproc::drawing::{draw_hollow_rect_mut, draw_text_mut};
use tracing::{debug, info, warn};
use url::Url;

#[cfg(feature = "directory_record")]
use crate::output::DirectoryRecord;
use crate::{
  FromUrl, FromUrlWithScheme, UrlError, decoded_path,
  input::Frame,
  output::{Color, OutputError, OverlaySurface, Rect, draw::LABEL_FONT_SIZE},
};

/// 覆盖写入同一个图片文件，始终保存最新一帧
#[derive(Debug, Clone)]
pub struct ImageFileSink {
  path: PathBuf,
}

impl ImageFileSink {
  pub fn new(path: impl Into<PathBuf>) -> Self {
    Self { path: path.into() }
  }

  fn save(&self, image: &RgbImage) -> Result<(), OutputError> {
    if let Some(parent) = self.path.parent()
      && !parent.as_os_str().is_empty()
    {
      std::fs::create_dir_all(parent)?;
    }
    image.save(&self.path)?;
    debug!("保存图像到文件: {}", self.path.display());
    Ok(())
  }
}

impl FromUrlWithScheme for ImageFileSink {
  const SCHEME: &'static str = "image";
}

impl FromUrl for ImageFileSink {
  type Error = UrlError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    UrlError::check_scheme(url, Self::SCHEME)?;
    Ok(Self::new(decoded_path(url)?))
  }
}

pub enum Sink {
  ImageFile(ImageFileSink),
  #[cfg(feature = "directory_record")]
  Directory(DirectoryRecord),
}

impl From<ImageFileSink> for Sink {
  fn from(sink: ImageFileSink) -> Self {
    Sink::ImageFile(sink)
  }
}

#[cfg(feature = "directory_record")]
impl From<DirectoryRecord> for Sink {
  fn from(sink: DirectoryRecord) -> Self {
    Sink::Directory(sink)
  }
}

impl Sink {
  #[cfg_attr(not(feature = "directory_record"), allow(unused_variables))]
  fn write(&mut self, image: &RgbImage, annotations: usize) -> Result<(), OutputError> {
    match self {
      Sink::ImageFile(sink) => sink.save(image),
      #[cfg(feature = "directory_record")]
      Sink::Directory(sink) => sink.record(image, annotations),
    }
  }
}

// 未指定字体时使用的内置等宽字体
const DEFAULT_FONT: &[u8] = include_bytes!("../../assets/font.ttf");

/// 透明图层上绘制标注，输出时与帧合成
pub struct CanvasSurface {
  layer: RgbaImage,
  font: FontArc,
  font_scale: PxScale,
  annotations: usize,
  sink: Sink,
}

impl CanvasSurface {
  pub fn new(sink: impl Into<Sink>) -> Result<Self, OutputError> {
    let font = FontArc::try_from_slice(DEFAULT_FONT)
      .map_err(|e| OutputError::InvalidFont(format!("内置字体: {}", e)))?;
    Ok(Self {
      layer: RgbaImage::new(0, 0),
      font,
      font_scale: PxScale::from(LABEL_FONT_SIZE),
      annotations: 0,
      sink: sink.into(),
    })
  }

  pub fn load_font(&mut self, path: &Path) -> Result<(), OutputError> {
    let data = std::fs::read(path)?;
    let font = FontArc::try_from_vec(data)
      .map_err(|e| OutputError::InvalidFont(format!("{}: {}", path.display(), e)))?;
    info!("加载标签字体: {}", path.display());
    self.font = font;
    Ok(())
  }

  pub fn layer(&self) -> &RgbaImage {
    &self.layer
  }

  /// 按预乘透明度将图层合成到帧上
  fn composite(&self, frame: &RgbImage) -> RgbImage {
    let mut image = frame.clone();
    let width = image.width().min(self.layer.width());
    let height = image.height().min(self.layer.height());

    for y in 0..height {
      for x in 0..width {
        let Rgba([r, g, b, a]) = *self.layer.get_pixel(x, y);
        if a == 0 {
          continue;
        }
        let keep = 1.0 - a as f32 / 255.0;
        let Rgb(base) = *image.get_pixel(x, y);
        let blend = |under: u8, over: u8| (under as f32 * keep + over as f32).min(255.0) as u8;
        image.put_pixel(
          x,
          y,
          Rgb([blend(base[0], r), blend(base[1], g), blend(base[2], b)]),
        );
      }
    }
    image
  }
}

impl OverlaySurface for CanvasSurface {
  fn size(&self) -> (u32, u32) {
    self.layer.dimensions()
  }

  fn resize(&mut self, width: u32, height: u32) {
    self.layer = RgbaImage::new(width, height);
    self.annotations = 0;
  }

  fn clear(&mut self) {
    self
      .layer
      .pixels_mut()
      .for_each(|pixel| *pixel = Rgba([0, 0, 0, 0]));
    self.annotations = 0;
  }

  fn stroke_rect(&mut self, rect: Rect, color: Color, line_width: u32) {
    self.annotations += 1;
    let paint = Rgba([color[0], color[1], color[2], 255]);
    for inset in 0..line_width {
      let width = rect.width.saturating_sub(2 * inset);
      let height = rect.height.saturating_sub(2 * inset);
      if width == 0 || height == 0 {
        break;
      }
      let inner = imageproc::rect::Rect::at(rect.x + inset as i32, rect.y + inset as i32)
        .of_size(width, height);
      draw_hollow_rect_mut(&mut self.layer, inner, paint);
    }
  }

  fn fill_text(&mut self, text: &str, x: i32, y: i32, color: Color) {
    draw_text_mut(
      &mut self.layer,
      Rgba([color[0], color[1], color[2], 255]),
      x,
      y,
      self.font_scale,
      &self.font,
      text,
    );
  }

  fn present(&mut self, frame: &Frame) -> Result<(), OutputError> {
    if self.layer.dimensions() != frame.image.dimensions() {
      warn!(
        "叠加层尺寸 {:?} 与帧尺寸 {:?} 不一致，仅合成重叠区域",
        self.layer.dimensions(),
        frame.image.dimensions()
      );
    }
    let image = self.composite(&frame.image);
    self.sink.write(&image, self.annotations)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::{
    model::{BoundingBox, DetectResult, Detection},
    output::draw::{DrawStyle, draw_annotations},
  };

  fn temp_png(name: &str) -> PathBuf {
    std::env::temp_dir().join(format!("liaowang-{}-{}.png", name, std::process::id()))
  }

  #[test]
  fn two_pixel_box_is_drawn_on_layer() {
    let mut canvas = CanvasSurface::new(ImageFileSink::new(temp_png("unused"))).unwrap();
    canvas.resize(64, 48);
    canvas.stroke_rect(
      Rect {
        x: 10,
        y: 10,
        width: 20,
        height: 20,
      },
      [0, 255, 0],
      2,
    );
    assert_eq!(canvas.layer().get_pixel(10, 10), &Rgba([0, 255, 0, 255]));
    assert_eq!(canvas.layer().get_pixel(11, 11), &Rgba([0, 255, 0, 255]));
    assert_eq!(canvas.layer().get_pixel(12, 12), &Rgba([0, 0, 0, 0]));

    canvas.clear();
    assert_eq!(canvas.layer().get_pixel(10, 10), &Rgba([0, 0, 0, 0]));
  }

  #[test]
  fn labels_are_painted_with_the_builtin_font() {
    let mut canvas = CanvasSurface::new(ImageFileSink::new(temp_png("unused"))).unwrap();
    canvas.resize(640, 480);
    let result: DetectResult = vec![Detection::new(
      "person",
      0.93,
      BoundingBox::new(10.0, 200.0, 100.0, 150.0),
    )]
    .into();
    draw_annotations(&mut canvas, &result, &DrawStyle::default());

    // 标签位于框上方 y 180..198
    let painted = (180..198)
      .flat_map(|y| (10..136).map(move |x| (x, y)))
      .filter(|&(x, y)| canvas.layer().get_pixel(x, y)[3] > 0)
      .count();
    assert!(painted > 0);
  }

  #[test]
  fn degenerate_box_does_not_panic() {
    let mut canvas = CanvasSurface::new(ImageFileSink::new(temp_png("unused"))).unwrap();
    canvas.resize(8, 8);
    canvas.stroke_rect(
      Rect {
        x: 2,
        y: 2,
        width: 0,
        height: 5,
      },
      [0, 255, 0],
      2,
    );
    assert_eq!(canvas.annotations, 1);
  }

  #[test]
  fn present_writes_composited_frame() {
    let path = temp_png("present");
    let mut canvas = CanvasSurface::new(ImageFileSink::new(&path)).unwrap();
    canvas.resize(16, 16);
    canvas.stroke_rect(
      Rect {
        x: 2,
        y: 2,
        width: 8,
        height: 8,
      },
      [0, 255, 0],
      2,
    );
    let frame = Frame {
      image: RgbImage::from_pixel(16, 16, Rgb([200, 0, 0])),
      index: 0,
      timestamp_ms: 0,
    };
    canvas.present(&frame).unwrap();

    let saved = image::open(&path).unwrap().to_rgb8();
    assert_eq!(saved.get_pixel(2, 2), &Rgb([0, 255, 0]));
    assert_eq!(saved.get_pixel(6, 6), &Rgb([200, 0, 0]));
    std::fs::remove_file(path).ok();
  }
}
