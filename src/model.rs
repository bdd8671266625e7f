// 该文件是 Liaowang （瞭望） 项目的一部分。
// src/model.rs - 模型
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

use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use crate::{FromUrl, FromUrlWithScheme, UrlError, input::Frame};

/// 单帧推理能力
pub trait Model: Send + Sync {
  type Error: std::error::Error + Send + Sync + 'static;

  fn infer(&self, frame: &Frame) -> Result<DetectResult, Self::Error>;
}

/// 模型加载能力，加载可能耗时较长
pub trait ModelLoader: Send + Sync {
  type Model: Model + 'static;
  type Error: std::error::Error + Send + Sync + 'static;

  fn load(&self) -> Result<Self::Model, Self::Error>;
}

/// 源图像素坐标下的边界框，原点在左上角
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
  pub x: f32,
  pub y: f32,
  pub width: f32,
  pub height: f32,
}

impl BoundingBox {
  pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
    Self {
      x,
      y,
      width,
      height,
    }
  }

  /// 将归一化的 [x_min, y_min, x_max, y_max] 换算到源图像素坐标
  pub fn from_normalized(bbox: [f32; 4], width: u32, height: u32) -> Self {
    let (w, h) = (width as f32, height as f32);
    let x_min = bbox[0].clamp(0.0, 1.0) * w;
    let y_min = bbox[1].clamp(0.0, 1.0) * h;
    let x_max = bbox[2].clamp(0.0, 1.0) * w;
    let y_max = bbox[3].clamp(0.0, 1.0) * h;
    Self {
      x: x_min,
      y: y_min,
      width: (x_max - x_min).max(0.0),
      height: (y_max - y_min).max(0.0),
    }
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
  pub label: String,
  pub confidence: f32,
  pub bbox: BoundingBox,
}

impl Detection {
  pub fn new(label: impl Into<String>, confidence: f32, bbox: BoundingBox) -> Self {
    Self {
      label: label.into(),
      confidence,
      bbox,
    }
  }
}

/// 一帧的检测结果，保持模型输出顺序
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DetectResult {
  pub items: Box<[Detection]>,
}

impl DetectResult {
  pub fn len(&self) -> usize {
    self.items.len()
  }

  pub fn is_empty(&self) -> bool {
    self.items.is_empty()
  }

  pub fn iter(&self) -> std::slice::Iter<'_, Detection> {
    self.items.iter()
  }
}

impl From<Vec<Detection>> for DetectResult {
  fn from(items: Vec<Detection>) -> Self {
    Self {
      items: items.into_boxed_slice(),
    }
  }
}

impl FromIterator<Detection> for DetectResult {
  fn from_iter<I: IntoIterator<Item = Detection>>(iter: I) -> Self {
    iter.into_iter().collect::<Vec<_>>().into()
  }
}

impl<'a> IntoIterator for &'a DetectResult {
  type Item = &'a Detection;
  type IntoIter = std::slice::Iter<'a, Detection>;

  fn into_iter(self) -> Self::IntoIter {
    self.items.iter()
  }
}

pub trait WithLabel: Sized + std::fmt::Debug {
  fn to_label_str(&self) -> String;
  fn from_label_id(id: u32) -> Self;
}

mod labels;
pub use self::labels::{COCO_CLASSES, CocoLabel};

mod replay;
pub use self::replay::{ReplayError, ReplayLoader, ReplayModel};

#[cfg(feature = "model_yolo26")]
mod yolo26;
#[cfg(feature = "model_yolo26")]
pub use self::yolo26::{Yolo26, Yolo26Builder, Yolo26Error};

#[derive(Error, Debug)]
pub enum ModelError {
  #[error("回放模型错误: {0}")]
  Replay(#[from] ReplayError),
  #[cfg(feature = "model_yolo26")]
  #[error("YOLO26 模型错误: {0}")]
  Yolo26(#[from] Yolo26Error),
}

/// 按 URL 方案选择的模型加载器
pub enum ModelSource {
  Replay(ReplayLoader),
  #[cfg(feature = "model_yolo26")]
  Yolo26(Yolo26Builder),
}

pub enum ModelWrapper {
  Replay(ReplayModel),
  #[cfg(feature = "model_yolo26")]
  Yolo26(Yolo26<CocoLabel>),
}

impl FromUrl for ModelSource {
  type Error = UrlError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    match url.scheme() {
      ReplayLoader::SCHEME => Ok(ModelSource::Replay(ReplayLoader::from_url(url)?)),
      #[cfg(feature = "model_yolo26")]
      Yolo26Builder::SCHEME => Ok(ModelSource::Yolo26(Yolo26Builder::from_url(url)?)),
      other => Err(UrlError::UnsupportedScheme(other.to_string())),
    }
  }
}

impl ModelLoader for ModelSource {
  type Model = ModelWrapper;
  type Error = ModelError;

  fn load(&self) -> Result<Self::Model, Self::Error> {
    match self {
      ModelSource::Replay(loader) => Ok(ModelWrapper::Replay(loader.load()?)),
      #[cfg(feature = "model_yolo26")]
      ModelSource::Yolo26(builder) => Ok(ModelWrapper::Yolo26(builder.build()?)),
    }
  }
}

impl Model for ModelWrapper {
  type Error = ModelError;

  fn infer(&self, frame: &Frame) -> Result<DetectResult, Self::Error> {
    match self {
      ModelWrapper::Replay(model) => Ok(model.infer(frame)?),
      #[cfg(feature = "model_yolo26")]
      ModelWrapper::Yolo26(model) => Ok(model.infer(frame)?),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn normalized_box_is_scaled_to_source_pixels() {
    let bbox = BoundingBox::from_normalized([0.25, 0.5, 0.75, 1.0], 640, 480);
    assert_eq!(bbox, BoundingBox::new(160.0, 240.0, 320.0, 240.0));
  }

  #[test]
  fn inverted_box_collapses_to_zero_size() {
    let bbox = BoundingBox::from_normalized([0.6, 0.6, 0.4, 0.4], 100, 100);
    assert_eq!(bbox.width, 0.0);
    assert_eq!(bbox.height, 0.0);
  }

  #[test]
  fn detection_deserializes_from_json() {
    let json = r#"{"label":"person","confidence":0.93,"bbox":{"x":10,"y":20,"width":100,"height":150}}"#;
    let detection: Detection = serde_json::from_str(json).unwrap();
    assert_eq!(
      detection,
      Detection::new("person", 0.93, BoundingBox::new(10.0, 20.0, 100.0, 150.0))
    );
  }

  #[test]
  fn unknown_model_scheme_is_rejected() {
    let url = Url::parse("onnx:///models/yolo.onnx").unwrap();
    assert!(matches!(
      ModelSource::from_url(&url),
      Err(UrlError::UnsupportedScheme(_))
    ));
  }
}
