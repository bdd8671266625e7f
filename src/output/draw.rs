// 该文件是 Liaowang （瞭望） 项目的一部分。
// src/output/draw.rs - 检测结果标注
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

use crate::{
  model::{BoundingBox, DetectResult},
  output::{Color, OverlaySurface, Rect},
};

// 文本渲染常量
pub const LABEL_FONT_SIZE: f32 = 16.0;
const LABEL_TEXT_HEIGHT: u32 = 18;
const LABEL_CHAR_WIDTH: f32 = 9.7; // 内置等宽字体在 16px 下的字宽
const LABEL_GAP: i32 = 2;
const BOX_COLOR: Color = [0, 255, 0]; // 绿色
const BOX_LINE_WIDTH: u32 = 2;

#[derive(Debug, Clone, PartialEq)]
pub struct DrawStyle {
  pub box_color: Color,
  pub line_width: u32,
  pub char_width: f32,
  pub text_height: u32,
  pub label_gap: i32,
}

impl Default for DrawStyle {
  fn default() -> Self {
    Self {
      box_color: BOX_COLOR,
      line_width: BOX_LINE_WIDTH,
      char_width: LABEL_CHAR_WIDTH,
      text_height: LABEL_TEXT_HEIGHT,
      label_gap: LABEL_GAP,
    }
  }
}

impl DrawStyle {
  pub fn text_width(&self, text: &str) -> u32 {
    (text.chars().count() as f32 * self.char_width).ceil() as u32
  }
}

/// 标签文本：类别与保留一位小数的百分比置信度，恰好落在中间时向上取整
pub fn format_label(label: &str, confidence: f32) -> String {
  let percent = (confidence as f64 * 1000.0).round() / 10.0;
  format!("{} ({:.1}%)", label, percent)
}

impl From<&BoundingBox> for Rect {
  fn from(bbox: &BoundingBox) -> Self {
    Rect {
      x: bbox.x.round() as i32,
      y: bbox.y.round() as i32,
      width: bbox.width.max(0.0).round() as u32,
      height: bbox.height.max(0.0).round() as u32,
    }
  }
}

/// 标签左上角位置
///
/// 优先放在框的左上角正上方；上方放不下时移到框内顶边下方，
/// 最后夹在表面范围内（表面比文本还小时取 0）。
pub fn label_position(
  rect: &Rect,
  text_size: (u32, u32),
  surface_size: (u32, u32),
  gap: i32,
) -> (i32, i32) {
  let (text_w, text_h) = (text_size.0 as i32, text_size.1 as i32);
  let (surface_w, surface_h) = (surface_size.0 as i32, surface_size.1 as i32);

  let mut y = rect.y - gap - text_h;
  if y < 0 {
    y = rect.y + gap;
  }

  let x = rect.x.min(surface_w - text_w).max(0);
  let y = y.min(surface_h - text_h).max(0);
  (x, y)
}

/// 在表面上为每个检测绘制一个边框和一个标签，返回绘制的数量
pub fn draw_annotations<S: OverlaySurface + ?Sized>(
  surface: &mut S,
  result: &DetectResult,
  style: &DrawStyle,
) -> usize {
  let surface_size = surface.size();
  for detection in result {
    let rect = Rect::from(&detection.bbox);
    surface.stroke_rect(rect, style.box_color, style.line_width);

    let text = format_label(&detection.label, detection.confidence);
    let text_size = (style.text_width(&text), style.text_height);
    let (x, y) = label_position(&rect, text_size, surface_size, style.label_gap);
    surface.fill_text(&text, x, y, style.box_color);
  }
  result.len()
}
