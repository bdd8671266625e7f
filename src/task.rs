// 该文件是 Liaowang （瞭望） 项目的一部分。
// src/task.rs - 检测与渲染循环
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
  sync::mpsc::{self, RecvTimeoutError, Sender},
  thread::{self, JoinHandle},
  time::{Duration, Instant},
};

use tracing::{debug, info, warn};

use crate::{
  detector::{DetectorAdapter, InferenceError},
  input::{CaptureSource, Frame},
  model::{DetectResult, ModelLoader},
  output::{
    OverlaySurface,
    draw::{DrawStyle, draw_annotations},
  },
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
  /// 采集未启动或模型未就绪，本轮不绘制
  Skipped,
  /// 本轮绘制的检测数量
  Rendered(usize),
}

/// 一轮的前半段结果
pub enum TickStart {
  Skipped,
  NoFrame,
  Frame(Frame),
}

/// 持有叠加层与当前检测集合，只有渲染循环会修改它们
pub struct RenderLoop<S> {
  surface: S,
  detections: DetectResult,
  style: DrawStyle,
  idle: bool,
  last_frame: Option<Frame>,
}

impl<S: OverlaySurface> RenderLoop<S> {
  pub fn new(surface: S) -> Self {
    Self {
      surface,
      detections: DetectResult::default(),
      style: DrawStyle::default(),
      idle: true,
      last_frame: None,
    }
  }

  pub fn with_style(mut self, style: DrawStyle) -> Self {
    self.style = style;
    self
  }

  pub fn surface(&self) -> &S {
    &self.surface
  }

  pub fn detections(&self) -> &DetectResult {
    &self.detections
  }

  /// 叠加层尺寸与采集源不一致时调整
  pub fn fit_surface(&mut self, width: u32, height: u32) {
    if self.surface.size() != (width, height) {
      debug!("调整叠加层尺寸为 {}x{}", width, height);
      self.surface.resize(width, height);
    }
  }

  /// 清空叠加层并丢弃当前检测集合；上一帧会以无标注的形式再输出一次
  pub fn clear(&mut self) {
    if !self.idle {
      self.surface.clear();
      if let Some(frame) = self.last_frame.take()
        && let Err(e) = self.surface.present(&frame)
      {
        warn!("叠加层输出失败: {}", e);
      }
      self.idle = true;
    }
    self.detections = DetectResult::default();
  }

  /// 检查运行条件，调整并清空叠加层，采集一帧
  pub fn begin_tick(&mut self, capture: &mut CaptureSource, model_ready: bool) -> TickStart {
    let Some((width, height)) = capture.current_frame_size().filter(|_| model_ready) else {
      self.clear();
      return TickStart::Skipped;
    };

    self.fit_surface(width, height);
    self.surface.clear();
    self.idle = false;

    match capture.sample() {
      Some(Ok(frame)) => TickStart::Frame(frame),
      Some(Err(e)) => {
        warn!("采集帧失败: {}", e);
        self.detections = DetectResult::default();
        TickStart::NoFrame
      }
      None => TickStart::NoFrame,
    }
  }

  /// 用推理结果替换检测集合并绘制；推理失败按无检测处理
  pub fn finish_tick(&mut self, frame: Frame, result: Result<DetectResult, InferenceError>) -> usize {
    self.detections = result.unwrap_or_else(|e| {
      warn!("第 {} 帧推理失败，本轮不绘制: {}", frame.index, e);
      DetectResult::default()
    });

    let drawn = draw_annotations(&mut self.surface, &self.detections, &self.style);
    if let Err(e) = self.surface.present(&frame) {
      warn!("叠加层输出失败: {}", e);
    }
    self.last_frame = Some(frame);
    drawn
  }

  /// 单线程完成一整轮
  pub fn tick<L: ModelLoader>(
    &mut self,
    capture: &mut CaptureSource,
    detector: &DetectorAdapter<L>,
  ) -> TickOutcome {
    match self.begin_tick(capture, detector.is_ready()) {
      TickStart::Skipped => TickOutcome::Skipped,
      TickStart::NoFrame => TickOutcome::Rendered(0),
      TickStart::Frame(frame) => {
        let now = Instant::now();
        let result = detector.detect_frame(&frame);
        debug!("第 {} 帧推理耗时: {:.2?}", frame.index, now.elapsed());
        TickOutcome::Rendered(self.finish_tick(frame, result))
      }
    }
  }
}

/// 按刷新间隔调度渲染循环的线程句柄
///
/// 每轮结束后等待一个刷新间隔再调度下一轮；回调返回 false 时循环自行结束。
/// 句柄被丢弃时会发出取消信号，但不等待线程退出。
pub struct LoopHandle {
  cancel: Option<Sender<()>>,
  thread: Option<JoinHandle<()>>,
}

impl LoopHandle {
  pub fn spawn<F>(interval: Duration, mut tick: F) -> std::io::Result<Self>
  where
    F: FnMut() -> bool + Send + 'static,
  {
    let (tx, rx) = mpsc::channel();
    let thread = thread::Builder::new()
      .name("liaowang-render".to_string())
      .spawn(move || {
        info!("渲染循环启动，刷新间隔 {:.2?}", interval);
        let mut ticks = 0u64;
        loop {
          if !tick() {
            debug!("运行条件不再满足，停止调度");
            break;
          }
          ticks += 1;
          match rx.recv_timeout(interval) {
            Err(RecvTimeoutError::Timeout) => continue,
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
              debug!("渲染循环收到取消信号");
              break;
            }
          }
        }
        info!("渲染循环结束，共 {} 轮", ticks);
      })?;

    Ok(Self {
      cancel: Some(tx),
      thread: Some(thread),
    })
  }

  pub fn is_finished(&self) -> bool {
    self.thread.as_ref().is_none_or(|t| t.is_finished())
  }

  fn send_cancel(&mut self) {
    if let Some(cancel) = self.cancel.take() {
      let _ = cancel.send(());
    }
  }

  /// 取消下一轮调度，不等待进行中的一轮
  pub fn cancel(mut self) {
    self.send_cancel();
  }

  /// 取消并等待线程退出
  pub fn shutdown(mut self) {
    self.send_cancel();
    if let Some(thread) = self.thread.take()
      && thread.join().is_err()
    {
      warn!("渲染线程异常退出");
    }
  }
}

impl Drop for LoopHandle {
  fn drop(&mut self) {
    self.send_cancel();
  }
}
