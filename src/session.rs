// 该文件是 Liaowang （瞭望） 项目的一部分。
// src/session.rs - 采集、模型与渲染循环的共享上下文
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

//! 会话持有采集状态、模型状态、渲染循环与用户可见的状态信息。
//!
//! 采集处于活动状态且模型就绪时，渲染循环自动启动（两者中后满足的一方触发）；
//! 任一条件失效时循环停止调度。停止采集或丢弃会话都会取消下一轮调度并释放设备。

use std::{
  sync::{Arc, Mutex, MutexGuard, PoisonError, Weak},
  thread::{self, JoinHandle},
  time::Duration,
};

use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::{
  detector::{DetectorAdapter, LoadStatus, ModelLoadError, ModelState, ModelStatus},
  input::{CaptureBackend, CaptureSource, Constraints, DeviceError},
  model::{DetectResult, ModelLoader},
  output::{OverlaySurface, draw::DrawStyle},
  task::{LoopHandle, RenderLoop, TickOutcome, TickStart},
};

const DEFAULT_REFRESH_RATE: f64 = 60.0;

#[derive(Debug, Clone)]
pub struct SessionConfig {
  pub constraints: Constraints,
  /// 刷新频率（Hz），决定两轮之间的等待间隔
  pub refresh_rate: f64,
  pub style: DrawStyle,
}

impl Default for SessionConfig {
  fn default() -> Self {
    Self {
      constraints: Constraints::default(),
      refresh_rate: DEFAULT_REFRESH_RATE,
      style: DrawStyle::default(),
    }
  }
}

impl SessionConfig {
  pub fn tick_interval(&self) -> Duration {
    let rate = if self.refresh_rate.is_finite() && self.refresh_rate > 0.0 {
      self.refresh_rate
    } else {
      DEFAULT_REFRESH_RATE
    };
    Duration::from_secs_f64(1.0 / rate)
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Status {
  pub model: ModelStatus,
  pub capture_active: bool,
  pub detections: usize,
  pub last_error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ErrorOrigin {
  Device,
  Model,
  Loop,
}

struct UserError {
  origin: ErrorOrigin,
  message: String,
}

struct Inner<S> {
  capture: CaptureSource,
  render: RenderLoop<S>,
  last_error: Option<UserError>,
  next_loop_id: u64,
  active_loop: Option<(u64, LoopHandle)>,
}

impl<S> Inner<S> {
  fn report(&mut self, origin: ErrorOrigin, message: String) {
    self.last_error = Some(UserError { origin, message });
  }

  /// 同类操作重试成功后清除对应的错误
  fn resolve(&mut self, origin: ErrorOrigin) {
    if self.last_error.as_ref().is_some_and(|e| e.origin == origin) {
      self.last_error = None;
    }
  }
}

struct Shared<L: ModelLoader, S> {
  detector: DetectorAdapter<L>,
  config: SessionConfig,
  inner: Mutex<Inner<S>>,
  tick_lock: Mutex<()>,
}

pub struct Session<L: ModelLoader, S> {
  shared: Arc<Shared<L, S>>,
}

impl<L: ModelLoader, S> Clone for Session<L, S> {
  fn clone(&self) -> Self {
    Self {
      shared: Arc::clone(&self.shared),
    }
  }
}

impl<L, S> Session<L, S>
where
  L: ModelLoader + 'static,
  S: OverlaySurface + 'static,
{
  pub fn new<B: CaptureBackend + 'static>(
    backend: B,
    loader: L,
    surface: S,
    config: SessionConfig,
  ) -> Self {
    let render = RenderLoop::new(surface).with_style(config.style.clone());
    Self {
      shared: Arc::new(Shared {
        detector: DetectorAdapter::new(loader),
        config,
        inner: Mutex::new(Inner {
          capture: CaptureSource::new(backend),
          render,
          last_error: None,
          next_loop_id: 0,
          active_loop: None,
        }),
        tick_lock: Mutex::new(()),
      }),
    }
  }

  fn inner(&self) -> MutexGuard<'_, Inner<S>> {
    self
      .shared
      .inner
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
  }

  pub fn start_capture(&self) -> Result<(u32, u32), DeviceError> {
    let mut inner = self.inner();
    match inner.capture.start(&self.shared.config.constraints) {
      Ok((width, height)) => {
        inner.render.fit_surface(width, height);
        inner.resolve(ErrorOrigin::Device);
        self.ensure_loop(&mut inner);
        Ok((width, height))
      }
      Err(e) => {
        error!("打开摄像头失败: {}", e);
        inner.report(ErrorOrigin::Device, format!("Failed to access camera: {}", e));
        Err(e)
      }
    }
  }

  pub fn stop_capture(&self) {
    let active = {
      let mut inner = self.inner();
      inner.capture.stop();
      inner.render.clear();
      inner.active_loop.take()
    };
    if let Some((loop_id, handle)) = active {
      debug!("取消渲染循环 #{}", loop_id);
      handle.cancel();
    }
  }

  /// 阻塞加载模型，成功后按需启动渲染循环
  pub fn load_model(&self) -> Result<LoadStatus, ModelLoadError> {
    match self.shared.detector.load() {
      Ok(LoadStatus::Loaded) => {
        let mut inner = self.inner();
        inner.resolve(ErrorOrigin::Model);
        self.ensure_loop(&mut inner);
        Ok(LoadStatus::Loaded)
      }
      Ok(LoadStatus::AlreadyLoading) => Ok(LoadStatus::AlreadyLoading),
      Err(e) => {
        self.inner().report(ErrorOrigin::Model, e.to_string());
        Err(e)
      }
    }
  }

  /// 在后台线程加载模型；已在加载中时不再启动新线程
  pub fn reload_model(&self) -> Option<JoinHandle<()>> {
    if self.shared.detector.state() == ModelState::Loading {
      info!("模型正在加载中，忽略重新加载请求");
      return None;
    }

    let session = self.clone();
    match thread::Builder::new()
      .name("liaowang-model".to_string())
      .spawn(move || {
        let _ = session.load_model();
      }) {
      Ok(handle) => Some(handle),
      Err(e) => {
        error!("无法启动模型加载线程: {}", e);
        self.inner().report(
          ErrorOrigin::Model,
          format!("Failed to load AI model: {}", e),
        );
        None
      }
    }
  }

  pub fn status(&self) -> Status {
    let model = self.shared.detector.state().status();
    let inner = self.inner();
    Status {
      model,
      capture_active: inner.capture.is_active(),
      detections: inner.render.detections().len(),
      last_error: inner.last_error.as_ref().map(|e| e.message.clone()),
    }
  }

  pub fn detections(&self) -> DetectResult {
    self.inner().render.detections().clone()
  }

  pub fn with_render<R>(&self, f: impl FnOnce(&RenderLoop<S>) -> R) -> R {
    f(&self.inner().render)
  }

  pub fn is_looping(&self) -> bool {
    self
      .inner()
      .active_loop
      .as_ref()
      .is_some_and(|(_, handle)| !handle.is_finished())
  }

  /// 执行一轮检测与绘制；推理期间不持有会话锁，同一时刻最多一次推理
  pub fn tick(&self) -> TickOutcome {
    let _serial = self
      .shared
      .tick_lock
      .lock()
      .unwrap_or_else(PoisonError::into_inner);

    let (frame, generation) = {
      let mut inner = self.inner();
      let ready = self.shared.detector.is_ready();
      let Inner {
        capture, render, ..
      } = &mut *inner;
      match render.begin_tick(capture, ready) {
        TickStart::Skipped => return TickOutcome::Skipped,
        TickStart::NoFrame => return TickOutcome::Rendered(0),
        TickStart::Frame(frame) => (frame, capture.generation()),
      }
    };

    let result = self.shared.detector.detect_frame(&frame);

    let mut inner = self.inner();
    if !inner.capture.is_active() || inner.capture.generation() != generation {
      debug!("采集状态已变化，丢弃第 {} 帧的推理结果", frame.index);
      return TickOutcome::Skipped;
    }
    TickOutcome::Rendered(inner.render.finish_tick(frame, result))
  }

  /// 停止采集并等待渲染线程退出
  pub fn shutdown(&self) {
    let active = {
      let mut inner = self.inner();
      inner.capture.stop();
      inner.render.clear();
      inner.active_loop.take()
    };
    if let Some((_, handle)) = active {
      handle.shutdown();
    }
    info!("会话已关闭");
  }

  fn ensure_loop(&self, inner: &mut Inner<S>) {
    // 渲染线程异常退出后句柄仍在，替换掉它
    if let Some((loop_id, handle)) = &inner.active_loop
      && handle.is_finished()
    {
      warn!("渲染循环 #{} 已意外退出", loop_id);
      inner.active_loop = None;
    }

    if inner.active_loop.is_some()
      || !inner.capture.is_active()
      || !self.shared.detector.is_ready()
    {
      return;
    }

    let loop_id = inner.next_loop_id;
    inner.next_loop_id += 1;
    let weak = Arc::downgrade(&self.shared);
    match LoopHandle::spawn(self.shared.config.tick_interval(), move || {
      Self::loop_tick(&weak, loop_id)
    }) {
      Ok(handle) => {
        debug!("启动渲染循环 #{}", loop_id);
        inner.active_loop = Some((loop_id, handle));
      }
      Err(e) => {
        error!("无法启动渲染线程: {}", e);
        inner.report(
          ErrorOrigin::Loop,
          format!("Failed to start detection loop: {}", e),
        );
      }
    }
  }

  /// 渲染线程的一轮；返回 false 表示不再调度
  fn loop_tick(weak: &Weak<Shared<L, S>>, loop_id: u64) -> bool {
    let Some(shared) = weak.upgrade() else {
      return false;
    };
    let session = Session { shared };
    session.tick();

    let mut inner = session.inner();
    let registered = matches!(&inner.active_loop, Some((id, _)) if *id == loop_id);
    let keep = registered && inner.capture.is_active() && session.shared.detector.is_ready();
    if registered && !keep {
      let finished = inner.active_loop.take();
      drop(inner);
      drop(finished);
    }
    keep
  }
}
