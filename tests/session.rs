// 该文件是 Liaowang （瞭望） 项目的一部分。
// tests/session.rs - 会话行为测试
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
  sync::{
    Arc,
    atomic::{AtomicBool, AtomicUsize, Ordering},
  },
  thread,
  time::{Duration, Instant},
};

use image::RgbImage;
use thiserror::Error;

use liaowang::{
  detector::{LoadStatus, ModelStatus},
  input::{CaptureBackend, CaptureDevice, Constraints, DeviceError, Frame},
  model::{BoundingBox, DetectResult, Detection, Model, ModelLoader},
  output::{DrawCommand, OverlaySurface, Rect, RecordSurface},
  session::{Session, SessionConfig},
  task::TickOutcome,
};

#[derive(Clone, Default)]
struct Counters {
  opened: Arc<AtomicUsize>,
  released: Arc<AtomicUsize>,
  grabs: Arc<AtomicUsize>,
  deny: Arc<AtomicBool>,
}

struct FakeCamera {
  counters: Counters,
}

struct FakeDevice {
  counters: Counters,
  index: u64,
}

impl CaptureDevice for FakeDevice {
  fn width(&self) -> u32 {
    640
  }

  fn height(&self) -> u32 {
    480
  }

  fn grab(&mut self) -> Result<Frame, DeviceError> {
    self.counters.grabs.fetch_add(1, Ordering::SeqCst);
    self.index += 1;
    Ok(Frame {
      image: RgbImage::new(640, 480),
      index: self.index,
      timestamp_ms: 0,
    })
  }
}

impl Drop for FakeDevice {
  fn drop(&mut self) {
    self.counters.released.fetch_add(1, Ordering::SeqCst);
  }
}

impl CaptureBackend for FakeCamera {
  fn open(&self, _: &Constraints) -> Result<Box<dyn CaptureDevice>, DeviceError> {
    if self.counters.deny.load(Ordering::SeqCst) {
      return Err(DeviceError::PermissionDenied("/dev/video0".to_string()));
    }
    self.counters.opened.fetch_add(1, Ordering::SeqCst);
    Ok(Box::new(FakeDevice {
      counters: self.counters.clone(),
      index: 0,
    }))
  }
}

#[derive(Debug, Error)]
#[error("{0}")]
struct FakeError(&'static str);

struct FakeModel {
  fail: bool,
  panic_next: Arc<AtomicBool>,
  infers: Arc<AtomicUsize>,
}

impl Model for FakeModel {
  type Error = FakeError;

  fn infer(&self, _: &Frame) -> Result<DetectResult, FakeError> {
    self.infers.fetch_add(1, Ordering::SeqCst);
    if self.panic_next.swap(false, Ordering::SeqCst) {
      panic!("npu driver crashed");
    }
    if self.fail {
      return Err(FakeError("npu timeout"));
    }
    Ok(
      vec![Detection::new(
        "person",
        0.93,
        BoundingBox::new(10.0, 20.0, 100.0, 150.0),
      )]
      .into(),
    )
  }
}

#[derive(Clone, Default)]
struct FakeLoader {
  loads: Arc<AtomicUsize>,
  infers: Arc<AtomicUsize>,
  hold: Arc<AtomicBool>,
  fail_load: Arc<AtomicBool>,
  panic_next: Arc<AtomicBool>,
  fail_infer: bool,
}

impl ModelLoader for FakeLoader {
  type Model = FakeModel;
  type Error = FakeError;

  fn load(&self) -> Result<FakeModel, FakeError> {
    self.loads.fetch_add(1, Ordering::SeqCst);
    while self.hold.load(Ordering::SeqCst) {
      thread::sleep(Duration::from_millis(1));
    }
    if self.fail_load.load(Ordering::SeqCst) {
      return Err(FakeError("model file is corrupt"));
    }
    Ok(FakeModel {
      fail: self.fail_infer,
      panic_next: self.panic_next.clone(),
      infers: self.infers.clone(),
    })
  }
}

fn session_with(
  loader: FakeLoader,
  refresh_rate: f64,
) -> (Session<FakeLoader, RecordSurface>, Counters) {
  let counters = Counters::default();
  let session = Session::new(
    FakeCamera {
      counters: counters.clone(),
    },
    loader,
    RecordSurface::new(),
    SessionConfig {
      refresh_rate,
      ..Default::default()
    },
  );
  (session, counters)
}

fn wait_until(what: &str, mut condition: impl FnMut() -> bool) {
  let started = Instant::now();
  while !condition() {
    assert!(
      started.elapsed() < Duration::from_secs(5),
      "timed out waiting for {}",
      what
    );
    thread::sleep(Duration::from_millis(2));
  }
}

// 刷新间隔足够长，循环启动后只会执行第一轮
const SLOW: f64 = 0.001;
const FAST: f64 = 500.0;

#[test]
fn starting_a_640x480_device_sizes_the_overlay() {
  let (session, _) = session_with(FakeLoader::default(), SLOW);
  assert_eq!(session.start_capture().unwrap(), (640, 480));

  let status = session.status();
  assert!(status.capture_active);
  assert_eq!(status.model, ModelStatus::Unloaded);
  assert_eq!(session.with_render(|r| r.surface().size()), (640, 480));
  assert!(!session.is_looping());
}

#[test]
fn one_detection_draws_a_green_box_and_label() {
  let (session, _) = session_with(FakeLoader::default(), SLOW);
  session.start_capture().unwrap();
  assert_eq!(session.load_model().unwrap(), LoadStatus::Loaded);
  assert!(session.is_looping());

  wait_until("first tick", || session.status().detections == 1);
  let commands = session.with_render(|r| r.surface().commands().to_vec());
  assert_eq!(commands.len(), 2);
  assert_eq!(
    commands[0],
    DrawCommand::StrokeRect {
      rect: Rect {
        x: 10,
        y: 20,
        width: 100,
        height: 150,
      },
      color: [0, 255, 0],
      line_width: 2,
    }
  );
  match &commands[1] {
    DrawCommand::FillText { text, x, y, color } => {
      assert_eq!(text, "person (93.0%)");
      assert_eq!(*color, [0, 255, 0]);
      assert_eq!(*x, 10);
      assert!(*y >= 0);
    }
    other => panic!("expected a label, got {:?}", other),
  }
  session.shutdown();
}

#[test]
fn loop_starts_when_capture_comes_after_model() {
  let (session, _) = session_with(FakeLoader::default(), SLOW);
  session.load_model().unwrap();
  assert!(!session.is_looping());

  session.start_capture().unwrap();
  assert!(session.is_looping());
  wait_until("first tick", || session.status().detections == 1);
  session.shutdown();
}

#[test]
fn failed_model_load_is_reported_and_loop_never_starts() {
  let loader = FakeLoader::default();
  loader.fail_load.store(true, Ordering::SeqCst);
  let (session, _) = session_with(loader.clone(), FAST);
  session.start_capture().unwrap();

  let err = session.load_model().unwrap_err();
  assert!(err.to_string().starts_with("Failed to load AI model"));

  let status = session.status();
  assert_eq!(status.model, ModelStatus::Failed);
  assert!(
    status
      .last_error
      .as_deref()
      .is_some_and(|m| m.starts_with("Failed to load AI model"))
  );
  assert!(!session.is_looping());
  assert_eq!(session.tick(), TickOutcome::Skipped);

  // 通过重新加载恢复
  loader.fail_load.store(false, Ordering::SeqCst);
  session.reload_model().unwrap().join().unwrap();
  assert_eq!(session.status().model, ModelStatus::Ready);
  assert_eq!(session.status().last_error, None);
  assert!(session.is_looping());
  session.shutdown();
}

#[test]
fn inference_errors_are_silent_and_do_not_stop_the_loop() {
  let loader = FakeLoader {
    fail_infer: true,
    ..Default::default()
  };
  let (session, _) = session_with(loader.clone(), FAST);
  session.start_capture().unwrap();
  session.load_model().unwrap();

  wait_until("several ticks", || loader.infers.load(Ordering::SeqCst) >= 3);
  let status = session.status();
  assert_eq!(status.detections, 0);
  assert_eq!(status.last_error, None);
  assert!(session.is_looping());
  assert!(session.with_render(|r| r.surface().commands().is_empty()));
  session.shutdown();
}

#[test]
fn crashed_render_thread_is_replaced_on_next_start() {
  let loader = FakeLoader::default();
  loader.panic_next.store(true, Ordering::SeqCst);
  let (session, _) = session_with(loader.clone(), SLOW);
  session.start_capture().unwrap();
  session.load_model().unwrap();

  wait_until("render thread exit", || !session.is_looping());
  assert_eq!(session.status().detections, 0);

  session.start_capture().unwrap();
  assert!(session.is_looping());
  wait_until("first tick after restart", || {
    session.status().detections == 1
  });
  session.shutdown();
}

#[test]
fn stopping_capture_clears_detections_and_releases_device() {
  let (session, counters) = session_with(FakeLoader::default(), FAST);
  session.start_capture().unwrap();
  session.load_model().unwrap();
  wait_until("detections", || session.status().detections == 1);

  session.stop_capture();
  let status = session.status();
  assert_eq!(status.detections, 0);
  assert!(!status.capture_active);
  assert!(!session.is_looping());
  assert_eq!(counters.released.load(Ordering::SeqCst), 1);

  let grabs = counters.grabs.load(Ordering::SeqCst);
  thread::sleep(Duration::from_millis(30));
  assert_eq!(counters.grabs.load(Ordering::SeqCst), grabs);
  assert_eq!(session.tick(), TickOutcome::Skipped);
}

#[test]
fn capture_can_be_restarted_after_stop() {
  let (session, counters) = session_with(FakeLoader::default(), SLOW);
  session.load_model().unwrap();
  session.start_capture().unwrap();
  session.stop_capture();
  session.start_capture().unwrap();

  assert_eq!(counters.opened.load(Ordering::SeqCst), 2);
  assert!(session.is_looping());
  wait_until("detections", || session.status().detections == 1);
  session.shutdown();
}

#[test]
fn load_while_loading_runs_a_single_attempt() {
  let loader = FakeLoader::default();
  loader.hold.store(true, Ordering::SeqCst);
  let (session, _) = session_with(loader.clone(), SLOW);

  let first = session.reload_model().unwrap();
  wait_until("loading", || session.status().model == ModelStatus::Loading);
  assert!(session.reload_model().is_none());
  assert_eq!(session.load_model().unwrap(), LoadStatus::AlreadyLoading);

  loader.hold.store(false, Ordering::SeqCst);
  first.join().unwrap();
  assert_eq!(loader.loads.load(Ordering::SeqCst), 1);
  assert_eq!(session.status().model, ModelStatus::Ready);
}

#[test]
fn nothing_is_drawn_while_the_model_reloads() {
  let loader = FakeLoader::default();
  let (session, _) = session_with(loader.clone(), SLOW);
  session.start_capture().unwrap();
  session.load_model().unwrap();
  wait_until("detections", || session.status().detections == 1);

  loader.hold.store(true, Ordering::SeqCst);
  let reload = session.reload_model().unwrap();
  wait_until("loading", || session.status().model == ModelStatus::Loading);

  assert_eq!(session.tick(), TickOutcome::Skipped);
  assert_eq!(session.status().detections, 0);
  assert!(session.with_render(|r| r.surface().commands().is_empty()));

  loader.hold.store(false, Ordering::SeqCst);
  reload.join().unwrap();
  assert_eq!(session.tick(), TickOutcome::Rendered(1));
  assert_eq!(session.status().detections, 1);
  session.shutdown();
}

#[test]
fn denied_camera_is_reported_and_retryable() {
  let (session, counters) = session_with(FakeLoader::default(), SLOW);
  counters.deny.store(true, Ordering::SeqCst);

  assert!(matches!(
    session.start_capture(),
    Err(DeviceError::PermissionDenied(_))
  ));
  let status = session.status();
  assert!(!status.capture_active);
  assert!(
    status
      .last_error
      .as_deref()
      .is_some_and(|m| m.starts_with("Failed to access camera"))
  );

  counters.deny.store(false, Ordering::SeqCst);
  session.start_capture().unwrap();
  let status = session.status();
  assert!(status.capture_active);
  assert_eq!(status.last_error, None);
}

#[test]
fn dropping_the_session_releases_the_device() {
  let (session, counters) = session_with(FakeLoader::default(), FAST);
  session.start_capture().unwrap();
  session.load_model().unwrap();
  wait_until("detections", || session.status().detections == 1);

  drop(session);
  wait_until("device release", || {
    counters.released.load(Ordering::SeqCst) == 1
  });
  let grabs = counters.grabs.load(Ordering::SeqCst);
  thread::sleep(Duration::from_millis(30));
  assert_eq!(counters.grabs.load(Ordering::SeqCst), grabs);
}

#[test]
fn every_detection_gets_one_box_and_one_label() {
  let mut surface = RecordSurface::new();
  surface.resize(640, 480);
  let result: DetectResult = [
    ("person", 0.93, (10.0, 20.0, 100.0, 150.0)),
    ("dog", 0.456, (300.0, 0.0, 50.0, 50.0)),
    ("cup", 0.05, (630.0, 470.0, 10.0, 10.0)),
  ]
  .into_iter()
  .map(|(label, confidence, (x, y, w, h))| {
    Detection::new(label, confidence, BoundingBox::new(x, y, w, h))
  })
  .collect();

  let drawn = liaowang::output::draw::draw_annotations(
    &mut surface,
    &result,
    &liaowang::output::draw::DrawStyle::default(),
  );
  assert_eq!(drawn, 3);
  assert_eq!(surface.rects().count(), 3);
  assert_eq!(
    surface.texts().collect::<Vec<_>>(),
    vec!["person (93.0%)", "dog (45.6%)", "cup (5.0%)"]
  );
  for command in surface.commands() {
    if let DrawCommand::FillText { x, y, .. } = command {
      assert!((0..640).contains(x));
      assert!((0..480).contains(y));
    }
  }
}
