// 该文件是 Liaowang （瞭望） 项目的一部分。
// src/detector.rs - 检测器适配层（模型生命周期）
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
  fmt,
  sync::{Arc, Mutex, MutexGuard, PoisonError},
  time::Instant,
};

use serde::Serialize;
use thiserror::Error;
use tracing::{error, info};

use crate::{
  input::Frame,
  model::{DetectResult, Model, ModelLoader},
};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelState {
  Unloaded,
  Loading,
  Ready,
  Failed(String),
}

/// 对外展示的模型状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelStatus {
  Unloaded,
  Loading,
  Ready,
  Failed,
}

impl ModelState {
  pub fn status(&self) -> ModelStatus {
    match self {
      ModelState::Unloaded => ModelStatus::Unloaded,
      ModelState::Loading => ModelStatus::Loading,
      ModelState::Ready => ModelStatus::Ready,
      ModelState::Failed(_) => ModelStatus::Failed,
    }
  }
}

impl fmt::Display for ModelStatus {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let name = match self {
      ModelStatus::Unloaded => "unloaded",
      ModelStatus::Loading => "loading",
      ModelStatus::Ready => "ready",
      ModelStatus::Failed => "failed",
    };
    f.write_str(name)
  }
}

#[derive(Error, Debug)]
#[error("Failed to load AI model: {cause}")]
pub struct ModelLoadError {
  cause: BoxError,
}

impl ModelLoadError {
  pub fn new(cause: impl Into<BoxError>) -> Self {
    Self {
      cause: cause.into(),
    }
  }
}

#[derive(Error, Debug)]
pub enum InferenceError {
  #[error("模型尚未就绪")]
  NotReady,
  #[error("推理失败: {0}")]
  Failed(BoxError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadStatus {
  Loaded,
  AlreadyLoading,
}

struct Slot<M> {
  state: ModelState,
  model: Option<Arc<M>>,
}

/// 包装不透明的模型，负责加载状态与单帧推理
pub struct DetectorAdapter<L: ModelLoader> {
  loader: L,
  slot: Mutex<Slot<L::Model>>,
}

impl<L: ModelLoader> DetectorAdapter<L> {
  pub fn new(loader: L) -> Self {
    Self {
      loader,
      slot: Mutex::new(Slot {
        state: ModelState::Unloaded,
        model: None,
      }),
    }
  }

  fn slot(&self) -> MutexGuard<'_, Slot<L::Model>> {
    self.slot.lock().unwrap_or_else(PoisonError::into_inner)
  }

  pub fn state(&self) -> ModelState {
    self.slot().state.clone()
  }

  pub fn is_ready(&self) -> bool {
    self.slot().state == ModelState::Ready
  }

  /// 阻塞加载模型；加载进行中时再次调用直接返回，不会排队
  pub fn load(&self) -> Result<LoadStatus, ModelLoadError> {
    {
      let mut slot = self.slot();
      if slot.state == ModelState::Loading {
        info!("模型正在加载中，忽略本次加载请求");
        return Ok(LoadStatus::AlreadyLoading);
      }
      slot.state = ModelState::Loading;
      slot.model = None;
    }

    info!("开始加载模型...");
    let now = Instant::now();
    let result = self.loader.load();
    let elapsed = now.elapsed();

    let mut slot = self.slot();
    match result {
      Ok(model) => {
        slot.model = Some(Arc::new(model));
        slot.state = ModelState::Ready;
        info!("模型加载完成，耗时: {:.2?}", elapsed);
        Ok(LoadStatus::Loaded)
      }
      Err(e) => {
        let err = ModelLoadError::new(e);
        slot.state = ModelState::Failed(err.to_string());
        error!("模型加载失败，耗时: {:.2?}: {}", elapsed, err);
        Err(err)
      }
    }
  }

  /// 单帧推理；推理期间不持有状态锁
  pub fn detect_frame(&self, frame: &Frame) -> Result<DetectResult, InferenceError> {
    let model = {
      let slot = self.slot();
      match (&slot.state, &slot.model) {
        (ModelState::Ready, Some(model)) => model.clone(),
        _ => return Err(InferenceError::NotReady),
      }
    };

    model
      .infer(frame)
      .map_err(|e| InferenceError::Failed(Box::new(e)))
  }
}
