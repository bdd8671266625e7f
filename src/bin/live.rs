// 该文件是 Liaowang （瞭望） 项目的一部分。
// src/bin/live.rs - 实时摄像头检测程序
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
  io::BufRead,
  path::PathBuf,
  str::FromStr,
  sync::mpsc,
  thread,
  time::Duration,
};

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};
use url::Url;

use liaowang::{
  FromUrl,
  input::{Constraints, InputWrapper},
  model::ModelSource,
  output::OutputWrapper,
  session::{Session, SessionConfig},
};

const FORCE_EXIT_AFTER: Duration = Duration::from_secs(30);

/// Liaowang 实时检测参数配置
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 模型地址: yolo26:///path/model.rknn 或 replay:///path/detections.json
  #[arg(long, value_name = "MODEL")]
  pub model: Url,
  /// 摄像头: v4l:///dev/video0 或 image:///path/still.png
  #[arg(long, value_name = "SOURCE", default_value = "v4l:///dev/video0")]
  pub input: Url,
  /// 叠加层输出: log:, image:///path/out.png 或 folder:///dir[?always]
  #[arg(long, value_name = "OUTPUT", default_value = "log:")]
  pub output: Url,
  /// 请求的采集宽度
  #[arg(long, default_value_t = 640)]
  pub width: u32,
  /// 请求的采集高度
  #[arg(long, default_value_t = 480)]
  pub height: u32,
  /// 刷新频率 (Hz)
  #[arg(long, default_value_t = 60.0, value_name = "HZ")]
  pub refresh_rate: f64,
  /// 标签字体文件 (TTF/OTF)，默认使用内置等宽字体
  #[arg(long, value_name = "FILE")]
  pub font: Option<PathBuf>,
  /// 启动时立即打开摄像头并加载模型
  #[arg(long)]
  pub autostart: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
  Start,
  Stop,
  Reload,
  Status,
  Quit,
}

impl FromStr for Command {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.trim() {
      "start" => Ok(Command::Start),
      "stop" => Ok(Command::Stop),
      "reload" => Ok(Command::Reload),
      "status" => Ok(Command::Status),
      "quit" | "exit" => Ok(Command::Quit),
      other => Err(format!("未知命令: {}", other)),
    }
  }
}

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = Args::parse();

  info!("模型地址: {}", args.model);
  info!("输入来源: {}", args.input);
  info!("输出地址: {}", args.output);

  let input = InputWrapper::from_url(&args.input)?;
  let model = ModelSource::from_url(&args.model)?;
  let mut output = OutputWrapper::from_url(&args.output)?;
  if let Some(font) = &args.font {
    output
      .load_font(font)
      .with_context(|| format!("无法加载字体: {}", font.display()))?;
  }

  let config = SessionConfig {
    constraints: Constraints {
      width: args.width,
      height: args.height,
    },
    refresh_rate: args.refresh_rate,
    ..Default::default()
  };
  let session = Session::new(input, model, output, config);

  let (tx, rx) = mpsc::channel();

  let interrupt = tx.clone();
  ctrlc::set_handler(move || {
    info!("收到中断信号，准备退出...");
    let _ = interrupt.send(Command::Quit);
    thread::spawn(|| {
      thread::sleep(FORCE_EXIT_AFTER);
      warn!("强制退出程序");
      std::process::exit(1);
    });
  })
  .context("无法设置 Ctrl-C 处理函数")?;

  thread::Builder::new()
    .name("liaowang-console".to_string())
    .spawn(move || {
      for line in std::io::stdin().lock().lines() {
        let Ok(line) = line else {
          break;
        };
        if line.trim().is_empty() {
          continue;
        }
        match line.parse::<Command>() {
          Ok(command) => {
            if tx.send(command).is_err() {
              break;
            }
          }
          Err(e) => warn!("{}，可用命令: start, stop, reload, status, quit", e),
        }
      }
    })
    .context("无法启动控制台线程")?;

  if args.autostart {
    session.reload_model();
    if let Err(e) = session.start_capture() {
      warn!("自动启动摄像头失败: {}", e);
    }
  }

  info!("可用命令: start, stop, reload, status, quit");
  for command in rx {
    match command {
      Command::Start => match session.start_capture() {
        Ok((width, height)) => info!("摄像头已启动: {}x{}", width, height),
        Err(e) => warn!("摄像头启动失败: {}", e),
      },
      Command::Stop => session.stop_capture(),
      Command::Reload => {
        session.reload_model();
      }
      Command::Status => println!("{}", serde_json::to_string(&session.status())?),
      Command::Quit => break,
    }
  }

  session.shutdown();
  info!("任务完成，退出");
  Ok(())
}
