// 该文件是 Liaowang （瞭望） 项目的一部分。
// src/lib.rs - 库主文件
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

use thiserror::Error;

pub mod detector;
pub mod input;
pub mod model;
pub mod output;
pub mod session;
pub mod task;

pub trait FromUrl {
  type Error;
  fn from_url(url: &url::Url) -> Result<Self, Self::Error>
  where
    Self: Sized;
}

pub trait FromUrlWithScheme: FromUrl {
  const SCHEME: &'static str;
}

#[derive(Error, Debug)]
pub enum UrlError {
  #[error("URI 方案不匹配: 期望 '{expected}', 实际 '{found}'")]
  SchemeMismatch {
    expected: &'static str,
    found: String,
  },
  #[error("不支持的 URI 方案: {0}")]
  UnsupportedScheme(String),
  #[error("URI 路径无效: {0}")]
  InvalidPath(String),
  #[error("URI 参数无效: {0}")]
  InvalidQuery(String),
}

impl UrlError {
  pub(crate) fn check_scheme(url: &url::Url, expected: &'static str) -> Result<(), Self> {
    if url.scheme() == expected {
      Ok(())
    } else {
      Err(UrlError::SchemeMismatch {
        expected,
        found: url.scheme().to_string(),
      })
    }
  }
}

/// 取出 URL 中经过百分号解码的路径，空路径视为无效
pub(crate) fn decoded_path(url: &url::Url) -> Result<String, UrlError> {
  let path = urlencoding::decode(url.path())
    .map_err(|e| UrlError::InvalidPath(format!("{}: {}", url.path(), e)))?;
  if path.is_empty() {
    return Err(UrlError::InvalidPath(url.to_string()));
  }
  Ok(path.into_owned())
}
