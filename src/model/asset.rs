// 该文件是 Tanjing （探镜） 项目的一部分。
// src/model/asset.rs - 模型资源与缓存
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
  fs::File,
  io::{self, Read},
  path::{Path, PathBuf},
};

use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Error, Debug)]
pub enum AssetError {
  #[error("模型资源不存在: {0}, 错误: {1}")]
  NotFound(String, io::Error),
  #[error("模型资源为空: {0}")]
  Empty(String),
  #[error("I/O 错误: {0}")]
  IoError(#[from] io::Error),
}

/// 打包在应用内的只读资源
pub trait AssetStore {
  fn open(&self, name: &str) -> io::Result<Box<dyn Read + '_>>;
}

/// 以目录作为资源来源
#[derive(Debug, Clone)]
pub struct DirectoryAssets {
  root: PathBuf,
}

impl DirectoryAssets {
  pub fn new(root: impl Into<PathBuf>) -> Self {
    Self { root: root.into() }
  }

  pub fn root(&self) -> &Path {
    &self.root
  }
}

impl AssetStore for DirectoryAssets {
  fn open(&self, name: &str) -> io::Result<Box<dyn Read + '_>> {
    let file = File::open(self.root.join(name))?;
    Ok(Box::new(file))
  }
}

/// 把模型资源落地到文件系统，供推理引擎按路径加载
///
/// 缓存文件存在时直接复用，不再校验内容。
#[derive(Debug, Clone)]
pub struct ModelCache {
  directory: PathBuf,
}

impl ModelCache {
  pub fn new(directory: impl Into<PathBuf>) -> Self {
    Self {
      directory: directory.into(),
    }
  }

  pub fn path_of(&self, cache_name: &str) -> PathBuf {
    self.directory.join(cache_name)
  }

  pub fn materialize<A: AssetStore + ?Sized>(
    &self,
    assets: &A,
    asset_name: &str,
    cache_name: &str,
  ) -> Result<PathBuf, AssetError> {
    let path = self.path_of(cache_name);
    if path.is_file() {
      debug!("复用模型缓存: {}", path.display());
      return Ok(path);
    }

    info!("缓存模型资源 {} 到 {}", asset_name, path.display());
    let mut reader = assets
      .open(asset_name)
      .map_err(|e| AssetError::NotFound(asset_name.to_string(), e))?;

    std::fs::create_dir_all(&self.directory)?;
    // 先写入临时文件再重命名，中途失败不会留下半截缓存
    let partial = self.directory.join(format!("{}.partial", cache_name));
    let copied = File::create(&partial).and_then(|mut file| io::copy(&mut reader, &mut file));
    let written = match copied {
      Ok(written) => written,
      Err(e) => {
        warn!("复制模型资源 {} 失败: {}", asset_name, e);
        let _ = std::fs::remove_file(&partial);
        return Err(AssetError::IoError(e));
      }
    };

    if written == 0 {
      warn!("模型资源 {} 为空", asset_name);
      std::fs::remove_file(&partial)?;
      return Err(AssetError::Empty(asset_name.to_string()));
    }

    std::fs::rename(&partial, &path)?;
    debug!(
      "模型缓存大小: {:.2} MB",
      written as f64 / (1024.0 * 1024.0)
    );
    Ok(path)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn assets_with(name: &str, content: &[u8]) -> (tempfile::TempDir, DirectoryAssets) {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join(name), content).unwrap();
    let assets = DirectoryAssets::new(dir.path());
    (dir, assets)
  }

  #[test]
  fn copies_asset_on_first_use() {
    let (_src, assets) = assets_with("model.onnx", b"weights");
    let cache_dir = tempfile::tempdir().unwrap();
    let cache = ModelCache::new(cache_dir.path().join("nested"));

    let path = cache
      .materialize(&assets, "model.onnx", "modelCache.onnx")
      .unwrap();

    assert_eq!(path, cache.path_of("modelCache.onnx"));
    assert_eq!(std::fs::read(&path).unwrap(), b"weights");
    assert!(!cache.path_of("modelCache.onnx.partial").exists());
  }

  #[test]
  fn reuses_existing_cache() {
    let (src, assets) = assets_with("model.onnx", b"first");
    let cache_dir = tempfile::tempdir().unwrap();
    let cache = ModelCache::new(cache_dir.path());

    let first = cache
      .materialize(&assets, "model.onnx", "modelCache.onnx")
      .unwrap();
    std::fs::write(src.path().join("model.onnx"), b"second").unwrap();
    let second = cache
      .materialize(&assets, "model.onnx", "modelCache.onnx")
      .unwrap();

    assert_eq!(first, second);
    assert_eq!(std::fs::read(&second).unwrap(), b"first");
  }

  #[test]
  fn missing_asset_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    let assets = DirectoryAssets::new(dir.path());
    let cache = ModelCache::new(dir.path().join("cache"));

    let err = cache
      .materialize(&assets, "absent.onnx", "modelCache.onnx")
      .unwrap_err();
    assert!(matches!(err, AssetError::NotFound(name, _) if name == "absent.onnx"));
    assert!(!cache.path_of("modelCache.onnx").exists());
  }

  /// 先给出部分数据再报错的资源
  struct TruncatedAssets;

  impl AssetStore for TruncatedAssets {
    fn open(&self, _name: &str) -> io::Result<Box<dyn Read + '_>> {
      let failing = io::repeat(7).take(16).chain(FailingReader);
      Ok(Box::new(failing))
    }
  }

  struct FailingReader;

  impl Read for FailingReader {
    fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
      Err(io::Error::new(io::ErrorKind::UnexpectedEof, "asset truncated"))
    }
  }

  #[test]
  fn failed_copy_leaves_no_partial_file() {
    let cache_dir = tempfile::tempdir().unwrap();
    let cache = ModelCache::new(cache_dir.path());

    let err = cache
      .materialize(&TruncatedAssets, "model.onnx", "modelCache.onnx")
      .unwrap_err();
    assert!(matches!(err, AssetError::IoError(_)));
    assert!(!cache.path_of("modelCache.onnx").exists());
    assert!(!cache.path_of("modelCache.onnx.partial").exists());
  }

  #[test]
  fn empty_asset_is_rejected() {
    let (_src, assets) = assets_with("model.onnx", b"");
    let cache_dir = tempfile::tempdir().unwrap();
    let cache = ModelCache::new(cache_dir.path());

    let err = cache
      .materialize(&assets, "model.onnx", "modelCache.onnx")
      .unwrap_err();
    assert!(matches!(err, AssetError::Empty(_)));
    assert!(!cache.path_of("modelCache.onnx").exists());
    assert!(!cache.path_of("modelCache.onnx.partial").exists());
  }
}
