// 该文件是 Tanjing （探镜） 项目的一部分。
// src/task.rs - 检测任务编排
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
  sync::mpsc::{self, Receiver, TryRecvError},
  thread::{self, JoinHandle},
};

use image::RgbImage;
use tracing::{debug, info, warn};

use crate::{
  detector::{Detector, DetectorError, SharedDetector},
  model::{Detection, Engine},
  output::Render,
};

pub trait Task<I, E, O>: Sized {
  type Error;
  fn run_task(self, input: I, detector: &mut Detector<E>, output: O) -> Result<(), Self::Error>;
}

/// 取输入的第一张图像完成一次检测并交给输出
pub struct OneShotTask;

impl<RE, I, E, O> Task<I, E, O> for OneShotTask
where
  RE: std::error::Error + Sync + Send + 'static,
  I: Iterator<Item = RgbImage>,
  E: Engine,
  O: Render<RgbImage, Vec<Detection>, Error = RE>,
{
  type Error = anyhow::Error;

  fn run_task(self, mut input: I, detector: &mut Detector<E>, output: O) -> Result<(), Self::Error> {
    info!("开始任务...");
    let frame = input.next().ok_or_else(|| anyhow::anyhow!("没有输入图像"))?;
    info!(
      "输入图像获取成功 ({}x{})，开始推理...",
      frame.width(),
      frame.height()
    );
    let now = std::time::Instant::now();
    let result = detector.detect(&frame)?;
    info!("推理完成，耗时: {:.2?}", now.elapsed());
    output.render_result(&frame, &result)?;
    info!("输出完成，耗时: {:.2?}", now.elapsed());

    Ok(())
  }
}

/// 在后台线程执行检测请求
///
/// 每个请求只交付一次结果，没有中间进度。请求之间通过 [`SharedDetector`]
/// 的锁串行访问引擎。
pub struct BackgroundTask<E> {
  detector: SharedDetector<E>,
}

impl<E: Engine + Send + 'static> BackgroundTask<E> {
  pub fn new(detector: impl Into<SharedDetector<E>>) -> Self {
    Self {
      detector: detector.into(),
    }
  }

  pub fn detector(&self) -> &SharedDetector<E> {
    &self.detector
  }

  pub fn submit(&self, image: RgbImage) -> PendingDetection {
    let (tx, rx) = mpsc::channel();
    let detector = self.detector.clone();
    let handle = thread::spawn(move || {
      let result = detector.detect(&image);
      if tx.send(result).is_err() {
        debug!("请求已被放弃，丢弃检测结果");
      }
    });

    PendingDetection { rx, handle }
  }
}

/// 尚未完成的检测请求，丢弃即放弃该请求
pub struct PendingDetection {
  rx: Receiver<Result<Vec<Detection>, DetectorError>>,
  handle: JoinHandle<()>,
}

impl PendingDetection {
  pub fn is_finished(&self) -> bool {
    self.handle.is_finished()
  }

  /// 非阻塞地取结果，尚未完成时返回 `None`
  ///
  /// 结果取走后再次调用会得到 [`DetectorError::TaskAborted`]。
  pub fn try_take(&self) -> Option<Result<Vec<Detection>, DetectorError>> {
    match self.rx.try_recv() {
      Ok(result) => Some(result),
      Err(TryRecvError::Empty) => None,
      Err(TryRecvError::Disconnected) => Some(Err(DetectorError::TaskAborted)),
    }
  }

  pub fn wait(self) -> Result<Vec<Detection>, DetectorError> {
    let result = self.rx.recv().unwrap_or(Err(DetectorError::TaskAborted));
    if self.handle.join().is_err() {
      warn!("后台检测线程异常退出");
    }
    result
  }
}

#[cfg(test)]
mod tests {
  use std::sync::{Arc, Mutex};

  use image::Rgb;

  use super::*;
  use crate::{
    detector::tests::{ScriptedEngine, two_boxes},
    model::ModelConfiguration,
  };

  #[derive(Default, Clone)]
  struct CollectOutput {
    seen: Arc<Mutex<Vec<(u32, u32, usize)>>>,
  }

  impl Render<RgbImage, Vec<Detection>> for CollectOutput {
    type Error = std::io::Error;

    fn render_result(&self, frame: &RgbImage, result: &Vec<Detection>) -> Result<(), Self::Error> {
      self
        .seen
        .lock()
        .unwrap()
        .push((frame.width(), frame.height(), result.len()));
      Ok(())
    }
  }

  #[test]
  fn one_shot_renders_first_image() {
    let mut detector = Detector::new(
      ScriptedEngine::new(two_boxes()),
      ModelConfiguration::default(),
    );
    let output = CollectOutput::default();
    let images = vec![
      RgbImage::from_pixel(30, 20, Rgb([1, 1, 1])),
      RgbImage::from_pixel(5, 5, Rgb([2, 2, 2])),
    ];

    OneShotTask
      .run_task(images.into_iter(), &mut detector, output.clone())
      .unwrap();

    assert_eq!(*output.seen.lock().unwrap(), vec![(30, 20, 2)]);
  }

  #[test]
  fn one_shot_without_input_fails() {
    let mut detector = Detector::new(
      ScriptedEngine::new(two_boxes()),
      ModelConfiguration::default(),
    );
    let result = OneShotTask.run_task(
      std::iter::empty::<RgbImage>(),
      &mut detector,
      CollectOutput::default(),
    );
    assert!(result.is_err());
  }

  #[test]
  fn background_matches_direct_call() {
    let image = RgbImage::from_pixel(1000, 500, Rgb([50, 60, 70]));
    let mut direct = Detector::new(
      ScriptedEngine::new(two_boxes()),
      ModelConfiguration::default(),
    );
    let expected = direct.detect(&image).unwrap();

    let task = BackgroundTask::new(Detector::new(
      ScriptedEngine::new(two_boxes()),
      ModelConfiguration::default(),
    ));
    let pending = task.submit(image);

    assert_eq!(pending.wait().unwrap(), expected);
  }

  #[test]
  fn background_reports_closed_engine() {
    let task = BackgroundTask::new(Detector::new(
      ScriptedEngine::new(two_boxes()),
      ModelConfiguration::default(),
    ));
    task.detector().close();

    let err = task
      .submit(RgbImage::from_pixel(2, 2, Rgb([0, 0, 0])))
      .wait()
      .unwrap_err();
    assert!(matches!(err, DetectorError::EngineClosed));
  }

  #[test]
  fn abandoned_request_does_not_poison_detector() {
    let task = BackgroundTask::new(Detector::new(
      ScriptedEngine::new(two_boxes()),
      ModelConfiguration::default(),
    ));

    drop(task.submit(RgbImage::from_pixel(8, 8, Rgb([3, 3, 3]))));
    let result = task
      .submit(RgbImage::from_pixel(8, 8, Rgb([3, 3, 3])))
      .wait()
      .unwrap();
    assert_eq!(result.len(), 2);
  }

  #[test]
  fn try_take_delivers_once() {
    let task = BackgroundTask::new(Detector::new(
      ScriptedEngine::new(two_boxes()),
      ModelConfiguration::default(),
    ));
    let pending = task.submit(RgbImage::from_pixel(4, 4, Rgb([0, 0, 0])));

    let first = loop {
      if let Some(result) = pending.try_take() {
        break result;
      }
      thread::yield_now();
    };
    assert_eq!(first.unwrap().len(), 2);
    while !pending.is_finished() {
      thread::yield_now();
    }
    assert!(matches!(
      pending.try_take(),
      Some(Err(DetectorError::TaskAborted))
    ));
  }
}
