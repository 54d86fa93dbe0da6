// 该文件是 Niuheng （牛衡） 项目的一部分。
// src/model/slot.rs - 可安全释放的模型句柄
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

use std::sync::{
  Mutex, MutexGuard, PoisonError,
  atomic::{AtomicBool, Ordering},
};

use tracing::{info, warn};

use crate::error::CoreError;

/// 独占持有一个模型后端。
///
/// 推理与释放争用同一把锁：`release` 先置位释放标记，再在锁内取走后端，
/// 因此正在进行的推理会先完成，之后的推理都会看到标记并返回 [`CoreError::Released`]。
pub struct ModelSlot<B> {
  name: &'static str,
  backend: Mutex<Option<B>>,
  released: AtomicBool,
}

impl<B> ModelSlot<B> {
  pub fn new(name: &'static str, backend: B) -> Self {
    Self {
      name,
      backend: Mutex::new(Some(backend)),
      released: AtomicBool::new(false),
    }
  }

  pub fn name(&self) -> &'static str {
    self.name
  }

  pub fn is_released(&self) -> bool {
    self.released.load(Ordering::Acquire)
  }

  fn lock(&self) -> MutexGuard<'_, Option<B>> {
    // 推理线程 panic 后后端状态仍然可用
    self.backend.lock().unwrap_or_else(PoisonError::into_inner)
  }

  /// 在锁内使用后端
  pub fn with<R>(&self, f: impl FnOnce(&mut B) -> Result<R, CoreError>) -> Result<R, CoreError> {
    if self.is_released() {
      warn!("{} 已释放，跳过推理", self.name);
      return Err(CoreError::Released);
    }

    let mut guard = self.lock();
    // 等锁期间可能已被释放
    match guard.as_mut() {
      Some(backend) if !self.is_released() => f(backend),
      _ => {
        warn!("{} 在推理准备期间被释放", self.name);
        Err(CoreError::Released)
      }
    }
  }

  /// 释放后端，可重复调用
  pub fn release(&self) {
    self.released.store(true, Ordering::Release);
    let backend = self.lock().take();
    if backend.is_some() {
      info!("{} 已释放", self.name);
    }
    drop(backend);
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::{
    sync::{Arc, Barrier},
    thread,
    time::Duration,
  };

  #[test]
  fn released_slot_refuses_work() {
    let slot = ModelSlot::new("test", 41);
    assert_eq!(slot.with(|v| Ok(*v + 1)), Ok(42));

    slot.release();
    slot.release();
    assert!(slot.is_released());
    assert_eq!(slot.with(|v| Ok(*v + 1)), Err(CoreError::Released));
  }

  #[test]
  fn release_waits_for_in_flight_inference() {
    let slot = Arc::new(ModelSlot::new("test", vec![1u8, 2, 3]));
    let barrier = Arc::new(Barrier::new(2));

    let worker = {
      let slot = slot.clone();
      let barrier = barrier.clone();
      thread::spawn(move || {
        slot.with(|backend| {
          barrier.wait();
          thread::sleep(Duration::from_millis(50));
          Ok(backend.iter().map(|v| *v as u32).sum::<u32>())
        })
      })
    };

    barrier.wait();
    slot.release();

    assert_eq!(worker.join().unwrap(), Ok(6));
    assert_eq!(slot.with(|b| Ok(b.len())), Err(CoreError::Released));
  }
}
