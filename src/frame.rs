// 该文件是 Pici （批次） 项目的一部分。
// src/frame.rs - NHWC 批量帧定义
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

pub const RGB_CHANNELS: usize = 3;

pub trait AsNhwcBatch {
  /// `[N, H, W, C]`，其中 N 为有效（存活）图像数
  fn shape(&self) -> [usize; 4];
  fn as_nhwc(&self) -> &[u8];
}

/// 批量输入张量。
///
/// 只分配一次，按 `槽位序号 × 单图字节数` 切分成互不重叠的槽位，
/// 在批次之间反复覆写复用。解码任务各自独占一个槽位，无需加锁。
#[derive(Debug, Clone)]
pub struct BatchFrame {
  data: Box<[u8]>,
  image_size: usize,
  channels: usize,
  capacity: usize,
  survivors: usize,
}

impl BatchFrame {
  pub fn new(image_size: usize, capacity: usize) -> Self {
    Self::with_channels(image_size, RGB_CHANNELS, capacity)
  }

  pub fn with_channels(image_size: usize, channels: usize, capacity: usize) -> Self {
    let size = capacity * image_size * image_size * channels;
    Self {
      data: vec![0u8; size].into_boxed_slice(),
      image_size,
      channels,
      capacity,
      survivors: 0,
    }
  }

  pub fn image_size(&self) -> usize {
    self.image_size
  }

  pub fn channels(&self) -> usize {
    self.channels
  }

  pub fn capacity(&self) -> usize {
    self.capacity
  }

  /// 单张图像占用的字节数
  pub fn slot_len(&self) -> usize {
    self.image_size * self.image_size * self.channels
  }

  pub fn survivor_count(&self) -> usize {
    self.survivors
  }

  /// 前 `count` 个槽位的可写视图，长度为 `count × slot_len`。
  ///
  /// 调用后存活数归零，直到 [`BatchFrame::compact`] 重新确定。
  ///
  /// # Panics
  ///
  /// `count` 超过批次容量时 panic。
  pub fn slots_mut(&mut self, count: usize) -> &mut [u8] {
    if count > self.capacity {
      panic!(
        "批次大小超出容量: 期望不超过 {}, 实际 {}",
        self.capacity, count
      );
    }
    self.survivors = 0;
    let len = count * self.slot_len();
    &mut self.data[..len]
  }

  pub fn slot(&self, index: usize) -> &[u8] {
    let len = self.slot_len();
    &self.data[index * len..(index + 1) * len]
  }

  /// 压紧：将成功槽位按原顺序前移到 `0..存活数`，返回存活数。
  ///
  /// 失败槽位留下的空洞不会出现在送入推理的张量中。
  pub fn compact(&mut self, succeeded: &[bool]) -> usize {
    let len = self.slot_len();
    let mut next = 0;
    for (index, &ok) in succeeded.iter().enumerate() {
      if !ok {
        continue;
      }
      if index != next {
        self
          .data
          .copy_within(index * len..(index + 1) * len, next * len);
      }
      next += 1;
    }
    self.survivors = next;
    next
  }
}

impl AsNhwcBatch for BatchFrame {
  fn shape(&self) -> [usize; 4] {
    [self.survivors, self.image_size, self.image_size, self.channels]
  }

  fn as_nhwc(&self) -> &[u8] {
    &self.data[..self.survivors * self.slot_len()]
  }
}
