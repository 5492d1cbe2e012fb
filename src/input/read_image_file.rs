// 该文件是 Pici （批次） 项目的一部分。
// src/input/read_image_file.rs - 图像文件读取与归一化
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

use std::path::Path;

use image::{ImageBuffer, Pixel, imageops::FilterType};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DecodeError {
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("图像解码错误: {0}")]
  ImageLoadError(#[from] image::ImageError),
  #[error("不支持的通道数: {0}")]
  UnsupportedChannels(usize),
  #[error("槽位大小不匹配: 期望 {expected}, 实际 {actual}")]
  SlotSizeMismatch { expected: usize, actual: usize },
}

/// 读取整个文件并写入 `slot`
pub fn read_image_into(path: &Path, size: u32, slot: &mut [u8]) -> Result<(), DecodeError> {
  let bytes = std::fs::read(path)?;
  decode_into(&bytes, size, slot)
}

/// 解码、双线性缩放到 `size × size`，按 HWC 交错写入 `slot`。
///
/// 通道数由槽位长度推出：1 为灰度，3 为 RGB，4 为 RGBA。
/// `image` 解码结果本身就是 RGB 顺序，不需要 BGR 转换。
pub fn decode_into(bytes: &[u8], size: u32, slot: &mut [u8]) -> Result<(), DecodeError> {
  let pixels = (size as usize) * (size as usize);
  if pixels == 0 || slot.len() % pixels != 0 {
    return Err(DecodeError::SlotSizeMismatch {
      expected: pixels,
      actual: slot.len(),
    });
  }

  let image = image::load_from_memory(bytes)?;
  match slot.len() / pixels {
    1 => resize_into(image.to_luma8(), size, slot),
    3 => resize_into(image.to_rgb8(), size, slot),
    4 => resize_into(image.to_rgba8(), size, slot),
    channels => Err(DecodeError::UnsupportedChannels(channels)),
  }
}

fn resize_into<P>(image: ImageBuffer<P, Vec<u8>>, size: u32, slot: &mut [u8]) -> Result<(), DecodeError>
where
  P: Pixel<Subpixel = u8> + 'static,
{
  let resized = if image.dimensions() == (size, size) {
    image
  } else {
    image::imageops::resize(&image, size, size, FilterType::Triangle)
  };

  let raw = resized.as_raw();
  if raw.len() != slot.len() {
    return Err(DecodeError::SlotSizeMismatch {
      expected: slot.len(),
      actual: raw.len(),
    });
  }
  slot.copy_from_slice(raw);
  Ok(())
}
