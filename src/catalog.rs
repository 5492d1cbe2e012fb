// 该文件是 Pici （批次） 项目的一部分。
// src/catalog.rs - 标签目录
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

use std::{collections::HashMap, path::Path};

use regex::Regex;
use thiserror::Error;
use tracing::{debug, info, warn};

/// 未在目录中找到的类别使用的标签
pub const UNKNOWN_LABEL: &str = "unknown";

// `{NL}` 替换为具体的换行符
const CATALOG_ITEM_PATTERN: &str = r#"item \{{NL}[ \t]*name: "(?P<name>.*)"{NL}[ \t]*id: (?P<id>\d+){NL}[ \t]*display_name: "(?P<display>.*)"{NL}[ \t]*\}"#;
const NEW_LINES: [&str; 2] = ["\n", "\r\n"];

#[derive(Error, Debug)]
pub enum CatalogError {
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("标签 id 无效: {0}")]
  ParseError(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogItem {
  pub id: i64,
  pub name: String,
  pub display_name: String,
}

/// id 到显示名称的只读映射，启动时加载一次
#[derive(Debug, Clone, Default)]
pub struct Catalog {
  items: HashMap<i64, CatalogItem>,
}

impl Catalog {
  pub fn load(path: impl AsRef<Path>) -> Result<Self, CatalogError> {
    let path = path.as_ref();
    info!("加载标签文件: {}", path.display());
    let text = std::fs::read_to_string(path)?;
    let catalog = Self::parse(&text)?;
    info!("标签加载完成，共 {} 项", catalog.len());
    Ok(catalog)
  }

  /// 先按 LF 匹配，一条都匹配不到时再按 CRLF 匹配。
  ///
  /// 重复 id 以最后一条为准。
  pub fn parse(text: &str) -> Result<Self, CatalogError> {
    let mut items = HashMap::new();
    if text.trim().is_empty() {
      return Ok(Self { items });
    }

    for new_line in NEW_LINES {
      let regex = item_regex(new_line);
      let mut matched = false;
      for captures in regex.captures_iter(text) {
        matched = true;
        let id = captures["id"]
          .parse::<i64>()
          .map_err(|e| CatalogError::ParseError(format!("{}: {}", &captures["id"], e)))?;
        let item = CatalogItem {
          id,
          name: captures["name"].to_string(),
          display_name: captures["display"].to_string(),
        };
        if let Some(previous) = items.insert(id, item) {
          warn!(
            "标签 id {} 重复，'{}' 被后出现的记录覆盖",
            id, previous.display_name
          );
        }
      }
      if matched {
        debug!("标签文件换行符: {:?}", new_line);
        break;
      }
    }

    Ok(Self { items })
  }

  pub fn lookup(&self, id: i64) -> Option<&CatalogItem> {
    self.items.get(&id)
  }

  /// 查找显示名称，未知 id 返回 [`UNKNOWN_LABEL`]
  pub fn label(&self, id: i64) -> &str {
    self
      .lookup(id)
      .map(|item| item.display_name.as_str())
      .unwrap_or(UNKNOWN_LABEL)
  }

  pub fn len(&self) -> usize {
    self.items.len()
  }

  pub fn is_empty(&self) -> bool {
    self.items.is_empty()
  }
}

fn item_regex(new_line: &str) -> Regex {
  let pattern = CATALOG_ITEM_PATTERN.replace("{NL}", &regex::escape(new_line));
  // 模式为常量，只有换行符不同
  Regex::new(&pattern).expect("标签匹配模式无效")
}
