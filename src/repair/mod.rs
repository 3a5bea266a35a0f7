pub mod profiles;

pub use profiles::{ProfileRegistry, RepairProfile};

use crate::error::RepairError;
use crate::logging::LogContext;
use std::collections::HashMap;

/// 字符修复引擎
///
/// 把旧字体映射造成的错误字形换回正确的 Unicode 字符。
/// 多个修复表按给定顺序合并：排在前面的表（专用表）优先，
/// 后面的表（通用符号表）只补充前面没有的键。
///
/// 构建后不可变，可以在线程间共享。
#[derive(Debug, Clone)]
pub struct CharacterRepairEngine {
    /// 合并后的映射：损坏码位 -> 替换文本
    table: HashMap<char, String>,
    /// 参与合并的表名，按优先级排列
    profiles: Vec<String>,
    log: LogContext,
}

impl CharacterRepairEngine {
    /// 按优先级合并多个修复表
    ///
    /// # 参数
    /// - `profiles`: 修复表列表，越靠前优先级越高
    ///
    /// # 返回
    /// 如果某个替换结果里包含另一个映射的源码位，返回 `ChainedMapping`，
    /// 因为那样的表重复应用会得到不同结果
    pub fn new(profiles: &[&RepairProfile]) -> Result<Self, RepairError> {
        let mut table: HashMap<char, String> = HashMap::new();
        for profile in profiles {
            for (source, target) in &profile.mappings {
                table.entry(*source).or_insert_with(|| target.clone());
            }
        }

        for (source, target) in &table {
            if target.chars().any(|c| table.contains_key(&c)) {
                return Err(RepairError::ChainedMapping {
                    source_char: *source,
                    target: target.clone(),
                });
            }
        }

        Ok(Self {
            table,
            profiles: profiles.iter().map(|p| p.name.clone()).collect(),
            log: LogContext::new("shastra::repair"),
        })
    }

    /// 从注册表按名称选取修复表
    pub fn from_registry(registry: &ProfileRegistry, names: &[String]) -> Result<Self, RepairError> {
        let profiles = names
            .iter()
            .map(|name| registry.get(name))
            .collect::<Result<Vec<_>, _>>()?;
        Self::new(&profiles)
    }

    /// 使用内置的默认修复表（legacy-diacritics + common-symbols）
    pub fn with_defaults() -> Result<Self, RepairError> {
        let registry = ProfileRegistry::with_bundled()?;
        Self::from_registry(
            &registry,
            &["legacy-diacritics".to_string(), "common-symbols".to_string()],
        )
    }

    /// 修复文本
    ///
    /// 单次遍历，未映射的字符原样保留。
    pub fn repair(&self, text: &str) -> String {
        if !text.chars().any(|c| self.table.contains_key(&c)) {
            return text.to_string();
        }

        let mut out = String::with_capacity(text.len());
        let mut replaced = 0usize;
        for c in text.chars() {
            match self.table.get(&c) {
                Some(target) => {
                    out.push_str(target);
                    replaced += 1;
                }
                None => out.push(c),
            }
        }

        log::trace!(target: self.log.target(), "repaired {} characters", replaced);
        out
    }

    /// 参与合并的表名
    pub fn profiles(&self) -> &[String] {
        &self.profiles
    }

    /// 合并后的映射条目数
    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }
}
