use crate::error::RepairError;
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::Path;

/// 内置修复表（数据文件，编译时嵌入）
const BUNDLED_PROFILES: &[&str] = &[
    include_str!("../../data/repair_profiles/legacy-diacritics.json"),
    include_str!("../../data/repair_profiles/scanned-latin1.json"),
    include_str!("../../data/repair_profiles/common-symbols.json"),
];

/// 修复表文件格式
#[derive(Debug, Deserialize)]
struct ProfileFile {
    name: String,
    #[serde(default)]
    description: String,
    mappings: BTreeMap<String, String>,
}

/// 修复表
///
/// 针对一种损坏来源的字符替换表：一个损坏码位 -> 零个或多个正确码位。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepairProfile {
    pub name: String,
    pub description: String,
    pub mappings: BTreeMap<char, String>,
}

impl RepairProfile {
    /// 从 JSON 文本解析修复表
    ///
    /// 键必须是单个码位；恒等映射会被丢弃。
    pub fn from_json(json: &str) -> Result<Self, RepairError> {
        let file: ProfileFile =
            serde_json::from_str(json).map_err(|e| RepairError::Parse(e.to_string()))?;

        let mut mappings = BTreeMap::new();
        for (key, value) in file.mappings {
            let mut chars = key.chars();
            let source = match (chars.next(), chars.next()) {
                (Some(c), None) => c,
                _ => return Err(RepairError::InvalidKey(key)),
            };
            if value.chars().eq(std::iter::once(source)) {
                continue;
            }
            mappings.insert(source, value);
        }

        Ok(Self {
            name: file.name,
            description: file.description,
            mappings,
        })
    }

    /// 由内存中的映射构建修复表（测试和临时表使用）
    pub fn from_pairs<I, S>(name: &str, pairs: I) -> Self
    where
        I: IntoIterator<Item = (char, S)>,
        S: Into<String>,
    {
        let mappings = pairs
            .into_iter()
            .map(|(c, s)| (c, s.into()))
            .filter(|(c, s)| !s.chars().eq(std::iter::once(*c)))
            .collect();

        Self {
            name: name.to_string(),
            description: String::new(),
            mappings,
        }
    }

    pub fn len(&self) -> usize {
        self.mappings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mappings.is_empty()
    }
}

/// 修复表注册表
///
/// 名称 -> 修复表。内置表之外可以从目录加载额外的 `*.json` 表，
/// 同名表以后加载的为准。
#[derive(Debug, Clone, Default)]
pub struct ProfileRegistry {
    profiles: HashMap<String, RepairProfile>,
}

impl ProfileRegistry {
    /// 创建空注册表
    pub fn new() -> Self {
        Self::default()
    }

    /// 创建包含全部内置修复表的注册表
    pub fn with_bundled() -> Result<Self, RepairError> {
        let mut registry = Self::new();
        for json in BUNDLED_PROFILES {
            registry.register(RepairProfile::from_json(json)?);
        }
        Ok(registry)
    }

    /// 注册修复表
    pub fn register(&mut self, profile: RepairProfile) {
        self.profiles.insert(profile.name.clone(), profile);
    }

    /// 从目录加载所有 `*.json` 修复表
    ///
    /// # 返回
    /// 成功加载的表数量
    pub fn load_dir(&mut self, dir: &Path) -> Result<usize, RepairError> {
        let entries = fs::read_dir(dir).map_err(|e| RepairError::Parse(format!("{}: {}", dir.display(), e)))?;

        let mut loaded = 0;
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().and_then(|s| s.to_str()) != Some("json") {
                continue;
            }
            let json = fs::read_to_string(&path)
                .map_err(|e| RepairError::Parse(format!("{}: {}", path.display(), e)))?;
            self.register(RepairProfile::from_json(&json)?);
            loaded += 1;
        }

        Ok(loaded)
    }

    /// 按名称查找修复表
    pub fn get(&self, name: &str) -> Result<&RepairProfile, RepairError> {
        self.profiles
            .get(name)
            .ok_or_else(|| RepairError::UnknownProfile(name.to_string()))
    }

    /// 已注册的表名（排序）
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.profiles.keys().cloned().collect();
        names.sort();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_bundled_profiles_parse() {
        let registry = ProfileRegistry::with_bundled().unwrap();
        assert_eq!(
            registry.names(),
            vec!["common-symbols", "legacy-diacritics", "scanned-latin1"]
        );
        assert!(registry.get("legacy-diacritics").unwrap().len() > 30);
    }

    #[test]
    fn test_combining_marks_map_to_empty() {
        let registry = ProfileRegistry::with_bundled().unwrap();
        let legacy = registry.get("legacy-diacritics").unwrap();
        assert_eq!(legacy.mappings.get(&'\u{0301}'), Some(&String::new()));
        assert_eq!(legacy.mappings.get(&'å'), Some(&"ā".to_string()));
    }

    #[test]
    fn test_invalid_key_rejected() {
        let json = r#"{"name": "bad", "mappings": {"ab": "c"}}"#;
        assert_eq!(
            RepairProfile::from_json(json),
            Err(RepairError::InvalidKey("ab".to_string()))
        );
    }

    #[test]
    fn test_identity_mapping_dropped() {
        let json = r#"{"name": "id", "mappings": {"ñ": "ñ", "å": "ā"}}"#;
        let profile = RepairProfile::from_json(json).unwrap();
        assert_eq!(profile.len(), 1);
        assert!(!profile.mappings.contains_key(&'ñ'));
    }

    #[test]
    fn test_unknown_profile() {
        let registry = ProfileRegistry::with_bundled().unwrap();
        assert_eq!(
            registry.get("missing"),
            Err(RepairError::UnknownProfile("missing".to_string()))
        );
    }

    #[test]
    fn test_load_dir() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("custom.json"),
            r#"{"name": "custom", "mappings": {"¶": "ṁ"}}"#,
        )
        .unwrap();
        fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let mut registry = ProfileRegistry::new();
        assert_eq!(registry.load_dir(dir.path()).unwrap(), 1);
        assert_eq!(registry.get("custom").unwrap().mappings[&'¶'], "ṁ");
    }
}
