use crate::error::{PipelineError, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// 流水线配置
///
/// 所有字段都有默认值，配置文件（JSON）只需要写要覆盖的部分。
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub extraction: ExtractionConfig,
    pub text: TextConfig,
    pub metadata: MetadataConfig,
    pub index: IndexConfig,
    pub batch: BatchConfig,
}

/// 提取配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractionConfig {
    /// 去掉首尾空白后少于该字符数视为提取失败
    pub min_yield_chars: usize,
    pub enable_ocr: bool,
    pub ocr_dpi: u32,
    /// tesseract 语言代码
    pub ocr_language: String,
    /// OCR 总耗时上限（秒），在页与页之间检查
    pub ocr_time_budget_secs: Option<u64>,
    pub layout: LayoutParams,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            min_yield_chars: 100,
            enable_ocr: true,
            ocr_dpi: 300,
            ocr_language: "eng".to_string(),
            ocr_time_budget_secs: None,
            layout: LayoutParams::default(),
        }
    }
}

/// 版面分析容差，单位是字号的倍数
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LayoutParams {
    /// 水平间距超过该值时插入空格
    pub word_margin: f32,
    /// 水平间距超过该值时视为不同文本框
    pub char_margin: f32,
    /// 行距超过该值时视为段落分隔
    pub line_margin: f32,
}

impl Default for LayoutParams {
    fn default() -> Self {
        Self {
            word_margin: 0.1,
            char_margin: 2.0,
            line_margin: 0.5,
        }
    }
}

/// 文本处理配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TextConfig {
    pub min_paragraph_length: usize,
    /// 段落块的最大长度，更长的段落按句子边界再切分
    pub max_chunk_length: usize,
    /// 修复表名称，越靠前优先级越高
    pub repair_profiles: Vec<String>,
    /// 额外修复表目录
    pub extra_profile_dir: Option<PathBuf>,
}

impl Default for TextConfig {
    fn default() -> Self {
        Self {
            min_paragraph_length: 50,
            max_chunk_length: 1500,
            repair_profiles: vec!["legacy-diacritics".to_string(), "common-symbols".to_string()],
            extra_profile_dir: None,
        }
    }
}

/// 元数据推断配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetadataConfig {
    pub default_author: String,
}

impl Default for MetadataConfig {
    fn default() -> Self {
        Self {
            default_author: "Srila Narayan Maharaj".to_string(),
        }
    }
}

/// 索引配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
    pub url: String,
    pub index_name: String,
    pub username: Option<String>,
    pub password: Option<String>,
    /// 段落文档的最小长度（摘要文档不受限制）
    pub min_document_length: usize,
    /// 章节摘要截取的字符数
    pub summary_length: usize,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:9200".to_string(),
            index_name: "srila-narayan-maharaj-books".to_string(),
            username: None,
            password: None,
            min_document_length: 50,
            summary_length: 1000,
        }
    }
}

/// 已处理记录的存储方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreKind {
    /// 每个文档一个 `<stem>.processed` 标记文件
    Marker,
    /// SQLite 数据库
    Sqlite,
}

/// 批处理配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    pub pdf_dir: PathBuf,
    pub processed_dir: PathBuf,
    /// 同时处理的文档数上限（文档内部不并行）
    pub max_concurrent: usize,
    pub store: StoreKind,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            pdf_dir: PathBuf::from("data/pdfs"),
            processed_dir: PathBuf::from("data/processed"),
            max_concurrent: 3,
            store: StoreKind::Marker,
        }
    }
}

impl PipelineConfig {
    /// 从 JSON 文件加载配置，未出现的字段使用默认值
    pub fn from_file(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(PipelineError::NotFound(path.to_path_buf()));
        }
        let json = fs::read_to_string(path)?;
        serde_json::from_str(&json)
            .map_err(|e| PipelineError::Config(format!("{}: {}", path.display(), e)))
    }

    /// 加载配置：有文件读文件，否则用默认值；最后应用环境变量
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(p) => Self::from_file(p)?,
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// 应用环境变量覆盖
    ///
    /// # 参数
    /// - `lookup`: 环境变量读取函数（测试时可以替换）
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup("OPENSEARCH_URL") {
            self.index.url = url;
        }
        if let Some(name) = lookup("OPENSEARCH_INDEX") {
            self.index.index_name = name;
        }
        if let Some(user) = lookup("OPENSEARCH_USERNAME") {
            self.index.username = Some(user);
        }
        if let Some(password) = lookup("OPENSEARCH_PASSWORD") {
            self.index.password = Some(password);
        }
        if let Some(dir) = lookup("SHASTRA_PDF_DIR") {
            self.batch.pdf_dir = PathBuf::from(dir);
        }
        if let Some(dir) = lookup("SHASTRA_PROCESSED_DIR") {
            self.batch.processed_dir = PathBuf::from(dir);
        }
    }

    /// 检查配置的一致性
    pub fn validate(&self) -> Result<()> {
        if self.text.max_chunk_length == 0 {
            return Err(PipelineError::Config("text.max_chunk_length must be positive".to_string()));
        }
        if self.text.min_paragraph_length > self.text.max_chunk_length {
            return Err(PipelineError::Config(
                "text.min_paragraph_length must not exceed text.max_chunk_length".to_string(),
            ));
        }
        if self.text.repair_profiles.is_empty() {
            return Err(PipelineError::Config("text.repair_profiles must name at least one profile".to_string()));
        }
        if self.batch.max_concurrent == 0 {
            return Err(PipelineError::Config("batch.max_concurrent must be positive".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let config = PipelineConfig::default();
        assert_eq!(config.extraction.min_yield_chars, 100);
        assert_eq!(config.extraction.ocr_dpi, 300);
        assert_eq!(config.text.min_paragraph_length, 50);
        assert_eq!(config.text.max_chunk_length, 1500);
        assert_eq!(config.metadata.default_author, "Srila Narayan Maharaj");
        assert_eq!(config.batch.store, StoreKind::Marker);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(
            &path,
            r#"{"extraction": {"ocr_dpi": 200, "layout": {"word_margin": 0.2}}, "batch": {"store": "sqlite"}}"#,
        )
        .unwrap();

        let config = PipelineConfig::from_file(&path).unwrap();
        assert_eq!(config.extraction.ocr_dpi, 200);
        assert_eq!(config.extraction.min_yield_chars, 100);
        assert_eq!(config.extraction.layout.word_margin, 0.2);
        assert_eq!(config.extraction.layout.char_margin, 2.0);
        assert_eq!(config.batch.store, StoreKind::Sqlite);
    }

    #[test]
    fn test_missing_file() {
        let result = PipelineConfig::from_file(Path::new("/definitely/not/here.json"));
        assert!(matches!(result, Err(PipelineError::NotFound(_))));
    }

    #[test]
    fn test_invalid_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, "{ not json").unwrap();
        assert!(matches!(PipelineConfig::from_file(&path), Err(PipelineError::Config(_))));
    }

    #[test]
    fn test_env_overrides() {
        let mut env = HashMap::new();
        env.insert("OPENSEARCH_URL", "https://search:9200");
        env.insert("OPENSEARCH_USERNAME", "admin");
        env.insert("SHASTRA_PDF_DIR", "/books");

        let mut config = PipelineConfig::default();
        config.apply_env(|key| env.get(key).map(|v| v.to_string()));

        assert_eq!(config.index.url, "https://search:9200");
        assert_eq!(config.index.username.as_deref(), Some("admin"));
        assert_eq!(config.index.password, None);
        assert_eq!(config.batch.pdf_dir, PathBuf::from("/books"));
    }

    #[test]
    fn test_validate_rejects_zero_concurrency() {
        let mut config = PipelineConfig::default();
        config.batch.max_concurrent = 0;
        assert!(config.validate().is_err());
    }
}
