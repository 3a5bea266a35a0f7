use crate::config::PipelineConfig;
use crate::error::Result;
use crate::extractor::{DocumentMetadata, MultiStrategyExtractor};
use crate::logging::LogContext;
use crate::markers;
use crate::normalizer::TextNormalizer;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::sync::Arc;

// 子模块声明
pub mod book_metadata;
pub mod chapter_detector;

pub use book_metadata::BookMetadataDetector;
pub use chapter_detector::{BoundaryPattern, RegexBoundary, StructuralSegmenter, FALLBACK_CHAPTER_TITLE};

/// 书籍语言（粗略二分类）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Language {
    #[serde(rename = "English")]
    English,
    #[serde(rename = "Mixed/Sanskrit")]
    MixedSanskrit,
}

impl Language {
    pub fn as_str(&self) -> &'static str {
        match self {
            Language::English => "English",
            Language::MixedSanskrit => "Mixed/Sanskrit",
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 章节
///
/// `paragraphs` 只由 `content` 切分得到，`page_start <= page_end`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chapter {
    /// 章节标题（整行标题，或占位标题）
    pub title: String,
    /// 章节原始内容（各行以换行连接）
    pub content: String,
    /// 段落列表
    pub paragraphs: Vec<String>,
    pub page_start: u32,
    pub page_end: u32,
}

/// 解析后的书籍
///
/// 章节列表永远非空：没有识别到标题时至少有一个占位章节。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Book {
    pub title: String,
    pub author: String,
    pub language: Language,
    /// 原始提取文本中的页标记数量，提取失败时为 0
    pub total_pages: usize,
    pub chapters: Vec<Chapter>,
    pub metadata: BTreeMap<String, String>,
    pub file_path: String,
    pub processed_timestamp: DateTime<Utc>,
}

impl Book {
    /// 所有章节的段落总数
    pub fn paragraph_count(&self) -> usize {
        self.chapters.iter().map(|c| c.paragraphs.len()).sum()
    }
}

/// 文档解析器 trait
///
/// 批处理通过它调用解析流程，测试中可以替换为桩实现
pub trait Parser: Send + Sync {
    /// 解析文件
    ///
    /// # 参数
    /// - `file_path`: 要解析的文件路径
    /// - `password`: 可选的文档密码
    ///
    /// # 返回
    /// 解析得到的书籍；只有文件无法读取等致命错误才返回 Err
    fn parse(&self, file_path: &Path, password: Option<&str>) -> Result<Book>;

    /// 获取支持的文件扩展名列表
    fn supported_extensions(&self) -> Vec<&str>;
}

/// 书籍解析器
///
/// 串起整条流程：多策略提取 → 清洗 → 分章 → 书名/作者/语言推断。
/// 单个文档内部完全顺序执行，不持有可变共享状态，可以在多个线程间共享。
pub struct BookParser {
    extractor: MultiStrategyExtractor,
    normalizer: Arc<TextNormalizer>,
    segmenter: StructuralSegmenter,
    log: LogContext,
}

impl BookParser {
    /// 按配置创建解析器
    pub fn from_config(config: &PipelineConfig) -> Result<Self> {
        let normalizer = Arc::new(TextNormalizer::from_config(&config.text)?);
        let segmenter = StructuralSegmenter::new(Arc::clone(&normalizer), config.text.min_paragraph_length)
            .with_metadata_detector(BookMetadataDetector::new(config.metadata.default_author.clone()));

        Ok(Self::with_components(
            MultiStrategyExtractor::new(&config.extraction),
            normalizer,
            segmenter,
        ))
    }

    pub fn with_components(
        extractor: MultiStrategyExtractor,
        normalizer: Arc<TextNormalizer>,
        segmenter: StructuralSegmenter,
    ) -> Self {
        Self {
            extractor,
            normalizer,
            segmenter,
            log: LogContext::new("shastra::parser"),
        }
    }

    /// 共享的规范化器（索引文档构建也用它）
    pub fn normalizer(&self) -> &Arc<TextNormalizer> {
        &self.normalizer
    }

    pub fn segmenter(&self) -> &StructuralSegmenter {
        &self.segmenter
    }

    /// 解析 PDF 文件
    ///
    /// # 参数
    /// - `pdf_path`: PDF 路径
    /// - `password`: 可选的用户密码
    ///
    /// # 返回
    /// 提取全部失败时仍返回书籍（内容为占位文本）；文件不存在或无法读取时返回错误
    pub fn parse_pdf(&self, pdf_path: &Path, password: Option<&str>) -> Result<Book> {
        log::info!(target: self.log.target(), "parsing {}", pdf_path.display());

        let extraction = self.extractor.extract(pdf_path, password)?;
        if extraction.is_placeholder() {
            log::warn!(
                target: self.log.target(),
                "{}: no backend produced usable text, continuing with placeholder",
                pdf_path.display()
            );
        }

        Ok(self.parse_text(&extraction.text, pdf_path, &extraction.metadata))
    }

    /// 从已提取的原始文本（带页标记）构建书籍
    ///
    /// # 参数
    /// - `raw_text`: 提取层输出
    /// - `file_path`: 源文件路径，只作记录
    /// - `metadata`: 提取层元数据，标题和作者优先使用其中的值
    pub fn parse_text(&self, raw_text: &str, file_path: &Path, metadata: &DocumentMetadata) -> Book {
        // 1. 清洗
        let cleaned = self.normalizer.clean(raw_text);

        // 2. 书籍级元数据
        let title = self.segmenter.detect_title(&cleaned, metadata.title.as_deref());
        let author = self.segmenter.detect_author(&cleaned, metadata.author.as_deref());
        let language = self.segmenter.detect_language(&cleaned);

        // 3. 分章
        let chapters = self.segmenter.detect_chapters(&cleaned);

        let book = Book {
            title,
            author,
            language,
            total_pages: markers::count_markers(raw_text),
            chapters,
            metadata: metadata.to_map(),
            file_path: file_path.display().to_string(),
            processed_timestamp: Utc::now(),
        };

        log::info!(
            target: self.log.target(),
            "{:?} by {}: {} pages, {} chapters, {} paragraphs",
            book.title,
            book.author,
            book.total_pages,
            book.chapters.len(),
            book.paragraph_count()
        );
        book
    }
}

impl Parser for BookParser {
    fn parse(&self, file_path: &Path, password: Option<&str>) -> Result<Book> {
        self.parse_pdf(file_path, password)
    }

    fn supported_extensions(&self) -> Vec<&str> {
        vec!["pdf"]
    }
}
