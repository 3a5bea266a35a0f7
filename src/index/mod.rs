pub mod client;

pub use client::{
    default_schema, index_book, BookStats, HealthStatus, IndexReport, MemoryIndex, OpenSearchClient, SearchFilters,
    SearchHit, SearchIndex, SearchQuery, SearchResults,
};

use crate::config::IndexConfig;
use crate::logging::LogContext;
use crate::normalizer::TextNormalizer;
use crate::parser::{Book, Chapter, Language};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;
use std::sync::Arc;

/// 索引文档
///
/// 每个段落一个，另外每章一个摘要文档（`paragraph_number` 为 0）。
/// `paragraph_id` 同时作为索引里的文档 ID，重复写入同一文档是幂等的。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexDocument {
    pub book_id: String,
    pub book_title: String,
    pub author: String,
    pub language: Language,
    pub chapter_title: String,
    /// 从 1 开始
    pub chapter_number: usize,
    pub page_start: u32,
    pub page_end: u32,
    pub file_path: String,
    pub timestamp: DateTime<Utc>,
    pub total_pages: usize,
    pub content: String,
    pub paragraph_id: String,
    pub paragraph_number: usize,
    /// 按段落在章内的位置线性插值得到的近似页码
    pub page_number: u32,
    pub tags: BTreeSet<String>,
    pub content_length: usize,
    pub word_count: usize,
    pub is_summary: bool,
}

/// 书籍 ID：书名 slug + 文件路径 SHA256 的前 8 个十六进制字符
///
/// 同名的不同文件得到不同 ID，同一文件重复处理得到相同 ID。
pub fn book_id(book: &Book) -> String {
    format!("{}-{}", slugify(&book.title), path_digest(&book.file_path))
}

/// 文件路径 SHA256 的前 8 个十六进制字符
pub fn path_digest(file_path: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(file_path.as_bytes());
    let hash = format!("{:x}", hasher.finalize());
    hash[..8].to_string()
}

fn slugify(title: &str) -> String {
    let mut slug = String::with_capacity(title.len());
    for c in title.chars().flat_map(char::to_lowercase) {
        if c.is_alphanumeric() {
            slug.push(c);
        } else if !slug.is_empty() && !slug.ends_with('-') {
            slug.push('-');
        }
    }
    let slug = slug.trim_end_matches('-');
    if slug.is_empty() {
        "book".to_string()
    } else {
        slug.to_string()
    }
}

/// 近似页码：`page_start + (page_end - page_start) * index / count`，向下取整
///
/// 对同一章内递增的 index 单调不减，且落在 [page_start, page_end] 内
pub fn interpolate_page(chapter: &Chapter, index: usize, count: usize) -> u32 {
    if count == 0 {
        return chapter.page_start;
    }
    let span = u64::from(chapter.page_end.saturating_sub(chapter.page_start));
    let offset = span * index.min(count) as u64 / count as u64;
    chapter.page_start + offset as u32
}

/// 把书籍展开为索引文档
pub struct IndexDocumentBuilder {
    normalizer: Arc<TextNormalizer>,
    /// 段落文档的最小长度（去掉首尾空白后，字符数）
    min_document_length: usize,
    /// 摘要截取的字符数
    summary_length: usize,
    log: LogContext,
}

impl IndexDocumentBuilder {
    pub fn new(normalizer: Arc<TextNormalizer>, config: &IndexConfig) -> Self {
        Self {
            normalizer,
            min_document_length: config.min_document_length,
            summary_length: config.summary_length,
            log: LogContext::new("shastra::index"),
        }
    }

    pub fn normalizer(&self) -> &TextNormalizer {
        &self.normalizer
    }

    /// 生成整本书的索引文档
    ///
    /// 每章先输出达到最小长度的段落文档，最后输出该章的摘要文档
    pub fn build(&self, book: &Book) -> Vec<IndexDocument> {
        let book_id = book_id(book);
        let mut documents = Vec::new();

        for (chapter_idx, chapter) in book.chapters.iter().enumerate() {
            let before = documents.len();
            let count = chapter.paragraphs.len();

            for (para_idx, paragraph) in chapter.paragraphs.iter().enumerate() {
                if paragraph.trim().chars().count() < self.min_document_length {
                    continue;
                }

                let content = self.normalizer.clean_for_search(paragraph);
                documents.push(IndexDocument {
                    paragraph_id: format!("{}_{}_{}", book_id, chapter_idx, para_idx),
                    paragraph_number: para_idx + 1,
                    page_number: interpolate_page(chapter, para_idx, count),
                    tags: self.normalizer.generate_tags(paragraph),
                    content_length: content.chars().count(),
                    word_count: content.split_whitespace().count(),
                    content,
                    is_summary: false,
                    ..self.base_document(book, &book_id, chapter, chapter_idx)
                });
            }

            documents.push(self.summary_document(book, &book_id, chapter, chapter_idx));
            log::debug!(
                target: self.log.target(),
                "chapter {} {:?}: {} documents",
                chapter_idx + 1,
                chapter.title,
                documents.len() - before
            );
        }

        log::info!(target: self.log.target(), "{:?}: built {} documents", book.title, documents.len());
        documents
    }

    /// 章节摘要：章节原文前 N 个字符，标签基于整章内容
    fn summary_document(&self, book: &Book, book_id: &str, chapter: &Chapter, chapter_idx: usize) -> IndexDocument {
        let excerpt: String = chapter.content.chars().take(self.summary_length).collect();
        let content = self.normalizer.clean_for_search(&excerpt);

        IndexDocument {
            paragraph_id: format!("{}_{}_summary", book_id, chapter_idx),
            paragraph_number: 0,
            page_number: chapter.page_start,
            tags: self.normalizer.generate_tags(&chapter.content),
            content_length: content.chars().count(),
            word_count: content.split_whitespace().count(),
            content,
            is_summary: true,
            ..self.base_document(book, book_id, chapter, chapter_idx)
        }
    }

    fn base_document(&self, book: &Book, book_id: &str, chapter: &Chapter, chapter_idx: usize) -> IndexDocument {
        IndexDocument {
            book_id: book_id.to_string(),
            book_title: book.title.clone(),
            author: book.author.clone(),
            language: book.language,
            chapter_title: chapter.title.clone(),
            chapter_number: chapter_idx + 1,
            page_start: chapter.page_start,
            page_end: chapter.page_end,
            file_path: book.file_path.clone(),
            timestamp: book.processed_timestamp,
            total_pages: book.total_pages,
            content: String::new(),
            paragraph_id: String::new(),
            paragraph_number: 0,
            page_number: chapter.page_start,
            tags: BTreeSet::new(),
            content_length: 0,
            word_count: 0,
            is_summary: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::{BTreeMap, HashSet};

    fn paragraph(n: usize) -> String {
        format!("Paragraph {} describes the glories of the holy name and the mercy of Sri Guru in Vraja.", n)
    }

    fn book(chapters: Vec<Chapter>) -> Book {
        Book {
            title: "Bhakti Rasayana".to_string(),
            author: "Srila Narayan Maharaj".to_string(),
            language: Language::English,
            total_pages: 20,
            chapters,
            metadata: BTreeMap::new(),
            file_path: "data/pdfs/bhakti-rasayana.pdf".to_string(),
            processed_timestamp: Utc::now(),
        }
    }

    fn chapter(page_start: u32, page_end: u32, paragraphs: Vec<String>) -> Chapter {
        Chapter {
            title: "1. The Holy Name".to_string(),
            content: paragraphs.join("\n\n"),
            paragraphs,
            page_start,
            page_end,
        }
    }

    fn builder() -> IndexDocumentBuilder {
        IndexDocumentBuilder::new(Arc::new(TextNormalizer::new()), &IndexConfig::default())
    }

    #[test]
    fn test_page_numbers_monotone_within_chapter() {
        let book = book(vec![chapter(10, 20, (1..=5).map(paragraph).collect())]);
        let documents = builder().build(&book);

        let pages: Vec<u32> = documents.iter().filter(|d| !d.is_summary).map(|d| d.page_number).collect();
        assert_eq!(pages.len(), 5);
        assert!(pages.windows(2).all(|w| w[0] <= w[1]));
        assert!(pages.iter().all(|p| (10..=20).contains(p)));
        assert_eq!(pages, vec![10, 12, 14, 16, 18]);
    }

    #[test]
    fn test_interpolate_page_bounds() {
        let ch = chapter(3, 3, vec![]);
        assert_eq!(interpolate_page(&ch, 0, 0), 3);
        assert_eq!(interpolate_page(&ch, 7, 10), 3);

        let ch = chapter(1, 100, vec![]);
        for count in 1..20 {
            let pages: Vec<u32> = (0..count).map(|i| interpolate_page(&ch, i, count)).collect();
            assert!(pages.windows(2).all(|w| w[0] <= w[1]));
            assert!(pages.iter().all(|p| (1..=100).contains(p)));
        }
    }

    #[test]
    fn test_summary_per_chapter() {
        let book = book(vec![
            chapter(1, 4, vec![paragraph(1), "too short".to_string()]),
            chapter(5, 9, vec!["tiny".to_string()]),
        ]);
        let documents = builder().build(&book);

        let summaries: Vec<&IndexDocument> = documents.iter().filter(|d| d.is_summary).collect();
        assert_eq!(summaries.len(), 2);
        assert!(summaries.iter().all(|d| d.paragraph_number == 0));
        assert_eq!(summaries[1].page_number, 5);
        assert_eq!(summaries[1].chapter_number, 2);
        assert_eq!(summaries[1].content, "tiny");

        let paragraphs: Vec<&IndexDocument> = documents.iter().filter(|d| !d.is_summary).collect();
        assert_eq!(paragraphs.len(), 1);
        assert_eq!(paragraphs[0].paragraph_number, 1);
    }

    #[test]
    fn test_summary_truncates_content() {
        let long = "Bhakti is the eternal function of the soul. ".repeat(60);
        let book = book(vec![chapter(1, 2, vec![long])]);
        let documents = builder().build(&book);

        let summary = documents.iter().find(|d| d.is_summary).unwrap();
        assert!(summary.content.chars().count() <= 1000);
        assert_eq!(summary.content_length, summary.content.chars().count());
        assert!(summary.tags.contains("bhakti"));
    }

    #[test]
    fn test_paragraph_ids_unique_and_stable() {
        let book = book(vec![
            chapter(1, 2, (1..=3).map(paragraph).collect()),
            chapter(3, 4, (4..=6).map(paragraph).collect()),
        ]);
        let first = builder().build(&book);
        let second = builder().build(&book);

        let ids: HashSet<&str> = first.iter().map(|d| d.paragraph_id.as_str()).collect();
        assert_eq!(ids.len(), first.len());
        assert_eq!(
            first.iter().map(|d| &d.paragraph_id).collect::<Vec<_>>(),
            second.iter().map(|d| &d.paragraph_id).collect::<Vec<_>>()
        );

        let id = book_id(&book);
        assert!(id.starts_with("bhakti-rasayana-"));
        assert_eq!(id.len(), "bhakti-rasayana-".len() + 8);
        assert_eq!(first[0].paragraph_id, format!("{}_0_0", id));
        assert_eq!(first[3].paragraph_id, format!("{}_0_summary", id));
    }

    #[test]
    fn test_document_fields() {
        let book = book(vec![chapter(1, 1, vec![paragraph(1)])]);
        let documents = builder().build(&book);
        let doc = &documents[0];

        assert_eq!(doc.book_title, "Bhakti Rasayana");
        assert_eq!(doc.chapter_title, "1. The Holy Name");
        assert_eq!(doc.total_pages, 20);
        assert_eq!(doc.word_count, doc.content.split_whitespace().count());
        assert!(doc.tags.contains("guru"));

        let json = serde_json::to_value(doc).unwrap();
        assert_eq!(json["language"], "English");
        assert_eq!(json["is_summary"], false);
    }

    #[test]
    fn test_slugify() {
        assert_eq!(slugify("\u{15a}r\u{12b} Bhakti-rasa Sindhu!"), "\u{15b}r\u{12b}-bhakti-rasa-sindhu");
        assert_eq!(slugify("  ...  "), "book");
    }
}
