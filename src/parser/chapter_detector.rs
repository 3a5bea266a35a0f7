use super::book_metadata::BookMetadataDetector;
use super::{Chapter, Language};
use crate::logging::LogContext;
use crate::markers;
use crate::normalizer::TextNormalizer;
use regex::Regex;
use std::sync::Arc;

/// 没有任何章节标题时使用的占位标题
pub const FALLBACK_CHAPTER_TITLE: &str = "Full Content";

/// 章节标题行的长度范围（字符数）
const MIN_HEADING_CHARS: usize = 4;
const MAX_HEADING_CHARS: usize = 99;

/// 章节边界识别策略
///
/// 对一行（已去掉首尾空白）做判断，命中时返回章节标题。
pub trait BoundaryPattern: Send + Sync {
    /// 模式名称，用于日志
    fn name(&self) -> &str;

    /// 尝试匹配一行
    fn attempt(&self, line: &str) -> Option<String>;
}

/// 基于正则表达式的边界模式，整行作为标题
#[derive(Debug, Clone)]
pub struct RegexBoundary {
    name: &'static str,
    regex: Regex,
}

impl RegexBoundary {
    pub fn new(name: &'static str, pattern: &str) -> Result<Self, regex::Error> {
        Ok(Self {
            name,
            regex: Regex::new(pattern)?,
        })
    }
}

impl BoundaryPattern for RegexBoundary {
    fn name(&self) -> &str {
        self.name
    }

    fn attempt(&self, line: &str) -> Option<String> {
        let length = line.chars().count();
        if !(MIN_HEADING_CHARS..=MAX_HEADING_CHARS).contains(&length) {
            return None;
        }
        self.regex.is_match(line).then(|| line.to_string())
    }
}

/// 默认的边界模式列表（学术论文标题和经书章节标题合并在一起），按优先级排列
pub fn default_boundary_patterns() -> Vec<Box<dyn BoundaryPattern>> {
    let patterns: [(&'static str, &str); 7] = [
        // 1. Introduction / 12 The Holy Name
        ("numbered-title", r"^\d+\.?\s+[A-Z][A-Za-z\s]+$"),
        // 全大写小节标题
        ("all-caps", r"^[A-Z][A-Z\s]{5,49}$"),
        (
            "academic-section",
            r"(?i)^(?:Abstract|Introduction|Related Work|Method|Results|Conclusion|References|Acknowledgments)$",
        ),
        // 2.1 / 3.4.1. Title
        ("hierarchical", r"^\d+(?:\.\d+)+\.?\s+.+$"),
        // Chapter 3: Title / CHAPTER IV - Title
        ("chapter-numbered", r"(?i)^chapter\s+(?:\d+|[ivx]+)[\s\-:]*.+$"),
        ("chapter-bare", r"(?i)^chapter\s+.+$"),
        ("numbered-bare", r"^\d+\.\s+.+$"),
    ];

    patterns
        .into_iter()
        .map(|(name, pattern)| {
            Box::new(RegexBoundary::new(name, pattern).unwrap()) as Box<dyn BoundaryPattern>
        })
        .collect()
}

/// 正在累积内容的章节
struct OpenChapter<'a> {
    title: String,
    page_start: u32,
    lines: Vec<&'a str>,
}

impl OpenChapter<'_> {
    fn has_content(&self) -> bool {
        self.lines.iter().any(|line| !line.is_empty())
    }
}

/// 结构分段器
///
/// 逐行扫描清洗后的文本，按边界模式切分章节，并把每章内容切成段落。
/// 页标记行只用于更新当前页码。第一个标题之前的内容（封面、版权页等）不属于任何章节。
/// 一个标题都没有命中时，整篇文本作为一个占位章节返回。
pub struct StructuralSegmenter {
    patterns: Vec<Box<dyn BoundaryPattern>>,
    normalizer: Arc<TextNormalizer>,
    metadata: BookMetadataDetector,
    min_paragraph_length: usize,
    log: LogContext,
}

impl StructuralSegmenter {
    /// 使用默认边界模式创建分段器
    ///
    /// # 参数
    /// - `normalizer`: 用于切分段落的规范化器（与解析器共享）
    /// - `min_paragraph_length`: 最小段落长度
    pub fn new(normalizer: Arc<TextNormalizer>, min_paragraph_length: usize) -> Self {
        Self {
            patterns: default_boundary_patterns(),
            normalizer,
            metadata: BookMetadataDetector::default(),
            min_paragraph_length,
            log: LogContext::new("shastra::segmenter"),
        }
    }

    /// 替换边界模式列表
    pub fn with_patterns(mut self, patterns: Vec<Box<dyn BoundaryPattern>>) -> Self {
        self.patterns = patterns;
        self
    }

    pub fn with_metadata_detector(mut self, metadata: BookMetadataDetector) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn pattern_names(&self) -> Vec<&str> {
        self.patterns.iter().map(|p| p.name()).collect()
    }

    /// 判断一行是否为章节标题，第一个命中的模式为准
    ///
    /// # 返回
    /// 命中时返回 (模式名称, 标题)
    pub fn match_boundary(&self, line: &str) -> Option<(&str, String)> {
        self.patterns
            .iter()
            .find_map(|pattern| pattern.attempt(line).map(|title| (pattern.name(), title)))
    }

    /// 检测章节
    ///
    /// # 参数
    /// - `text`: 清洗后的文本（可带页标记）
    ///
    /// # 返回
    /// 章节列表，至少包含一个章节
    pub fn detect_chapters(&self, text: &str) -> Vec<Chapter> {
        let mut chapters = Vec::new();
        let mut current: Option<OpenChapter<'_>> = None;
        let mut page: u32 = 1;

        for raw_line in text.split('\n') {
            let line = raw_line.trim();

            // 1. 页标记只更新页码
            if let Some(page_number) = markers::parse_marker(line) {
                page = page_number;
                continue;
            }

            // 2. 空行只在章节内部保留，作为段落分隔
            if line.is_empty() {
                if let Some(open) = current.as_mut() {
                    open.lines.push("");
                }
                continue;
            }

            // 3. 标题行：关闭当前章节，打开新章节
            if let Some((pattern, title)) = self.match_boundary(line) {
                log::debug!(target: self.log.target(), "page {}: {} heading {:?}", page, pattern, title);
                if let Some(open) = current.take() {
                    self.close(open, page.saturating_sub(1), &mut chapters);
                }
                current = Some(OpenChapter {
                    title,
                    page_start: page,
                    lines: Vec::new(),
                });
                continue;
            }

            // 4. 普通行
            if let Some(open) = current.as_mut() {
                open.lines.push(line);
            }
        }

        if let Some(open) = current.take() {
            self.close(open, page, &mut chapters);
        }

        if chapters.is_empty() {
            log::info!(target: self.log.target(), "no chapter headings found, using a single chapter");
            chapters.push(self.fallback_chapter(text, page));
        } else {
            log::info!(target: self.log.target(), "detected {} chapters", chapters.len());
        }

        chapters
    }

    /// 关闭章节；没有内容的章节直接丢弃
    fn close(&self, open: OpenChapter<'_>, page_end: u32, chapters: &mut Vec<Chapter>) {
        if !open.has_content() {
            log::debug!(target: self.log.target(), "skipping empty chapter {:?}", open.title);
            return;
        }

        let content = open.lines.join("\n").trim().to_string();
        let paragraphs = self.normalizer.split_into_paragraphs(&content, self.min_paragraph_length);
        chapters.push(Chapter {
            title: open.title,
            content,
            paragraphs,
            page_start: open.page_start,
            page_end: page_end.max(open.page_start),
        });
    }

    fn fallback_chapter(&self, text: &str, last_page: u32) -> Chapter {
        let content = markers::strip_page_markers(text);
        let paragraphs = self.normalizer.split_into_paragraphs(&content, self.min_paragraph_length);
        Chapter {
            title: FALLBACK_CHAPTER_TITLE.to_string(),
            content,
            paragraphs,
            page_start: 1,
            page_end: last_page.max(1),
        }
    }

    pub fn detect_title(&self, text: &str, metadata_title: Option<&str>) -> String {
        self.metadata.detect_title(text, metadata_title)
    }

    pub fn detect_author(&self, text: &str, metadata_author: Option<&str>) -> String {
        self.metadata.detect_author(text, metadata_author)
    }

    pub fn detect_language(&self, text: &str) -> Language {
        self.metadata.detect_language(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn segmenter(min_paragraph_length: usize) -> StructuralSegmenter {
        StructuralSegmenter::new(Arc::new(TextNormalizer::new()), min_paragraph_length)
    }

    #[test]
    fn test_boundary_patterns_in_order() {
        let segmenter = segmenter(1);

        assert_eq!(segmenter.match_boundary("1. INTRODUCTION").map(|m| m.0), Some("numbered-title"));
        assert_eq!(segmenter.match_boundary("THE HOLY NAME").map(|m| m.0), Some("all-caps"));
        assert_eq!(segmenter.match_boundary("related work").map(|m| m.0), Some("academic-section"));
        assert_eq!(segmenter.match_boundary("2.1 Sambandha-jnana").map(|m| m.0), Some("hierarchical"));
        assert_eq!(
            segmenter.match_boundary("Chapter 3: The Glories of Vraja").map(|m| m.0),
            Some("chapter-numbered")
        );
        assert_eq!(segmenter.match_boundary("CHAPTER Four").map(|m| m.0), Some("chapter-bare"));
        assert_eq!(
            segmenter.match_boundary("4. bhakti is causeless").map(|m| m.0),
            Some("numbered-bare")
        );
    }

    #[test]
    fn test_boundary_rejects_prose_and_long_lines() {
        let segmenter = segmenter(1);

        assert!(segmenter.match_boundary("Some text.").is_none());
        assert!(segmenter.match_boundary("ABC").is_none());
        let long_heading = format!("1. {}", "Word ".repeat(30));
        assert!(segmenter.match_boundary(long_heading.trim()).is_none());
    }

    #[test]
    fn test_chapter_keyword_ignores_case() {
        let segmenter = segmenter(1);

        assert_eq!(segmenter.match_boundary("chapter one").map(|m| m.0), Some("chapter-bare"));
        assert_eq!(segmenter.match_boundary("CHAPTER 3").map(|m| m.0), Some("chapter-bare"));
        assert_eq!(
            segmenter.match_boundary("chapter iv: the glories of vraja").map(|m| m.0),
            Some("chapter-numbered")
        );
        assert_eq!(segmenter.match_boundary("CHAPTER 12 - Prema").map(|m| m.0), Some("chapter-numbered"));
    }

    #[test]
    fn test_all_caps_length_limit() {
        let segmenter = segmenter(1);
        let fits = format!("THE {}", "A".repeat(46));
        let too_long = format!("THE {}", "A".repeat(47));
        assert_eq!(fits.chars().count(), 50);

        assert_eq!(segmenter.match_boundary(&fits).map(|m| m.0), Some("all-caps"));
        assert!(segmenter.match_boundary(&too_long).is_none());
    }

    #[test]
    fn test_two_numbered_chapters() {
        let segmenter = segmenter(1);
        let chapters = segmenter.detect_chapters("1. INTRODUCTION\nSome text.\n\n2. METHOD\nMore text.");

        assert_eq!(chapters.len(), 2);
        assert_eq!(chapters[0].title, "1. INTRODUCTION");
        assert_eq!(chapters[0].content, "Some text.");
        assert_eq!(chapters[0].paragraphs, vec!["Some text.".to_string()]);
        assert_eq!(chapters[1].title, "2. METHOD");
        assert_eq!(chapters[1].content, "More text.");
        for chapter in &chapters {
            assert!(chapter.page_start <= chapter.page_end);
        }
    }

    #[test]
    fn test_page_ranges_follow_markers() {
        let segmenter = segmenter(1);
        let text = "--- PAGE 1 ---\nCHAPTER ONE TITLE\nFirst chapter body.\n--- PAGE 2 ---\nStill first chapter.\n\
                    --- PAGE 3 ---\nCHAPTER TWO TITLE\nSecond chapter body.\n--- PAGE 4 ---\nEnd.";
        let chapters = segmenter.detect_chapters(text);

        assert_eq!(chapters.len(), 2);
        assert_eq!((chapters[0].page_start, chapters[0].page_end), (1, 2));
        assert_eq!((chapters[1].page_start, chapters[1].page_end), (3, 4));
        assert_eq!(chapters[0].content, "First chapter body.\nStill first chapter.");
    }

    #[test]
    fn test_heading_on_same_page_clamps_page_end() {
        let segmenter = segmenter(1);
        let text = "--- PAGE 5 ---\nFIRST HEADING\nbody one\nSECOND HEADING\nbody two";
        let chapters = segmenter.detect_chapters(text);

        assert_eq!(chapters.len(), 2);
        assert_eq!((chapters[0].page_start, chapters[0].page_end), (5, 5));
        assert_eq!((chapters[1].page_start, chapters[1].page_end), (5, 5));
    }

    #[test]
    fn test_preamble_and_empty_chapters_dropped() {
        let segmenter = segmenter(1);
        let text = "cover page words\nFIRST HEADING\n\nSECOND HEADING\nactual body";
        let chapters = segmenter.detect_chapters(text);

        assert_eq!(chapters.len(), 1);
        assert_eq!(chapters[0].title, "SECOND HEADING");
        assert_eq!(chapters[0].content, "actual body");
    }

    #[test]
    fn test_blank_lines_separate_paragraphs() {
        let segmenter = segmenter(1);
        let text = "INTRODUCTION\nfirst line\nsame paragraph\n\nsecond paragraph";
        let chapters = segmenter.detect_chapters(text);

        assert_eq!(
            chapters[0].paragraphs,
            vec!["first line same paragraph".to_string(), "second paragraph".to_string()]
        );
    }

    #[test]
    fn test_fallback_without_headings() {
        let segmenter = segmenter(1);
        let text = "--- PAGE 1 ---\nplain prose without headings.\n--- PAGE 2 ---\nmore prose here.";
        let chapters = segmenter.detect_chapters(text);

        assert_eq!(chapters.len(), 1);
        assert_eq!(chapters[0].title, FALLBACK_CHAPTER_TITLE);
        assert_eq!((chapters[0].page_start, chapters[0].page_end), (1, 2));
        assert_eq!(
            markers::strip_page_markers(&chapters[0].content),
            markers::strip_page_markers(text)
        );
    }

    #[test]
    fn test_fallback_on_empty_text() {
        let segmenter = segmenter(50);
        let chapters = segmenter.detect_chapters("");

        assert_eq!(chapters.len(), 1);
        assert_eq!(chapters[0].title, FALLBACK_CHAPTER_TITLE);
        assert!(chapters[0].paragraphs.is_empty());
        assert_eq!((chapters[0].page_start, chapters[0].page_end), (1, 1));
    }

    #[test]
    fn test_fallback_property_over_generated_prose() {
        let segmenter = segmenter(50);
        let words = ["rasa", "nama", "seva", "vraja", "kirtan", "prema", "the", "and"];
        let mut seed: u64 = 7;

        for _ in 0..20 {
            let mut text = String::new();
            for page in 1..=3 {
                text.push_str(&markers::format_marker(page));
                text.push('\n');
                for _ in 0..10 {
                    seed = seed.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
                    let word = words[(seed >> 33) as usize % words.len()];
                    text.push_str(word);
                    text.push(if seed % 5 == 0 { '\n' } else { ' ' });
                }
                text.push('\n');
            }

            let chapters = segmenter.detect_chapters(&text);
            assert_eq!(chapters.len(), 1);
            assert_eq!(
                markers::strip_page_markers(&chapters[0].content),
                markers::strip_page_markers(&text)
            );
        }
    }

    struct PrefixBoundary;

    impl BoundaryPattern for PrefixBoundary {
        fn name(&self) -> &str {
            "prefix"
        }

        fn attempt(&self, line: &str) -> Option<String> {
            line.strip_prefix("## ").map(str::to_string)
        }
    }

    #[test]
    fn test_custom_patterns() {
        let segmenter = segmenter(1).with_patterns(vec![Box::new(PrefixBoundary)]);
        let chapters = segmenter.detect_chapters("## Harinama\nchant and be happy\n1. INTRODUCTION");

        assert_eq!(segmenter.pattern_names(), vec!["prefix"]);
        assert_eq!(chapters.len(), 1);
        assert_eq!(chapters[0].title, "Harinama");
        assert_eq!(chapters[0].content, "chant and be happy\n1. INTRODUCTION");
    }
}
