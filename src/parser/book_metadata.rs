use super::Language;
use crate::markers;
use regex::Regex;

/// 扫描标题时最多看的行数
const TITLE_SCAN_LINES: usize = 50;

/// 书籍级元数据推断（标题、作者、语言）
///
/// 都是基于文本的启发式规则，元数据层给出的值优先。
#[derive(Debug, Clone)]
pub struct BookMetadataDetector {
    /// 作者匹配模式，按顺序尝试，第一个命中的为准
    author_patterns: Vec<Regex>,
    pure_digits: Regex,
    default_author: String,
}

impl BookMetadataDetector {
    pub fn new(default_author: impl Into<String>) -> Self {
        let author_patterns = vec![
            // by <Name ... Maharaj|Prabhu|Das|Devi>
            Regex::new(r"\b(?i:by)\s+((?:\p{Lu}[\p{L}]*\.? )+?(?:Maharaj|Prabhu|Das|Devi))\b").unwrap(),
            // Srila|Sri <Name ... Maharaj>
            Regex::new(r"\b(?:Srila|Sri)\s+((?:\p{Lu}[\p{L}]*\.? )+?Maharaj)\b").unwrap(),
            // <Name ... Maharaj>
            Regex::new(r"\b((?:\p{Lu}[\p{L}]*\.? )+?Maharaj)\b").unwrap(),
        ];

        Self {
            author_patterns,
            pure_digits: Regex::new(r"^\d+$").unwrap(),
            default_author: default_author.into(),
        }
    }

    pub fn default_author(&self) -> &str {
        &self.default_author
    }

    /// 推断书名
    ///
    /// 1. 元数据标题去掉首尾空白后超过 3 个非空白字符时直接使用
    /// 2. 在前 50 行（页标记除外）中找 10–99 个字符、全大写或含尊称/“by”的行
    /// 3. 都没有时返回 "Unknown Title"
    pub fn detect_title(&self, text: &str, metadata_title: Option<&str>) -> String {
        if let Some(title) = metadata_title.map(str::trim) {
            if title.chars().filter(|c| !c.is_whitespace()).count() > 3 {
                return title.to_string();
            }
        }

        text.lines()
            .map(str::trim)
            .filter(|line| !markers::is_marker(line))
            .take(TITLE_SCAN_LINES)
            .find(|line| self.looks_like_title(line))
            .map(str::to_string)
            .unwrap_or_else(|| "Unknown Title".to_string())
    }

    fn looks_like_title(&self, line: &str) -> bool {
        let length = line.chars().count();
        if !(10..=99).contains(&length) || self.pure_digits.is_match(line) {
            return false;
        }
        let lower = line.to_lowercase();
        is_upper_case(line) || ["sri", "srila", "maharaj", "by"].iter().any(|t| lower.contains(t))
    }

    /// 推断作者：元数据优先，然后按顺序尝试作者模式，最后使用默认作者
    pub fn detect_author(&self, text: &str, metadata_author: Option<&str>) -> String {
        if let Some(author) = metadata_author.map(str::trim) {
            if author.chars().count() > 3 {
                return author.to_string();
            }
        }

        self.author_patterns
            .iter()
            .find_map(|pattern| pattern.captures(text))
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str().trim().to_string())
            .unwrap_or_else(|| self.default_author.clone())
    }

    /// 粗略的二分类：ASCII 字母占全部字母的比例大于 0.8 为 English
    pub fn detect_language(&self, text: &str) -> Language {
        let (ascii, total) = text
            .chars()
            .filter(|c| c.is_alphabetic())
            .fold((0usize, 0usize), |(ascii, total), c| {
                (ascii + usize::from(c.is_ascii()), total + 1)
            });

        if total > 0 && ascii as f64 / total as f64 > 0.8 {
            Language::English
        } else {
            Language::MixedSanskrit
        }
    }
}

impl Default for BookMetadataDetector {
    fn default() -> Self {
        Self::new("Srila Narayan Maharaj")
    }
}

/// 至少有一个大写字母且没有小写字母
fn is_upper_case(line: &str) -> bool {
    line.chars().any(char::is_uppercase) && !line.chars().any(char::is_lowercase)
}
