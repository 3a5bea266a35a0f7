use crate::config::TextConfig;
use crate::error::Result;
use crate::logging::LogContext;
use crate::markers;
use crate::repair::{CharacterRepairEngine, ProfileRegistry};
use lazy_static::lazy_static;
use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};
use unicode_normalization::UnicodeNormalization;

/// OCR 修正表文件格式：有序的 (pattern, replacement) 列表
#[derive(Debug, Clone, Deserialize)]
pub struct OcrFixRule {
    pub pattern: String,
    pub replacement: String,
}

/// 主题标签表文件格式：关键词命中任意一个即打上该标签
#[derive(Debug, Clone, Deserialize)]
pub struct TopicTagRule {
    pub tag: String,
    pub keywords: Vec<String>,
}

lazy_static! {
    static ref BUNDLED_OCR_FIXES: Vec<OcrFixRule> =
        serde_json::from_str(include_str!("../data/ocr_fixes.json")).expect("bundled OCR fix table is valid");
    static ref BUNDLED_TOPIC_TAGS: Vec<TopicTagRule> =
        serde_json::from_str(include_str!("../data/topic_tags.json")).expect("bundled topic tag table is valid");
    static ref BUNDLED_SPIRITUAL_TERMS: Vec<String> =
        serde_json::from_str(include_str!("../data/spiritual_terms.json")).expect("bundled term list is valid");
}

/// 标签中最多保留的专有名词数
const MAX_TERM_TAGS: usize = 10;

/// 梵文转写特有的变音字符
const SANSKRIT_DIACRITICS: &[char] = &['ā', 'ī', 'ū', 'ṛ', 'ḷ', 'ṃ', 'ḥ'];

const TERM_SUFFIXES: &[&str] = &["ji", "maharaj", "prabhu", "devi", "das"];
const TERM_PREFIXES: &[&str] = &["Sri", "Srila", "Śrī", "Guru"];

/// 文本统计
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TextStats {
    pub characters: usize,
    pub words: usize,
    pub sentences: usize,
    pub paragraphs: usize,
    pub unique_words: usize,
}

/// 编译后的 OCR 修正规则
#[derive(Debug, Clone)]
struct OcrFix {
    pattern: Regex,
    replacement: String,
}

/// 文本规范化器
///
/// 负责清洗提取出的原始文本（NFC、字符修复、去页眉页脚噪声、OCR 修正），
/// 以及把清洗后的文本切成段落。页标记行原样保留，供分章使用。
///
/// 所有表和正则在构造时编译，之后只读。
#[derive(Debug, Clone)]
pub struct TextNormalizer {
    repair: Option<CharacterRepairEngine>,
    ocr_fixes: Vec<OcrFix>,
    topic_tags: Vec<TopicTagRule>,
    spiritual_terms: HashSet<String>,
    /// 段落块最大长度（字符数）
    max_chunk_length: usize,
    /// 整行丢弃的噪声模式
    noise_lines: Vec<Regex>,
    whitespace_run: Regex,
    search_disallowed: Regex,
    sentence_end: Regex,
    capitalized_word: Regex,
    log: LogContext,
}

impl TextNormalizer {
    /// 创建不带字符修复的规范化器，使用内置的 OCR 修正表和标签表
    pub fn new() -> Self {
        let ocr_fixes = compile_ocr_fixes(&BUNDLED_OCR_FIXES).expect("bundled OCR fix patterns are valid");

        let noise_lines = vec![
            // 纯页码
            Regex::new(r"^\d+$").unwrap(),
            // Page N
            Regex::new(r"(?i)^Page\s+\d+$").unwrap(),
            // 单独的 Chapter N
            Regex::new(r"(?i)^Chapter\s+\d+$").unwrap(),
            // 分隔线
            Regex::new(r"^[-_=•\s]+$").unwrap(),
        ];

        Self {
            repair: None,
            ocr_fixes,
            topic_tags: BUNDLED_TOPIC_TAGS.clone(),
            spiritual_terms: BUNDLED_SPIRITUAL_TERMS.iter().cloned().collect(),
            max_chunk_length: 1500,
            noise_lines,
            whitespace_run: Regex::new(r"\s+").unwrap(),
            search_disallowed: Regex::new(r"[^\w\s\x{0900}-\x{097F}.,;:!?()\-]").unwrap(),
            sentence_end: Regex::new(r"[.!?]+").unwrap(),
            capitalized_word: Regex::new(r"\b\p{Lu}\p{L}+\b").unwrap(),
            log: LogContext::new("shastra::normalizer"),
        }
    }

    /// 按配置构建：加载修复表（内置 + 额外目录），设置段落块长度
    pub fn from_config(config: &TextConfig) -> Result<Self> {
        let mut registry = ProfileRegistry::with_bundled()?;
        if let Some(dir) = &config.extra_profile_dir {
            let loaded = registry.load_dir(dir)?;
            log::info!(target: "shastra::normalizer", "loaded {} extra repair profiles from {}", loaded, dir.display());
        }
        let engine = CharacterRepairEngine::from_registry(&registry, &config.repair_profiles)?;

        Ok(Self::new()
            .with_repair(engine)
            .with_max_chunk_length(config.max_chunk_length))
    }

    /// 在 NFC 之后应用字符修复
    pub fn with_repair(mut self, engine: CharacterRepairEngine) -> Self {
        self.repair = Some(engine);
        self
    }

    pub fn with_max_chunk_length(mut self, max_chunk_length: usize) -> Self {
        self.max_chunk_length = max_chunk_length.max(1);
        self
    }

    /// 替换 OCR 修正表（JSON，有序）
    pub fn with_ocr_fixes(mut self, rules: &[OcrFixRule]) -> std::result::Result<Self, regex::Error> {
        self.ocr_fixes = compile_ocr_fixes(rules)?;
        Ok(self)
    }

    pub fn max_chunk_length(&self) -> usize {
        self.max_chunk_length
    }

    /// 清洗原始文本
    ///
    /// 步骤顺序固定：
    /// 1. NFC 规范化，然后字符修复
    /// 2. 行内空白折叠为单个空格，连续空行只保留一个
    /// 3. 丢弃纯页码、Page N、单独的 Chapter N、分隔线
    /// 4. 丢弃少于 3 个字符的行
    /// 5. OCR 修正（不区分大小写）
    /// 6. 去掉每行和整体的首尾空白
    ///
    /// 空输入返回空字符串。
    pub fn clean(&self, raw_text: &str) -> String {
        if raw_text.trim().is_empty() {
            return String::new();
        }

        // 1. NFC + 修复
        let composed: String = raw_text.nfc().collect();
        let repaired = match &self.repair {
            Some(engine) => engine.repair(&composed),
            None => composed,
        };

        let mut lines: Vec<String> = Vec::new();
        let mut dropped = 0usize;

        for raw_line in repaired.split('\n') {
            // 2. 空白折叠
            let collapsed = self.whitespace_run.replace_all(raw_line, " ");
            let line = collapsed.trim();

            if line.is_empty() {
                if lines.last().map_or(false, |last| !last.is_empty()) {
                    lines.push(String::new());
                }
                continue;
            }

            if markers::is_marker(line) {
                lines.push(line.to_string());
                continue;
            }

            // 3 + 4. 噪声行
            if self.is_noise_line(line) {
                dropped += 1;
                continue;
            }

            // 5. OCR 修正
            lines.push(self.apply_ocr_fixes(line));
        }

        // 6. 整体 trim
        let cleaned = lines.join("\n").trim().to_string();

        log::debug!(
            target: self.log.target(),
            "cleaned {} -> {} chars, dropped {} noise lines",
            raw_text.len(),
            cleaned.len(),
            dropped
        );

        cleaned
    }

    fn is_noise_line(&self, line: &str) -> bool {
        line.chars().count() < 3 || self.noise_lines.iter().any(|re| re.is_match(line))
    }

    fn apply_ocr_fixes(&self, line: &str) -> String {
        let mut text = line.to_string();
        for fix in &self.ocr_fixes {
            if fix.pattern.is_match(&text) {
                text = fix.pattern.replace_all(&text, fix.replacement.as_str()).into_owned();
            }
        }
        text
    }

    /// 分割文本为段落
    ///
    /// 按空行分段，段内各行以空格连接。短于 `min_length` 的段落视为噪声丢弃；
    /// 超过最大块长度的段落在句子边界（`.!?` 后跟空白）处切成不超过最大长度的块，
    /// 句子本身不会被切开。切分后过短的块并入相邻块，不丢弃任何文字。
    ///
    /// # 参数
    /// - `text`: 清洗后的文本
    /// - `min_length`: 最小段落长度（字符数）
    ///
    /// # 返回
    /// 段落列表，可能为空
    pub fn split_into_paragraphs(&self, text: &str, min_length: usize) -> Vec<String> {
        let mut paragraphs = Vec::new();

        for paragraph in join_blank_separated(text) {
            let length = char_len(&paragraph);
            if length < min_length {
                continue;
            }
            if length <= self.max_chunk_length {
                paragraphs.push(paragraph);
                continue;
            }
            paragraphs.extend(self.chunk_sentences(&paragraph, min_length));
        }

        paragraphs
    }

    /// 按句子累积成块，每块不超过最大长度（单个超长句子自成一块）
    ///
    /// 过短的块先尝试与相邻块在句子边界上重新分配；两边都无法落在
    /// `[min_length, max_chunk_length]` 内时直接并入前一块（没有前一块时并入后一块）。
    fn chunk_sentences(&self, paragraph: &str, min_length: usize) -> Vec<String> {
        // 1. 贪心累积
        let mut groups: Vec<Vec<&str>> = Vec::new();
        let mut current: Vec<&str> = Vec::new();
        for sentence in split_sentences(paragraph) {
            if !current.is_empty() && group_len(&current) + 1 + char_len(sentence) > self.max_chunk_length {
                groups.push(std::mem::take(&mut current));
            }
            current.push(sentence);
        }
        if !current.is_empty() {
            groups.push(current);
        }

        // 2. 过短的块并入相邻块
        let mut i = 0;
        while i < groups.len() {
            if groups.len() == 1 || group_len(&groups[i]) >= min_length {
                i += 1;
                continue;
            }

            let mut starts = Vec::with_capacity(2);
            if i > 0 {
                starts.push(i - 1);
            }
            if i + 1 < groups.len() {
                starts.push(i);
            }

            let rebalanced = starts
                .iter()
                .map(|&start| (start, self.rebalance(&groups[start], &groups[start + 1], min_length)))
                .find(|(_, candidate)| candidate.iter().all(|g| self.fits(g)));

            let (start, replacement) = match rebalanced {
                Some(found) => found,
                None => {
                    let start = starts[0];
                    let merged: Vec<&str> = groups[start].iter().chain(&groups[start + 1]).copied().collect();
                    log::debug!(
                        target: self.log.target(),
                        "attaching {} char fragment to an oversized chunk",
                        group_len(&groups[i])
                    );
                    (start, vec![merged])
                }
            };
            groups.splice(start..=start + 1, replacement);
            i = start;
        }

        groups.into_iter().map(|group| group.join(" ")).collect()
    }

    /// 把相邻两块合并后重新切分：能放进一块就合并，
    /// 否则找一个切分点让两边都落在 `[min_length, max_chunk_length]` 内（后一块尽量短）
    fn rebalance<'a>(&self, first: &[&'a str], second: &[&'a str], min_length: usize) -> Vec<Vec<&'a str>> {
        let merged: Vec<&'a str> = first.iter().chain(second).copied().collect();
        if group_len(&merged) <= self.max_chunk_length {
            return vec![merged];
        }

        let in_bounds = |group: &[&str]| (min_length..=self.max_chunk_length).contains(&group_len(group));
        for split in (1..merged.len()).rev() {
            let (head, tail) = merged.split_at(split);
            if in_bounds(head) && in_bounds(tail) {
                return vec![head.to_vec(), tail.to_vec()];
            }
        }
        vec![merged]
    }

    fn fits(&self, group: &[&str]) -> bool {
        group.len() == 1 || group_len(group) <= self.max_chunk_length
    }

    /// 为搜索索引清洗文本：去页标记，折叠空白，
    /// 只保留字母、数字、天城文和基本标点
    pub fn clean_for_search(&self, text: &str) -> String {
        let stripped = markers::strip_page_markers(text);
        let collapsed = self.whitespace_run.replace_all(&stripped, " ");
        let filtered = self.search_disallowed.replace_all(&collapsed, " ");
        self.whitespace_run.replace_all(&filtered, " ").trim().to_string()
    }

    /// 文本统计
    pub fn text_stats(&self, text: &str) -> TextStats {
        let words: Vec<&str> = text.split_whitespace().collect();
        let unique_words: HashSet<String> = words
            .iter()
            .filter(|w| w.chars().all(char::is_alphabetic))
            .map(|w| w.to_lowercase())
            .collect();

        TextStats {
            characters: char_len(text),
            words: words.len(),
            sentences: self.sentence_end.split(text).filter(|s| !s.trim().is_empty()).count(),
            paragraphs: text.split("\n\n").filter(|p| !p.trim().is_empty()).count(),
            unique_words: unique_words.len(),
        }
    }

    /// 提取专有名词（神名、地名、尊称、带梵文变音符的长词）
    pub fn extract_spiritual_terms(&self, text: &str) -> BTreeSet<String> {
        self.capitalized_word
            .find_iter(text)
            .map(|m| m.as_str())
            .filter(|word| self.is_spiritual_term(word))
            .map(str::to_string)
            .collect()
    }

    fn is_spiritual_term(&self, word: &str) -> bool {
        self.spiritual_terms.contains(word)
            || TERM_SUFFIXES.iter().any(|s| word.ends_with(s))
            || TERM_PREFIXES.iter().any(|p| word.starts_with(p))
            || (word.chars().count() > 6 && word.chars().any(|c| SANSKRIT_DIACRITICS.contains(&c)))
    }

    /// 生成标签：最多 10 个专有名词，加上命中关键词的主题标签
    pub fn generate_tags(&self, text: &str) -> BTreeSet<String> {
        let mut tags: BTreeSet<String> = self
            .extract_spiritual_terms(text)
            .into_iter()
            .take(MAX_TERM_TAGS)
            .collect();

        let lower = text.to_lowercase();
        for rule in &self.topic_tags {
            if rule.keywords.iter().any(|k| lower.contains(k.as_str())) {
                tags.insert(rule.tag.clone());
            }
        }

        tags
    }
}

impl Default for TextNormalizer {
    fn default() -> Self {
        Self::new()
    }
}

fn compile_ocr_fixes(rules: &[OcrFixRule]) -> std::result::Result<Vec<OcrFix>, regex::Error> {
    rules
        .iter()
        .map(|rule| {
            Ok(OcrFix {
                pattern: RegexBuilder::new(&rule.pattern).case_insensitive(true).build()?,
                replacement: rule.replacement.clone(),
            })
        })
        .collect()
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

/// 句子以单个空格连接后的长度
fn group_len(sentences: &[&str]) -> usize {
    sentences.iter().map(|s| char_len(s)).sum::<usize>() + sentences.len().saturating_sub(1)
}

/// 按空行分段，跳过页标记行
fn join_blank_separated(text: &str) -> Vec<String> {
    let mut paragraphs = Vec::new();
    let mut current = String::new();

    for line in text.lines() {
        let trimmed = line.trim();
        if markers::is_marker(trimmed) {
            continue;
        }
        if trimmed.is_empty() {
            if !current.is_empty() {
                paragraphs.push(std::mem::take(&mut current));
            }
            continue;
        }
        if !current.is_empty() {
            current.push(' ');
        }
        current.push_str(trimmed);
    }

    if !current.is_empty() {
        paragraphs.push(current);
    }
    paragraphs
}

/// 在 `.!?` 后跟空白处切分句子
fn split_sentences(paragraph: &str) -> Vec<&str> {
    let mut sentences = Vec::new();
    let mut start = 0;
    let mut chars = paragraph.char_indices().peekable();

    while let Some((_, c)) = chars.next() {
        if !matches!(c, '.' | '!' | '?') {
            continue;
        }
        if let Some(&(next_index, next)) = chars.peek() {
            if next.is_whitespace() {
                let sentence = paragraph[start..next_index].trim();
                if !sentence.is_empty() {
                    sentences.push(sentence);
                }
                start = next_index;
            }
        }
    }

    let tail = paragraph[start..].trim();
    if !tail.is_empty() {
        sentences.push(tail);
    }
    sentences
}
