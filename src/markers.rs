use lazy_static::lazy_static;
use regex::Regex;

// 提取层与规范化/分章之间唯一的约定：`--- PAGE N ---`，从 1 开始

lazy_static! {
    static ref PAGE_MARKER: Regex = Regex::new(r"^\s*--- PAGE (\d+) ---\s*$").expect("valid page marker regex");
    static ref PAGE_MARKER_ANYWHERE: Regex = Regex::new(r"--- PAGE (\d+) ---").expect("valid page marker regex");
}

/// 生成页标记
pub fn format_marker(page_number: u32) -> String {
    format!("--- PAGE {} ---", page_number)
}

/// 解析一行是否为页标记，返回页码
pub fn parse_marker(line: &str) -> Option<u32> {
    PAGE_MARKER
        .captures(line)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

/// 是否为页标记行
pub fn is_marker(line: &str) -> bool {
    PAGE_MARKER.is_match(line)
}

/// 统计文本中的页标记数量
pub fn count_markers(text: &str) -> usize {
    PAGE_MARKER_ANYWHERE.find_iter(text).count()
}

/// 去掉所有页标记行，其余行原样保留
pub fn strip_page_markers(text: &str) -> String {
    text.split('\n')
        .filter(|line| !is_marker(line))
        .collect::<Vec<_>>()
        .join("\n")
}
