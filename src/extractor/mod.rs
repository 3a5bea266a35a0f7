pub mod decrypt_backend;
pub mod layout_backend;
pub mod lopdf_backend;
pub mod ocr_backend;
pub mod pdf_extract_backend;

pub use decrypt_backend::DecryptBackend;
pub use layout_backend::LayoutBackend;
pub use lopdf_backend::LopdfBackend;
pub use ocr_backend::OcrBackend;
pub use pdf_extract_backend::PdfExtractBackend;

use crate::config::ExtractionConfig;
use crate::error::{PipelineError, Result};
use crate::logging::LogContext;
use crate::markers;
use encoding_rs::{UTF_16BE, WINDOWS_1252};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::Path;

/// 单页原始文本，页码从 1 开始
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawPage {
    pub page_number: u32,
    pub text: String,
}

impl RawPage {
    pub fn new(page_number: u32, text: impl Into<String>) -> Self {
        Self {
            page_number,
            text: text.into(),
        }
    }
}

/// 把按顺序排列的页文本编号为 RawPage（1, 2, 3, ...）
pub fn number_pages<I, S>(texts: I) -> Vec<RawPage>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    texts
        .into_iter()
        .enumerate()
        .map(|(i, text)| RawPage::new(i as u32 + 1, text))
        .collect()
}

/// 按换页符（form feed）推断页边界
///
/// 换页符是每页的结束符：末尾换页符之后的空串不算一页，
/// 但空白页（包括只有空白的页）保留，页数与文档一致。
pub fn split_form_feeds(text: &str) -> Vec<RawPage> {
    let mut pages: Vec<&str> = text.split('\x0C').collect();
    if pages.len() > 1 && pages.last().map_or(false, |p| p.is_empty()) {
        pages.pop();
    }
    number_pages(pages)
}

/// 页文本去掉首尾空白后的字符总数（达标判断的唯一依据）
pub fn yield_chars(pages: &[RawPage]) -> usize {
    pages.iter().map(|p| p.text.trim().chars().count()).sum()
}

/// 每页之前插入页标记，拼成一个字符串
pub fn interleave_markers(pages: &[RawPage]) -> String {
    pages
        .iter()
        .map(|p| format!("\n{}\n{}", markers::format_marker(p.page_number), p.text))
        .collect::<Vec<_>>()
        .join("\n")
}

/// 解码 PDF 文本字符串：有 UTF-16BE BOM 的按 UTF-16BE，否则按 PDFDocEncoding 近似（Windows-1252）
pub fn decode_pdf_string(bytes: &[u8]) -> String {
    if bytes.starts_with(&[0xFE, 0xFF]) {
        let (text, _) = UTF_16BE.decode_without_bom_handling(&bytes[2..]);
        return text.into_owned();
    }
    if let Ok(text) = std::str::from_utf8(bytes) {
        return text.to_string();
    }
    let (text, _, _) = WINDOWS_1252.decode(bytes);
    text.into_owned()
}

/// 后端的输入
#[derive(Debug, Clone, Copy)]
pub struct ExtractionInput<'a> {
    pub path: &'a Path,
    pub bytes: &'a [u8],
    pub password: Option<&'a str>,
}

/// 单个后端一次尝试的结果
///
/// 后端内部错误不会向上传播，而是以 `Failed` 的形式交给提取器，
/// 由提取器决定是否继续下一个后端。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Attempt {
    /// 得到了文本（是否达标由提取器判断）
    Pages(Vec<RawPage>),
    /// 该后端不适用于此文档（例如未加密或没有密码）
    NotApplicable(String),
    /// 后端内部失败：损坏的流、不支持的过滤器、密码错误、外部工具缺失等
    Failed(String),
}

/// 提取后端
///
/// 实现必须是无状态的（或只读），可以在线程间共享。
pub trait ExtractionBackend: Send + Sync {
    /// 后端名称，用于日志和诊断
    fn name(&self) -> &'static str;

    /// 尝试提取文本
    fn attempt(&self, input: &ExtractionInput<'_>) -> Attempt;
}

/// 每个后端的尝试记录
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum AttemptRecord {
    Accepted { backend: String, chars: usize },
    BelowThreshold { backend: String, chars: usize },
    NotApplicable { backend: String, reason: String },
    Failed { backend: String, diagnostic: String },
}

/// 文档元数据（尽力而为，全部可缺省）
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DocumentMetadata {
    pub file_name: String,
    pub file_size: u64,
    pub title: Option<String>,
    pub author: Option<String>,
    pub subject: Option<String>,
    pub creator: Option<String>,
    pub creation_date: Option<String>,
    pub modification_date: Option<String>,
}

impl DocumentMetadata {
    /// 转为键值映射，缺省字段不出现
    pub fn to_map(&self) -> BTreeMap<String, String> {
        let mut map = BTreeMap::new();
        map.insert("file_name".to_string(), self.file_name.clone());
        map.insert("file_size".to_string(), self.file_size.to_string());

        let optional = [
            ("title", &self.title),
            ("author", &self.author),
            ("subject", &self.subject),
            ("creator", &self.creator),
            ("creation_date", &self.creation_date),
            ("modification_date", &self.modification_date),
        ];
        for (key, value) in optional {
            if let Some(v) = value {
                map.insert(key.to_string(), v.clone());
            }
        }
        map
    }
}

/// 提取结果
#[derive(Debug, Clone)]
pub struct ExtractionResult {
    /// 带页标记的文本；全部后端失败时为不带页标记的诊断占位文本
    pub text: String,
    pub metadata: DocumentMetadata,
    /// 被采用的后端，全部失败时为 None
    pub backend: Option<&'static str>,
    /// 提取到的页数（等于页标记数）
    pub page_count: usize,
    pub attempts: Vec<AttemptRecord>,
}

impl ExtractionResult {
    pub fn is_placeholder(&self) -> bool {
        self.backend.is_none()
    }
}

/// 全部后端都低于阈值时的占位文本
pub fn placeholder_text(file_name: &str) -> String {
    format!(
        "Unable to extract text from {} - PDF may have security restrictions preventing text extraction",
        file_name
    )
}

/// 多策略 PDF 文本提取器
///
/// 按顺序尝试各个后端，只有当前结果缺失或去掉首尾空白后少于阈值时才尝试下一个。
/// 全部失败时不报错，返回占位文本，保证批处理里其他文档不受影响。
pub struct MultiStrategyExtractor {
    backends: Vec<Box<dyn ExtractionBackend>>,
    min_yield_chars: usize,
    log: LogContext,
}

impl MultiStrategyExtractor {
    /// 默认后端链：
    /// 1. pdf-extract
    /// 2. lopdf 文本层
    /// 3. 版面分析
    /// 4. 解密后重新提取（仅在提供密码时）
    /// 5. 300 DPI 光栅化 + OCR（可关闭）
    pub fn new(config: &ExtractionConfig) -> Self {
        let log = LogContext::new("shastra::extractor");
        let mut backends: Vec<Box<dyn ExtractionBackend>> = vec![
            Box::new(PdfExtractBackend::new()),
            Box::new(LopdfBackend::new()),
            Box::new(LayoutBackend::new(config.layout)),
            Box::new(DecryptBackend::new()),
        ];
        if config.enable_ocr {
            backends.push(Box::new(OcrBackend::from_config(config, log.child("ocr"))));
        }

        Self {
            backends,
            min_yield_chars: config.min_yield_chars,
            log,
        }
    }

    /// 使用自定义后端链
    pub fn with_backends(backends: Vec<Box<dyn ExtractionBackend>>, min_yield_chars: usize) -> Self {
        Self {
            backends,
            min_yield_chars,
            log: LogContext::new("shastra::extractor"),
        }
    }

    pub fn backend_names(&self) -> Vec<&'static str> {
        self.backends.iter().map(|b| b.name()).collect()
    }

    /// 提取 PDF 文本和元数据
    ///
    /// # 参数
    /// - `pdf_path`: PDF 文件路径
    /// - `password`: 可选的用户密码
    ///
    /// # 返回
    /// 只有文件本身无法读取时返回错误
    pub fn extract(&self, pdf_path: &Path, password: Option<&str>) -> Result<ExtractionResult> {
        if !pdf_path.exists() {
            return Err(PipelineError::NotFound(pdf_path.to_path_buf()));
        }
        let bytes = fs::read(pdf_path)?;
        Ok(self.extract_bytes(pdf_path, &bytes, password))
    }

    /// 对已读入内存的文档执行后端链
    pub fn extract_bytes(&self, pdf_path: &Path, bytes: &[u8], password: Option<&str>) -> ExtractionResult {
        let file_name = pdf_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| pdf_path.display().to_string());

        let mut metadata = lopdf_backend::read_metadata(bytes, password, &self.log);
        metadata.file_name = file_name.clone();
        metadata.file_size = bytes.len() as u64;

        let input = ExtractionInput {
            path: pdf_path,
            bytes,
            password,
        };

        let mut attempts = Vec::with_capacity(self.backends.len());

        for backend in &self.backends {
            let name = backend.name();
            log::info!(target: self.log.target(), "{}: trying backend {}", file_name, name);

            let attempt = catch_unwind(AssertUnwindSafe(|| backend.attempt(&input)))
                .unwrap_or_else(|_| Attempt::Failed("backend panicked on malformed input".to_string()));

            match attempt {
                Attempt::Pages(pages) => {
                    let chars = yield_chars(&pages);
                    if chars >= self.min_yield_chars {
                        log::info!(
                            target: self.log.target(),
                            "{}: backend {} extracted {} chars from {} pages",
                            file_name,
                            name,
                            chars,
                            pages.len()
                        );
                        attempts.push(AttemptRecord::Accepted {
                            backend: name.to_string(),
                            chars,
                        });
                        return ExtractionResult {
                            text: interleave_markers(&pages),
                            metadata,
                            backend: Some(name),
                            page_count: pages.len(),
                            attempts,
                        };
                    }
                    log::info!(
                        target: self.log.target(),
                        "{}: backend {} yielded {} chars, below threshold {}",
                        file_name,
                        name,
                        chars,
                        self.min_yield_chars
                    );
                    attempts.push(AttemptRecord::BelowThreshold {
                        backend: name.to_string(),
                        chars,
                    });
                }
                Attempt::NotApplicable(reason) => {
                    log::debug!(target: self.log.target(), "{}: backend {} skipped: {}", file_name, name, reason);
                    attempts.push(AttemptRecord::NotApplicable {
                        backend: name.to_string(),
                        reason,
                    });
                }
                Attempt::Failed(diagnostic) => {
                    log::error!(target: self.log.target(), "{}: backend {} failed: {}", file_name, name, diagnostic);
                    attempts.push(AttemptRecord::Failed {
                        backend: name.to_string(),
                        diagnostic,
                    });
                }
            }
        }

        log::warn!(
            target: self.log.target(),
            "{}: all {} backends below threshold, using placeholder text",
            file_name,
            self.backends.len()
        );

        ExtractionResult {
            text: placeholder_text(&file_name),
            metadata,
            backend: None,
            page_count: 0,
            attempts,
        }
    }
}
