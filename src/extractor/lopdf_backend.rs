use super::{decode_pdf_string, Attempt, DocumentMetadata, ExtractionBackend, ExtractionInput, RawPage};
use crate::logging::LogContext;
use lopdf::{Dictionary, Document, Object};

/// 文本层提取后端（lopdf）
///
/// 逐页调用 lopdf 的文本提取，单页失败时该页记为空文本，不影响其他页。
/// 加密文档先尝试空用户密码。
#[derive(Debug, Clone, Default)]
pub struct LopdfBackend;

impl LopdfBackend {
    pub fn new() -> Self {
        Self
    }
}

/// 载入文档；加密时用给定密码（默认空密码）解密
pub(crate) fn load_document(bytes: &[u8], password: &str) -> Result<Document, String> {
    let mut document = Document::load_mem(bytes).map_err(|e| format!("failed to load PDF: {}", e))?;
    if document.is_encrypted() {
        document
            .decrypt(password)
            .map_err(|e| format!("document is encrypted and could not be decrypted: {}", e))?;
    }
    Ok(document)
}

/// 用 lopdf 的文本提取逐页读取文本层
pub(crate) fn extract_text_layer(document: &Document) -> Vec<RawPage> {
    document
        .get_pages()
        .keys()
        .enumerate()
        .map(|(i, page_number)| {
            let text = document.extract_text(&[*page_number]).unwrap_or_default();
            RawPage::new(i as u32 + 1, text)
        })
        .collect()
}

impl ExtractionBackend for LopdfBackend {
    fn name(&self) -> &'static str {
        "lopdf"
    }

    fn attempt(&self, input: &ExtractionInput<'_>) -> Attempt {
        let document = match load_document(input.bytes, "") {
            Ok(document) => document,
            Err(e) => return Attempt::Failed(e),
        };

        let pages = extract_text_layer(&document);
        if pages.is_empty() {
            return Attempt::Failed("document has no pages".to_string());
        }
        Attempt::Pages(pages)
    }
}

/// 读取 Info 字典中的元数据
///
/// 失败时返回空元数据（文件名和大小由调用方填写）。
pub fn read_metadata(bytes: &[u8], password: Option<&str>, log: &LogContext) -> DocumentMetadata {
    let document = match load_document(bytes, password.unwrap_or("")) {
        Ok(document) => document,
        Err(e) => {
            log::warn!(target: log.target(), "metadata unavailable: {}", e);
            return DocumentMetadata::default();
        }
    };

    match info_dictionary(&document) {
        Some(info) => DocumentMetadata {
            title: info_string(info, b"Title"),
            author: info_string(info, b"Author"),
            subject: info_string(info, b"Subject"),
            creator: info_string(info, b"Creator"),
            creation_date: info_string(info, b"CreationDate"),
            modification_date: info_string(info, b"ModDate"),
            ..DocumentMetadata::default()
        },
        None => {
            log::debug!(target: log.target(), "document has no Info dictionary");
            DocumentMetadata::default()
        }
    }
}

fn info_dictionary(document: &Document) -> Option<&Dictionary> {
    match document.trailer.get(b"Info").ok()? {
        Object::Reference(id) => document.get_dictionary(*id).ok(),
        Object::Dictionary(dict) => Some(dict),
        _ => None,
    }
}

fn info_string(info: &Dictionary, key: &[u8]) -> Option<String> {
    match info.get(key).ok()? {
        Object::String(bytes, _) => {
            let value = decode_pdf_string(bytes).trim().to_string();
            if value.is_empty() {
                None
            } else {
                Some(value)
            }
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lopdf::dictionary;
    use std::path::Path;

    #[test]
    fn test_invalid_bytes_fail() {
        let backend = LopdfBackend::new();
        let input = ExtractionInput {
            path: Path::new("broken.pdf"),
            bytes: b"garbage",
            password: None,
        };
        assert!(matches!(backend.attempt(&input), Attempt::Failed(_)));
    }

    #[test]
    fn test_metadata_of_garbage_is_empty() {
        let metadata = read_metadata(b"garbage", None, &LogContext::default());
        assert_eq!(metadata, DocumentMetadata::default());
    }

    #[test]
    fn test_info_string_decoding() {
        let info = dictionary! {
            "Title" => Object::string_literal("Jaiva Dharma"),
            "Author" => Object::string_literal("   "),
            "Pages" => Object::Integer(12),
        };
        assert_eq!(info_string(&info, b"Title"), Some("Jaiva Dharma".to_string()));
        assert_eq!(info_string(&info, b"Author"), None);
        assert_eq!(info_string(&info, b"Pages"), None);
        assert_eq!(info_string(&info, b"Subject"), None);
    }
}
