use super::lopdf_backend::extract_text_layer;
use super::{number_pages, Attempt, ExtractionBackend, ExtractionInput};
use lopdf::Document;
use tempfile::NamedTempFile;

/// 解密后重新提取
///
/// 仅在文档加密且调用方提供了密码时生效：用 lopdf 解密，去掉加密字典后
/// 写入临时文件，再交给 pdf-extract 提取；pdf-extract 失败时退回解密后文档的文本层。
/// 临时文件随 `NamedTempFile` 一起在任何返回路径上删除。
#[derive(Debug, Clone, Default)]
pub struct DecryptBackend;

impl DecryptBackend {
    pub fn new() -> Self {
        Self
    }
}

impl ExtractionBackend for DecryptBackend {
    fn name(&self) -> &'static str {
        "decrypt"
    }

    fn attempt(&self, input: &ExtractionInput<'_>) -> Attempt {
        let password = match input.password {
            Some(password) => password,
            None => return Attempt::NotApplicable("no password supplied".to_string()),
        };

        let mut document = match Document::load_mem(input.bytes) {
            Ok(document) => document,
            Err(e) => return Attempt::Failed(format!("failed to load PDF: {}", e)),
        };
        if !document.is_encrypted() {
            return Attempt::NotApplicable("document is not encrypted".to_string());
        }
        if let Err(e) = document.decrypt(password) {
            return Attempt::Failed(format!("decryption failed (wrong password?): {}", e));
        }
        document.trailer.remove(b"Encrypt");

        let decrypted = match NamedTempFile::new() {
            Ok(file) => file,
            Err(e) => return Attempt::Failed(format!("failed to create temporary file: {}", e)),
        };
        if let Err(e) = document.save(decrypted.path()) {
            return Attempt::Failed(format!("failed to write decrypted copy: {}", e));
        }

        match pdf_extract::extract_text_by_pages(decrypted.path()) {
            Ok(pages) => Attempt::Pages(number_pages(pages)),
            Err(_) => Attempt::Pages(extract_text_layer(&document)),
        }
    }
}
