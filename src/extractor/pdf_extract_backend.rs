use super::{number_pages, Attempt, ExtractionBackend, ExtractionInput};

/// 通用 PDF 转文本后端（pdf-extract），对复杂版面容忍度较高
#[derive(Debug, Clone, Default)]
pub struct PdfExtractBackend;

impl PdfExtractBackend {
    pub fn new() -> Self {
        Self
    }
}

impl ExtractionBackend for PdfExtractBackend {
    fn name(&self) -> &'static str {
        "pdf-extract"
    }

    fn attempt(&self, input: &ExtractionInput<'_>) -> Attempt {
        // 有密码时直接用带密码的接口，加密文档不必等到解密后端
        let (mode, result) = match input.password {
            Some(password) => (
                "with password",
                pdf_extract::extract_text_from_mem_by_pages_encrypted(input.bytes, password),
            ),
            None => ("plain", pdf_extract::extract_text_from_mem_by_pages(input.bytes)),
        };

        match result {
            Ok(pages) => Attempt::Pages(number_pages(pages)),
            Err(e) => Attempt::Failed(format!("pdf-extract ({}): {}", mode, e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    #[test]
    fn test_invalid_bytes_fail() {
        let backend = PdfExtractBackend::new();
        let input = ExtractionInput {
            path: Path::new("broken.pdf"),
            bytes: b"definitely not a pdf",
            password: None,
        };
        let attempt = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| backend.attempt(&input)));
        // 损坏输入要么返回 Failed，要么 panic（由提取器统一捕获）
        if let Ok(attempt) = attempt {
            assert!(matches!(attempt, Attempt::Failed(ref msg) if msg.contains("(plain)")));
        }
    }

    #[test]
    fn test_password_reaches_backend() {
        let backend = PdfExtractBackend::new();
        let input = ExtractionInput {
            path: Path::new("locked.pdf"),
            bytes: b"definitely not a pdf",
            password: Some("radhe"),
        };
        let attempt = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| backend.attempt(&input)));
        if let Ok(attempt) = attempt {
            assert!(matches!(attempt, Attempt::Failed(ref msg) if msg.contains("(with password)")));
        }
    }
}
