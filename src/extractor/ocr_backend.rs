use super::{Attempt, ExtractionBackend, ExtractionInput, RawPage};
use crate::config::ExtractionConfig;
use crate::logging::LogContext;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::{Duration, Instant};

const IMAGE_PREFIX: &str = "page";

/// 光栅化 + OCR 后端（最后手段，用于纯图片的扫描版 PDF）
///
/// 用 pdftoppm 按指定 DPI 把每页渲染为 PNG，再逐页交给 tesseract。
/// 中间图片放在临时目录里，返回时整个目录被删除。
/// 配置了时间预算时，在页与页之间检查，超时后返回已经识别的页。
#[derive(Debug, Clone)]
pub struct OcrBackend {
    dpi: u32,
    language: String,
    time_budget: Option<Duration>,
    rasterizer: String,
    recognizer: String,
    log: LogContext,
}

impl OcrBackend {
    pub fn new(dpi: u32, language: impl Into<String>, log: LogContext) -> Self {
        Self {
            dpi,
            language: language.into(),
            time_budget: None,
            rasterizer: "pdftoppm".to_string(),
            recognizer: "tesseract".to_string(),
            log,
        }
    }

    pub fn from_config(config: &ExtractionConfig, log: LogContext) -> Self {
        let mut backend = Self::new(config.ocr_dpi, config.ocr_language.clone(), log);
        backend.time_budget = config.ocr_time_budget_secs.map(Duration::from_secs);
        backend
    }

    /// 替换外部命令（例如指定绝对路径）
    pub fn with_commands(mut self, rasterizer: impl Into<String>, recognizer: impl Into<String>) -> Self {
        self.rasterizer = rasterizer.into();
        self.recognizer = recognizer.into();
        self
    }

    pub fn with_time_budget(mut self, budget: Duration) -> Self {
        self.time_budget = Some(budget);
        self
    }

    fn rasterize(&self, input: &ExtractionInput<'_>, workdir: &Path) -> Result<Vec<(u32, PathBuf)>, String> {
        let mut command = Command::new(&self.rasterizer);
        command.arg("-r").arg(self.dpi.to_string()).arg("-png");
        if let Some(password) = input.password {
            command.arg("-upw").arg(password);
        }
        command.arg(input.path).arg(workdir.join(IMAGE_PREFIX));

        let output = command
            .output()
            .map_err(|e| format!("failed to run {}: {}", self.rasterizer, e))?;
        if !output.status.success() {
            return Err(format!(
                "{} failed: {}",
                self.rasterizer,
                String::from_utf8_lossy(&output.stderr).trim()
            ));
        }

        list_page_images(workdir).map_err(|e| format!("failed to list rendered pages: {}", e))
    }

    fn recognize(&self, image: &Path) -> Result<String, String> {
        let output = Command::new(&self.recognizer)
            .arg(image)
            .arg("stdout")
            .arg("-l")
            .arg(&self.language)
            .output()
            .map_err(|e| format!("failed to run {}: {}", self.recognizer, e))?;
        if !output.status.success() {
            return Err(format!(
                "{} failed: {}",
                self.recognizer,
                String::from_utf8_lossy(&output.stderr).trim()
            ));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

impl ExtractionBackend for OcrBackend {
    fn name(&self) -> &'static str {
        "ocr"
    }

    fn attempt(&self, input: &ExtractionInput<'_>) -> Attempt {
        let workdir = match tempfile::tempdir() {
            Ok(dir) => dir,
            Err(e) => return Attempt::Failed(format!("failed to create temporary directory: {}", e)),
        };

        let images = match self.rasterize(input, workdir.path()) {
            Ok(images) if images.is_empty() => return Attempt::Failed("no pages were rendered".to_string()),
            Ok(images) => images,
            Err(e) => return Attempt::Failed(e),
        };

        let started = Instant::now();
        let mut pages = Vec::with_capacity(images.len());

        for (page_number, image) in &images {
            if let Some(budget) = self.time_budget {
                if started.elapsed() >= budget {
                    log::warn!(
                        target: self.log.target(),
                        "OCR time budget of {:?} exhausted after {} of {} pages",
                        budget,
                        pages.len(),
                        images.len()
                    );
                    break;
                }
            }

            let text = match self.recognize(image) {
                Ok(text) => text,
                Err(e) => {
                    log::warn!(target: self.log.target(), "page {}: {}", page_number, e);
                    String::new()
                }
            };
            log::debug!(target: self.log.target(), "page {}: recognized {} chars", page_number, text.len());
            pages.push(RawPage::new(*page_number, text));
        }

        Attempt::Pages(pages)
    }
}

/// 列出 pdftoppm 生成的 `page-N.png`（N 可能带前导零），按页码排序
fn list_page_images(dir: &Path) -> std::io::Result<Vec<(u32, PathBuf)>> {
    let mut images = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        let page_number = path
            .file_name()
            .and_then(|n| n.to_str())
            .and_then(|n| n.strip_prefix(IMAGE_PREFIX))
            .and_then(|n| n.strip_prefix('-'))
            .and_then(|n| n.strip_suffix(".png"))
            .and_then(|n| n.parse::<u32>().ok());
        if let Some(page_number) = page_number {
            images.push((page_number, path));
        }
    }
    images.sort_by_key(|(n, _)| *n);
    Ok(images)
}
