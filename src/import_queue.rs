use crate::error::Result;
use crate::index::{book_id, index_book, IndexDocumentBuilder, SearchIndex};
use crate::logging::LogContext;
use crate::parser::Parser;
use crate::processed::ProcessedStore;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::VecDeque;
use std::fs;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::thread;

/// 导入状态
#[derive(Serialize, Clone, Debug, PartialEq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ImportStatus {
    /// 等待处理
    Pending,
    /// 已处理过，跳过
    Skipped,
    /// 完成（部分文档写入失败也算完成）
    Completed { documents: usize, failed: usize },
    /// 失败（包含错误信息）
    Failed { error: String },
}

/// 导入任务
#[derive(Serialize, Clone, Debug)]
pub struct ImportTask {
    pub file_path: PathBuf,
    pub status: ImportStatus,
    pub created_at: DateTime<Utc>,
}

impl ImportTask {
    pub fn new(file_path: impl Into<PathBuf>) -> Self {
        Self {
            file_path: file_path.into(),
            status: ImportStatus::Pending,
            created_at: Utc::now(),
        }
    }
}

/// 批处理结果
#[derive(Serialize, Clone, Debug, Default)]
pub struct BatchReport {
    pub successful: usize,
    pub failed: usize,
    pub skipped: usize,
    /// 按源文件路径排序
    pub tasks: Vec<ImportTask>,
}

impl BatchReport {
    fn record(&mut self, task: ImportTask) {
        match task.status {
            ImportStatus::Completed { .. } => self.successful += 1,
            ImportStatus::Skipped => self.skipped += 1,
            ImportStatus::Failed { .. } | ImportStatus::Pending => self.failed += 1,
        }
        self.tasks.push(task);
    }

    pub fn total(&self) -> usize {
        self.tasks.len()
    }
}

/// 导入选项
#[derive(Debug, Clone, Default)]
pub struct ImportOptions {
    /// 忽略已处理记录，重新处理；重新索引前先删除这本书的旧文档
    pub force: bool,
    pub password: Option<String>,
}

/// 单个文档的处理流程：解析 → 展开文档 → 写索引 → 记录已处理
pub struct ImportPipeline<'a> {
    parser: &'a dyn Parser,
    builder: &'a IndexDocumentBuilder,
    index: &'a dyn SearchIndex,
    store: &'a dyn ProcessedStore,
    options: ImportOptions,
    log: LogContext,
}

impl<'a> ImportPipeline<'a> {
    pub fn new(
        parser: &'a dyn Parser,
        builder: &'a IndexDocumentBuilder,
        index: &'a dyn SearchIndex,
        store: &'a dyn ProcessedStore,
    ) -> Self {
        Self {
            parser,
            builder,
            index,
            store,
            options: ImportOptions::default(),
            log: LogContext::new("shastra::batch"),
        }
    }

    pub fn with_options(mut self, options: ImportOptions) -> Self {
        self.options = options;
        self
    }

    /// 处理单个文档，任何错误（包括 panic）都只影响这个文档
    pub fn process(&self, pdf_path: &Path) -> ImportStatus {
        match catch_unwind(AssertUnwindSafe(|| self.try_process(pdf_path))) {
            Ok(Ok(status)) => status,
            Ok(Err(e)) => {
                log::error!(target: self.log.target(), "error processing {}: {}", pdf_path.display(), e);
                ImportStatus::Failed { error: e.to_string() }
            }
            Err(_) => {
                log::error!(target: self.log.target(), "processing {} panicked", pdf_path.display());
                ImportStatus::Failed {
                    error: "processing panicked".to_string(),
                }
            }
        }
    }

    fn try_process(&self, pdf_path: &Path) -> Result<ImportStatus> {
        // 1. 已处理检查
        if !self.options.force && self.store.is_processed(pdf_path)? {
            log::info!(
                target: self.log.target(),
                "{} already processed, use --force to reprocess",
                pdf_path.display()
            );
            return Ok(ImportStatus::Skipped);
        }

        // 2. 解析
        let book = self.parser.parse(pdf_path, self.options.password.as_deref())?;
        let all_content = book
            .chapters
            .iter()
            .map(|c| c.content.as_str())
            .collect::<Vec<_>>()
            .join(" ");
        let stats = self.builder.normalizer().text_stats(&all_content);
        log::info!(
            target: self.log.target(),
            "parsed {:?} by {}: {} words, {} paragraphs, {} chapters",
            book.title,
            book.author,
            stats.words,
            stats.paragraphs,
            book.chapters.len()
        );

        // 3. 强制重新处理时先删除旧文档
        if self.options.force {
            let id = book_id(&book);
            match self.index.delete_by_field("book_id", &id) {
                Ok(deleted) => log::info!(target: self.log.target(), "removed {} stale documents of {}", deleted, id),
                Err(e) => log::warn!(target: self.log.target(), "could not remove stale documents of {}: {}", id, e),
            }
        }

        // 4. 写索引
        let documents = self.builder.build(&book);
        let report = index_book(self.index, &documents, &self.log);
        if report.indexed == 0 {
            return Ok(ImportStatus::Failed {
                error: format!("no documents of {:?} were indexed", book.title),
            });
        }

        // 5. 记录已处理
        self.store.mark_processed(pdf_path, &book.title, Utc::now())?;
        log::info!(target: self.log.target(), "processed and indexed {:?}", book.title);

        Ok(ImportStatus::Completed {
            documents: report.indexed,
            failed: report.failed,
        })
    }
}

/// 扫描目录下的 PDF 文件（不递归，扩展名不区分大小写），按路径排序
pub fn scan_pdfs(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut pdfs = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        let is_pdf = path
            .extension()
            .and_then(|e| e.to_str())
            .map_or(false, |e| e.eq_ignore_ascii_case("pdf"));
        if is_pdf && path.is_file() {
            pdfs.push(path);
        }
    }
    pdfs.sort();
    Ok(pdfs)
}

/// 导入队列
///
/// 多个工作线程从同一个队列取任务，同时处理的文档数不超过 `max_concurrent`；
/// 单个文档内部不并行。
pub struct ImportQueue {
    /// 待处理任务队列
    tasks: Mutex<VecDeque<ImportTask>>,
    /// 最大并发任务数
    max_concurrent: usize,
    log: LogContext,
}

impl ImportQueue {
    pub fn new(max_concurrent: usize) -> Self {
        Self {
            tasks: Mutex::new(VecDeque::new()),
            max_concurrent: max_concurrent.max(1),
            log: LogContext::new("shastra::batch"),
        }
    }

    /// 将任务加入队列
    pub fn enqueue(&self, task: ImportTask) {
        match self.tasks.lock() {
            Ok(mut tasks) => tasks.push_back(task),
            Err(poisoned) => poisoned.into_inner().push_back(task),
        }
    }

    /// 从队列中取出任务
    pub fn dequeue(&self) -> Option<ImportTask> {
        match self.tasks.lock() {
            Ok(mut tasks) => tasks.pop_front(),
            Err(poisoned) => poisoned.into_inner().pop_front(),
        }
    }

    /// 获取队列中的任务数量
    pub fn queue_size(&self) -> usize {
        match self.tasks.lock() {
            Ok(tasks) => tasks.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }

    /// 处理队列中的全部任务
    ///
    /// # 返回
    /// 成功、失败、跳过的数量和每个任务的最终状态
    pub fn run(&self, pipeline: &ImportPipeline<'_>) -> BatchReport {
        let total = self.queue_size();
        let workers = self.max_concurrent.min(total);
        log::info!(target: self.log.target(), "processing {} documents with {} workers", total, workers);

        let finished: Mutex<Vec<ImportTask>> = Mutex::new(Vec::with_capacity(total));

        thread::scope(|scope| {
            for _ in 0..workers {
                scope.spawn(|| {
                    while let Some(mut task) = self.dequeue() {
                        task.status = pipeline.process(&task.file_path);
                        match finished.lock() {
                            Ok(mut done) => done.push(task),
                            Err(poisoned) => poisoned.into_inner().push(task),
                        }
                    }
                });
            }
        });

        let mut tasks = finished.into_inner().unwrap_or_else(|poisoned| poisoned.into_inner());
        tasks.sort_by(|a, b| a.file_path.cmp(&b.file_path));

        let mut report = BatchReport::default();
        for task in tasks {
            report.record(task);
        }

        log::info!(
            target: self.log.target(),
            "processing complete: {} successful, {} failed, {} skipped",
            report.successful,
            report.failed,
            report.skipped
        );
        report
    }
}

impl Default for ImportQueue {
    fn default() -> Self {
        Self::new(3) // 默认最多 3 个并发任务
    }
}

/// 处理目录下的全部 PDF
pub fn process_directory(dir: &Path, pipeline: &ImportPipeline<'_>, max_concurrent: usize) -> Result<BatchReport> {
    let pdfs = scan_pdfs(dir)?;
    if pdfs.is_empty() {
        log::warn!(target: "shastra::batch", "no PDF files found in {}", dir.display());
    }

    let queue = ImportQueue::new(max_concurrent);
    for pdf in pdfs {
        queue.enqueue(ImportTask::new(pdf));
    }
    Ok(queue.run(pipeline))
}
