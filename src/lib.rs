//! 经书 PDF 的文本重建、分章与检索索引
//!
//! 流程：多策略提取（带页标记）→ 字符修复与清洗 → 分章分段 → 展开为索引文档 → 写入检索索引。

pub mod config;
pub mod error;
pub mod extractor;
pub mod import_queue;
pub mod index;
pub mod logging;
pub mod markers;
pub mod normalizer;
pub mod parser;
pub mod processed;
pub mod repair;

pub use config::PipelineConfig;
pub use error::{IndexError, PipelineError, RepairError, Result};
pub use extractor::{DocumentMetadata, ExtractionResult, MultiStrategyExtractor, RawPage};
pub use import_queue::{BatchReport, ImportOptions, ImportPipeline, ImportQueue};
pub use index::{IndexDocument, IndexDocumentBuilder, MemoryIndex, OpenSearchClient, SearchIndex, SearchQuery};
pub use normalizer::TextNormalizer;
pub use parser::{Book, BookParser, Chapter, Language, Parser, StructuralSegmenter};
pub use processed::{MarkerDirStore, ProcessedStore, SqliteStore};
pub use repair::{CharacterRepairEngine, ProfileRegistry, RepairProfile};
