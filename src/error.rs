use std::path::PathBuf;
use thiserror::Error;

/// 文档级致命错误
///
/// 单个后端失败不会走到这里（见 `extractor::Attempt`），
/// 只有打开文件、读取配置、写索引等无法恢复的问题才会向上传播。
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("file not found: {}", .0.display())]
    NotFound(PathBuf),
    #[error("configuration error: {0}")]
    Config(String),
    #[error("repair table error: {0}")]
    Repair(#[from] RepairError),
    #[error("index error: {0}")]
    Index(#[from] IndexError),
    #[error("processed store error: {0}")]
    Store(String),
}

/// 字符修复表错误
#[derive(Error, Debug, PartialEq, Eq)]
pub enum RepairError {
    #[error("unknown repair profile: {0}")]
    UnknownProfile(String),
    #[error("mapping key {0:?} must be exactly one code point")]
    InvalidKey(String),
    #[error("mapping target {target:?} of {source_char:?} is itself a mapping source")]
    ChainedMapping { source_char: char, target: String },
    #[error("failed to parse repair profile: {0}")]
    Parse(String),
}

/// 索引协作方错误
#[derive(Error, Debug)]
pub enum IndexError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("index returned status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("invalid index URL: {0}")]
    InvalidUrl(String),
    #[error("document rejected: {0}")]
    Rejected(String),
}

impl From<rusqlite::Error> for PipelineError {
    fn from(e: rusqlite::Error) -> Self {
        PipelineError::Store(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;
