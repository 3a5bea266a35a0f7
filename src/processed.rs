use crate::error::{PipelineError, Result};
use crate::index::path_digest;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// 已处理记录
///
/// 控制批处理是否跳过某个源文件；强制重新处理时由调用方绕过。
pub trait ProcessedStore: Send + Sync {
    fn is_processed(&self, source: &Path) -> Result<bool>;

    fn mark_processed(&self, source: &Path, book_title: &str, at: DateTime<Utc>) -> Result<()>;

    /// 删除某个源文件的记录，返回是否存在过
    fn forget(&self, source: &Path) -> Result<bool>;

    /// 删除某本书（按书名）的全部记录，返回删除数量
    fn forget_title(&self, book_title: &str) -> Result<usize>;
}

const MARKER_EXTENSION: &str = "processed";
const TITLE_PREFIX: &str = "Title: ";

/// 标记文件存储：每个源文件一个 `<stem>-<路径摘要>.processed`
///
/// 路径摘要与书籍 ID 的后缀相同，不同目录下的同名文件互不影响。
/// 文件内容第一行为 `Processed on: <时间>`，第二行记录书名。
#[derive(Debug, Clone)]
pub struct MarkerDirStore {
    dir: PathBuf,
}

impl MarkerDirStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn marker_path(&self, source: &Path) -> PathBuf {
        let stem = source
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| source.display().to_string());
        let digest = path_digest(&source_key(source));
        self.dir.join(format!("{}-{}.{}", stem, digest, MARKER_EXTENSION))
    }

    fn markers(&self) -> Result<Vec<PathBuf>> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }
        let mut markers = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) == Some(MARKER_EXTENSION) {
                markers.push(path);
            }
        }
        Ok(markers)
    }
}

impl ProcessedStore for MarkerDirStore {
    fn is_processed(&self, source: &Path) -> Result<bool> {
        Ok(self.marker_path(source).exists())
    }

    fn mark_processed(&self, source: &Path, book_title: &str, at: DateTime<Utc>) -> Result<()> {
        fs::create_dir_all(&self.dir)?;
        let contents = format!("Processed on: {}\n{}{}\n", at.to_rfc3339(), TITLE_PREFIX, book_title);
        fs::write(self.marker_path(source), contents)?;
        Ok(())
    }

    fn forget(&self, source: &Path) -> Result<bool> {
        let marker = self.marker_path(source);
        if !marker.exists() {
            return Ok(false);
        }
        fs::remove_file(marker)?;
        Ok(true)
    }

    fn forget_title(&self, book_title: &str) -> Result<usize> {
        let mut removed = 0;
        for marker in self.markers()? {
            let contents = fs::read_to_string(&marker)?;
            let matches = contents
                .lines()
                .filter_map(|line| line.strip_prefix(TITLE_PREFIX))
                .any(|title| title == book_title);
            if matches {
                fs::remove_file(&marker)?;
                removed += 1;
            }
        }
        Ok(removed)
    }
}

/// SQLite 存储
///
/// 连接放在 Mutex 里，批处理的多个工作线程共享同一个连接。
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// 打开（或创建）数据库并初始化表结构
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        Self::init(Connection::open(path)?)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute("PRAGMA encoding = 'UTF-8'", [])?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS processed_files (
                id INTEGER PRIMARY KEY,
                file_path TEXT NOT NULL UNIQUE,
                book_title TEXT NOT NULL,
                processed_at DATETIME NOT NULL
            )",
            [],
        )?;

        Ok(Self { conn: Mutex::new(conn) })
    }

    fn with_conn<T>(&self, f: impl FnOnce(&Connection) -> rusqlite::Result<T>) -> Result<T> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| PipelineError::Store(format!("connection lock poisoned: {}", e)))?;
        Ok(f(&*conn)?)
    }

    /// 某个源文件的处理时间
    pub fn processed_at(&self, source: &Path) -> Result<Option<String>> {
        let key = source_key(source);
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT processed_at FROM processed_files WHERE file_path = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()
        })
    }
}

fn source_key(source: &Path) -> String {
    source.display().to_string()
}

impl ProcessedStore for SqliteStore {
    fn is_processed(&self, source: &Path) -> Result<bool> {
        Ok(self.processed_at(source)?.is_some())
    }

    fn mark_processed(&self, source: &Path, book_title: &str, at: DateTime<Utc>) -> Result<()> {
        let key = source_key(source);
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO processed_files (file_path, book_title, processed_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT(file_path) DO UPDATE SET book_title = excluded.book_title,
                                                      processed_at = excluded.processed_at",
                params![key, book_title, at.to_rfc3339()],
            )
        })?;
        Ok(())
    }

    fn forget(&self, source: &Path) -> Result<bool> {
        let key = source_key(source);
        let removed = self.with_conn(|conn| conn.execute("DELETE FROM processed_files WHERE file_path = ?1", params![key]))?;
        Ok(removed > 0)
    }

    fn forget_title(&self, book_title: &str) -> Result<usize> {
        self.with_conn(|conn| conn.execute("DELETE FROM processed_files WHERE book_title = ?1", params![book_title]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn exercise(store: &dyn ProcessedStore) {
        let jaiva = Path::new("data/pdfs/jaiva-dharma.pdf");
        let prema = Path::new("data/pdfs/prema-pradipa.pdf");

        assert!(!store.is_processed(jaiva).unwrap());
        store.mark_processed(jaiva, "Jaiva Dharma", Utc::now()).unwrap();
        store.mark_processed(jaiva, "Jaiva Dharma", Utc::now()).unwrap();
        store.mark_processed(prema, "Prema Pradipa", Utc::now()).unwrap();
        assert!(store.is_processed(jaiva).unwrap());

        assert_eq!(store.forget_title("Jaiva Dharma").unwrap(), 1);
        assert!(!store.is_processed(jaiva).unwrap());
        assert!(store.is_processed(prema).unwrap());

        assert!(store.forget(prema).unwrap());
        assert!(!store.forget(prema).unwrap());
    }

    #[test]
    fn test_marker_dir_store() {
        let dir = tempdir().unwrap();
        let store = MarkerDirStore::new(dir.path().join("processed"));
        exercise(&store);
    }

    #[test]
    fn test_marker_contents() {
        let dir = tempdir().unwrap();
        let store = MarkerDirStore::new(dir.path());
        let source = Path::new("/library/Bhakti Rasayana.pdf");
        store.mark_processed(source, "Bhakti Rasayana", Utc::now()).unwrap();

        let marker = store.marker_path(source);
        let expected = format!("Bhakti Rasayana-{}.processed", path_digest("/library/Bhakti Rasayana.pdf"));
        assert_eq!(marker, dir.path().join(expected));
        let contents = fs::read_to_string(marker).unwrap();
        assert!(contents.starts_with("Processed on: "));
        assert!(contents.contains("Title: Bhakti Rasayana"));
    }

    #[test]
    fn test_marker_same_file_name_in_different_dirs() {
        let dir = tempdir().unwrap();
        let store = MarkerDirStore::new(dir.path());
        let first = Path::new("/library/a/Jaiva Dharma.pdf");
        let second = Path::new("/library/b/Jaiva Dharma.pdf");

        assert_ne!(store.marker_path(first), store.marker_path(second));
        store.mark_processed(first, "Jaiva Dharma", Utc::now()).unwrap();
        assert!(store.is_processed(first).unwrap());
        assert!(!store.is_processed(second).unwrap());
    }

    #[test]
    fn test_marker_store_missing_dir() {
        let dir = tempdir().unwrap();
        let store = MarkerDirStore::new(dir.path().join("never-created"));
        assert_eq!(store.forget_title("anything").unwrap(), 0);
    }

    #[test]
    fn test_sqlite_store_in_memory() {
        let store = SqliteStore::open_in_memory().unwrap();
        exercise(&store);
    }

    #[test]
    fn test_sqlite_store_persists() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("state").join("processed.db");
        let source = Path::new("book.pdf");

        {
            let store = SqliteStore::open(&db_path).unwrap();
            store.mark_processed(source, "Book", Utc::now()).unwrap();
        }

        let reopened = SqliteStore::open(&db_path).unwrap();
        assert!(reopened.is_processed(source).unwrap());
        assert!(reopened.processed_at(source).unwrap().is_some());
    }
}
