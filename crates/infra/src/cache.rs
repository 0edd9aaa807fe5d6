//! Cache of finished aggregate results, keyed by the source book.
//!
//! Entries are plain text files named
//! `{origin title}___{origin author}___{translated title}___{translated author}___{timestamp}.txt`
//! with every field truncated and sanitized to `[A-Za-z0-9_.-]`. Lookups match
//! on the origin fields only. The cache keeps the `capacity` most recently
//! used entries by modification time.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use chrono::Local;
use thiserror::Error;
use tracing::{debug, warn};

use quire_core::BookInfo;

const FIELD_SEPARATOR: &str = "___";
const EXTENSION: &str = "txt";
const TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";
const TITLE_LIMIT: usize = 40;
const AUTHOR_LIMIT: usize = 30;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache io error: {0}")]
    Io(#[from] io::Error),
    #[error("cannot cache result: {0}")]
    Validation(String),
}

/// Storage for finished results.
pub trait ResultCache: Send + Sync {
    /// Aggregate text for `book`, if cached. A hit counts as a use.
    fn lookup(&self, book: &BookInfo) -> Result<Option<String>, CacheError>;

    /// Store the aggregate text for `book`, replacing any previous entry.
    fn store(&self, book: &BookInfo, text: &str) -> Result<(), CacheError>;
}

/// Directory-backed LRU cache.
#[derive(Debug, Clone)]
pub struct FileResultCache {
    dir: PathBuf,
    capacity: usize,
}

impl FileResultCache {
    pub fn new(dir: impl Into<PathBuf>, capacity: usize) -> Self {
        Self {
            dir: dir.into(),
            capacity: capacity.max(1),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Cached entries, most recently used first.
    pub fn entries(&self) -> Result<Vec<PathBuf>, CacheError> {
        let mut entries = match fs::read_dir(&self.dir) {
            Ok(read) => read
                .filter_map(|entry| entry.ok())
                .filter(|entry| entry.path().extension().is_some_and(|ext| ext == EXTENSION))
                .map(|entry| {
                    let modified = entry
                        .metadata()
                        .and_then(|m| m.modified())
                        .unwrap_or(SystemTime::UNIX_EPOCH);
                    (modified, entry.path())
                })
                .collect::<Vec<_>>(),
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        entries.sort_by(|a, b| b.cmp(a));
        Ok(entries.into_iter().map(|(_, path)| path).collect())
    }

    fn find(&self, book: &BookInfo) -> Result<Option<PathBuf>, CacheError> {
        let prefix = origin_prefix(book);
        Ok(self.entries()?.into_iter().find(|path| {
            path.file_name()
                .and_then(|name| name.to_str())
                .is_some_and(|name| name.starts_with(&prefix))
        }))
    }

    fn evict(&self) -> Result<(), CacheError> {
        for stale in self.entries()?.into_iter().skip(self.capacity) {
            debug!(path = %stale.display(), "evicting cached result");
            if let Err(e) = fs::remove_file(&stale) {
                warn!(path = %stale.display(), error = %e, "failed to evict cached result");
            }
        }
        Ok(())
    }
}

impl ResultCache for FileResultCache {
    fn lookup(&self, book: &BookInfo) -> Result<Option<String>, CacheError> {
        let Some(path) = self.find(book)? else {
            return Ok(None);
        };
        let text = fs::read_to_string(&path)?;

        // Re-stamp the entry so it counts as most recently used.
        let refreshed = restamp(&path);
        if refreshed != path {
            fs::rename(&path, &refreshed)?;
        }
        fs::File::options()
            .write(true)
            .open(&refreshed)?
            .set_modified(SystemTime::now())?;

        debug!(path = %refreshed.display(), "cache hit");
        Ok(Some(text))
    }

    fn store(&self, book: &BookInfo, text: &str) -> Result<(), CacheError> {
        if text.trim().is_empty() {
            return Err(CacheError::Validation("empty result".into()));
        }
        fs::create_dir_all(&self.dir)?;

        if let Some(previous) = self.find(book)? {
            fs::remove_file(previous)?;
        }
        let path = self.dir.join(file_name(book));
        fs::write(&path, text)?;
        debug!(path = %path.display(), "result cached");

        self.evict()
    }
}

/// Keep `[A-Za-z0-9_.-]`, replace everything else with `_`.
fn sanitize(field: &str) -> String {
    field
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

fn truncated(field: &str, limit: usize) -> String {
    sanitize(&field.chars().take(limit).collect::<String>())
}

fn origin_prefix(book: &BookInfo) -> String {
    format!(
        "{}{sep}{}{sep}",
        truncated(&book.origin_title, TITLE_LIMIT),
        truncated(&book.origin_author, AUTHOR_LIMIT),
        sep = FIELD_SEPARATOR,
    )
}

fn timestamp() -> String {
    Local::now().format(TIMESTAMP_FORMAT).to_string()
}

fn file_name(book: &BookInfo) -> String {
    format!(
        "{}{}{sep}{}{sep}{}.{EXTENSION}",
        origin_prefix(book),
        truncated(&book.translated_title, TITLE_LIMIT),
        truncated(&book.translated_author, AUTHOR_LIMIT),
        timestamp(),
        sep = FIELD_SEPARATOR,
    )
}

/// Same entry name with the current timestamp.
fn restamp(path: &Path) -> PathBuf {
    let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or_default();
    match stem.rsplit_once(FIELD_SEPARATOR) {
        Some((fields, _)) => path.with_file_name(format!(
            "{fields}{FIELD_SEPARATOR}{}.{EXTENSION}",
            timestamp()
        )),
        None => path.to_path_buf(),
    }
}
