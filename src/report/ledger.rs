//! Append-only CSV ledger for scored rows.
//!
//! Each invocation appends beneath whatever earlier runs wrote, building one
//! cumulative overview across input files. Writes go through a
//! `tokio::sync::Mutex` so a ledger can be shared between tasks.

use std::io::SeekFrom;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncSeekExt, AsyncWriteExt, BufReader};
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::{header_line, split_line, OutputRow, HEADERS};

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("{action} {}: {source}", path.display())]
    Io {
        action: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("{} has an unexpected header: {found:?}", path.display())]
    HeaderMismatch { path: PathBuf, found: String },
}

impl SinkError {
    fn io<'a>(action: &'static str, path: &'a Path) -> impl FnOnce(std::io::Error) -> Self + 'a {
        move |source| SinkError::Io {
            action,
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Destination for rendered rows. Implementations only ever append.
#[async_trait]
pub trait RowSink: Send + Sync {
    /// Append `rows` as one batch. Returns how many rows were written.
    async fn append(&self, rows: &[OutputRow]) -> Result<usize, SinkError>;
}

// ---------------------------------------------------------------------------
// CsvLedger
// ---------------------------------------------------------------------------

/// Delimited-text ledger file opened in append mode.
pub struct CsvLedger {
    path: PathBuf,
    writer: Mutex<tokio::fs::File>,
}

impl CsvLedger {
    /// Open (or create) the ledger at `path`.
    ///
    /// A missing or empty file gets the header first. An existing file must
    /// start with the expected header; anything else is refused rather than
    /// appended to.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, SinkError> {
        let path = path.into();

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(SinkError::io("failed to create ledger directory", parent))?;
        }

        let existing = inspect(&path).await?;

        let mut prefix = String::new();
        match &existing {
            None => prefix.push_str(&header_line()),
            Some(tail) => {
                let first = tail.first_line.trim_end_matches(['\r', '\n']);
                let first = first.trim_start_matches('\u{feff}');
                if split_line(first) != HEADERS {
                    return Err(SinkError::HeaderMismatch {
                        path,
                        found: first.to_string(),
                    });
                }
                if !tail.ends_with_newline {
                    prefix.push('\n');
                }
            }
        }

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .map_err(SinkError::io("failed to open ledger", &path))?;

        if !prefix.is_empty() {
            file.write_all(prefix.as_bytes())
                .await
                .map_err(SinkError::io("failed to write ledger", &path))?;
            file.flush()
                .await
                .map_err(SinkError::io("failed to flush ledger", &path))?;
            if existing.is_none() {
                info!(path = %path.display(), "ledger header written");
            }
        }

        debug!(path = %path.display(), "ledger opened");
        Ok(Self {
            path,
            writer: Mutex::new(file),
        })
    }

    /// Return the path of the ledger file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// First line and trailing byte of a non-empty ledger.
struct LedgerTail {
    first_line: String,
    ends_with_newline: bool,
}

/// Read only what the header check needs: the first line, and the last byte
/// for the newline repair. `None` for a missing or empty file.
async fn inspect(path: &Path) -> Result<Option<LedgerTail>, SinkError> {
    let file = match tokio::fs::File::open(path).await {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(SinkError::io("failed to read ledger", path)(e)),
    };
    let len = file
        .metadata()
        .await
        .map_err(SinkError::io("failed to read ledger", path))?
        .len();
    if len == 0 {
        return Ok(None);
    }

    let mut reader = BufReader::new(file);
    let mut first = Vec::new();
    reader
        .read_until(b'\n', &mut first)
        .await
        .map_err(SinkError::io("failed to read ledger", path))?;

    let mut file = reader.into_inner();
    file.seek(SeekFrom::End(-1))
        .await
        .map_err(SinkError::io("failed to read ledger", path))?;
    let last = file
        .read_u8()
        .await
        .map_err(SinkError::io("failed to read ledger", path))?;

    Ok(Some(LedgerTail {
        first_line: String::from_utf8_lossy(&first).into_owned(),
        ends_with_newline: last == b'\n',
    }))
}

#[async_trait]
impl RowSink for CsvLedger {
    async fn append(&self, rows: &[OutputRow]) -> Result<usize, SinkError> {
        if rows.is_empty() {
            return Ok(0);
        }
        let batch: String = rows.iter().map(OutputRow::to_line).collect();

        let mut writer = self.writer.lock().await;
        writer
            .write_all(batch.as_bytes())
            .await
            .map_err(SinkError::io("failed to write ledger", &self.path))?;
        writer
            .flush()
            .await
            .map_err(SinkError::io("failed to flush ledger", &self.path))?;

        debug!(path = %self.path.display(), rows = rows.len(), "rows appended");
        Ok(rows.len())
    }
}

// ---------------------------------------------------------------------------
// MemorySink
// ---------------------------------------------------------------------------

/// Collects rows in memory, for dry runs.
#[derive(Default)]
pub struct MemorySink {
    rows: Mutex<Vec<OutputRow>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything appended so far, rendered with the header.
    pub async fn render(&self) -> String {
        let rows = self.rows.lock().await;
        std::iter::once(header_line())
            .chain(rows.iter().map(OutputRow::to_line))
            .collect()
    }

    pub async fn rows(&self) -> Vec<OutputRow> {
        self.rows.lock().await.clone()
    }
}

#[async_trait]
impl RowSink for MemorySink {
    async fn append(&self, rows: &[OutputRow]) -> Result<usize, SinkError> {
        self.rows.lock().await.extend_from_slice(rows);
        Ok(rows.len())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
