//! Raw binary file backend
//!
//! Each file stores every column as one contiguous little-endian block at a
//! known byte offset. Row ranges are served with a positioned read of just
//! the bytes they cover, so a chunk never pulls in the rest of the file.

use bytes::Bytes;
use lazycat_array::{ColumnSchema, FileSchema, ReadRequest, StorageBackend, StorageError};
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::ops::Range;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, trace};

/// A column block inside a raw file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawColumn {
    /// Name, dtype and row shape
    pub schema: ColumnSchema,
    /// Byte offset of row 0
    pub offset: u64,
}

/// Column blocks of one raw file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawFileLayout {
    /// Rows in every column
    pub rows: usize,
    /// Column blocks in file order
    pub columns: Vec<RawColumn>,
}

impl RawFileLayout {
    /// Columns stored back to back from the start of the file.
    #[must_use]
    pub fn packed(rows: usize, columns: Vec<ColumnSchema>) -> Self {
        Self::with_header(0, rows, columns)
    }

    /// Columns stored back to back after `header_bytes` of preamble.
    #[must_use]
    pub fn with_header(header_bytes: u64, rows: usize, columns: Vec<ColumnSchema>) -> Self {
        let mut offset = header_bytes;
        let columns = columns
            .into_iter()
            .map(|schema| {
                let column = RawColumn { offset, schema };
                offset += (rows * column.schema.row_bytes()) as u64;
                column
            })
            .collect();
        Self { rows, columns }
    }

    /// First byte past the last column block
    #[must_use]
    pub fn end_offset(&self) -> u64 {
        self.columns
            .iter()
            .map(|c| c.offset + (self.rows * c.schema.row_bytes()) as u64)
            .max()
            .unwrap_or(0)
    }

    fn column(&self, name: &str) -> Option<&RawColumn> {
        self.columns.iter().find(|c| c.schema.name == name)
    }

    /// Offset and length of `rows` inside the block of `column`.
    fn span(&self, column: &RawColumn, rows: &Range<usize>) -> (u64, usize) {
        let row_bytes = column.schema.row_bytes();
        (
            column.offset + (rows.start * row_bytes) as u64,
            rows.len() * row_bytes,
        )
    }
}

struct RawFile {
    path: PathBuf,
    layout: RawFileLayout,
    generation: u64,
}

/// Backend reading column blocks straight out of files on disk.
pub struct RawFileStorage {
    id: String,
    files: RwLock<HashMap<String, RawFile>>,
    generations: AtomicU64,
}

impl RawFileStorage {
    /// Create an empty backend with a fresh identity.
    #[must_use]
    pub fn new() -> Self {
        Self::with_id(format!("raw-{}", uuid::Uuid::new_v4()))
    }

    /// Create an empty backend with a fixed identity.
    ///
    /// The identity is part of every read fingerprint: two backends with the
    /// same id must serve the same bytes for the same file names.
    #[must_use]
    pub fn with_id(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            files: RwLock::new(HashMap::new()),
            generations: AtomicU64::new(0),
        }
    }

    /// Register `path` under `name`, replacing any earlier registration.
    ///
    /// Each registration gets a new [`FileSchema::generation`]. Re-register
    /// a file after rewriting it on disk so that cached results of the old
    /// contents stop matching.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Io`] if the file cannot be inspected and
    /// [`StorageError::InvalidData`] for duplicate column names or a file
    /// shorter than its column blocks.
    pub fn add_file(
        &self,
        name: impl Into<String>,
        path: impl AsRef<Path>,
        layout: RawFileLayout,
    ) -> Result<(), StorageError> {
        let name = name.into();
        let path = path.as_ref().to_path_buf();

        let mut seen = HashSet::new();
        if let Some(dup) = layout
            .columns
            .iter()
            .find(|c| !seen.insert(c.schema.name.as_str()))
        {
            return Err(StorageError::invalid_data(
                &name,
                format!("duplicate column '{}'", dup.schema.name),
            ));
        }

        let len = std::fs::metadata(&path)
            .map_err(|source| StorageError::Io {
                file: name.clone(),
                source,
            })?
            .len();
        if len < layout.end_offset() {
            return Err(StorageError::invalid_data(
                &name,
                format!(
                    "file holds {len} bytes, columns need {}",
                    layout.end_offset()
                ),
            ));
        }

        debug!(file = %name, path = %path.display(), rows = layout.rows, "registered raw file");
        let generation = self.generations.fetch_add(1, Ordering::Relaxed);
        self.files.write().insert(
            name,
            RawFile {
                path,
                layout,
                generation,
            },
        );
        Ok(())
    }

    /// Registered file names, sorted
    #[must_use]
    pub fn files(&self) -> Vec<String> {
        let mut names: Vec<String> = self.files.read().keys().cloned().collect();
        names.sort();
        names
    }
}

impl Default for RawFileStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for RawFileStorage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RawFileStorage")
            .field("id", &self.id)
            .field("files", &self.files.read().len())
            .finish()
    }
}

impl StorageBackend for RawFileStorage {
    fn id(&self) -> &str {
        &self.id
    }

    fn schema(&self, file: &str) -> Result<FileSchema, StorageError> {
        let files = self.files.read();
        let raw = files
            .get(file)
            .ok_or_else(|| StorageError::file_not_found(file))?;
        Ok(FileSchema {
            rows: raw.layout.rows,
            generation: raw.generation,
            columns: raw.layout.columns.iter().map(|c| c.schema.clone()).collect(),
        })
    }

    fn read_range(&self, request: &ReadRequest) -> Result<Bytes, StorageError> {
        let (path, offset, len) = {
            let files = self.files.read();
            let raw = files
                .get(&request.file)
                .ok_or_else(|| StorageError::file_not_found(&request.file))?;
            let column = raw
                .layout
                .column(&request.column)
                .ok_or_else(|| StorageError::column_not_found(&request.file, &request.column))?;
            if request.rows.start > request.rows.end || request.rows.end > raw.layout.rows {
                return Err(StorageError::OutOfRange {
                    file: request.file.clone(),
                    start: request.rows.start,
                    end: request.rows.end,
                    rows: raw.layout.rows,
                });
            }
            let (offset, len) = raw.layout.span(column, &request.rows);
            (raw.path.clone(), offset, len)
        };

        trace!(file = %request.file, column = %request.column, offset, len, "raw read");
        let io_error = |source: io::Error| {
            if source.kind() == io::ErrorKind::UnexpectedEof {
                StorageError::corrupt(&request.file, "file ends inside a column block")
            } else {
                StorageError::Io {
                    file: request.file.clone(),
                    source,
                }
            }
        };
        let mut handle = File::open(&path).map_err(io_error)?;
        handle.seek(SeekFrom::Start(offset)).map_err(io_error)?;
        let mut buf = vec![0_u8; len];
        handle.read_exact(&mut buf).map_err(io_error)?;
        Ok(Bytes::from(buf))
    }

    fn byte_range(&self, request: &ReadRequest, row_bytes: usize) -> Range<u64> {
        let files = self.files.read();
        let located = files.get(&request.file).and_then(|raw| {
            raw.layout
                .column(&request.column)
                .map(|column| raw.layout.span(column, &request.rows))
        });
        match located {
            Some((offset, len)) => offset..offset + len as u64,
            None => {
                request.rows.start as u64 * row_bytes as u64
                    ..request.rows.end as u64 * row_bytes as u64
            }
        }
    }
}
