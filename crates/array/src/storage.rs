//! Columnar storage backends
//!
//! Leaf reads go through [`StorageBackend`]: a backend describes the columns
//! of each file and returns the little-endian bytes of a contiguous row
//! range. Anything that can do that (an in-memory table, raw binary files,
//! an object store) can feed the evaluator.

use crate::data::ArrayData;
use crate::dtype::DType;
use crate::error::StorageError;
use bytes::Bytes;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt;
use std::ops::Range;
use std::sync::atomic::{AtomicU64, Ordering};

/// Description of one column of a file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnSchema {
    /// Column name
    pub name: String,
    /// Element type
    pub dtype: DType,
    /// Shape of one row (empty for scalar rows)
    pub trailing: Vec<usize>,
}

impl ColumnSchema {
    /// Create a column description.
    #[must_use]
    pub fn new(name: impl Into<String>, dtype: DType, trailing: Vec<usize>) -> Self {
        Self {
            name: name.into(),
            dtype,
            trailing,
        }
    }

    /// Encoded bytes per row
    #[must_use]
    pub fn row_bytes(&self) -> usize {
        self.trailing.iter().product::<usize>() * self.dtype.size_bytes()
    }
}

/// Columns and row count of one file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileSchema {
    /// Rows shared by every column
    pub rows: usize,
    /// Columns in file order
    pub columns: Vec<ColumnSchema>,
    /// Version of the file's contents within its backend.
    ///
    /// Backends that allow a file to be replaced must hand out a new
    /// generation each time; it is part of every read fingerprint, so
    /// results computed from the old contents are never served for the new.
    pub generation: u64,
}

impl FileSchema {
    /// Look up a column by name.
    #[must_use]
    pub fn column(&self, name: &str) -> Option<&ColumnSchema> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Column names in file order
    #[must_use]
    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }
}

/// A contiguous row range of one column.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ReadRequest {
    /// File to read
    pub file: String,
    /// Column to read
    pub column: String,
    /// Rows to return
    pub rows: Range<usize>,
}

impl ReadRequest {
    /// Create a read request.
    #[must_use]
    pub fn new(file: impl Into<String>, column: impl Into<String>, rows: Range<usize>) -> Self {
        Self {
            file: file.into(),
            column: column.into(),
            rows,
        }
    }
}

/// Source of leaf column data.
pub trait StorageBackend: Send + Sync + fmt::Debug {
    /// Stable identity of this backend, part of every read fingerprint.
    fn id(&self) -> &str;

    /// Describe the columns of `file`.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::FileNotFound`] or an I/O error.
    fn schema(&self, file: &str) -> Result<FileSchema, StorageError>;

    /// Little-endian row-major bytes of the requested rows.
    ///
    /// # Errors
    ///
    /// Returns a [`StorageError`] if the file, column or rows do not exist
    /// or the backend cannot read them.
    fn read_range(&self, request: &ReadRequest) -> Result<Bytes, StorageError>;

    /// Bytes of the underlying file covered by `request`, for error reports.
    ///
    /// The default counts from the start of the column. Backends that pack
    /// several columns into one file report the absolute range.
    fn byte_range(&self, request: &ReadRequest, row_bytes: usize) -> Range<u64> {
        let row_bytes = row_bytes as u64;
        request.rows.start as u64 * row_bytes..request.rows.end as u64 * row_bytes
    }
}

struct MemoryFile {
    rows: usize,
    generation: u64,
    columns: Vec<(String, ArrayData)>,
}

/// Backend holding whole columns in memory.
///
/// Mostly useful for tests and for wrapping data produced elsewhere in the
/// process.
pub struct MemoryStorage {
    id: String,
    files: RwLock<HashMap<String, MemoryFile>>,
    generations: AtomicU64,
}

impl MemoryStorage {
    /// Create an empty backend with a fresh identity.
    #[must_use]
    pub fn new() -> Self {
        Self::with_id(format!("memory-{}", uuid::Uuid::new_v4()))
    }

    /// Create an empty backend with a fixed identity.
    #[must_use]
    pub fn with_id(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            files: RwLock::new(HashMap::new()),
            generations: AtomicU64::new(0),
        }
    }

    /// Register (or replace) a file made of named columns.
    ///
    /// Every call assigns the file a new [`FileSchema::generation`], so
    /// arrays built after a replacement never share cache entries with
    /// arrays built before it.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::InvalidData`] if a column is 0-d, a name is
    /// repeated, or the columns disagree on their row count.
    pub fn insert_file(
        &self,
        file: impl Into<String>,
        columns: Vec<(String, ArrayData)>,
    ) -> Result<(), StorageError> {
        let file = file.into();
        let mut rows = None;
        for (index, (name, data)) in columns.iter().enumerate() {
            if data.ndim() == 0 {
                return Err(StorageError::invalid_data(
                    &file,
                    format!("column '{name}' has no row axis"),
                ));
            }
            if columns[..index].iter().any(|(other, _)| other == name) {
                return Err(StorageError::invalid_data(
                    &file,
                    format!("column '{name}' appears twice"),
                ));
            }
            match rows {
                None => rows = Some(data.rows()),
                Some(expected) if expected != data.rows() => {
                    return Err(StorageError::invalid_data(
                        &file,
                        format!(
                            "column '{name}' has {} rows, expected {expected}",
                            data.rows()
                        ),
                    ));
                }
                Some(_) => {}
            }
        }
        let entry = MemoryFile {
            rows: rows.unwrap_or(0),
            generation: self.generations.fetch_add(1, Ordering::Relaxed),
            columns,
        };
        self.files.write().insert(file, entry);
        Ok(())
    }

    /// Names of the registered files, sorted.
    #[must_use]
    pub fn files(&self) -> Vec<String> {
        let mut names: Vec<String> = self.files.read().keys().cloned().collect();
        names.sort();
        names
    }
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for MemoryStorage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryStorage")
            .field("id", &self.id)
            .field("files", &self.files.read().len())
            .finish()
    }
}

impl StorageBackend for MemoryStorage {
    fn id(&self) -> &str {
        &self.id
    }

    fn schema(&self, file: &str) -> Result<FileSchema, StorageError> {
        let files = self.files.read();
        let entry = files
            .get(file)
            .ok_or_else(|| StorageError::file_not_found(file))?;
        Ok(FileSchema {
            rows: entry.rows,
            generation: entry.generation,
            columns: entry
                .columns
                .iter()
                .map(|(name, data)| {
                    ColumnSchema::new(name.clone(), data.dtype(), data.shape()[1..].to_vec())
                })
                .collect(),
        })
    }

    fn read_range(&self, request: &ReadRequest) -> Result<Bytes, StorageError> {
        let files = self.files.read();
        let entry = files
            .get(&request.file)
            .ok_or_else(|| StorageError::file_not_found(&request.file))?;
        let (_, data) = entry
            .columns
            .iter()
            .find(|(name, _)| *name == request.column)
            .ok_or_else(|| StorageError::column_not_found(&request.file, &request.column))?;
        let Range { start, end } = request.rows;
        if start > end || end > entry.rows {
            return Err(StorageError::OutOfRange {
                file: request.file.clone(),
                start,
                end,
                rows: entry.rows,
            });
        }
        let rows = data
            .slice_rows(start, end)
            .map_err(|e| StorageError::corrupt(&request.file, e.to_string()))?;
        Ok(Bytes::from(rows.to_le_bytes()))
    }
}
