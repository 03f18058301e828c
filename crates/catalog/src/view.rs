//! Catalog views over one or more files

use crate::{Error, Result};
use lazycat_array::{
    ChunkLayout, ChunkedArray, ColumnSchema, ReadSpec, StorageBackend,
};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::ops::Range;
use std::sync::Arc;
use tracing::{debug, instrument};

/// Rows per chunk unless configured otherwise
pub const DEFAULT_CHUNK_ROWS: usize = 100_000;

/// Rows of one file exposed by a view.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Segment {
    file: String,
    rows: Range<usize>,
    generation: u64,
}

/// Builder for [`CatalogView`]
pub struct CatalogBuilder {
    storage: Arc<dyn StorageBackend>,
    files: Vec<String>,
    chunk_rows: usize,
    attrs: BTreeMap<String, Value>,
}

impl CatalogBuilder {
    /// Append one file.
    #[must_use]
    pub fn file(mut self, file: impl Into<String>) -> Self {
        self.files.push(file.into());
        self
    }

    /// Append several files, keeping their order.
    #[must_use]
    pub fn files<I, S>(mut self, files: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.files.extend(files.into_iter().map(Into::into));
        self
    }

    /// Maximum rows per chunk
    #[must_use]
    pub const fn chunk_rows(mut self, rows: usize) -> Self {
        self.chunk_rows = rows;
        self
    }

    /// Attach a metadata attribute
    #[must_use]
    pub fn attr(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attrs.insert(key.into(), value.into());
        self
    }

    /// Read every file's schema and assemble the view.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoFiles`], [`Error::InvalidChunkSize`],
    /// [`Error::Storage`] when a schema cannot be read and
    /// [`Error::SchemaMismatch`] when files disagree on their columns.
    #[instrument(name = "catalog_build", skip(self), fields(files = self.files.len()))]
    pub fn build(self) -> Result<CatalogView> {
        let Some(first) = self.files.first() else {
            return Err(Error::NoFiles);
        };
        if self.chunk_rows == 0 {
            return Err(Error::InvalidChunkSize { chunk_rows: 0 });
        }

        let reference = self.storage.schema(first)?;
        let mut segments = Vec::with_capacity(self.files.len());
        for file in &self.files {
            let schema = self.storage.schema(file)?;
            check_schema(file, &schema.columns, first, &reference.columns)?;
            segments.push(Segment {
                file: file.clone(),
                rows: 0..schema.rows,
                generation: schema.generation,
            });
        }

        let view = CatalogView::assemble(
            self.storage,
            segments,
            reference.columns,
            self.chunk_rows,
            self.attrs,
        )?;
        debug!(
            rows = view.size(),
            chunks = view.layout.num_chunks(),
            columns = view.schema.len(),
            "catalog view ready"
        );
        Ok(view)
    }
}

fn check_schema(
    file: &str,
    columns: &[ColumnSchema],
    reference_file: &str,
    reference: &[ColumnSchema],
) -> Result<()> {
    if columns.len() != reference.len() {
        return Err(Error::schema_mismatch(
            file,
            reference_file,
            format!("{} columns, expected {}", columns.len(), reference.len()),
        ));
    }
    for (found, expected) in columns.iter().zip(reference) {
        if found.name != expected.name {
            return Err(Error::schema_mismatch(
                file,
                reference_file,
                format!("column '{}' where '{}' was expected", found.name, expected.name),
            ));
        }
        if found.dtype != expected.dtype || found.trailing != expected.trailing {
            return Err(Error::schema_mismatch(
                file,
                reference_file,
                format!(
                    "column '{}' is {} {:?}, expected {} {:?}",
                    found.name, found.dtype, found.trailing, expected.dtype, expected.trailing
                ),
            ));
        }
    }
    Ok(())
}

/// Columns of a set of files presented as chunked arrays.
///
/// Files are laid end to end in the order given; each one is cut into
/// chunks of at most `chunk_rows` rows so that no chunk spans two files.
/// Every column of the view shares the same [`ChunkLayout`], which lets
/// columns be combined elementwise without rechunking.
pub struct CatalogView {
    storage: Arc<dyn StorageBackend>,
    segments: Vec<Segment>,
    schema: Vec<ColumnSchema>,
    layout: ChunkLayout,
    chunk_rows: usize,
    attrs: BTreeMap<String, Value>,
    memo: Mutex<HashMap<String, ChunkedArray>>,
}

impl CatalogView {
    /// Start building a view over `storage`.
    #[must_use]
    pub fn builder(storage: Arc<dyn StorageBackend>) -> CatalogBuilder {
        CatalogBuilder {
            storage,
            files: Vec::new(),
            chunk_rows: DEFAULT_CHUNK_ROWS,
            attrs: BTreeMap::new(),
        }
    }

    fn assemble(
        storage: Arc<dyn StorageBackend>,
        segments: Vec<Segment>,
        schema: Vec<ColumnSchema>,
        chunk_rows: usize,
        attrs: BTreeMap<String, Value>,
    ) -> Result<Self> {
        let mut layout = ChunkLayout::single(0);
        for segment in &segments {
            layout = layout.concat(&ChunkLayout::uniform(segment.rows.len(), chunk_rows)?);
        }
        Ok(Self {
            storage,
            segments,
            schema,
            layout,
            chunk_rows,
            attrs,
            memo: Mutex::new(HashMap::new()),
        })
    }

    /// The column `name` as a chunked array.
    ///
    /// Arrays are built once per view; later calls return the same graph.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ColumnNotFound`] listing the available columns.
    pub fn column(&self, name: &str) -> Result<ChunkedArray> {
        let mut memo = self.memo.lock();
        if let Some(array) = memo.get(name) {
            return Ok(array.clone());
        }

        let schema = self
            .schema
            .iter()
            .find(|c| c.name == name)
            .ok_or_else(|| Error::column_not_found(name, self.columns()))?;

        let mut parts = Vec::with_capacity(self.segments.len());
        for segment in self.segments.iter().filter(|s| !s.rows.is_empty()) {
            parts.push(self.read(segment, schema)?);
        }
        let array = if parts.is_empty() {
            // an empty view still needs a leaf to carry dtype and row shape
            match self.segments.first() {
                Some(segment) => self.read(segment, schema)?,
                None => return Err(Error::NoFiles),
            }
        } else {
            let refs: Vec<&ChunkedArray> = parts.iter().collect();
            ChunkedArray::concatenate(&refs, 0)?
        };

        debug!(
            column = name,
            node = %array.fingerprint().short(),
            chunks = array.num_chunks(),
            "built column"
        );
        memo.insert(name.to_string(), array.clone());
        Ok(array)
    }

    fn read(&self, segment: &Segment, schema: &ColumnSchema) -> Result<ChunkedArray> {
        let spec = ReadSpec {
            storage: Arc::clone(&self.storage),
            file: segment.file.clone(),
            column: schema.name.clone(),
            rows: segment.rows.clone(),
            dtype: schema.dtype,
            trailing: schema.trailing.clone(),
            generation: segment.generation,
        };
        Ok(ChunkedArray::read(spec, self.chunk_rows)?)
    }

    /// Rows `start..end` of the whole view for shard `index` of `count`.
    ///
    /// Shards are contiguous, disjoint, cover every row and differ in size
    /// by at most one row. The shard keeps the storage, chunk size and
    /// attributes of this view.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidShard`] unless `index < count`.
    pub fn shard(&self, index: usize, count: usize) -> Result<Self> {
        if index >= count {
            return Err(Error::InvalidShard { index, count });
        }
        let total = self.size();
        let start = total * index / count;
        let end = total * (index + 1) / count;

        let mut offset = 0;
        let segments = self
            .segments
            .iter()
            .map(|segment| {
                let len = segment.rows.len();
                let lo = start.clamp(offset, offset + len) - offset;
                let hi = end.clamp(offset, offset + len) - offset;
                offset += len;
                Segment {
                    file: segment.file.clone(),
                    rows: segment.rows.start + lo..segment.rows.start + hi,
                    generation: segment.generation,
                }
            })
            .collect();

        debug!(index, count, start, end, "sharding catalog view");
        Self::assemble(
            Arc::clone(&self.storage),
            segments,
            self.schema.clone(),
            self.chunk_rows,
            self.attrs.clone(),
        )
    }

    /// Total rows over all files
    #[must_use]
    pub fn size(&self) -> usize {
        self.layout.total_rows()
    }

    /// Column names, in file order
    #[must_use]
    pub fn columns(&self) -> Vec<String> {
        self.schema.iter().map(|c| c.name.clone()).collect()
    }

    /// Column descriptions
    #[must_use]
    pub fn schema(&self) -> &[ColumnSchema] {
        &self.schema
    }

    /// Files in view order
    #[must_use]
    pub fn files(&self) -> Vec<&str> {
        self.segments.iter().map(|s| s.file.as_str()).collect()
    }

    /// Layout shared by every column
    #[must_use]
    pub const fn layout(&self) -> &ChunkLayout {
        &self.layout
    }

    /// Maximum rows per chunk
    #[must_use]
    pub const fn chunk_rows(&self) -> usize {
        self.chunk_rows
    }

    /// Metadata attributes
    #[must_use]
    pub const fn attrs(&self) -> &BTreeMap<String, Value> {
        &self.attrs
    }

    /// Mutable metadata attributes
    pub fn attrs_mut(&mut self) -> &mut BTreeMap<String, Value> {
        &mut self.attrs
    }

    /// Backend serving the files
    #[must_use]
    pub const fn storage(&self) -> &Arc<dyn StorageBackend> {
        &self.storage
    }
}

impl fmt::Debug for CatalogView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CatalogView")
            .field("storage", &self.storage.id())
            .field("files", &self.files())
            .field("rows", &self.size())
            .field("chunks", &self.layout.num_chunks())
            .field("columns", &self.columns())
            .finish_non_exhaustive()
    }
}
