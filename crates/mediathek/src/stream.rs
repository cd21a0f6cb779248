//! Row-batched table streaming with on-demand media fetch.
//!
//! [`stream`] opens one table of a database version as a sequence of
//! Arrow record batches. Before a batch is handed out, the media files
//! it references (through its `file` column, when present) are
//! materialized in the cache, so consumers can start working before the
//! whole database is downloaded. Batches can be shuffled within a
//! bounded buffer using a deterministic PRNG.
//!
//! Tables must be stored as Parquet to be streamable; CSV tables are
//! readable through the regular load path but not row-streamed.

use crate::config::Config;
use crate::error::{ErrorKind, Result, from_deps};
use crate::filter::Filter;
use crate::load::{LoadRequest, load};
use arrow::array::{Array, StringArray, UInt32Array};
use arrow::compute::{concat_batches, take};
use arrow::datatypes::SchemaRef;
use arrow::record_batch::RecordBatch;
use mediathek_deps::DependencyTable;
use mediathek_flavor::FlavorSpec;
use mediathek_flavor::MediaTransform;
use parquet::arrow::arrow_reader::{ParquetRecordBatchReader, ParquetRecordBatchReaderBuilder};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use std::collections::VecDeque;
use std::fs::File;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

const DEFAULT_BATCH_SIZE: usize = 16;
const DEFAULT_BUFFER_SIZE: usize = 10_000;

/// What to stream and how.
#[derive(Clone)]
pub struct StreamRequest {
    /// Database name.
    pub name: String,
    /// Table id to stream.
    pub table: String,
    /// Version; latest when unset.
    pub version: Option<String>,
    /// Rows per emitted batch.
    pub batch_size: usize,
    /// Rows held back for shuffling.
    pub buffer_size: usize,
    /// Shuffle rows within the buffer.
    pub shuffle: bool,
    /// PRNG seed; a fixed seed makes the shuffle deterministic.
    pub seed: Option<u64>,
    /// Skip media materialization entirely.
    pub only_metadata: bool,
    /// Flavor for the fetched media.
    pub flavor: FlavorSpec,
    /// Audio transform collaborator for non-default flavors.
    pub transform: Option<Arc<dyn MediaTransform>>,
    /// Parallel fetch slots for the per-batch media loads.
    pub num_workers: usize,
    /// Cooperative cancellation.
    pub cancel: CancellationToken,
}

impl std::fmt::Debug for StreamRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamRequest")
            .field("name", &self.name)
            .field("table", &self.table)
            .field("version", &self.version)
            .field("batch_size", &self.batch_size)
            .field("buffer_size", &self.buffer_size)
            .field("shuffle", &self.shuffle)
            .field("seed", &self.seed)
            .field("only_metadata", &self.only_metadata)
            .field("num_workers", &self.num_workers)
            .finish_non_exhaustive()
    }
}

impl StreamRequest {
    pub fn new(name: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            table: table.into(),
            version: None,
            batch_size: DEFAULT_BATCH_SIZE,
            buffer_size: DEFAULT_BUFFER_SIZE,
            shuffle: false,
            seed: None,
            only_metadata: false,
            flavor: FlavorSpec::default(),
            transform: None,
            num_workers: crate::fetch::default_workers(),
            cancel: CancellationToken::new(),
        }
    }
}

/// Open a table as a batch iterator.
///
/// This materializes the header, the dependency table, and the requested
/// table file (but no media) in the cache, then streams batches with
/// [`DatabaseStream::next_batch`].
pub async fn stream(config: &Config, request: StreamRequest) -> Result<DatabaseStream<'_>> {
    let outcome = load(
        config,
        LoadRequest {
            name: request.name.clone(),
            version: request.version.clone(),
            tables: Filter::names([request.table.clone()]),
            media: Filter::none(),
            attachments: Filter::none(),
            flavor: request.flavor.clone(),
            only_metadata: true,
            include_removed: false,
            num_workers: request.num_workers,
            transform: request.transform.clone(),
            cancel: request.cancel.clone(),
        },
    )
    .await?;

    let table_path = outcome
        .deps
        .tables()
        .find(|path| mediathek_deps::table_id_of(path) == Some(request.table.as_str()))
        .map(str::to_string)
        .ok_or_else(|| {
            exn::Exn::from(ErrorKind::InvalidArgument(format!("could not find the table '{}'", request.table)))
        })?;
    if outcome.deps.format(&table_path).map_err(from_deps)? != "parquet" {
        exn::bail!(ErrorKind::InvalidArgument(format!(
            "table '{}' is stored as CSV and cannot be streamed",
            request.table
        )));
    }

    let file = File::open(outcome.root.join(&table_path)).map_err(ErrorKind::Io)?;
    let builder = ParquetRecordBatchReaderBuilder::try_new(file)
        .map_err(|e| ErrorKind::Corrupt(e.to_string()))?
        .with_batch_size(request.batch_size.max(1));
    let schema = builder.schema().clone();
    let reader = builder.build().map_err(|e| ErrorKind::Corrupt(e.to_string()))?;

    let rng = match request.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };
    Ok(DatabaseStream {
        config,
        version: outcome.version,
        deps: outcome.deps,
        schema,
        reader: Some(reader),
        request,
        rng,
        shuffled: VecDeque::new(),
    })
}

/// A table opened for batch iteration.
///
/// Dropping the stream is the cancellation path: no media beyond the
/// batches already requested is ever fetched.
pub struct DatabaseStream<'a> {
    config: &'a Config,
    request: StreamRequest,
    version: String,
    deps: DependencyTable,
    schema: SchemaRef,
    reader: Option<ParquetRecordBatchReader>,
    rng: StdRng,
    shuffled: VecDeque<RecordBatch>,
}

impl std::fmt::Debug for DatabaseStream<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatabaseStream")
            .field("version", &self.version)
            .field("request", &self.request)
            .finish_non_exhaustive()
    }
}

impl DatabaseStream<'_> {
    /// Schema of the streamed table.
    pub fn schema(&self) -> SchemaRef {
        self.schema.clone()
    }

    /// The version being streamed.
    pub fn version(&self) -> &str {
        &self.version
    }

    /// The next batch, with its media files materialized.
    ///
    /// Returns `Ok(None)` once the table is exhausted.
    pub async fn next_batch(&mut self) -> Result<Option<RecordBatch>> {
        if self.request.cancel.is_cancelled() {
            exn::bail!(ErrorKind::Cancelled);
        }
        let batch = match self.request.shuffle {
            false => self.read_sequential()?,
            true => self.read_shuffled()?,
        };
        let Some(batch) = batch else {
            return Ok(None);
        };
        if !self.request.only_metadata {
            self.ensure_media(&batch).await?;
        }
        Ok(Some(batch))
    }

    fn read_sequential(&mut self) -> Result<Option<RecordBatch>> {
        let Some(reader) = self.reader.as_mut() else {
            return Ok(None);
        };
        match reader.next() {
            Some(batch) => Ok(Some(batch.map_err(|e| ErrorKind::Corrupt(e.to_string()))?)),
            None => {
                self.reader = None;
                Ok(None)
            },
        }
    }

    /// Fill the buffer up to `buffer_size` rows, permute it once, and
    /// drain it batch by batch before refilling.
    fn read_shuffled(&mut self) -> Result<Option<RecordBatch>> {
        if let Some(ready) = self.shuffled.pop_front() {
            return Ok(Some(ready));
        }
        let mut pending = Vec::new();
        let mut rows = 0usize;
        while rows < self.request.buffer_size.max(self.request.batch_size) {
            match self.read_sequential()? {
                Some(batch) => {
                    rows += batch.num_rows();
                    pending.push(batch);
                },
                None => break,
            }
        }
        if pending.is_empty() {
            return Ok(None);
        }
        let combined = concat_batches(&self.schema, &pending).map_err(|e| ErrorKind::Corrupt(e.to_string()))?;
        let mut order: Vec<u32> = (0..combined.num_rows() as u32).collect();
        order.shuffle(&mut self.rng);
        let indices = UInt32Array::from(order);
        let columns = combined
            .columns()
            .iter()
            .map(|column| take(column, &indices, None))
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| ErrorKind::Corrupt(e.to_string()))?;
        let permuted =
            RecordBatch::try_new(self.schema.clone(), columns).map_err(|e| ErrorKind::Corrupt(e.to_string()))?;
        let mut offset = 0;
        while offset < permuted.num_rows() {
            let length = self.request.batch_size.min(permuted.num_rows() - offset);
            self.shuffled.push_back(permuted.slice(offset, length));
            offset += length;
        }
        Ok(self.shuffled.pop_front())
    }

    /// Fetch the media files referenced by a batch's `file` column.
    async fn ensure_media(&self, batch: &RecordBatch) -> Result<()> {
        let Some(column) = batch.column_by_name("file") else {
            return Ok(());
        };
        let Some(files) = column.as_any().downcast_ref::<StringArray>() else {
            return Ok(());
        };
        let mut wanted: Vec<String> = (0..files.len())
            .filter(|i| !files.is_null(*i))
            .map(|i| files.value(i).to_string())
            .filter(|file| self.deps.contains(file) && !self.deps.is_removed(file).unwrap_or(true))
            .collect();
        wanted.sort_unstable();
        wanted.dedup();
        if wanted.is_empty() {
            return Ok(());
        }
        load(
            self.config,
            LoadRequest {
                name: self.request.name.clone(),
                version: Some(self.version.clone()),
                tables: Filter::none(),
                media: Filter::names(wanted),
                attachments: Filter::none(),
                flavor: self.request.flavor.clone(),
                only_metadata: false,
                include_removed: false,
                num_workers: self.request.num_workers,
                transform: self.request.transform.clone(),
                cancel: self.request.cancel.clone(),
            },
        )
        .await?;
        Ok(())
    }
}
