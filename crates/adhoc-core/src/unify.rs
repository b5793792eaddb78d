//! Result-stream unification
//!
//! [`BatchUnifier`] drains a [`BatchStream`] either into one [`Table`] or
//! straight into an Arrow IPC stream on a byte sink. Batches are pulled one
//! at a time and dropped as soon as they have been copied or written, so
//! only the destination grows.

use std::io::{Read, Write};

use arrow::datatypes::SchemaRef;
use arrow::record_batch::RecordBatch;
use arrow_ipc::writer::StreamWriter;
use tracing::{debug, info};

use crate::allocator::BufferAllocator;
use crate::error::{AdhocError, Result};
use crate::schema::ensure_batch_fits;
use crate::stream::{BatchStream, IpcBatchStream};
use crate::table::Table;

/// Counts reported by [`BatchUnifier::write_to_stream`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteSummary {
    pub batches: usize,
    pub rows: usize,
}

/// Drains batch streams into tables or IPC byte streams
#[derive(Debug, Clone, Default)]
pub struct BatchUnifier {
    allocator: BufferAllocator,
}

impl BatchUnifier {
    pub fn new(allocator: BufferAllocator) -> Self {
        Self { allocator }
    }

    pub fn allocator(&self) -> &BufferAllocator {
        &self.allocator
    }

    /// Concatenate every remaining batch of `stream` into one table.
    ///
    /// The stream is borrowed and left open. On error the partially built
    /// table is dropped, returning its memory before this call returns.
    pub async fn unify_to_table<S>(&self, stream: &mut S) -> Result<Table>
    where
        S: BatchStream + ?Sized,
    {
        let mut table = Table::empty(stream.schema(), &self.allocator)?;
        let mut batches = 0usize;

        while let Some(batch) = stream.next_batch().await {
            table.append(batch?)?;
            batches += 1;
        }
        table.compact()?;

        info!(
            stream = stream.name(),
            batches,
            rows = table.num_rows(),
            "Unified stream into table"
        );
        Ok(table)
    }

    /// Serialize every remaining batch of `stream` to `sink` as an IPC stream.
    ///
    /// Returns the sink together with what was written. A `None` sink is a
    /// no-op: nothing is pulled from the stream and nothing is written.
    pub async fn write_to_stream<S, W>(
        &self,
        stream: &mut S,
        sink: Option<W>,
    ) -> Result<(WriteSummary, Option<W>)>
    where
        S: BatchStream + ?Sized,
        W: Write,
    {
        let Some(sink) = sink else {
            debug!(stream = stream.name(), "No sink provided, skipping write");
            return Ok((WriteSummary::default(), None));
        };

        let mut writer = IpcStreamSink::try_new(sink, stream.schema())?;
        while let Some(batch) = stream.next_batch().await {
            writer.write(batch?)?;
        }
        let summary = writer.summary();
        let sink = writer.finish()?;

        info!(
            stream = stream.name(),
            batches = summary.batches,
            rows = summary.rows,
            "Wrote stream to sink"
        );
        Ok((summary, Some(sink)))
    }
}

/// Parse an IPC stream previously produced by [`BatchUnifier::write_to_stream`]
pub fn read_stream<R: Read>(reader: R) -> Result<IpcBatchStream<R>> {
    IpcBatchStream::try_new(reader)
}

/// Incremental IPC stream writer bound to one schema.
///
/// Creating it writes the schema header; [`IpcStreamSink::finish`] writes the
/// end-of-stream marker and hands the sink back.
pub struct IpcStreamSink<W: Write> {
    writer: StreamWriter<W>,
    schema: SchemaRef,
    summary: WriteSummary,
}

impl<W: Write> IpcStreamSink<W> {
    pub fn try_new(sink: W, schema: SchemaRef) -> Result<Self> {
        let writer = StreamWriter::try_new(sink, &schema).map_err(AdhocError::from_sink)?;
        Ok(Self {
            writer,
            schema,
            summary: WriteSummary::default(),
        })
    }

    /// Write one batch as one stream message, then drop it
    pub fn write(&mut self, batch: RecordBatch) -> Result<()> {
        ensure_batch_fits(&self.schema, &batch)?;
        self.writer.write(&batch).map_err(AdhocError::from_sink)?;
        self.summary.batches += 1;
        self.summary.rows += batch.num_rows();
        Ok(())
    }

    pub fn summary(&self) -> WriteSummary {
        self.summary
    }

    /// Write the end-of-stream marker, flush, and return the sink
    pub fn finish(mut self) -> Result<W> {
        self.writer.finish().map_err(AdhocError::from_sink)?;
        self.writer.into_inner().map_err(AdhocError::from_sink)
    }
}
