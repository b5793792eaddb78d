//! Batch stream sources
//!
//! A [`BatchStream`] is a finite, pull-based, non-restartable sequence of
//! record batches that share one schema. It may fail mid-sequence; once it
//! returns `None` it is exhausted.

use std::io::Read;

use arrow::datatypes::SchemaRef;
use arrow::record_batch::RecordBatch;
use arrow_ipc::reader::StreamReader;
use async_trait::async_trait;

use crate::error::Result;

/// Trait for pull-based batch sources
#[async_trait]
pub trait BatchStream: Send {
    /// Schema declared for every batch of this stream
    fn schema(&self) -> SchemaRef;

    /// Get the next batch from the stream
    /// Returns None when the stream is exhausted
    async fn next_batch(&mut self) -> Option<Result<RecordBatch>>;

    /// Check if the stream has been drained
    fn is_exhausted(&self) -> bool;

    /// Get stream name, used in logs
    fn name(&self) -> &str;
}

/// In-memory batch stream, mostly for tests and demos
pub struct MemoryBatchStream {
    schema: SchemaRef,
    batches: std::vec::IntoIter<RecordBatch>,
    exhausted: bool,
    name: String,
}

impl MemoryBatchStream {
    /// Create a stream that yields `batches` in order.
    ///
    /// The batches are not checked against `schema`; consumers do that.
    pub fn new(schema: SchemaRef, batches: Vec<RecordBatch>) -> Self {
        Self {
            schema,
            batches: batches.into_iter(),
            exhausted: false,
            name: "memory".to_string(),
        }
    }

    /// Create with a custom name
    pub fn with_name(schema: SchemaRef, batches: Vec<RecordBatch>, name: impl Into<String>) -> Self {
        let mut stream = Self::new(schema, batches);
        stream.name = name.into();
        stream
    }

    /// Batches not yet pulled
    pub fn remaining(&self) -> usize {
        self.batches.len()
    }
}

#[async_trait]
impl BatchStream for MemoryBatchStream {
    fn schema(&self) -> SchemaRef {
        self.schema.clone()
    }

    async fn next_batch(&mut self) -> Option<Result<RecordBatch>> {
        match self.batches.next() {
            Some(batch) => Some(Ok(batch)),
            None => {
                self.exhausted = true;
                None
            }
        }
    }

    fn is_exhausted(&self) -> bool {
        self.exhausted
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Batch stream parsed from an Arrow IPC stream
pub struct IpcBatchStream<R: Read> {
    reader: StreamReader<R>,
    exhausted: bool,
    name: String,
}

impl<R: Read> IpcBatchStream<R> {
    /// Read the schema header from `reader`
    pub fn try_new(reader: R) -> Result<Self> {
        Ok(Self {
            reader: StreamReader::try_new(reader, None)?,
            exhausted: false,
            name: "ipc".to_string(),
        })
    }

    /// Create with a custom name
    pub fn with_name(reader: R, name: impl Into<String>) -> Result<Self> {
        let mut stream = Self::try_new(reader)?;
        stream.name = name.into();
        Ok(stream)
    }
}

#[async_trait]
impl<R: Read + Send> BatchStream for IpcBatchStream<R> {
    fn schema(&self) -> SchemaRef {
        self.reader.schema()
    }

    async fn next_batch(&mut self) -> Option<Result<RecordBatch>> {
        if self.exhausted {
            return None;
        }
        match self.reader.next() {
            Some(result) => Some(result.map_err(Into::into)),
            None => {
                self.exhausted = true;
                None
            }
        }
    }

    fn is_exhausted(&self) -> bool {
        self.exhausted
    }

    fn name(&self) -> &str {
        &self.name
    }
}
