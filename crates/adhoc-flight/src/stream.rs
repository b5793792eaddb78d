//! Flight result stream
//!
//! Adapts a `DoGet` response into a [`BatchStream`] so results can be fed
//! straight into the unifier.

use std::sync::Arc;

use adhoc_core::{AdhocError, BatchStream};
use arrow::datatypes::{Schema, SchemaRef};
use arrow::record_batch::RecordBatch;
use arrow_flight::decode::FlightRecordBatchStream;
use async_trait::async_trait;
use futures::StreamExt;
use tracing::debug;

use crate::error::FlightError;

/// Record batches streamed back from a Flight `DoGet` call
pub struct FlightBatchStream {
    inner: FlightRecordBatchStream,
    schema: SchemaRef,
    peeked: Option<RecordBatch>,
    exhausted: bool,
    name: String,
}

impl FlightBatchStream {
    /// Wrap a decoded flight stream.
    ///
    /// When the flight info declared no usable schema, the first batch is
    /// pulled to learn it and replayed on the first `next_batch` call.
    pub async fn open(
        mut inner: FlightRecordBatchStream,
        declared: Option<SchemaRef>,
        name: impl Into<String>,
    ) -> Result<Self, FlightError> {
        let name = name.into();

        if let Some(schema) = declared.filter(|s| !s.fields().is_empty()) {
            return Ok(Self {
                inner,
                schema,
                peeked: None,
                exhausted: false,
                name,
            });
        }

        debug!(stream = %name, "No declared schema, reading it from the stream");
        let peeked = inner.next().await.transpose()?;
        let schema = match &peeked {
            Some(batch) => batch.schema(),
            None => inner
                .schema()
                .cloned()
                .unwrap_or_else(|| Arc::new(Schema::empty())),
        };

        Ok(Self {
            inner,
            schema,
            exhausted: peeked.is_none(),
            peeked,
            name,
        })
    }
}

#[async_trait]
impl BatchStream for FlightBatchStream {
    fn schema(&self) -> SchemaRef {
        self.schema.clone()
    }

    async fn next_batch(&mut self) -> Option<adhoc_core::Result<RecordBatch>> {
        if let Some(batch) = self.peeked.take() {
            return Some(Ok(batch));
        }
        if self.exhausted {
            return None;
        }

        match self.inner.next().await {
            Some(Ok(batch)) => Some(Ok(batch)),
            Some(Err(e)) => {
                // A failed stream is not resumed
                self.exhausted = true;
                Some(Err(AdhocError::Transport(e.to_string())))
            }
            None => {
                self.exhausted = true;
                None
            }
        }
    }

    fn is_exhausted(&self) -> bool {
        self.exhausted && self.peeked.is_none()
    }

    fn name(&self) -> &str {
        &self.name
    }
}
