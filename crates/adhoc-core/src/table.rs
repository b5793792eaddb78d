//! Growable columnar table
//!
//! A [`Table`] keeps one compacted array per column plus the chunks appended
//! since the last compaction. Appending copies the incoming rows into an
//! owned chunk, so the source batch's buffers are released as soon as it is
//! dropped. Chunks are folded into the compacted arrays once they hold as
//! many rows as the arrays themselves, which keeps the total copying linear
//! in the number of rows.

use arrow::array::{make_array, new_empty_array, Array, ArrayRef, MutableArrayData};
use arrow::compute::concat;
use arrow::datatypes::SchemaRef;
use arrow::error::ArrowError;
use arrow::record_batch::{RecordBatch, RecordBatchOptions};
use tracing::debug;

use crate::allocator::{BufferAllocator, Reservation};
use crate::error::{AdhocError, Result};
use crate::schema::ensure_batch_fits;

/// Columnar container accumulating rows from many batches
#[derive(Debug)]
pub struct Table {
    schema: SchemaRef,
    columns: Vec<ArrayRef>,
    compacted_rows: usize,
    /// Per column, chunks not yet folded into `columns`
    pending: Vec<Vec<ArrayRef>>,
    num_rows: usize,
    compactions: usize,
    reservation: Reservation,
    released: bool,
}

impl Table {
    /// Create an empty table for `schema`, charged to `allocator`
    pub fn empty(schema: SchemaRef, allocator: &BufferAllocator) -> Result<Self> {
        let columns = empty_columns(&schema);
        let reservation = allocator.reserve(memory_size(&columns))?;

        Ok(Self {
            pending: vec![Vec::new(); columns.len()],
            schema,
            columns,
            compacted_rows: 0,
            num_rows: 0,
            compactions: 0,
            reservation,
            released: false,
        })
    }

    /// Append all rows of `batch`.
    ///
    /// The batch must fit the table schema, including nulls only in nullable
    /// columns. If the schema check or the allocator rejects the append, the
    /// table is left unchanged.
    pub fn append(&mut self, batch: RecordBatch) -> Result<()> {
        if self.released {
            return Err(AdhocError::TableReleased);
        }
        ensure_batch_fits(&self.schema, &batch)?;

        if batch.num_rows() == 0 {
            return Ok(());
        }

        let pending_rows = self.num_rows - self.compacted_rows;
        if pending_rows + batch.num_rows() >= self.compacted_rows {
            let columns = self
                .columns
                .iter()
                .zip(&self.pending)
                .zip(batch.columns())
                .map(|((current, chunks), incoming)| {
                    let mut parts: Vec<&dyn Array> = Vec::with_capacity(chunks.len() + 2);
                    parts.push(current.as_ref());
                    parts.extend(chunks.iter().map(|c| c.as_ref()));
                    parts.push(incoming.as_ref());
                    concat(&parts)
                })
                .collect::<std::result::Result<Vec<_>, _>>()?;

            self.reservation.resize(memory_size(&columns))?;
            self.columns = columns;
            self.pending.iter_mut().for_each(Vec::clear);
            self.compacted_rows = self.num_rows + batch.num_rows();
            self.compactions += 1;
        } else {
            let chunk = batch
                .columns()
                .iter()
                .map(|incoming| copy_array(incoming.as_ref()))
                .collect::<Vec<_>>();

            self.reservation
                .resize(self.reservation.size() + memory_size(&chunk))?;
            for (chunks, column) in self.pending.iter_mut().zip(chunk) {
                chunks.push(column);
            }
        }
        self.num_rows += batch.num_rows();

        debug!(
            rows = batch.num_rows(),
            total_rows = self.num_rows,
            compactions = self.compactions,
            bytes = self.reservation.size(),
            "Appended batch to table"
        );
        Ok(())
    }

    /// Fold pending chunks into one array per column
    pub fn compact(&mut self) -> Result<()> {
        if self.num_rows == self.compacted_rows {
            return Ok(());
        }
        let columns = self.merged_columns()?;
        self.reservation.resize(memory_size(&columns))?;
        self.columns = columns;
        self.pending.iter_mut().for_each(Vec::clear);
        self.compacted_rows = self.num_rows;
        self.compactions += 1;
        Ok(())
    }

    /// Whether every row is held in the compacted column arrays
    pub fn is_compacted(&self) -> bool {
        self.num_rows == self.compacted_rows
    }

    pub fn schema(&self) -> SchemaRef {
        self.schema.clone()
    }

    pub fn num_rows(&self) -> usize {
        self.num_rows
    }

    pub fn num_columns(&self) -> usize {
        self.columns.len()
    }

    /// Compacted array of column `index`.
    ///
    /// Rows appended since the last [`Table::compact`] are not included.
    /// Tables returned by the unifier are always compacted.
    pub fn column(&self, index: usize) -> &ArrayRef {
        &self.columns[index]
    }

    /// Compacted column arrays, see [`Table::column`]
    pub fn columns(&self) -> &[ArrayRef] {
        &self.columns
    }

    pub fn is_empty(&self) -> bool {
        self.num_rows == 0
    }

    /// Bytes currently charged to the allocator for this table
    pub fn memory_size(&self) -> usize {
        self.reservation.size()
    }

    /// View the table contents as a single record batch
    pub fn to_record_batch(&self) -> Result<RecordBatch> {
        if self.released {
            return Err(AdhocError::TableReleased);
        }
        let columns = if self.is_compacted() {
            self.columns.clone()
        } else {
            self.merged_columns()?
        };
        let options = RecordBatchOptions::new().with_row_count(Some(self.num_rows));
        Ok(RecordBatch::try_new_with_options(
            self.schema.clone(),
            columns,
            &options,
        )?)
    }

    /// Drop the column storage and return the reserved bytes.
    ///
    /// Releasing more than once is a no-op. The schema stays readable; any
    /// further append fails with [`AdhocError::TableReleased`].
    pub fn release(&mut self) {
        if self.released {
            return;
        }
        self.columns = empty_columns(&self.schema);
        self.pending.iter_mut().for_each(Vec::clear);
        self.num_rows = 0;
        self.compacted_rows = 0;
        self.reservation.free();
        self.released = true;
    }

    pub fn is_released(&self) -> bool {
        self.released
    }

    fn merged_columns(&self) -> std::result::Result<Vec<ArrayRef>, ArrowError> {
        self.columns
            .iter()
            .zip(&self.pending)
            .map(|(current, chunks)| {
                let mut parts: Vec<&dyn Array> = Vec::with_capacity(chunks.len() + 1);
                parts.push(current.as_ref());
                parts.extend(chunks.iter().map(|c| c.as_ref()));
                concat(&parts)
            })
            .collect()
    }
}

/// Deep copy of `array`, sharing no buffers with it
fn copy_array(array: &dyn Array) -> ArrayRef {
    let data = array.to_data();
    let mut copy = MutableArrayData::new(vec![&data], false, data.len());
    copy.extend(0, 0, data.len());
    make_array(copy.freeze())
}

fn empty_columns(schema: &SchemaRef) -> Vec<ArrayRef> {
    schema
        .fields()
        .iter()
        .map(|f| new_empty_array(f.data_type()))
        .collect()
}

fn memory_size(columns: &[ArrayRef]) -> usize {
    columns.iter().map(|c| c.get_array_memory_size()).sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::array::{Int64Array, StringArray};
    use arrow::datatypes::{DataType, Field, Schema};
    use std::sync::Arc;

    fn schema() -> SchemaRef {
        Arc::new(Schema::new(vec![
            Field::new("id", DataType::Int64, false),
            Field::new("name", DataType::Utf8, true),
        ]))
    }

    fn batch(ids: Vec<i64>, names: Vec<Option<&str>>) -> RecordBatch {
        RecordBatch::try_new(
            schema(),
            vec![
                Arc::new(Int64Array::from(ids)),
                Arc::new(StringArray::from(names)),
            ],
        )
        .unwrap()
    }

    #[test]
    fn test_empty_table() {
        let allocator = BufferAllocator::unbounded("test");
        let table = Table::empty(schema(), &allocator).unwrap();

        assert!(table.is_empty());
        assert_eq!(table.num_columns(), 2);
        let batch = table.to_record_batch().unwrap();
        assert_eq!(batch.num_rows(), 0);
        assert_eq!(batch.schema(), schema());
    }

    #[test]
    fn test_append_preserves_order() {
        let allocator = BufferAllocator::unbounded("test");
        let mut table = Table::empty(schema(), &allocator).unwrap();

        table
            .append(batch(vec![1, 2], vec![Some("a"), None]))
            .unwrap();
        table.append(batch(vec![3], vec![Some("c")])).unwrap();

        assert_eq!(table.num_rows(), 3);
        let ids = table
            .column(0)
            .as_any()
            .downcast_ref::<Int64Array>()
            .unwrap();
        assert_eq!(ids.values().to_vec(), vec![1, 2, 3]);
        let names = table
            .column(1)
            .as_any()
            .downcast_ref::<StringArray>()
            .unwrap();
        assert_eq!(names.value(0), "a");
        assert!(names.is_null(1));
        assert_eq!(names.value(2), "c");
        assert!(allocator.allocated() > 0);
        assert_eq!(allocator.allocated(), table.memory_size());
    }

    #[test]
    fn test_append_copies_out_of_source_batch() {
        let allocator = BufferAllocator::unbounded("test");
        let mut table = Table::empty(schema(), &allocator).unwrap();

        let source = batch(vec![7, 8], vec![Some("x"), Some("y")]);
        let column = source.column(0).clone();
        assert_eq!(Arc::strong_count(&column), 2);

        table.append(source).unwrap();
        assert_eq!(Arc::strong_count(&column), 1);
    }

    #[test]
    fn test_mismatched_batch_leaves_table_unchanged() {
        let allocator = BufferAllocator::unbounded("test");
        let mut table = Table::empty(schema(), &allocator).unwrap();
        table.append(batch(vec![1], vec![Some("a")])).unwrap();
        let before = allocator.allocated();

        let other = Arc::new(Schema::new(vec![Field::new("id", DataType::Int64, false)]));
        let wrong = RecordBatch::try_new(other, vec![Arc::new(Int64Array::from(vec![9]))]).unwrap();

        let err = table.append(wrong).unwrap_err();
        assert!(matches!(err, AdhocError::SchemaMismatch { .. }));
        assert_eq!(table.num_rows(), 1);
        assert_eq!(allocator.allocated(), before);
    }

    #[test]
    fn test_allocation_limit_leaves_table_unchanged() {
        let allocator = BufferAllocator::new("tiny", 1024);
        let mut table = Table::empty(schema(), &allocator).unwrap();

        let ids: Vec<i64> = (0..10_000).collect();
        let names: Vec<Option<&str>> = vec![Some("row"); 10_000];
        let err = table.append(batch(ids, names)).unwrap_err();

        assert!(matches!(err, AdhocError::AllocationLimit { .. }));
        assert!(table.is_empty());
    }

    #[test]
    fn test_many_small_appends_compact_logarithmically() {
        let allocator = BufferAllocator::unbounded("test");
        let mut table = Table::empty(schema(), &allocator).unwrap();

        for i in 0..1000 {
            table.append(batch(vec![i], vec![Some("r")])).unwrap();
        }
        assert_eq!(table.num_rows(), 1000);
        // one compaction per doubling of the row count
        assert!(table.compactions <= 11, "compactions: {}", table.compactions);

        let merged = table.to_record_batch().unwrap();
        let ids = merged
            .column(0)
            .as_any()
            .downcast_ref::<Int64Array>()
            .unwrap();
        assert!(ids.values().iter().copied().eq(0..1000));
        assert_eq!(allocator.allocated(), table.memory_size());

        table.compact().unwrap();
        assert!(table.is_compacted());
        assert_eq!(table.column(0).len(), 1000);
        assert_eq!(table.to_record_batch().unwrap(), merged);
        assert_eq!(allocator.allocated(), table.memory_size());
    }

    #[test]
    fn test_pending_chunks_release_source_batches() {
        let allocator = BufferAllocator::unbounded("test");
        let mut table = Table::empty(schema(), &allocator).unwrap();
        table
            .append(batch(vec![1, 2, 3, 4], vec![None, None, None, None]))
            .unwrap();

        // Small enough to stay pending rather than trigger a compaction
        let source = batch(vec![5], vec![Some("e")]);
        let values = source.column(0).to_data().buffers()[0].as_ptr();
        table.append(source).unwrap();
        assert!(!table.is_compacted());
        assert_ne!(table.pending[0][0].to_data().buffers()[0].as_ptr(), values);
        assert_eq!(table.to_record_batch().unwrap().num_rows(), 5);
    }

    #[test]
    fn test_nulls_in_non_nullable_column_leave_table_unchanged() {
        let allocator = BufferAllocator::unbounded("test");
        let mut table = Table::empty(schema(), &allocator).unwrap();
        table.append(batch(vec![1], vec![Some("a")])).unwrap();
        let before = allocator.allocated();

        let relaxed = Arc::new(Schema::new(vec![
            Field::new("id", DataType::Int64, true),
            Field::new("name", DataType::Utf8, true),
        ]));
        let sparse = RecordBatch::try_new(
            relaxed,
            vec![
                Arc::new(Int64Array::from(vec![Some(2), None])),
                Arc::new(StringArray::from(vec![Some("b"), Some("c")])),
            ],
        )
        .unwrap();

        let err = table.append(sparse).unwrap_err();
        assert!(matches!(err, AdhocError::SchemaMismatch { .. }));
        assert_eq!(table.num_rows(), 1);
        assert_eq!(allocator.allocated(), before);
        assert!(table.to_record_batch().is_ok());
    }

    #[test]
    fn test_release_is_idempotent() {
        let allocator = BufferAllocator::unbounded("test");
        let mut table = Table::empty(schema(), &allocator).unwrap();
        table
            .append(batch(vec![1, 2, 3], vec![Some("a"), Some("b"), Some("c")]))
            .unwrap();

        table.release();
        assert!(table.is_released());
        assert_eq!(allocator.allocated(), 0);

        table.release();
        assert_eq!(allocator.allocated(), 0);
        assert_eq!(table.num_rows(), 0);

        let err = table.append(batch(vec![4], vec![None])).unwrap_err();
        assert!(matches!(err, AdhocError::TableReleased));
        assert!(table.to_record_batch().is_err());

        drop(table);
        assert_eq!(allocator.allocated(), 0);
    }
}
