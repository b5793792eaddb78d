//! Schema compatibility checks for batches flowing through one result stream.

use arrow::array::Array;
use arrow::datatypes::Schema;
use arrow::record_batch::RecordBatch;

use crate::error::{AdhocError, Result};

/// Check that `found` has the same column layout as `expected`.
///
/// Column count, names and data types must agree. Nullability and metadata
/// are ignored: servers commonly relax nullability between the declared
/// schema and the batches they actually send.
pub fn ensure_compatible(expected: &Schema, found: &Schema) -> Result<()> {
    let same_layout = expected.fields().len() == found.fields().len()
        && expected
            .fields()
            .iter()
            .zip(found.fields().iter())
            .all(|(e, f)| e.name() == f.name() && e.data_type() == f.data_type());

    if same_layout {
        Ok(())
    } else {
        Err(AdhocError::SchemaMismatch {
            expected: describe(expected),
            found: describe(found),
        })
    }
}

/// Check that `batch` can be stored under `expected`.
///
/// On top of [`ensure_compatible`], a column declared non-nullable must not
/// carry nulls, whatever nullability the batch itself declares.
pub fn ensure_batch_fits(expected: &Schema, batch: &RecordBatch) -> Result<()> {
    let found = batch.schema();
    ensure_compatible(expected, &found)?;

    let offending = expected
        .fields()
        .iter()
        .zip(batch.columns())
        .find(|(field, column)| !field.is_nullable() && column.null_count() > 0);

    match offending {
        Some((field, column)) => Err(AdhocError::SchemaMismatch {
            expected: describe(expected),
            found: format!(
                "{} with {} nulls in non-nullable column '{}'",
                describe(&found),
                column.null_count(),
                field.name()
            ),
        }),
        None => Ok(()),
    }
}

/// Render a schema as `[name: Type, ...]` for error messages and logs.
pub fn describe(schema: &Schema) -> String {
    let columns: Vec<String> = schema
        .fields()
        .iter()
        .map(|f| format!("{}: {}", f.name(), f.data_type()))
        .collect();
    format!("[{}]", columns.join(", "))
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::array::Int64Array;
    use arrow::datatypes::{DataType, Field};
    use std::sync::Arc;

    #[test]
    fn test_nullability_is_ignored() {
        let a = Schema::new(vec![Field::new("id", DataType::Int64, false)]);
        let b = Schema::new(vec![Field::new("id", DataType::Int64, true)]);
        assert!(ensure_compatible(&a, &b).is_ok());
    }

    #[test]
    fn test_layout_differences_are_rejected() {
        let a = Schema::new(vec![Field::new("id", DataType::Int64, false)]);
        let renamed = Schema::new(vec![Field::new("key", DataType::Int64, false)]);
        let retyped = Schema::new(vec![Field::new("id", DataType::Int32, false)]);
        let wider = Schema::new(vec![
            Field::new("id", DataType::Int64, false),
            Field::new("name", DataType::Utf8, true),
        ]);

        for other in [&renamed, &retyped, &wider] {
            let err = ensure_compatible(&a, other).unwrap_err();
            assert!(matches!(err, AdhocError::SchemaMismatch { .. }));
        }
    }

    #[test]
    fn test_nulls_in_non_nullable_column_are_rejected() {
        let declared = Schema::new(vec![Field::new("id", DataType::Int64, false)]);
        let relaxed = Arc::new(Schema::new(vec![Field::new("id", DataType::Int64, true)]));

        let dense =
            RecordBatch::try_new(relaxed.clone(), vec![Arc::new(Int64Array::from(vec![1, 2]))])
                .unwrap();
        assert!(ensure_batch_fits(&declared, &dense).is_ok());

        let sparse = RecordBatch::try_new(
            relaxed,
            vec![Arc::new(Int64Array::from(vec![Some(1), None]))],
        )
        .unwrap();
        match ensure_batch_fits(&declared, &sparse).unwrap_err() {
            AdhocError::SchemaMismatch { found, .. } => {
                assert!(found.contains("1 nulls in non-nullable column 'id'"))
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_describe() {
        let schema = Schema::new(vec![
            Field::new("id", DataType::Int64, false),
            Field::new("name", DataType::Utf8, true),
        ]);
        assert_eq!(describe(&schema), "[id: Int64, name: Utf8]");
    }
}
