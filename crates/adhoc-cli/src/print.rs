//! Rendering of result tables for the console

use adhoc_core::Table;
use anyhow::Result;
use arrow::record_batch::RecordBatch;
use arrow::util::display::{ArrayFormatter, FormatOptions};
use arrow::util::pretty::pretty_format_batches;
use colored::Colorize;

use crate::config::OutputFormat;

/// Header line plus one delimited line per row. Nulls render empty and
/// values containing the delimiter, a quote or a newline are quoted.
pub fn render_delimited(table: &Table, delimiter: char, max_rows: usize) -> Result<String> {
    let schema = table.schema();
    let mut out = String::new();

    let header: Vec<String> = schema
        .fields()
        .iter()
        .map(|f| quote(f.name(), delimiter))
        .collect();
    out.push_str(&header.join(&delimiter.to_string()));
    out.push('\n');

    let options = FormatOptions::default();
    let batch = table.to_record_batch()?;
    let formatters = batch
        .columns()
        .iter()
        .map(|column| ArrayFormatter::try_new(column.as_ref(), &options))
        .collect::<Result<Vec<_>, _>>()?;

    for row in 0..table.num_rows().min(max_rows) {
        let values: Vec<String> = formatters
            .iter()
            .map(|f| quote(&f.value(row).to_string(), delimiter))
            .collect();
        out.push_str(&values.join(&delimiter.to_string()));
        out.push('\n');
    }

    Ok(out)
}

/// Boxed grid of at most `max_rows` rows
pub fn render_pretty(table: &Table, max_rows: usize) -> Result<String> {
    let batch = truncated(table, max_rows)?;
    Ok(pretty_format_batches(&[batch])?.to_string())
}

pub fn print_table(table: &Table, format: OutputFormat, max_rows: usize) -> Result<()> {
    let rendered = match format {
        OutputFormat::Table => render_pretty(table, max_rows)?,
        OutputFormat::Csv => render_delimited(table, ',', max_rows)?,
    };
    print!("{}", rendered);
    if !rendered.ends_with('\n') {
        println!();
    }

    if table.num_rows() > max_rows {
        println!(
            "{}",
            format!("({} of {} rows shown)", max_rows, table.num_rows()).bright_black()
        );
    }
    println!(
        "{} {}",
        "Total number of records:".bright_yellow(),
        table.num_rows()
    );
    Ok(())
}

fn truncated(table: &Table, max_rows: usize) -> Result<RecordBatch> {
    let batch = table.to_record_batch()?;
    if batch.num_rows() > max_rows {
        Ok(batch.slice(0, max_rows))
    } else {
        Ok(batch)
    }
}

fn quote(value: &str, delimiter: char) -> String {
    if value.contains(delimiter) || value.contains('"') || value.contains('\n') {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use adhoc_core::BufferAllocator;
    use arrow::array::{Int32Array, StringArray};
    use arrow::datatypes::{DataType, Field, Schema};
    use std::sync::Arc;

    fn sample() -> Table {
        let schema = Arc::new(Schema::new(vec![
            Field::new("id", DataType::Int32, false),
            Field::new("name", DataType::Utf8, true),
        ]));
        let batch = RecordBatch::try_new(
            schema.clone(),
            vec![
                Arc::new(Int32Array::from(vec![1, 2, 3])),
                Arc::new(StringArray::from(vec![Some("a,b"), None, Some("c")])),
            ],
        )
        .unwrap();
        let mut table = Table::empty(schema, &BufferAllocator::default()).unwrap();
        table.append(batch).unwrap();
        table
    }

    #[test]
    fn test_render_delimited() {
        let rendered = render_delimited(&sample(), ',', 10).unwrap();
        assert_eq!(rendered, "id,name\n1,\"a,b\"\n2,\n3,c\n");
    }

    #[test]
    fn test_render_delimited_other_delimiter() {
        let rendered = render_delimited(&sample(), '|', 10).unwrap();
        assert_eq!(rendered, "id|name\n1|a,b\n2|\n3|c\n");
    }

    #[test]
    fn test_max_rows() {
        let rendered = render_delimited(&sample(), ',', 1).unwrap();
        assert_eq!(rendered.lines().count(), 2);

        let grid = render_pretty(&sample(), 2).unwrap();
        assert!(grid.contains("| 2  |"));
        assert!(!grid.contains("| 3  |"));
    }

    #[test]
    fn test_render_empty_table() {
        let schema = Arc::new(Schema::new(vec![Field::new("x", DataType::Int32, true)]));
        let table = Table::empty(schema, &BufferAllocator::default()).unwrap();
        assert_eq!(render_delimited(&table, ',', 10).unwrap(), "x\n");
        assert!(render_pretty(&table, 10).unwrap().contains("| x |"));
    }
}
