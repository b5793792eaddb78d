//! Shared helpers for the runnable demos

use std::sync::Arc;

use adhoc_core::ConnectionConfig;
use adhoc_flight::{DemoFlightService, FlightServer};
use arrow::array::{Int64Array, StringArray};
use arrow::datatypes::{DataType, Field, Schema, SchemaRef};
use arrow::error::ArrowError;
use arrow::record_batch::RecordBatch;
use tokio::net::TcpListener;

pub fn people_schema() -> SchemaRef {
    Arc::new(Schema::new(vec![
        Field::new("id", DataType::Int64, false),
        Field::new("name", DataType::Utf8, true),
    ]))
}

/// `count` batches of `rows` people each, ids numbered consecutively
pub fn people_batches(count: usize, rows: usize) -> Result<Vec<RecordBatch>, ArrowError> {
    let schema = people_schema();
    (0..count)
        .map(|b| {
            let ids: Vec<i64> = (0..rows).map(|r| (b * rows + r) as i64).collect();
            let names: Vec<Option<String>> = ids
                .iter()
                .map(|id| (id % 7 != 0).then(|| format!("person-{}", id)))
                .collect();
            RecordBatch::try_new(
                schema.clone(),
                vec![
                    Arc::new(Int64Array::from(ids)),
                    Arc::new(StringArray::from(names)),
                ],
            )
        })
        .collect()
}

/// Serve `service` on an ephemeral local port in the background
pub async fn spawn_server(service: DemoFlightService) -> std::io::Result<ConnectionConfig> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let port = listener.local_addr()?.port();
    tokio::spawn(async move {
        if let Err(e) = FlightServer::with_service(service)
            .serve_with_listener(listener)
            .await
        {
            eprintln!("Server error: {}", e);
        }
    });
    Ok(ConnectionConfig::local(port))
}
