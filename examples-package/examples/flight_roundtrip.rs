//! Arrow Flight Example
//!
//! Starts the demo server, authenticates, runs queries with call
//! properties, saves a result set and inspects it again.

use adhoc_core::{read_stream, BatchUnifier, CallProperties, Credentials};
use adhoc_examples::{people_batches, people_schema, spawn_server};
use adhoc_flight::server::DEMO_SCHEMA;
use adhoc_flight::{DemoFlightService, FlightClient};
use anyhow::Result;
use arrow::util::pretty::print_batches;
use std::time::Duration;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing for logs
    tracing_subscriber::fmt::init();

    println!("=== Arrow Flight Example ===\n");

    let service = DemoFlightService::new();
    service.add_user("dremio", "dremio123");
    service.register_demo_table()?;
    service.register_table("people", people_schema(), people_batches(8, 250)?);

    let config = spawn_server(service.clone())
        .await?
        .with_credentials(Credentials::basic("dremio", "dremio123"));
    println!("✓ Flight server started on {}\n", config.address());

    let mut client = FlightClient::connect_when_ready(&config, Duration::from_secs(5)).await?;
    let routing = CallProperties::routing("test-routing-tag", "Low Cost User Queries")?;
    client.authenticate(&config.credentials, &routing).await?;
    println!("✓ Authenticated with routing properties\n");

    println!("Available tables: {:?}\n", client.list_flights().await?);

    let unifier = BatchUnifier::default();

    // Unqualified table name resolved through the schema property
    let scratch = CallProperties::schema(DEMO_SCHEMA)?;
    let demo = client
        .run_query("SELECT * FROM flight_demo_table", &scratch, &unifier)
        .await?;
    println!("Demo table ({} rows):", demo.num_rows());
    print_batches(&[demo.to_record_batch()?])?;
    println!();

    // Save a multi-batch result as an IPC stream, then read it back
    let (summary, sink) = client
        .save_query("SELECT * FROM people", &CallProperties::new(), &unifier, Some(Vec::new()))
        .await?;
    let bytes = sink.unwrap_or_default();
    println!(
        "✓ Saved {} rows from {} batches ({} bytes)",
        summary.rows,
        summary.batches,
        bytes.len()
    );

    let mut reread = read_stream(bytes.as_slice())?;
    let people = unifier.unify_to_table(&mut reread).await?;
    println!("✓ Read back {} rows; first rows:", people.num_rows());
    print_batches(&[people.to_record_batch()?.slice(0, 5)])?;

    println!("\nHeaders seen by the server on the last call:");
    let mut headers: Vec<_> = service.last_headers().into_iter().collect();
    headers.sort();
    for (key, value) in headers {
        println!("  {}: {}", key, value);
    }

    println!("\n=== Arrow Flight Example Complete ===");
    Ok(())
}
