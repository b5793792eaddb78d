use adhoc_core::properties::{ENGINE, SCHEMA};
use adhoc_core::{read_stream, BatchUnifier, CallProperties, ConnectionConfig, Credentials};
use adhoc_flight::server::{DEMO_SCHEMA, DEMO_TABLE};
use adhoc_flight::{DemoFlightService, FlightClient, FlightServer};
use anyhow::{Context, Result};
use arrow::csv::reader::Format;
use arrow::csv::ReaderBuilder;
use arrow::datatypes::SchemaRef;
use arrow::record_batch::RecordBatch;
use colored::Colorize;
use std::fs::File;
use std::io::{BufReader, BufWriter, Seek, Write};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

use crate::config::{CliConfig, OutputFormat};
use crate::print::print_table;
use crate::ConnectionArgs;

/// Rows sampled when inferring a CSV schema
const CSV_INFER_RECORDS: usize = 1000;

pub struct QueryOptions {
    pub schema: Option<String>,
    pub engine: Option<String>,
    pub session_properties: Vec<String>,
    pub format: OutputFormat,
    pub max_rows: usize,
    pub save: Option<PathBuf>,
}

impl QueryOptions {
    /// Per-query properties: free-form pairs first, then `engine` and `schema`
    fn call_properties(&self) -> Result<CallProperties> {
        let mut properties = CallProperties::parse_pairs(&self.session_properties)?;
        if let Some(engine) = &self.engine {
            properties.insert(ENGINE, engine.as_str())?;
        }
        if let Some(schema) = &self.schema {
            properties.insert(SCHEMA, schema.as_str())?;
        }
        Ok(properties)
    }
}

/// Overlay command-line flags on the configured connection
fn resolve_connection(config: &CliConfig, args: &ConnectionArgs) -> Result<ConnectionConfig> {
    let mut connection = config.connection.clone();

    if let Some(host) = &args.host {
        connection.host = host.clone();
    }
    if let Some(port) = args.port {
        connection.port = port;
    }

    let credentials =
        Credentials::from_parts(args.user.clone(), args.password.clone(), args.token.clone())?;
    if credentials != Credentials::None {
        connection.credentials = credentials;
    }

    if args.tls || args.root_certs.is_some() {
        connection.tls.enabled = true;
    }
    if let Some(root_certs) = &args.root_certs {
        connection.tls.root_certs = Some(root_certs.clone());
    }
    if let Some(project_id) = &args.project_id {
        connection.project_id = Some(project_id.clone());
    }

    connection.validate()?;
    Ok(connection)
}

/// Connect, authenticate and select the project, if any
async fn open_client(
    config: &CliConfig,
    connection: &ConnectionConfig,
    args: &ConnectionArgs,
    auth_properties: &CallProperties,
) -> Result<FlightClient> {
    println!(
        "{} Connecting to {}",
        "→".bright_blue(),
        connection.url().bright_cyan()
    );

    let mut client = match args.wait_ready {
        Some(secs) => {
            FlightClient::connect_when_ready(connection, Duration::from_secs(secs)).await?
        }
        None => FlightClient::connect(connection).await?,
    };

    client
        .authenticate(&connection.credentials, auth_properties)
        .await
        .context("authentication failed")?;
    client.set_properties(config.properties.clone());

    if let Some(project_id) = &connection.project_id {
        client.set_project_id(project_id).await?;
        info!(project_id = %project_id, "Project selected");
    }

    Ok(client)
}

async fn close_if_needed(client: &mut FlightClient, connection: &ConnectionConfig) {
    if connection.project_id.is_some() {
        if let Err(e) = client.close_session().await {
            warn!(error = %e, "Failed to close session");
        }
    }
}

pub async fn run_query(
    config: &CliConfig,
    args: &ConnectionArgs,
    sql: &str,
    options: &QueryOptions,
) -> Result<()> {
    let connection = resolve_connection(config, args)?;
    let extra = options.call_properties()?;
    let mut client = open_client(config, &connection, args, &CallProperties::new()).await?;

    for property in &extra {
        println!("{} Call property: {}", "→".bright_blue(), property);
    }

    let outcome = execute_query(&mut client, sql, &extra, options).await;
    close_if_needed(&mut client, &connection).await;
    outcome
}

async fn execute_query(
    client: &mut FlightClient,
    sql: &str,
    extra: &CallProperties,
    options: &QueryOptions,
) -> Result<()> {
    let start = Instant::now();
    let unifier = BatchUnifier::default();
    println!("{} Executing query...", "→".bright_blue());

    match &options.save {
        Some(path) => {
            let file = File::create(path)
                .with_context(|| format!("creating {}", path.display()))?;
            let (summary, sink) = client
                .save_query(sql, extra, &unifier, Some(BufWriter::new(file)))
                .await?;
            if let Some(mut sink) = sink {
                sink.flush()?;
            }
            println!(
                "{} Saved {} records in {} batches to {}",
                "✓".bright_green(),
                summary.rows,
                summary.batches,
                path.display()
            );
        }
        None => {
            let table = client.run_query(sql, extra, &unifier).await?;
            print_table(&table, options.format, options.max_rows)?;
        }
    }

    println!(
        "{} {:.2}ms",
        "Query time:".bright_yellow(),
        start.elapsed().as_secs_f64() * 1000.0
    );
    Ok(())
}

/// Authenticate with routing properties, then query the demo table first
/// without and then with the default schema path
pub async fn run_demo(
    config: &CliConfig,
    args: &ConnectionArgs,
    routing_tag: &str,
    routing_queue: &str,
) -> Result<()> {
    let connection = resolve_connection(config, args)?;
    let routing = CallProperties::routing(routing_tag, routing_queue)?;
    for property in &routing {
        println!("{} Client property: {}", "→".bright_blue(), property);
    }

    let mut client = open_client(config, &connection, args, &routing).await?;
    println!("{} Authenticated", "✓".bright_green());

    let unifier = BatchUnifier::default();
    let query = format!("SELECT * FROM {}", DEMO_TABLE);

    println!(
        "\n{} Step 1: {} without a schema path",
        "→".bright_blue(),
        query.bright_cyan()
    );
    match client.run_query(&query, &CallProperties::new(), &unifier).await {
        Ok(table) => print_table(&table, config.output_format, config.max_rows)?,
        Err(e) => println!("{} Query failed as expected: {}", "!".bright_yellow(), e),
    }

    let schema = CallProperties::schema(DEMO_SCHEMA)?;
    println!(
        "\n{} Step 2: {} with schema path {}",
        "→".bright_blue(),
        query.bright_cyan(),
        DEMO_SCHEMA.bright_cyan()
    );
    let outcome = client.run_query(&query, &schema, &unifier).await;
    close_if_needed(&mut client, &connection).await;

    let table = outcome?;
    print_table(&table, config.output_format, config.max_rows)?;
    println!("{} Demo completed", "✓".bright_green());
    Ok(())
}

pub async fn start_server(
    host: &str,
    port: u16,
    load: &[String],
    users: &[String],
    tokens: &[String],
) -> Result<()> {
    let service = DemoFlightService::new();

    for user in users {
        let (name, password) = user
            .split_once(':')
            .ok_or_else(|| anyhow::anyhow!("expected user:password, got '{}'", user))?;
        service.add_user(name, password);
    }
    for token in tokens {
        service.add_token(token);
    }

    service.register_demo_table()?;
    for entry in load {
        let (name, path) = entry
            .split_once('=')
            .ok_or_else(|| anyhow::anyhow!("expected name=path, got '{}'", entry))?;
        let (schema, batches) = load_csv(Path::new(path))?;
        let rows: usize = batches.iter().map(|b| b.num_rows()).sum();
        service.register_table(name, schema, batches);
        println!(
            "{} Loaded {} ({} rows)",
            "✓".bright_green(),
            name.bright_cyan(),
            rows
        );
    }

    if users.is_empty() && tokens.is_empty() {
        println!(
            "{}",
            "No users or tokens configured, authentication is disabled".bright_black()
        );
    }

    let addr: SocketAddr = format!("{}:{}", host, port)
        .parse()
        .with_context(|| format!("invalid listen address {}:{}", host, port))?;
    println!(
        "{} Serving Flight on {}",
        "→".bright_blue(),
        addr.to_string().bright_cyan()
    );

    FlightServer::with_service(service).serve(addr).await?;
    Ok(())
}

/// Read a CSV file with a header row, inferring column types
fn load_csv(path: &Path) -> Result<(SchemaRef, Vec<RecordBatch>)> {
    let mut file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
    let (schema, _) = Format::default()
        .with_header(true)
        .infer_schema(&mut file, Some(CSV_INFER_RECORDS))?;
    file.rewind()?;

    let schema = Arc::new(schema);
    let reader = ReaderBuilder::new(schema.clone())
        .with_header(true)
        .build(file)?;
    let batches = reader.collect::<Result<Vec<_>, _>>()?;
    Ok((schema, batches))
}

/// Print an IPC stream written by `query --save`
pub async fn inspect(path: &Path, format: OutputFormat, max_rows: usize) -> Result<()> {
    let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
    let mut stream = read_stream(BufReader::new(file))?;
    let table = BatchUnifier::default().unify_to_table(&mut stream).await?;
    print_table(&table, format, max_rows)
}
