use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use colored::Colorize;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod commands;
mod config;
mod print;

use commands::*;
use config::{CliConfig, OutputFormat};

#[derive(Parser)]
#[command(name = "adhoc")]
#[command(author, version, about = "adhoc - query Arrow Flight servers", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Configuration file path
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
}

/// Where and how to connect
#[derive(Args, Debug, Clone, Default)]
pub struct ConnectionArgs {
    /// Flight server hostname
    #[arg(short = 'H', long)]
    pub host: Option<String>,

    /// Flight server port
    #[arg(short = 'P', long)]
    pub port: Option<u16>,

    /// Username for basic authentication
    #[arg(short, long)]
    pub user: Option<String>,

    /// Password for basic authentication
    #[arg(short, long)]
    pub password: Option<String>,

    /// Personal access token or OAuth token, used instead of username/password
    #[arg(long)]
    pub token: Option<String>,

    /// Connect with TLS
    #[arg(long)]
    pub tls: bool,

    /// PEM file with trusted root certificates
    #[arg(long)]
    pub root_certs: Option<PathBuf>,

    /// Project to run queries against (token authentication only)
    #[arg(long)]
    pub project_id: Option<String>,

    /// Retry connecting for up to this many seconds
    #[arg(long, value_name = "SECS")]
    pub wait_ready: Option<u64>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a query and print or save the results
    Query {
        #[command(flatten)]
        connection: ConnectionArgs,

        /// SQL query to execute
        #[arg(short, long)]
        sql: String,

        /// Default schema path for unqualified table names
        #[arg(long)]
        schema: Option<String>,

        /// Engine that should run the query
        #[arg(long)]
        engine: Option<String>,

        /// Extra call property (format: key:value or key=value)
        #[arg(long = "session-property", value_name = "KEY:VALUE")]
        session_properties: Vec<String>,

        /// Output format
        #[arg(short = 'f', long, value_enum)]
        format: Option<OutputFormat>,

        /// Maximum number of rows to print
        #[arg(long)]
        max_rows: Option<usize>,

        /// Save the results as an Arrow IPC stream instead of printing them
        #[arg(long)]
        save: Option<PathBuf>,
    },

    /// Walk through authentication, call properties and a demo query
    Demo {
        #[command(flatten)]
        connection: ConnectionArgs,

        /// Workload routing tag sent at authentication
        #[arg(long, default_value = "test-routing-tag")]
        routing_tag: String,

        /// Workload routing queue sent at authentication
        #[arg(long, default_value = "Low Cost User Queries")]
        routing_queue: String,
    },

    /// Start the demo Flight server
    Serve {
        /// Port to listen on
        #[arg(short, long, default_value = "32010")]
        port: u16,

        /// Host to bind to
        #[arg(short = 'H', long, default_value = "0.0.0.0")]
        host: String,

        /// CSV files to load (format: name=path)
        #[arg(short, long)]
        load: Vec<String>,

        /// Accepted basic credentials (format: user:password)
        #[arg(long = "user", value_name = "USER:PASSWORD")]
        users: Vec<String>,

        /// Accepted bearer tokens
        #[arg(long = "token")]
        tokens: Vec<String>,
    },

    /// Print a saved Arrow IPC stream
    Inspect {
        /// File written by `query --save`
        file: PathBuf,

        /// Output format
        #[arg(short = 'f', long, value_enum)]
        format: Option<OutputFormat>,

        /// Maximum number of rows to print
        #[arg(long)]
        max_rows: Option<usize>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    init_logging(cli.verbose)?;

    // Load configuration
    let config = if let Some(config_path) = cli.config {
        CliConfig::from_file(&config_path)?
    } else {
        CliConfig::default()
    };

    let outcome = match cli.command {
        Commands::Query {
            connection,
            sql,
            schema,
            engine,
            session_properties,
            format,
            max_rows,
            save,
        } => {
            let options = QueryOptions {
                schema,
                engine,
                session_properties,
                format: format.unwrap_or(config.output_format),
                max_rows: max_rows.unwrap_or(config.max_rows),
                save,
            };
            run_query(&config, &connection, &sql, &options).await
        }
        Commands::Demo {
            connection,
            routing_tag,
            routing_queue,
        } => {
            print_banner();
            run_demo(&config, &connection, &routing_tag, &routing_queue).await
        }
        Commands::Serve {
            port,
            host,
            load,
            users,
            tokens,
        } => {
            print_banner();
            start_server(&host, port, &load, &users, &tokens).await
        }
        Commands::Inspect {
            file,
            format,
            max_rows,
        } => {
            inspect(
                &file,
                format.unwrap_or(config.output_format),
                max_rows.unwrap_or(config.max_rows),
            )
            .await
        }
    };

    if let Err(e) = outcome {
        eprintln!("{} {:#}", "✗".bright_red(), e);
        std::process::exit(1);
    }
    Ok(())
}

fn init_logging(verbose: bool) -> Result<()> {
    let filter = if verbose {
        "adhoc=debug,adhoc_core=debug,adhoc_flight=debug"
    } else {
        "adhoc=info,adhoc_flight=warn"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    Ok(())
}

fn print_banner() {
    println!("{}", "adhoc - Arrow Flight client".bright_cyan().bold());
    println!(
        "{}",
        format!("v{}\n", env!("CARGO_PKG_VERSION")).bright_black()
    );
}
