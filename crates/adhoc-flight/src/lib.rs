//! Arrow Flight transport for the adhoc client
//!
//! This crate connects the batch unifier in `adhoc-core` to Arrow Flight
//! servers over gRPC.
//!
//! # Features
//!
//! - **Flight Client**: TLS connections, Basic or bearer-token header
//!   authentication, call properties, cookies and session options
//! - **Streaming**: `DoGet` results exposed as a [`adhoc_core::BatchStream`]
//! - **Demo Server**: an in-process Flight service for demos and tests
//!
//! # Example
//!
//! ```ignore
//! use adhoc_core::{BatchUnifier, CallProperties, ConnectionConfig, Credentials};
//! use adhoc_flight::FlightClient;
//!
//! let config = ConnectionConfig::local(32010);
//! let mut client = FlightClient::connect(&config).await?;
//! client
//!     .authenticate(&Credentials::basic("dremio", "dremio123"), &CallProperties::new())
//!     .await?;
//!
//! let unifier = BatchUnifier::default();
//! let table = client
//!     .run_query("SELECT * FROM flight_demo_table", &CallProperties::schema("$scratch")?, &unifier)
//!     .await?;
//! ```

pub mod auth;
pub mod client;
pub mod cookies;
pub mod error;
pub mod server;
pub mod session;
pub mod stream;

pub use client::FlightClient;
pub use cookies::CookieJar;
pub use error::FlightError;
pub use server::{DemoFlightService, FlightServer};
pub use session::{CloseSessionStatus, SetSessionOptionsRequest};
pub use stream::FlightBatchStream;

/// Result type for Flight operations
pub type Result<T> = std::result::Result<T, FlightError>;
