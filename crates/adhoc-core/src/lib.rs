//! Core types for the adhoc Arrow Flight client
//!
//! This crate holds everything that does not touch the network:
//!
//! - **BatchUnifier**: drain a batch stream into one [`Table`] or into an
//!   Arrow IPC byte stream
//! - **BufferAllocator**: explicit memory accounting for unified tables
//! - **CallProperties**: request-scoped headers such as routing tags
//! - **ConnectionConfig**: where and how to connect
//!
//! # Example
//!
//! ```ignore
//! use adhoc_core::{BatchUnifier, BufferAllocator, MemoryBatchStream};
//!
//! let unifier = BatchUnifier::new(BufferAllocator::unbounded("root"));
//! let mut stream = MemoryBatchStream::new(schema, batches);
//! let table = unifier.unify_to_table(&mut stream).await?;
//! ```

pub mod allocator;
pub mod config;
pub mod error;
pub mod properties;
pub mod schema;
pub mod stream;
pub mod table;
pub mod unify;

pub use allocator::{BufferAllocator, Reservation};
pub use config::{ConnectionConfig, Credentials, TlsConfig};
pub use error::{AdhocError, Result};
pub use properties::{CallProperties, Property};
pub use stream::{BatchStream, IpcBatchStream, MemoryBatchStream};
pub use table::Table;
pub use unify::{read_stream, BatchUnifier, IpcStreamSink, WriteSummary};
