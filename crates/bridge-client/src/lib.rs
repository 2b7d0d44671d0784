//! Metabridge Client
//!
//! Runs SQL and browses catalog metadata for databases that are only reachable
//! through a Metabase server's REST API.
//!
//! # Features
//!
//! - **Shared Sessions**: one authenticated session per `(host, port, username)`,
//!   reference-counted across every client and swept once idle and expired
//! - **Metadata Cache**: per-session TTL cache for databases, schemas, tables and columns
//! - **Retries**: linear backoff on timeouts and I/O failures, cancellable between attempts
//! - **Typed Results**: decoded columns, coerced values and a forward-only cursor
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use metabridge_client::{ClientConfig, ManagerConfig, MetabaseClient, SessionManager};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // One manager per process, shared by every client
//!     let manager = Arc::new(SessionManager::new(ManagerConfig::from_env())?);
//!
//!     let client = MetabaseClient::new(
//!         ClientConfig::builder("metabase.example.com", "analyst@example.com", "secret")
//!             .database("Sample Database")
//!             .build()?,
//!         Arc::clone(&manager),
//!     )?;
//!     client.connect().await?;
//!
//!     for table in client.tables("PUBLIC").await? {
//!         println!("{} ({})", table.display_name, table.id);
//!     }
//!
//!     let mut result = client.execute_query("SELECT 1 AS one", "Sample Database").await?;
//!     while result.next() {
//!         println!("{}", result.value_by_name("one")?);
//!     }
//!
//!     client.close();
//!     Ok(())
//! }
//! ```
//!
//! # Caching
//!
//! Every session owns one [`MetadataCache`]:
//!
//! - Entries are fresh for `ManagerConfig::metadata_ttl` and reloaded lazily after that
//! - Concurrent reads of one stale key trigger a single reload
//! - [`MetabaseClient::refresh_metadata`] clears the cache for every client of the session
//!
//! # Error Handling
//!
//! All operations return `Result<T, ClientError>`. Errors include:
//!
//! - `Authentication`: credentials rejected
//! - `TransientNetwork`: timeouts or I/O failures that outlived every retry
//! - `NotFound`: unknown database or table
//! - `QueryExecution`: the server reported a query error

pub mod cache;
mod catalog;
pub mod client;
pub mod column;
pub mod config;
pub mod error;
pub mod executor;
pub mod headers;
pub mod result;
pub mod session;
pub mod types;

// Re-exports for convenience
pub use cache::{CacheStats, MemoStats, MetadataCache, TtlMemo};
pub use client::MetabaseClient;
pub use column::{ColumnDescriptor, LogicalType};
pub use config::{ClientConfig, ClientConfigBuilder, ManagerConfig};
pub use error::{ClientError, Operation, Result};
pub use executor::{HttpExecutor, HttpResponse, RetryPolicy};
pub use result::{ExecutionInfo, QueryResult, Value};
pub use session::{SessionHandle, SessionKey, SessionManager};
pub use types::{Database, TableInfo};
