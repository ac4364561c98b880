//! Apache Druid Client
//!
//! A Rust client for the Druid SQL and cluster REST APIs.
//!
//! # Features
//!
//! - **SQL**: Synchronous queries in all three result encodings (`object`,
//!   `array`, `arrayWithTrailer`), with optional name/type header rows
//! - **Async SQL**: One polling interface over broker async queries,
//!   multi-stage indexer tasks and direct worker queries
//! - **Cluster Discovery**: Services discovered from `sys.servers`, with
//!   per-service clients for the Coordinator, Overlord, Router and Brokers
//! - **Address Mapping**: Pluggable translation of cluster-internal addresses
//!   (e.g. Docker port mappings)
//! - **Automatic Retries**: Exponential backoff for connection failures and
//!   `503`/`429` responses
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use druid_client::{DruidClient, ResultFormat, SqlRequest};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut client = DruidClient::new(
//!         DruidClient::builder("http://localhost:8888")
//!             .timeout(Duration::from_secs(60))
//!             .build()?
//!     )?;
//!
//!     // Rows as JSON objects
//!     for row in client.sql("SELECT channel, COUNT(*) AS n FROM wikipedia GROUP BY 1").await? {
//!         println!("{row}");
//!     }
//!
//!     // Arrays with a typed header
//!     let request = SqlRequest::new("SELECT * FROM wikipedia LIMIT 5")
//!         .with_format(ResultFormat::Array)
//!         .with_headers(true, true);
//!     let result = client.sql_query(request).await?;
//!     for col in result.schema()? {
//!         println!("{col}");
//!     }
//!
//!     // Background query
//!     let mut query = client.async_sql("SELECT COUNT(*) FROM wikipedia").await?;
//!     let rows = query.wait().await?;
//!     println!("{rows:?}");
//!
//!     // Cluster services
//!     let coordinator = client.coordinator().await?;
//!     println!("{:?}", coordinator.lookup_tiers().await?);
//!
//!     Ok(())
//! }
//! ```
//!
//! # Error Handling
//!
//! All operations return `Result<T, ClientError>`. Errors include:
//!
//! - `Usage`: Blank SQL, or an operation on a query that failed to submit
//! - `Query`: Druid reported a failure (HTTP status, or a failed async query)
//! - `NotFound`: A lookup, tier or task that does not exist (404)
//! - `Unavailable`: No service in the cluster can take the request
//! - `Http`: The request never completed (connection, timeout, TLS)
//!
//! A synchronous query that Druid rejects is not an error from
//! `sql_query()`: the result carries the status and message, and `rows()`
//! reports it.

pub mod async_query;
pub mod client;
pub mod cluster;
pub mod codec;
pub mod config;
pub mod consts;
pub mod error;
pub mod extensions;
pub mod plan;
pub mod request;
pub mod result;
pub mod transport;
pub mod types;

// Re-exports for convenience
pub use async_query::{AsyncQuery, AsyncState};
pub use client::DruidClient;
pub use cluster::{
    Broker, Cluster, Coordinator, DockerMapper, IdentityMapper, Overlord, Router, Service,
    ServiceEndpoint, ServiceMapper,
};
pub use codec::{ColumnSchema, HeaderOptions, ResultFormat};
pub use config::{ClientConfig, ClientConfigBuilder};
pub use error::{ClientError, Result};
pub use extensions::{ExtensionProvider, ExtensionRegistry};
pub use plan::QueryPlan;
pub use request::{AsyncEngine, QueryMode, SqlParameter, SqlRequest};
pub use result::SqlQueryResult;
pub use transport::{HttpResponse, HttpTransport, HttpTransportFactory, Transport, TransportFactory};
pub use types::{TaskFilter, TaskLocation, TaskStatus};
