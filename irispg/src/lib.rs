//! PostgreSQL wire protocol front-end for InterSystems IRIS.
//!
//! Terminates the PostgreSQL v3 protocol on a TCP listener, translates
//! each inbound statement into IRIS SQL, routes execution to the backend,
//! and reshapes results back into PostgreSQL frames. Any PostgreSQL
//! client connects unchanged: psql, psycopg, asyncpg, JDBC, node-postgres,
//! ORMs doing full schema introspection.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use irispg::{Server, ServerConfig, executor::SessionFactory};
//!
//! # async fn app(factory: Arc<dyn SessionFactory>) -> irispg::Result<()> {
//! let server = Server::new(ServerConfig::default(), factory);
//! server.serve(async {
//!     let _ = tokio::signal::ctrl_c().await;
//! }).await
//! # }
//! ```
//!
//! The `factory` opens sessions against the backend; production wires the
//! IRIS driver in here, tests plug in fakes.

pub mod catalog;
pub mod config;
pub mod copy;
pub mod executor;
pub mod protocol;
pub mod server;
pub mod session;
pub mod sql;
pub mod stream;
pub mod types;

mod common;
mod error;
mod ext;

pub use config::ServerConfig;
pub use error::{Error, ErrorKind, Result};
pub use server::Server;
