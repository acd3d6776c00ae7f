//! Postgres wire-protocol driver
//!
//! # Examples
//!
//! Single connection:
//!
//! ```no_run
//! use pgflow::Connection;
//!
//! # async fn app() -> pgflow::Result<()> {
//! let mut conn = Connection::connect("postgres://localhost/postgres").await?;
//!
//! let row: (i32, String) = conn.fetch_one(pgflow::query("SELECT 420, $1").bind(&"Foo")).await?;
//!
//! assert_eq!(row.0, 420);
//! assert_eq!(row.1.as_str(), "Foo");
//! # Ok(())
//! # }
//! ```
//!
//! Connection pooling:
//!
//! ```no_run
//! use pgflow::Pool;
//!
//! # async fn app() -> pgflow::Result<()> {
//! let pool = Pool::connect("postgres://localhost/postgres").await?;
//!
//! let mut handles = vec![];
//!
//! for i in 0..14 {
//!     let pool = pool.clone();
//!     let t = tokio::spawn(async move {
//!         let mut conn = pool.acquire().await?;
//!         conn.query(pgflow::query("INSERT INTO foo(id) VALUES($1)").bind(&i)).await
//!     });
//!     handles.push(t);
//! }
//!
//! for h in handles {
//!     h.await.unwrap()?;
//! }
//! # Ok(())
//! # }
//! ```
pub mod common;
mod io;
mod net;
mod ext;

// Protocol
pub mod postgres;

// Encoding
mod value;
pub mod encode;
pub mod decode;

// Component
mod statement;
pub mod sql;
pub mod row;

// Auth / handshake
pub mod auth;
mod startup;
mod session;
#[cfg(feature = "tls")]
mod tls;

// Operation
pub mod transport;
pub mod executor;
pub mod query;
pub mod transaction;
pub mod notify;

// Connection
pub mod stream;
pub mod connection;
pub mod pool;

pub mod config;
mod error;

pub use encode::Encode;
pub use decode::Decode;
pub use row::{Row, FromRow, FromColumn, DecodeError};
pub use sql::SqlExt;

pub use executor::Executor;
pub use connection::Connection;
pub use config::Config;
pub use pool::{Pool, PoolConfig};
pub use transaction::Transaction;
pub use notify::{Notification, listen, unlisten, unlisten_all, notify, wait_for_notification};

#[doc(inline)]
pub use query::query;
pub use error::{Error, Result};

#[cfg(feature = "macros")]
pub use pgflow_macros::FromRow;
