//! The query engine: the [`Query`] builder, its extended- and
//! simple-protocol backends, and the server-side prepared statement cache
//! key helpers (§4.4).
mod batch;
mod builder;
pub(crate) mod cache;
mod extended;
pub(crate) mod simple;

pub use batch::BatchResult;
pub use builder::{Batch, Query, RowResult};
pub use extended::{RowLimit, RowStream};

use crate::config::{Config, QueryMode};

/// Per-call settings [`Query`]'s terminal methods need from [`Config`],
/// threaded through explicitly so the query engine stays generic over any
/// [`crate::transport::PgTransport`] rather than depending on a concrete
/// connection type.
#[derive(Debug, Clone, Copy)]
pub struct QueryOptions {
    pub mode: QueryMode,
    pub prepare_threshold: i32,
    /// `fetchSize` for the extended-protocol terminal methods that stream
    /// to completion (`execute`/`fetch_all`/`fetch`); `0` runs unbounded.
    pub default_row_fetch_size: u32,
    /// Whether [`Batch::execute`](builder::Batch::execute) should rewrite a
    /// plain, `RETURNING`-free multi-row `INSERT` batch into one multi-row
    /// `VALUES` statement instead of one `Bind`/`Execute` pair per row.
    pub rewrite_batched_inserts: bool,
}

impl QueryOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            mode: config.prefer_query_mode,
            prepare_threshold: config.prepare_threshold,
            default_row_fetch_size: config.default_row_fetch_size.max(0) as u32,
            rewrite_batched_inserts: config.rewrite_batched_inserts,
        }
    }

    fn row_limit(&self) -> RowLimit {
        match self.default_row_fetch_size {
            0 => RowLimit::Unbounded,
            n => RowLimit::Chunked(n),
        }
    }
}

/// Starts building a query over `sql`, which may be a `&str` (persistent,
/// cache-eligible) or [`crate::sql::SqlOnce`] (always sent unnamed).
pub fn query<'val, SQL: crate::sql::Sql>(sql: SQL) -> Query<'val, SQL> {
    Query::new(sql)
}
