//! The fluent [`Query`] builder (§4.4).
use crate::config::QueryMode;
use crate::encode::{Encode, Encoded};
use crate::error::{Error, Result};
use crate::row::FromRow;
use crate::sql::{CachedQuery, Native, Sql, StatementKind, SubQuery};
use crate::transport::PgTransport;

use super::QueryOptions;
use super::batch::{self, BatchResult};
use super::extended::{RowLimit, RowStream};
use super::simple::simple_query;

/// Outcome of [`Query::execute`]: only the affected row count, no result set.
#[derive(Debug, Clone, Copy, Default)]
pub struct RowResult {
    pub rows_affected: u64,
}

/// What [`Query::returning_generated_keys`]/[`Query::returning_generated_columns`]
/// asked [`Query::execute_returning_keys`] to append, if the statement
/// doesn't already carry a `RETURNING` clause (§4.4 "Returning-generated-keys").
#[derive(Debug, Clone)]
enum GeneratedKeys {
    All,
    Columns(Vec<String>),
}

/// A SQL statement together with its bound parameters, built up with
/// `.bind()` before being driven to completion by one of the terminal
/// methods (`execute`/`fetch_all`/`fetch_one`/`fetch_optional`/`fetch`).
///
/// `SQL` is generic over [`Sql`] so the same builder works for a plain
/// `&str` (eligible for the prepared statement cache) and for
/// [`crate::sql::SqlOnce`] (always sent unnamed).
#[must_use = "a Query does nothing until one of its terminal methods is awaited"]
pub struct Query<'val, SQL> {
    sql: SQL,
    params: Vec<Encoded<'val>>,
    generated_keys: Option<GeneratedKeys>,
}

impl<'val, SQL: Sql> Query<'val, SQL> {
    pub fn new(sql: SQL) -> Self {
        Self { sql, params: Vec::new(), generated_keys: None }
    }

    /// Appends a bound parameter; panics-free, parameters are sent
    /// positionally in the order `.bind()` was called.
    pub fn bind(mut self, value: &'val (impl Encode + 'val)) -> Self {
        self.params.push(Encoded::new(value));
        self
    }

    /// The underlying SQL text, e.g. for autosave's known-safe-statement check.
    pub fn sql_text(&self) -> &str {
        self.sql.sql()
    }

    /// Requests that [`Query::execute_returning_keys`] append `RETURNING *`
    /// if the statement doesn't already have a `RETURNING` clause, and
    /// decode the resulting rows as generated keys.
    pub fn returning_generated_keys(mut self) -> Self {
        self.generated_keys = Some(GeneratedKeys::All);
        self
    }

    /// Like [`Query::returning_generated_keys`], but names the specific
    /// columns to return instead of `*`.
    pub fn returning_generated_columns(mut self, columns: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.generated_keys = Some(GeneratedKeys::Columns(columns.into_iter().map(Into::into).collect()));
        self
    }

    fn wants_simple(&self, opts: QueryOptions) -> bool {
        self.params.is_empty() && matches!(opts.mode, QueryMode::Simple)
    }

    /// Splits `self.sql` into exactly one [`SubQuery`] (`?` rewritten to
    /// `$n`), erroring if the text is actually a compound, `;`-delimited
    /// statement — the fetch methods return one typed result set and have
    /// nowhere to put a second one.
    fn single_sub_query(&self) -> Result<SubQuery> {
        let mut subs = CachedQuery::parse(self.sql.sql()).into_sub_queries();
        if subs.len() != 1 {
            return Err(Error::config(
                "fetch methods require exactly one SQL statement; use .execute() for compound, `;`-separated SQL",
            ));
        }
        Ok(subs.pop().unwrap())
    }

    /// Runs the statement for its side effects, returning the affected row
    /// count without materializing a result set. Compound, `;`-delimited
    /// SQL runs each SubQuery in turn, distributing `.bind()`-ed parameters
    /// across them by each SubQuery's own placeholder count, and sums the
    /// affected-row counts.
    pub async fn execute<IO: PgTransport>(self, io: &mut IO, opts: QueryOptions) -> Result<RowResult> {
        if self.wants_simple(opts) {
            let result = simple_query(io, self.sql.sql()).await?;
            return Ok(RowResult { rows_affected: result.rows_affected });
        }

        let persistent = self.sql.persistent();
        let cached = CachedQuery::parse(self.sql.sql());
        if cached.is_single_statement() {
            let native = cached.into_sub_queries().pop().unwrap().into_native(persistent);
            let mut stream =
                RowStream::open(io, &native, self.params, opts.prepare_threshold, opts.row_limit()).await?;
            while stream.try_next().await?.is_some() {}
            return Ok(RowResult { rows_affected: stream.rows_affected() });
        }

        execute_compound(io, cached, persistent, self.params, opts.prepare_threshold).await
    }

    /// Collects every row into a `Vec`, decoded via [`FromRow`].
    pub async fn fetch_all<IO: PgTransport, R: FromRow>(self, io: &mut IO, opts: QueryOptions) -> Result<Vec<R>> {
        if self.wants_simple(opts) {
            let result = simple_query(io, self.sql.sql()).await?;
            return result.rows.into_iter().map(R::from_row).collect::<std::result::Result<_, _>>().map_err(Into::into);
        }

        let native = self.single_sub_query()?.into_native(self.sql.persistent());
        let mut stream = RowStream::open(io, &native, self.params, opts.prepare_threshold, opts.row_limit()).await?;
        let mut out = Vec::new();
        while let Some(row) = stream.try_next().await? {
            out.push(R::from_row(row)?);
        }
        Ok(out)
    }

    /// Like [`Query::fetch_optional`] but fails with [`Error::row_not_found`]
    /// if the result set is empty.
    pub async fn fetch_one<IO: PgTransport, R: FromRow>(self, io: &mut IO, opts: QueryOptions) -> Result<R> {
        self.fetch_optional(io, opts).await?.ok_or_else(Error::row_not_found)
    }

    /// Collects at most one row. Uses a hard cap of 1 so the server never
    /// produces more than a single row over the wire, and a `PortalSuspended`
    /// at that cap ends the stream rather than pulling a second chunk.
    pub async fn fetch_optional<IO: PgTransport, R: FromRow>(
        self,
        io: &mut IO,
        opts: QueryOptions,
    ) -> Result<Option<R>> {
        if self.wants_simple(opts) {
            let result = simple_query(io, self.sql.sql()).await?;
            return result.rows.into_iter().next().map(R::from_row).transpose().map_err(Into::into);
        }

        let native = self.single_sub_query()?.into_native(self.sql.persistent());
        let mut stream = RowStream::open(io, &native, self.params, opts.prepare_threshold, RowLimit::Capped(1)).await?;
        let mut out = None;
        while let Some(row) = stream.try_next().await? {
            out = Some(R::from_row(row)?);
        }
        Ok(out)
    }

    /// Streams rows lazily instead of collecting them up front; `io` stays
    /// borrowed until the returned stream is dropped or exhausted.
    ///
    /// Always goes through the extended protocol (a lazily-consumed simple
    /// query can't be interleaved with anything else on the connection).
    pub async fn fetch<IO: PgTransport>(self, io: &mut IO, opts: QueryOptions) -> Result<RowStream<'_, IO>> {
        let native = self.single_sub_query()?.into_native(self.sql.persistent());
        RowStream::open(io, &native, self.params, opts.prepare_threshold, opts.row_limit()).await
    }

    /// Like [`Query::execute`], but if [`Query::returning_generated_keys`]
    /// (or `_columns`) was called, a `RETURNING` clause is appended unless
    /// the statement already has one, and the resulting rows are decoded as
    /// a secondary result set (§4.4 "Returning-generated-keys").
    pub async fn execute_returning_keys<IO: PgTransport, R: FromRow>(
        self,
        io: &mut IO,
        opts: QueryOptions,
    ) -> Result<(RowResult, Vec<R>)> {
        let wants_keys = self.generated_keys.is_some();
        let persistent = self.sql.persistent();
        let mut sub = self.single_sub_query()?;

        if let Some(spec) = &self.generated_keys {
            if !sub.has_returning() {
                let clause = match spec {
                    GeneratedKeys::All => "*".to_string(),
                    GeneratedKeys::Columns(cols) => cols.join(", "),
                };
                sub = sub.with_appended_returning(&clause);
            }
        }

        let native = sub.into_native(persistent);
        let mut stream = RowStream::open(io, &native, self.params, opts.prepare_threshold, RowLimit::Unbounded).await?;
        let mut keys = Vec::new();
        while let Some(row) = stream.try_next().await? {
            if wants_keys {
                keys.push(R::from_row(row)?);
            }
        }
        Ok((RowResult { rows_affected: stream.rows_affected() }, keys))
    }

    /// Turns this query into a [`Batch`], its bound parameters becoming the
    /// first of the batch's rows (§4.4 "Batch execution").
    pub fn into_batch(self) -> Batch<'val, SQL> {
        Batch { sql: self.sql, param_sets: vec![self.params] }
    }
}

async fn execute_compound<'val, IO: PgTransport>(
    io: &mut IO,
    cached: CachedQuery,
    persistent: bool,
    params: Vec<Encoded<'val>>,
    prepare_threshold: i32,
) -> Result<RowResult> {
    let mut params = params.into_iter();
    let mut rows_affected = 0u64;

    for sub in cached.into_sub_queries() {
        let n = sub.param_count() as usize;
        let chunk: Vec<_> = (&mut params).take(n).collect();
        if chunk.len() != n {
            return Err(Error::config("not enough bound parameters for a compound, `;`-separated statement"));
        }
        let native = sub.into_native(persistent);
        let mut stream = RowStream::open(io, &native, chunk, prepare_threshold, RowLimit::Unbounded).await?;
        while stream.try_next().await?.is_some() {}
        rows_affected += stream.rows_affected();
    }

    if params.next().is_some() {
        return Err(Error::config("too many bound parameters for a compound, `;`-separated statement"));
    }
    Ok(RowResult { rows_affected })
}

/// Multiple parameter vectors for the same SQL text, run as a single
/// `Bind`/`Execute` pipeline under one `Sync` instead of one `Sync` each
/// (§4.4 "Batch execution").
#[must_use = "a Batch does nothing until .execute() is awaited"]
pub struct Batch<'val, SQL> {
    sql: SQL,
    param_sets: Vec<Vec<Encoded<'val>>>,
}

impl<'val, SQL: Sql> Batch<'val, SQL> {
    /// Appends another row, built the same way as the first: same SQL text,
    /// a fresh set of `.bind()` calls.
    pub fn row(mut self, query: Query<'val, SQL>) -> Self {
        self.param_sets.push(query.params);
        self
    }

    /// Runs every row's `Bind`/`Execute` pair under one `Sync`. On a
    /// mid-batch failure, the rows affected by statements before the
    /// failure are available via [`Error::batch_rows_affected`] on the
    /// returned error.
    ///
    /// If `rewrite_batched_inserts` is on and this batch is a plain,
    /// `RETURNING`-free `INSERT ... VALUES (...)` repeated over more than
    /// one row, it runs as a single multi-row `INSERT` instead — fewer
    /// round trips, at the cost of collapsing the per-row affected-row
    /// counts into one total (`rows_affected` then has a single entry).
    pub async fn execute<IO: PgTransport>(self, io: &mut IO, opts: QueryOptions) -> Result<BatchResult> {
        let persistent = self.sql.persistent();
        let mut subs = CachedQuery::parse(self.sql.sql()).into_sub_queries();

        let eligible =
            opts.rewrite_batched_inserts && self.param_sets.len() > 1 && subs.len() == 1 && {
                let sub = &subs[0];
                sub.kind() == StatementKind::Insert && !sub.has_returning()
            };

        if eligible {
            let sub = subs.pop().unwrap();
            if let Some(rewritten) = sub.rewrite_as_multi_row_insert(self.param_sets.len()) {
                let native = Native::raw(rewritten, persistent);
                let flattened: Vec<_> = self.param_sets.into_iter().flatten().collect();
                let mut stream =
                    RowStream::open(io, &native, flattened, opts.prepare_threshold, RowLimit::Unbounded).await?;
                while stream.try_next().await?.is_some() {}
                return Ok(BatchResult { rows_affected: vec![stream.rows_affected()] });
            }
        }

        batch::execute_batch(io, &self.sql, self.param_sets, opts.prepare_threshold).await
    }
}
