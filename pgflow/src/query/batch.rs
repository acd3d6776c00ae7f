//! Batch execution: N `Bind`/`Execute` pairs for one prepared statement
//! pipelined under a single `Sync` (§4.4 "Batch execution").
use crate::encode::Encoded;
use crate::error::{Error, Result};
use crate::ext::UsizeExt;
use crate::postgres::{BackendMessage, Oid, PgFormat, SqlStateClass, backend, frontend};
use crate::sql::Sql;
use crate::statement::PortalName;
use crate::transport::{PgTransport, PgTransportExt};

use super::cache::rows_affected;
use super::extended::{prepare_statement, recover_stale_plans, unexpected};

/// Outcome of a successful batch: one affected-row count per parameter set,
/// in the order they were given.
#[derive(Debug, Clone, Default)]
pub struct BatchResult {
    pub rows_affected: Vec<u64>,
}

/// Runs `sql` once per entry of `param_sets`, sharing one `Parse` (or one
/// lookup of an already-cached statement) and pipelining a `Bind`/`Execute`
/// pair per entry under a single trailing `Sync`.
///
/// If a statement in the middle of the batch errors, the `Sync` boundary
/// makes the server skip every remaining pair without executing it; the
/// rows affected by statements before the failure are preserved in
/// [`Error::batch_rows_affected`] on the returned error.
///
/// Retries the whole batch once, after a `DEALLOCATE ALL`, if the failure
/// was a cached-plan invalidation (see [`super::extended::RowStream::open`]'s
/// identical retry for the single-statement path).
pub(crate) async fn execute_batch<IO: PgTransport>(
    io: &mut IO,
    sql: &dyn Sql,
    param_sets: Vec<Vec<Encoded<'_>>>,
    prepare_threshold: i32,
) -> Result<BatchResult> {
    let retry_sets = param_sets.clone();
    match execute_batch_once(io, sql, param_sets, prepare_threshold).await {
        Err(err) if err.sqlstate_class() == Some(SqlStateClass::CachedPlanInvalidation) => {
            recover_stale_plans(io).await?;
            execute_batch_once(io, sql, retry_sets, prepare_threshold).await
        }
        other => other,
    }
}

async fn execute_batch_once<IO: PgTransport>(
    io: &mut IO,
    sql: &dyn Sql,
    param_sets: Vec<Vec<Encoded<'_>>>,
    prepare_threshold: i32,
) -> Result<BatchResult> {
    if param_sets.is_empty() {
        return Ok(BatchResult::default());
    }

    let param_oids: Vec<Oid> = param_sets[0].iter().map(|p| p.oid).collect();
    let prepared = prepare_statement(io, sql, &param_oids, prepare_threshold).await?;
    let portal_name = PortalName::unnamed();
    let batch_len = param_sets.len();

    for params in param_sets {
        let params_size_hint = params.iter().map(|p| 4 + p.value.remaining().to_u32()).sum();
        let params_len = params.len().to_u16();
        io.send(frontend::Bind {
            portal_name: portal_name.as_str(),
            stmt_name: prepared.stmt_name.as_str(),
            param_formats_len: 1,
            param_formats: [PgFormat::Binary],
            params_len,
            params_size_hint,
            params: params.into_iter().map(|p| p.value),
            result_formats_len: 1,
            result_formats: [PgFormat::Binary],
        });
        io.send(frontend::Execute { portal_name: portal_name.as_str(), max_row: 0 });
    }
    io.send(frontend::Sync);
    io.ready_request();
    io.flush().await?;

    let mut rows = Vec::with_capacity(batch_len);
    let mut failure: Option<Error> = None;

    'pairs: for _ in 0..batch_len {
        match io.recv::<backend::BindComplete>().await {
            Ok(_) => {}
            Err(err) => {
                failure = Some(err);
                break 'pairs;
            }
        }
        loop {
            match io.recv::<BackendMessage>().await {
                Ok(BackendMessage::CommandComplete(cmd)) => {
                    rows.push(rows_affected(cmd.tag.as_str()));
                    break;
                }
                // A RETURNING clause on an INSERT/UPDATE/DELETE in the batch
                // still streams its rows here; the batch API only reports
                // counts, so they're drained and discarded.
                Ok(BackendMessage::DataRow(_)) => continue,
                Ok(BackendMessage::EmptyQueryResponse(_)) => break,
                Ok(other) => {
                    failure = Some(unexpected(&other));
                    break;
                }
                Err(err) => {
                    failure = Some(err);
                    break;
                }
            }
        }
        if failure.is_some() {
            break 'pairs;
        }
    }

    io.recv::<backend::ReadyForQuery>().await?;

    match failure {
        Some(err) => Err(Error::batch(rows, err)),
        None => Ok(BatchResult { rows_affected: rows }),
    }
}
