//! Session/transaction state tracking (§3, §4.5).
//!
//! Every `ReadyForQuery` carries a single status byte (`I`/`T`/`E`) that
//! tells the frontend whether it is idle, inside an open transaction, or
//! inside a transaction that has already failed and can only be rolled
//! back. [`SessionState`] mirrors that byte so higher layers (autosave,
//! read-only enforcement) can make decisions without re-deriving it from
//! whatever SQL was last sent.
use crate::config::{Autosave, ReadOnlyMode};
use crate::postgres::backend::ReadyForQuery;

/// Transaction status as reported by the last `ReadyForQuery`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    #[default]
    Idle,
    InTransaction,
    InFailedTransaction,
}

impl SessionState {
    pub fn from_ready_for_query(msg: &ReadyForQuery) -> Self {
        match msg.tx_status {
            b'I' => Self::Idle,
            b'T' => Self::InTransaction,
            b'E' => Self::InFailedTransaction,
            other => unreachable!("ReadyForQuery carried an unrecognized status byte {other:?}"),
        }
    }

    pub fn is_in_transaction(self) -> bool {
        matches!(self, Self::InTransaction | Self::InFailedTransaction)
    }

    pub fn is_failed(self) -> bool {
        matches!(self, Self::InFailedTransaction)
    }
}

/// Whether the next statement should be wrapped in a `SAVEPOINT`/`RELEASE`
/// pair so a failure can be recovered by rolling back to the savepoint
/// instead of aborting the whole transaction.
///
/// - `never`: no savepoints are ever issued.
/// - `conservative`: only once a transaction is already open, and only
///   around statements that aren't already known-safe (`SELECT`, `COMMIT`,
///   `ROLLBACK`, ...).
/// - `always`: around every statement issued while a transaction is open.
pub fn wants_savepoint(policy: Autosave, state: SessionState, sql: &str) -> bool {
    if !state.is_in_transaction() {
        return false;
    }
    match policy {
        Autosave::Never => false,
        Autosave::Always => true,
        Autosave::Conservative => !is_known_safe(sql),
    }
}

fn is_known_safe(sql: &str) -> bool {
    let trimmed = sql.trim_start();
    let first_word = trimmed.split_whitespace().next().unwrap_or("");
    first_word.eq_ignore_ascii_case("select")
        || first_word.eq_ignore_ascii_case("commit")
        || first_word.eq_ignore_ascii_case("rollback")
        || first_word.eq_ignore_ascii_case("begin")
}

/// Whether `sql` is a utility statement that must run without an implicit
/// `BEGIN` ahead of it under `autocommit=false` (§4.5 "Suppress-begin
/// flag"): `COMMIT`/`ROLLBACK` close out a transaction rather than needing
/// one opened first, and `SET`/`SHOW` are meant to take effect immediately
/// rather than be rolled back with the rest of an implicit transaction.
pub fn suppresses_implicit_begin(sql: &str) -> bool {
    let trimmed = sql.trim_start();
    let first_word = trimmed.split_whitespace().next().unwrap_or("");
    first_word.eq_ignore_ascii_case("commit")
        || first_word.eq_ignore_ascii_case("rollback")
        || first_word.eq_ignore_ascii_case("set")
        || first_word.eq_ignore_ascii_case("show")
        || first_word.eq_ignore_ascii_case("begin")
}

/// The `SET SESSION CHARACTERISTICS AS TRANSACTION READ ONLY` statement text
/// to send once per connection when `readOnlyMode=always`, or once per
/// transaction when `readOnlyMode=transaction`. `ignore` never sends it;
/// read-only enforcement is left entirely to the server/application.
pub fn read_only_statement(mode: ReadOnlyMode, scope: ReadOnlyScope) -> Option<&'static str> {
    match (mode, scope) {
        (ReadOnlyMode::Ignore, _) => None,
        (ReadOnlyMode::Always, ReadOnlyScope::Session) => {
            Some("SET SESSION CHARACTERISTICS AS TRANSACTION READ ONLY")
        }
        (ReadOnlyMode::Always, ReadOnlyScope::Transaction) => None,
        (ReadOnlyMode::Transaction, ReadOnlyScope::Session) => None,
        (ReadOnlyMode::Transaction, ReadOnlyScope::Transaction) => {
            Some("SET TRANSACTION READ ONLY")
        }
    }
}

/// Distinguishes the two points [`read_only_statement`] can be invoked from:
/// once at connection-open time (`Session`), or once per `BEGIN` (`Transaction`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadOnlyScope {
    Session,
    Transaction,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conservative_autosave_skips_select() {
        assert!(!wants_savepoint(Autosave::Conservative, SessionState::InTransaction, "SELECT 1"));
        assert!(wants_savepoint(Autosave::Conservative, SessionState::InTransaction, "INSERT INTO t VALUES (1)"));
    }

    #[test]
    fn autosave_never_applies_outside_a_transaction() {
        assert!(!wants_savepoint(Autosave::Always, SessionState::Idle, "INSERT INTO t VALUES (1)"));
    }

    #[test]
    fn suppress_begin_covers_utility_statements_only() {
        assert!(suppresses_implicit_begin("commit"));
        assert!(suppresses_implicit_begin("  ROLLBACK"));
        assert!(suppresses_implicit_begin("SET TRANSACTION ISOLATION LEVEL SERIALIZABLE"));
        assert!(suppresses_implicit_begin("show transaction_isolation"));
        assert!(!suppresses_implicit_begin("SELECT 1"));
        assert!(!suppresses_implicit_begin("INSERT INTO t VALUES (1)"));
    }

    #[test]
    fn read_only_mode_picks_statement_by_scope() {
        assert_eq!(
            read_only_statement(ReadOnlyMode::Always, ReadOnlyScope::Session),
            Some("SET SESSION CHARACTERISTICS AS TRANSACTION READ ONLY")
        );
        assert_eq!(read_only_statement(ReadOnlyMode::Transaction, ReadOnlyScope::Session), None);
        assert_eq!(
            read_only_statement(ReadOnlyMode::Transaction, ReadOnlyScope::Transaction),
            Some("SET TRANSACTION READ ONLY")
        );
        assert_eq!(read_only_statement(ReadOnlyMode::Ignore, ReadOnlyScope::Session), None);
    }
}
