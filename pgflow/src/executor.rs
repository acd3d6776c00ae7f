//! The [`Executor`] trait: anything that can hand over a [`PgTransport`] to
//! run a query against, whether that's a connection already in hand or a
//! pool entry still being checked out.
use std::future::Ready;

use crate::error::Result;
use crate::transport::PgTransport;

/// A type that can produce a [`PgTransport`] to run queries against.
///
/// Implemented for `&mut T` where `T: PgTransport` (the common case: you
/// already have a [`crate::connection::Connection`] or
/// [`crate::transaction::Transaction`] and just want to borrow it), and for
/// [`crate::pool::Pool`]/[`crate::pool::PoolConnection`] which resolve the
/// future by checking a connection out first.
pub trait Executor {
    type Transport: PgTransport;
    type Future: Future<Output = Result<Self::Transport>>;

    fn connection(self) -> Self::Future;
}

impl<T: PgTransport> Executor for &mut T {
    type Transport = Self;
    type Future = Ready<Result<Self>>;

    fn connection(self) -> Self::Future {
        std::future::ready(Ok(self))
    }
}
