//! Asynchronous `NOTIFY`/`LISTEN` support (§4.6).
//!
//! `NotificationResponse` can arrive at any point the connection is
//! otherwise idle, unprompted by any request the client sent. Unlike the
//! query engine, which always knows which reply it's waiting for,
//! [`wait_for_notification`] reads the untyped [`BackendMessage`] so it
//! isn't tripped up by an async `ParameterStatus` arriving first (e.g. after
//! a `SET` run on another session changes a reported parameter).
use crate::error::Result;
use crate::postgres::{BackendMessage, ProtocolError};
use crate::query::query;
use crate::transport::PgTransport;

/// A single `NOTIFY` delivered to a `LISTEN`ing connection.
#[derive(Debug, Clone)]
pub struct Notification {
    pub process_id: u32,
    pub channel: String,
    pub payload: String,
}

/// Starts listening on `channel`. Idempotent: `LISTEN` on an
/// already-listened channel is a no-op on the server.
pub async fn listen<IO: PgTransport>(io: &mut IO, channel: &str) -> Result<()> {
    query(format!("LISTEN {}", quote_identifier(channel))).execute(io, default_opts()).await?;
    Ok(())
}

pub async fn unlisten<IO: PgTransport>(io: &mut IO, channel: &str) -> Result<()> {
    query(format!("UNLISTEN {}", quote_identifier(channel))).execute(io, default_opts()).await?;
    Ok(())
}

pub async fn unlisten_all<IO: PgTransport>(io: &mut IO) -> Result<()> {
    query("UNLISTEN *").execute(io, default_opts()).await?;
    Ok(())
}

/// Sends a `NOTIFY`, going through `pg_notify(text, text)` over the
/// extended protocol so `channel`/`payload` never need SQL-level escaping.
pub async fn notify<IO: PgTransport>(io: &mut IO, channel: &str, payload: &str) -> Result<()> {
    query("SELECT pg_notify($1, $2)").bind(channel).bind(payload).execute(io, default_opts()).await?;
    Ok(())
}

/// Blocks until the next `NotificationResponse` arrives. The connection
/// must be idle (no query in flight) when this is called; interleaving it
/// with ordinary queries on the same connection isn't supported, the same
/// way libpq expects `PQnotifies` to be polled between commands.
pub async fn wait_for_notification<IO: PgTransport>(io: &mut IO) -> Result<Notification> {
    loop {
        match crate::transport::PgTransportExt::recv::<BackendMessage>(io).await? {
            BackendMessage::NotificationResponse(n) => {
                return Ok(Notification {
                    process_id: n.process_id,
                    channel: n.channel.to_string(),
                    payload: n.payload.to_string(),
                });
            }
            BackendMessage::ParameterStatus(_) => continue,
            other => {
                return Err(ProtocolError::unexpected_phase(b'A', other.msgtype(), "waiting for a notification").into());
            }
        }
    }
}

fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn default_opts() -> crate::query::QueryOptions {
    crate::query::QueryOptions { mode: crate::config::QueryMode::Extended, prepare_threshold: 0 }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quotes_identifiers_with_embedded_quotes() {
        assert_eq!(quote_identifier("channel"), "\"channel\"");
        assert_eq!(quote_identifier("we\"ird"), "\"we\"\"ird\"");
    }
}
