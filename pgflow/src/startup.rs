//! Startup phase: optional SSL/GSS negotiation, `StartupMessage`, the
//! authentication exchange, and absorption of `ParameterStatus`/
//! `BackendKeyData` up to the first `ReadyForQuery` (§4.3).
//!
//! <https://www.postgresql.org/docs/current/protocol-flow.html#PROTOCOL-FLOW-START-UP>
use std::collections::HashMap;

use crate::auth::{GssProvider, md5_hash_password, scram};
use crate::config::Config;
use crate::error::{Error, ErrorKind, Result};
use crate::postgres::{BackendMessage, backend, frontend};
use crate::transport::{PgTransport, PgTransportExt};

/// Successful outcome of [`startup`].
pub struct StartupResponse {
    pub backend_key_data: backend::BackendKeyData,
    pub param_status: HashMap<String, String>,
}

/// Drives `StartupMessage` and the full authentication exchange (cleartext,
/// MD5, SASL/SCRAM, or a caller-supplied [`GssProvider`]), then absorbs
/// `ParameterStatus`/`BackendKeyData` up to the first `ReadyForQuery`.
pub async fn startup<IO: PgTransport>(
    config: &Config,
    channel_binding: scram::ChannelBinding,
    gss: Option<&mut dyn GssProvider>,
    mut io: IO,
) -> Result<StartupResponse> {
    let params = config.startup_params();
    io.send_startup(frontend::Startup {
        user: &config.user,
        database: Some(&config.dbname),
        replication: None,
        params: &params,
    });
    io.flush().await?;

    authenticate(config, channel_binding, gss, &mut io).await?;

    let mut key_data = None;
    let mut param_status = HashMap::new();

    loop {
        match io.recv().await? {
            BackendMessage::ReadyForQuery(_) => break,
            BackendMessage::BackendKeyData(kd) => key_data = Some(kd),
            BackendMessage::ParameterStatus(ps) => {
                param_status.insert(ps.name.to_string(), ps.value.to_string());
            }
            BackendMessage::NegotiateProtocolVersion(_) => {
                // Server doesn't support the requested minor protocol
                // features; we only ever request 3.0 with no extensions, so
                // this is surfaced but not fatal.
            }
            other => {
                return Err(Error::from(ErrorKind::Io(std::io::Error::other(format!(
                    "unexpected message during startup: {other:?}"
                )))));
            }
        }
    }

    Ok(StartupResponse {
        backend_key_data: key_data.ok_or_else(|| Error::config("server never sent BackendKeyData"))?,
        param_status,
    })
}

async fn authenticate<IO: PgTransport>(
    config: &Config,
    channel_binding: scram::ChannelBinding,
    mut gss: Option<&mut dyn GssProvider>,
    io: &mut IO,
) -> Result<()> {
    use backend::Authentication;

    match io.recv::<Authentication>().await? {
        Authentication::Ok => return Ok(()),
        Authentication::CleartextPassword => {
            let password = config.password.as_deref().unwrap_or_default();
            io.send(frontend::PasswordMessage { password });
            io.flush().await?;
        }
        Authentication::MD5Password { salt } => {
            let password = config.password.as_deref().unwrap_or_default();
            let hashed = md5_hash_password(&config.user, password, salt);
            io.send(frontend::PasswordMessage { password: &hashed });
            io.flush().await?;
        }
        Authentication::SASL { mechanisms } => {
            run_sasl(config, channel_binding, &mechanisms, io).await?;
        }
        Authentication::GSS | Authentication::SSPI => {
            run_gss(gss.as_deref_mut(), None, io).await?;
        }
        other => {
            return Err(Error::from(ErrorKind::UnsupportedAuth(auth_name(&other))));
        }
    }

    match io.recv::<Authentication>().await? {
        Authentication::Ok => Ok(()),
        other => Err(Error::from(ErrorKind::UnsupportedAuth(auth_name(&other)))),
    }
}

fn auth_name(auth: &backend::Authentication) -> &'static str {
    use backend::Authentication::*;
    match auth {
        Ok => "ok",
        KerberosV5 => "kerberos-v5",
        CleartextPassword => "cleartext",
        MD5Password { .. } => "md5",
        GSS => "gss",
        GSSContinue { .. } => "gss-continue",
        SSPI => "sspi",
        SASL { .. } => "sasl",
        SASLContinue { .. } => "sasl-continue",
        SASLFinal { .. } => "sasl-final",
    }
}

async fn run_sasl<IO: PgTransport>(
    config: &Config,
    channel_binding: scram::ChannelBinding,
    mechanisms: &bytes::Bytes,
    io: &mut IO,
) -> Result<()> {
    let offered = std::str::from_utf8(mechanisms).unwrap_or_default();
    let offered: Vec<&str> = offered.split('\0').filter(|s| !s.is_empty()).collect();

    let wants_plus = matches!(channel_binding, scram::ChannelBinding::TlsServerEndPoint(_));
    let (mechanism, binding) = if wants_plus && offered.contains(&"SCRAM-SHA-256-PLUS") {
        ("SCRAM-SHA-256-PLUS", channel_binding)
    } else if offered.contains(&"SCRAM-SHA-256") {
        ("SCRAM-SHA-256", scram::ChannelBinding::NotRequested)
    } else {
        return Err(Error::from(ErrorKind::UnsupportedAuth("sasl-mechanism")));
    };

    let password = config.password.as_deref().unwrap_or_default();
    let mut client = scram::ScramSha256::new(password, binding);

    let first = client.message();
    io.send(frontend::SaslInitialResponse { mechanism, data: &first });
    io.flush().await?;

    let server_first = match io.recv::<backend::Authentication>().await? {
        backend::Authentication::SASLContinue { data } => data,
        other => return Err(Error::from(ErrorKind::UnsupportedAuth(auth_name(&other)))),
    };

    let client_final = client.update(&server_first)?;
    io.send(frontend::SaslResponse { data: &client_final });
    io.flush().await?;

    match io.recv::<backend::Authentication>().await? {
        backend::Authentication::SASLFinal { data } => client.finish(&data)?,
        other => return Err(Error::from(ErrorKind::UnsupportedAuth(auth_name(&other)))),
    }

    Ok(())
}

async fn run_gss<IO: PgTransport>(
    gss: Option<&mut dyn GssProvider>,
    target: Option<&str>,
    io: &mut IO,
) -> Result<()> {
    let Some(gss) = gss else {
        return Err(Error::from(ErrorKind::UnsupportedAuth("gssapi")));
    };

    let mut token = gss
        .init_security_context(target.unwrap_or(""))
        .map_err(|e| Error::from(ErrorKind::Authentication(e)))?;

    loop {
        io.send(frontend::SaslResponse { data: &token });
        io.flush().await?;

        match io.recv::<backend::Authentication>().await? {
            backend::Authentication::GSSContinue { data } => {
                match gss.continue_security_context(&data).map_err(|e| Error::from(ErrorKind::Authentication(e)))? {
                    Some(next) => token = next,
                    None => return Ok(()),
                }
            }
            backend::Authentication::Ok => return Ok(()),
            other => return Err(Error::from(ErrorKind::UnsupportedAuth(auth_name(&other)))),
        }
    }
}
