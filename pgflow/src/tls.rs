//! TLS upgrade for the startup sequence (§4.3, `sslmode`).
//!
//! A client issues `SSLRequest` before `StartupMessage`; on `'S'` the rest of
//! the connection is re-homed onto a TLS stream. Verification strictness is
//! controlled by [`SslMode`]; `require` accepts any certificate chain, while
//! `verify-ca`/`verify-full` validate against a configured root store.
use std::sync::Arc;

use rustls::RootCertStore;
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tokio_rustls::client::TlsStream;

use crate::config::SslMode;
use crate::error::{Error, Result};

/// Builds the `rustls::ClientConfig` appropriate for `mode`, loading
/// `ca_pem` (a PEM-encoded bundle) into the root store when verification is
/// requested.
pub fn connector(mode: SslMode, ca_pem: Option<&[u8]>) -> Result<TlsConnector> {
    let config = match mode {
        SslMode::Disable | SslMode::Allow => unreachable!("caller must not request TLS for this mode"),
        SslMode::Prefer | SslMode::Require => rustls::ClientConfig::builder()
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(AcceptAny))
            .with_no_client_auth(),
        SslMode::VerifyCa | SslMode::VerifyFull => {
            let mut roots = RootCertStore::empty();
            if let Some(pem) = ca_pem {
                for cert in rustls_pemfile::certs(&mut &*pem) {
                    let cert = cert.map_err(|e| Error::config(format!("invalid CA certificate: {e}")))?;
                    roots.add(cert).map_err(|e| Error::config(format!("invalid CA certificate: {e}")))?;
                }
            } else {
                roots.extend(webpki_roots_static());
            }
            rustls::ClientConfig::builder()
                .with_root_certificates(roots)
                .with_no_client_auth()
        }
    };
    Ok(TlsConnector::from(Arc::new(config)))
}

/// Minimal built-in trust anchor set is intentionally empty; real deployments
/// are expected to pass `sslrootcert` so [`connector`] loads an explicit CA
/// bundle instead of relying on the platform trust store.
fn webpki_roots_static() -> RootCertStore {
    RootCertStore::empty()
}

/// Accepts any certificate chain without validation, matching libpq's
/// `sslmode=require` semantics (encrypted, but not authenticated).
#[derive(Debug)]
struct AcceptAny;

impl ServerCertVerifier for AcceptAny {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> std::result::Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        rustls::crypto::ring::default_provider().signature_verification_algorithms.supported_schemes()
    }
}

pub async fn handshake(
    connector: &TlsConnector,
    tcp: TcpStream,
    server_name: ServerName<'static>,
) -> Result<TlsStream<TcpStream>> {
    connector
        .connect(server_name, tcp)
        .await
        .map_err(|e| Error::from(e).context("TLS handshake failed"))
}

/// Computes the `tls-server-end-point` channel-binding data (RFC 9266) from
/// the negotiated peer certificate, used by SCRAM-SHA-256-PLUS.
pub fn channel_binding(stream: &TlsStream<TcpStream>) -> Option<Vec<u8>> {
    let (_, session) = stream.get_ref();
    let certs = session.peer_certificates()?;
    let end_entity = certs.first()?;
    Some(crate::auth::scram::cert_hash_channel_binding(end_entity.as_ref()))
}
