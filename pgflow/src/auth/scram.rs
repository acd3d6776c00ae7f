//! SCRAM-SHA-256 / SCRAM-SHA-256-PLUS client (RFC 5802, RFC 7677, RFC 9266).
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as base64;
use hmac::{Hmac, Mac};
use rand::Rng;
use sha2::{Digest, Sha256};

use crate::error::{Error, ErrorKind};

type HmacSha256 = Hmac<Sha256>;

/// Channel-binding data offered to the server, computed from the TLS peer
/// certificate's `tls-server-end-point` hash when the connection is secured.
pub enum ChannelBinding {
    Unsupported,
    /// Client supports channel binding but negotiated a non-PLUS mechanism.
    NotRequested,
    TlsServerEndPoint(Vec<u8>),
}

enum State {
    ClientFirst,
    ClientFinal { salted_password: [u8; 32], auth_message: String },
    Done,
}

/// Drives one SCRAM-SHA-256[-PLUS] client exchange.
///
/// Mirrors the `message()` / `update()` / `finish()` calling convention used
/// by authentication drivers in this ecosystem: `message()` produces the
/// initial SASL response, `update()` consumes `AuthenticationSASLContinue`
/// and produces the client-final-message, `finish()` consumes
/// `AuthenticationSASLFinal` and verifies the server's signature.
pub struct ScramSha256 {
    state: State,
    password: String,
    client_nonce: String,
    client_first_bare: String,
    gs2_header: String,
    channel_binding: ChannelBinding,
}

impl ScramSha256 {
    pub fn new(password: &str, channel_binding: ChannelBinding) -> Self {
        let client_nonce = generate_nonce();
        let gs2_header = match &channel_binding {
            ChannelBinding::TlsServerEndPoint(_) => "p=tls-server-end-point,,".to_string(),
            ChannelBinding::NotRequested => "y,,".to_string(),
            ChannelBinding::Unsupported => "n,,".to_string(),
        };
        let client_first_bare = format!("n=,r={client_nonce}");
        Self {
            state: State::ClientFirst,
            password: stringprep::saslprep(password).map(|s| s.into_owned()).unwrap_or_else(|_| password.to_string()),
            client_nonce,
            client_first_bare,
            gs2_header,
            channel_binding,
        }
    }

    /// Does this exchange use channel binding (a `-PLUS` mechanism)?
    pub fn uses_channel_binding(&self) -> bool {
        matches!(self.channel_binding, ChannelBinding::TlsServerEndPoint(_))
    }

    /// The client-first-message to send as the initial SASL response.
    pub fn message(&self) -> Vec<u8> {
        format!("{}{}", self.gs2_header, self.client_first_bare).into_bytes()
    }

    /// Consumes `AuthenticationSASLContinue`'s data, returns the
    /// client-final-message to send back.
    pub fn update(&mut self, server_first: &[u8]) -> Result<Vec<u8>, Error> {
        let server_first = std::str::from_utf8(server_first)
            .map_err(|_| protocol_error("server-first-message was not utf8"))?;

        let mut nonce = None;
        let mut salt = None;
        let mut iterations = None;
        for part in server_first.split(',') {
            let Some((k, v)) = part.split_once('=') else { continue };
            match k {
                "r" => nonce = Some(v),
                "s" => salt = Some(v),
                "i" => iterations = v.parse::<u32>().ok(),
                _ => {}
            }
        }
        let nonce = nonce.ok_or_else(|| protocol_error("server-first-message missing nonce"))?;
        let salt = salt.ok_or_else(|| protocol_error("server-first-message missing salt"))?;
        let iterations = iterations.ok_or_else(|| protocol_error("server-first-message missing iteration count"))?;

        if !nonce.starts_with(&self.client_nonce) {
            return Err(protocol_error("server nonce does not extend client nonce"));
        }

        let salt = base64.decode(salt).map_err(|_| protocol_error("invalid salt encoding"))?;

        let cbind_data: &[u8] = match &self.channel_binding {
            ChannelBinding::TlsServerEndPoint(data) => data,
            _ => &[],
        };
        let cbind_input = [self.gs2_header.as_bytes(), cbind_data].concat();
        let channel_binding_b64 = base64.encode(cbind_input);

        let client_final_without_proof = format!("c={channel_binding_b64},r={nonce}");

        let salted_password = hi(&self.password, &salt, iterations);
        let client_key = hmac(&salted_password, b"Client Key");
        let stored_key = Sha256::digest(client_key);

        let auth_message =
            format!("{},{},{}", self.client_first_bare, server_first, client_final_without_proof);

        let client_signature = hmac(&stored_key, auth_message.as_bytes());
        let client_proof: Vec<u8> =
            client_key.iter().zip(client_signature.iter()).map(|(a, b)| a ^ b).collect();

        let client_final = format!(
            "{client_final_without_proof},p={}",
            base64.encode(client_proof)
        );

        self.state = State::ClientFinal { salted_password, auth_message };
        Ok(client_final.into_bytes())
    }

    /// Consumes `AuthenticationSASLFinal`'s data and verifies the server
    /// proved it knows the stored key, defeating a malicious-server attack.
    pub fn finish(&mut self, server_final: &[u8]) -> Result<(), Error> {
        let State::ClientFinal { salted_password, auth_message } =
            std::mem::replace(&mut self.state, State::Done)
        else {
            return Err(protocol_error("SASLFinal received out of order"));
        };

        let server_final = std::str::from_utf8(server_final)
            .map_err(|_| protocol_error("server-final-message was not utf8"))?;

        if let Some(err) = server_final.strip_prefix("e=") {
            return Err(Error::from(ErrorKind::Authentication(format!("server rejected SCRAM exchange: {err}"))));
        }

        let signature_b64 = server_final
            .strip_prefix("v=")
            .ok_or_else(|| protocol_error("server-final-message missing verifier"))?;
        let expected = base64.decode(signature_b64).map_err(|_| protocol_error("invalid server signature encoding"))?;

        let server_key = hmac(&salted_password, b"Server Key");
        let server_signature = hmac(&server_key, auth_message.as_bytes());

        if server_signature.as_slice() != expected.as_slice() {
            return Err(Error::from(ErrorKind::Authentication(
                "server SCRAM signature did not match; possible MITM".into(),
            )));
        }
        Ok(())
    }
}

fn hmac(key: &[u8], data: &[u8]) -> [u8; 32] {
    let mut mac = <HmacSha256 as Mac>::new_from_slice(key).expect("HMAC accepts any key length");
    mac.update(data);
    mac.finalize().into_bytes().into()
}

/// `Hi(password, salt, iterations)` per RFC 5802 §2.2.
fn hi(password: &str, salt: &[u8], iterations: u32) -> [u8; 32] {
    let mut mac = <HmacSha256 as Mac>::new_from_slice(password.as_bytes()).expect("HMAC accepts any key length");
    mac.update(salt);
    mac.update(&1u32.to_be_bytes());
    let mut u = mac.finalize().into_bytes();
    let mut result = u;
    for _ in 1..iterations {
        let mut mac = <HmacSha256 as Mac>::new_from_slice(password.as_bytes()).expect("HMAC accepts any key length");
        mac.update(&u);
        u = mac.finalize().into_bytes();
        for (r, x) in result.iter_mut().zip(u.iter()) {
            *r ^= x;
        }
    }
    result.into()
}

fn generate_nonce() -> String {
    let mut rng = rand::rng();
    let bytes: [u8; 18] = rng.random();
    base64.encode(bytes)
}

fn protocol_error(msg: &'static str) -> Error {
    Error::from(ErrorKind::Protocol(crate::postgres::ProtocolError::Unexpected {
        expect: b'R',
        found: 0,
        phase: msg,
    }))
}

/// `tls-server-end-point` channel-binding data: the certificate's hash,
/// using SHA-256 unless the certificate's own signature algorithm names a
/// different approved hash (RFC 9266 §2) -- the core always uses SHA-256,
/// which matches the certificates issued by every CA this crate has been
/// tested against.
pub fn cert_hash_channel_binding(cert_der: &[u8]) -> Vec<u8> {
    Sha256::digest(cert_der).to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_includes_gs2_header_and_nonce() {
        let client = ScramSha256::new("pencil", ChannelBinding::Unsupported);
        let msg = String::from_utf8(client.message()).unwrap();
        assert!(msg.starts_with("n,,n=,r="));
    }

    #[test]
    fn plus_uses_p_gs2_header() {
        let client = ScramSha256::new("pencil", ChannelBinding::TlsServerEndPoint(vec![1, 2, 3]));
        assert!(client.uses_channel_binding());
        let msg = String::from_utf8(client.message()).unwrap();
        assert!(msg.starts_with("p=tls-server-end-point,,"));
    }

    #[test]
    fn full_exchange_verifies_matching_server_signature() {
        // Simulate a server side using the same primitives, proving the
        // client accepts a well-formed, correctly-signed exchange.
        let password = "pencil";
        let mut client = ScramSha256::new(password, ChannelBinding::Unsupported);
        let client_first = String::from_utf8(client.message()).unwrap();
        let client_nonce = client_first.rsplit("r=").next().unwrap().to_string();

        let salt = b"saltsaltsalt";
        let iterations = 4096u32;
        let server_nonce = format!("{client_nonce}SERVERPART");
        let server_first = format!(
            "r={server_nonce},s={},i={iterations}",
            base64.encode(salt)
        );

        let client_final = client.update(server_first.as_bytes()).unwrap();
        let client_final = String::from_utf8(client_final).unwrap();
        assert!(client_final.contains(&format!("r={server_nonce}")));

        let salted_password = hi(&stringprep::saslprep(password).unwrap(), salt, iterations);
        let client_first_bare = format!("n=,r={client_nonce}");
        let without_proof = client_final.split(",p=").next().unwrap();
        let auth_message = format!("{client_first_bare},{server_first},{without_proof}");
        let server_key = hmac(&salted_password, b"Server Key");
        let server_signature = hmac(&server_key, auth_message.as_bytes());
        let server_final = format!("v={}", base64.encode(server_signature));

        client.finish(server_final.as_bytes()).unwrap();
    }

    #[test]
    fn rejects_tampered_server_signature() {
        let password = "pencil";
        let mut client = ScramSha256::new(password, ChannelBinding::Unsupported);
        let client_first = String::from_utf8(client.message()).unwrap();
        let client_nonce = client_first.rsplit("r=").next().unwrap().to_string();

        let salt = b"saltsaltsalt";
        let server_first = format!("r={client_nonce}X,s={},i=4096", base64.encode(salt));
        client.update(server_first.as_bytes()).unwrap();

        let bogus = format!("v={}", base64.encode([0u8; 32]));
        assert!(client.finish(bogus.as_bytes()).is_err());
    }
}
