//! Authentication mechanisms driven from [`crate::startup`].
pub mod scram;

mod md5;

pub use md5::hash_password as md5_hash_password;

/// Injectable GSSAPI/SSPI authentication provider.
///
/// This crate carries no concrete Kerberos implementation (a documented
/// Non-goal); absence of a configured provider surfaces
/// [`crate::error::ErrorKind::UnsupportedAuth`] rather than hanging.
pub trait GssProvider: Send + Sync {
    /// Produces the initial GSS security-context token to send as the first
    /// `PasswordMessage`-framed response after an `AuthenticationGSS`
    /// request.
    fn init_security_context(&mut self, target: &str) -> Result<Vec<u8>, String>;

    /// Feeds a server `AuthenticationGSSContinue` token, returning the next
    /// client token, or `None` once the context is fully established.
    fn continue_security_context(&mut self, server_token: &[u8]) -> Result<Option<Vec<u8>>, String>;
}
