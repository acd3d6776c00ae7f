//! Small shared building blocks used across the crate.
mod bytestr;
mod url;

pub use bytestr::ByteStr;
pub use url::{ParseError, Url};
