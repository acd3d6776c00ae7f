use proc_macro::TokenStream;
use syn::DeriveInput;

mod from_row;

macro_rules! error {
    ($msg:literal) => {
        return Err(syn::Error::new(proc_macro2::Span::call_site(), $msg))
    };
}
pub(crate) use error;

/// Derives [`FromRow`](::pgflow::FromRow) for a struct.
///
/// Named-field structs decode by matching each field name against the
/// row's column names; tuple structs decode positionally.
#[proc_macro_derive(FromRow)]
pub fn from_row(input: TokenStream) -> TokenStream {
    match from_row::from_row(syn::parse_macro_input!(input as DeriveInput)) {
        Ok(ok) => ok,
        Err(err) => err.into_compile_error().into(),
    }
}
