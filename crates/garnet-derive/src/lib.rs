// garnet-derive: derive macros for the garnet embedding bridge
//
// #[derive(Decode)] makes a struct with named fields a decode destination
// for guest hashes and objects.
//
// Example:
// ```
// use garnet::Decode;
//
// #[derive(Default, Decode)]
// struct Server {
//     host: String,
//     #[garnet(rename = "listen_port")]
//     port: u16,
//     #[garnet(squash)]
//     tls: TlsOptions,
//     #[garnet(decoded_fields)]
//     set: Vec<String>,
// }
// ```

use proc_macro::TokenStream;
use syn::{parse_macro_input, DeriveInput};

mod attrs;
mod record;

/// Derives `garnet::decode::Decode` and `garnet::decode::DecodeRecord`.
///
/// Field attributes, under `#[garnet(...)]`:
///
/// - `rename = "key"`: hash key or method name to read (default: the field
///   name, lower-cased)
/// - `squash`: the field is a record whose fields are read from the same
///   source as this one's
/// - `decoded_fields`: a `Vec<String>` set to the sorted names of the
///   fields that were decoded
/// - `skip`: never touched by decoding
#[proc_macro_derive(Decode, attributes(garnet))]
pub fn derive_decode(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    record::expand_decode(input)
        .unwrap_or_else(|e| e.to_compile_error())
        .into()
}
