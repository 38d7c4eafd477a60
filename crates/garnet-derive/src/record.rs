// #[derive(Decode)] implementation
//
// Generates two impls for a struct with named fields:
// - `Decode`, whose decode_value hands the struct to `decode_record`
// - `DecodeRecord`, which reads each field from the record source
//
// Example expansion:
// ```ignore
// // Input:
// #[derive(Decode)]
// struct Foo {
//     #[garnet(rename = "name")]
//     title: String,
//     #[garnet(decoded_fields)]
//     set: Vec<String>,
// }
//
// // Output (paths shortened):
// impl Decode for Foo {
//     fn kind() -> Kind { Kind::Struct }
//     fn decode_value<'h>(&mut self, d, path, value) -> Result<(), DecodeError> {
//         decode_record(self, d, path, value)
//     }
// }
//
// impl DecodeRecord for Foo {
//     fn decode_fields<'h>(&mut self, d, path, record, decoded) -> Result<(), DecodeError> {
//         if record.field(d, path, "name", &mut self.title)? {
//             decoded.push(String::from("title"));
//         }
//         Ok(())
//     }
//     fn set_decoded_fields(&mut self, names: &[String]) {
//         self.set = names.to_vec();
//     }
// }
// ```

use proc_macro2::TokenStream;
use quote::quote;
use syn::{Data, DeriveInput, Fields, Result};

use crate::attrs::{field_name, parse_field, FieldMode};

/// Expands #[derive(Decode)].
pub fn expand_decode(input: DeriveInput) -> Result<TokenStream> {
    let name = &input.ident;
    let (impl_generics, ty_generics, where_clause) = input.generics.split_for_impl();

    let fields = match &input.data {
        Data::Struct(data) => match &data.fields {
            Fields::Named(named) => &named.named,
            _ => {
                return Err(syn::Error::new_spanned(
                    &input,
                    "Decode can only be derived for structs with named fields",
                ))
            }
        },
        _ => {
            return Err(syn::Error::new_spanned(
                &input,
                "Decode can only be derived for structs",
            ))
        }
    };

    let mut decode_stmts = Vec::new();
    let mut sink_stmts = Vec::new();

    for field in fields {
        let ident = &field.ident;
        let reported = field_name(field).unwrap_or_default();
        match parse_field(field)? {
            FieldMode::Value { key } => decode_stmts.push(quote! {
                if record.field(d, path, #key, &mut self.#ident)? {
                    decoded.push(::std::string::String::from(#reported));
                }
            }),
            FieldMode::Squash => {
                decode_stmts.push(quote! {
                    ::garnet::decode::DecodeRecord::decode_fields(&mut self.#ident, d, path, record, decoded)?;
                });
                sink_stmts.push(quote! {
                    ::garnet::decode::DecodeRecord::set_decoded_fields(&mut self.#ident, names);
                });
            }
            FieldMode::DecodedFields => sink_stmts.push(quote! {
                self.#ident = names.to_vec();
            }),
            FieldMode::Skip => {}
        }
    }

    Ok(quote! {
        impl #impl_generics ::garnet::decode::Decode for #name #ty_generics #where_clause {
            fn kind() -> ::garnet::decode::Kind {
                ::garnet::decode::Kind::Struct
            }

            fn decode_value<'__h>(
                &mut self,
                d: &mut ::garnet::decode::Decoder,
                path: &str,
                value: ::garnet::Value<'__h>,
            ) -> ::core::result::Result<(), ::garnet::DecodeError> {
                ::garnet::decode::decode_record(self, d, path, value)
            }
        }

        impl #impl_generics ::garnet::decode::DecodeRecord for #name #ty_generics #where_clause {
            #[allow(unused_variables)]
            fn decode_fields<'__h>(
                &mut self,
                d: &mut ::garnet::decode::Decoder,
                path: &str,
                record: &::garnet::decode::Record<'__h>,
                decoded: &mut ::std::vec::Vec<::std::string::String>,
            ) -> ::core::result::Result<(), ::garnet::DecodeError> {
                #(#decode_stmts)*
                ::core::result::Result::Ok(())
            }

            #[allow(unused_variables)]
            fn set_decoded_fields(&mut self, names: &[::std::string::String]) {
                #(#sink_stmts)*
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use syn::parse_quote;

    #[test]
    fn test_expands_fields() {
        let input: DeriveInput = parse_quote! {
            struct Foo {
                #[garnet(rename = "read_field")]
                field: String,
                #[garnet(decoded_fields)]
                set: Vec<String>,
            }
        };
        let out = expand_decode(input).unwrap().to_string();
        assert!(out.contains("\"read_field\""));
        assert!(out.contains("String :: from (\"field\")"));
        assert!(out.contains("self . set = names . to_vec ()"));
    }

    #[test]
    fn test_rejects_non_structs() {
        let tuple: DeriveInput = parse_quote! { struct Foo(String); };
        assert!(expand_decode(tuple).is_err());
        let e: DeriveInput = parse_quote! { enum Foo { A } };
        assert!(expand_decode(e).is_err());
    }
}
