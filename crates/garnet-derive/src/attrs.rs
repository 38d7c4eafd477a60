// #[garnet(...)] field attribute parsing

use syn::{Field, LitStr, Result};

/// How a record field takes part in decoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldMode {
    /// Read from `key` in the source
    Value { key: String },
    /// Embedded record decoded from the same source
    Squash,
    /// Receives the names of the decoded fields
    DecodedFields,
    /// Left alone
    Skip,
}

/// Name a field is reported under: its identifier without a raw prefix.
pub fn field_name(field: &Field) -> Option<String> {
    field
        .ident
        .as_ref()
        .map(|ident| ident.to_string().trim_start_matches("r#").to_string())
}

/// Parse the `#[garnet(...)]` attributes of a named field.
pub fn parse_field(field: &Field) -> Result<FieldMode> {
    let Some(name) = field_name(field) else {
        return Err(syn::Error::new_spanned(field, "Decode fields must be named"));
    };

    let mut rename: Option<String> = None;
    let mut squash = false;
    let mut decoded_fields = false;
    let mut skip = false;

    for attr in field.attrs.iter().filter(|a| a.path().is_ident("garnet")) {
        attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("rename") {
                let lit: LitStr = meta.value()?.parse()?;
                if lit.value().is_empty() {
                    return Err(meta.error("rename must not be empty"));
                }
                rename = Some(lit.value());
            } else if meta.path.is_ident("squash") {
                squash = true;
            } else if meta.path.is_ident("decoded_fields") {
                decoded_fields = true;
            } else if meta.path.is_ident("skip") {
                skip = true;
            } else {
                return Err(meta.error("unknown garnet attribute, expected rename, squash, decoded_fields or skip"));
            }
            Ok(())
        })?;
    }

    let modes = [rename.is_some(), squash, decoded_fields, skip]
        .iter()
        .filter(|set| **set)
        .count();
    if modes > 1 {
        return Err(syn::Error::new_spanned(
            field,
            "rename, squash, decoded_fields and skip are mutually exclusive",
        ));
    }

    Ok(if squash {
        FieldMode::Squash
    } else if decoded_fields {
        FieldMode::DecodedFields
    } else if skip {
        FieldMode::Skip
    } else {
        FieldMode::Value {
            key: rename.unwrap_or_else(|| name.to_lowercase()),
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use syn::{parse_quote, FieldsNamed};

    fn fields(tokens: FieldsNamed) -> Vec<Field> {
        tokens.named.into_iter().collect()
    }

    #[test]
    fn test_default_key_is_lowercase() {
        let f = fields(parse_quote!({ Foo: String, r#type: String }));
        assert_eq!(parse_field(&f[0]).unwrap(), FieldMode::Value { key: "foo".into() });
        assert_eq!(parse_field(&f[1]).unwrap(), FieldMode::Value { key: "type".into() });
        assert_eq!(field_name(&f[1]).as_deref(), Some("type"));
    }

    #[test]
    fn test_modes() {
        let f = fields(parse_quote!({
            #[garnet(rename = "read_field")]
            a: String,
            #[garnet(squash)]
            b: Inner,
            #[garnet(decoded_fields)]
            c: Vec<String>,
            #[garnet(skip)]
            d: u8,
        }));
        assert_eq!(parse_field(&f[0]).unwrap(), FieldMode::Value { key: "read_field".into() });
        assert_eq!(parse_field(&f[1]).unwrap(), FieldMode::Squash);
        assert_eq!(parse_field(&f[2]).unwrap(), FieldMode::DecodedFields);
        assert_eq!(parse_field(&f[3]).unwrap(), FieldMode::Skip);
    }

    #[test]
    fn test_rejects_bad_attributes() {
        let f = fields(parse_quote!({
            #[garnet(squash, skip)]
            a: Inner,
            #[garnet(nope)]
            b: u8,
            #[garnet(rename = "")]
            c: u8,
        }));
        assert!(parse_field(&f[0]).is_err());
        assert!(parse_field(&f[1]).is_err());
        assert!(parse_field(&f[2]).is_err());
    }
}
