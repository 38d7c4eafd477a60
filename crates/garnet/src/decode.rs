//! Decoding guest values into Rust data
//!
//! A destination type describes its own shape through [`Decode`]: scalars,
//! pointers (`Option<T>`, `Box<T>`), slices (`Vec<T>`), string-keyed maps,
//! records (`#[derive(Decode)]`) and the untyped [`Dynamic`]. Decoding walks
//! the guest value and the destination together, building a path to the
//! field being decoded so errors can be located:
//!
//! ```text
//! root.servers[2].ports.<entry 0>
//! ```
//!
//! Records read their fields from a guest `Hash` by string key, or from any
//! other guest object by calling the method of the same name. Each field is
//! read inside its own arena checkpoint, and the whole record inside
//! another, so reading a large record does not pile up guest garbage.
//!
//! # Record attributes
//!
//! - `#[garnet(rename = "key")]` reads the field from `key` instead of the
//!   lower-cased field name.
//! - `#[garnet(squash)]` merges an embedded record's fields into the
//!   containing record's decode pass.
//! - `#[garnet(decoded_fields)]` marks a `Vec<String>` that receives the
//!   sorted names of the fields that were set from the source.
//! - `#[garnet(skip)]` leaves a field alone.
//!
//! Hash keys that are absent, and methods the object does not respond to,
//! leave the field untouched.

use crate::error::{DecodeError, Error, Result};
use crate::hash::Hash;
use crate::value::{Value, ValueType};
use std::borrow::Cow;
use std::collections::{BTreeMap, HashMap};
use std::hash::BuildHasher;

/// Path of the value passed to [`decode`].
pub const ROOT: &str = "root";

/// Nesting limit. Self-referencing guest structures stop here.
pub const MAX_DEPTH: usize = 64;

/// Shape of a decode destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Kind {
    Bool,
    Int,
    Float,
    String,
    Pointer,
    Slice,
    Map,
    Struct,
    Dynamic,
}

/// A type guest values can be decoded into, in place.
pub trait Decode {
    /// The destination shape.
    fn kind() -> Kind
    where
        Self: Sized;

    /// Decode `value` into `self`. `path` names the value for errors.
    /// Nested values go through [`Decoder::decode`].
    fn decode_value<'h>(&mut self, d: &mut Decoder, path: &str, value: Value<'h>) -> std::result::Result<(), DecodeError>;
}

/// Decode state carried through one [`decode`] call.
#[derive(Debug, Default)]
pub struct Decoder {
    depth: usize,
}

impl Decoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode a nested value.
    pub fn decode<T: Decode + ?Sized>(
        &mut self,
        out: &mut T,
        path: &str,
        value: Value<'_>,
    ) -> std::result::Result<(), DecodeError> {
        if self.depth >= MAX_DEPTH {
            return Err(DecodeError::MaxDepthExceeded { path: path.to_string() });
        }
        self.depth += 1;
        let result = out.decode_value(self, path, value);
        self.depth -= 1;
        result
    }
}

/// Decode `value` into `out`.
pub fn decode<T: Decode + ?Sized>(out: &mut T, value: Value<'_>) -> Result<()> {
    Decoder::new().decode(out, ROOT, value).map_err(Error::from)
}

// ============================================================================
// Scalars
// ============================================================================

impl Decode for bool {
    fn kind() -> Kind {
        Kind::Bool
    }

    fn decode_value<'h>(&mut self, _d: &mut Decoder, path: &str, value: Value<'h>) -> std::result::Result<(), DecodeError> {
        *self = match value.value_type() {
            ValueType::True => true,
            ValueType::False => false,
            found => return Err(DecodeError::unknown(path, found)),
        };
        Ok(())
    }
}

/// Integer from a guest integer, or from a guest string parsed with
/// `0x`, `0o`, `0b` and leading-`0` base prefixes.
fn decode_int(path: &str, value: Value<'_>) -> std::result::Result<i64, DecodeError> {
    match value.value_type() {
        ValueType::Fixnum => value.to_host::<i64>().map_err(|_| DecodeError::unknown(path, ValueType::Fixnum)),
        ValueType::String => {
            let text = string_contents(path, value)?;
            parse_int(&text).map_err(|source| DecodeError::ParseInt {
                path: path.to_string(),
                source,
            })
        }
        found => Err(DecodeError::unknown(path, found)),
    }
}

fn parse_int(text: &str) -> std::result::Result<i64, std::num::ParseIntError> {
    let (negative, body) = match text.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, text.strip_prefix('+').unwrap_or(text)),
    };
    let (radix, digits) = match body.get(..2) {
        Some("0x" | "0X") => (16, &body[2..]),
        Some("0o" | "0O") => (8, &body[2..]),
        Some("0b" | "0B") => (2, &body[2..]),
        _ if body.len() > 1 && body.starts_with('0') => (8, &body[1..]),
        _ => (10, body),
    };
    // A second sign after the prefix is malformed; let the plain parse of the
    // whole text report it.
    if digits.starts_with(['+', '-']) {
        return text.parse::<i64>();
    }
    // Misplaced separators are left in so the parse reports them.
    let digits = strip_separators(digits, radix != 10).unwrap_or(Cow::Borrowed(digits));
    if negative {
        i64::from_str_radix(&format!("-{}", digits), radix)
    } else {
        i64::from_str_radix(&digits, radix)
    }
}

/// Drop `_` digit separators. Each must sit between two digits, or directly
/// after a base prefix.
fn strip_separators(digits: &str, prefixed: bool) -> Option<Cow<'_, str>> {
    if !digits.contains('_') {
        return Some(Cow::Borrowed(digits));
    }
    let mut after_digit = prefixed;
    for c in digits.chars() {
        if c == '_' {
            if !after_digit {
                return None;
            }
            after_digit = false;
        } else {
            after_digit = true;
        }
    }
    after_digit.then(|| Cow::Owned(digits.replace('_', "")))
}

macro_rules! decode_int_impl {
    ($($ty:ty),*) => {
        $(
            impl Decode for $ty {
                fn kind() -> Kind {
                    Kind::Int
                }

                fn decode_value<'h>(
                    &mut self,
                    _d: &mut Decoder,
                    path: &str,
                    value: Value<'h>,
                ) -> std::result::Result<(), DecodeError> {
                    let n = decode_int(path, value)?;
                    *self = <$ty>::try_from(n).map_err(|_| DecodeError::IntOutOfRange {
                        path: path.to_string(),
                        value: n,
                    })?;
                    Ok(())
                }
            }
        )*
    };
}

decode_int_impl!(i8, i16, i32, i64, isize, u8, u16, u32, u64, usize);

impl Decode for f64 {
    fn kind() -> Kind {
        Kind::Float
    }

    fn decode_value<'h>(&mut self, _d: &mut Decoder, path: &str, value: Value<'h>) -> std::result::Result<(), DecodeError> {
        match value.raw() {
            garnet_vm::MrbValue::Float(f) => {
                *self = f;
                Ok(())
            }
            _ => Err(DecodeError::unknown(path, value.value_type())),
        }
    }
}

impl Decode for f32 {
    fn kind() -> Kind {
        Kind::Float
    }

    fn decode_value<'h>(&mut self, d: &mut Decoder, path: &str, value: Value<'h>) -> std::result::Result<(), DecodeError> {
        let mut wide = 0.0_f64;
        wide.decode_value(d, path, value)?;
        *self = wide as f32;
        Ok(())
    }
}

fn string_contents(path: &str, value: Value<'_>) -> std::result::Result<String, DecodeError> {
    value.handle().mrb().string_value(value.raw()).map(str::to_string).ok_or_else(|| DecodeError::unknown(path, value.value_type()))
}

/// Strings decode from guest strings and from guest integers in decimal.
impl Decode for String {
    fn kind() -> Kind {
        Kind::String
    }

    fn decode_value<'h>(&mut self, _d: &mut Decoder, path: &str, value: Value<'h>) -> std::result::Result<(), DecodeError> {
        *self = match value.raw() {
            garnet_vm::MrbValue::Fixnum(n) => n.to_string(),
            _ if value.value_type() == ValueType::String => string_contents(path, value)?,
            _ => return Err(DecodeError::unknown(path, value.value_type())),
        };
        Ok(())
    }
}

// ============================================================================
// Pointers
// ============================================================================

/// Decodes a fresh `T` and stores `Some` of it. `nil` is not special: it
/// decodes like any other value into `T`.
impl<T: Decode + Default> Decode for Option<T> {
    fn kind() -> Kind {
        Kind::Pointer
    }

    fn decode_value<'h>(&mut self, d: &mut Decoder, path: &str, value: Value<'h>) -> std::result::Result<(), DecodeError> {
        let mut inner = T::default();
        d.decode(&mut inner, path, value)?;
        *self = Some(inner);
        Ok(())
    }
}

impl<T: Decode + Default> Decode for Box<T> {
    fn kind() -> Kind {
        Kind::Pointer
    }

    fn decode_value<'h>(&mut self, d: &mut Decoder, path: &str, value: Value<'h>) -> std::result::Result<(), DecodeError> {
        let mut inner = T::default();
        d.decode(&mut inner, path, value)?;
        *self = Box::new(inner);
        Ok(())
    }
}

// ============================================================================
// Slices and maps
// ============================================================================

/// Appends each element of a guest array.
impl<T: Decode + Default> Decode for Vec<T> {
    fn kind() -> Kind {
        Kind::Slice
    }

    fn decode_value<'h>(&mut self, d: &mut Decoder, path: &str, value: Value<'h>) -> std::result::Result<(), DecodeError> {
        if value.value_type() != ValueType::Array {
            return Err(DecodeError::unknown(path, value.value_type()));
        }
        let handle = value.handle();
        let len = handle.mrb().ary_len(value.raw());
        self.reserve(len);
        for i in 0..len {
            let elem = Value::new(handle, handle.mrb().ary_entry(value.raw(), i));
            let mut item = T::default();
            d.decode(&mut item, &format!("{}[{}]", path, i), elem)?;
            self.push(item);
        }
        Ok(())
    }
}

/// Walk a guest hash in its own order, decoding each key and value at
/// `path.<entry i>` and handing them to `insert`.
fn decode_entries<'h, K, V>(
    d: &mut Decoder,
    path: &str,
    value: Value<'h>,
    mut insert: impl FnMut(K, V),
) -> std::result::Result<(), DecodeError>
where
    K: Decode + Default,
    V: Decode + Default,
{
    if value.value_type() != ValueType::Hash {
        return Err(DecodeError::unknown(path, value.value_type()));
    }
    if K::kind() != Kind::String {
        return Err(DecodeError::NonStringKeys { path: path.to_string() });
    }

    let handle = value.handle();
    let _arena = handle.arena();
    let hash = Hash::wrap(value);
    for (i, rb_key) in hash.keys().into_iter().enumerate() {
        let entry = format!("{}.<entry {}>", path, i);
        let rb_value = Value::new(handle, handle.mrb().hash_get(value.raw(), rb_key.raw()));

        let mut key = K::default();
        d.decode(&mut key, &entry, rb_key)?;
        let mut val = V::default();
        d.decode(&mut val, &entry, rb_value)?;
        insert(key, val);
    }
    Ok(())
}

impl<K, V, S> Decode for HashMap<K, V, S>
where
    K: Decode + Default + Eq + std::hash::Hash,
    V: Decode + Default,
    S: BuildHasher + Default,
{
    fn kind() -> Kind {
        Kind::Map
    }

    fn decode_value<'h>(&mut self, d: &mut Decoder, path: &str, value: Value<'h>) -> std::result::Result<(), DecodeError> {
        decode_entries(d, path, value, |k, v| {
            self.insert(k, v);
        })
    }
}

impl<K, V> Decode for BTreeMap<K, V>
where
    K: Decode + Default + Ord,
    V: Decode + Default,
{
    fn kind() -> Kind {
        Kind::Map
    }

    fn decode_value<'h>(&mut self, d: &mut Decoder, path: &str, value: Value<'h>) -> std::result::Result<(), DecodeError> {
        decode_entries(d, path, value, |k, v| {
            self.insert(k, v);
        })
    }
}

// ============================================================================
// Dynamic
// ============================================================================

/// Holds whatever shape the guest value has. `Nil` is only the unset
/// default; decoding guest `nil` is an error like any other unsupported
/// type.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Dynamic {
    #[default]
    Nil,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Array(Vec<Dynamic>),
    Map(HashMap<String, Dynamic>),
}

impl Decode for Dynamic {
    fn kind() -> Kind {
        Kind::Dynamic
    }

    // Picks the concrete shape from the guest type, then decodes into it at
    // the same path and depth.
    fn decode_value<'h>(&mut self, d: &mut Decoder, path: &str, value: Value<'h>) -> std::result::Result<(), DecodeError> {
        *self = match value.value_type() {
            ValueType::Hash => {
                let mut map = HashMap::new();
                map.decode_value(d, path, value)?;
                Dynamic::Map(map)
            }
            ValueType::Array => {
                let mut items = Vec::new();
                items.decode_value(d, path, value)?;
                Dynamic::Array(items)
            }
            ValueType::True | ValueType::False => {
                let mut b = false;
                b.decode_value(d, path, value)?;
                Dynamic::Bool(b)
            }
            ValueType::Fixnum => {
                let mut n = 0_i64;
                n.decode_value(d, path, value)?;
                Dynamic::Int(n)
            }
            ValueType::Float => {
                let mut f = 0.0_f64;
                f.decode_value(d, path, value)?;
                Dynamic::Float(f)
            }
            ValueType::String => {
                let mut s = String::new();
                s.decode_value(d, path, value)?;
                Dynamic::String(s)
            }
            found => return Err(DecodeError::unknown(path, found)),
        };
        Ok(())
    }
}

// ============================================================================
// Records
// ============================================================================

/// Field access for records. Implemented by `#[derive(Decode)]`.
pub trait DecodeRecord {
    /// Decode every field present in `record`, pushing the name of each one
    /// that was set onto `decoded`. Squashed records decode into the same
    /// pass.
    fn decode_fields<'h>(
        &mut self,
        d: &mut Decoder,
        path: &str,
        record: &Record<'h>,
        decoded: &mut Vec<String>,
    ) -> std::result::Result<(), DecodeError>;

    /// Fill the `decoded_fields` sinks, including those of squashed records.
    fn set_decoded_fields(&mut self, names: &[String]);
}

enum Source<'h> {
    Hash(Hash<'h>),
    Object(Value<'h>),
}

/// Where a record's fields come from.
pub struct Record<'h> {
    source: Source<'h>,
}

impl<'h> Record<'h> {
    /// Decode field `key` into `out`. Returns whether the source had it.
    pub fn field<T: Decode + ?Sized>(
        &self,
        d: &mut Decoder,
        path: &str,
        key: &str,
        out: &mut T,
    ) -> std::result::Result<bool, DecodeError> {
        let field_path = format!("{}.{}", path, key);
        let handle = match &self.source {
            Source::Hash(h) => h.handle(),
            Source::Object(v) => v.handle(),
        };
        let _arena = handle.arena();

        let value = match &self.source {
            Source::Hash(h) => match h.get(handle.to_guest(key)) {
                Some(v) => v,
                None => return Ok(false),
            },
            Source::Object(obj) => {
                if !obj.respond_to(key) {
                    return Ok(false);
                }
                obj.call(key, &[]).map_err(|err| call_error(&field_path, err))?
            }
        };
        d.decode(out, &field_path, value)?;
        Ok(true)
    }
}

fn call_error(path: &str, err: Error) -> DecodeError {
    match err {
        Error::Exception(source) => DecodeError::Exception {
            path: path.to_string(),
            source,
        },
        Error::Decode(e) => e,
        other => DecodeError::unknown(path, other),
    }
}

/// Decode a record from a guest hash or object. Called by derived
/// [`Decode`] impls.
pub fn decode_record<'h, T: DecodeRecord + ?Sized>(
    out: &mut T,
    d: &mut Decoder,
    path: &str,
    value: Value<'h>,
) -> std::result::Result<(), DecodeError> {
    let _arena = value.handle().arena();
    let record = match value.value_type() {
        ValueType::Hash => Record {
            source: Source::Hash(Hash::wrap(value)),
        },
        ValueType::Object => Record {
            source: Source::Object(value),
        },
        found => return Err(DecodeError::unknown(path, found)),
    };

    let mut decoded = Vec::new();
    out.decode_fields(d, path, &record, &mut decoded)?;
    decoded.sort();
    out.set_decoded_fields(&decoded);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Garnet;

    #[test]
    fn test_parse_int_prefixes() {
        assert_eq!(parse_int("32"), Ok(32));
        assert_eq!(parse_int("-32"), Ok(-32));
        assert_eq!(parse_int("+7"), Ok(7));
        assert_eq!(parse_int("0x1f"), Ok(31));
        assert_eq!(parse_int("0o17"), Ok(15));
        assert_eq!(parse_int("017"), Ok(15));
        assert_eq!(parse_int("0b101"), Ok(5));
        assert_eq!(parse_int("-0x10"), Ok(-16));
        assert_eq!(parse_int("0"), Ok(0));
        assert!(parse_int("0x-5").is_err());
        assert_eq!(parse_int("1_000"), Ok(1000));
        assert_eq!(parse_int("-1_000_000"), Ok(-1_000_000));
        assert_eq!(parse_int("0x_ff"), Ok(255));
        assert_eq!(parse_int("0_7"), Ok(7));
        assert!(parse_int("_1").is_err());
        assert!(parse_int("1__0").is_err());
        assert!(parse_int("1_").is_err());
        assert!(parse_int("abc").is_err());
        assert!(parse_int("").is_err());
    }

    #[test]
    fn test_scalar_errors_carry_path() {
        let grb = Garnet::open().expect("open");
        let mut b = false;
        let err = decode(&mut b, grb.to_guest(1_i64)).unwrap_err();
        assert_eq!(err.to_string(), "unknown type: name=root type=Fixnum");

        let mut n = 0_i64;
        let err = decode(&mut n, grb.to_guest("nope")).unwrap_err();
        assert!(matches!(err, Error::Decode(DecodeError::ParseInt { .. })), "{}", err);

        let mut small = 0_u8;
        let err = decode(&mut small, grb.to_guest(300_i64)).unwrap_err();
        assert!(matches!(err, Error::Decode(DecodeError::IntOutOfRange { value: 300, .. })));
    }

    #[test]
    fn test_float_needs_float() {
        let grb = Garnet::open().expect("open");
        let mut f = 0.0_f64;
        decode(&mut f, grb.to_guest(2.5_f64)).expect("float");
        assert_eq!(f, 2.5);
        assert!(decode(&mut f, grb.to_guest(2_i64)).is_err());
    }

    #[test]
    fn test_non_string_keys() {
        let grb = Garnet::open().expect("open");
        let v = grb.load_string("{ 1 => 2 }").expect("load");
        let mut out: HashMap<i64, i64> = HashMap::new();
        match decode(&mut out, v).unwrap_err() {
            Error::Decode(DecodeError::NonStringKeys { path }) => assert_eq!(path, "root"),
            other => panic!("unexpected: {}", other),
        }
    }

    #[test]
    fn test_depth_is_capped() {
        let grb = Garnet::open().expect("open");
        let v = grb.load_string("a = []\na << a\na").expect("load");
        let mut out = Dynamic::Nil;
        let err = decode(&mut out, v).unwrap_err();
        assert!(matches!(err, Error::Decode(DecodeError::MaxDepthExceeded { .. })), "{}", err);
    }

    #[test]
    fn test_dynamic_nil_is_unknown() {
        let grb = Garnet::open().expect("open");
        let mut out = Dynamic::Nil;
        assert!(decode(&mut out, grb.nil_value()).is_err());
        assert_eq!(out, Dynamic::Nil);
    }
}
