//! Conversions between host types and guest values
//!
//! [`FromValue`] reads a guest value as a host type and fails with
//! [`Error::TypeMismatch`] when the guest type tag does not match. The only
//! permitted coercion is an integer read as a float. Reading a `String` goes
//! through the guest's `to_s`, so any object converts, and an exception
//! raised by `to_s` comes back as [`Error::Exception`].
//!
//! [`IntoValue`] builds guest values. It cannot fail for the supported types.

use crate::array::Array;
use crate::error::{Error, Result};
use crate::handle::Handle;
use crate::hash::Hash;
use crate::value::Value;
use garnet_vm::{MrbVType, MrbValue};

/// Read a guest value as a host type.
pub trait FromValue<'h>: Sized {
    fn from_value(value: Value<'h>) -> Result<Self>;
}

/// Build a guest value from a host value.
pub trait IntoValue<'h> {
    fn into_value(self, handle: &'h Handle) -> Value<'h>;
}

fn mismatch<T>(expected: &'static str, value: &Value<'_>) -> Result<T> {
    Err(Error::TypeMismatch {
        expected,
        found: value.value_type(),
    })
}

// ============================================================================
// Guest -> host
// ============================================================================

impl<'h> FromValue<'h> for Value<'h> {
    fn from_value(value: Value<'h>) -> Result<Self> {
        Ok(value)
    }
}

impl<'h> FromValue<'h> for bool {
    fn from_value(value: Value<'h>) -> Result<Self> {
        match value.raw() {
            MrbValue::True => Ok(true),
            MrbValue::False => Ok(false),
            _ => mismatch("bool", &value),
        }
    }
}

impl<'h> FromValue<'h> for String {
    fn from_value(value: Value<'h>) -> Result<Self> {
        let handle = value.handle();
        let raw = handle.mrb().obj_as_string(value.raw());
        handle.check_exception()?;
        match handle.mrb().string_value(raw) {
            Some(s) => Ok(s.to_string()),
            None => mismatch("String", &value),
        }
    }
}

impl<'h> FromValue<'h> for i64 {
    fn from_value(value: Value<'h>) -> Result<Self> {
        match value.raw() {
            MrbValue::Fixnum(n) => Ok(n),
            _ => mismatch("Integer", &value),
        }
    }
}

macro_rules! from_value_narrow_int {
    ($($ty:ty),*) => {
        $(
            impl<'h> FromValue<'h> for $ty {
                fn from_value(value: Value<'h>) -> Result<Self> {
                    let n = i64::from_value(value)?;
                    <$ty>::try_from(n).map_err(|_| Error::IntegerOutOfRange(n))
                }
            }
        )*
    };
}

from_value_narrow_int!(i8, i16, i32, isize, u8, u16, u32, u64, usize);

impl<'h> FromValue<'h> for f64 {
    fn from_value(value: Value<'h>) -> Result<Self> {
        match value.raw() {
            MrbValue::Float(f) => Ok(f),
            MrbValue::Fixnum(n) => Ok(n as f64),
            _ => mismatch("Float", &value),
        }
    }
}

impl<'h> FromValue<'h> for f32 {
    fn from_value(value: Value<'h>) -> Result<Self> {
        f64::from_value(value).map(|f| f as f32)
    }
}

impl<'h> FromValue<'h> for Vec<Value<'h>> {
    fn from_value(value: Value<'h>) -> Result<Self> {
        Ok(Array::from_value(value)?.to_vec())
    }
}

impl<'h> FromValue<'h> for Array<'h> {
    fn from_value(value: Value<'h>) -> Result<Self> {
        value.expect_type("Array", MrbVType::Array)?;
        Ok(Array::wrap(value))
    }
}

impl<'h> FromValue<'h> for Hash<'h> {
    fn from_value(value: Value<'h>) -> Result<Self> {
        value.expect_type("Hash", MrbVType::Hash)?;
        Ok(Hash::wrap(value))
    }
}

/// `nil` reads as `None`.
impl<'h, T: FromValue<'h>> FromValue<'h> for Option<T> {
    fn from_value(value: Value<'h>) -> Result<Self> {
        if value.is_nil() {
            Ok(None)
        } else {
            T::from_value(value).map(Some)
        }
    }
}

// ============================================================================
// Host -> guest
// ============================================================================

impl<'h> IntoValue<'h> for Value<'h> {
    fn into_value(self, _handle: &'h Handle) -> Value<'h> {
        self
    }
}

impl<'h> IntoValue<'h> for () {
    fn into_value(self, handle: &'h Handle) -> Value<'h> {
        handle.nil_value()
    }
}

impl<'h> IntoValue<'h> for bool {
    fn into_value(self, handle: &'h Handle) -> Value<'h> {
        if self {
            handle.true_value()
        } else {
            handle.false_value()
        }
    }
}

impl<'h> IntoValue<'h> for &str {
    fn into_value(self, handle: &'h Handle) -> Value<'h> {
        Value::new(handle, handle.mrb().str_new(self))
    }
}

impl<'h> IntoValue<'h> for String {
    fn into_value(self, handle: &'h Handle) -> Value<'h> {
        self.as_str().into_value(handle)
    }
}

impl<'h> IntoValue<'h> for &String {
    fn into_value(self, handle: &'h Handle) -> Value<'h> {
        self.as_str().into_value(handle)
    }
}

macro_rules! into_value_int {
    ($($ty:ty),*) => {
        $(
            impl<'h> IntoValue<'h> for $ty {
                fn into_value(self, handle: &'h Handle) -> Value<'h> {
                    Value::new(handle, MrbValue::Fixnum(i64::from(self)))
                }
            }
        )*
    };
}

into_value_int!(i8, i16, i32, i64, u8, u16, u32);

impl<'h> IntoValue<'h> for f64 {
    fn into_value(self, handle: &'h Handle) -> Value<'h> {
        Value::new(handle, MrbValue::Float(self))
    }
}

impl<'h> IntoValue<'h> for f32 {
    fn into_value(self, handle: &'h Handle) -> Value<'h> {
        f64::from(self).into_value(handle)
    }
}

/// Builds a new guest array.
impl<'h, T: IntoValue<'h>> IntoValue<'h> for Vec<T> {
    fn into_value(self, handle: &'h Handle) -> Value<'h> {
        let ary = Array::new(handle);
        for item in self {
            ary.push(item.into_value(handle));
        }
        *ary
    }
}

/// `None` becomes `nil`.
impl<'h, T: IntoValue<'h>> IntoValue<'h> for Option<T> {
    fn into_value(self, handle: &'h Handle) -> Value<'h> {
        match self {
            Some(v) => v.into_value(handle),
            None => handle.nil_value(),
        }
    }
}

impl<'h> IntoValue<'h> for Array<'h> {
    fn into_value(self, _handle: &'h Handle) -> Value<'h> {
        *self
    }
}

impl<'h> IntoValue<'h> for Hash<'h> {
    fn into_value(self, _handle: &'h Handle) -> Value<'h> {
        *self
    }
}

#[cfg(test)]
mod tests {
    use crate::{Array, Error, Garnet, Hash, Value, ValueType};

    #[test]
    fn test_scalars_convert_back() {
        let grb = Garnet::open().expect("open");
        assert!(grb.to_guest(true).to_host::<bool>().expect("bool"));
        assert!(!grb.to_guest(false).to_host::<bool>().expect("bool"));
        assert_eq!(grb.to_guest(-7_i64).to_host::<i64>().expect("i64"), -7);
        assert_eq!(grb.to_guest(1.5_f64).to_host::<f64>().expect("f64"), 1.5);
        assert_eq!(grb.to_guest("héllo").to_host::<String>().expect("string"), "héllo");
    }

    #[test]
    fn test_mismatch_is_an_error() {
        let grb = Garnet::open().expect("open");
        let err = grb.to_guest("1").to_host::<i64>().unwrap_err();
        assert!(matches!(
            err,
            Error::TypeMismatch {
                expected: "Integer",
                found: ValueType::String
            }
        ));
        assert!(grb.to_guest(1_i64).to_host::<bool>().is_err());
        assert!(grb.to_guest(1.5_f64).to_host::<i64>().is_err());
        assert!(grb.nil_value().to_host::<Array<'_>>().is_err());
    }

    #[test]
    fn test_integer_reads_as_float() {
        let grb = Garnet::open().expect("open");
        assert_eq!(grb.to_guest(3_i64).to_host::<f64>().expect("f64"), 3.0);
    }

    #[test]
    fn test_narrowing_out_of_range() {
        let grb = Garnet::open().expect("open");
        let big = grb.to_guest(i64::from(i32::MAX) + 1);
        assert!(matches!(big.to_host::<i32>(), Err(Error::IntegerOutOfRange(_))));
        assert!(matches!(grb.to_guest(-1_i64).to_host::<u32>(), Err(Error::IntegerOutOfRange(-1))));
        assert_eq!(grb.to_guest(12_i64).to_host::<u8>().expect("u8"), 12);
    }

    #[test]
    fn test_string_uses_to_s() {
        let grb = Garnet::open().expect("open");
        assert_eq!(grb.to_guest(42_i64).to_host::<String>().expect("to_s"), "42");

        let v = grb
            .load_string("class Bad\n  def to_s\n    raise 'no string'\n  end\nend\nBad.new")
            .expect("load");
        let err = v.to_host::<String>().unwrap_err();
        assert_eq!(err.exception().map(|e| e.message()), Some("no string"));
    }

    #[test]
    fn test_option_and_vec() {
        let grb = Garnet::open().expect("open");
        assert_eq!(grb.nil_value().to_host::<Option<i64>>().expect("nil"), None);
        assert_eq!(grb.to_guest(Some(5_i64)).to_host::<Option<i64>>().expect("some"), Some(5));
        assert!(grb.to_guest(None::<i64>).is_nil());

        let ary = grb.to_guest(vec![1_i64, 2, 3]);
        assert_eq!(ary.value_type(), ValueType::Array);
        let items: Vec<Value<'_>> = ary.to_host().expect("vec");
        let ints: Vec<i64> = items.iter().map(|v| v.to_host().expect("int")).collect();
        assert_eq!(ints, vec![1, 2, 3]);
    }

    #[test]
    fn test_hash_wrapper_from_value() {
        let grb = Garnet::open().expect("open");
        let v = grb.load_string("{ 'a' => 1 }").expect("load");
        let hash: Hash<'_> = v.to_host().expect("hash");
        assert_eq!(hash.len(), 1);
        assert!(grb.to_guest(1_i64).to_host::<Hash<'_>>().is_err());
    }
}
