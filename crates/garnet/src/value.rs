//! Host-side view of a guest value
//!
//! A [`Value`] pairs a raw guest value with the handle it belongs to. It is
//! `Copy` and borrows the handle, so it cannot outlive the interpreter; it
//! can still be collected by the guest once nothing roots it, which
//! [`Value::is_dead`] reports.

use crate::class::Class;
use crate::convert::FromValue;
use crate::decode::{self, Decode};
use crate::error::{Error, Result};
use crate::handle::Handle;
use garnet_vm::{MrbVType, MrbValue};
use std::fmt;

/// Guest type tags.
pub use garnet_vm::MrbVType as ValueType;

#[derive(Clone, Copy)]
pub struct Value<'h> {
    handle: &'h Handle,
    raw: MrbValue,
}

impl<'h> Value<'h> {
    pub(crate) fn new(handle: &'h Handle, raw: MrbValue) -> Self {
        Self { handle, raw }
    }

    /// The handle this value belongs to.
    pub fn handle(&self) -> &'h Handle {
        self.handle
    }

    /// The underlying guest value.
    pub fn raw(&self) -> MrbValue {
        self.raw
    }

    pub fn value_type(&self) -> ValueType {
        self.handle.mrb().vtype(self.raw)
    }

    pub fn is_nil(&self) -> bool {
        self.raw.is_nil()
    }

    /// Whether the guest collected the object behind this value.
    pub fn is_dead(&self) -> bool {
        self.handle.mrb().is_dead(self.raw)
    }

    /// Root this value in the current arena.
    pub fn gc_protect(&self) {
        self.handle.mrb().gc_protect(self.raw);
    }

    pub fn class(&self) -> Class<'h> {
        let class = self.handle.mrb().obj_class(self.raw);
        Class::new(self.handle, class)
    }

    /// The singleton class, created on demand. Immediates have none and fail
    /// with the guest's `TypeError`.
    pub fn singleton_class(&self) -> Result<Class<'h>> {
        let sclass = self.handle.mrb().singleton_class(self.raw);
        self.handle.check_exception()?;
        match sclass {
            Some(c) => Ok(Class::new(self.handle, c)),
            None => Err(Error::TypeMismatch {
                expected: "Object",
                found: self.value_type(),
            }),
        }
    }

    /// Instance variable `name`, including the leading `@`.
    pub fn get_instance_variable(&self, name: &str) -> Value<'h> {
        let sym = self.handle.intern(name);
        let raw = self.handle.mrb().iv_get(self.raw, sym);
        Value::new(self.handle, raw)
    }

    pub fn set_instance_variable(&self, name: &str, value: Value<'h>) {
        let sym = self.handle.intern(name);
        self.handle.mrb().iv_set(self.raw, sym, value.raw);
    }

    /// Call `method` with `args`.
    pub fn call(&self, method: &str, args: &[Value<'h>]) -> Result<Value<'h>> {
        self.call_with_block(method, args, None)
    }

    /// Call `method` passing the last element of `args` as the block.
    pub fn call_block(&self, method: &str, args: &[Value<'h>]) -> Result<Value<'h>> {
        match args.split_last() {
            Some((block, rest)) => self.call_with_block(method, rest, Some(*block)),
            None => Err(Error::EmptyBlockArgs),
        }
    }

    fn call_with_block(&self, method: &str, args: &[Value<'h>], block: Option<Value<'h>>) -> Result<Value<'h>> {
        let mid = self.handle.intern(method);
        let argv: Vec<MrbValue> = args.iter().map(|v| v.raw).collect();
        let raw = self
            .handle
            .mrb()
            .funcall(self.raw, mid, &argv, block.map(|b| b.raw));
        self.handle.check_exception()?;
        Ok(Value::new(self.handle, raw))
    }

    /// Whether the value answers `method`.
    pub fn respond_to(&self, method: &str) -> bool {
        let mid = self.handle.intern(method);
        self.handle.mrb().respond_to(self.raw, mid)
    }

    /// Make `def` and constant lookup inside this proc target `class`.
    pub fn set_proc_target_class(&self, class: &Class<'h>) {
        self.handle.mrb().proc_set_target_class(self.raw, class.raw_class());
    }

    /// The guest's `inspect` of this value.
    pub fn inspect(&self) -> Result<String> {
        let raw = self.handle.mrb().inspect(self.raw);
        self.handle.check_exception()?;
        Ok(self.handle.mrb().string_value(raw).unwrap_or_default().to_string())
    }

    /// Convert to a host type.
    pub fn to_host<T: FromValue<'h>>(&self) -> Result<T> {
        T::from_value(*self)
    }

    /// Decode into a fresh `T`.
    pub fn decode<T: Decode + Default>(&self) -> Result<T> {
        let mut out = T::default();
        decode::decode(&mut out, *self)?;
        Ok(out)
    }

    pub(crate) fn expect_type(&self, expected: &'static str, tag: MrbVType) -> Result<()> {
        let found = self.value_type();
        if found == tag {
            Ok(())
        } else {
            Err(Error::TypeMismatch { expected, found })
        }
    }
}

impl PartialEq for Value<'_> {
    fn eq(&self, other: &Self) -> bool {
        std::ptr::eq(self.handle, other.handle) && self.raw.identical(other.raw)
    }
}

impl fmt::Debug for Value<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Value").field(&self.raw).finish()
    }
}

/// Formats through the guest's `to_s`. When `to_s` raises, the exception is
/// discarded and the class name is shown instead.
impl fmt::Display for Value<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.to_host::<String>() {
            Ok(s) => f.write_str(&s),
            Err(_) => write!(f, "#<{}>", self.class().name()),
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::{Garnet, ValueType};

    #[test]
    fn test_value_type() {
        let grb = Garnet::open().expect("open");
        assert_eq!(grb.to_guest(42_i64).value_type(), ValueType::Fixnum);
        assert_eq!(grb.to_guest("x").value_type(), ValueType::String);
        assert_eq!(grb.nil_value().value_type(), ValueType::Nil);
        assert_eq!(grb.object_class().value_type(), ValueType::Class);
    }

    #[test]
    fn test_call_and_call_block() {
        let grb = Garnet::open().expect("open");
        let ary = grb.load_string("[1, 2, 3]").expect("load");
        let size = ary.call("size", &[]).expect("size");
        assert_eq!(size.to_host::<i64>().expect("int"), 3);

        let block = grb.load_string("proc { |x| x * 2 }").expect("proc");
        let mapped = ary.call_block("map", &[block]).expect("map");
        assert_eq!(mapped.inspect().expect("inspect"), "[2, 4, 6]");

        assert!(matches!(ary.call_block("map", &[]), Err(crate::Error::EmptyBlockArgs)));
    }

    #[test]
    fn test_call_raises() {
        let grb = Garnet::open().expect("open");
        let err = grb.to_guest(1_i64).call("nope", &[]).unwrap_err();
        assert!(err.exception().is_some());
    }

    #[test]
    fn test_instance_variables() {
        let grb = Garnet::open().expect("open");
        grb.load_string(
            "class Dog\n  def initialize(breed)\n    @breed = breed\n  end\n  def breed\n    'cocker spaniel'\n  end\nend",
        )
        .expect("load");
        let dog = grb.class("Dog", None).expect("Dog");
        let inst = dog.new_instance(&[grb.to_guest("golden retriever")]).expect("new");
        assert_eq!(inst.get_instance_variable("@breed").to_string(), "golden retriever");
        inst.set_instance_variable("@breed", grb.to_guest("husky"));
        assert_eq!(inst.get_instance_variable("@breed").to_string(), "husky");
        assert_eq!(inst.call("breed", &[]).expect("breed").to_string(), "cocker spaniel");
    }

    #[test]
    fn test_singleton_class_of_immediate_fails() {
        let grb = Garnet::open().expect("open");
        assert!(grb.to_guest(1_i64).singleton_class().is_err());
        let top = grb.top_self().singleton_class().expect("singleton");
        assert_eq!(top, grb.top_self().singleton_class().expect("singleton"));
    }

    #[test]
    fn test_display_uses_to_s() {
        let grb = Garnet::open().expect("open");
        let v = grb.load_string("class P\n  def to_s\n    'pretty'\n  end\nend\nP.new").expect("load");
        assert_eq!(v.to_string(), "pretty");
    }
}
