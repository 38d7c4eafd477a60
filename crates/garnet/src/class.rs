//! Guest classes and modules

use crate::args::ArgSpec;
use crate::error::Result;
use crate::handle::Handle;
use crate::methods::{into_func, MethodKind, MethodResult};
use crate::trampoline;
use crate::value::Value;
use garnet_vm::{MrbValue, ObjRef};
use log::debug;
use std::fmt;
use std::ops::Deref;

/// A class or module. Dereferences to the class object as a [`Value`];
/// two `Class`es are equal when they denote the same guest class.
#[derive(Clone, Copy)]
pub struct Class<'h> {
    value: Value<'h>,
    class: ObjRef,
}

impl<'h> Class<'h> {
    pub(crate) fn new(handle: &'h Handle, class: ObjRef) -> Self {
        Self {
            value: Value::new(handle, MrbValue::Object(class)),
            class,
        }
    }

    pub(crate) fn raw_class(&self) -> ObjRef {
        self.class
    }

    /// Full name, `Outer::Inner` for nested classes.
    pub fn name(&self) -> String {
        self.value.handle().mrb().class_name(self.class)
    }

    /// Define an instance method backed by `callback`. The callback is in
    /// the dispatch table before the guest can see the method.
    pub fn define_method<F>(&self, name: &str, callback: F, spec: ArgSpec)
    where
        F: for<'a> Fn(&'a Handle, Value<'a>) -> MethodResult<'a> + Send + Sync + 'static,
    {
        let handle = self.value.handle();
        let mid = handle.intern(name);
        handle.methods.add(self.class, MethodKind::Instance, mid, into_func(callback));
        handle
            .mrb()
            .define_method(self.class, mid, trampoline::instance_method_call, spec.into());
        debug!("defined method {}#{}", self.name(), name);
    }

    /// Define a class method backed by `callback`.
    pub fn define_class_method<F>(&self, name: &str, callback: F, spec: ArgSpec)
    where
        F: for<'a> Fn(&'a Handle, Value<'a>) -> MethodResult<'a> + Send + Sync + 'static,
    {
        let handle = self.value.handle();
        let mid = handle.intern(name);
        handle.methods.add(self.class, MethodKind::Class, mid, into_func(callback));
        handle
            .mrb()
            .define_class_method(self.class, mid, trampoline::class_method_call, spec.into());
        debug!("defined method {}.{}", self.name(), name);
    }

    pub fn define_const(&self, name: &str, value: Value<'h>) {
        self.value.handle().mrb().define_const(self.class, name, value.raw());
    }

    /// Instantiate the class with `args`, running `initialize`.
    pub fn new_instance(&self, args: &[Value<'h>]) -> Result<Value<'h>> {
        let handle = self.value.handle();
        let argv: Vec<MrbValue> = args.iter().map(|v| v.raw()).collect();
        let raw = handle.mrb().obj_new(self.class, &argv);
        handle.check_exception()?;
        Ok(Value::new(handle, raw))
    }

    /// Include `module` into this class.
    pub fn include(&self, module: &Class<'h>) {
        self.value.handle().mrb().include_module(self.class, module.class);
    }

    /// Extend this class object with `module`, adding its methods as class
    /// methods.
    pub fn extend(&self, module: &Class<'h>) {
        self.value
            .handle()
            .mrb()
            .extend_object(self.value.raw(), module.class);
    }
}

impl<'h> Deref for Class<'h> {
    type Target = Value<'h>;

    fn deref(&self) -> &Value<'h> {
        &self.value
    }
}

impl PartialEq for Class<'_> {
    fn eq(&self, other: &Self) -> bool {
        std::ptr::eq(self.value.handle(), other.value.handle()) && self.class == other.class
    }
}

impl Eq for Class<'_> {}

impl fmt::Debug for Class<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Class").field(&self.name()).finish()
    }
}

impl fmt::Display for Class<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name())
    }
}

#[cfg(test)]
mod tests {
    use crate::{ArgSpec, Garnet};

    #[test]
    fn test_define_class_and_lookup() {
        let grb = Garnet::open().expect("open");
        let hello = grb.define_class("Hello", None);
        assert_eq!(grb.class("Hello", None).expect("Hello"), hello);
        assert_eq!(hello.name(), "Hello");

        let world = grb.define_class_under("World", None, Some(&hello));
        assert_eq!(world.name(), "Hello::World");
        assert!(grb.load_string("Hello::World").is_ok());
        assert_eq!(grb.class("World", Some(&hello)).expect("World"), world);
    }

    #[test]
    fn test_define_module() {
        let grb = Garnet::open().expect("open");
        let hello = grb.define_module("Hello");
        grb.define_module_under("World", Some(&hello));
        assert!(grb.load_string("Hello::World").is_ok());
        assert!(grb.module("Kernel").is_ok());
        assert_eq!(grb.module("Hello").expect("module"), hello);
    }

    #[test]
    fn test_define_const() {
        let grb = Garnet::open().expect("open");
        let hello = grb.define_class("Hello", None);
        hello.define_const("ANSWER", grb.to_guest(42_i64));
        let v = grb.load_string("Hello::ANSWER").expect("const");
        assert_eq!(v.to_host::<i64>().expect("int"), 42);
        assert!(grb.const_defined("Hello", *grb.object_class()));
        assert!(grb.const_defined("ANSWER", *hello));
        assert!(!grb.const_defined("Missing", *grb.object_class()));
    }

    #[test]
    fn test_include_and_extend() {
        let grb = Garnet::open().expect("open");
        let greet = grb.define_module("Greet");
        greet.define_method("greet", |grb, _| Ok(Some(grb.to_guest("hi"))), ArgSpec::none());
        let hello = grb.define_class("Hello", None);
        hello.include(&greet);
        hello.extend(&greet);
        assert_eq!(grb.load_string("Hello.new.greet").expect("instance").to_string(), "hi");
        assert_eq!(grb.load_string("Hello.greet").expect("class").to_string(), "hi");
    }
}
