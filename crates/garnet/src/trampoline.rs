// Native entry points handed to the guest
//
// Every host-backed guest method is installed with one of two fixed
// `extern "C"` functions. On each call they:
// - recover the method symbol and owning class from the active frame
// - find the owning handle through the registry
// - resolve the callback in the handle's method table
// - run it with panics caught
// - hand back the result, or leave an exception pending
//
// A registry or table miss panics inside the `extern "C"` frame, which aborts
// the process: the guest is holding a method the bridge never installed.

use crate::error::Error;
use crate::handle::Handle;
use crate::methods::{MethodKind, Raise};
use crate::registry;
use crate::value::Value;
use garnet_vm::{MrbState, MrbValue};
use log::{trace, warn};
use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::ptr::NonNull;

pub(crate) extern "C" fn instance_method_call(state: *mut MrbState, recv: MrbValue) -> MrbValue {
    dispatch(state, recv, MethodKind::Instance)
}

pub(crate) extern "C" fn class_method_call(state: *mut MrbState, recv: MrbValue) -> MrbValue {
    dispatch(state, recv, MethodKind::Class)
}

fn dispatch(state: *mut MrbState, recv: MrbValue, kind: MethodKind) -> MrbValue {
    // SAFETY: the guest only calls trampolines while the handle that installed
    // them is open, and the reference does not outlive this call.
    let handle = unsafe { registry::lookup(state) };
    let Some(state) = NonNull::new(state) else {
        panic!("native call without state, this must never happen");
    };
    let _active = handle.enter(state);

    let Some((mid, owner)) = handle.mrb().call_info() else {
        panic!("native call without call info, this must never happen");
    };
    // Class methods live on the singleton class; the table is keyed by the
    // class it is attached to.
    let class = match kind {
        MethodKind::Instance => owner,
        MethodKind::Class => handle
            .mrb()
            .singleton_attached(owner)
            .and_then(MrbValue::as_obj)
            .unwrap_or(owner),
    };
    trace!("dispatch {:?} {}", kind, handle.mrb().sym_name(mid));

    let func = handle.methods.resolve(class, kind, mid);
    let this = Value::new(handle, recv);

    match catch_unwind(AssertUnwindSafe(|| func(handle, this))) {
        Ok(Ok(Some(value))) => value.raw(),
        Ok(Ok(None)) => handle.nil_value().raw(),
        Ok(Err(raise)) => {
            let exc = exception_for(handle, raise);
            handle.mrb().set_exc(exc);
            handle.nil_value().raw()
        }
        Err(payload) => {
            let message = panic_message(payload.as_ref());
            warn!("host method {} panicked: {}", handle.mrb().sym_name(mid), message);
            let exc = new_exception(handle, "RuntimeError", &message);
            handle.mrb().set_exc(exc);
            handle.nil_value().raw()
        }
    }
}

/// The guest exception object to raise for a callback failure.
pub(crate) fn exception_for(handle: &Handle, raise: Raise<'_>) -> MrbValue {
    match raise {
        Raise::Exception(value) if handle.mrb().is_exception(value.raw()) => value.raw(),
        Raise::Exception(value) => {
            let found = value.value_type();
            new_exception(handle, "TypeError", &format!("exception object expected, got {}", found))
        }
        Raise::Error(err) => match err.exception() {
            Some(exc) if handle.mrb().is_exception(exc.raw()) => exc.raw(),
            _ => error_exception(handle, &err),
        },
    }
}

fn error_exception(handle: &Handle, err: &Error) -> MrbValue {
    let class = match err {
        Error::TypeMismatch { .. } | Error::Decode(_) => "TypeError",
        Error::IntegerOutOfRange(_) => "RangeError",
        Error::EmptyBlockArgs => "ArgumentError",
        Error::Parse(_) => "SyntaxError",
        _ => "RuntimeError",
    };
    new_exception(handle, class, &err.to_string())
}

fn new_exception(handle: &Handle, class: &str, message: &str) -> MrbValue {
    let mrb = handle.mrb();
    let class = match mrb.exception_class(class) {
        Some(c) => c,
        None => mrb.exception_class("RuntimeError").unwrap_or_else(|| mrb.object_class()),
    };
    mrb.exc_new(class, message)
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "host method panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_panic_message() {
        let payload: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(panic_message(payload.as_ref()), "boom");
        let payload: Box<dyn Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_message(payload.as_ref()), "bang");
        let payload: Box<dyn Any + Send> = Box::new(7_u8);
        assert_eq!(panic_message(payload.as_ref()), "host method panicked");
    }
}
