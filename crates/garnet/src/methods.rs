//! Method dispatch table
//!
//! Host callbacks registered on guest classes are stored per handle, keyed by
//! the class they were defined on and the kind of method. The guest only
//! knows the trampoline address; when it calls a native method the trampoline
//! resolves the callback here.

use crate::error::{DecodeError, Error};
use crate::exception::ExceptionError;
use crate::handle::Handle;
use crate::value::Value;
use dashmap::DashMap;
use garnet_vm::{ObjRef, Sym};
use rustc_hash::{FxBuildHasher, FxHashMap};
use std::fmt;
use std::sync::Arc;

/// What a host callback returns: a value (nil when `None`) or something to
/// raise in the guest.
pub type MethodResult<'h> = std::result::Result<Option<Value<'h>>, Raise<'h>>;

/// A host callback backing a guest method. Receives the handle and `self`;
/// arguments are read with [`Handle::get_args`].
pub type Func = Arc<dyn for<'h> Fn(&'h Handle, Value<'h>) -> MethodResult<'h> + Send + Sync>;

/// Whether a callback answers instance calls or class calls. The guest
/// reports different owners for the two: the class itself, or its singleton
/// class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MethodKind {
    Instance,
    Class,
}

/// An exception a callback wants raised in the guest.
pub enum Raise<'h> {
    /// A guest exception object, raised as is.
    Exception(Value<'h>),
    /// A host error. Guest exceptions it wraps are raised again unchanged;
    /// anything else becomes a `RuntimeError` with the error's message.
    Error(Error),
}

impl fmt::Debug for Raise<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Raise::Exception(v) => f.debug_tuple("Exception").field(&v.raw()).finish(),
            Raise::Error(e) => f.debug_tuple("Error").field(e).finish(),
        }
    }
}

impl From<Error> for Raise<'_> {
    fn from(e: Error) -> Self {
        Raise::Error(e)
    }
}

impl From<ExceptionError> for Raise<'_> {
    fn from(e: ExceptionError) -> Self {
        Raise::Error(Error::Exception(e))
    }
}

impl From<DecodeError> for Raise<'_> {
    fn from(e: DecodeError) -> Self {
        Raise::Error(Error::Decode(e))
    }
}

/// Box a callback. Closures passed here get their signature from the bound,
/// so `|grb, this| ...` needs no annotations.
pub(crate) fn into_func<F>(f: F) -> Func
where
    F: for<'h> Fn(&'h Handle, Value<'h>) -> MethodResult<'h> + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Per-handle table: (class, kind) -> method symbol -> callback.
///
/// Entries for classes the guest has collected (singleton classes of dead
/// objects, mostly) are dropped by [`MethodTable::retain_classes`] after each
/// full collection. Incremental steps leave them in place until then.
pub(crate) struct MethodTable {
    classes: DashMap<(ObjRef, MethodKind), FxHashMap<Sym, Func>, FxBuildHasher>,
}

impl MethodTable {
    pub(crate) fn new() -> Self {
        Self {
            classes: DashMap::with_hasher(FxBuildHasher),
        }
    }

    pub(crate) fn add(&self, class: ObjRef, kind: MethodKind, mid: Sym, func: Func) {
        self.classes.entry((class, kind)).or_default().insert(mid, func);
    }

    /// Find the callback for a native call. The shard lock is released
    /// before returning so the callback may register more methods.
    ///
    /// # Panics
    ///
    /// When nothing was registered for the pair: the guest holds a native
    /// method the bridge never wired up.
    pub(crate) fn resolve(&self, class: ObjRef, kind: MethodKind, mid: Sym) -> Func {
        let Some(methods) = self.classes.get(&(class, kind)) else {
            panic!("func call on unknown class, this must never happen: {:?}", class);
        };
        match methods.get(&mid) {
            Some(func) => Arc::clone(func),
            None => panic!("func call on unknown method, this must never happen: {:?}", mid),
        }
    }

    /// Drop every entry whose class fails `live`.
    pub(crate) fn retain_classes(&self, mut live: impl FnMut(ObjRef) -> bool) {
        self.classes.retain(|(class, _), _| live(*class));
    }

    /// Total number of registered callbacks.
    pub(crate) fn len(&self) -> usize {
        self.classes.iter().map(|entry| entry.value().len()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Garnet;

    fn answer() -> Func {
        into_func(|grb, _this| Ok(Some(grb.to_guest(42_i64))))
    }

    #[test]
    fn test_resolve_by_class_and_kind() {
        let grb = Garnet::open().expect("open");
        let object = grb.object_class().raw_class();
        let sym = grb.intern("answer");
        let table = MethodTable::new();
        table.add(object, MethodKind::Instance, sym, answer());
        assert_eq!(table.len(), 1);

        let func = table.resolve(object, MethodKind::Instance, sym);
        let out = func(&*grb, grb.nil_value()).expect("callback");
        assert_eq!(out.map(|v| v.raw()), Some(garnet_vm::MrbValue::Fixnum(42)));
    }

    #[test]
    fn test_full_gc_drops_collected_classes() {
        let grb = Garnet::open().expect("open");
        let before = grb.methods.len();
        {
            let _arena = grb.arena();
            let obj = grb.load_string("Object.new").expect("new");
            let sclass = obj.singleton_class().expect("singleton");
            sclass.define_method("answer", |grb, _this| Ok(Some(grb.to_guest(42_i64))), crate::ArgSpec::none());
            let out: i64 = obj.call("answer", &[]).expect("answer").to_host().expect("int");
            assert_eq!(out, 42);
            assert_eq!(grb.methods.len(), before + 1);
        }
        grb.incremental_gc();
        grb.full_gc();
        assert_eq!(grb.methods.len(), before);
    }

    #[test]
    #[should_panic(expected = "unknown class")]
    fn test_resolve_wrong_kind_panics() {
        let grb = Garnet::open().expect("open");
        let object = grb.object_class().raw_class();
        let sym = grb.intern("answer");
        let table = MethodTable::new();
        table.add(object, MethodKind::Instance, sym, answer());
        table.resolve(object, MethodKind::Class, sym);
    }

    #[test]
    #[should_panic(expected = "unknown method")]
    fn test_resolve_unknown_method_panics() {
        let grb = Garnet::open().expect("open");
        let object = grb.object_class().raw_class();
        let table = MethodTable::new();
        table.add(object, MethodKind::Instance, grb.intern("answer"), answer());
        table.resolve(object, MethodKind::Instance, grb.intern("other"));
    }
}
