//! The VM handle
//!
//! [`Garnet`] owns one guest interpreter. It dereferences to [`Handle`],
//! which carries every operation; host callbacks receive a `&Handle` for the
//! interpreter that called them. Values borrow the handle, so none can
//! outlive [`Garnet::close`].

use crate::arena::{ArenaGuard, ArenaIndex};
use crate::class::Class;
use crate::convert::IntoValue;
use crate::error::{Error, Result};
use crate::exception;
use crate::methods::MethodTable;
use crate::options::{Builder, Mutator};
use crate::parser::CompileContext;
use crate::registry;
use crate::value::Value;
use garnet_vm::{MrbState, MrbValue, ObjRef, Sym, VmOptions};
use log::debug;
use parking_lot::Mutex;
use rustc_hash::FxHashSet;
use std::cell::Cell;
use std::fmt;
use std::ops::Deref;
use std::ptr::NonNull;

/// Host-side state of one interpreter.
pub struct Handle {
    state: NonNull<MrbState>,
    /// State pointer of the native call being served, if any.
    active: Cell<Option<NonNull<MrbState>>>,
    loaded: Mutex<FxHashSet<String>>,
    pub(crate) methods: MethodTable,
    true_value: MrbValue,
    false_value: MrbValue,
    nil_value: MrbValue,
}

/// An open interpreter. Dropping it closes the interpreter.
pub struct Garnet {
    /// Leaked box, reclaimed in `drop`. The registry holds the same pointer.
    handle: NonNull<Handle>,
}

// SAFETY: the interpreter is only ever driven through one `Garnet` at a time;
// values and callbacks borrow it and cannot cross threads with it.
unsafe impl Send for Garnet {}

impl Garnet {
    /// Open an interpreter with default options.
    pub fn open() -> Result<Garnet> {
        Builder::new().open()
    }

    /// Open an interpreter and run `mutators` on it in order. When one fails
    /// the interpreter is closed and its error returned.
    pub fn with_mutators<I>(mutators: I) -> Result<Garnet>
    where
        I: IntoIterator<Item = Mutator>,
    {
        mutators
            .into_iter()
            .fold(Builder::new(), |b, m| b.boxed_mutator(m))
            .open()
    }

    pub(crate) fn from_options(vm: VmOptions) -> Garnet {
        let state = NonNull::from(Box::leak(MrbState::open(vm)));
        let handle = NonNull::from(Box::leak(Box::new(Handle {
            state,
            active: Cell::new(None),
            loaded: Mutex::new(FxHashSet::default()),
            methods: MethodTable::new(),
            true_value: MrbValue::True,
            false_value: MrbValue::False,
            nil_value: MrbValue::Nil,
        })));
        registry::register(state.as_ptr(), handle);
        debug!("handle opened: {:p}", state);
        Garnet { handle }
    }

    /// Close the interpreter. Same as dropping it.
    pub fn close(self) {}
}

impl Drop for Garnet {
    fn drop(&mut self) {
        let state = self.state;
        registry::unregister(state.as_ptr());
        // SAFETY: both boxes were leaked in `from_options`, and no value or
        // callback can reach them once the registry entry is gone.
        unsafe {
            drop(Box::from_raw(self.handle.as_ptr()));
            drop(Box::from_raw(state.as_ptr()));
        }
        debug!("handle closed: {:p}", state);
    }
}

impl Deref for Garnet {
    type Target = Handle;

    fn deref(&self) -> &Handle {
        // SAFETY: the handle lives until `drop`, which needs `&mut self`.
        unsafe { self.handle.as_ref() }
    }
}

impl fmt::Debug for Garnet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&**self, f)
    }
}

impl fmt::Debug for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handle")
            .field("state", &self.state)
            .field("methods", &self.methods.len())
            .field("loaded", &self.loaded.lock().len())
            .finish()
    }
}

/// Restores the previous active state pointer on drop.
pub(crate) struct ActiveState<'h> {
    handle: &'h Handle,
    prev: Option<NonNull<MrbState>>,
}

impl Drop for ActiveState<'_> {
    fn drop(&mut self) {
        self.handle.active.set(self.prev);
    }
}

impl Handle {
    pub(crate) fn state_ptr(&self) -> *mut MrbState {
        self.state.as_ptr()
    }

    /// The interpreter behind this handle.
    ///
    /// Native calls re-enter the bridge while the guest is still running, so
    /// this hands out a fresh reference each time instead of holding one.
    /// Callers keep it for a single interpreter call. During a native call
    /// the reference is derived from the pointer the guest passed in, never
    /// from the base pointer the suspended guest frame was reborrowed from.
    #[allow(clippy::mut_from_ref)]
    pub(crate) fn mrb(&self) -> &mut MrbState {
        let state = self.active.get().unwrap_or(self.state);
        // SAFETY: the state lives until the owning `Garnet` drops, which
        // cannot happen while `self` is borrowed. `Handle` is not `Sync`, so
        // only the thread driving the interpreter gets here.
        unsafe { &mut *state.as_ptr() }
    }

    /// Route [`Handle::mrb`] through `state` until the guard drops. Nested
    /// native calls stack; each guard restores the pointer it replaced.
    pub(crate) fn enter(&self, state: NonNull<MrbState>) -> ActiveState<'_> {
        let prev = self.active.replace(Some(state));
        ActiveState { handle: self, prev }
    }

    pub(crate) fn value(&self, raw: MrbValue) -> Value<'_> {
        Value::new(self, raw)
    }

    pub(crate) fn intern(&self, name: &str) -> Sym {
        self.mrb().intern(name)
    }

    /// Turn a pending guest exception into an error, clearing it.
    pub(crate) fn check_exception(&self) -> Result<()> {
        match exception::capture(self) {
            Some(exc) => Err(Error::Exception(exc)),
            None => Ok(()),
        }
    }

    fn settle(&self, raw: MrbValue) -> Result<Value<'_>> {
        self.check_exception()?;
        Ok(self.value(raw))
    }

    // ========================================================================
    // Loading and running code
    // ========================================================================

    /// Parse and run `code` at the top level.
    pub fn load_string(&self, code: &str) -> Result<Value<'_>> {
        let raw = self.mrb().load_string(code);
        self.settle(raw)
    }

    /// Like [`Handle::load_string`], reporting `ctx`'s file name in
    /// backtraces and keeping top-level locals in `ctx` between loads.
    pub fn load_string_with_context(&self, code: &str, ctx: &mut CompileContext) -> Result<Value<'_>> {
        let raw = self.mrb().load_string_cxt(code, ctx.raw_mut());
        self.settle(raw)
    }

    /// Load `content` as the file `path`, once. Returns `None` when the path
    /// was already loaded, otherwise the context it was compiled with.
    /// A file that raised is not marked as loaded.
    pub fn load_file(&self, path: &str, content: &str) -> Result<Option<CompileContext>> {
        if self.loaded.lock().contains(path) {
            return Ok(None);
        }
        let mut ctx = CompileContext::new();
        ctx.set_filename(path);
        self.load_string_with_context(content, &mut ctx)?;
        self.loaded.lock().insert(path.to_string());
        debug!("loaded {}", path);
        Ok(Some(ctx))
    }

    /// Run a proc produced by [`Parser::generate_code`](crate::Parser::generate_code),
    /// with `this` (top self when `None`) as the receiver.
    pub fn run<'h>(&'h self, proc: Value<'h>, this: Option<Value<'h>>) -> Result<Value<'h>> {
        let this = this.unwrap_or_else(|| self.top_self());
        let raw = self.mrb().vm_run(proc.raw(), this.raw(), 0);
        self.settle(raw)
    }

    /// Run a proc keeping the first `stack_keep` stack slots of the previous
    /// run, so top-level locals carry over. Returns the value and the
    /// `stack_keep` to pass to the next run.
    pub fn run_with_context<'h>(
        &'h self,
        proc: Value<'h>,
        this: Option<Value<'h>>,
        stack_keep: usize,
    ) -> Result<(usize, Value<'h>)> {
        let this = this.unwrap_or_else(|| self.top_self());
        let raw = self.mrb().vm_run(proc.raw(), this.raw(), stack_keep);
        let value = self.settle(raw)?;
        let keep = self.mrb().proc_stack_size(proc.raw());
        Ok((keep, value))
    }

    /// Call `block` with `args`.
    pub fn yield_block<'h>(&'h self, block: Value<'h>, args: &[Value<'h>]) -> Result<Value<'h>> {
        let argv: Vec<MrbValue> = args.iter().map(|v| v.raw()).collect();
        let raw = self.mrb().yield_argv(block.raw(), &argv);
        self.settle(raw)
    }

    // ========================================================================
    // Native calls
    // ========================================================================

    /// Arguments of the native call being served, with the block (if any)
    /// last.
    pub fn get_args(&self) -> Vec<Value<'_>> {
        let mrb = self.mrb();
        let mut args: Vec<Value<'_>> = mrb.get_args().iter().map(|v| self.value(*v)).collect();
        args.extend(mrb.get_block().map(|b| self.value(b)));
        args
    }

    /// Guest backtrace at the current point, innermost frame first.
    pub fn backtrace(&self) -> Vec<String> {
        self.mrb().backtrace()
    }

    /// File of the guest code that called the native method being served.
    pub fn called_from_file(&self) -> Option<String> {
        self.mrb().called_from_file().map(str::to_string)
    }

    // ========================================================================
    // Globals, constants and classes
    // ========================================================================

    /// Value of a global, `name` including the leading `$`.
    pub fn get_global_variable(&self, name: &str) -> Value<'_> {
        let sym = self.intern(name);
        self.value(self.mrb().gv_get(sym))
    }

    pub fn set_global_variable(&self, name: &str, value: Value<'_>) {
        let sym = self.intern(name);
        self.mrb().gv_set(sym, value.raw());
    }

    /// Define (or reopen) a top-level class. `superclass` defaults to
    /// `Object`.
    pub fn define_class(&self, name: &str, superclass: Option<&Class<'_>>) -> Class<'_> {
        self.define_class_under(name, superclass, None)
    }

    /// Define (or reopen) a class inside `outer` (`Object` when `None`).
    pub fn define_class_under(&self, name: &str, superclass: Option<&Class<'_>>, outer: Option<&Class<'_>>) -> Class<'_> {
        let object = self.mrb().object_class();
        let superclass = superclass.map_or(object, Class::raw_class);
        let outer = outer.map_or(object, Class::raw_class);
        let class = self.mrb().define_class_under(outer, name, superclass);
        debug!("defined class {}", self.mrb().class_name(class));
        Class::new(self, class)
    }

    pub fn define_module(&self, name: &str) -> Class<'_> {
        self.define_module_under(name, None)
    }

    /// Define (or reopen) a module inside `outer` (`Object` when `None`).
    pub fn define_module_under(&self, name: &str, outer: Option<&Class<'_>>) -> Class<'_> {
        let outer = outer.map_or_else(|| self.mrb().object_class(), Class::raw_class);
        let module = self.mrb().define_module_under(outer, name);
        debug!("defined module {}", self.mrb().class_name(module));
        Class::new(self, module)
    }

    /// Look up a class by name, inside `outer` when given. A missing name is
    /// the guest's `NameError`.
    pub fn class(&self, name: &str, outer: Option<&Class<'_>>) -> Result<Class<'_>> {
        let found = match outer {
            Some(outer) => self.mrb().class_get_under(outer.raw_class(), name),
            None => self.mrb().class_get(name),
        };
        self.lookup_result(found)
    }

    /// Look up a top-level module by name.
    pub fn module(&self, name: &str) -> Result<Class<'_>> {
        let found = self.mrb().module_get(name);
        self.lookup_result(found)
    }

    fn lookup_result(&self, found: Option<ObjRef>) -> Result<Class<'_>> {
        self.check_exception()?;
        match found {
            Some(class) => Ok(Class::new(self, class)),
            None => Err(Error::TypeMismatch {
                expected: "Class",
                found: garnet_vm::MrbVType::Nil,
            }),
        }
    }

    /// Whether constant `name` is visible from `scope`, which is a class or
    /// module, or any object whose class is searched.
    pub fn const_defined(&self, name: &str, scope: Value<'_>) -> bool {
        let sym = self.intern(name);
        let mrb = self.mrb();
        let outer = match scope.raw().as_obj() {
            Some(r) if mrb.is_class_like(scope.raw()) => r,
            _ => mrb.obj_class(scope.raw()),
        };
        mrb.const_defined(outer, sym)
    }

    pub fn object_class(&self) -> Class<'_> {
        Class::new(self, self.mrb().object_class())
    }

    pub fn kernel_module(&self) -> Class<'_> {
        Class::new(self, self.mrb().kernel_module())
    }

    pub fn top_self(&self) -> Value<'_> {
        self.value(self.mrb().top_self())
    }

    pub fn true_value(&self) -> Value<'_> {
        self.value(self.true_value)
    }

    pub fn false_value(&self) -> Value<'_> {
        self.value(self.false_value)
    }

    pub fn nil_value(&self) -> Value<'_> {
        self.value(self.nil_value)
    }

    /// Convert a host value into a guest value.
    pub fn to_guest<'h, T: IntoValue<'h>>(&'h self, value: T) -> Value<'h> {
        value.into_value(self)
    }

    // ========================================================================
    // Arena and GC
    // ========================================================================

    /// Checkpoint the GC arena. Values created after this point stay rooted
    /// until the matching [`Handle::arena_restore`].
    pub fn arena_save(&self) -> ArenaIndex {
        ArenaIndex::new(self.mrb().arena_save())
    }

    /// Unroot everything created since `index` was saved. Restoring the same
    /// index twice is harmless.
    pub fn arena_restore(&self, index: ArenaIndex) {
        self.mrb().arena_restore(index.get());
    }

    /// Save the arena now and restore it when the guard drops.
    pub fn arena(&self) -> ArenaGuard<'_> {
        ArenaGuard::new(self)
    }

    /// Enable collection; returns whether it was disabled.
    pub fn enable_gc(&self) -> bool {
        self.mrb().enable_gc()
    }

    /// Disable collection; returns whether it was already disabled.
    pub fn disable_gc(&self) -> bool {
        self.mrb().disable_gc()
    }

    /// Run a full collection, then forget callbacks of collected classes.
    pub fn full_gc(&self) {
        let mrb = self.mrb();
        mrb.full_gc();
        self.methods
            .retain_classes(|class| !mrb.is_dead(MrbValue::Object(class)));
    }

    pub fn incremental_gc(&self) {
        self.mrb().incremental_gc();
    }

    pub fn live_object_count(&self) -> usize {
        self.mrb().live_object_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_close() {
        let grb = Garnet::open().expect("open");
        grb.close();
    }

    #[test]
    fn test_native_calls_route_through_guest_state() {
        let grb = Garnet::open().expect("open");
        let top = grb.top_self().singleton_class().expect("singleton");
        top.define_method(
            "depth",
            |grb, _this| {
                let active = grb.active.get().expect("active state");
                assert_eq!(active.as_ptr(), grb.state_ptr());
                Ok(Some(grb.to_guest(grb.mrb().call_depth() as i64)))
            },
            crate::ArgSpec::none(),
        );
        assert!(grb.active.get().is_none());
        grb.load_string("depth").expect("depth");
        assert!(grb.active.get().is_none());
    }

    #[test]
    fn test_canonical_values() {
        let grb = Garnet::open().expect("open");
        assert_eq!(grb.true_value().raw(), MrbValue::True);
        assert_eq!(grb.false_value().raw(), MrbValue::False);
        assert!(grb.nil_value().raw().is_nil());
    }

    #[test]
    fn test_load_file_once() {
        let grb = Garnet::open().expect("open");
        let ctx = grb.load_file("counter.rb", "$count = ($count || 0) + 1").expect("load");
        assert_eq!(ctx.as_ref().and_then(|c| c.filename()), Some("counter.rb"));
        assert!(grb.load_file("counter.rb", "$count = ($count || 0) + 1").expect("load").is_none());
        let count: i64 = grb.get_global_variable("$count").to_host().expect("int");
        assert_eq!(count, 1);
    }

    #[test]
    fn test_failed_file_can_be_retried() {
        let grb = Garnet::open().expect("open");
        assert!(grb.load_file("bad.rb", "raise 'nope'").is_err());
        assert!(grb.load_file("bad.rb", "1").expect("load").is_some());
    }

    #[test]
    fn test_lookup_missing_class_is_an_error() {
        let grb = Garnet::open().expect("open");
        let err = grb.class("Missing", None).unwrap_err();
        let exc = err.exception().expect("guest exception");
        assert!(exc.message().contains("Missing"), "{}", exc.message());
        // The pending exception was cleared.
        assert!(grb.load_string("1").is_ok());
    }
}
