//! Interpreter state and the embedding API.
//!
//! [`MrbState`] owns one guest: heap, symbol table, globals, class hierarchy
//! and the call-info stack. The public methods follow mruby's C API
//! conventions: operations that may run guest code return a value and leave
//! any raised exception in the pending-exception slot ([`MrbState::exc`])
//! instead of returning an error.

use crate::builtins;
use crate::context::MrbcContext;
use crate::gc::{GcStats, Heap};
use crate::interp::{Eval, Unwind};
use crate::object::*;
use crate::parser::{self, ParseOutcome};
use crate::symbol::SymbolTable;
use crate::value::{Aspec, MrbVType, MrbValue, ObjRef, Sym};
use log::{debug, trace};
use rustc_hash::FxHashMap;
use std::sync::Arc;

/// Native method entry point, called with the state and the receiver.
pub type NativeFn = extern "C" fn(*mut MrbState, MrbValue) -> MrbValue;

/// Method implemented inside the interpreter.
pub type BuiltinFn = fn(&mut MrbState, MrbValue, &[MrbValue], Option<MrbValue>) -> Eval<MrbValue>;

/// Options for opening an interpreter.
#[derive(Debug, Clone)]
pub struct VmOptions {
    /// Allocations between automatic collection cycles.
    pub gc_threshold: usize,

    /// Heap slots swept per incremental step.
    pub gc_step_slots: usize,

    /// Maximum call depth before `SystemStackError`.
    pub max_call_depth: usize,

    /// Initial arena capacity.
    pub arena_capacity: usize,
}

impl Default for VmOptions {
    fn default() -> Self {
        Self {
            gc_threshold: 1024,
            gc_step_slots: 256,
            max_call_depth: 128,
            arena_capacity: 100,
        }
    }
}

// ============================================================================
// Call frames
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FrameKind {
    Top,
    ClassBody,
    Method,
    Block,
    Native,
}

#[derive(Debug, Clone)]
pub(crate) struct CallInfo {
    pub kind: FrameKind,
    pub mid: Option<Sym>,
    /// Class the running method was found in.
    pub target_class: Option<ObjRef>,
    pub self_val: MrbValue,
    pub args: Vec<MrbValue>,
    pub block: Option<MrbValue>,
    pub env: Option<ObjRef>,
    /// Lexical class for constants and `def`.
    pub cref: ObjRef,
    pub file: Option<Arc<str>>,
    pub line: u32,
    /// `return` target.
    pub tag: u64,
}

// ============================================================================
// Well-known classes and symbols
// ============================================================================

#[derive(Debug, Clone, Copy)]
pub(crate) struct CoreClasses {
    pub object: ObjRef,
    pub module: ObjRef,
    pub class: ObjRef,
    pub kernel: ObjRef,
    pub comparable: ObjRef,
    pub nil: ObjRef,
    pub true_class: ObjRef,
    pub false_class: ObjRef,
    pub numeric: ObjRef,
    pub integer: ObjRef,
    pub float: ObjRef,
    pub string: ObjRef,
    pub symbol: ObjRef,
    pub array: ObjRef,
    pub hash: ObjRef,
    pub range: ObjRef,
    pub proc_class: ObjRef,
    pub gc: ObjRef,
    pub exception: ObjRef,
    pub standard_error: ObjRef,
    pub runtime_error: ObjRef,
    pub argument_error: ObjRef,
    pub type_error: ObjRef,
    pub name_error: ObjRef,
    pub no_method_error: ObjRef,
    pub zero_division_error: ObjRef,
    pub index_error: ObjRef,
    pub key_error: ObjRef,
    pub range_error: ObjRef,
    pub local_jump_error: ObjRef,
    pub frozen_error: ObjRef,
    pub script_error: ObjRef,
    pub syntax_error: ObjRef,
    pub not_implemented_error: ObjRef,
    pub system_stack_error: ObjRef,
}

impl CoreClasses {
    fn all(&self) -> [ObjRef; 35] {
        [
            self.object,
            self.module,
            self.class,
            self.kernel,
            self.comparable,
            self.nil,
            self.true_class,
            self.false_class,
            self.numeric,
            self.integer,
            self.float,
            self.string,
            self.symbol,
            self.array,
            self.hash,
            self.range,
            self.proc_class,
            self.gc,
            self.exception,
            self.standard_error,
            self.runtime_error,
            self.argument_error,
            self.type_error,
            self.name_error,
            self.no_method_error,
            self.zero_division_error,
            self.index_error,
            self.key_error,
            self.range_error,
            self.local_jump_error,
            self.frozen_error,
            self.script_error,
            self.syntax_error,
            self.not_implemented_error,
            self.system_stack_error,
        ]
    }
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct CommonSyms {
    pub initialize: Sym,
    pub to_s: Sym,
    pub inspect: Sym,
    pub eq: Sym,
    pub eqq: Sym,
    pub cmp: Sym,
    pub to_proc: Sym,
    pub hash_default: Sym,
    pub hash_default_proc: Sym,
    pub message: Sym,
    pub backtrace: Sym,
}

// ============================================================================
// MrbState
// ============================================================================

/// One guest interpreter.
pub struct MrbState {
    pub(crate) symbols: SymbolTable,
    pub(crate) heap: Heap,
    pub(crate) globals: FxHashMap<Sym, MrbValue>,
    pub(crate) core: CoreClasses,
    pub(crate) syms: CommonSyms,
    pub(crate) top_self: MrbValue,
    pub(crate) ci: Vec<CallInfo>,
    /// Pending exception.
    pub(crate) exc: Option<MrbValue>,
    /// Top-level locals of the most recent run.
    pub(crate) kept_env: Option<ObjRef>,
    next_tag: u64,
    pub(crate) options: VmOptions,
}

impl std::fmt::Debug for MrbState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MrbState")
            .field("live_objects", &self.heap.live_count())
            .field("call_depth", &self.ci.len())
            .field("exc", &self.exc)
            .finish()
    }
}

impl MrbState {
    /// Open an interpreter with the core classes and builtin methods
    /// installed. The box keeps the state's address stable.
    pub fn open(options: VmOptions) -> Box<MrbState> {
        let mut symbols = SymbolTable::new();
        let mut heap = Heap::new(options.gc_threshold, options.gc_step_slots, options.arena_capacity);
        let core = bootstrap(&mut heap, &mut symbols);
        let syms = CommonSyms {
            initialize: symbols.intern("initialize"),
            to_s: symbols.intern("to_s"),
            inspect: symbols.intern("inspect"),
            eq: symbols.intern("=="),
            eqq: symbols.intern("==="),
            cmp: symbols.intern("<=>"),
            to_proc: symbols.intern("to_proc"),
            hash_default: symbols.intern("__default"),
            hash_default_proc: symbols.intern("__default_proc"),
            message: symbols.intern("@message"),
            backtrace: symbols.intern("@backtrace"),
        };
        let top_self = MrbValue::Object(heap.alloc(RObject::new(core.object, ObjKind::Object)));
        let mut state = Box::new(MrbState {
            symbols,
            heap,
            globals: FxHashMap::default(),
            core,
            syms,
            top_self,
            ci: Vec::new(),
            exc: None,
            kept_env: None,
            next_tag: 1,
            options,
        });
        let base = state.base_frame();
        state.ci.push(base);
        // Classes carry a singleton from birth so class methods inherit.
        for class in state.core.all() {
            let _ = state.singleton_class_of(MrbValue::Object(class));
        }
        builtins::init(&mut state);
        state.heap.arena_restore(0);
        debug!("guest interpreter opened: {} core objects", state.heap.live_count());
        state
    }

    pub fn options(&self) -> &VmOptions {
        &self.options
    }

    fn base_frame(&mut self) -> CallInfo {
        CallInfo {
            kind: FrameKind::Top,
            mid: None,
            target_class: None,
            self_val: self.top_self,
            args: Vec::new(),
            block: None,
            env: None,
            cref: self.core.object,
            file: None,
            line: 0,
            tag: self.fresh_tag(),
        }
    }

    pub(crate) fn fresh_tag(&mut self) -> u64 {
        let tag = self.next_tag;
        self.next_tag += 1;
        tag
    }

    // ========================================================================
    // Symbols
    // ========================================================================

    pub fn intern(&mut self, name: &str) -> Sym {
        self.symbols.intern(name)
    }

    pub fn sym_name(&self, sym: Sym) -> &str {
        self.symbols.name(sym)
    }

    // ========================================================================
    // Heap helpers
    // ========================================================================

    pub(crate) fn obj(&self, v: MrbValue) -> Option<&RObject> {
        v.as_obj().and_then(|r| self.heap.get(r))
    }

    pub(crate) fn obj_mut(&mut self, v: MrbValue) -> Option<&mut RObject> {
        v.as_obj().and_then(|r| self.heap.get_mut(r))
    }

    pub(crate) fn str_ref(&self, v: MrbValue) -> Option<&str> {
        match &self.obj(v)?.kind {
            ObjKind::String(s) => Some(s),
            _ => None,
        }
    }

    pub(crate) fn str_mut(&mut self, v: MrbValue) -> Option<&mut String> {
        match &mut self.obj_mut(v)?.kind {
            ObjKind::String(s) => Some(s),
            _ => None,
        }
    }

    pub(crate) fn ary_ref(&self, v: MrbValue) -> Option<&Vec<MrbValue>> {
        match &self.obj(v)?.kind {
            ObjKind::Array(items) => Some(items),
            _ => None,
        }
    }

    pub(crate) fn ary_mut(&mut self, v: MrbValue) -> Option<&mut Vec<MrbValue>> {
        match &mut self.obj_mut(v)?.kind {
            ObjKind::Array(items) => Some(items),
            _ => None,
        }
    }

    pub(crate) fn hash_ref(&self, v: MrbValue) -> Option<&RHash> {
        match &self.obj(v)?.kind {
            ObjKind::Hash(h) => Some(h),
            _ => None,
        }
    }

    pub(crate) fn hash_mut(&mut self, v: MrbValue) -> Option<&mut RHash> {
        match &mut self.obj_mut(v)?.kind {
            ObjKind::Hash(h) => Some(h),
            _ => None,
        }
    }

    pub(crate) fn range_ref(&self, v: MrbValue) -> Option<RRange> {
        match &self.obj(v)?.kind {
            ObjKind::Range(r) => Some(*r),
            _ => None,
        }
    }

    pub(crate) fn proc_ref(&self, v: MrbValue) -> Option<&RProc> {
        match &self.obj(v)?.kind {
            ObjKind::Proc(p) => Some(p),
            _ => None,
        }
    }

    pub(crate) fn class_data(&self, r: ObjRef) -> Option<&RClass> {
        match &self.heap.get(r)?.kind {
            ObjKind::Class(c) | ObjKind::Module(c) | ObjKind::SClass(c) => Some(c),
            _ => None,
        }
    }

    pub(crate) fn class_data_mut(&mut self, r: ObjRef) -> Option<&mut RClass> {
        match &mut self.heap.get_mut(r)?.kind {
            ObjKind::Class(c) | ObjKind::Module(c) | ObjKind::SClass(c) => Some(c),
            _ => None,
        }
    }

    pub(crate) fn alloc(&mut self, class: ObjRef, kind: ObjKind) -> MrbValue {
        MrbValue::Object(self.heap.alloc(RObject::new(class, kind)))
    }

    pub(crate) fn new_str(&mut self, s: impl Into<String>) -> MrbValue {
        let class = self.core.string;
        self.alloc(class, ObjKind::String(s.into()))
    }

    pub(crate) fn new_ary(&mut self, items: Vec<MrbValue>) -> MrbValue {
        let class = self.core.array;
        self.alloc(class, ObjKind::Array(items))
    }

    pub(crate) fn new_hash(&mut self) -> MrbValue {
        let class = self.core.hash;
        self.alloc(class, ObjKind::Hash(Box::new(RHash::new())))
    }

    pub(crate) fn new_range(&mut self, begin: MrbValue, end: MrbValue, exclusive: bool) -> MrbValue {
        let class = self.core.range;
        self.alloc(
            class,
            ObjKind::Range(RRange {
                begin,
                end,
                exclusive,
            }),
        )
    }

    pub(crate) fn new_env(&mut self, size: usize, parent: Option<ObjRef>) -> ObjRef {
        let class = self.core.object;
        let env = REnv {
            vars: vec![MrbValue::Nil; size],
            parent,
        };
        self.heap.alloc(RObject::new(class, ObjKind::Env(env)))
    }

    pub(crate) fn new_proc(&mut self, proc: RProc) -> MrbValue {
        let class = self.core.proc_class;
        self.alloc(class, ObjKind::Proc(Box::new(proc)))
    }

    pub(crate) fn hash_key(&self, v: MrbValue) -> HashKey {
        match v {
            MrbValue::Nil => HashKey::Nil,
            MrbValue::True => HashKey::True,
            MrbValue::False => HashKey::False,
            MrbValue::Undef => HashKey::Undef,
            MrbValue::Fixnum(n) => HashKey::Int(n),
            MrbValue::Float(f) => HashKey::Float(f.to_bits()),
            MrbValue::Symbol(s) => HashKey::Sym(s),
            MrbValue::Object(r) => match self.str_ref(v) {
                Some(s) => HashKey::Str(s.to_string()),
                None => HashKey::Obj(r),
            },
        }
    }

    // ========================================================================
    // Classes
    // ========================================================================

    /// The class pointer of `v`, which may be a singleton class.
    pub fn class_of(&self, v: MrbValue) -> ObjRef {
        match v {
            MrbValue::Nil => self.core.nil,
            MrbValue::True => self.core.true_class,
            MrbValue::False => self.core.false_class,
            MrbValue::Fixnum(_) => self.core.integer,
            MrbValue::Float(_) => self.core.float,
            MrbValue::Symbol(_) => self.core.symbol,
            MrbValue::Undef => self.core.object,
            MrbValue::Object(r) => self.heap.get(r).map(|o| o.class).unwrap_or(self.core.object),
        }
    }

    /// The class of `v` with singleton classes skipped.
    pub fn obj_class(&self, v: MrbValue) -> ObjRef {
        let mut c = self.class_of(v);
        while self.is_singleton(c) {
            match self.class_data(c).and_then(|d| d.superclass) {
                Some(sup) => c = sup,
                None => break,
            }
        }
        c
    }

    pub fn is_singleton(&self, c: ObjRef) -> bool {
        matches!(self.heap.get(c).map(|o| &o.kind), Some(ObjKind::SClass(_)))
    }

    pub fn is_module(&self, c: ObjRef) -> bool {
        matches!(self.heap.get(c).map(|o| &o.kind), Some(ObjKind::Module(_)))
    }

    /// Whether `v` is a class, module or singleton class.
    pub fn is_class_like(&self, v: MrbValue) -> bool {
        v.as_obj().and_then(|r| self.class_data(r)).is_some()
    }

    /// The object a singleton class is attached to.
    pub fn singleton_attached(&self, c: ObjRef) -> Option<MrbValue> {
        self.class_data(c).and_then(|d| d.attached)
    }

    /// The singleton class of `v`, created on demand. Immediates have none;
    /// `None` is returned with a `TypeError` pending.
    pub fn singleton_class(&mut self, v: MrbValue) -> Option<ObjRef> {
        match self.singleton_class_of(v) {
            Ok(c) => Some(c),
            Err(u) => {
                self.exc = Some(self.unwind_to_exception(u));
                None
            }
        }
    }

    pub(crate) fn singleton_class_of(&mut self, v: MrbValue) -> Eval<ObjRef> {
        let Some(r) = v.as_obj().filter(|r| self.heap.is_live(*r)) else {
            return Err(self.type_error("can't define singleton"));
        };
        let current = self.class_of(v);
        if self.singleton_attached(current).is_some_and(|a| a.identical(v)) && self.is_singleton(current) {
            return Ok(current);
        }
        let superclass = if self.class_data(r).is_some() && !self.is_module(r) {
            // Class methods inherit: the singleton's superclass is the
            // superclass's singleton.
            match self.class_data(r).and_then(|d| d.superclass) {
                Some(sup) => self.singleton_class_of(MrbValue::Object(sup))?,
                None => self.core.class,
            }
        } else {
            current
        };
        let mut data = RClass::new(None, Some(superclass), InstanceType::Object);
        data.attached = Some(v);
        let class_class = self.core.class;
        let sclass = self.heap.alloc(RObject::new(class_class, ObjKind::SClass(Box::new(data))));
        if let Some(obj) = self.heap.get_mut(r) {
            obj.class = sclass;
        }
        Ok(sclass)
    }

    /// Full name of a class, `Outer::Inner` for nested ones.
    pub fn class_name(&self, c: ObjRef) -> String {
        let Some(data) = self.class_data(c) else {
            return String::new();
        };
        if let Some(attached) = data.attached {
            let inner = match attached.as_obj() {
                Some(a) if self.class_data(a).is_some() => self.class_name(a),
                _ => {
                    let cls = self.obj_class(attached);
                    self.class_name(cls)
                }
            };
            return format!("#<Class:{}>", inner);
        }
        match data.name {
            Some(name) => {
                let base = self.sym_name(name);
                match data.outer {
                    Some(outer) if outer != self.core.object => {
                        format!("{}::{}", self.class_name(outer), base)
                    }
                    _ => base.to_string(),
                }
            }
            None => {
                let kind = if self.is_module(c) { "Module" } else { "Class" };
                format!("#<{}:0x{:08x}>", kind, c.index())
            }
        }
    }

    pub fn object_class(&self) -> ObjRef {
        self.core.object
    }

    pub fn kernel_module(&self) -> ObjRef {
        self.core.kernel
    }

    pub fn top_self(&self) -> MrbValue {
        self.top_self
    }

    /// A constant defined directly in `outer`.
    pub fn const_get_at(&self, outer: ObjRef, sym: Sym) -> Option<MrbValue> {
        self.class_data(outer).and_then(|d| d.consts.get(&sym).copied())
    }

    /// Constant lookup through `outer` and its ancestors.
    pub fn const_get(&self, outer: ObjRef, sym: Sym) -> Option<MrbValue> {
        let mut cur = Some(outer);
        while let Some(c) = cur {
            let data = self.class_data(c)?;
            if let Some(v) = data.consts.get(&sym) {
                return Some(*v);
            }
            for &m in data.includes.iter().rev() {
                if let Some(v) = self.const_get_at(m, sym) {
                    return Some(v);
                }
            }
            cur = data.superclass;
        }
        if self.is_module(outer) {
            return self.const_get_at(self.core.object, sym);
        }
        None
    }

    pub fn const_defined(&self, outer: ObjRef, sym: Sym) -> bool {
        self.const_get(outer, sym).is_some()
    }

    pub fn define_const(&mut self, outer: ObjRef, name: &str, v: MrbValue) {
        let sym = self.intern(name);
        self.set_const(outer, sym, v);
    }

    pub(crate) fn set_const(&mut self, outer: ObjRef, sym: Sym, v: MrbValue) {
        if let Some(data) = self.class_data_mut(outer) {
            data.consts.insert(sym, v);
        }
        // Anonymous classes take the name of the first constant they are
        // assigned to.
        if let Some(r) = v.as_obj() {
            let object = self.core.object;
            if let Some(data) = self.class_data_mut(r) {
                if data.name.is_none() && data.attached.is_none() {
                    data.name = Some(sym);
                    if outer != object {
                        data.outer = Some(outer);
                    }
                }
            }
        }
    }

    /// Bind a new named class or module to `sym` in `outer`, recording
    /// `outer` as its lexical parent for constant lookup.
    pub(crate) fn bind_class(&mut self, outer: ObjRef, sym: Sym, class: ObjRef) {
        self.set_const(outer, sym, MrbValue::Object(class));
        if outer != self.core.object {
            if let Some(data) = self.class_data_mut(class) {
                data.outer = Some(outer);
            }
        }
    }

    /// Look up a class constant in `outer`; `None` with a `NameError`
    /// pending when it is missing or not a class.
    pub fn class_get_under(&mut self, outer: ObjRef, name: &str) -> Option<ObjRef> {
        let sym = self.intern(name);
        let found = self
            .const_get(outer, sym)
            .and_then(|v| v.as_obj())
            .filter(|r| self.class_data(*r).is_some() && !self.is_module(*r));
        if found.is_none() {
            let err = self.name_error(format!("uninitialized constant {}", name));
            self.exc = Some(self.unwind_to_exception(err));
        }
        found
    }

    pub fn class_get(&mut self, name: &str) -> Option<ObjRef> {
        let object = self.core.object;
        self.class_get_under(object, name)
    }

    /// Look up a module constant; `None` with a `NameError` pending when it
    /// is missing or not a module.
    pub fn module_get_under(&mut self, outer: ObjRef, name: &str) -> Option<ObjRef> {
        let sym = self.intern(name);
        let found = self
            .const_get(outer, sym)
            .and_then(|v| v.as_obj())
            .filter(|r| self.is_module(*r));
        if found.is_none() {
            let err = self.name_error(format!("uninitialized constant {}", name));
            self.exc = Some(self.unwind_to_exception(err));
        }
        found
    }

    pub fn module_get(&mut self, name: &str) -> Option<ObjRef> {
        let object = self.core.object;
        self.module_get_under(object, name)
    }

    /// Define (or reopen) class `name` under `outer`.
    pub fn define_class_under(&mut self, outer: ObjRef, name: &str, superclass: ObjRef) -> ObjRef {
        let sym = self.intern(name);
        if let Some(existing) = self
            .const_get_at(outer, sym)
            .and_then(|v| v.as_obj())
            .filter(|r| self.class_data(*r).is_some() && !self.is_module(*r))
        {
            return existing;
        }
        let instance_type = self
            .class_data(superclass)
            .map(|d| d.instance_type)
            .unwrap_or(InstanceType::Object);
        let class = self.new_class(Some(sym), Some(superclass), instance_type);
        self.bind_class(outer, sym, class);
        debug!("defined class {}", self.class_name(class));
        class
    }

    pub fn define_class(&mut self, name: &str, superclass: ObjRef) -> ObjRef {
        let object = self.core.object;
        self.define_class_under(object, name, superclass)
    }

    pub fn define_module_under(&mut self, outer: ObjRef, name: &str) -> ObjRef {
        let sym = self.intern(name);
        if let Some(existing) = self
            .const_get_at(outer, sym)
            .and_then(|v| v.as_obj())
            .filter(|r| self.is_module(*r))
        {
            return existing;
        }
        let module = self.new_module(Some(sym));
        self.bind_class(outer, sym, module);
        debug!("defined module {}", self.class_name(module));
        module
    }

    pub fn define_module(&mut self, name: &str) -> ObjRef {
        let object = self.core.object;
        self.define_module_under(object, name)
    }

    pub(crate) fn new_class(&mut self, name: Option<Sym>, superclass: Option<ObjRef>, it: InstanceType) -> ObjRef {
        let data = RClass::new(name, superclass, it);
        let class_class = self.core.class;
        let class = self.heap.alloc(RObject::new(class_class, ObjKind::Class(Box::new(data))));
        let _ = self.singleton_class_of(MrbValue::Object(class));
        class
    }

    pub(crate) fn new_module(&mut self, name: Option<Sym>) -> ObjRef {
        let data = RClass::new(name, None, InstanceType::Object);
        let module_class = self.core.module;
        self.heap.alloc(RObject::new(module_class, ObjKind::Module(Box::new(data))))
    }

    /// Install a native method on `class`.
    pub fn define_method(&mut self, class: ObjRef, mid: Sym, func: NativeFn, aspec: Aspec) {
        trace!("native method {}#{}", self.class_name(class), self.sym_name(mid));
        if let Some(data) = self.class_data_mut(class) {
            data.methods.insert(
                mid,
                Method::Native(NativeMethod {
                    func,
                    aspec,
                    mid,
                    owner: class,
                }),
            );
        }
    }

    /// Install a native method on the singleton class of `class`.
    pub fn define_class_method(&mut self, class: ObjRef, mid: Sym, func: NativeFn, aspec: Aspec) {
        if let Some(sclass) = self.singleton_class(MrbValue::Object(class)) {
            self.define_method(sclass, mid, func, aspec);
        }
    }

    pub(crate) fn define_builtin(&mut self, class: ObjRef, name: &str, func: BuiltinFn) {
        let mid = self.intern(name);
        if let Some(data) = self.class_data_mut(class) {
            data.methods.insert(mid, Method::Builtin(func));
        }
    }

    pub(crate) fn define_singleton_builtin(&mut self, class: ObjRef, name: &str, func: BuiltinFn) {
        if let Ok(sclass) = self.singleton_class_of(MrbValue::Object(class)) {
            self.define_builtin(sclass, name, func);
        }
    }

    pub fn include_module(&mut self, class: ObjRef, module: ObjRef) {
        if let Some(data) = self.class_data_mut(class) {
            if !data.includes.contains(&module) {
                data.includes.push(module);
            }
        }
    }

    /// Include `module` into the singleton class of `obj`.
    pub fn extend_object(&mut self, obj: MrbValue, module: ObjRef) {
        if let Some(sclass) = self.singleton_class(obj) {
            self.include_module(sclass, module);
        }
    }

    /// Ancestors in method resolution order.
    pub(crate) fn ancestors(&self, class: ObjRef) -> Vec<ObjRef> {
        fn push_module(st: &MrbState, m: ObjRef, out: &mut Vec<ObjRef>) {
            if out.contains(&m) {
                return;
            }
            out.push(m);
            if let Some(data) = st.class_data(m) {
                for &inner in data.includes.iter().rev() {
                    push_module(st, inner, out);
                }
            }
        }
        let mut out = Vec::new();
        let mut cur = Some(class);
        while let Some(c) = cur {
            let Some(data) = self.class_data(c) else {
                break;
            };
            out.push(c);
            for &m in data.includes.iter().rev() {
                push_module(self, m, &mut out);
            }
            cur = data.superclass;
        }
        out
    }

    /// Find `mid` starting at `class`. Returns the method and its owner.
    pub(crate) fn find_method(&self, class: ObjRef, mid: Sym) -> Option<(Method, ObjRef)> {
        fn in_module(st: &MrbState, m: ObjRef, mid: Sym, depth: usize) -> Option<(Method, ObjRef)> {
            let data = st.class_data(m)?;
            if let Some(method) = data.methods.get(&mid) {
                return Some((method.clone(), m));
            }
            if depth > 32 {
                return None;
            }
            data.includes
                .iter()
                .rev()
                .find_map(|&inner| in_module(st, inner, mid, depth + 1))
        }
        let mut cur = Some(class);
        while let Some(c) = cur {
            let data = self.class_data(c)?;
            if let Some(method) = data.methods.get(&mid) {
                return match method {
                    Method::Undefined => None,
                    m => Some((m.clone(), c)),
                };
            }
            for &m in data.includes.iter().rev() {
                if let Some(found) = in_module(self, m, mid, 0) {
                    return match found.0 {
                        Method::Undefined => None,
                        _ => Some(found),
                    };
                }
            }
            cur = data.superclass;
        }
        None
    }

    pub fn respond_to(&self, v: MrbValue, mid: Sym) -> bool {
        self.find_method(self.class_of(v), mid).is_some()
    }

    /// Whether `v` is an instance of `class` or one of its descendants.
    pub fn obj_is_kind_of(&self, v: MrbValue, class: ObjRef) -> bool {
        self.ancestors(self.class_of(v)).contains(&class)
    }

    // ========================================================================
    // Values
    // ========================================================================

    pub fn vtype(&self, v: MrbValue) -> MrbVType {
        match v {
            MrbValue::Nil => MrbVType::Nil,
            MrbValue::False => MrbVType::False,
            MrbValue::True => MrbVType::True,
            MrbValue::Fixnum(_) => MrbVType::Fixnum,
            MrbValue::Float(_) => MrbVType::Float,
            MrbValue::Symbol(_) => MrbVType::Symbol,
            MrbValue::Undef => MrbVType::Undef,
            MrbValue::Object(r) => match self.heap.get(r).map(|o| &o.kind) {
                None => MrbVType::Free,
                Some(ObjKind::Object) => MrbVType::Object,
                Some(ObjKind::Class(_)) => MrbVType::Class,
                Some(ObjKind::Module(_)) => MrbVType::Module,
                Some(ObjKind::SClass(_)) => MrbVType::SClass,
                Some(ObjKind::Proc(_)) => MrbVType::Proc,
                Some(ObjKind::Array(_)) => MrbVType::Array,
                Some(ObjKind::Hash(_)) => MrbVType::Hash,
                Some(ObjKind::String(_)) => MrbVType::String,
                Some(ObjKind::Range(_)) => MrbVType::Range,
                Some(ObjKind::Exception) => MrbVType::Exception,
                Some(ObjKind::Env(_)) => MrbVType::Env,
            },
        }
    }

    pub fn str_new(&mut self, s: &str) -> MrbValue {
        self.new_str(s)
    }

    /// Contents of a guest string.
    pub fn string_value(&self, v: MrbValue) -> Option<&str> {
        self.str_ref(v)
    }

    /// Convert any value to a guest string through its `to_s` method.
    /// Returns nil with the exception pending when `to_s` raises.
    pub fn obj_as_string(&mut self, v: MrbValue) -> MrbValue {
        let result = self.to_s_value(v);
        self.settle(result)
    }

    /// Run `inspect` on a value.
    pub fn inspect(&mut self, v: MrbValue) -> MrbValue {
        let result = self.inspect_str(v).map(|s| self.new_str(s));
        self.settle(result)
    }

    pub fn ary_new(&mut self) -> MrbValue {
        self.new_ary(Vec::new())
    }

    pub fn ary_new_from(&mut self, items: &[MrbValue]) -> MrbValue {
        self.new_ary(items.to_vec())
    }

    pub fn ary_push(&mut self, ary: MrbValue, v: MrbValue) {
        if let Some(items) = self.ary_mut(ary) {
            items.push(v);
        }
    }

    pub fn ary_len(&self, ary: MrbValue) -> usize {
        self.ary_ref(ary).map(Vec::len).unwrap_or(0)
    }

    /// Element `idx`, or nil when out of range.
    pub fn ary_entry(&self, ary: MrbValue, idx: usize) -> MrbValue {
        self.ary_ref(ary)
            .and_then(|items| items.get(idx).copied())
            .unwrap_or(MrbValue::Nil)
    }

    pub fn hash_new(&mut self) -> MrbValue {
        self.new_hash()
    }

    /// Value stored under `key`, or `None` when absent.
    pub fn hash_fetch(&self, hash: MrbValue, key: MrbValue) -> Option<MrbValue> {
        let hk = self.hash_key(key);
        self.hash_ref(hash).and_then(|h| h.get(&hk))
    }

    pub fn hash_get(&self, hash: MrbValue, key: MrbValue) -> MrbValue {
        self.hash_fetch(hash, key).unwrap_or(MrbValue::Nil)
    }

    pub fn hash_contains(&self, hash: MrbValue, key: MrbValue) -> bool {
        let hk = self.hash_key(key);
        self.hash_ref(hash).is_some_and(|h| h.contains(&hk))
    }

    pub fn hash_set(&mut self, hash: MrbValue, key: MrbValue, value: MrbValue) {
        // String keys are copied so later mutation of the key object does not
        // change the entry.
        let key = match self.str_ref(key).map(str::to_string) {
            Some(s) => self.new_str(s),
            None => key,
        };
        let hk = self.hash_key(key);
        if let Some(h) = self.hash_mut(hash) {
            h.insert(hk, key, value);
        }
    }

    pub fn hash_delete_key(&mut self, hash: MrbValue, key: MrbValue) -> Option<MrbValue> {
        let hk = self.hash_key(key);
        self.hash_mut(hash).and_then(|h| h.remove(&hk))
    }

    /// Keys in insertion order, as a guest array.
    pub fn hash_keys(&mut self, hash: MrbValue) -> MrbValue {
        let keys = self.hash_ref(hash).map(RHash::keys).unwrap_or_default();
        self.new_ary(keys)
    }

    pub fn hash_len(&self, hash: MrbValue) -> usize {
        self.hash_ref(hash).map(RHash::len).unwrap_or(0)
    }

    pub fn iv_get(&self, obj: MrbValue, sym: Sym) -> MrbValue {
        self.obj(obj)
            .and_then(|o| o.ivars.get(&sym).copied())
            .unwrap_or(MrbValue::Nil)
    }

    pub fn iv_set(&mut self, obj: MrbValue, sym: Sym, v: MrbValue) {
        if let Some(o) = self.obj_mut(obj) {
            o.ivars.insert(sym, v);
        }
    }

    pub fn gv_get(&self, sym: Sym) -> MrbValue {
        self.globals.get(&sym).copied().unwrap_or(MrbValue::Nil)
    }

    pub fn gv_set(&mut self, sym: Sym, v: MrbValue) {
        self.globals.insert(sym, v);
    }

    /// Allocate an instance of `class` and run `initialize`. Returns nil with
    /// the exception pending on failure.
    pub fn obj_new(&mut self, class: ObjRef, args: &[MrbValue]) -> MrbValue {
        let result = self.instantiate(class, args, None);
        self.settle(result)
    }

    // ========================================================================
    // Execution
    // ========================================================================

    /// Parse `source`. With a context, its file name is used and its local
    /// variables are carried over (and updated on success).
    pub fn parse(&mut self, source: &str, cxt: Option<&mut MrbcContext>) -> ParseOutcome {
        match cxt {
            Some(cxt) => {
                let file = cxt.filename().map(Arc::from);
                let outcome = parser::parse(source, file, &cxt.locals);
                if outcome.is_ok() {
                    cxt.locals = outcome.locals.clone();
                }
                outcome
            }
            None => parser::parse(source, None, &[]),
        }
    }

    /// Wrap a parsed program into a proc runnable with [`MrbState::vm_run`].
    pub fn generate_code(&mut self, outcome: &ParseOutcome) -> MrbValue {
        let Some(tree) = outcome.tree.clone() else {
            return MrbValue::Nil;
        };
        let cref = self.core.object;
        let top_self = self.top_self;
        self.new_proc(RProc {
            body: ProcBody::Top(tree),
            env: None,
            self_val: top_self,
            block: None,
            cref,
            mid: None,
            home: None,
            break_tag: None,
            lambda: false,
        })
    }

    /// Slots a program proc uses: its locals plus the receiver slot.
    pub fn proc_stack_size(&self, proc: MrbValue) -> usize {
        match self.proc_ref(proc).map(|p| &p.body) {
            Some(ProcBody::Top(top)) => top.nlocals + 1,
            Some(ProcBody::Block(b)) => b.nlocals + 1,
            _ => 1,
        }
    }

    /// Run a program proc. The first `stack_keep - 1` locals are copied from
    /// the previous run so top-level variables survive between runs.
    pub fn vm_run(&mut self, proc: MrbValue, self_val: MrbValue, stack_keep: usize) -> MrbValue {
        let result = self.run_top(proc, self_val, stack_keep);
        self.settle(result)
    }

    /// Parse and run `source`. Syntax errors become a pending `SyntaxError`.
    pub fn load_string(&mut self, source: &str) -> MrbValue {
        let outcome = self.parse(source, None);
        self.load_outcome(&outcome, 0)
    }

    /// Like [`MrbState::load_string`], keeping locals in `cxt`.
    pub fn load_string_cxt(&mut self, source: &str, cxt: &mut MrbcContext) -> MrbValue {
        let keep = cxt.stack_keep();
        let outcome = self.parse(source, Some(cxt));
        self.load_outcome(&outcome, keep)
    }

    fn load_outcome(&mut self, outcome: &ParseOutcome, keep: usize) -> MrbValue {
        if let Some(err) = outcome.errors.first() {
            let class = self.core.syntax_error;
            let msg = format!("line {}:{}: {}", err.line, err.col, err.message);
            let exc = self.exc_new(class, &msg);
            self.exc = Some(exc);
            return MrbValue::Nil;
        }
        let Some(tree) = outcome.tree.clone() else {
            return MrbValue::Nil;
        };
        let top_self = self.top_self;
        let result = self.run_tree(tree, top_self, keep);
        self.settle(result)
    }

    /// Call `mid` on `recv`. Returns nil with the exception pending when the
    /// call raises.
    pub fn funcall(&mut self, recv: MrbValue, mid: Sym, args: &[MrbValue], block: Option<MrbValue>) -> MrbValue {
        let result = self.call_method(recv, mid, args, block);
        self.settle(result)
    }

    /// Call a block with `args`.
    pub fn yield_argv(&mut self, block: MrbValue, args: &[MrbValue]) -> MrbValue {
        let result = self.call_block(block, args);
        self.settle(result)
    }

    /// Make `def` and constant lookup inside `proc` target `class`.
    pub fn proc_set_target_class(&mut self, proc: MrbValue, class: ObjRef) {
        if let Some(ObjKind::Proc(p)) = self.obj_mut(proc).map(|o| &mut o.kind) {
            p.cref = class;
        }
    }

    pub fn is_proc(&self, v: MrbValue) -> bool {
        self.proc_ref(v).is_some()
    }

    /// Turn an evaluation result into an mruby-style return: the value, or
    /// nil with the exception pending.
    fn settle(&mut self, result: Eval<MrbValue>) -> MrbValue {
        match result {
            Ok(v) => {
                self.heap.protect(v);
                v
            }
            Err(u) => {
                let exc = self.unwind_to_exception(u);
                self.exc = Some(exc);
                MrbValue::Nil
            }
        }
    }

    // ========================================================================
    // Native calls
    // ========================================================================

    /// Method symbol and resolved class of the active frame.
    pub fn call_info(&self) -> Option<(Sym, ObjRef)> {
        let ci = self.ci.last()?;
        Some((ci.mid?, ci.target_class?))
    }

    /// Positional arguments of the active frame.
    pub fn get_args(&self) -> &[MrbValue] {
        self.ci.last().map(|ci| ci.args.as_slice()).unwrap_or(&[])
    }

    /// Block passed to the active frame.
    pub fn get_block(&self) -> Option<MrbValue> {
        self.ci.last().and_then(|ci| ci.block)
    }

    /// Current call depth.
    pub fn call_depth(&self) -> usize {
        self.ci.len()
    }

    /// File of the innermost guest frame that has one.
    pub fn called_from_file(&self) -> Option<&str> {
        self.ci.iter().rev().find_map(|ci| ci.file.as_deref())
    }

    // ========================================================================
    // Exceptions
    // ========================================================================

    pub fn exc(&self) -> Option<MrbValue> {
        self.exc
    }

    pub fn take_exc(&mut self) -> Option<MrbValue> {
        self.exc.take()
    }

    pub fn set_exc(&mut self, exc: MrbValue) {
        self.exc = Some(exc);
    }

    pub fn clear_exc(&mut self) {
        self.exc = None;
    }

    /// Allocate an exception of `class` with `msg`.
    pub fn exc_new(&mut self, class: ObjRef, msg: &str) -> MrbValue {
        let exc = self.alloc(class, ObjKind::Exception);
        let message = self.new_str(msg);
        let sym = self.syms.message;
        self.iv_set(exc, sym, message);
        exc
    }

    /// Look up an exception class by name.
    pub fn exception_class(&mut self, name: &str) -> Option<ObjRef> {
        let sym = self.intern(name);
        let exception = self.core.exception;
        self.const_get_at(self.core.object, sym)
            .and_then(|v| v.as_obj())
            .filter(|c| self.ancestors(*c).contains(&exception))
    }

    pub fn is_exception(&self, v: MrbValue) -> bool {
        matches!(self.obj(v).map(|o| &o.kind), Some(ObjKind::Exception))
    }

    /// Backtrace recorded on an exception when it was raised.
    pub fn exc_backtrace(&self, exc: MrbValue) -> Vec<String> {
        let bt = self.iv_get(exc, self.syms.backtrace);
        self.ary_ref(bt)
            .map(|items| {
                items
                    .iter()
                    .filter_map(|v| self.str_ref(*v).map(str::to_string))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Backtrace of the current call stack, innermost first.
    pub fn backtrace(&self) -> Vec<String> {
        let mut frames = Vec::new();
        for ci in self.ci.iter().rev() {
            let Some(file) = &ci.file else {
                continue;
            };
            let frame = match (ci.kind, ci.mid) {
                (FrameKind::Method, Some(mid)) => {
                    format!("{}:{}:in {}", file, ci.line, self.sym_name(mid))
                }
                (FrameKind::Block, Some(mid)) => {
                    format!("{}:{}:in block in {}", file, ci.line, self.sym_name(mid))
                }
                _ => format!("{}:{}", file, ci.line),
            };
            frames.push(frame);
        }
        frames
    }

    // ========================================================================
    // GC
    // ========================================================================

    pub fn arena_save(&self) -> usize {
        self.heap.arena_save()
    }

    pub fn arena_restore(&mut self, idx: usize) {
        trace!("arena restore {} -> {}", self.heap.arena_save(), idx);
        self.heap.arena_restore(idx);
    }

    /// Root `v` in the arena.
    pub fn gc_protect(&mut self, v: MrbValue) {
        self.heap.protect(v);
    }

    /// Enable automatic collection; returns whether it was disabled.
    pub fn enable_gc(&mut self) -> bool {
        self.heap.enable()
    }

    /// Disable collection; returns whether it was already disabled.
    pub fn disable_gc(&mut self) -> bool {
        self.heap.disable()
    }

    pub fn full_gc(&mut self) {
        let roots = self.gc_roots();
        self.heap.full_collect(&roots);
    }

    pub fn incremental_gc(&mut self) {
        let roots = self.gc_roots();
        self.heap.incremental_step(&roots);
    }

    pub fn live_object_count(&self) -> usize {
        self.heap.live_count()
    }

    pub fn gc_stats(&self) -> GcStats {
        self.heap.stats()
    }

    /// Whether the object behind `v` was collected. Immediates never die.
    pub fn is_dead(&self, v: MrbValue) -> bool {
        match v {
            MrbValue::Object(r) => !self.heap.is_live(r),
            _ => false,
        }
    }

    pub(crate) fn gc_roots(&self) -> Vec<MrbValue> {
        let mut roots: Vec<MrbValue> = self.core.all().iter().map(|c| MrbValue::Object(*c)).collect();
        roots.push(self.top_self);
        roots.extend(self.globals.values().copied());
        roots.extend(self.exc);
        roots.extend(self.kept_env.map(MrbValue::Object));
        for ci in &self.ci {
            roots.push(ci.self_val);
            roots.extend(ci.args.iter().copied());
            roots.extend(ci.block);
            roots.extend(ci.env.map(MrbValue::Object));
            roots.extend(ci.target_class.map(MrbValue::Object));
            roots.push(MrbValue::Object(ci.cref));
        }
        roots
    }

    /// Run a collection step if enough was allocated since the last one.
    pub(crate) fn maybe_gc(&mut self) {
        if self.heap.wants_collection() {
            self.incremental_gc();
        }
    }

    // ========================================================================
    // Error construction
    // ========================================================================

    pub(crate) fn raise_class(&mut self, class: ObjRef, msg: impl AsRef<str>) -> Unwind {
        let exc = self.exc_new(class, msg.as_ref());
        self.raise_value(exc)
    }

    pub(crate) fn arg_error(&mut self, msg: impl AsRef<str>) -> Unwind {
        let class = self.core.argument_error;
        self.raise_class(class, msg)
    }

    pub(crate) fn type_error(&mut self, msg: impl AsRef<str>) -> Unwind {
        let class = self.core.type_error;
        self.raise_class(class, msg)
    }

    pub(crate) fn name_error(&mut self, msg: impl AsRef<str>) -> Unwind {
        let class = self.core.name_error;
        self.raise_class(class, msg)
    }

    pub(crate) fn runtime_error(&mut self, msg: impl AsRef<str>) -> Unwind {
        let class = self.core.runtime_error;
        self.raise_class(class, msg)
    }

    pub(crate) fn index_error(&mut self, msg: impl AsRef<str>) -> Unwind {
        let class = self.core.index_error;
        self.raise_class(class, msg)
    }

    pub(crate) fn zero_div_error(&mut self) -> Unwind {
        let class = self.core.zero_division_error;
        self.raise_class(class, "divided by 0")
    }

    pub(crate) fn no_method_error(&mut self, mid: Sym) -> Unwind {
        let msg = format!("undefined method '{}'", self.sym_name(mid));
        let class = self.core.no_method_error;
        self.raise_class(class, msg)
    }

    /// Mark `exc` as raised here, recording a backtrace if it has none.
    pub(crate) fn raise_value(&mut self, exc: MrbValue) -> Unwind {
        let sym = self.syms.backtrace;
        if self.iv_get(exc, sym).is_nil() {
            let frames: Vec<MrbValue> = self
                .backtrace()
                .into_iter()
                .map(|f| self.new_str(f))
                .collect();
            let bt = self.new_ary(frames);
            self.iv_set(exc, sym, bt);
        }
        Unwind::Raise(exc)
    }

    /// Collapse any unwind that escaped to the top into an exception value.
    pub(crate) fn unwind_to_exception(&mut self, u: Unwind) -> MrbValue {
        match u {
            Unwind::Raise(exc) => exc,
            Unwind::Break(..) => {
                let class = self.core.local_jump_error;
                self.exc_new(class, "break from proc-closure")
            }
            Unwind::Next(_) | Unwind::Return(..) => {
                let class = self.core.local_jump_error;
                self.exc_new(class, "unexpected return")
            }
        }
    }
}

// ============================================================================
// Bootstrap
// ============================================================================

fn bootstrap(heap: &mut Heap, symbols: &mut SymbolTable) -> CoreClasses {
    // Object, Module and Class point at each other; allocate with a
    // placeholder class pointer and patch afterwards.
    let placeholder = ObjRef { index: 0, gen: 0 };
    let mut class_obj = |heap: &mut Heap, name: &str, sup: Option<ObjRef>, it: InstanceType| {
        let data = RClass::new(Some(symbols.intern(name)), sup, it);
        heap.alloc(RObject::new(placeholder, ObjKind::Class(Box::new(data))))
    };
    let object = class_obj(heap, "Object", None, InstanceType::Object);
    let module = class_obj(heap, "Module", Some(object), InstanceType::Object);
    let class = class_obj(heap, "Class", Some(module), InstanceType::Object);
    for r in [object, module, class] {
        if let Some(o) = heap.get_mut(r) {
            o.class = class;
        }
    }

    let mut define = |heap: &mut Heap, name: &str, sup: ObjRef, it: InstanceType| -> ObjRef {
        let sym = symbols.intern(name);
        let data = RClass::new(Some(sym), Some(sup), it);
        let r = heap.alloc(RObject::new(class, ObjKind::Class(Box::new(data))));
        if let Some(ObjKind::Class(o)) = heap.get_mut(object).map(|o| &mut o.kind) {
            o.consts.insert(sym, MrbValue::Object(r));
        }
        r
    };

    let nil = define(heap, "NilClass", object, InstanceType::Immediate);
    let true_class = define(heap, "TrueClass", object, InstanceType::Immediate);
    let false_class = define(heap, "FalseClass", object, InstanceType::Immediate);
    let numeric = define(heap, "Numeric", object, InstanceType::Immediate);
    let integer = define(heap, "Integer", numeric, InstanceType::Immediate);
    let float = define(heap, "Float", numeric, InstanceType::Immediate);
    let string = define(heap, "String", object, InstanceType::String);
    let symbol = define(heap, "Symbol", object, InstanceType::Immediate);
    let array = define(heap, "Array", object, InstanceType::Array);
    let hash = define(heap, "Hash", object, InstanceType::Hash);
    let range = define(heap, "Range", object, InstanceType::Immediate);
    let proc_class = define(heap, "Proc", object, InstanceType::Immediate);
    let exception = define(heap, "Exception", object, InstanceType::Exception);
    let script_error = define(heap, "ScriptError", exception, InstanceType::Exception);
    let syntax_error = define(heap, "SyntaxError", script_error, InstanceType::Exception);
    let not_implemented_error = define(heap, "NotImplementedError", script_error, InstanceType::Exception);
    let system_stack_error = define(heap, "SystemStackError", exception, InstanceType::Exception);
    let standard_error = define(heap, "StandardError", exception, InstanceType::Exception);
    let runtime_error = define(heap, "RuntimeError", standard_error, InstanceType::Exception);
    let argument_error = define(heap, "ArgumentError", standard_error, InstanceType::Exception);
    let type_error = define(heap, "TypeError", standard_error, InstanceType::Exception);
    let name_error = define(heap, "NameError", standard_error, InstanceType::Exception);
    let no_method_error = define(heap, "NoMethodError", name_error, InstanceType::Exception);
    let zero_division_error = define(heap, "ZeroDivisionError", standard_error, InstanceType::Exception);
    let index_error = define(heap, "IndexError", standard_error, InstanceType::Exception);
    let key_error = define(heap, "KeyError", index_error, InstanceType::Exception);
    let range_error = define(heap, "RangeError", standard_error, InstanceType::Exception);
    let local_jump_error = define(heap, "LocalJumpError", standard_error, InstanceType::Exception);
    let frozen_error = define(heap, "FrozenError", runtime_error, InstanceType::Exception);

    let mut module_obj = |heap: &mut Heap, name: &str| -> ObjRef {
        let sym = symbols.intern(name);
        let data = RClass::new(Some(sym), None, InstanceType::Object);
        let r = heap.alloc(RObject::new(module, ObjKind::Module(Box::new(data))));
        if let Some(ObjKind::Class(o)) = heap.get_mut(object).map(|o| &mut o.kind) {
            o.consts.insert(sym, MrbValue::Object(r));
        }
        r
    };
    let kernel = module_obj(heap, "Kernel");
    let comparable = module_obj(heap, "Comparable");
    let gc = module_obj(heap, "GC");

    // The three classes above were created before the constant table existed.
    let object_sym = symbols.intern("Object");
    let module_sym = symbols.intern("Module");
    let class_sym = symbols.intern("Class");
    if let Some(ObjKind::Class(o)) = heap.get_mut(object).map(|o| &mut o.kind) {
        o.consts.insert(object_sym, MrbValue::Object(object));
        o.consts.insert(module_sym, MrbValue::Object(module));
        o.consts.insert(class_sym, MrbValue::Object(class));
        o.includes.push(kernel);
    }

    CoreClasses {
        object,
        module,
        class,
        kernel,
        comparable,
        nil,
        true_class,
        false_class,
        numeric,
        integer,
        float,
        string,
        symbol,
        array,
        hash,
        range,
        proc_class,
        gc,
        exception,
        standard_error,
        runtime_error,
        argument_error,
        type_error,
        name_error,
        no_method_error,
        zero_division_error,
        index_error,
        key_error,
        range_error,
        local_jump_error,
        frozen_error,
        script_error,
        syntax_error,
        not_implemented_error,
        system_stack_error,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open() -> Box<MrbState> {
        MrbState::open(VmOptions::default())
    }

    #[test]
    fn test_core_constants_resolve() {
        let mut mrb = open();
        let object = mrb.object_class();
        for name in ["Object", "String", "Kernel", "ArgumentError", "GC"] {
            let sym = mrb.intern(name);
            assert!(mrb.const_defined(object, sym), "{} missing", name);
        }
        assert!(mrb.class_get("Kernel").is_none());
        assert!(mrb.take_exc().is_some());
        assert!(mrb.module_get("Kernel").is_some());
    }

    #[test]
    fn test_define_class_reopens() {
        let mut mrb = open();
        let object = mrb.object_class();
        let a = mrb.define_class("Hello", object);
        let b = mrb.define_class("Hello", object);
        assert_eq!(a, b);
        let inner = mrb.define_class_under(a, "World", object);
        assert_eq!(mrb.class_name(inner), "Hello::World");
    }

    #[test]
    fn test_singleton_class_is_cached() {
        let mut mrb = open();
        let top = mrb.top_self();
        let a = mrb.singleton_class(top).expect("singleton");
        let b = mrb.singleton_class(top).expect("singleton");
        assert_eq!(a, b);
        assert_eq!(mrb.singleton_attached(a), Some(top));
        assert_eq!(mrb.obj_class(top), mrb.object_class());
        assert!(mrb.singleton_class(MrbValue::Fixnum(1)).is_none());
        assert!(mrb.take_exc().is_some());
    }

    #[test]
    fn test_vtype_tags() {
        let mut mrb = open();
        let s = mrb.str_new("x");
        assert_eq!(mrb.vtype(s), MrbVType::String);
        assert_eq!(mrb.vtype(MrbValue::Nil), MrbVType::Nil);
        let object = MrbValue::Object(mrb.object_class());
        assert_eq!(mrb.vtype(object), MrbVType::Class);
        let kernel = MrbValue::Object(mrb.kernel_module());
        assert_eq!(mrb.vtype(kernel), MrbVType::Module);
    }

    #[test]
    fn test_hash_string_keys_by_content() {
        let mut mrb = open();
        let h = mrb.hash_new();
        let k1 = mrb.str_new("foo");
        let k2 = mrb.str_new("foo");
        mrb.hash_set(h, k1, MrbValue::Fixnum(1));
        assert_eq!(mrb.hash_get(h, k2), MrbValue::Fixnum(1));
        assert_eq!(mrb.hash_delete_key(h, k2), Some(MrbValue::Fixnum(1)));
        assert_eq!(mrb.hash_delete_key(h, k1), None);
    }
}
