//! Heap object layouts.

use crate::ast::{BlockDef, MethodDef, TopBody};
use crate::state::{BuiltinFn, NativeFn};
use crate::value::{Aspec, MrbValue, ObjRef, Sym};
use rustc_hash::FxHashMap;
use std::sync::Arc;

/// A heap-allocated guest object.
#[derive(Debug)]
pub struct RObject {
    /// Class pointer. Points at the singleton class once one exists.
    pub class: ObjRef,
    pub ivars: FxHashMap<Sym, MrbValue>,
    pub kind: ObjKind,
}

impl RObject {
    pub fn new(class: ObjRef, kind: ObjKind) -> Self {
        Self {
            class,
            ivars: FxHashMap::default(),
            kind,
        }
    }

    /// Push every heap reference held by this object.
    pub(crate) fn trace(&self, out: &mut Vec<ObjRef>) {
        out.push(self.class);
        for v in self.ivars.values() {
            push_value(out, *v);
        }
        match &self.kind {
            ObjKind::Object | ObjKind::Exception | ObjKind::String(_) => {}
            ObjKind::Class(c) | ObjKind::Module(c) | ObjKind::SClass(c) => c.trace(out),
            ObjKind::Proc(p) => p.trace(out),
            ObjKind::Array(items) => {
                for v in items {
                    push_value(out, *v);
                }
            }
            ObjKind::Hash(h) => {
                for (k, v) in &h.entries {
                    push_value(out, *k);
                    push_value(out, *v);
                }
            }
            ObjKind::Range(r) => {
                push_value(out, r.begin);
                push_value(out, r.end);
            }
            ObjKind::Env(env) => {
                for v in &env.vars {
                    push_value(out, *v);
                }
                if let Some(parent) = env.parent {
                    out.push(parent);
                }
            }
        }
    }
}

fn push_value(out: &mut Vec<ObjRef>, v: MrbValue) {
    if let MrbValue::Object(r) = v {
        out.push(r);
    }
}

#[derive(Debug)]
pub enum ObjKind {
    Object,
    Class(Box<RClass>),
    Module(Box<RClass>),
    SClass(Box<RClass>),
    Proc(Box<RProc>),
    Array(Vec<MrbValue>),
    Hash(Box<RHash>),
    String(String),
    Range(RRange),
    /// Message and backtrace live in ivars, as in mruby.
    Exception,
    Env(REnv),
}

/// What `Class#new` allocates for instances of a class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstanceType {
    Object,
    Exception,
    String,
    Array,
    Hash,
    /// Classes like Integer or Symbol that cannot be instantiated.
    Immediate,
}

#[derive(Debug)]
pub struct RClass {
    pub name: Option<Sym>,
    pub superclass: Option<ObjRef>,
    /// Lexically enclosing class or module.
    pub outer: Option<ObjRef>,
    pub methods: FxHashMap<Sym, Method>,
    pub consts: FxHashMap<Sym, MrbValue>,
    /// Included modules, most recent last.
    pub includes: Vec<ObjRef>,
    /// The object a singleton class belongs to.
    pub attached: Option<MrbValue>,
    pub instance_type: InstanceType,
}

impl RClass {
    pub fn new(name: Option<Sym>, superclass: Option<ObjRef>, instance_type: InstanceType) -> Self {
        Self {
            name,
            superclass,
            outer: None,
            methods: FxHashMap::default(),
            consts: FxHashMap::default(),
            includes: Vec::new(),
            attached: None,
            instance_type,
        }
    }

    fn trace(&self, out: &mut Vec<ObjRef>) {
        out.extend(self.superclass);
        out.extend(self.outer);
        out.extend(self.includes.iter().copied());
        if let Some(v) = self.attached {
            push_value(out, v);
        }
        for v in self.consts.values() {
            push_value(out, *v);
        }
        for m in self.methods.values() {
            match m {
                Method::Proc(p) => push_value(out, *p),
                Method::Native(n) => out.push(n.owner),
                _ => {}
            }
        }
    }
}

/// A method table entry.
#[derive(Debug, Clone)]
pub enum Method {
    Ruby(Arc<MethodDef>),
    Builtin(BuiltinFn),
    Native(NativeMethod),
    /// Defined with `define_method` and a block.
    Proc(MrbValue),
    AttrReader(Sym),
    AttrWriter(Sym),
    /// Tombstone left by `undef_method`.
    Undefined,
}

/// A host function installed with `define_method`.
///
/// `mid` and `owner` name the definition site. Copies made by
/// `alias_method` keep them, so native frames always report the symbol and
/// class the host registered.
#[derive(Debug, Clone, Copy)]
pub struct NativeMethod {
    pub func: NativeFn,
    pub aspec: Aspec,
    pub mid: Sym,
    pub owner: ObjRef,
}

#[derive(Debug, Clone)]
pub enum ProcBody {
    Block(Arc<BlockDef>),
    Top(Arc<TopBody>),
    /// `method(:name).to_proc` style forwarding onto a symbol.
    Symbol(Sym),
}

#[derive(Debug)]
pub struct RProc {
    pub body: ProcBody,
    /// Enclosing local variable environment.
    pub env: Option<ObjRef>,
    pub self_val: MrbValue,
    /// Block of the defining method frame, the target of `yield`.
    pub block: Option<MrbValue>,
    /// Lexical class for constant lookup and `def`.
    pub cref: ObjRef,
    /// Method the block was created in.
    pub mid: Option<Sym>,
    /// Frame tag that `return` unwinds to.
    pub home: Option<u64>,
    /// Tag of the call the block literal was passed to; `break` lands there.
    pub break_tag: Option<u64>,
    pub lambda: bool,
}

impl RProc {
    fn trace(&self, out: &mut Vec<ObjRef>) {
        out.extend(self.env);
        push_value(out, self.self_val);
        if let Some(b) = self.block {
            push_value(out, b);
        }
        out.push(self.cref);
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RRange {
    pub begin: MrbValue,
    pub end: MrbValue,
    pub exclusive: bool,
}

#[derive(Debug, Default)]
pub struct REnv {
    pub vars: Vec<MrbValue>,
    pub parent: Option<ObjRef>,
}

impl REnv {
    pub fn get(&self, idx: usize) -> MrbValue {
        self.vars.get(idx).copied().unwrap_or(MrbValue::Nil)
    }

    pub fn set(&mut self, idx: usize, v: MrbValue) {
        if idx >= self.vars.len() {
            self.vars.resize(idx + 1, MrbValue::Nil);
        }
        self.vars[idx] = v;
    }
}

/// Hash key identity: strings by content, numbers by value, objects by reference.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum HashKey {
    Nil,
    True,
    False,
    Undef,
    Int(i64),
    Float(u64),
    Sym(Sym),
    Str(String),
    Obj(ObjRef),
}

/// Insertion-ordered hash table.
#[derive(Debug, Default)]
pub struct RHash {
    pub entries: Vec<(MrbValue, MrbValue)>,
    index: FxHashMap<HashKey, usize>,
}

impl RHash {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn get(&self, key: &HashKey) -> Option<MrbValue> {
        self.index.get(key).map(|&i| self.entries[i].1)
    }

    pub fn contains(&self, key: &HashKey) -> bool {
        self.index.contains_key(key)
    }

    pub fn insert(&mut self, hkey: HashKey, key: MrbValue, value: MrbValue) {
        match self.index.get(&hkey) {
            Some(&i) => self.entries[i].1 = value,
            None => {
                self.index.insert(hkey, self.entries.len());
                self.entries.push((key, value));
            }
        }
    }

    pub fn remove(&mut self, key: &HashKey) -> Option<MrbValue> {
        let pos = self.index.remove(key)?;
        let (_, value) = self.entries.remove(pos);
        for i in self.index.values_mut() {
            if *i > pos {
                *i -= 1;
            }
        }
        Some(value)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.index.clear();
    }

    pub fn keys(&self) -> Vec<MrbValue> {
        self.entries.iter().map(|(k, _)| *k).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_preserves_insertion_order() {
        let mut h = RHash::new();
        h.insert(HashKey::Int(3), MrbValue::Fixnum(3), MrbValue::True);
        h.insert(HashKey::Int(1), MrbValue::Fixnum(1), MrbValue::False);
        h.insert(HashKey::Int(2), MrbValue::Fixnum(2), MrbValue::Nil);
        assert_eq!(
            h.keys(),
            vec![MrbValue::Fixnum(3), MrbValue::Fixnum(1), MrbValue::Fixnum(2)]
        );
    }

    #[test]
    fn test_hash_remove_reindexes() {
        let mut h = RHash::new();
        h.insert(HashKey::Int(1), MrbValue::Fixnum(1), MrbValue::Fixnum(10));
        h.insert(HashKey::Int(2), MrbValue::Fixnum(2), MrbValue::Fixnum(20));
        h.insert(HashKey::Int(3), MrbValue::Fixnum(3), MrbValue::Fixnum(30));
        assert_eq!(h.remove(&HashKey::Int(1)), Some(MrbValue::Fixnum(10)));
        assert_eq!(h.remove(&HashKey::Int(1)), None);
        assert_eq!(h.get(&HashKey::Int(3)), Some(MrbValue::Fixnum(30)));
        h.insert(HashKey::Int(2), MrbValue::Fixnum(2), MrbValue::Fixnum(21));
        assert_eq!(h.len(), 2);
        assert_eq!(h.get(&HashKey::Int(2)), Some(MrbValue::Fixnum(21)));
    }

    #[test]
    fn test_env_grows_on_set() {
        let mut env = REnv::default();
        env.set(3, MrbValue::True);
        assert_eq!(env.vars.len(), 4);
        assert_eq!(env.get(0), MrbValue::Nil);
        assert_eq!(env.get(9), MrbValue::Nil);
    }
}
