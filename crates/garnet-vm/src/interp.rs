//! Tree-walking evaluator.
//!
//! Non-local control flow (`raise`, `return`, `break`, `next`) travels up the
//! Rust stack as the `Err` side of [`Eval`]. Each construct that can stop an
//! unwind matches on the tag it owns:
//!
//! - method frames catch `Return` carrying their own tag;
//! - a call with a literal block catches `Break` carrying the tag stamped on
//!   that block;
//! - `while` catches untagged `Break` and `Next` raised directly in its body;
//! - block frames turn `Next` into the block's value.

use crate::ast::*;
use crate::object::*;
use crate::state::{CallInfo, FrameKind, MrbState};
use crate::value::{MrbValue, ObjRef, Sym};
use log::trace;
use std::sync::Arc;

/// Why evaluation stopped early.
#[derive(Debug, Clone, Copy)]
pub enum Unwind {
    Raise(MrbValue),
    /// `return` unwinding to the frame with this tag.
    Return(MrbValue, u64),
    /// `break`; the tag is filled in once the break leaves its block.
    Break(MrbValue, Option<u64>),
    Next(MrbValue),
}

pub type Eval<T> = Result<T, Unwind>;

/// Overrides applied when a proc runs as something other than a plain block.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Rebind {
    pub self_val: MrbValue,
    pub cref: Option<ObjRef>,
    /// Run as method `mid` found in the given class (`define_method`).
    pub method: Option<(Sym, ObjRef)>,
}

/// An evaluated assignment target.
enum Place {
    Local(LocalRef),
    Ivar(Sym),
    Gvar(Sym),
    Const(Sym),
    Index(MrbValue, Vec<MrbValue>),
    Attr(MrbValue, Sym),
}

impl MrbState {
    // ========================================================================
    // Frame access
    // ========================================================================

    pub(crate) fn self_val(&self) -> MrbValue {
        self.ci.last().map(|ci| ci.self_val).unwrap_or(self.top_self)
    }

    pub(crate) fn cur_cref(&self) -> ObjRef {
        self.ci.last().map(|ci| ci.cref).unwrap_or(self.core.object)
    }

    fn cur_tag(&self) -> u64 {
        self.ci.last().map(|ci| ci.tag).unwrap_or(0)
    }

    fn set_line(&mut self, line: u32) {
        if let Some(ci) = self.ci.last_mut() {
            ci.line = line;
        }
    }

    fn env_at(&self, depth: u32) -> Option<ObjRef> {
        let mut env = self.ci.last()?.env?;
        for _ in 0..depth {
            env = match &self.heap.get(env)?.kind {
                ObjKind::Env(e) => e.parent?,
                _ => return None,
            };
        }
        Some(env)
    }

    fn local_get(&self, r: LocalRef) -> MrbValue {
        self.env_at(r.depth)
            .and_then(|env| match &self.heap.get(env)?.kind {
                ObjKind::Env(e) => Some(e.get(r.index as usize)),
                _ => None,
            })
            .unwrap_or(MrbValue::Nil)
    }

    fn local_set(&mut self, r: LocalRef, v: MrbValue) {
        let Some(env) = self.env_at(r.depth) else {
            return;
        };
        if let Some(ObjKind::Env(e)) = self.heap.get_mut(env).map(|o| &mut o.kind) {
            e.set(r.index as usize, v);
        }
    }

    fn check_depth(&mut self) -> Eval<()> {
        if self.ci.len() >= self.options.max_call_depth {
            let class = self.core.system_stack_error;
            return Err(self.raise_class(class, "stack level too deep"));
        }
        Ok(())
    }

    // ========================================================================
    // Programs
    // ========================================================================

    /// Run a program proc created by `generate_code` (or any block proc).
    pub(crate) fn run_top(&mut self, proc: MrbValue, self_val: MrbValue, keep: usize) -> Eval<MrbValue> {
        let body = self.proc_ref(proc).map(|p| p.body.clone());
        match body {
            Some(ProcBody::Top(tree)) => self.run_tree(tree, self_val, keep),
            Some(_) => self.call_proc(
                proc,
                &[],
                None,
                Some(Rebind {
                    self_val,
                    cref: None,
                    method: None,
                }),
            ),
            None => Err(self.type_error("not a proc")),
        }
    }

    /// Run a parsed program at the top level. Outside of any other run the
    /// top-level environment is reused, keeping its first `keep - 1` slots.
    pub(crate) fn run_tree(&mut self, tree: Arc<TopBody>, self_val: MrbValue, keep: usize) -> Eval<MrbValue> {
        self.check_depth()?;
        let outermost = self.ci.len() <= 1;
        let kept = keep.saturating_sub(1);
        let reusable = self.kept_env.filter(|env| outermost && self.heap.is_live(*env));
        let env = match reusable {
            Some(env) => {
                if let Some(ObjKind::Env(e)) = self.heap.get_mut(env).map(|o| &mut o.kind) {
                    for v in e.vars.iter_mut().skip(kept) {
                        *v = MrbValue::Nil;
                    }
                    e.vars.resize(tree.nlocals.max(kept), MrbValue::Nil);
                }
                env
            }
            None => self.new_env(tree.nlocals, None),
        };
        if outermost {
            self.kept_env = Some(env);
        }
        let ai = self.heap.arena_save();
        let tag = self.fresh_tag();
        let cref = self.core.object;
        self.ci.push(CallInfo {
            kind: FrameKind::Top,
            mid: None,
            target_class: None,
            self_val,
            args: Vec::new(),
            block: None,
            env: Some(env),
            cref,
            file: tree.file.clone(),
            line: 1,
            tag,
        });
        let result = self.eval_body(&tree.body);
        self.ci.pop();
        self.heap.arena_restore(ai);
        match result {
            Err(Unwind::Return(v, t)) if t == tag => Ok(v),
            other => other,
        }
    }

    /// Evaluate statements. The arena is rewound before each statement and
    /// only the final value stays protected.
    pub(crate) fn eval_body(&mut self, body: &[Node]) -> Eval<MrbValue> {
        let ai = self.heap.arena_save();
        let mut last = MrbValue::Nil;
        for node in body {
            self.heap.arena_restore(ai);
            self.maybe_gc();
            self.set_line(node.line);
            last = self.eval(node)?;
        }
        self.heap.arena_restore(ai);
        self.heap.protect(last);
        Ok(last)
    }

    // ========================================================================
    // Expressions
    // ========================================================================

    pub(crate) fn eval(&mut self, node: &Node) -> Eval<MrbValue> {
        match &node.kind {
            NodeKind::Nil => Ok(MrbValue::Nil),
            NodeKind::True => Ok(MrbValue::True),
            NodeKind::False => Ok(MrbValue::False),
            NodeKind::SelfRef => Ok(self.self_val()),
            NodeKind::Int(n) => Ok(MrbValue::Fixnum(*n)),
            NodeKind::Float(f) => Ok(MrbValue::Float(*f)),
            NodeKind::Str(s) => Ok(self.new_str(s.as_str())),
            NodeKind::DStr(parts) => self.eval_dstr(parts),
            NodeKind::Sym(name) => Ok(MrbValue::Symbol(self.intern(name))),
            NodeKind::Array(items) => {
                let values = self.eval_args(items)?;
                Ok(self.new_ary(values))
            }
            NodeKind::Hash(pairs) => {
                let hash = self.new_hash();
                for (k, v) in pairs {
                    let key = self.eval(k)?;
                    let value = self.eval(v)?;
                    self.hash_set(hash, key, value);
                }
                Ok(hash)
            }
            NodeKind::Range { lo, hi, exclusive } => {
                let begin = self.eval(lo)?;
                let end = self.eval(hi)?;
                Ok(self.new_range(begin, end, *exclusive))
            }
            NodeKind::Splat(inner) => {
                let v = self.eval(inner)?;
                let items = self.splat(v)?;
                Ok(self.new_ary(items))
            }
            NodeKind::LocalGet(r) => Ok(self.local_get(*r)),
            NodeKind::LocalSet(r, value) => {
                let v = self.eval(value)?;
                self.local_set(*r, v);
                Ok(v)
            }
            NodeKind::IvarGet(name) => {
                let sym = self.intern(&format!("@{}", name));
                Ok(self.iv_get(self.self_val(), sym))
            }
            NodeKind::IvarSet(name, value) => {
                let v = self.eval(value)?;
                let sym = self.intern(&format!("@{}", name));
                let recv = self.self_val();
                self.iv_set(recv, sym, v);
                Ok(v)
            }
            NodeKind::GvarGet(name) => {
                let sym = self.intern(&format!("${}", name));
                Ok(self.gv_get(sym))
            }
            NodeKind::GvarSet(name, value) => {
                let v = self.eval(value)?;
                let sym = self.intern(&format!("${}", name));
                self.gv_set(sym, v);
                Ok(v)
            }
            NodeKind::Const { scope, top, name } => {
                let sym = self.intern(name);
                match (scope, top) {
                    (_, true) => {
                        let object = self.core.object;
                        self.scoped_const(object, sym)
                    }
                    (Some(scope), false) => {
                        let outer = self.eval(scope)?;
                        let outer = self.expect_class(outer)?;
                        self.scoped_const(outer, sym)
                    }
                    (None, false) => self.lookup_const(sym),
                }
            }
            NodeKind::ConstSet { scope, name, value } => {
                let outer = match scope {
                    Some(scope) => {
                        let v = self.eval(scope)?;
                        self.expect_class(v)?
                    }
                    None => self.def_target_class(),
                };
                let v = self.eval(value)?;
                let sym = self.intern(name);
                self.set_const(outer, sym, v);
                Ok(v)
            }
            NodeKind::Call(call) => self.eval_call(call, node.line),
            NodeKind::Super { args, block } => self.eval_super(args.as_deref(), block.as_ref()),
            NodeKind::Yield(args) => {
                let Some(block) = self.ci.last().and_then(|ci| ci.block) else {
                    let class = self.core.local_jump_error;
                    return Err(self.raise_class(class, "no block given (yield)"));
                };
                let args = self.eval_args(args)?;
                self.call_block(block, &args)
            }
            NodeKind::Not(inner) => Ok(MrbValue::from_bool(!self.eval(inner)?.truthy())),
            NodeKind::And(a, b) => {
                let left = self.eval(a)?;
                if left.truthy() {
                    self.eval(b)
                } else {
                    Ok(left)
                }
            }
            NodeKind::Or(a, b) => {
                let left = self.eval(a)?;
                if left.truthy() {
                    Ok(left)
                } else {
                    self.eval(b)
                }
            }
            NodeKind::If {
                cond,
                then_body,
                else_body,
            } => {
                if self.eval(cond)?.truthy() {
                    self.eval_seq(then_body)
                } else {
                    self.eval_seq(else_body)
                }
            }
            NodeKind::While { cond, body, until } => self.eval_while(cond, body, *until),
            NodeKind::Case {
                subject,
                whens,
                else_body,
            } => self.eval_case(subject.as_deref(), whens, else_body),
            NodeKind::Begin(begin) => self.eval_begin(begin),
            NodeKind::Seq(body) => self.eval_seq(body),
            NodeKind::Def { singleton, def } => {
                let target = match singleton {
                    Some(node) => {
                        let obj = self.eval(node)?;
                        self.singleton_class_of(obj)?
                    }
                    None => self.def_target_class(),
                };
                let mid = self.intern(&def.name);
                if let Some(data) = self.class_data_mut(target) {
                    data.methods.insert(mid, Method::Ruby(def.clone()));
                }
                Ok(MrbValue::Symbol(mid))
            }
            NodeKind::ClassDef {
                scope,
                name,
                superclass,
                body,
            } => self.eval_class_def(scope.as_deref(), name, superclass.as_deref(), body),
            NodeKind::ModuleDef { scope, name, body } => {
                let outer = match scope {
                    Some(scope) => {
                        let v = self.eval(scope)?;
                        self.expect_class(v)?
                    }
                    None => self.def_target_class(),
                };
                let sym = self.intern(name);
                let module = match self.const_get_at(outer, sym).and_then(|v| v.as_obj()) {
                    Some(m) if self.is_module(m) => m,
                    Some(_) => return Err(self.type_error(format!("{} is not a module", name))),
                    None => {
                        let m = self.new_module(Some(sym));
                        self.bind_class(outer, sym, m);
                        m
                    }
                };
                self.run_class_body(module, body)
            }
            NodeKind::SClassDef { target, body } => {
                let obj = self.eval(target)?;
                let sclass = self.singleton_class_of(obj)?;
                self.run_class_body(sclass, body)
            }
            NodeKind::Lambda(def) => Ok(self.make_block(def, None, true)),
            NodeKind::Return(value) => {
                let v = self.eval_opt(value.as_deref())?;
                Err(Unwind::Return(v, self.cur_tag()))
            }
            NodeKind::Break(value) => {
                let v = self.eval_opt(value.as_deref())?;
                Err(Unwind::Break(v, None))
            }
            NodeKind::Next(value) => {
                let v = self.eval_opt(value.as_deref())?;
                Err(Unwind::Next(v))
            }
            NodeKind::OpAssign { target, op, value } => {
                let place = self.place(target)?;
                let current = self.place_get(&place)?;
                let rhs = self.eval(value)?;
                let op = self.intern(op);
                let v = self.call_method(current, op, &[rhs], None)?;
                self.place_set(&place, v)?;
                Ok(v)
            }
            NodeKind::OrAssign { target, value } => {
                let place = self.place(target)?;
                let current = self.place_get(&place)?;
                if current.truthy() {
                    return Ok(current);
                }
                let v = self.eval(value)?;
                self.place_set(&place, v)?;
                Ok(v)
            }
            NodeKind::AndAssign { target, value } => {
                let place = self.place(target)?;
                let current = self.place_get(&place)?;
                if !current.truthy() {
                    return Ok(current);
                }
                let v = self.eval(value)?;
                self.place_set(&place, v)?;
                Ok(v)
            }
            NodeKind::MultiAssign { targets, value } => {
                let rhs = self.eval(value)?;
                let values = match self.ary_ref(rhs) {
                    Some(items) => items.clone(),
                    None => vec![rhs],
                };
                for (i, target) in targets.iter().enumerate() {
                    let place = self.place(target)?;
                    let v = values.get(i).copied().unwrap_or(MrbValue::Nil);
                    self.place_set(&place, v)?;
                }
                Ok(rhs)
            }
        }
    }

    fn eval_opt(&mut self, node: Option<&Node>) -> Eval<MrbValue> {
        match node {
            Some(n) => self.eval(n),
            None => Ok(MrbValue::Nil),
        }
    }

    /// Statements nested in an expression; the arena is left alone.
    fn eval_seq(&mut self, body: &[Node]) -> Eval<MrbValue> {
        let mut last = MrbValue::Nil;
        for node in body {
            self.set_line(node.line);
            last = self.eval(node)?;
        }
        Ok(last)
    }

    fn eval_dstr(&mut self, parts: &[StrPart]) -> Eval<MrbValue> {
        let mut out = String::new();
        for part in parts {
            match part {
                StrPart::Lit(s) => out.push_str(s),
                StrPart::Code(nodes) => {
                    let v = self.eval_seq(nodes)?;
                    out.push_str(&self.to_s_string(v)?);
                }
            }
        }
        Ok(self.new_str(out))
    }

    /// Evaluate call arguments, expanding `*splat`s.
    pub(crate) fn eval_args(&mut self, nodes: &[Node]) -> Eval<Vec<MrbValue>> {
        let mut out = Vec::with_capacity(nodes.len());
        for node in nodes {
            match &node.kind {
                NodeKind::Splat(inner) => {
                    let v = self.eval(inner)?;
                    out.extend(self.splat(v)?);
                }
                _ => out.push(self.eval(node)?),
            }
        }
        Ok(out)
    }

    pub(crate) fn splat(&mut self, v: MrbValue) -> Eval<Vec<MrbValue>> {
        if v.is_nil() {
            return Ok(Vec::new());
        }
        if let Some(items) = self.ary_ref(v) {
            return Ok(items.clone());
        }
        if self.range_ref(v).is_some() || self.hash_ref(v).is_some() {
            let sym = self.intern("to_a");
            let arr = self.call_method(v, sym, &[], None)?;
            return Ok(self.ary_ref(arr).cloned().unwrap_or_default());
        }
        Ok(vec![v])
    }

    fn eval_while(&mut self, cond: &Node, body: &[Node], until: bool) -> Eval<MrbValue> {
        let ai = self.heap.arena_save();
        loop {
            self.heap.arena_restore(ai);
            self.maybe_gc();
            if self.eval(cond)?.truthy() == until {
                return Ok(MrbValue::Nil);
            }
            match self.eval_body(body) {
                Ok(_) | Err(Unwind::Next(_)) => {}
                Err(Unwind::Break(v, None)) => {
                    self.heap.arena_restore(ai);
                    self.heap.protect(v);
                    return Ok(v);
                }
                Err(u) => return Err(u),
            }
        }
    }

    fn eval_case(&mut self, subject: Option<&Node>, whens: &[(Vec<Node>, Vec<Node>)], else_body: &[Node]) -> Eval<MrbValue> {
        let subject = match subject {
            Some(n) => Some(self.eval(n)?),
            None => None,
        };
        let eqq = self.syms.eqq;
        for (values, body) in whens {
            for test in self.eval_args(values)? {
                let hit = match subject {
                    Some(s) => self.call_method(test, eqq, &[s], None)?.truthy(),
                    None => test.truthy(),
                };
                if hit {
                    return self.eval_seq(body);
                }
            }
        }
        self.eval_seq(else_body)
    }

    fn eval_begin(&mut self, begin: &BeginBlock) -> Eval<MrbValue> {
        let mut result = self.eval_body(&begin.body);
        if let Err(Unwind::Raise(exc)) = result {
            self.heap.protect(exc);
            if let Some(clause) = self.find_rescue(&begin.rescues, exc)? {
                if let Some(var) = clause.var {
                    self.local_set(var, exc);
                }
                let sym = self.intern("$!");
                self.gv_set(sym, exc);
                result = self.eval_body(&clause.body);
            }
        } else if let (true, Some(else_body)) = (result.is_ok(), &begin.else_body) {
            result = self.eval_body(else_body);
        }
        let Some(ensure) = &begin.ensure else {
            return result;
        };
        match &result {
            Ok(v) | Err(Unwind::Raise(v)) | Err(Unwind::Return(v, _)) | Err(Unwind::Break(v, _)) | Err(Unwind::Next(v)) => {
                self.heap.protect(*v)
            }
        }
        self.eval_body(ensure)?;
        result
    }

    fn find_rescue<'b>(&mut self, clauses: &'b [RescueClause], exc: MrbValue) -> Eval<Option<&'b RescueClause>> {
        for clause in clauses {
            if clause.classes.is_empty() {
                if self.obj_is_kind_of(exc, self.core.standard_error) {
                    return Ok(Some(clause));
                }
                continue;
            }
            for class in self.eval_args(&clause.classes)? {
                let Some(c) = class.as_obj().filter(|c| self.class_data(*c).is_some()) else {
                    return Err(self.type_error("class or module required for rescue clause"));
                };
                if self.obj_is_kind_of(exc, c) {
                    return Ok(Some(clause));
                }
            }
        }
        Ok(None)
    }

    // ========================================================================
    // Assignment targets
    // ========================================================================

    fn place(&mut self, target: &AssignTarget) -> Eval<Place> {
        Ok(match target {
            AssignTarget::Local(r) => Place::Local(*r),
            AssignTarget::Ivar(name) => Place::Ivar(self.intern(&format!("@{}", name))),
            AssignTarget::Gvar(name) => Place::Gvar(self.intern(&format!("${}", name))),
            AssignTarget::Const(name) => Place::Const(self.intern(name)),
            AssignTarget::Index { recv, args } => {
                let recv = self.eval(recv)?;
                let args = self.eval_args(args)?;
                Place::Index(recv, args)
            }
            AssignTarget::Attr { recv, name } => {
                let recv = self.eval(recv)?;
                Place::Attr(recv, self.intern(name))
            }
        })
    }

    fn place_get(&mut self, place: &Place) -> Eval<MrbValue> {
        match place {
            Place::Local(r) => Ok(self.local_get(*r)),
            Place::Ivar(sym) => Ok(self.iv_get(self.self_val(), *sym)),
            Place::Gvar(sym) => Ok(self.gv_get(*sym)),
            Place::Const(sym) => {
                let cref = self.def_target_class();
                Ok(self.const_get(cref, *sym).unwrap_or(MrbValue::Nil))
            }
            Place::Index(recv, args) => {
                let mid = self.intern("[]");
                self.call_method(*recv, mid, args, None)
            }
            Place::Attr(recv, mid) => self.call_method(*recv, *mid, &[], None),
        }
    }

    fn place_set(&mut self, place: &Place, v: MrbValue) -> Eval<()> {
        match place {
            Place::Local(r) => self.local_set(*r, v),
            Place::Ivar(sym) => {
                let recv = self.self_val();
                self.iv_set(recv, *sym, v);
            }
            Place::Gvar(sym) => self.gv_set(*sym, v),
            Place::Const(sym) => {
                let cref = self.def_target_class();
                self.set_const(cref, *sym, v);
            }
            Place::Index(recv, args) => {
                let mid = self.intern("[]=");
                let mut full = args.clone();
                full.push(v);
                self.call_method(*recv, mid, &full, None)?;
            }
            Place::Attr(recv, mid) => {
                let setter = format!("{}=", self.sym_name(*mid));
                let setter = self.intern(&setter);
                self.call_method(*recv, setter, &[v], None)?;
            }
        }
        Ok(())
    }

    // ========================================================================
    // Constants and classes
    // ========================================================================

    /// Class receiving `def` and constant assignment in the current frame.
    fn def_target_class(&self) -> ObjRef {
        self.cur_cref()
    }

    pub(crate) fn expect_class(&mut self, v: MrbValue) -> Eval<ObjRef> {
        match v.as_obj().filter(|r| self.class_data(*r).is_some()) {
            Some(c) => Ok(c),
            None => {
                let s = self.inspect_str(v)?;
                Err(self.type_error(format!("{} is not a class/module", s)))
            }
        }
    }

    fn uninitialized_constant(&mut self, outer: Option<ObjRef>, sym: Sym) -> Unwind {
        let name = match outer.filter(|o| *o != self.core.object) {
            Some(o) => format!("{}::{}", self.class_name(o), self.sym_name(sym)),
            None => self.sym_name(sym).to_string(),
        };
        self.name_error(format!("uninitialized constant {}", name))
    }

    fn scoped_const(&mut self, outer: ObjRef, sym: Sym) -> Eval<MrbValue> {
        match self.const_get(outer, sym) {
            Some(v) => Ok(v),
            None => Err(self.uninitialized_constant(Some(outer), sym)),
        }
    }

    /// Lexical lookup through enclosing classes, then ancestors, then Object.
    pub(crate) fn lookup_const(&mut self, sym: Sym) -> Eval<MrbValue> {
        let mut cref = self.cur_cref();
        if let Some(attached) = self.singleton_attached(cref).and_then(|a| a.as_obj()) {
            if self.class_data(attached).is_some() {
                cref = attached;
            }
        }
        let mut cur = Some(cref);
        while let Some(c) = cur {
            if let Some(v) = self.const_get_at(c, sym) {
                return Ok(v);
            }
            cur = self.class_data(c).and_then(|d| d.outer);
        }
        if let Some(v) = self.const_get(cref, sym) {
            return Ok(v);
        }
        if let Some(v) = self.const_get_at(self.core.object, sym) {
            return Ok(v);
        }
        Err(self.uninitialized_constant(None, sym))
    }

    fn eval_class_def(
        &mut self,
        scope: Option<&Node>,
        name: &str,
        superclass: Option<&Node>,
        body: &Arc<TopBody>,
    ) -> Eval<MrbValue> {
        let outer = match scope {
            Some(scope) => {
                let v = self.eval(scope)?;
                self.expect_class(v)?
            }
            None => self.def_target_class(),
        };
        let sup = match superclass {
            Some(node) => {
                let v = self.eval(node)?;
                match v.as_obj().filter(|r| self.class_data(*r).is_some() && !self.is_module(*r)) {
                    Some(c) => Some(c),
                    None => return Err(self.type_error("superclass must be a Class")),
                }
            }
            None => None,
        };
        let sym = self.intern(name);
        let class = match self.const_get_at(outer, sym).and_then(|v| v.as_obj()) {
            Some(existing) => {
                if self.class_data(existing).is_none() || self.is_module(existing) {
                    return Err(self.type_error(format!("{} is not a class", name)));
                }
                let current = self.class_data(existing).and_then(|d| d.superclass);
                if sup.is_some() && sup != current {
                    return Err(self.type_error(format!("superclass mismatch for class {}", name)));
                }
                existing
            }
            None => {
                let sup = sup.unwrap_or(self.core.object);
                let it = self
                    .class_data(sup)
                    .map(|d| d.instance_type)
                    .unwrap_or(InstanceType::Object);
                let class = self.new_class(Some(sym), Some(sup), it);
                self.bind_class(outer, sym, class);
                class
            }
        };
        self.run_class_body(class, body)
    }

    fn run_class_body(&mut self, class: ObjRef, body: &Arc<TopBody>) -> Eval<MrbValue> {
        self.check_depth()?;
        let env = self.new_env(body.nlocals, None);
        let tag = self.fresh_tag();
        let line = self.ci.last().map(|ci| ci.line).unwrap_or(0);
        self.ci.push(CallInfo {
            kind: FrameKind::ClassBody,
            mid: None,
            target_class: Some(class),
            self_val: MrbValue::Object(class),
            args: Vec::new(),
            block: None,
            env: Some(env),
            cref: class,
            file: body.file.clone(),
            line,
            tag,
        });
        let result = self.eval_body(&body.body);
        self.ci.pop();
        result
    }

    // ========================================================================
    // Calls
    // ========================================================================

    fn eval_call(&mut self, call: &Call, line: u32) -> Eval<MrbValue> {
        let recv = match &call.recv {
            Some(node) => self.eval(node)?,
            None => self.self_val(),
        };
        if call.safe_nav && recv.is_nil() {
            return Ok(MrbValue::Nil);
        }
        let args = self.eval_args(&call.args)?;
        let (block, break_tag) = match &call.block {
            None => (None, None),
            Some(BlockArg::Literal(def)) => {
                let tag = self.fresh_tag();
                (Some(self.make_block(def, Some(tag), false)), Some(tag))
            }
            Some(BlockArg::Pass(node)) => {
                let v = self.eval(node)?;
                (self.to_block(v)?, None)
            }
        };
        self.set_line(line);
        let mid = self.intern(&call.name);
        match self.call_method(recv, mid, &args, block) {
            Err(Unwind::Break(v, Some(t))) if Some(t) == break_tag => Ok(v),
            other => other,
        }
    }

    /// Convert a `&arg` to a block.
    fn to_block(&mut self, v: MrbValue) -> Eval<Option<MrbValue>> {
        if v.is_nil() {
            return Ok(None);
        }
        if self.is_proc(v) {
            return Ok(Some(v));
        }
        if let MrbValue::Symbol(sym) = v {
            return Ok(Some(self.symbol_proc(sym)));
        }
        let to_proc = self.syms.to_proc;
        let p = self.call_method(v, to_proc, &[], None)?;
        if self.is_proc(p) {
            Ok(Some(p))
        } else {
            Err(self.type_error("wrong argument type (expected Proc)"))
        }
    }

    /// `:sym.to_proc`: a proc that sends `sym` to its first argument.
    pub(crate) fn symbol_proc(&mut self, sym: Sym) -> MrbValue {
        let cref = self.cur_cref();
        let self_val = self.self_val();
        self.new_proc(RProc {
            body: ProcBody::Symbol(sym),
            env: None,
            self_val,
            block: None,
            cref,
            mid: None,
            home: None,
            break_tag: None,
            lambda: true,
        })
    }

    /// Create a block closing over the current frame.
    pub(crate) fn make_block(&mut self, def: &Arc<BlockDef>, break_tag: Option<u64>, lambda: bool) -> MrbValue {
        let (env, self_val, block, cref, mid, home) = match self.ci.last() {
            Some(ci) => (ci.env, ci.self_val, ci.block, ci.cref, ci.mid, ci.tag),
            None => (None, self.top_self, None, self.core.object, None, 0),
        };
        self.new_proc(RProc {
            body: ProcBody::Block(def.clone()),
            env,
            self_val,
            block,
            cref,
            mid,
            home: Some(home),
            break_tag,
            lambda,
        })
    }

    /// Dispatch `mid` on `recv`.
    pub(crate) fn call_method(
        &mut self,
        recv: MrbValue,
        mid: Sym,
        args: &[MrbValue],
        block: Option<MrbValue>,
    ) -> Eval<MrbValue> {
        let class = self.class_of(recv);
        match self.find_method(class, mid) {
            Some((method, owner)) => self.invoke(recv, mid, method, owner, args, block),
            None => self.method_missing(recv, class, mid, args, block),
        }
    }

    fn method_missing(
        &mut self,
        recv: MrbValue,
        class: ObjRef,
        mid: Sym,
        args: &[MrbValue],
        block: Option<MrbValue>,
    ) -> Eval<MrbValue> {
        let mm = self.intern("method_missing");
        if let Some((method, owner)) = self.find_method(class, mm) {
            let mut full = Vec::with_capacity(args.len() + 1);
            full.push(MrbValue::Symbol(mid));
            full.extend_from_slice(args);
            return self.invoke(recv, mm, method, owner, &full, block);
        }
        Err(self.no_method_error(mid))
    }

    pub(crate) fn invoke(
        &mut self,
        recv: MrbValue,
        mid: Sym,
        method: Method,
        owner: ObjRef,
        args: &[MrbValue],
        block: Option<MrbValue>,
    ) -> Eval<MrbValue> {
        let v = match method {
            Method::Ruby(def) => self.invoke_ruby(recv, mid, &def, owner, args, block)?,
            Method::Builtin(f) => f(self, recv, args, block)?,
            Method::Native(native) => self.invoke_native(recv, native, args, block)?,
            Method::Proc(p) => self.call_proc(
                p,
                args,
                block,
                Some(Rebind {
                    self_val: recv,
                    cref: None,
                    method: Some((mid, owner)),
                }),
            )?,
            Method::AttrReader(sym) => {
                self.check_arity(args.len(), 0, 0, false)?;
                self.iv_get(recv, sym)
            }
            Method::AttrWriter(sym) => {
                self.check_arity(args.len(), 1, 0, false)?;
                self.iv_set(recv, sym, args[0]);
                args[0]
            }
            Method::Undefined => return Err(self.no_method_error(mid)),
        };
        self.heap.protect(v);
        Ok(v)
    }

    pub(crate) fn check_arity(&mut self, given: usize, req: usize, opt: usize, rest: bool) -> Eval<()> {
        if given >= req && (rest || given <= req + opt) {
            return Ok(());
        }
        let expected = if rest {
            format!("{}+", req)
        } else if opt > 0 {
            format!("{}..{}", req, req + opt)
        } else {
            req.to_string()
        };
        Err(self.arg_error(format!(
            "wrong number of arguments (given {}, expected {})",
            given, expected
        )))
    }

    fn invoke_ruby(
        &mut self,
        recv: MrbValue,
        mid: Sym,
        def: &Arc<MethodDef>,
        owner: ObjRef,
        args: &[MrbValue],
        block: Option<MrbValue>,
    ) -> Eval<MrbValue> {
        self.check_depth()?;
        let env = self.new_env(def.nlocals, None);
        let tag = self.fresh_tag();
        self.ci.push(CallInfo {
            kind: FrameKind::Method,
            mid: Some(mid),
            target_class: Some(owner),
            self_val: recv,
            args: args.to_vec(),
            block,
            env: Some(env),
            cref: owner,
            file: def.file.clone(),
            line: def.line,
            tag,
        });
        let result = self
            .bind_params(&def.params, args, block, true)
            .and_then(|_| self.eval_body(&def.body));
        self.ci.pop();
        match result {
            Err(Unwind::Return(v, t)) if t == tag => Ok(v),
            other => other,
        }
    }

    /// Native frames carry the definition-site symbol and class, not the
    /// name the method was called by.
    fn invoke_native(
        &mut self,
        recv: MrbValue,
        native: NativeMethod,
        args: &[MrbValue],
        block: Option<MrbValue>,
    ) -> Eval<MrbValue> {
        let NativeMethod {
            func: f,
            aspec,
            mid,
            owner,
        } = native;
        self.check_arity(args.len(), aspec.required(), aspec.optional(), aspec.has_rest())?;
        self.check_depth()?;
        trace!("native call {}", self.sym_name(mid));
        self.exc = None;
        let tag = self.fresh_tag();
        self.ci.push(CallInfo {
            kind: FrameKind::Native,
            mid: Some(mid),
            target_class: Some(owner),
            self_val: recv,
            args: args.to_vec(),
            block,
            env: None,
            cref: owner,
            file: None,
            line: 0,
            tag,
        });
        let ret = f(self as *mut MrbState, recv);
        self.ci.pop();
        match self.exc.take() {
            Some(exc) => Err(self.raise_value(exc)),
            None => Ok(ret),
        }
    }

    /// Bind arguments to parameter slots of the current frame. Strict binding
    /// (methods, lambdas) checks the argument count; loose binding (blocks)
    /// splats a lone array argument and pads or drops the rest.
    fn bind_params(&mut self, params: &Params, args: &[MrbValue], block: Option<MrbValue>, strict: bool) -> Eval<()> {
        let req = params.required_count();
        let opt = params.optional.len();
        let splatted: Vec<MrbValue>;
        let mut args = args;
        if strict {
            self.check_arity(args.len(), req, opt, params.rest.is_some())?;
        } else if args.len() == 1 && (req + opt > 1 || (params.rest.is_some() && req > 0)) {
            if let Some(items) = self.ary_ref(args[0]) {
                splatted = items.clone();
                args = &splatted;
            }
        }
        let n = args.len();
        let avail_opt = opt.min(n.saturating_sub(req));
        let mut idx = 0;
        for &slot in &params.required {
            let v = args.get(idx).copied().unwrap_or(MrbValue::Nil);
            self.local_set(LocalRef { depth: 0, index: slot }, v);
            idx += 1;
        }
        for (i, (slot, default)) in params.optional.iter().enumerate() {
            let v = if i < avail_opt {
                idx += 1;
                args[idx - 1]
            } else {
                self.eval(default)?
            };
            self.local_set(LocalRef { depth: 0, index: *slot }, v);
        }
        if let Some(slot) = params.rest {
            let count = n.saturating_sub(req + avail_opt);
            let end = (idx + count).min(n);
            let items = args[idx.min(end)..end].to_vec();
            idx = end;
            let rest = self.new_ary(items);
            self.local_set(LocalRef { depth: 0, index: slot }, rest);
        }
        for &slot in &params.post {
            let v = args.get(idx).copied().unwrap_or(MrbValue::Nil);
            self.local_set(LocalRef { depth: 0, index: slot }, v);
            idx += 1;
        }
        if let Some(slot) = params.block {
            self.local_set(LocalRef { depth: 0, index: slot }, block.unwrap_or(MrbValue::Nil));
        }
        Ok(())
    }

    /// Call a block with `args`.
    pub(crate) fn call_block(&mut self, block: MrbValue, args: &[MrbValue]) -> Eval<MrbValue> {
        self.call_proc(block, args, None, None)
    }

    /// Run a proc, optionally rebinding `self` (`instance_eval`,
    /// `define_method`).
    pub(crate) fn call_proc(
        &mut self,
        proc: MrbValue,
        args: &[MrbValue],
        block_arg: Option<MrbValue>,
        rebind: Option<Rebind>,
    ) -> Eval<MrbValue> {
        let Some(p) = self.proc_ref(proc) else {
            return Err(self.type_error("not a proc"));
        };
        let body = p.body.clone();
        let (env, p_self, p_block, p_cref, p_mid, home, break_tag, lambda) =
            (p.env, p.self_val, p.block, p.cref, p.mid, p.home, p.break_tag, p.lambda);
        let def = match body {
            ProcBody::Block(def) => def,
            ProcBody::Top(tree) => {
                let self_val = rebind.map(|r| r.self_val).unwrap_or(p_self);
                return self.run_tree(tree, self_val, 0);
            }
            ProcBody::Symbol(sym) => {
                let Some((&recv, rest)) = args.split_first() else {
                    return Err(self.arg_error("no receiver given"));
                };
                return self.call_method(recv, sym, rest, block_arg);
            }
        };
        self.check_depth()?;
        let as_method = rebind.and_then(|r| r.method);
        let lambda = lambda || as_method.is_some();
        let own_tag = self.fresh_tag();
        let tag = if lambda { own_tag } else { home.unwrap_or(own_tag) };
        let new_env = self.new_env(def.nlocals, env);
        let (kind, mid, target_class) = match as_method {
            Some((mid, owner)) => (FrameKind::Method, Some(mid), Some(owner)),
            None => (FrameKind::Block, p_mid, None),
        };
        let frame_block = if as_method.is_some() { block_arg } else { p_block };
        self.ci.push(CallInfo {
            kind,
            mid,
            target_class,
            self_val: rebind.map(|r| r.self_val).unwrap_or(p_self),
            args: args.to_vec(),
            block: frame_block,
            env: Some(new_env),
            cref: rebind.and_then(|r| r.cref).unwrap_or(p_cref),
            file: def.file.clone(),
            line: def.line,
            tag,
        });
        let result = self
            .bind_params(&def.params, args, block_arg, lambda)
            .and_then(|_| self.eval_body(&def.body));
        self.ci.pop();
        match result {
            Err(Unwind::Next(v)) => Ok(v),
            Err(Unwind::Return(v, t)) if lambda && t == tag => Ok(v),
            Err(Unwind::Break(v, _)) if lambda => Ok(v),
            Err(Unwind::Break(v, None)) => Err(Unwind::Break(v, break_tag)),
            other => other,
        }
    }

    fn eval_super(&mut self, args: Option<&[Node]>, block: Option<&BlockArg>) -> Eval<MrbValue> {
        let frame = self
            .ci
            .iter()
            .rev()
            .find(|ci| ci.kind == FrameKind::Method)
            .map(|ci| (ci.mid, ci.target_class, ci.self_val, ci.args.clone(), ci.block));
        let Some((Some(mid), Some(owner), recv, frame_args, frame_block)) = frame else {
            return Err(self.runtime_error("super called outside of method"));
        };
        let args = match args {
            Some(nodes) => self.eval_args(nodes)?,
            None => frame_args,
        };
        let (block, break_tag) = match block {
            None => (frame_block, None),
            Some(BlockArg::Literal(def)) => {
                let tag = self.fresh_tag();
                (Some(self.make_block(def, Some(tag), false)), Some(tag))
            }
            Some(BlockArg::Pass(node)) => {
                let v = self.eval(node)?;
                (self.to_block(v)?, None)
            }
        };
        let ancestors = self.ancestors(self.class_of(recv));
        let start = ancestors.iter().position(|c| *c == owner).map(|p| p + 1).unwrap_or(0);
        let found = ancestors[start..].iter().find_map(|&c| {
            self.class_data(c)
                .and_then(|d| d.methods.get(&mid).cloned())
                .map(|m| (m, c))
        });
        let result = match found {
            Some((Method::Undefined, _)) | None => {
                let msg = format!("super: no superclass method '{}'", self.sym_name(mid));
                let class = self.core.no_method_error;
                Err(self.raise_class(class, msg))
            }
            Some((method, c)) => self.invoke(recv, mid, method, c, &args, block),
        };
        match result {
            Err(Unwind::Break(v, Some(t))) if Some(t) == break_tag => Ok(v),
            other => other,
        }
    }

    /// Allocate an instance of `class` and run `initialize`.
    pub(crate) fn instantiate(&mut self, class: ObjRef, args: &[MrbValue], block: Option<MrbValue>) -> Eval<MrbValue> {
        let Some(it) = self.class_data(class).map(|d| d.instance_type) else {
            return Err(self.type_error("not a class"));
        };
        if self.is_module(class) || self.is_singleton(class) {
            let class_name = self.class_name(class);
            return Err(self.type_error(format!("can't create instance of {}", class_name)));
        }
        let kind = match it {
            InstanceType::Object => ObjKind::Object,
            InstanceType::Exception => ObjKind::Exception,
            InstanceType::String => ObjKind::String(String::new()),
            InstanceType::Array => ObjKind::Array(Vec::new()),
            InstanceType::Hash => ObjKind::Hash(Box::new(RHash::new())),
            InstanceType::Immediate => {
                let mid = self.intern("new");
                return Err(self.no_method_error(mid));
            }
        };
        let obj = self.alloc(class, kind);
        let init = self.syms.initialize;
        self.call_method(obj, init, args, block)?;
        Ok(obj)
    }

    // ========================================================================
    // Conversions that may run guest code
    // ========================================================================

    /// `v.to_s` as a guest string value.
    pub(crate) fn to_s_value(&mut self, v: MrbValue) -> Eval<MrbValue> {
        if self.str_ref(v).is_some() {
            return Ok(v);
        }
        let to_s = self.syms.to_s;
        let s = self.call_method(v, to_s, &[], None)?;
        if self.str_ref(s).is_some() {
            Ok(s)
        } else {
            let fallback = self.any_to_s(v);
            Ok(self.new_str(fallback))
        }
    }

    pub(crate) fn to_s_string(&mut self, v: MrbValue) -> Eval<String> {
        let s = self.to_s_value(v)?;
        Ok(self.str_ref(s).unwrap_or_default().to_string())
    }

    pub(crate) fn inspect_str(&mut self, v: MrbValue) -> Eval<String> {
        let inspect = self.syms.inspect;
        let s = self.call_method(v, inspect, &[], None)?;
        match self.str_ref(s) {
            Some(s) => Ok(s.to_string()),
            None => Ok(self.any_to_s(v)),
        }
    }

    /// `#<ClassName:0x...>`
    pub(crate) fn any_to_s(&self, v: MrbValue) -> String {
        let class = self.obj_class(v);
        let id = v.as_obj().map(|r| r.index()).unwrap_or(0);
        format!("#<{}:0x{:08x}>", self.class_name(class), id)
    }

    /// `a == b` through the guest `==` method.
    pub(crate) fn values_eq(&mut self, a: MrbValue, b: MrbValue) -> Eval<bool> {
        if a.identical(b) {
            return Ok(true);
        }
        match (a, b) {
            (MrbValue::Fixnum(_) | MrbValue::Float(_), _) | (_, MrbValue::Fixnum(_) | MrbValue::Float(_)) => {}
            (MrbValue::Object(_), _) => {}
            _ => return Ok(false),
        }
        let eq = self.syms.eq;
        Ok(self.call_method(a, eq, &[b], None)?.truthy())
    }
}

#[cfg(test)]
mod tests {
    use crate::state::{MrbState, VmOptions};
    use crate::value::MrbValue;

    fn eval(src: &str) -> (Box<MrbState>, MrbValue) {
        let mut mrb = MrbState::open(VmOptions::default());
        let v = mrb.load_string(src);
        if let Some(exc) = mrb.exc() {
            let msg = mrb.obj_as_string(exc);
            panic!("{:?}", mrb.string_value(msg));
        }
        (mrb, v)
    }

    #[test]
    fn test_method_return_and_defaults() {
        let (_, v) = eval("def f(a, b = 2)\n return a + b if a > 0\n 0\nend\nf(1) + f(1, 10) + f(-1)");
        assert_eq!(v, MrbValue::Fixnum(14));
    }

    #[test]
    fn test_break_from_block_lands_at_call() {
        let (_, v) = eval("r = [1, 2, 3].each { |x| break x * 10 if x == 2 }\nr");
        assert_eq!(v, MrbValue::Fixnum(20));
    }

    #[test]
    fn test_return_from_block_returns_from_method() {
        let (_, v) = eval("def f\n [1, 2, 3].each { |x| return x if x > 1 }\n 0\nend\nf");
        assert_eq!(v, MrbValue::Fixnum(2));
    }

    #[test]
    fn test_while_with_next_and_break() {
        let (_, v) = eval("i = 0\ns = 0\nwhile true\n i += 1\n next if i == 2\n break if i > 4\n s += i\nend\ns");
        assert_eq!(v, MrbValue::Fixnum(1 + 3 + 4));
    }

    #[test]
    fn test_rescue_ensure_order() {
        let (mut mrb, v) = eval(
            "$log = []\nbegin\n raise ArgumentError, 'x'\nrescue TypeError\n $log << 1\nrescue ArgumentError => e\n $log << e.message\nensure\n $log << 3\nend\n$log.size",
        );
        assert_eq!(v, MrbValue::Fixnum(2));
        let sym = mrb.intern("$log");
        let log = mrb.gv_get(sym);
        let first = mrb.ary_entry(log, 0);
        assert_eq!(mrb.string_value(first), Some("x"));
    }

    #[test]
    fn test_super_and_zsuper() {
        let (_, v) = eval(
            "class A\n def f(x)\n x * 2\n end\nend\nclass B < A\n def f(x)\n super + super(1)\n end\nend\nB.new.f(5)",
        );
        assert_eq!(v, MrbValue::Fixnum(12));
    }

    #[test]
    fn test_block_auto_splat() {
        let (_, v) = eval("[[1, 2], [3, 4]].map { |a, b| a * b }.sum");
        assert_eq!(v, MrbValue::Fixnum(14));
    }

    #[test]
    fn test_lambda_arity_is_strict() {
        let mut mrb = MrbState::open(VmOptions::default());
        mrb.load_string("l = ->(a, b) { a + b }\nl.call(1)");
        assert!(mrb.take_exc().is_some());
        let v = mrb.load_string("->(a, b) { return a + b; 0 }.call(1, 2)");
        assert_eq!(v, MrbValue::Fixnum(3));
    }

    #[test]
    fn test_yield_without_block() {
        let mut mrb = MrbState::open(VmOptions::default());
        mrb.load_string("def f\n yield\nend\nf");
        let exc = mrb.take_exc().expect("exception");
        let msg = mrb.obj_as_string(exc);
        assert_eq!(mrb.string_value(msg), Some("no block given (yield)"));
    }

    #[test]
    fn test_deep_recursion_raises() {
        let mut mrb = MrbState::open(VmOptions {
            max_call_depth: 32,
            ..VmOptions::default()
        });
        mrb.load_string("def f(n)\n f(n + 1)\nend\nf(0)");
        let exc = mrb.take_exc().expect("exception");
        let class = mrb.obj_class(exc);
        assert_eq!(mrb.class_name(class), "SystemStackError");
    }

    #[test]
    fn test_constants_resolve_lexically() {
        let (_, v) = eval("module M\n X = 5\n class C\n def x\n X\n end\n end\nend\nM::C.new.x");
        assert_eq!(v, MrbValue::Fixnum(5));
    }
}
