//! Object, Module and Class.

use super::{arg, arity, need_block, sym_arg};
use crate::interp::{Eval, Rebind};
use crate::object::{InstanceType, Method, ObjKind, RObject};
use crate::state::MrbState;
use crate::value::{MrbValue, ObjRef};

pub(super) fn init(mrb: &mut MrbState) {
    let object = mrb.core.object;
    mrb.define_builtin(object, "initialize", obj_initialize);
    mrb.define_builtin(object, "==", obj_equal);
    mrb.define_builtin(object, "equal?", obj_equal);
    mrb.define_builtin(object, "eql?", obj_equal);
    mrb.define_builtin(object, "===", obj_eqq);
    mrb.define_builtin(object, "!", obj_not);
    mrb.define_builtin(object, "!=", obj_not_equal);
    mrb.define_builtin(object, "class", obj_class);
    mrb.define_builtin(object, "singleton_class", obj_singleton_class);
    mrb.define_builtin(object, "to_s", obj_to_s);
    mrb.define_builtin(object, "inspect", obj_inspect);
    mrb.define_builtin(object, "hash", obj_hash);
    mrb.define_builtin(object, "object_id", obj_hash);
    mrb.define_builtin(object, "__id__", obj_hash);
    mrb.define_builtin(object, "nil?", obj_nil_p);
    mrb.define_builtin(object, "is_a?", obj_is_a);
    mrb.define_builtin(object, "kind_of?", obj_is_a);
    mrb.define_builtin(object, "instance_of?", obj_instance_of);
    mrb.define_builtin(object, "respond_to?", obj_respond_to);
    mrb.define_builtin(object, "send", obj_send);
    mrb.define_builtin(object, "__send__", obj_send);
    mrb.define_builtin(object, "public_send", obj_send);
    mrb.define_builtin(object, "instance_variable_get", obj_ivar_get);
    mrb.define_builtin(object, "instance_variable_set", obj_ivar_set);
    mrb.define_builtin(object, "instance_variable_defined?", obj_ivar_defined);
    mrb.define_builtin(object, "instance_variables", obj_ivars);
    mrb.define_builtin(object, "instance_eval", obj_instance_eval);
    mrb.define_builtin(object, "instance_exec", obj_instance_exec);
    mrb.define_builtin(object, "dup", obj_dup);
    mrb.define_builtin(object, "clone", obj_dup);
    mrb.define_builtin(object, "freeze", obj_itself);
    mrb.define_builtin(object, "itself", obj_itself);
    mrb.define_builtin(object, "frozen?", obj_frozen);
    mrb.define_builtin(object, "tap", obj_tap);
    mrb.define_builtin(object, "then", obj_then);
    mrb.define_builtin(object, "yield_self", obj_then);
    mrb.define_builtin(object, "extend", obj_extend);
    mrb.define_builtin(object, "define_singleton_method", obj_define_singleton_method);

    let module = mrb.core.module;
    mrb.define_builtin(module, "name", mod_name);
    mrb.define_builtin(module, "to_s", mod_to_s);
    mrb.define_builtin(module, "inspect", mod_to_s);
    mrb.define_builtin(module, "===", mod_eqq);
    mrb.define_builtin(module, "<", mod_lt);
    mrb.define_builtin(module, "<=", mod_le);
    mrb.define_builtin(module, "ancestors", mod_ancestors);
    mrb.define_builtin(module, "include", mod_include);
    mrb.define_builtin(module, "include?", mod_include_p);
    mrb.define_builtin(module, "define_method", mod_define_method);
    mrb.define_builtin(module, "attr_reader", mod_attr_reader);
    mrb.define_builtin(module, "attr_writer", mod_attr_writer);
    mrb.define_builtin(module, "attr_accessor", mod_attr_accessor);
    mrb.define_builtin(module, "attr", mod_attr_reader);
    mrb.define_builtin(module, "const_get", mod_const_get);
    mrb.define_builtin(module, "const_set", mod_const_set);
    mrb.define_builtin(module, "const_defined?", mod_const_defined);
    mrb.define_builtin(module, "constants", mod_constants);
    mrb.define_builtin(module, "class_eval", mod_class_eval);
    mrb.define_builtin(module, "module_eval", mod_class_eval);
    mrb.define_builtin(module, "class_exec", mod_class_eval);
    mrb.define_builtin(module, "method_defined?", mod_method_defined);
    mrb.define_builtin(module, "instance_methods", mod_instance_methods);
    mrb.define_builtin(module, "alias_method", mod_alias_method);
    mrb.define_builtin(module, "undef_method", mod_undef_method);
    mrb.define_builtin(module, "remove_method", mod_remove_method);
    mrb.define_builtin(module, "module_function", mod_module_function);
    for name in ["private", "public", "protected", "private_class_method", "public_class_method"] {
        mrb.define_builtin(module, name, mod_visibility);
    }

    let class = mrb.core.class;
    mrb.define_builtin(class, "new", class_new);
    mrb.define_builtin(class, "allocate", class_allocate);
    mrb.define_builtin(class, "superclass", class_superclass);

    for class in [mrb.core.nil, mrb.core.true_class, mrb.core.false_class] {
        mrb.define_builtin(class, "to_s", immediate_to_s);
        mrb.define_builtin(class, "inspect", immediate_inspect);
        mrb.define_builtin(class, "&", immediate_and);
        mrb.define_builtin(class, "|", immediate_or);
    }
    let nil = mrb.core.nil;
    mrb.define_builtin(nil, "to_a", nil_to_a);

    let top_self = mrb.top_self;
    if let Ok(main) = mrb.singleton_class_of(top_self) {
        mrb.define_builtin(main, "to_s", main_to_s);
        mrb.define_builtin(main, "inspect", main_to_s);
    }
}

// ============================================================================
// Object
// ============================================================================

fn obj_initialize(_: &mut MrbState, _: MrbValue, _: &[MrbValue], _: Option<MrbValue>) -> Eval<MrbValue> {
    Ok(MrbValue::Nil)
}

fn obj_equal(mrb: &mut MrbState, recv: MrbValue, args: &[MrbValue], _: Option<MrbValue>) -> Eval<MrbValue> {
    arity(mrb, args, 1, 0)?;
    Ok(MrbValue::from_bool(recv.identical(args[0])))
}

fn obj_eqq(mrb: &mut MrbState, recv: MrbValue, args: &[MrbValue], _: Option<MrbValue>) -> Eval<MrbValue> {
    arity(mrb, args, 1, 0)?;
    Ok(MrbValue::from_bool(mrb.values_eq(recv, args[0])?))
}

fn obj_not(_: &mut MrbState, recv: MrbValue, _: &[MrbValue], _: Option<MrbValue>) -> Eval<MrbValue> {
    Ok(MrbValue::from_bool(!recv.truthy()))
}

fn obj_not_equal(mrb: &mut MrbState, recv: MrbValue, args: &[MrbValue], _: Option<MrbValue>) -> Eval<MrbValue> {
    arity(mrb, args, 1, 0)?;
    Ok(MrbValue::from_bool(!mrb.values_eq(recv, args[0])?))
}

fn obj_class(mrb: &mut MrbState, recv: MrbValue, _: &[MrbValue], _: Option<MrbValue>) -> Eval<MrbValue> {
    Ok(MrbValue::Object(mrb.obj_class(recv)))
}

fn obj_singleton_class(mrb: &mut MrbState, recv: MrbValue, _: &[MrbValue], _: Option<MrbValue>) -> Eval<MrbValue> {
    Ok(MrbValue::Object(mrb.singleton_class_of(recv)?))
}

fn obj_to_s(mrb: &mut MrbState, recv: MrbValue, _: &[MrbValue], _: Option<MrbValue>) -> Eval<MrbValue> {
    let s = mrb.any_to_s(recv);
    Ok(mrb.new_str(s))
}

fn obj_inspect(mrb: &mut MrbState, recv: MrbValue, _: &[MrbValue], _: Option<MrbValue>) -> Eval<MrbValue> {
    let mut ivars: Vec<(String, MrbValue)> = match mrb.obj(recv) {
        Some(o) => o
            .ivars
            .iter()
            .map(|(k, v)| (mrb.sym_name(*k).to_string(), *v))
            .filter(|(k, _)| k.starts_with('@'))
            .collect(),
        None => Vec::new(),
    };
    if ivars.is_empty() {
        let to_s = mrb.syms.to_s;
        return mrb.call_method(recv, to_s, &[], None);
    }
    ivars.sort_by(|a, b| a.0.cmp(&b.0));
    let base = mrb.any_to_s(recv);
    let mut out = base.trim_end_matches('>').to_string();
    for (i, (name, v)) in ivars.into_iter().enumerate() {
        out.push_str(if i == 0 { " " } else { ", " });
        out.push_str(&name);
        out.push('=');
        out.push_str(&mrb.inspect_str(v)?);
    }
    out.push('>');
    Ok(mrb.new_str(out))
}

fn obj_hash(_: &mut MrbState, recv: MrbValue, _: &[MrbValue], _: Option<MrbValue>) -> Eval<MrbValue> {
    let id = match recv {
        MrbValue::Nil => 8,
        MrbValue::False => 0,
        MrbValue::True => 20,
        MrbValue::Fixnum(n) => n.wrapping_mul(2).wrapping_add(1),
        MrbValue::Float(f) => f.to_bits() as i64,
        MrbValue::Symbol(s) => (s.id() as i64) << 8 | 0x0c,
        MrbValue::Undef => 52,
        MrbValue::Object(r) => ((r.index() as i64) << 3) + 1024,
    };
    Ok(MrbValue::Fixnum(id))
}

fn obj_nil_p(_: &mut MrbState, recv: MrbValue, _: &[MrbValue], _: Option<MrbValue>) -> Eval<MrbValue> {
    Ok(MrbValue::from_bool(recv.is_nil()))
}

fn obj_is_a(mrb: &mut MrbState, recv: MrbValue, args: &[MrbValue], _: Option<MrbValue>) -> Eval<MrbValue> {
    arity(mrb, args, 1, 0)?;
    let class = mrb.expect_class(args[0])?;
    Ok(MrbValue::from_bool(mrb.obj_is_kind_of(recv, class)))
}

fn obj_instance_of(mrb: &mut MrbState, recv: MrbValue, args: &[MrbValue], _: Option<MrbValue>) -> Eval<MrbValue> {
    arity(mrb, args, 1, 0)?;
    let class = mrb.expect_class(args[0])?;
    Ok(MrbValue::from_bool(mrb.obj_class(recv) == class))
}

fn obj_respond_to(mrb: &mut MrbState, recv: MrbValue, args: &[MrbValue], _: Option<MrbValue>) -> Eval<MrbValue> {
    mrb.check_arity(args.len(), 1, 1, false)?;
    let mid = sym_arg(mrb, args[0])?;
    Ok(MrbValue::from_bool(mrb.respond_to(recv, mid)))
}

fn obj_send(mrb: &mut MrbState, recv: MrbValue, args: &[MrbValue], block: Option<MrbValue>) -> Eval<MrbValue> {
    let Some((&name, rest)) = args.split_first() else {
        return Err(mrb.arg_error("no method name given"));
    };
    let mid = sym_arg(mrb, name)?;
    mrb.call_method(recv, mid, rest, block)
}

fn ivar_name(mrb: &mut MrbState, v: MrbValue) -> Eval<crate::value::Sym> {
    let sym = sym_arg(mrb, v)?;
    if !mrb.sym_name(sym).starts_with('@') {
        let msg = format!("'{}' is not allowed as an instance variable name", mrb.sym_name(sym));
        return Err(mrb.name_error(msg));
    }
    Ok(sym)
}

fn obj_ivar_get(mrb: &mut MrbState, recv: MrbValue, args: &[MrbValue], _: Option<MrbValue>) -> Eval<MrbValue> {
    arity(mrb, args, 1, 0)?;
    let sym = ivar_name(mrb, args[0])?;
    Ok(mrb.iv_get(recv, sym))
}

fn obj_ivar_set(mrb: &mut MrbState, recv: MrbValue, args: &[MrbValue], _: Option<MrbValue>) -> Eval<MrbValue> {
    arity(mrb, args, 2, 0)?;
    let sym = ivar_name(mrb, args[0])?;
    mrb.iv_set(recv, sym, args[1]);
    Ok(args[1])
}

fn obj_ivar_defined(mrb: &mut MrbState, recv: MrbValue, args: &[MrbValue], _: Option<MrbValue>) -> Eval<MrbValue> {
    arity(mrb, args, 1, 0)?;
    let sym = ivar_name(mrb, args[0])?;
    Ok(MrbValue::from_bool(mrb.obj(recv).is_some_and(|o| o.ivars.contains_key(&sym))))
}

fn obj_ivars(mrb: &mut MrbState, recv: MrbValue, _: &[MrbValue], _: Option<MrbValue>) -> Eval<MrbValue> {
    let mut names: Vec<_> = mrb
        .obj(recv)
        .map(|o| o.ivars.keys().copied().collect())
        .unwrap_or_default();
    names.retain(|s| mrb.sym_name(*s).starts_with('@'));
    names.sort_by(|a, b| mrb.sym_name(*a).cmp(mrb.sym_name(*b)));
    let items = names.into_iter().map(MrbValue::Symbol).collect();
    Ok(mrb.new_ary(items))
}

fn obj_instance_eval(mrb: &mut MrbState, recv: MrbValue, _: &[MrbValue], block: Option<MrbValue>) -> Eval<MrbValue> {
    let block = need_block(mrb, block)?;
    let cref = mrb.singleton_class_of(recv).ok();
    let rebind = Rebind {
        self_val: recv,
        cref,
        method: None,
    };
    mrb.call_proc(block, &[recv], None, Some(rebind))
}

fn obj_instance_exec(mrb: &mut MrbState, recv: MrbValue, args: &[MrbValue], block: Option<MrbValue>) -> Eval<MrbValue> {
    let block = need_block(mrb, block)?;
    let cref = mrb.singleton_class_of(recv).ok();
    let rebind = Rebind {
        self_val: recv,
        cref,
        method: None,
    };
    mrb.call_proc(block, args, None, Some(rebind))
}

fn obj_dup(mrb: &mut MrbState, recv: MrbValue, _: &[MrbValue], _: Option<MrbValue>) -> Eval<MrbValue> {
    let Some(obj) = mrb.obj(recv) else {
        return Ok(recv);
    };
    let class = mrb.obj_class(recv);
    let ivars = obj.ivars.clone();
    let kind = match &obj.kind {
        ObjKind::Object => ObjKind::Object,
        ObjKind::Exception => ObjKind::Exception,
        ObjKind::String(s) => ObjKind::String(s.clone()),
        ObjKind::Array(items) => ObjKind::Array(items.clone()),
        ObjKind::Range(r) => ObjKind::Range(*r),
        ObjKind::Hash(h) => {
            let entries = h.entries.clone();
            let copy = mrb.new_hash();
            for (k, v) in entries {
                mrb.hash_set(copy, k, v);
            }
            if let Some(o) = mrb.obj_mut(copy) {
                o.ivars = ivars;
            }
            return Ok(copy);
        }
        _ => return Ok(recv),
    };
    let mut copy = RObject::new(class, kind);
    copy.ivars = ivars;
    Ok(MrbValue::Object(mrb.heap.alloc(copy)))
}

fn obj_itself(_: &mut MrbState, recv: MrbValue, _: &[MrbValue], _: Option<MrbValue>) -> Eval<MrbValue> {
    Ok(recv)
}

fn obj_frozen(_: &mut MrbState, recv: MrbValue, _: &[MrbValue], _: Option<MrbValue>) -> Eval<MrbValue> {
    Ok(MrbValue::from_bool(!matches!(recv, MrbValue::Object(_))))
}

fn obj_tap(mrb: &mut MrbState, recv: MrbValue, _: &[MrbValue], block: Option<MrbValue>) -> Eval<MrbValue> {
    let block = need_block(mrb, block)?;
    mrb.call_block(block, &[recv])?;
    Ok(recv)
}

fn obj_then(mrb: &mut MrbState, recv: MrbValue, _: &[MrbValue], block: Option<MrbValue>) -> Eval<MrbValue> {
    let block = need_block(mrb, block)?;
    mrb.call_block(block, &[recv])
}

fn obj_extend(mrb: &mut MrbState, recv: MrbValue, args: &[MrbValue], _: Option<MrbValue>) -> Eval<MrbValue> {
    for &m in args {
        let module = mrb.expect_class(m)?;
        let sclass = mrb.singleton_class_of(recv)?;
        mrb.include_module(sclass, module);
    }
    Ok(recv)
}

fn obj_define_singleton_method(
    mrb: &mut MrbState,
    recv: MrbValue,
    args: &[MrbValue],
    block: Option<MrbValue>,
) -> Eval<MrbValue> {
    let sclass = mrb.singleton_class_of(recv)?;
    define_method_from(mrb, sclass, args, block)
}

// ============================================================================
// nil, true and false
// ============================================================================

fn immediate_to_s(mrb: &mut MrbState, recv: MrbValue, _: &[MrbValue], _: Option<MrbValue>) -> Eval<MrbValue> {
    let s = match recv {
        MrbValue::True => "true",
        MrbValue::False => "false",
        _ => "",
    };
    Ok(mrb.new_str(s))
}

fn immediate_inspect(mrb: &mut MrbState, recv: MrbValue, _: &[MrbValue], _: Option<MrbValue>) -> Eval<MrbValue> {
    let s = match recv {
        MrbValue::True => "true",
        MrbValue::False => "false",
        _ => "nil",
    };
    Ok(mrb.new_str(s))
}

fn immediate_and(mrb: &mut MrbState, recv: MrbValue, args: &[MrbValue], _: Option<MrbValue>) -> Eval<MrbValue> {
    arity(mrb, args, 1, 0)?;
    Ok(MrbValue::from_bool(recv.truthy() && args[0].truthy()))
}

fn immediate_or(mrb: &mut MrbState, recv: MrbValue, args: &[MrbValue], _: Option<MrbValue>) -> Eval<MrbValue> {
    arity(mrb, args, 1, 0)?;
    Ok(MrbValue::from_bool(recv.truthy() || args[0].truthy()))
}

fn nil_to_a(mrb: &mut MrbState, _: MrbValue, _: &[MrbValue], _: Option<MrbValue>) -> Eval<MrbValue> {
    Ok(mrb.ary_new())
}

fn main_to_s(mrb: &mut MrbState, _: MrbValue, _: &[MrbValue], _: Option<MrbValue>) -> Eval<MrbValue> {
    Ok(mrb.new_str("main"))
}

// ============================================================================
// Module
// ============================================================================

fn recv_class(mrb: &mut MrbState, recv: MrbValue) -> Eval<ObjRef> {
    mrb.expect_class(recv)
}

fn mod_name(mrb: &mut MrbState, recv: MrbValue, _: &[MrbValue], _: Option<MrbValue>) -> Eval<MrbValue> {
    let class = recv_class(mrb, recv)?;
    let anonymous = mrb.class_data(class).is_some_and(|d| d.name.is_none() && d.attached.is_none());
    if anonymous {
        return Ok(MrbValue::Nil);
    }
    let name = mrb.class_name(class);
    Ok(mrb.new_str(name))
}

fn mod_to_s(mrb: &mut MrbState, recv: MrbValue, _: &[MrbValue], _: Option<MrbValue>) -> Eval<MrbValue> {
    let class = recv_class(mrb, recv)?;
    let name = mrb.class_name(class);
    Ok(mrb.new_str(name))
}

fn mod_eqq(mrb: &mut MrbState, recv: MrbValue, args: &[MrbValue], _: Option<MrbValue>) -> Eval<MrbValue> {
    arity(mrb, args, 1, 0)?;
    let class = recv_class(mrb, recv)?;
    Ok(MrbValue::from_bool(mrb.obj_is_kind_of(args[0], class)))
}

fn mod_lt(mrb: &mut MrbState, recv: MrbValue, args: &[MrbValue], _: Option<MrbValue>) -> Eval<MrbValue> {
    arity(mrb, args, 1, 0)?;
    let class = recv_class(mrb, recv)?;
    let other = mrb.expect_class(args[0])?;
    if class == other {
        return Ok(MrbValue::False);
    }
    Ok(MrbValue::from_bool(mrb.ancestors(class).contains(&other)))
}

fn mod_le(mrb: &mut MrbState, recv: MrbValue, args: &[MrbValue], _: Option<MrbValue>) -> Eval<MrbValue> {
    arity(mrb, args, 1, 0)?;
    let class = recv_class(mrb, recv)?;
    let other = mrb.expect_class(args[0])?;
    Ok(MrbValue::from_bool(mrb.ancestors(class).contains(&other)))
}

fn mod_ancestors(mrb: &mut MrbState, recv: MrbValue, _: &[MrbValue], _: Option<MrbValue>) -> Eval<MrbValue> {
    let class = recv_class(mrb, recv)?;
    let items = mrb.ancestors(class).into_iter().map(MrbValue::Object).collect();
    Ok(mrb.new_ary(items))
}

fn mod_include(mrb: &mut MrbState, recv: MrbValue, args: &[MrbValue], _: Option<MrbValue>) -> Eval<MrbValue> {
    let class = recv_class(mrb, recv)?;
    for &m in args {
        let module = mrb.expect_class(m)?;
        if !mrb.is_module(module) {
            return Err(mrb.type_error("wrong argument type Class (expected Module)"));
        }
        mrb.include_module(class, module);
    }
    Ok(recv)
}

fn mod_include_p(mrb: &mut MrbState, recv: MrbValue, args: &[MrbValue], _: Option<MrbValue>) -> Eval<MrbValue> {
    arity(mrb, args, 1, 0)?;
    let class = recv_class(mrb, recv)?;
    let module = mrb.expect_class(args[0])?;
    Ok(MrbValue::from_bool(
        class != module && mrb.is_module(module) && mrb.ancestors(class).contains(&module),
    ))
}

fn define_method_from(mrb: &mut MrbState, class: ObjRef, args: &[MrbValue], block: Option<MrbValue>) -> Eval<MrbValue> {
    mrb.check_arity(args.len(), 1, 1, false)?;
    let mid = sym_arg(mrb, args[0])?;
    let body = match (args.get(1), block) {
        (Some(&p), _) if mrb.is_proc(p) => p,
        (None, Some(b)) => b,
        _ => return Err(mrb.arg_error("tried to create Proc object without a block")),
    };
    if let Some(data) = mrb.class_data_mut(class) {
        data.methods.insert(mid, Method::Proc(body));
    }
    Ok(MrbValue::Symbol(mid))
}

fn mod_define_method(mrb: &mut MrbState, recv: MrbValue, args: &[MrbValue], block: Option<MrbValue>) -> Eval<MrbValue> {
    let class = recv_class(mrb, recv)?;
    define_method_from(mrb, class, args, block)
}

fn define_attrs(mrb: &mut MrbState, recv: MrbValue, args: &[MrbValue], reader: bool, writer: bool) -> Eval<MrbValue> {
    let class = recv_class(mrb, recv)?;
    let mut defined = Vec::new();
    for &a in args {
        let sym = sym_arg(mrb, a)?;
        let name = mrb.sym_name(sym).to_string();
        let ivar = mrb.intern(&format!("@{}", name));
        if reader {
            if let Some(data) = mrb.class_data_mut(class) {
                data.methods.insert(sym, Method::AttrReader(ivar));
            }
            defined.push(MrbValue::Symbol(sym));
        }
        if writer {
            let setter = mrb.intern(&format!("{}=", name));
            if let Some(data) = mrb.class_data_mut(class) {
                data.methods.insert(setter, Method::AttrWriter(ivar));
            }
            defined.push(MrbValue::Symbol(setter));
        }
    }
    Ok(mrb.new_ary(defined))
}

fn mod_attr_reader(mrb: &mut MrbState, recv: MrbValue, args: &[MrbValue], _: Option<MrbValue>) -> Eval<MrbValue> {
    define_attrs(mrb, recv, args, true, false)
}

fn mod_attr_writer(mrb: &mut MrbState, recv: MrbValue, args: &[MrbValue], _: Option<MrbValue>) -> Eval<MrbValue> {
    define_attrs(mrb, recv, args, false, true)
}

fn mod_attr_accessor(mrb: &mut MrbState, recv: MrbValue, args: &[MrbValue], _: Option<MrbValue>) -> Eval<MrbValue> {
    define_attrs(mrb, recv, args, true, true)
}

fn mod_const_get(mrb: &mut MrbState, recv: MrbValue, args: &[MrbValue], _: Option<MrbValue>) -> Eval<MrbValue> {
    arity(mrb, args, 1, 0)?;
    let mut class = recv_class(mrb, recv)?;
    let path = match args[0] {
        MrbValue::Symbol(s) => mrb.sym_name(s).to_string(),
        v => super::str_arg(mrb, v)?,
    };
    let mut value = MrbValue::Nil;
    for part in path.split("::").filter(|p| !p.is_empty()) {
        let sym = mrb.intern(part);
        value = match mrb.const_get(class, sym) {
            Some(v) => v,
            None => return Err(mrb.name_error(format!("uninitialized constant {}", part))),
        };
        if let Some(c) = value.as_obj().filter(|c| mrb.class_data(*c).is_some()) {
            class = c;
        }
    }
    Ok(value)
}

fn mod_const_set(mrb: &mut MrbState, recv: MrbValue, args: &[MrbValue], _: Option<MrbValue>) -> Eval<MrbValue> {
    arity(mrb, args, 2, 0)?;
    let class = recv_class(mrb, recv)?;
    let sym = sym_arg(mrb, args[0])?;
    mrb.set_const(class, sym, args[1]);
    Ok(args[1])
}

fn mod_const_defined(mrb: &mut MrbState, recv: MrbValue, args: &[MrbValue], _: Option<MrbValue>) -> Eval<MrbValue> {
    mrb.check_arity(args.len(), 1, 1, false)?;
    let class = recv_class(mrb, recv)?;
    let sym = sym_arg(mrb, args[0])?;
    Ok(MrbValue::from_bool(mrb.const_defined(class, sym)))
}

fn mod_constants(mrb: &mut MrbState, recv: MrbValue, _: &[MrbValue], _: Option<MrbValue>) -> Eval<MrbValue> {
    let class = recv_class(mrb, recv)?;
    let mut names: Vec<_> = mrb
        .class_data(class)
        .map(|d| d.consts.keys().copied().collect())
        .unwrap_or_default();
    names.sort_by(|a, b| mrb.sym_name(*a).cmp(mrb.sym_name(*b)));
    let items = names.into_iter().map(MrbValue::Symbol).collect();
    Ok(mrb.new_ary(items))
}

fn mod_class_eval(mrb: &mut MrbState, recv: MrbValue, args: &[MrbValue], block: Option<MrbValue>) -> Eval<MrbValue> {
    let class = recv_class(mrb, recv)?;
    let block = need_block(mrb, block)?;
    let rebind = Rebind {
        self_val: recv,
        cref: Some(class),
        method: None,
    };
    let args = if args.is_empty() { vec![recv] } else { args.to_vec() };
    mrb.call_proc(block, &args, None, Some(rebind))
}

fn mod_method_defined(mrb: &mut MrbState, recv: MrbValue, args: &[MrbValue], _: Option<MrbValue>) -> Eval<MrbValue> {
    arity(mrb, args, 1, 0)?;
    let class = recv_class(mrb, recv)?;
    let mid = sym_arg(mrb, args[0])?;
    Ok(MrbValue::from_bool(mrb.find_method(class, mid).is_some()))
}

fn mod_instance_methods(mrb: &mut MrbState, recv: MrbValue, args: &[MrbValue], _: Option<MrbValue>) -> Eval<MrbValue> {
    let class = recv_class(mrb, recv)?;
    let inherit = args.first().map(|v| v.truthy()).unwrap_or(true);
    let classes = if inherit {
        mrb.ancestors(class)
    } else {
        vec![class]
    };
    let mut names = Vec::new();
    for c in classes {
        if let Some(d) = mrb.class_data(c) {
            for (k, m) in &d.methods {
                if !matches!(m, Method::Undefined) && !names.contains(k) {
                    names.push(*k);
                }
            }
        }
    }
    names.sort_by(|a, b| mrb.sym_name(*a).cmp(mrb.sym_name(*b)));
    let items = names.into_iter().map(MrbValue::Symbol).collect();
    Ok(mrb.new_ary(items))
}

fn mod_alias_method(mrb: &mut MrbState, recv: MrbValue, args: &[MrbValue], _: Option<MrbValue>) -> Eval<MrbValue> {
    arity(mrb, args, 2, 0)?;
    let class = recv_class(mrb, recv)?;
    let new = sym_arg(mrb, args[0])?;
    let old = sym_arg(mrb, args[1])?;
    let Some((method, _)) = mrb.find_method(class, old) else {
        return Err(mrb.no_method_error(old));
    };
    if let Some(data) = mrb.class_data_mut(class) {
        data.methods.insert(new, method);
    }
    Ok(MrbValue::Symbol(new))
}

fn mod_undef_method(mrb: &mut MrbState, recv: MrbValue, args: &[MrbValue], _: Option<MrbValue>) -> Eval<MrbValue> {
    let class = recv_class(mrb, recv)?;
    for &a in args {
        let mid = sym_arg(mrb, a)?;
        if let Some(data) = mrb.class_data_mut(class) {
            data.methods.insert(mid, Method::Undefined);
        }
    }
    Ok(recv)
}

fn mod_remove_method(mrb: &mut MrbState, recv: MrbValue, args: &[MrbValue], _: Option<MrbValue>) -> Eval<MrbValue> {
    let class = recv_class(mrb, recv)?;
    for &a in args {
        let mid = sym_arg(mrb, a)?;
        let removed = mrb.class_data_mut(class).and_then(|d| d.methods.remove(&mid));
        if removed.is_none() {
            let msg = format!("method '{}' not defined in {}", mrb.sym_name(mid), mrb.class_name(class));
            return Err(mrb.name_error(msg));
        }
    }
    Ok(recv)
}

fn mod_module_function(mrb: &mut MrbState, recv: MrbValue, args: &[MrbValue], _: Option<MrbValue>) -> Eval<MrbValue> {
    let class = recv_class(mrb, recv)?;
    let sclass = mrb.singleton_class_of(recv)?;
    for &a in args {
        let mid = sym_arg(mrb, a)?;
        if let Some((method, _)) = mrb.find_method(class, mid) {
            if let Some(data) = mrb.class_data_mut(sclass) {
                data.methods.insert(mid, method);
            }
        }
    }
    Ok(MrbValue::Nil)
}

fn mod_visibility(_: &mut MrbState, _: MrbValue, args: &[MrbValue], _: Option<MrbValue>) -> Eval<MrbValue> {
    Ok(arg(args, 0))
}

// ============================================================================
// Class
// ============================================================================

fn class_new(mrb: &mut MrbState, recv: MrbValue, args: &[MrbValue], block: Option<MrbValue>) -> Eval<MrbValue> {
    let class = recv_class(mrb, recv)?;
    if class == mrb.core.class {
        mrb.check_arity(args.len(), 0, 1, false)?;
        let sup = match args.first() {
            Some(&v) => {
                let sup = mrb.expect_class(v)?;
                if mrb.is_module(sup) {
                    return Err(mrb.type_error("superclass must be a Class"));
                }
                sup
            }
            None => mrb.core.object,
        };
        let it = mrb.class_data(sup).map(|d| d.instance_type).unwrap_or(InstanceType::Object);
        let new = mrb.new_class(None, Some(sup), it);
        return anonymous_body(mrb, new, block);
    }
    if class == mrb.core.module {
        let new = mrb.new_module(None);
        return anonymous_body(mrb, new, block);
    }
    mrb.instantiate(class, args, block)
}

fn anonymous_body(mrb: &mut MrbState, class: ObjRef, block: Option<MrbValue>) -> Eval<MrbValue> {
    let v = MrbValue::Object(class);
    if let Some(block) = block {
        let rebind = Rebind {
            self_val: v,
            cref: Some(class),
            method: None,
        };
        mrb.call_proc(block, &[v], None, Some(rebind))?;
    }
    Ok(v)
}

fn class_allocate(mrb: &mut MrbState, recv: MrbValue, _: &[MrbValue], _: Option<MrbValue>) -> Eval<MrbValue> {
    let class = recv_class(mrb, recv)?;
    let it = mrb.class_data(class).map(|d| d.instance_type);
    let kind = match it {
        Some(InstanceType::Object) => ObjKind::Object,
        Some(InstanceType::Exception) => ObjKind::Exception,
        Some(InstanceType::String) => ObjKind::String(String::new()),
        Some(InstanceType::Array) => ObjKind::Array(Vec::new()),
        _ => {
            let name = mrb.class_name(class);
            return Err(mrb.type_error(format!("allocator undefined for {}", name)));
        }
    };
    Ok(mrb.alloc(class, kind))
}

fn class_superclass(mrb: &mut MrbState, recv: MrbValue, _: &[MrbValue], _: Option<MrbValue>) -> Eval<MrbValue> {
    let class = recv_class(mrb, recv)?;
    let sup = mrb.class_data(class).and_then(|d| d.superclass);
    Ok(sup.map(MrbValue::Object).unwrap_or(MrbValue::Nil))
}

#[cfg(test)]
mod tests {
    use crate::state::{MrbState, VmOptions};
    use crate::value::MrbValue;

    fn run(src: &str) -> String {
        let mut mrb = MrbState::open(VmOptions::default());
        let v = mrb.load_string(src);
        assert!(mrb.exc().is_none(), "unexpected exception");
        let s = mrb.inspect(v);
        mrb.string_value(s).unwrap_or_default().to_string()
    }

    #[test]
    fn test_immediates_print() {
        assert_eq!(run("[nil, true, false]"), "[nil, true, false]");
        assert_eq!(run("\"#{nil}|#{true}|#{false}\""), "\"|true|false\"");
        assert_eq!(run("true & nil"), "false");
    }

    #[test]
    fn test_attr_accessor_and_inspect() {
        let out = run("class Dog\n attr_accessor :breed\nend\nd = Dog.new\nd.breed = 'pug'\nd.breed");
        assert_eq!(out, "\"pug\"");
    }

    #[test]
    fn test_define_method_with_block() {
        let out = run("class A\n define_method(:twice) { |x| x * 2 }\nend\nA.new.twice(21)");
        assert_eq!(out, "42");
    }

    #[test]
    fn test_class_new_with_superclass() {
        let out = run("B = Class.new(StandardError) { def hi; 'hi'; end }\n[B.name, B.new.hi, B.superclass]");
        assert_eq!(out, "[\"B\", \"hi\", StandardError]");
    }

    #[test]
    fn test_instance_eval_rebinds_self() {
        let out = run("class P\n def initialize\n @x = 7\n end\nend\nP.new.instance_eval { @x }");
        assert_eq!(out, "7");
    }

    #[test]
    fn test_send_and_respond_to() {
        let mut mrb = MrbState::open(VmOptions::default());
        let v = mrb.load_string("[1.send(:+, 2), 1.respond_to?(:+), 1.respond_to?(:nope)]");
        assert_eq!(mrb.ary_entry(v, 0), MrbValue::Fixnum(3));
        assert_eq!(mrb.ary_entry(v, 1), MrbValue::True);
        assert_eq!(mrb.ary_entry(v, 2), MrbValue::False);
    }
}
