use super::{arg, arity, is_plain_symbol, need_block, quote};
use crate::interp::Eval;
use crate::state::MrbState;
use crate::value::MrbValue;

pub(super) fn init(mrb: &mut MrbState) {
    let hash = mrb.core.hash;
    mrb.define_builtin(hash, "initialize", hash_initialize);
    mrb.define_builtin(hash, "[]", hash_aref);
    mrb.define_builtin(hash, "[]=", hash_aset);
    mrb.define_builtin(hash, "store", hash_aset);
    mrb.define_builtin(hash, "fetch", hash_fetch);
    mrb.define_builtin(hash, "dig", hash_dig);
    mrb.define_builtin(hash, "key?", hash_has_key);
    mrb.define_builtin(hash, "has_key?", hash_has_key);
    mrb.define_builtin(hash, "include?", hash_has_key);
    mrb.define_builtin(hash, "member?", hash_has_key);
    mrb.define_builtin(hash, "value?", hash_has_value);
    mrb.define_builtin(hash, "has_value?", hash_has_value);
    mrb.define_builtin(hash, "key", hash_key_for);
    mrb.define_builtin(hash, "delete", hash_delete);
    mrb.define_builtin(hash, "delete_if", hash_delete_if);
    mrb.define_builtin(hash, "keys", hash_keys);
    mrb.define_builtin(hash, "values", hash_values);
    mrb.define_builtin(hash, "values_at", hash_values_at);
    mrb.define_builtin(hash, "size", hash_size);
    mrb.define_builtin(hash, "length", hash_size);
    mrb.define_builtin(hash, "empty?", hash_empty);
    mrb.define_builtin(hash, "each", hash_each);
    mrb.define_builtin(hash, "each_pair", hash_each);
    mrb.define_builtin(hash, "each_key", hash_each_key);
    mrb.define_builtin(hash, "each_value", hash_each_value);
    mrb.define_builtin(hash, "select", hash_select);
    mrb.define_builtin(hash, "filter", hash_select);
    mrb.define_builtin(hash, "reject", hash_reject);
    mrb.define_builtin(hash, "merge", hash_merge);
    mrb.define_builtin(hash, "merge!", hash_update);
    mrb.define_builtin(hash, "update", hash_update);
    mrb.define_builtin(hash, "transform_values", hash_transform_values);
    mrb.define_builtin(hash, "transform_keys", hash_transform_keys);
    mrb.define_builtin(hash, "invert", hash_invert);
    mrb.define_builtin(hash, "to_h", hash_to_h);
    mrb.define_builtin(hash, "clear", hash_clear);
    mrb.define_builtin(hash, "default", hash_default);
    mrb.define_builtin(hash, "default=", hash_set_default);
    mrb.define_builtin(hash, "==", hash_eq);
    mrb.define_builtin(hash, "inspect", hash_inspect);
    mrb.define_builtin(hash, "to_s", hash_inspect);
}

fn entries(mrb: &MrbState, recv: MrbValue) -> Vec<(MrbValue, MrbValue)> {
    mrb.hash_ref(recv).map(|h| h.entries.clone()).unwrap_or_default()
}

fn from_entries(mrb: &mut MrbState, entries: Vec<(MrbValue, MrbValue)>) -> MrbValue {
    let hash = mrb.new_hash();
    for (k, v) in entries {
        mrb.hash_set(hash, k, v);
    }
    hash
}

/// Value for a missing key: the default proc's result, else the default.
fn missing(mrb: &mut MrbState, recv: MrbValue, key: MrbValue) -> Eval<MrbValue> {
    let default_proc = mrb.iv_get(recv, mrb.syms.hash_default_proc);
    if !default_proc.is_nil() {
        return mrb.call_block(default_proc, &[recv, key]);
    }
    Ok(mrb.iv_get(recv, mrb.syms.hash_default))
}

fn hash_initialize(mrb: &mut MrbState, recv: MrbValue, args: &[MrbValue], block: Option<MrbValue>) -> Eval<MrbValue> {
    arity(mrb, args, 0, 1)?;
    if let Some(b) = block {
        if !args.is_empty() {
            return Err(mrb.arg_error("wrong number of arguments (given 1, expected 0)"));
        }
        let sym = mrb.syms.hash_default_proc;
        mrb.iv_set(recv, sym, b);
    } else if let Some(&default) = args.first() {
        let sym = mrb.syms.hash_default;
        mrb.iv_set(recv, sym, default);
    }
    Ok(recv)
}

fn hash_aref(mrb: &mut MrbState, recv: MrbValue, args: &[MrbValue], _: Option<MrbValue>) -> Eval<MrbValue> {
    arity(mrb, args, 1, 0)?;
    match mrb.hash_fetch(recv, args[0]) {
        Some(v) => Ok(v),
        None => missing(mrb, recv, args[0]),
    }
}

fn hash_aset(mrb: &mut MrbState, recv: MrbValue, args: &[MrbValue], _: Option<MrbValue>) -> Eval<MrbValue> {
    arity(mrb, args, 2, 0)?;
    mrb.hash_set(recv, args[0], args[1]);
    Ok(args[1])
}

fn hash_fetch(mrb: &mut MrbState, recv: MrbValue, args: &[MrbValue], block: Option<MrbValue>) -> Eval<MrbValue> {
    arity(mrb, args, 1, 1)?;
    if let Some(v) = mrb.hash_fetch(recv, args[0]) {
        return Ok(v);
    }
    if let Some(b) = block {
        return mrb.call_block(b, &[args[0]]);
    }
    if let Some(&default) = args.get(1) {
        return Ok(default);
    }
    let key = mrb.inspect_str(args[0])?;
    let class = mrb.core.key_error;
    Err(mrb.raise_class(class, format!("key not found: {}", key)))
}

fn hash_dig(mrb: &mut MrbState, recv: MrbValue, args: &[MrbValue], _: Option<MrbValue>) -> Eval<MrbValue> {
    mrb.check_arity(args.len(), 1, 0, true)?;
    let aref = mrb.intern("[]");
    let mut cur = recv;
    for &key in args {
        if cur.is_nil() {
            break;
        }
        cur = mrb.call_method(cur, aref, &[key], None)?;
    }
    Ok(cur)
}

fn hash_has_key(mrb: &mut MrbState, recv: MrbValue, args: &[MrbValue], _: Option<MrbValue>) -> Eval<MrbValue> {
    arity(mrb, args, 1, 0)?;
    Ok(MrbValue::from_bool(mrb.hash_contains(recv, args[0])))
}

fn hash_has_value(mrb: &mut MrbState, recv: MrbValue, args: &[MrbValue], _: Option<MrbValue>) -> Eval<MrbValue> {
    arity(mrb, args, 1, 0)?;
    for (_, v) in entries(mrb, recv) {
        if mrb.values_eq(v, args[0])? {
            return Ok(MrbValue::True);
        }
    }
    Ok(MrbValue::False)
}

fn hash_key_for(mrb: &mut MrbState, recv: MrbValue, args: &[MrbValue], _: Option<MrbValue>) -> Eval<MrbValue> {
    arity(mrb, args, 1, 0)?;
    for (k, v) in entries(mrb, recv) {
        if mrb.values_eq(v, args[0])? {
            return Ok(k);
        }
    }
    Ok(MrbValue::Nil)
}

fn hash_delete(mrb: &mut MrbState, recv: MrbValue, args: &[MrbValue], block: Option<MrbValue>) -> Eval<MrbValue> {
    arity(mrb, args, 1, 0)?;
    match (mrb.hash_delete_key(recv, args[0]), block) {
        (Some(v), _) => Ok(v),
        (None, Some(b)) => mrb.call_block(b, &[args[0]]),
        (None, None) => Ok(MrbValue::Nil),
    }
}

fn hash_delete_if(mrb: &mut MrbState, recv: MrbValue, _: &[MrbValue], block: Option<MrbValue>) -> Eval<MrbValue> {
    let block = need_block(mrb, block)?;
    for (k, v) in entries(mrb, recv) {
        if mrb.call_block(block, &[k, v])?.truthy() {
            mrb.hash_delete_key(recv, k);
        }
    }
    Ok(recv)
}

fn hash_keys(mrb: &mut MrbState, recv: MrbValue, _: &[MrbValue], _: Option<MrbValue>) -> Eval<MrbValue> {
    Ok(mrb.hash_keys(recv))
}

fn hash_values(mrb: &mut MrbState, recv: MrbValue, _: &[MrbValue], _: Option<MrbValue>) -> Eval<MrbValue> {
    let values = entries(mrb, recv).into_iter().map(|(_, v)| v).collect();
    Ok(mrb.new_ary(values))
}

fn hash_values_at(mrb: &mut MrbState, recv: MrbValue, args: &[MrbValue], _: Option<MrbValue>) -> Eval<MrbValue> {
    let mut out = Vec::with_capacity(args.len());
    for &key in args {
        out.push(hash_aref(mrb, recv, &[key], None)?);
    }
    Ok(mrb.new_ary(out))
}

fn hash_size(mrb: &mut MrbState, recv: MrbValue, _: &[MrbValue], _: Option<MrbValue>) -> Eval<MrbValue> {
    Ok(MrbValue::Fixnum(mrb.hash_len(recv) as i64))
}

fn hash_empty(mrb: &mut MrbState, recv: MrbValue, _: &[MrbValue], _: Option<MrbValue>) -> Eval<MrbValue> {
    Ok(MrbValue::from_bool(mrb.hash_len(recv) == 0))
}

fn hash_each(mrb: &mut MrbState, recv: MrbValue, _: &[MrbValue], block: Option<MrbValue>) -> Eval<MrbValue> {
    let block = need_block(mrb, block)?;
    let ai = mrb.arena_save();
    for (k, v) in entries(mrb, recv) {
        let pair = mrb.new_ary(vec![k, v]);
        mrb.call_block(block, &[pair])?;
        mrb.arena_restore(ai);
    }
    Ok(recv)
}

fn hash_each_key(mrb: &mut MrbState, recv: MrbValue, _: &[MrbValue], block: Option<MrbValue>) -> Eval<MrbValue> {
    let block = need_block(mrb, block)?;
    let ai = mrb.arena_save();
    for (k, _) in entries(mrb, recv) {
        mrb.call_block(block, &[k])?;
        mrb.arena_restore(ai);
    }
    Ok(recv)
}

fn hash_each_value(mrb: &mut MrbState, recv: MrbValue, _: &[MrbValue], block: Option<MrbValue>) -> Eval<MrbValue> {
    let block = need_block(mrb, block)?;
    let ai = mrb.arena_save();
    for (_, v) in entries(mrb, recv) {
        mrb.call_block(block, &[v])?;
        mrb.arena_restore(ai);
    }
    Ok(recv)
}

fn filtered(mrb: &mut MrbState, recv: MrbValue, block: Option<MrbValue>, keep: bool) -> Eval<MrbValue> {
    let block = need_block(mrb, block)?;
    let mut out = Vec::new();
    for (k, v) in entries(mrb, recv) {
        if mrb.call_block(block, &[k, v])?.truthy() == keep {
            out.push((k, v));
        }
    }
    Ok(from_entries(mrb, out))
}

fn hash_select(mrb: &mut MrbState, recv: MrbValue, _: &[MrbValue], block: Option<MrbValue>) -> Eval<MrbValue> {
    filtered(mrb, recv, block, true)
}

fn hash_reject(mrb: &mut MrbState, recv: MrbValue, _: &[MrbValue], block: Option<MrbValue>) -> Eval<MrbValue> {
    filtered(mrb, recv, block, false)
}

fn merge_into(mrb: &mut MrbState, target: MrbValue, others: &[MrbValue], block: Option<MrbValue>) -> Eval<()> {
    for &other in others {
        if mrb.hash_ref(other).is_none() {
            let class = mrb.obj_class(other);
            let msg = format!("no implicit conversion of {} into Hash", mrb.class_name(class));
            return Err(mrb.type_error(msg));
        }
        for (k, v) in entries(mrb, other) {
            let v = match (block, mrb.hash_fetch(target, k)) {
                (Some(b), Some(old)) => mrb.call_block(b, &[k, old, v])?,
                _ => v,
            };
            mrb.hash_set(target, k, v);
        }
    }
    Ok(())
}

fn hash_merge(mrb: &mut MrbState, recv: MrbValue, args: &[MrbValue], block: Option<MrbValue>) -> Eval<MrbValue> {
    let mine = entries(mrb, recv);
    let out = from_entries(mrb, mine);
    merge_into(mrb, out, args, block)?;
    Ok(out)
}

fn hash_update(mrb: &mut MrbState, recv: MrbValue, args: &[MrbValue], block: Option<MrbValue>) -> Eval<MrbValue> {
    merge_into(mrb, recv, args, block)?;
    Ok(recv)
}

fn hash_transform_values(mrb: &mut MrbState, recv: MrbValue, _: &[MrbValue], block: Option<MrbValue>) -> Eval<MrbValue> {
    let block = need_block(mrb, block)?;
    let mut out = Vec::new();
    for (k, v) in entries(mrb, recv) {
        out.push((k, mrb.call_block(block, &[v])?));
    }
    Ok(from_entries(mrb, out))
}

fn hash_transform_keys(mrb: &mut MrbState, recv: MrbValue, _: &[MrbValue], block: Option<MrbValue>) -> Eval<MrbValue> {
    let block = need_block(mrb, block)?;
    let mut out = Vec::new();
    for (k, v) in entries(mrb, recv) {
        out.push((mrb.call_block(block, &[k])?, v));
    }
    Ok(from_entries(mrb, out))
}

fn hash_invert(mrb: &mut MrbState, recv: MrbValue, _: &[MrbValue], _: Option<MrbValue>) -> Eval<MrbValue> {
    let out = entries(mrb, recv).into_iter().map(|(k, v)| (v, k)).collect();
    Ok(from_entries(mrb, out))
}

fn hash_to_h(mrb: &mut MrbState, recv: MrbValue, _: &[MrbValue], block: Option<MrbValue>) -> Eval<MrbValue> {
    let Some(b) = block else {
        return Ok(recv);
    };
    let out = mrb.new_hash();
    for (k, v) in entries(mrb, recv) {
        let pair = mrb.call_block(b, &[k, v])?;
        if mrb.ary_len(pair) != 2 {
            return Err(mrb.type_error("wrong element type (expected array of 2 elements)"));
        }
        let (nk, nv) = (mrb.ary_entry(pair, 0), mrb.ary_entry(pair, 1));
        mrb.hash_set(out, nk, nv);
    }
    Ok(out)
}

fn hash_clear(mrb: &mut MrbState, recv: MrbValue, _: &[MrbValue], _: Option<MrbValue>) -> Eval<MrbValue> {
    if let Some(h) = mrb.hash_mut(recv) {
        h.clear();
    }
    Ok(recv)
}

fn hash_default(mrb: &mut MrbState, recv: MrbValue, args: &[MrbValue], _: Option<MrbValue>) -> Eval<MrbValue> {
    arity(mrb, args, 0, 1)?;
    match args.first() {
        Some(&key) => missing(mrb, recv, key),
        None => Ok(mrb.iv_get(recv, mrb.syms.hash_default)),
    }
}

fn hash_set_default(mrb: &mut MrbState, recv: MrbValue, args: &[MrbValue], _: Option<MrbValue>) -> Eval<MrbValue> {
    arity(mrb, args, 1, 0)?;
    let (default, default_proc) = (mrb.syms.hash_default, mrb.syms.hash_default_proc);
    mrb.iv_set(recv, default, args[0]);
    mrb.iv_set(recv, default_proc, MrbValue::Nil);
    Ok(args[0])
}

fn hash_eq(mrb: &mut MrbState, recv: MrbValue, args: &[MrbValue], _: Option<MrbValue>) -> Eval<MrbValue> {
    arity(mrb, args, 1, 0)?;
    let other = arg(args, 0);
    if recv.identical(other) {
        return Ok(MrbValue::True);
    }
    if mrb.hash_ref(other).is_none() || mrb.hash_len(other) != mrb.hash_len(recv) {
        return Ok(MrbValue::False);
    }
    for (k, v) in entries(mrb, recv) {
        match mrb.hash_fetch(other, k) {
            Some(ov) if mrb.values_eq(v, ov)? => {}
            _ => return Ok(MrbValue::False),
        }
    }
    Ok(MrbValue::True)
}

fn hash_inspect(mrb: &mut MrbState, recv: MrbValue, _: &[MrbValue], _: Option<MrbValue>) -> Eval<MrbValue> {
    let mut out = String::from("{");
    for (i, (k, v)) in entries(mrb, recv).into_iter().enumerate() {
        if i > 0 {
            out.push_str(", ");
        }
        match k {
            MrbValue::Symbol(sym) => {
                let name = mrb.sym_name(sym);
                if is_plain_symbol(name) {
                    out.push_str(name);
                } else {
                    out.push_str(&quote(name));
                }
                out.push_str(": ");
            }
            _ => {
                out.push_str(&mrb.inspect_str(k)?);
                out.push_str(" => ");
            }
        }
        if v.identical(recv) {
            out.push_str("{...}");
        } else {
            out.push_str(&mrb.inspect_str(v)?);
        }
    }
    out.push('}');
    Ok(mrb.new_str(out))
}

#[cfg(test)]
mod tests {
    use crate::state::{MrbState, VmOptions};

    fn eval_str(src: &str) -> String {
        let mut mrb = MrbState::open(VmOptions::default());
        let v = mrb.load_string(src);
        assert!(mrb.exc().is_none(), "unexpected exception in {:?}", src);
        let s = mrb.inspect(v);
        mrb.string_value(s).unwrap_or_default().to_string()
    }

    #[test]
    fn test_inspect_mixed_keys() {
        assert_eq!(eval_str("{ 'a' => 1, b: 2 }"), "{\"a\" => 1, b: 2}");
        assert_eq!(eval_str("{}"), "{}");
    }

    #[test]
    fn test_defaults() {
        assert_eq!(eval_str("h = Hash.new(0)\nh[:x] += 2\nh[:x]"), "2");
        assert_eq!(eval_str("h = Hash.new { |hash, k| hash[k] = k * 2 }\nh[4]\nh"), "{4 => 8}");
    }

    #[test]
    fn test_fetch_missing_raises_key_error() {
        let mut mrb = MrbState::open(VmOptions::default());
        mrb.load_string("{}.fetch(:nope)");
        let exc = mrb.exc().expect("exception");
        let class = mrb.obj_class(exc);
        assert_eq!(mrb.class_name(class), "KeyError");
    }

    #[test]
    fn test_merge_and_select() {
        assert_eq!(eval_str("{ a: 1 }.merge({ a: 2, b: 3 }) { |k, old, new| old + new }"), "{a: 3, b: 3}");
        assert_eq!(eval_str("{ a: 1, b: 2 }.select { |k, v| v > 1 }"), "{b: 2}");
        assert_eq!(eval_str("{ a: 1, b: 2 }.map { |k, v| v }"), "[1, 2]");
    }
}
