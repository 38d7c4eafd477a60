//! Array and the Enumerable methods shared with Range and Hash.

use super::numeric::{compare_values, ordering_value};
use super::{arg, arity, int_arg, need_block, range_span, seq_span, str_arg, sym_arg};
use crate::interp::Eval;
use crate::object::HashKey;
use crate::state::MrbState;
use crate::value::MrbValue;
use rustc_hash::{FxHashSet, FxHasher};
use std::cmp::Ordering;
use std::hash::Hasher;

pub(super) fn init(mrb: &mut MrbState) {
    let array = mrb.core.array;
    let enumerable = mrb.define_module("Enumerable");
    for class in [array, enumerable] {
        mrb.define_builtin(class, "to_a", enum_to_a);
        mrb.define_builtin(class, "entries", enum_to_a);
        mrb.define_builtin(class, "map", enum_map);
        mrb.define_builtin(class, "collect", enum_map);
        mrb.define_builtin(class, "flat_map", enum_flat_map);
        mrb.define_builtin(class, "each_with_index", enum_each_with_index);
        mrb.define_builtin(class, "each_with_object", enum_each_with_object);
        mrb.define_builtin(class, "select", enum_select);
        mrb.define_builtin(class, "filter", enum_select);
        mrb.define_builtin(class, "reject", enum_reject);
        mrb.define_builtin(class, "partition", enum_partition);
        mrb.define_builtin(class, "group_by", enum_group_by);
        mrb.define_builtin(class, "find", enum_find);
        mrb.define_builtin(class, "detect", enum_find);
        mrb.define_builtin(class, "find_index", enum_find_index);
        mrb.define_builtin(class, "inject", enum_inject);
        mrb.define_builtin(class, "reduce", enum_inject);
        mrb.define_builtin(class, "sum", enum_sum);
        mrb.define_builtin(class, "count", enum_count);
        mrb.define_builtin(class, "include?", enum_include);
        mrb.define_builtin(class, "member?", enum_include);
        mrb.define_builtin(class, "any?", enum_any);
        mrb.define_builtin(class, "all?", enum_all);
        mrb.define_builtin(class, "none?", enum_none);
        mrb.define_builtin(class, "min", enum_min);
        mrb.define_builtin(class, "max", enum_max);
        mrb.define_builtin(class, "min_by", enum_min_by);
        mrb.define_builtin(class, "max_by", enum_max_by);
        mrb.define_builtin(class, "sort", enum_sort);
        mrb.define_builtin(class, "sort_by", enum_sort_by);
        mrb.define_builtin(class, "uniq", enum_uniq);
        mrb.define_builtin(class, "take_while", enum_take_while);
        mrb.define_builtin(class, "drop_while", enum_drop_while);
        mrb.define_builtin(class, "each_slice", enum_each_slice);
        mrb.define_builtin(class, "zip", enum_zip);
        mrb.define_builtin(class, "to_h", enum_to_h);
    }
    let range = mrb.core.range;
    let hash = mrb.core.hash;
    mrb.include_module(array, enumerable);
    mrb.include_module(range, enumerable);
    mrb.include_module(hash, enumerable);

    mrb.define_builtin(array, "initialize", ary_initialize);
    mrb.define_builtin(array, "each", ary_each);
    mrb.define_builtin(array, "each_index", ary_each_index);
    mrb.define_builtin(array, "reverse_each", ary_reverse_each);
    mrb.define_builtin(array, "map!", ary_map_bang);
    mrb.define_builtin(array, "collect!", ary_map_bang);
    mrb.define_builtin(array, "select!", ary_select_bang);
    mrb.define_builtin(array, "reject!", ary_reject_bang);
    mrb.define_builtin(array, "delete_if", ary_delete_if);
    mrb.define_builtin(array, "sort!", ary_sort_bang);
    mrb.define_builtin(array, "[]", ary_aref);
    mrb.define_builtin(array, "slice", ary_aref);
    mrb.define_builtin(array, "[]=", ary_aset);
    mrb.define_builtin(array, "at", ary_at);
    mrb.define_builtin(array, "fetch", ary_fetch);
    mrb.define_builtin(array, "dig", ary_dig);
    mrb.define_builtin(array, "first", ary_first);
    mrb.define_builtin(array, "last", ary_last);
    mrb.define_builtin(array, "take", ary_take);
    mrb.define_builtin(array, "drop", ary_drop);
    mrb.define_builtin(array, "push", ary_push);
    mrb.define_builtin(array, "append", ary_push);
    mrb.define_builtin(array, "<<", ary_push);
    mrb.define_builtin(array, "pop", ary_pop);
    mrb.define_builtin(array, "shift", ary_shift);
    mrb.define_builtin(array, "unshift", ary_unshift);
    mrb.define_builtin(array, "prepend", ary_unshift);
    mrb.define_builtin(array, "insert", ary_insert);
    mrb.define_builtin(array, "concat", ary_concat);
    mrb.define_builtin(array, "delete", ary_delete);
    mrb.define_builtin(array, "delete_at", ary_delete_at);
    mrb.define_builtin(array, "clear", ary_clear);
    mrb.define_builtin(array, "replace", ary_replace);
    mrb.define_builtin(array, "size", ary_size);
    mrb.define_builtin(array, "length", ary_size);
    mrb.define_builtin(array, "empty?", ary_empty);
    mrb.define_builtin(array, "index", ary_index);
    mrb.define_builtin(array, "join", ary_join);
    mrb.define_builtin(array, "reverse", ary_reverse);
    mrb.define_builtin(array, "flatten", ary_flatten);
    mrb.define_builtin(array, "compact", ary_compact);
    mrb.define_builtin(array, "+", ary_plus);
    mrb.define_builtin(array, "-", ary_minus);
    mrb.define_builtin(array, "*", ary_times);
    mrb.define_builtin(array, "&", ary_and);
    mrb.define_builtin(array, "|", ary_or);
    mrb.define_builtin(array, "==", ary_eq);
    mrb.define_builtin(array, "eql?", ary_eq);
    mrb.define_builtin(array, "<=>", ary_cmp);
    mrb.define_builtin(array, "hash", ary_hash);
    mrb.define_builtin(array, "inspect", ary_inspect);
    mrb.define_builtin(array, "to_s", ary_inspect);
}

// ============================================================================
// Helpers
// ============================================================================

fn items(mrb: &MrbState, recv: MrbValue) -> Vec<MrbValue> {
    mrb.ary_ref(recv).cloned().unwrap_or_default()
}

fn len(mrb: &MrbState, recv: MrbValue) -> usize {
    mrb.ary_ref(recv).map(Vec::len).unwrap_or(0)
}

fn with_items<R>(mrb: &mut MrbState, recv: MrbValue, f: impl FnOnce(&mut Vec<MrbValue>) -> R) -> Option<R> {
    mrb.ary_mut(recv).map(f)
}

/// The elements an Enumerable method walks: array elements, range members
/// or hash `[key, value]` pairs.
pub(super) fn to_items(mrb: &mut MrbState, recv: MrbValue) -> Eval<Vec<MrbValue>> {
    if let Some(items) = mrb.ary_ref(recv) {
        return Ok(items.clone());
    }
    if let Some(r) = mrb.range_ref(recv) {
        return super::range::range_to_vec(mrb, r);
    }
    if let Some(entries) = mrb.hash_ref(recv).map(|h| h.entries.clone()) {
        return Ok(entries.into_iter().map(|(k, v)| mrb.new_ary(vec![k, v])).collect());
    }
    let class = mrb.obj_class(recv);
    let msg = format!("can't iterate {}", mrb.class_name(class));
    Err(mrb.type_error(msg))
}

/// Stable merge sort with a comparator that may raise.
pub(super) fn sort_values(
    mrb: &mut MrbState,
    mut v: Vec<MrbValue>,
    cmp: &mut dyn FnMut(&mut MrbState, MrbValue, MrbValue) -> Eval<Ordering>,
) -> Eval<Vec<MrbValue>> {
    if v.len() <= 1 {
        return Ok(v);
    }
    let right = v.split_off(v.len() / 2);
    let left = sort_values(mrb, v, cmp)?;
    let right = sort_values(mrb, right, cmp)?;
    let mut out = Vec::with_capacity(left.len() + right.len());
    let (mut l, mut r) = (left.into_iter().peekable(), right.into_iter().peekable());
    while let (Some(&a), Some(&b)) = (l.peek(), r.peek()) {
        if cmp(mrb, a, b)? == Ordering::Greater {
            out.push(b);
            r.next();
        } else {
            out.push(a);
            l.next();
        }
    }
    out.extend(l);
    out.extend(r);
    Ok(out)
}

fn block_cmp(mrb: &mut MrbState, block: Option<MrbValue>, a: MrbValue, b: MrbValue) -> Eval<Ordering> {
    match block {
        Some(blk) => match mrb.call_block(blk, &[a, b])? {
            MrbValue::Fixnum(n) => Ok(n.cmp(&0)),
            _ => Err(super::numeric::compare_failed(mrb, a, b)),
        },
        None => compare_values(mrb, a, b),
    }
}

fn hash_key_of(mrb: &MrbState, v: MrbValue) -> HashKey {
    mrb.hash_key(v)
}

// ============================================================================
// Enumerable
// ============================================================================

fn enum_to_a(mrb: &mut MrbState, recv: MrbValue, _: &[MrbValue], _: Option<MrbValue>) -> Eval<MrbValue> {
    let items = to_items(mrb, recv)?;
    Ok(mrb.new_ary(items))
}

fn enum_map(mrb: &mut MrbState, recv: MrbValue, _: &[MrbValue], block: Option<MrbValue>) -> Eval<MrbValue> {
    let block = need_block(mrb, block)?;
    let mut out = Vec::new();
    for v in to_items(mrb, recv)? {
        out.push(mrb.call_block(block, &[v])?);
    }
    Ok(mrb.new_ary(out))
}

fn enum_flat_map(mrb: &mut MrbState, recv: MrbValue, _: &[MrbValue], block: Option<MrbValue>) -> Eval<MrbValue> {
    let block = need_block(mrb, block)?;
    let mut out = Vec::new();
    for v in to_items(mrb, recv)? {
        let r = mrb.call_block(block, &[v])?;
        match mrb.ary_ref(r) {
            Some(inner) => out.extend_from_slice(inner),
            None => out.push(r),
        }
    }
    Ok(mrb.new_ary(out))
}

fn enum_each_with_index(mrb: &mut MrbState, recv: MrbValue, _: &[MrbValue], block: Option<MrbValue>) -> Eval<MrbValue> {
    let block = need_block(mrb, block)?;
    let ai = mrb.arena_save();
    for (i, v) in to_items(mrb, recv)?.into_iter().enumerate() {
        mrb.call_block(block, &[v, MrbValue::Fixnum(i as i64)])?;
        mrb.arena_restore(ai);
    }
    Ok(recv)
}

fn enum_each_with_object(mrb: &mut MrbState, recv: MrbValue, args: &[MrbValue], block: Option<MrbValue>) -> Eval<MrbValue> {
    arity(mrb, args, 1, 0)?;
    let block = need_block(mrb, block)?;
    let memo = args[0];
    for v in to_items(mrb, recv)? {
        mrb.call_block(block, &[v, memo])?;
    }
    Ok(memo)
}

fn filter_items(mrb: &mut MrbState, recv: MrbValue, block: Option<MrbValue>, keep: bool) -> Eval<Vec<MrbValue>> {
    let block = need_block(mrb, block)?;
    let mut out = Vec::new();
    for v in to_items(mrb, recv)? {
        if mrb.call_block(block, &[v])?.truthy() == keep {
            out.push(v);
        }
    }
    Ok(out)
}

fn enum_select(mrb: &mut MrbState, recv: MrbValue, _: &[MrbValue], block: Option<MrbValue>) -> Eval<MrbValue> {
    let out = filter_items(mrb, recv, block, true)?;
    Ok(mrb.new_ary(out))
}

fn enum_reject(mrb: &mut MrbState, recv: MrbValue, _: &[MrbValue], block: Option<MrbValue>) -> Eval<MrbValue> {
    let out = filter_items(mrb, recv, block, false)?;
    Ok(mrb.new_ary(out))
}

fn enum_partition(mrb: &mut MrbState, recv: MrbValue, _: &[MrbValue], block: Option<MrbValue>) -> Eval<MrbValue> {
    let block = need_block(mrb, block)?;
    let (mut yes, mut no) = (Vec::new(), Vec::new());
    for v in to_items(mrb, recv)? {
        if mrb.call_block(block, &[v])?.truthy() {
            yes.push(v);
        } else {
            no.push(v);
        }
    }
    let (yes, no) = (mrb.new_ary(yes), mrb.new_ary(no));
    Ok(mrb.new_ary(vec![yes, no]))
}

fn enum_group_by(mrb: &mut MrbState, recv: MrbValue, _: &[MrbValue], block: Option<MrbValue>) -> Eval<MrbValue> {
    let block = need_block(mrb, block)?;
    let groups = mrb.new_hash();
    for v in to_items(mrb, recv)? {
        let key = mrb.call_block(block, &[v])?;
        match mrb.hash_fetch(groups, key) {
            Some(bucket) => mrb.ary_push(bucket, v),
            None => {
                let bucket = mrb.new_ary(vec![v]);
                mrb.hash_set(groups, key, bucket);
            }
        }
    }
    Ok(groups)
}

fn enum_find(mrb: &mut MrbState, recv: MrbValue, _: &[MrbValue], block: Option<MrbValue>) -> Eval<MrbValue> {
    let block = need_block(mrb, block)?;
    for v in to_items(mrb, recv)? {
        if mrb.call_block(block, &[v])?.truthy() {
            return Ok(v);
        }
    }
    Ok(MrbValue::Nil)
}

fn enum_find_index(mrb: &mut MrbState, recv: MrbValue, args: &[MrbValue], block: Option<MrbValue>) -> Eval<MrbValue> {
    arity(mrb, args, 0, 1)?;
    for (i, v) in to_items(mrb, recv)?.into_iter().enumerate() {
        let hit = match (args.first(), block) {
            (Some(&target), _) => mrb.values_eq(v, target)?,
            (None, Some(b)) => mrb.call_block(b, &[v])?.truthy(),
            (None, None) => {
                need_block(mrb, None)?;
                false
            }
        };
        if hit {
            return Ok(MrbValue::Fixnum(i as i64));
        }
    }
    Ok(MrbValue::Nil)
}

fn enum_inject(mrb: &mut MrbState, recv: MrbValue, args: &[MrbValue], block: Option<MrbValue>) -> Eval<MrbValue> {
    arity(mrb, args, 0, 2)?;
    let mut items = to_items(mrb, recv)?.into_iter();
    let (init, op) = match (args, block) {
        ([], Some(_)) => (None, None),
        ([init], Some(_)) => (Some(*init), None),
        ([op], None) => (None, Some(sym_arg(mrb, *op)?)),
        ([init, op], _) => (Some(*init), Some(sym_arg(mrb, *op)?)),
        _ => {
            need_block(mrb, None)?;
            (None, None)
        }
    };
    let mut acc = match init.or_else(|| items.next()) {
        Some(v) => v,
        None => return Ok(MrbValue::Nil),
    };
    for v in items {
        acc = match (op, block) {
            (Some(op), _) => mrb.call_method(acc, op, &[v], None)?,
            (None, Some(b)) => mrb.call_block(b, &[acc, v])?,
            (None, None) => acc,
        };
    }
    Ok(acc)
}

fn enum_sum(mrb: &mut MrbState, recv: MrbValue, args: &[MrbValue], block: Option<MrbValue>) -> Eval<MrbValue> {
    arity(mrb, args, 0, 1)?;
    let plus = mrb.intern("+");
    let mut acc = args.first().copied().unwrap_or(MrbValue::Fixnum(0));
    for v in to_items(mrb, recv)? {
        let v = match block {
            Some(b) => mrb.call_block(b, &[v])?,
            None => v,
        };
        acc = mrb.call_method(acc, plus, &[v], None)?;
    }
    Ok(acc)
}

fn enum_count(mrb: &mut MrbState, recv: MrbValue, args: &[MrbValue], block: Option<MrbValue>) -> Eval<MrbValue> {
    arity(mrb, args, 0, 1)?;
    let items = to_items(mrb, recv)?;
    let mut n = 0;
    for v in items.iter().copied() {
        let hit = match (args.first(), block) {
            (Some(&target), _) => mrb.values_eq(v, target)?,
            (None, Some(b)) => mrb.call_block(b, &[v])?.truthy(),
            (None, None) => true,
        };
        if hit {
            n += 1;
        }
    }
    Ok(MrbValue::Fixnum(n))
}

fn enum_include(mrb: &mut MrbState, recv: MrbValue, args: &[MrbValue], _: Option<MrbValue>) -> Eval<MrbValue> {
    arity(mrb, args, 1, 0)?;
    for v in to_items(mrb, recv)? {
        if mrb.values_eq(v, args[0])? {
            return Ok(MrbValue::True);
        }
    }
    Ok(MrbValue::False)
}

/// Whether some element's block result (or the element itself) has
/// truthiness `want`.
fn matching(mrb: &mut MrbState, recv: MrbValue, block: Option<MrbValue>, want: bool) -> Eval<bool> {
    for v in to_items(mrb, recv)? {
        let t = match block {
            Some(b) => mrb.call_block(b, &[v])?.truthy(),
            None => v.truthy(),
        };
        if t == want {
            return Ok(true);
        }
    }
    Ok(false)
}

fn enum_any(mrb: &mut MrbState, recv: MrbValue, _: &[MrbValue], block: Option<MrbValue>) -> Eval<MrbValue> {
    Ok(MrbValue::from_bool(matching(mrb, recv, block, true)?))
}

fn enum_all(mrb: &mut MrbState, recv: MrbValue, _: &[MrbValue], block: Option<MrbValue>) -> Eval<MrbValue> {
    Ok(MrbValue::from_bool(!matching(mrb, recv, block, false)?))
}

fn enum_none(mrb: &mut MrbState, recv: MrbValue, _: &[MrbValue], block: Option<MrbValue>) -> Eval<MrbValue> {
    Ok(MrbValue::from_bool(!matching(mrb, recv, block, true)?))
}

fn extreme(mrb: &mut MrbState, recv: MrbValue, block: Option<MrbValue>, want: Ordering) -> Eval<MrbValue> {
    let mut best: Option<MrbValue> = None;
    for v in to_items(mrb, recv)? {
        best = match best {
            None => Some(v),
            Some(b) if block_cmp(mrb, block, v, b)? == want => Some(v),
            keep => keep,
        };
    }
    Ok(best.unwrap_or(MrbValue::Nil))
}

fn enum_min(mrb: &mut MrbState, recv: MrbValue, _: &[MrbValue], block: Option<MrbValue>) -> Eval<MrbValue> {
    extreme(mrb, recv, block, Ordering::Less)
}

fn enum_max(mrb: &mut MrbState, recv: MrbValue, _: &[MrbValue], block: Option<MrbValue>) -> Eval<MrbValue> {
    extreme(mrb, recv, block, Ordering::Greater)
}

fn extreme_by(mrb: &mut MrbState, recv: MrbValue, block: Option<MrbValue>, want: Ordering) -> Eval<MrbValue> {
    let block = need_block(mrb, block)?;
    let mut best: Option<(MrbValue, MrbValue)> = None;
    for v in to_items(mrb, recv)? {
        let key = mrb.call_block(block, &[v])?;
        best = match best {
            None => Some((v, key)),
            Some((_, bk)) if compare_values(mrb, key, bk)? == want => Some((v, key)),
            keep => keep,
        };
    }
    Ok(best.map(|(v, _)| v).unwrap_or(MrbValue::Nil))
}

fn enum_min_by(mrb: &mut MrbState, recv: MrbValue, _: &[MrbValue], block: Option<MrbValue>) -> Eval<MrbValue> {
    extreme_by(mrb, recv, block, Ordering::Less)
}

fn enum_max_by(mrb: &mut MrbState, recv: MrbValue, _: &[MrbValue], block: Option<MrbValue>) -> Eval<MrbValue> {
    extreme_by(mrb, recv, block, Ordering::Greater)
}

fn enum_sort(mrb: &mut MrbState, recv: MrbValue, _: &[MrbValue], block: Option<MrbValue>) -> Eval<MrbValue> {
    let items = to_items(mrb, recv)?;
    let sorted = sort_values(mrb, items, &mut |mrb, a, b| block_cmp(mrb, block, a, b))?;
    Ok(mrb.new_ary(sorted))
}

fn enum_sort_by(mrb: &mut MrbState, recv: MrbValue, _: &[MrbValue], block: Option<MrbValue>) -> Eval<MrbValue> {
    let block = need_block(mrb, block)?;
    let items = to_items(mrb, recv)?;
    let mut pairs = Vec::with_capacity(items.len());
    for v in items {
        let key = mrb.call_block(block, &[v])?;
        pairs.push(mrb.new_ary(vec![key, v]));
    }
    let sorted = sort_values(mrb, pairs, &mut |mrb, a, b| {
        let (ka, kb) = (mrb.ary_entry(a, 0), mrb.ary_entry(b, 0));
        compare_values(mrb, ka, kb)
    })?;
    let out = sorted.into_iter().map(|p| mrb.ary_entry(p, 1)).collect();
    Ok(mrb.new_ary(out))
}

fn enum_uniq(mrb: &mut MrbState, recv: MrbValue, _: &[MrbValue], block: Option<MrbValue>) -> Eval<MrbValue> {
    let mut seen = FxHashSet::default();
    let mut out = Vec::new();
    for v in to_items(mrb, recv)? {
        let key = match block {
            Some(b) => mrb.call_block(b, &[v])?,
            None => v,
        };
        if seen.insert(hash_key_of(mrb, key)) {
            out.push(v);
        }
    }
    Ok(mrb.new_ary(out))
}

fn enum_take_while(mrb: &mut MrbState, recv: MrbValue, _: &[MrbValue], block: Option<MrbValue>) -> Eval<MrbValue> {
    let block = need_block(mrb, block)?;
    let mut out = Vec::new();
    for v in to_items(mrb, recv)? {
        if !mrb.call_block(block, &[v])?.truthy() {
            break;
        }
        out.push(v);
    }
    Ok(mrb.new_ary(out))
}

fn enum_drop_while(mrb: &mut MrbState, recv: MrbValue, _: &[MrbValue], block: Option<MrbValue>) -> Eval<MrbValue> {
    let block = need_block(mrb, block)?;
    let items = to_items(mrb, recv)?;
    let mut start = items.len();
    for (i, v) in items.iter().copied().enumerate() {
        if !mrb.call_block(block, &[v])?.truthy() {
            start = i;
            break;
        }
    }
    Ok(mrb.new_ary(items[start..].to_vec()))
}

fn enum_each_slice(mrb: &mut MrbState, recv: MrbValue, args: &[MrbValue], block: Option<MrbValue>) -> Eval<MrbValue> {
    arity(mrb, args, 1, 0)?;
    let n = int_arg(mrb, args[0])?;
    if n <= 0 {
        return Err(mrb.arg_error("invalid slice size"));
    }
    let block = need_block(mrb, block)?;
    let items = to_items(mrb, recv)?;
    for chunk in items.chunks(n as usize) {
        let slice = mrb.new_ary(chunk.to_vec());
        mrb.call_block(block, &[slice])?;
    }
    Ok(MrbValue::Nil)
}

fn enum_zip(mrb: &mut MrbState, recv: MrbValue, args: &[MrbValue], _: Option<MrbValue>) -> Eval<MrbValue> {
    let items = to_items(mrb, recv)?;
    let mut others = Vec::with_capacity(args.len());
    for &a in args {
        others.push(to_items(mrb, a)?);
    }
    let mut out = Vec::with_capacity(items.len());
    for (i, v) in items.into_iter().enumerate() {
        let mut row = vec![v];
        row.extend(others.iter().map(|o| o.get(i).copied().unwrap_or(MrbValue::Nil)));
        out.push(mrb.new_ary(row));
    }
    Ok(mrb.new_ary(out))
}

fn enum_to_h(mrb: &mut MrbState, recv: MrbValue, _: &[MrbValue], block: Option<MrbValue>) -> Eval<MrbValue> {
    let hash = mrb.new_hash();
    for v in to_items(mrb, recv)? {
        let pair = match block {
            Some(b) => mrb.call_block(b, &[v])?,
            None => v,
        };
        if mrb.ary_len(pair) != 2 {
            let msg = format!("wrong element type {} (expected array)", mrb.class_name(mrb.obj_class(pair)));
            return Err(mrb.type_error(msg));
        }
        let (k, val) = (mrb.ary_entry(pair, 0), mrb.ary_entry(pair, 1));
        mrb.hash_set(hash, k, val);
    }
    Ok(hash)
}

// ============================================================================
// Array
// ============================================================================

fn ary_initialize(mrb: &mut MrbState, recv: MrbValue, args: &[MrbValue], block: Option<MrbValue>) -> Eval<MrbValue> {
    arity(mrb, args, 0, 2)?;
    let n = match args.first() {
        Some(&v) => int_arg(mrb, v)?,
        None => 0,
    };
    if n < 0 {
        return Err(mrb.arg_error("negative array size"));
    }
    let fill = arg(args, 1);
    let mut out = Vec::with_capacity(n as usize);
    for i in 0..n {
        out.push(match block {
            Some(b) => mrb.call_block(b, &[MrbValue::Fixnum(i)])?,
            None => fill,
        });
    }
    with_items(mrb, recv, |v| *v = out);
    Ok(recv)
}

fn ary_each(mrb: &mut MrbState, recv: MrbValue, _: &[MrbValue], block: Option<MrbValue>) -> Eval<MrbValue> {
    let block = need_block(mrb, block)?;
    let ai = mrb.arena_save();
    let mut i = 0;
    while let Some(v) = mrb.ary_ref(recv).and_then(|items| items.get(i).copied()) {
        mrb.call_block(block, &[v])?;
        mrb.arena_restore(ai);
        i += 1;
    }
    Ok(recv)
}

fn ary_each_index(mrb: &mut MrbState, recv: MrbValue, _: &[MrbValue], block: Option<MrbValue>) -> Eval<MrbValue> {
    let block = need_block(mrb, block)?;
    let ai = mrb.arena_save();
    let mut i = 0;
    while i < len(mrb, recv) {
        mrb.call_block(block, &[MrbValue::Fixnum(i as i64)])?;
        mrb.arena_restore(ai);
        i += 1;
    }
    Ok(recv)
}

fn ary_reverse_each(mrb: &mut MrbState, recv: MrbValue, _: &[MrbValue], block: Option<MrbValue>) -> Eval<MrbValue> {
    let block = need_block(mrb, block)?;
    let ai = mrb.arena_save();
    for v in items(mrb, recv).into_iter().rev() {
        mrb.call_block(block, &[v])?;
        mrb.arena_restore(ai);
    }
    Ok(recv)
}

fn ary_map_bang(mrb: &mut MrbState, recv: MrbValue, args: &[MrbValue], block: Option<MrbValue>) -> Eval<MrbValue> {
    let mapped = enum_map(mrb, recv, args, block)?;
    let out = items(mrb, mapped);
    with_items(mrb, recv, |v| *v = out);
    Ok(recv)
}

fn ary_select_bang(mrb: &mut MrbState, recv: MrbValue, _: &[MrbValue], block: Option<MrbValue>) -> Eval<MrbValue> {
    let out = filter_items(mrb, recv, block, true)?;
    let changed = out.len() != len(mrb, recv);
    with_items(mrb, recv, |v| *v = out);
    Ok(if changed { recv } else { MrbValue::Nil })
}

fn ary_reject_bang(mrb: &mut MrbState, recv: MrbValue, _: &[MrbValue], block: Option<MrbValue>) -> Eval<MrbValue> {
    let out = filter_items(mrb, recv, block, false)?;
    let changed = out.len() != len(mrb, recv);
    with_items(mrb, recv, |v| *v = out);
    Ok(if changed { recv } else { MrbValue::Nil })
}

fn ary_delete_if(mrb: &mut MrbState, recv: MrbValue, args: &[MrbValue], block: Option<MrbValue>) -> Eval<MrbValue> {
    ary_reject_bang(mrb, recv, args, block)?;
    Ok(recv)
}

fn ary_sort_bang(mrb: &mut MrbState, recv: MrbValue, args: &[MrbValue], block: Option<MrbValue>) -> Eval<MrbValue> {
    let sorted = enum_sort(mrb, recv, args, block)?;
    let out = items(mrb, sorted);
    with_items(mrb, recv, |v| *v = out);
    Ok(recv)
}

fn ary_aref(mrb: &mut MrbState, recv: MrbValue, args: &[MrbValue], _: Option<MrbValue>) -> Eval<MrbValue> {
    arity(mrb, args, 1, 1)?;
    let all = items(mrb, recv);
    let span = if let Some(&count) = args.get(1) {
        let start = int_arg(mrb, args[0])?;
        let count = int_arg(mrb, count)?;
        seq_span(start, count, all.len())
    } else if let Some(r) = mrb.range_ref(args[0]) {
        range_span(mrb, r, all.len())?
    } else {
        let i = int_arg(mrb, args[0])?;
        let i = if i < 0 { i + all.len() as i64 } else { i };
        return Ok(usize::try_from(i)
            .ok()
            .and_then(|i| all.get(i).copied())
            .unwrap_or(MrbValue::Nil));
    };
    Ok(match span {
        Some((start, count)) => mrb.new_ary(all[start..start + count].to_vec()),
        None => MrbValue::Nil,
    })
}

fn ary_aset(mrb: &mut MrbState, recv: MrbValue, args: &[MrbValue], _: Option<MrbValue>) -> Eval<MrbValue> {
    arity(mrb, args, 2, 1)?;
    let n = len(mrb, recv);
    let value = args[args.len() - 1];
    let span = if args.len() == 3 {
        let start = int_arg(mrb, args[0])?;
        let count = int_arg(mrb, args[1])?;
        let start = if start < 0 { start + n as i64 } else { start };
        if start < 0 || count < 0 {
            return Err(mrb.index_error(format!("index {} too small for array", start)));
        }
        Some((start as usize, count as usize))
    } else if let Some(r) = mrb.range_ref(args[0]) {
        range_span(mrb, r, n)?
    } else {
        None
    };
    if let Some((start, count)) = span {
        let replacement = match mrb.ary_ref(value) {
            Some(items) => items.clone(),
            None => vec![value],
        };
        with_items(mrb, recv, |v| {
            if start > v.len() {
                v.resize(start, MrbValue::Nil);
            }
            let end = (start + count).min(v.len());
            v.splice(start..end, replacement);
        });
        return Ok(value);
    }
    let i = int_arg(mrb, args[0])?;
    let i = if i < 0 { i + n as i64 } else { i };
    if i < 0 {
        return Err(mrb.index_error(format!("index {} too small for array; minimum: -{}", i - n as i64, n)));
    }
    let i = i as usize;
    with_items(mrb, recv, |v| {
        if i >= v.len() {
            v.resize(i + 1, MrbValue::Nil);
        }
        v[i] = value;
    });
    Ok(value)
}

fn ary_at(mrb: &mut MrbState, recv: MrbValue, args: &[MrbValue], _: Option<MrbValue>) -> Eval<MrbValue> {
    arity(mrb, args, 1, 0)?;
    ary_aref(mrb, recv, args, None)
}

fn ary_fetch(mrb: &mut MrbState, recv: MrbValue, args: &[MrbValue], block: Option<MrbValue>) -> Eval<MrbValue> {
    arity(mrb, args, 1, 1)?;
    let n = len(mrb, recv) as i64;
    let i = int_arg(mrb, args[0])?;
    let idx = if i < 0 { i + n } else { i };
    if (0..n).contains(&idx) {
        return Ok(mrb.ary_entry(recv, idx as usize));
    }
    if let Some(b) = block {
        return mrb.call_block(b, &[args[0]]);
    }
    if let Some(&default) = args.get(1) {
        return Ok(default);
    }
    Err(mrb.index_error(format!("index {} outside of array bounds: {}...{}", i, -n, n)))
}

fn ary_dig(mrb: &mut MrbState, recv: MrbValue, args: &[MrbValue], _: Option<MrbValue>) -> Eval<MrbValue> {
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

fn ary_first(mrb: &mut MrbState, recv: MrbValue, args: &[MrbValue], _: Option<MrbValue>) -> Eval<MrbValue> {
    arity(mrb, args, 0, 1)?;
    let all = items(mrb, recv);
    match args.first() {
        None => Ok(all.first().copied().unwrap_or(MrbValue::Nil)),
        Some(&n) => {
            let n = int_arg(mrb, n)?;
            if n < 0 {
                return Err(mrb.arg_error("negative array size"));
            }
            let n = (n as usize).min(all.len());
            Ok(mrb.new_ary(all[..n].to_vec()))
        }
    }
}

fn ary_last(mrb: &mut MrbState, recv: MrbValue, args: &[MrbValue], _: Option<MrbValue>) -> Eval<MrbValue> {
    arity(mrb, args, 0, 1)?;
    let all = items(mrb, recv);
    match args.first() {
        None => Ok(all.last().copied().unwrap_or(MrbValue::Nil)),
        Some(&n) => {
            let n = int_arg(mrb, n)?;
            if n < 0 {
                return Err(mrb.arg_error("negative array size"));
            }
            let n = (n as usize).min(all.len());
            Ok(mrb.new_ary(all[all.len() - n..].to_vec()))
        }
    }
}

fn ary_take(mrb: &mut MrbState, recv: MrbValue, args: &[MrbValue], _: Option<MrbValue>) -> Eval<MrbValue> {
    arity(mrb, args, 1, 0)?;
    ary_first(mrb, recv, args, None)
}

fn ary_drop(mrb: &mut MrbState, recv: MrbValue, args: &[MrbValue], _: Option<MrbValue>) -> Eval<MrbValue> {
    arity(mrb, args, 1, 0)?;
    let n = int_arg(mrb, args[0])?;
    if n < 0 {
        return Err(mrb.arg_error("attempt to drop negative size"));
    }
    let all = items(mrb, recv);
    let n = (n as usize).min(all.len());
    Ok(mrb.new_ary(all[n..].to_vec()))
}

fn ary_push(mrb: &mut MrbState, recv: MrbValue, args: &[MrbValue], _: Option<MrbValue>) -> Eval<MrbValue> {
    with_items(mrb, recv, |v| v.extend_from_slice(args));
    Ok(recv)
}

fn ary_pop(mrb: &mut MrbState, recv: MrbValue, _: &[MrbValue], _: Option<MrbValue>) -> Eval<MrbValue> {
    Ok(with_items(mrb, recv, Vec::pop).flatten().unwrap_or(MrbValue::Nil))
}

fn ary_shift(mrb: &mut MrbState, recv: MrbValue, _: &[MrbValue], _: Option<MrbValue>) -> Eval<MrbValue> {
    let shifted = with_items(mrb, recv, |v| if v.is_empty() { None } else { Some(v.remove(0)) });
    Ok(shifted.flatten().unwrap_or(MrbValue::Nil))
}

fn ary_unshift(mrb: &mut MrbState, recv: MrbValue, args: &[MrbValue], _: Option<MrbValue>) -> Eval<MrbValue> {
    with_items(mrb, recv, |v| {
        v.splice(0..0, args.iter().copied());
    });
    Ok(recv)
}

fn ary_insert(mrb: &mut MrbState, recv: MrbValue, args: &[MrbValue], _: Option<MrbValue>) -> Eval<MrbValue> {
    mrb.check_arity(args.len(), 1, 0, true)?;
    let n = len(mrb, recv) as i64;
    let i = int_arg(mrb, args[0])?;
    let at = if i < 0 { i + n + 1 } else { i };
    if at < 0 {
        return Err(mrb.index_error(format!("index {} too small for array; minimum: -{}", i, n + 1)));
    }
    let at = at as usize;
    with_items(mrb, recv, |v| {
        if at > v.len() {
            v.resize(at, MrbValue::Nil);
        }
        v.splice(at..at, args[1..].iter().copied());
    });
    Ok(recv)
}

fn ary_concat(mrb: &mut MrbState, recv: MrbValue, args: &[MrbValue], _: Option<MrbValue>) -> Eval<MrbValue> {
    let mut tail = Vec::new();
    for &a in args {
        match mrb.ary_ref(a) {
            Some(items) => tail.extend_from_slice(items),
            None => return Err(mrb.type_error("no implicit conversion into Array")),
        }
    }
    with_items(mrb, recv, |v| v.extend(tail));
    Ok(recv)
}

fn ary_delete(mrb: &mut MrbState, recv: MrbValue, args: &[MrbValue], _: Option<MrbValue>) -> Eval<MrbValue> {
    arity(mrb, args, 1, 0)?;
    let mut keep = Vec::new();
    let mut found = None;
    for v in items(mrb, recv) {
        if mrb.values_eq(v, args[0])? {
            found = Some(v);
        } else {
            keep.push(v);
        }
    }
    with_items(mrb, recv, |v| *v = keep);
    Ok(found.unwrap_or(MrbValue::Nil))
}

fn ary_delete_at(mrb: &mut MrbState, recv: MrbValue, args: &[MrbValue], _: Option<MrbValue>) -> Eval<MrbValue> {
    arity(mrb, args, 1, 0)?;
    let n = len(mrb, recv) as i64;
    let i = int_arg(mrb, args[0])?;
    let idx = if i < 0 { i + n } else { i };
    if !(0..n).contains(&idx) {
        return Ok(MrbValue::Nil);
    }
    Ok(with_items(mrb, recv, |v| v.remove(idx as usize)).unwrap_or(MrbValue::Nil))
}

fn ary_clear(mrb: &mut MrbState, recv: MrbValue, _: &[MrbValue], _: Option<MrbValue>) -> Eval<MrbValue> {
    with_items(mrb, recv, Vec::clear);
    Ok(recv)
}

fn ary_replace(mrb: &mut MrbState, recv: MrbValue, args: &[MrbValue], _: Option<MrbValue>) -> Eval<MrbValue> {
    arity(mrb, args, 1, 0)?;
    let Some(other) = mrb.ary_ref(args[0]).cloned() else {
        return Err(mrb.type_error("no implicit conversion into Array"));
    };
    with_items(mrb, recv, |v| *v = other);
    Ok(recv)
}

fn ary_size(mrb: &mut MrbState, recv: MrbValue, _: &[MrbValue], _: Option<MrbValue>) -> Eval<MrbValue> {
    Ok(MrbValue::Fixnum(len(mrb, recv) as i64))
}

fn ary_empty(mrb: &mut MrbState, recv: MrbValue, _: &[MrbValue], _: Option<MrbValue>) -> Eval<MrbValue> {
    Ok(MrbValue::from_bool(len(mrb, recv) == 0))
}

fn ary_index(mrb: &mut MrbState, recv: MrbValue, args: &[MrbValue], block: Option<MrbValue>) -> Eval<MrbValue> {
    enum_find_index(mrb, recv, args, block)
}

fn join_into(mrb: &mut MrbState, v: MrbValue, sep: &str, out: &mut String, depth: usize) -> Eval<()> {
    if let Some(inner) = mrb.ary_ref(v).cloned() {
        if depth > 64 {
            return Err(mrb.arg_error("recursive array join"));
        }
        for (i, item) in inner.into_iter().enumerate() {
            if i > 0 {
                out.push_str(sep);
            }
            join_into(mrb, item, sep, out, depth + 1)?;
        }
        return Ok(());
    }
    out.push_str(&mrb.to_s_string(v)?);
    Ok(())
}

fn ary_join(mrb: &mut MrbState, recv: MrbValue, args: &[MrbValue], _: Option<MrbValue>) -> Eval<MrbValue> {
    arity(mrb, args, 0, 1)?;
    let sep = match arg(args, 0) {
        MrbValue::Nil => String::new(),
        v => str_arg(mrb, v)?,
    };
    let mut out = String::new();
    join_into(mrb, recv, &sep, &mut out, 0)?;
    Ok(mrb.new_str(out))
}

fn ary_reverse(mrb: &mut MrbState, recv: MrbValue, _: &[MrbValue], _: Option<MrbValue>) -> Eval<MrbValue> {
    let mut all = items(mrb, recv);
    all.reverse();
    Ok(mrb.new_ary(all))
}

fn flatten_into(mrb: &mut MrbState, v: &[MrbValue], depth: i64, out: &mut Vec<MrbValue>, guard: usize) -> Eval<()> {
    if guard > 64 {
        return Err(mrb.arg_error("tried to flatten recursive array"));
    }
    for &item in v {
        match mrb.ary_ref(item).cloned() {
            Some(inner) if depth != 0 => flatten_into(mrb, &inner, depth - 1, out, guard + 1)?,
            _ => out.push(item),
        }
    }
    Ok(())
}

fn ary_flatten(mrb: &mut MrbState, recv: MrbValue, args: &[MrbValue], _: Option<MrbValue>) -> Eval<MrbValue> {
    arity(mrb, args, 0, 1)?;
    let depth = match args.first() {
        Some(&d) if !d.is_nil() => int_arg(mrb, d)?,
        _ => -1,
    };
    let mut out = Vec::new();
    flatten_into(mrb, &items(mrb, recv), depth, &mut out, 0)?;
    Ok(mrb.new_ary(out))
}

fn ary_compact(mrb: &mut MrbState, recv: MrbValue, _: &[MrbValue], _: Option<MrbValue>) -> Eval<MrbValue> {
    let out = items(mrb, recv).into_iter().filter(|v| !v.is_nil()).collect();
    Ok(mrb.new_ary(out))
}

fn other_items(mrb: &mut MrbState, args: &[MrbValue]) -> Eval<Vec<MrbValue>> {
    arity(mrb, args, 1, 0)?;
    match mrb.ary_ref(args[0]) {
        Some(items) => Ok(items.clone()),
        None => {
            let class = mrb.obj_class(args[0]);
            let msg = format!("no implicit conversion of {} into Array", mrb.class_name(class));
            Err(mrb.type_error(msg))
        }
    }
}

fn ary_plus(mrb: &mut MrbState, recv: MrbValue, args: &[MrbValue], _: Option<MrbValue>) -> Eval<MrbValue> {
    let other = other_items(mrb, args)?;
    let mut all = items(mrb, recv);
    all.extend(other);
    Ok(mrb.new_ary(all))
}

fn key_set(mrb: &MrbState, values: &[MrbValue]) -> FxHashSet<HashKey> {
    values.iter().map(|v| hash_key_of(mrb, *v)).collect()
}

fn ary_minus(mrb: &mut MrbState, recv: MrbValue, args: &[MrbValue], _: Option<MrbValue>) -> Eval<MrbValue> {
    let other = other_items(mrb, args)?;
    let exclude = key_set(mrb, &other);
    let out = items(mrb, recv)
        .into_iter()
        .filter(|v| !exclude.contains(&hash_key_of(mrb, *v)))
        .collect();
    Ok(mrb.new_ary(out))
}

fn ary_and(mrb: &mut MrbState, recv: MrbValue, args: &[MrbValue], _: Option<MrbValue>) -> Eval<MrbValue> {
    let other = other_items(mrb, args)?;
    let include = key_set(mrb, &other);
    let mut seen = FxHashSet::default();
    let out = items(mrb, recv)
        .into_iter()
        .filter(|v| {
            let k = hash_key_of(mrb, *v);
            include.contains(&k) && seen.insert(k)
        })
        .collect();
    Ok(mrb.new_ary(out))
}

fn ary_or(mrb: &mut MrbState, recv: MrbValue, args: &[MrbValue], _: Option<MrbValue>) -> Eval<MrbValue> {
    let other = other_items(mrb, args)?;
    let mut all = items(mrb, recv);
    all.extend(other);
    let mut seen = FxHashSet::default();
    let out = all.into_iter().filter(|v| seen.insert(hash_key_of(mrb, *v))).collect();
    Ok(mrb.new_ary(out))
}

fn ary_times(mrb: &mut MrbState, recv: MrbValue, args: &[MrbValue], _: Option<MrbValue>) -> Eval<MrbValue> {
    arity(mrb, args, 1, 0)?;
    if mrb.str_ref(args[0]).is_some() {
        return ary_join(mrb, recv, args, None);
    }
    let n = int_arg(mrb, args[0])?;
    if n < 0 {
        return Err(mrb.arg_error("negative argument"));
    }
    let all = items(mrb, recv);
    let out = all.repeat(n as usize);
    Ok(mrb.new_ary(out))
}

fn ary_eq(mrb: &mut MrbState, recv: MrbValue, args: &[MrbValue], _: Option<MrbValue>) -> Eval<MrbValue> {
    arity(mrb, args, 1, 0)?;
    if recv.identical(args[0]) {
        return Ok(MrbValue::True);
    }
    let Some(other) = mrb.ary_ref(args[0]).cloned() else {
        return Ok(MrbValue::False);
    };
    let mine = items(mrb, recv);
    if mine.len() != other.len() {
        return Ok(MrbValue::False);
    }
    for (a, b) in mine.into_iter().zip(other) {
        if !mrb.values_eq(a, b)? {
            return Ok(MrbValue::False);
        }
    }
    Ok(MrbValue::True)
}

fn ary_cmp(mrb: &mut MrbState, recv: MrbValue, args: &[MrbValue], _: Option<MrbValue>) -> Eval<MrbValue> {
    arity(mrb, args, 1, 0)?;
    let Some(other) = mrb.ary_ref(args[0]).cloned() else {
        return Ok(MrbValue::Nil);
    };
    let mine = items(mrb, recv);
    for (a, b) in mine.iter().zip(other.iter()) {
        let o = compare_values(mrb, *a, *b)?;
        if o != Ordering::Equal {
            return Ok(ordering_value(o));
        }
    }
    Ok(ordering_value(mine.len().cmp(&other.len())))
}

fn ary_hash(mrb: &mut MrbState, recv: MrbValue, _: &[MrbValue], _: Option<MrbValue>) -> Eval<MrbValue> {
    let hash = mrb.intern("hash");
    let mut h = FxHasher::default();
    h.write_usize(len(mrb, recv));
    for v in items(mrb, recv) {
        if let MrbValue::Fixnum(n) = mrb.call_method(v, hash, &[], None)? {
            h.write_i64(n);
        }
    }
    Ok(MrbValue::Fixnum(h.finish() as i64))
}

fn ary_inspect(mrb: &mut MrbState, recv: MrbValue, _: &[MrbValue], _: Option<MrbValue>) -> Eval<MrbValue> {
    let mut out = String::from("[");
    for (i, v) in items(mrb, recv).into_iter().enumerate() {
        if i > 0 {
            out.push_str(", ");
        }
        if v.identical(recv) {
            out.push_str("[...]");
        } else {
            out.push_str(&mrb.inspect_str(v)?);
        }
    }
    out.push(']');
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
    fn test_map_select_inject() {
        assert_eq!(eval_str("[1, 2, 3].map { |x| x * 2 }"), "[2, 4, 6]");
        assert_eq!(eval_str("[1, 2, 3, 4].select(&:even?)"), "[2, 4]");
        assert_eq!(eval_str("[1, 2, 3].inject(:+)"), "6");
        assert_eq!(eval_str("[1, 2, 3].inject(10) { |a, b| a + b }"), "16");
    }

    #[test]
    fn test_sort_with_and_without_block() {
        assert_eq!(eval_str("[3, 1, 2].sort"), "[1, 2, 3]");
        assert_eq!(eval_str("[3, 1, 2].sort { |a, b| b <=> a }"), "[3, 2, 1]");
        assert_eq!(eval_str("['bb', 'a', 'ccc'].sort_by(&:size)"), "[\"a\", \"bb\", \"ccc\"]");
    }

    #[test]
    fn test_sort_of_mixed_types_raises() {
        let mut mrb = MrbState::open(VmOptions::default());
        mrb.load_string("[1, 'a'].sort");
        assert!(mrb.exc().is_some());
    }

    #[test]
    fn test_indexing_and_assignment() {
        assert_eq!(eval_str("a = [1, 2, 3]\na[-1]"), "3");
        assert_eq!(eval_str("a = [1, 2, 3]\na[1..2]"), "[2, 3]");
        assert_eq!(eval_str("a = []\na[2] = 5\na"), "[nil, nil, 5]");
        assert_eq!(eval_str("a = [1, 2, 3, 4]\na[1, 2] = 9\na"), "[1, 9, 4]");
    }

    #[test]
    fn test_set_operations() {
        assert_eq!(eval_str("[1, 2, 2, 3] - [2]"), "[1, 3]");
        assert_eq!(eval_str("[1, 1, 2] | [2, 3]"), "[1, 2, 3]");
        assert_eq!(eval_str("['a', 'b'] & ['b', 'c']"), "[\"b\"]");
        assert_eq!(eval_str("[1, [2, [3]]].flatten"), "[1, 2, 3]");
    }

    #[test]
    fn test_join_nested() {
        assert_eq!(eval_str("[1, [2, 3], 'x'].join('-')"), "\"1-2-3-x\"");
    }
}
