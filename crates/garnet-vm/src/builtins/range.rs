use super::numeric::compare_values;
use super::{arity, int_arg, need_block};
use crate::interp::Eval;
use crate::object::RRange;
use crate::state::MrbState;
use crate::value::MrbValue;
use std::cmp::Ordering;

pub(super) fn init(mrb: &mut MrbState) {
    let range = mrb.core.range;
    mrb.define_singleton_builtin(range, "new", range_new);
    mrb.define_builtin(range, "begin", range_begin);
    mrb.define_builtin(range, "first", range_first);
    mrb.define_builtin(range, "end", range_end);
    mrb.define_builtin(range, "last", range_last);
    mrb.define_builtin(range, "exclude_end?", range_exclude_end);
    mrb.define_builtin(range, "each", range_each);
    mrb.define_builtin(range, "reverse_each", range_reverse_each);
    mrb.define_builtin(range, "step", range_step);
    mrb.define_builtin(range, "include?", range_include);
    mrb.define_builtin(range, "member?", range_include);
    mrb.define_builtin(range, "cover?", range_include);
    mrb.define_builtin(range, "===", range_include);
    mrb.define_builtin(range, "size", range_size);
    mrb.define_builtin(range, "==", range_eq);
    mrb.define_builtin(range, "eql?", range_eq);
    mrb.define_builtin(range, "to_s", range_to_s);
    mrb.define_builtin(range, "inspect", range_inspect);
}

fn this(mrb: &mut MrbState, recv: MrbValue) -> Eval<RRange> {
    match mrb.range_ref(recv) {
        Some(r) => Ok(r),
        None => Err(mrb.type_error("not a range")),
    }
}

/// Integer bounds of `r`, end made inclusive. `None` for non-integer ranges.
fn int_bounds(r: RRange) -> Option<(i64, i64)> {
    match (r.begin, r.end) {
        (MrbValue::Fixnum(b), MrbValue::Fixnum(e)) => Some((b, if r.exclusive { e - 1 } else { e })),
        _ => None,
    }
}

/// Every member of a finite range, walking `succ` for non-integer ranges.
pub(super) fn range_to_vec(mrb: &mut MrbState, r: RRange) -> Eval<Vec<MrbValue>> {
    if let Some((b, e)) = int_bounds(r) {
        return Ok((b..=e).map(MrbValue::Fixnum).collect());
    }
    if r.end.is_nil() {
        let class = mrb.core.range_error;
        return Err(mrb.raise_class(class, "cannot convert endless range to an array"));
    }
    if matches!(r.begin, MrbValue::Float(_) | MrbValue::Nil) {
        let class = mrb.obj_class(r.begin);
        let msg = format!("can't iterate from {}", mrb.class_name(class));
        return Err(mrb.type_error(msg));
    }
    let succ = mrb.intern("succ");
    let mut out = Vec::new();
    let mut cur = r.begin;
    loop {
        match compare_values(mrb, cur, r.end)? {
            Ordering::Greater => break,
            Ordering::Equal => {
                if !r.exclusive {
                    out.push(cur);
                }
                break;
            }
            Ordering::Less => out.push(cur),
        }
        let prev_len = mrb.str_ref(cur).map(str::len);
        cur = mrb.call_method(cur, succ, &[], None)?;
        // String successors grow without bound once they pass the end's width.
        if let (Some(prev), Some(end)) = (prev_len, mrb.str_ref(r.end).map(str::len)) {
            if prev > end {
                break;
            }
        }
    }
    Ok(out)
}

fn range_new(mrb: &mut MrbState, _: MrbValue, args: &[MrbValue], _: Option<MrbValue>) -> Eval<MrbValue> {
    arity(mrb, args, 2, 1)?;
    let (b, e) = (args[0], args[1]);
    if !(b.is_nil() || e.is_nil()) {
        let cmp = mrb.intern("<=>");
        if mrb.call_method(b, cmp, &[e], None)?.is_nil() {
            return Err(mrb.arg_error("bad value for range"));
        }
    }
    let exclusive = args.get(2).is_some_and(|v| v.truthy());
    Ok(mrb.new_range(b, e, exclusive))
}

fn range_begin(mrb: &mut MrbState, recv: MrbValue, _: &[MrbValue], _: Option<MrbValue>) -> Eval<MrbValue> {
    Ok(this(mrb, recv)?.begin)
}

fn range_end(mrb: &mut MrbState, recv: MrbValue, _: &[MrbValue], _: Option<MrbValue>) -> Eval<MrbValue> {
    Ok(this(mrb, recv)?.end)
}

fn range_first(mrb: &mut MrbState, recv: MrbValue, args: &[MrbValue], _: Option<MrbValue>) -> Eval<MrbValue> {
    arity(mrb, args, 0, 1)?;
    let r = this(mrb, recv)?;
    let Some(&n) = args.first() else {
        return Ok(r.begin);
    };
    let n = int_arg(mrb, n)?;
    if n < 0 {
        return Err(mrb.arg_error("negative array size (or size too big)"));
    }
    let items = match int_bounds(r) {
        Some((b, e)) => (b..=e).take(n as usize).map(MrbValue::Fixnum).collect(),
        None => range_to_vec(mrb, r)?.into_iter().take(n as usize).collect(),
    };
    Ok(mrb.new_ary(items))
}

fn range_last(mrb: &mut MrbState, recv: MrbValue, args: &[MrbValue], _: Option<MrbValue>) -> Eval<MrbValue> {
    arity(mrb, args, 0, 1)?;
    let r = this(mrb, recv)?;
    let Some(&n) = args.first() else {
        return Ok(r.end);
    };
    let n = int_arg(mrb, n)?;
    if n < 0 {
        return Err(mrb.arg_error("negative array size"));
    }
    let items = range_to_vec(mrb, r)?;
    let skip = items.len().saturating_sub(n as usize);
    Ok(mrb.new_ary(items[skip..].to_vec()))
}

fn range_exclude_end(mrb: &mut MrbState, recv: MrbValue, _: &[MrbValue], _: Option<MrbValue>) -> Eval<MrbValue> {
    Ok(MrbValue::from_bool(this(mrb, recv)?.exclusive))
}

fn range_each(mrb: &mut MrbState, recv: MrbValue, _: &[MrbValue], block: Option<MrbValue>) -> Eval<MrbValue> {
    let block = need_block(mrb, block)?;
    let r = this(mrb, recv)?;
    let ai = mrb.arena_save();
    match (r.begin, r.end) {
        (MrbValue::Fixnum(b), MrbValue::Nil) => {
            let mut i = b;
            loop {
                mrb.call_block(block, &[MrbValue::Fixnum(i)])?;
                mrb.arena_restore(ai);
                i += 1;
            }
        }
        _ => match int_bounds(r) {
            Some((b, e)) => {
                for i in b..=e {
                    mrb.call_block(block, &[MrbValue::Fixnum(i)])?;
                    mrb.arena_restore(ai);
                }
            }
            None => {
                let items = range_to_vec(mrb, r)?;
                let ai = mrb.arena_save();
                for v in items {
                    mrb.call_block(block, &[v])?;
                    mrb.arena_restore(ai);
                }
            }
        },
    }
    Ok(recv)
}

fn range_reverse_each(mrb: &mut MrbState, recv: MrbValue, _: &[MrbValue], block: Option<MrbValue>) -> Eval<MrbValue> {
    let block = need_block(mrb, block)?;
    let r = this(mrb, recv)?;
    let items = range_to_vec(mrb, r)?;
    for v in items.into_iter().rev() {
        mrb.call_block(block, &[v])?;
    }
    Ok(recv)
}

fn range_step(mrb: &mut MrbState, recv: MrbValue, args: &[MrbValue], block: Option<MrbValue>) -> Eval<MrbValue> {
    arity(mrb, args, 1, 0)?;
    let block = need_block(mrb, block)?;
    let r = this(mrb, recv)?;
    let step = int_arg(mrb, args[0])?;
    if step <= 0 {
        return Err(mrb.arg_error("step can't be negative or zero"));
    }
    let Some((b, e)) = int_bounds(r) else {
        return Err(mrb.type_error("can't iterate non-integer range by step"));
    };
    let ai = mrb.arena_save();
    let mut i = b;
    while i <= e {
        mrb.call_block(block, &[MrbValue::Fixnum(i)])?;
        mrb.arena_restore(ai);
        i += step;
    }
    Ok(recv)
}

fn range_include(mrb: &mut MrbState, recv: MrbValue, args: &[MrbValue], _: Option<MrbValue>) -> Eval<MrbValue> {
    arity(mrb, args, 1, 0)?;
    let r = this(mrb, recv)?;
    let v = args[0];
    let cmp = mrb.intern("<=>");
    let ord = |mrb: &mut MrbState, a: MrbValue, b: MrbValue| -> Eval<Option<i64>> {
        match mrb.call_method(a, cmp, &[b], None)? {
            MrbValue::Fixnum(n) => Ok(Some(n)),
            _ => Ok(None),
        }
    };
    if !r.begin.is_nil() {
        match ord(mrb, r.begin, v)? {
            Some(n) if n <= 0 => {}
            _ => return Ok(MrbValue::False),
        }
    }
    if !r.end.is_nil() {
        match ord(mrb, v, r.end)? {
            Some(n) if n < 0 || (n == 0 && !r.exclusive) => {}
            _ => return Ok(MrbValue::False),
        }
    }
    Ok(MrbValue::True)
}

fn range_size(mrb: &mut MrbState, recv: MrbValue, _: &[MrbValue], _: Option<MrbValue>) -> Eval<MrbValue> {
    let r = this(mrb, recv)?;
    match (r.begin, r.end) {
        (MrbValue::Fixnum(_), MrbValue::Nil) => Ok(MrbValue::Float(f64::INFINITY)),
        (MrbValue::Fixnum(_), MrbValue::Fixnum(_)) => {
            let (b, e) = int_bounds(r).unwrap_or((0, -1));
            Ok(MrbValue::Fixnum((e - b + 1).max(0)))
        }
        _ => Ok(MrbValue::Nil),
    }
}

fn range_eq(mrb: &mut MrbState, recv: MrbValue, args: &[MrbValue], _: Option<MrbValue>) -> Eval<MrbValue> {
    arity(mrb, args, 1, 0)?;
    let r = this(mrb, recv)?;
    let Some(o) = mrb.range_ref(args[0]) else {
        return Ok(MrbValue::False);
    };
    let same = r.exclusive == o.exclusive && mrb.values_eq(r.begin, o.begin)? && mrb.values_eq(r.end, o.end)?;
    Ok(MrbValue::from_bool(same))
}

fn render(mrb: &mut MrbState, recv: MrbValue, inspect: bool) -> Eval<MrbValue> {
    let r = this(mrb, recv)?;
    let show = |mrb: &mut MrbState, v: MrbValue| -> Eval<String> {
        match v {
            MrbValue::Nil => Ok(String::new()),
            _ if inspect => mrb.inspect_str(v),
            _ => mrb.to_s_string(v),
        }
    };
    let b = show(mrb, r.begin)?;
    let e = show(mrb, r.end)?;
    let dots = if r.exclusive { "..." } else { ".." };
    Ok(mrb.new_str(format!("{}{}{}", b, dots, e)))
}

fn range_to_s(mrb: &mut MrbState, recv: MrbValue, _: &[MrbValue], _: Option<MrbValue>) -> Eval<MrbValue> {
    render(mrb, recv, false)
}

fn range_inspect(mrb: &mut MrbState, recv: MrbValue, _: &[MrbValue], _: Option<MrbValue>) -> Eval<MrbValue> {
    render(mrb, recv, true)
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
    fn test_to_a_and_size() {
        assert_eq!(eval_str("(1..4).to_a"), "[1, 2, 3, 4]");
        assert_eq!(eval_str("(1...4).to_a"), "[1, 2, 3]");
        assert_eq!(eval_str("(1...4).size"), "3");
        assert_eq!(eval_str("('a'..'e').to_a.join"), "\"abcde\"");
    }

    #[test]
    fn test_membership() {
        assert_eq!(eval_str("(1..10) === 5"), "true");
        assert_eq!(eval_str("(1...10).include?(10)"), "false");
        assert_eq!(eval_str("(1.0..2.0).include?(1.5)"), "true");
    }

    #[test]
    fn test_enumerable_on_range() {
        assert_eq!(eval_str("(1..5).select(&:odd?)"), "[1, 3, 5]");
        assert_eq!(eval_str("(1..4).inject(:*)"), "24");
        assert_eq!(eval_str("(1..3).inspect"), "\"1..3\"");
    }

    #[test]
    fn test_step() {
        assert_eq!(eval_str("a = []\n(1..10).step(3) { |i| a << i }\na"), "[1, 4, 7, 10]");
    }
}
