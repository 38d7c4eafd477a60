//! Integer, Float and Comparable.

use super::{arg, arity, int_arg, need_block};
use crate::interp::Eval;
use crate::state::MrbState;
use crate::value::MrbValue;
use std::cmp::Ordering;

#[derive(Debug, Clone, Copy)]
enum Num {
    Int(i64),
    Float(f64),
}

impl Num {
    fn of(v: MrbValue) -> Option<Num> {
        match v {
            MrbValue::Fixnum(n) => Some(Num::Int(n)),
            MrbValue::Float(f) => Some(Num::Float(f)),
            _ => None,
        }
    }

    fn as_f64(self) -> f64 {
        match self {
            Num::Int(n) => n as f64,
            Num::Float(f) => f,
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Op {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Pow,
}

macro_rules! binop {
    ($name:ident, $op:expr) => {
        fn $name(mrb: &mut MrbState, recv: MrbValue, args: &[MrbValue], _: Option<MrbValue>) -> Eval<MrbValue> {
            arity(mrb, args, 1, 0)?;
            arith(mrb, recv, args[0], $op)
        }
    };
}

macro_rules! cmpop {
    ($name:ident, $pred:expr) => {
        fn $name(mrb: &mut MrbState, recv: MrbValue, args: &[MrbValue], _: Option<MrbValue>) -> Eval<MrbValue> {
            arity(mrb, args, 1, 0)?;
            let ord = num_cmp(mrb, recv, args[0])?;
            Ok(MrbValue::from_bool($pred(ord)))
        }
    };
}

binop!(num_add, Op::Add);
binop!(num_sub, Op::Sub);
binop!(num_mul, Op::Mul);
binop!(num_div, Op::Div);
binop!(num_mod, Op::Mod);
binop!(num_pow, Op::Pow);
cmpop!(num_lt, |o| o == Ordering::Less);
cmpop!(num_le, |o| o != Ordering::Greater);
cmpop!(num_gt, |o| o == Ordering::Greater);
cmpop!(num_ge, |o| o != Ordering::Less);

pub(super) fn init(mrb: &mut MrbState) {
    let integer = mrb.core.integer;
    let float = mrb.core.float;
    let numeric = mrb.core.numeric;
    let comparable = mrb.core.comparable;
    mrb.include_module(numeric, comparable);

    for class in [integer, float] {
        mrb.define_builtin(class, "+", num_add);
        mrb.define_builtin(class, "-", num_sub);
        mrb.define_builtin(class, "*", num_mul);
        mrb.define_builtin(class, "/", num_div);
        mrb.define_builtin(class, "%", num_mod);
        mrb.define_builtin(class, "modulo", num_mod);
        mrb.define_builtin(class, "**", num_pow);
        mrb.define_builtin(class, "==", num_eq);
        mrb.define_builtin(class, "===", num_eq);
        mrb.define_builtin(class, "<=>", num_cmp_m);
        mrb.define_builtin(class, "<", num_lt);
        mrb.define_builtin(class, "<=", num_le);
        mrb.define_builtin(class, ">", num_gt);
        mrb.define_builtin(class, ">=", num_ge);
        mrb.define_builtin(class, "-@", num_neg);
        mrb.define_builtin(class, "+@", num_pos);
        mrb.define_builtin(class, "abs", num_abs);
        mrb.define_builtin(class, "zero?", num_zero);
        mrb.define_builtin(class, "positive?", num_positive);
        mrb.define_builtin(class, "negative?", num_negative);
        mrb.define_builtin(class, "divmod", num_divmod);
        mrb.define_builtin(class, "fdiv", num_fdiv);
        mrb.define_builtin(class, "to_f", num_to_f);
        mrb.define_builtin(class, "step", num_step);
        mrb.define_builtin(class, "eql?", num_eql);
    }

    mrb.define_builtin(integer, "to_s", int_to_s);
    mrb.define_builtin(integer, "inspect", int_to_s);
    mrb.define_builtin(integer, "to_i", num_itself);
    mrb.define_builtin(integer, "to_int", num_itself);
    mrb.define_builtin(integer, "floor", num_itself);
    mrb.define_builtin(integer, "ceil", num_itself);
    mrb.define_builtin(integer, "round", num_itself);
    mrb.define_builtin(integer, "truncate", num_itself);
    mrb.define_builtin(integer, "div", int_div);
    mrb.define_builtin(integer, "&", int_and);
    mrb.define_builtin(integer, "|", int_or);
    mrb.define_builtin(integer, "^", int_xor);
    mrb.define_builtin(integer, "~", int_not);
    mrb.define_builtin(integer, "<<", int_shl);
    mrb.define_builtin(integer, ">>", int_shr);
    mrb.define_builtin(integer, "even?", int_even);
    mrb.define_builtin(integer, "odd?", int_odd);
    mrb.define_builtin(integer, "succ", int_succ);
    mrb.define_builtin(integer, "next", int_succ);
    mrb.define_builtin(integer, "pred", int_pred);
    mrb.define_builtin(integer, "chr", int_chr);
    mrb.define_builtin(integer, "times", int_times);
    mrb.define_builtin(integer, "upto", int_upto);
    mrb.define_builtin(integer, "downto", int_downto);
    mrb.define_builtin(integer, "integer?", always_true);
    mrb.define_builtin(integer, "gcd", int_gcd);

    mrb.define_builtin(float, "to_s", float_to_s_m);
    mrb.define_builtin(float, "inspect", float_to_s_m);
    mrb.define_builtin(float, "to_i", float_to_i);
    mrb.define_builtin(float, "to_int", float_to_i);
    mrb.define_builtin(float, "truncate", float_to_i);
    mrb.define_builtin(float, "floor", float_floor);
    mrb.define_builtin(float, "ceil", float_ceil);
    mrb.define_builtin(float, "round", float_round);
    mrb.define_builtin(float, "nan?", float_nan);
    mrb.define_builtin(float, "infinite?", float_infinite);
    mrb.define_builtin(float, "finite?", float_finite);
    mrb.define_builtin(float, "integer?", always_false);
    mrb.define_const(float, "INFINITY", MrbValue::Float(f64::INFINITY));
    mrb.define_const(float, "NAN", MrbValue::Float(f64::NAN));
    mrb.define_const(float, "EPSILON", MrbValue::Float(f64::EPSILON));

    mrb.define_builtin(comparable, "==", cmp_eq);
    mrb.define_builtin(comparable, "<", cmp_lt);
    mrb.define_builtin(comparable, "<=", cmp_le);
    mrb.define_builtin(comparable, ">", cmp_gt);
    mrb.define_builtin(comparable, ">=", cmp_ge);
    mrb.define_builtin(comparable, "between?", cmp_between);
    mrb.define_builtin(comparable, "clamp", cmp_clamp);
}

// ============================================================================
// Arithmetic
// ============================================================================

fn coerce_error(mrb: &mut MrbState, recv: MrbValue, other: MrbValue) -> crate::interp::Unwind {
    let other_class = mrb.obj_class(other);
    let recv_class = mrb.obj_class(recv);
    let msg = if other.is_nil() {
        format!("nil can't be coerced into {}", mrb.class_name(recv_class))
    } else {
        format!(
            "{} can't be coerced into {}",
            mrb.class_name(other_class),
            mrb.class_name(recv_class)
        )
    };
    mrb.type_error(msg)
}

/// Floor division and modulo with the sign of the divisor.
fn int_divmod(a: i64, b: i64) -> (i64, i64) {
    let (mut q, mut r) = (a.wrapping_div(b), a.wrapping_rem(b));
    if r != 0 && ((r < 0) != (b < 0)) {
        q -= 1;
        r += b;
    }
    (q, r)
}

fn float_mod(a: f64, b: f64) -> f64 {
    let r = a % b;
    if r != 0.0 && ((r < 0.0) != (b < 0.0)) {
        r + b
    } else {
        r
    }
}

fn arith(mrb: &mut MrbState, recv: MrbValue, other: MrbValue, op: Op) -> Eval<MrbValue> {
    let (Some(a), Some(b)) = (Num::of(recv), Num::of(other)) else {
        return Err(coerce_error(mrb, recv, other));
    };
    let v = match (a, b) {
        (Num::Int(x), Num::Int(y)) => match op {
            Op::Add => x.checked_add(y).map(MrbValue::Fixnum).unwrap_or(MrbValue::Float(x as f64 + y as f64)),
            Op::Sub => x.checked_sub(y).map(MrbValue::Fixnum).unwrap_or(MrbValue::Float(x as f64 - y as f64)),
            Op::Mul => x.checked_mul(y).map(MrbValue::Fixnum).unwrap_or(MrbValue::Float(x as f64 * y as f64)),
            Op::Div | Op::Mod if y == 0 => return Err(mrb.zero_div_error()),
            Op::Div => match x.checked_div(y) {
                Some(_) => MrbValue::Fixnum(int_divmod(x, y).0),
                None => MrbValue::Float(x as f64 / y as f64),
            },
            Op::Mod => MrbValue::Fixnum(int_divmod(x, y).1),
            Op::Pow if y < 0 => MrbValue::Float((x as f64).powf(y as f64)),
            Op::Pow => u32::try_from(y)
                .ok()
                .and_then(|e| x.checked_pow(e))
                .map(MrbValue::Fixnum)
                .unwrap_or(MrbValue::Float((x as f64).powf(y as f64))),
        },
        (a, b) => {
            let (x, y) = (a.as_f64(), b.as_f64());
            MrbValue::Float(match op {
                Op::Add => x + y,
                Op::Sub => x - y,
                Op::Mul => x * y,
                Op::Div => x / y,
                Op::Mod => float_mod(x, y),
                Op::Pow => x.powf(y),
            })
        }
    };
    Ok(v)
}

fn num_partial_cmp(a: Num, b: Num) -> Option<Ordering> {
    match (a, b) {
        (Num::Int(x), Num::Int(y)) => Some(x.cmp(&y)),
        (a, b) => a.as_f64().partial_cmp(&b.as_f64()),
    }
}

fn num_cmp(mrb: &mut MrbState, recv: MrbValue, other: MrbValue) -> Eval<Ordering> {
    match (Num::of(recv), Num::of(other)) {
        (Some(a), Some(b)) => match num_partial_cmp(a, b) {
            Some(o) => Ok(o),
            None => Err(compare_failed(mrb, recv, other)),
        },
        _ => Err(compare_failed(mrb, recv, other)),
    }
}

pub(super) fn compare_failed(mrb: &mut MrbState, a: MrbValue, b: MrbValue) -> crate::interp::Unwind {
    let a_class = mrb.obj_class(a);
    let b_name = if b.is_nil() {
        "nil".to_string()
    } else {
        let b_class = mrb.obj_class(b);
        mrb.class_name(b_class)
    };
    let msg = format!("comparison of {} with {} failed", mrb.class_name(a_class), b_name);
    mrb.arg_error(msg)
}

fn num_eq(mrb: &mut MrbState, recv: MrbValue, args: &[MrbValue], _: Option<MrbValue>) -> Eval<MrbValue> {
    arity(mrb, args, 1, 0)?;
    let eq = match (Num::of(recv), Num::of(args[0])) {
        (Some(a), Some(b)) => num_partial_cmp(a, b) == Some(Ordering::Equal),
        _ => false,
    };
    Ok(MrbValue::from_bool(eq))
}

fn num_eql(mrb: &mut MrbState, recv: MrbValue, args: &[MrbValue], _: Option<MrbValue>) -> Eval<MrbValue> {
    arity(mrb, args, 1, 0)?;
    let eql = match (recv, args[0]) {
        (MrbValue::Fixnum(a), MrbValue::Fixnum(b)) => a == b,
        (MrbValue::Float(a), MrbValue::Float(b)) => a == b,
        _ => false,
    };
    Ok(MrbValue::from_bool(eql))
}

fn num_cmp_m(mrb: &mut MrbState, recv: MrbValue, args: &[MrbValue], _: Option<MrbValue>) -> Eval<MrbValue> {
    arity(mrb, args, 1, 0)?;
    let ord = match (Num::of(recv), Num::of(args[0])) {
        (Some(a), Some(b)) => num_partial_cmp(a, b),
        _ => None,
    };
    Ok(ord.map(ordering_value).unwrap_or(MrbValue::Nil))
}

pub(super) fn ordering_value(o: Ordering) -> MrbValue {
    MrbValue::Fixnum(match o {
        Ordering::Less => -1,
        Ordering::Equal => 0,
        Ordering::Greater => 1,
    })
}

fn num_neg(_: &mut MrbState, recv: MrbValue, _: &[MrbValue], _: Option<MrbValue>) -> Eval<MrbValue> {
    Ok(match recv {
        MrbValue::Fixnum(n) => n.checked_neg().map(MrbValue::Fixnum).unwrap_or(MrbValue::Float(-(n as f64))),
        MrbValue::Float(f) => MrbValue::Float(-f),
        other => other,
    })
}

fn num_pos(_: &mut MrbState, recv: MrbValue, _: &[MrbValue], _: Option<MrbValue>) -> Eval<MrbValue> {
    Ok(recv)
}

fn num_abs(_: &mut MrbState, recv: MrbValue, _: &[MrbValue], _: Option<MrbValue>) -> Eval<MrbValue> {
    Ok(match recv {
        MrbValue::Fixnum(n) => n.checked_abs().map(MrbValue::Fixnum).unwrap_or(MrbValue::Float((n as f64).abs())),
        MrbValue::Float(f) => MrbValue::Float(f.abs()),
        other => other,
    })
}

fn num_sign(recv: MrbValue) -> f64 {
    Num::of(recv).map(Num::as_f64).unwrap_or(0.0)
}

fn num_zero(_: &mut MrbState, recv: MrbValue, _: &[MrbValue], _: Option<MrbValue>) -> Eval<MrbValue> {
    Ok(MrbValue::from_bool(num_sign(recv) == 0.0))
}

fn num_positive(_: &mut MrbState, recv: MrbValue, _: &[MrbValue], _: Option<MrbValue>) -> Eval<MrbValue> {
    Ok(MrbValue::from_bool(num_sign(recv) > 0.0))
}

fn num_negative(_: &mut MrbState, recv: MrbValue, _: &[MrbValue], _: Option<MrbValue>) -> Eval<MrbValue> {
    Ok(MrbValue::from_bool(num_sign(recv) < 0.0))
}

fn num_divmod(mrb: &mut MrbState, recv: MrbValue, args: &[MrbValue], _: Option<MrbValue>) -> Eval<MrbValue> {
    arity(mrb, args, 1, 0)?;
    let q = match arith(mrb, recv, args[0], Op::Div)? {
        MrbValue::Float(f) => MrbValue::Float(f.floor()),
        v => v,
    };
    let r = arith(mrb, recv, args[0], Op::Mod)?;
    Ok(mrb.new_ary(vec![q, r]))
}

fn num_fdiv(mrb: &mut MrbState, recv: MrbValue, args: &[MrbValue], _: Option<MrbValue>) -> Eval<MrbValue> {
    arity(mrb, args, 1, 0)?;
    let (Some(a), Some(b)) = (Num::of(recv), Num::of(args[0])) else {
        return Err(coerce_error(mrb, recv, args[0]));
    };
    Ok(MrbValue::Float(a.as_f64() / b.as_f64()))
}

fn num_to_f(_: &mut MrbState, recv: MrbValue, _: &[MrbValue], _: Option<MrbValue>) -> Eval<MrbValue> {
    Ok(MrbValue::Float(num_sign(recv)))
}

fn num_itself(_: &mut MrbState, recv: MrbValue, _: &[MrbValue], _: Option<MrbValue>) -> Eval<MrbValue> {
    Ok(recv)
}

fn always_true(_: &mut MrbState, _: MrbValue, _: &[MrbValue], _: Option<MrbValue>) -> Eval<MrbValue> {
    Ok(MrbValue::True)
}

fn always_false(_: &mut MrbState, _: MrbValue, _: &[MrbValue], _: Option<MrbValue>) -> Eval<MrbValue> {
    Ok(MrbValue::False)
}

/// `step(limit, by = 1) { |i| }` over integers or floats.
fn num_step(mrb: &mut MrbState, recv: MrbValue, args: &[MrbValue], block: Option<MrbValue>) -> Eval<MrbValue> {
    arity(mrb, args, 1, 1)?;
    let block = need_block(mrb, block)?;
    let limit = args[0];
    let by = args.get(1).copied().unwrap_or(MrbValue::Fixnum(1));
    let ai = mrb.arena_save();
    match (recv, limit, by) {
        (MrbValue::Fixnum(start), MrbValue::Fixnum(end), MrbValue::Fixnum(step)) => {
            if step == 0 {
                return Err(mrb.arg_error("step can't be 0"));
            }
            let mut i = start;
            while (step > 0 && i <= end) || (step < 0 && i >= end) {
                mrb.call_block(block, &[MrbValue::Fixnum(i)])?;
                mrb.arena_restore(ai);
                i += step;
            }
        }
        _ => {
            let (Some(start), Some(end), Some(step)) = (Num::of(recv), Num::of(limit), Num::of(by)) else {
                return Err(coerce_error(mrb, recv, limit));
            };
            let (start, end, step) = (start.as_f64(), end.as_f64(), step.as_f64());
            if step == 0.0 {
                return Err(mrb.arg_error("step can't be 0"));
            }
            let n = ((end - start) / step + f64::EPSILON * 4.0).floor();
            let mut k = 0.0;
            while k <= n {
                mrb.call_block(block, &[MrbValue::Float(start + k * step)])?;
                mrb.arena_restore(ai);
                k += 1.0;
            }
        }
    }
    Ok(recv)
}

// ============================================================================
// Integer
// ============================================================================

fn fixnum(recv: MrbValue) -> i64 {
    match recv {
        MrbValue::Fixnum(n) => n,
        _ => 0,
    }
}

pub(super) fn int_to_radix(n: i64, base: u32) -> String {
    if base == 10 {
        return n.to_string();
    }
    const DIGITS: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    if n == 0 {
        return "0".to_string();
    }
    let neg = n < 0;
    let mut out = Vec::new();
    let mut u = n.unsigned_abs();
    while u > 0 {
        out.push(DIGITS[(u % base as u64) as usize]);
        u /= base as u64;
    }
    if neg {
        out.push(b'-');
    }
    out.reverse();
    String::from_utf8(out).unwrap_or_default()
}

fn int_to_s(mrb: &mut MrbState, recv: MrbValue, args: &[MrbValue], _: Option<MrbValue>) -> Eval<MrbValue> {
    arity(mrb, args, 0, 1)?;
    let base = match args.first() {
        Some(&b) => {
            let b = int_arg(mrb, b)?;
            if !(2..=36).contains(&b) {
                return Err(mrb.arg_error(format!("invalid radix {}", b)));
            }
            b as u32
        }
        None => 10,
    };
    let s = int_to_radix(fixnum(recv), base);
    Ok(mrb.new_str(s))
}

fn int_div(mrb: &mut MrbState, recv: MrbValue, args: &[MrbValue], _: Option<MrbValue>) -> Eval<MrbValue> {
    arity(mrb, args, 1, 0)?;
    match arith(mrb, recv, args[0], Op::Div)? {
        MrbValue::Float(f) => {
            let q = f.floor();
            // 2^63 is exact as f64; anything at or past it stays a Float.
            if q >= i64::MIN as f64 && q < i64::MAX as f64 {
                Ok(MrbValue::Fixnum(q as i64))
            } else {
                Ok(MrbValue::Float(q))
            }
        }
        v => Ok(v),
    }
}

fn int_other(mrb: &mut MrbState, recv: MrbValue, args: &[MrbValue]) -> Eval<(i64, i64)> {
    arity(mrb, args, 1, 0)?;
    match args[0] {
        MrbValue::Fixnum(b) => Ok((fixnum(recv), b)),
        other => Err(coerce_error(mrb, recv, other)),
    }
}

fn int_and(mrb: &mut MrbState, recv: MrbValue, args: &[MrbValue], _: Option<MrbValue>) -> Eval<MrbValue> {
    let (a, b) = int_other(mrb, recv, args)?;
    Ok(MrbValue::Fixnum(a & b))
}

fn int_or(mrb: &mut MrbState, recv: MrbValue, args: &[MrbValue], _: Option<MrbValue>) -> Eval<MrbValue> {
    let (a, b) = int_other(mrb, recv, args)?;
    Ok(MrbValue::Fixnum(a | b))
}

fn int_xor(mrb: &mut MrbState, recv: MrbValue, args: &[MrbValue], _: Option<MrbValue>) -> Eval<MrbValue> {
    let (a, b) = int_other(mrb, recv, args)?;
    Ok(MrbValue::Fixnum(a ^ b))
}

fn int_not(_: &mut MrbState, recv: MrbValue, _: &[MrbValue], _: Option<MrbValue>) -> Eval<MrbValue> {
    Ok(MrbValue::Fixnum(!fixnum(recv)))
}

fn shift(a: i64, by: i64) -> i64 {
    match by {
        b if b >= 64 => 0,
        b if b >= 0 => a.wrapping_shl(b as u32),
        b if b <= -64 => {
            if a < 0 {
                -1
            } else {
                0
            }
        }
        b => a >> (-b) as u32,
    }
}

fn int_shl(mrb: &mut MrbState, recv: MrbValue, args: &[MrbValue], _: Option<MrbValue>) -> Eval<MrbValue> {
    let (a, b) = int_other(mrb, recv, args)?;
    Ok(MrbValue::Fixnum(shift(a, b)))
}

fn int_shr(mrb: &mut MrbState, recv: MrbValue, args: &[MrbValue], _: Option<MrbValue>) -> Eval<MrbValue> {
    let (a, b) = int_other(mrb, recv, args)?;
    Ok(MrbValue::Fixnum(shift(a, b.saturating_neg())))
}

fn int_even(_: &mut MrbState, recv: MrbValue, _: &[MrbValue], _: Option<MrbValue>) -> Eval<MrbValue> {
    Ok(MrbValue::from_bool(fixnum(recv) % 2 == 0))
}

fn int_odd(_: &mut MrbState, recv: MrbValue, _: &[MrbValue], _: Option<MrbValue>) -> Eval<MrbValue> {
    Ok(MrbValue::from_bool(fixnum(recv) % 2 != 0))
}

fn int_succ(_: &mut MrbState, recv: MrbValue, _: &[MrbValue], _: Option<MrbValue>) -> Eval<MrbValue> {
    Ok(MrbValue::Fixnum(fixnum(recv).wrapping_add(1)))
}

fn int_pred(_: &mut MrbState, recv: MrbValue, _: &[MrbValue], _: Option<MrbValue>) -> Eval<MrbValue> {
    Ok(MrbValue::Fixnum(fixnum(recv).wrapping_sub(1)))
}

fn int_chr(mrb: &mut MrbState, recv: MrbValue, _: &[MrbValue], _: Option<MrbValue>) -> Eval<MrbValue> {
    let n = fixnum(recv);
    match u8::try_from(n) {
        Ok(b) => Ok(mrb.new_str(char::from(b).to_string())),
        Err(_) => {
            let class = mrb.core.range_error;
            Err(mrb.raise_class(class, format!("{} out of char range", n)))
        }
    }
}

fn int_times(mrb: &mut MrbState, recv: MrbValue, _: &[MrbValue], block: Option<MrbValue>) -> Eval<MrbValue> {
    let block = need_block(mrb, block)?;
    let ai = mrb.arena_save();
    for i in 0..fixnum(recv) {
        mrb.call_block(block, &[MrbValue::Fixnum(i)])?;
        mrb.arena_restore(ai);
    }
    Ok(recv)
}

fn int_upto(mrb: &mut MrbState, recv: MrbValue, args: &[MrbValue], block: Option<MrbValue>) -> Eval<MrbValue> {
    arity(mrb, args, 1, 0)?;
    let block = need_block(mrb, block)?;
    let end = int_arg(mrb, args[0])?;
    let ai = mrb.arena_save();
    for i in fixnum(recv)..=end {
        mrb.call_block(block, &[MrbValue::Fixnum(i)])?;
        mrb.arena_restore(ai);
    }
    Ok(recv)
}

fn int_downto(mrb: &mut MrbState, recv: MrbValue, args: &[MrbValue], block: Option<MrbValue>) -> Eval<MrbValue> {
    arity(mrb, args, 1, 0)?;
    let block = need_block(mrb, block)?;
    let end = int_arg(mrb, args[0])?;
    let ai = mrb.arena_save();
    for i in (end..=fixnum(recv)).rev() {
        mrb.call_block(block, &[MrbValue::Fixnum(i)])?;
        mrb.arena_restore(ai);
    }
    Ok(recv)
}

fn int_gcd(mrb: &mut MrbState, recv: MrbValue, args: &[MrbValue], _: Option<MrbValue>) -> Eval<MrbValue> {
    let (mut a, mut b) = int_other(mrb, recv, args)?;
    a = a.abs();
    b = b.abs();
    while b != 0 {
        (a, b) = (b, a % b);
    }
    Ok(MrbValue::Fixnum(a))
}

// ============================================================================
// Float
// ============================================================================

fn float(recv: MrbValue) -> f64 {
    num_sign(recv)
}

/// Ruby's float formatting: `1.0`, `0.1`, `1.0e+20`, `Infinity`, `NaN`.
pub(super) fn float_to_s(f: f64) -> String {
    if f.is_nan() {
        return "NaN".to_string();
    }
    if f.is_infinite() {
        return if f > 0.0 { "Infinity" } else { "-Infinity" }.to_string();
    }
    let abs = f.abs();
    if abs != 0.0 && !(1e-4..1e16).contains(&abs) {
        let s = format!("{:e}", f);
        let (mantissa, exp) = s.split_once('e').unwrap_or((&s, "0"));
        let mantissa = if mantissa.contains('.') {
            mantissa.to_string()
        } else {
            format!("{}.0", mantissa)
        };
        let (sign, digits) = match exp.strip_prefix('-') {
            Some(d) => ('-', d),
            None => ('+', exp),
        };
        return format!("{}e{}{:0>2}", mantissa, sign, digits);
    }
    if f == f.trunc() {
        format!("{:.1}", f)
    } else {
        format!("{}", f)
    }
}

fn float_to_s_m(mrb: &mut MrbState, recv: MrbValue, _: &[MrbValue], _: Option<MrbValue>) -> Eval<MrbValue> {
    let s = float_to_s(float(recv));
    Ok(mrb.new_str(s))
}

fn float_to_int(mrb: &mut MrbState, f: f64) -> Eval<MrbValue> {
    if !f.is_finite() || f >= i64::MAX as f64 || f < i64::MIN as f64 {
        let class = mrb.core.range_error;
        return Err(mrb.raise_class(class, format!("{} out of range of integer", float_to_s(f))));
    }
    Ok(MrbValue::Fixnum(f as i64))
}

fn float_to_i(mrb: &mut MrbState, recv: MrbValue, _: &[MrbValue], _: Option<MrbValue>) -> Eval<MrbValue> {
    float_to_int(mrb, float(recv).trunc())
}

fn float_floor(mrb: &mut MrbState, recv: MrbValue, _: &[MrbValue], _: Option<MrbValue>) -> Eval<MrbValue> {
    float_to_int(mrb, float(recv).floor())
}

fn float_ceil(mrb: &mut MrbState, recv: MrbValue, _: &[MrbValue], _: Option<MrbValue>) -> Eval<MrbValue> {
    float_to_int(mrb, float(recv).ceil())
}

fn float_round(mrb: &mut MrbState, recv: MrbValue, args: &[MrbValue], _: Option<MrbValue>) -> Eval<MrbValue> {
    arity(mrb, args, 0, 1)?;
    let digits = match args.first() {
        Some(&d) => int_arg(mrb, d)?,
        None => 0,
    };
    let f = float(recv);
    if digits <= 0 {
        let scale = 10f64.powi((-digits) as i32);
        return float_to_int(mrb, (f / scale).round() * scale);
    }
    let scale = 10f64.powi(digits.min(20) as i32);
    Ok(MrbValue::Float((f * scale).round() / scale))
}

fn float_nan(_: &mut MrbState, recv: MrbValue, _: &[MrbValue], _: Option<MrbValue>) -> Eval<MrbValue> {
    Ok(MrbValue::from_bool(float(recv).is_nan()))
}

fn float_infinite(_: &mut MrbState, recv: MrbValue, _: &[MrbValue], _: Option<MrbValue>) -> Eval<MrbValue> {
    let f = float(recv);
    Ok(match f.is_infinite() {
        true if f > 0.0 => MrbValue::Fixnum(1),
        true => MrbValue::Fixnum(-1),
        false => MrbValue::Nil,
    })
}

fn float_finite(_: &mut MrbState, recv: MrbValue, _: &[MrbValue], _: Option<MrbValue>) -> Eval<MrbValue> {
    Ok(MrbValue::from_bool(float(recv).is_finite()))
}

// ============================================================================
// Comparable
// ============================================================================

/// `a <=> b` as an ordering. Numbers and strings compare directly; anything
/// else goes through the guest `<=>`.
pub(super) fn compare_values(mrb: &mut MrbState, a: MrbValue, b: MrbValue) -> Eval<Ordering> {
    if let (Some(x), Some(y)) = (Num::of(a), Num::of(b)) {
        return num_partial_cmp(x, y).ok_or_else(|| compare_failed(mrb, a, b));
    }
    if let (Some(x), Some(y)) = (mrb.str_ref(a), mrb.str_ref(b)) {
        return Ok(x.cmp(y));
    }
    let cmp = mrb.syms.cmp;
    match mrb.call_method(a, cmp, &[b], None)? {
        MrbValue::Fixnum(n) => Ok(n.cmp(&0)),
        MrbValue::Float(f) if !f.is_nan() => Ok(f.partial_cmp(&0.0).unwrap_or(Ordering::Equal)),
        _ => Err(compare_failed(mrb, a, b)),
    }
}

fn cmp_eq(mrb: &mut MrbState, recv: MrbValue, args: &[MrbValue], _: Option<MrbValue>) -> Eval<MrbValue> {
    arity(mrb, args, 1, 0)?;
    if recv.identical(args[0]) {
        return Ok(MrbValue::True);
    }
    let cmp = mrb.syms.cmp;
    let r = mrb.call_method(recv, cmp, &[args[0]], None)?;
    Ok(MrbValue::from_bool(r == MrbValue::Fixnum(0)))
}

fn cmp_with(mrb: &mut MrbState, recv: MrbValue, args: &[MrbValue], pred: fn(Ordering) -> bool) -> Eval<MrbValue> {
    arity(mrb, args, 1, 0)?;
    let ord = compare_values(mrb, recv, args[0])?;
    Ok(MrbValue::from_bool(pred(ord)))
}

fn cmp_lt(mrb: &mut MrbState, recv: MrbValue, args: &[MrbValue], _: Option<MrbValue>) -> Eval<MrbValue> {
    cmp_with(mrb, recv, args, Ordering::is_lt)
}

fn cmp_le(mrb: &mut MrbState, recv: MrbValue, args: &[MrbValue], _: Option<MrbValue>) -> Eval<MrbValue> {
    cmp_with(mrb, recv, args, Ordering::is_le)
}

fn cmp_gt(mrb: &mut MrbState, recv: MrbValue, args: &[MrbValue], _: Option<MrbValue>) -> Eval<MrbValue> {
    cmp_with(mrb, recv, args, Ordering::is_gt)
}

fn cmp_ge(mrb: &mut MrbState, recv: MrbValue, args: &[MrbValue], _: Option<MrbValue>) -> Eval<MrbValue> {
    cmp_with(mrb, recv, args, Ordering::is_ge)
}

fn cmp_between(mrb: &mut MrbState, recv: MrbValue, args: &[MrbValue], _: Option<MrbValue>) -> Eval<MrbValue> {
    arity(mrb, args, 2, 0)?;
    let lo = compare_values(mrb, recv, args[0])?;
    let hi = compare_values(mrb, recv, args[1])?;
    Ok(MrbValue::from_bool(lo.is_ge() && hi.is_le()))
}

fn cmp_clamp(mrb: &mut MrbState, recv: MrbValue, args: &[MrbValue], _: Option<MrbValue>) -> Eval<MrbValue> {
    arity(mrb, args, 2, 0)?;
    let (lo, hi) = (arg(args, 0), arg(args, 1));
    if compare_values(mrb, lo, hi)?.is_gt() {
        return Err(mrb.arg_error("min argument must be less than or equal to max argument"));
    }
    if compare_values(mrb, recv, lo)?.is_lt() {
        return Ok(lo);
    }
    if compare_values(mrb, recv, hi)?.is_gt() {
        return Ok(hi);
    }
    Ok(recv)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::VmOptions;

    fn eval(src: &str) -> (Box<MrbState>, MrbValue) {
        let mut mrb = MrbState::open(VmOptions::default());
        let v = mrb.load_string(src);
        (mrb, v)
    }

    #[test]
    fn test_floor_division_and_modulo() {
        let (mrb, v) = eval("[-7 / 2, -7 % 2, 7 % -2, 7.5 % 2]");
        assert_eq!(mrb.ary_entry(v, 0), MrbValue::Fixnum(-4));
        assert_eq!(mrb.ary_entry(v, 1), MrbValue::Fixnum(1));
        assert_eq!(mrb.ary_entry(v, 2), MrbValue::Fixnum(-1));
        assert_eq!(mrb.ary_entry(v, 3), MrbValue::Float(1.5));
    }

    #[test]
    fn test_divide_by_zero_raises() {
        let (mut mrb, _) = eval("1 / 0");
        let exc = mrb.take_exc().expect("exception");
        let class = mrb.obj_class(exc);
        assert_eq!(mrb.class_name(class), "ZeroDivisionError");
    }

    #[test]
    fn test_overflow_promotes_to_float() {
        let (_, v) = eval("9223372036854775807 + 1");
        assert!(matches!(v, MrbValue::Float(_)));
    }

    #[test]
    fn test_min_divided_by_minus_one_promotes_to_float() {
        let (mrb, v) = eval("m = -9223372036854775807 - 1\n[m / -1, m % -1, m.div(-1)]");
        assert_eq!(mrb.ary_entry(v, 0), MrbValue::Float(9223372036854775808.0));
        assert_eq!(mrb.ary_entry(v, 1), MrbValue::Fixnum(0));
        assert_eq!(mrb.ary_entry(v, 2), MrbValue::Float(9223372036854775808.0));
    }

    #[test]
    fn test_float_formatting() {
        assert_eq!(float_to_s(1.0), "1.0");
        assert_eq!(float_to_s(0.1), "0.1");
        assert_eq!(float_to_s(1e20), "1.0e+20");
        assert_eq!(float_to_s(f64::NEG_INFINITY), "-Infinity");
        assert_eq!(float_to_s(2.5e-5), "2.5e-05");
    }

    #[test]
    fn test_radix_formatting() {
        assert_eq!(int_to_radix(255, 16), "ff");
        assert_eq!(int_to_radix(-5, 2), "-101");
        assert_eq!(int_to_radix(0, 8), "0");
    }

    #[test]
    fn test_times_collects() {
        let (_, v) = eval("sum = 0\n4.times { |i| sum += i }\nsum");
        assert_eq!(v, MrbValue::Fixnum(6));
    }

    #[test]
    fn test_comparable_on_user_class() {
        let src = "class V\n include Comparable\n attr_reader :n\n def initialize(n); @n = n; end\n def <=>(o); n <=> o.n; end\nend\n[V.new(1) < V.new(2), V.new(3).between?(V.new(1), V.new(3))]";
        let (mrb, v) = eval(src);
        assert_eq!(mrb.ary_entry(v, 0), MrbValue::True);
        assert_eq!(mrb.ary_entry(v, 1), MrbValue::True);
    }
}
