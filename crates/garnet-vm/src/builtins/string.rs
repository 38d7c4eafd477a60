//! String and Symbol.

use super::kernel::sprintf;
use super::numeric::ordering_value;
use super::{arg, arity, int_arg, is_plain_symbol, need_block, quote, range_span, seq_span, str_arg};
use crate::interp::Eval;
use crate::state::MrbState;
use crate::value::MrbValue;
use rustc_hash::FxHasher;
use std::hash::{Hash, Hasher};

pub(super) fn init(mrb: &mut MrbState) {
    let string = mrb.core.string;
    let comparable = mrb.core.comparable;
    mrb.include_module(string, comparable);
    mrb.define_builtin(string, "initialize", str_initialize);
    mrb.define_builtin(string, "+", str_plus);
    mrb.define_builtin(string, "*", str_times);
    mrb.define_builtin(string, "%", str_format);
    mrb.define_builtin(string, "==", str_eq);
    mrb.define_builtin(string, "===", str_eq);
    mrb.define_builtin(string, "eql?", str_eq);
    mrb.define_builtin(string, "<=>", str_cmp);
    mrb.define_builtin(string, "hash", str_hash);
    mrb.define_builtin(string, "length", str_length);
    mrb.define_builtin(string, "size", str_length);
    mrb.define_builtin(string, "bytesize", str_bytesize);
    mrb.define_builtin(string, "empty?", str_empty);
    mrb.define_builtin(string, "to_s", str_to_s);
    mrb.define_builtin(string, "to_str", str_to_s);
    mrb.define_builtin(string, "inspect", str_inspect);
    mrb.define_builtin(string, "to_sym", str_to_sym);
    mrb.define_builtin(string, "intern", str_to_sym);
    mrb.define_builtin(string, "to_i", str_to_i);
    mrb.define_builtin(string, "to_f", str_to_f);
    mrb.define_builtin(string, "upcase", str_upcase);
    mrb.define_builtin(string, "downcase", str_downcase);
    mrb.define_builtin(string, "capitalize", str_capitalize);
    mrb.define_builtin(string, "swapcase", str_swapcase);
    mrb.define_builtin(string, "upcase!", str_upcase_bang);
    mrb.define_builtin(string, "downcase!", str_downcase_bang);
    mrb.define_builtin(string, "reverse", str_reverse);
    mrb.define_builtin(string, "strip", str_strip);
    mrb.define_builtin(string, "lstrip", str_lstrip);
    mrb.define_builtin(string, "rstrip", str_rstrip);
    mrb.define_builtin(string, "chomp", str_chomp);
    mrb.define_builtin(string, "chop", str_chop);
    mrb.define_builtin(string, "include?", str_include);
    mrb.define_builtin(string, "start_with?", str_start_with);
    mrb.define_builtin(string, "end_with?", str_end_with);
    mrb.define_builtin(string, "index", str_index);
    mrb.define_builtin(string, "rindex", str_rindex);
    mrb.define_builtin(string, "[]", str_aref);
    mrb.define_builtin(string, "slice", str_aref);
    mrb.define_builtin(string, "split", str_split);
    mrb.define_builtin(string, "chars", str_chars);
    mrb.define_builtin(string, "bytes", str_bytes);
    mrb.define_builtin(string, "lines", str_lines);
    mrb.define_builtin(string, "each_char", str_each_char);
    mrb.define_builtin(string, "gsub", str_gsub);
    mrb.define_builtin(string, "sub", str_sub);
    mrb.define_builtin(string, "gsub!", str_gsub_bang);
    mrb.define_builtin(string, "sub!", str_sub_bang);
    mrb.define_builtin(string, "tr", str_tr);
    mrb.define_builtin(string, "delete", str_delete);
    mrb.define_builtin(string, "<<", str_append);
    mrb.define_builtin(string, "concat", str_append);
    mrb.define_builtin(string, "replace", str_replace);
    mrb.define_builtin(string, "ljust", str_ljust);
    mrb.define_builtin(string, "rjust", str_rjust);
    mrb.define_builtin(string, "center", str_center);
    mrb.define_builtin(string, "ord", str_ord);
    mrb.define_builtin(string, "succ", str_succ);
    mrb.define_builtin(string, "next", str_succ);

    let symbol = mrb.core.symbol;
    mrb.define_builtin(symbol, "to_s", sym_to_s);
    mrb.define_builtin(symbol, "id2name", sym_to_s);
    mrb.define_builtin(symbol, "name", sym_to_s);
    mrb.define_builtin(symbol, "to_sym", sym_to_sym);
    mrb.define_builtin(symbol, "inspect", sym_inspect);
    mrb.define_builtin(symbol, "to_proc", sym_to_proc);
    mrb.define_builtin(symbol, "length", sym_length);
    mrb.define_builtin(symbol, "size", sym_length);
    mrb.define_builtin(symbol, "<=>", sym_cmp);
}

// ============================================================================
// Helpers
// ============================================================================

fn this(mrb: &MrbState, recv: MrbValue) -> String {
    mrb.str_ref(recv).unwrap_or_default().to_string()
}

/// Argument coerced to a string, or a `TypeError` naming the conversion.
fn implicit_str(mrb: &mut MrbState, v: MrbValue) -> Eval<String> {
    match mrb.str_ref(v) {
        Some(s) => Ok(s.to_string()),
        None => {
            let class = mrb.obj_class(v);
            let name = if v.is_nil() {
                "nil".to_string()
            } else {
                mrb.class_name(class)
            };
            Err(mrb.type_error(format!("no implicit conversion of {} into String", name)))
        }
    }
}

fn set_this(mrb: &mut MrbState, recv: MrbValue, s: String) {
    if let Some(dst) = mrb.str_mut(recv) {
        *dst = s;
    }
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
        None => String::new(),
    }
}

// ============================================================================
// String
// ============================================================================

fn str_initialize(mrb: &mut MrbState, recv: MrbValue, args: &[MrbValue], _: Option<MrbValue>) -> Eval<MrbValue> {
    arity(mrb, args, 0, 1)?;
    if let Some(&v) = args.first() {
        let s = implicit_str(mrb, v)?;
        set_this(mrb, recv, s);
    }
    Ok(recv)
}

fn str_plus(mrb: &mut MrbState, recv: MrbValue, args: &[MrbValue], _: Option<MrbValue>) -> Eval<MrbValue> {
    arity(mrb, args, 1, 0)?;
    let other = implicit_str(mrb, args[0])?;
    let s = this(mrb, recv) + &other;
    Ok(mrb.new_str(s))
}

fn str_times(mrb: &mut MrbState, recv: MrbValue, args: &[MrbValue], _: Option<MrbValue>) -> Eval<MrbValue> {
    arity(mrb, args, 1, 0)?;
    let n = int_arg(mrb, args[0])?;
    if n < 0 {
        return Err(mrb.arg_error("negative argument"));
    }
    let s = this(mrb, recv).repeat(n as usize);
    Ok(mrb.new_str(s))
}

fn str_format(mrb: &mut MrbState, recv: MrbValue, args: &[MrbValue], _: Option<MrbValue>) -> Eval<MrbValue> {
    arity(mrb, args, 1, 0)?;
    let fmt = this(mrb, recv);
    let values = match mrb.ary_ref(args[0]) {
        Some(items) => items.clone(),
        None => vec![args[0]],
    };
    let s = sprintf(mrb, &fmt, &values)?;
    Ok(mrb.new_str(s))
}

fn str_eq(mrb: &mut MrbState, recv: MrbValue, args: &[MrbValue], _: Option<MrbValue>) -> Eval<MrbValue> {
    arity(mrb, args, 1, 0)?;
    let eq = match (mrb.str_ref(recv), mrb.str_ref(args[0])) {
        (Some(a), Some(b)) => a == b,
        _ => false,
    };
    Ok(MrbValue::from_bool(eq))
}

fn str_cmp(mrb: &mut MrbState, recv: MrbValue, args: &[MrbValue], _: Option<MrbValue>) -> Eval<MrbValue> {
    arity(mrb, args, 1, 0)?;
    Ok(match (mrb.str_ref(recv), mrb.str_ref(args[0])) {
        (Some(a), Some(b)) => ordering_value(a.cmp(b)),
        _ => MrbValue::Nil,
    })
}

fn str_hash(mrb: &mut MrbState, recv: MrbValue, _: &[MrbValue], _: Option<MrbValue>) -> Eval<MrbValue> {
    let mut h = FxHasher::default();
    mrb.str_ref(recv).unwrap_or_default().hash(&mut h);
    Ok(MrbValue::Fixnum(h.finish() as i64))
}

fn str_length(mrb: &mut MrbState, recv: MrbValue, _: &[MrbValue], _: Option<MrbValue>) -> Eval<MrbValue> {
    Ok(MrbValue::Fixnum(mrb.str_ref(recv).map(|s| s.chars().count()).unwrap_or(0) as i64))
}

fn str_bytesize(mrb: &mut MrbState, recv: MrbValue, _: &[MrbValue], _: Option<MrbValue>) -> Eval<MrbValue> {
    Ok(MrbValue::Fixnum(mrb.str_ref(recv).map(str::len).unwrap_or(0) as i64))
}

fn str_empty(mrb: &mut MrbState, recv: MrbValue, _: &[MrbValue], _: Option<MrbValue>) -> Eval<MrbValue> {
    Ok(MrbValue::from_bool(mrb.str_ref(recv).map_or(true, str::is_empty)))
}

fn str_to_s(_: &mut MrbState, recv: MrbValue, _: &[MrbValue], _: Option<MrbValue>) -> Eval<MrbValue> {
    Ok(recv)
}

fn str_inspect(mrb: &mut MrbState, recv: MrbValue, _: &[MrbValue], _: Option<MrbValue>) -> Eval<MrbValue> {
    let s = quote(&this(mrb, recv));
    Ok(mrb.new_str(s))
}

fn str_to_sym(mrb: &mut MrbState, recv: MrbValue, _: &[MrbValue], _: Option<MrbValue>) -> Eval<MrbValue> {
    let s = this(mrb, recv);
    Ok(MrbValue::Symbol(mrb.intern(&s)))
}

/// Lenient integer prefix parse: `"12abc".to_i == 12`, garbage gives 0.
fn lenient_int(s: &str, base: u32) -> i64 {
    let s = s.trim_start();
    let (neg, body) = match s.as_bytes().first() {
        Some(b'-') => (true, &s[1..]),
        Some(b'+') => (false, &s[1..]),
        _ => (false, s),
    };
    let body = match base {
        16 => body.strip_prefix("0x").or_else(|| body.strip_prefix("0X")).unwrap_or(body),
        2 => body.strip_prefix("0b").or_else(|| body.strip_prefix("0B")).unwrap_or(body),
        8 => body.strip_prefix("0o").or_else(|| body.strip_prefix("0O")).unwrap_or(body),
        _ => body,
    };
    let mut n: i64 = 0;
    let mut prev_underscore = true;
    for c in body.chars() {
        if c == '_' && !prev_underscore {
            prev_underscore = true;
            continue;
        }
        let Some(d) = c.to_digit(base) else {
            break;
        };
        prev_underscore = false;
        n = n.wrapping_mul(base as i64).wrapping_add(d as i64);
    }
    if neg {
        -n
    } else {
        n
    }
}

/// Lenient float prefix parse.
pub(super) fn lenient_float(s: &str) -> f64 {
    let s = s.trim_start();
    let bytes = s.as_bytes();
    let mut end = 0;
    if matches!(bytes.first(), Some(b'-' | b'+')) {
        end = 1;
    }
    let digits = |from: usize| {
        let mut i = from;
        while i < bytes.len() && (bytes[i].is_ascii_digit() || (bytes[i] == b'_' && i > from)) {
            i += 1;
        }
        i
    };
    let int_end = digits(end);
    if int_end == end {
        return 0.0;
    }
    end = int_end;
    if bytes.get(end) == Some(&b'.') && bytes.get(end + 1).is_some_and(u8::is_ascii_digit) {
        end = digits(end + 1);
    }
    if matches!(bytes.get(end), Some(b'e' | b'E')) {
        let mut e = end + 1;
        if matches!(bytes.get(e), Some(b'-' | b'+')) {
            e += 1;
        }
        let exp_end = digits(e);
        if exp_end > e {
            end = exp_end;
        }
    }
    s[..end].replace('_', "").parse().unwrap_or(0.0)
}

fn str_to_i(mrb: &mut MrbState, recv: MrbValue, args: &[MrbValue], _: Option<MrbValue>) -> Eval<MrbValue> {
    arity(mrb, args, 0, 1)?;
    let base = match args.first() {
        Some(&b) => int_arg(mrb, b)?,
        None => 10,
    };
    if !(2..=36).contains(&base) {
        return Err(mrb.arg_error(format!("invalid radix {}", base)));
    }
    Ok(MrbValue::Fixnum(lenient_int(&this(mrb, recv), base as u32)))
}

fn str_to_f(mrb: &mut MrbState, recv: MrbValue, _: &[MrbValue], _: Option<MrbValue>) -> Eval<MrbValue> {
    Ok(MrbValue::Float(lenient_float(&this(mrb, recv))))
}

fn map_str(mrb: &mut MrbState, recv: MrbValue, f: impl FnOnce(&str) -> String) -> MrbValue {
    let s = f(mrb.str_ref(recv).unwrap_or_default());
    mrb.new_str(s)
}

fn str_upcase(mrb: &mut MrbState, recv: MrbValue, _: &[MrbValue], _: Option<MrbValue>) -> Eval<MrbValue> {
    Ok(map_str(mrb, recv, str::to_uppercase))
}

fn str_downcase(mrb: &mut MrbState, recv: MrbValue, _: &[MrbValue], _: Option<MrbValue>) -> Eval<MrbValue> {
    Ok(map_str(mrb, recv, str::to_lowercase))
}

fn str_capitalize(mrb: &mut MrbState, recv: MrbValue, _: &[MrbValue], _: Option<MrbValue>) -> Eval<MrbValue> {
    Ok(map_str(mrb, recv, capitalize))
}

fn str_swapcase(mrb: &mut MrbState, recv: MrbValue, _: &[MrbValue], _: Option<MrbValue>) -> Eval<MrbValue> {
    Ok(map_str(mrb, recv, |s| {
        s.chars()
            .flat_map(|c| -> Box<dyn Iterator<Item = char>> {
                if c.is_uppercase() {
                    Box::new(c.to_lowercase())
                } else {
                    Box::new(c.to_uppercase())
                }
            })
            .collect()
    }))
}

fn bang(mrb: &mut MrbState, recv: MrbValue, f: impl FnOnce(&str) -> String) -> MrbValue {
    let old = this(mrb, recv);
    let new = f(&old);
    if new == old {
        return MrbValue::Nil;
    }
    set_this(mrb, recv, new);
    recv
}

fn str_upcase_bang(mrb: &mut MrbState, recv: MrbValue, _: &[MrbValue], _: Option<MrbValue>) -> Eval<MrbValue> {
    Ok(bang(mrb, recv, str::to_uppercase))
}

fn str_downcase_bang(mrb: &mut MrbState, recv: MrbValue, _: &[MrbValue], _: Option<MrbValue>) -> Eval<MrbValue> {
    Ok(bang(mrb, recv, str::to_lowercase))
}

fn str_reverse(mrb: &mut MrbState, recv: MrbValue, _: &[MrbValue], _: Option<MrbValue>) -> Eval<MrbValue> {
    Ok(map_str(mrb, recv, |s| s.chars().rev().collect()))
}

fn str_strip(mrb: &mut MrbState, recv: MrbValue, _: &[MrbValue], _: Option<MrbValue>) -> Eval<MrbValue> {
    Ok(map_str(mrb, recv, |s| s.trim_matches(|c: char| c.is_whitespace() || c == '\0').to_string()))
}

fn str_lstrip(mrb: &mut MrbState, recv: MrbValue, _: &[MrbValue], _: Option<MrbValue>) -> Eval<MrbValue> {
    Ok(map_str(mrb, recv, |s| s.trim_start().to_string()))
}

fn str_rstrip(mrb: &mut MrbState, recv: MrbValue, _: &[MrbValue], _: Option<MrbValue>) -> Eval<MrbValue> {
    Ok(map_str(mrb, recv, |s| s.trim_end_matches(|c: char| c.is_whitespace() || c == '\0').to_string()))
}

fn str_chomp(mrb: &mut MrbState, recv: MrbValue, args: &[MrbValue], _: Option<MrbValue>) -> Eval<MrbValue> {
    arity(mrb, args, 0, 1)?;
    let suffix = match args.first() {
        Some(&v) => Some(implicit_str(mrb, v)?),
        None => None,
    };
    Ok(map_str(mrb, recv, |s| match suffix {
        Some(suffix) => s.strip_suffix(suffix.as_str()).unwrap_or(s).to_string(),
        None => s
            .strip_suffix("\r\n")
            .or_else(|| s.strip_suffix('\n'))
            .or_else(|| s.strip_suffix('\r'))
            .unwrap_or(s)
            .to_string(),
    }))
}

fn str_chop(mrb: &mut MrbState, recv: MrbValue, _: &[MrbValue], _: Option<MrbValue>) -> Eval<MrbValue> {
    Ok(map_str(mrb, recv, |s| match s.strip_suffix("\r\n") {
        Some(rest) => rest.to_string(),
        None => {
            let mut out = s.to_string();
            out.pop();
            out
        }
    }))
}

fn str_include(mrb: &mut MrbState, recv: MrbValue, args: &[MrbValue], _: Option<MrbValue>) -> Eval<MrbValue> {
    arity(mrb, args, 1, 0)?;
    let needle = implicit_str(mrb, args[0])?;
    Ok(MrbValue::from_bool(this(mrb, recv).contains(&needle)))
}

fn str_start_with(mrb: &mut MrbState, recv: MrbValue, args: &[MrbValue], _: Option<MrbValue>) -> Eval<MrbValue> {
    let s = this(mrb, recv);
    for &a in args {
        if s.starts_with(&implicit_str(mrb, a)?) {
            return Ok(MrbValue::True);
        }
    }
    Ok(MrbValue::False)
}

fn str_end_with(mrb: &mut MrbState, recv: MrbValue, args: &[MrbValue], _: Option<MrbValue>) -> Eval<MrbValue> {
    let s = this(mrb, recv);
    for &a in args {
        if s.ends_with(&implicit_str(mrb, a)?) {
            return Ok(MrbValue::True);
        }
    }
    Ok(MrbValue::False)
}

fn char_index(s: &str, byte: usize) -> usize {
    s[..byte].chars().count()
}

fn byte_offset(s: &str, chars: usize) -> Option<usize> {
    s.char_indices().map(|(i, _)| i).chain(std::iter::once(s.len())).nth(chars)
}

fn str_index(mrb: &mut MrbState, recv: MrbValue, args: &[MrbValue], _: Option<MrbValue>) -> Eval<MrbValue> {
    arity(mrb, args, 1, 1)?;
    let needle = implicit_str(mrb, args[0])?;
    let s = this(mrb, recv);
    let len = s.chars().count();
    let start = match args.get(1) {
        Some(&v) => match seq_span(int_arg(mrb, v)?, 0, len) {
            Some((start, _)) => start,
            None => return Ok(MrbValue::Nil),
        },
        None => 0,
    };
    let Some(from) = byte_offset(&s, start) else {
        return Ok(MrbValue::Nil);
    };
    Ok(s[from..]
        .find(&needle)
        .map(|b| MrbValue::Fixnum(char_index(&s, from + b) as i64))
        .unwrap_or(MrbValue::Nil))
}

fn str_rindex(mrb: &mut MrbState, recv: MrbValue, args: &[MrbValue], _: Option<MrbValue>) -> Eval<MrbValue> {
    arity(mrb, args, 1, 0)?;
    let needle = implicit_str(mrb, args[0])?;
    let s = this(mrb, recv);
    Ok(s.rfind(&needle)
        .map(|b| MrbValue::Fixnum(char_index(&s, b) as i64))
        .unwrap_or(MrbValue::Nil))
}

fn substr(mrb: &mut MrbState, s: &str, span: Option<(usize, usize)>) -> MrbValue {
    match span {
        Some((start, count)) => {
            let sub: String = s.chars().skip(start).take(count).collect();
            mrb.new_str(sub)
        }
        None => MrbValue::Nil,
    }
}

fn str_aref(mrb: &mut MrbState, recv: MrbValue, args: &[MrbValue], _: Option<MrbValue>) -> Eval<MrbValue> {
    arity(mrb, args, 1, 1)?;
    let s = this(mrb, recv);
    let len = s.chars().count();
    if let Some(&count) = args.get(1) {
        let start = int_arg(mrb, args[0])?;
        let count = int_arg(mrb, count)?;
        return Ok(substr(mrb, &s, seq_span(start, count, len)));
    }
    let index = args[0];
    if let Some(r) = mrb.range_ref(index) {
        let span = range_span(mrb, r, len)?;
        return Ok(substr(mrb, &s, span));
    }
    if let Some(needle) = mrb.str_ref(index).map(str::to_string) {
        return Ok(if s.contains(&needle) {
            mrb.new_str(needle)
        } else {
            MrbValue::Nil
        });
    }
    let i = int_arg(mrb, index)?;
    let span = seq_span(i, 1, len).filter(|(start, _)| *start < len);
    Ok(substr(mrb, &s, span))
}

fn str_split(mrb: &mut MrbState, recv: MrbValue, args: &[MrbValue], _: Option<MrbValue>) -> Eval<MrbValue> {
    arity(mrb, args, 0, 2)?;
    let s = this(mrb, recv);
    let sep = match arg(args, 0) {
        MrbValue::Nil => None,
        v => Some(implicit_str(mrb, v)?),
    };
    let limit = match args.get(1) {
        Some(&v) => int_arg(mrb, v)?,
        None => 0,
    };
    let mut parts: Vec<String> = match sep.as_deref() {
        None | Some(" ") if limit > 0 => {
            let mut out = Vec::new();
            let mut rest = s.trim_start();
            while !rest.is_empty() {
                if out.len() as i64 == limit - 1 {
                    out.push(rest.to_string());
                    break;
                }
                match rest.find(char::is_whitespace) {
                    Some(i) => {
                        out.push(rest[..i].to_string());
                        rest = rest[i..].trim_start();
                    }
                    None => {
                        out.push(rest.to_string());
                        break;
                    }
                }
            }
            out
        }
        None | Some(" ") => s.split_whitespace().map(str::to_string).collect(),
        Some("") => s.chars().map(String::from).collect(),
        Some(sep) if limit > 0 => s.splitn(limit as usize, sep).map(str::to_string).collect(),
        Some(sep) => s.split(sep).map(str::to_string).collect(),
    };
    if limit == 0 {
        while parts.last().is_some_and(String::is_empty) {
            parts.pop();
        }
    }
    let items = parts.into_iter().map(|p| mrb.new_str(p)).collect();
    Ok(mrb.new_ary(items))
}

fn str_chars(mrb: &mut MrbState, recv: MrbValue, _: &[MrbValue], _: Option<MrbValue>) -> Eval<MrbValue> {
    let s = this(mrb, recv);
    let items = s.chars().map(|c| mrb.new_str(c.to_string())).collect();
    Ok(mrb.new_ary(items))
}

fn str_bytes(mrb: &mut MrbState, recv: MrbValue, _: &[MrbValue], _: Option<MrbValue>) -> Eval<MrbValue> {
    let items = this(mrb, recv).bytes().map(|b| MrbValue::Fixnum(b as i64)).collect();
    Ok(mrb.new_ary(items))
}

fn str_lines(mrb: &mut MrbState, recv: MrbValue, _: &[MrbValue], _: Option<MrbValue>) -> Eval<MrbValue> {
    let s = this(mrb, recv);
    let items = s.split_inclusive('\n').map(|l| mrb.new_str(l)).collect();
    Ok(mrb.new_ary(items))
}

fn str_each_char(mrb: &mut MrbState, recv: MrbValue, _: &[MrbValue], block: Option<MrbValue>) -> Eval<MrbValue> {
    let block = need_block(mrb, block)?;
    let s = this(mrb, recv);
    let ai = mrb.arena_save();
    for c in s.chars() {
        let v = mrb.new_str(c.to_string());
        mrb.call_block(block, &[v])?;
        mrb.arena_restore(ai);
    }
    Ok(recv)
}

/// Replace occurrences of a literal pattern, at most `limit` of them.
fn substitute(
    mrb: &mut MrbState,
    recv: MrbValue,
    args: &[MrbValue],
    block: Option<MrbValue>,
    limit: Option<usize>,
) -> Eval<Option<String>> {
    if block.is_some() {
        arity(mrb, args, 1, 0)?;
    } else {
        arity(mrb, args, 2, 0)?;
    }
    let pattern = match mrb.str_ref(args[0]) {
        Some(p) => p.to_string(),
        None => {
            let class = mrb.obj_class(args[0]);
            let name = mrb.class_name(class);
            return Err(mrb.type_error(format!("wrong argument type {} (expected String)", name)));
        }
    };
    let replacement = match args.get(1) {
        Some(&r) => Some(implicit_str(mrb, r)?),
        None => None,
    };
    let s = this(mrb, recv);
    let mut matches: Vec<usize> = if pattern.is_empty() {
        s.char_indices().map(|(i, _)| i).chain(std::iter::once(s.len())).collect()
    } else {
        s.match_indices(pattern.as_str()).map(|(i, _)| i).collect()
    };
    if let Some(limit) = limit {
        matches.truncate(limit);
    }
    if matches.is_empty() {
        return Ok(None);
    }
    let mut out = String::with_capacity(s.len());
    let mut last = 0;
    for at in matches {
        out.push_str(&s[last..at]);
        match (&replacement, block) {
            (Some(r), _) => out.push_str(r),
            (None, Some(b)) => {
                let m = mrb.new_str(pattern.as_str());
                let v = mrb.call_block(b, &[m])?;
                out.push_str(&mrb.to_s_string(v)?);
            }
            (None, None) => {}
        }
        last = at + pattern.len();
    }
    out.push_str(&s[last..]);
    Ok(Some(out))
}

fn str_gsub(mrb: &mut MrbState, recv: MrbValue, args: &[MrbValue], block: Option<MrbValue>) -> Eval<MrbValue> {
    let s = match substitute(mrb, recv, args, block, None)? {
        Some(s) => s,
        None => this(mrb, recv),
    };
    Ok(mrb.new_str(s))
}

fn str_sub(mrb: &mut MrbState, recv: MrbValue, args: &[MrbValue], block: Option<MrbValue>) -> Eval<MrbValue> {
    let s = match substitute(mrb, recv, args, block, Some(1))? {
        Some(s) => s,
        None => this(mrb, recv),
    };
    Ok(mrb.new_str(s))
}

fn str_gsub_bang(mrb: &mut MrbState, recv: MrbValue, args: &[MrbValue], block: Option<MrbValue>) -> Eval<MrbValue> {
    match substitute(mrb, recv, args, block, None)? {
        Some(s) => {
            set_this(mrb, recv, s);
            Ok(recv)
        }
        None => Ok(MrbValue::Nil),
    }
}

fn str_sub_bang(mrb: &mut MrbState, recv: MrbValue, args: &[MrbValue], block: Option<MrbValue>) -> Eval<MrbValue> {
    match substitute(mrb, recv, args, block, Some(1))? {
        Some(s) => {
            set_this(mrb, recv, s);
            Ok(recv)
        }
        None => Ok(MrbValue::Nil),
    }
}

/// Expand `a-z` style ranges in a `tr` character set.
fn expand_set(set: &str) -> Vec<char> {
    let chars: Vec<char> = set.chars().collect();
    let mut out = Vec::new();
    let mut i = 0;
    while i < chars.len() {
        if i + 2 < chars.len() && chars[i + 1] == '-' && chars[i] <= chars[i + 2] {
            out.extend(chars[i]..=chars[i + 2]);
            i += 3;
        } else {
            out.push(chars[i]);
            i += 1;
        }
    }
    out
}

fn str_tr(mrb: &mut MrbState, recv: MrbValue, args: &[MrbValue], _: Option<MrbValue>) -> Eval<MrbValue> {
    arity(mrb, args, 2, 0)?;
    let from = expand_set(&implicit_str(mrb, args[0])?);
    let to = expand_set(&implicit_str(mrb, args[1])?);
    Ok(map_str(mrb, recv, |s| {
        s.chars()
            .filter_map(|c| match from.iter().position(|f| *f == c) {
                Some(_) if to.is_empty() => None,
                Some(i) => to.get(i).or(to.last()).copied(),
                None => Some(c),
            })
            .collect()
    }))
}

fn str_delete(mrb: &mut MrbState, recv: MrbValue, args: &[MrbValue], _: Option<MrbValue>) -> Eval<MrbValue> {
    arity(mrb, args, 1, 0)?;
    let set = expand_set(&implicit_str(mrb, args[0])?);
    Ok(map_str(mrb, recv, |s| s.chars().filter(|c| !set.contains(c)).collect()))
}

fn str_append(mrb: &mut MrbState, recv: MrbValue, args: &[MrbValue], _: Option<MrbValue>) -> Eval<MrbValue> {
    let mut tail = String::new();
    for &a in args {
        match a {
            MrbValue::Fixnum(n) => match u32::try_from(n).ok().and_then(char::from_u32) {
                Some(c) => tail.push(c),
                None => {
                    let class = mrb.core.range_error;
                    return Err(mrb.raise_class(class, format!("{} out of char range", n)));
                }
            },
            v => tail.push_str(&implicit_str(mrb, v)?),
        }
    }
    if let Some(s) = mrb.str_mut(recv) {
        s.push_str(&tail);
    }
    Ok(recv)
}

fn str_replace(mrb: &mut MrbState, recv: MrbValue, args: &[MrbValue], _: Option<MrbValue>) -> Eval<MrbValue> {
    arity(mrb, args, 1, 0)?;
    let s = implicit_str(mrb, args[0])?;
    set_this(mrb, recv, s);
    Ok(recv)
}

fn pad_args(mrb: &mut MrbState, args: &[MrbValue]) -> Eval<(usize, Vec<char>)> {
    arity(mrb, args, 1, 1)?;
    let width = int_arg(mrb, args[0])?.max(0) as usize;
    let pad: Vec<char> = match args.get(1) {
        Some(&p) => str_arg(mrb, p)?.chars().collect(),
        None => vec![' '],
    };
    if pad.is_empty() {
        return Err(mrb.arg_error("zero width padding"));
    }
    Ok((width, pad))
}

fn padding(pad: &[char], n: usize) -> String {
    pad.iter().cycle().take(n).collect()
}

fn str_ljust(mrb: &mut MrbState, recv: MrbValue, args: &[MrbValue], _: Option<MrbValue>) -> Eval<MrbValue> {
    let (width, pad) = pad_args(mrb, args)?;
    Ok(map_str(mrb, recv, |s| {
        let n = width.saturating_sub(s.chars().count());
        format!("{}{}", s, padding(&pad, n))
    }))
}

fn str_rjust(mrb: &mut MrbState, recv: MrbValue, args: &[MrbValue], _: Option<MrbValue>) -> Eval<MrbValue> {
    let (width, pad) = pad_args(mrb, args)?;
    Ok(map_str(mrb, recv, |s| {
        let n = width.saturating_sub(s.chars().count());
        format!("{}{}", padding(&pad, n), s)
    }))
}

fn str_center(mrb: &mut MrbState, recv: MrbValue, args: &[MrbValue], _: Option<MrbValue>) -> Eval<MrbValue> {
    let (width, pad) = pad_args(mrb, args)?;
    Ok(map_str(mrb, recv, |s| {
        let n = width.saturating_sub(s.chars().count());
        let left = n / 2;
        format!("{}{}{}", padding(&pad, left), s, padding(&pad, n - left))
    }))
}

fn str_ord(mrb: &mut MrbState, recv: MrbValue, _: &[MrbValue], _: Option<MrbValue>) -> Eval<MrbValue> {
    match this(mrb, recv).chars().next() {
        Some(c) => Ok(MrbValue::Fixnum(c as i64)),
        None => Err(mrb.arg_error("empty string")),
    }
}

/// Alphanumeric successor: `"az"` becomes `"ba"`, `"zz"` becomes `"aaa"`.
pub(super) fn succ(s: &str) -> String {
    let mut chars: Vec<char> = s.chars().collect();
    let Some(mut i) = chars.iter().rposition(char::is_ascii_alphanumeric) else {
        if let Some(last) = chars.last_mut() {
            *last = char::from_u32(*last as u32 + 1).unwrap_or(*last);
        }
        return chars.into_iter().collect();
    };
    loop {
        let (next, carry) = match chars[i] {
            'z' => ('a', Some('a')),
            'Z' => ('A', Some('A')),
            '9' => ('0', Some('1')),
            c => (char::from_u32(c as u32 + 1).unwrap_or(c), None),
        };
        chars[i] = next;
        let Some(lead) = carry else { break };
        if i == 0 || !chars[i - 1].is_ascii_alphanumeric() {
            chars.insert(i, lead);
            break;
        }
        i -= 1;
    }
    chars.into_iter().collect()
}

fn str_succ(mrb: &mut MrbState, recv: MrbValue, _: &[MrbValue], _: Option<MrbValue>) -> Eval<MrbValue> {
    let next = succ(&this(mrb, recv));
    Ok(mrb.new_str(next))
}

// ============================================================================
// Symbol
// ============================================================================

fn symbol(recv: MrbValue) -> Option<crate::value::Sym> {
    match recv {
        MrbValue::Symbol(s) => Some(s),
        _ => None,
    }
}

fn sym_to_s(mrb: &mut MrbState, recv: MrbValue, _: &[MrbValue], _: Option<MrbValue>) -> Eval<MrbValue> {
    let name = symbol(recv).map(|s| mrb.sym_name(s).to_string()).unwrap_or_default();
    Ok(mrb.new_str(name))
}

fn sym_to_sym(_: &mut MrbState, recv: MrbValue, _: &[MrbValue], _: Option<MrbValue>) -> Eval<MrbValue> {
    Ok(recv)
}

fn sym_inspect(mrb: &mut MrbState, recv: MrbValue, _: &[MrbValue], _: Option<MrbValue>) -> Eval<MrbValue> {
    let name = symbol(recv).map(|s| mrb.sym_name(s).to_string()).unwrap_or_default();
    let s = if is_plain_symbol(&name) {
        format!(":{}", name)
    } else {
        format!(":{}", quote(&name))
    };
    Ok(mrb.new_str(s))
}

fn sym_to_proc(mrb: &mut MrbState, recv: MrbValue, _: &[MrbValue], _: Option<MrbValue>) -> Eval<MrbValue> {
    match symbol(recv) {
        Some(sym) => Ok(mrb.symbol_proc(sym)),
        None => Ok(MrbValue::Nil),
    }
}

fn sym_length(mrb: &mut MrbState, recv: MrbValue, _: &[MrbValue], _: Option<MrbValue>) -> Eval<MrbValue> {
    let n = symbol(recv).map(|s| mrb.sym_name(s).chars().count()).unwrap_or(0);
    Ok(MrbValue::Fixnum(n as i64))
}

fn sym_cmp(mrb: &mut MrbState, recv: MrbValue, args: &[MrbValue], _: Option<MrbValue>) -> Eval<MrbValue> {
    arity(mrb, args, 1, 0)?;
    Ok(match (symbol(recv), symbol(args[0])) {
        (Some(a), Some(b)) => ordering_value(mrb.sym_name(a).cmp(mrb.sym_name(b))),
        _ => MrbValue::Nil,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::VmOptions;

    fn eval_str(src: &str) -> String {
        let mut mrb = MrbState::open(VmOptions::default());
        let v = mrb.load_string(src);
        assert!(mrb.exc().is_none(), "unexpected exception in {:?}", src);
        let s = mrb.inspect(v);
        mrb.string_value(s).unwrap_or_default().to_string()
    }

    #[test]
    fn test_gsub_with_block_and_replacement() {
        assert_eq!(eval_str("'foo'.gsub('foo') { 'bar' }"), "\"bar\"");
        assert_eq!(eval_str("'a-b-c'.gsub('-', '+')"), "\"a+b+c\"");
        assert_eq!(eval_str("'a-b-c'.sub('-', '+')"), "\"a+b-c\"");
    }

    #[test]
    fn test_succ_carries() {
        assert_eq!(succ("a"), "b");
        assert_eq!(succ("az"), "ba");
        assert_eq!(succ("zz"), "aaa");
        assert_eq!(succ("a9"), "b0");
        assert_eq!(succ("Zz"), "AAa");
    }

    #[test]
    fn test_indexing() {
        assert_eq!(eval_str("'hello'[1]"), "\"e\"");
        assert_eq!(eval_str("'hello'[1, 3]"), "\"ell\"");
        assert_eq!(eval_str("'hello'[1..-2]"), "\"ell\"");
        assert_eq!(eval_str("'hello'[10]"), "nil");
    }

    #[test]
    fn test_split_drops_trailing_empties() {
        assert_eq!(eval_str("'a,b,,'.split(',')"), "[\"a\", \"b\"]");
        assert_eq!(eval_str("' a  b '.split"), "[\"a\", \"b\"]");
    }

    #[test]
    fn test_lenient_numbers() {
        assert_eq!(lenient_int("12abc", 10), 12);
        assert_eq!(lenient_int("ff", 16), 255);
        assert_eq!(lenient_int("zz", 10), 0);
        assert_eq!(lenient_float("3.5e2x"), 350.0);
        assert_eq!(lenient_float("1."), 1.0);
    }

    #[test]
    fn test_symbol_inspect_quotes_odd_names() {
        assert_eq!(eval_str(":foo.inspect"), "\":foo\"");
        assert_eq!(eval_str("'a b'.to_sym.inspect"), "\":\\\"a b\\\"\"");
    }

    #[test]
    fn test_symbol_to_proc() {
        assert_eq!(eval_str("[1, 2].map(&:to_s)"), "[\"1\", \"2\"]");
    }
}
