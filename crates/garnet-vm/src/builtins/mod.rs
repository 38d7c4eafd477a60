//! Core class methods implemented in Rust.

mod array;
mod exception;
mod hash;
mod kernel;
mod numeric;
mod object;
mod proc;
mod range;
mod string;

use crate::interp::Eval;
use crate::object::RRange;
use crate::state::MrbState;
use crate::value::{MrbValue, Sym};

/// Install every builtin method.
pub(crate) fn init(mrb: &mut MrbState) {
    object::init(mrb);
    kernel::init(mrb);
    numeric::init(mrb);
    string::init(mrb);
    array::init(mrb);
    hash::init(mrb);
    range::init(mrb);
    proc::init(mrb);
    exception::init(mrb);
}

// ============================================================================
// Argument helpers
// ============================================================================

pub(crate) fn arg(args: &[MrbValue], i: usize) -> MrbValue {
    args.get(i).copied().unwrap_or(MrbValue::Nil)
}

pub(crate) fn arity(mrb: &mut MrbState, args: &[MrbValue], req: usize, opt: usize) -> Eval<()> {
    mrb.check_arity(args.len(), req, opt, false)
}

pub(crate) fn int_arg(mrb: &mut MrbState, v: MrbValue) -> Eval<i64> {
    match v {
        MrbValue::Fixnum(n) => Ok(n),
        MrbValue::Float(f) if f.is_finite() => Ok(f as i64),
        _ => {
            let class = mrb.obj_class(v);
            let name = mrb.class_name(class);
            Err(mrb.type_error(format!("can't convert {} into Integer", name)))
        }
    }
}

pub(crate) fn str_arg(mrb: &mut MrbState, v: MrbValue) -> Eval<String> {
    match mrb.str_ref(v) {
        Some(s) => Ok(s.to_string()),
        None => {
            let class = mrb.obj_class(v);
            let name = mrb.class_name(class);
            Err(mrb.type_error(format!("can't convert {} into String", name)))
        }
    }
}

/// A method name given as a symbol or a string.
pub(crate) fn sym_arg(mrb: &mut MrbState, v: MrbValue) -> Eval<Sym> {
    match v {
        MrbValue::Symbol(s) => Ok(s),
        _ => match mrb.str_ref(v).map(str::to_string) {
            Some(s) => Ok(mrb.intern(&s)),
            None => {
                let s = mrb.inspect_str(v)?;
                Err(mrb.type_error(format!("{} is not a symbol nor a string", s)))
            }
        },
    }
}

pub(crate) fn need_block(mrb: &mut MrbState, block: Option<MrbValue>) -> Eval<MrbValue> {
    match block {
        Some(b) => Ok(b),
        None => {
            let class = mrb.core.local_jump_error;
            Err(mrb.raise_class(class, "no block given"))
        }
    }
}

/// Resolve a `start, count` slice against a sequence of `len` items.
/// Negative starts count from the end. `None` means out of range.
pub(crate) fn seq_span(start: i64, count: i64, len: usize) -> Option<(usize, usize)> {
    let len = len as i64;
    let start = if start < 0 { start + len } else { start };
    if start < 0 || start > len || count < 0 {
        return None;
    }
    let end = start.saturating_add(count).min(len);
    Some((start as usize, (end - start) as usize))
}

/// Resolve a range index against a sequence of `len` items.
pub(crate) fn range_span(mrb: &mut MrbState, r: RRange, len: usize) -> Eval<Option<(usize, usize)>> {
    let begin = if r.begin.is_nil() { 0 } else { int_arg(mrb, r.begin)? };
    let n = len as i64;
    let begin = if begin < 0 { begin + n } else { begin };
    if begin < 0 || begin > n {
        return Ok(None);
    }
    let end = if r.end.is_nil() {
        n
    } else {
        let e = int_arg(mrb, r.end)?;
        let e = if e < 0 { e + n } else { e };
        if r.exclusive {
            e
        } else {
            e + 1
        }
    };
    Ok(seq_span(begin, (end - begin).max(0), len))
}

/// Escape a string the way `String#inspect` does.
pub(crate) fn quote(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            '\r' => out.push_str("\\r"),
            '\u{1b}' => out.push_str("\\e"),
            '\0' => out.push_str("\\0"),
            c if c.is_control() => out.push_str(&format!("\\x{:02X}", c as u32)),
            c => out.push(c),
        }
    }
    out.push('"');
    out
}

/// Whether a symbol prints bare after `:`.
pub(crate) fn is_plain_symbol(name: &str) -> bool {
    let mut chars = name.chars();
    let Some(first) = chars.next() else {
        return false;
    };
    if first.is_ascii_alphabetic() || first == '_' || first == '@' || first == '$' {
        let body = name.trim_start_matches(['@', '$']);
        let body = body.strip_suffix(['?', '!', '=']).unwrap_or(body);
        return !body.is_empty() && body.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
    }
    matches!(
        name,
        "+" | "-" | "*" | "/" | "%" | "**" | "==" | "===" | "<=>" | "<" | ">" | "<=" | ">=" | "<<" | ">>"
            | "[]" | "[]=" | "!" | "=~" | "&" | "|" | "^" | "~" | "-@" | "+@"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quote_escapes() {
        assert_eq!(quote("a\"b\n"), "\"a\\\"b\\n\"");
    }

    #[test]
    fn test_seq_span_bounds() {
        assert_eq!(seq_span(1, 2, 5), Some((1, 2)));
        assert_eq!(seq_span(-2, 10, 5), Some((3, 2)));
        assert_eq!(seq_span(5, 1, 5), Some((5, 0)));
        assert_eq!(seq_span(6, 1, 5), None);
        assert_eq!(seq_span(0, -1, 5), None);
    }

    #[test]
    fn test_plain_symbols() {
        assert!(is_plain_symbol("foo?"));
        assert!(is_plain_symbol("<=>"));
        assert!(!is_plain_symbol("foo bar"));
        assert!(!is_plain_symbol(""));
    }
}
