//! Kernel functions and the GC module.

use super::{arg, arity, need_block, str_arg};
use crate::interp::Eval;
use crate::object::ObjKind;
use crate::state::MrbState;
use crate::value::MrbValue;
use std::io::Write;

pub(super) fn init(mrb: &mut MrbState) {
    let kernel = mrb.core.kernel;
    mrb.define_builtin(kernel, "puts", k_puts);
    mrb.define_builtin(kernel, "print", k_print);
    mrb.define_builtin(kernel, "p", k_p);
    mrb.define_builtin(kernel, "raise", k_raise);
    mrb.define_builtin(kernel, "fail", k_raise);
    mrb.define_builtin(kernel, "block_given?", k_block_given);
    mrb.define_builtin(kernel, "lambda", k_lambda);
    mrb.define_builtin(kernel, "proc", k_proc);
    mrb.define_builtin(kernel, "loop", k_loop);
    mrb.define_builtin(kernel, "__method__", k_method);
    mrb.define_builtin(kernel, "caller", k_caller);
    mrb.define_builtin(kernel, "format", k_format);
    mrb.define_builtin(kernel, "sprintf", k_format);
    mrb.define_builtin(kernel, "Integer", k_integer);
    mrb.define_builtin(kernel, "Float", k_float);
    mrb.define_builtin(kernel, "String", k_string);
    mrb.define_builtin(kernel, "Array", k_array);

    let gc = mrb.core.gc;
    mrb.define_singleton_builtin(gc, "start", gc_start);
    mrb.define_singleton_builtin(gc, "step", gc_step);
    mrb.define_singleton_builtin(gc, "enable", gc_enable);
    mrb.define_singleton_builtin(gc, "disable", gc_disable);
    mrb.define_singleton_builtin(gc, "count", gc_count);
}

// ============================================================================
// Output
// ============================================================================

fn collect_lines(mrb: &mut MrbState, v: MrbValue, out: &mut String) -> Eval<()> {
    if let Some(items) = mrb.ary_ref(v).cloned() {
        if items.is_empty() {
            out.push('\n');
        }
        for item in items {
            collect_lines(mrb, item, out)?;
        }
        return Ok(());
    }
    let s = if v.is_nil() { String::new() } else { mrb.to_s_string(v)? };
    out.push_str(&s);
    if !s.ends_with('\n') {
        out.push('\n');
    }
    Ok(())
}

fn write_stdout(s: &str) {
    let mut stdout = std::io::stdout().lock();
    let _ = stdout.write_all(s.as_bytes());
    let _ = stdout.flush();
}

fn k_puts(mrb: &mut MrbState, _: MrbValue, args: &[MrbValue], _: Option<MrbValue>) -> Eval<MrbValue> {
    let mut out = String::new();
    if args.is_empty() {
        out.push('\n');
    }
    for &a in args {
        collect_lines(mrb, a, &mut out)?;
    }
    write_stdout(&out);
    Ok(MrbValue::Nil)
}

fn k_print(mrb: &mut MrbState, _: MrbValue, args: &[MrbValue], _: Option<MrbValue>) -> Eval<MrbValue> {
    let mut out = String::new();
    for &a in args {
        out.push_str(&mrb.to_s_string(a)?);
    }
    write_stdout(&out);
    Ok(MrbValue::Nil)
}

fn k_p(mrb: &mut MrbState, _: MrbValue, args: &[MrbValue], _: Option<MrbValue>) -> Eval<MrbValue> {
    let mut out = String::new();
    for &a in args {
        out.push_str(&mrb.inspect_str(a)?);
        out.push('\n');
    }
    write_stdout(&out);
    Ok(match args {
        [] => MrbValue::Nil,
        [one] => *one,
        many => mrb.new_ary(many.to_vec()),
    })
}

// ============================================================================
// Control flow
// ============================================================================

/// Build the exception `raise` would raise for `args`.
pub(super) fn make_exception(mrb: &mut MrbState, args: &[MrbValue]) -> Eval<MrbValue> {
    mrb.check_arity(args.len(), 0, 2, false)?;
    let Some((&first, rest)) = args.split_first() else {
        let last = mrb.intern("$!");
        let current = mrb.gv_get(last);
        if mrb.is_exception(current) {
            return Ok(current);
        }
        let class = mrb.core.runtime_error;
        return Ok(mrb.exc_new(class, "unhandled exception"));
    };
    if let Some(msg) = mrb.str_ref(first).map(str::to_string) {
        let class = mrb.core.runtime_error;
        return Ok(mrb.exc_new(class, &msg));
    }
    let exception = mrb.intern("exception");
    if !mrb.respond_to(first, exception) {
        return Err(mrb.type_error("exception class/object expected"));
    }
    let exc = mrb.call_method(first, exception, rest, None)?;
    if !mrb.is_exception(exc) {
        return Err(mrb.type_error("exception object expected"));
    }
    Ok(exc)
}

fn k_raise(mrb: &mut MrbState, _: MrbValue, args: &[MrbValue], _: Option<MrbValue>) -> Eval<MrbValue> {
    let exc = make_exception(mrb, args)?;
    Err(mrb.raise_value(exc))
}

fn k_block_given(mrb: &mut MrbState, _: MrbValue, _: &[MrbValue], _: Option<MrbValue>) -> Eval<MrbValue> {
    let given = mrb.ci.last().and_then(|ci| ci.block).is_some();
    Ok(MrbValue::from_bool(given))
}

fn k_lambda(mrb: &mut MrbState, _: MrbValue, _: &[MrbValue], block: Option<MrbValue>) -> Eval<MrbValue> {
    let block = need_block(mrb, block)?;
    if let Some(ObjKind::Proc(p)) = mrb.obj_mut(block).map(|o| &mut o.kind) {
        p.lambda = true;
    }
    Ok(block)
}

fn k_proc(mrb: &mut MrbState, _: MrbValue, _: &[MrbValue], block: Option<MrbValue>) -> Eval<MrbValue> {
    need_block(mrb, block)
}

fn k_loop(mrb: &mut MrbState, _: MrbValue, _: &[MrbValue], block: Option<MrbValue>) -> Eval<MrbValue> {
    let block = need_block(mrb, block)?;
    let ai = mrb.arena_save();
    loop {
        mrb.call_block(block, &[])?;
        mrb.arena_restore(ai);
    }
}

fn k_method(mrb: &mut MrbState, _: MrbValue, _: &[MrbValue], _: Option<MrbValue>) -> Eval<MrbValue> {
    let mid = mrb.ci.iter().rev().find_map(|ci| ci.mid);
    Ok(mid.map(MrbValue::Symbol).unwrap_or(MrbValue::Nil))
}

fn k_caller(mrb: &mut MrbState, _: MrbValue, _: &[MrbValue], _: Option<MrbValue>) -> Eval<MrbValue> {
    let frames: Vec<MrbValue> = mrb
        .backtrace()
        .into_iter()
        .skip(1)
        .map(|f| mrb.new_str(f))
        .collect();
    Ok(mrb.new_ary(frames))
}

// ============================================================================
// Formatting
// ============================================================================

/// `format` with the common directives: `%s %p %d %i %f %g %e %x %o %b %c %%`,
/// the `-`, `0`, `+` and space flags, width and precision.
pub(super) fn sprintf(mrb: &mut MrbState, fmt: &str, args: &[MrbValue]) -> Eval<String> {
    let mut out = String::with_capacity(fmt.len());
    let mut chars = fmt.chars().peekable();
    let mut next_arg = args.iter().copied();
    while let Some(c) = chars.next() {
        if c != '%' {
            out.push(c);
            continue;
        }
        let (mut left, mut zero, mut plus, mut space) = (false, false, false, false);
        while let Some(&f) = chars.peek() {
            match f {
                '-' => left = true,
                '0' => zero = true,
                '+' => plus = true,
                ' ' => space = true,
                _ => break,
            }
            chars.next();
        }
        let mut width = 0usize;
        while let Some(d) = chars.peek().and_then(|c| c.to_digit(10)) {
            width = width * 10 + d as usize;
            chars.next();
        }
        let mut precision = None;
        if chars.peek() == Some(&'.') {
            chars.next();
            let mut p = 0usize;
            while let Some(d) = chars.peek().and_then(|c| c.to_digit(10)) {
                p = p * 10 + d as usize;
                chars.next();
            }
            precision = Some(p);
        }
        let Some(conv) = chars.next() else {
            return Err(mrb.arg_error("incomplete format specifier; use %% (double %) instead"));
        };
        if conv == '%' {
            out.push('%');
            continue;
        }
        let Some(v) = next_arg.next() else {
            return Err(mrb.arg_error("too few arguments"));
        };
        let sign = |neg: bool| {
            if neg {
                "-"
            } else if plus {
                "+"
            } else if space {
                " "
            } else {
                ""
            }
        };
        let (body, numeric) = match conv {
            's' => {
                let mut s = mrb.to_s_string(v)?;
                if let Some(p) = precision {
                    s = s.chars().take(p).collect();
                }
                (s, false)
            }
            'p' => (mrb.inspect_str(v)?, false),
            'c' => match v {
                MrbValue::Fixnum(n) => (char::from_u32(n as u32).unwrap_or('?').to_string(), false),
                _ => (mrb.to_s_string(v)?.chars().take(1).collect(), false),
            },
            'd' | 'i' | 'u' => {
                let n = to_int(mrb, v)?;
                (format!("{}{}", sign(n < 0), n.unsigned_abs()), true)
            }
            'x' | 'X' | 'o' | 'b' | 'B' => {
                let n = to_int(mrb, v)?;
                let abs = n.unsigned_abs();
                let digits = match conv {
                    'x' => format!("{:x}", abs),
                    'X' => format!("{:X}", abs),
                    'o' => format!("{:o}", abs),
                    _ => format!("{:b}", abs),
                };
                (format!("{}{}", sign(n < 0), digits), true)
            }
            'f' | 'e' | 'E' | 'g' | 'G' => {
                let f = to_float(mrb, v)?;
                let p = precision.unwrap_or(6);
                let digits = match conv {
                    'f' => format!("{:.*}", p, f.abs()),
                    'e' => format!("{:.*e}", p, f.abs()),
                    'E' => format!("{:.*E}", p, f.abs()),
                    _ => format!("{}", f.abs()),
                };
                (format!("{}{}", sign(f.is_sign_negative() && f != 0.0), digits), true)
            }
            other => {
                return Err(mrb.arg_error(format!("malformed format string - %{}", other)));
            }
        };
        let len = body.chars().count();
        if len >= width {
            out.push_str(&body);
        } else if left {
            out.push_str(&body);
            out.extend(std::iter::repeat(' ').take(width - len));
        } else if zero && numeric {
            let (sign, digits) = match body.chars().next() {
                Some(c @ ('-' | '+' | ' ')) => (Some(c), &body[1..]),
                _ => (None, body.as_str()),
            };
            out.extend(sign);
            out.extend(std::iter::repeat('0').take(width - len));
            out.push_str(digits);
        } else {
            out.extend(std::iter::repeat(' ').take(width - len));
            out.push_str(&body);
        }
    }
    Ok(out)
}

fn to_int(mrb: &mut MrbState, v: MrbValue) -> Eval<i64> {
    match v {
        MrbValue::Fixnum(n) => Ok(n),
        MrbValue::Float(f) => Ok(f.floor() as i64),
        _ => match mrb.str_ref(v).map(str::to_string) {
            Some(s) => parse_integer(mrb, &s, 10),
            None => super::int_arg(mrb, v),
        },
    }
}

fn to_float(mrb: &mut MrbState, v: MrbValue) -> Eval<f64> {
    match v {
        MrbValue::Fixnum(n) => Ok(n as f64),
        MrbValue::Float(f) => Ok(f),
        _ => match mrb.str_ref(v).map(str::to_string) {
            Some(s) => s
                .trim()
                .replace('_', "")
                .parse::<f64>()
                .map_err(|_| mrb.arg_error(format!("invalid value for Float(): {}", super::quote(&s)))),
            None => {
                let class = mrb.obj_class(v);
                let name = mrb.class_name(class);
                Err(mrb.type_error(format!("can't convert {} into Float", name)))
            }
        },
    }
}

/// Strict integer parsing with an optional `0x`/`0b`/`0o`/`0` prefix.
pub(super) fn parse_integer(mrb: &mut MrbState, s: &str, base: u32) -> Eval<i64> {
    let invalid = |mrb: &mut MrbState| mrb.arg_error(format!("invalid value for Integer(): {}", super::quote(s)));
    let trimmed = s.trim();
    let (neg, body) = match trimmed.as_bytes().first() {
        Some(b'-') => (true, &trimmed[1..]),
        Some(b'+') => (false, &trimmed[1..]),
        _ => (false, trimmed),
    };
    let lower = body.to_ascii_lowercase();
    let (radix, digits) = if base == 16 && lower.starts_with("0x") {
        (16, &body[2..])
    } else if base != 10 {
        (base, body)
    } else if lower.starts_with("0x") {
        (16, &body[2..])
    } else if lower.starts_with("0b") {
        (2, &body[2..])
    } else if lower.starts_with("0o") {
        (8, &body[2..])
    } else if body.len() > 1 && body.starts_with('0') {
        (8, &body[1..])
    } else {
        (10, body)
    };
    if digits.is_empty() || digits.starts_with('_') || digits.ends_with('_') || digits.contains("__") {
        return Err(invalid(mrb));
    }
    match i64::from_str_radix(&digits.replace('_', ""), radix) {
        Ok(n) => Ok(if neg { -n } else { n }),
        Err(_) => Err(invalid(mrb)),
    }
}

fn k_format(mrb: &mut MrbState, _: MrbValue, args: &[MrbValue], _: Option<MrbValue>) -> Eval<MrbValue> {
    mrb.check_arity(args.len(), 1, 0, true)?;
    let fmt = str_arg(mrb, args[0])?;
    let s = sprintf(mrb, &fmt, &args[1..])?;
    Ok(mrb.new_str(s))
}

// ============================================================================
// Conversion functions
// ============================================================================

fn k_integer(mrb: &mut MrbState, _: MrbValue, args: &[MrbValue], _: Option<MrbValue>) -> Eval<MrbValue> {
    arity(mrb, args, 1, 1)?;
    let v = args[0];
    let base = match args.get(1) {
        Some(&MrbValue::Fixnum(b)) if (2..=36).contains(&b) => b as u32,
        Some(_) => return Err(mrb.arg_error("invalid radix")),
        None => 10,
    };
    match v {
        MrbValue::Fixnum(_) => Ok(v),
        MrbValue::Float(f) if f.is_finite() => Ok(MrbValue::Fixnum(f.trunc() as i64)),
        MrbValue::Float(f) => Err(mrb.raise_class(mrb.core.range_error, format!("{} out of range", f))),
        MrbValue::Nil => Err(mrb.type_error("can't convert nil into Integer")),
        _ => match mrb.str_ref(v).map(str::to_string) {
            Some(s) => Ok(MrbValue::Fixnum(parse_integer(mrb, &s, base)?)),
            None => {
                let to_i = mrb.intern("to_i");
                mrb.call_method(v, to_i, &[], None)
            }
        },
    }
}

fn k_float(mrb: &mut MrbState, _: MrbValue, args: &[MrbValue], _: Option<MrbValue>) -> Eval<MrbValue> {
    arity(mrb, args, 1, 0)?;
    if args[0].is_nil() {
        return Err(mrb.type_error("can't convert nil into Float"));
    }
    Ok(MrbValue::Float(to_float(mrb, args[0])?))
}

fn k_string(mrb: &mut MrbState, _: MrbValue, args: &[MrbValue], _: Option<MrbValue>) -> Eval<MrbValue> {
    arity(mrb, args, 1, 0)?;
    mrb.to_s_value(args[0])
}

fn k_array(mrb: &mut MrbState, _: MrbValue, args: &[MrbValue], _: Option<MrbValue>) -> Eval<MrbValue> {
    arity(mrb, args, 1, 0)?;
    let v = arg(args, 0);
    if v.is_nil() {
        return Ok(mrb.new_ary(Vec::new()));
    }
    if mrb.ary_ref(v).is_some() {
        return Ok(v);
    }
    if let Some(r) = mrb.range_ref(v) {
        return super::range::range_to_vec(mrb, r).map(|items| mrb.new_ary(items));
    }
    Ok(mrb.new_ary(vec![v]))
}

// ============================================================================
// GC
// ============================================================================

fn gc_start(mrb: &mut MrbState, _: MrbValue, _: &[MrbValue], _: Option<MrbValue>) -> Eval<MrbValue> {
    mrb.full_gc();
    Ok(MrbValue::Nil)
}

fn gc_step(mrb: &mut MrbState, _: MrbValue, _: &[MrbValue], _: Option<MrbValue>) -> Eval<MrbValue> {
    mrb.incremental_gc();
    Ok(MrbValue::Nil)
}

fn gc_enable(mrb: &mut MrbState, _: MrbValue, _: &[MrbValue], _: Option<MrbValue>) -> Eval<MrbValue> {
    Ok(MrbValue::from_bool(mrb.enable_gc()))
}

fn gc_disable(mrb: &mut MrbState, _: MrbValue, _: &[MrbValue], _: Option<MrbValue>) -> Eval<MrbValue> {
    Ok(MrbValue::from_bool(mrb.disable_gc()))
}

fn gc_count(mrb: &mut MrbState, _: MrbValue, _: &[MrbValue], _: Option<MrbValue>) -> Eval<MrbValue> {
    Ok(MrbValue::Fixnum(mrb.gc_stats().collections as i64))
}

#[cfg(test)]
mod tests {
    use crate::state::{MrbState, VmOptions};
    use crate::value::MrbValue;

    fn eval_str(src: &str) -> String {
        let mut mrb = MrbState::open(VmOptions::default());
        let v = mrb.load_string(src);
        assert!(mrb.exc().is_none(), "unexpected exception in {:?}", src);
        mrb.string_value(v).unwrap_or_default().to_string()
    }

    #[test]
    fn test_format_directives() {
        assert_eq!(eval_str("format('%05d|%-4s|%.2f', 42, 'ab', 3.14159)"), "00042|ab  |3.14");
        assert_eq!(eval_str("format('%x %o %b %%', 255, 8, 5)"), "ff 10 101 %");
    }

    #[test]
    fn test_raise_with_class_and_message() {
        let mut mrb = MrbState::open(VmOptions::default());
        mrb.load_string("raise ArgumentError, 'bad'");
        let exc = mrb.exc().expect("exception");
        let class = mrb.obj_class(exc);
        assert_eq!(mrb.class_name(class), "ArgumentError");
    }

    #[test]
    fn test_integer_conversion() {
        let mut mrb = MrbState::open(VmOptions::default());
        let v = mrb.load_string("[Integer('0x1f'), Integer('  12 '), Integer(3.9)]");
        assert_eq!(mrb.ary_entry(v, 0), MrbValue::Fixnum(31));
        assert_eq!(mrb.ary_entry(v, 1), MrbValue::Fixnum(12));
        assert_eq!(mrb.ary_entry(v, 2), MrbValue::Fixnum(3));
        mrb.load_string("Integer('abc')");
        assert!(mrb.exc().is_some());
    }

    #[test]
    fn test_loop_break_value() {
        let mut mrb = MrbState::open(VmOptions::default());
        let v = mrb.load_string("i = 0\nloop { i += 1\n break i * 10 if i == 3 }");
        assert_eq!(v, MrbValue::Fixnum(30));
    }

    #[test]
    fn test_gc_module_toggles() {
        let mut mrb = MrbState::open(VmOptions::default());
        let v = mrb.load_string("[GC.disable, GC.disable, GC.enable, GC.enable]");
        assert_eq!(mrb.ary_entry(v, 0), MrbValue::False);
        assert_eq!(mrb.ary_entry(v, 1), MrbValue::True);
        assert_eq!(mrb.ary_entry(v, 2), MrbValue::True);
        assert_eq!(mrb.ary_entry(v, 3), MrbValue::False);
    }
}
