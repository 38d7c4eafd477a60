use super::{arg, arity};
use crate::interp::Eval;
use crate::state::MrbState;
use crate::value::MrbValue;

pub(super) fn init(mrb: &mut MrbState) {
    let exception = mrb.core.exception;
    mrb.define_singleton_builtin(exception, "exception", exc_class_exception);
    mrb.define_builtin(exception, "initialize", exc_initialize);
    mrb.define_builtin(exception, "exception", exc_exception);
    mrb.define_builtin(exception, "message", exc_message);
    mrb.define_builtin(exception, "to_s", exc_to_s);
    mrb.define_builtin(exception, "inspect", exc_inspect);
    mrb.define_builtin(exception, "backtrace", exc_backtrace);
    mrb.define_builtin(exception, "set_backtrace", exc_set_backtrace);
    mrb.define_builtin(exception, "full_message", exc_full_message);
    mrb.define_builtin(exception, "==", exc_eq);
}

fn exc_class_exception(mrb: &mut MrbState, recv: MrbValue, args: &[MrbValue], block: Option<MrbValue>) -> Eval<MrbValue> {
    let new = mrb.intern("new");
    mrb.call_method(recv, new, args, block)
}

fn exc_initialize(mrb: &mut MrbState, recv: MrbValue, args: &[MrbValue], _: Option<MrbValue>) -> Eval<MrbValue> {
    arity(mrb, args, 0, 1)?;
    let sym = mrb.syms.message;
    mrb.iv_set(recv, sym, arg(args, 0));
    Ok(recv)
}

/// With no argument (or `self`) the receiver; otherwise a copy carrying the
/// new message.
fn exc_exception(mrb: &mut MrbState, recv: MrbValue, args: &[MrbValue], _: Option<MrbValue>) -> Eval<MrbValue> {
    arity(mrb, args, 0, 1)?;
    match args.first() {
        None => Ok(recv),
        Some(&msg) if msg.identical(recv) => Ok(recv),
        Some(&msg) => {
            let dup = mrb.intern("dup");
            let copy = mrb.call_method(recv, dup, &[], None)?;
            let sym = mrb.syms.message;
            mrb.iv_set(copy, sym, msg);
            Ok(copy)
        }
    }
}

fn message_string(mrb: &mut MrbState, recv: MrbValue) -> Eval<String> {
    let msg = mrb.iv_get(recv, mrb.syms.message);
    if msg.is_nil() {
        let class = mrb.obj_class(recv);
        return Ok(mrb.class_name(class));
    }
    mrb.to_s_string(msg)
}

fn exc_to_s(mrb: &mut MrbState, recv: MrbValue, _: &[MrbValue], _: Option<MrbValue>) -> Eval<MrbValue> {
    let s = message_string(mrb, recv)?;
    Ok(mrb.new_str(s))
}

fn exc_message(mrb: &mut MrbState, recv: MrbValue, _: &[MrbValue], _: Option<MrbValue>) -> Eval<MrbValue> {
    let to_s = mrb.syms.to_s;
    mrb.call_method(recv, to_s, &[], None)
}

fn exc_inspect(mrb: &mut MrbState, recv: MrbValue, _: &[MrbValue], _: Option<MrbValue>) -> Eval<MrbValue> {
    let class = mrb.obj_class(recv);
    let name = mrb.class_name(class);
    let msg = message_string(mrb, recv)?;
    let s = if msg.is_empty() || msg == name {
        name
    } else {
        format!("#<{}: {}>", name, msg)
    };
    Ok(mrb.new_str(s))
}

fn exc_backtrace(mrb: &mut MrbState, recv: MrbValue, _: &[MrbValue], _: Option<MrbValue>) -> Eval<MrbValue> {
    Ok(mrb.iv_get(recv, mrb.syms.backtrace))
}

fn exc_set_backtrace(mrb: &mut MrbState, recv: MrbValue, args: &[MrbValue], _: Option<MrbValue>) -> Eval<MrbValue> {
    arity(mrb, args, 1, 0)?;
    let bt = match args[0] {
        v if mrb.ary_ref(v).is_some() || v.is_nil() => v,
        v if mrb.str_ref(v).is_some() => mrb.new_ary(vec![v]),
        _ => return Err(mrb.type_error("backtrace must be an Array of String")),
    };
    let sym = mrb.syms.backtrace;
    mrb.iv_set(recv, sym, bt);
    Ok(bt)
}

/// `file:line: message (Class)` followed by the remaining frames.
fn exc_full_message(mrb: &mut MrbState, recv: MrbValue, _: &[MrbValue], _: Option<MrbValue>) -> Eval<MrbValue> {
    let class = mrb.obj_class(recv);
    let name = mrb.class_name(class);
    let msg = message_string(mrb, recv)?;
    let frames = mrb.exc_backtrace(recv);
    let mut out = match frames.first() {
        Some(top) => format!("{}: {} ({})", top, msg, name),
        None => format!("{} ({})", msg, name),
    };
    for frame in frames.iter().skip(1) {
        out.push_str("\n\tfrom ");
        out.push_str(frame);
    }
    Ok(mrb.new_str(out))
}

fn exc_eq(mrb: &mut MrbState, recv: MrbValue, args: &[MrbValue], _: Option<MrbValue>) -> Eval<MrbValue> {
    arity(mrb, args, 1, 0)?;
    let other = args[0];
    if recv.identical(other) {
        return Ok(MrbValue::True);
    }
    if mrb.obj_class(recv) != mrb.obj_class(other) {
        return Ok(MrbValue::False);
    }
    let (a, b) = (message_string(mrb, recv)?, message_string(mrb, other)?);
    Ok(MrbValue::from_bool(a == b))
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
    fn test_message_defaults_to_class_name() {
        assert_eq!(eval_str("Exception.new.message"), "\"Exception\"");
        assert_eq!(eval_str("ArgumentError.new('bad').message"), "\"bad\"");
    }

    #[test]
    fn test_inspect() {
        assert_eq!(eval_str("RuntimeError.new('boom').inspect"), "\"#<RuntimeError: boom>\"");
        assert_eq!(eval_str("Exception.exception.inspect"), "\"Exception\"");
    }

    #[test]
    fn test_rescue_sees_backtrace() {
        let src = "def f\n  raise 'x'\nend\nbegin\n  f\nrescue => e\n  e.backtrace.is_a?(Array)\nend";
        assert_eq!(eval_str(src), "true");
    }

    #[test]
    fn test_exception_with_message_copies() {
        assert_eq!(
            eval_str("e = StandardError.new('a')\nf = e.exception('b')\n[e.message, f.message]"),
            "[\"a\", \"b\"]"
        );
    }

    #[test]
    fn test_uncaught_raise_sets_exc() {
        let mut mrb = MrbState::open(VmOptions::default());
        mrb.load_string("raise ArgumentError, 'nope'");
        let exc = mrb.exc().expect("exception");
        let class = mrb.obj_class(exc);
        assert_eq!(mrb.class_name(class), "ArgumentError");
    }
}
