use crate::interp::Eval;
use crate::object::ProcBody;
use crate::state::MrbState;
use crate::value::MrbValue;

pub(super) fn init(mrb: &mut MrbState) {
    let proc_class = mrb.core.proc_class;
    mrb.define_singleton_builtin(proc_class, "new", proc_new);
    mrb.define_builtin(proc_class, "call", proc_call);
    mrb.define_builtin(proc_class, "()", proc_call);
    mrb.define_builtin(proc_class, "[]", proc_call);
    mrb.define_builtin(proc_class, "===", proc_call);
    mrb.define_builtin(proc_class, "yield", proc_call);
    mrb.define_builtin(proc_class, "lambda?", proc_lambda_p);
    mrb.define_builtin(proc_class, "arity", proc_arity);
    mrb.define_builtin(proc_class, "to_proc", proc_to_proc);
    mrb.define_builtin(proc_class, "inspect", proc_inspect);
    mrb.define_builtin(proc_class, "to_s", proc_inspect);
}

fn proc_new(mrb: &mut MrbState, _: MrbValue, _: &[MrbValue], block: Option<MrbValue>) -> Eval<MrbValue> {
    match block {
        Some(b) => Ok(b),
        None => Err(mrb.arg_error("tried to create Proc object without a block")),
    }
}

fn proc_call(mrb: &mut MrbState, recv: MrbValue, args: &[MrbValue], block: Option<MrbValue>) -> Eval<MrbValue> {
    mrb.call_proc(recv, args, block, None)
}

fn proc_lambda_p(mrb: &mut MrbState, recv: MrbValue, _: &[MrbValue], _: Option<MrbValue>) -> Eval<MrbValue> {
    Ok(MrbValue::from_bool(mrb.proc_ref(recv).is_some_and(|p| p.lambda)))
}

fn proc_arity(mrb: &mut MrbState, recv: MrbValue, _: &[MrbValue], _: Option<MrbValue>) -> Eval<MrbValue> {
    let arity = match mrb.proc_ref(recv).map(|p| &p.body) {
        Some(ProcBody::Block(def)) => {
            let req = def.params.required_count() as i64;
            if def.params.rest.is_some() || !def.params.optional.is_empty() {
                -(req + 1)
            } else {
                req
            }
        }
        Some(ProcBody::Symbol(_)) => -2,
        Some(ProcBody::Top(_)) | None => 0,
    };
    Ok(MrbValue::Fixnum(arity))
}

fn proc_to_proc(_: &mut MrbState, recv: MrbValue, _: &[MrbValue], _: Option<MrbValue>) -> Eval<MrbValue> {
    Ok(recv)
}

fn proc_inspect(mrb: &mut MrbState, recv: MrbValue, _: &[MrbValue], _: Option<MrbValue>) -> Eval<MrbValue> {
    let base = mrb.any_to_s(recv);
    let s = match mrb.proc_ref(recv) {
        Some(p) if p.lambda => format!("{} (lambda)>", base.trim_end_matches('>')),
        _ => base,
    };
    Ok(mrb.new_str(s))
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
    fn test_call_forms() {
        assert_eq!(eval_str("add = proc { |a, b| a + b }\nadd.call(1, 2)"), "3");
        assert_eq!(eval_str("add = lambda { |a, b| a + b }\nadd[46, 2]"), "48");
        assert_eq!(eval_str("Proc.new { 7 }.call"), "7");
    }

    #[test]
    fn test_arity_and_lambda() {
        assert_eq!(eval_str("proc { |a, b| }.arity"), "2");
        assert_eq!(eval_str("proc { |a, *b| }.arity"), "-2");
        assert_eq!(eval_str("lambda { }.lambda?"), "true");
        assert_eq!(eval_str("proc { }.lambda?"), "false");
    }

    #[test]
    fn test_lambda_checks_arity() {
        let mut mrb = MrbState::open(VmOptions::default());
        mrb.load_string("lambda { |a| a }.call(1, 2)");
        assert!(mrb.exc().is_some());
    }
}
