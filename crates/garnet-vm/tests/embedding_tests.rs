//! Integration tests for the raw embedding API
//!
//! Tests cover:
//! - Native methods called through `extern "C"` entry points
//! - Pending-exception handling across native frames
//! - Arena checkpoints and collection
//! - Compile contexts carrying locals between runs

use garnet_vm::{Aspec, MrbState, MrbVType, MrbValue, MrbcContext, VmOptions};

fn open() -> Box<MrbState> {
    let _ = env_logger::builder().is_test(true).try_init();
    MrbState::open(VmOptions::default())
}

fn inspect(mrb: &mut MrbState, v: MrbValue) -> String {
    let s = mrb.inspect(v);
    mrb.string_value(s).unwrap_or_default().to_string()
}

extern "C" fn sum_args(mrb: *mut MrbState, _recv: MrbValue) -> MrbValue {
    // SAFETY: the interpreter passes a pointer to itself for the duration of
    // the call.
    let mrb = unsafe { &mut *mrb };
    let total = mrb
        .get_args()
        .iter()
        .map(|v| match v {
            MrbValue::Fixnum(n) => *n,
            _ => 0,
        })
        .sum();
    MrbValue::Fixnum(total)
}

extern "C" fn raise_argument_error(mrb: *mut MrbState, _recv: MrbValue) -> MrbValue {
    // SAFETY: as above.
    let mrb = unsafe { &mut *mrb };
    let class = mrb.exception_class("ArgumentError").expect("ArgumentError");
    let exc = mrb.exc_new(class, "ouch");
    mrb.set_exc(exc);
    MrbValue::Nil
}

extern "C" fn yield_twelve(mrb: *mut MrbState, _recv: MrbValue) -> MrbValue {
    // SAFETY: as above.
    let mrb = unsafe { &mut *mrb };
    match mrb.get_block() {
        Some(block) => mrb.yield_argv(block, &[MrbValue::Fixnum(12), MrbValue::Fixnum(30)]),
        None => MrbValue::Nil,
    }
}

extern "C" fn report_call_info(mrb: *mut MrbState, _recv: MrbValue) -> MrbValue {
    // SAFETY: as above.
    let mrb = unsafe { &mut *mrb };
    match mrb.call_info() {
        Some((mid, class)) => {
            let text = format!("{}#{}", mrb.class_name(class), mrb.sym_name(mid));
            mrb.str_new(&text)
        }
        None => MrbValue::Nil,
    }
}

#[test]
fn test_native_method_receives_args() {
    let mut mrb = open();
    let object = mrb.object_class();
    let class = mrb.define_class("Hello", object);
    let mid = mrb.intern("sum");
    mrb.define_method(class, mid, sum_args, Aspec::REST);

    let v = mrb.load_string("Hello.new.sum(1, 2, 39)");
    assert!(mrb.exc().is_none());
    assert_eq!(v, MrbValue::Fixnum(42));
}

#[test]
fn test_native_class_method_call_info() {
    let mut mrb = open();
    let object = mrb.object_class();
    let class = mrb.define_class("Hello", object);
    let mid = mrb.intern("who");
    mrb.define_class_method(class, mid, report_call_info, Aspec::NONE);

    let v = mrb.load_string("Hello.who");
    assert_eq!(inspect(&mut mrb, v), "\"#<Class:Hello>#who\"");
}

#[test]
fn test_native_arity_is_enforced() {
    let mut mrb = open();
    let object = mrb.object_class();
    let class = mrb.define_class("Hello", object);
    let mid = mrb.intern("one");
    mrb.define_method(class, mid, sum_args, Aspec::req(1));

    mrb.load_string("Hello.new.one(1, 2)");
    let exc = mrb.take_exc().expect("ArgumentError");
    let class = mrb.obj_class(exc);
    assert_eq!(mrb.class_name(class), "ArgumentError");

    let v = mrb.load_string("Hello.new.one(5)");
    assert_eq!(v, MrbValue::Fixnum(5));
}

#[test]
fn test_native_exception_is_rescuable() {
    let mut mrb = open();
    let top = mrb.top_self();
    let sclass = mrb.singleton_class(top).expect("singleton");
    let mid = mrb.intern("boom");
    mrb.define_method(sclass, mid, raise_argument_error, Aspec::NONE);

    let v = mrb.load_string("begin\n  boom\nrescue ArgumentError => e\n  e.message\nend");
    assert!(mrb.exc().is_none());
    assert_eq!(inspect(&mut mrb, v), "\"ouch\"");

    mrb.load_string("boom");
    assert!(mrb.take_exc().is_some());
    let v = mrb.load_string("\"test\"");
    assert!(mrb.exc().is_none());
    assert_eq!(inspect(&mut mrb, v), "\"test\"");
}

#[test]
fn test_native_yield() {
    let mut mrb = open();
    let object = mrb.object_class();
    let class = mrb.define_class("Hello", object);
    let mid = mrb.intern("foo");
    mrb.define_class_method(class, mid, yield_twelve, Aspec::BLOCK);

    let v = mrb.load_string("Hello.foo { |a, b| a + b }");
    assert_eq!(v, MrbValue::Fixnum(42));
}

#[test]
fn test_arena_restore_releases_objects() {
    let mut mrb = open();
    mrb.full_gc();
    let before = mrb.live_object_count();

    let idx = mrb.arena_save();
    let values: Vec<MrbValue> = (0..10).map(|i| mrb.str_new(&i.to_string())).collect();
    assert!(values.iter().all(|v| !mrb.is_dead(*v)));
    mrb.arena_restore(idx);
    mrb.full_gc();

    assert!(values.iter().all(|v| mrb.is_dead(*v)));
    assert_eq!(mrb.live_object_count(), before);
}

#[test]
fn test_globals_survive_collection() {
    let mut mrb = open();
    let idx = mrb.arena_save();
    let kept = mrb.str_new("kept");
    let sym = mrb.intern("$kept");
    mrb.gv_set(sym, kept);
    mrb.arena_restore(idx);
    mrb.full_gc();
    assert!(!mrb.is_dead(kept));
}

#[test]
fn test_disabled_gc_keeps_garbage() {
    let mut mrb = open();
    mrb.full_gc();
    assert!(!mrb.disable_gc());
    mrb.load_string("b = []; a = []; a = []");
    let orig = mrb.live_object_count();
    mrb.full_gc();
    assert_eq!(mrb.live_object_count(), orig);

    assert!(mrb.enable_gc());
    mrb.full_gc();
    assert!(mrb.live_object_count() < orig);
}

#[test]
fn test_context_keeps_locals() {
    let mut mrb = open();
    let mut cxt = MrbcContext::new();
    cxt.set_filename("session.rb");

    mrb.load_string_cxt("a = 10", &mut cxt);
    assert_eq!(cxt.locals(), ["a".to_string()]);
    let v = mrb.load_string_cxt("a + 1", &mut cxt);
    assert_eq!(v, MrbValue::Fixnum(11));
}

#[test]
fn test_generate_code_and_run() {
    let mut mrb = open();
    let mut cxt = MrbcContext::new();
    let outcome = mrb.parse("a = 10", Some(&mut cxt));
    assert!(outcome.errors.is_empty());
    let proc = mrb.generate_code(&outcome);
    assert_eq!(mrb.vtype(proc), MrbVType::Proc);
    let keep = mrb.proc_stack_size(proc);
    assert_eq!(keep, 2);
    let top = mrb.top_self();
    mrb.vm_run(proc, top, 0);

    let outcome = mrb.parse("a", Some(&mut cxt));
    let proc = mrb.generate_code(&outcome);
    let v = mrb.vm_run(proc, top, keep);
    assert_eq!(v, MrbValue::Fixnum(10));
}

#[test]
fn test_backtrace_reports_file_and_line() {
    let mut mrb = open();
    let mut cxt = MrbcContext::new();
    cxt.set_filename("boom.rb");
    mrb.load_string_cxt("def boom\n  raise 'x'\nend\nboom", &mut cxt);
    let exc = mrb.take_exc().expect("exception");
    let frames = mrb.exc_backtrace(exc);
    assert!(!frames.is_empty());
    assert!(frames[0].starts_with("boom.rb:2"), "{:?}", frames);
}

#[test]
fn test_syntax_error_is_pending() {
    let mut mrb = open();
    let outcome = mrb.parse("def (", None);
    assert!(!outcome.errors.is_empty());
    mrb.load_string("def (");
    let exc = mrb.take_exc().expect("SyntaxError");
    let class = mrb.obj_class(exc);
    assert_eq!(mrb.class_name(class), "SyntaxError");
}
