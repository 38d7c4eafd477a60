//! Integration tests for the VM handle and native method dispatch
//!
//! Tests cover:
//! - Host callbacks as class, instance, singleton and module methods
//! - Argument and block passing into callbacks
//! - Raising from callbacks and clearing pending exceptions
//! - Running generated code with and without carried-over locals

use garnet::{ArgSpec, Array, CompileContext, Error, Garnet, Parser, Raise, Value, ValueType};

fn open() -> Garnet {
    let _ = env_logger::builder().is_test(true).try_init();
    Garnet::open().expect("open")
}

fn check_args(args: &str, types: &[ValueType], inspected: Option<&[&str]>) {
    let grb = open();
    let class = grb.define_class("Hello", None);
    class.define_class_method(
        "test",
        |grb, _this| {
            let ary = Array::new(grb);
            for arg in grb.get_args() {
                ary.push(arg);
            }
            Ok(Some(*ary))
        },
        ArgSpec::any(),
    );

    let out = grb.load_string(&format!("Hello.test{}", args)).expect("call");
    let actual: Vec<Value<'_>> = out.to_host().expect("array");
    let actual_types: Vec<ValueType> = actual.iter().map(|v| v.value_type()).collect();
    assert_eq!(actual_types, types, "{}", args);

    if let Some(expected) = inspected {
        let actual: Vec<String> = actual.iter().map(|v| v.inspect().expect("inspect")).collect();
        assert_eq!(actual, expected, "{}", args);
    }
}

#[test]
fn test_get_args() {
    check_args(r#"("foo")"#, &[ValueType::String], Some(&[r#""foo""#][..]));
    check_args("(true)", &[ValueType::True], Some(&["true"][..]));
    check_args("(Hello)", &[ValueType::Class], Some(&["Hello"][..]));
    check_args("() {}", &[ValueType::Proc], None);
    check_args(
        r#"(Hello, "bar", true)"#,
        &[ValueType::Class, ValueType::String, ValueType::True],
        Some(&["Hello", r#""bar""#, "true"][..]),
    );
    check_args(
        r#"("bar", true) {}"#,
        &[ValueType::String, ValueType::True, ValueType::Proc],
        None,
    );
}

#[test]
fn test_class_and_instance_methods() {
    let grb = open();
    let class = grb.define_class("Calc", None);
    class.define_class_method(
        "add",
        |grb, _this| {
            let args = grb.get_args();
            let a: i64 = args[0].to_host()?;
            let b: i64 = args[1].to_host()?;
            Ok(Some(grb.to_guest(a + b)))
        },
        ArgSpec::req(2),
    );
    class.define_method(
        "double",
        |grb, this| {
            let n: i64 = this.get_instance_variable("@n").to_host()?;
            Ok(Some(grb.to_guest(n * 2)))
        },
        ArgSpec::none(),
    );

    let sum: i64 = grb.load_string("Calc.add(12, 30)").expect("add").to_host().expect("int");
    assert_eq!(sum, 42);

    let inst = class.new_instance(&[]).expect("new");
    inst.set_instance_variable("@n", grb.to_guest(21_i64));
    let doubled: i64 = inst.call("double", &[]).expect("double").to_host().expect("int");
    assert_eq!(doubled, 42);
}

#[test]
fn test_module_method_through_include() {
    let grb = open();
    let greeter = grb.define_module("Greeter");
    greeter.define_method(
        "greet",
        |grb, this| {
            let name: String = this.call("name", &[])?.to_host()?;
            Ok(Some(grb.to_guest(format!("hello {}", name))))
        },
        ArgSpec::none(),
    );
    grb.load_string("class Person\n  include Greeter\n  def name\n    'ann'\n  end\nend")
        .expect("load");

    let out: String = grb.load_string("Person.new.greet").expect("greet").to_host().expect("string");
    assert_eq!(out, "hello ann");
}

#[test]
fn test_aliased_native_method() {
    let grb = open();
    let class = grb.define_class("Foo", None);
    class.define_method("native", |grb, _this| Ok(Some(grb.to_guest("native"))), ArgSpec::none());

    let out = grb
        .load_string("class Foo\n  alias_method :other, :native\nend\nFoo.new.other")
        .expect("alias");
    assert_eq!(out.to_string(), "native");

    let out = grb
        .load_string("class Bar < Foo\n  alias_method :again, :other\nend\nBar.new.again")
        .expect("inherited alias");
    assert_eq!(out.to_string(), "native");
}

#[test]
fn test_nested_native_calls() {
    let grb = open();
    let top = grb.top_self().singleton_class().expect("singleton");
    top.define_method("inner", |grb, _this| Ok(Some(grb.to_guest(1_i64))), ArgSpec::none());
    top.define_method(
        "outer",
        |grb, _this| {
            let n: i64 = grb.load_string("inner + inner")?.to_host()?;
            let m: i64 = grb.load_string("inner")?.to_host()?;
            Ok(Some(grb.to_guest(n + m)))
        },
        ArgSpec::none(),
    );

    let v: i64 = grb.load_string("outer + outer").expect("outer").to_host().expect("int");
    assert_eq!(v, 6);
    let v: i64 = grb.load_string("inner").expect("inner").to_host().expect("int");
    assert_eq!(v, 1);
}

#[test]
fn test_nil_result_when_callback_returns_none() {
    let grb = open();
    let top = grb.top_self().singleton_class().expect("singleton");
    top.define_method("nothing", |_grb, _this| Ok(None), ArgSpec::none());
    assert!(grb.load_string("nothing()").expect("call").is_nil());
}

#[test]
fn test_raise_exception_value() {
    let grb = open();
    let class = grb.define_class("Hello", None);
    class.define_class_method("foo", |grb, _this| Err(Raise::Exception(grb.get_args()[0])), ArgSpec::req(1));

    let err = grb.load_string(r#"Hello.foo(ArgumentError.new("ouch"))"#).unwrap_err();
    assert_eq!(err.to_string(), "ouch");
}

#[test]
fn test_raise_non_exception_is_type_error() {
    let grb = open();
    let class = grb.define_class("Hello", None);
    class.define_class_method("foo", |grb, _this| Err(Raise::Exception(grb.to_guest(5_i64))), ArgSpec::none());

    let out: String = grb
        .load_string("begin\n  Hello.foo\nrescue TypeError => e\n  e.message\nend")
        .expect("rescued")
        .to_host()
        .expect("string");
    assert!(out.contains("exception object expected"), "{}", out);
}

#[test]
fn test_host_errors_map_to_guest_classes() {
    let grb = open();
    let class = grb.define_class("Hello", None);
    class.define_class_method(
        "small",
        |grb, _this| {
            let n: u8 = grb.get_args()[0].to_host()?;
            Ok(Some(grb.to_guest(n)))
        },
        ArgSpec::req(1),
    );

    let small: i64 = grb.load_string("Hello.small(7)").expect("small").to_host().expect("int");
    assert_eq!(small, 7);

    let rescued: String = grb
        .load_string("begin\n  Hello.small(300)\nrescue RangeError => e\n  e.message\nend")
        .expect("rescued")
        .to_host()
        .expect("string");
    assert_eq!(rescued, "integer 300 out of range");
}

#[test]
fn test_panicking_callback_raises_runtime_error() {
    let grb = open();
    let top = grb.top_self().singleton_class().expect("singleton");
    top.define_method("explode", |_grb, _this| panic!("boom"), ArgSpec::none());

    let err = grb.load_string("explode()").unwrap_err();
    assert_eq!(err.to_string(), "boom");
    assert!(grb.load_string("1").is_ok());
}

#[test]
fn test_exception_does_not_leak_into_next_call() {
    let grb = open();
    let top = grb.top_self().singleton_class().expect("singleton");
    top.define_method(
        "failing",
        |grb, _this| {
            grb.load_string("raise 'Exception'")?;
            Ok(None)
        },
        ArgSpec::none(),
    );

    assert!(grb.load_string("failing()").is_err());
    let out: String = grb.load_string(r#""test""#).expect("clean").to_host().expect("string");
    assert_eq!(out, "test");
}

#[test]
fn test_yield() {
    let grb = open();
    let class = grb.define_class("Hello", None);
    class.define_class_method(
        "foo",
        |grb, _this| {
            let block = grb.get_args()[0];
            let out = grb.yield_block(block, &[grb.to_guest(12_i64), grb.to_guest(30_i64)])?;
            Ok(Some(out))
        },
        ArgSpec::block(),
    );

    let v: i64 = grb.load_string("Hello.foo { |a, b| a + b }").expect("yield").to_host().expect("int");
    assert_eq!(v, 42);
}

#[test]
fn test_yield_exception_is_cleared() {
    let grb = open();
    let class = grb.define_class("Hello", None);
    class.define_class_method(
        "foo",
        |grb, _this| {
            let block = grb.get_args()[0];
            Ok(Some(grb.yield_block(block, &[])?))
        },
        ArgSpec::block(),
    );

    assert!(grb.load_string(r#"Hello.foo { raise "exception" }"#).is_err());
    assert!(grb.load_string("Hello.foo { 1 }").is_ok());
}

#[test]
fn test_stacked_exceptions() {
    fn exception<'h>(grb: &'h garnet::Handle, message: &str) -> garnet::Result<Value<'h>> {
        grb.class("Exception", None)?.new_instance(&[grb.to_guest(message)])
    }

    let grb = open();
    let test_class = grb.define_class("TestClass", None);
    test_class.define_method(
        "dotest!",
        |grb, _this| Err(Raise::Exception(exception(grb, "Fail us!")?)),
        ArgSpec::arg(0, 3),
    );

    let top = grb.top_self().singleton_class().expect("singleton");
    top.define_method(
        "test",
        |grb, _this| {
            let args = grb.get_args();
            let target = grb.class("TestClass", None)?.new_instance(&[])?;
            match target.call("dotest!", &args) {
                Ok(v) => Ok(Some(v)),
                Err(err) => Err(Raise::Exception(exception(grb, &err.to_string())?)),
            }
        },
        ArgSpec::arg(0, 3),
    );

    let err = grb.load_string("test()").unwrap_err();
    assert_eq!(err.to_string(), "Fail us!");
    grb.close();

    let grb = open();
    let top = grb.top_self().singleton_class().expect("singleton");
    top.define_method(
        "myeval",
        |grb, this| {
            let block = grb.get_args()[0];
            match this.call_block("instance_eval", &[block]) {
                Ok(_) => Ok(None),
                Err(err) => Err(Raise::Exception(exception(grb, &err.to_string())?)),
            }
        },
        ArgSpec::block(),
    );

    let err = grb.load_string("myeval { raise 'foo' }").unwrap_err();
    assert_eq!(err.to_string(), "foo");
    assert!(grb.load_string("myeval { 1 }").is_ok());
}

#[test]
fn test_run_and_run_with_context() {
    let grb = open();
    let mut parser = Parser::new(&grb);
    let mut ctx = CompileContext::new();

    parser
        .parse("if $do_raise\n  raise 'exception'\nelse\n  'rval'\nend", Some(&mut ctx))
        .expect("parse");
    let proc = parser.generate_code().expect("code");

    grb.load_string("$do_raise = true").expect("set");
    assert!(grb.run(proc, None).is_err());

    grb.load_string("$do_raise = false").expect("set");
    let rval: String = grb.run(proc, None).expect("run").to_host().expect("string");
    assert_eq!(rval, "rval");

    parser.parse("a = 10", Some(&mut ctx)).expect("parse");
    let proc = parser.generate_code().expect("code");
    let (stack_keep, _) = grb.run_with_context(proc, None, 0).expect("run");
    assert_eq!(stack_keep, 2);

    parser.parse("a", Some(&mut ctx)).expect("parse");
    let proc = parser.generate_code().expect("code");
    let (_, ret) = grb.run_with_context(proc, None, stack_keep).expect("run");
    assert_eq!(ret.to_string(), "10");
}

#[test]
fn test_globals_and_constants() {
    let grb = open();
    grb.set_global_variable("$answer", grb.to_guest(42_i64));
    let v: i64 = grb.load_string("$answer").expect("global").to_host().expect("int");
    assert_eq!(v, 42);

    let class = grb.define_class("Config", None);
    class.define_const("LIMIT", grb.to_guest(10_i64));
    assert!(grb.const_defined("LIMIT", *class));
    assert!(!grb.const_defined("MISSING", *class));
    let v: i64 = grb.load_string("Config::LIMIT").expect("const").to_host().expect("int");
    assert_eq!(v, 10);
}

#[test]
fn test_call_block_requires_block_argument() {
    let grb = open();
    let ary = grb.load_string("[1, 2]").expect("array");
    assert!(matches!(ary.call_block("each", &[]), Err(Error::EmptyBlockArgs)));
}
