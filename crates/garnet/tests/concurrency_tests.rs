//! Concurrency tests for the handle registry and method tables
//!
//! Many interpreters are opened on separate threads at once; each registers
//! and calls its own native methods. Every call must reach the callback of
//! the interpreter that made it.

use garnet::{ArgSpec, Garnet};
use std::thread;

const CONCURRENCY: i64 = 100;
const NUM_FUNCS: i64 = 100;

fn open() -> Garnet {
    let _ = env_logger::builder().is_test(true).try_init();
    Garnet::open().expect("open")
}

#[test]
fn test_define_methods_concurrently() {
    thread::scope(|s| {
        for t in 0..CONCURRENCY {
            s.spawn(move || {
                let grb = open();
                let target = grb.top_self().singleton_class().expect("singleton");
                for i in 0..NUM_FUNCS {
                    target.define_method(
                        &format!("test{}", i),
                        move |grb, _this| Ok(Some(grb.to_guest(t * 1000 + i))),
                        ArgSpec::any(),
                    );
                }
                for i in 0..NUM_FUNCS {
                    let v: i64 = grb
                        .load_string(&format!("test{}()", i))
                        .expect("call")
                        .to_host()
                        .expect("int");
                    assert_eq!(v, t * 1000 + i);
                }
            });
        }
    });
}

#[test]
fn test_methods_are_handle_local() {
    let a = open();
    let b = open();
    let class_a = a.define_class("Shared", None);
    class_a.define_class_method("who", |grb, _this| Ok(Some(grb.to_guest("a"))), ArgSpec::none());
    let class_b = b.define_class("Shared", None);
    class_b.define_class_method("who", |grb, _this| Ok(Some(grb.to_guest("b"))), ArgSpec::none());
    class_a.define_class_method("only_a", |_grb, _this| Ok(None), ArgSpec::none());

    assert_eq!(a.load_string("Shared.who").expect("a").to_string(), "a");
    assert_eq!(b.load_string("Shared.who").expect("b").to_string(), "b");
    assert!(a.load_string("Shared.only_a").is_ok());
    assert!(b.load_string("Shared.only_a").is_err());
}

#[test]
fn test_handles_move_between_threads() {
    let grb = open();
    grb.define_class("Mover", None)
        .define_class_method("ping", |grb, _this| Ok(Some(grb.to_guest("pong"))), ArgSpec::none());

    let grb = thread::spawn(move || {
        assert_eq!(grb.load_string("Mover.ping").expect("ping").to_string(), "pong");
        grb
    })
    .join()
    .expect("thread");

    assert_eq!(grb.load_string("Mover.ping").expect("ping").to_string(), "pong");
}

#[test]
fn test_open_and_close_concurrently() {
    thread::scope(|s| {
        for _ in 0..16 {
            s.spawn(|| {
                for _ in 0..20 {
                    let grb = open();
                    grb.define_class("Tmp", None)
                        .define_class_method("one", |grb, _this| Ok(Some(grb.to_guest(1_i64))), ArgSpec::none());
                    let v: i64 = grb.load_string("Tmp.one").expect("call").to_host().expect("int");
                    assert_eq!(v, 1);
                    grb.close();
                }
            });
        }
    });
}
