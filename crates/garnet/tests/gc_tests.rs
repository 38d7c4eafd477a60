//! Integration tests for arena checkpoints and collection
//!
//! Tests cover:
//! - Arena guards releasing transient values
//! - Values kept alive by globals and by re-protection
//! - Enabling and disabling the collector
//! - Native calls that allocate in a loop

use garnet::{ArgSpec, Garnet, Value};

fn open() -> Garnet {
    let _ = env_logger::builder().is_test(true).try_init();
    Garnet::open().expect("open")
}

#[test]
fn test_arena_guard_releases_values() {
    let grb = open();
    grb.full_gc();
    let before = grb.live_object_count();

    let raws = {
        let _arena = grb.arena();
        let values: Vec<Value<'_>> = (0..10).map(|i| grb.to_guest(format!("s{}", i))).collect();
        assert!(values.iter().all(|v| !v.is_dead()));
        values
    };
    grb.full_gc();

    assert!(raws.iter().all(|v| v.is_dead()));
    assert_eq!(grb.live_object_count(), before);
}

#[test]
fn test_save_and_restore() {
    let grb = open();
    let index = grb.arena_save();
    let v = grb.to_guest("transient");
    grb.arena_restore(index);
    grb.arena_restore(index);
    grb.full_gc();
    assert!(v.is_dead());
}

#[test]
fn test_global_survives_restore() {
    let grb = open();
    let kept = {
        let _arena = grb.arena();
        let v = grb.to_guest("kept");
        grb.set_global_variable("$kept", v);
        v
    };
    grb.full_gc();
    assert!(!kept.is_dead());
    assert_eq!(grb.get_global_variable("$kept").to_string(), "kept");
}

#[test]
fn test_gc_protect_after_restore() {
    let grb = open();
    let index = grb.arena_save();
    let v = grb.to_guest("again");
    grb.arena_restore(index);
    v.gc_protect();
    grb.full_gc();
    assert!(!v.is_dead());
}

#[test]
fn test_enable_disable_gc() {
    let grb = open();
    grb.full_gc();
    assert!(!grb.disable_gc());
    assert!(grb.disable_gc());

    grb.load_string("b = []; a = []; a = []").expect("load");
    let orig = grb.live_object_count();
    grb.full_gc();
    assert_eq!(grb.live_object_count(), orig);

    assert!(grb.enable_gc());
    grb.full_gc();
    assert!(grb.live_object_count() < orig);
}

#[test]
fn test_incremental_gc_keeps_reachable_values() {
    let grb = open();
    grb.load_string("$list = []\n50.times { |i| $list << i.to_s }").expect("load");
    for _ in 0..20 {
        grb.incremental_gc();
    }
    let list = grb.get_global_variable("$list");
    assert_eq!(list.call("size", &[]).expect("size").to_host::<i64>().expect("int"), 50);
}

#[test]
fn test_allocating_native_method_does_not_leak() {
    let grb = open();
    let top = grb.top_self().singleton_class().expect("singleton");
    top.define_method(
        "label",
        |grb, _this| {
            let n: i64 = grb.get_args()[0].to_host()?;
            Ok(Some(grb.to_guest(format!("item-{}", n))))
        },
        ArgSpec::req(1),
    );

    grb.full_gc();
    let before = grb.live_object_count();
    grb.load_string("1000.times { |i| label(i) }").expect("loop");
    grb.full_gc();
    assert!(grb.live_object_count() <= before + 1, "{} > {}", grb.live_object_count(), before);
}
