use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use garnet::{ArgSpec, Decode, Garnet};
use std::collections::HashMap;

fn bench_native_call(c: &mut Criterion) {
    let grb = Garnet::open().unwrap();
    let class = grb.define_class("Bench", None);
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

    c.bench_function("native_class_method", |b| {
        let this = *grb.class("Bench", None).unwrap();
        let args = [grb.to_guest(12_i64), grb.to_guest(30_i64)];
        b.iter(|| {
            let _arena = grb.arena();
            this.call(black_box("add"), &args).unwrap()
        });
    });

    let mut group = c.benchmark_group("guest_loop");
    for n in [10_u64, 100, 1000] {
        let code = format!("i = 0\n{}.times {{ i = Bench.add(i, 1) }}\ni", n);
        group.throughput(Throughput::Elements(n));
        group.bench_with_input(BenchmarkId::new("native_calls", n), &code, |b, code| {
            b.iter(|| {
                let _arena = grb.arena();
                grb.load_string(black_box(code)).unwrap()
            });
        });
    }
    group.finish();
}

fn bench_open_close(c: &mut Criterion) {
    c.bench_function("open_close", |b| {
        b.iter(|| Garnet::open().unwrap().close());
    });
}

#[allow(dead_code)]
#[derive(Default, Decode)]
struct Server {
    host: String,
    port: u16,
    tags: Vec<String>,
    labels: HashMap<String, String>,
}

fn bench_decode(c: &mut Criterion) {
    let grb = Garnet::open().unwrap();
    let value = grb
        .load_string(
            r#"$server = {"host" => "localhost", "port" => 8080, "tags" => ["a", "b", "c"], "labels" => {"env" => "prod", "tier" => "web"}}"#,
        )
        .unwrap();

    c.bench_function("decode_record", |b| {
        b.iter(|| value.decode::<Server>().unwrap());
    });
}

criterion_group!(benches, bench_native_call, bench_open_close, bench_decode);
criterion_main!(benches);
