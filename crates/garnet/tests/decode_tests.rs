//! Integration tests for decoding guest values into Rust data
//!
//! Tests cover:
//! - Scalars, pointers, slices and string-keyed maps
//! - Records from hashes and from objects with reader methods
//! - Record attributes: rename, squash, decoded_fields, skip
//! - The untyped `Dynamic` destination
//! - Error paths

use garnet::{decode, Decode, DecodeError, Dynamic, Error, Garnet};
use std::collections::{BTreeMap, HashMap};

fn open() -> Garnet {
    let _ = env_logger::builder().is_test(true).try_init();
    Garnet::open().expect("open")
}

fn decoded<T: Decode + Default>(code: &str) -> T {
    let grb = open();
    let value = grb.load_string(code).expect("load");
    value.decode::<T>().expect("decode")
}

fn decode_err<T: Decode + Default>(code: &str) -> DecodeError {
    let grb = open();
    let value = grb.load_string(code).expect("load");
    match value.decode::<T>() {
        Err(Error::Decode(err)) => err,
        Err(other) => panic!("unexpected error: {}", other),
        Ok(_) => panic!("decode of {:?} should fail", code),
    }
}

#[derive(Debug, Default, PartialEq, Decode)]
struct StructString {
    foo: String,
}

const OBJECT_WITH_METHODS: &str = "
class Foo
  def foo
    \"bar\"
  end
end

Foo.new
";

#[test]
fn test_scalars() {
    assert!(decoded::<bool>("true"));
    assert!(!decoded::<bool>("false"));
    assert_eq!(decoded::<f64>("1.2"), 1.2);
    assert_eq!(decoded::<i32>("32"), 32);
    assert_eq!(decoded::<i32>(r#""32""#), 32);
    assert_eq!(decoded::<u16>(r#""0x20""#), 32);
    assert_eq!(decoded::<String>("32"), "32");
    assert_eq!(decoded::<String>(r#""32""#), "32");
}

#[test]
fn test_pointers() {
    assert_eq!(decoded::<Option<i64>>("32"), Some(32));
    assert_eq!(*decoded::<Box<String>>(r#""boxed""#), "boxed");
}

#[test]
fn test_maps() {
    let out = decoded::<HashMap<String, String>>(r#"{"foo" => "bar"}"#);
    assert_eq!(out, HashMap::from([("foo".to_string(), "bar".to_string())]));

    let out = decoded::<HashMap<String, String>>(r#"{32 => "bar"}"#);
    assert_eq!(out, HashMap::from([("32".to_string(), "bar".to_string())]));

    let out = decoded::<BTreeMap<String, i64>>(r#"{"b" => 2, "a" => 1}"#);
    assert_eq!(out.into_iter().collect::<Vec<_>>(), vec![("a".to_string(), 1), ("b".to_string(), 2)]);
}

#[test]
fn test_slices() {
    let out = decoded::<Vec<String>>(r#"["foo", "bar"]"#);
    assert_eq!(out, vec!["foo", "bar"]);

    let out = decoded::<Vec<Vec<i64>>>("[[1, 2], [], [3]]");
    assert_eq!(out, vec![vec![1, 2], vec![], vec![3]]);
}

#[test]
fn test_struct_from_hash_and_object() {
    assert_eq!(
        decoded::<StructString>(r#"{"foo" => "bar"}"#),
        StructString { foo: "bar".to_string() }
    );
    assert_eq!(
        decoded::<StructString>(OBJECT_WITH_METHODS),
        StructString { foo: "bar".to_string() }
    );
}

#[test]
fn test_missing_fields_keep_their_value() {
    let grb = open();
    let mut out = StructString { foo: "keep".to_string() };
    decode(&mut out, grb.load_string("{}").expect("load")).expect("decode");
    assert_eq!(out.foo, "keep");

    decode(&mut out, grb.load_string("Object.new").expect("load")).expect("decode");
    assert_eq!(out.foo, "keep");
}

#[derive(Debug, Default, PartialEq, Decode)]
struct Tls {
    cert: String,
    verify: bool,
}

#[derive(Debug, Default, PartialEq, Decode)]
struct Server {
    host: String,
    #[garnet(rename = "listen_port")]
    port: u16,
    #[garnet(squash)]
    tls: Tls,
    #[garnet(skip)]
    secret: String,
    #[garnet(decoded_fields)]
    set: Vec<String>,
}

#[test]
fn test_record_attributes() {
    let out = decoded::<Server>(
        r#"{"host" => "localhost", "listen_port" => 8080, "cert" => "a.pem", "secret" => "x"}"#,
    );
    assert_eq!(
        out,
        Server {
            host: "localhost".to_string(),
            port: 8080,
            tls: Tls {
                cert: "a.pem".to_string(),
                verify: false,
            },
            secret: String::new(),
            set: vec!["cert".to_string(), "host".to_string(), "port".to_string()],
        }
    );
}

#[derive(Debug, Default, PartialEq, Decode)]
struct Cluster {
    name: String,
    servers: Vec<Server>,
    labels: HashMap<String, String>,
}

#[test]
fn test_nested_records() {
    let out = decoded::<Cluster>(
        r#"{"name" => "main", "servers" => [{"host" => "a"}, {"host" => "b", "listen_port" => "0x50"}], "labels" => {"env" => "prod"}}"#,
    );
    assert_eq!(out.name, "main");
    assert_eq!(out.servers.len(), 2);
    assert_eq!(out.servers[0].host, "a");
    assert_eq!(out.servers[0].set, vec!["host"]);
    assert_eq!(out.servers[1].port, 80);
    assert_eq!(out.labels.get("env").map(String::as_str), Some("prod"));
}

#[test]
fn test_dynamic() {
    assert_eq!(decoded::<Dynamic>("true"), Dynamic::Bool(true));
    assert_eq!(decoded::<Dynamic>("1.2"), Dynamic::Float(1.2));
    assert_eq!(decoded::<Dynamic>("32"), Dynamic::Int(32));
    assert_eq!(decoded::<Dynamic>(r#""32""#), Dynamic::String("32".to_string()));
    assert_eq!(
        decoded::<Dynamic>(r#"{32 => "bar"}"#),
        Dynamic::Map(HashMap::from([("32".to_string(), Dynamic::String("bar".to_string()))]))
    );
    assert_eq!(
        decoded::<Dynamic>(r#"["foo", "bar", "baz", false]"#),
        Dynamic::Array(vec![
            Dynamic::String("foo".to_string()),
            Dynamic::String("bar".to_string()),
            Dynamic::String("baz".to_string()),
            Dynamic::Bool(false),
        ])
    );
}

#[test]
fn test_error_paths() {
    let err = decode_err::<Cluster>(r#"{"servers" => [{"host" => "a"}, {"listen_port" => "abc"}]}"#);
    assert!(matches!(err, DecodeError::ParseInt { .. }), "{}", err);
    assert_eq!(err.path(), "root.servers[1].listen_port");

    let err = decode_err::<Cluster>(r#"{"labels" => {"env" => nil}}"#);
    assert_eq!(err.to_string(), "unknown type: name=root.labels.<entry 0> type=Nil");

    let err = decode_err::<u8>("300");
    assert!(matches!(err, DecodeError::IntOutOfRange { value: 300, .. }), "{}", err);

    let err = decode_err::<HashMap<i64, String>>(r#"{1 => "a"}"#);
    assert!(matches!(err, DecodeError::NonStringKeys { .. }), "{}", err);

    let err = decode_err::<StructString>(r#""not a record""#);
    assert_eq!(err.to_string(), "unknown type: name=root type=String");
}

#[test]
fn test_reader_exception_is_reported() {
    let grb = open();
    let value = grb
        .load_string("class Broken\n  def foo\n    raise 'nope'\n  end\nend\nBroken.new")
        .expect("load");
    let err = value.decode::<StructString>().unwrap_err();
    assert_eq!(err.exception().map(|e| e.message()), Some("nope"));
    match err {
        Error::Decode(e) => assert_eq!(e.path(), "root.foo"),
        other => panic!("unexpected error: {}", other),
    }
    assert!(grb.load_string("1").is_ok());
}

#[test]
fn test_decoding_releases_temporaries() {
    let grb = open();
    let value = grb
        .load_string(r#"$cluster = {"name" => "x", "servers" => [{"host" => "a"}, {"host" => "b"}]}"#)
        .expect("load");
    grb.full_gc();
    let before = grb.live_object_count();

    for _ in 0..10 {
        let out = value.decode::<Cluster>().expect("decode");
        assert_eq!(out.servers.len(), 2);
    }
    grb.full_gc();
    assert_eq!(grb.live_object_count(), before);
}
