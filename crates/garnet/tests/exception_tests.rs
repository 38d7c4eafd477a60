//! Integration tests for guest exceptions surfacing as host errors

use garnet::{CompileContext, Error, Garnet, Parser};

fn open() -> Garnet {
    let _ = env_logger::builder().is_test(true).try_init();
    Garnet::open().expect("open")
}

#[test]
fn test_exception_backtrace() {
    let grb = open();
    let mut parser = Parser::new(&grb);
    let mut ctx = CompileContext::new();
    ctx.set_filename("hello.rb");

    parser
        .parse(
            "
def do_error
  raise \"Exception\"
end

def hop1
  do_error
end

def hop2
  hop1
end

hop2
",
            Some(&mut ctx),
        )
        .expect("parse");
    let proc = parser.generate_code().expect("code");
    let err = grb.run(proc, None).unwrap_err();

    let exc = err.exception().expect("exception");
    assert_eq!(exc.message(), "Exception");
    assert_eq!(exc.file(), "hello.rb");
    assert_eq!(exc.line(), 3);
    assert_eq!(exc.backtrace().len(), 4, "{:?}", exc.backtrace());
}

#[test]
fn test_error_outlives_handle() {
    let grb = open();
    let err = grb.load_string("raise ArgumentError, 'bad input'").unwrap_err();
    grb.close();
    assert_eq!(err.to_string(), "bad input");
    assert_eq!(err.exception().map(|e| e.message()), Some("bad input"));
}

#[test]
fn test_syntax_error_is_an_exception() {
    let grb = open();
    let err = grb.load_string("def (").unwrap_err();
    let exc = err.exception().expect("exception");
    assert!(exc.message().starts_with("line 1:"), "{}", exc.message());
    assert_eq!(exc.file(), "Unknown");
    assert_eq!(exc.line(), 0);
    assert!(grb.load_string("1").is_ok());
}

#[test]
fn test_exception_without_message_uses_class() {
    let grb = open();
    let err = grb
        .load_string("class Quiet < StandardError\n  def to_s\n    raise 'no'\n  end\nend\nraise Quiet.new")
        .unwrap_err();
    assert!(matches!(err, Error::Exception(_)));
    assert_eq!(err.to_string(), "Quiet");
}

#[test]
fn test_parse_error_lists_every_message() {
    let grb = open();
    let mut parser = Parser::new(&grb);
    let err = parser.parse("def (", None).unwrap_err();
    let text = Error::from(err.clone()).to_string();
    assert_eq!(text, err.to_string());
    for message in &err.errors {
        assert!(text.contains(&message.to_string()));
    }
}
