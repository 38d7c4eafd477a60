//! Parsing and code generation

use crate::error::{Error, Result};
use crate::handle::Handle;
use crate::value::Value;
use garnet_vm::{MrbcContext, ParseOutcome};
use std::fmt;

pub use garnet_vm::ParserMessage;

/// State shared by successive compilations: the file name reported in
/// backtraces, and the top-level locals seen so far.
#[derive(Debug, Clone, Default)]
pub struct CompileContext {
    raw: MrbcContext,
}

impl CompileContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_filename(&mut self, name: &str) {
        self.raw.set_filename(name);
    }

    pub fn filename(&self) -> Option<&str> {
        self.raw.filename()
    }

    /// Top-level locals captured by earlier compilations, in slot order.
    pub fn locals(&self) -> &[String] {
        self.raw.locals()
    }

    pub(crate) fn raw_mut(&mut self) -> &mut MrbcContext {
        &mut self.raw
    }
}

/// Source that failed to parse.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParserError {
    pub errors: Vec<ParserMessage>,
    /// Warnings reported before the failure.
    pub warnings: Vec<ParserMessage>,
}

impl fmt::Display for ParserError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Ruby parse error!\n\n")?;
        for e in &self.errors {
            writeln!(f, "{}", e)?;
        }
        Ok(())
    }
}

impl std::error::Error for ParserError {}

/// Parses source into a program that [`Handle::run`] can execute.
pub struct Parser<'h> {
    handle: &'h Handle,
    outcome: Option<ParseOutcome>,
}

impl<'h> Parser<'h> {
    pub fn new(handle: &'h Handle) -> Self {
        Self { handle, outcome: None }
    }

    /// Parse `code`, replacing whatever was parsed before. Returns the
    /// warnings on success. With a context, its file name is used and its
    /// locals are visible to `code`.
    pub fn parse(&mut self, code: &str, ctx: Option<&mut CompileContext>) -> std::result::Result<Vec<ParserMessage>, ParserError> {
        let outcome = self.handle.mrb().parse(code, ctx.map(CompileContext::raw_mut));
        if outcome.is_ok() {
            let warnings = outcome.warnings.clone();
            self.outcome = Some(outcome);
            Ok(warnings)
        } else {
            self.outcome = None;
            Err(ParserError {
                errors: outcome.errors,
                warnings: outcome.warnings,
            })
        }
    }

    /// The proc for the last successful parse.
    pub fn generate_code(&self) -> Result<Value<'h>> {
        let outcome = self.outcome.as_ref().ok_or(Error::NoCode)?;
        let proc = self.handle.mrb().generate_code(outcome);
        Ok(Value::new(self.handle, proc))
    }
}

impl fmt::Debug for Parser<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Parser").field("parsed", &self.outcome.is_some()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Garnet, ValueType};

    #[test]
    fn test_parse_and_run() {
        let grb = Garnet::open().expect("open");
        let mut parser = Parser::new(&grb);
        let warnings = parser.parse("1 + 2", None).expect("parse");
        assert!(warnings.is_empty());
        let proc = parser.generate_code().expect("code");
        assert_eq!(proc.value_type(), ValueType::Proc);
        let v = grb.run(proc, None).expect("run");
        assert_eq!(v.to_host::<i64>().expect("int"), 3);
    }

    #[test]
    fn test_parse_error_message() {
        let grb = Garnet::open().expect("open");
        let mut parser = Parser::new(&grb);
        let err = parser.parse("def (", None).unwrap_err();
        assert!(!err.errors.is_empty());
        let text = err.to_string();
        assert!(text.starts_with("Ruby parse error!\n\nline 1:"), "{}", text);
        assert!(text.ends_with('\n'));
        assert!(matches!(parser.generate_code(), Err(Error::NoCode)));
    }

    #[test]
    fn test_warnings_are_returned() {
        let grb = Garnet::open().expect("open");
        let mut parser = Parser::new(&grb);
        let warnings = parser.parse("if a = 1\n a\nend", None).expect("parse");
        assert_eq!(warnings.len(), 1);
    }

    #[test]
    fn test_generate_without_parse() {
        let grb = Garnet::open().expect("open");
        let parser = Parser::new(&grb);
        assert!(matches!(parser.generate_code(), Err(Error::NoCode)));
    }

    #[test]
    fn test_context_filename() {
        let mut ctx = CompileContext::new();
        assert_eq!(ctx.filename(), None);
        ctx.set_filename("foo.rb");
        assert_eq!(ctx.filename(), Some("foo.rb"));
        assert!(ctx.locals().is_empty());
    }
}
