//! Guest exceptions surfaced to the host
//!
//! Every bridge operation that runs guest code ends by capturing the pending
//! exception, if any, into an [`ExceptionError`] and clearing it from the
//! interpreter, so a failure never leaks into a later unrelated call.

use crate::handle::Handle;
use garnet_vm::MrbValue;
use std::fmt;

/// File reported when the exception carries no backtrace.
pub const UNKNOWN_FILE: &str = "Unknown";

/// A guest exception, detached from the interpreter state.
#[derive(Debug, Clone)]
pub struct ExceptionError {
    message: String,
    file: String,
    line: u32,
    backtrace: Vec<String>,
    raw: MrbValue,
}

impl ExceptionError {
    /// Result of the exception's `to_s`.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// File of the innermost frame, or [`UNKNOWN_FILE`].
    pub fn file(&self) -> &str {
        &self.file
    }

    /// Line of the innermost frame, 0 when unknown.
    pub fn line(&self) -> u32 {
        self.line
    }

    /// Frames recorded when the exception was raised, innermost first.
    pub fn backtrace(&self) -> &[String] {
        &self.backtrace
    }

    /// The exception object. Only meaningful on the handle it came from, and
    /// only while something keeps it alive.
    pub fn raw(&self) -> MrbValue {
        self.raw
    }
}

impl fmt::Display for ExceptionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for ExceptionError {}

/// Take the pending exception off `handle`, if there is one.
pub(crate) fn capture(handle: &Handle) -> Option<ExceptionError> {
    let exc = handle.mrb().take_exc()?;

    let record = {
        let _arena = handle.arena();
        let backtrace = handle.mrb().exc_backtrace(exc);
        let (file, line) = backtrace
            .first()
            .map(|frame| split_frame(frame))
            .unwrap_or((UNKNOWN_FILE.to_string(), 0));

        let message = handle.mrb().obj_as_string(exc);
        let message = match handle.mrb().take_exc() {
            // `to_s` itself raised; fall back to the class name.
            Some(_) => {
                let class = handle.mrb().obj_class(exc);
                handle.mrb().class_name(class)
            }
            None => handle.mrb().string_value(message).unwrap_or_default().to_string(),
        };

        ExceptionError {
            message,
            file,
            line,
            backtrace,
            raw: exc,
        }
    };

    handle.mrb().clear_exc();
    handle.mrb().gc_protect(exc);
    Some(record)
}

/// Split a `file:line` or `file:line:in method` frame.
fn split_frame(frame: &str) -> (String, u32) {
    let mut parts = frame.splitn(3, ':');
    let file = parts.next().unwrap_or(UNKNOWN_FILE);
    let line = parts.next().and_then(|l| l.trim().parse().ok()).unwrap_or(0);
    (file.to_string(), line)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Garnet;

    #[test]
    fn test_split_frame() {
        assert_eq!(split_frame("foo.rb:12:in bar"), ("foo.rb".to_string(), 12));
        assert_eq!(split_frame("foo.rb:3"), ("foo.rb".to_string(), 3));
        assert_eq!(split_frame("foo.rb"), ("foo.rb".to_string(), 0));
    }

    #[test]
    fn test_capture_clears_pending() {
        let grb = Garnet::open().expect("open");
        let err = grb.load_string("raise 'oops'").unwrap_err();
        let exc = err.exception().expect("exception");
        assert_eq!(exc.message(), "oops");
        assert_eq!(err.to_string(), "oops");
        assert!(grb.mrb().exc().is_none());

        let v = grb.load_string("\"test\"").expect("clean load");
        assert_eq!(v.to_string(), "test");
    }

    #[test]
    fn test_capture_without_backtrace() {
        let grb = Garnet::open().expect("open");
        let class = grb.mrb().exception_class("ArgumentError").expect("class");
        let exc = grb.mrb().exc_new(class, "bad");
        grb.mrb().set_exc(exc);
        let record = capture(&grb).expect("pending");
        assert_eq!(record.message(), "bad");
        assert_eq!(record.file(), UNKNOWN_FILE);
        assert_eq!(record.line(), 0);
        assert!(capture(&grb).is_none());
    }

    #[test]
    fn test_capture_file_and_line() {
        let grb = Garnet::open().expect("open");
        let err = grb
            .load_file("boom.rb", "x = 1\nraise ArgumentError, 'kaboom'")
            .unwrap_err();
        let exc = err.exception().expect("exception");
        assert_eq!(exc.message(), "kaboom");
        assert_eq!(exc.file(), "boom.rb");
        assert_eq!(exc.line(), 2);
        assert!(!exc.backtrace().is_empty());
    }
}
