//! Compile contexts.

/// State carried between successive parses: the file name reported in
/// backtraces and the top-level local variables seen so far.
#[derive(Debug, Clone, Default)]
pub struct MrbcContext {
    filename: Option<String>,
    pub(crate) locals: Vec<String>,
}

impl MrbcContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn filename(&self) -> Option<&str> {
        self.filename.as_deref()
    }

    pub fn set_filename(&mut self, name: impl Into<String>) {
        self.filename = Some(name.into());
    }

    /// Names of the top-level locals captured so far, in slot order.
    pub fn locals(&self) -> &[String] {
        &self.locals
    }

    /// Slots a run must keep to see the captured locals: one per local plus
    /// the receiver slot.
    pub fn stack_keep(&self) -> usize {
        if self.locals.is_empty() {
            0
        } else {
            self.locals.len() + 1
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filename_roundtrip() {
        let mut cxt = MrbcContext::new();
        assert_eq!(cxt.filename(), None);
        cxt.set_filename("foo.rb");
        assert_eq!(cxt.filename(), Some("foo.rb"));
        assert_eq!(cxt.stack_keep(), 0);
    }
}
