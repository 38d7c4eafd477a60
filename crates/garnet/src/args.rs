//! Argument specifications for host-backed methods
//!
//! The guest checks positional argument counts against the `ArgSpec` when it
//! binds a call, before the host callback runs.

use garnet_vm::Aspec;
use std::ops::{BitOr, BitOrAssign};

/// How many arguments a method takes. Combine with `|`:
///
/// ```ignore
/// ArgSpec::req(1) | ArgSpec::opt(2) | ArgSpec::block()
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ArgSpec(Aspec);

impl ArgSpec {
    /// No arguments.
    pub const fn none() -> Self {
        Self(Aspec::NONE)
    }

    /// `n` required arguments.
    pub const fn req(n: u32) -> Self {
        Self(Aspec::req(n))
    }

    /// `n` optional arguments.
    pub const fn opt(n: u32) -> Self {
        Self(Aspec::opt(n))
    }

    /// `req` required and `opt` optional arguments.
    pub const fn arg(req: u32, opt: u32) -> Self {
        Self(Aspec(Aspec::req(req).0 | Aspec::opt(opt).0))
    }

    /// Any number of arguments.
    pub const fn any() -> Self {
        Self(Aspec::REST)
    }

    /// Takes a block.
    pub const fn block() -> Self {
        Self(Aspec::BLOCK)
    }

    pub fn required(self) -> usize {
        self.0.required()
    }

    pub fn optional(self) -> usize {
        self.0.optional()
    }
}

impl BitOr for ArgSpec {
    type Output = ArgSpec;

    fn bitor(self, rhs: ArgSpec) -> ArgSpec {
        ArgSpec(self.0 | rhs.0)
    }
}

impl BitOrAssign for ArgSpec {
    fn bitor_assign(&mut self, rhs: ArgSpec) {
        *self = *self | rhs;
    }
}

impl From<ArgSpec> for Aspec {
    fn from(spec: ArgSpec) -> Aspec {
        spec.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_combine() {
        let spec = ArgSpec::req(2) | ArgSpec::opt(1) | ArgSpec::block();
        assert_eq!(spec.required(), 2);
        assert_eq!(spec.optional(), 1);
        assert_eq!(ArgSpec::arg(2, 1) | ArgSpec::block(), spec);

        let aspec: Aspec = spec.into();
        assert!(aspec.takes_block());
        assert!(Aspec::from(ArgSpec::any()).accepts(9));
    }

    #[test]
    fn test_bitor_assign() {
        let mut spec = ArgSpec::none();
        spec |= ArgSpec::req(1);
        assert_eq!(spec, ArgSpec::req(1));
    }
}
