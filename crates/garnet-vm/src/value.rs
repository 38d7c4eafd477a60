//! Guest value representation.
//!
//! `MrbValue` is a small `Copy` tagged union. Immediates (nil, booleans,
//! fixnums, floats, symbols) are stored inline; everything else is an
//! [`ObjRef`] into the garbage-collected heap. An `ObjRef` carries the
//! generation of the slot it was allocated in, so a reference that outlives
//! its object is detected instead of aliasing whatever reuses the slot.

use std::fmt;
use std::ops::BitOr;

/// Interned symbol id.
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Sym(pub(crate) u32);

impl Sym {
    /// Raw symbol id.
    pub fn id(self) -> u32 {
        self.0
    }
}

/// Generational reference to a heap object.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObjRef {
    pub(crate) index: u32,
    pub(crate) gen: u32,
}

impl ObjRef {
    /// Slot index inside the heap.
    pub fn index(self) -> u32 {
        self.index
    }
}

/// A guest value.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum MrbValue {
    #[default]
    Nil,
    False,
    True,
    Fixnum(i64),
    Float(f64),
    Symbol(Sym),
    Undef,
    Object(ObjRef),
}

impl MrbValue {
    pub fn from_bool(b: bool) -> Self {
        if b {
            MrbValue::True
        } else {
            MrbValue::False
        }
    }

    /// Ruby truthiness: everything except `nil` and `false`.
    pub fn truthy(self) -> bool {
        !matches!(self, MrbValue::Nil | MrbValue::False)
    }

    pub fn is_nil(self) -> bool {
        matches!(self, MrbValue::Nil)
    }

    pub fn as_obj(self) -> Option<ObjRef> {
        match self {
            MrbValue::Object(r) => Some(r),
            _ => None,
        }
    }

    /// Identity comparison (`equal?`).
    pub fn identical(self, other: MrbValue) -> bool {
        match (self, other) {
            (MrbValue::Float(a), MrbValue::Float(b)) => a.to_bits() == b.to_bits(),
            (a, b) => a == b,
        }
    }
}

/// mruby type tags, in mruby's declaration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum MrbVType {
    False = 0,
    True,
    Float,
    Fixnum,
    Symbol,
    Undef,
    CPtr,
    Free,
    Object,
    Class,
    Module,
    IClass,
    SClass,
    Proc,
    Array,
    Hash,
    String,
    Range,
    Exception,
    Env,
    Data,
    Fiber,
    Struct,
    Break,
    /// `nil` shares `False`'s tag in mruby; it gets its own tag here.
    Nil = 0xffff_ffff,
}

impl fmt::Display for MrbVType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Native method argument specification, bit-compatible with `mrb_aspec`.
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Aspec(pub u32);

impl Aspec {
    pub const NONE: Aspec = Aspec(0);
    pub const REST: Aspec = Aspec(1 << 12);
    pub const BLOCK: Aspec = Aspec(1);

    pub const fn req(n: u32) -> Aspec {
        Aspec((n & 0x1f) << 18)
    }

    pub const fn opt(n: u32) -> Aspec {
        Aspec((n & 0x1f) << 13)
    }

    pub fn required(self) -> usize {
        ((self.0 >> 18) & 0x1f) as usize
    }

    pub fn optional(self) -> usize {
        ((self.0 >> 13) & 0x1f) as usize
    }

    pub fn has_rest(self) -> bool {
        self.0 & Self::REST.0 != 0
    }

    pub fn takes_block(self) -> bool {
        self.0 & Self::BLOCK.0 != 0
    }

    /// Check a positional argument count against this spec.
    pub fn accepts(self, given: usize) -> bool {
        let req = self.required();
        if given < req {
            return false;
        }
        self.has_rest() || given <= req + self.optional()
    }
}

impl BitOr for Aspec {
    type Output = Aspec;

    fn bitor(self, rhs: Aspec) -> Aspec {
        Aspec(self.0 | rhs.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truthiness() {
        assert!(!MrbValue::Nil.truthy());
        assert!(!MrbValue::False.truthy());
        assert!(MrbValue::Fixnum(0).truthy());
        assert!(MrbValue::True.truthy());
    }

    #[test]
    fn test_aspec_layout() {
        let spec = Aspec::req(2) | Aspec::opt(1);
        assert_eq!(spec.required(), 2);
        assert_eq!(spec.optional(), 1);
        assert!(spec.accepts(2));
        assert!(spec.accepts(3));
        assert!(!spec.accepts(1));
        assert!(!spec.accepts(4));
        assert!((Aspec::REST).accepts(10));
        assert!(Aspec::NONE.accepts(0));
        assert!(!Aspec::NONE.accepts(1));
    }

    #[test]
    fn test_float_identity() {
        assert!(MrbValue::Float(f64::NAN).identical(MrbValue::Float(f64::NAN)));
        assert!(!MrbValue::Fixnum(1).identical(MrbValue::Float(1.0)));
    }
}
