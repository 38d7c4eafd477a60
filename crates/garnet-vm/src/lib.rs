//! Garnet guest VM
//!
//! A compact interpreter for a Ruby-compatible language, exposing an
//! embedding API modelled on mruby's C API:
//! - Parser producing a slot-resolved syntax tree
//! - Tree-walking evaluator with non-local control flow
//! - Mark-and-sweep collector with a GC arena for native code
//! - Core classes (Object, String, Array, Hash, Range, Proc, exceptions)
//!
//! Everything is driven through [`MrbState`]. Native methods registered with
//! [`MrbState::define_method`] receive a raw state pointer and the receiver,
//! and read their arguments back with [`MrbState::get_args`].

#![warn(rust_2018_idioms)]

mod ast;
mod builtins;
mod gc;
mod interp;
mod lexer;
mod object;
mod symbol;

pub mod context;
pub mod parser;
pub mod state;
pub mod value;

pub use context::MrbcContext;
pub use gc::GcStats;
pub use interp::{Eval, Unwind};
pub use lexer::LexError;
pub use parser::{ParseOutcome, ParserMessage};
pub use state::{MrbState, NativeFn, VmOptions};
pub use value::{Aspec, MrbVType, MrbValue, ObjRef, Sym};
