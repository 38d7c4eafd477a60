//! Garnet - embed the Garnet Ruby interpreter in Rust programs
//!
//! A [`Garnet`] owns one interpreter. Host code runs guest code through it,
//! converts values in both directions, and defines guest classes whose
//! methods are Rust closures. Any number of interpreters can be open at once,
//! each driven by its own thread.
//!
//! # Example
//!
//! ```ignore
//! use garnet::{ArgSpec, Garnet};
//!
//! let grb = Garnet::open()?;
//! let example = grb.define_class("Example", None);
//! example.define_class_method(
//!     "add",
//!     |grb, _this| {
//!         let args = grb.get_args();
//!         let a: i64 = args[0].to_host()?;
//!         let b: i64 = args[1].to_host()?;
//!         Ok(Some(grb.to_guest(a + b)))
//!     },
//!     ArgSpec::req(2),
//! );
//!
//! let sum: i64 = grb.load_string("Example.add(12, 30)")?.to_host()?;
//! assert_eq!(sum, 42);
//! ```
//!
//! # Garbage collection
//!
//! [`Value`]s are not roots. A value the guest cannot reach is collected at
//! the next cycle; see [`arena`] for keeping transient values alive and for
//! releasing them in bulk.

#![warn(rust_2018_idioms)]

// Lets `#[derive(Decode)]` output name `::garnet` inside this crate too.
extern crate self as garnet;

pub mod arena;
mod args;
mod array;
mod class;
mod convert;
pub mod decode;
mod error;
mod exception;
pub mod ext;
mod handle;
mod hash;
mod methods;
mod options;
mod parser;
mod registry;
mod trampoline;
mod value;

pub use arena::{ArenaGuard, ArenaIndex};
pub use args::ArgSpec;
pub use array::Array;
pub use class::Class;
pub use convert::{FromValue, IntoValue};
pub use decode::{decode, Decode, Dynamic};
pub use error::{DecodeError, Error, Result};
pub use exception::ExceptionError;
pub use handle::{Garnet, Handle};
pub use hash::Hash;
pub use methods::{MethodResult, Raise};
pub use options::{Builder, Mutator, Options};
pub use parser::{CompileContext, Parser, ParserError, ParserMessage};
pub use registry::open_handles;
pub use value::{Value, ValueType};

/// `#[derive(Decode)]` for records.
pub use garnet_derive::Decode;

pub use garnet_vm::VmOptions;
