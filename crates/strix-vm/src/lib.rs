//! Strix VM
//!
//! This crate provides the runtime core of the Strix virtual machine:
//! - Values, interned strings and property stores
//! - Types with per-type helper tables
//! - The bytecode interpreter with handler-table exceptions
//! - A mark-sweep collector over an indexed heap
//! - Module loading with a cache shared between interpreters

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod defaults;
pub mod error;
pub mod gc;
pub mod helpers;
pub mod host;
pub mod intern;
pub mod interpreter;
pub mod module;
mod native;
pub mod object;
pub mod options;
pub mod value;

pub use error::{ErrorKind, LoadError, PropertyError, VmError, VmResult};
pub use gc::{GcStats, PinHandle};
pub use helpers::Helpers;
pub use host::{ExitHandle, Host, ProcessHost};
pub use intern::{IStr, InternStats, InternTable};
pub use interpreter::{CoreTypes, Interpreter};
pub use module::{LoadedModule, ModuleImage, NativeConfigure, Service};
pub use object::{Attributes, NativeFn, QualifiedName};
pub use options::{HostMode, InterpreterId, LoadFlags, ResourceLimits, VmOptions};
pub use value::{ObjRef, Value};
