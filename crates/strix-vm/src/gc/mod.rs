//! Garbage collection system
//!
//! This module provides the mark-sweep collector for the Strix VM.
//!
//! # Architecture
//!
//! - **Heap**: arena of objects addressed by `ObjRef` index, with a free list
//! - **RootSet**: transient roots gathered at a safe point, plus pinned handles
//! - **GarbageCollector**: mark from roots, sweep unmarked cells, prune strings
//!
//! Collections are requested by an allocation-count quota and run only at
//! instruction boundaries when no native call is in progress, so no
//! partially built object is ever observed by the mark phase.

mod collector;
mod heap;
mod roots;

pub use collector::{GarbageCollector, GcStats};
pub use heap::Heap;
pub use roots::{PinHandle, RootSet};
