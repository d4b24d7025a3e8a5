//! Default constants for VM configuration.
//!
//! Centralizes the limits shared by the property store, the interpreter
//! and the collector.

use std::time::Duration;

/// Default ceiling on nested calls before `StackOverflow` is raised.
pub const MAX_RECURSION: usize = 10_000;

/// Allocations between collection requests.
pub const GC_WORK_QUOTA: usize = 1024;

/// Slot vectors grow in multiples of this many slots.
pub const ROUND_PROP: usize = 16;

/// Above this many slots, stores grow in multiples of `LOTSA_PROP`.
pub const LOTSA_PROP: usize = 256;

/// Stores with fewer properties are searched linearly, without a hash index.
pub const HASH_MIN_PROP: usize = 8;

/// Hash chains longer than this request a rebuild with a larger table.
pub const MAX_COLLISIONS: usize = 4;

/// Hard ceiling on base-class chain depth.
pub const MAX_BASE_CLASSES: usize = 256;

/// Highest slot number a store may hold.
pub const MAX_TRAITS: usize = 0x7fff;

/// Minimum slots reserved for an activation block.
pub const MIN_FRAME_SLOTS: usize = 16;

/// Largest argument count accepted by a call.
pub const MAX_ARGS: usize = 8192;

/// Native calls and re-entrant executions that may be active at once.
pub const MAX_NESTED_CALLS: usize = 128;

/// Largest index an array element write may use.
pub const MAX_ARRAY_LENGTH: usize = 1 << 24;

/// Initial slot capacity of the global object.
pub const NUM_GLOBAL: usize = 256;

/// Objects that may still be allocated after the heap limit is hit, so the
/// out-of-memory error itself can be constructed.
pub const EMERGENCY_RESERVE: usize = 64;

/// Longest single wait of the event loop when no deadline is set.
pub const EVENT_SLICE: Duration = Duration::from_millis(50);

/// Hash table sizes; the first entry larger than the slot count is used.
pub const HASH_SIZES: &[usize] = &[
    19, 29, 59, 79, 97, 193, 389, 769, 1543, 3079, 6151, 12289, 24593, 49157, 98317, 196613,
];

/// Round a slot count up to the growth increment.
pub fn round_slots(count: usize) -> usize {
    let step = if count > LOTSA_PROP { LOTSA_PROP } else { ROUND_PROP };
    count.div_ceil(step).max(1) * step
}
