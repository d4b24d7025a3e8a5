//! Interpreter configuration

use crate::defaults;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};

/// Unique identifier for an interpreter instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InterpreterId(u64);

impl InterpreterId {
    /// Create a new unique interpreter ID
    pub fn new() -> Self {
        static NEXT_ID: AtomicU64 = AtomicU64::new(1);
        InterpreterId(NEXT_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl Default for InterpreterId {
    fn default() -> Self {
        Self::new()
    }
}

/// How the embedding reacts to fatal conditions and uncaught exceptions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HostMode {
    /// Return control to the host
    #[default]
    Embedded,
    /// Terminate the process with a nonzero status
    Standalone,
}

/// Module loader flags
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LoadFlags(u32);

impl LoadFlags {
    /// Verify checksums and bytecode before instantiating
    pub const STRICT: LoadFlags = LoadFlags(0x1);
    /// Do not run module initializers
    pub const NO_INIT: LoadFlags = LoadFlags(0x2);
    /// Never evict the module from the shared cache
    pub const ETERNAL: LoadFlags = LoadFlags(0x4);
    /// Module is part of the core runtime
    pub const BUILTIN: LoadFlags = LoadFlags(0x8);
    /// Module is being loaded as a dependency
    pub const DEP: LoadFlags = LoadFlags(0x10);
    /// Load again even if already loaded
    pub const RELOAD: LoadFlags = LoadFlags(0x20);

    /// No flags
    pub const fn empty() -> Self {
        LoadFlags(0)
    }

    /// Raw bits
    pub fn bits(self) -> u32 {
        self.0
    }

    /// Check whether all bits of `other` are set
    pub fn contains(self, other: LoadFlags) -> bool {
        self.0 & other.0 == other.0
    }

    /// Copy with the bits of `other` cleared
    pub fn without(self, other: LoadFlags) -> Self {
        LoadFlags(self.0 & !other.0)
    }
}

impl std::ops::BitOr for LoadFlags {
    type Output = LoadFlags;

    fn bitor(self, rhs: LoadFlags) -> LoadFlags {
        LoadFlags(self.0 | rhs.0)
    }
}

/// Resource limits for an interpreter
#[derive(Debug, Clone, Default)]
pub struct ResourceLimits {
    /// Maximum number of live heap objects (None = unlimited)
    pub max_heap_objects: Option<usize>,
}

impl ResourceLimits {
    /// Create unlimited resource limits
    pub fn unlimited() -> Self {
        Self::default()
    }

    /// Create resource limits with a specific object ceiling
    pub fn with_heap_limit(max_heap_objects: usize) -> Self {
        Self {
            max_heap_objects: Some(max_heap_objects),
        }
    }
}

/// Options for creating an interpreter
#[derive(Debug, Clone)]
pub struct VmOptions {
    /// Resource limits
    pub limits: ResourceLimits,

    /// Nested call ceiling
    pub max_recursion: usize,

    /// Allocations between collection requests
    pub gc_quota: usize,

    /// Initial slot capacity of the global object
    pub global_slots: usize,

    /// Directories searched for `<name>.mod` when resolving dependencies
    pub search_paths: Vec<PathBuf>,

    /// Default loader flags
    pub load_flags: LoadFlags,

    /// Keep documentation sections
    pub load_docs: bool,

    /// Embedded or standalone behavior
    pub mode: HostMode,
}

impl Default for VmOptions {
    fn default() -> Self {
        Self {
            limits: ResourceLimits::default(),
            max_recursion: defaults::MAX_RECURSION,
            gc_quota: defaults::GC_WORK_QUOTA,
            global_slots: defaults::NUM_GLOBAL,
            search_paths: Vec::new(),
            load_flags: LoadFlags::empty(),
            load_docs: false,
            mode: HostMode::Embedded,
        }
    }
}

impl VmOptions {
    /// Skip module initializers by default
    pub fn no_init(mut self) -> Self {
        self.load_flags = self.load_flags | LoadFlags::NO_INIT;
        self
    }
}
