//! Error types
//!
//! Script-visible failures are described by [`ErrorKind`] and carried through
//! the interpreter as [`VmError::Raised`] until the unwinder turns them into
//! error objects. Everything a script throws travels as [`VmError::Thrown`]
//! with the value parked in the interpreter.

use strix_bytecode::{ModuleError, VerifyError};
use thiserror::Error;

/// Script error taxonomy; each kind is backed by a core Type of the same name
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Bad argument count or value
    ArgumentError,
    /// Failed assertion
    AssertionError,
    /// Arithmetic failure
    ArithmeticError,
    /// Malformed bytecode
    InstructionError,
    /// Base `Error` type
    GenericError,
    /// VM invariant violated
    InternalError,
    /// Host I/O failure
    IOError,
    /// Heap exhausted
    OutOfMemoryError,
    /// Index or slot out of range
    OutOfBoundsError,
    /// Unknown or unwritable name
    ReferenceError,
    /// Resource limit reached
    ResourceError,
    /// Operation invalid in the current state
    StateError,
    /// Iteration finished
    StopIteration,
    /// Compiler-surfaced syntax problem
    SyntaxError,
    /// Operation applied to the wrong type
    TypeError,
}

impl ErrorKind {
    /// Every kind, in core-type boot order
    pub const ALL: [ErrorKind; 15] = [
        ErrorKind::GenericError,
        ErrorKind::ArgumentError,
        ErrorKind::AssertionError,
        ErrorKind::ArithmeticError,
        ErrorKind::InstructionError,
        ErrorKind::InternalError,
        ErrorKind::IOError,
        ErrorKind::OutOfMemoryError,
        ErrorKind::OutOfBoundsError,
        ErrorKind::ReferenceError,
        ErrorKind::ResourceError,
        ErrorKind::StateError,
        ErrorKind::StopIteration,
        ErrorKind::SyntaxError,
        ErrorKind::TypeError,
    ];

    /// Script name of the backing type
    pub fn type_name(self) -> &'static str {
        match self {
            ErrorKind::ArgumentError => "ArgumentError",
            ErrorKind::AssertionError => "AssertionError",
            ErrorKind::ArithmeticError => "ArithmeticError",
            ErrorKind::InstructionError => "InstructionError",
            ErrorKind::GenericError => "Error",
            ErrorKind::InternalError => "InternalError",
            ErrorKind::IOError => "IOError",
            ErrorKind::OutOfMemoryError => "OutOfMemoryError",
            ErrorKind::OutOfBoundsError => "OutOfBoundsError",
            ErrorKind::ReferenceError => "ReferenceError",
            ErrorKind::ResourceError => "ResourceError",
            ErrorKind::StateError => "StateError",
            ErrorKind::StopIteration => "StopIteration",
            ErrorKind::SyntaxError => "SyntaxError",
            ErrorKind::TypeError => "TypeError",
        }
    }

    /// Position in [`ErrorKind::ALL`]
    pub fn index(self) -> usize {
        Self::ALL.iter().position(|k| *k == self).unwrap_or(0)
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.type_name())
    }
}

/// Property store failures
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PropertyError {
    /// Slot number beyond the store's ceiling
    #[error("Too many properties (slot {0})")]
    SlotExhausted(usize),

    /// Name already defined in another slot
    #[error("Property \"{0}\" is already defined")]
    DuplicateName(String),

    /// Attempt to grow a sealed store
    #[error("Object layout is sealed")]
    ImmutableLayout,

    /// Write to a readonly or fixed slot
    #[error("Property \"{0}\" is not writable")]
    ReadOnlyProperty(String),

    /// Slot outside the used range
    #[error("Slot {0} is out of bounds")]
    OutOfBounds(usize),
}

impl PropertyError {
    /// Script error kind this failure surfaces as
    pub fn kind(&self) -> ErrorKind {
        match self {
            PropertyError::SlotExhausted(_) => ErrorKind::ResourceError,
            PropertyError::DuplicateName(_) | PropertyError::ImmutableLayout => ErrorKind::TypeError,
            PropertyError::ReadOnlyProperty(_) => ErrorKind::ReferenceError,
            PropertyError::OutOfBounds(_) => ErrorKind::OutOfBoundsError,
        }
    }
}

/// Module loading failures
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LoadError {
    /// No module satisfies a dependency
    #[error("Cannot find module {name} (versions {min_version}..={max_version})")]
    MissingDependency {
        /// Module name
        name: String,
        /// Lowest acceptable version
        min_version: i64,
        /// Highest acceptable version
        max_version: i64,
    },

    /// Dependency checksum differs from the loaded module
    #[error("Module {name} has checksum {actual:#x}, dependency requires {expected:#x}")]
    ChecksumMismatch {
        /// Module name
        name: String,
        /// Checksum required by the dependent
        expected: i64,
        /// Checksum of the available module
        actual: i64,
    },

    /// Sections nest incorrectly
    #[error("Malformed module {module}: {reason}")]
    Malformed {
        /// Module name
        module: String,
        /// What went wrong
        reason: String,
    },

    /// Bytecode failed verification
    #[error("Verification failed: {0}")]
    Verify(#[from] VerifyError),

    /// File could not be read
    #[error("Cannot read {path}: {reason}")]
    Io {
        /// Path attempted
        path: String,
        /// OS error text
        reason: String,
    },

    /// Dependency cycle detected
    #[error("Circular dependency on module {0}")]
    Circular(String),

    /// A base type, interface or result type named by a module was never defined
    #[error("Cannot resolve type {name} referenced by {module}")]
    UnresolvedType {
        /// Module name
        module: String,
        /// Qualified type name
        name: String,
    },
}

/// VM execution errors
#[derive(Debug, Clone, Error)]
pub enum VmError {
    /// Script error that has not yet been turned into an error object
    #[error("{kind}: {message}")]
    Raised {
        /// Error kind
        kind: ErrorKind,
        /// Message
        message: String,
    },

    /// A script value was thrown; it is held by the interpreter
    #[error("Uncaught exception: {0}")]
    Thrown(String),

    /// Unrecoverable condition; the interpreter has been aborted
    #[error("Fatal error: {0}")]
    Fatal(String),

    /// The interpreter was aborted by an earlier fatal error
    #[error("Interpreter has been aborted")]
    Aborted,

    /// The interpreter is exiting and stopped executing script code
    #[error("Interpreter is exiting")]
    Exiting,

    /// Module could not be loaded
    #[error("Load error: {0}")]
    Load(#[from] LoadError),

    /// Module file could not be decoded
    #[error("Module error: {0}")]
    Module(#[from] ModuleError),
}

impl VmError {
    /// Build a [`VmError::Raised`]
    pub fn raise(kind: ErrorKind, message: impl Into<String>) -> Self {
        VmError::Raised {
            kind,
            message: message.into(),
        }
    }

    /// Shorthand for a `TypeError`
    pub fn type_error(message: impl Into<String>) -> Self {
        Self::raise(ErrorKind::TypeError, message)
    }

    /// Shorthand for a `ReferenceError`
    pub fn reference_error(message: impl Into<String>) -> Self {
        Self::raise(ErrorKind::ReferenceError, message)
    }

    /// Shorthand for an `ArgumentError`
    pub fn argument_error(message: impl Into<String>) -> Self {
        Self::raise(ErrorKind::ArgumentError, message)
    }

    /// Shorthand for an `InternalError`
    pub fn internal(message: impl Into<String>) -> Self {
        Self::raise(ErrorKind::InternalError, message)
    }

    /// Shorthand for an `InstructionError`
    pub fn instruction(message: impl Into<String>) -> Self {
        Self::raise(ErrorKind::InstructionError, message)
    }

    /// Kind of a raised error
    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            VmError::Raised { kind, .. } => Some(*kind),
            _ => None,
        }
    }

    /// True when the error ends the interpreter rather than the script
    pub fn is_fatal(&self) -> bool {
        matches!(self, VmError::Fatal(_) | VmError::Aborted)
    }
}

impl From<PropertyError> for VmError {
    fn from(err: PropertyError) -> Self {
        VmError::raise(err.kind(), err.to_string())
    }
}

/// VM execution result
pub type VmResult<T> = Result<T, VmError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_property_error_mapping() {
        let err: VmError = PropertyError::ReadOnlyProperty("x".to_string()).into();
        assert_eq!(err.kind(), Some(ErrorKind::ReferenceError));
        let err: VmError = PropertyError::ImmutableLayout.into();
        assert_eq!(err.kind(), Some(ErrorKind::TypeError));
    }

    #[test]
    fn test_kind_index_is_stable() {
        for (i, kind) in ErrorKind::ALL.iter().enumerate() {
            assert_eq!(kind.index(), i);
        }
        assert_eq!(ErrorKind::GenericError.type_name(), "Error");
    }
}
