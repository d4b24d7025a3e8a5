//! Trait, function and class attribute bits
//!
//! The bit values match the attribute words stored in module files, so a
//! section's attribute field converts directly.

use std::fmt;
use std::ops::{BitAnd, BitOr, BitOrAssign, Not};

/// Attribute bitset shared by slot traits, functions and types
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Attributes(u32);

impl Attributes {
    /// Cast null values to the declared type
    pub const CAST_NULLS: Attributes = Attributes(0x1);
    /// Slot was deleted
    pub const DELETED: Attributes = Attributes(0x2);
    /// Slot holds a getter function
    pub const GETTER: Attributes = Attributes(0x4);
    /// Slot cannot be written or redefined
    pub const FIXED: Attributes = Attributes(0x8);
    /// Slot is excluded from enumeration
    pub const HIDDEN: Attributes = Attributes(0x10);
    /// Readonly slot has received its one-time initializer
    pub const INITIALIZED: Attributes = Attributes(0x20);
    /// Slot is readonly after initialization
    pub const READONLY: Attributes = Attributes(0x40);
    /// Slot holds a setter function
    pub const SETTER: Attributes = Attributes(0x80);
    /// Reject null values
    pub const THROW_NULLS: Attributes = Attributes(0x100);
    /// Property carries an initial value
    pub const HAS_VALUE: Attributes = Attributes(0x200);
    /// Function is implemented natively
    pub const NATIVE: Attributes = Attributes(0x400);
    /// Class-level (static) property
    pub const STATIC: Attributes = Attributes(0x800);
    /// Property is enumerable
    pub const ENUMERABLE: Attributes = Attributes(0x1000);

    /// Function is a class constructor
    pub const CONSTRUCTOR: Attributes = Attributes(0x2000);
    /// Function captures its scope chain when closed over
    pub const FULL_SCOPE: Attributes = Attributes(0x4000);
    /// Function has an explicit return
    pub const HAS_RETURN: Attributes = Attributes(0x8000);
    /// Function is an instance initializer
    pub const INITIALIZER: Attributes = Attributes(0x10000);
    /// Function overrides a base method
    pub const OVERRIDE: Attributes = Attributes(0x20000);
    /// Function is a module initializer
    pub const MODULE_INITIALIZER: Attributes = Attributes(0x40000);
    /// Last parameter collects extra arguments
    pub const REST_ARGS: Attributes = Attributes(0x80000);

    /// Class constructor calls `super`
    pub const CALLS_SUPER: Attributes = Attributes(0x10_0000);
    /// Class declares instance variables
    pub const HAS_INSTANCE_VARS: Attributes = Attributes(0x20_0000);
    /// Instances may gain properties at run time
    pub const DYNAMIC_INSTANCES: Attributes = Attributes(0x40_0000);
    /// Class cannot be subclassed
    pub const FINAL: Attributes = Attributes(0x80_0000);
    /// Class awaits fixup
    pub const FIXUP: Attributes = Attributes(0x100_0000);
    /// Class has a constructor
    pub const HAS_CONSTRUCTOR: Attributes = Attributes(0x200_0000);
    /// Class has a static initializer
    pub const HAS_TYPE_INITIALIZER: Attributes = Attributes(0x400_0000);
    /// Type is an interface
    pub const INTERFACE: Attributes = Attributes(0x800_0000);
    /// Function accepts missing or extra arguments
    pub const LOOSE_ARGS: Attributes = Attributes(0x1000_0000);

    /// Bits that describe a slot trait
    pub const TRAIT_MASK: Attributes = Attributes(0xFFFFF);

    /// No bits set
    pub const fn empty() -> Self {
        Attributes(0)
    }

    /// Build from raw bits
    pub const fn from_bits(bits: u32) -> Self {
        Attributes(bits)
    }

    /// Build from a module attribute word, dropping bits beyond 32
    pub fn from_word(word: i64) -> Self {
        Attributes(word as u32)
    }

    /// Raw bits
    pub const fn bits(self) -> u32 {
        self.0
    }

    /// Check whether every bit of `other` is set
    pub const fn contains(self, other: Attributes) -> bool {
        self.0 & other.0 == other.0
    }

    /// Check whether any bit of `other` is set
    pub const fn intersects(self, other: Attributes) -> bool {
        self.0 & other.0 != 0
    }

    /// Set bits
    pub fn insert(&mut self, other: Attributes) {
        self.0 |= other.0;
    }

    /// Clear bits
    pub fn remove(&mut self, other: Attributes) {
        self.0 &= !other.0;
    }

    /// True when no bits are set
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl BitOr for Attributes {
    type Output = Attributes;

    fn bitor(self, rhs: Attributes) -> Attributes {
        Attributes(self.0 | rhs.0)
    }
}

impl BitOrAssign for Attributes {
    fn bitor_assign(&mut self, rhs: Attributes) {
        self.0 |= rhs.0;
    }
}

impl BitAnd for Attributes {
    type Output = Attributes;

    fn bitand(self, rhs: Attributes) -> Attributes {
        Attributes(self.0 & rhs.0)
    }
}

impl Not for Attributes {
    type Output = Attributes;

    fn not(self) -> Attributes {
        Attributes(!self.0)
    }
}

impl fmt::Debug for Attributes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Attributes({:#x})", self.0)
    }
}

/// Exception handler kind bits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HandlerFlags(u8);

impl HandlerFlags {
    /// Catch clause
    pub const CATCH: HandlerFlags = HandlerFlags(0x1);
    /// Finally clause
    pub const FINALLY: HandlerFlags = HandlerFlags(0x2);
    /// Loop exit on `StopIteration`
    pub const ITERATION: HandlerFlags = HandlerFlags(0x4);

    /// Build from raw bits
    pub const fn from_bits(bits: u8) -> Self {
        HandlerFlags(bits)
    }

    /// Check whether every bit of `other` is set
    pub const fn contains(self, other: HandlerFlags) -> bool {
        self.0 & other.0 == other.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bit_operations() {
        let mut attrs = Attributes::READONLY | Attributes::ENUMERABLE;
        assert!(attrs.contains(Attributes::READONLY));
        assert!(!attrs.contains(Attributes::READONLY | Attributes::FIXED));
        assert!(attrs.intersects(Attributes::READONLY | Attributes::FIXED));
        attrs.insert(Attributes::INITIALIZED);
        attrs.remove(Attributes::READONLY);
        assert_eq!(attrs, Attributes::ENUMERABLE | Attributes::INITIALIZED);
    }

    #[test]
    fn test_module_word_conversion() {
        let attrs = Attributes::from_word(0x2000 | 0x40);
        assert!(attrs.contains(Attributes::CONSTRUCTOR));
        assert_eq!(attrs & Attributes::TRAIT_MASK, attrs);
        assert_eq!(
            (Attributes::INTERFACE | Attributes::GETTER) & Attributes::TRAIT_MASK,
            Attributes::GETTER
        );
    }
}
