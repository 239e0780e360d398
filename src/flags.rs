//! Bit-level flag containers and the one-byte move flag encoding shared by client and server.

use num_traits::{One, PrimInt};

/// Implemented by flag enums whose discriminant is the bit index.
pub trait FlagBitmask {
    type Storage: PrimInt;

    fn bit_index(&self) -> u8;

    fn mask(&self) -> Self::Storage {
        // NOTE: `bit_index()` must stay below the bit width of `Storage`.
        Self::Storage::one() << (self.bit_index() as usize)
    }
}

/// A plain bitmask over some integer storage.
#[derive(Default, Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct BitmaskFlags<T: PrimInt> {
    pub bits: T,
}

impl<T: PrimInt> BitmaskFlags<T> {
    pub fn new(bits: T) -> Self {
        Self { bits }
    }

    pub fn add<U: FlagBitmask<Storage = T>>(&mut self, tag: U) {
        self.bits = self.bits | tag.mask();
    }

    pub fn remove<U: FlagBitmask<Storage = T>>(&mut self, tag: U) {
        self.bits = self.bits & !tag.mask();
    }

    pub fn set<U: FlagBitmask<Storage = T>>(&mut self, tag: U, on: bool) {
        if on {
            self.add(tag);
        } else {
            self.remove(tag);
        }
    }

    pub fn has<U: FlagBitmask<Storage = T>>(&self, tag: U) -> bool {
        (self.bits & tag.mask()) != T::zero()
    }

    pub fn has_any<U: FlagBitmask<Storage = T> + Copy>(&self, tags: &[U]) -> bool {
        let combined = tags.iter().fold(T::zero(), |acc, t| acc | t.mask());
        (self.bits & combined) != T::zero()
    }

    pub fn clear(&mut self) {
        self.bits = T::zero();
    }
}

/// Declare a flag enum with explicit bit indices and implement [`FlagBitmask`] for it.
///
/// ```rust,ignore
/// define_bitmask_flags!(Status, u16, {
///     Friendly = 0,
///     Stunned = 3,
/// });
/// ```
#[macro_export]
macro_rules! define_bitmask_flags {
    ($(#[$meta:meta])* $name:ident, $storage:ty, { $($variant:ident = $index:literal),* $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        #[repr(u8)]
        pub enum $name {
            $($variant = $index),*
        }

        impl $crate::flags::FlagBitmask for $name {
            type Storage = $storage;

            fn bit_index(&self) -> u8 {
                *self as u8
            }
        }
    };
}

define_bitmask_flags!(
    /// Bits of the compressed move flag byte. The layout is part of the wire contract:
    /// never renumber a variant.
    MoveFlag, u8, {
        WantsSprint = 0,
        WantsDive = 1,
        WantsHook = 2,
        JumpPressed = 4,
        WantsCrouch = 5,
    }
);

/// The intents carried by a saved move, packed into one byte for the wire.
pub type CompressedFlags = BitmaskFlags<u8>;

impl CompressedFlags {
    /// Bits owned by this crate's custom intents (sprint, dive, hook).
    pub const CUSTOM_MASK: u8 = 0b0000_0111;

    pub fn custom_bits(&self) -> u8 {
        self.bits & Self::CUSTOM_MASK
    }
}
