//! Handle and process identifier types.

use core::fmt;

/// Raw value of the invalid (null) handle.
pub const INVALID_HANDLE: u32 = 0;

/// Internal macro to generate `u32` newtypes for kernel identifiers.
macro_rules! define_id_type {
    {
        $(#[$meta:meta])* $vis:vis struct $name:ident
    } => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
        #[repr(transparent)]
        $vis struct $name(u32);

        impl $name {
            #[doc = concat!("Creates a [`", stringify!($name), "`] from its raw value.")]
            #[inline]
            pub const fn from_raw(raw: u32) -> Self {
                Self(raw)
            }

            #[doc = concat!("Returns the raw value of the [`", stringify!($name), "`].")]
            #[inline]
            pub const fn to_raw(self) -> u32 {
                self.0
            }
        }

        impl ::core::cmp::PartialEq<u32> for $name {
            fn eq(&self, other: &u32) -> bool {
                &self.0 == other
            }
        }

        impl ::core::cmp::PartialEq<$name> for u32 {
            fn eq(&self, other: &$name) -> bool {
                self == &other.0
            }
        }

        impl ::core::fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{:#x}", self.0)
            }
        }
    };
}

define_id_type! {
    /// A handle in a process's handle table.
    ///
    /// Handles are opaque to the IPC layer: a handle value read from a command
    /// buffer only means something once the kernel resolves it.
    pub struct Handle
}

impl Handle {
    /// The invalid (null) handle.
    pub const INVALID: Self = Self(INVALID_HANDLE);

    /// Returns `true` if the handle is not the null handle.
    #[inline]
    pub const fn is_valid(&self) -> bool {
        self.0 != INVALID_HANDLE
    }
}

define_id_type! {
    /// Identifier of an emulated process.
    pub struct ProcessId
}
