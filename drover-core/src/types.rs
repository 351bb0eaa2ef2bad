//! Worker and iteration numbers.
//!
//! A message value carries the worker and iteration that produced it
//! (`...-vu-2-iter-7`), so both ids render with the same short prefix used
//! in those values and in log fields.

use std::fmt;

/// Declares an id type that prints as `<prefix>-<n>`, the form used inside
/// tagged message values.
macro_rules! define_id {
    ($name:ident, $prefix:expr, $doc:expr) => {
        #[doc = $doc]
        #[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
        #[repr(transparent)]
        pub struct $name(u64);

        impl $name {
            /// Wraps a number taken from a plan or a parsed tag.
            #[inline]
            #[must_use]
            pub const fn new(value: u64) -> Self {
                Self(value)
            }

            /// The number as it appears after the prefix.
            #[inline]
            #[must_use]
            pub const fn get(self) -> u64 {
                self.0
            }

            /// The following worker or iteration.
            ///
            /// # Panics
            /// At `u64::MAX`, which no plan can reach.
            #[inline]
            #[must_use]
            pub const fn next(self) -> Self {
                assert!(self.0 < u64::MAX, "id space exhausted");
                Self(self.0 + 1)
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", $prefix, self.0)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}-{}", $prefix, self.0)
            }
        }

        impl From<u64> for $name {
            fn from(value: u64) -> Self {
                Self::new(value)
            }
        }

        impl From<$name> for u64 {
            fn from(id: $name) -> Self {
                id.get()
            }
        }
    };
}

define_id!(WorkerId, "vu", "Identifier of a worker (virtual user). Worker ids start at 1.");
define_id!(IterationId, "iter", "Identifier of one produce/consume cycle of a worker. Starts at 0.");

impl WorkerId {
    /// The designated writer in single-producer workloads.
    pub const FIRST: Self = Self(1);
}
