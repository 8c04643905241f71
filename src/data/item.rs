//! Item identity
//!
//! Items are opaque domain values. Identity comes from an associated id so
//! that an updated copy of an item maps to the same key as the original.

use std::fmt::Debug;
use std::hash::Hash;

/// A value that can be shown as a grid row
pub trait GridItem: Clone + Debug + Send + 'static {
    /// Identity used for key mapping, expansion and selection
    type Id: Clone + Eq + Hash + Debug + Send + 'static;

    /// Identity of this item
    fn id(&self) -> Self::Id;
}

macro_rules! self_identified {
    ($($ty:ty),* $(,)?) => {
        $(
            impl GridItem for $ty {
                type Id = $ty;

                fn id(&self) -> Self::Id {
                    self.clone()
                }
            }
        )*
    };
}

self_identified!(String, &'static str, u8, u16, u32, u64, usize, i8, i16, i32, i64, isize, char);
