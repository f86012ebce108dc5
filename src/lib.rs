//! An ordered map backed by a red-black tree.
//!
//! [`TreeMap`] keeps unique keys in `Ord` order with O(log n)
//! search/insert/remove and in-order bidirectional iteration. The balancing
//! engine lives in a private module; the pluggable node-allocation strategy
//! ([`alloc::NodeAllocator`]) is the only other public seam.
//!
//! Single-threaded by design: a map is `Send`/`Sync` when its keys and
//! values are, but mutation requires `&mut`; there is no interior locking.

#![deny(unsafe_op_in_unsafe_fn)]

// the balancing engine
mod tree;

// public surface
pub mod alloc;
pub mod map;

mod error;

pub use error::{Error, InsertError};
pub use map::TreeMap;
