//! Tagged runtime values and the arena that backs heap references.
//!
//! Everything the runtime touches is a [`Value`]. Scalars are stored inline;
//! heap data lives in an [`Arena`] and is reached through an [`ArenaRef`].
//! Values are `Copy`: duplicating one never duplicates the heap block it
//! points at.

mod arena;
mod value;

pub use arena::{Arena, ArenaError, ArenaRef, ArenaStats, WORD_BYTES};
pub use value::{Value, ValueKind};
