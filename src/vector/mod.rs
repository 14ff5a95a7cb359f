//! The vector similarity index.

mod table;

pub use table::{ObjectPointer, VectorHit, VectorIndex};
