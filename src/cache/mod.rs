pub mod bounded;
pub mod lru;
pub mod subset_index;

pub use bounded::BoundedCompositeKeyCache;
pub use lru::{ByteLru, LruHooks, NoHooks};
pub use subset_index::SubsetIndex;
