#[cfg(feature = "mimalloc")]
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

pub mod cache;
pub mod codec;
pub mod config;
pub mod core;
pub mod error;
pub mod server;
pub mod stats;
pub mod store;
pub mod visit_cache;

pub use crate::core::{BlobSet, CompressedBlobSet, KeySet, Position};
pub use error::{Error, Result};
pub use stats::CacheStats;
pub use visit_cache::VisitCache;
