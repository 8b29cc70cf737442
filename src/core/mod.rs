pub mod blob_set;
pub mod compressed;
pub mod key_set;

pub use blob_set::{BlobSet, Position};
pub use compressed::CompressedBlobSet;
pub use key_set::KeySet;
