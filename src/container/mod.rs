pub mod extendible_hash;

pub use extendible_hash::{ExtendibleHashTable, HashKey};
