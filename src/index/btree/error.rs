use thiserror::Error;

use crate::storage::buffer::BufferPoolError;

#[derive(Error, Debug)]
pub enum BTreeError {
    #[error("buffer pool error: {0}")]
    BufferPool(#[from] BufferPoolError),

    #[error("index name {0:?} does not fit the header page")]
    InvalidIndexName(String),

    #[error("header page has no room for another index")]
    HeaderPageFull,

    #[error("node of {entries} entries does not fit a page")]
    NodeTooLarge { entries: usize },
}
