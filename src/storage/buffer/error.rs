use thiserror::Error;

use crate::common::types::PageId;
use crate::storage::disk::DiskManagerError;

#[derive(Error, Debug)]
pub enum BufferPoolError {
    #[error("page {0} not found in buffer pool")]
    PageNotFound(PageId),

    #[error("invalid page ID: {0}")]
    InvalidPageId(PageId),

    #[error("buffer pool is full: no free or evictable frame")]
    BufferPoolFull,

    #[error("disk manager error: {0}")]
    DiskManager(#[from] DiskManagerError),
}
