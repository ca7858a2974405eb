use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use parking_lot::Mutex;
use thiserror::Error;

use crate::common::types::{PageId, HEADER_PAGE_ID, PAGE_SIZE};

#[derive(Error, Debug)]
pub enum DiskManagerError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid page ID: {0}")]
    InvalidPageId(PageId),
}

struct DiskState {
    db_file: File,
    next_page_id: PageId,
    free_page_ids: Vec<PageId>,
}

/// DiskManager handles the raw page I/O against the database file: reading
/// and writing page-sized slots indexed by page id, and handing out page ids.
///
/// Page 0 is reserved for the header page and is never returned by
/// `allocate_page`.
pub struct DiskManager {
    state: Mutex<DiskState>,
}

impl DiskManager {
    /// Open (or create) the database file at `db_path`.
    pub fn new(db_path: impl AsRef<Path>) -> Result<Self, DiskManagerError> {
        let db_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(db_path)?;

        // Seed the allocator past whatever the file already holds so ids
        // stay monotone across reopens.
        let file_size = db_file.metadata()?.len();
        let pages_on_disk = (file_size as usize + PAGE_SIZE - 1) / PAGE_SIZE;
        let next_page_id = (pages_on_disk as PageId).max(HEADER_PAGE_ID + 1);

        Ok(Self {
            state: Mutex::new(DiskState {
                db_file,
                next_page_id,
                free_page_ids: Vec::new(),
            }),
        })
    }

    /// Read a page into `buf`. Reading past the end of the file yields a
    /// zeroed page, matching what a freshly allocated page looks like.
    pub fn read_page(&self, page_id: PageId, buf: &mut [u8; PAGE_SIZE]) -> Result<(), DiskManagerError> {
        if page_id < 0 {
            return Err(DiskManagerError::InvalidPageId(page_id));
        }
        let offset = page_id as u64 * PAGE_SIZE as u64;
        let mut state = self.state.lock();

        let file_size = state.db_file.metadata()?.len();
        if offset >= file_size {
            buf.fill(0);
            return Ok(());
        }

        state.db_file.seek(SeekFrom::Start(offset))?;
        if file_size - offset < PAGE_SIZE as u64 {
            // Partial trailing page: read what is there, zero the rest.
            buf.fill(0);
            let available = (file_size - offset) as usize;
            state.db_file.read_exact(&mut buf[..available])?;
        } else {
            state.db_file.read_exact(buf)?;
        }
        Ok(())
    }

    /// Write a page's bytes to its slot in the file.
    pub fn write_page(&self, page_id: PageId, buf: &[u8; PAGE_SIZE]) -> Result<(), DiskManagerError> {
        if page_id < 0 {
            return Err(DiskManagerError::InvalidPageId(page_id));
        }
        let offset = page_id as u64 * PAGE_SIZE as u64;
        let mut state = self.state.lock();
        state.db_file.seek(SeekFrom::Start(offset))?;
        state.db_file.write_all(buf)?;
        state.db_file.flush()?;
        Ok(())
    }

    /// Hand out a page id, reusing deallocated ids before extending the
    /// id space.
    pub fn allocate_page(&self) -> PageId {
        let mut state = self.state.lock();
        if let Some(page_id) = state.free_page_ids.pop() {
            return page_id;
        }
        let page_id = state.next_page_id;
        state.next_page_id += 1;
        page_id
    }

    /// Return a page id to the allocator.
    pub fn deallocate_page(&self, page_id: PageId) {
        if page_id <= HEADER_PAGE_ID {
            return;
        }
        let mut state = self.state.lock();
        if !state.free_page_ids.contains(&page_id) {
            state.free_page_ids.push(page_id);
        }
    }

    /// Flush the database file to stable storage.
    pub fn shut_down(&self) -> Result<(), DiskManagerError> {
        let state = self.state.lock();
        state.db_file.sync_all()?;
        Ok(())
    }
}
