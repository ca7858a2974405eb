use byteorder::{ByteOrder, LittleEndian};

use crate::common::types::{PageId, PAGE_SIZE};

const RECORD_COUNT_OFFSET: usize = 0;
const RECORDS_OFFSET: usize = 4;

/// Fixed-width name field per record
pub const MAX_NAME_LEN: usize = 32;
const RECORD_SIZE: usize = MAX_NAME_LEN + 4;
const MAX_RECORDS: usize = (PAGE_SIZE - RECORDS_OFFSET) / RECORD_SIZE;

/// Typed view over the header page (page 0), which stores the
/// `index_name -> root_page_id` directory: a record count followed by
/// fixed-width (name, root id) records.
pub struct HeaderPage<B> {
    buf: B,
}

impl<B: AsRef<[u8]>> HeaderPage<B> {
    pub fn new(buf: B) -> Self {
        Self { buf }
    }

    pub fn record_count(&self) -> usize {
        LittleEndian::read_u32(&self.buf.as_ref()[RECORD_COUNT_OFFSET..]) as usize
    }

    /// Look up the root page id recorded for `name`.
    pub fn get_root_id(&self, name: &str) -> Option<PageId> {
        self.position_of(name).map(|i| {
            let offset = RECORDS_OFFSET + i * RECORD_SIZE + MAX_NAME_LEN;
            LittleEndian::read_i32(&self.buf.as_ref()[offset..])
        })
    }

    fn position_of(&self, name: &str) -> Option<usize> {
        let data = self.buf.as_ref();
        (0..self.record_count()).find(|&i| {
            let offset = RECORDS_OFFSET + i * RECORD_SIZE;
            let field = &data[offset..offset + MAX_NAME_LEN];
            let len = field.iter().position(|&b| b == 0).unwrap_or(MAX_NAME_LEN);
            &field[..len] == name.as_bytes()
        })
    }
}

impl<B: AsRef<[u8]> + AsMut<[u8]>> HeaderPage<B> {
    /// Append a record for a new index. Fails when the page is full, the
    /// name does not fit, or the name is already present.
    pub fn insert_record(&mut self, name: &str, root_id: PageId) -> bool {
        if name.len() > MAX_NAME_LEN || name.is_empty() {
            return false;
        }
        if self.position_of(name).is_some() {
            return false;
        }
        let count = self.record_count();
        if count >= MAX_RECORDS {
            return false;
        }

        let offset = RECORDS_OFFSET + count * RECORD_SIZE;
        let data = self.buf.as_mut();
        data[offset..offset + MAX_NAME_LEN].fill(0);
        data[offset..offset + name.len()].copy_from_slice(name.as_bytes());
        LittleEndian::write_i32(&mut data[offset + MAX_NAME_LEN..], root_id);
        LittleEndian::write_u32(&mut data[RECORD_COUNT_OFFSET..], (count + 1) as u32);
        true
    }

    /// Overwrite the root id for an existing record.
    pub fn update_record(&mut self, name: &str, root_id: PageId) -> bool {
        match self.position_of(name) {
            Some(i) => {
                let offset = RECORDS_OFFSET + i * RECORD_SIZE + MAX_NAME_LEN;
                LittleEndian::write_i32(&mut self.buf.as_mut()[offset..], root_id);
                true
            }
            None => false,
        }
    }

    /// Drop a record, compacting the tail over it.
    pub fn delete_record(&mut self, name: &str) -> bool {
        let Some(i) = self.position_of(name) else {
            return false;
        };
        let count = self.record_count();
        let start = RECORDS_OFFSET + (i + 1) * RECORD_SIZE;
        let end = RECORDS_OFFSET + count * RECORD_SIZE;
        let dest = RECORDS_OFFSET + i * RECORD_SIZE;
        let data = self.buf.as_mut();
        data.copy_within(start..end, dest);
        LittleEndian::write_u32(&mut data[RECORD_COUNT_OFFSET..], (count - 1) as u32);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::types::INVALID_PAGE_ID;

    #[test]
    fn test_insert_and_lookup() {
        let mut buf = [0u8; PAGE_SIZE];
        let mut header = HeaderPage::new(&mut buf[..]);
        assert!(header.insert_record("orders_pk", 3));
        assert!(header.insert_record("orders_date_idx", INVALID_PAGE_ID));
        assert!(!header.insert_record("orders_pk", 9));

        assert_eq!(header.get_root_id("orders_pk"), Some(3));
        assert_eq!(header.get_root_id("orders_date_idx"), Some(INVALID_PAGE_ID));
        assert_eq!(header.get_root_id("missing"), None);
    }

    #[test]
    fn test_update_record() {
        let mut buf = [0u8; PAGE_SIZE];
        let mut header = HeaderPage::new(&mut buf[..]);
        assert!(header.insert_record("idx", 5));
        assert!(header.update_record("idx", 12));
        assert_eq!(header.get_root_id("idx"), Some(12));
        assert!(!header.update_record("missing", 1));
    }

    #[test]
    fn test_delete_record_compacts() {
        let mut buf = [0u8; PAGE_SIZE];
        let mut header = HeaderPage::new(&mut buf[..]);
        header.insert_record("a", 1);
        header.insert_record("b", 2);
        header.insert_record("c", 3);
        assert!(header.delete_record("b"));
        assert_eq!(header.record_count(), 2);
        assert_eq!(header.get_root_id("a"), Some(1));
        assert_eq!(header.get_root_id("b"), None);
        assert_eq!(header.get_root_id("c"), Some(3));
    }

    #[test]
    fn test_name_too_long_rejected() {
        let mut buf = [0u8; PAGE_SIZE];
        let mut header = HeaderPage::new(&mut buf[..]);
        let long = "x".repeat(MAX_NAME_LEN + 1);
        assert!(!header.insert_record(&long, 1));
    }
}
