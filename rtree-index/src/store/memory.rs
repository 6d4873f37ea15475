use parking_lot::RwLock;
use std::collections::HashMap;

use super::{PageId, PageStore};
use crate::errors::{IndexError, IndexResult};

/// Volatile page store backed by a hash map.
pub struct MemoryPageStore {
    page_size: u32,
    inner: RwLock<MemoryPages>,
}

struct MemoryPages {
    pages: HashMap<PageId, Vec<u8>>,
    free: Vec<PageId>,
    next_page_id: PageId,
}

impl MemoryPageStore {
    pub fn new(page_size: u32) -> Self {
        Self {
            page_size,
            inner: RwLock::new(MemoryPages {
                pages: HashMap::new(),
                free: Vec::new(),
                next_page_id: 1,
            }),
        }
    }

    /// Number of freed ids waiting for reuse.
    pub fn free_page_count(&self) -> usize {
        self.inner.read().free.len()
    }
}

impl PageStore for MemoryPageStore {
    fn page_size(&self) -> u32 {
        self.page_size
    }

    fn allocate(&self) -> IndexResult<PageId> {
        let mut inner = self.inner.write();
        let page_id = match inner.free.pop() {
            Some(page_id) => page_id,
            None => {
                let page_id = inner.next_page_id;
                inner.next_page_id += 1;
                page_id
            }
        };
        inner
            .pages
            .insert(page_id, vec![0u8; self.page_size as usize]);
        Ok(page_id)
    }

    fn read(&self, page_id: PageId) -> IndexResult<Vec<u8>> {
        self.inner
            .read()
            .pages
            .get(&page_id)
            .cloned()
            .ok_or(IndexError::PageNotFound(page_id))
    }

    fn write(&self, page_id: PageId, data: &[u8]) -> IndexResult<()> {
        if data.len() > self.page_size as usize {
            return Err(IndexError::PageOverflow {
                len: data.len(),
                page_size: self.page_size,
            });
        }
        let mut inner = self.inner.write();
        let page = inner
            .pages
            .get_mut(&page_id)
            .ok_or(IndexError::PageNotFound(page_id))?;
        page[..data.len()].copy_from_slice(data);
        page[data.len()..].fill(0);
        Ok(())
    }

    fn free(&self, page_id: PageId) -> IndexResult<()> {
        let mut inner = self.inner.write();
        if inner.pages.remove(&page_id).is_none() {
            return Err(IndexError::PageNotFound(page_id));
        }
        inner.free.push(page_id);
        Ok(())
    }

    fn page_count(&self) -> u64 {
        self.inner.read().pages.len() as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allocate_starts_at_one() {
        let store = MemoryPageStore::new(64);
        assert_eq!(store.allocate().unwrap(), 1);
        assert_eq!(store.allocate().unwrap(), 2);
        assert_eq!(store.page_count(), 2);
    }

    #[test]
    fn test_write_and_read_pads_page() {
        let store = MemoryPageStore::new(64);
        let page_id = store.allocate().unwrap();
        store.write(page_id, &[1, 2, 3]).unwrap();

        let page = store.read(page_id).unwrap();
        assert_eq!(page.len(), 64);
        assert_eq!(&page[..3], &[1, 2, 3]);
        assert!(page[3..].iter().all(|b| *b == 0));
    }

    #[test]
    fn test_write_is_whole_page_overwrite() {
        let store = MemoryPageStore::new(16);
        let page_id = store.allocate().unwrap();
        store.write(page_id, &[9u8; 16]).unwrap();
        store.write(page_id, &[1]).unwrap();

        let page = store.read(page_id).unwrap();
        assert_eq!(page[0], 1);
        assert!(page[1..].iter().all(|b| *b == 0));
    }

    #[test]
    fn test_read_unallocated_fails() {
        let store = MemoryPageStore::new(64);
        assert!(matches!(store.read(5), Err(IndexError::PageNotFound(5))));
        assert!(matches!(
            store.write(5, &[0]),
            Err(IndexError::PageNotFound(5))
        ));
    }

    #[test]
    fn test_freed_page_not_readable_and_reused() {
        let store = MemoryPageStore::new(64);
        let a = store.allocate().unwrap();
        let _b = store.allocate().unwrap();
        store.free(a).unwrap();

        assert!(matches!(store.read(a), Err(IndexError::PageNotFound(_))));
        assert_eq!(store.free_page_count(), 1);
        assert_eq!(store.allocate().unwrap(), a);
        assert_eq!(store.free_page_count(), 0);
    }

    #[test]
    fn test_double_free_fails() {
        let store = MemoryPageStore::new(64);
        let a = store.allocate().unwrap();
        store.free(a).unwrap();
        assert!(store.free(a).is_err());
    }

    #[test]
    fn test_oversized_write_rejected() {
        let store = MemoryPageStore::new(8);
        let page_id = store.allocate().unwrap();
        assert!(matches!(
            store.write(page_id, &[0u8; 9]),
            Err(IndexError::PageOverflow { len: 9, page_size: 8 })
        ));
    }
}
