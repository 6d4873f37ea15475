//! File-backed page store.
//!
//! Pages are fixed-size slots of a single file. Slot 0 holds the store header;
//! page N lives at offset `N * page_size`:
//! ```text
//! ┌──────────┬──────────┬──────────┬─────────┬──────────┐
//! │  Header  │  Page 1  │  Page 2  │   ...   │  Page N  │
//! └──────────┴──────────┴──────────┴─────────┴──────────┘
//! ```
//! Freed pages are chained into a free list whose head is recorded in the
//! header. Each freed slot stores a [`FreePage`] record pointing at the next
//! free slot, so reopening a store only walks the chain, never the whole file.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use super::{PageId, PageStore};
use crate::constants::{FORMAT_VERSION, FREE_PAGE_MAGIC, MIN_PAGE_SIZE, STORE_MAGIC};
use crate::errors::{IndexError, IndexResult};

/// Header stored in slot 0 of the file
#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoreHeader {
    magic: u32,
    version: u32,
    page_size: u32,
    next_page_id: PageId,
    free_list_head: PageId,
    free_page_count: u64,
}

impl StoreHeader {
    fn new(page_size: u32) -> Self {
        Self {
            magic: STORE_MAGIC,
            version: FORMAT_VERSION,
            page_size,
            next_page_id: 1,
            free_list_head: 0,
            free_page_count: 0,
        }
    }

    fn validate(&self) -> IndexResult<()> {
        if self.magic != STORE_MAGIC {
            return Err(IndexError::CorruptMetadata(
                "invalid page store file (bad magic)".into(),
            ));
        }
        if self.version != FORMAT_VERSION {
            return Err(IndexError::CorruptMetadata(format!(
                "unsupported page store version {}",
                self.version
            )));
        }
        if self.page_size < MIN_PAGE_SIZE {
            return Err(IndexError::CorruptMetadata(format!(
                "page size {} below minimum {}",
                self.page_size, MIN_PAGE_SIZE
            )));
        }
        if self.next_page_id == 0 || self.free_page_count >= self.next_page_id {
            return Err(IndexError::CorruptMetadata(
                "inconsistent page counters in store header".into(),
            ));
        }
        Ok(())
    }
}

/// A free page in the free list chain
#[derive(Debug, Clone, Serialize, Deserialize)]
struct FreePage {
    magic: u32,
    /// Next free page in the chain (0 = end of chain)
    next_free: PageId,
}

/// Page store mapping fixed-size pages onto a single file.
///
/// Every `read`/`write` is one blocking seek plus one page-sized transfer.
/// Writes replace the whole slot; nothing is ever partially rewritten.
pub struct FilePageStore {
    path: PathBuf,
    page_size: u32,
    inner: Mutex<FileInner>,
}

struct FileInner {
    file: File,
    header: StoreHeader,
    /// Mirror of the on-disk free chain, used to reject reads of freed ids
    free: HashSet<PageId>,
}

impl FilePageStore {
    /// Create a new store file, truncating any existing file at `path`.
    pub fn create(path: impl AsRef<Path>, page_size: u32) -> IndexResult<Self> {
        if page_size < MIN_PAGE_SIZE {
            return Err(IndexError::InvalidConfig(format!(
                "page size {} below minimum {}",
                page_size, MIN_PAGE_SIZE
            )));
        }
        let path = path.as_ref();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;

        let mut inner = FileInner {
            file,
            header: StoreHeader::new(page_size),
            free: HashSet::new(),
        };
        inner.write_header()?;
        inner.file.sync_all()?;

        log::debug!("Created page store at {:?} (page size {})", path, page_size);
        Ok(Self {
            path: path.to_path_buf(),
            page_size,
            inner: Mutex::new(inner),
        })
    }

    /// Open an existing store file.
    ///
    /// Only the header and the free chain are read; pages stay on disk.
    pub fn open(path: impl AsRef<Path>) -> IndexResult<Self> {
        let path = path.as_ref();
        let mut file = OpenOptions::new().read(true).write(true).open(path)?;

        let mut buffer = vec![0u8; MIN_PAGE_SIZE as usize];
        file.seek(SeekFrom::Start(0))?;
        file.read_exact(&mut buffer).map_err(|e| {
            IndexError::CorruptMetadata(format!("cannot read store header: {}", e))
        })?;
        let header: StoreHeader = decode(&buffer)
            .map_err(|e| IndexError::CorruptMetadata(format!("store header: {}", e)))?;
        header.validate()?;

        let page_size = header.page_size;
        let mut inner = FileInner {
            file,
            header,
            free: HashSet::new(),
        };
        inner.load_free_list()?;

        log::debug!(
            "Opened page store at {:?} ({} pages, {} free)",
            path,
            inner.header.next_page_id - 1,
            inner.free.len()
        );
        Ok(Self {
            path: path.to_path_buf(),
            page_size,
            inner: Mutex::new(inner),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of freed slots waiting for reuse.
    pub fn free_page_count(&self) -> u64 {
        self.inner.lock().header.free_page_count
    }

    /// Total size of the file in bytes, header slot included.
    pub fn file_size(&self) -> u64 {
        self.inner.lock().header.next_page_id * self.page_size as u64
    }
}

impl FileInner {
    fn page_size(&self) -> u32 {
        self.header.page_size
    }

    fn offset(&self, page_id: PageId) -> u64 {
        page_id * self.page_size() as u64
    }

    fn check_live(&self, page_id: PageId) -> IndexResult<()> {
        if page_id == 0 || page_id >= self.header.next_page_id || self.free.contains(&page_id) {
            return Err(IndexError::PageNotFound(page_id));
        }
        Ok(())
    }

    fn read_slot(&mut self, page_id: PageId) -> IndexResult<Vec<u8>> {
        let offset = self.offset(page_id);
        let mut buffer = vec![0u8; self.page_size() as usize];
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.read_exact(&mut buffer)?;
        Ok(buffer)
    }

    fn write_slot(&mut self, page_id: PageId, data: &[u8]) -> IndexResult<()> {
        let mut padded = data.to_vec();
        padded.resize(self.page_size() as usize, 0);

        let offset = self.offset(page_id);
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.write_all(&padded)?;
        Ok(())
    }

    fn write_header(&mut self) -> IndexResult<()> {
        let bytes = bincode::serde::encode_to_vec(&self.header, bincode::config::legacy())?;
        self.write_slot(0, &bytes)
    }

    fn read_free_page(&mut self, page_id: PageId) -> IndexResult<FreePage> {
        let buffer = self.read_slot(page_id)?;
        let free_page: FreePage = decode(&buffer).map_err(|e| IndexError::CorruptPage {
            page_id,
            reason: format!("free list record: {}", e),
        })?;
        if free_page.magic != FREE_PAGE_MAGIC {
            return Err(IndexError::CorruptPage {
                page_id,
                reason: "page on the free list is not marked free".into(),
            });
        }
        Ok(free_page)
    }

    fn load_free_list(&mut self) -> IndexResult<()> {
        let mut current = self.header.free_list_head;
        while current != 0 {
            if current >= self.header.next_page_id
                || self.free.contains(&current)
                || self.free.len() as u64 >= self.header.free_page_count
            {
                return Err(IndexError::CorruptMetadata(format!(
                    "free list is broken at page {}",
                    current
                )));
            }
            let free_page = self.read_free_page(current)?;
            self.free.insert(current);
            current = free_page.next_free;
        }
        if self.free.len() as u64 != self.header.free_page_count {
            return Err(IndexError::CorruptMetadata(format!(
                "free list holds {} pages, header records {}",
                self.free.len(),
                self.header.free_page_count
            )));
        }
        Ok(())
    }
}

impl PageStore for FilePageStore {
    fn page_size(&self) -> u32 {
        self.page_size
    }

    fn allocate(&self) -> IndexResult<PageId> {
        let mut inner = self.inner.lock();

        let page_id = if inner.header.free_list_head != 0 {
            // Reuse page from free list
            let page_id = inner.header.free_list_head;
            let free_page = inner.read_free_page(page_id)?;
            inner.header.free_list_head = free_page.next_free;
            inner.header.free_page_count = inner.header.free_page_count.saturating_sub(1);
            inner.free.remove(&page_id);
            log::trace!("Reusing free page {}", page_id);
            page_id
        } else {
            let page_id = inner.header.next_page_id;
            inner.header.next_page_id += 1;
            page_id
        };

        inner.write_slot(page_id, &[])?;
        inner.write_header()?;
        Ok(page_id)
    }

    fn read(&self, page_id: PageId) -> IndexResult<Vec<u8>> {
        let mut inner = self.inner.lock();
        inner.check_live(page_id)?;
        inner.read_slot(page_id)
    }

    fn write(&self, page_id: PageId, data: &[u8]) -> IndexResult<()> {
        if data.len() > self.page_size as usize {
            return Err(IndexError::PageOverflow {
                len: data.len(),
                page_size: self.page_size,
            });
        }
        let mut inner = self.inner.lock();
        inner.check_live(page_id)?;
        inner.write_slot(page_id, data)
    }

    fn free(&self, page_id: PageId) -> IndexResult<()> {
        let mut inner = self.inner.lock();
        inner.check_live(page_id)?;

        let free_page = FreePage {
            magic: FREE_PAGE_MAGIC,
            next_free: inner.header.free_list_head,
        };
        let bytes = bincode::serde::encode_to_vec(&free_page, bincode::config::legacy())?;
        inner.write_slot(page_id, &bytes)?;

        inner.header.free_list_head = page_id;
        inner.header.free_page_count += 1;
        inner.free.insert(page_id);
        inner.write_header()
    }

    fn page_count(&self) -> u64 {
        let inner = self.inner.lock();
        inner.header.next_page_id - 1 - inner.header.free_page_count
    }

    fn sync(&self) -> IndexResult<()> {
        self.inner.lock().file.sync_all()?;
        Ok(())
    }
}

fn decode<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> Result<T, String> {
    bincode::serde::decode_from_slice(bytes, bincode::config::legacy())
        .map(|(value, _)| value)
        .map_err(|e| e.to_string())
}
