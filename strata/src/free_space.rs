//! The per-table free-space map: a packed list of `{page_id, free_slots}`
//! entries persisted in `<table_dir>/free_space.meta` through META pages.
//!
//! The map is advisory. The validity bytes on data pages are the truth; when
//! the two disagree the caller fails the operation instead of writing
//! somewhere else.

use std::path::{Path, PathBuf};

use crate::buffer_pool::{BufferPool, PageTag};
use crate::error::Result;
use crate::{PageId, PAGE_SIZE};

/// On-disk entry size: 4 bytes page id + 2 bytes free-slot count.
const ENTRY_SIZE: usize = 6;
const ENTRIES_PER_PAGE: usize = PAGE_SIZE / ENTRY_SIZE;

pub const FREE_SPACE_FILE: &str = "free_space.meta";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageEntry {
    pub page_id: PageId,
    pub free_slots: u16,
}

/// In-memory view of one table's free-space map.
pub struct FreeSpaceMap {
    meta_path: PathBuf,
    records_per_page: u16,
    entries: Vec<PageEntry>,
}

impl FreeSpaceMap {
    /// `slot_width` includes the validity byte, as reported by the schema.
    pub fn new(table_dir: &Path, slot_width: usize) -> Self {
        FreeSpaceMap {
            meta_path: table_dir.join(FREE_SPACE_FILE),
            records_per_page: (PAGE_SIZE / slot_width) as u16,
            entries: Vec::new(),
        }
    }

    pub fn entries(&self) -> &[PageEntry] {
        &self.entries
    }

    /// Start fresh: a single entry for page 0 with every slot free.
    pub fn initialize(&mut self, pool: &BufferPool) -> Result<()> {
        self.entries.clear();
        self.entries.push(PageEntry {
            page_id: 0,
            free_slots: self.records_per_page,
        });
        crate::strata_debug_log!(
            "[free_space::initialize] {:?} page 0, free_slots={}",
            self.meta_path,
            self.records_per_page
        );
        self.save(pool)
    }

    /// Load entries from META page 0 onward. A zero entry after at least one
    /// real entry is the end sentinel; a zero first entry means the map is
    /// empty.
    pub fn load(&mut self, pool: &BufferPool) -> Result<()> {
        self.entries.clear();
        'pages: for meta_page in 0.. {
            let guard = pool.pin(&self.meta_path, meta_page, PageTag::Meta)?;
            let buf = guard.read();
            for i in 0..ENTRIES_PER_PAGE {
                let at = i * ENTRY_SIZE;
                let page_id = u32::from_le_bytes(buf[at..at + 4].try_into().unwrap());
                let free_slots = u16::from_le_bytes(buf[at + 4..at + 6].try_into().unwrap());
                if page_id == 0 && free_slots == 0 {
                    if self.entries.is_empty() {
                        return Ok(());
                    }
                    break 'pages;
                }
                self.entries.push(PageEntry {
                    page_id,
                    free_slots,
                });
            }
        }
        Ok(())
    }

    /// Rewrite every entry page by page, zero-filling the remainder of each
    /// page. Trailing pages from an earlier, larger map are not truncated;
    /// the zero sentinel keeps `load` from reading them.
    pub fn save(&self, pool: &BufferPool) -> Result<()> {
        let meta_pages = self.entries.len().div_ceil(ENTRIES_PER_PAGE).max(1);
        for meta_page in 0..meta_pages {
            let guard = pool.pin(&self.meta_path, meta_page as PageId, PageTag::Meta)?;
            let mut buf = guard.write();
            buf.fill(0);

            let base = meta_page * ENTRIES_PER_PAGE;
            let limit = (base + ENTRIES_PER_PAGE).min(self.entries.len());
            for (i, entry) in self.entries[base..limit].iter().enumerate() {
                let at = i * ENTRY_SIZE;
                buf[at..at + 4].copy_from_slice(&entry.page_id.to_le_bytes());
                buf[at + 4..at + 6].copy_from_slice(&entry.free_slots.to_le_bytes());
            }
        }
        Ok(())
    }

    /// First page with a free slot, or a freshly appended page id when every
    /// tracked page is full.
    pub fn page_with_free_slot(&mut self, pool: &BufferPool) -> Result<PageId> {
        if let Some(entry) = self.entries.iter().find(|e| e.free_slots > 0) {
            return Ok(entry.page_id);
        }

        let new_id = match self.entries.last() {
            Some(last) => last.page_id + 1,
            None => 0,
        };
        self.entries.push(PageEntry {
            page_id: new_id,
            free_slots: self.records_per_page,
        });
        self.save(pool)?;
        crate::strata_debug_log!("[free_space] appended page {new_id} to {:?}", self.meta_path);
        Ok(new_id)
    }

    /// Decrement the free-slot count for `page_id` (clamped at 0) and save.
    pub fn mark_slot_used(&mut self, pool: &BufferPool, page_id: PageId) -> Result<()> {
        self.adjust(pool, page_id, -1)
    }

    /// Increment the free-slot count for `page_id` (clamped at
    /// `records_per_page`) and save.
    pub fn mark_slot_free(&mut self, pool: &BufferPool, page_id: PageId) -> Result<()> {
        self.adjust(pool, page_id, 1)
    }

    fn adjust(&mut self, pool: &BufferPool, page_id: PageId, delta: i32) -> Result<()> {
        let cap = self.records_per_page;
        match self.entries.iter_mut().find(|e| e.page_id == page_id) {
            Some(entry) => {
                let next = (entry.free_slots as i32 + delta).clamp(0, cap as i32);
                if next == entry.free_slots as i32 {
                    crate::strata_debug_log!(
                        "[free_space] page {page_id} count already at bound {}",
                        entry.free_slots
                    );
                }
                entry.free_slots = next as u16;
            }
            None => {
                crate::strata_debug_log!(
                    "[free_space] page {page_id} not tracked in {:?}",
                    self.meta_path
                );
                return Ok(());
            }
        }
        self.save(pool)
    }
}
