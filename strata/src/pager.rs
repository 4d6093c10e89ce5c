//! Raw page I/O. Reads and writes fixed-size pages at `page_id * PAGE_SIZE`
//! within a backing file; no caching happens at this layer.

use std::fs::{create_dir_all, OpenOptions};
use std::io::{self, ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::Path;

use crate::{PageId, PAGE_SIZE};

/// Read one page into `buf`. A missing file, or a file shorter than the end
/// of the requested page, yields zeroes for the missing bytes.
pub fn read_page(path: &Path, page_id: PageId, buf: &mut [u8; PAGE_SIZE]) -> io::Result<()> {
    crate::strata_debug_log!("[pager::read_page] {path:?} page {page_id}");
    let mut file = match OpenOptions::new().read(true).open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            buf.fill(0);
            return Ok(());
        }
        Err(e) => return Err(e),
    };

    file.seek(SeekFrom::Start(page_id as u64 * PAGE_SIZE as u64))?;
    let mut read = 0;
    while read < PAGE_SIZE {
        match file.read(&mut buf[read..]) {
            Ok(0) => break,
            Ok(n) => read += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    buf[read..].fill(0);
    Ok(())
}

/// Write one page, creating the file (and its parent directory) if absent and
/// extending it as needed. Writing past the current end leaves a hole; reads
/// of the hole come back zero-filled.
pub fn write_page(path: &Path, page_id: PageId, buf: &[u8; PAGE_SIZE]) -> io::Result<()> {
    crate::strata_debug_log!("[pager::write_page] {path:?} page {page_id}");
    if let Some(parent) = path.parent() {
        create_dir_all(parent)?;
    }
    let mut file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(path)?;

    file.seek(SeekFrom::Start(page_id as u64 * PAGE_SIZE as u64))?;
    file.write_all(buf)?;
    file.sync_all()?;
    Ok(())
}

/// Number of pages the file currently spans on disk (rounding a partial tail
/// page up). Missing files have zero pages.
pub fn page_count(path: &Path) -> io::Result<u32> {
    match std::fs::metadata(path) {
        Ok(meta) => Ok(meta.len().div_ceil(PAGE_SIZE as u64) as u32),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(0),
        Err(e) => Err(e),
    }
}
