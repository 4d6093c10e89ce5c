//! The buffer pool: three fixed-capacity LRU partitions of in-memory frames
//! caching disk pages, selected by the caller's page-intent tag.

use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::error::{Result, StorageError};
use crate::pager;
use crate::{PageId, PAGE_SIZE};

/// Frames reserved for table data pages.
pub const DATA_FRAMES: usize = 110;
/// Frames reserved for B+ tree index pages.
pub const INDEX_FRAMES: usize = 30;
/// Frames reserved for metadata pages (free-space maps, meta.txt).
pub const META_FRAMES: usize = 10;

/// The intent a page is pinned under. Each tag selects an independent LRU
/// partition; callers keep a stable tag per file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PageTag {
    Data,
    Index,
    Meta,
}

impl PageTag {
    fn slot(self) -> usize {
        match self {
            PageTag::Data => 0,
            PageTag::Index => 1,
            PageTag::Meta => 2,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            PageTag::Data => "DATA",
            PageTag::Index => "INDEX",
            PageTag::Meta => "META",
        }
    }
}

/// A page identity: backing file plus page index within it.
pub type PageKey = (PathBuf, PageId);

/// A single frame holding one page's bytes.
#[derive(Debug)]
struct Frame {
    data: RwLock<[u8; PAGE_SIZE]>,
    dirty: Mutex<bool>,
    pin_count: Mutex<u32>,
}

impl Frame {
    fn new() -> Self {
        Frame {
            data: RwLock::new([0; PAGE_SIZE]),
            dirty: Mutex::new(false),
            pin_count: Mutex::new(0),
        }
    }

    fn pins(&self) -> u32 {
        *self.pin_count.lock().unwrap()
    }

    fn is_dirty(&self) -> bool {
        *self.dirty.lock().unwrap()
    }
}

/// One LRU partition: preallocated frames, a hash index from page key to
/// frame, and a recency list (front = MRU).
#[derive(Debug)]
struct Partition {
    name: &'static str,
    frames: Vec<Arc<Frame>>,
    keys: Vec<Option<PageKey>>,
    map: HashMap<PageKey, usize>,
    lru: VecDeque<usize>,
    free: Vec<usize>,
}

impl Partition {
    fn new(name: &'static str, capacity: usize) -> Self {
        let mut frames = Vec::with_capacity(capacity);
        let mut free = Vec::with_capacity(capacity);
        for i in 0..capacity {
            frames.push(Arc::new(Frame::new()));
            free.push(i);
        }
        Partition {
            name,
            frames,
            keys: vec![None; capacity],
            map: HashMap::new(),
            lru: VecDeque::new(),
            free,
        }
    }

    fn touch(&mut self, frame_index: usize) {
        if let Some(pos) = self.lru.iter().position(|&i| i == frame_index) {
            self.lru.remove(pos);
        }
        self.lru.push_front(frame_index);
    }

    /// Free a frame for reuse: scan from the LRU end past pinned frames,
    /// writing the victim back first if it is dirty. An I/O failure leaves
    /// the victim resident with its dirty flag intact.
    fn evict(&mut self) -> Result<usize> {
        let victim = self
            .lru
            .iter()
            .rev()
            .copied()
            .find(|&i| self.frames[i].pins() == 0);
        let Some(frame_index) = victim else {
            return Err(StorageError::PoolFull(self.name));
        };

        let frame = &self.frames[frame_index];
        let key = self.keys[frame_index]
            .clone()
            .expect("occupied frame must carry a key");
        if frame.is_dirty() {
            let data = frame.data.read().unwrap();
            pager::write_page(&key.0, key.1, &data)?;
            *frame.dirty.lock().unwrap() = false;
        }

        if let Some(pos) = self.lru.iter().position(|&i| i == frame_index) {
            self.lru.remove(pos);
        }
        self.map.remove(&key);
        self.keys[frame_index] = None;
        Ok(frame_index)
    }

    fn flush_frame(&self, frame_index: usize) -> Result<()> {
        let frame = &self.frames[frame_index];
        let mut dirty = frame.dirty.lock().unwrap();
        if *dirty {
            let key = self.keys[frame_index]
                .as_ref()
                .expect("occupied frame must carry a key");
            let data = frame.data.read().unwrap();
            pager::write_page(&key.0, key.1, &data)?;
            *dirty = false;
        }
        Ok(())
    }
}

/// Occupancy snapshot of one partition, for operator status output.
#[derive(Debug, Clone)]
pub struct PartitionStatus {
    pub name: &'static str,
    pub capacity: usize,
    pub resident: usize,
    pub pinned: usize,
    pub dirty: usize,
}

/// The partitioned buffer pool. One mutex per partition; operations on the
/// same partition are mutually exclusive, including eviction I/O.
#[derive(Debug)]
pub struct BufferPool {
    partitions: [Mutex<Partition>; 3],
}

impl Default for BufferPool {
    fn default() -> Self {
        Self::new()
    }
}

impl BufferPool {
    pub fn new() -> Self {
        Self::with_capacities(DATA_FRAMES, INDEX_FRAMES, META_FRAMES)
    }

    pub fn with_capacities(data: usize, index: usize, meta: usize) -> Self {
        BufferPool {
            partitions: [
                Mutex::new(Partition::new("DATA", data)),
                Mutex::new(Partition::new("INDEX", index)),
                Mutex::new(Partition::new("META", meta)),
            ],
        }
    }

    /// Pin a page, loading it from disk on a miss. The returned guard keeps
    /// the frame pinned until dropped; `write()` on the guard marks it dirty.
    pub fn pin(&self, path: &Path, page_id: PageId, tag: PageTag) -> Result<FrameGuard<'_>> {
        let mut part = self.partitions[tag.slot()].lock().unwrap();
        let key: PageKey = (path.to_path_buf(), page_id);

        if let Some(&frame_index) = part.map.get(&key) {
            part.touch(frame_index);
            let frame = part.frames[frame_index].clone();
            *frame.pin_count.lock().unwrap() += 1;
            return Ok(FrameGuard {
                pool: self,
                tag,
                key,
                frame,
            });
        }

        let frame_index = match part.free.pop() {
            Some(i) => i,
            None => part.evict()?,
        };
        let frame = part.frames[frame_index].clone();

        {
            let mut data = frame.data.write().unwrap();
            if let Err(e) = pager::read_page(path, page_id, &mut data) {
                part.free.push(frame_index);
                return Err(e.into());
            }
        }
        *frame.dirty.lock().unwrap() = false;
        *frame.pin_count.lock().unwrap() = 1;

        part.map.insert(key.clone(), frame_index);
        part.keys[frame_index] = Some(key.clone());
        part.lru.push_front(frame_index);
        Ok(FrameGuard {
            pool: self,
            tag,
            key,
            frame,
        })
    }

    fn unpin(&self, tag: PageTag, key: &PageKey) {
        let part = self.partitions[tag.slot()].lock().unwrap();
        if let Some(&frame_index) = part.map.get(key) {
            let mut pins = part.frames[frame_index].pin_count.lock().unwrap();
            if *pins > 0 {
                *pins -= 1;
            }
        }
    }

    /// Write one resident dirty page back and clear its flag.
    pub fn flush(&self, path: &Path, page_id: PageId, tag: PageTag) -> Result<()> {
        let part = self.partitions[tag.slot()].lock().unwrap();
        let key: PageKey = (path.to_path_buf(), page_id);
        if let Some(&frame_index) = part.map.get(&key) {
            part.flush_frame(frame_index)?;
        }
        Ok(())
    }

    /// Write back every resident dirty page in every partition.
    pub fn flush_all(&self) -> Result<()> {
        for partition in &self.partitions {
            let part = partition.lock().unwrap();
            let resident: Vec<usize> = part.map.values().copied().collect();
            for frame_index in resident {
                part.flush_frame(frame_index)?;
            }
        }
        Ok(())
    }

    /// Drop every resident frame of `path` from every partition without
    /// writing anything back. For tearing down a deleted file's cache; the
    /// caller guarantees no frame of the file is pinned.
    pub fn discard_file(&self, path: &Path) {
        for partition in &self.partitions {
            let mut part = partition.lock().unwrap();
            let stale: Vec<(PageKey, usize)> = part
                .map
                .iter()
                .filter(|((p, _), _)| p == path)
                .map(|(key, &idx)| (key.clone(), idx))
                .collect();
            for (key, frame_index) in stale {
                part.map.remove(&key);
                part.keys[frame_index] = None;
                if let Some(pos) = part.lru.iter().position(|&i| i == frame_index) {
                    part.lru.remove(pos);
                }
                let frame = &part.frames[frame_index];
                *frame.dirty.lock().unwrap() = false;
                *frame.pin_count.lock().unwrap() = 0;
                part.free.push(frame_index);
            }
        }
    }

    /// Highest page number of `path` currently resident in the partition.
    /// File sizes lag dirty frames, so page-count derivations must fold this
    /// in: `max(on-disk pages, highest_resident_page + 1)`.
    pub fn highest_resident_page(&self, path: &Path, tag: PageTag) -> Option<PageId> {
        let part = self.partitions[tag.slot()].lock().unwrap();
        part.map
            .keys()
            .filter(|(p, _)| p == path)
            .map(|&(_, page_id)| page_id)
            .max()
    }

    /// Per-partition occupancy, for the CLI status view.
    pub fn status(&self) -> Vec<PartitionStatus> {
        self.partitions
            .iter()
            .map(|partition| {
                let part = partition.lock().unwrap();
                let mut pinned = 0;
                let mut dirty = 0;
                for &frame_index in part.map.values() {
                    let frame = &part.frames[frame_index];
                    if frame.pins() > 0 {
                        pinned += 1;
                    }
                    if frame.is_dirty() {
                        dirty += 1;
                    }
                }
                PartitionStatus {
                    name: part.name,
                    capacity: part.frames.len(),
                    resident: part.map.len(),
                    pinned,
                    dirty,
                }
            })
            .collect()
    }
}

/// An RAII pin on one page. Dropping the guard unpins the frame; its LRU
/// position is unchanged by the unpin.
#[derive(Debug)]
pub struct FrameGuard<'a> {
    pool: &'a BufferPool,
    tag: PageTag,
    key: PageKey,
    frame: Arc<Frame>,
}

impl FrameGuard<'_> {
    pub fn page_id(&self) -> PageId {
        self.key.1
    }

    pub fn read(&self) -> RwLockReadGuard<'_, [u8; PAGE_SIZE]> {
        self.frame.data.read().unwrap()
    }

    /// Mutable access to the page bytes; marks the frame dirty.
    pub fn write(&self) -> RwLockWriteGuard<'_, [u8; PAGE_SIZE]> {
        *self.frame.dirty.lock().unwrap() = true;
        self.frame.data.write().unwrap()
    }
}

impl Drop for FrameGuard<'_> {
    fn drop(&mut self) {
        self.pool.unpin(self.tag, &self.key);
    }
}
