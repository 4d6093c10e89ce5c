//! The record store: row-level operations over one table, combining the
//! slotted data file, the free-space map and the unique-key B+ trees.
//! Schemas and index trees are loaded per operation through the catalog and
//! the buffer pool; free-space maps stay loaded per table.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::btree::BTree;
use crate::buffer_pool::{BufferPool, PageTag};
use crate::error::{fatal, Result, StorageError};
use crate::free_space::FreeSpaceMap;
use crate::page;
use crate::schema::{Catalog, FieldType, Schema};
use crate::{pager, PageId, RowOffset, PAGE_SIZE};

pub const DATA_FILE: &str = "data.tbl";

/// A decoded row: one string per field.
pub type Row = Vec<String>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    Deleted,
    NotFound,
}

pub struct RecordStore {
    pool: Arc<BufferPool>,
    catalog: Arc<dyn Catalog>,
    // Free-space maps stay loaded per table. A map whose first page runs
    // completely dry persists as an all-zero entry, which a fresh load reads
    // as the end sentinel; keeping the loaded map authoritative for the
    // process sidesteps that, and the mutex serializes slot handout between
    // concurrent inserts.
    free_maps: Mutex<HashMap<String, FreeSpaceMap>>,
}

/// Encode values into the fixed-width payload layout of a slot (everything
/// after the validity byte): each field zero-padded and truncated to its
/// declared length.
pub fn encode_payload(schema: &Schema, values: &[String]) -> Vec<u8> {
    let mut payload = vec![0u8; schema.slot_width() - 1];
    for (index, (field, value)) in schema.fields().iter().zip(values).enumerate() {
        let start = schema.field_offset(index) - 1;
        let bytes = value.as_bytes();
        let take = bytes.len().min(field.len);
        payload[start..start + take].copy_from_slice(&bytes[..take]);
    }
    payload
}

impl RecordStore {
    pub fn new(pool: Arc<BufferPool>, catalog: Arc<dyn Catalog>) -> Self {
        RecordStore {
            pool,
            catalog,
            free_maps: Mutex::new(HashMap::new()),
        }
    }

    pub fn pool(&self) -> &Arc<BufferPool> {
        &self.pool
    }

    /// Drop cached per-table state (after the table is dropped or replaced).
    pub fn forget_table(&self, table: &str) {
        self.free_maps.lock().unwrap().remove(table);
    }

    /// The loaded free-space map for `table`, reading it from disk on first
    /// use. The returned guard serializes slot handout across threads.
    fn free_map_for(
        &self,
        table: &str,
        schema: &Schema,
    ) -> Result<MutexGuard<'_, HashMap<String, FreeSpaceMap>>> {
        let mut maps = self.free_maps.lock().unwrap();
        if let Entry::Vacant(vacant) = maps.entry(table.to_string()) {
            let mut fsm = FreeSpaceMap::new(&self.catalog.table_dir(table), schema.slot_width());
            fsm.load(&self.pool)?;
            vacant.insert(fsm);
        }
        Ok(maps)
    }

    fn data_path(&self, table: &str) -> PathBuf {
        self.catalog.table_dir(table).join(DATA_FILE)
    }

    fn index_path(&self, table: &str, field: &str) -> PathBuf {
        self.catalog.table_dir(table).join(format!("{field}.idx"))
    }

    fn open_index(&self, table: &str, field: &str) -> Result<BTree> {
        BTree::open(self.index_path(table, field), &self.pool)
    }

    /// Pages the data file spans, counting frames not yet written back.
    fn data_page_horizon(&self, table: &str) -> Result<u32> {
        let path = self.data_path(table);
        let on_disk = pager::page_count(&path)?;
        let resident = self
            .pool
            .highest_resident_page(&path, PageTag::Data)
            .map_or(0, |p| p + 1);
        Ok(on_disk.max(resident))
    }

    fn validate(&self, schema: &Schema, values: &[String]) -> Result<()> {
        if values.len() != schema.fields().len() {
            return Err(StorageError::logic(format!(
                "expected {} values, got {}",
                schema.fields().len(),
                values.len()
            )));
        }
        for (field, value) in schema.fields().iter().zip(values) {
            if field.ty == FieldType::Int && value.parse::<i64>().is_err() {
                return Err(StorageError::logic(format!(
                    "invalid integer '{value}' for field {}",
                    field.name
                )));
            }
        }
        Ok(())
    }

    /// Insert a row, returning its offset. Rejects duplicates on any unique
    /// key before touching the data file.
    pub fn insert(&self, table: &str, values: &[String]) -> Result<RowOffset> {
        let schema = self.catalog.schema(table)?;
        self.validate(&schema, values)?;

        for key in schema.unique_keys() {
            let index = schema.field_index(key).ok_or_else(|| {
                StorageError::logic(format!("unique key {key} missing from schema of {table}"))
            })?;
            let tree = self.open_index(table, key)?;
            if tree.search(&self.pool, &values[index])?.is_some() {
                return Err(StorageError::DuplicateKey {
                    field: key.clone(),
                    value: values[index].clone(),
                });
            }
        }

        let data_path = self.data_path(table);
        let (page_id, slot) = {
            let mut maps = self.free_map_for(table, &schema)?;
            let fsm = maps.get_mut(table).expect("free map was just loaded");
            let page_id = fsm.page_with_free_slot(&self.pool)?;

            let guard = self.pool.pin(&data_path, page_id, PageTag::Data)?;
            let slot = page::find_free_slot(&guard.read(), schema.slot_width());
            let Some(slot) = slot else {
                return Err(StorageError::Inconsistent {
                    table: table.to_string(),
                    page_id,
                });
            };
            page::write_slot(&mut guard.write(), slot, values, &schema);
            fsm.mark_slot_used(&self.pool, page_id)?;
            (page_id, slot)
        };
        let offset = page_id as RowOffset * PAGE_SIZE as RowOffset
            + (slot * schema.slot_width()) as RowOffset;

        // The slot is live from here on; every unique index must gain its
        // entry or the row must go away again.
        let mut inserted: Vec<&String> = Vec::new();
        for key in schema.unique_keys() {
            let index = schema.field_index(key).unwrap();
            let mut tree = self.open_index(table, key)?;
            if let Err(e) = tree.insert(&self.pool, &values[index], offset) {
                self.undo_partial_insert(table, &schema, page_id, slot, &inserted)
                    .unwrap_or_else(|_| {
                        fatal(
                            &self.pool,
                            &format!("cannot undo half-indexed insert at offset {offset} of {table}"),
                        )
                    });
                return Err(e);
            }
            inserted.push(key);
        }

        crate::strata_debug_log!("[record] inserted into {table} at offset {offset}");
        Ok(offset)
    }

    fn undo_partial_insert(
        &self,
        table: &str,
        schema: &Schema,
        page_id: PageId,
        slot: usize,
        indexed: &[&String],
    ) -> Result<()> {
        let values = {
            let guard = self
                .pool
                .pin(&self.data_path(table), page_id, PageTag::Data)?;
            let values = page::read_slot(&guard.read(), slot, schema);
            page::mark_deleted(&mut guard.write(), slot, schema.slot_width());
            values
        };
        {
            let mut maps = self.free_map_for(table, schema)?;
            let fsm = maps.get_mut(table).expect("free map was just loaded");
            fsm.mark_slot_free(&self.pool, page_id)?;
        }

        if let Some(values) = values {
            for key in indexed {
                let index = schema.field_index(key).unwrap();
                let mut tree = self.open_index(table, key)?;
                tree.remove(&self.pool, &values[index])?;
            }
        }
        Ok(())
    }

    fn locate(schema: &Schema, offset: RowOffset) -> (PageId, usize) {
        let page_id = (offset / PAGE_SIZE as RowOffset) as PageId;
        let slot = (offset % PAGE_SIZE as RowOffset) as usize / schema.slot_width();
        (page_id, slot)
    }

    fn read_row_at(&self, table: &str, schema: &Schema, offset: RowOffset) -> Result<Option<Row>> {
        let (page_id, slot) = Self::locate(schema, offset);
        let guard = self
            .pool
            .pin(&self.data_path(table), page_id, PageTag::Data)?;
        let result = page::read_slot(&guard.read(), slot, schema);
        Ok(result)
    }

    /// Find one row by field value. A unique key goes through its B+ tree; a
    /// deleted-but-still-probed slot yields `None`. Any other field falls
    /// back to a full scan and returns the first match in page order.
    pub fn find(&self, table: &str, field: &str, value: &str) -> Result<Option<Row>> {
        let schema = self.catalog.schema(table)?;
        let field_index = schema
            .field_index(field)
            .ok_or_else(|| StorageError::logic(format!("field {field} not in schema of {table}")))?;

        if schema.is_unique_key(field) {
            let tree = self.open_index(table, field)?;
            let Some(offset) = tree.search(&self.pool, value)? else {
                return Ok(None);
            };
            return self.read_row_at(table, &schema, offset);
        }

        let horizon = self.data_page_horizon(table)?;
        let data_path = self.data_path(table);
        for page_id in 0..horizon {
            let guard = self.pool.pin(&data_path, page_id, PageTag::Data)?;
            let buf = guard.read();
            for slot in 0..schema.records_per_page() {
                if let Some(row) = page::read_slot(&buf, slot, &schema) {
                    if row[field_index] == value {
                        return Ok(Some(row));
                    }
                }
            }
        }
        Ok(None)
    }

    /// Delete one row by unique key.
    pub fn delete(&self, table: &str, field: &str, value: &str) -> Result<DeleteOutcome> {
        let schema = self.catalog.schema(table)?;
        if !schema.is_unique_key(field) {
            return Err(StorageError::logic(format!(
                "delete requires a unique field; {field} is not one"
            )));
        }

        let mut tree = self.open_index(table, field)?;
        let Some(offset) = tree.search(&self.pool, value)? else {
            return Ok(DeleteOutcome::NotFound);
        };
        tree.remove(&self.pool, value)?;

        let (page_id, slot) = Self::locate(&schema, offset);
        {
            let guard = self
                .pool
                .pin(&self.data_path(table), page_id, PageTag::Data)?;
            if guard.read()[slot * schema.slot_width()] != page::SLOT_LIVE {
                // Index entry pointed at an already-freed slot; removing it
                // was the repair.
                return Ok(DeleteOutcome::NotFound);
            }
            page::mark_deleted(&mut guard.write(), slot, schema.slot_width());
        }

        {
            let mut maps = self.free_map_for(table, &schema)?;
            let fsm = maps.get_mut(table).expect("free map was just loaded");
            fsm.mark_slot_free(&self.pool, page_id)?;
        }
        crate::strata_debug_log!("[record] deleted {table} row at offset {offset}");
        Ok(DeleteOutcome::Deleted)
    }

    /// Every live row, in page then slot order. Zero-filled pages (sparse
    /// regions of an extended file) simply contribute nothing.
    pub fn scan_all(&self, table: &str) -> Result<Vec<Row>> {
        let schema = self.catalog.schema(table)?;
        let horizon = self.data_page_horizon(table)?;
        let data_path = self.data_path(table);

        let mut rows = Vec::new();
        for page_id in 0..horizon {
            let guard = self.pool.pin(&data_path, page_id, PageTag::Data)?;
            let buf = guard.read();
            for slot in 0..schema.records_per_page() {
                if let Some(row) = page::read_slot(&buf, slot, &schema) {
                    rows.push(row);
                }
            }
        }
        Ok(rows)
    }

    /// Rows with `field >= low`, ascending by key.
    pub fn scan_ge(&self, table: &str, field: &str, low: &str) -> Result<Vec<Row>> {
        self.scan_range(table, field, Some(low), None)
    }

    /// Rows with `field <= high`, ascending by key.
    pub fn scan_le(&self, table: &str, field: &str, high: &str) -> Result<Vec<Row>> {
        self.scan_range(table, field, None, Some(high))
    }

    /// Rows with `low <= field <= high`, ascending by key.
    pub fn scan_between(
        &self,
        table: &str,
        field: &str,
        low: &str,
        high: &str,
    ) -> Result<Vec<Row>> {
        self.scan_range(table, field, Some(low), Some(high))
    }

    fn scan_range(
        &self,
        table: &str,
        field: &str,
        low: Option<&str>,
        high: Option<&str>,
    ) -> Result<Vec<Row>> {
        let schema = self.catalog.schema(table)?;
        if !schema.is_unique_key(field) {
            return Err(StorageError::logic(format!(
                "range scans require a unique field; {field} is not one"
            )));
        }
        let tree = self.open_index(table, field)?;
        let offsets = tree.range(&self.pool, low, high)?;

        let mut rows = Vec::with_capacity(offsets.len());
        for offset in offsets {
            if let Some(row) = self.read_row_at(table, &schema, offset)? {
                rows.push(row);
            }
        }
        Ok(rows)
    }

    /// Decode the row at `offset`, or `None` for a freed slot.
    pub fn row_at(&self, table: &str, offset: RowOffset) -> Result<Option<Row>> {
        let schema = self.catalog.schema(table)?;
        self.read_row_at(table, &schema, offset)
    }

    /// Raw payload bytes of the row at `offset` (validity byte excluded),
    /// or `None` for a freed slot. This is the image logged by single-row
    /// update transactions.
    pub fn row_image(&self, table: &str, offset: RowOffset) -> Result<Option<Vec<u8>>> {
        let schema = self.catalog.schema(table)?;
        let (page_id, slot) = Self::locate(&schema, offset);
        let guard = self
            .pool
            .pin(&self.data_path(table), page_id, PageTag::Data)?;
        let buf = guard.read();
        let base = slot * schema.slot_width();
        if buf[base] != page::SLOT_LIVE {
            return Ok(None);
        }
        Ok(Some(buf[base + 1..base + schema.slot_width()].to_vec()))
    }

    /// Overwrite the payload at `offset` with `image` (truncated to the
    /// payload width), leaving the validity byte alone. The caller holds the
    /// row's exclusive lock and has logged the change.
    pub fn apply_row_image(&self, table: &str, offset: RowOffset, image: &[u8]) -> Result<()> {
        let schema = self.catalog.schema(table)?;
        let (page_id, slot) = Self::locate(&schema, offset);
        let guard = self
            .pool
            .pin(&self.data_path(table), page_id, PageTag::Data)?;
        let mut buf = guard.write();
        let base = slot * schema.slot_width() + 1;
        let width = schema.slot_width() - 1;
        let take = image.len().min(width);
        buf[base..base + width].fill(0);
        buf[base..base + take].copy_from_slice(&image[..take]);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{Field, FieldType};
    use std::path::Path;
    use tempfile::tempdir;

    struct TestCatalog {
        base: PathBuf,
        schema: Arc<Schema>,
    }

    impl Catalog for TestCatalog {
        fn schema(&self, table: &str) -> Result<Arc<Schema>> {
            if table == "users" {
                Ok(self.schema.clone())
            } else {
                Err(StorageError::TableNotFound(table.to_string()))
            }
        }

        fn table_dir(&self, table: &str) -> PathBuf {
            self.base.join(table)
        }
    }

    fn store(base: &Path) -> RecordStore {
        let schema = Arc::new(Schema::new(
            vec![
                Field {
                    name: "id".into(),
                    ty: FieldType::Int,
                    len: 4,
                },
                Field {
                    name: "name".into(),
                    ty: FieldType::Str,
                    len: 16,
                },
            ],
            vec!["id".into()],
        ));
        let catalog = Arc::new(TestCatalog {
            base: base.to_path_buf(),
            schema,
        });
        RecordStore::new(Arc::new(BufferPool::new()), catalog)
    }

    fn row(id: &str, name: &str) -> Vec<String> {
        vec![id.to_string(), name.to_string()]
    }

    #[test]
    fn insert_then_find_by_unique_key() {
        let dir = tempdir().unwrap();
        let rs = store(dir.path());

        let offset = rs.insert("users", &row("42", "alice")).unwrap();
        assert_eq!(offset, 0);
        assert_eq!(
            rs.find("users", "id", "42").unwrap(),
            Some(row("42", "alice"))
        );
        assert_eq!(rs.find("users", "id", "43").unwrap(), None);
    }

    #[test]
    fn insert_rejects_duplicate_key() {
        let dir = tempdir().unwrap();
        let rs = store(dir.path());

        rs.insert("users", &row("42", "alice")).unwrap();
        let err = rs.insert("users", &row("42", "bob")).unwrap_err();
        assert!(matches!(err, StorageError::DuplicateKey { .. }));
        assert_eq!(rs.scan_all("users").unwrap().len(), 1);
    }

    #[test]
    fn insert_validates_arity_and_int_fields() {
        let dir = tempdir().unwrap();
        let rs = store(dir.path());

        assert!(rs.insert("users", &["1".to_string()]).is_err());
        assert!(rs.insert("users", &row("not-a-number", "x")).is_err());
        assert!(rs.insert("unknown", &row("1", "x")).is_err());
    }

    #[test]
    fn delete_then_reinsert_reuses_the_slot() {
        let dir = tempdir().unwrap();
        let rs = store(dir.path());

        let first = rs.insert("users", &row("42", "alice")).unwrap();
        assert_eq!(
            rs.delete("users", "id", "42").unwrap(),
            DeleteOutcome::Deleted
        );
        assert_eq!(rs.find("users", "id", "42").unwrap(), None);
        assert_eq!(
            rs.delete("users", "id", "42").unwrap(),
            DeleteOutcome::NotFound
        );

        let second = rs.insert("users", &row("42", "carol")).unwrap();
        assert_eq!(first, second);
        assert_eq!(
            rs.find("users", "id", "42").unwrap(),
            Some(row("42", "carol"))
        );
    }

    #[test]
    fn delete_requires_a_unique_field() {
        let dir = tempdir().unwrap();
        let rs = store(dir.path());
        rs.insert("users", &row("1", "alice")).unwrap();

        assert!(matches!(
            rs.delete("users", "name", "alice"),
            Err(StorageError::Logic(_))
        ));
        assert_eq!(rs.scan_all("users").unwrap().len(), 1);
    }

    #[test]
    fn find_on_non_unique_field_scans() {
        let dir = tempdir().unwrap();
        let rs = store(dir.path());

        rs.insert("users", &row("1", "alice")).unwrap();
        rs.insert("users", &row("2", "bob")).unwrap();
        assert_eq!(
            rs.find("users", "name", "bob").unwrap(),
            Some(row("2", "bob"))
        );
        assert_eq!(rs.find("users", "name", "carol").unwrap(), None);
        assert!(rs.find("users", "age", "30").is_err());
    }

    #[test]
    fn scan_all_returns_live_rows_only() {
        let dir = tempdir().unwrap();
        let rs = store(dir.path());

        for i in 0..10 {
            rs.insert("users", &row(&i.to_string(), &format!("u{i}")))
                .unwrap();
        }
        rs.delete("users", "id", "3").unwrap();
        rs.delete("users", "id", "7").unwrap();

        let rows = rs.scan_all("users").unwrap();
        assert_eq!(rows.len(), 8);
        assert!(rows.iter().all(|r| r[0] != "3" && r[0] != "7"));
    }

    #[test]
    fn range_scans_come_back_sorted() {
        let dir = tempdir().unwrap();
        let rs = store(dir.path());

        for &i in &[1, 3, 5, 7, 9] {
            rs.insert("users", &row(&i.to_string(), &format!("u{i}")))
                .unwrap();
        }

        let ge = rs.scan_ge("users", "id", "4").unwrap();
        assert_eq!(
            ge.iter().map(|r| r[0].as_str()).collect::<Vec<_>>(),
            vec!["5", "7", "9"]
        );

        let le = rs.scan_le("users", "id", "5").unwrap();
        assert_eq!(
            le.iter().map(|r| r[0].as_str()).collect::<Vec<_>>(),
            vec!["1", "3", "5"]
        );

        let between = rs.scan_between("users", "id", "3", "7").unwrap();
        assert_eq!(
            between.iter().map(|r| r[0].as_str()).collect::<Vec<_>>(),
            vec!["3", "5", "7"]
        );
    }

    #[test]
    fn inserts_spill_onto_a_second_page() {
        let dir = tempdir().unwrap();
        let rs = store(dir.path());

        // 195 slots fit on page 0 with a 21-byte slot; go past that.
        let mut last_offset = 0;
        for i in 0..200 {
            last_offset = rs
                .insert("users", &row(&format!("{i}"), &format!("u{i}")))
                .unwrap();
        }
        assert!(last_offset >= PAGE_SIZE as RowOffset);
        assert_eq!(rs.scan_all("users").unwrap().len(), 200);
        assert_eq!(
            rs.find("users", "id", "199").unwrap(),
            Some(row("199", "u199"))
        );
    }

    #[test]
    fn row_images_round_trip() {
        let dir = tempdir().unwrap();
        let rs = store(dir.path());

        let offset = rs.insert("users", &row("42", "alice")).unwrap();
        let before = rs.row_image("users", offset).unwrap().unwrap();
        assert_eq!(&before[..4], b"42\0\0");

        let schema = rs.catalog.schema("users").unwrap();
        let after = encode_payload(&schema, &row("42", "amelia"));
        rs.apply_row_image("users", offset, &after).unwrap();

        assert_eq!(
            rs.find("users", "id", "42").unwrap(),
            Some(row("42", "amelia"))
        );
        assert_eq!(rs.row_image("users", offset).unwrap().unwrap(), after);
    }

    #[test]
    fn deleted_slot_has_no_image() {
        let dir = tempdir().unwrap();
        let rs = store(dir.path());

        let offset = rs.insert("users", &row("42", "alice")).unwrap();
        rs.delete("users", "id", "42").unwrap();
        assert_eq!(rs.row_image("users", offset).unwrap(), None);
    }
}
