//! Slotted data-page operations. A data page is an array of fixed-width
//! slots, each a validity byte (0 = free, 1 = live) followed by the record
//! payload. These are pure functions over a pinned page buffer; pinning,
//! unpinning and dirty-marking are the caller's business.

use crate::schema::Schema;
use crate::PAGE_SIZE;

pub const SLOT_FREE: u8 = 0;
pub const SLOT_LIVE: u8 = 1;

/// First slot whose validity byte is 0, if any.
pub fn find_free_slot(buf: &[u8; PAGE_SIZE], slot_width: usize) -> Option<usize> {
    (0..PAGE_SIZE / slot_width).find(|&slot| buf[slot * slot_width] == SLOT_FREE)
}

/// Write a record into `slot`: validity goes to 1, the payload is zeroed,
/// then each value's bytes are copied truncated to the field's length.
pub fn write_slot(buf: &mut [u8; PAGE_SIZE], slot: usize, values: &[String], schema: &Schema) {
    let base = slot * schema.slot_width();
    buf[base] = SLOT_LIVE;
    buf[base + 1..base + schema.slot_width()].fill(0);

    for (index, (field, value)) in schema.fields().iter().zip(values).enumerate() {
        let start = base + schema.field_offset(index);
        let bytes = value.as_bytes();
        let take = bytes.len().min(field.len);
        buf[start..start + take].copy_from_slice(&bytes[..take]);
    }
}

/// Decode the record at `slot` as NUL-trimmed strings, or `None` if the slot
/// is free.
pub fn read_slot(buf: &[u8; PAGE_SIZE], slot: usize, schema: &Schema) -> Option<Vec<String>> {
    let base = slot * schema.slot_width();
    if buf[base] != SLOT_LIVE {
        return None;
    }

    let mut row = Vec::with_capacity(schema.fields().len());
    for (index, field) in schema.fields().iter().enumerate() {
        let start = base + schema.field_offset(index);
        let raw = &buf[start..start + field.len];
        let end = raw.iter().position(|&b| b == 0).unwrap_or(field.len);
        row.push(String::from_utf8_lossy(&raw[..end]).into_owned());
    }
    Some(row)
}

/// Clear the validity byte. The payload bytes are left behind.
pub fn mark_deleted(buf: &mut [u8; PAGE_SIZE], slot: usize, slot_width: usize) {
    buf[slot * slot_width] = SLOT_FREE;
}
