//! Table schemas: ordered fixed-length fields plus the unique-key set, and
//! the catalog contract the record store consumes.

use std::path::PathBuf;
use std::sync::Arc;

use crate::error::Result;
use crate::PAGE_SIZE;

/// Column data type. Values are stored as fixed-width byte strings; the
/// declared length bounds how many bytes of the value survive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    Int,
    Str,
}

impl FieldType {
    pub fn name(self) -> &'static str {
        match self {
            FieldType::Int => "int",
            FieldType::Str => "string",
        }
    }
}

/// One column: name, type and on-disk byte length.
#[derive(Debug, Clone)]
pub struct Field {
    pub name: String,
    pub ty: FieldType,
    pub len: usize,
}

/// A table schema. Slot layout is one validity byte followed by each field's
/// fixed-width payload in declaration order.
#[derive(Debug, Clone)]
pub struct Schema {
    fields: Vec<Field>,
    unique_keys: Vec<String>,
    slot_width: usize,
}

impl Schema {
    pub fn new(fields: Vec<Field>, unique_keys: Vec<String>) -> Self {
        let slot_width = 1 + fields.iter().map(|f| f.len).sum::<usize>();
        Schema {
            fields,
            unique_keys,
            slot_width,
        }
    }

    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    pub fn unique_keys(&self) -> &[String] {
        &self.unique_keys
    }

    /// Width of one slot: validity byte plus every field payload.
    pub fn slot_width(&self) -> usize {
        self.slot_width
    }

    /// How many slots fit on one page.
    pub fn records_per_page(&self) -> usize {
        PAGE_SIZE / self.slot_width
    }

    pub fn field_index(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name == name)
    }

    pub fn field(&self, index: usize) -> &Field {
        &self.fields[index]
    }

    pub fn is_unique_key(&self, name: &str) -> bool {
        self.unique_keys.iter().any(|k| k == name)
    }

    /// Byte offset of a field's payload within its slot (past the validity
    /// byte).
    pub fn field_offset(&self, index: usize) -> usize {
        1 + self.fields[..index].iter().map(|f| f.len).sum::<usize>()
    }
}

/// The catalog contract: resolves a table name to its schema and its
/// on-disk directory. Implementations live outside the engine.
pub trait Catalog: Send + Sync {
    fn schema(&self, table: &str) -> Result<Arc<Schema>>;
    fn table_dir(&self, table: &str) -> PathBuf;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Schema {
        Schema::new(
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
        )
    }

    #[test]
    fn slot_geometry() {
        let schema = sample();
        assert_eq!(schema.slot_width(), 21);
        assert_eq!(schema.records_per_page(), 195);
        assert_eq!(schema.field_offset(0), 1);
        assert_eq!(schema.field_offset(1), 5);
    }

    #[test]
    fn unique_key_lookup() {
        let schema = sample();
        assert!(schema.is_unique_key("id"));
        assert!(!schema.is_unique_key("name"));
        assert_eq!(schema.field_index("name"), Some(1));
        assert_eq!(schema.field_index("age"), None);
    }
}
