//! The catalog: resolves table names to schemas by reading
//! `<base>/<table>/meta.txt` through META buffer pages, with a cache in
//! front. meta.txt is two lines of text:
//!
//! ```text
//! int(4) id, string(16) name
//! id
//! ```
//!
//! Line 1 is comma-separated `<type>(<len>) <name>` pairs (`int` defaults to
//! length 4); line 2 is the comma-separated unique-key field names.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use strata::buffer_pool::PageTag;
use strata::{BufferPool, Catalog, Field, FieldType, Result, Schema, StorageError};

pub const META_FILE: &str = "meta.txt";

pub struct MetaCatalog {
    base: PathBuf,
    pool: Arc<BufferPool>,
    cache: Mutex<HashMap<String, Arc<Schema>>>,
}

impl MetaCatalog {
    pub fn new(base: impl Into<PathBuf>, pool: Arc<BufferPool>) -> Self {
        MetaCatalog {
            base: base.into(),
            pool,
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base
    }

    pub fn pool(&self) -> &Arc<BufferPool> {
        &self.pool
    }

    /// Drop one table's cached schema (after DDL against it).
    pub fn invalidate(&self, table: &str) {
        self.cache.lock().unwrap().remove(table);
    }

    pub fn clear_cache(&self) {
        self.cache.lock().unwrap().clear();
    }

    /// Render the meta.txt contents for a schema.
    pub fn meta_file_contents(schema: &Schema) -> String {
        let fields = schema
            .fields()
            .iter()
            .map(|f| format!("{}({}) {}", f.ty.name(), f.len, f.name))
            .collect::<Vec<_>>()
            .join(", ");
        format!("{}\n{}\n", fields, schema.unique_keys().join(", "))
    }

    fn load_schema(&self, table: &str) -> Result<Arc<Schema>> {
        let dir = self.table_dir(table);
        let meta_path = dir.join(META_FILE);
        if !meta_path.exists() {
            return Err(StorageError::TableNotFound(table.to_string()));
        }

        // meta.txt is small; page 0 holds the whole thing, zero-padded.
        let text = {
            let guard = self.pool.pin(&meta_path, 0, PageTag::Meta)?;
            let buf = guard.read();
            let end = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
            String::from_utf8_lossy(&buf[..end]).into_owned()
        };

        let mut lines = text.lines();
        let schema_line = lines.next().unwrap_or("");
        let keys_line = lines.next().unwrap_or("");
        let schema = parse_meta(table, schema_line, keys_line)?;
        crate::quarry_debug_log!(
            "[catalog] loaded schema for {table}: {} fields, {} unique keys",
            schema.fields().len(),
            schema.unique_keys().len()
        );
        Ok(Arc::new(schema))
    }
}

impl Catalog for MetaCatalog {
    fn schema(&self, table: &str) -> Result<Arc<Schema>> {
        if let Some(schema) = self.cache.lock().unwrap().get(table) {
            return Ok(schema.clone());
        }
        let schema = self.load_schema(table)?;
        self.cache
            .lock()
            .unwrap()
            .insert(table.to_string(), schema.clone());
        Ok(schema)
    }

    fn table_dir(&self, table: &str) -> PathBuf {
        self.base.join(table)
    }
}

fn parse_meta(table: &str, schema_line: &str, keys_line: &str) -> Result<Schema> {
    let bad = |detail: String| StorageError::MetaParse {
        table: table.to_string(),
        detail,
    };

    let mut fields = Vec::new();
    for part in schema_line.split(',') {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }
        let (type_token, name) = part
            .split_once(char::is_whitespace)
            .ok_or_else(|| bad(format!("expected '<type> <name>', got '{part}'")))?;
        let name = name.trim();
        if name.is_empty() {
            return Err(bad(format!("missing field name in '{part}'")));
        }
        let (ty, len) = parse_type(type_token)
            .ok_or_else(|| bad(format!("unknown type '{type_token}' for field {name}")))?;
        if len == 0 {
            return Err(bad(format!("zero length for field {name}")));
        }
        fields.push(Field {
            name: name.to_string(),
            ty,
            len,
        });
    }
    if fields.is_empty() {
        return Err(bad("no fields declared".to_string()));
    }

    let mut unique_keys = Vec::new();
    for key in keys_line.split(',') {
        let key = key.trim();
        if key.is_empty() {
            continue;
        }
        if !fields.iter().any(|f| f.name == key) {
            return Err(bad(format!("unique key {key} is not a declared field")));
        }
        unique_keys.push(key.to_string());
    }

    Ok(Schema::new(fields, unique_keys))
}

/// Parse a type token: `int`, `int(4)`, `string(16)`.
fn parse_type(token: &str) -> Option<(FieldType, usize)> {
    let token = token.trim();
    let (name, len) = match token.split_once('(') {
        Some((name, rest)) => {
            let digits = rest.strip_suffix(')')?;
            (name, Some(digits.trim().parse::<usize>().ok()?))
        }
        None => (token, None),
    };
    match name.trim() {
        "int" => Some((FieldType::Int, len.unwrap_or(4))),
        "string" => Some((FieldType::Str, len?)),
        _ => None,
    }
}
