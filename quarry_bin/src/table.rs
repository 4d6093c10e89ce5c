//! Table directory management: create and drop
//! `<base>/<table>/{meta.txt, data.tbl, free_space.meta, <key>.idx}`.

use std::fs;

use strata::free_space::FreeSpaceMap;
use strata::{Catalog, Schema};

use crate::catalog::{MetaCatalog, META_FILE};
use crate::errors::{ExecResult, ExecutionError};

pub fn table_exists(catalog: &MetaCatalog, name: &str) -> bool {
    catalog.table_dir(name).join(META_FILE).exists()
}

fn check_name(name: &str) -> ExecResult<()> {
    let ok = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_');
    if ok {
        Ok(())
    } else {
        Err(ExecutionError::invalid(format!(
            "invalid table name '{name}'"
        )))
    }
}

/// Create the table directory: meta.txt, an empty data file, a free-space
/// map with page 0 fully free, and one empty index file per unique key.
pub fn create_table(catalog: &MetaCatalog, name: &str, schema: &Schema) -> ExecResult<()> {
    check_name(name)?;
    if table_exists(catalog, name) {
        return Err(ExecutionError::TableExists(name.to_string()));
    }

    let dir = catalog.table_dir(name);
    fs::create_dir_all(&dir).map_err(strata::StorageError::from)?;
    fs::write(dir.join(META_FILE), MetaCatalog::meta_file_contents(schema))
        .map_err(strata::StorageError::from)?;
    fs::File::create(dir.join(strata::record::DATA_FILE)).map_err(strata::StorageError::from)?;

    let mut fsm = FreeSpaceMap::new(&dir, schema.slot_width());
    fsm.initialize(catalog.pool())?;
    catalog.pool().flush_all()?;

    for key in schema.unique_keys() {
        fs::File::create(dir.join(format!("{key}.idx"))).map_err(strata::StorageError::from)?;
    }

    catalog.invalidate(name);
    crate::quarry_debug_log!("[table] created {name} at {dir:?}");
    Ok(())
}

/// Remove the table directory and every cached trace of it. Returns whether
/// the table existed.
pub fn drop_table(catalog: &MetaCatalog, name: &str) -> ExecResult<bool> {
    check_name(name)?;
    let dir = catalog.table_dir(name);
    if !dir.exists() {
        return Ok(false);
    }

    // Evict cached pages first so a later table of the same name cannot see
    // stale frames.
    let schema = catalog.schema(name).ok();
    let pool = catalog.pool();
    pool.discard_file(&dir.join(META_FILE));
    pool.discard_file(&dir.join(strata::record::DATA_FILE));
    pool.discard_file(&dir.join(strata::free_space::FREE_SPACE_FILE));
    if let Some(schema) = schema {
        for key in schema.unique_keys() {
            pool.discard_file(&dir.join(format!("{key}.idx")));
        }
    }
    catalog.invalidate(name);

    fs::remove_dir_all(&dir).map_err(strata::StorageError::from)?;
    crate::quarry_debug_log!("[table] dropped {name}");
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use strata::schema::{Field, FieldType};
    use strata::BufferPool;
    use tempfile::tempdir;

    fn users_schema() -> Schema {
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
    fn create_lays_out_the_directory() {
        let dir = tempdir().unwrap();
        let catalog = MetaCatalog::new(dir.path(), Arc::new(BufferPool::new()));
        create_table(&catalog, "users", &users_schema()).unwrap();

        let table_dir = dir.path().join("users");
        assert!(table_dir.join("meta.txt").exists());
        assert!(table_dir.join("data.tbl").exists());
        assert!(table_dir.join("free_space.meta").exists());
        assert!(table_dir.join("id.idx").exists());
        assert_eq!(
            std::fs::metadata(table_dir.join("data.tbl")).unwrap().len(),
            0
        );

        // The catalog can read it straight back.
        let schema = catalog.schema("users").unwrap();
        assert_eq!(schema.slot_width(), 21);
    }

    #[test]
    fn create_rejects_duplicates_and_bad_names() {
        let dir = tempdir().unwrap();
        let catalog = MetaCatalog::new(dir.path(), Arc::new(BufferPool::new()));
        create_table(&catalog, "users", &users_schema()).unwrap();

        assert!(matches!(
            create_table(&catalog, "users", &users_schema()),
            Err(ExecutionError::TableExists(_))
        ));
        assert!(create_table(&catalog, "../escape", &users_schema()).is_err());
        assert!(create_table(&catalog, "", &users_schema()).is_err());
    }

    #[test]
    fn drop_removes_everything() {
        let dir = tempdir().unwrap();
        let catalog = MetaCatalog::new(dir.path(), Arc::new(BufferPool::new()));
        create_table(&catalog, "users", &users_schema()).unwrap();

        assert!(drop_table(&catalog, "users").unwrap());
        assert!(!dir.path().join("users").exists());
        assert!(!drop_table(&catalog, "users").unwrap());
        assert!(catalog.schema("users").is_err());
    }

    #[test]
    fn recreate_after_drop_sees_the_new_schema() {
        let dir = tempdir().unwrap();
        let catalog = MetaCatalog::new(dir.path(), Arc::new(BufferPool::new()));
        create_table(&catalog, "users", &users_schema()).unwrap();
        let _ = catalog.schema("users").unwrap();
        drop_table(&catalog, "users").unwrap();

        let wider = Schema::new(
            vec![Field {
                name: "id".into(),
                ty: FieldType::Int,
                len: 8,
            }],
            vec!["id".into()],
        );
        create_table(&catalog, "users", &wider).unwrap();
        assert_eq!(catalog.schema("users").unwrap().slot_width(), 9);
    }
}
