//! Statement execution: wires parsed statements onto the record store and
//! the transaction coordinator. UPDATE is the transactional path under
//! strict 2PL: exclusive row lock, WAL before/after images, in-buffer apply.

use std::path::Path;
use std::sync::Arc;

use strata::btree::BTree;
use strata::lock_manager::{row_resource, LockManager, LockMode};
use strata::record::{encode_payload, DeleteOutcome, RecordStore};
use strata::transaction::TransactionManager;
use strata::wal::{LogKind, LogRecord, WalManager};
use strata::{BufferPool, Catalog, Field, Schema, TxnId};

use crate::catalog::MetaCatalog;
use crate::errors::{ExecResult, ExecutionError};
use crate::parser::{ColumnDef, Filter, Statement};
use crate::table;
use crate::types::{DmlResult, ExecuteResult, ResultSet};

pub const WAL_FILE: &str = "wal.log";

/// All engine handles a session needs, wired once per process.
pub struct Engine {
    pub pool: Arc<BufferPool>,
    pub catalog: Arc<MetaCatalog>,
    pub store: RecordStore,
    pub locks: Arc<LockManager>,
    pub txns: Arc<TransactionManager>,
}

impl Engine {
    /// Open (or create) a database rooted at `base_dir`. The WAL lives at
    /// `<base_dir>/wal.log`.
    pub fn open(base_dir: impl AsRef<Path>) -> ExecResult<Self> {
        let base_dir = base_dir.as_ref();
        std::fs::create_dir_all(base_dir).map_err(strata::StorageError::from)?;

        let pool = Arc::new(BufferPool::new());
        let catalog = Arc::new(MetaCatalog::new(base_dir, pool.clone()));
        let catalog_handle: Arc<dyn Catalog> = catalog.clone();
        let store = RecordStore::new(pool.clone(), catalog_handle);
        let wal = Arc::new(
            WalManager::open(base_dir.join(WAL_FILE)).map_err(strata::StorageError::from)?,
        );
        let locks = Arc::new(LockManager::new());
        let txns = Arc::new(TransactionManager::new(wal, locks.clone()));
        Ok(Engine {
            pool,
            catalog,
            store,
            locks,
            txns,
        })
    }

    pub fn wal(&self) -> &Arc<WalManager> {
        self.txns.wal()
    }
}

/// Per-connection state: the explicit transaction, if one is open.
#[derive(Default)]
pub struct Session {
    current_txn: Option<TxnId>,
}

impl Session {
    pub fn new() -> Self {
        Session::default()
    }

    pub fn in_transaction(&self) -> bool {
        self.current_txn.is_some()
    }
}

pub fn execute(
    engine: &Engine,
    session: &mut Session,
    statement: Statement,
) -> ExecResult<ExecuteResult> {
    match statement {
        Statement::CreateTable { name, columns } => {
            let schema = schema_from_columns(&columns)?;
            table::create_table(&engine.catalog, &name, &schema)?;
            Ok(ExecuteResult::Ddl(format!("created table {name}")))
        }
        Statement::DropTable(name) => {
            engine.store.forget_table(&name);
            if table::drop_table(&engine.catalog, &name)? {
                Ok(ExecuteResult::Ddl(format!("dropped table {name}")))
            } else {
                Ok(ExecuteResult::Ddl(format!("no such table {name}")))
            }
        }
        Statement::Insert { table, values } => {
            let offset = engine.store.insert(&table, &values)?;
            Ok(ExecuteResult::Inserted(offset))
        }
        Statement::Select { table, filter } => select(engine, &table, filter),
        Statement::Delete {
            table,
            field,
            value,
        } => {
            let outcome = engine.store.delete(&table, &field, &value)?;
            Ok(ExecuteResult::Dml(match outcome {
                DeleteOutcome::Deleted => DmlResult::Deleted,
                DeleteOutcome::NotFound => DmlResult::NotFound,
            }))
        }
        Statement::Update {
            table,
            assignments,
            key_field,
            key_value,
        } => update(engine, session, &table, &assignments, &key_field, &key_value),
        Statement::Begin => {
            if session.in_transaction() {
                return Err(ExecutionError::invalid("a transaction is already open"));
            }
            let txn = engine.txns.begin()?;
            session.current_txn = Some(txn);
            Ok(ExecuteResult::Begun(txn))
        }
        Statement::Commit => {
            let txn = session
                .current_txn
                .take()
                .ok_or_else(|| ExecutionError::invalid("no open transaction"))?;
            engine.txns.commit(txn)?;
            Ok(ExecuteResult::Committed(txn))
        }
        Statement::Abort => {
            let txn = session
                .current_txn
                .take()
                .ok_or_else(|| ExecutionError::invalid("no open transaction"))?;
            engine.txns.abort(txn)?;
            Ok(ExecuteResult::Aborted(txn))
        }
    }
}

fn schema_from_columns(columns: &[ColumnDef]) -> ExecResult<Schema> {
    let mut fields = Vec::with_capacity(columns.len());
    let mut unique_keys = Vec::new();
    for col in columns {
        if col.len == 0 {
            return Err(ExecutionError::invalid(format!(
                "column {} has zero length",
                col.name
            )));
        }
        if fields.iter().any(|f: &Field| f.name == col.name) {
            return Err(ExecutionError::invalid(format!(
                "duplicate column {}",
                col.name
            )));
        }
        fields.push(Field {
            name: col.name.clone(),
            ty: col.ty,
            len: col.len,
        });
        if col.unique {
            unique_keys.push(col.name.clone());
        }
    }
    Ok(Schema::new(fields, unique_keys))
}

fn select(engine: &Engine, table: &str, filter: Option<Filter>) -> ExecResult<ExecuteResult> {
    let schema = engine.catalog.schema(table)?;
    let columns: Vec<String> = schema.fields().iter().map(|f| f.name.clone()).collect();

    let rows = match filter {
        None => engine.store.scan_all(table)?,
        Some(Filter::Eq(field, value)) => {
            engine.store.find(table, &field, &value)?.into_iter().collect()
        }
        Some(Filter::Ge(field, low)) => engine.store.scan_ge(table, &field, &low)?,
        Some(Filter::Le(field, high)) => engine.store.scan_le(table, &field, &high)?,
        Some(Filter::Between(field, low, high)) => {
            engine.store.scan_between(table, &field, &low, &high)?
        }
    };
    Ok(ExecuteResult::ResultSet(ResultSet { columns, rows }))
}

/// The single-row transactional update:
/// exclusive row lock → UPDATE record with before/after images → apply the
/// after-image in the buffer pool. Outside an explicit transaction the whole
/// flow runs under a fresh transaction that commits (or aborts) here.
fn update(
    engine: &Engine,
    session: &mut Session,
    table: &str,
    assignments: &[(String, String)],
    key_field: &str,
    key_value: &str,
) -> ExecResult<ExecuteResult> {
    let schema = engine.catalog.schema(table)?;
    if !schema.is_unique_key(key_field) {
        return Err(ExecutionError::invalid(format!(
            "update requires a unique key in WHERE; {key_field} is not one"
        )));
    }
    for (field, _) in assignments {
        if schema.field_index(field).is_none() {
            return Err(ExecutionError::invalid(format!(
                "field {field} not in schema of {table}"
            )));
        }
        if schema.is_unique_key(field) {
            // Rewriting an indexed field in place would orphan its index
            // entry; delete + insert is the supported path for that.
            return Err(ExecutionError::invalid(format!(
                "field {field} is a unique key; update it via delete and insert"
            )));
        }
    }

    let index_path = engine.catalog.table_dir(table).join(format!("{key_field}.idx"));
    let tree = BTree::open(index_path, &engine.pool)?;
    let Some(offset) = tree.search(&engine.pool, key_value)? else {
        return Ok(ExecuteResult::Dml(DmlResult::NotFound));
    };

    let (txn, autocommit) = match session.current_txn {
        Some(txn) => (txn, false),
        None => (engine.txns.begin()?, true),
    };

    let result = (|| -> ExecResult<DmlResult> {
        engine
            .locks
            .acquire(txn, &row_resource(table, offset), LockMode::Exclusive)?;

        let Some(before) = engine.store.row_image(table, offset)? else {
            return Ok(DmlResult::NotFound);
        };
        let Some(mut row) = engine.store.row_at(table, offset)? else {
            return Ok(DmlResult::NotFound);
        };
        for (field, value) in assignments {
            let index = schema.field_index(field).unwrap();
            row[index] = value.clone();
        }
        let after = encode_payload(&schema, &row);

        engine.wal().log_update(&LogRecord {
            txn_id: txn,
            kind: LogKind::Update,
            table: table.to_string(),
            offset,
            before: String::from_utf8_lossy(&before).into_owned(),
            after: String::from_utf8_lossy(&after).into_owned(),
        })?;

        engine.store.apply_row_image(table, offset, &after)?;
        Ok(DmlResult::Updated)
    })();

    match result {
        Ok(outcome) => {
            if autocommit {
                engine.txns.commit(txn)?;
            }
            Ok(ExecuteResult::Dml(outcome))
        }
        Err(e) => {
            if autocommit {
                let _ = engine.txns.abort(txn);
            }
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse;
    use tempfile::tempdir;

    fn engine() -> (tempfile::TempDir, Engine) {
        let dir = tempdir().unwrap();
        let engine = Engine::open(dir.path().join("Tables")).unwrap();
        (dir, engine)
    }

    fn run(engine: &Engine, session: &mut Session, sql: &str) -> ExecResult<ExecuteResult> {
        let stmt = parse(sql).map_err(ExecutionError::Parse)?;
        execute(engine, session, stmt)
    }

    fn rows(result: ExecuteResult) -> Vec<Vec<String>> {
        match result {
            ExecuteResult::ResultSet(rs) => rs.rows,
            other => panic!("expected rows, got {other:?}"),
        }
    }

    #[test]
    fn create_insert_select_round_trip() {
        let (_dir, engine) = engine();
        let mut session = Session::new();

        run(
            &engine,
            &mut session,
            "CREATE TABLE users (id int(4) UNIQUE, name string(16));",
        )
        .unwrap();
        run(&engine, &mut session, "INSERT INTO users VALUES (42, 'alice');").unwrap();

        let all = rows(run(&engine, &mut session, "SELECT * FROM users;").unwrap());
        assert_eq!(all, vec![vec!["42".to_string(), "alice".to_string()]]);

        let by_id = rows(run(&engine, &mut session, "SELECT * FROM users WHERE id = 42;").unwrap());
        assert_eq!(by_id.len(), 1);
    }

    #[test]
    fn update_changes_the_row_and_logs_images() {
        let (_dir, engine) = engine();
        let mut session = Session::new();

        run(
            &engine,
            &mut session,
            "CREATE TABLE users (id int(4) UNIQUE, name string(16));",
        )
        .unwrap();
        run(&engine, &mut session, "INSERT INTO users VALUES (42, 'alice');").unwrap();

        let result = run(
            &engine,
            &mut session,
            "UPDATE users SET name = 'amelia' WHERE id = 42;",
        )
        .unwrap();
        assert!(matches!(result, ExecuteResult::Dml(DmlResult::Updated)));

        let row = rows(run(&engine, &mut session, "SELECT * FROM users WHERE id = 42;").unwrap());
        assert_eq!(row[0][1], "amelia");

        let records = engine.wal().read_back().unwrap();
        let kinds: Vec<LogKind> = records.iter().map(|r| r.kind).collect();
        assert_eq!(kinds, vec![LogKind::Begin, LogKind::Update, LogKind::Commit]);
        assert!(records[1].before.starts_with("42"));
        assert!(records[1].before.contains("alice"));
        assert!(records[1].after.contains("amelia"));
    }

    #[test]
    fn update_rejects_non_unique_key_and_indexed_targets() {
        let (_dir, engine) = engine();
        let mut session = Session::new();

        run(
            &engine,
            &mut session,
            "CREATE TABLE users (id int(4) UNIQUE, name string(16));",
        )
        .unwrap();
        run(&engine, &mut session, "INSERT INTO users VALUES (1, 'a');").unwrap();

        assert!(run(
            &engine,
            &mut session,
            "UPDATE users SET id = 2 WHERE id = 1;"
        )
        .is_err());
        assert!(run(
            &engine,
            &mut session,
            "UPDATE users SET name = 'x' WHERE name = 'a';"
        )
        .is_err());
    }

    #[test]
    fn explicit_transaction_spans_statements() {
        let (_dir, engine) = engine();
        let mut session = Session::new();

        run(
            &engine,
            &mut session,
            "CREATE TABLE users (id int(4) UNIQUE, name string(16));",
        )
        .unwrap();
        run(&engine, &mut session, "INSERT INTO users VALUES (1, 'a');").unwrap();

        run(&engine, &mut session, "BEGIN;").unwrap();
        assert!(session.in_transaction());
        run(
            &engine,
            &mut session,
            "UPDATE users SET name = 'b' WHERE id = 1;",
        )
        .unwrap();
        run(&engine, &mut session, "COMMIT;").unwrap();
        assert!(!session.in_transaction());

        let kinds: Vec<LogKind> = engine
            .wal()
            .read_back()
            .unwrap()
            .iter()
            .map(|r| r.kind)
            .collect();
        assert_eq!(kinds, vec![LogKind::Begin, LogKind::Update, LogKind::Commit]);

        assert!(run(&engine, &mut session, "COMMIT;").is_err());
    }

    #[test]
    fn delete_outcomes_map_through() {
        let (_dir, engine) = engine();
        let mut session = Session::new();

        run(
            &engine,
            &mut session,
            "CREATE TABLE users (id int(4) UNIQUE, name string(16));",
        )
        .unwrap();
        run(&engine, &mut session, "INSERT INTO users VALUES (1, 'a');").unwrap();

        let deleted = run(&engine, &mut session, "DELETE FROM users WHERE id = 1;").unwrap();
        assert!(matches!(deleted, ExecuteResult::Dml(DmlResult::Deleted)));
        let missing = run(&engine, &mut session, "DELETE FROM users WHERE id = 1;").unwrap();
        assert!(matches!(missing, ExecuteResult::Dml(DmlResult::NotFound)));
    }
}
