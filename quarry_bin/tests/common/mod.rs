use quarry_bin::errors::ExecutionError;
use quarry_bin::executor::{execute, Engine, Session};
use quarry_bin::parser;
use quarry_bin::types::ExecuteResult;
use tempfile::TempDir;

/// A fresh database in a scratch directory.
pub fn open_db() -> (TempDir, Engine) {
    let dir = TempDir::new().unwrap();
    let engine = Engine::open(dir.path().join("Tables")).unwrap();
    (dir, engine)
}

pub fn sql(
    engine: &Engine,
    session: &mut Session,
    statement: &str,
) -> Result<ExecuteResult, ExecutionError> {
    let parsed = parser::parse(statement).map_err(ExecutionError::Parse)?;
    execute(engine, session, parsed)
}

pub fn sql_ok(engine: &Engine, session: &mut Session, statement: &str) -> ExecuteResult {
    sql(engine, session, statement)
        .unwrap_or_else(|e| panic!("statement failed: {statement}: {e}"))
}

pub fn rows(result: ExecuteResult) -> Vec<Vec<String>> {
    match result {
        ExecuteResult::ResultSet(rs) => rs.rows,
        other => panic!("expected a result set, got {other:?}"),
    }
}
