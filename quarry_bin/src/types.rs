use strata::{RowOffset, TxnId};

pub use strata::record::Row;
pub type Rows = Vec<Row>;

/// Outcome of a delete or update, mirrored from the record store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DmlResult {
    Deleted,
    Updated,
    NotFound,
}

#[derive(Debug, Clone)]
pub struct ResultSet {
    pub columns: Vec<String>,
    pub rows: Rows,
}

#[derive(Debug)]
pub enum ExecuteResult {
    ResultSet(ResultSet),
    Inserted(RowOffset),
    Dml(DmlResult),
    Ddl(String),
    Begun(TxnId),
    Committed(TxnId),
    Aborted(TxnId),
}
