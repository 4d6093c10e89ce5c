//! The write-ahead log: an append-only text stream, one record per line,
//! flushed and fsynced on every append. A process-wide mutex keeps records
//! atomic. Recovery here is replay-to-operator only; the record format
//! carries everything a later redo/undo implementation would need.
//!
//! Line format (interior quotes in the images are doubled):
//!
//! ```text
//! <txn_id> <kind:int> <table> <offset> "<before>" "<after>"
//! ```

use std::fs::{File, OpenOptions};
use std::io::{self, BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::error::{Result, StorageError};
use crate::failpoint;
use crate::{RowOffset, TxnId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum LogKind {
    Begin = 0,
    Update = 1,
    Commit = 2,
    Abort = 3,
}

impl LogKind {
    fn from_int(value: i32) -> Option<Self> {
        match value {
            0 => Some(LogKind::Begin),
            1 => Some(LogKind::Update),
            2 => Some(LogKind::Commit),
            3 => Some(LogKind::Abort),
            _ => None,
        }
    }
}

/// One WAL record. Control records (BEGIN/COMMIT/ABORT) carry an empty
/// table, offset 0 and empty images.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
    pub txn_id: TxnId,
    pub kind: LogKind,
    pub table: String,
    pub offset: RowOffset,
    pub before: String,
    pub after: String,
}

impl LogRecord {
    fn control(txn_id: TxnId, kind: LogKind) -> Self {
        LogRecord {
            txn_id,
            kind,
            table: String::new(),
            offset: 0,
            before: String::new(),
            after: String::new(),
        }
    }
}

fn quote(image: &str) -> String {
    let mut out = String::with_capacity(image.len() + 2);
    out.push('"');
    for c in image.chars() {
        if c == '"' {
            out.push('"');
        }
        out.push(c);
    }
    out.push('"');
    out
}

/// Cursor-based line parser; tolerates the empty table field of control
/// records (two adjacent spaces).
fn parse_line(line: &str) -> Result<LogRecord> {
    let bad = |detail: &str| StorageError::logic(format!("malformed WAL line ({detail}): {line}"));

    let mut rest = line;
    let field = |rest: &mut &str| -> String {
        match rest.find(' ') {
            Some(at) => {
                let head = rest[..at].to_string();
                *rest = &rest[at + 1..];
                head
            }
            None => std::mem::take(rest).to_string(),
        }
    };

    let txn_id: TxnId = field(&mut rest)
        .parse()
        .map_err(|_| bad("transaction id"))?;
    let kind = field(&mut rest)
        .parse::<i32>()
        .ok()
        .and_then(LogKind::from_int)
        .ok_or_else(|| bad("kind"))?;
    let table = field(&mut rest);
    let offset: RowOffset = field(&mut rest).parse().map_err(|_| bad("offset"))?;

    let unquote = |rest: &mut &str| -> Result<String> {
        let s = rest.strip_prefix('"').ok_or_else(|| bad("opening quote"))?;
        let mut out = String::new();
        let mut chars = s.char_indices();
        while let Some((_, c)) = chars.next() {
            if c != '"' {
                out.push(c);
                continue;
            }
            match chars.next() {
                Some((_, '"')) => out.push('"'),
                Some((j, ' ')) => {
                    *rest = &s[j + 1..];
                    return Ok(out);
                }
                None => {
                    *rest = "";
                    return Ok(out);
                }
                _ => return Err(bad("stray quote")),
            }
        }
        Err(bad("unterminated image"))
    };

    let before = unquote(&mut rest)?;
    let after = unquote(&mut rest)?;
    Ok(LogRecord {
        txn_id,
        kind,
        table,
        offset,
        before,
        after,
    })
}

/// The WAL manager. Opened in append mode; every append is flushed and
/// fsynced before it returns.
pub struct WalManager {
    file: Mutex<File>,
    path: PathBuf,
}

impl WalManager {
    pub fn open(path: impl Into<PathBuf>) -> io::Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(WalManager {
            file: Mutex::new(file),
            path,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one record and force it to disk. On failure nothing after the
    /// failed record is durable and the caller must not act on it.
    pub fn append(&self, record: &LogRecord) -> Result<()> {
        let mut file = self.file.lock().unwrap();
        let line = format!(
            "{} {} {} {} {} {}\n",
            record.txn_id,
            record.kind as i32,
            record.table,
            record.offset,
            quote(&record.before),
            quote(&record.after),
        );
        file.write_all(line.as_bytes())?;
        file.flush()?;
        failpoint::maybe_fail("wal.append.sync")?;
        file.sync_data()?;
        crate::strata_debug_log!("[wal] appended {:?} for txn {}", record.kind, record.txn_id);
        Ok(())
    }

    pub fn log_begin(&self, txn_id: TxnId) -> Result<()> {
        self.append(&LogRecord::control(txn_id, LogKind::Begin))
    }

    pub fn log_update(&self, record: &LogRecord) -> Result<()> {
        self.append(record)
    }

    pub fn log_commit(&self, txn_id: TxnId) -> Result<()> {
        self.append(&LogRecord::control(txn_id, LogKind::Commit))
    }

    pub fn log_abort(&self, txn_id: TxnId) -> Result<()> {
        self.append(&LogRecord::control(txn_id, LogKind::Abort))
    }

    /// Parse the whole log in append order.
    pub fn read_back(&self) -> Result<Vec<LogRecord>> {
        let file = match File::open(&self.path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let mut records = Vec::new();
        for line in BufReader::new(file).lines() {
            let line = line?;
            if line.is_empty() {
                continue;
            }
            records.push(parse_line(&line)?);
        }
        Ok(records)
    }

    /// Stream every record to the operator. This design performs no redo or
    /// undo; the records carry enough to add that later.
    pub fn recover(&self) -> Result<Vec<LogRecord>> {
        let records = self.read_back()?;
        for record in &records {
            println!(
                "[wal] txn {} {:?} {} @{}",
                record.txn_id, record.kind, record.table, record.offset
            );
        }
        Ok(records)
    }
}
