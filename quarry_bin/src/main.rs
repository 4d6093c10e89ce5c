//! The Quarry CLI: a menu front-end plus a `sql>` shell over the storage
//! engine. The process owns the buffer pool, WAL, lock manager, transaction
//! coordinator and the background flusher.

use std::io::{self, BufRead, Write};

use quarry_bin::errors::ExecutionError;
use quarry_bin::executor::{execute, Engine, Session};
use quarry_bin::parser::{self, ColumnDef};
use quarry_bin::table;
use quarry_bin::types::{DmlResult, ExecuteResult};
use strata::flusher::{Flusher, DEFAULT_FLUSH_INTERVAL};
use strata::{Catalog, FieldType};

const BASE_DIR: &str = "Tables";

fn main() {
    let engine = match Engine::open(BASE_DIR) {
        Ok(engine) => engine,
        Err(e) => {
            eprintln!("cannot open database at {BASE_DIR}: {e}");
            std::process::exit(1);
        }
    };
    let mut flusher = Flusher::start(engine.pool.clone(), DEFAULT_FLUSH_INTERVAL);

    let stdin = io::stdin();
    let mut lines = stdin.lock().lines();
    loop {
        println!();
        println!("--- Quarry DBMS ---");
        println!("1. Create Table");
        println!("2. Use Table");
        println!("3. Delete Table");
        println!("4. Start Transaction (single-row update)");
        println!("5. Buffer Status");
        println!("6. SQL Shell");
        println!("7. Exit");
        let Some(choice) = prompt(&mut lines, "Enter choice: ") else {
            break;
        };

        match choice.trim() {
            "1" => create_table_menu(&engine, &mut lines),
            "2" => use_table_menu(&engine, &mut lines),
            "3" => delete_table_menu(&engine, &mut lines),
            "4" => transaction_menu(&engine, &mut lines),
            "5" => print_status(&engine),
            "6" => sql_shell(&engine, &mut lines),
            "7" => break,
            other => println!("Invalid choice: {other}"),
        }
    }

    if let Err(e) = flusher.shutdown() {
        eprintln!("final flush failed: {e}");
    }
    println!("Exiting.");
}

type Lines<'a> = std::io::Lines<io::StdinLock<'a>>;

fn prompt(lines: &mut Lines, text: &str) -> Option<String> {
    print!("{text}");
    io::stdout().flush().ok();
    lines.next().and_then(|l| l.ok())
}

fn report(result: Result<ExecuteResult, ExecutionError>) {
    match result {
        Ok(ExecuteResult::ResultSet(rs)) => {
            println!("{}", rs.columns.join(" | "));
            for row in &rs.rows {
                println!("{}", row.join(" | "));
            }
            println!("({} rows)", rs.rows.len());
        }
        Ok(ExecuteResult::Inserted(offset)) => println!("inserted at offset {offset}"),
        Ok(ExecuteResult::Dml(DmlResult::Deleted)) => println!("deleted"),
        Ok(ExecuteResult::Dml(DmlResult::Updated)) => println!("updated"),
        Ok(ExecuteResult::Dml(DmlResult::NotFound)) => println!("no matching row"),
        Ok(ExecuteResult::Ddl(message)) => println!("{message}"),
        Ok(ExecuteResult::Begun(txn)) => println!("[TXN {txn}] BEGIN"),
        Ok(ExecuteResult::Committed(txn)) => println!("[TXN {txn}] COMMIT"),
        Ok(ExecuteResult::Aborted(txn)) => println!("[TXN {txn}] ABORT"),
        Err(e) => println!("error: {e}"),
    }
}

fn run_sql(engine: &Engine, session: &mut Session, input: &str) {
    match parser::parse(input) {
        Ok(statement) => report(execute(engine, session, statement)),
        Err(e) => println!("parse error: {e}"),
    }
}

/// One `;`-terminated statement per line; EXIT leaves the shell.
fn sql_shell(engine: &Engine, lines: &mut Lines) {
    let mut session = Session::new();
    loop {
        let Some(line) = prompt(lines, "sql> ") else {
            return;
        };
        let input = line.trim();
        if input.is_empty() {
            continue;
        }
        if input.eq_ignore_ascii_case("exit") || input.eq_ignore_ascii_case("exit;") {
            return;
        }
        run_sql(engine, &mut session, input);
    }
}

fn create_table_menu(engine: &Engine, lines: &mut Lines) {
    let Some(name) = prompt(lines, "Enter table name: ") else {
        return;
    };
    let Some(schema_line) = prompt(
        lines,
        "Enter schema (e.g. id int(4) unique, name string(16)):\n> ",
    ) else {
        return;
    };

    let mut columns = Vec::new();
    for part in schema_line.split(',') {
        let tokens: Vec<&str> = part.split_whitespace().collect();
        let (Some(&col_name), Some(&type_token)) = (tokens.first(), tokens.get(1)) else {
            println!("bad column: '{part}'");
            return;
        };
        let Some((ty, len)) = parse_type_token(type_token) else {
            println!("bad type: '{type_token}'");
            return;
        };
        let unique = tokens
            .get(2)
            .is_some_and(|t| t.eq_ignore_ascii_case("unique"));
        columns.push(ColumnDef {
            name: col_name.to_string(),
            ty,
            len,
            unique,
        });
    }
    if columns.is_empty() {
        println!("no columns given");
        return;
    }

    let mut session = Session::new();
    report(execute(
        engine,
        &mut session,
        quarry_bin::parser::Statement::CreateTable {
            name: name.trim().to_string(),
            columns,
        },
    ));
}

fn parse_type_token(token: &str) -> Option<(FieldType, usize)> {
    let token = token.to_ascii_lowercase();
    match token.split_once('(') {
        Some(("int", rest)) => Some((FieldType::Int, rest.strip_suffix(')')?.parse().ok()?)),
        Some(("string", rest)) => Some((FieldType::Str, rest.strip_suffix(')')?.parse().ok()?)),
        None if token == "int" => Some((FieldType::Int, 4)),
        _ => None,
    }
}

fn use_table_menu(engine: &Engine, lines: &mut Lines) {
    let Some(name) = prompt(lines, "Enter table name to use: ") else {
        return;
    };
    let name = name.trim().to_string();
    if !table::table_exists(&engine.catalog, &name) {
        println!("Table not found.");
        return;
    }

    loop {
        println!();
        println!("--- Table: {name} ---");
        println!("1. Add Record");
        println!("2. Find Record");
        println!("3. Delete Record");
        println!("4. Print All Records");
        println!("5. Back");
        let Some(choice) = prompt(lines, "Enter choice: ") else {
            return;
        };
        match choice.trim() {
            "1" => add_record(engine, lines, &name),
            "2" => find_record(engine, lines, &name),
            "3" => delete_record(engine, lines, &name),
            "4" => report(
                execute(
                    engine,
                    &mut Session::new(),
                    quarry_bin::parser::Statement::Select {
                        table: name.clone(),
                        filter: None,
                    },
                ),
            ),
            "5" => return,
            other => println!("Invalid choice: {other}"),
        }
    }
}

fn add_record(engine: &Engine, lines: &mut Lines, table: &str) {
    let schema = match engine.catalog.schema(table) {
        Ok(schema) => schema,
        Err(e) => {
            println!("error: {e}");
            return;
        }
    };
    let mut values = Vec::with_capacity(schema.fields().len());
    for field in schema.fields() {
        let Some(value) = prompt(lines, &format!("Enter {} ({}): ", field.name, field.ty.name()))
        else {
            return;
        };
        values.push(value.trim().to_string());
    }
    match engine.store.insert(table, &values) {
        Ok(offset) => println!("record added at offset {offset}"),
        Err(e) => println!("error: {e}"),
    }
}

/// Reads a `field=value` query, like the original prompt-driven lookup.
fn parse_query(input: &str) -> Option<(String, String)> {
    let (field, value) = input.split_once('=')?;
    Some((field.trim().to_string(), value.trim().to_string()))
}

fn find_record(engine: &Engine, lines: &mut Lines, table: &str) {
    let Some(input) = prompt(lines, "Enter query (field=value): ") else {
        return;
    };
    let Some((field, value)) = parse_query(&input) else {
        println!("Invalid format, use field=value");
        return;
    };
    match engine.store.find(table, &field, &value) {
        Ok(Some(row)) => println!("{}", row.join(" | ")),
        Ok(None) => println!("no matching row"),
        Err(e) => println!("error: {e}"),
    }
}

fn delete_record(engine: &Engine, lines: &mut Lines, table: &str) {
    let Some(input) = prompt(lines, "Enter delete query (field=value): ") else {
        return;
    };
    let Some((field, value)) = parse_query(&input) else {
        println!("Invalid format, use field=value");
        return;
    };
    report(
        execute(
            engine,
            &mut Session::new(),
            quarry_bin::parser::Statement::Delete {
                table: table.to_string(),
                field,
                value,
            },
        ),
    );
}

fn delete_table_menu(engine: &Engine, lines: &mut Lines) {
    let Some(name) = prompt(lines, "Enter table name to delete: ") else {
        return;
    };
    match table::drop_table(&engine.catalog, name.trim()) {
        Ok(true) => println!("Table '{}' deleted.", name.trim()),
        Ok(false) => println!("Table not found."),
        Err(e) => println!("error: {e}"),
    }
}

/// Interactive single-row update: unique key lookup, then new values for the
/// non-key fields, committed as one transaction.
fn transaction_menu(engine: &Engine, lines: &mut Lines) {
    let Some(table) = prompt(lines, "Enter table name: ") else {
        return;
    };
    let table = table.trim().to_string();
    let schema = match engine.catalog.schema(&table) {
        Ok(schema) => schema,
        Err(e) => {
            println!("error: {e}");
            return;
        }
    };
    let Some(field) = prompt(lines, "Enter unique field name: ") else {
        return;
    };
    let Some(value) = prompt(lines, "Enter its value: ") else {
        return;
    };

    let mut assignments = Vec::new();
    for target in schema.fields() {
        if schema.is_unique_key(&target.name) {
            continue;
        }
        let Some(new_value) = prompt(lines, &format!("New value for {}: ", target.name)) else {
            return;
        };
        assignments.push((target.name.clone(), new_value.trim().to_string()));
    }
    if assignments.is_empty() {
        println!("nothing to update: every field is a unique key");
        return;
    }

    report(execute(
        engine,
        &mut Session::new(),
        quarry_bin::parser::Statement::Update {
            table,
            assignments,
            key_field: field.trim().to_string(),
            key_value: value.trim().to_string(),
        },
    ));
}

fn print_status(engine: &Engine) {
    println!("========== Buffer Pool Status ==========");
    for partition in engine.pool.status() {
        println!(
            "{:<6} {:>3}/{:<3} resident, {} pinned, {} dirty",
            partition.name, partition.resident, partition.capacity, partition.pinned, partition.dirty
        );
    }
    println!("========================================");
}
