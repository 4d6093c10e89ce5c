//! Lock contention across worker threads: exclusive row locks serialize,
//! waiters are granted in arrival order, and update transactions under
//! contention serialize their effects.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use quarry_bin::executor::{execute, Session};
use quarry_bin::parser;
use serial_test::serial;
use strata::lock_manager::{row_resource, LockMode};

mod common;
use common::{open_db, rows, sql_ok};

#[test]
#[serial]
fn exclusive_row_locks_serialize_two_writers() {
    let (_dir, engine) = open_db();
    let engine = Arc::new(engine);

    let txn1 = engine.txns.begin().unwrap();
    engine
        .locks
        .acquire(txn1, &row_resource("t", 0), LockMode::Exclusive)
        .unwrap();

    let second_acquired = Arc::new(AtomicBool::new(false));
    let engine2 = engine.clone();
    let flag = second_acquired.clone();
    let contender = thread::spawn(move || {
        let txn2 = engine2.txns.begin().unwrap();
        engine2
            .locks
            .acquire(txn2, &row_resource("t", 0), LockMode::Exclusive)
            .unwrap();
        flag.store(true, Ordering::SeqCst);
        engine2.txns.commit(txn2).unwrap();
    });

    thread::sleep(Duration::from_millis(150));
    assert!(
        !second_acquired.load(Ordering::SeqCst),
        "second writer got the lock while the first still held it"
    );

    engine.txns.commit(txn1).unwrap();
    contender.join().unwrap();
    assert!(second_acquired.load(Ordering::SeqCst));
}

#[test]
#[serial]
fn waiting_exclusive_is_not_barged_by_later_shared() {
    let (_dir, engine) = open_db();
    let engine = Arc::new(engine);
    let order = Arc::new(Mutex::new(Vec::new()));

    let holder = engine.txns.begin().unwrap();
    engine
        .locks
        .acquire(holder, &row_resource("t", 0), LockMode::Exclusive)
        .unwrap();

    let engine2 = engine.clone();
    let order2 = order.clone();
    let exclusive = thread::spawn(move || {
        let txn = engine2.txns.begin().unwrap();
        engine2
            .locks
            .acquire(txn, &row_resource("t", 0), LockMode::Exclusive)
            .unwrap();
        order2.lock().unwrap().push("exclusive");
        thread::sleep(Duration::from_millis(50));
        engine2.txns.commit(txn).unwrap();
    });
    thread::sleep(Duration::from_millis(100));

    let engine3 = engine.clone();
    let order3 = order.clone();
    let shared = thread::spawn(move || {
        let txn = engine3.txns.begin().unwrap();
        engine3
            .locks
            .acquire(txn, &row_resource("t", 0), LockMode::Shared)
            .unwrap();
        order3.lock().unwrap().push("shared");
        engine3.txns.commit(txn).unwrap();
    });
    thread::sleep(Duration::from_millis(100));

    engine.txns.commit(holder).unwrap();
    exclusive.join().unwrap();
    shared.join().unwrap();
    assert_eq!(*order.lock().unwrap(), vec!["exclusive", "shared"]);
}

#[test]
#[serial]
fn concurrent_updates_serialize_their_effects() {
    let (_dir, engine) = open_db();
    let engine = Arc::new(engine);
    let mut session = Session::new();

    sql_ok(
        &engine,
        &mut session,
        "CREATE TABLE accounts (id int(4) UNIQUE, balance string(8));",
    );
    sql_ok(&engine, &mut session, "INSERT INTO accounts VALUES (1, '0');");

    let mut workers = Vec::new();
    for worker in 0..4 {
        let engine = engine.clone();
        workers.push(thread::spawn(move || {
            let mut session = Session::new();
            for round in 0..5 {
                let value = worker * 100 + round;
                let stmt = parser::parse(&format!(
                    "UPDATE accounts SET balance = '{value}' WHERE id = 1;"
                ))
                .unwrap();
                execute(&engine, &mut session, stmt).unwrap();
            }
        }));
    }
    for worker in workers {
        worker.join().unwrap();
    }

    // Every transaction committed; the row holds the value of whichever
    // update serialized last.
    let records = engine.wal().read_back().unwrap();
    let commits = records
        .iter()
        .filter(|r| r.kind == strata::wal::LogKind::Commit)
        .count();
    assert_eq!(commits, 20);

    let row = rows(sql_ok(
        &engine,
        &mut session,
        "SELECT * FROM accounts WHERE id = 1;",
    ));
    let last_after = records
        .iter()
        .rev()
        .find(|r| r.kind == strata::wal::LogKind::Update)
        .unwrap()
        .after
        .clone();
    assert!(last_after.contains(&row[0][1]));
}
