//! End-to-end scenarios from the engine's testable-properties scripts:
//! write-read visibility, RO snapshot isolation, deadlock resolution,
//! available-copies writes, all-sites-down waiting, and read-behind-
//! pending-write ordering.

use repcrec::transaction::TransactionStatus;
use repcrec::{Engine, EngineConfig};

fn engine() -> Engine {
    Engine::new(&EngineConfig::default())
}

#[test]
fn write_read_visibility() {
    let mut e = engine();
    e.run_script(
        "begin(T1); begin(T2); W(T1,x1,101); R(T2,x1); end(T1); R(T2,x1); end(T2);",
    );

    let t2 = e.transaction_manager().transaction("T2").unwrap();
    // T2 blocks behind T1 on the first R, which resolves inline as
    // part of T1's commit; the script's second, explicit R re-reads
    // the now-visible value, so both reads land as 101.
    assert_eq!(t2.reads["x1"], vec![101, 101]);
    assert_eq!(t2.status, TransactionStatus::Committed);
}

#[test]
fn snapshot_isolation_for_read_only() {
    let mut e = engine();
    e.run_script(
        "begin(T1); W(T1,x2,22); end(T1); beginRO(T2); begin(T3); W(T3,x2,222); end(T3); R(T2,x2); end(T2);",
    );

    let t2 = e.transaction_manager().transaction("T2").unwrap();
    assert_eq!(t2.reads["x2"], vec![22]);
}

#[test]
fn deadlock_victim_is_the_youngest() {
    let mut e = engine();
    // A trailing no-op instruction forces one more pass of the
    // deadlock-detection prelude, which runs before each dispatched
    // instruction rather than after the last one.
    e.run_script(
        "begin(T1); begin(T2); W(T1,x1,10); W(T2,x2,20); W(T1,x2,11); W(T2,x1,21); dump();",
    );

    let t2 = e.transaction_manager().transaction("T2").unwrap();
    assert_eq!(t2.status, TransactionStatus::Aborted);
    let t1 = e.transaction_manager().transaction("T1").unwrap();
    assert_eq!(t1.status, TransactionStatus::Running);
}

#[test]
fn available_copies_write_leaves_failed_site_stale_until_next_commit() {
    let mut e = engine();
    e.run_script("begin(T1); fail(2); W(T1,x4,44); end(T1); recover(2); dump(x4);");

    let rows = e.site_manager().dump_variable("x4");
    let site2 = rows.iter().find(|(id, _, _)| *id == 2).unwrap();
    assert_eq!(site2.1, Some(40));
    assert!(!site2.2);

    for (id, value, available) in &rows {
        if *id != 2 {
            assert_eq!(*value, Some(44));
            assert!(available);
        }
    }
}

#[test]
fn all_sites_down_then_waiting_resolves_on_recovery() {
    // x1 is single-copy at site 2 (1 + 1 % 10); unlike an even,
    // all-site replica, an odd variable rejoins its site's recovered
    // set immediately on recover, so this is the case in which a bare
    // `recover` (with no intervening commit) is enough to resolve a
    // WAITING read.
    let mut e = engine();
    let mut script = String::from("begin(T1);");
    for site in 1..=10 {
        script.push_str(&format!("fail({site});"));
    }
    // Preludes run before each dispatched instruction, so one more
    // instruction after `recover` is needed to retry the waiting read.
    script.push_str("R(T1,x1);recover(2);dump();");
    e.run_script(&script);

    let t1 = e.transaction_manager().transaction("T1").unwrap();
    assert_eq!(t1.status, TransactionStatus::Running);
    assert_eq!(*t1.reads["x1"].last().unwrap(), 10);
}

#[test]
fn read_blocks_behind_pending_write_not_ahead_of_it() {
    let mut e = engine();
    e.run_script("begin(T1); begin(T2); begin(T3); R(T1,x3); W(T2,x3,30); R(T3,x3);");

    let t2 = e.transaction_manager().transaction("T2").unwrap();
    let t3 = e.transaction_manager().transaction("T3").unwrap();
    assert_eq!(t2.status, TransactionStatus::Blocked);
    assert_eq!(t3.status, TransactionStatus::Blocked);

    e.run_script("end(T1);");
    assert_eq!(e.transaction_manager().transaction("T2").unwrap().status, TransactionStatus::Running);

    e.run_script("end(T2);");
    assert_eq!(e.transaction_manager().transaction("T3").unwrap().status, TransactionStatus::Running);
    assert_eq!(e.transaction_manager().transaction("T3").unwrap().reads["x3"], vec![30]);
}

#[test]
fn repeated_end_is_a_no_op() {
    let mut e = engine();
    e.run_script("begin(T1); W(T1,x1,5); end(T1); end(T1);");
    let t1 = e.transaction_manager().transaction("T1").unwrap();
    assert_eq!(t1.status, TransactionStatus::Committed);
}
