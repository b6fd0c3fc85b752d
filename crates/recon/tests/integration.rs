use chrono::{DateTime, NaiveDate, TimeZone, Utc};

use rcaledger_recon::{
    export, fold, load_snapshot, parse_export, reconcile, ActivityObservations, ActivityWindow,
    FoldOptions, Ledger, LedgerEntry, Partition, RawTable, SnapshotLayout, StatusSource,
    TerminalRecord, TerminalStatus,
};

fn d(y: i32, m: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, day).unwrap()
}

fn ts(y: i32, m: u32, day: u32, h: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(y, m, day, h, 0, 0).unwrap()
}

fn partition(name: &str, headers: &[&str], rows: Vec<Vec<&str>>) -> Partition {
    let mut p = Partition::new(name, headers.iter().map(|h| h.to_string()).collect());
    for r in rows {
        p.push_row(r.into_iter().map(String::from).collect());
    }
    p
}

/// A workbook shaped like the delivered RCA report, extra columns included.
fn rca_workbook() -> RawTable {
    let mut raw = RawTable::new();
    raw.push(partition(
        "REGISTERED TERMINALS",
        &[
            "Terminal_ID", "Merchant_ID", "Merchant_Name", "Bank", "MCC", "PTSP", "Registered_Date",
            "LastSeenDate", "State",
        ],
        vec![
            vec!["2033AB01", "M01", "Alpha Stores", "GTB", "5411", "ITEX", "2021-04-01", "2023-09-30", "Lagos"],
            vec!["2033AB02", "M02", "Beta Foods", "UBA", "5812", "ITEX", "2021-05-01", "", "Abuja"],
            vec!["2033AB03", "M03", "Gamma Pharmacy", "FBN", "5912", "ITEX", "2022-01-15", "garbage", "Oyo"],
            vec!["2033AB04", "M04", "Delta Fuel", "ZIB", "5541", "ITEX", "2022-03-10", "45199", "Kano"],
        ],
    ));
    raw.push(partition(
        "CONNECTED TERMINALS",
        &["Terminal_ID", "Merchant_Name"],
        vec![vec!["2033AB01", "Alpha Stores"], vec!["2033AB02", "Beta Foods"]],
    ));
    raw.push(partition(
        "ACTIVE TERMINALS",
        &["Terminal_ID"],
        vec![vec!["2033AB01"], vec!["2033AB03"]],
    ));
    raw
}

#[test]
fn worked_example_single_terminal() {
    let run_date = d(2024, 1, 10);
    let t0 = ts(2024, 1, 8, 11);
    let current = vec![TerminalRecord {
        merchant_name: Some("A".into()),
        connected: true,
        ..TerminalRecord::new("5")
    }];
    let snapshot = rcaledger_recon::Snapshot { records: current };

    let mut activity = ActivityObservations::new();
    activity.observe("5", t0);

    let reconciled = reconcile(&snapshot, Some(&activity));
    assert_eq!(reconciled.records[0].status, TerminalStatus::Active);

    let out = fold(&Ledger::new(), &reconciled.records, &FoldOptions::new(run_date));
    let entry = out.ledger.get("5").unwrap();
    assert_eq!(entry.last_transaction_date, Some(run_date));
    assert_eq!(entry.status, Some(TerminalStatus::Active));
    assert_eq!(entry.connected, Some(true));
    assert_eq!(out.ledger.len(), 1);
}

#[test]
fn workbook_to_ledger_with_activity() {
    let raw = rca_workbook();
    let load = load_snapshot(&raw, &SnapshotLayout::default()).unwrap();
    assert_eq!(load.snapshot.len(), 4);

    let now = ts(2024, 1, 10, 6);
    let window = ActivityWindow::ending_at(now, 30);
    let events = vec![
        ("2033AB02", ts(2024, 1, 2, 9)),
        ("2033AB02", ts(2024, 1, 9, 9)),
        ("2033AB03", ts(2023, 11, 1, 9)), // outside the window
        ("9999ZZ99", ts(2024, 1, 5, 9)),  // not registered
    ];
    let activity = ActivityObservations::from_events(events, &window);
    let reconciled = reconcile(&load.snapshot, Some(&activity));

    let by_id = |id: &str| reconciled.records.iter().find(|r| r.terminal_id == id).unwrap();
    assert_eq!(by_id("2033AB01").status, TerminalStatus::Inactive);
    assert_eq!(by_id("2033AB02").status, TerminalStatus::Active);
    assert_eq!(by_id("2033AB02").last_activity_at, Some(ts(2024, 1, 9, 9)));
    assert_eq!(by_id("2033AB03").status, TerminalStatus::Inactive);
    assert_eq!(by_id("2033AB03").last_activity_at, None);
    assert_eq!(by_id("2033AB01").last_activity_at.unwrap().date_naive(), d(2023, 9, 30));
    assert_eq!(by_id("2033AB04").last_activity_at.unwrap().date_naive(), d(2023, 9, 30));

    let prior: Ledger = [
        LedgerEntry::new("2033AB01", d(2023, 12, 1)),
        LedgerEntry::new("2010XX77", d(2022, 2, 2)),
    ]
    .into_iter()
    .collect();
    let out = fold(&prior, &reconciled.records, &FoldOptions::new(d(2024, 1, 10)));

    assert_eq!(out.ledger.len(), 5);
    assert_eq!(out.ledger.get("2010XX77").unwrap().last_transaction_date, Some(d(2022, 2, 2)));
    assert_eq!(out.ledger.get("2033AB01").unwrap().last_transaction_date, Some(d(2024, 1, 10)));
    assert_eq!(out.ledger.get("2033AB01").unwrap().merchant_name.as_deref(), Some("Alpha Stores"));
    assert_eq!(out.summary.inserted, 3);
    assert_eq!(out.summary.stamped, 1);
    assert_eq!(out.summary.carried_forward, 1);
}

#[test]
fn degraded_run_uses_snapshot_status_for_every_terminal() {
    let raw = rca_workbook();
    let load = load_snapshot(&raw, &SnapshotLayout::default()).unwrap();
    let reconciled = reconcile(&load.snapshot, None);

    assert_eq!(reconciled.status_source, StatusSource::Snapshot);
    assert_eq!(reconciled.records.len(), load.snapshot.len());
    for (before, after) in load.snapshot.records.iter().zip(&reconciled.records) {
        assert_eq!(before.status, after.status);
    }
    assert_eq!(reconciled.summary.active, 2);
}

#[test]
fn export_round_trip_matches_ledger() {
    let raw = rca_workbook();
    let load = load_snapshot(&raw, &SnapshotLayout::default()).unwrap();
    let reconciled = reconcile(&load.snapshot, Some(&ActivityObservations::new()));
    let prior: Ledger = [LedgerEntry::new("0001", d(2021, 1, 1))].into_iter().collect();
    let out = fold(&prior, &reconciled.records, &FoldOptions::new(d(2024, 1, 10)));

    let bytes = export(&out.ledger).unwrap();
    let parsed = parse_export(&bytes).unwrap();

    let pairs = |l: &Ledger| -> Vec<(String, Option<NaiveDate>)> {
        l.entries().map(|e| (e.terminal_id.clone(), e.last_transaction_date)).collect()
    };
    assert_eq!(pairs(&parsed), pairs(&out.ledger));
    assert_eq!(parsed, out.ledger);
}
