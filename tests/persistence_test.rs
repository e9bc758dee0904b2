#![cfg(feature = "storage-rocksdb")]

use assert_cmd::cargo_bin;
use std::io::Write;
use std::process::Command;
use tempfile::tempdir;

#[test]
fn test_snapshot_from_previous_run_is_not_replayed() {
    let dir = tempdir().unwrap();
    let db_path = dir.path().join("test_db");

    // 1. First run: approval published only through the persistent snapshot
    let mut csv1 = tempfile::NamedTempFile::new().unwrap();
    writeln!(csv1, "order_id, amount, method, installments").unwrap();
    writeln!(csv1, "R1, 100.00, credit, 1").unwrap();

    let output1 = Command::new(cargo_bin!("payterm"))
        .arg(csv1.path())
        .args(["--channels", "snapshot", "--latency-ms", "10"])
        .arg("--db-path")
        .arg(&db_path)
        .output()
        .expect("Failed to execute command");
    assert!(output1.status.success());
    let stdout1 = String::from_utf8_lossy(&output1.stdout);
    assert!(stdout1.contains("R1,approved,000001,"));

    // 2. Second run: the terminal stays silent, so the stored approval from
    // the first run must not be mistaken for this order's answer
    let mut csv2 = tempfile::NamedTempFile::new().unwrap();
    writeln!(csv2, "order_id, amount, method, installments").unwrap();
    writeln!(csv2, "R1, 100.00, credit, 1").unwrap();

    let output2 = Command::new(cargo_bin!("payterm"))
        .arg(csv2.path())
        .args(["--channels", "snapshot", "--outcome", "silent", "--timeout-ms", "300"])
        .arg("--db-path")
        .arg(&db_path)
        .output()
        .expect("Failed to execute command");
    assert!(output2.status.success());
    let stdout2 = String::from_utf8_lossy(&output2.stdout);
    assert!(stdout2.contains("R1,error,"));
    assert!(!stdout2.contains("approved"));
}
