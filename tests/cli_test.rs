use assert_cmd::cargo_bin;
use assert_cmd::prelude::*;
use predicates::prelude::*;
use std::io::Write;
use std::process::Command;
use tempfile::NamedTempFile;

fn requests(rows: &[&str]) -> NamedTempFile {
    let mut csv = NamedTempFile::new().unwrap();
    writeln!(csv, "order_id, amount, method, installments").unwrap();
    for row in rows {
        writeln!(csv, "{row}").unwrap();
    }
    csv
}

fn payterm(csv: &NamedTempFile) -> Command {
    let mut cmd = Command::new(cargo_bin!("payterm"));
    cmd.arg(csv.path())
        .args(["--latency-ms", "20", "--cooldown-ms", "0"]);
    cmd
}

#[test]
fn test_cli_end_to_end() -> Result<(), Box<dyn std::error::Error>> {
    let csv = requests(&["A1, 10.50, credit, 3", "A2, 4.00, pix,"]);

    payterm(&csv)
        .assert()
        .success()
        .stdout(predicate::str::contains(
            "order_id,status,nsu,authorization_code,card_brand,response_code,warning",
        ))
        .stdout(predicate::str::contains("A1,approved,000001,AUT0001,VISA,0,"))
        .stdout(predicate::str::contains("A2,approved,000002,AUT0002,VISA,0,"));

    Ok(())
}

#[test]
fn test_cli_declines_across_all_channels() {
    let csv = requests(&["D1, 99.99, debit, 1"]);

    payterm(&csv)
        .args(["--outcome", "decline", "--channels", "callback,event,snapshot"])
        .assert()
        .success()
        .stdout(predicate::str::contains("D1,declined,,,,51,"))
        .stdout(predicate::function(|out: &str| out.lines().count() == 2));
}

#[test]
fn test_cli_repeated_declines_of_same_amount() {
    let csv = requests(&["D1, 99.99, debit, 1", "D2, 99.99, debit, 1"]);

    payterm(&csv)
        .args(["--outcome", "decline"])
        .assert()
        .success()
        .stdout(predicate::str::contains("D1,declined,,,,51,"))
        .stdout(predicate::str::contains("D2,declined,,,,51,"))
        .stdout(predicate::str::contains("timeout").not());
}

#[test]
fn test_cli_clears_stale_pending_before_first_start() {
    let csv = requests(&["P1, 1.00, debit, 1"]);

    payterm(&csv)
        .arg("--pending-lock")
        .assert()
        .success()
        .stdout(predicate::str::contains("P1,approved,"))
        .stderr(predicate::str::contains("stale pending transaction cleared"));
}

#[test]
fn test_cli_timeout_becomes_error_row() {
    let csv = requests(&["T1, 5.00, credit, 1", "T2, 6.00, credit, 1"]);

    payterm(&csv)
        .args(["--outcome", "silent", "--timeout-ms", "200"])
        .assert()
        .success()
        .stdout(predicate::str::contains("T1,error,"))
        .stdout(predicate::str::contains("T2,error,"))
        .stderr(predicate::str::contains("Error processing payment T1"));
}

#[test]
fn test_cli_reports_bad_rows_and_continues() {
    let csv = requests(&["B1, -3.00, credit, 1", ", 1.00, debit, 1", "B3, 2.00, debit, 1"]);

    payterm(&csv)
        .assert()
        .success()
        .stdout(predicate::str::contains("B3,approved,"))
        .stdout(predicate::str::contains("B1").not())
        .stderr(predicate::str::contains("Error reading request on row 1"))
        .stderr(predicate::str::contains("Error reading request on row 2"));
}

#[test]
fn test_cli_missing_input_fails() {
    Command::new(cargo_bin!("payterm"))
        .arg("does/not/exist.csv")
        .assert()
        .failure();
}
