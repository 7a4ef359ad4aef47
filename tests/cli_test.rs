use assert_cmd::cargo_bin;
use assert_cmd::prelude::*;
use predicates::prelude::*;
use std::process::Command;
use tempfile::tempdir;

mod common;
use common::{write_catalog, write_script};

#[test]
fn test_cli_end_to_end() -> Result<(), Box<dyn std::error::Error>> {
    let mut cmd = Command::new(cargo_bin!());
    cmd.arg("tests/fixtures/catalog.csv")
        .arg("tests/fixtures/script.csv");

    cmd.assert()
        .success()
        .stdout(predicate::str::contains(
            "event,product,status,reason,transaction",
        ))
        .stdout(predicate::str::contains("purchase,com.app.pro,succeeded,,"))
        .stdout(predicate::str::contains(
            "purchase,com.app.gems,failed,user_cancelled,",
        ))
        .stdout(predicate::str::contains(
            "purchase,com.app.gems,failed,receipt_invalid,",
        ))
        .stdout(predicate::str::contains("restore,,completed,,"))
        .stdout(predicate::str::contains("restore,com.app.pro,restored,,"));

    Ok(())
}

#[test]
fn test_cli_rejects_unknown_and_unavailable_products() {
    let dir = tempdir().unwrap();
    let catalog = dir.path().join("catalog.csv");
    let script = dir.path().join("script.csv");
    write_catalog(&catalog);
    write_script(
        &script,
        &[
            ["purchase", "com.app.unknown", "", ""],
            ["purchase", "com.app.retired", "", ""],
            ["purchase", "com.app.pro", "", ""],
        ],
    );

    let mut cmd = Command::new(cargo_bin!("iapflow"));
    cmd.arg(&catalog).arg(&script);

    cmd.assert()
        .success()
        .stdout(predicate::str::contains(
            "purchase,com.app.unknown,rejected,invalid_product,",
        ))
        .stdout(predicate::str::contains(
            "purchase,com.app.retired,rejected,invalid_product,",
        ))
        .stdout(predicate::str::contains("purchase,com.app.pro,succeeded,,"));
}

#[test]
fn test_cli_nothing_to_restore() {
    let dir = tempdir().unwrap();
    let catalog = dir.path().join("catalog.csv");
    let script = dir.path().join("script.csv");
    write_catalog(&catalog);
    write_script(&script, &[["restore", "", "", ""]]);

    let mut cmd = Command::new(cargo_bin!("iapflow"));
    cmd.arg(&catalog).arg(&script);

    cmd.assert()
        .success()
        .stdout(predicate::str::contains("restore,,nothing_to_restore,,"));
}

#[test]
fn test_cli_deferred_then_retried_purchase() {
    let dir = tempdir().unwrap();
    let catalog = dir.path().join("catalog.csv");
    let script = dir.path().join("script.csv");
    write_catalog(&catalog);
    write_script(
        &script,
        &[
            ["purchase", "com.app.pro", "defer", ""],
            ["purchase", "com.app.pro", "approve", ""],
        ],
    );

    let mut cmd = Command::new(cargo_bin!("iapflow"));
    cmd.arg(&catalog).arg(&script);

    cmd.assert()
        .success()
        .stdout(predicate::str::contains("purchase,com.app.pro,deferred,,"))
        .stdout(predicate::str::contains(
            "purchase,com.app.pro,rejected,attempt_in_progress,",
        ));
}

#[test]
fn test_cli_skips_malformed_rows() {
    let dir = tempdir().unwrap();
    let catalog = dir.path().join("catalog.csv");
    let script = dir.path().join("script.csv");
    write_catalog(&catalog);
    write_script(
        &script,
        &[
            ["refund", "com.app.pro", "", ""],
            ["purchase", "com.app.pro", "approve", "maybe"],
            ["purchase", "", "", ""],
            ["purchase", "com.app.gems", "", ""],
        ],
    );

    let mut cmd = Command::new(cargo_bin!("iapflow"));
    cmd.arg(&catalog).arg(&script);

    cmd.assert()
        .success()
        .stderr(predicate::str::contains("Error reading script step"))
        .stdout(predicate::str::contains("purchase,com.app.gems,succeeded,,"))
        .stdout(predicate::str::contains("com.app.pro").not());
}

#[test]
fn test_cli_missing_catalog_fails() {
    let dir = tempdir().unwrap();
    let script = dir.path().join("script.csv");
    write_script(&script, &[["restore", "", "", ""]]);

    let mut cmd = Command::new(cargo_bin!("iapflow"));
    cmd.arg(dir.path().join("missing.csv")).arg(&script);

    cmd.assert().failure();
}
