use std::fs;
use std::process::Command;

use tempfile::TempDir;

fn run(fixture: &str) -> (TempDir, String, bool) {
    let data = format!("tests/fixtures/{fixture}");
    let out = TempDir::new().expect("failed to create out dir");

    let output = Command::new(env!("CARGO_BIN_EXE_escrow-eng"))
        .arg(&data)
        .arg(out.path())
        .env("RUST_LOG", "warn")
        .output()
        .expect("failed to run binary");

    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    (out, stderr, output.status.success())
}

fn read_rows(out: &TempDir, name: &str) -> Vec<Vec<String>> {
    let content = fs::read_to_string(out.path().join(name)).expect("missing output file");
    content
        .lines()
        .skip(1) // header
        .map(|line| line.split(',').map(str::to_string).collect())
        .collect()
}

#[test]
fn full_lifecycle_updates_both_ledgers() {
    let (out, _stderr, success) = run("lifecycle");
    assert!(success);

    let bookings = read_rows(&out, "bookings.csv");
    assert_eq!(bookings.len(), 1);
    let b1 = &bookings[0];

    assert_eq!(b1[0], "b1");
    assert_eq!(b1[9], "captured");
    assert_eq!(b1[10], "hold_1");
    assert_eq!(b1[11], "ch_2");
    assert_eq!(b1[16], "refunded");
    assert_eq!(
        b1[18],
        "partial deposit refund of 150.00 with 50.00 deducted (scuffed fryer)"
    );
    assert_eq!(b1[20], "true");
    assert_eq!(b1[21], "tr_4");
    assert_eq!(b1[22], "32600");
    assert_eq!(b1[23], "1200");
    assert_eq!(b1[24], "11400");

    let mut rewards = read_rows(&out, "rewards.csv");
    rewards.sort_by(|a, b| a[0].cmp(&b[0]));
    assert_eq!(rewards.len(), 2);

    let r1 = &rewards[0];
    assert_eq!(r1[4], "paid");
    assert_eq!(r1[6], "acct_winner1");
    assert_eq!(r1[7], "tr_5");
    assert!(!r1[8].is_empty());
    assert!(!r1[9].is_empty());

    let r2 = &rewards[1];
    assert_eq!(r2[4], "disqualified");
    assert_eq!(r2[5], "duplicate destination account");
    assert_eq!(r2[7], "");
}

#[test]
fn bad_commands_warn_but_do_not_block() {
    let (out, stderr, success) = run("errors");
    assert!(success);

    assert!(stderr.contains("unrecognized op 'frobnicate'"));
    assert!(stderr.contains("booking b9 not found"));
    assert!(stderr.contains("is not allowed to"));

    let bookings = read_rows(&out, "bookings.csv");
    let b1 = &bookings[0];
    assert_eq!(b1[9], "released");
    assert_eq!(b1[10], "hold_1");
    assert_eq!(b1[20], "false");
}
