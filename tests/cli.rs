//! End-to-end tests of the `file-optimizer` binary. Only in-process codecs
//! are exercised, no external tool has to be installed.

use assert_cmd::prelude::*;
use image::{DynamicImage, Rgb, RgbImage};
use predicates::prelude::*;
use space_file_optimizer::image_processor::encode_png;
use std::path::Path;
use std::process::Command;
use tempfile::TempDir;

#[allow(deprecated)]
fn optimizer_cmd(history: &Path) -> Command {
    let mut cmd = Command::cargo_bin("file-optimizer").unwrap();
    cmd.arg("--history").arg(history).env("RUST_LOG", "warn");
    cmd
}

fn write_png(path: &Path) {
    let image = DynamicImage::ImageRgb8(RgbImage::from_fn(48, 32, |x, y| Rgb([x as u8 * 5, y as u8 * 7, 120])));
    std::fs::write(path, encode_png(&image).unwrap()).unwrap();
}

#[test]
fn test_cli_help_lists_subcommands() {
    let dir = TempDir::new().unwrap();
    optimizer_cmd(&dir.path().join("history.json"))
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("convert"))
        .stdout(predicate::str::contains("history"));
}

#[test]
fn test_cli_empty_history_stats() {
    let dir = TempDir::new().unwrap();
    optimizer_cmd(&dir.path().join("history.json"))
        .args(["--json", "history", "stats"])
        .assert()
        .success()
        .stdout(predicate::str::contains(r#""type":"history_stats""#))
        .stdout(predicate::str::contains(r#""average_savings_percent":68"#));
}

#[test]
fn test_cli_formats_of_image() {
    let dir = TempDir::new().unwrap();
    let png = dir.path().join("chart.png");
    write_png(&png);
    optimizer_cmd(&dir.path().join("history.json"))
        .arg("formats")
        .arg(&png)
        .assert()
        .success()
        .stdout(predicate::str::contains("jpg"));
}

#[test]
fn test_cli_convert_writes_artifact_and_history() {
    let dir = TempDir::new().unwrap();
    let history = dir.path().join("history.json");
    let out = dir.path().join("out");
    let png = dir.path().join("chart.png");
    write_png(&png);

    optimizer_cmd(&history)
        .arg("--json")
        .arg("convert")
        .arg(&png)
        .args(["--to", "jpg", "--output"])
        .arg(&out)
        .assert()
        .success()
        .stdout(predicate::str::contains(r#""type":"artifact""#))
        .stdout(predicate::str::contains(r#""type":"complete""#));

    assert!(out.join("chart.jpg").exists());
    assert!(png.exists());

    optimizer_cmd(&history)
        .args(["--json", "history", "list"])
        .assert()
        .success()
        .stdout(predicate::str::contains("chart.png"));
}

#[test]
fn test_cli_rejects_illegal_target() {
    let dir = TempDir::new().unwrap();
    let png = dir.path().join("chart.png");
    write_png(&png);
    optimizer_cmd(&dir.path().join("history.json"))
        .arg("--json")
        .arg("convert")
        .arg(&png)
        .args(["--to", "mp4"])
        .assert()
        .failure()
        .stdout(predicate::str::contains(r#""type":"error""#));
}
