use std::path::Path;

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::tempdir;

const PNG_1X1: &[u8] = &[
    0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A, 0x00, 0x00, 0x00, 0x0D, 0x49, 0x48, 0x44, 0x52,
    0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x01, 0x08, 0x06, 0x00, 0x00, 0x00, 0x1F, 0x15, 0xC4,
    0x89, 0x00, 0x00, 0x00, 0x0D, 0x49, 0x44, 0x41, 0x54, 0x78, 0x9C, 0x63, 0xF8, 0xCF, 0xC0, 0xF0,
    0x1F, 0x00, 0x05, 0x00, 0x01, 0xFF, 0x89, 0x99, 0x3D, 0x1D, 0x00, 0x00, 0x00, 0x00, 0x49, 0x45,
    0x4E, 0x44, 0xAE, 0x42, 0x60, 0x82,
];

fn story_reel(dir: &Path) -> Command {
    let mut cmd = Command::cargo_bin("story-reel").expect("binary built");
    cmd.arg("--config")
        .arg(dir.join("missing-config.yaml"))
        .env("STORY_REEL_STORAGE__PATH", dir.join("state.db"))
        .env("STORY_REEL_LOG__FILE", dir.join("story-reel.log"));
    cmd
}

#[test]
fn prints_version() {
    let dir = tempdir().unwrap();
    story_reel(dir.path())
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains(env!("CARGO_PKG_VERSION")));
}

#[test]
fn prints_help() {
    let dir = tempdir().unwrap();
    story_reel(dir.path())
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Story Reel"))
        .stdout(predicate::str::contains("--add"));
}

#[test]
fn rejects_unknown_flag() {
    let dir = tempdir().unwrap();
    story_reel(dir.path())
        .arg("--bogus")
        .assert()
        .code(2)
        .stderr(predicate::str::contains("unknown argument"));
}

#[test]
fn list_is_empty_on_fresh_store() {
    let dir = tempdir().unwrap();
    story_reel(dir.path())
        .arg("--list")
        .assert()
        .success()
        .stdout(predicate::str::is_empty());
}

#[test]
fn added_image_shows_up_in_list() {
    let dir = tempdir().unwrap();
    let image = dir.path().join("pic.png");
    std::fs::write(&image, PNG_1X1).unwrap();

    let output = story_reel(dir.path())
        .arg("--add")
        .arg(&image)
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let id = String::from_utf8(output).unwrap().trim().to_string();
    assert_eq!(id.len(), 36);

    story_reel(dir.path())
        .arg("--list")
        .assert()
        .success()
        .stdout(predicate::str::contains(format!("{id}\tnew\t")));
}

#[test]
fn non_image_is_refused() {
    let dir = tempdir().unwrap();
    let file = dir.path().join("notes.txt");
    std::fs::write(&file, "plain text, definitely not pixels").unwrap();

    story_reel(dir.path())
        .arg("--add")
        .arg(&file)
        .assert()
        .failure()
        .stderr(predicate::str::contains("not an image"));

    story_reel(dir.path())
        .arg("--list")
        .assert()
        .success()
        .stdout(predicate::str::is_empty());
}
