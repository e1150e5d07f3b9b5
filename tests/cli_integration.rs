//! CLI integration tests
//!
//! Tests the command-line interface end-to-end.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Output, Stdio};
use tempfile::TempDir;

/// Get path to the dictool binary
fn dictool_bin() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_dictool"))
}

/// Run dictool with passphrase from stdin
fn run_with_passphrase(args: &[&str], passphrase: &str) -> Output {
    let mut child = Command::new(dictool_bin())
        .arg("--passphrase-stdin")
        .args(args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .expect("failed to spawn dictool");

    {
        let stdin = child.stdin.as_mut().expect("failed to open stdin");
        // Ignore BrokenPipe errors - the command may exit before reading stdin
        let _ = stdin.write_all(passphrase.as_bytes());
    }

    child.wait_with_output().expect("failed to wait for dictool")
}

fn run(args: &[&str]) -> Output {
    run_with_passphrase(args, "")
}

fn path_str(path: &Path) -> &str {
    path.to_str().unwrap()
}

fn assert_success(output: &Output, what: &str) {
    assert!(
        output.status.success(),
        "{} failed: {}",
        what,
        String::from_utf8_lossy(&output.stderr)
    );
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

#[test]
fn test_set_then_get() {
    let temp_dir = TempDir::new().unwrap();
    let file = temp_dir.path().join("app.cfg");
    let file = path_str(&file);

    assert_success(&run(&["set", file, "window.width", "1024"]), "set");
    let output = run(&["get", file, "window.width"]);
    assert_success(&output, "get");
    assert_eq!(stdout(&output), "1024\n");

    let contents = fs::read_to_string(file).unwrap();
    assert_eq!(contents, ".encoding = \"UTF-8\"\nwindow.width = \"1024\"\n");
}

#[test]
fn test_set_preserves_existing_lines() {
    let temp_dir = TempDir::new().unwrap();
    let file = temp_dir.path().join("app.cfg");
    fs::write(&file, "# settings\nname = old   # inline\nport = 80\n").unwrap();

    assert_success(&run(&["set", path_str(&file), "port", "8080"]), "set");
    let contents = fs::read_to_string(&file).unwrap();
    assert_eq!(
        contents,
        "# settings\nname = old   # inline\nport = \"8080\"\n"
    );
}

#[test]
fn test_get_missing_entry_fails() {
    let temp_dir = TempDir::new().unwrap();
    let file = temp_dir.path().join("app.cfg");
    fs::write(&file, "a = 1\n").unwrap();

    let output = run(&["get", path_str(&file), "b"]);
    assert!(!output.status.success());
    assert_eq!(output.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&output.stderr).contains("no entry named 'b'"));
}

#[test]
fn test_get_nonexistent_file_fails() {
    let temp_dir = TempDir::new().unwrap();
    let file = temp_dir.path().join("nope.cfg");

    let output = run(&["get", path_str(&file), "a"]);
    assert!(!output.status.success());
    assert!(!file.exists());
}

#[test]
fn test_unset_and_prefix_unset() {
    let temp_dir = TempDir::new().unwrap();
    let file = temp_dir.path().join("app.cfg");
    fs::write(&file, "a.x = 1\na.y = 2\nb = 3\n").unwrap();
    let file = path_str(&file);

    assert_success(&run(&["unset", file, "b"]), "unset");
    assert_eq!(fs::read_to_string(file).unwrap(), "a.x = 1\na.y = 2\n");

    assert_success(&run(&["unset", file, "--prefix", "A."]), "unset --prefix");
    assert_eq!(fs::read_to_string(file).unwrap(), "");

    let output = run(&["unset", file, "b"]);
    assert!(!output.status.success());
}

#[test]
fn test_dump_with_prefix() {
    let temp_dir = TempDir::new().unwrap();
    let file = temp_dir.path().join("app.cfg");
    fs::write(&file, "net.host = example.org\nnet.port = 80\nui.theme = dark\n").unwrap();

    let output = run(&["dump", path_str(&file), "--prefix", "net."]);
    assert_success(&output, "dump");
    assert_eq!(stdout(&output), "net.host = example.org\nnet.port = 80\n");
}

#[test]
fn test_duplicate_names_warn_but_succeed() {
    let temp_dir = TempDir::new().unwrap();
    let file = temp_dir.path().join("app.cfg");
    fs::write(&file, "a = 1\nA = 2\n").unwrap();

    let output = run(&["get", path_str(&file), "a"]);
    assert_success(&output, "get");
    assert_eq!(stdout(&output), "1\n");
    assert!(String::from_utf8_lossy(&output.stderr).contains("warning:"));
}

#[test]
fn test_lock_get_unlock() {
    let temp_dir = TempDir::new().unwrap();
    let file = temp_dir.path().join("secret.cfg");
    fs::write(&file, "api.token = hunter2\nhost = example.org\n").unwrap();
    let file = path_str(&file);

    assert_success(&run_with_passphrase(&["lock", file], "pw\n"), "lock");
    let locked = fs::read_to_string(file).unwrap();
    assert!(!locked.contains("hunter2"));
    assert!(locked.contains("encryption.keySafe = \""));
    assert!(locked.contains("encryption.data = \""));

    let output = run_with_passphrase(&["get", file, "api.token"], "pw\n");
    assert_success(&output, "get");
    assert_eq!(stdout(&output), "hunter2\n");

    assert_success(&run_with_passphrase(&["unlock", file], "pw\n"), "unlock");
    let unlocked = fs::read_to_string(file).unwrap();
    assert!(unlocked.contains("api.token = hunter2"));
    assert!(!unlocked.contains("encryption."));
}

#[test]
fn test_set_on_locked_file_stays_encrypted() {
    let temp_dir = TempDir::new().unwrap();
    let file = temp_dir.path().join("secret.cfg");
    fs::write(&file, "a = 1\n").unwrap();
    let file = path_str(&file);

    assert_success(&run_with_passphrase(&["lock", file], "pw"), "lock");
    assert_success(
        &run_with_passphrase(&["set", file, "b", "topsecret"], "pw"),
        "set",
    );
    let contents = fs::read_to_string(file).unwrap();
    assert!(!contents.contains("topsecret"));

    let output = run_with_passphrase(&["get", file, "b"], "pw");
    assert_success(&output, "get");
    assert_eq!(stdout(&output), "topsecret\n");
}

#[test]
fn test_lock_changes_passphrase() {
    let temp_dir = TempDir::new().unwrap();
    let file = temp_dir.path().join("secret.cfg");
    fs::write(&file, "token = abc\n").unwrap();
    let file = path_str(&file);

    assert_success(&run_with_passphrase(&["lock", file], "old\n"), "lock");
    assert_success(
        &run_with_passphrase(&["lock", file], "old\nnew\n"),
        "re-lock",
    );

    assert!(!run_with_passphrase(&["get", file, "token"], "old\n").status.success());
    let output = run_with_passphrase(&["get", file, "token"], "new\n");
    assert_success(&output, "get");
    assert_eq!(stdout(&output), "abc\n");
}

#[test]
fn test_wrong_passphrase_fails() {
    let temp_dir = TempDir::new().unwrap();
    let file = temp_dir.path().join("secret.cfg");
    fs::write(&file, "a = 1\n").unwrap();
    let file = path_str(&file);

    assert_success(&run_with_passphrase(&["lock", file], "right"), "lock");
    let before = fs::read(file).unwrap();

    let output = run_with_passphrase(&["set", file, "a", "2"], "wrong");
    assert!(!output.status.success());
    assert_eq!(fs::read(file).unwrap(), before);
}

#[test]
fn test_new_file_in_requested_encoding() {
    let temp_dir = TempDir::new().unwrap();
    let file = temp_dir.path().join("latin.cfg");
    let file = path_str(&file);

    assert_success(
        &run(&["--encoding", "windows-1252", "set", file, "name", "café"]),
        "set",
    );
    let bytes = fs::read(file).unwrap();
    assert_eq!(
        bytes,
        b".encoding = \"windows-1252\"\nname = \"caf\xe9\"\n".to_vec()
    );

    let output = run(&["get", file, "name"]);
    assert_success(&output, "get");
    assert_eq!(stdout(&output), "café\n");
}
