use std::{
    fs,
    path::Path,
    process::{Command, Output},
};

const API_KEY_ENV: &str = "FANOUT_CLI_TEST_API_KEY";

fn write_config(dir: &Path) -> std::path::PathBuf {
    let config = dir.join("fanout.toml");
    fs::write(
        &config,
        format!(
            "[mail]\napi_key_env = \"{API_KEY_ENV}\"\nfrom = {{ name = \"Ops\", email = \"ops@example.test\" }}\n"
        ),
    )
    .unwrap();
    config
}

fn fanout_mail(dir: &Path, extra: &[&str]) -> Output {
    let config = write_config(dir);
    Command::new(env!("CARGO_BIN_EXE_fanout"))
        .current_dir(dir)
        .env_remove(API_KEY_ENV)
        .env("RUST_LOG", "info")
        .arg("--config")
        .arg(&config)
        .arg("mail")
        .args(extra)
        .output()
        .unwrap()
}

#[test]
fn mail_with_no_recipients_needs_no_api_key() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("emails.json"), "[]").unwrap();

    let output = fanout_mail(dir.path(), &["-r", "emails.json", "-m", "hi"]);

    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(output.status.success(), "stderr: {stderr}");
    assert!(stderr.contains("No recipients found."));
    assert!(!stderr.contains(API_KEY_ENV));
}

#[test]
fn mail_with_no_message_needs_no_api_key() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("emails.json"), r#"[{"email": "ann@example.test"}]"#).unwrap();

    let output = fanout_mail(dir.path(), &["-r", "emails.json"]);

    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(output.status.success(), "stderr: {stderr}");
    assert!(stderr.contains("No message to send."));
    assert!(!stderr.contains(API_KEY_ENV));
}

#[test]
fn mail_with_work_to_do_requires_the_api_key() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("emails.json"), r#"[{"email": "ann@example.test"}]"#).unwrap();

    let output = fanout_mail(dir.path(), &["-r", "emails.json", "-m", "hi"]);

    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains(API_KEY_ENV));
}

#[test]
fn dry_run_prints_the_request_body() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("emails.json"), r#"[{"email": "ann@example.test"}]"#).unwrap();

    let output = fanout_mail(dir.path(), &["-r", "emails.json", "-m", "hi", "--dry-run"]);

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("\"html\": \"<p>hi</p>\""));
}
