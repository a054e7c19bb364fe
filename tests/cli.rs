use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn testgen_binary() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_testgen"))
}

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();

    let docs_dir = root.join("docs");
    fs::create_dir_all(&docs_dir).unwrap();
    fs::write(
        docs_dir.join("product_specs.md"),
        "# Product Specs\n\nDiscount code SAVE15 gives 15% off the cart subtotal.",
    )
    .unwrap();

    let config_content = format!(
        r#"[db]
path = "{}/data/testgen.sqlite"

[retrieval]
default_k = 3
max_k = 8

[embedding]
provider = "disabled"

[generation]
provider = "disabled"
"#,
        root.display()
    );

    let config_path = config_dir.join("testgen.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_testgen(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = testgen_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path)
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("Failed to run testgen binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    (stdout, stderr, output.status.success())
}

#[test]
fn test_init_creates_database() {
    let (tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) = run_testgen(&config_path, &["init"]);
    assert!(success, "init failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("initialized"));
    assert!(tmp.path().join("data").join("testgen.sqlite").exists());
}

#[test]
fn test_init_idempotent() {
    let (_tmp, config_path) = setup_test_env();

    let (_, _, first) = run_testgen(&config_path, &["init"]);
    assert!(first, "First init failed");
    let (_, _, second) = run_testgen(&config_path, &["init"]);
    assert!(second, "Second init failed");
}

#[test]
fn test_status_on_fresh_database_is_empty() {
    let (_tmp, config_path) = setup_test_env();
    run_testgen(&config_path, &["init"]);

    let (stdout, stderr, success) = run_testgen(&config_path, &["status"]);
    assert!(success, "status failed: {}", stderr);
    assert!(stdout.contains("phase: EMPTY"));
    assert!(stdout.contains("records: 0"));
}

#[test]
fn test_index_without_embedding_provider_fails() {
    let (tmp, config_path) = setup_test_env();
    run_testgen(&config_path, &["init"]);

    let docs = tmp.path().join("docs");
    let (_, stderr, success) = run_testgen(&config_path, &["index", docs.to_str().unwrap()]);
    assert!(!success, "index should fail with embeddings disabled");
    assert!(stderr.contains("disabled"), "stderr: {}", stderr);

    let (stdout, _, _) = run_testgen(&config_path, &["status"]);
    assert!(stdout.contains("phase: EMPTY"));
}

#[test]
fn test_index_missing_path_fails() {
    let (tmp, config_path) = setup_test_env();
    let missing = tmp.path().join("nope.md");

    let (_, stderr, success) = run_testgen(&config_path, &["index", missing.to_str().unwrap()]);
    assert!(!success);
    assert!(stderr.contains("No such file or directory"));
}

#[test]
fn test_index_rejects_unknown_format_tag() {
    let (tmp, config_path) = setup_test_env();
    let docs = tmp.path().join("docs");

    let (_, stderr, success) = run_testgen(
        &config_path,
        &["index", docs.to_str().unwrap(), "--format", "xlsx"],
    );
    assert!(!success);
    assert!(stderr.contains("xlsx"), "stderr: {}", stderr);
}

#[test]
fn test_search_on_empty_index_fails() {
    let (_tmp, config_path) = setup_test_env();
    run_testgen(&config_path, &["init"]);

    let (_, stderr, success) = run_testgen(&config_path, &["search", "discount"]);
    assert!(!success);
    assert!(stderr.to_lowercase().contains("empty"), "stderr: {}", stderr);
}

#[test]
fn test_script_requires_markup_file() {
    let (tmp, config_path) = setup_test_env();
    run_testgen(&config_path, &["init"]);
    let markup = tmp.path().join("missing.html");

    let (_, stderr, success) = run_testgen(
        &config_path,
        &["script", "TC001", "--markup", markup.to_str().unwrap()],
    );
    assert!(!success);
    assert!(stderr.contains("Failed to read markup"));
}

#[test]
fn test_reset_returns_to_empty() {
    let (_tmp, config_path) = setup_test_env();
    run_testgen(&config_path, &["init"]);

    let (stdout, stderr, success) = run_testgen(&config_path, &["reset"]);
    assert!(success, "reset failed: {}", stderr);
    assert!(stdout.contains("phase: EMPTY"));
}

#[test]
fn test_missing_config_fails() {
    let tmp = TempDir::new().unwrap();
    let (_, _, success) = run_testgen(&tmp.path().join("absent.toml"), &["status"]);
    assert!(!success);
}
