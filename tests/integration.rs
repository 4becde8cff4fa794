use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use tempfile::TempDir;

const ACKNOWLEDGE: &str =
    "Got it! Thanks for uploading your file. Is there anything else you'd like to ask?";
const FALLBACK: &str = "Thank you for your query. Our team will review it and respond shortly.";

fn parley_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("parley");
    path
}

/// Config with both model providers disabled and the vector store pointed
/// at a closed port, so nothing leaves the machine.
fn setup_test_env_with_bind(bind: &str) -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();

    let files_dir = root.join("files");
    fs::create_dir_all(&files_dir).unwrap();
    fs::write(
        files_dir.join("pricing.txt"),
        "Our basic plan costs 10 dollars per month. The premium plan costs 25 dollars per month.",
    )
    .unwrap();

    let config_content = format!(
        r#"[db]
path = "{root}/data/parley.sqlite"

[vector_store]
url = "http://127.0.0.1:1"
timeout_secs = 2

[cache]
dir = "{root}/cache"

[server]
bind = "{bind}"
"#,
        root = root.display(),
        bind = bind,
    );

    let config_path = config_dir.join("parley.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn setup_test_env() -> (TempDir, PathBuf) {
    setup_test_env_with_bind("127.0.0.1:7340")
}

fn run_parley(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = parley_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("Failed to run parley binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    let success = output.status.success();
    (stdout, stderr, success)
}

/// Value of a `label: value` line in command output.
fn field(stdout: &str, label: &str) -> String {
    let prefix = format!("{}: ", label);
    stdout
        .lines()
        .find_map(|l| l.strip_prefix(&prefix))
        .unwrap_or_else(|| panic!("no '{}' in output: {}", label, stdout))
        .to_string()
}

/// init + workspace `acme` + thread `visitor-1`.
fn seed(config_path: &Path) {
    let (_, stderr, ok) = run_parley(config_path, &["init"]);
    assert!(ok, "init failed: {}", stderr);
    let (_, stderr, ok) = run_parley(
        config_path,
        &["workspace", "add", "acme", "--name", "Acme", "--role", "support"],
    );
    assert!(ok, "workspace add failed: {}", stderr);
    let (_, stderr, ok) = run_parley(config_path, &["thread", "add", "acme", "visitor-1"]);
    assert!(ok, "thread add failed: {}", stderr);
}

#[test]
fn test_init_creates_database() {
    let (tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) = run_parley(&config_path, &["init"]);
    assert!(success, "init failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("initialized"));
    assert!(tmp.path().join("data/parley.sqlite").exists());
}

#[test]
fn test_init_idempotent() {
    let (_tmp, config_path) = setup_test_env();

    let (_, _, success1) = run_parley(&config_path, &["init"]);
    assert!(success1, "First init failed");

    let (_, _, success2) = run_parley(&config_path, &["init"]);
    assert!(success2, "Second init failed (not idempotent)");
}

#[test]
fn test_invalid_config_is_rejected() {
    let (tmp, config_path) = setup_test_env();
    let mut content = fs::read_to_string(&config_path).unwrap();
    content.push_str("\n[chunking]\ntarget_size = 50\nmin_size = 100\n");
    fs::write(&config_path, content).unwrap();

    let (_, stderr, success) = run_parley(&config_path, &["init"]);
    assert!(!success);
    assert!(stderr.contains("min_size"), "stderr: {}", stderr);
    assert!(!tmp.path().join("data/parley.sqlite").exists());
}

#[test]
fn test_seed_workspace_thread_and_message() {
    let (_tmp, config_path) = setup_test_env();
    seed(&config_path);

    let (stdout, stderr, success) = run_parley(
        &config_path,
        &["message", "add", "visitor-1", "--text", "Hello there"],
    );
    assert!(success, "message add failed: {}", stderr);
    assert!(field(&stdout, "message id").parse::<i64>().is_ok());
    assert_eq!(field(&stdout, "kind"), "message");
}

#[test]
fn test_duplicate_workspace_slug_fails() {
    let (_tmp, config_path) = setup_test_env();
    seed(&config_path);

    let (_, _, success) = run_parley(&config_path, &["workspace", "add", "acme"]);
    assert!(!success, "duplicate slug should be rejected");
}

#[test]
fn test_thread_in_unknown_workspace_fails() {
    let (_tmp, config_path) = setup_test_env();
    run_parley(&config_path, &["init"]);

    let (_, stderr, success) = run_parley(&config_path, &["thread", "add", "nope", "visitor-1"]);
    assert!(!success);
    assert!(stderr.contains("workspace not found"), "stderr: {}", stderr);
}

#[test]
fn test_upload_is_acknowledged_and_memoized() {
    let (tmp, config_path) = setup_test_env();
    seed(&config_path);

    let file = tmp.path().join("files/pricing.txt");
    let (stdout, stderr, success) = run_parley(
        &config_path,
        &["message", "add", "visitor-1", "--file", file.to_str().unwrap()],
    );
    assert!(success, "upload failed: {}", stderr);
    assert_eq!(field(&stdout, "kind"), "knowledge");
    let message_id = field(&stdout, "message id");

    let (stdout, stderr, success) =
        run_parley(&config_path, &["generate", "visitor-1", &message_id]);
    assert!(success, "generate failed: {}", stderr);
    assert_eq!(field(&stdout, "status"), "success");
    assert!(stdout.contains(ACKNOWLEDGE));

    let (again, _, _) = run_parley(&config_path, &["generate", "visitor-1", &message_id]);
    assert_eq!(stdout, again);
}

#[test]
fn test_missing_message_gets_fallback() {
    let (_tmp, config_path) = setup_test_env();
    seed(&config_path);

    let (stdout, stderr, success) = run_parley(&config_path, &["generate", "visitor-1", "999"]);
    assert!(success, "generate failed: {}", stderr);
    assert_eq!(field(&stdout, "status"), "success");
    assert!(stdout.contains(FALLBACK));
}

#[test]
fn test_disabled_completion_reports_fail_with_fallback() {
    let (_tmp, config_path) = setup_test_env();
    seed(&config_path);

    let (stdout, _, _) = run_parley(
        &config_path,
        &["message", "add", "visitor-1", "--text", "What does the premium plan cost?"],
    );
    let message_id = field(&stdout, "message id");

    let (stdout, stderr, success) =
        run_parley(&config_path, &["generate", "visitor-1", &message_id]);
    assert!(success, "generate failed: {}", stderr);
    assert_eq!(field(&stdout, "status"), "fail");
    assert!(stdout.contains(FALLBACK));
}

#[test]
fn test_prepare_empty_corpus() {
    let (_tmp, config_path) = setup_test_env();
    seed(&config_path);

    let (stdout, stderr, success) = run_parley(&config_path, &["prepare", "visitor-1"]);
    assert!(success, "prepare failed: {}", stderr);
    assert_eq!(field(&stdout, "status"), "success");
    assert_eq!(field(&stdout, "records"), "0");
}

#[test]
fn test_knowledge_add_and_remove_with_store_down() {
    let (_tmp, config_path) = setup_test_env();
    seed(&config_path);

    let (stdout, stderr, success) = run_parley(
        &config_path,
        &[
            "knowledge",
            "add",
            "--workspace",
            "acme",
            "--note",
            "Refunds are processed within 30 days.",
        ],
    );
    assert!(success, "knowledge add failed: {}", stderr);
    assert_eq!(field(&stdout, "title"), "Refunds are processed within 3");
    assert_eq!(field(&stdout, "stored"), "false");
    let id = field(&stdout, "knowledge id");

    let (stdout, stderr, success) = run_parley(&config_path, &["knowledge", "remove", &id]);
    assert!(success, "knowledge remove failed: {}", stderr);
    assert!(stdout.contains("removed knowledge"));

    let (_, _, success) = run_parley(&config_path, &["knowledge", "remove", &id]);
    assert!(!success, "second remove should fail");
}

#[test]
fn test_knowledge_add_requires_note_or_file() {
    let (_tmp, config_path) = setup_test_env();
    seed(&config_path);

    let (_, _, success) = run_parley(&config_path, &["knowledge", "add", "--workspace", "acme"]);
    assert!(!success);
}

// ─── HTTP server ────────────────────────────────────────────────────

fn find_free_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

fn wait_for_server(port: u16) {
    let client = reqwest::blocking::Client::new();
    let url = format!("http://127.0.0.1:{}/health", port);
    for _ in 0..50 {
        std::thread::sleep(std::time::Duration::from_millis(100));
        if let Ok(resp) = client.get(&url).send() {
            if resp.status().is_success() {
                return;
            }
        }
    }
    panic!("Server did not become ready within 5 seconds");
}

struct ServerGuard(Child);

impl Drop for ServerGuard {
    fn drop(&mut self) {
        let _ = self.0.kill();
        let _ = self.0.wait();
    }
}

#[test]
fn test_http_endpoints() {
    let port = find_free_port();
    let (_tmp, config_path) = setup_test_env_with_bind(&format!("127.0.0.1:{}", port));
    seed(&config_path);

    let child = Command::new(parley_binary())
        .arg("--config")
        .arg(&config_path)
        .arg("serve")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .unwrap();
    let _guard = ServerGuard(child);
    wait_for_server(port);

    let client = reqwest::blocking::Client::new();
    let base = format!("http://127.0.0.1:{}", port);

    let body: serde_json::Value = client
        .post(format!("{}/api/chat/visitor-1/prepare", base))
        .send()
        .unwrap()
        .json()
        .unwrap();
    assert_eq!(body["status"], "success");
    assert_eq!(body["records"], 0);

    let body: serde_json::Value = client
        .post(format!("{}/api/chat/visitor-1/inference/424242", base))
        .send()
        .unwrap()
        .json()
        .unwrap();
    assert_eq!(body["status"], "success");
    assert_eq!(body["response"], FALLBACK);

    // "Plain text." as base64
    let resp = client
        .post(format!("{}/api/workspaces/acme/knowledge", base))
        .json(&serde_json::json!({
            "note": "Opening hours are 9 to 5.",
            "file": {"name": "notes.txt", "mime_type": "text/plain", "data_base64": "UGxhaW4gdGV4dC4="}
        }))
        .send()
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: serde_json::Value = resp.json().unwrap();
    assert_eq!(body["status"], "success");
    assert_eq!(body["title"], "notes.txt");
    let id = body["knowledge_id"].as_i64().unwrap();

    let resp = client
        .post(format!("{}/api/workspaces/acme/knowledge", base))
        .json(&serde_json::json!({ "shared": true }))
        .send()
        .unwrap();
    assert_eq!(resp.status(), 400);
    let body: serde_json::Value = resp.json().unwrap();
    assert_eq!(body["error"]["code"], "bad_request");

    let resp = client
        .post(format!("{}/api/workspaces/missing/knowledge", base))
        .json(&serde_json::json!({ "note": "x" }))
        .send()
        .unwrap();
    assert_eq!(resp.status(), 404);

    let resp = client
        .delete(format!("{}/api/knowledge/{}", base, id))
        .send()
        .unwrap();
    assert_eq!(resp.status(), 200);

    let resp = client
        .delete(format!("{}/api/knowledge/{}", base, id))
        .send()
        .unwrap();
    assert_eq!(resp.status(), 404);
    let body: serde_json::Value = resp.json().unwrap();
    assert_eq!(body["error"]["code"], "not_found");
}
