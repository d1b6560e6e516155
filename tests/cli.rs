use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use mockito::Matcher;
use tempfile::TempDir;

fn pdfman_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("pdfman");
    path
}

/// Single-page PDF showing `phrase`.
fn minimal_pdf(phrase: &str) -> Vec<u8> {
    let content = format!("BT /F1 12 Tf 100 700 Td ({}) Tj ET", phrase);
    let mut out = Vec::new();
    out.extend_from_slice(b"%PDF-1.4\n");
    let o1 = out.len();
    out.extend_from_slice(b"1 0 obj << /Type /Catalog /Pages 2 0 R >> endobj\n");
    let o2 = out.len();
    out.extend_from_slice(b"2 0 obj << /Type /Pages /Kids [3 0 R] /Count 1 >> endobj\n");
    let o3 = out.len();
    out.extend_from_slice(b"3 0 obj << /Type /Page /Parent 2 0 R /MediaBox [0 0 612 792] /Contents 4 0 R /Resources << /Font << /F1 5 0 R >> >> >> endobj\n");
    let o4 = out.len();
    out.extend_from_slice(
        format!(
            "4 0 obj << /Length {} >> stream\n{}\nendstream endobj\n",
            content.len(),
            content
        )
        .as_bytes(),
    );
    let o5 = out.len();
    out.extend_from_slice(
        b"5 0 obj << /Type /Font /Subtype /Type1 /BaseFont /Helvetica >> endobj\n",
    );
    let xref_start = out.len();
    out.extend_from_slice(b"xref\n0 6\n");
    out.extend_from_slice(format!("{:010} 65535 f \n", 0).as_bytes());
    for offset in [o1, o2, o3, o4, o5] {
        out.extend_from_slice(format!("{:010} 00000 n \n", offset).as_bytes());
    }
    out.extend_from_slice(b"trailer << /Size 6 /Root 1 0 R >>\nstartxref\n");
    out.extend_from_slice(format!("{}\n", xref_start).as_bytes());
    out.extend_from_slice(b"%%EOF\n");
    out
}

fn setup_test_env(generation: &str) -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();

    let files_dir = root.join("files");
    fs::create_dir_all(&files_dir).unwrap();
    fs::write(files_dir.join("Quantum Notes.pdf"), minimal_pdf("quantum notes")).unwrap();
    fs::write(files_dir.join("other.pdf"), minimal_pdf("another paper")).unwrap();

    let config_content = format!(
        r#"[storage]
data_dir = "{}/data"

{}
"#,
        root.display(),
        generation
    );

    let config_path = config_dir.join("pdfman.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_pdfman_env(config_path: &Path, args: &[&str], env: &[(&str, &str)]) -> (String, String, bool) {
    let binary = pdfman_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .envs(env.iter().copied())
        .env_remove("RUST_LOG")
        .output()
        .unwrap_or_else(|e| panic!("Failed to run pdfman binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    (stdout, stderr, output.status.success())
}

fn run_pdfman(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    run_pdfman_env(config_path, args, &[])
}

fn files(config_path: &Path, name: &str) -> String {
    config_path
        .parent()
        .unwrap()
        .parent()
        .unwrap()
        .join("files")
        .join(name)
        .to_str()
        .unwrap()
        .to_string()
}

/// Hash printed by `docs add`: "Added <hash> to <topic>: <title>".
fn added_hash(stdout: &str) -> String {
    stdout
        .split_whitespace()
        .nth(1)
        .unwrap_or_else(|| panic!("unexpected add output: {}", stdout))
        .to_string()
}

#[test]
fn test_init_seeds_prompts() {
    let (tmp, config) = setup_test_env("");

    let (stdout, stderr, success) = run_pdfman(&config, &["init"]);
    assert!(success, "init failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("Data directory ready"));
    assert!(tmp.path().join("data/userprompt.json").exists());

    let (stdout, _, success) = run_pdfman(&config, &["init"]);
    assert!(success, "second init should succeed");
    assert!(!stdout.contains("Wrote default prompt templates"));
}

#[test]
fn test_topic_lifecycle() {
    let (_tmp, config) = setup_test_env("");
    run_pdfman(&config, &["init"]);

    let (stdout, _, success) = run_pdfman(&config, &["topics", "list"]);
    assert!(success);
    assert!(stdout.contains("No topics."));

    let (stdout, stderr, success) = run_pdfman(&config, &["topics", "create", "physics"]);
    assert!(success, "create failed: {}", stderr);
    assert!(stdout.contains("Created topic physics"));

    let (stdout, _, success) = run_pdfman(&config, &["topics", "create", "physics"]);
    assert!(success, "non-strict create is idempotent");
    assert!(stdout.contains("already exists"));

    let (_, _, success) = run_pdfman(&config, &["topics", "create", "physics", "--strict"]);
    assert!(!success, "strict create of an existing topic should fail");

    let (_, stderr, success) = run_pdfman(&config, &["topics", "create", "../escape"]);
    assert!(!success);
    assert!(stderr.contains("invalid topic name"), "stderr: {}", stderr);

    let (stdout, _, success) = run_pdfman(&config, &["topics", "rename", "physics", "optics"]);
    assert!(success);
    assert!(stdout.contains("Renamed topic physics to optics"));

    let (stdout, _, _) = run_pdfman(&config, &["topics", "list"]);
    assert!(stdout.contains("optics  (0 documents)"), "list: {}", stdout);

    let (stdout, _, success) = run_pdfman(&config, &["topics", "delete", "optics"]);
    assert!(success);
    assert!(stdout.contains("Deleted topic optics"));
}

#[test]
fn test_document_workflow() {
    let (tmp, config) = setup_test_env("");
    run_pdfman(&config, &["init"]);
    run_pdfman(&config, &["topics", "create", "a"]);
    run_pdfman(&config, &["topics", "create", "b"]);

    let pdf = files(&config, "Quantum Notes.pdf");
    let (stdout, stderr, success) = run_pdfman(&config, &["docs", "add", "a", &pdf]);
    assert!(success, "add failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("Quantum Notes"), "title from filename: {}", stdout);
    let hash = added_hash(&stdout);
    assert_eq!(hash.len(), 64);

    // Same bytes into another topic: reported, not stored twice.
    let (stdout, _, success) = run_pdfman(&config, &["docs", "add", "b", &pdf]);
    assert!(success);
    assert!(stdout.contains("Already stored in topic a"), "dup: {}", stdout);
    let (stdout, _, _) = run_pdfman(&config, &["docs", "list", "b"]);
    assert!(stdout.contains("No documents in b."));

    let (stdout, _, success) = run_pdfman(
        &config,
        &["docs", "edit", &hash, "--title", "Edited", "--year", "1999", "--author", "Ada"],
    );
    assert!(success, "edit failed");
    assert!(stdout.contains("\"title\": \"Edited\""));
    assert!(stdout.contains(&hash));

    let (stdout, _, _) = run_pdfman(&config, &["docs", "list", "a"]);
    assert!(stdout.contains(&format!("{}  1999  Edited", hash)), "list: {}", stdout);

    let (stdout, _, success) = run_pdfman(&config, &["docs", "list", "a", "--json"]);
    assert!(success);
    let parsed: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(parsed.as_array().unwrap().len(), 1);

    // Topic with a document cannot be deleted.
    let (_, stderr, success) = run_pdfman(&config, &["topics", "delete", "a"]);
    assert!(!success);
    assert!(stderr.contains("still contains"), "stderr: {}", stderr);

    let (_, _, success) = run_pdfman(&config, &["docs", "move", &hash, "missing"]);
    assert!(!success, "move to a missing topic should fail");

    let (stdout, _, success) = run_pdfman(&config, &["docs", "move", &hash, "b"]);
    assert!(success);
    assert!(stdout.contains(&format!("Moved {} from a to b", hash)));

    let (stdout, _, _) = run_pdfman(&config, &["docs", "show", &hash]);
    assert!(stdout.contains("\"topic\": \"b\""), "show: {}", stdout);

    let out = tmp.path().join("exported.pdf");
    let (stdout, _, success) =
        run_pdfman(&config, &["docs", "export", &hash, out.to_str().unwrap()]);
    assert!(success);
    assert!(stdout.contains("application/pdf"));
    assert_eq!(fs::read(&out).unwrap(), fs::read(&pdf).unwrap());

    let (stdout, _, success) = run_pdfman(&config, &["docs", "delete", &hash]);
    assert!(success);
    assert!(stdout.contains(&format!("Deleted {} from b", hash)));

    let (_, stderr, success) = run_pdfman(&config, &["docs", "show", &hash]);
    assert!(!success);
    assert!(stderr.contains("document not found"));
}

#[test]
fn test_summary_with_disabled_backend() {
    let (_tmp, config) = setup_test_env("");
    run_pdfman(&config, &["init"]);
    run_pdfman(&config, &["topics", "create", "t"]);
    let (stdout, _, _) = run_pdfman(&config, &["docs", "add", "t", &files(&config, "other.pdf")]);
    let hash = added_hash(&stdout);

    let (_, stderr, success) = run_pdfman(&config, &["summary", "generate", &hash]);
    assert!(!success);
    assert!(stderr.contains("generation is disabled"), "stderr: {}", stderr);

    let (_, stderr, success) = run_pdfman(&config, &["summary", "show", &hash]);
    assert!(!success);
    assert!(stderr.contains("summary not found"), "stderr: {}", stderr);

    let (stdout, _, _) = run_pdfman(&config, &["docs", "list", "t"]);
    assert!(!stdout.contains("[summary]"));
}

#[test]
fn test_prompt_templates() {
    let (_tmp, config) = setup_test_env("");
    run_pdfman(&config, &["init"]);

    let (stdout, _, success) = run_pdfman(&config, &["prompts", "list"]);
    assert!(success);
    assert!(stdout.contains("summarize  (summaries)"), "list: {}", stdout);

    let (stdout, _, success) =
        run_pdfman(&config, &["prompts", "set", "brief", "One line please:\n{context}"]);
    assert!(success);
    assert!(stdout.contains("Saved template brief"));

    let (_, _, success) = run_pdfman(&config, &["prompts", "set", "broken", "no placeholder"]);
    assert!(!success, "template without placeholder should be rejected");

    let (stdout, _, _) = run_pdfman(&config, &["prompts", "show", "brief"]);
    assert!(stdout.contains("{context}"));

    let (_, _, success) = run_pdfman(&config, &["prompts", "remove", "summarize"]);
    assert!(!success, "summary template cannot be removed");

    let (stdout, _, success) = run_pdfman(&config, &["prompts", "remove", "brief"]);
    assert!(success);
    assert!(stdout.contains("Removed template brief"));
}

#[test]
fn test_summary_generation_via_gemini() {
    let mut server = mockito::Server::new();
    let gemini = server
        .mock("POST", "/models/test-model:streamGenerateContent")
        .match_query(Matcher::UrlEncoded("alt".into(), "sse".into()))
        .match_header("x-goog-api-key", "secret")
        .match_body(Matcher::Regex("quantum notes".into()))
        .with_status(200)
        .with_header("content-type", "text/event-stream")
        .with_body(concat!(
            "data: {\"candidates\":[{\"content\":{\"parts\":[{\"text\":\"A short \"}]}}]}\r\n\r\n",
            "data: {\"candidates\":[{\"content\":{\"parts\":[{\"text\":\"summary.\"}]}}]}\r\n\r\n",
        ))
        .create();
    let generation = format!(
        r#"[generation]
provider = "gemini"
model = "test-model"
api_key_env = "PDFMAN_TEST_KEY"
base_url = "{}"
"#,
        server.url()
    );
    let (_tmp, config) = setup_test_env(&generation);
    run_pdfman(&config, &["init"]);
    run_pdfman(&config, &["topics", "create", "t"]);
    let (stdout, _, _) = run_pdfman(
        &config,
        &["docs", "add", "t", &files(&config, "Quantum Notes.pdf")],
    );
    let hash = added_hash(&stdout);

    let (stdout, stderr, success) = run_pdfman_env(
        &config,
        &["summary", "generate", &hash],
        &[("PDFMAN_TEST_KEY", "secret")],
    );
    assert!(success, "generate failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("A short summary."));
    assert!(stderr.contains("Summary saved."));

    gemini.assert();

    let (stdout, _, success) = run_pdfman(&config, &["summary", "show", &hash]);
    assert!(success);
    assert_eq!(stdout.trim(), "A short summary.");

    let (stdout, _, _) = run_pdfman(&config, &["docs", "list", "t"]);
    assert!(stdout.contains("[summary]"));

    let (stdout, _, success) = run_pdfman(&config, &["summary", "delete", &hash]);
    assert!(success);
    assert!(stdout.contains("Deleted summary"));
}
