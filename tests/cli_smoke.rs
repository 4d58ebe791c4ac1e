use std::process::Command;

use tempfile::tempdir;

const DECK: &str = r#"<!DOCTYPE html>
<html><head><title>Ops Review</title><style>.slide{margin:0}</style></head>
<body>
<div class="slide" id="cover"><h1>Ops Review</h1></div>
<div class="slide" id="latency"><canvas id="latencyChart"></canvas></div>
<script>new Chart(document.getElementById('latencyChart'), {});</script>
</body></html>"#;

#[derive(Debug, serde::Deserialize)]
struct SlideRow {
    index: usize,
    slide_id: Option<String>,
}

#[derive(Debug, serde::Deserialize)]
struct ViewRow {
    title: Option<String>,
    slide_count: usize,
    slides: Vec<SlideRow>,
}

#[test]
fn cli_inspect_json_lists_slides() {
    let dir = tempdir().unwrap();
    let deck_path = dir.path().join("deck.html");
    std::fs::write(&deck_path, DECK).unwrap();

    let output = Command::new(env!("CARGO_BIN_EXE_deck"))
        .args(["inspect", "--json", "--deck"])
        .arg(&deck_path)
        .output()
        .unwrap();
    assert!(output.status.success());

    let view: ViewRow = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(view.title.as_deref(), Some("Ops Review"));
    assert_eq!(view.slide_count, 2);
    assert_eq!(view.slides[1].index, 1);
    assert_eq!(view.slides[1].slide_id.as_deref(), Some("latency"));
}

#[test]
fn cli_inspect_text_shows_canvases() {
    let dir = tempdir().unwrap();
    let deck_path = dir.path().join("deck.html");
    std::fs::write(&deck_path, DECK).unwrap();

    let output = Command::new(env!("CARGO_BIN_EXE_deck"))
        .args(["inspect", "--deck"])
        .arg(&deck_path)
        .output()
        .unwrap();
    assert!(output.status.success());

    let stdout = String::from_utf8(output.stdout).unwrap();
    assert!(stdout.starts_with("title: Ops Review\n"));
    assert!(stdout.contains("  latency  canvases: [latencyChart]"));
}

#[test]
fn cli_render_slide_writes_standalone_document() {
    let dir = tempdir().unwrap();
    let deck_path = dir.path().join("deck.html");
    let out_path = dir.path().join("slide.html");
    std::fs::write(&deck_path, DECK).unwrap();

    let status = Command::new(env!("CARGO_BIN_EXE_deck"))
        .args(["render-slide", "--index", "1", "--deck"])
        .arg(&deck_path)
        .arg("--out")
        .arg(&out_path)
        .status()
        .unwrap();
    assert!(status.success());

    let html = std::fs::read_to_string(&out_path).unwrap();
    assert!(html.starts_with("<!DOCTYPE html>"));
    assert!(html.contains("latencyChart"));
    assert!(!html.contains("<h1>Ops Review</h1>"));

    let status = Command::new(env!("CARGO_BIN_EXE_deck"))
        .args(["render-slide", "--index", "9", "--deck"])
        .arg(&deck_path)
        .status()
        .unwrap();
    assert!(!status.success());
}

#[test]
fn cli_cache_export_and_prune_on_empty_cache() {
    let dir = tempdir().unwrap();
    let db_path = dir.path().join("cache.sqlite");
    let out_path = dir.path().join("export.jsonl");

    let status = Command::new(env!("CARGO_BIN_EXE_deck"))
        .arg("cache-export")
        .arg("--db")
        .arg(&db_path)
        .arg("--out")
        .arg(&out_path)
        .status()
        .unwrap();
    assert!(status.success());
    assert_eq!(std::fs::read_to_string(&out_path).unwrap(), "");

    let output = Command::new(env!("CARGO_BIN_EXE_deck"))
        .arg("cache-prune")
        .arg("--db")
        .arg(&db_path)
        .args(["--max-rows", "10"])
        .output()
        .unwrap();
    assert!(output.status.success());
    assert_eq!(
        String::from_utf8(output.stdout).unwrap().trim(),
        "pruned 0 rows; 0 rows remain"
    );
}

#[test]
fn cli_generate_without_request_fails() {
    let dir = tempdir().unwrap();
    let status = Command::new(env!("CARGO_BIN_EXE_deck"))
        .arg("generate")
        .arg("--out")
        .arg(dir.path().join("deck.html"))
        .status()
        .unwrap();
    assert!(!status.success());
}
