use std::error::Error;
use std::fs;
use std::path::{Path, PathBuf};

use assert_cmd::Command;
use predicates::prelude::*;
use serde_json::Value;
use tempfile::tempdir;

const SCENE: &str = r##"{
    "width": 400,
    "height": 600,
    "background": "#101010",
    "color": "#eeeeee",
    "elements": [
        { "id": "toolbar", "kind": "box", "classes": ["hidden-print"], "w": 400, "h": 40 },
        { "id": "title", "kind": "text", "x": 16, "y": 60, "font_size": 18, "text": "Dose summary" }
    ]
}"##;

fn write_scene(dir: &Path) -> PathBuf {
    let path = dir.join("scene.json");
    fs::write(&path, SCENE).unwrap();
    path
}

fn cli(scratch: &Path) -> Command {
    let mut cmd = Command::cargo_bin("rendershare-cli").unwrap();
    cmd.arg("--scratch-dir").arg(scratch);
    cmd
}

fn reply(stdout: &[u8]) -> Value {
    serde_json::from_slice(stdout).expect("stdout carries one JSON reply")
}

#[test]
fn render_writes_pdf_into_scratch() -> Result<(), Box<dyn Error>> {
    let dir = tempdir()?;
    let scene = write_scene(dir.path());
    let scratch = dir.path().join("scratch");

    let output = cli(&scratch)
        .args(["render", "--name", "dose", "--scene"])
        .arg(&scene)
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();

    let reply = reply(&output);
    assert_eq!(reply["status"], "resolve");
    assert_eq!(reply["message"], "PDF generated");
    let path = PathBuf::from(reply["path"].as_str().unwrap());
    assert_eq!(path.parent(), Some(scratch.as_path()));
    assert!(path
        .file_name()
        .unwrap()
        .to_string_lossy()
        .starts_with("dose_"));
    assert!(fs::read(&path)?.starts_with(b"%PDF-1.4"));
    Ok(())
}

#[test]
fn share_copies_into_outbox_with_sidecar() -> Result<(), Box<dyn Error>> {
    let dir = tempdir()?;
    let scene = write_scene(dir.path());
    let outbox = dir.path().join("outbox");

    let output = cli(&dir.path().join("scratch"))
        .args(["share", "--title", "Send dose", "--scene"])
        .arg(&scene)
        .arg("--outbox")
        .arg(&outbox)
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();

    let reply = reply(&output);
    assert_eq!(reply["message"], "PDF generated and shared");
    let path = PathBuf::from(reply["path"].as_str().unwrap());
    let file_name = path.file_name().unwrap().to_string_lossy().into_owned();
    assert!(file_name.starts_with("document_"));
    assert!(outbox.join(&file_name).exists());

    let sidecar: Value =
        serde_json::from_str(&fs::read_to_string(outbox.join(format!("{file_name}.share.json")))?)?;
    assert_eq!(sidecar["title"], "Send dose");
    assert_eq!(sidecar["mime_type"], "application/pdf");
    Ok(())
}

#[test]
fn share_existing_missing_file_rejects() -> Result<(), Box<dyn Error>> {
    let dir = tempdir()?;
    let missing = dir.path().join("gone.pdf");

    cli(&dir.path().join("scratch"))
        .arg("share-existing")
        .arg(&missing)
        .arg("--outbox")
        .arg(dir.path().join("outbox"))
        .assert()
        .failure()
        .stdout(predicate::str::contains("\"status\": \"reject\""))
        .stdout(predicate::str::contains("ARTIFACT_NOT_FOUND"))
        .stdout(predicate::str::contains("PDF file not found at path"));
    Ok(())
}

#[test]
fn share_existing_shares_file() -> Result<(), Box<dyn Error>> {
    let dir = tempdir()?;
    let existing = dir.path().join("earlier.pdf");
    fs::write(&existing, b"%PDF-1.4\n")?;
    let outbox = dir.path().join("outbox");

    cli(&dir.path().join("scratch"))
        .arg("share-existing")
        .arg(&existing)
        .arg("--outbox")
        .arg(&outbox)
        .assert()
        .success()
        .stdout(predicate::str::contains("PDF shared"));

    assert!(outbox.join("earlier.pdf").exists());
    Ok(())
}

#[test]
fn print_goes_through_spool_and_shares() -> Result<(), Box<dyn Error>> {
    let dir = tempdir()?;
    let scene = write_scene(dir.path());
    let spool = dir.path().join("spool");
    let outbox = dir.path().join("outbox");

    let output = cli(&dir.path().join("scratch"))
        .args(["print", "--name", "label", "--scene"])
        .arg(&scene)
        .arg("--spool")
        .arg(&spool)
        .arg("--outbox")
        .arg(&outbox)
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();

    let reply = reply(&output);
    assert_eq!(reply["message"], "PDF printed and shared");
    let path = PathBuf::from(reply["path"].as_str().unwrap());
    assert_eq!(path.parent(), Some(spool.as_path()));
    assert!(outbox.join(path.file_name().unwrap()).exists());
    Ok(())
}

#[test]
fn missing_scene_is_an_error() -> Result<(), Box<dyn Error>> {
    let dir = tempdir()?;

    cli(&dir.path().join("scratch"))
        .args(["render", "--scene"])
        .arg(dir.path().join("absent.json"))
        .assert()
        .failure()
        .stderr(predicate::str::contains("failed to load scene"));
    Ok(())
}

#[test]
fn sweep_reports_deleted_artifacts() -> Result<(), Box<dyn Error>> {
    let dir = tempdir()?;
    let scratch = dir.path().join("scratch");
    fs::create_dir_all(&scratch)?;
    fs::write(scratch.join("a_1.pdf"), b"%PDF")?;
    fs::write(scratch.join("notes.txt"), b"keep")?;
    std::thread::sleep(std::time::Duration::from_millis(1100));

    let output = cli(&scratch)
        .args(["sweep", "--max-age-secs", "0"])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();

    let report = reply(&output);
    assert_eq!(report["deleted"], 1);
    assert!(!scratch.join("a_1.pdf").exists());
    assert!(scratch.join("notes.txt").exists());
    Ok(())
}

#[test]
fn config_file_controls_page_format() -> Result<(), Box<dyn Error>> {
    let dir = tempdir()?;
    let scene = write_scene(dir.path());
    let config = dir.path().join("config.json");
    fs::write(
        &config,
        r#"{ "page": { "format": "letter" }, "default_base_name": "letter" }"#,
    )?;

    let output = cli(&dir.path().join("scratch"))
        .arg("--config")
        .arg(&config)
        .args(["render", "--scene"])
        .arg(&scene)
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();

    let path = PathBuf::from(reply(&output)["path"].as_str().unwrap().to_string());
    assert!(path
        .file_name()
        .unwrap()
        .to_string_lossy()
        .starts_with("letter_"));
    let text = String::from_utf8_lossy(&fs::read(&path)?).into_owned();
    assert!(text.contains("/MediaBox [0 0 612.000 792.000]"));
    Ok(())
}

#[test]
fn share_keeps_mirror_from_config_file() -> Result<(), Box<dyn Error>> {
    let dir = tempdir()?;
    let scene = write_scene(dir.path());
    let mirror = dir.path().join("documents");
    let config = dir.path().join("config.json");
    fs::write(
        &config,
        serde_json::json!({ "mirror_dir": mirror }).to_string(),
    )?;

    let output = cli(&dir.path().join("scratch"))
        .arg("--config")
        .arg(&config)
        .args(["share", "--scene"])
        .arg(&scene)
        .arg("--outbox")
        .arg(dir.path().join("outbox"))
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();

    let path = PathBuf::from(reply(&output)["path"].as_str().unwrap().to_string());
    assert!(mirror.join(path.file_name().unwrap()).exists());
    Ok(())
}
