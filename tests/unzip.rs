use std::io::Write;
use std::sync::Arc;

use intake::control::Controller;
use intake::download::Downloader;
use intake::error::{Error, Result};
use intake::queue;
use intake::unzip::Unzipper;

mod common;
use common::{zip_bytes, MemoryTransport};

fn write_archive(dir: &tempfile::TempDir, name: &str, entries: &[(&str, &str)]) -> String {
    let path = dir.path().join(name);
    let mut file = std::fs::File::create(&path).expect("create archive");
    file.write_all(&zip_bytes(entries)).expect("write archive");
    path.to_string_lossy().into_owned()
}

#[tokio::test]
async fn expands_every_file_entry() -> Result<()> {
    let dir = tempfile::tempdir().expect("tempdir");
    let url = write_archive(
        &dir,
        "data.zip",
        &[("a.csv", "name,age\n"), ("b.txt", "notes")],
    );

    let ctrl = Controller::new();
    let entries = Unzipper::from_urls([url]).start(&ctrl);
    let mut entries = queue::collect(entries, &ctrl).await?;
    entries.sort_by(|a, b| a.name.cmp(&b.name));

    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0].name, "a.csv");
    assert_eq!(entries[0].data.as_ref(), b"name,age\n");
    assert_eq!(entries[1].name, "b.txt");
    Ok(())
}

#[tokio::test]
async fn the_glob_filter_selects_entries() -> Result<()> {
    let dir = tempfile::tempdir().expect("tempdir");
    let url = write_archive(
        &dir,
        "data.zip",
        &[("a.csv", "a"), ("b.txt", "b"), ("c.csv", "c")],
    );

    let ctrl = Controller::new();
    let entries = Unzipper::from_urls([url]).filter("*.csv").start(&ctrl);
    let mut entries = queue::collect(entries, &ctrl).await?;
    entries.sort_by(|a, b| a.name.cmp(&b.name));

    let names: Vec<&str> = entries.iter().map(|entry| entry.name.as_str()).collect();
    assert_eq!(names, vec!["a.csv", "c.csv"]);
    Ok(())
}

#[tokio::test]
async fn progress_reports_the_filtered_entry_count() -> Result<()> {
    let dir = tempfile::tempdir().expect("tempdir");
    let url = write_archive(&dir, "data.zip", &[("a.csv", "a"), ("b.txt", "b")]);

    let (progress_tx, mut progress_rx) = tokio::sync::mpsc::channel(8);
    let ctrl = Controller::new();
    let entries = Unzipper::from_urls([url])
        .filter("*.csv")
        .report_progress_to(progress_tx)
        .start(&ctrl);
    queue::collect(entries, &ctrl).await?;

    let pulse = progress_rx.recv().await.expect("one pulse per archive");
    assert_eq!(pulse.entries, 1);
    assert!(pulse.file.ends_with("data.zip"));
    Ok(())
}

#[tokio::test]
async fn a_corrupt_archive_fails_the_run() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("broken.zip");
    std::fs::write(&path, b"this is not a zip file").expect("write file");

    let ctrl = Controller::new();
    let entries = Unzipper::from_urls([path.to_string_lossy().into_owned()]).start(&ctrl);
    let err = queue::collect(entries, &ctrl)
        .await
        .expect_err("run must fail");
    assert!(matches!(err, Error::Archive(_)));
}

#[tokio::test]
async fn expands_archives_from_an_existing_download_queue() -> Result<()> {
    let dir = tempfile::tempdir().expect("tempdir");
    let transport = Arc::new(MemoryTransport::new([(
        "mem://data.zip",
        zip_bytes(&[("inner.csv", "name,age\nalice,30\n")]),
    )]));

    let ctrl = Controller::new();
    let files = Downloader::new(["mem://data.zip"])
        .transport(transport)
        .download_to(dir.path())
        .start(&ctrl);
    let entries = Unzipper::new(files).start(&ctrl);

    let entries = queue::collect(entries, &ctrl).await?;
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].name, "inner.csv");
    Ok(())
}
