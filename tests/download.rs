use std::sync::Arc;
use std::time::Duration;

use intake::control::Controller;
use intake::download::Downloader;
use intake::error::{Error, Result};
use intake::queue;

mod common;
use common::{MemoryTransport, StallingTransport};

#[tokio::test]
async fn local_files_are_emitted_without_a_copy() -> Result<()> {
    let dir = tempfile::tempdir().expect("tempdir");
    let source = dir.path().join("data.csv");
    std::fs::write(&source, b"name,age\n").expect("write source");

    let ctrl = Controller::new();
    let files = Downloader::new([source.to_string_lossy().into_owned()])
        .download_to(dir.path().join("downloads"))
        .start(&ctrl);

    let files = queue::collect(files, &ctrl).await?;
    assert_eq!(files.len(), 1);
    assert_eq!(files[0].path, source);
    Ok(())
}

#[tokio::test]
async fn remote_streams_are_copied_into_the_destination() -> Result<()> {
    let dir = tempfile::tempdir().expect("tempdir");
    let body = b"name,age\nalice,30\n".to_vec();
    let transport = Arc::new(MemoryTransport::new([("mem://people.csv", body.clone())]));

    let ctrl = Controller::new();
    let files = Downloader::new(["mem://people.csv"])
        .transport(transport)
        .download_to(dir.path())
        .start(&ctrl);

    let files = queue::collect(files, &ctrl).await?;
    assert_eq!(files.len(), 1);
    assert_eq!(files[0].url, "mem://people.csv");
    assert_eq!(std::fs::read(&files[0].path).expect("read copy"), body);
    Ok(())
}

#[tokio::test]
async fn progress_pulses_carry_the_file_and_byte_count() -> Result<()> {
    let dir = tempfile::tempdir().expect("tempdir");
    let transport = Arc::new(MemoryTransport::new([("mem://data.bin", vec![7_u8; 1000])]));

    let (progress_tx, mut progress_rx) = tokio::sync::mpsc::channel(64);
    let ctrl = Controller::new();
    let files = Downloader::new(["mem://data.bin"])
        .transport(transport)
        .download_to(dir.path())
        .report_progress_to(progress_tx)
        .start(&ctrl);
    queue::collect(files, &ctrl).await?;

    let pulse = progress_rx.recv().await.expect("at least one pulse");
    assert_eq!(pulse.file, "data.bin");
    assert!(pulse.bytes > 0);
    Ok(())
}

#[tokio::test]
async fn a_failing_url_fails_the_run_but_not_the_worker() {
    let dir = tempfile::tempdir().expect("tempdir");
    let ctrl = Controller::new();
    let files = Downloader::new([dir
        .path()
        .join("does-not-exist.csv")
        .to_string_lossy()
        .into_owned()])
    .download_to(dir.path())
    .start(&ctrl);

    let err = queue::collect(files, &ctrl)
        .await
        .expect_err("run must fail");
    assert!(matches!(err, Error::Transport(_)));
}

#[tokio::test]
async fn cleanup_removes_the_destination_directory() -> Result<()> {
    let dir = tempfile::tempdir().expect("tempdir");
    let downloads = dir.path().join("downloads");
    let transport = Arc::new(MemoryTransport::new([("mem://data.bin", vec![1_u8; 64])]));

    let ctrl = Controller::new();
    let files = Downloader::new(["mem://data.bin"])
        .transport(transport)
        .download_to(&downloads)
        .cleanup(true)
        .start(&ctrl);
    queue::collect(files, &ctrl).await?;

    // Cleanup fires once the invoking controller has no workers left.
    for _ in 0..50 {
        if !downloads.exists() {
            return Ok(());
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("destination directory should have been removed");
}

#[tokio::test]
async fn abort_interrupts_a_stalled_download() {
    let dir = tempfile::tempdir().expect("tempdir");
    let ctrl = Controller::new();
    let mut files = Downloader::new(["mem://stall.bin"])
        .transport(Arc::new(StallingTransport {
            first_block_bytes: 100_000,
        }))
        .download_to(dir.path())
        .start(&ctrl);

    // Let the worker copy its first block and stall.
    tokio::time::sleep(Duration::from_millis(50)).await;

    tokio::time::timeout(Duration::from_millis(500), ctrl.abort())
        .await
        .expect("abort must unwind the stalled worker");

    // The terminal queue closes without emitting the stalled file.
    assert!(files.recv().await.is_none());
}

#[tokio::test]
async fn collect_reports_an_external_abort() {
    let dir = tempfile::tempdir().expect("tempdir");
    let ctrl = Controller::new();
    let files = Downloader::new(["mem://stall.bin"])
        .transport(Arc::new(StallingTransport {
            first_block_bytes: 100_000,
        }))
        .download_to(dir.path())
        .start(&ctrl);

    let aborter = ctrl.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        aborter.abort().await;
    });

    let err = queue::collect(files, &ctrl)
        .await
        .expect_err("collect must observe the abort");
    assert!(matches!(err, Error::Aborted));
}
