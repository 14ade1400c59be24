use std::io::Write;
use std::sync::Arc;

use intake::control::Controller;
use intake::decode::csv::CsvDecoder;
use intake::error::Result;
use intake::queue;
use intake::stream::Streamer;
use intake::unzip::Unzipper;

mod common;
use common::{person, zip_bytes, MemoryTransport, Person};

const PEOPLE_CSV: &str = "name,age\nalice,30\nbob,25\ncarol,41\n";

fn people_archive() -> Vec<u8> {
    zip_bytes(&[("people.csv", PEOPLE_CSV), ("readme.txt", "ignore me")])
}

#[tokio::test]
async fn download_unzip_decode_end_to_end() -> Result<()> {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("people.zip");
    let mut file = std::fs::File::create(&path).expect("create archive");
    file.write_all(&people_archive()).expect("write archive");

    let ctrl = Controller::new();
    let entries = Unzipper::from_urls([path.to_string_lossy().into_owned()])
        .filter("*.csv")
        .start(&ctrl);
    let records = CsvDecoder::<Person>::new(entries)
        .num_workers(1)
        .collect(&ctrl)
        .await?;

    assert_eq!(
        records,
        vec![person("alice", 30), person("bob", 25), person("carol", 41)]
    );
    Ok(())
}

#[tokio::test]
async fn remote_archives_flow_through_the_same_chain() -> Result<()> {
    let dir = tempfile::tempdir().expect("tempdir");
    let transport = Arc::new(MemoryTransport::new([(
        "mem://people.zip",
        people_archive(),
    )]));

    let mut download_opts = intake::download::DownloadOpts::default();
    download_opts.transport = transport;
    download_opts.dir = dir.path().to_path_buf();

    let ctrl = Controller::new();
    let entries = Unzipper::from_urls(["mem://people.zip"])
        .download_opts(download_opts)
        .filter("*.csv")
        .start(&ctrl);
    let records = CsvDecoder::<Person>::new(entries)
        .num_workers(2)
        .collect(&ctrl)
        .await?;

    assert_eq!(records.len(), 3);
    Ok(())
}

#[tokio::test]
async fn progress_observation_does_not_change_emissions() -> Result<()> {
    let quiet = {
        let ctrl = Controller::new();
        let decoder = common::person_decoder(vec![common::csv_entry("people.csv", PEOPLE_CSV)]);
        decoder.collect(&ctrl).await?
    };

    let (progress_tx, mut progress_rx) = tokio::sync::mpsc::channel(64);
    let observed = {
        let ctrl = Controller::new();
        let decoder = common::person_decoder(vec![common::csv_entry("people.csv", PEOPLE_CSV)])
            .report_progress_to(progress_tx);
        decoder.collect(&ctrl).await?
    };

    assert_eq!(quiet, observed);

    let mut pulses = 0;
    while progress_rx.try_recv().is_ok() {
        pulses += 1;
    }
    assert_eq!(pulses, observed.len());
    Ok(())
}

#[tokio::test]
async fn a_streamer_requeues_records_into_a_caller_owned_channel() -> Result<()> {
    let ctrl = Controller::new();
    let decoder = common::person_decoder(vec![common::csv_entry("people.csv", PEOPLE_CSV)]);
    let records = decoder.start(&ctrl).await;

    let (tx, mut rx) = tokio::sync::mpsc::channel::<Person>(8);
    Streamer::new(records).start_into(&ctrl, tx.clone());

    ctrl.wait().await;
    // The stage exited, but the caller's queue stays open until the caller
    // drops its own sender.
    drop(tx);

    let mut forwarded = Vec::new();
    while let Some(rec) = rx.recv().await {
        forwarded.push(rec);
    }
    assert_eq!(forwarded.len(), 3);
    Ok(())
}

#[tokio::test]
async fn a_streamer_collects_a_decoded_stream() -> Result<()> {
    let ctrl = Controller::new();
    let decoder = common::person_decoder(vec![common::csv_entry("people.csv", PEOPLE_CSV)]);
    let records = decoder.start(&ctrl).await;

    let collected = Streamer::new(records).collect(&ctrl).await?;
    assert_eq!(collected.len(), 3);
    Ok(())
}

#[tokio::test]
async fn decoders_compose_over_caller_supplied_queues() -> Result<()> {
    let (entry_tx, entry_rx) = tokio::sync::mpsc::channel(4);

    let ctrl = Controller::new();
    let decoder: CsvDecoder<Person> = CsvDecoder::new(entry_rx).num_workers(1);
    let records = decoder.start(&ctrl).await;

    entry_tx
        .send(common::csv_entry("direct.csv", PEOPLE_CSV))
        .await
        .expect("send entry");
    drop(entry_tx);

    let records = queue::collect(records, &ctrl).await?;
    assert_eq!(records.len(), 3);
    Ok(())
}
