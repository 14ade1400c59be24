#![allow(dead_code)]

use std::collections::HashMap;
use std::io::Write;

use async_trait::async_trait;
use bytes::Bytes;
use intake::decode::csv::{CsvDecoder, CsvField, CsvRecord};
use intake::entry::Entry;
use intake::error::{Error, Result};
use intake::fetch::{ByteStream, Fetched, ReaderStream, Transport};

/// The record shape most tests decode into.
#[derive(Default, Debug, Clone, PartialEq)]
pub struct Person {
    pub name: String,
    pub age: i32,
}

impl CsvRecord for Person {
    fn fields() -> Vec<CsvField<Self>> {
        vec![
            CsvField::string("name", |rec: &mut Self, v| rec.name = v),
            CsvField::i32("age", |rec: &mut Self, v| rec.age = v),
        ]
    }
}

pub fn person(name: &str, age: i32) -> Person {
    Person {
        name: name.to_string(),
        age,
    }
}

pub fn csv_entry(name: &str, contents: &str) -> Entry {
    Entry::new(name, contents.as_bytes().to_vec())
}

pub fn person_decoder(entries: Vec<Entry>) -> CsvDecoder<Person> {
    CsvDecoder::new(Entry::queue(entries)).num_workers(1)
}

/// Build an in-memory zip archive.
pub fn zip_bytes(entries: &[(&str, &str)]) -> Vec<u8> {
    let mut writer = zip::ZipWriter::new(std::io::Cursor::new(Vec::new()));
    for (name, contents) in entries {
        writer
            .start_file(*name, zip::write::FileOptions::default())
            .expect("start zip entry");
        writer
            .write_all(contents.as_bytes())
            .expect("write zip entry");
    }
    writer
        .finish()
        .expect("finish zip archive")
        .into_inner()
}

/// Serves URLs from memory as chunked byte streams.
pub struct MemoryTransport {
    files: HashMap<String, Bytes>,
}

impl MemoryTransport {
    pub fn new(files: impl IntoIterator<Item = (&'static str, Vec<u8>)>) -> Self {
        Self {
            files: files
                .into_iter()
                .map(|(url, data)| (url.to_string(), Bytes::from(data)))
                .collect(),
        }
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn open(&self, url: &str) -> Result<Fetched> {
        match self.files.get(url) {
            Some(data) => Ok(Fetched::Stream(Box::new(
                ReaderStream::new(std::io::Cursor::new(data.to_vec())).block_bytes(8 * 1024),
            ))),
            None => Err(Error::transport(format!("no such url: {url}"))),
        }
    }
}

/// Emits one block and then blocks forever, for abort tests.
pub struct StallingTransport {
    pub first_block_bytes: usize,
}

#[async_trait]
impl Transport for StallingTransport {
    async fn open(&self, _url: &str) -> Result<Fetched> {
        Ok(Fetched::Stream(Box::new(StallingStream {
            first_block_bytes: self.first_block_bytes,
            sent: false,
        })))
    }
}

struct StallingStream {
    first_block_bytes: usize,
    sent: bool,
}

#[async_trait]
impl ByteStream for StallingStream {
    async fn next_chunk(&mut self) -> Result<Option<Bytes>> {
        if !self.sent {
            self.sent = true;
            return Ok(Some(Bytes::from(vec![0_u8; self.first_block_bytes])));
        }
        std::future::pending().await
    }
}
