use bytes::Bytes;
use tokio::sync::mpsc;

use crate::error::Result;

/// One unit of decodable input: a named blob of bytes.
///
/// Entries are what the unzip stage emits and what every decoder consumes.
/// The bytes are reference-counted, so handing an entry across a queue moves
/// ownership without copying.
#[derive(Debug, Clone)]
pub struct Entry {
    pub name: String,
    pub data: Bytes,
}

impl Entry {
    pub fn new(name: impl Into<String>, data: impl Into<Bytes>) -> Self {
        Self {
            name: name.into(),
            data: data.into(),
        }
    }

    /// Read a local file into an entry.
    pub async fn from_path(path: impl AsRef<std::path::Path>) -> Result<Self> {
        let path = path.as_ref();
        let data = tokio::fs::read(path).await?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Ok(Self::new(name, data))
    }

    /// A `std::io::Read` view over the entry bytes.
    pub fn reader(&self) -> &[u8] {
        self.data.as_ref()
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Pre-seed a closed queue with entries, for composing a decoder directly
    /// over in-memory input.
    pub fn queue(entries: impl IntoIterator<Item = Entry>) -> mpsc::Receiver<Entry> {
        let entries: Vec<Entry> = entries.into_iter().collect();
        let (tx, rx) = mpsc::channel(entries.len().max(1));
        for entry in entries {
            let _ = tx.try_send(entry);
        }
        rx
    }
}
