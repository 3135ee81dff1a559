//! Compressed image layers and the scan that reads single files out of them.

use std::io::{Cursor, Read};

use flate2::read::GzDecoder;
use futures::stream::{BoxStream, StreamExt};
use tar::Archive;
use tokio::sync::mpsc;
use tracing::{debug, trace};

use crate::error::{RegistryError, Result};

// Chunks fetched ahead of the archive scan
const PREFETCHED_CHUNKS: usize = 4;

/// A gzip-compressed tar layer, as served by the registry.
///
/// A layer is read once, front to back. Reading the same content again means
/// fetching the layer again.
pub struct Layer {
    digest: String,
    compressed: Box<dyn Read + Send>,
}

impl Layer {
    /// Wraps a reader over the compressed content of the layer addressed by
    /// `digest`.
    pub fn new(digest: &str, compressed: impl Read + Send + 'static) -> Self {
        Layer {
            digest: digest.to_owned(),
            compressed: Box::new(compressed),
        }
    }

    /// Wraps compressed content already held in memory.
    pub fn from_bytes(digest: &str, data: Vec<u8>) -> Self {
        Self::new(digest, Cursor::new(data))
    }

    /// Wraps a stream of compressed chunks, typically a registry response
    /// body.
    ///
    /// The stream is polled by a task on the current tokio runtime, at most a
    /// few chunks ahead of the reader. Dropping the layer stops the task and
    /// drops the stream without reading the rest of it. The returned layer
    /// blocks when read, so it must be read outside of async code.
    pub fn streamed(
        digest: &str,
        mut chunks: BoxStream<'static, anyhow::Result<Vec<u8>>>,
    ) -> Self {
        let (sender, receiver) = mpsc::channel(PREFETCHED_CHUNKS);
        let layer = digest.to_owned();
        tokio::spawn(async move {
            while let Some(chunk) = chunks.next().await {
                let chunk =
                    chunk.map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e));
                let failed = chunk.is_err();
                if sender.send(chunk).await.is_err() {
                    debug!(%layer, "Layer reader dropped, closing stream");
                    return;
                }
                if failed {
                    return;
                }
            }
        });
        Self::new(
            digest,
            ChunkReader {
                receiver,
                current: Cursor::new(Vec::new()),
            },
        )
    }

    /// The digest the layer was fetched by.
    pub fn digest(&self) -> &str {
        &self.digest
    }

    /// Consumes the layer, returning the reader over its compressed content.
    pub fn into_compressed(self) -> Box<dyn Read + Send> {
        self.compressed
    }
}

impl std::fmt::Debug for Layer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Layer")
            .field("digest", &self.digest)
            .finish()
    }
}

/// Blocking reader over chunks sent by the task polling a layer stream.
struct ChunkReader {
    receiver: mpsc::Receiver<std::io::Result<Vec<u8>>>,
    current: Cursor<Vec<u8>>,
}

impl Read for ChunkReader {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        loop {
            let read = self.current.read(buf)?;
            if read > 0 || buf.is_empty() {
                return Ok(read);
            }
            match self.receiver.blocking_recv() {
                Some(chunk) => self.current = Cursor::new(chunk?),
                None => return Ok(0),
            }
        }
    }
}

/// Scans the archive in `layer` for the entry named exactly `path` and
/// decodes its content as JSON.
///
/// Entries are read in stream order and the scan stops at the first match,
/// so nothing after it is read. The layer and its readers are dropped on
/// every return. This blocks on I/O.
pub fn extract_json(layer: Layer, path: &str) -> Result<serde_json::Value> {
    let read_error = |source: std::io::Error| RegistryError::LayerReadError {
        path: path.to_owned(),
        source,
    };

    let digest = layer.digest().to_owned();
    let mut archive = Archive::new(GzDecoder::new(layer.into_compressed()));
    let mut scanned = 0usize;
    for entry in archive.entries().map_err(read_error)? {
        let mut entry = entry.map_err(read_error)?;
        scanned += 1;
        let found = {
            let name = entry.path_bytes();
            trace!(entry = %String::from_utf8_lossy(&name), "Scanning layer entry");
            name.as_ref() == path.as_bytes()
        };
        if !found {
            continue;
        }

        let mut content = Vec::new();
        entry.read_to_end(&mut content).map_err(read_error)?;
        debug!(layer = %digest, %path, scanned, "Found file in layer");
        return serde_json::from_slice(&content).map_err(|e| read_error(e.into()));
    }

    debug!(layer = %digest, %path, scanned, "File not found in layer");
    Err(RegistryError::FileNotFoundInLayer {
        path: path.to_owned(),
    })
}
