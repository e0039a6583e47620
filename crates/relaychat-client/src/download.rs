//! Download reassembly.
//!
//! Each requested file gets an unbounded queue and a dedicated writer task.
//! `incoming_file_chunk` events push decoded bytes; `finish_download` pushes
//! an end marker carrying the server's digest. The writer compares digests
//! once the stream ends and deletes the file if they differ.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use relaychat_shared::crypto::FileDigest;
use relaychat_shared::protocol::{ClientEvent, DownloadRequest, ServerEvent};

use crate::error::{ClientError, Result};

enum DownloadItem {
    Chunk(Vec<u8>),
    End { hash_file: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadReport {
    pub filename: String,
    pub path: PathBuf,
    pub bytes: u64,
    pub hash_file: String,
}

/// Pending downloads of one connection, keyed by filename.
#[derive(Default)]
pub struct Downloads {
    active: HashMap<String, mpsc::UnboundedSender<DownloadItem>>,
}

impl Downloads {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawn the writer for `filename` and return the `download_request`
    /// to send plus a receiver for the verified result. Requesting a name
    /// already in progress abandons the earlier download.
    pub fn begin(
        &mut self,
        filename: &str,
        dest: PathBuf,
    ) -> (ClientEvent, oneshot::Receiver<Result<DownloadReport>>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let (done_tx, done_rx) = oneshot::channel();

        if self.active.insert(filename.to_string(), tx).is_some() {
            warn!(file = %filename, "Download restarted");
        }

        let name = filename.to_string();
        tokio::spawn(async move {
            let result = write_download(&name, dest, rx).await;
            if let Err(e) = &result {
                warn!(file = %name, error = %e, "Download failed");
            }
            let _ = done_tx.send(result);
        });

        let request = ClientEvent::DownloadRequest(DownloadRequest {
            filename: filename.to_string(),
        });
        (request, done_rx)
    }

    pub fn in_progress(&self) -> usize {
        self.active.len()
    }

    /// Feed a server event. Returns `true` if it belonged to a download.
    pub fn handle(&mut self, event: &ServerEvent) -> bool {
        match event {
            ServerEvent::IncomingFileChunk(chunk) => {
                let Some(tx) = self.active.get(&chunk.filename) else {
                    debug!(file = %chunk.filename, "Chunk for unknown download ignored");
                    return false;
                };
                match BASE64.decode(chunk.chunk_data.as_bytes()) {
                    Ok(bytes) => {
                        let _ = tx.send(DownloadItem::Chunk(bytes));
                    }
                    Err(e) => {
                        // Dropping the sender ends the writer without a digest.
                        warn!(file = %chunk.filename, error = %e, "Undecodable chunk; abandoning download");
                        self.active.remove(&chunk.filename);
                    }
                }
                true
            }
            ServerEvent::FinishDownload(finish) => {
                let Some(tx) = self.active.remove(&finish.filename) else {
                    debug!(file = %finish.filename, "Finish for unknown download ignored");
                    return false;
                };
                let _ = tx.send(DownloadItem::End {
                    hash_file: finish.hash_file.clone(),
                });
                true
            }
            _ => false,
        }
    }
}

async fn write_download(
    filename: &str,
    dest: PathBuf,
    mut rx: mpsc::UnboundedReceiver<DownloadItem>,
) -> Result<DownloadReport> {
    let mut file = BufWriter::new(File::create(&dest).await?);
    let mut digest = FileDigest::new();
    let mut bytes = 0u64;

    let expected = loop {
        match rx.recv().await {
            Some(DownloadItem::Chunk(chunk)) => {
                file.write_all(&chunk).await?;
                digest.update(&chunk);
                bytes += chunk.len() as u64;
            }
            Some(DownloadItem::End { hash_file }) => break hash_file,
            None => {
                drop(file);
                remove_quietly(&dest).await;
                return Err(ClientError::DownloadInterrupted(filename.to_string()));
            }
        }
    };

    file.flush().await?;
    drop(file);

    let computed = digest.finalize_hex();
    if !computed.eq_ignore_ascii_case(expected.trim()) {
        remove_quietly(&dest).await;
        return Err(ClientError::DigestMismatch {
            filename: filename.to_string(),
            expected,
            computed,
        });
    }

    info!(file = %filename, path = %dest.display(), bytes, "Download verified");
    Ok(DownloadReport {
        filename: filename.to_string(),
        path: dest,
        bytes,
        hash_file: computed,
    })
}

async fn remove_quietly(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        debug!(path = %path.display(), error = %e, "Could not remove partial download");
    }
}
