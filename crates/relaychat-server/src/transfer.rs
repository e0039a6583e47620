//! Chunked file transfer engine.
//!
//! Uploads arrive as three ordered events per transfer (start, chunks,
//! finish) with no sequence numbers; correctness relies on the transport
//! delivering one connection's events in order. An upload is keyed by
//! (connection, filename, recipient) so the same filename can be in flight
//! to different recipients, or from different senders, at the same time.
//!
//! Downloads are streamed by a spawned task that yields after every chunk
//! and only ever waits on its requester's own queue, so a large file never
//! starves other connections.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use subtle::ConstantTimeEq;
use tokio::fs::File;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt, BufWriter};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use relaychat_shared::crypto::FileDigest;
use relaychat_shared::protocol::{
    DownloadFinished, DownloadRequest, FileChunk, FileReady, RetrySending, ServerEvent,
    UploadChunk, UploadFinish, UploadStart,
};
use relaychat_shared::types::{ConnectionId, Recipient};

use crate::error::ServerError;
use crate::file_store::FileStore;
use crate::outbox::Outbox;
use crate::registry::Registry;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct UploadKey {
    pub conn: ConnectionId,
    pub filename: String,
    pub recipient: String,
}

impl UploadKey {
    pub fn new(conn: ConnectionId, filename: &str, recipient: &str) -> Self {
        Self {
            conn,
            filename: filename.to_string(),
            recipient: recipient.to_string(),
        }
    }
}

struct UploadState {
    file: BufWriter<File>,
    digest: FileDigest,
    /// Roster name of the uploader, captured at start.
    sender: String,
    bytes: u64,
}

/// How a `finish_upload` ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadOutcome {
    /// Digest matched; number of connections notified.
    Delivered(usize),
    /// Digest mismatch; file deleted and `retry_sending` sent.
    Rejected,
    /// No upload was in flight under that key.
    NotInFlight,
}

#[derive(Clone)]
pub struct TransferEngine {
    registry: Arc<dyn Registry>,
    outbox: Outbox,
    store: FileStore,
    chunk_size: usize,
    uploads: Arc<Mutex<HashMap<UploadKey, Arc<tokio::sync::Mutex<UploadState>>>>>,
}

impl TransferEngine {
    pub fn new(
        registry: Arc<dyn Registry>,
        outbox: Outbox,
        store: FileStore,
        chunk_size: usize,
    ) -> Self {
        Self {
            registry,
            outbox,
            store,
            chunk_size,
            uploads: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    fn uploads(
        &self,
    ) -> MutexGuard<'_, HashMap<UploadKey, Arc<tokio::sync::Mutex<UploadState>>>> {
        self.uploads.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn uploads_in_flight(&self) -> usize {
        self.uploads().len()
    }

    // -----------------------------------------------------------------------
    // Upload
    // -----------------------------------------------------------------------

    pub async fn start_upload(
        &self,
        conn: ConnectionId,
        req: UploadStart,
    ) -> Result<(), ServerError> {
        let sender = self
            .registry
            .member(conn)
            .ok_or(ServerError::UnknownSender(conn))?;

        let file = self.store.create(&req.filename).await?;
        let state = UploadState {
            file: BufWriter::new(file),
            digest: FileDigest::new(),
            sender: sender.username.clone(),
            bytes: 0,
        };

        let key = UploadKey::new(conn, &req.filename, &req.recipient);
        let replaced = self
            .uploads()
            .insert(key, Arc::new(tokio::sync::Mutex::new(state)))
            .is_some();
        if replaced {
            warn!(
                file = %req.filename,
                recipient = %req.recipient,
                "Upload restarted; previous in-flight state discarded"
            );
        }

        info!(
            sender = %sender.username,
            file = %req.filename,
            recipient = %req.recipient,
            "Upload started"
        );
        Ok(())
    }

    /// Chunks for an upload that is not in flight are ignored.
    pub async fn upload_chunk(
        &self,
        conn: ConnectionId,
        req: UploadChunk,
    ) -> Result<(), ServerError> {
        let key = UploadKey::new(conn, &req.filename, &req.recipient);
        let Some(state) = self.uploads().get(&key).cloned() else {
            debug!(file = %req.filename, "Chunk for unknown upload ignored");
            return Ok(());
        };

        let chunk = BASE64
            .decode(req.chunk_data.as_bytes())
            .map_err(|e| ServerError::ProtocolViolation(format!("Invalid chunk encoding: {e}")))?;

        let mut state = state.lock().await;
        state.file.write_all(&chunk).await?;
        state.digest.update(&chunk);
        state.bytes += chunk.len() as u64;
        Ok(())
    }

    /// The upload state is removed before anything else happens, so it never
    /// outlives this call whatever the outcome.
    pub async fn finish_upload(
        &self,
        conn: ConnectionId,
        req: UploadFinish,
    ) -> Result<UploadOutcome, ServerError> {
        let key = UploadKey::new(conn, &req.filename, &req.recipient);
        let Some(state) = self.uploads().remove(&key) else {
            debug!(file = %req.filename, "Finish for unknown upload ignored");
            return Ok(UploadOutcome::NotInFlight);
        };

        let mut state = state.lock().await;
        state.file.flush().await?;
        state.file.get_mut().sync_all().await?;
        let computed = std::mem::take(&mut state.digest).finalize_hex();
        let sender = state.sender.clone();
        let bytes = state.bytes;
        drop(state);

        let claimed = req.hash_file.trim().to_ascii_lowercase();
        if !digests_match(&computed, &claimed) {
            let mismatch = ServerError::HashMismatch {
                filename: req.filename.clone(),
                claimed,
                computed,
            };
            warn!(error = %mismatch, bytes, "Upload failed verification");

            if let Err(e) = self.store.remove(&req.filename).await {
                warn!(file = %req.filename, error = %e, "Failed to delete corrupt upload");
            }
            self.outbox.send(
                conn,
                ServerEvent::RetrySending(RetrySending {
                    filename: req.filename,
                    sender,
                }),
            );
            return Ok(UploadOutcome::Rejected);
        }

        let ready = FileReady {
            filename: req.filename.clone(),
            sender: sender.clone(),
            time: req.time,
        };

        let delivered = match Recipient::from_wire(&req.recipient) {
            Recipient::Global => {
                let conns = self.registry.members().into_iter().map(|m| m.conn);
                self.outbox
                    .broadcast(conns, &ServerEvent::IncomingGlobalFile(ready))
            }
            Recipient::User(name) => match self.registry.member_by_name(&name) {
                Some(member) => {
                    let sent = self
                        .outbox
                        .send(member.conn, ServerEvent::IncomingPrivateFile(ready));
                    usize::from(sent)
                }
                None => {
                    debug!(file = %req.filename, recipient = %name, "Recipient no longer joined");
                    0
                }
            },
        };

        info!(
            sender = %sender,
            file = %req.filename,
            recipient = %req.recipient,
            bytes,
            delivered,
            "Upload finished"
        );
        Ok(UploadOutcome::Delivered(delivered))
    }

    /// Drop every in-flight upload of a closed connection. Partial files stay
    /// on disk.
    pub fn abandon_uploads(&self, conn: ConnectionId) -> usize {
        let mut uploads = self.uploads();
        let before = uploads.len();
        uploads.retain(|key, _| key.conn != conn);
        let dropped = before - uploads.len();
        if dropped > 0 {
            debug!(conn = %conn, dropped, "Abandoned in-flight uploads");
        }
        dropped
    }

    // -----------------------------------------------------------------------
    // Download
    // -----------------------------------------------------------------------

    /// Start streaming a stored file to `conn` in the background.
    pub async fn download_request(
        &self,
        conn: ConnectionId,
        req: DownloadRequest,
    ) -> Result<JoinHandle<()>, ServerError> {
        self.registry
            .member(conn)
            .ok_or(ServerError::UnknownSender(conn))?;

        let file = self.store.open(&req.filename).await?;
        info!(conn = %conn, file = %req.filename, "Download started");

        let registry = self.registry.clone();
        let outbox = self.outbox.clone();
        let chunk_size = self.chunk_size;
        let filename = req.filename;
        Ok(tokio::spawn(async move {
            let sent = stream_file(file, &filename, conn, registry.as_ref(), &outbox, chunk_size);
            if let Err(e) = sent.await {
                warn!(conn = %conn, file = %filename, error = %e, "Failed to send file");
            }
        }))
    }
}

/// Constant-time comparison of two hex digests.
fn digests_match(computed: &str, claimed: &str) -> bool {
    computed.len() == claimed.len() && bool::from(computed.as_bytes().ct_eq(claimed.as_bytes()))
}

/// Fill `buf` from `reader` unless EOF comes first. Returns the bytes read.
async fn read_full<R: AsyncRead + Unpin>(
    reader: &mut R,
    buf: &mut [u8],
) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = reader.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}

/// Waits on the requester's own queue only, so a slow reader paces its
/// download without holding up anyone else. Stops quietly once `conn` is
/// no longer joined.
async fn stream_file<R: AsyncRead + Unpin>(
    mut reader: R,
    filename: &str,
    conn: ConnectionId,
    registry: &dyn Registry,
    outbox: &Outbox,
    chunk_size: usize,
) -> Result<(), ServerError> {
    let mut digest = FileDigest::new();
    let mut buf = vec![0u8; chunk_size];
    let mut chunks = 0usize;

    loop {
        let n = read_full(&mut reader, &mut buf).await?;
        if n == 0 {
            break;
        }
        if registry.member(conn).is_none() {
            debug!(conn = %conn, file = %filename, chunks, "Requester left; download stopped");
            return Ok(());
        }
        let chunk = &buf[..n];
        digest.update(chunk);

        let event = ServerEvent::IncomingFileChunk(FileChunk {
            filename: filename.to_string(),
            chunk_data: BASE64.encode(chunk),
        });
        if !outbox.send_paced(conn, event).await {
            return Err(ServerError::TransportDisconnect(format!(
                "connection closed after {chunks} chunks"
            )));
        }
        chunks += 1;
        tokio::task::yield_now().await;
    }

    outbox
        .send_paced(
            conn,
            ServerEvent::FinishDownload(DownloadFinished {
                filename: filename.to_string(),
                hash_file: digest.finalize_hex(),
            }),
        )
        .await;

    debug!(conn = %conn, file = %filename, chunks, "Download finished");
    Ok(())
}
