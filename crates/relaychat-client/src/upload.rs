//! Chunked upload: `start_upload`, one `upload_chunk` per piece, then
//! `finish_upload` carrying the SHA-256 of everything sent.

use std::path::Path;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use chrono::Local;
use tokio::fs::File;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::mpsc;
use tracing::{debug, info};

use relaychat_shared::constants::TIMESTAMP_FORMAT;
use relaychat_shared::crypto::FileDigest;
use relaychat_shared::protocol::{ClientEvent, UploadChunk, UploadFinish, UploadStart};
use relaychat_shared::types::Recipient;

use crate::error::{ClientError, Result};
use crate::validate::validate_upload;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadSummary {
    pub filename: String,
    pub chunks: usize,
    pub bytes: u64,
    pub hash_file: String,
}

/// Validate `path` and stream it into `outbound` as upload events.
pub async fn send_file(
    path: &Path,
    sender: &str,
    recipient: &Recipient,
    chunk_size: usize,
    outbound: &mpsc::Sender<ClientEvent>,
) -> Result<UploadSummary> {
    let size = tokio::fs::metadata(path).await?.len();
    validate_upload(path, size)?;

    let filename = path
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| ClientError::RejectedFile(format!("{} has no file name", path.display())))?
        .to_string();

    let file = File::open(path).await?;
    let time = Local::now().format(TIMESTAMP_FORMAT).to_string();
    stream_upload(file, &filename, sender, recipient, &time, chunk_size, outbound).await
}

pub async fn stream_upload<R: AsyncRead + Unpin>(
    mut reader: R,
    filename: &str,
    sender: &str,
    recipient: &Recipient,
    time: &str,
    chunk_size: usize,
    outbound: &mpsc::Sender<ClientEvent>,
) -> Result<UploadSummary> {
    let recipient = recipient.as_wire().to_string();
    let emit = |event: ClientEvent| async move {
        outbound
            .send(event)
            .await
            .map_err(|_| ClientError::Disconnected)
    };

    emit(ClientEvent::StartUpload(UploadStart {
        filename: filename.to_string(),
        sender: sender.to_string(),
        recipient: recipient.clone(),
    }))
    .await?;

    let mut digest = FileDigest::new();
    let mut buf = vec![0u8; chunk_size];
    let mut chunks = 0usize;
    let mut bytes = 0u64;

    loop {
        let n = read_full(&mut reader, &mut buf).await?;
        if n == 0 {
            break;
        }
        let chunk = &buf[..n];
        digest.update(chunk);
        emit(ClientEvent::UploadChunk(UploadChunk {
            filename: filename.to_string(),
            recipient: recipient.clone(),
            chunk_data: BASE64.encode(chunk),
        }))
        .await?;
        chunks += 1;
        bytes += n as u64;
    }

    let hash_file = digest.finalize_hex();
    emit(ClientEvent::FinishUpload(UploadFinish {
        filename: filename.to_string(),
        sender: sender.to_string(),
        recipient: recipient.clone(),
        hash_file: hash_file.clone(),
        time: time.to_string(),
    }))
    .await?;

    debug!(file = %filename, chunks, "Upload events queued");
    info!(file = %filename, recipient = %recipient, bytes, "File sent");
    Ok(UploadSummary {
        filename: filename.to_string(),
        chunks,
        bytes,
        hash_file,
    })
}

async fn read_full<R: AsyncRead + Unpin>(reader: &mut R, buf: &mut [u8]) -> std::io::Result<usize> {
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

#[cfg(test)]
mod tests {
    use super::*;
    use relaychat_shared::constants::CHUNK_SIZE;
    use relaychat_shared::crypto::digest_hex;

    fn collect(mut rx: mpsc::Receiver<ClientEvent>) -> Vec<ClientEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[tokio::test]
    async fn test_150k_file_makes_four_chunks() {
        let data: Vec<u8> = (0..150_000u32).map(|i| (i % 251) as u8).collect();
        let (tx, rx) = mpsc::channel(16);

        let summary = stream_upload(
            data.as_slice(),
            "clip.mp4",
            "alice",
            &Recipient::User("bob".into()),
            "12:00:00",
            CHUNK_SIZE,
            &tx,
        )
        .await
        .unwrap();
        assert_eq!(summary.chunks, 4);
        assert_eq!(summary.bytes, 150_000);
        assert_eq!(summary.hash_file, digest_hex(&data));

        let events = collect(rx);
        assert_eq!(events.len(), 6);
        assert!(matches!(&events[0], ClientEvent::StartUpload(s) if s.recipient == "bob"));

        let mut sizes = Vec::new();
        let mut reassembled = Vec::new();
        for event in &events[1..5] {
            match event {
                ClientEvent::UploadChunk(chunk) => {
                    let raw = BASE64.decode(&chunk.chunk_data).unwrap();
                    sizes.push(raw.len());
                    reassembled.extend(raw);
                }
                other => panic!("unexpected event {other:?}"),
            }
        }
        assert_eq!(sizes, vec![49_152, 49_152, 49_152, 2_544]);
        assert_eq!(reassembled, data);

        match &events[5] {
            ClientEvent::FinishUpload(finish) => {
                assert_eq!(finish.hash_file, digest_hex(&data));
                assert_eq!(finish.time, "12:00:00");
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_empty_file_sends_start_and_finish() {
        let (tx, rx) = mpsc::channel(4);
        let summary = stream_upload(&b""[..], "e.png", "a", &Recipient::Global, "", CHUNK_SIZE, &tx)
            .await
            .unwrap();
        assert_eq!(summary.chunks, 0);
        assert_eq!(collect(rx).len(), 2);
    }

    #[tokio::test]
    async fn test_send_file_rejects_non_media() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notes.txt");
        std::fs::write(&path, b"text").unwrap();
        let (tx, rx) = mpsc::channel(4);

        let result = send_file(&path, "alice", &Recipient::Global, CHUNK_SIZE, &tx).await;
        assert!(matches!(result, Err(ClientError::RejectedFile(_))));
        assert!(collect(rx).is_empty());
    }

    #[tokio::test]
    async fn test_send_file_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("song.mp3");
        std::fs::write(&path, vec![9u8; 1000]).unwrap();
        let (tx, rx) = mpsc::channel(8);

        let summary = send_file(&path, "alice", &Recipient::Global, CHUNK_SIZE, &tx)
            .await
            .unwrap();
        assert_eq!(summary.filename, "song.mp3");
        assert_eq!(summary.chunks, 1);
        assert_eq!(collect(rx).len(), 3);
    }

    #[tokio::test]
    async fn test_closed_connection_aborts_upload() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let result =
            stream_upload(&b"abc"[..], "x.png", "a", &Recipient::Global, "", CHUNK_SIZE, &tx).await;
        assert!(matches!(result, Err(ClientError::Disconnected)));
    }
}
