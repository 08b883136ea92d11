//! Streaming zip sink.
//!
//! One blocking task owns the `ZipWriter` and appends entries one at a time.
//! Compressed bytes leave through a bounded channel that feeds the HTTP body,
//! so the archive is never held in memory and a slow client slows the writer.

use crate::error::FactureError;
use axum::body::Bytes;
use std::cell::RefCell;
use std::io::{self, Seek, SeekFrom, Write};
use std::rc::Rc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

const CHUNK_SIZE: usize = 64 * 1024;
const BODY_CHANNEL_CAPACITY: usize = 16;
const ENTRY_CHANNEL_CAPACITY: usize = 4;

pub type BodyChunk = Result<Bytes, io::Error>;

/// `Write` adapter that forwards fixed-size chunks to an async receiver.
/// Must only be used from a blocking context.
pub struct ChannelWriter {
    sender: mpsc::Sender<BodyChunk>,
    buffer: Vec<u8>,
}

impl ChannelWriter {
    pub fn new(sender: mpsc::Sender<BodyChunk>) -> Self {
        Self {
            sender,
            buffer: Vec::with_capacity(CHUNK_SIZE),
        }
    }

    fn send_buffer(&mut self) -> io::Result<()> {
        if self.buffer.is_empty() {
            return Ok(());
        }
        let chunk = Bytes::from(std::mem::replace(
            &mut self.buffer,
            Vec::with_capacity(CHUNK_SIZE),
        ));
        self.sender
            .blocking_send(Ok(chunk))
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "archive receiver dropped"))
    }
}

impl Write for ChannelWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buffer.extend_from_slice(buf);
        if self.buffer.len() >= CHUNK_SIZE {
            self.send_buffer()?;
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.send_buffer()
    }
}

struct SpoolState<W> {
    inner: W,
    /// Bytes already forwarded to `inner`; they can no longer be rewritten.
    committed: u64,
    tail: Vec<u8>,
    position: u64,
}

/// Seekable front for a forward-only writer. The zip writer patches the
/// local header of the entry it is writing, so only the bytes from that
/// header on are held back; everything before `commit_to` is forwarded.
///
/// `ZipWriter::new_stream` is not an option here: finishing an entry still
/// seeks back to its local header to fill in CRC and sizes, and the stream
/// writer rejects any seek behind the current position.
struct Spool<W>(Rc<RefCell<SpoolState<W>>>);

impl<W> Clone for Spool<W> {
    fn clone(&self) -> Self {
        Spool(Rc::clone(&self.0))
    }
}

impl<W: Write> Spool<W> {
    fn new(inner: W) -> Self {
        Spool(Rc::new(RefCell::new(SpoolState {
            inner,
            committed: 0,
            tail: Vec::new(),
            position: 0,
        })))
    }

    fn len(&self) -> u64 {
        let state = self.0.borrow();
        state.committed + state.tail.len() as u64
    }

    fn commit_to(&self, offset: u64) -> io::Result<()> {
        let mut state = self.0.borrow_mut();
        let end = offset.min(state.committed + state.tail.len() as u64);
        if end <= state.committed {
            return Ok(());
        }
        let count = (end - state.committed) as usize;
        let SpoolState { inner, tail, .. } = &mut *state;
        inner.write_all(&tail[..count])?;
        tail.drain(..count);
        state.committed = end;
        Ok(())
    }

    fn close(&self) -> io::Result<()> {
        self.commit_to(self.len())?;
        self.0.borrow_mut().inner.flush()
    }
}

impl<W: Write> Write for Spool<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut state = self.0.borrow_mut();
        let start = (state.position - state.committed) as usize;
        let end = start + buf.len();
        if end > state.tail.len() {
            state.tail.resize(end, 0);
        }
        state.tail[start..end].copy_from_slice(buf);
        state.position += buf.len() as u64;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<W: Write> Seek for Spool<W> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let mut state = self.0.borrow_mut();
        let len = state.committed + state.tail.len() as u64;
        let target = match pos {
            SeekFrom::Start(offset) => Some(offset),
            SeekFrom::Current(delta) => state.position.checked_add_signed(delta),
            SeekFrom::End(delta) => len.checked_add_signed(delta),
        };
        match target {
            Some(target) if target >= state.committed => {
                state.position = target;
                Ok(target)
            }
            _ => Err(io::Error::new(
                io::ErrorKind::Unsupported,
                "cannot seek into bytes already streamed",
            )),
        }
    }
}

#[derive(Debug)]
pub struct ArchiveEntry {
    pub name: String,
    pub bytes: Vec<u8>,
}

/// Cloneable handle for submitting entries to the single writer.
#[derive(Clone)]
pub struct ArchiveAppender {
    entries: mpsc::Sender<ArchiveEntry>,
}

impl ArchiveAppender {
    pub async fn append(&self, entry: ArchiveEntry) -> Result<(), FactureError> {
        self.entries
            .send(entry)
            .await
            .map_err(|_| FactureError::ArchiveFailed("archive writer stopped".to_string()))
    }
}

pub struct ArchiveSink {
    appender: ArchiveAppender,
    cancel: CancellationToken,
    writer: JoinHandle<Result<usize, FactureError>>,
}

impl ArchiveSink {
    /// Start the writer. The returned receiver yields the archive bytes.
    pub fn spawn(cancel: CancellationToken) -> (Self, mpsc::Receiver<BodyChunk>) {
        let (body_tx, body_rx) = mpsc::channel(BODY_CHANNEL_CAPACITY);
        let (entry_tx, entry_rx) = mpsc::channel(ENTRY_CHANNEL_CAPACITY);

        let writer_cancel = cancel.clone();
        let writer = tokio::task::spawn_blocking(move || {
            let error_tx = body_tx.clone();
            let result = write_archive(entry_rx, ChannelWriter::new(body_tx), &writer_cancel);
            if let Err(e) = &result {
                // Surface the failure to the HTTP client instead of a silently
                // truncated download.
                let _ = error_tx.blocking_send(Err(io::Error::other(e.to_string())));
            }
            result
        });

        (
            Self {
                appender: ArchiveAppender { entries: entry_tx },
                cancel,
                writer,
            },
            body_rx,
        )
    }

    pub fn appender(&self) -> ArchiveAppender {
        self.appender.clone()
    }

    pub async fn append(&self, entry: ArchiveEntry) -> Result<(), FactureError> {
        self.appender.append(entry).await
    }

    /// Write the central directory and close the stream. Returns the number
    /// of entries written. All appenders must be dropped first.
    pub async fn finish(self) -> Result<usize, FactureError> {
        drop(self.appender);
        self.writer
            .await
            .map_err(|e| FactureError::ArchiveFailed(format!("archive writer panicked: {}", e)))?
    }

    /// Stop without finalising; the client sees a failed body.
    pub async fn abort(self) {
        self.cancel.cancel();
        drop(self.appender);
        if let Err(e) = self.writer.await {
            tracing::error!(error = %e, "Archive writer panicked during abort");
        }
    }
}

fn archive_error(err: impl std::fmt::Display) -> FactureError {
    FactureError::ArchiveFailed(err.to_string())
}

fn write_archive(
    mut entries: mpsc::Receiver<ArchiveEntry>,
    out: ChannelWriter,
    cancel: &CancellationToken,
) -> Result<usize, FactureError> {
    let spool = Spool::new(out);
    let mut zip = ZipWriter::new(spool.clone());
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
    let mut written = 0;

    while let Some(entry) = entries.blocking_recv() {
        if cancel.is_cancelled() {
            break;
        }
        let previous_end = spool.len();
        zip.start_file(entry.name, options).map_err(archive_error)?;
        // Starting an entry finalises the previous one.
        spool.commit_to(previous_end).map_err(archive_error)?;
        zip.write_all(&entry.bytes).map_err(archive_error)?;
        written += 1;
    }

    if cancel.is_cancelled() {
        return Err(FactureError::ArchiveFailed("export aborted".to_string()));
    }

    zip.finish().map_err(archive_error)?;
    spool.close().map_err(archive_error)?;
    Ok(written)
}
