//! dedu-chunks: streaming slicer producing chunk records and a whole-file hash
//!
//! Two cooperating producer threads feed a bounded output queue:
//! - the splitter reads fixed-size windows, hashes each, and emits
//!   `(plaintext, metadata)` records;
//! - the whole-file hasher consumes a tee of the input stream end-to-end
//!   and surfaces the complete-file deduhash at EOF.
//!
//! The current record is held back one step so the terminal flag can be
//! attached atomically to the last non-empty chunk. Files ending exactly on
//! a chunk boundary (and empty files) get an additional empty terminal
//! record instead. Records are strictly ordered by offset; at most one
//! error record is emitted, and nothing follows the terminal record.

use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::sync::mpsc::{sync_channel, Receiver, SyncSender};
use std::sync::Arc;
use std::thread;

use anyhow::anyhow;
use tracing::debug;

use dedu_core::{DeduError, DeduResult};
use dedu_hash::Hasher;

pub const DEFAULT_CHUNK_SIZE: u64 = 1024 * 1024;

/// Output queue capacity, in records.
const BUF_SIZE: usize = 10;
/// Tee depth: windows in flight to the whole-file hasher.
const TEE_DEPTH: usize = 2;

/// Everything a consumer needs to pack and register one chunk.
#[derive(Debug, Clone)]
pub struct ChunkMetadata {
    /// Name of the source the chunk was sliced from
    pub resource_name: String,
    /// Byte offset of the chunk within the source
    pub offset: u64,
    /// Chunk length in bytes
    pub length: u64,
    /// Content hash of this window alone
    pub hash_of_plaintext: String,
}

/// One record of the chunk stream.
#[derive(Debug, Default)]
pub struct Chunk {
    pub metadata: Option<ChunkMetadata>,
    pub plaintext: Vec<u8>,
    /// Set on the last record of the stream.
    pub terminal: bool,
    /// Terminal record with no plaintext (empty input, or input ending
    /// exactly at a chunk boundary).
    pub empty: bool,
    /// Whole-file content hash; present on the terminal record.
    pub final_hash: Option<String>,
    /// Total bytes read; meaningful on the terminal record.
    pub final_length: u64,
}

pub struct Chunker {
    hasher: Arc<Hasher>,
    chunk_size: u64,
}

/// `io::Read` over a channel of byte buffers; EOF when the sender hangs up.
struct TeeReader {
    rx: Receiver<Vec<u8>>,
    buf: Vec<u8>,
    pos: usize,
}

impl Read for TeeReader {
    fn read(&mut self, out: &mut [u8]) -> std::io::Result<usize> {
        while self.pos >= self.buf.len() {
            match self.rx.recv() {
                Ok(next) => {
                    self.buf = next;
                    self.pos = 0;
                }
                Err(_) => return Ok(0),
            }
        }
        let n = out.len().min(self.buf.len() - self.pos);
        out[..n].copy_from_slice(&self.buf[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }
}

/// Read until `buf` is full or EOF; short count means EOF.
fn read_full<R: Read>(r: &mut R, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut n = 0;
    while n < buf.len() {
        let m = r.read(&mut buf[n..])?;
        if m == 0 {
            break;
        }
        n += m;
    }
    Ok(n)
}

impl Chunker {
    /// `chunk_size == 0` selects the 1 MiB default.
    pub fn new(hasher: Arc<Hasher>, chunk_size: u64) -> Self {
        let chunk_size = if chunk_size == 0 {
            DEFAULT_CHUNK_SIZE
        } else {
            chunk_size
        };
        Self { hasher, chunk_size }
    }

    pub fn chunk_size(&self) -> u64 {
        self.chunk_size
    }

    /// Slice `r` into chunk records, delivered through a bounded queue.
    ///
    /// Dropping the receiver tears the producers down; the input is dropped
    /// (and thereby closed) on every exit path.
    pub fn read<R: Read + Send + 'static>(
        &self,
        name: &str,
        r: R,
    ) -> Receiver<DeduResult<Chunk>> {
        let (out_tx, out_rx) = sync_channel::<DeduResult<Chunk>>(BUF_SIZE);
        let (tee_tx, tee_rx) = sync_channel::<Vec<u8>>(TEE_DEPTH);
        let (hash_tx, hash_rx) = sync_channel::<DeduResult<String>>(1);

        let whole_file_hasher = self.hasher.clone();
        let name_for_hash = name.to_string();
        thread::spawn(move || {
            debug!(name = %name_for_hash, "beginning whole-file hashing");
            let result = whole_file_hasher.compute_hash(TeeReader {
                rx: tee_rx,
                buf: Vec::new(),
                pos: 0,
            });
            debug!(name = %name_for_hash, ok = result.is_ok(), "finished whole-file hashing");
            let _ = hash_tx.send(result);
        });

        let hasher = self.hasher.clone();
        let chunk_size = self.chunk_size;
        let name = name.to_string();
        thread::spawn(move || {
            split_loop(hasher, chunk_size, name, r, out_tx, tee_tx, hash_rx);
        });

        out_rx
    }

    /// `read` layered over a file open, with the file released on all exit
    /// paths. Open errors arrive as the single record of the stream.
    pub fn read_file(&self, path: &Path) -> Receiver<DeduResult<Chunk>> {
        let name = std::path::absolute(path)
            .unwrap_or_else(|_| path.to_path_buf())
            .display()
            .to_string();
        match File::open(path) {
            Ok(f) => self.read(&name, f),
            Err(e) => {
                let (tx, rx) = sync_channel(1);
                let _ = tx.send(Err(DeduError::from(e)));
                rx
            }
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn split_loop<R: Read>(
    hasher: Arc<Hasher>,
    chunk_size: u64,
    name: String,
    mut r: R,
    out_tx: SyncSender<DeduResult<Chunk>>,
    tee_tx: SyncSender<Vec<u8>>,
    hash_rx: Receiver<DeduResult<String>>,
) {
    let mut pending: Option<Chunk> = None;
    let mut offset: u64 = 0;

    loop {
        if let Some(chunk) = pending.take() {
            if out_tx.send(Ok(chunk)).is_err() {
                // Consumer went away; tee_tx drops here and the whole-file
                // hasher unwinds on its own.
                return;
            }
        }

        let mut buf = vec![0u8; chunk_size as usize];
        let n = match read_full(&mut r, &mut buf) {
            Ok(n) => n,
            Err(e) => {
                let _ = out_tx.send(Err(e.into()));
                return;
            }
        };
        let eof = n < chunk_size as usize;
        buf.truncate(n);

        if n > 0 {
            if tee_tx.send(buf.clone()).is_err() {
                let _ = out_tx.send(Err(anyhow!("whole-file hasher stopped early").into()));
                return;
            }

            let window_hash = match hasher.compute_hash(&buf[..]) {
                Ok(h) => h,
                Err(e) => {
                    let _ = out_tx.send(Err(e));
                    return;
                }
            };

            debug!(name = %name, offset, length = n, "sliced chunk");

            pending = Some(Chunk {
                metadata: Some(ChunkMetadata {
                    resource_name: name.clone(),
                    offset,
                    length: n as u64,
                    hash_of_plaintext: window_hash,
                }),
                plaintext: buf,
                ..Default::default()
            });
            offset += n as u64;
        }

        if eof {
            // Close the tee so the whole-file hasher reaches EOF.
            drop(tee_tx);

            let final_hash = match hash_rx.recv() {
                Ok(Ok(h)) => h,
                Ok(Err(e)) => {
                    let _ = out_tx.send(Err(e));
                    return;
                }
                Err(_) => {
                    let _ = out_tx.send(Err(anyhow!("whole-file hasher vanished").into()));
                    return;
                }
            };

            let mut terminal = pending.take().unwrap_or_else(|| Chunk {
                empty: true,
                ..Default::default()
            });
            terminal.terminal = true;
            terminal.final_hash = Some(final_hash);
            terminal.final_length = offset;
            let _ = out_tx.send(Ok(terminal));
            debug!(name = %name, total = offset, "chunking complete");
            return;
        }
    }
}
