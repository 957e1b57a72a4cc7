//! dedu-backup: the upload/download engine
//!
//! Upload drives the chunker, packs each chunk, and stores it under its own
//! content hash, where identical chunks naturally collapse (`AlreadyExists`
//! is success). Files yielding more than one chunk additionally get a
//! manifest-only *virtual chunk* stored under the whole-file hash, listing
//! the sub-chunk hashes in order.
//!
//! Download is the inverse: fetch and unpack, and for virtual chunks
//! fetch every sub-chunk, concatenate, and verify the concatenation
//! against the requested hash before returning it.

use std::path::Path;

use anyhow::{bail, Context, Result};
use tracing::{debug, info};

use dedu_chunks::Chunker;
use dedu_core::DeduError;
use dedu_crypto::wire::{ChunkReference, VirtualChunk};
use dedu_crypto::{ExtraData, Packer};
use dedu_hash::Hasher;
use dedu_storage::BlobStore;

/// What one `upload_file` call did.
#[derive(Debug)]
pub struct UploadSummary {
    /// Whole-file content hash; the name the file is retrievable under.
    pub file_hash: String,
    pub total_length: u64,
    /// References to the stored chunks, in offset order.
    pub chunks: Vec<ChunkReference>,
    /// Blobs actually transferred this call.
    pub uploaded: usize,
    /// Blobs the remote already had (dedup hits).
    pub already_present: usize,
    /// True when a virtual-chunk manifest was stored too.
    pub wrote_virtual: bool,
}

async fn put_absorbing_dedup<S: BlobStore>(
    store: &S,
    name: &str,
    packed: Vec<u8>,
    summary: &mut UploadSummary,
) -> Result<()> {
    match store.put(name, packed).await {
        Ok(()) => {
            summary.uploaded += 1;
            info!(chunk = %name, "uploaded");
        }
        Err(DeduError::AlreadyExists) => {
            summary.already_present += 1;
            debug!(chunk = %name, "already exists");
        }
        Err(e) => return Err(e).with_context(|| format!("storing chunk {name}")),
    }
    Ok(())
}

/// Chunk, pack, and upload one file.
pub async fn upload_file<S: BlobStore>(
    chunker: &Chunker,
    packer: &Packer,
    store: &S,
    path: &Path,
) -> Result<UploadSummary> {
    let mut summary = UploadSummary {
        file_hash: String::new(),
        total_length: 0,
        chunks: Vec::new(),
        uploaded: 0,
        already_present: 0,
        wrote_virtual: false,
    };

    let mut terminal_seen = false;

    for record in chunker.read_file(path) {
        let chunk = record.with_context(|| format!("chunking {}", path.display()))?;

        if let Some(md) = &chunk.metadata {
            summary.chunks.push(ChunkReference {
                hash: md.hash_of_plaintext.clone(),
                length: md.length as i64,
            });
            let packed = packer.pack(&chunk.plaintext, None)?;
            put_absorbing_dedup(store, &md.hash_of_plaintext, packed, &mut summary).await?;
        }

        if chunk.terminal {
            terminal_seen = true;
            summary.final_from(&chunk)?;
        }
    }

    if !terminal_seen {
        bail!("chunk stream for {} ended without a terminal record", path.display());
    }

    if summary.chunks.is_empty() {
        // Zero-byte file: no chunk records, but the content still gets
        // stored (as a packed empty chunk) under the whole-file hash so
        // that download-by-hash works for it too.
        let packed = packer.pack(b"", None)?;
        let name = summary.file_hash.clone();
        put_absorbing_dedup(store, &name, packed, &mut summary).await?;
    } else if summary.chunks.len() > 1 {
        let manifest = VirtualChunk {
            chunk_id: summary.file_hash.clone(),
            total_length: summary.total_length as i64,
            chunks: summary.chunks.clone(),
        };
        let packed = packer.pack(
            b"",
            Some(&ExtraData {
                virtual_chunk: Some(manifest),
                metadata: None,
            }),
        )?;
        let name = summary.file_hash.clone();
        put_absorbing_dedup(store, &name, packed, &mut summary).await?;
        summary.wrote_virtual = true;
    }

    info!(
        path = %path.display(),
        hash = %summary.file_hash,
        chunks = summary.chunks.len(),
        uploaded = summary.uploaded,
        already_present = summary.already_present,
        "upload complete"
    );
    Ok(summary)
}

impl UploadSummary {
    fn final_from(&mut self, chunk: &dedu_chunks::Chunk) -> Result<()> {
        self.file_hash = chunk
            .final_hash
            .clone()
            .context("terminal record without a whole-file hash")?;
        self.total_length = chunk.final_length;
        Ok(())
    }
}

/// Fetch a chunk by id and return its plaintext.
///
/// Virtual chunks are resolved one level deep: every listed sub-chunk is
/// fetched (and must itself be non-virtual), the plaintexts are
/// concatenated in list order, and the concatenation is verified against
/// the requested id before being returned.
pub async fn download_chunk<S: BlobStore>(
    packer: &Packer,
    hasher: &Hasher,
    store: &S,
    chunk_id: &str,
) -> Result<Vec<u8>> {
    let packed = store
        .get(chunk_id)
        .await
        .with_context(|| format!("fetching chunk {chunk_id}"))?;
    let (plaintext, header) = packer.unpack(&packed)?;

    let Some(vchunk) = header.private.virtual_chunk else {
        return Ok(plaintext);
    };

    debug!(
        chunk = %chunk_id,
        subchunks = vchunk.chunks.len(),
        total_length = vchunk.total_length,
        "resolving virtual chunk"
    );

    let mut content = Vec::new();
    for subchunk in &vchunk.chunks {
        let packed = store
            .get(&subchunk.hash)
            .await
            .with_context(|| format!("fetching subchunk {}", subchunk.hash))?;
        let (plaintext, header) = packer.unpack(&packed)?;
        if header.private.virtual_chunk.is_some() {
            bail!("subchunk {} cannot be virtual", subchunk.hash);
        }
        content.extend_from_slice(&plaintext);
    }

    let computed = hasher.compute_hash(&content[..])?;
    if computed != chunk_id {
        bail!("reassembled content hashes to {computed:?}, wanted {chunk_id:?}");
    }
    if content.len() as i64 != vchunk.total_length {
        debug!(
            got = content.len(),
            wanted = vchunk.total_length,
            "virtual chunk length disagrees with manifest"
        );
    }
    Ok(content)
}
