//! # fseq — FSEQ lighting-sequence container reader/writer
//!
//! Format guarantees:
//! - All numeric fields are little-endian; never negotiated
//! - A file is either "V1" (legacy, uncompressed, fixed per-frame layout) or
//!   "V2" (block-indexed, optionally zstd-compressed, optionally sparse) —
//!   the two dialects are dispatched on `version_major` and never mixed
//! - V2 compression is one of `none` / `zstd`; the `zlib` byte value parses
//!   but is never implemented, by design — see [`header::Compression`]
//! - Per-frame I/O or decompression faults never abort a read: they are
//!   logged and degrade to a zero-filled frame, matching playback hardware
//!   that must keep outputting *something* on every frame tick
//!
//! [`open`] and [`create`] are the two facade entry points; most callers
//! never need to reach into [`reader`] or [`writer`] directly.

pub mod advise;
pub mod blockindex;
pub mod byteio;
pub mod error;
pub mod header;
pub mod reader;
pub mod writer;

use std::fs::File;
use std::path::Path;

use chrono::{DateTime, Utc};

pub use blockindex::{BlockDescriptor, BlockSizing};
pub use error::FseqError;
pub use header::{Compression, SequenceGeometry, SparseRange, VariableHeader};
pub use reader::{FrameProjection, FseqMetadata, FseqReader};
pub use writer::{FseqVersion, FseqWriter};

/// Open an FSEQ file for reading. V1 files carry no unique id on disk; one
/// is synthesized from the file's modification time, matching the
/// original's fallback to `stat().st_mtime`.
pub fn open<P: AsRef<Path>>(path: P) -> Result<FseqReader<File>, FseqError> {
    let file = File::open(path.as_ref()).map_err(|e| FseqError::OpenFailure(e.to_string()))?;
    let mtime_fallback = file
        .metadata()
        .ok()
        .and_then(|m| m.modified().ok())
        .map(|t| DateTime::<Utc>::from(t).timestamp() as u64)
        .unwrap_or(0);

    #[cfg(unix)]
    let raw_fd = {
        use std::os::unix::io::AsRawFd;
        Some(file.as_raw_fd())
    };
    #[cfg(not(unix))]
    let raw_fd = None;

    FseqReader::open_with_fd(file, mtime_fallback, raw_fd)
}

/// Create a new FSEQ file for writing, truncating any existing file at
/// `path`. Drives [`FseqWriter`]'s staged lifecycle (`create` ->
/// `initialize_from` -> `set_sparse_ranges` -> `set_variable_headers` ->
/// `write_header`) so callers who don't need the granular control get a
/// writer whose header is already committed and is ready for `add_frame`.
#[allow(clippy::too_many_arguments)]
pub fn create<P: AsRef<Path>>(
    path: P,
    version: FseqVersion,
    geometry: SequenceGeometry,
    compression: Compression,
    compression_level: i32,
    sparse_ranges: Vec<SparseRange>,
    variable_headers: Vec<VariableHeader>,
    unique_id: u64,
) -> Result<FseqWriter<File>, FseqError> {
    let file = File::create(path.as_ref()).map_err(|e| FseqError::OpenFailure(e.to_string()))?;
    let mut writer = FseqWriter::create(file, version, compression, compression_level);
    writer.initialize_from(geometry, unique_id);
    writer.set_sparse_ranges(sparse_ranges);
    writer.set_variable_headers(variable_headers);
    writer.write_header()?;
    Ok(writer)
}
