//! Header-time error type for the FSEQ reader/writer.
//!
//! Per-frame faults during [`crate::reader::FseqReader::get_frame`] do not
//! use this type — they are logged and degrade to a zero-filled
//! [`crate::reader::FrameProjection`] (see module docs there). `FseqError`
//! covers only faults that abort `open`/`create`/`write_header`.

use std::io;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FseqError {
    #[error("Could not open sequence file: {0}")]
    OpenFailure(String),
    #[error("Short read: expected {expected} bytes, got {actual}")]
    ShortRead { expected: usize, actual: usize },
    #[error("Invalid magic number — not an FSEQ file")]
    BadMagic,
    #[error("Unsupported FSEQ version major={0}")]
    UnsupportedVersion(u8),
    #[error("Unsupported compression type byte {0}")]
    UnsupportedCompression(u8),
    #[error("write_header has no geometry to write — call initialize_from first")]
    MissingGeometry,
    #[error("write_header must be called exactly once")]
    HeaderAlreadyWritten,
    #[error("write_header must be called before the first add_frame")]
    HeaderNotWritten,
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}
