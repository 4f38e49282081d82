use thiserror::Error;

/// Errors produced by the frame codec.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("bad magic {found:02x?} (expected \"AMBI\")")]
    BadMagic { found: [u8; 4] },

    #[error("truncated header: file is only {len} bytes")]
    TruncatedHeader { len: u64 },

    #[error("payload is {got} bytes, header demands {expected}")]
    PayloadLength { got: usize, expected: usize },

    #[error("timestamp {ts_us}us is earlier than the previous record at {last_us}us")]
    TimestampOrder { ts_us: u64, last_us: u64 },

    #[error("record index {index} out of range ({len} records)")]
    IndexOutOfRange { index: usize, len: usize },
}
