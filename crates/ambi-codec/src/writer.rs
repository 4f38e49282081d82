use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::Path;

use byteorder::{LittleEndian, WriteBytesExt};

use crate::error::CodecError;
use crate::header::{Header, MAGIC};

/// Append-only writer for the canonical binary layout.
///
/// The header is written once at creation and never touched again; records
/// must arrive in non-decreasing timestamp order and carry exactly
/// `led_count × bytes_per_led` bytes each.
#[derive(Debug)]
pub struct FrameWriter {
    out: BufWriter<File>,
    header: Header,
    last_ts_us: Option<u64>,
    frames: u64,
}

impl FrameWriter {
    /// Create the file and write the header.
    ///
    /// # Errors
    ///
    /// Fails with an i/o error if the file already exists (unless
    /// `overwrite` is set) or on any disk error.
    pub fn create(path: &Path, header: Header, overwrite: bool) -> Result<Self, CodecError> {
        let mut opts = OpenOptions::new();
        opts.write(true);
        if overwrite {
            opts.create(true).truncate(true);
        } else {
            opts.create_new(true);
        }
        let file = opts.open(path)?;

        let mut out = BufWriter::new(file);
        out.write_all(MAGIC)?;
        out.write_f32::<LittleEndian>(header.fps)?;
        out.write_u16::<LittleEndian>(header.led_count)?;
        out.write_u8(header.format.to_wire())?;
        out.write_u16::<LittleEndian>(header.offset)?;

        Ok(Self {
            out,
            header,
            last_ts_us: None,
            frames: 0,
        })
    }

    #[must_use]
    pub fn header(&self) -> &Header {
        &self.header
    }

    #[must_use]
    pub fn frames_written(&self) -> u64 {
        self.frames
    }

    /// Append one record.
    ///
    /// # Errors
    ///
    /// * [`CodecError::PayloadLength`] if the payload does not match the
    ///   header geometry.
    /// * [`CodecError::TimestampOrder`] if `ts_us` is earlier than the
    ///   previous record. Equal timestamps are allowed.
    pub fn write_frame(&mut self, ts_us: u64, payload: &[u8]) -> Result<(), CodecError> {
        let expected = self.header.payload_len();
        if payload.len() != expected {
            return Err(CodecError::PayloadLength {
                got: payload.len(),
                expected,
            });
        }
        if let Some(last_us) = self.last_ts_us {
            if ts_us < last_us {
                return Err(CodecError::TimestampOrder { ts_us, last_us });
            }
        }

        self.out.write_u64::<LittleEndian>(ts_us)?;
        self.out.write_u16::<LittleEndian>(payload.len() as u16)?;
        self.out.write_all(payload)?;

        self.last_ts_us = Some(ts_us);
        self.frames += 1;
        Ok(())
    }

    /// Flush and close, returning the number of records written.
    ///
    /// Dropping the writer without calling this loses buffered records;
    /// readers treat whatever made it to disk as a valid prefix.
    pub fn finish(mut self) -> Result<u64, CodecError> {
        self.out.flush()?;
        Ok(self.frames)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::header::LedFormat;

    fn small_header() -> Header {
        Header::new(20.0, 2, LedFormat::Rgb, 0)
    }

    #[test]
    fn refuses_existing_file_without_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.bin");
        std::fs::write(&path, b"occupied").unwrap();

        let err = FrameWriter::create(&path, small_header(), false).unwrap_err();
        assert!(matches!(err, CodecError::Io(_)));

        // With overwrite the stale content is replaced.
        let w = FrameWriter::create(&path, small_header(), true).unwrap();
        w.finish().unwrap();
        assert_eq!(std::fs::metadata(&path).unwrap().len(), 13);
    }

    #[test]
    fn rejects_wrong_payload_length() {
        let dir = tempfile::tempdir().unwrap();
        let mut w = FrameWriter::create(&dir.path().join("a.bin"), small_header(), false).unwrap();
        let err = w.write_frame(0, &[1, 2, 3]).unwrap_err();
        assert!(matches!(
            err,
            CodecError::PayloadLength { got: 3, expected: 6 }
        ));
    }

    #[test]
    fn rejects_decreasing_timestamps() {
        let dir = tempfile::tempdir().unwrap();
        let mut w = FrameWriter::create(&dir.path().join("a.bin"), small_header(), false).unwrap();
        w.write_frame(50_000, &[0u8; 6]).unwrap();
        // Equal is fine, going backwards is not.
        w.write_frame(50_000, &[0u8; 6]).unwrap();
        let err = w.write_frame(49_999, &[0u8; 6]).unwrap_err();
        assert!(matches!(err, CodecError::TimestampOrder { .. }));
    }
}
