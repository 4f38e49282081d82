use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

use byteorder::{ByteOrder, LittleEndian};

use crate::error::CodecError;
use crate::header::{Header, LedFormat, MAGIC};

/// Per-record timestamp encoding, implied by the header layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Layout {
    /// `f32` fps header, `u64` microsecond timestamps (13-byte header).
    Micros,
    /// Legacy `u16` fps header, `f64` second timestamps (11-byte header).
    LegacySeconds,
}

impl Layout {
    fn header_len(self) -> u64 {
        match self {
            Self::Micros => 13,
            Self::LegacySeconds => 11,
        }
    }
}

/// Record header size is the same in both layouts: 8 timestamp bytes plus a
/// `u16` payload length.
const RECORD_HEADER_LEN: u64 = 10;

#[derive(Debug, Clone, Copy)]
struct IndexEntry {
    ts_us: u64,
    offset: u64,
    len: u16,
}

/// Indexed reader over a finished binary.
///
/// Opening scans the record stream once and keeps `(timestamp, offset,
/// length)` per record; payload bytes stay on disk until asked for.
#[derive(Debug)]
pub struct FrameReader {
    file: File,
    header: Header,
    index: Vec<IndexEntry>,
}

impl FrameReader {
    /// Open and index a binary.
    ///
    /// # Errors
    ///
    /// Fails on i/o errors, a bad magic, or a header too short to parse. A
    /// truncated trailing record is not an error; the index simply ends at
    /// the last complete record.
    pub fn open(path: &Path) -> Result<Self, CodecError> {
        let mut file = File::open(path)?;
        let file_len = file.metadata()?.len();

        let mut prefix = [0u8; 13];
        let got = read_up_to(&mut file, &mut prefix)?;
        if got < 4 {
            return Err(CodecError::TruncatedHeader { len: file_len });
        }
        if &prefix[0..4] != MAGIC {
            let mut found = [0u8; 4];
            found.copy_from_slice(&prefix[0..4]);
            return Err(CodecError::BadMagic { found });
        }
        if got < 11 {
            return Err(CodecError::TruncatedHeader { len: file_len });
        }

        let (layout, header) = detect_layout(&prefix[..got], &mut file, file_len)?;
        let index = build_index(&mut file, layout, file_len, &header);

        Ok(Self {
            file,
            header,
            index,
        })
    }

    #[must_use]
    pub fn header(&self) -> &Header {
        &self.header
    }

    /// Number of indexed records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.index.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Timestamp of record `index`, in microseconds.
    #[must_use]
    pub fn timestamp_us(&self, index: usize) -> Option<u64> {
        self.index.get(index).map(|e| e.ts_us)
    }

    /// Index of the record with the greatest timestamp ≤ `t_us`, or 0 when
    /// `t_us` precedes the first record.
    ///
    /// Duplicate timestamps tie-break to the lowest index.
    #[must_use]
    pub fn find_nearest_us(&self, t_us: u64) -> usize {
        let upper = self.index.partition_point(|e| e.ts_us <= t_us);
        if upper == 0 {
            return 0;
        }
        let ts = self.index[upper - 1].ts_us;
        self.index.partition_point(|e| e.ts_us < ts)
    }

    /// [`Self::find_nearest_us`] over a position in seconds.
    #[must_use]
    pub fn find_nearest(&self, seconds: f64) -> usize {
        self.find_nearest_us(crate::secs_to_micros(seconds))
    }

    /// Read one record's payload from disk.
    ///
    /// # Errors
    ///
    /// Fails if `index` is out of range or on a disk error.
    pub fn read_payload(&mut self, index: usize) -> Result<Vec<u8>, CodecError> {
        let entry = *self
            .index
            .get(index)
            .ok_or(CodecError::IndexOutOfRange {
                index,
                len: self.index.len(),
            })?;
        self.file.seek(SeekFrom::Start(entry.offset))?;
        let mut payload = vec![0u8; usize::from(entry.len)];
        self.file.read_exact(&mut payload)?;
        Ok(payload)
    }
}

/// Cheap check used by the startup orphan sweep: does the file begin with
/// the `AMBI` magic?
#[must_use]
pub fn probe_magic(path: &Path) -> bool {
    let mut buf = [0u8; 4];
    match File::open(path).and_then(|mut f| f.read_exact(&mut buf)) {
        Ok(()) => &buf == MAGIC,
        Err(_) => false,
    }
}

fn read_up_to(file: &mut File, buf: &mut [u8]) -> Result<usize, CodecError> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = file.read(&mut buf[filled..])?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}

/// Decide which layout the file uses.
///
/// The header candidates only differ in the width of the fps field, so the
/// check is: plausible fps (finite, 0 < fps ≤ 300) and a known format byte,
/// confirmed against the first record's payload length when one exists.
/// The canonical layout wins when both parse.
fn detect_layout(
    prefix: &[u8],
    file: &mut File,
    file_len: u64,
) -> Result<(Layout, Header), CodecError> {
    let mut candidates: Vec<(Layout, Header)> = Vec::new();

    if prefix.len() >= 13 {
        let fps = LittleEndian::read_f32(&prefix[4..8]);
        let led_count = LittleEndian::read_u16(&prefix[8..10]);
        if let Some(format) = LedFormat::from_wire(prefix[10]) {
            if fps.is_finite() && fps > 0.001 && fps <= 300.0 {
                let offset = LittleEndian::read_u16(&prefix[11..13]);
                candidates.push((Layout::Micros, Header::new(fps, led_count, format, offset)));
            }
        }
    }
    {
        let fps = LittleEndian::read_u16(&prefix[4..6]);
        let led_count = LittleEndian::read_u16(&prefix[6..8]);
        if let Some(format) = LedFormat::from_wire(prefix[8]) {
            if fps > 0 && fps <= 300 {
                let offset = LittleEndian::read_u16(&prefix[9..11]);
                candidates.push((
                    Layout::LegacySeconds,
                    Header::new(f32::from(fps), led_count, format, offset),
                ));
            }
        }
    }

    // Confirm against the first record where the file has one.
    let confirmed: Vec<&(Layout, Header)> = candidates
        .iter()
        .filter(|(layout, header)| first_record_agrees(file, *layout, header, file_len))
        .collect();

    match confirmed.first() {
        Some(&&(layout, header)) => Ok((layout, header)),
        // Neither candidate held up; the magic was right but the rest of
        // the header is garbage.
        None => Err(CodecError::TruncatedHeader { len: file_len }),
    }
}

fn first_record_agrees(file: &mut File, layout: Layout, header: &Header, file_len: u64) -> bool {
    let header_len = layout.header_len();
    if file_len == header_len {
        // Header-only file: nothing to contradict the candidate.
        return true;
    }
    if file_len < header_len + RECORD_HEADER_LEN {
        // A few trailing bytes of a partial record; still acceptable.
        return file_len > header_len;
    }
    let mut rec = [0u8; 10];
    if file.seek(SeekFrom::Start(header_len)).is_err() {
        return false;
    }
    if file.read_exact(&mut rec).is_err() {
        return false;
    }
    let payload_len = LittleEndian::read_u16(&rec[8..10]);
    usize::from(payload_len) == header.payload_len()
}

fn build_index(file: &mut File, layout: Layout, file_len: u64, header: &Header) -> Vec<IndexEntry> {
    let mut index = Vec::new();
    let mut pos = layout.header_len();
    let expected_len = header.payload_len();
    let mut warned_len = false;

    if file.seek(SeekFrom::Start(pos)).is_err() {
        return index;
    }

    let mut rec = [0u8; 10];
    loop {
        if file_len - pos < RECORD_HEADER_LEN {
            if file_len > pos {
                tracing::debug!(trailing = file_len - pos, "dropping truncated trailing record");
            }
            break;
        }
        if file.read_exact(&mut rec).is_err() {
            break;
        }
        let ts_us = match layout {
            Layout::Micros => LittleEndian::read_u64(&rec[0..8]),
            Layout::LegacySeconds => {
                let secs = LittleEndian::read_f64(&rec[0..8]);
                if !secs.is_finite() || secs < 0.0 {
                    tracing::debug!(secs, "dropping record with unusable timestamp");
                    break;
                }
                (secs * 1_000_000.0).round() as u64
            }
        };
        let payload_len = LittleEndian::read_u16(&rec[8..10]);
        pos += RECORD_HEADER_LEN;

        if file_len - pos < u64::from(payload_len) {
            tracing::debug!(ts_us, "dropping truncated trailing record");
            break;
        }
        if usize::from(payload_len) != expected_len && !warned_len {
            tracing::warn!(
                got = payload_len,
                expected = expected_len,
                "record payload length disagrees with header geometry"
            );
            warned_len = true;
        }

        index.push(IndexEntry {
            ts_us,
            offset: pos,
            len: payload_len,
        });
        pos += u64::from(payload_len);
        if file.seek(SeekFrom::Start(pos)).is_err() {
            break;
        }
    }

    index
}
