//! Wire format between the host and the fractal workers
//!
//! Requests travel host -> worker as fixed 28-byte little-endian structs.
//! Results come back as records: a 4-byte header followed by one row of
//! 8-bit indexed pixels.
//!
//! # Line tag layout
//!
//! The 16-bit `line` field is echoed back by the worker and identifies where a
//! result belongs, since rows from different workers interleave arbitrarily:
//!
//! | bits   | field          | range   |
//! |--------|----------------|---------|
//! | 0..10  | scanline index | 0..1024 |
//! | 10..12 | image slot     | 0..4    |
//! | 12..16 | worker index   | 0..16   |
//!
//! # Record header
//!
//! The header is one little-endian 32-bit word: low half = `line`, high
//! half = `size` (pixel count, must equal the image width).

use thiserror::Error;

/// Bytes in a record header
pub const SCANLINE_HEADER_SIZE: usize = 4;

/// Bytes in an encoded [`ScanlineRequest`]
pub const REQUEST_SIZE: usize = 28;

/// Width of the scanline index field
pub const SCANLINE_BITS: u32 = 10;
/// Position of the image slot field
pub const IMAGE_SLOT_SHIFT: u32 = SCANLINE_BITS;
/// Width of the image slot field
pub const IMAGE_SLOT_BITS: u32 = 2;
/// Position of the worker index field
pub const WORKER_INDEX_SHIFT: u32 = IMAGE_SLOT_SHIFT + IMAGE_SLOT_BITS;
/// Width of the worker index field
pub const WORKER_INDEX_BITS: u32 = 16 - WORKER_INDEX_SHIFT;

/// Mask selecting the scanline index from a line tag
pub const SCANLINE_MASK: u16 = (1 << SCANLINE_BITS) - 1;
const IMAGE_SLOT_MASK: u16 = (1 << IMAGE_SLOT_BITS) - 1;
const WORKER_INDEX_MASK: u16 = (1 << WORKER_INDEX_BITS) - 1;

/// Tallest image the line tag can address
pub const MAX_IMAGE_HEIGHT: u32 = 1 << SCANLINE_BITS;
/// Most frames that can be in flight at once
pub const MAX_IMAGE_SLOTS: usize = 1 << IMAGE_SLOT_BITS;
/// Most workers the line tag can address
pub const MAX_WORKERS: usize = 1 << WORKER_INDEX_BITS;

/// Fractional bits of the wire fixed-point format
pub const FIXED_POINT_FRACTION_BITS: u32 = 53;

/// Convert a real number to the wire fixed-point format
#[inline]
pub fn to_fixed_point(v: f64) -> i64 {
    (v * (1i64 << FIXED_POINT_FRACTION_BITS) as f64) as i64
}

/// Convert a wire fixed-point value back to a real number
#[inline]
pub fn from_fixed_point(v: i64) -> f64 {
    v as f64 / (1i64 << FIXED_POINT_FRACTION_BITS) as f64
}

/// Size of one result record for an image of the given width
#[inline]
pub fn record_size(width: u16) -> usize {
    SCANLINE_HEADER_SIZE + width as usize
}

/// Errors found while decoding result records
///
/// Any of these means the stream can no longer be trusted.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("record size {found} does not match image width {expected}")]
    SizeMismatch { expected: u16, found: u16 },

    #[error("scanline {line} outside image height {height}")]
    LineOutOfRange { line: u16, height: u16 },

    #[error("image slot {slot} outside {slots} configured slot(s)")]
    SlotOutOfRange { slot: u8, slots: usize },

    #[error("worker index {worker} outside {workers} active worker(s)")]
    WorkerOutOfRange { worker: u8, workers: usize },

    #[error("truncated record: {len} byte(s)")]
    Truncated { len: usize },
}

/// Decoded routing metadata of a scanline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LineTag {
    /// Row within the image
    pub scanline: u16,
    /// Frame buffer the row belongs to
    pub image_slot: u8,
    /// Worker that computed the row
    pub worker: u8,
}

impl LineTag {
    /// Build a tag, returning `None` if a field does not fit its bit range
    pub fn new(scanline: u16, image_slot: u8, worker: u8) -> Option<Self> {
        if u32::from(scanline) >= MAX_IMAGE_HEIGHT
            || usize::from(image_slot) >= MAX_IMAGE_SLOTS
            || usize::from(worker) >= MAX_WORKERS
        {
            return None;
        }
        Some(Self {
            scanline,
            image_slot,
            worker,
        })
    }

    /// Pack into the 16-bit wire field
    pub fn pack(self) -> u16 {
        (self.scanline & SCANLINE_MASK)
            | ((u16::from(self.image_slot) & IMAGE_SLOT_MASK) << IMAGE_SLOT_SHIFT)
            | ((u16::from(self.worker) & WORKER_INDEX_MASK) << WORKER_INDEX_SHIFT)
    }

    /// Unpack the 16-bit wire field
    pub fn unpack(line: u16) -> Self {
        Self {
            scanline: line & SCANLINE_MASK,
            image_slot: ((line >> IMAGE_SLOT_SHIFT) & IMAGE_SLOT_MASK) as u8,
            worker: ((line >> WORKER_INDEX_SHIFT) & WORKER_INDEX_MASK) as u8,
        }
    }
}

/// Header preceding every result record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordHeader {
    pub line: u16,
    pub size: u16,
}

impl RecordHeader {
    pub fn new(tag: LineTag, size: u16) -> Self {
        Self {
            line: tag.pack(),
            size,
        }
    }

    pub fn tag(&self) -> LineTag {
        LineTag::unpack(self.line)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let word: [u8; SCANLINE_HEADER_SIZE] = bytes
            .get(..SCANLINE_HEADER_SIZE)
            .and_then(|b| b.try_into().ok())
            .ok_or(ProtocolError::Truncated { len: bytes.len() })?;
        let word = u32::from_le_bytes(word);
        Ok(Self {
            line: word as u16,
            size: (word >> 16) as u16,
        })
    }

    pub fn encode(&self) -> [u8; SCANLINE_HEADER_SIZE] {
        (u32::from(self.line) | (u32::from(self.size) << 16)).to_le_bytes()
    }
}

/// One unit of work: compute `size` pixels of a row
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanlineRequest {
    /// Packed [`LineTag`]
    pub line: u16,
    /// Pixel count, always the image width
    pub size: u16,
    /// Fixed-point X of the leftmost sample
    pub ax: i64,
    /// Fixed-point Y of the row
    pub ay: i64,
    /// Fixed-point X step per pixel
    pub incr: i64,
}

impl ScanlineRequest {
    /// Append the 28-byte wire form to `out`
    pub fn encode_into(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.line.to_le_bytes());
        out.extend_from_slice(&self.size.to_le_bytes());
        out.extend_from_slice(&self.ax.to_le_bytes());
        out.extend_from_slice(&self.ay.to_le_bytes());
        out.extend_from_slice(&self.incr.to_le_bytes());
    }

    pub fn encode(&self) -> [u8; REQUEST_SIZE] {
        let mut buf = Vec::with_capacity(REQUEST_SIZE);
        self.encode_into(&mut buf);
        let mut out = [0u8; REQUEST_SIZE];
        out.copy_from_slice(&buf);
        out
    }

    /// Decode one request from the front of `bytes`
    pub fn decode(bytes: &[u8]) -> Option<Self> {
        let b = bytes.get(..REQUEST_SIZE)?;
        let i64_at = |o: usize| {
            let mut v = [0u8; 8];
            v.copy_from_slice(&b[o..o + 8]);
            i64::from_le_bytes(v)
        };
        Some(Self {
            line: u16::from_le_bytes([b[0], b[1]]),
            size: u16::from_le_bytes([b[2], b[3]]),
            ax: i64_at(4),
            ay: i64_at(12),
            incr: i64_at(20),
        })
    }

    pub fn tag(&self) -> LineTag {
        LineTag::unpack(self.line)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_field_layout() {
        assert_eq!(WORKER_INDEX_SHIFT, 12);
        assert_eq!(MAX_IMAGE_HEIGHT, 1024);
        assert_eq!(MAX_IMAGE_SLOTS, 4);
        assert_eq!(MAX_WORKERS, 16);
    }

    #[test]
    fn test_pack_known_value() {
        let tag = LineTag::new(5, 1, 3).unwrap();
        assert_eq!(tag.pack(), 5 | (1 << 10) | (3 << 12));
    }

    #[test]
    fn test_new_rejects_out_of_range() {
        assert!(LineTag::new(1024, 0, 0).is_none());
        assert!(LineTag::new(0, 4, 0).is_none());
        assert!(LineTag::new(0, 0, 16).is_none());
        assert!(LineTag::new(1023, 3, 15).is_some());
    }

    #[test]
    fn test_header_encode_decode() {
        let header = RecordHeader::new(LineTag::new(479, 1, 2).unwrap(), 640);
        let bytes = header.encode();
        let decoded = RecordHeader::decode(&bytes).unwrap();
        assert_eq!(decoded, header);
        assert_eq!(decoded.size, 640);
        assert_eq!(decoded.tag().scanline, 479);
    }

    #[test]
    fn test_header_truncated() {
        assert_eq!(
            RecordHeader::decode(&[1, 2]),
            Err(ProtocolError::Truncated { len: 2 })
        );
    }

    #[test]
    fn test_request_wire_size_and_order() {
        let req = ScanlineRequest {
            line: 0x1234,
            size: 640,
            ax: -1,
            ay: 2,
            incr: 3,
        };
        let bytes = req.encode();
        assert_eq!(bytes.len(), REQUEST_SIZE);
        assert_eq!(&bytes[0..2], &[0x34, 0x12]);
        assert_eq!(&bytes[2..4], &640u16.to_le_bytes());
        assert_eq!(&bytes[4..12], &[0xFF; 8]);
        assert_eq!(ScanlineRequest::decode(&bytes), Some(req));
        assert_eq!(ScanlineRequest::decode(&bytes[..27]), None);
    }

    #[test]
    fn test_fixed_point() {
        assert_eq!(to_fixed_point(1.0), 1i64 << 53);
        assert_eq!(to_fixed_point(-0.5), -(1i64 << 52));
        let v = -0.86122562296399741;
        assert!((from_fixed_point(to_fixed_point(v)) - v).abs() < 1e-15);
    }

    proptest! {
        #[test]
        fn test_line_tag_round_trip(
            scanline in 0u16..1024,
            slot in 0u8..4,
            worker in 0u8..16
        ) {
            let tag = LineTag::new(scanline, slot, worker).unwrap();
            prop_assert_eq!(LineTag::unpack(tag.pack()), tag);
        }

        #[test]
        fn test_unpack_never_exceeds_ranges(line in any::<u16>()) {
            let tag = LineTag::unpack(line);
            prop_assert!(u32::from(tag.scanline) < MAX_IMAGE_HEIGHT);
            prop_assert!(usize::from(tag.image_slot) < MAX_IMAGE_SLOTS);
            prop_assert!(usize::from(tag.worker) < MAX_WORKERS);
            prop_assert_eq!(tag.pack(), line);
        }
    }
}
