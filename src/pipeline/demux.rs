//! Splitting received bytes into validated scanline records

use crate::protocol::{record_size, LineTag, ProtocolError, RecordHeader};

/// One validated record, borrowing its pixels from the receive buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanlineRecord<'a> {
    pub tag: LineTag,
    pub pixels: &'a [u8],
}

/// Decodes and validates record headers against the image geometry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResultDemuxer {
    width: u16,
    height: u16,
    slots: usize,
}

impl ResultDemuxer {
    pub fn new(width: u16, height: u16, slots: usize) -> Self {
        Self {
            width,
            height,
            slots,
        }
    }

    /// Bytes per record: header plus one row
    pub fn record_size(&self) -> usize {
        record_size(self.width)
    }

    /// Check a header, returning its decoded tag
    pub fn validate(&self, header: RecordHeader, workers: usize) -> Result<LineTag, ProtocolError> {
        if header.size != self.width {
            return Err(ProtocolError::SizeMismatch {
                expected: self.width,
                found: header.size,
            });
        }
        let tag = header.tag();
        if tag.scanline >= self.height {
            return Err(ProtocolError::LineOutOfRange {
                line: tag.scanline,
                height: self.height,
            });
        }
        if usize::from(tag.image_slot) >= self.slots {
            return Err(ProtocolError::SlotOutOfRange {
                slot: tag.image_slot,
                slots: self.slots,
            });
        }
        if usize::from(tag.worker) >= workers {
            return Err(ProtocolError::WorkerOutOfRange {
                worker: tag.worker,
                workers,
            });
        }
        Ok(tag)
    }

    /// Whole records in `bytes`, validated in order
    ///
    /// Iteration should stop at the first error: nothing after a bad header
    /// can be trusted.
    pub fn records<'a>(
        &self,
        bytes: &'a [u8],
        workers: usize,
    ) -> impl Iterator<Item = Result<ScanlineRecord<'a>, ProtocolError>> + 'a {
        let demux = *self;
        bytes.chunks_exact(self.record_size()).map(move |chunk| {
            let header = RecordHeader::decode(chunk)?;
            let tag = demux.validate(header, workers)?;
            Ok(ScanlineRecord {
                tag,
                pixels: &chunk[crate::protocol::SCANLINE_HEADER_SIZE..],
            })
        })
    }

    /// Bytes after the last whole record
    pub fn trailing_bytes(&self, len: usize) -> usize {
        len % self.record_size()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(scanline: u16, slot: u8, worker: u8, width: u16, fill: u8) -> Vec<u8> {
        let header = RecordHeader::new(LineTag::new(scanline, slot, worker).unwrap(), width);
        let mut out = header.encode().to_vec();
        out.extend(std::iter::repeat(fill).take(usize::from(width)));
        out
    }

    #[test]
    fn test_records_split_back_to_back() {
        let demux = ResultDemuxer::new(8, 4, 2);
        let mut bytes = record(0, 0, 0, 8, 1);
        bytes.extend(record(3, 1, 1, 8, 2));
        let records: Vec<_> = demux.records(&bytes, 2).collect::<Result<_, _>>().unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].tag, LineTag::new(3, 1, 1).unwrap());
        assert_eq!(records[1].pixels, &[2u8; 8]);
    }

    #[test]
    fn test_size_mismatch_rejected() {
        let demux = ResultDemuxer::new(8, 4, 2);
        let mut bytes = record(0, 0, 0, 7, 1);
        bytes.push(0);
        let first = demux.records(&bytes, 1).next().unwrap();
        assert_eq!(
            first,
            Err(ProtocolError::SizeMismatch {
                expected: 8,
                found: 7
            })
        );
    }

    #[test]
    fn test_line_slot_worker_ranges() {
        let demux = ResultDemuxer::new(4, 4, 2);
        let check = |line, slot, worker| {
            let header = RecordHeader::new(LineTag::new(line, slot, worker).unwrap(), 4);
            demux.validate(header, 2)
        };
        assert!(check(3, 1, 1).is_ok());
        assert!(matches!(check(4, 0, 0), Err(ProtocolError::LineOutOfRange { .. })));
        assert!(matches!(check(0, 2, 0), Err(ProtocolError::SlotOutOfRange { .. })));
        assert!(matches!(check(0, 0, 2), Err(ProtocolError::WorkerOutOfRange { .. })));
    }

    #[test]
    fn test_trailing_bytes() {
        let demux = ResultDemuxer::new(8, 4, 2);
        assert_eq!(demux.record_size(), 12);
        assert_eq!(demux.trailing_bytes(30), 6);
        let bytes = vec![0u8; 11];
        assert_eq!(demux.records(&bytes, 1).count(), 0);
    }
}
