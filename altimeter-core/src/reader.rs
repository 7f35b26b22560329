// reader.rs
//
// Reference reader for the exposed flight-log format: a flat 32-byte record
// stream where bit0 opens a flight and bit6 closes it. Allocation-free so
// the same code serves host tooling and on-device export. A truncated final
// flight (power loss before the terminal record) is surfaced rather than
// rejected.

use crate::record::{FlightRecord, RawRecord, StatusBits, RECORD_SIZE};

/// Iterates decoded records over a byte image, stopping at the image end or
/// at the first erased (all-ones) slot.
#[derive(Clone)]
pub struct RecordIter<'a> {
    bytes: &'a [u8],
    offset: usize,
}

impl<'a> RecordIter<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, offset: 0 }
    }

    fn peek_raw(&self) -> Option<&'a RawRecord> {
        let end = self.offset.checked_add(RECORD_SIZE)?;
        if end > self.bytes.len() {
            return None;
        }
        let raw: &RawRecord = self.bytes[self.offset..end].try_into().ok()?;
        if FlightRecord::is_blank(raw) {
            return None;
        }
        Some(raw)
    }
}

impl<'a> Iterator for RecordIter<'a> {
    type Item = FlightRecord;

    fn next(&mut self) -> Option<FlightRecord> {
        let raw = self.peek_raw()?;
        self.offset += RECORD_SIZE;
        Some(FlightRecord::decode(raw))
    }
}

/// One flight's slice of the log.
pub struct Flight<'a> {
    bytes: &'a [u8],
    /// False when the flight has no terminal record: storage exhaustion or
    /// a truncated image.
    pub complete: bool,
}

impl<'a> Flight<'a> {
    pub fn records(&self) -> RecordIter<'a> {
        RecordIter::new(self.bytes)
    }

    pub fn record_count(&self) -> usize {
        self.bytes.len() / RECORD_SIZE
    }
}

/// Enumerates flights by scanning from offset 0.
pub struct FlightIter<'a> {
    bytes: &'a [u8],
    offset: usize,
}

impl<'a> FlightIter<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, offset: 0 }
    }

    fn status_at(&self, offset: usize) -> Option<StatusBits> {
        let end = offset.checked_add(RECORD_SIZE)?;
        if end > self.bytes.len() {
            return None;
        }
        let raw: &RawRecord = self.bytes[offset..end].try_into().ok()?;
        if FlightRecord::is_blank(raw) {
            return None;
        }
        Some(StatusBits(u16::from_le_bytes([raw[0], raw[1]])))
    }
}

impl<'a> Iterator for FlightIter<'a> {
    type Item = Flight<'a>;

    fn next(&mut self) -> Option<Flight<'a>> {
        // Seek the next begin-of-flight marker.
        loop {
            let status = self.status_at(self.offset)?;
            if status.contains(StatusBits::INITIAL_RECORD) {
                break;
            }
            self.offset += RECORD_SIZE;
        }

        let start = self.offset;
        let mut end = start;
        let mut complete = false;
        loop {
            let Some(status) = self.status_at(end) else {
                break;
            };
            // A second init record means the previous flight was truncated.
            if end > start && status.contains(StatusBits::INITIAL_RECORD) {
                break;
            }
            end += RECORD_SIZE;
            if status.contains(StatusBits::LAST_RECORD) {
                complete = true;
                break;
            }
        }

        self.offset = end;
        Some(Flight {
            bytes: &self.bytes[start..end],
            complete,
        })
    }
}
