// eeprom.rs
//
// Flight-log store on a pair of dual-bank 24x1025-class I2C EEPROMs strapped
// to consecutive select codes: 8192 records x 32 B = 256 KiB, 64 KiB
// word-addressed span per select code. The high address bits fold into the
// device identifier, and no transfer is allowed to cross a span boundary on
// its own.
//
// The shared bus controller has a fixed 32-byte transaction buffer; minus
// the 2-byte word-address prefix that leaves 30 data bytes per write, so a
// record always goes out as two chunks. The part cannot accept a new
// transfer while a write cycle is committing, so every chunk is followed by
// an acknowledge-poll bounded by the rated commit time plus margin.

use altimeter_core::record::{RawRecord, RECORD_SIZE};
use altimeter_core::store::RecordStore;
use altimeter_core::warn;
use embedded_hal_async::delay::DelayNs;
use embedded_hal_async::i2c::I2c;

/// Total device span, record units.
pub const CAPACITY_RECORDS: u32 = 8192;
/// Slots held back from appends at the end of the span.
pub const RESERVE_RECORDS: u32 = 2;

const BASE_ADDR: u8 = 0x50;
const SPAN_BITS: u32 = 16;
const SPAN_BYTES: u32 = 1 << SPAN_BITS;
const BUS_BUFFER_LEN: usize = 32;
const ADDR_PREFIX_LEN: usize = 2;
/// Largest data payload one write transaction can carry.
pub const MAX_WRITE_CHUNK: usize = BUS_BUFFER_LEN - ADDR_PREFIX_LEN;

/// Rated maximum write-cycle time, datasheet.
const WRITE_CYCLE_MS: u32 = 5;
const WRITE_MARGIN_MS: u32 = 2;
const ACK_POLL_STEP_US: u32 = 250;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum EepromError {
    AddressTooLarge,
    ShortTransfer,
    NotAcknowledged,
    /// The part never re-acknowledged within the commit deadline. The bus
    /// is left in an undefined half-transaction state; the caller must
    /// re-address the device before trusting it again.
    WriteTimeout,
    CapacityExhausted,
}

/// Outcome of a completion poll, with elapsed commit time in ms.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum AckLatency {
    OnTime(u32),
    /// Acknowledged, but past the rated write-cycle time.
    Late(u32),
}

/// Fold the high address bits into the bus select code.
const fn device_select(addr: u32) -> u8 {
    BASE_ADDR | ((addr >> SPAN_BITS) as u8 & 0x07)
}

/// Transfer length that respects the buffer limit and never crosses a span
/// boundary.
fn chunk_len(addr: u32, remaining: usize, limit: usize) -> usize {
    let span_left = (SPAN_BYTES - (addr % SPAN_BYTES)) as usize;
    remaining.min(limit).min(span_left)
}

pub struct EepromStore<I2C, D> {
    i2c: I2C,
    delay: D,
    cursor: u32,
    capacity_records: u32,
}

impl<I2C: I2c, D: DelayNs> EepromStore<I2C, D> {
    pub fn new(i2c: I2C, delay: D) -> Self {
        Self::with_capacity(i2c, delay, CAPACITY_RECORDS)
    }

    pub fn with_capacity(i2c: I2C, delay: D, capacity_records: u32) -> Self {
        Self {
            i2c,
            delay,
            cursor: 0,
            capacity_records,
        }
    }

    fn usable_records(&self) -> u32 {
        self.capacity_records.saturating_sub(RESERVE_RECORDS)
    }

    fn capacity_bytes(&self) -> u32 {
        self.capacity_records * RECORD_SIZE as u32
    }

    /// Next free byte offset.
    pub fn cursor_bytes(&self) -> u32 {
        self.cursor
    }

    /// Restore the cursor from its durable copy at boot. Rounds a torn
    /// value down to a record boundary; refuses anything past the append
    /// limit.
    pub fn set_cursor(&mut self, bytes: u32) -> Result<(), EepromError> {
        let aligned = bytes - bytes % RECORD_SIZE as u32;
        if aligned > self.usable_records() * RECORD_SIZE as u32 {
            return Err(EepromError::AddressTooLarge);
        }
        self.cursor = aligned;
        Ok(())
    }

    /// Repeated zero-length addressing handshake until the part
    /// acknowledges (commit done) or the deadline expires. Elapsed time is
    /// accounted from the delay steps this loop itself issues.
    async fn ack_poll(&mut self, device: u8) -> Result<AckLatency, EepromError> {
        let deadline_us = (WRITE_CYCLE_MS + WRITE_MARGIN_MS) * 1000;
        let mut elapsed_us = 0u32;
        loop {
            if self.i2c.write(device, &[]).await.is_ok() {
                let ms = elapsed_us / 1000;
                return Ok(if elapsed_us > WRITE_CYCLE_MS * 1000 {
                    AckLatency::Late(ms)
                } else {
                    AckLatency::OnTime(ms)
                });
            }
            if elapsed_us >= deadline_us {
                return Err(EepromError::WriteTimeout);
            }
            self.delay.delay_us(ACK_POLL_STEP_US).await;
            elapsed_us += ACK_POLL_STEP_US;
        }
    }

    /// Chunked write: buffer-limited, span-clamped, one completion poll per
    /// chunk before the next is issued.
    async fn write_at(&mut self, addr: u32, data: &[u8]) -> Result<(), EepromError> {
        if addr.checked_add(data.len() as u32).is_none()
            || addr + data.len() as u32 > self.capacity_bytes()
        {
            return Err(EepromError::AddressTooLarge);
        }
        let mut off = 0usize;
        while off < data.len() {
            let a = addr + off as u32;
            let n = chunk_len(a, data.len() - off, MAX_WRITE_CHUNK);
            let word = (a % SPAN_BYTES) as u16;
            let mut buf = [0u8; BUS_BUFFER_LEN];
            buf[0] = (word >> 8) as u8;
            buf[1] = word as u8;
            buf[ADDR_PREFIX_LEN..ADDR_PREFIX_LEN + n].copy_from_slice(&data[off..off + n]);
            let device = device_select(a);
            self.i2c
                .write(device, &buf[..ADDR_PREFIX_LEN + n])
                .await
                .map_err(|_| EepromError::NotAcknowledged)?;
            if let AckLatency::Late(ms) = self.ack_poll(device).await? {
                warn!("eeprom commit completed late: {} ms", ms);
            }
            off += n;
        }
        Ok(())
    }

    /// Write one record at the cursor and advance it. The cursor moves only
    /// after every chunk committed; a failed write leaves the slot to be
    /// overwritten by the next append.
    pub async fn append(&mut self, record: &RawRecord) -> Result<(), EepromError> {
        if self.cursor / RECORD_SIZE as u32 >= self.usable_records() {
            return Err(EepromError::CapacityExhausted);
        }
        self.write_at(self.cursor, record).await?;
        self.cursor += RECORD_SIZE as u32;
        Ok(())
    }

    /// Rewrite an already-allocated slot without touching the cursor.
    pub async fn overwrite_slot(
        &mut self,
        slot: u32,
        record: &RawRecord,
    ) -> Result<(), EepromError> {
        if slot >= self.usable_records() {
            return Err(EepromError::AddressTooLarge);
        }
        self.write_at(slot * RECORD_SIZE as u32, record).await
    }

    /// Strict read: every chunk must acknowledge in full.
    pub async fn read_exact(&mut self, addr: u32, buf: &mut [u8]) -> Result<(), EepromError> {
        if addr.checked_add(buf.len() as u32).is_none()
            || addr + buf.len() as u32 > self.capacity_bytes()
        {
            return Err(EepromError::AddressTooLarge);
        }
        let mut off = 0usize;
        while off < buf.len() {
            let a = addr + off as u32;
            let n = chunk_len(a, buf.len() - off, BUS_BUFFER_LEN);
            let word = (a % SPAN_BYTES) as u16;
            let end = off + n;
            self.i2c
                .write_read(device_select(a), &word.to_be_bytes(), &mut buf[off..end])
                .await
                .map_err(|_| EepromError::ShortTransfer)?;
            off = end;
        }
        Ok(())
    }

    /// Tolerant read: a peripheral answering short leaves the remainder
    /// zero-filled instead of failing the transfer.
    pub async fn read(&mut self, addr: u32, buf: &mut [u8]) -> Result<(), EepromError> {
        let mut off = 0usize;
        while off < buf.len() {
            let a = addr + off as u32;
            let n = chunk_len(a, buf.len() - off, BUS_BUFFER_LEN);
            let end = off + n;
            match self.read_exact(a, &mut buf[off..end]).await {
                Ok(()) => {}
                Err(EepromError::AddressTooLarge) => return Err(EepromError::AddressTooLarge),
                Err(_) => {
                    warn!("short eeprom transfer at {}; zero-filling", a);
                    buf[off..].fill(0);
                    return Ok(());
                }
            }
            off = end;
        }
        Ok(())
    }
}

impl<I2C: I2c, D: DelayNs> RecordStore for EepromStore<I2C, D> {
    type Error = EepromError;

    fn cursor_records(&self) -> u32 {
        self.cursor / RECORD_SIZE as u32
    }

    fn capacity_records(&self) -> u32 {
        self.usable_records()
    }

    async fn append(&mut self, record: &RawRecord) -> Result<(), EepromError> {
        EepromStore::append(self, record).await
    }

    async fn overwrite(&mut self, slot: u32, record: &RawRecord) -> Result<(), EepromError> {
        self.overwrite_slot(slot, record).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_bus::{FakeEeprom, NoopDelay};
    use embassy_futures::block_on;

    fn store(capacity_records: u32) -> EepromStore<FakeEeprom, NoopDelay> {
        EepromStore::with_capacity(FakeEeprom::new(), NoopDelay, capacity_records)
    }

    fn record(fill: u8) -> RawRecord {
        [fill; RECORD_SIZE]
    }

    #[test]
    fn record_append_splits_into_two_chunks_with_one_poll_each() {
        let mut s = store(12);
        block_on(s.append(&record(0xAB))).unwrap();

        // 30-byte chunk, poll, 2-byte tail chunk, poll.
        let shapes: heapless::Vec<(usize, usize), 8> = s
            .i2c
            .txns
            .iter()
            .map(|t| (t.write_len, t.read_len))
            .collect();
        assert_eq!(
            &shapes[..],
            &[
                (ADDR_PREFIX_LEN + MAX_WRITE_CHUNK, 0),
                (0, 0),
                (ADDR_PREFIX_LEN + 2, 0),
                (0, 0)
            ]
        );
        assert!(s.i2c.txns.iter().all(|t| t.device == 0x50));
        assert_eq!(s.cursor_bytes(), 32);
        assert_eq!(&s.i2c.mem[..32], &record(0xAB));
    }

    #[test]
    fn second_record_lands_at_the_next_slot() {
        let mut s = store(12);
        block_on(s.append(&record(0x11))).unwrap();
        block_on(s.append(&record(0x22))).unwrap();
        assert_eq!(&s.i2c.mem[0..32], &[0x11; 32]);
        assert_eq!(&s.i2c.mem[32..64], &[0x22; 32]);
    }

    #[test]
    fn ack_poll_reports_elapsed_commit_time() {
        let mut s = store(12);
        // Commit takes 4 polls: done inside the rated window.
        s.i2c.pending_busy = 4;
        match block_on(s.ack_poll(0x50)).unwrap() {
            AckLatency::OnTime(ms) => assert_eq!(ms, 1),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn ack_poll_flags_late_commit() {
        let mut s = store(12);
        // 24 x 250 us = 6 ms: past the 5 ms rated time, inside the margin.
        s.i2c.pending_busy = 24;
        match block_on(s.ack_poll(0x50)).unwrap() {
            AckLatency::Late(ms) => assert_eq!(ms, 6),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn ack_poll_times_out_past_margin() {
        let mut s = store(12);
        s.i2c.pending_busy = u8::MAX;
        assert_eq!(
            block_on(s.ack_poll(0x50)),
            Err(EepromError::WriteTimeout)
        );
    }

    #[test]
    fn capacity_exhausted_exactly_at_the_reserve_boundary() {
        // 12-slot span, 2 reserved: ten appends fit.
        let mut s = store(12);
        for k in 0..10u8 {
            block_on(s.append(&record(k))).unwrap();
        }
        assert_eq!(s.free_records(), 0);
        assert_eq!(
            block_on(s.append(&record(0xEE))),
            Err(EepromError::CapacityExhausted)
        );
        // Cursor pinned at capacity minus the 2-record reserve.
        assert_eq!(s.cursor_bytes(), (12 - 2) * RECORD_SIZE as u32);
    }

    #[test]
    fn failed_write_does_not_advance_the_cursor() {
        let mut s = store(12);
        s.i2c.fail_writes = true;
        assert_eq!(
            block_on(s.append(&record(0x55))),
            Err(EepromError::NotAcknowledged)
        );
        assert_eq!(s.cursor_bytes(), 0);
    }

    #[test]
    fn read_round_trips_written_data() {
        let mut s = store(12);
        block_on(s.append(&record(0x3C))).unwrap();
        let mut buf = [0u8; 40];
        block_on(s.read(0, &mut buf)).unwrap();
        assert_eq!(&buf[..32], &[0x3C; 32]);
        // Unwritten bytes read back erased.
        assert_eq!(&buf[32..], &[0xFF; 8]);
    }

    #[test]
    fn short_transfer_zero_fills_tolerant_read() {
        let mut s = store(12);
        s.i2c.fail_reads = true;
        let mut buf = [0xAAu8; 16];
        block_on(s.read(0, &mut buf)).unwrap();
        assert_eq!(buf, [0u8; 16]);
    }

    #[test]
    fn strict_read_surfaces_short_transfer() {
        let mut s = store(12);
        s.i2c.fail_reads = true;
        let mut buf = [0u8; 16];
        assert_eq!(
            block_on(s.read_exact(0, &mut buf)),
            Err(EepromError::ShortTransfer)
        );
    }

    #[test]
    fn reads_and_writes_reject_out_of_span_addresses() {
        let mut s = store(12);
        let mut buf = [0u8; 4];
        assert_eq!(
            block_on(s.read_exact(12 * 32, &mut buf)),
            Err(EepromError::AddressTooLarge)
        );
        assert_eq!(
            block_on(s.overwrite_slot(10, &record(0))),
            Err(EepromError::AddressTooLarge)
        );
    }

    #[test]
    fn overwrite_rewrites_a_slot_in_place() {
        let mut s = store(12);
        block_on(s.append(&record(0x01))).unwrap();
        block_on(s.append(&record(0x02))).unwrap();
        block_on(s.overwrite_slot(0, &record(0x99))).unwrap();
        assert_eq!(&s.i2c.mem[0..32], &[0x99; 32]);
        assert_eq!(s.cursor_bytes(), 64);
    }

    #[test]
    fn cursor_restore_rounds_down_and_bounds_checks() {
        let mut s = store(12);
        s.set_cursor(3 * 32 + 7).unwrap();
        assert_eq!(s.cursor_bytes(), 3 * 32);
        assert_eq!(
            s.set_cursor(11 * 32),
            Err(EepromError::AddressTooLarge)
        );
    }

    #[test]
    fn high_address_bits_fold_into_the_select_code() {
        assert_eq!(device_select(0x0000_0000), 0x50);
        assert_eq!(device_select(0x0000_FFFF), 0x50);
        assert_eq!(device_select(0x0001_0000), 0x51);
        assert_eq!(device_select(0x0002_5000), 0x52);
        assert_eq!(device_select(0x0003_FFE0), 0x53);
    }

    #[test]
    fn chunks_never_cross_a_span_boundary() {
        // 16 bytes left in the span: the first chunk clamps to it.
        assert_eq!(chunk_len(0xFFF0, 32, MAX_WRITE_CHUNK), 16);
        assert_eq!(chunk_len(0x1_0000, 32, MAX_WRITE_CHUNK), 30);
        assert_eq!(chunk_len(0x10, 8, MAX_WRITE_CHUNK), 8);
    }

    #[test]
    fn poll_follows_every_chunk() {
        let mut s = store(12);
        block_on(s.append(&record(0x77))).unwrap();
        let polls = s
            .i2c
            .txns
            .iter()
            .filter(|t| t.write_len == 0 && t.read_len == 0)
            .count();
        let data_writes = s
            .i2c
            .txns
            .iter()
            .filter(|t| t.write_len > 0)
            .count();
        assert_eq!(polls, data_writes);
    }
}
