// store.rs
//
// Capability contract between the recorder and whatever holds the flight
// log. The production implementation is the EEPROM driver; tests use an
// in-memory model. Free-slot accounting already excludes the driver's
// safety reserve, so the recorder only ever asks "can one more record go
// in".

use crate::record::RawRecord;

#[allow(async_fn_in_trait)]
pub trait RecordStore {
    type Error: core::fmt::Debug;

    /// Records appended so far (the cursor, in record units).
    fn cursor_records(&self) -> u32;

    /// Usable capacity in record units, reserve excluded.
    fn capacity_records(&self) -> u32;

    /// Record slots still accepting appends.
    fn free_records(&self) -> u32 {
        self.capacity_records().saturating_sub(self.cursor_records())
    }

    /// Write one record at the cursor and advance it. The cursor moves only
    /// on full success; a failed append leaves the slot to be overwritten by
    /// the next attempt.
    async fn append(&mut self, record: &RawRecord) -> Result<(), Self::Error>;

    /// Rewrite an already-allocated slot. Used by the abnormal-termination
    /// recovery path; never advances the cursor.
    async fn overwrite(&mut self, slot: u32, record: &RawRecord) -> Result<(), Self::Error>;
}
