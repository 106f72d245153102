//! Two-slot flash abstraction and the image writer.
//!
//! The device flash holds two OTA slots: the primary (running image) and
//! the alternate (receiving the new image). This subsystem only ever writes
//! the alternate; the primary is read-only here.
//!
//! ## Deferred first byte
//!
//! While a download or verification is in progress, byte 0 of the alternate
//! slot is kept in its erased state (`0xFF`) and the true first byte lives
//! in a one-byte RAM register. The bootloader's validity check fails on an
//! erased byte 0, so a partial or unverified image can never boot.
//! [`finalize_image`] writes the held byte — that is the commit point.
//!
//! ## cfg gating
//!
//! - **`target_os = "espidf"`**: `esp_partition_*` against the OTA_0/OTA_1
//!   partitions (`flash/esp_impl.rs`).
//! - **all other targets**: [`SimFlash`], an in-memory NOR-faithful model
//!   used by the host test suite.

use crate::config::{BOOT0_SECTOR, BOOT1_SECTOR, MAXFILESIZE, SECTOR_SIZE};
use crate::error::FlashError;

#[cfg(target_os = "espidf")]
mod esp_impl;
#[cfg(target_os = "espidf")]
pub use esp_impl::EspFlash;

/// Capacity of one OTA slot.
pub const SLOT_SIZE: usize = MAXFILESIZE + 16;

// ───────────────────────────────────────────────────────────────
// Slots
// ───────────────────────────────────────────────────────────────

/// One of the two OTA partitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Slot {
    /// The running / default-boot image. Read-only to this subsystem.
    Primary,
    /// The slot receiving the new image.
    Alternate,
}

impl Slot {
    /// Map an externally-configured base sector onto a slot handle.
    pub fn from_sector(sector: u32) -> Result<Self, FlashError> {
        match sector {
            BOOT0_SECTOR => Ok(Self::Primary),
            BOOT1_SECTOR => Ok(Self::Alternate),
            _ => Err(FlashError::BadSlot),
        }
    }

    pub fn base_sector(self) -> u32 {
        match self {
            Self::Primary => BOOT0_SECTOR,
            Self::Alternate => BOOT1_SECTOR,
        }
    }
}

// ───────────────────────────────────────────────────────────────
// Flash port
// ───────────────────────────────────────────────────────────────

/// Raw slot-relative flash access.
///
/// Offsets are relative to the slot base. Callers guarantee a region has
/// been erased since the last write before writing it.
pub trait FlashPort {
    /// Erase one sector at the (sector-aligned) offset.
    fn erase_sector(&mut self, slot: Slot, offset: u32) -> Result<(), FlashError>;

    /// Program bytes at the offset.
    fn write(&mut self, slot: Slot, offset: u32, data: &[u8]) -> Result<(), FlashError>;

    /// Read bytes back.
    fn read(&self, slot: Slot, offset: u32, buf: &mut [u8]) -> Result<(), FlashError>;
}

// ───────────────────────────────────────────────────────────────
// Image writer
// ───────────────────────────────────────────────────────────────

/// Streams an image into a slot: erase-on-demand, strictly in-order
/// writes, first byte held back until [`finalize_image`].
///
/// The held-byte register is borrowed from the owning updater so it
/// survives this writer — verification needs it after the download borrow
/// ends.
pub struct ImageWriter<'a, F: FlashPort> {
    flash: &'a mut F,
    slot: Slot,
    first_byte: &'a mut u8,
    /// Erase high-water mark, sector-aligned. Initialised from the first
    /// write so a resumed download never re-erases committed sectors.
    erased_until: Option<u32>,
}

impl<'a, F: FlashPort> ImageWriter<'a, F> {
    pub fn new(flash: &'a mut F, slot: Slot, first_byte: &'a mut u8) -> Self {
        Self {
            flash,
            slot,
            first_byte,
            erased_until: None,
        }
    }

    /// Write one received chunk at `offset`.
    ///
    /// Erases ahead as needed. A chunk at offset 0 stores its first byte in
    /// the register and programs the rest at offset 1, leaving flash byte 0
    /// erased. Re-writing an earlier offset after a rewind is permitted —
    /// the range was erased once and receives identical bytes.
    pub fn write_chunk(&mut self, offset: u32, data: &[u8]) -> Result<(), FlashError> {
        if data.is_empty() {
            return Ok(());
        }

        let end = offset
            .checked_add(data.len() as u32)
            .ok_or(FlashError::Write)?;
        let erased_until = self
            .erased_until
            .get_or_insert(offset - offset % SECTOR_SIZE);
        while *erased_until < end {
            self.flash.erase_sector(self.slot, *erased_until)?;
            *erased_until += SECTOR_SIZE;
        }

        if offset == 0 {
            *self.first_byte = data[0];
            if data.len() > 1 {
                self.flash
                    .write(self.slot, 1, &data[1..])
                    .map_err(|_| FlashError::WriteFirstSector)?;
            }
            Ok(())
        } else {
            self.flash
                .write(self.slot, offset, data)
                .map_err(|_| FlashError::Write)
        }
    }

    pub fn slot(&self) -> Slot {
        self.slot
    }
}

/// A flash port that accepts nothing.
///
/// Pins the flash type parameter for downloads that only ever touch RAM
/// (signature and version siblings); any attempt to use it is a fault.
pub struct NullFlash;

impl FlashPort for NullFlash {
    fn erase_sector(&mut self, _slot: Slot, _offset: u32) -> Result<(), FlashError> {
        Err(FlashError::Erase)
    }

    fn write(&mut self, _slot: Slot, _offset: u32, _data: &[u8]) -> Result<(), FlashError> {
        Err(FlashError::Write)
    }

    fn read(&self, _slot: Slot, _offset: u32, _buf: &mut [u8]) -> Result<(), FlashError> {
        Err(FlashError::Read)
    }
}

/// Commit point: program the held-back byte 0, making the image bootable.
pub fn finalize_image<F: FlashPort>(
    flash: &mut F,
    slot: Slot,
    first_byte: u8,
) -> Result<(), FlashError> {
    flash
        .write(slot, 0, &[first_byte])
        .map_err(|_| FlashError::WriteFirstSector)
}

// ───────────────────────────────────────────────────────────────
// Host simulation
// ───────────────────────────────────────────────────────────────

/// In-memory two-slot flash with NOR semantics: erase sets `0xFF`, writes
/// can only clear bits. Tracks erase ordering so tests can assert that no
/// slot byte is read before its first erase.
#[cfg(not(target_os = "espidf"))]
pub struct SimFlash {
    slots: [Vec<u8>; 2],
    sector_erased: [Vec<bool>; 2],
    /// Total sector erases issued.
    pub erase_count: usize,
    /// Reads that touched a never-erased sector. `Cell` because reads go
    /// through `&self`.
    reads_before_erase: core::cell::Cell<usize>,
    fail_erase_at: Option<u32>,
    fail_write_at: Option<u32>,
}

#[cfg(not(target_os = "espidf"))]
impl SimFlash {
    pub fn new() -> Self {
        let sectors = SLOT_SIZE / SECTOR_SIZE as usize;
        Self {
            // Fresh silicon ships unprogrammed, but a previous update
            // attempt leaves arbitrary bytes; zeroes model "not erased".
            slots: [vec![0u8; SLOT_SIZE], vec![0u8; SLOT_SIZE]],
            sector_erased: [vec![false; sectors], vec![false; sectors]],
            erase_count: 0,
            reads_before_erase: core::cell::Cell::new(0),
            fail_erase_at: None,
            fail_write_at: None,
        }
    }

    /// Reads that touched a never-erased sector.
    pub fn reads_before_erase(&self) -> usize {
        self.reads_before_erase.get()
    }

    /// Inject an erase failure at the given offset.
    pub fn fail_erase_at(&mut self, offset: u32) {
        self.fail_erase_at = Some(offset);
    }

    /// Inject a write failure covering the given offset.
    pub fn fail_write_at(&mut self, offset: u32) {
        self.fail_write_at = Some(offset);
    }

    /// The raw bytes of a slot, for test assertions.
    pub fn slot_bytes(&self, slot: Slot) -> &[u8] {
        &self.slots[slot as usize]
    }

    fn check_range(offset: u32, len: usize) -> Result<(), FlashError> {
        let end = offset as usize + len;
        if end > SLOT_SIZE {
            return Err(FlashError::Write);
        }
        Ok(())
    }
}

#[cfg(not(target_os = "espidf"))]
impl Default for SimFlash {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(not(target_os = "espidf"))]
impl FlashPort for SimFlash {
    fn erase_sector(&mut self, slot: Slot, offset: u32) -> Result<(), FlashError> {
        if offset % SECTOR_SIZE != 0 || offset as usize >= SLOT_SIZE {
            return Err(FlashError::Erase);
        }
        if self.fail_erase_at == Some(offset) {
            return Err(FlashError::Erase);
        }
        let idx = slot as usize;
        let start = offset as usize;
        self.slots[idx][start..start + SECTOR_SIZE as usize].fill(0xFF);
        self.sector_erased[idx][start / SECTOR_SIZE as usize] = true;
        self.erase_count += 1;
        Ok(())
    }

    fn write(&mut self, slot: Slot, offset: u32, data: &[u8]) -> Result<(), FlashError> {
        Self::check_range(offset, data.len())?;
        if let Some(at) = self.fail_write_at {
            if (offset..offset + data.len() as u32).contains(&at) {
                return Err(FlashError::Write);
            }
        }
        let idx = slot as usize;
        for (i, &b) in data.iter().enumerate() {
            // NOR flash can only clear bits outside an erase.
            self.slots[idx][offset as usize + i] &= b;
        }
        Ok(())
    }

    fn read(&self, slot: Slot, offset: u32, buf: &mut [u8]) -> Result<(), FlashError> {
        Self::check_range(offset, buf.len()).map_err(|_| FlashError::Read)?;
        let idx = slot as usize;
        let first_sector = offset / SECTOR_SIZE;
        let last_sector = (offset + buf.len().max(1) as u32 - 1) / SECTOR_SIZE;
        for s in first_sector..=last_sector {
            if !self.sector_erased[idx][s as usize] {
                self.reads_before_erase
                    .set(self.reads_before_erase.get() + 1);
            }
        }
        buf.copy_from_slice(&self.slots[idx][offset as usize..offset as usize + buf.len()]);
        Ok(())
    }
}

// ───────────────────────────────────────────────────────────────
// Tests
// ───────────────────────────────────────────────────────────────
