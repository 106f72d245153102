//! ESP-IDF platform backend for [`FlashPort`](super::FlashPort).
//!
//! Maps the two logical slots onto the OTA_0/OTA_1 app partitions (falling
//! back to the factory partition when no OTA_1 exists, as single-OTA
//! partition tables do).

use core::ffi::c_void;

use esp_idf_svc::sys::{
    esp_partition_erase_range, esp_partition_find_first, esp_partition_read, esp_partition_t,
    esp_partition_write, ESP_OK, ESP_PARTITION_SUBTYPE_APP_FACTORY,
    ESP_PARTITION_SUBTYPE_APP_OTA_0, ESP_PARTITION_SUBTYPE_APP_OTA_1, ESP_PARTITION_TYPE_APP,
};

use crate::config::SECTOR_SIZE;
use crate::error::{Error, FlashError};

use super::{FlashPort, Slot};

/// The two OTA app partitions, located once at init.
pub struct EspFlash {
    boot0: *const esp_partition_t,
    boot1: *const esp_partition_t,
}

// SAFETY: partition descriptors are static tables owned by esp-idf.
unsafe impl Send for EspFlash {}

impl EspFlash {
    /// Locate both slots in the partition table. Idempotent: the lookup is
    /// a pure table scan, constructing this twice yields the same handles.
    pub fn new() -> Result<Self, Error> {
        // SAFETY: find_first scans the in-ROM partition table.
        let boot0 = unsafe {
            esp_partition_find_first(
                ESP_PARTITION_TYPE_APP,
                ESP_PARTITION_SUBTYPE_APP_OTA_0,
                core::ptr::null(),
            )
        };
        let mut boot1 = unsafe {
            esp_partition_find_first(
                ESP_PARTITION_TYPE_APP,
                ESP_PARTITION_SUBTYPE_APP_OTA_1,
                core::ptr::null(),
            )
        };
        if boot1.is_null() {
            boot1 = unsafe {
                esp_partition_find_first(
                    ESP_PARTITION_TYPE_APP,
                    ESP_PARTITION_SUBTYPE_APP_FACTORY,
                    core::ptr::null(),
                )
            };
        }

        if boot0.is_null() || boot1.is_null() {
            return Err(Error::Init("OTA partitions missing"));
        }
        Ok(Self { boot0, boot1 })
    }

    fn partition(&self, slot: Slot) -> *const esp_partition_t {
        match slot {
            Slot::Primary => self.boot0,
            Slot::Alternate => self.boot1,
        }
    }
}

impl FlashPort for EspFlash {
    fn erase_sector(&mut self, slot: Slot, offset: u32) -> Result<(), FlashError> {
        // SAFETY: partition handle is valid for the process lifetime.
        let ret = unsafe {
            esp_partition_erase_range(self.partition(slot), offset as usize, SECTOR_SIZE as usize)
        };
        if ret == ESP_OK { Ok(()) } else { Err(FlashError::Erase) }
    }

    fn write(&mut self, slot: Slot, offset: u32, data: &[u8]) -> Result<(), FlashError> {
        // SAFETY: data is a live borrow for the duration of the call.
        let ret = unsafe {
            esp_partition_write(
                self.partition(slot),
                offset as usize,
                data.as_ptr().cast::<c_void>(),
                data.len(),
            )
        };
        if ret == ESP_OK { Ok(()) } else { Err(FlashError::Write) }
    }

    fn read(&self, slot: Slot, offset: u32, buf: &mut [u8]) -> Result<(), FlashError> {
        // SAFETY: buf is a live mutable borrow for the duration of the call.
        let ret = unsafe {
            esp_partition_read(
                self.partition(slot),
                offset as usize,
                buf.as_mut_ptr().cast::<c_void>(),
                buf.len(),
            )
        };
        if ret == ESP_OK { Ok(()) } else { Err(FlashError::Read) }
    }
}
