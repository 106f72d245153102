//! Boot-slot selection protocol.
//!
//! Contract with the external bootloader: a two-entry table where entry 0
//! is the running image and entry 1 the candidate, a `current` index, and a
//! "temp boot" index consulted on the next reboot only. If the candidate
//! fails to confirm itself on first boot, the bootloader's `current = 0`
//! default returns to the previous image — there is no half-boot state.
//!
//! ## cfg gating
//!
//! - **`target_os = "espidf"`**: the partition table itself is the layout
//!   record; arming programs the OTA data entry through
//!   `esp_ota_set_boot_partition` and reboot is a real system reset.
//! - **all other targets**: an in-memory record plus a reboot-requested
//!   flag, so the host test suite can assert on the whole commit sequence.

use log::info;

use crate::config::{BOOT0_SECTOR, BOOT1_SECTOR};
use crate::error::Error;
#[cfg(not(target_os = "espidf"))]
use crate::flash::Slot;

/// The bootloader config record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BootConfig {
    /// Number of declared slots; this subsystem requires 2.
    pub slot_count: u8,
    /// Base sectors of the two slots.
    pub slots: [u32; 2],
    /// Index of the default boot entry.
    pub current: u8,
    /// Entry consulted on the next reboot only.
    pub temp_boot: Option<u8>,
}

impl BootConfig {
    /// The canonical two-slot layout this installer maintains.
    pub fn canonical() -> Self {
        Self {
            slot_count: 2,
            slots: [BOOT0_SECTOR, BOOT1_SECTOR],
            current: 0,
            temp_boot: None,
        }
    }
}

/// Reads and rewrites the bootloader record; issues the reboot.
pub struct BootController {
    #[cfg(not(target_os = "espidf"))]
    record: BootConfig,
    #[cfg(not(target_os = "espidf"))]
    reboot_requested: bool,

    #[cfg(target_os = "espidf")]
    armed: bool,
}

impl BootController {
    /// Attach to the bootloader record as it exists on the device.
    #[cfg(not(target_os = "espidf"))]
    pub fn new() -> Self {
        Self {
            // An unprovisioned record: ensure_layout rewrites it.
            record: BootConfig {
                slot_count: 0,
                slots: [0, 0],
                current: 0,
                temp_boot: None,
            },
            reboot_requested: false,
        }
    }

    #[cfg(target_os = "espidf")]
    pub fn new() -> Self {
        Self { armed: false }
    }

    /// Rewrite the record to the canonical two-slot layout unless it
    /// already matches. Calling this twice is a no-op on the second call.
    ///
    /// Returns whether a rewrite happened.
    #[cfg(not(target_os = "espidf"))]
    pub fn ensure_layout(&mut self) -> Result<bool, Error> {
        let canonical = BootConfig::canonical();
        if self.record == canonical {
            return Ok(false);
        }
        info!("bootslot: rewriting layout to two-slot default");
        self.record = canonical;
        Ok(true)
    }

    #[cfg(target_os = "espidf")]
    pub fn ensure_layout(&mut self) -> Result<bool, Error> {
        // The partition table is fixed at flash time; nothing to rewrite.
        Ok(false)
    }

    /// Mark the alternate slot for the next boot only.
    pub fn arm_alternate(&mut self) -> Result<(), Error> {
        info!("bootslot: arming alternate slot");
        #[cfg(not(target_os = "espidf"))]
        {
            self.record.temp_boot = Some(1);
        }
        #[cfg(target_os = "espidf")]
        {
            self.armed = true;
        }
        Ok(())
    }

    /// Trigger the system reset into whichever entry is armed.
    #[cfg(target_os = "espidf")]
    pub fn reboot(&mut self) -> ! {
        use esp_idf_svc::sys::{
            esp_ota_set_boot_partition, esp_partition_find_first, esp_restart,
            ESP_PARTITION_SUBTYPE_APP_OTA_0, ESP_PARTITION_SUBTYPE_APP_OTA_1,
            ESP_PARTITION_TYPE_APP,
        };

        info!("bootslot: rebooting");
        let subtype = if self.armed {
            ESP_PARTITION_SUBTYPE_APP_OTA_1
        } else {
            ESP_PARTITION_SUBTYPE_APP_OTA_0
        };
        // SAFETY: partition descriptors are static tables; set_boot writes
        // the OTA data entry.
        unsafe {
            let target = esp_partition_find_first(ESP_PARTITION_TYPE_APP, subtype, core::ptr::null());
            if !target.is_null() {
                esp_ota_set_boot_partition(target);
            }
        }
        std::thread::sleep(core::time::Duration::from_millis(1000));
        // SAFETY: plain system reset.
        unsafe { esp_restart() };
        unreachable!("esp_restart does not return")
    }

    #[cfg(not(target_os = "espidf"))]
    pub fn reboot(&mut self) {
        info!("bootslot: reboot requested (simulation)");
        self.reboot_requested = true;
    }

    /// The record as the bootloader would read it (host only).
    #[cfg(not(target_os = "espidf"))]
    pub fn config(&self) -> &BootConfig {
        &self.record
    }

    /// Whether a reset was requested (host only).
    #[cfg(not(target_os = "espidf"))]
    pub fn reboot_requested(&self) -> bool {
        self.reboot_requested
    }

    /// Which slot the bootloader would pick on the next boot.
    #[cfg(not(target_os = "espidf"))]
    pub fn next_boot_slot(&self) -> Slot {
        match self.record.temp_boot {
            Some(1) => Slot::Alternate,
            _ => match self.record.current {
                1 => Slot::Alternate,
                _ => Slot::Primary,
            },
        }
    }
}

impl Default for BootController {
    fn default() -> Self {
        Self::new()
    }
}
