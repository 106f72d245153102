//! The update task's top-level driver.
//!
//! One `Updater` instance owns everything a single update attempt needs:
//! the flash port, the boot-slot controller, the decoded release key and
//! the held-back first byte. The surrounding accessory framework dedicates
//! one task to it — there is no parallelism inside.
//!
//! ```text
//! Idle → Resolving → Downloading → Verifying → Committing → Rebooting
//! ```
//!
//! Every terminal failure rewinds to `Idle` with the resume cursor
//! preserved; a later attempt continues where the flash content left off.

use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::bootslot::BootController;
use crate::config::{SIGNSIZE, UpdateConfig, VERSIONSTRINGLEN};
use crate::download::Downloader;
use crate::error::{Error, FlashError};
use crate::flash::{finalize_image, FlashPort, ImageWriter, Slot};
use crate::verify::Verifier;

/// Phases of one update attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateState {
    Idle,
    Resolving,
    Downloading,
    Verifying,
    Committing,
    Rebooting,
}

/// What the caller persists (NVS) to continue a download after a reboot.
///
/// The held-back first byte travels with the cursor: a resumed download
/// never writes offset 0 again, so restoring the cursor alone would leave
/// the register at `0xFF` and verification would digest the wrong byte 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResumeState {
    /// Bytes of the image already committed to flash.
    pub cursor: usize,
    /// The held-back first byte of the image.
    pub first_byte: u8,
}

/// Owns the per-process update state: flash, boot record, release key,
/// resume cursor and the held-back first byte.
pub struct Updater<F: FlashPort> {
    flash: F,
    boot: BootController,
    verifier: Verifier,
    state: UpdateState,
    cursor: usize,
    first_byte: u8,
}

impl<F: FlashPort> Updater<F> {
    /// Initialise with the compiled-in release key and make sure the
    /// bootloader record declares the two-slot layout.
    pub fn new(flash: F, boot: BootController) -> Result<Self, Error> {
        Self::with_verifier(flash, boot, Verifier::new()?)
    }

    /// Same, with a caller-supplied verifier (staging key, tests).
    pub fn with_verifier(
        flash: F,
        mut boot: BootController,
        verifier: Verifier,
    ) -> Result<Self, Error> {
        boot.ensure_layout()?;
        Ok(Self {
            flash,
            boot,
            verifier,
            state: UpdateState::Idle,
            cursor: 0,
            first_byte: 0xFF,
        })
    }

    pub fn state(&self) -> UpdateState {
        self.state
    }

    /// Bytes of the current image already committed to flash. The full
    /// snapshot to persist across reboots is [`Updater::resume_state`].
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// Snapshot the in-flight download for persistence before a reboot.
    pub fn resume_state(&self) -> ResumeState {
        ResumeState {
            cursor: self.cursor,
            first_byte: self.first_byte,
        }
    }

    /// Restore a persisted snapshot before resuming.
    pub fn restore_resume_state(&mut self, state: ResumeState) {
        self.cursor = state.cursor;
        self.first_byte = state.first_byte;
    }

    /// Start over with a fresh image.
    pub fn reset_cursor(&mut self) {
        self.cursor = 0;
        self.first_byte = 0xFF;
    }

    /// Tear down, handing back the flash port and boot controller (the
    /// hardware they model outlives the process).
    pub fn into_parts(self) -> (F, BootController) {
        (self.flash, self.boot)
    }

    pub fn flash(&self) -> &F {
        &self.flash
    }

    pub fn boot(&self) -> &BootController {
        &self.boot
    }

    /// Fetch the repository's advertised version string.
    pub fn remote_version(
        &mut self,
        cfg: &UpdateConfig,
    ) -> Result<heapless::String<VERSIONSTRINGLEN>, Error> {
        let mut downloader =
            Downloader::new(&cfg.repo, cfg.port, cfg.tls).map_err(Error::Http)?;
        Ok(downloader.get_version(&cfg.version_file)?)
    }

    /// Run one full attempt: download, verify, commit, arm, reboot.
    ///
    /// On any failure the state machine returns to `Idle`, flash byte 0 of
    /// the alternate slot stays erased, and the cursor keeps its progress.
    pub fn run_update(&mut self, cfg: &UpdateConfig) -> Result<(), Error> {
        let result = self.try_update(cfg);
        if let Err(e) = &result {
            warn!("update failed ({}), code {}", e, e.outcome_code());
            self.state = UpdateState::Idle;
        }
        result
    }

    fn try_update(&mut self, cfg: &UpdateConfig) -> Result<(), Error> {
        let slot = Slot::from_sector(cfg.target_sector)?;
        if slot != Slot::Alternate {
            // The running image is read-only to this subsystem.
            return Err(FlashError::BadSlot.into());
        }

        self.state = UpdateState::Resolving;
        let mut downloader =
            Downloader::new(&cfg.repo, cfg.port, cfg.tls).map_err(Error::Http)?;

        self.state = UpdateState::Downloading;
        let filesize = {
            let mut writer = ImageWriter::new(&mut self.flash, slot, &mut self.first_byte);
            downloader.get_file_part(&cfg.firmware_file, &mut writer, &mut self.cursor)?
        };
        info!("update: image complete, {} bytes", filesize);

        self.state = UpdateState::Verifying;
        let mut signature = [0u8; SIGNSIZE];
        let sig_len = downloader.get_signature(&cfg.firmware_file, &mut signature)?;
        let genuine = self.verifier.verify_image(
            &self.flash,
            slot,
            filesize,
            self.first_byte,
            &signature[..sig_len],
        )?;
        if !genuine {
            // Abandon without finalizing: byte 0 stays erased, the slot
            // stays unbootable.
            return Err(Error::Integrity);
        }

        self.state = UpdateState::Committing;
        finalize_image(&mut self.flash, slot, self.first_byte)?;
        self.boot.arm_alternate()?;

        self.state = UpdateState::Rebooting;
        info!("update: committed, rebooting into alternate slot");
        self.boot.reboot();

        #[cfg(not(target_os = "espidf"))]
        Ok(())
    }
}
