//! HearthLink OTA installer — device entry point.
//!
//! Runs as the dedicated update task: the surrounding accessory framework
//! brings Wi-Fi up, provisions the update source into NVS and hands control
//! here. One attempt per boot; on any failure the device keeps running the
//! old image and the framework schedules another attempt.

use core::time::Duration;

use anyhow::Result;
use log::{error, info, warn};

use hearthlink::bootslot::BootController;
use hearthlink::config::UpdateConfig;
use hearthlink::error::DownloadError;
use hearthlink::flash::EspFlash;
use hearthlink::updater::Updater;

fn main() -> Result<()> {
    esp_idf_svc::sys::link_patches();
    esp_idf_logger::init()?;

    info!("HearthLink installer v{}", env!("CARGO_PKG_VERSION"));

    // The accessory framework provisions the real source; defaults point
    // at the release repository.
    let cfg = UpdateConfig::default();

    let flash = EspFlash::new().map_err(|e| anyhow::anyhow!("{e}"))?;
    let boot = BootController::new();
    let mut updater = Updater::new(flash, boot).map_err(|e| anyhow::anyhow!("{e}"))?;

    match updater.remote_version(&cfg) {
        Ok(version) => info!("repository offers v{version}"),
        Err(e) => warn!("version probe failed: {e}"),
    }

    // run_update only returns on failure; success ends in the reboot.
    if let Err(err) = updater.run_update(&cfg) {
        error!(
            "update attempt ended: {} (code {})",
            err,
            err.outcome_code()
        );
        if matches!(
            err,
            hearthlink::error::Error::Download(DownloadError::Partial)
        ) {
            // The framework persists the snapshot and restores it via
            // restore_resume_state on the next boot.
            let resume = updater.resume_state();
            info!("cursor at {} — snapshot ready to persist", resume.cursor);
        }
    }

    // Hand the task back to the framework scheduler.
    loop {
        std::thread::sleep(Duration::from_secs(60));
    }
}
