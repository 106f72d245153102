//! End-to-end update attempts: download → verify → commit → arm → reboot.
//!
//! The mock repository serves releases signed with a test key; the updater
//! runs against simulated flash and boot record, so every assertion down to
//! individual flash bytes is available.

use crate::mock_repo::{DropRule, MockRepo};
use hearthlink::bootslot::BootController;
use hearthlink::config::{BOOT0_SECTOR, BOOT1_SECTOR, UpdateConfig};
use hearthlink::error::{DownloadError, Error, FlashError};
use hearthlink::flash::{SimFlash, Slot};
use hearthlink::updater::{UpdateState, Updater};
use hearthlink::verify::Verifier;

use p384::ecdsa::signature::Signer;
use p384::ecdsa::{Signature, SigningKey};
use p384::pkcs8::EncodePublicKey;

fn keypair() -> (SigningKey, Verifier) {
    let scalar: [u8; 48] = core::array::from_fn(|i| i as u8 + 7);
    let signing = SigningKey::from_bytes(&scalar.into()).unwrap();
    let spki = signing.verifying_key().to_public_key_der().unwrap();
    let verifier = Verifier::from_spki_der(spki.as_bytes()).unwrap();
    (signing, verifier)
}

fn test_image(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 73 % 253) as u8).collect()
}

/// Publish `image` and a signature over `signed` (normally the same bytes;
/// tamper tests sign the pristine image but serve a modified one).
fn publish(repo: &MockRepo, signing: &SigningKey, image: Vec<u8>, signed: &[u8]) {
    let sig: Signature = signing.sign(signed);
    repo.add_file("fw/app.bin", image);
    repo.add_file("fw/app.bin.sig", sig.to_der().as_bytes().to_vec());
}

fn update_config(repo: &MockRepo) -> UpdateConfig {
    UpdateConfig {
        repo: heapless::String::try_from(repo.repo("fw").as_str()).unwrap(),
        firmware_file: heapless::String::try_from("app.bin").unwrap(),
        version_file: heapless::String::try_from("latest.txt").unwrap(),
        port: repo.port(),
        // TLS flag on, as a release repository would be; the host session
        // transports in plaintext.
        tls: true,
        target_sector: BOOT1_SECTOR,
    }
}

fn make_updater(verifier: Verifier) -> Updater<SimFlash> {
    Updater::with_verifier(SimFlash::new(), BootController::new(), verifier).unwrap()
}

#[test]
fn happy_path_commits_and_arms_alternate_slot() {
    let repo = MockRepo::start();
    let (signing, verifier) = keypair();
    let image = test_image(131_072);
    publish(&repo, &signing, image.clone(), &image);

    let mut updater = make_updater(verifier);
    updater.run_update(&update_config(&repo)).unwrap();

    assert_eq!(updater.state(), UpdateState::Rebooting);

    // The committed image is byte-for-byte the release, first byte included.
    let flash = updater.flash();
    assert_eq!(&flash.slot_bytes(Slot::Alternate)[..image.len()], &image[..]);
    assert_eq!(flash.reads_before_erase(), 0, "no slot read before erase");

    // Alternate armed for the next boot only; default entry untouched.
    let boot = updater.boot();
    assert!(boot.reboot_requested());
    assert_eq!(boot.next_boot_slot(), Slot::Alternate);
    assert_eq!(boot.config().current, 0);
}

#[test]
fn tampered_image_is_abandoned_unbootable() {
    let repo = MockRepo::start();
    let (signing, verifier) = keypair();
    let image = test_image(131_072);
    let mut tampered = image.clone();
    tampered[50_000] ^= 0x01;
    publish(&repo, &signing, tampered, &image);

    let mut updater = make_updater(verifier);
    let err = updater.run_update(&update_config(&repo)).unwrap_err();

    assert_eq!(err, Error::Integrity);
    assert_eq!(err.outcome_code(), -11);
    assert_eq!(updater.state(), UpdateState::Idle);
    assert_eq!(
        updater.flash().slot_bytes(Slot::Alternate)[0],
        0xFF,
        "finalize must not run after a failed verification"
    );
    assert!(!updater.boot().reboot_requested());
    assert_eq!(updater.boot().next_boot_slot(), Slot::Primary);
}

#[test]
fn partial_outcome_preserves_cursor_and_resumes() {
    let repo = MockRepo::start();
    let (signing, verifier) = keypair();
    let image = test_image(131_072);
    publish(&repo, &signing, image.clone(), &image);
    repo.set_drop_rule(Some(DropRule::always(32_768, 0)));

    let mut updater = make_updater(verifier);
    let cfg = update_config(&repo);

    let err = updater.run_update(&cfg).unwrap_err();
    assert_eq!(err, Error::Download(DownloadError::Partial));
    assert_eq!(err.outcome_code(), 1);
    assert_eq!(updater.state(), UpdateState::Idle);
    assert_eq!(updater.cursor(), 32_768);
    assert_eq!(updater.flash().slot_bytes(Slot::Alternate)[0], 0xFF);

    // The server recovers and the same task retries; the in-RAM state
    // carries over. (Resuming across a real reboot is covered by
    // resume_after_reboot_restores_held_first_byte.)
    repo.set_drop_rule(None);
    updater.run_update(&cfg).unwrap();

    assert_eq!(updater.state(), UpdateState::Rebooting);
    assert_eq!(
        &updater.flash().slot_bytes(Slot::Alternate)[..image.len()],
        &image[..]
    );
    assert!(updater.boot().reboot_requested());
}

#[test]
fn resume_after_reboot_restores_held_first_byte() {
    let repo = MockRepo::start();
    let (signing, verifier) = keypair();
    let image = test_image(131_072);
    publish(&repo, &signing, image.clone(), &image);
    repo.set_drop_rule(Some(DropRule::always(32_768, 0)));

    let mut updater = make_updater(verifier);
    let cfg = update_config(&repo);
    let err = updater.run_update(&cfg).unwrap_err();
    assert_eq!(err, Error::Download(DownloadError::Partial));

    // Power loss: persist the snapshot, lose the process, keep the flash
    // chip. The snapshot must already carry the held first byte — offset 0
    // is never downloaded again.
    let snapshot = updater.resume_state();
    assert_eq!(snapshot.cursor, 32_768);
    assert_eq!(snapshot.first_byte, image[0]);
    let (flash, _boot) = updater.into_parts();

    // Next boot: a fresh updater over the same flash, snapshot restored.
    repo.set_drop_rule(None);
    let (_signing, verifier) = keypair();
    let mut updater = Updater::with_verifier(flash, BootController::new(), verifier).unwrap();
    updater.restore_resume_state(snapshot);
    updater.run_update(&cfg).unwrap();

    assert_eq!(updater.state(), UpdateState::Rebooting);
    assert_eq!(
        &updater.flash().slot_bytes(Slot::Alternate)[..image.len()],
        &image[..]
    );
    assert!(updater.boot().reboot_requested());
}

#[test]
fn primary_sector_is_rejected() {
    let repo = MockRepo::start();
    let (_signing, verifier) = keypair();
    let mut updater = make_updater(verifier);

    let mut cfg = update_config(&repo);
    cfg.target_sector = BOOT0_SECTOR;
    let err = updater.run_update(&cfg).unwrap_err();
    assert_eq!(err, Error::Flash(FlashError::BadSlot));
    assert_eq!(err.outcome_code(), -5);
}

#[test]
fn unknown_sector_is_rejected() {
    let repo = MockRepo::start();
    let (_signing, verifier) = keypair();
    let mut updater = make_updater(verifier);

    let mut cfg = update_config(&repo);
    cfg.target_sector = 0x1234;
    let err = updater.run_update(&cfg).unwrap_err();
    assert_eq!(err, Error::Flash(FlashError::BadSlot));
}

#[test]
fn remote_version_probe() {
    let repo = MockRepo::start();
    repo.add_file("fw/latest.txt", b"3.1.4\n".to_vec());
    let (_signing, verifier) = keypair();

    let mut updater = make_updater(verifier);
    let version = updater.remote_version(&update_config(&repo)).unwrap();
    assert_eq!(version.as_str(), "3.1.4");
}

#[test]
fn flash_write_failure_keeps_old_image_bootable() {
    let repo = MockRepo::start();
    let (signing, verifier) = keypair();
    let image = test_image(65_536);
    publish(&repo, &signing, image.clone(), &image);

    let mut flash = SimFlash::new();
    flash.fail_write_at(20_000);
    let mut updater =
        Updater::with_verifier(flash, BootController::new(), verifier).unwrap();

    let err = updater.run_update(&update_config(&repo)).unwrap_err();
    assert_eq!(
        err,
        Error::Download(DownloadError::Flash(FlashError::Write))
    );
    assert_eq!(err.outcome_code(), -7);
    assert_eq!(updater.state(), UpdateState::Idle);
    assert_eq!(updater.flash().slot_bytes(Slot::Alternate)[0], 0xFF);
    assert!(!updater.boot().reboot_requested());
}
