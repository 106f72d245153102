//! Download driver tests against the mock repository.
//!
//! Covers the range loop, redirect chasing, reconnect/rewind behavior,
//! resume, and the protocol/capacity failure paths.

use crate::mock_repo::{DropRule, MockRepo};
use hearthlink::config::{MAX_302_JUMPS, MAXFILESIZE, SIGNSIZE};
use hearthlink::download::Downloader;
use hearthlink::error::{DownloadError, HttpError};
use hearthlink::flash::{ImageWriter, SimFlash, Slot};

fn test_image(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 131 % 251) as u8).collect()
}

fn downloader(repo: &MockRepo, prefix: &str) -> Downloader {
    Downloader::new(&repo.repo(prefix), repo.port(), false).unwrap()
}

/// Download `file` into a fresh simulated alternate slot.
fn download_to_flash(
    repo: &MockRepo,
    prefix: &str,
    file: &str,
) -> (Result<usize, DownloadError>, SimFlash, u8) {
    let mut flash = SimFlash::new();
    let mut held = 0xFF;
    let result = {
        let mut writer = ImageWriter::new(&mut flash, Slot::Alternate, &mut held);
        downloader(repo, prefix).get_file(file, &mut writer)
    };
    (result, flash, held)
}

fn assert_flash_matches(flash: &SimFlash, held: u8, image: &[u8]) {
    let bytes = flash.slot_bytes(Slot::Alternate);
    assert_eq!(bytes[0], 0xFF, "byte 0 stays erased until finalize");
    assert_eq!(held, image[0], "first byte held in RAM");
    assert_eq!(&bytes[1..image.len()], &image[1..], "image body on flash");
}

#[test]
fn happy_path_streams_all_ranges() {
    let repo = MockRepo::start();
    let image = test_image(131_072);
    repo.add_file("fw/app.bin", image.clone());

    let (result, flash, held) = download_to_flash(&repo, "fw", "app.bin");
    assert_eq!(result.unwrap(), image.len());
    assert_flash_matches(&flash, held, &image);
    // One 0-1 probe plus 32 full 4 KiB ranges.
    assert_eq!(repo.requests_for("fw/app.bin"), 33);
}

#[test]
fn single_redirect_hop_settles_location() {
    let repo = MockRepo::start();
    let image = test_image(8192);
    repo.add_redirect("fw/app.bin", "//127.0.0.1/cdn/v/app.bin");
    repo.add_file("cdn/v/app.bin", image.clone());

    let mut flash = SimFlash::new();
    let mut held = 0xFF;
    let mut dl = downloader(&repo, "fw");
    let result = {
        let mut writer = ImageWriter::new(&mut flash, Slot::Alternate, &mut held);
        dl.get_file("app.bin", &mut writer)
    };
    assert_eq!(result.unwrap(), image.len());
    assert_eq!(dl.location().host(), "127.0.0.1");
    assert_eq!(dl.location().path(), "cdn/v/app.bin");
    assert_flash_matches(&flash, held, &image);
}

#[test]
fn redirect_chain_below_budget_succeeds() {
    let repo = MockRepo::start();
    let image = test_image(4096);
    // MAX_302_JUMPS - 1 hops of 302, then the file.
    let hops = (MAX_302_JUMPS - 1) as usize;
    for i in 0..hops {
        let from = if i == 0 {
            "fw/app.bin".to_string()
        } else {
            format!("hop{i}/app.bin")
        };
        repo.add_redirect(&from, &format!("//127.0.0.1/hop{}/app.bin", i + 1));
    }
    repo.add_file(&format!("hop{hops}/app.bin"), image.clone());

    let (result, _flash, _held) = download_to_flash(&repo, "fw", "app.bin");
    assert_eq!(result.unwrap(), image.len());
}

#[test]
fn redirect_chain_at_budget_fails() {
    let repo = MockRepo::start();
    let hops = MAX_302_JUMPS as usize;
    for i in 0..hops {
        let from = if i == 0 {
            "fw/app.bin".to_string()
        } else {
            format!("hop{i}/app.bin")
        };
        repo.add_redirect(&from, &format!("//127.0.0.1/hop{}/app.bin", i + 1));
    }
    repo.add_file(&format!("hop{hops}/app.bin"), test_image(4096));

    let (result, _flash, _held) = download_to_flash(&repo, "fw", "app.bin");
    assert_eq!(
        result.unwrap_err(),
        DownloadError::Http(HttpError::TooManyRedirects)
    );
}

#[test]
fn disconnect_mid_transfer_resumes_bit_identical() {
    // Reference download, no faults.
    let repo = MockRepo::start();
    let image = test_image(131_072);
    repo.add_file("fw/app.bin", image.clone());
    let (reference, ref_flash, ref_held) = download_to_flash(&repo, "fw", "app.bin");
    let reference = reference.unwrap();

    // Same download, but the server vanishes when the 9th chunk is
    // requested; the driver rewinds to offset 32768 and reconnects.
    repo.set_drop_rule(Some(DropRule::once(32_768, 0)));
    let (result, flash, held) = download_to_flash(&repo, "fw", "app.bin");
    assert_eq!(result.unwrap(), reference);
    assert_eq!(held, ref_held);
    assert_eq!(
        flash.slot_bytes(Slot::Alternate),
        ref_flash.slot_bytes(Slot::Alternate),
        "resumed image must be bit-identical"
    );
}

#[test]
fn disconnect_mid_body_rewinds_to_chunk_start() {
    let repo = MockRepo::start();
    let image = test_image(65_536);
    repo.add_file("fw/app.bin", image.clone());
    // Send the head plus 100 body bytes of the chunk at 40960, then cut.
    repo.set_drop_rule(Some(DropRule::once(40_960, 100)));

    let (result, flash, held) = download_to_flash(&repo, "fw", "app.bin");
    assert_eq!(result.unwrap(), image.len());
    assert_flash_matches(&flash, held, &image);
}

#[test]
fn retries_exhausted_returns_partial_with_cursor_then_resumes() {
    let repo = MockRepo::start();
    let image = test_image(131_072);
    repo.add_file("fw/app.bin", image.clone());
    repo.set_drop_rule(Some(DropRule::always(32_768, 0)));

    let mut flash = SimFlash::new();
    let mut held = 0xFF;
    let mut dl = downloader(&repo, "fw");
    let mut cursor = 0;
    {
        let mut writer = ImageWriter::new(&mut flash, Slot::Alternate, &mut held);
        let err = dl
            .get_file_part("app.bin", &mut writer, &mut cursor)
            .unwrap_err();
        assert_eq!(err, DownloadError::Partial);
        assert_eq!(err.code(), 1);
    }
    assert_eq!(cursor, 32_768, "cursor preserved at the failed chunk");

    // Server recovers; the caller resumes from the persisted cursor.
    repo.set_drop_rule(None);
    {
        let mut writer = ImageWriter::new(&mut flash, Slot::Alternate, &mut held);
        let total = dl
            .get_file_part("app.bin", &mut writer, &mut cursor)
            .unwrap();
        assert_eq!(total, image.len());
    }
    assert_eq!(cursor, image.len());
    assert_flash_matches(&flash, held, &image);
}

#[test]
fn oversize_total_aborts_before_flash_writes() {
    let repo = MockRepo::start();
    repo.add_file("fw/app.bin", test_image(8192));
    repo.set_total_override(Some(MAXFILESIZE + 1));

    let (result, flash, _held) = download_to_flash(&repo, "fw", "app.bin");
    assert_eq!(result.unwrap_err(), DownloadError::TooBig);
    assert_eq!(flash.erase_count, 0, "no flash touched for an oversize image");
}

#[test]
fn exact_maxfilesize_image_downloads() {
    let repo = MockRepo::start();
    let image = test_image(MAXFILESIZE);
    repo.add_file("fw/app.bin", image.clone());

    let (result, flash, held) = download_to_flash(&repo, "fw", "app.bin");
    assert_eq!(result.unwrap(), MAXFILESIZE);
    assert_flash_matches(&flash, held, &image);
}

#[test]
fn lowercase_headers_parse_identically() {
    let repo = MockRepo::start();
    repo.set_lowercase_headers(true);
    let image = test_image(8192);
    repo.add_file("fw/app.bin", image.clone());

    let (result, flash, held) = download_to_flash(&repo, "fw", "app.bin");
    assert_eq!(result.unwrap(), image.len());
    assert_flash_matches(&flash, held, &image);
}

#[test]
fn missing_content_range_reconnects_once_then_fails() {
    let repo = MockRepo::start();
    repo.set_omit_content_range(true);
    repo.add_file("fw/app.bin", test_image(8192));

    let (result, _flash, _held) = download_to_flash(&repo, "fw", "app.bin");
    assert_eq!(
        result.unwrap_err(),
        DownloadError::Http(HttpError::MissingContentRange)
    );
    // One probe, one first try, one fresh-connection retry.
    assert_eq!(repo.requests_for("fw/app.bin"), 3);
}

#[test]
fn signature_fetch_trusts_content_length() {
    let repo = MockRepo::start();
    // RAM targets fall back to Content-Length when Content-Range is absent.
    repo.set_omit_content_range(true);
    let sig_bytes: Vec<u8> = (0..96u8).collect();
    repo.add_file("fw/app.bin.sig", sig_bytes.clone());

    let mut sig = [0u8; SIGNSIZE];
    let n = downloader(&repo, "fw")
        .get_signature("app.bin", &mut sig)
        .unwrap();
    assert_eq!(n, 96);
    assert_eq!(&sig[..n], &sig_bytes[..]);
    assert!(sig[n..].iter().all(|&b| b == 0));
}

#[test]
fn version_fetch_trims_trailing_newline() {
    let repo = MockRepo::start();
    repo.add_file("fw/latest.txt", b"2.4.0\n".to_vec());

    let version = downloader(&repo, "fw").get_version("latest.txt").unwrap();
    assert_eq!(version.as_str(), "2.4.0");
}

#[test]
fn oversized_version_file_overflows_buffer() {
    let repo = MockRepo::start();
    repo.add_file("fw/latest.txt", vec![b'9'; 64]);

    let err = downloader(&repo, "fw").get_version("latest.txt").unwrap_err();
    assert_eq!(err, DownloadError::BufferOverflow);
}

#[test]
fn missing_file_surfaces_unexpected_status() {
    let repo = MockRepo::start();
    repo.add_file("fw/app.bin", test_image(4096));

    let (result, _flash, _held) = download_to_flash(&repo, "fw", "nosuch.bin");
    assert_eq!(
        result.unwrap_err(),
        DownloadError::Http(HttpError::UnexpectedStatus(404))
    );
}
