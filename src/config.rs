//! Update-source configuration and project constants
//!
//! All tunable parameters for the OTA installer. The `UpdateConfig` struct
//! can be overridden via NVS or BLE provisioning; the constants are fixed
//! at build time and sized for the two-slot flash layout.

use serde::{Deserialize, Serialize};

// --- Buffers ---

/// Maximum length of a repository host name.
pub const HOST_LEN: usize = 64;
/// Maximum length of a repository path (including the file name).
pub const LOCATION_LEN: usize = 256;
/// Receive scratch buffer for socket reads.
pub const RECV_BUF_LEN: usize = 1024;
/// Cap on accumulated HTTP response headers. Never grown past this.
pub const HEADER_BUFFER_LEN: usize = 4096;
/// Formatted GET request buffer (host + path + range headers).
pub const REQUEST_BUF_LEN: usize = 512;

// --- Flash geometry ---

/// Smallest erase unit of the on-chip flash.
pub const SECTOR_SIZE: u32 = 4096;
/// Base sector of the primary (running) slot.
pub const BOOT0_SECTOR: u32 = 0x10000;
/// Base sector of the alternate (receiving) slot.
pub const BOOT1_SECTOR: u32 = 0xD0000;
/// Largest image that fits a slot, minus the reserved trailer.
pub const MAXFILESIZE: usize = 0xC0000 - 16;

// --- Download ---

/// Bytes requested per `Range:` chunk.
pub const CHUNK_SIZE: usize = 4096;
/// Redirect hops followed before giving up.
pub const MAX_302_JUMPS: u32 = 4;
/// Reconnect attempts within one download before returning a partial
/// outcome. Any forward progress resets the counter.
pub const MAX_DOWNLOAD_FILE_TRIES: u32 = 8;
/// Fresh-connection retries when a flash-target response lacks
/// `Content-Range` before the error is surfaced.
pub const MAX_MISSING_RANGE_RETRIES: u32 = 1;
/// Connect attempts per connection establishment.
pub const MAX_CONNECT_TRIES: u32 = 3;
/// Full resolver passes before the final location is declared unreachable.
pub const MAX_RESOLVE_TRIES: u32 = 3;

// --- Timing ---

/// Receive timeout while probing redirects.
pub const PROBE_TIMEOUT_SECS: u64 = 2;
/// Receive timeout during body transfer.
pub const BODY_TIMEOUT_SECS: u64 = 60;
/// Backoff between connect attempts.
pub const CONNECT_RETRY_DELAY_MS: u64 = 5000;
/// Pause before re-establishing a dropped download connection.
pub const RECONNECT_DELAY_MS: u64 = 1000;

// --- Signatures ---

/// Maximum DER-encoded ECDSA P-384 signature.
pub const SIGNSIZE: usize = 104;
/// SHA-384 digest length.
pub const HASHSIZE: usize = 48;
/// Suffix of the detached signature sibling file.
pub const SIGN_FILE_SUFFIX: &str = ".sig";
/// Maximum length of the plain-ASCII version sibling file.
pub const VERSIONSTRINGLEN: usize = 16;

// --- HTTP request template ---

pub const REQUESTHEAD: &str = "GET /";
pub const REQUESTTAIL: &str = " HTTP/1.1\r\nHost: ";
pub const RANGE: &str = "\r\nRange: bytes=";
pub const CRLFCRLF: &str = "\r\n\r\n";

/// Where the installer fetches releases from.
///
/// `repo` is `host[/path-prefix]`; the firmware image, its `.sig` sibling
/// and the version file live under that prefix.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateConfig {
    /// Repository as `host[/path]`, no scheme.
    pub repo: heapless::String<LOCATION_LEN>,
    /// Firmware image file name within the repository.
    pub firmware_file: heapless::String<64>,
    /// Version sibling file name.
    pub version_file: heapless::String<64>,
    /// Server TCP port.
    pub port: u16,
    /// Wrap the connection in TLS 1.2 (client, SNI on, no peer verify).
    pub tls: bool,
    /// Base sector of the slot that receives the image.
    pub target_sector: u32,
}

impl Default for UpdateConfig {
    fn default() -> Self {
        Self {
            repo: heapless::String::try_from("updates.hearthlink.io/firmware").unwrap(),
            firmware_file: heapless::String::try_from("hearthlink.bin").unwrap(),
            version_file: heapless::String::try_from("latest.txt").unwrap(),
            port: 443,
            tls: true,
            target_sector: BOOT1_SECTOR,
        }
    }
}
