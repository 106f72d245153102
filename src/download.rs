//! Resumable range-based download driver.
//!
//! Orchestrates the resolver, session and flash writer: resolve the final
//! location, then stream the file in 4 KiB ranges over one connection,
//! reusing it across ranges until it breaks. A dropped connection rewinds
//! to the start of the in-flight chunk, reconnects and carries on; forward
//! progress resets the attempt budget, so only a server that keeps failing
//! at the *same* offset exhausts it. The caller-owned resume cursor makes
//! large images survive power loss mid-update.
//!
//! Small sibling files (detached signature, version string) download
//! through the same engine into caller-supplied RAM instead of flash.

use core::time::Duration;

use log::{info, warn};

use crate::config::{
    BODY_TIMEOUT_SECS, CHUNK_SIZE, CONNECT_RETRY_DELAY_MS, HEADER_BUFFER_LEN, LOCATION_LEN,
    MAX_CONNECT_TRIES, MAX_DOWNLOAD_FILE_TRIES, MAX_MISSING_RANGE_RETRIES, MAX_RESOLVE_TRIES,
    MAXFILESIZE, RECONNECT_DELAY_MS, RECV_BUF_LEN, SIGN_FILE_SUFFIX, SIGNSIZE, VERSIONSTRINGLEN,
};
use crate::error::{ConnectError, DownloadError, HttpError};
use crate::flash::{FlashPort, ImageWriter, NullFlash};
use crate::http;
use crate::location::RepoLocation;
use crate::resolver::{self, ResolveError};
use crate::session::Session;

// ───────────────────────────────────────────────────────────────
// Download target
// ───────────────────────────────────────────────────────────────

/// Where body bytes go: the alternate flash slot, or caller RAM.
enum Target<'a, 'w, F: FlashPort> {
    Flash(&'a mut ImageWriter<'w, F>),
    Buffer(&'a mut [u8]),
}

impl<F: FlashPort> Target<'_, '_, F> {
    fn is_flash(&self) -> bool {
        matches!(self, Self::Flash(_))
    }

    fn consume(&mut self, offset: usize, data: &[u8]) -> Result<(), DownloadError> {
        match self {
            Self::Flash(writer) => {
                writer.write_chunk(offset as u32, data)?;
                Ok(())
            }
            Self::Buffer(buf) => {
                let end = offset + data.len();
                if end > buf.len() {
                    return Err(DownloadError::BufferOverflow);
                }
                buf[offset..end].copy_from_slice(data);
                Ok(())
            }
        }
    }
}

// ───────────────────────────────────────────────────────────────
// Downloader
// ───────────────────────────────────────────────────────────────

/// One repository, any number of sequential file fetches.
///
/// Owns the current (host, path) pair; every fetch re-derives it from the
/// configured repository and re-resolves redirects, since release assets
/// and their siblings routinely settle on different CDN hosts.
pub struct Downloader {
    repo: heapless::String<LOCATION_LEN>,
    loc: RepoLocation,
    port: u16,
    tls: bool,
}

impl Downloader {
    pub fn new(repo: &str, port: u16, tls: bool) -> Result<Self, HttpError> {
        let repo = heapless::String::try_from(repo).map_err(|()| HttpError::BadLocation)?;
        Ok(Self {
            repo,
            loc: RepoLocation::new(),
            port,
            tls,
        })
    }

    /// The settled location of the most recent fetch.
    pub fn location(&self) -> &RepoLocation {
        &self.loc
    }

    /// Download a whole image into the writer's slot. Returns the total
    /// image length reported by the server.
    pub fn get_file<F: FlashPort>(
        &mut self,
        file: &str,
        writer: &mut ImageWriter<'_, F>,
    ) -> Result<usize, DownloadError> {
        info!("download: file {} from {}", file, self.repo);
        self.fetch(file, Target::Flash(writer), None)
    }

    /// Resumable variant: starts at `*cursor` and writes the advanced
    /// cursor back on success *and* on a partial outcome, so the caller can
    /// persist it and continue after a reboot.
    pub fn get_file_part<F: FlashPort>(
        &mut self,
        file: &str,
        writer: &mut ImageWriter<'_, F>,
        cursor: &mut usize,
    ) -> Result<usize, DownloadError> {
        info!("download: file part {} from {}", file, self.repo);
        self.fetch(file, Target::Flash(writer), Some(cursor))
    }

    /// Fetch the plain-ASCII version sibling into RAM.
    pub fn get_version(
        &mut self,
        version_file: &str,
    ) -> Result<heapless::String<VERSIONSTRINGLEN>, DownloadError> {
        info!("download: version {} from {}", version_file, self.repo);
        let mut buf = [0u8; VERSIONSTRINGLEN];
        let target: Target<'_, '_, NullFlash> = Target::Buffer(&mut buf);
        let got = self.fetch(version_file, target, None)?;

        let text = core::str::from_utf8(&buf[..got.min(VERSIONSTRINGLEN)])
            .map_err(|_| DownloadError::Http(HttpError::MalformedResponse))?;
        heapless::String::try_from(text.trim_end())
            .map_err(|()| DownloadError::BufferOverflow)
    }

    /// Fetch `<file>.sig` into the signature buffer. Returns the number of
    /// signature bytes received (DER signatures are variable-length up to
    /// [`SIGNSIZE`]).
    pub fn get_signature(
        &mut self,
        file: &str,
        signature: &mut [u8; SIGNSIZE],
    ) -> Result<usize, DownloadError> {
        let mut name: heapless::String<80> = heapless::String::new();
        if name.push_str(file).is_err() || name.push_str(SIGN_FILE_SUFFIX).is_err() {
            return Err(DownloadError::Http(HttpError::BadLocation));
        }

        info!("download: signature {} from {}", name, self.repo);
        signature.fill(0);
        let target: Target<'_, '_, NullFlash> = Target::Buffer(signature.as_mut_slice());
        self.fetch(&name, target, None)
    }

    // ── Internals ─────────────────────────────────────────────

    /// Derive the request location from the repository and file name.
    fn base_location(&self, file: &str) -> Result<RepoLocation, DownloadError> {
        let mut loc = RepoLocation::new();
        loc.set_current(&self.repo)?;
        loc.append_file(file)?;
        Ok(loc)
    }

    /// Resolve redirects, retrying the whole chase a few times.
    fn resolve(&mut self, file: &str) -> Result<(), DownloadError> {
        let mut tries = 0;
        loop {
            let mut loc = self.base_location(file)?;
            match resolver::resolve_final_location(&mut loc, self.port, self.tls) {
                Ok(()) => {
                    self.loc = loc;
                    return Ok(());
                }
                Err(e) => {
                    tries += 1;
                    warn!("download: resolve attempt {tries} failed");
                    if tries >= MAX_RESOLVE_TRIES {
                        return Err(match e {
                            ResolveError::Connect(_) => DownloadError::FinalLocationUnreachable,
                            ResolveError::Http(h) => DownloadError::Http(h),
                        });
                    }
                    std::thread::sleep(Duration::from_millis(RECONNECT_DELAY_MS));
                }
            }
        }
    }

    /// Tear-down happened at the call site (the broken session was
    /// replaced); pause briefly, then bring up a fresh body connection.
    fn reconnect(&self) -> Result<Session, DownloadError> {
        std::thread::sleep(Duration::from_millis(RECONNECT_DELAY_MS));
        self.new_connection()
            .map_err(|_| DownloadError::FinalLocationUnreachable)
    }

    /// Open a body-phase connection to the settled host, with backoff.
    fn new_connection(&self) -> Result<Session, ConnectError> {
        let mut tries = 0;
        loop {
            match Session::connect(
                self.loc.host(),
                self.port,
                self.tls,
                Duration::from_secs(BODY_TIMEOUT_SECS),
            ) {
                Ok(s) => return Ok(s),
                Err(e) => {
                    tries += 1;
                    warn!("download: connect failed ({e}), try {tries}");
                    if tries >= MAX_CONNECT_TRIES {
                        return Err(e);
                    }
                    std::thread::sleep(Duration::from_millis(CONNECT_RETRY_DELAY_MS));
                }
            }
        }
    }

    /// The download loop proper.
    ///
    /// Hard failures return immediately (the resume cursor keeps its last
    /// committed value); success and the partial outcome write the cursor
    /// back first.
    fn fetch<F: FlashPort>(
        &mut self,
        file: &str,
        mut target: Target<'_, '_, F>,
        mut resume: Option<&mut usize>,
    ) -> Result<usize, DownloadError> {
        self.resolve(file)?;
        info!(
            "download: final {}:{}/{}",
            self.loc.host(),
            self.port,
            self.loc.path()
        );

        let mut cursor: usize = resume.as_deref().copied().unwrap_or(0);
        if cursor > 0 {
            info!("download: resuming at {cursor}");
        }

        let mut session = self
            .new_connection()
            .map_err(|_| DownloadError::FinalLocationUnreachable)?;
        let mut length: Option<usize> = None;
        let mut attempts: u32 = 0;
        let mut protocol_retries: u32 = 0;
        let mut scratch = [0u8; RECV_BUF_LEN];

        let result = loop {
            if let Some(total) = length {
                if cursor >= total {
                    break Ok(());
                }
            }

            let chunk_start = cursor;
            let request = http::build_range_request(&self.loc, cursor, cursor + CHUNK_SIZE - 1)
                .map_err(DownloadError::Http)?;
            if session.send(request.as_bytes()).is_err() {
                warn!("download: send failed, reconnecting");
                attempts += 1;
                if attempts >= MAX_DOWNLOAD_FILE_TRIES {
                    break Err(DownloadError::Partial);
                }
                match self.reconnect() {
                    Ok(s) => session = s,
                    Err(e) => break Err(e),
                }
                continue;
            }

            // Accumulate until the head parses; body bytes often ride in
            // the same read and are rebased below.
            let mut collected: heapless::Vec<u8, HEADER_BUFFER_LEN> = heapless::Vec::new();
            let head = loop {
                match http::parse_response_head(&collected) {
                    Ok(Some(head)) => break Some(head),
                    Ok(None) if collected.is_full() => break None,
                    Ok(None) => {}
                    Err(_) => break None,
                }
                match session.recv(&mut scratch) {
                    Ok(0) | Err(_) => break None,
                    Ok(n) => {
                        let room = collected.capacity() - collected.len();
                        let _ = collected.extend_from_slice(&scratch[..n.min(room)]);
                    }
                }
            };

            let Some(head) = head else {
                warn!("download: connection lost before response head");
                cursor = chunk_start;
                attempts += 1;
                if attempts >= MAX_DOWNLOAD_FILE_TRIES {
                    break Err(DownloadError::Partial);
                }
                match self.reconnect() {
                    Ok(s) => session = s,
                    Err(e) => break Err(e),
                }
                continue;
            };

            // ---- validate the head ----
            let mut fault: Option<HttpError> = None;
            if head.status != 200 && head.status != 206 {
                fault = Some(HttpError::UnexpectedStatus(head.status));
            }
            if fault.is_none() && head.content_length.is_none() {
                fault = Some(HttpError::MissingContentLength);
            }
            if fault.is_none() && length.is_none() {
                match head.content_range_total {
                    Some(total) => length = Some(total),
                    // RAM targets may trust Content-Length; a flash image
                    // without the authoritative total is a protocol fault.
                    None if !target.is_flash() => length = head.content_length,
                    None => fault = Some(HttpError::MissingContentRange),
                }
            }
            if let Some(fault) = fault {
                warn!("download: protocol fault: {fault}");
                if protocol_retries >= MAX_MISSING_RANGE_RETRIES {
                    break Err(DownloadError::Http(fault));
                }
                protocol_retries += 1;
                cursor = chunk_start;
                match self.reconnect() {
                    Ok(s) => session = s,
                    Err(e) => break Err(e),
                }
                continue;
            }

            let total = length.unwrap_or(0);
            if target.is_flash() && total > MAXFILESIZE {
                warn!("download: image too big ({total}/{MAXFILESIZE})");
                break Err(DownloadError::TooBig);
            }

            // ---- consume the body ----
            let clength = head.content_length.unwrap_or(0);
            let mut received = 0usize;

            let body = &collected[head.body_start.min(collected.len())..];
            if !body.is_empty() {
                let take = body.len().min(clength);
                target.consume(cursor, &body[..take])?;
                cursor += take;
                received += take;
                attempts = 0;
            }

            let mut lost = false;
            while received < clength {
                match session.recv(&mut scratch) {
                    Ok(0) | Err(_) => {
                        lost = true;
                        break;
                    }
                    Ok(n) => {
                        let take = n.min(clength - received);
                        target.consume(cursor, &scratch[..take])?;
                        cursor += take;
                        received += take;
                        attempts = 0;
                    }
                }
            }
            // An empty 206 makes no progress; treat it like a lost
            // connection so the attempt budget still bounds the loop.
            if lost || received == 0 {
                warn!("download: connection lost at {cursor}, rewinding to {chunk_start}");
                cursor = chunk_start;
                attempts += 1;
                if attempts >= MAX_DOWNLOAD_FILE_TRIES {
                    break Err(DownloadError::Partial);
                }
                match self.reconnect() {
                    Ok(s) => session = s,
                    Err(e) => break Err(e),
                }
                continue;
            }

            log::debug!("download: {cursor}/{total}");
        };

        if let Some(cursor_out) = resume.as_deref_mut() {
            *cursor_out = cursor;
        }
        match result {
            Ok(()) => Ok(length.unwrap_or(cursor)),
            Err(e) => Err(e),
        }
    }
}
