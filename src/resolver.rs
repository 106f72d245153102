//! Redirect resolution.
//!
//! Release repositories sit behind redirectors (CDN fronts, release asset
//! hosts), so the published URL is rarely the terminal one. Before any body
//! bytes move, the resolver chases 302s with tiny `Range: bytes=0-1` probes
//! until a 2xx settles the (host, path) pair. Every hop uses a fresh
//! connection and a fresh buffer with the short probe timeout.

use core::time::Duration;

use log::{info, warn};

use crate::config::{
    CONNECT_RETRY_DELAY_MS, HEADER_BUFFER_LEN, MAX_302_JUMPS, PROBE_TIMEOUT_SECS, RECV_BUF_LEN,
};
use crate::error::{ConnectError, HttpError};
use crate::http;
use crate::location::RepoLocation;
use crate::session::Session;

/// Why resolution failed: the network never answered, or it answered with
/// something unusable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolveError {
    Connect(ConnectError),
    Http(HttpError),
}

/// Chase redirects until `loc` names the terminal resource.
///
/// On success `loc` holds the settled pair; on a 302 chain longer than
/// [`MAX_302_JUMPS`] the chain is abandoned. Connect failures consume a hop
/// and back off before the next try.
pub fn resolve_final_location(
    loc: &mut RepoLocation,
    port: u16,
    tls: bool,
) -> Result<(), ResolveError> {
    let mut last_err: Option<ResolveError> = None;

    for _ in 0..MAX_302_JUMPS {
        info!("resolver: probing {}:{}/{}", loc.host(), port, loc.path());

        let mut session = match Session::connect(
            loc.host(),
            port,
            tls,
            Duration::from_secs(PROBE_TIMEOUT_SECS),
        ) {
            Ok(s) => s,
            Err(e) => {
                warn!("resolver: connect failed: {e}");
                last_err = Some(ResolveError::Connect(e));
                std::thread::sleep(Duration::from_millis(CONNECT_RETRY_DELAY_MS));
                continue;
            }
        };

        let request = http::build_range_request(loc, 0, 1).map_err(ResolveError::Http)?;
        if session.send(request.as_bytes()).is_err() {
            warn!("resolver: probe send failed");
            last_err = Some(ResolveError::Connect(ConnectError::Refused));
            continue;
        }

        let head = match read_probe_head(&mut session) {
            Ok(Some(head)) => head,
            Ok(None) => {
                // Nothing came back; treat like a dead connection and
                // spend another hop.
                warn!("resolver: empty probe response");
                last_err = Some(ResolveError::Http(HttpError::MalformedResponse));
                continue;
            }
            Err(e) => return Err(ResolveError::Http(e)),
        };

        match head.status {
            200 | 206 => {
                info!("resolver: settled at {}/{}", loc.host(), loc.path());
                return Ok(());
            }
            302 => {
                let url = head
                    .location
                    .ok_or(ResolveError::Http(HttpError::BadLocation))?;
                loc.set_from_redirect(&url).map_err(ResolveError::Http)?;
            }
            other => {
                return Err(ResolveError::Http(HttpError::UnexpectedStatus(other)));
            }
        }
    }

    Err(last_err.unwrap_or(ResolveError::Http(HttpError::TooManyRedirects)))
}

/// Accumulate the probe response until its head parses, the server closes,
/// the probe timeout fires, or the bounded buffer fills.
///
/// `Ok(None)` means the connection yielded nothing at all (the hop is
/// retried); a response that arrived but cannot be parsed is an error.
fn read_probe_head(session: &mut Session) -> Result<Option<http::ResponseHead>, HttpError> {
    let mut collected: heapless::Vec<u8, HEADER_BUFFER_LEN> = heapless::Vec::new();
    let mut scratch = [0u8; RECV_BUF_LEN];

    loop {
        if let Some(head) = http::parse_response_head(&collected)? {
            return Ok(Some(head));
        }
        if collected.is_full() {
            return Err(HttpError::HeaderOverflow);
        }

        let n = match session.recv(&mut scratch) {
            Ok(0) | Err(_) => break,
            Ok(n) => n,
        };
        let room = collected.capacity() - collected.len();
        let take = n.min(room);
        // Capacity was checked above; extend cannot fail for `take` bytes.
        let _ = collected.extend_from_slice(&scratch[..take]);
    }

    if collected.is_empty() {
        return Ok(None);
    }
    match http::parse_response_head(&collected)? {
        Some(head) => Ok(Some(head)),
        None => Err(HttpError::MalformedResponse),
    }
}
