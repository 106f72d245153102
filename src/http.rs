//! HTTP/1.1 range request formatting and tolerant response parsing.
//!
//! The wire format is plain HTTP; requests are pipelined as a single send.
//! Response parsing is streaming: callers accumulate received bytes into a
//! bounded buffer and poll [`parse_response_head`] until the end-of-headers
//! marker arrives. Header and body may share one read — the parsed head
//! reports where the body starts so the caller can rebase it.
//!
//! Header scanning is case-insensitive throughout; real repositories sit
//! behind CDNs that lowercase everything.

use core::fmt::Write as _;

use crate::config::{CRLFCRLF, RANGE, REQUEST_BUF_LEN, REQUESTHEAD, REQUESTTAIL};
use crate::error::HttpError;
use crate::location::RepoLocation;

/// Capacity for a captured `Location:` value (host + path + scheme slack).
pub const REDIRECT_URL_LEN: usize = 336;

/// Parsed response head.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseHead {
    /// Status code from the first line.
    pub status: u16,
    /// `Content-Length` value, if present.
    pub content_length: Option<usize>,
    /// The `total` after `/` in `Content-Range: bytes a-b/total`.
    pub content_range_total: Option<usize>,
    /// `Location:` value on a 302, CR-stripped, one leading space skipped.
    pub location: Option<heapless::String<REDIRECT_URL_LEN>>,
    /// Offset of the first body byte within the scanned buffer.
    pub body_start: usize,
}

/// Format a `GET` with a closed byte range into a fixed request buffer.
pub fn build_range_request(
    loc: &RepoLocation,
    first: usize,
    last: usize,
) -> Result<heapless::String<REQUEST_BUF_LEN>, HttpError> {
    let mut req = heapless::String::new();
    write!(
        req,
        "{REQUESTHEAD}{}{REQUESTTAIL}{}{RANGE}{first}-{last}{CRLFCRLF}",
        loc.path(),
        loc.host(),
    )
    .map_err(|_| HttpError::BadLocation)?;
    Ok(req)
}

/// Case-insensitive substring search over raw bytes.
///
/// Returns the byte offset of the first match of `needle` in `haystack`.
pub fn find_ignore_ascii_case(haystack: &[u8], needle: &str) -> Option<usize> {
    let needle = needle.as_bytes();
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack
        .windows(needle.len())
        .position(|w| w.eq_ignore_ascii_case(needle))
}

/// Try to parse a response head out of the accumulated bytes.
///
/// Returns `Ok(None)` while the CRLFCRLF terminator has not arrived yet.
/// Once it has, the head is parsed in place; a response with no
/// recognisable status line is [`HttpError::MalformedResponse`].
pub fn parse_response_head(buf: &[u8]) -> Result<Option<ResponseHead>, HttpError> {
    let Some(end) = find_subslice(buf, CRLFCRLF.as_bytes()) else {
        return Ok(None);
    };
    let head = &buf[..end];
    let body_start = end + CRLFCRLF.len();

    let status_at =
        find_ignore_ascii_case(head, "http/1.1 ").ok_or(HttpError::MalformedResponse)?;
    let status = parse_digits(&head[status_at + 9..]).ok_or(HttpError::MalformedResponse)?;
    let status = u16::try_from(status).map_err(|_| HttpError::MalformedResponse)?;

    let content_length = header_value(head, "\ncontent-length:").and_then(parse_digits);

    // The authoritative total is after the '/' of "bytes a-b/total".
    let content_range_total = header_value(head, "\ncontent-range:")
        .and_then(|line| {
            let slash = line.iter().position(|&b| b == b'/')?;
            Some(&line[slash + 1..])
        })
        .and_then(parse_digits);

    let location = match header_value(head, "\nlocation:") {
        Some(line) => {
            let line = match line {
                [b' ', rest @ ..] => rest,
                other => other,
            };
            let s = core::str::from_utf8(line).map_err(|_| HttpError::BadLocation)?;
            let mut url = heapless::String::new();
            url.push_str(s.trim_end())
                .map_err(|()| HttpError::BadLocation)?;
            Some(url)
        }
        None => None,
    };

    Ok(Some(ResponseHead {
        status,
        content_length,
        content_range_total,
        location,
        body_start,
    }))
}

/// Value bytes of the header matched case-insensitively by `pattern`
/// (which includes the leading `\n` and trailing `:`), CR-stripped, with
/// surrounding spaces from the colon side left intact except one skip.
fn header_value<'a>(head: &'a [u8], pattern: &str) -> Option<&'a [u8]> {
    let at = find_ignore_ascii_case(head, pattern)?;
    let line = &head[at + pattern.len()..];
    let end = line
        .iter()
        .position(|&b| b == b'\r' || b == b'\n')
        .unwrap_or(line.len());
    Some(&line[..end])
}

/// Decimal parse that skips leading spaces and stops at the first
/// non-digit. `None` when no digit was seen.
fn parse_digits(bytes: &[u8]) -> Option<usize> {
    let mut it = bytes.iter().copied().skip_while(|&b| b == b' ').peekable();
    it.peek().filter(|b| b.is_ascii_digit())?;

    let mut value: usize = 0;
    for b in it {
        if !b.is_ascii_digit() {
            break;
        }
        value = value.checked_mul(10)?.checked_add(usize::from(b - b'0'))?;
    }
    Some(value)
}

fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if haystack.len() < needle.len() {
        return None;
    }
    haystack.windows(needle.len()).position(|w| w == needle)
}
