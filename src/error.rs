//! Unified error types for the OTA installer.
//!
//! A single `Error` enum that every subsystem converts into, keeping the
//! update task's error handling uniform. All variants are `Copy` so they can
//! be passed through the update state machine without allocation. The
//! surrounding framework consumes numeric outcome codes via
//! [`Error::outcome_code`]: `0` success, `1` partial (resume later),
//! negative for hard failures.

use core::fmt;

// ---------------------------------------------------------------------------
// Top-level installer error
// ---------------------------------------------------------------------------

/// Every fallible operation in the installer funnels into this type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// Connection establishment failed.
    Connect(ConnectError),
    /// The server response violated the expected HTTP shape.
    Http(HttpError),
    /// A flash erase/write/read failed.
    Flash(FlashError),
    /// The download driver gave up or hit a capacity limit.
    Download(DownloadError),
    /// The downloaded image does not match its signature.
    Integrity,
    /// One-time initialisation failed (key decode, partition lookup).
    Init(&'static str),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connect(e) => write!(f, "connect: {e}"),
            Self::Http(e) => write!(f, "http: {e}"),
            Self::Flash(e) => write!(f, "flash: {e}"),
            Self::Download(e) => write!(f, "download: {e}"),
            Self::Integrity => write!(f, "image signature mismatch"),
            Self::Init(msg) => write!(f, "init: {msg}"),
        }
    }
}

impl Error {
    /// Numeric outcome for the surrounding framework.
    ///
    /// `1` means the download was interrupted but the resume cursor is
    /// valid; everything else is a hard failure with a distinct code.
    pub fn outcome_code(&self) -> i32 {
        match self {
            Self::Download(e) => e.code(),
            Self::Http(e) => e.code(),
            Self::Flash(e) => e.code(),
            Self::Connect(_) => -1,
            Self::Integrity => -11,
            Self::Init(_) => -13,
        }
    }
}

// ---------------------------------------------------------------------------
// Connection errors
// ---------------------------------------------------------------------------

/// Classified connect failures. Surfaced to callers as one small code; the
/// classification is for logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectError {
    /// Host name did not resolve.
    Dns,
    /// Socket could not be created.
    Socket,
    /// TCP connect failed or was refused.
    Refused,
    /// TLS session allocation failed.
    TlsNew,
    /// TLS session could not be attached to the socket.
    TlsAttach,
    /// TLS handshake failed.
    TlsHandshake,
}

impl fmt::Display for ConnectError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Dns => write!(f, "DNS lookup failed"),
            Self::Socket => write!(f, "socket creation failed"),
            Self::Refused => write!(f, "TCP connect failed"),
            Self::TlsNew => write!(f, "TLS session allocation failed"),
            Self::TlsAttach => write!(f, "TLS attach failed"),
            Self::TlsHandshake => write!(f, "TLS handshake failed"),
        }
    }
}

impl From<ConnectError> for Error {
    fn from(e: ConnectError) -> Self {
        Self::Connect(e)
    }
}

// ---------------------------------------------------------------------------
// Socket transfer errors
// ---------------------------------------------------------------------------

/// Errors from established-session I/O. An orderly close is not an error;
/// `recv` reports it as `Ok(0)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoError {
    /// The configured receive timeout elapsed.
    TimedOut,
    /// Send or receive failed at the socket/TLS layer.
    Io,
}

impl fmt::Display for IoError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TimedOut => write!(f, "receive timeout"),
            Self::Io => write!(f, "socket I/O error"),
        }
    }
}

// ---------------------------------------------------------------------------
// HTTP protocol errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpError {
    /// No parseable status line in the response.
    MalformedResponse,
    /// Response carried no `Content-Length`.
    MissingContentLength,
    /// Flash-target response carried no `Content-Range`.
    MissingContentRange,
    /// Status other than 200/206/302.
    UnexpectedStatus(u16),
    /// A 302 `Location:` value that is not `scheme://host/...` or
    /// `//host/...`, or one that overflows the host/path buffers.
    BadLocation,
    /// Headers exceeded the accumulation cap.
    HeaderOverflow,
    /// The redirect chain exceeded the hop budget.
    TooManyRedirects,
}

impl HttpError {
    pub fn code(&self) -> i32 {
        match self {
            Self::BadLocation => -2,
            Self::MalformedResponse | Self::HeaderOverflow => -3,
            Self::UnexpectedStatus(_) => -4,
            Self::MissingContentLength | Self::MissingContentRange => -12,
            Self::TooManyRedirects => -15,
        }
    }
}

impl fmt::Display for HttpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MalformedResponse => write!(f, "malformed response"),
            Self::MissingContentLength => write!(f, "missing Content-Length"),
            Self::MissingContentRange => write!(f, "missing Content-Range"),
            Self::UnexpectedStatus(s) => write!(f, "unexpected status {s}"),
            Self::BadLocation => write!(f, "bad redirect location"),
            Self::HeaderOverflow => write!(f, "header buffer overflow"),
            Self::TooManyRedirects => write!(f, "redirect chain too long"),
        }
    }
}

impl From<HttpError> for Error {
    fn from(e: HttpError) -> Self {
        Self::Http(e)
    }
}

// ---------------------------------------------------------------------------
// Flash errors
// ---------------------------------------------------------------------------

/// Non-retryable at this layer. Any of these leaves byte 0 of the slot
/// unwritten so the device stays bootable on the old image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlashError {
    /// Sector erase failed.
    Erase,
    /// Write failed past the first sector.
    Write,
    /// Write failed within the first sector.
    WriteFirstSector,
    /// Read-back failed during verification.
    Read,
    /// A sector number that names no OTA slot.
    BadSlot,
}

impl FlashError {
    pub fn code(&self) -> i32 {
        match self {
            Self::BadSlot => -5,
            Self::Erase => -6,
            Self::Write => -7,
            Self::WriteFirstSector => -8,
            Self::Read => -14,
        }
    }
}

impl fmt::Display for FlashError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Erase => write!(f, "sector erase failed"),
            Self::Write => write!(f, "flash write failed"),
            Self::WriteFirstSector => write!(f, "flash write failed in first sector"),
            Self::Read => write!(f, "flash read failed"),
            Self::BadSlot => write!(f, "sector is not an OTA slot"),
        }
    }
}

impl From<FlashError> for Error {
    fn from(e: FlashError) -> Self {
        Self::Flash(e)
    }
}

// ---------------------------------------------------------------------------
// Download errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadError {
    /// Redirect resolution failed after all attempts.
    FinalLocationUnreachable,
    /// Reconnect attempts exhausted; the cursor is valid for resumption.
    Partial,
    /// Reported image length exceeds the slot capacity.
    TooBig,
    /// A RAM-target file is larger than the caller's buffer.
    BufferOverflow,
    /// Flash fault while committing body bytes.
    Flash(FlashError),
    /// Protocol fault that survived its fresh-connection retry.
    Http(HttpError),
}

impl DownloadError {
    pub fn code(&self) -> i32 {
        match self {
            Self::FinalLocationUnreachable => -1,
            Self::Partial => 1,
            Self::TooBig => -10,
            Self::BufferOverflow => -9,
            Self::Flash(e) => e.code(),
            Self::Http(e) => e.code(),
        }
    }
}

impl fmt::Display for DownloadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::FinalLocationUnreachable => write!(f, "final location unreachable"),
            Self::Partial => write!(f, "partial download, resume later"),
            Self::TooBig => write!(f, "image exceeds slot capacity"),
            Self::BufferOverflow => write!(f, "file exceeds caller buffer"),
            Self::Flash(e) => write!(f, "{e}"),
            Self::Http(e) => write!(f, "{e}"),
        }
    }
}

impl From<FlashError> for DownloadError {
    fn from(e: FlashError) -> Self {
        Self::Flash(e)
    }
}

impl From<HttpError> for DownloadError {
    fn from(e: HttpError) -> Self {
        Self::Http(e)
    }
}

impl From<DownloadError> for Error {
    fn from(e: DownloadError) -> Self {
        Self::Download(e)
    }
}

// ---------------------------------------------------------------------------
// Convenience Result alias
// ---------------------------------------------------------------------------

/// Installer-wide `Result` alias.
pub type Result<T> = core::result::Result<T, Error>;
