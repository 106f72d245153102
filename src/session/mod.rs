//! Blocking client session — TCP with optional TLS.
//!
//! ## cfg gating
//!
//! - **`target_os = "espidf"`**: lwIP sockets + mbedTLS TLS 1.2 client with
//!   SNI, peer verification off. Trust is end-to-end via the image
//!   signature, not the channel.
//! - **all other targets**: `std::net` in plaintext for host-side testing;
//!   the TLS flag is accepted and ignored.
//!
//! A session blocks on `recv` up to the configured timeout — that is the
//! update task's natural yield point. Teardown is `Drop`-driven and safe in
//! every partially-constructed state (socket only, TLS created but not
//! attached, fully open).

use core::time::Duration;

use crate::error::{ConnectError, IoError};

#[cfg(target_os = "espidf")]
mod esp_impl;

#[cfg(not(target_os = "espidf"))]
use std::io::{Read, Write};

/// One established connection to the repository server.
#[derive(Debug)]
pub struct Session {
    #[cfg(target_os = "espidf")]
    inner: esp_impl::EspSession,

    #[cfg(not(target_os = "espidf"))]
    stream: std::net::TcpStream,
}

impl Session {
    /// Resolve `host`, open a TCP connection and, when `tls` is set,
    /// complete a TLS 1.2 client handshake with SNI set to `host`.
    ///
    /// The receive timeout is applied before the first byte is read; use
    /// [`Session::set_read_timeout`] to widen it for the body phase.
    #[cfg(target_os = "espidf")]
    pub fn connect(
        host: &str,
        port: u16,
        tls: bool,
        read_timeout: Duration,
    ) -> Result<Self, ConnectError> {
        Ok(Self {
            inner: esp_impl::EspSession::connect(host, port, tls, read_timeout)?,
        })
    }

    #[cfg(not(target_os = "espidf"))]
    pub fn connect(
        host: &str,
        port: u16,
        tls: bool,
        read_timeout: Duration,
    ) -> Result<Self, ConnectError> {
        use std::net::{TcpStream, ToSocketAddrs};

        let mut addrs = (host, port)
            .to_socket_addrs()
            .map_err(|_| ConnectError::Dns)?;
        let addr = addrs.next().ok_or(ConnectError::Dns)?;

        let stream = TcpStream::connect(addr).map_err(|_| ConnectError::Refused)?;
        stream
            .set_read_timeout(Some(read_timeout))
            .map_err(|_| ConnectError::Socket)?;

        if tls {
            log::debug!("session(sim): TLS requested, transporting in plaintext");
        }

        Ok(Self { stream })
    }

    /// Widen or narrow the receive timeout on an open session.
    #[cfg(target_os = "espidf")]
    pub fn set_read_timeout(&mut self, timeout: Duration) -> Result<(), IoError> {
        self.inner.set_read_timeout(timeout)
    }

    #[cfg(not(target_os = "espidf"))]
    pub fn set_read_timeout(&mut self, timeout: Duration) -> Result<(), IoError> {
        self.stream
            .set_read_timeout(Some(timeout))
            .map_err(|_| IoError::Io)
    }

    /// Write the whole buffer or fail.
    #[cfg(target_os = "espidf")]
    pub fn send(&mut self, data: &[u8]) -> Result<(), IoError> {
        self.inner.send(data)
    }

    #[cfg(not(target_os = "espidf"))]
    pub fn send(&mut self, data: &[u8]) -> Result<(), IoError> {
        self.stream.write_all(data).map_err(|_| IoError::Io)
    }

    /// Read up to `buf.len()` bytes. Short reads are normal; `Ok(0)` is an
    /// orderly close.
    #[cfg(target_os = "espidf")]
    pub fn recv(&mut self, buf: &mut [u8]) -> Result<usize, IoError> {
        self.inner.recv(buf)
    }

    #[cfg(not(target_os = "espidf"))]
    pub fn recv(&mut self, buf: &mut [u8]) -> Result<usize, IoError> {
        match self.stream.read(buf) {
            Ok(n) => Ok(n),
            Err(ref e)
                if e.kind() == std::io::ErrorKind::WouldBlock
                    || e.kind() == std::io::ErrorKind::TimedOut =>
            {
                Err(IoError::TimedOut)
            }
            Err(_) => Err(IoError::Io),
        }
    }
}
