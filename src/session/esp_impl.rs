//! ESP-IDF platform backend for [`Session`](super::Session).
//!
//! Compiled only for `target_os = "espidf"`: lwIP BSD sockets plus an
//! mbedTLS TLS 1.2 client session with SNI. Peer verification is disabled;
//! authenticity comes from the detached image signature.
//!
//! All items are `pub(super)` so the platform split stays private to the
//! session module.

use core::ffi::{c_int, c_void};
use std::ffi::CString;

use core::time::Duration;
use log::warn;

use esp_idf_svc::sys::{
    addrinfo, lwip_close, lwip_connect, lwip_freeaddrinfo, lwip_getaddrinfo, lwip_recv, lwip_send,
    lwip_setsockopt, lwip_socket, mbedtls_ctr_drbg_context, mbedtls_ctr_drbg_free,
    mbedtls_ctr_drbg_init, mbedtls_ctr_drbg_random, mbedtls_ctr_drbg_seed,
    mbedtls_entropy_context, mbedtls_entropy_free, mbedtls_entropy_func, mbedtls_entropy_init,
    mbedtls_ssl_close_notify, mbedtls_ssl_conf_authmode, mbedtls_ssl_conf_max_version,
    mbedtls_ssl_conf_min_version, mbedtls_ssl_conf_rng, mbedtls_ssl_config,
    mbedtls_ssl_config_defaults, mbedtls_ssl_config_free, mbedtls_ssl_config_init,
    mbedtls_ssl_context, mbedtls_ssl_free, mbedtls_ssl_handshake, mbedtls_ssl_init,
    mbedtls_ssl_read, mbedtls_ssl_set_bio, mbedtls_ssl_set_hostname, mbedtls_ssl_setup,
    mbedtls_ssl_write, timeval, AF_UNSPEC, EAGAIN, EWOULDBLOCK,
    MBEDTLS_ERR_SSL_PEER_CLOSE_NOTIFY, MBEDTLS_SSL_IS_CLIENT, MBEDTLS_SSL_MAJOR_VERSION_3,
    MBEDTLS_SSL_MINOR_VERSION_3, MBEDTLS_SSL_PRESET_DEFAULT, MBEDTLS_SSL_TRANSPORT_STREAM,
    MBEDTLS_SSL_VERIFY_NONE, SOCK_STREAM, SOL_SOCKET, SO_RCVTIMEO,
};

use crate::error::{ConnectError, IoError};

/// The underlying mbedTLS stack is sensitive to back-to-back I/O around
/// the handshake; give it a moment to settle.
const TLS_SETTLE_DELAY_MS: u64 = 50;

// ── BIO callbacks ─────────────────────────────────────────────────────────────

/// mbedTLS send BIO callback — writes `len` bytes to the socket.
///
/// # Safety
///
/// `ctx` must be a raw file descriptor cast to `*mut c_void`, valid for the
/// lifetime of the TLS session (guaranteed by `EspSession::fd`).
unsafe extern "C" fn bio_send(ctx: *mut c_void, buf: *const u8, len: usize) -> c_int {
    let fd = ctx as c_int;
    unsafe { lwip_send(fd, buf as *const c_void, len, 0) as c_int }
}

/// mbedTLS recv BIO callback.
///
/// # Safety
///
/// Same invariants as `bio_send`. The socket timeout propagates as a
/// negative return, which mbedTLS reports from `mbedtls_ssl_read`.
unsafe extern "C" fn bio_recv(ctx: *mut c_void, buf: *mut u8, len: usize) -> c_int {
    let fd = ctx as c_int;
    unsafe { lwip_recv(fd, buf as *mut c_void, len, 0) as c_int }
}

// ── TLS state ─────────────────────────────────────────────────────────────────

/// TLS client state, heap-boxed to limit stack pressure.
struct TlsState {
    ssl: Box<mbedtls_ssl_context>,
    conf: Box<mbedtls_ssl_config>,
    entropy: Box<mbedtls_entropy_context>,
    drbg: Box<mbedtls_ctr_drbg_context>,
}

impl Drop for TlsState {
    fn drop(&mut self) {
        // SAFETY: every field was initialised by its mbedtls_*_init and is
        // freed exactly once here, TLS session first.
        unsafe {
            mbedtls_ssl_close_notify(self.ssl.as_mut());
            mbedtls_ssl_free(self.ssl.as_mut());
            mbedtls_ssl_config_free(self.conf.as_mut());
            mbedtls_ctr_drbg_free(self.drbg.as_mut());
            mbedtls_entropy_free(self.entropy.as_mut());
        }
    }
}

// ── Session ───────────────────────────────────────────────────────────────────

/// One lwIP socket, optionally wrapped in TLS.
///
/// `Drop` is safe in every partial state: a socket with no TLS, TLS created
/// but never attached, or a fully established session.
pub(super) struct EspSession {
    fd: c_int,
    tls: Option<TlsState>,
}

// SAFETY: the session is owned and driven by the single update task.
unsafe impl Send for EspSession {}

impl Drop for EspSession {
    fn drop(&mut self) {
        // TLS teardown (if any) must precede the socket close.
        self.tls.take();
        if self.fd >= 0 {
            // SAFETY: fd was returned by lwip_socket and is closed once.
            unsafe {
                lwip_close(self.fd);
            }
        }
    }
}

impl EspSession {
    pub(super) fn connect(
        host: &str,
        port: u16,
        tls: bool,
        read_timeout: Duration,
    ) -> Result<Self, ConnectError> {
        let fd = open_socket(host, port)?;
        let mut session = Self { fd, tls: None };
        session.set_read_timeout(read_timeout).map_err(|_| {
            warn!("session: SO_RCVTIMEO failed");
            ConnectError::Socket
        })?;

        if tls {
            session.tls = Some(handshake(fd, host)?);
        }
        Ok(session)
    }

    pub(super) fn set_read_timeout(&mut self, timeout: Duration) -> Result<(), IoError> {
        let tv = timeval {
            tv_sec: timeout.as_secs() as _,
            tv_usec: timeout.subsec_micros() as _,
        };
        // SAFETY: fd is open; tv outlives the call.
        let ret = unsafe {
            lwip_setsockopt(
                self.fd,
                SOL_SOCKET as c_int,
                SO_RCVTIMEO as c_int,
                (&raw const tv).cast::<c_void>(),
                core::mem::size_of::<timeval>() as u32,
            )
        };
        if ret == 0 { Ok(()) } else { Err(IoError::Io) }
    }

    pub(super) fn send(&mut self, data: &[u8]) -> Result<(), IoError> {
        let mut sent = 0;
        while sent < data.len() {
            let rest = &data[sent..];
            let ret = match self.tls.as_mut() {
                // SAFETY: ssl is established; rest is a live borrow.
                Some(t) => unsafe {
                    mbedtls_ssl_write(t.ssl.as_mut(), rest.as_ptr(), rest.len())
                },
                // SAFETY: fd is open.
                None => unsafe {
                    lwip_send(self.fd, rest.as_ptr().cast::<c_void>(), rest.len(), 0) as c_int
                },
            };
            if ret <= 0 {
                return Err(IoError::Io);
            }
            sent += ret as usize;
        }
        Ok(())
    }

    pub(super) fn recv(&mut self, buf: &mut [u8]) -> Result<usize, IoError> {
        let ret = match self.tls.as_mut() {
            // SAFETY: ssl is established; buf is a live mutable borrow.
            Some(t) => unsafe { mbedtls_ssl_read(t.ssl.as_mut(), buf.as_mut_ptr(), buf.len()) },
            // SAFETY: fd is open.
            None => unsafe {
                lwip_recv(self.fd, buf.as_mut_ptr().cast::<c_void>(), buf.len(), 0) as c_int
            },
        };

        if ret > 0 {
            return Ok(ret as usize);
        }
        if ret == 0 || ret == MBEDTLS_ERR_SSL_PEER_CLOSE_NOTIFY {
            return Ok(0);
        }
        // SAFETY: __errno() points at the current task's errno.
        let err = unsafe { *esp_idf_svc::sys::__errno() };
        if err == EAGAIN as i32 || err == EWOULDBLOCK as i32 {
            Err(IoError::TimedOut)
        } else {
            Err(IoError::Io)
        }
    }
}

// ── Construction helpers ──────────────────────────────────────────────────────

fn open_socket(host: &str, port: u16) -> Result<c_int, ConnectError> {
    let c_host = CString::new(host).map_err(|_| ConnectError::Dns)?;
    let c_port = CString::new(port.to_string()).map_err(|_| ConnectError::Dns)?;

    let hints = addrinfo {
        ai_family: AF_UNSPEC as c_int,
        ai_socktype: SOCK_STREAM as c_int,
        ..unsafe { core::mem::zeroed() }
    };
    let mut res: *mut addrinfo = core::ptr::null_mut();

    // SAFETY: c strings are NUL-terminated; res is freed on every path.
    let ret = unsafe { lwip_getaddrinfo(c_host.as_ptr(), c_port.as_ptr(), &hints, &mut res) };
    if ret != 0 || res.is_null() {
        return Err(ConnectError::Dns);
    }

    // SAFETY: res is a valid list head from lwip_getaddrinfo until freed.
    let (family, socktype, addr, addrlen) = unsafe {
        (
            (*res).ai_family,
            (*res).ai_socktype,
            (*res).ai_addr,
            (*res).ai_addrlen,
        )
    };

    // SAFETY: plain socket syscalls on values from the addrinfo above.
    let fd = unsafe { lwip_socket(family, socktype, 0) };
    if fd < 0 {
        unsafe { lwip_freeaddrinfo(res) };
        return Err(ConnectError::Socket);
    }

    // SAFETY: fd is open, addr/addrlen come from the resolved list.
    let ret = unsafe { lwip_connect(fd, addr, addrlen) };
    unsafe { lwip_freeaddrinfo(res) };
    if ret != 0 {
        // SAFETY: fd is open and closed exactly once on this failure path.
        unsafe { lwip_close(fd) };
        return Err(ConnectError::Refused);
    }
    Ok(fd)
}

fn handshake(fd: c_int, host: &str) -> Result<TlsState, ConnectError> {
    let mut state = TlsState {
        ssl: Box::new(unsafe { core::mem::zeroed() }),
        conf: Box::new(unsafe { core::mem::zeroed() }),
        entropy: Box::new(unsafe { core::mem::zeroed() }),
        drbg: Box::new(unsafe { core::mem::zeroed() }),
    };

    // SAFETY: zeroed contexts are exactly what the mbedtls init/setup
    // sequence expects; state owns them for the whole session.
    unsafe {
        mbedtls_ssl_init(state.ssl.as_mut());
        mbedtls_ssl_config_init(state.conf.as_mut());
        mbedtls_entropy_init(state.entropy.as_mut());
        mbedtls_ctr_drbg_init(state.drbg.as_mut());

        if mbedtls_ctr_drbg_seed(
            state.drbg.as_mut(),
            Some(mbedtls_entropy_func),
            (state.entropy.as_mut() as *mut mbedtls_entropy_context).cast::<c_void>(),
            core::ptr::null(),
            0,
        ) != 0
        {
            return Err(ConnectError::TlsNew);
        }

        if mbedtls_ssl_config_defaults(
            state.conf.as_mut(),
            MBEDTLS_SSL_IS_CLIENT as c_int,
            MBEDTLS_SSL_TRANSPORT_STREAM as c_int,
            MBEDTLS_SSL_PRESET_DEFAULT as c_int,
        ) != 0
        {
            return Err(ConnectError::TlsNew);
        }

        // The preset negotiates TLS 1.3 on this build; this session
        // speaks 1.2 only. Pin both ends of the version range.
        mbedtls_ssl_conf_min_version(
            state.conf.as_mut(),
            MBEDTLS_SSL_MAJOR_VERSION_3 as c_int,
            MBEDTLS_SSL_MINOR_VERSION_3 as c_int,
        );
        mbedtls_ssl_conf_max_version(
            state.conf.as_mut(),
            MBEDTLS_SSL_MAJOR_VERSION_3 as c_int,
            MBEDTLS_SSL_MINOR_VERSION_3 as c_int,
        );

        // Peer verification stays off; the image signature is the trust
        // anchor.
        mbedtls_ssl_conf_authmode(state.conf.as_mut(), MBEDTLS_SSL_VERIFY_NONE as c_int);
        mbedtls_ssl_conf_rng(
            state.conf.as_mut(),
            Some(mbedtls_ctr_drbg_random),
            (state.drbg.as_mut() as *mut mbedtls_ctr_drbg_context).cast::<c_void>(),
        );

        if mbedtls_ssl_setup(state.ssl.as_mut(), state.conf.as_ref()) != 0 {
            return Err(ConnectError::TlsAttach);
        }

        let c_host = CString::new(host).map_err(|_| ConnectError::TlsAttach)?;
        if mbedtls_ssl_set_hostname(state.ssl.as_mut(), c_host.as_ptr()) != 0 {
            return Err(ConnectError::TlsAttach);
        }

        mbedtls_ssl_set_bio(
            state.ssl.as_mut(),
            fd as *mut c_void,
            Some(bio_send),
            Some(bio_recv),
            None,
        );

        std::thread::sleep(Duration::from_millis(TLS_SETTLE_DELAY_MS));
        let ret = mbedtls_ssl_handshake(state.ssl.as_mut());
        std::thread::sleep(Duration::from_millis(TLS_SETTLE_DELAY_MS));
        if ret != 0 {
            warn!("session: TLS handshake failed ({ret})");
            return Err(ConnectError::TlsHandshake);
        }
    }

    Ok(state)
}
