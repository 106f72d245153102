//! Mock firmware repository for integration tests.
//!
//! A real TCP server on localhost speaking just enough HTTP/1.1: range
//! requests with `Content-Range`, 302 redirects, keep-alive across
//! sequential ranges, and fault injection (dropped connections, missing
//! headers, lying totals) so tests can drive every retry path without
//! touching the network.

use std::collections::HashMap;
use std::io::{Read, Write};
use std::net::{Shutdown, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

/// Close the connection for requests starting at `offset`.
#[derive(Debug, Clone)]
pub struct DropRule {
    /// Range start this rule fires on.
    pub offset: usize,
    /// Body bytes to send before closing; 0 closes before any response.
    pub send_body_bytes: usize,
    /// Fire on every matching request, or only the first.
    pub always: bool,
    fired: bool,
}

impl DropRule {
    pub fn once(offset: usize, send_body_bytes: usize) -> Self {
        Self {
            offset,
            send_body_bytes,
            always: false,
            fired: false,
        }
    }

    pub fn always(offset: usize, send_body_bytes: usize) -> Self {
        Self {
            offset,
            send_body_bytes,
            always: true,
            fired: false,
        }
    }
}

#[derive(Default)]
struct RepoState {
    files: HashMap<String, Vec<u8>>,
    redirects: HashMap<String, String>,
    request_counts: HashMap<String, usize>,
    lowercase_headers: bool,
    omit_content_range: bool,
    total_override: Option<usize>,
    drop_rule: Option<DropRule>,
}

pub struct MockRepo {
    port: u16,
    state: Arc<Mutex<RepoState>>,
    shutdown: Arc<AtomicBool>,
    acceptor: Option<JoinHandle<()>>,
}

impl MockRepo {
    pub fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind mock repo");
        let port = listener.local_addr().expect("local addr").port();
        let state = Arc::new(Mutex::new(RepoState::default()));
        let shutdown = Arc::new(AtomicBool::new(false));

        let accept_state = Arc::clone(&state);
        let accept_shutdown = Arc::clone(&shutdown);
        let acceptor = std::thread::spawn(move || {
            for conn in listener.incoming() {
                if accept_shutdown.load(Ordering::Relaxed) {
                    break;
                }
                let Ok(sock) = conn else { break };
                let state = Arc::clone(&accept_state);
                std::thread::spawn(move || handle_connection(sock, &state));
            }
        });

        Self {
            port,
            state,
            shutdown,
            acceptor: Some(acceptor),
        }
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// The repository string for this server with the given path prefix.
    pub fn repo(&self, prefix: &str) -> String {
        if prefix.is_empty() {
            "127.0.0.1".to_string()
        } else {
            format!("127.0.0.1/{prefix}")
        }
    }

    pub fn add_file(&self, path: &str, data: Vec<u8>) {
        self.state
            .lock()
            .unwrap()
            .files
            .insert(path.to_string(), data);
    }

    /// 302 the given path to a `Location:` value.
    pub fn add_redirect(&self, path: &str, location: &str) {
        self.state
            .lock()
            .unwrap()
            .redirects
            .insert(path.to_string(), location.to_string());
    }

    pub fn set_lowercase_headers(&self, on: bool) {
        self.state.lock().unwrap().lowercase_headers = on;
    }

    pub fn set_omit_content_range(&self, on: bool) {
        self.state.lock().unwrap().omit_content_range = on;
    }

    /// Lie about the `/total` in `Content-Range`.
    pub fn set_total_override(&self, total: Option<usize>) {
        self.state.lock().unwrap().total_override = total;
    }

    pub fn set_drop_rule(&self, rule: Option<DropRule>) {
        self.state.lock().unwrap().drop_rule = rule;
    }

    /// How many requests have named this path.
    pub fn requests_for(&self, path: &str) -> usize {
        self.state
            .lock()
            .unwrap()
            .request_counts
            .get(path)
            .copied()
            .unwrap_or(0)
    }
}

impl Drop for MockRepo {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::Relaxed);
        // Unblock the acceptor.
        let _ = TcpStream::connect(("127.0.0.1", self.port));
        if let Some(handle) = self.acceptor.take() {
            let _ = handle.join();
        }
    }
}

// ── Connection handling ───────────────────────────────────────

fn handle_connection(mut sock: TcpStream, state: &Mutex<RepoState>) {
    loop {
        let Some(request) = read_request(&mut sock) else {
            return;
        };
        let Some((path, range)) = parse_request(&request) else {
            return;
        };

        let mut st = state.lock().unwrap();
        *st.request_counts.entry(path.clone()).or_default() += 1;

        if let Some(location) = st.redirects.get(&path).cloned() {
            let name = if st.lowercase_headers {
                "location"
            } else {
                "Location"
            };
            drop(st);
            let _ = write!(
                sock,
                "HTTP/1.1 302 Found\r\n{name}: {location}\r\nContent-Length: 0\r\n\r\n"
            );
            // Redirects end the connection; every hop reconnects.
            return;
        }

        let Some(file) = st.files.get(&path).cloned() else {
            drop(st);
            let _ = write!(sock, "HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\n\r\n");
            continue;
        };

        let (start, end) = range.unwrap_or((0, file.len().saturating_sub(1)));
        let end = end.min(file.len().saturating_sub(1));
        let body: &[u8] = if start < file.len() {
            &file[start..=end]
        } else {
            &[]
        };
        let total = st.total_override.unwrap_or(file.len());

        let mut send_limit = body.len();
        let mut close_after = false;
        if let Some(rule) = st.drop_rule.as_mut() {
            if rule.offset == start && (rule.always || !rule.fired) {
                rule.fired = true;
                if rule.send_body_bytes == 0 {
                    // Vanish without a response.
                    let _ = sock.shutdown(Shutdown::Both);
                    return;
                }
                send_limit = rule.send_body_bytes.min(body.len());
                close_after = true;
            }
        }

        let lowercase = st.lowercase_headers;
        let omit_range = st.omit_content_range;
        drop(st);

        let status = if range.is_some() {
            "206 Partial Content"
        } else {
            "200 OK"
        };
        let (cl, cr) = if lowercase {
            ("content-length", "content-range")
        } else {
            ("Content-Length", "Content-Range")
        };

        let mut head = format!("HTTP/1.1 {status}\r\n{cl}: {}\r\n", body.len());
        if !omit_range && range.is_some() {
            head.push_str(&format!("{cr}: bytes {start}-{end}/{total}\r\n"));
        }
        head.push_str("\r\n");

        if sock.write_all(head.as_bytes()).is_err() {
            return;
        }
        if sock.write_all(&body[..send_limit]).is_err() {
            return;
        }

        if close_after {
            let _ = sock.shutdown(Shutdown::Both);
            return;
        }
        // Redirect probes never reuse the connection; real servers close
        // them quickly, and a fast close keeps the resolver moving.
        if range == Some((0, 1)) {
            return;
        }
    }
}

/// Read one request's head (everything through CRLFCRLF).
fn read_request(sock: &mut TcpStream) -> Option<Vec<u8>> {
    let mut buf = Vec::new();
    let mut scratch = [0u8; 512];
    loop {
        if buf.windows(4).any(|w| w == b"\r\n\r\n") {
            return Some(buf);
        }
        match sock.read(&mut scratch) {
            Ok(0) | Err(_) => return None,
            Ok(n) => buf.extend_from_slice(&scratch[..n]),
        }
    }
}

/// Extract the path (no leading slash) and the `Range: bytes=a-b` pair.
fn parse_request(request: &[u8]) -> Option<(String, Option<(usize, usize)>)> {
    let text = String::from_utf8_lossy(request);
    let mut lines = text.lines();
    let request_line = lines.next()?;
    let mut parts = request_line.split(' ');
    if parts.next()? != "GET" {
        return None;
    }
    let path = parts.next()?.trim_start_matches('/').to_string();

    let mut range = None;
    for line in lines {
        let lower = line.to_ascii_lowercase();
        if let Some(value) = lower.strip_prefix("range: bytes=") {
            let (a, b) = value.split_once('-')?;
            range = Some((a.trim().parse().ok()?, b.trim().parse().ok()?));
        }
    }
    Some((path, range))
}
