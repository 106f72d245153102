//! Repository location tracking across redirects.
//!
//! A repository is addressed as `host[/path]` with no scheme. The current
//! (host, path) pair starts at the configured repository and is rewritten on
//! every 302 hop until the resolver settles. Both components live in
//! fixed-capacity buffers; overflow is an error, never a truncation.

use crate::config::{HOST_LEN, LOCATION_LEN};
use crate::error::HttpError;

/// The mutable "current location" of an update attempt.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RepoLocation {
    host: heapless::String<HOST_LEN>,
    path: heapless::String<LOCATION_LEN>,
}

impl RepoLocation {
    pub fn new() -> Self {
        Self::default()
    }

    /// Split `host[/path]` on the first `/`. The prefix becomes the host,
    /// the suffix (without the `/`) the path; no slash means the whole
    /// string is the host and the path is empty. Case is preserved; no URL
    /// decoding or percent-encoding is performed.
    pub fn set_current(&mut self, repo: &str) -> Result<(), HttpError> {
        let (host, path) = match repo.find('/') {
            Some(idx) => (&repo[..idx], &repo[idx + 1..]),
            None => (repo, ""),
        };

        self.host.clear();
        self.path.clear();
        self.host
            .push_str(host)
            .map_err(|()| HttpError::BadLocation)?;
        self.path
            .push_str(path)
            .map_err(|()| HttpError::BadLocation)?;
        Ok(())
    }

    /// Append a file name to the path: `path + "/" + file`, or just `file`
    /// when the path is empty.
    pub fn append_file(&mut self, file: &str) -> Result<(), HttpError> {
        if !self.path.is_empty() {
            self.path.push('/').map_err(|()| HttpError::BadLocation)?;
        }
        self.path
            .push_str(file)
            .map_err(|()| HttpError::BadLocation)
    }

    /// Rewrite the current pair from a 302 `Location:` value.
    ///
    /// Accepts exactly the absolute forms `scheme://host/...` and
    /// `//host/...`. The original installer took any URL containing `//`
    /// anywhere; that quirk is gone — anything else is rejected.
    pub fn set_from_redirect(&mut self, url: &str) -> Result<(), HttpError> {
        let rest = if let Some(rest) = url.strip_prefix("//") {
            rest
        } else if let Some(sep) = url.find("://") {
            let scheme = &url[..sep];
            if scheme.is_empty() || !scheme.bytes().all(|b| b.is_ascii_alphabetic()) {
                return Err(HttpError::BadLocation);
            }
            &url[sep + 3..]
        } else {
            return Err(HttpError::BadLocation);
        };

        if rest.is_empty() || rest.starts_with('/') {
            return Err(HttpError::BadLocation);
        }
        self.set_current(rest)
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn path(&self) -> &str {
        &self.path
    }
}
