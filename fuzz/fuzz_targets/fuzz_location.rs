//! Fuzz the repository location parser: splitting, appending and redirect
//! rewriting must never panic or truncate silently.

#![no_main]

use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(text) = core::str::from_utf8(data) {
        let mut loc = hearthlink::location::RepoLocation::new();
        let _ = loc.set_current(text);
        let _ = loc.append_file(text);
        let _ = loc.set_from_redirect(text);
    }
});
