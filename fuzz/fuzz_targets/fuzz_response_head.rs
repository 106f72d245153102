//! Fuzz the tolerant HTTP response-head parser with arbitrary bytes.

#![no_main]

use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let _ = hearthlink::http::parse_response_head(data);
});
