//! Integration test driver for `tests/integration/` submodule.
//!
//! Each `mod` below maps to a file that exercises a specific subsystem
//! against the mock repository server.  All tests run on the host
//! (x86_64) with no real hardware required.

mod download_tests;
mod mock_repo;
mod update_flow_tests;
