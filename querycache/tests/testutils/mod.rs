//! Test utilities for querycache integration tests
//!
//! - TestFixture: a cache wired to an in-memory workout data source
//! - RecordingWarmer: a warmer that logs calls and fails on demand

#![allow(dead_code)]

pub mod test_fixture;

/// Initialize logging once per test binary; honours RUST_LOG
pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}
