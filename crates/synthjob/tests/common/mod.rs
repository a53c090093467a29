//! Shared test utilities for synthjob integration tests.

pub mod builders;
pub mod harness;

#[allow(unused_imports)]
pub use builders::*;
pub use harness::TestHarness;
