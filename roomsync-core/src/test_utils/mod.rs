//! Test utilities shared by unit and integration tests
//!
//! Fixtures build rows, messages and profiles from plain string ids; the
//! async helpers bound every wait so a broken test fails instead of hanging.

pub mod async_helpers;
pub mod fixtures;

pub use async_helpers::*;
pub use fixtures::*;
