//! Deterministic, pure logic shared by the development cycle.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data structures and return deterministic outputs suitable for tests.

pub mod diagnostics;
pub mod scheduler;
pub mod solution;
pub mod types;
pub mod verification;
