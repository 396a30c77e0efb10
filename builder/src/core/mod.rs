//! Deterministic, pure logic shared by the builder core.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data structures and return deterministic outputs suitable for tests.

pub mod budget;
pub mod fingerprint;
pub mod path;
pub mod session;
pub mod termination;
pub mod tools;
pub mod types;
pub mod workspace;
