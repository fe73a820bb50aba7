//! Core contracts for Carelog: the key-value storage layer, the registry of sensitive
//! record categories, and the password prompt used to suspend on user input.
//! This crate is intentionally small to keep dependency surface minimal.

pub mod categories;
pub mod prompt;
pub mod storage;
