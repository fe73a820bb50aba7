//! Concrete storage backends for the Carelog key-value contract.
//! Records are written as-is; encryption is applied above this layer.

pub mod file_store;
