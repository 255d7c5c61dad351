//! Gatepost capture host library.
//!
//! This library exposes internal modules for integration testing.
//! In production, `gatepost-host` is used as a binary (main.rs).

pub mod worker;
