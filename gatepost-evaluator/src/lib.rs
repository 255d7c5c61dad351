//! Gatepost evaluator library.
//!
//! This library exposes internal modules for integration testing.
//! In production, `gatepost-evaluator` is used as a binary (main.rs).

pub mod worker;
