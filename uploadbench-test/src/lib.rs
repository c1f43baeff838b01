//! Test utilities for the upload benchmark.
//!
//! This crate provides an in-process blob endpoint and logging setup for integration tests. See
//! the modules for all available utilities.

pub mod server;
pub mod tracing;
