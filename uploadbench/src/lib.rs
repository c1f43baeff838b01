//! A benchmark harness that uploads random payloads to a blob storage endpoint through several
//! HTTP stacks and prints the throughput of each.
//!
//! The payload is a [`LargeStream`], which produces a fixed number of random bytes in bounded
//! chunks, so that arbitrarily large uploads never have to be materialized in memory. Uploads are
//! performed by interchangeable [`Transport`](transport::Transport) implementations:
//!
//! - [`Http1Transport`](transport::Http1Transport): a single persistent HTTP/1.1 connection
//!   without any middleware.
//! - [`ReqwestTransport`](transport::ReqwestTransport): a pooled [`reqwest`] client.
//!
//! Either transport can be wrapped into a [`Pipeline`](pipeline::Pipeline), which adds the
//! standard blob service headers, to compare the cost of the extra layer.
#![warn(missing_docs)]
#![warn(missing_debug_implementations)]

pub mod bench;
pub mod blob;
pub mod config;
pub mod observability;
pub mod payload;
pub mod pipeline;
pub mod transport;

mod error;

pub use crate::bench::run;
pub use crate::config::Config;
pub use crate::error::{Error, Result};
pub use crate::payload::{Chunk, LargeStream};
