//! demix core - serverless vocal removal
//!
//! Takes a base64 audio payload, runs an external source-separation tool to
//! strip the vocals, and returns the accompaniment as base64:
//!
//! 1. **Codec**: base64 payload <-> files in a per-job workspace
//! 2. **Workspace**: uniquely named scratch directories, released on every path
//! 3. **Separation**: the tool invocation, its timeout and output discovery
//! 4. **Job**: the [`job::Processor`] that sequences the above and never fails
//!    to produce a response

pub mod codec;
pub mod config;
pub mod device;
pub mod error;
pub mod job;
pub mod separation;
pub mod workspace;

pub use error::{JobError, Result};
pub use job::{JobResponse, Processor};
