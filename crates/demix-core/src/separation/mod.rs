//! Vocal removal via an external separation tool
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │              SeparationBackend (trait)                  │
//! │  • separate() - run the tool, locate the artifact       │
//! └─────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────┐
//! │                    DemucsBackend                        │
//! │  • builds the fixed serverless argument set             │
//! │  • process::run_with_timeout  (blocking, killable)      │
//! │  • discovery::find_artifact   (documented → recursive)  │
//! └─────────────────────────────────────────────────────────┘
//! ```
//!
//! [`ModelWarmer`] pre-loads models at process start.

mod backend;
mod config;
pub mod discovery;
mod model;
pub mod process;

pub use backend::{DemucsBackend, SeparationBackend, SeparationResult, JOBS, OVERLAP, SHIFTS};
pub use config::{OutputFormat, SeparationConfig, WarmupConfig};
pub use model::{render_args, ModelWarmer, WarmupReport};
