//! IIIF Loader Common Library
//!
//! Shared error handling and logging setup for the IIIF loader workspace
//! members.
//!
//! # Example
//!
//! ```no_run
//! use iiif_common::logging::{init_logging, LogConfig};
//!
//! fn main() -> anyhow::Result<()> {
//!     let config = LogConfig::from_env()?;
//!     init_logging(&config)?;
//!     Ok(())
//! }
//! ```

pub mod error;
pub mod logging;

// Re-export commonly used types
pub use error::{CommonError, Result};
