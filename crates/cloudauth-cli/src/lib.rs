//! # cloudauth CLI
//!
//! Thin command-line front end over `cloudauth-azure`: log a provider in,
//! log it out, or print the environment a spawned tool should use.

pub mod cli;
pub mod error;
pub mod logging;

pub use cli::*;
pub use error::*;
