//! Command implementations for the CLI
//!
//! - start: Start the gateway server
//! - test: Test configuration validity
//! - config: Configuration display and validation
//! - translate: One-shot translation from the command line

pub mod config;
pub mod start;
pub mod test;
pub mod translate;
